use serde::{Deserialize, Serialize};

use crate::models::exercise::{ChoiceQuestion, ExerciseBody};
use crate::models::Exercise;

/// A learner's answer to one exercise, as posted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Index of the chosen option of a single-question QCM.
    Choice(usize),
    /// One chosen option per question (quiz, scenario); `None` is unanswered.
    Choices(Vec<Option<usize>>),
    /// One verdict per true/false statement.
    Statements(Vec<bool>),
    /// For each left item, the index of the right item it was matched with.
    Pairs(Vec<usize>),
    /// Original item indices in the order the learner placed them.
    Order(Vec<usize>),
    Numbers(Vec<f64>),
    Ratings(Vec<u8>),
    /// Video watched, text read, cards flipped.
    Acknowledged,
}

fn percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((correct as f64 / total as f64) * 100.0).round() as u8
}

fn grade_questions(questions: &[ChoiceQuestion], chosen: &[Option<usize>]) -> u8 {
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(index, question)| {
            let picked = chosen.get(*index).copied().flatten();
            picked.is_some() && picked == question.correct_index()
        })
        .count();
    percent(correct, questions.len())
}

fn positional_matches(expected_len: usize, given: &[usize]) -> usize {
    (0..expected_len)
        .filter(|index| given.get(*index) == Some(index))
        .count()
}

/// Scores an answer from 0 to 100. Returns `None` when the answer does not
/// fit the exercise type, which callers treat as a missing answer.
pub fn grade(exercise: &Exercise, answer: &Answer) -> Option<u8> {
    let score = match (&exercise.body, answer) {
        (
            ExerciseBody::Video(_) | ExerciseBody::Lecture(_) | ExerciseBody::Flashcards(_),
            _,
        ) => 100,
        (ExerciseBody::LikertScale(_), Answer::Acknowledged) => 100,
        (ExerciseBody::LikertScale(content), Answer::Ratings(ratings)) => {
            if ratings.len() < content.items.len() {
                return None;
            }
            100
        }
        (ExerciseBody::Qcm(content), Answer::Choice(index)) => {
            if *index == content.correct_answer {
                100
            } else {
                0
            }
        }
        (ExerciseBody::Qcm(content), Answer::Choices(chosen)) => {
            match chosen.first().copied().flatten() {
                Some(index) if index == content.correct_answer => 100,
                Some(_) => 0,
                None => return None,
            }
        }
        (ExerciseBody::Quiz(content), Answer::Choices(chosen)) => {
            grade_questions(&content.questions, chosen)
        }
        (ExerciseBody::QcmScenario(content), Answer::Choices(chosen)) => {
            grade_questions(&content.questions, chosen)
        }
        (ExerciseBody::TrueFalse(content), Answer::Statements(verdicts)) => {
            let correct = content
                .items
                .iter()
                .zip(verdicts)
                .filter(|(item, verdict)| item.answer == **verdict)
                .count();
            percent(correct, content.items.len())
        }
        (ExerciseBody::Matching(content), Answer::Pairs(pairs)) => {
            percent(positional_matches(content.pairs.len(), pairs), content.pairs.len())
        }
        (ExerciseBody::DragDrop(content), Answer::Order(order)) => {
            percent(positional_matches(content.items.len(), order), content.items.len())
        }
        (ExerciseBody::Calculation(content), Answer::Numbers(values)) => {
            let correct = content
                .questions
                .iter()
                .zip(values)
                .filter(|(question, value)| {
                    value.is_finite() && (**value - question.answer).abs() <= question.tolerance
                })
                .count();
            percent(correct, content.questions.len())
        }
        _ => {
            tracing::debug!(
                "Answer {:?} does not fit a {} exercise",
                answer,
                exercise.type_name()
            );
            return None;
        }
    };
    Some(score)
}

/// Mean score of a step whose exercises are answered in order. Any missing
/// or mismatched answer makes the whole submission missing.
pub fn grade_step(exercises: &[Exercise], answers: &[Answer]) -> Option<u8> {
    if exercises.is_empty() {
        return answers.first().map(|_| 100);
    }
    if answers.len() < exercises.len() {
        return None;
    }

    let mut total = 0u32;
    for (exercise, answer) in exercises.iter().zip(answers) {
        total += grade(exercise, answer)? as u32;
    }
    Some((total as f64 / exercises.len() as f64).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(value: serde_json::Value) -> Exercise {
        serde_json::from_value(value).expect("valid exercise")
    }

    #[test]
    fn qcm_is_all_or_nothing() {
        let qcm = exercise(json!({
            "type": "qcm",
            "content": {"question": "?", "options": ["a", "b", "c"], "correctAnswer": 2}
        }));
        assert_eq!(grade(&qcm, &Answer::Choice(2)), Some(100));
        assert_eq!(grade(&qcm, &Answer::Choice(0)), Some(0));
        assert_eq!(grade(&qcm, &Answer::Statements(vec![true])), None);
    }

    #[test]
    fn quiz_scores_percentage_of_questions() {
        let quiz = exercise(json!({
            "type": "quiz",
            "content": {"questions": [
                {"question": "1", "options": ["a", "b"], "correctAnswer": 0},
                {"question": "2", "options": ["a", {"text": "b", "correct": true}]},
                {"question": "3", "options": ["a", "b"], "correctAnswer": 1}
            ]}
        }));
        let answer = Answer::Choices(vec![Some(0), Some(1), None]);
        assert_eq!(grade(&quiz, &answer), Some(67));
    }

    #[test]
    fn true_false_and_matching() {
        let tf = exercise(json!({
            "type": "true_false",
            "content": {"items": [
                {"statement": "A", "answer": true},
                {"statement": "B", "answer": false}
            ]}
        }));
        assert_eq!(grade(&tf, &Answer::Statements(vec![true, true])), Some(50));

        let matching = exercise(json!({
            "type": "matching",
            "content": {"pairs": [
                {"left": "EXW", "right": "Ex Works"},
                {"left": "FOB", "right": "Free On Board"}
            ]}
        }));
        assert_eq!(grade(&matching, &Answer::Pairs(vec![0, 1])), Some(100));
        assert_eq!(grade(&matching, &Answer::Pairs(vec![1, 0])), Some(0));
    }

    #[test]
    fn calculation_uses_tolerance() {
        let calc = exercise(json!({
            "type": "calculation",
            "content": {"questions": [
                {"question": "droits", "answer": 120.0, "tolerance": 0.5},
                {"question": "tva", "answer": 20.0}
            ]}
        }));
        assert_eq!(grade(&calc, &Answer::Numbers(vec![120.4, 20.0])), Some(100));
        assert_eq!(grade(&calc, &Answer::Numbers(vec![121.0, 20.0])), Some(50));
    }

    #[test]
    fn consultation_accepts_any_answer() {
        let video = exercise(json!({"type": "video", "content": {"url": "x.mp4"}}));
        assert_eq!(grade(&video, &Answer::Acknowledged), Some(100));
    }

    #[test]
    fn step_grade_is_mean_and_requires_every_answer() {
        let exercises = vec![
            exercise(json!({"type": "qcm", "content": {"question": "?", "options": ["a", "b"], "correctAnswer": 0}})),
            exercise(json!({"type": "drag_drop", "content": {"items": ["1", "2", "3", "4"]}})),
        ];
        let answers = vec![Answer::Choice(0), Answer::Order(vec![0, 1, 3, 2])];
        assert_eq!(grade_step(&exercises, &answers), Some(75));
        assert_eq!(grade_step(&exercises, &answers[..1]), None);
        assert_eq!(grade_step(&[], &[Answer::Acknowledged]), Some(100));
        assert_eq!(grade_step(&[], &[]), None);
    }
}
