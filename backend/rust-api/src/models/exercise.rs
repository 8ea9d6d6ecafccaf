use serde::{Deserialize, Serialize};

/// Canonical exercise: shared metadata plus one typed body. Legacy payloads
/// go through `services::exercise_normalizer` before they reach this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "titre", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(flatten)]
    pub body: ExerciseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ExerciseBody {
    Qcm(QcmContent),
    TrueFalse(TrueFalseContent),
    DragDrop(DragDropContent),
    Matching(MatchingContent),
    LikertScale(LikertContent),
    Flashcards(FlashcardsContent),
    Lecture(LectureContent),
    Video(VideoContent),
    Quiz(QuizContent),
    Calculation(CalculationContent),
    QcmScenario(ScenarioContent),
}

impl ExerciseBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExerciseBody::Qcm(_) => "qcm",
            ExerciseBody::TrueFalse(_) => "true_false",
            ExerciseBody::DragDrop(_) => "drag_drop",
            ExerciseBody::Matching(_) => "matching",
            ExerciseBody::LikertScale(_) => "likert_scale",
            ExerciseBody::Flashcards(_) => "flashcards",
            ExerciseBody::Lecture(_) => "lecture",
            ExerciseBody::Video(_) => "video",
            ExerciseBody::Quiz(_) => "quiz",
            ExerciseBody::Calculation(_) => "calculation",
            ExerciseBody::QcmScenario(_) => "qcm_scenario",
        }
    }
}

impl Exercise {
    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    pub fn is_consultation(&self) -> bool {
        matches!(
            self.body,
            ExerciseBody::Video(_) | ExerciseBody::Lecture(_) | ExerciseBody::Flashcards(_)
        )
    }

    /// Structural problems that make the exercise unplayable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match &self.body {
            ExerciseBody::Qcm(content) => {
                if content.question.trim().is_empty() {
                    errors.push("qcm: question is empty".to_string());
                }
                if content.options.len() < 2 {
                    errors.push("qcm: at least 2 options are required".to_string());
                }
                if content.correct_answer >= content.options.len() {
                    errors.push(format!(
                        "qcm: correctAnswer {} is out of range",
                        content.correct_answer
                    ));
                }
            }
            ExerciseBody::TrueFalse(content) if content.items.is_empty() => {
                errors.push("true_false: no statements".to_string());
            }
            ExerciseBody::DragDrop(content) if content.items.len() < 2 => {
                errors.push("drag_drop: at least 2 items are required".to_string());
            }
            ExerciseBody::Matching(content) if content.pairs.is_empty() => {
                errors.push("matching: no pairs".to_string());
            }
            ExerciseBody::LikertScale(content) if content.items.is_empty() => {
                errors.push("likert_scale: no items".to_string());
            }
            ExerciseBody::Flashcards(content) if content.cards.is_empty() => {
                errors.push("flashcards: no cards".to_string());
            }
            ExerciseBody::Lecture(content) if content.text.trim().is_empty() => {
                errors.push("lecture: text is empty".to_string());
            }
            ExerciseBody::Video(content) if content.url.is_none() && content.video_id.is_none() => {
                errors.push("video: url or videoId is required".to_string());
            }
            ExerciseBody::Quiz(content) => validate_questions("quiz", &content.questions, &mut errors),
            ExerciseBody::QcmScenario(content) => {
                if content.scenario.trim().is_empty() {
                    errors.push("qcm_scenario: scenario is empty".to_string());
                }
                validate_questions("qcm_scenario", &content.questions, &mut errors);
            }
            ExerciseBody::Calculation(content) => {
                if content.questions.is_empty() {
                    errors.push("calculation: no questions".to_string());
                }
                if content.questions.iter().any(|q| q.tolerance < 0.0) {
                    errors.push("calculation: negative tolerance".to_string());
                }
            }
            _ => {}
        }
        errors
    }
}

fn validate_questions(kind: &str, questions: &[ChoiceQuestion], errors: &mut Vec<String>) {
    if questions.is_empty() {
        errors.push(format!("{}: no questions", kind));
    }
    for (index, question) in questions.iter().enumerate() {
        if question.correct_index().is_none() {
            errors.push(format!("{}: question {} has no correct option", kind, index));
        }
    }
}

/// A choice label, either a bare string or an object with a correctness flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    Plain(String),
    Detailed(DetailedChoice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedChoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "texte", alias = "label")]
    pub text: String,
    #[serde(default)]
    pub correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Choice {
    pub fn text(&self) -> &str {
        match self {
            Choice::Plain(text) => text,
            Choice::Detailed(choice) => &choice.text,
        }
    }

    pub fn is_flagged_correct(&self) -> bool {
        matches!(self, Choice::Detailed(choice) if choice.correct)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcmContent {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<Choice>,
    #[serde(default)]
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrueFalseContent {
    #[serde(default)]
    pub items: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(alias = "texte", alias = "affirmation")]
    pub statement: String,
    #[serde(default, alias = "correct")]
    pub answer: bool,
}

/// Items are listed in their correct order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DragDropContent {
    #[serde(default)]
    pub items: Vec<Choice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingContent {
    #[serde(default)]
    pub pairs: Vec<MatchingPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingPair {
    #[serde(alias = "gauche")]
    pub left: String,
    #[serde(alias = "droite")]
    pub right: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikertContent {
    #[serde(default)]
    pub items: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlashcardsContent {
    #[serde(default)]
    pub cards: Vec<Flashcard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "front", alias = "question")]
    pub recto: String,
    #[serde(default, alias = "back", alias = "answer")]
    pub verso: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LectureContent {
    #[serde(default, alias = "texte")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizContent {
    #[serde(default)]
    pub questions: Vec<ChoiceQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceQuestion {
    #[serde(default)]
    pub question: String,
    #[serde(default, alias = "choix")]
    pub options: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<usize>,
}

impl ChoiceQuestion {
    pub fn correct_index(&self) -> Option<usize> {
        self.correct_answer
            .filter(|index| *index < self.options.len())
            .or_else(|| self.options.iter().position(Choice::is_flagged_correct))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationContent {
    #[serde(default)]
    pub questions: Vec<NumericQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericQuestion {
    #[serde(default)]
    pub question: String,
    pub answer: f64,
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContent {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub questions: Vec<ChoiceQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_body_with_metadata() {
        let exercise: Exercise = serde_json::from_value(json!({
            "id": "ex1",
            "titre": "Incoterms",
            "points": 20,
            "type": "qcm",
            "content": {
                "question": "Qui paie le fret en EXW ?",
                "options": ["Vendeur", {"text": "Acheteur", "correct": true}],
                "correctAnswer": 1
            }
        }))
        .expect("valid qcm");

        assert_eq!(exercise.type_name(), "qcm");
        assert_eq!(exercise.title.as_deref(), Some("Incoterms"));
        assert!(exercise.validate().is_empty());
        match exercise.body {
            ExerciseBody::Qcm(content) => {
                assert_eq!(content.options[1].text(), "Acheteur");
                assert!(content.options[1].is_flagged_correct());
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn consultation_variants() {
        let video: Exercise =
            serde_json::from_value(json!({"type": "video", "content": {"url": "a.mp4"}})).unwrap();
        let quiz: Exercise =
            serde_json::from_value(json!({"type": "quiz", "content": {"questions": []}})).unwrap();
        assert!(video.is_consultation());
        assert!(!quiz.is_consultation());
        assert_eq!(quiz.validate(), vec!["quiz: no questions".to_string()]);
    }

    #[test]
    fn question_correct_index_falls_back_to_flag() {
        let question = ChoiceQuestion {
            question: "?".to_string(),
            options: vec![
                Choice::Plain("a".to_string()),
                Choice::Detailed(DetailedChoice {
                    id: None,
                    text: "b".to_string(),
                    correct: true,
                    explanation: None,
                }),
            ],
            correct_answer: Some(7),
        };
        assert_eq!(question.correct_index(), Some(1));
    }
}
