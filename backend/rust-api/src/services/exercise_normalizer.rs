use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::metrics::EXERCISES_NORMALIZED_TOTAL;
use crate::models::Exercise;

pub const KNOWN_TYPES: &[&str] = &[
    "qcm",
    "true_false",
    "drag_drop",
    "matching",
    "likert_scale",
    "flashcards",
    "lecture",
    "video",
    "quiz",
    "calculation",
    "qcm_scenario",
];

/// Root-level keys that belong inside `content` when no type-specific rule
/// applied.
const STRUCTURAL_KEYS: &[&str] = &[
    "pairs",
    "statuses",
    "scenario",
    "questions",
    "items",
    "leftItems",
    "rightItems",
    "targets",
    "cards",
    "question",
    "options",
    "rows",
    "text",
    "timeline",
    "url",
    "videoId",
    "description",
    "recto",
    "verso",
];

/// Legacy metadata carried by a nested `exercice` object that overrides the
/// root value.
const LIFTED_METADATA: &[&str] = &["points", "titre", "title"];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("exercise is not a JSON object")]
    NotAnObject,
    #[error("exercise has no type")]
    MissingType,
    #[error("unknown exercise type: {0}")]
    UnknownType(String),
    #[error("exercise {0} has no content after normalization")]
    MissingContent(String),
    #[error("invalid exercise content: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeIssue {
    pub exercise_id: Option<String>,
    #[serde(rename = "type")]
    pub exercise_type: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizerStats {
    pub total_processed: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub errors: Vec<NormalizeIssue>,
}

impl NormalizerStats {
    /// Share of processed exercises that came out with content, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_processed == 0 {
            return None;
        }
        Some(self.normalized as f64 / self.total_processed as f64 * 100.0)
    }
}

/// Maps legacy and singular type names onto the canonical ones.
pub fn canonical_type(raw: &str) -> &str {
    match raw {
        "flashcard" => "flashcards",
        "dragdrop" | "drag-drop" => "drag_drop",
        "vrai_faux" | "true-false" => "true_false",
        "likert" => "likert_scale",
        "scenario" => "qcm_scenario",
        other => other,
    }
}

fn has_content(map: &Map<String, Value>) -> bool {
    matches!(map.get("content"), Some(Value::Object(content)) if !content.is_empty())
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| map.remove(*key))
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str))
}

fn is_true(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn object(entries: Vec<(&str, Value)>) -> Value {
    Value::Object(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// Moves the fields of a nested legacy `exercice` object to the root.
fn lift_legacy_object(map: &mut Map<String, Value>) {
    let Some(Value::Object(legacy)) = map.remove("exercice") else {
        return;
    };
    for (key, value) in legacy {
        if key == "type" {
            continue;
        }
        if LIFTED_METADATA.contains(&key.as_str()) {
            map.insert(key, value);
        } else {
            map.entry(key).or_insert(value);
        }
    }
}

fn qcm_content(map: &mut Map<String, Value>) -> Option<Value> {
    let choices = map.remove("choix");
    let options = match &choices {
        Some(Value::Array(choices)) => Value::Array(choices.clone()),
        _ => map.remove("options")?,
    };

    let flagged = match &choices {
        Some(Value::Array(choices)) => choices.iter().position(|choice| is_true(choice, "correct")),
        _ => None,
    };
    let correct_answer = map
        .remove("correctAnswer")
        .filter(Value::is_u64)
        .unwrap_or_else(|| Value::from(flagged.unwrap_or(0)));

    let question = map.remove("question").unwrap_or_else(|| Value::from(""));
    let explanation = take_first(map, &["explication", "explanation"]).unwrap_or_else(|| Value::from(""));

    Some(object(vec![
        ("question", question),
        ("options", options),
        ("correctAnswer", correct_answer),
        ("explanation", explanation),
    ]))
}

fn true_false_content(map: &mut Map<String, Value>) -> Option<Value> {
    if let Some(Value::Array(statements)) = map.remove("affirmations") {
        let items = statements
            .iter()
            .map(|statement| {
                let text = statement
                    .as_str()
                    .or_else(|| string_field(statement, &["texte", "affirmation", "statement", "text"]))
                    .unwrap_or_default();
                object(vec![
                    ("statement", Value::from(text)),
                    (
                        "answer",
                        Value::from(is_true(statement, "correct") || is_true(statement, "answer")),
                    ),
                ])
            })
            .collect();
        return Some(object(vec![("items", Value::Array(items))]));
    }
    let items = map.remove("items")?;
    Some(object(vec![("items", items)]))
}

fn flashcards_content(map: &mut Map<String, Value>) -> Option<Value> {
    let Value::Array(cards) = take_first(map, &["cartes", "cards"])? else {
        return None;
    };
    let cards = cards
        .into_iter()
        .enumerate()
        .map(|(index, card)| match card {
            Value::Object(mut fields) => {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::from(format!("card{}", index + 1)));
                Value::Object(fields)
            }
            other => other,
        })
        .collect();
    Some(object(vec![("cards", Value::Array(cards))]))
}

fn typed_content(kind: &str, map: &mut Map<String, Value>) -> Option<Value> {
    match kind {
        "qcm" => qcm_content(map),
        "true_false" => true_false_content(map),
        "flashcards" => flashcards_content(map),
        "drag_drop" => {
            let items = map.remove("items")?;
            Some(object(vec![("items", items)]))
        }
        "likert_scale" => {
            let items = map.remove("items")?;
            let mut entries = vec![("items", items)];
            if let Some(scale) = take_first(map, &["echelle", "scale"]) {
                entries.push(("scale", scale));
            }
            Some(object(entries))
        }
        "matching" => {
            let pairs = take_first(map, &["paires", "pairs"])?;
            Some(object(vec![("pairs", pairs)]))
        }
        "lecture" => {
            let text = take_first(map, &["texte", "text"])?;
            Some(object(vec![("text", text)]))
        }
        "quiz" | "calculation" => {
            let questions = map.remove("questions")?;
            Some(object(vec![("questions", questions)]))
        }
        "qcm_scenario" => {
            let scenario = map.remove("scenario")?;
            let questions = map.remove("questions").unwrap_or_else(|| Value::Array(Vec::new()));
            Some(object(vec![("scenario", scenario), ("questions", questions)]))
        }
        _ => None,
    }
}

fn wrap_structural_keys(map: &mut Map<String, Value>) -> Option<Value> {
    let content: Map<String, Value> = STRUCTURAL_KEYS
        .iter()
        .filter_map(|key| map.remove(*key).map(|value| (key.to_string(), value)))
        .collect();
    if content.is_empty() {
        None
    } else {
        Some(Value::Object(content))
    }
}

/// Converts any known legacy exercise shape into the canonical
/// `{type, content, ...metadata}` shape. Idempotent; values that are not
/// objects are returned unchanged.
pub fn normalize(exercise: &Value) -> Value {
    let Value::Object(original) = exercise else {
        return exercise.clone();
    };
    let mut map = original.clone();

    let raw_type = map
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| map.get("exercice").and_then(|legacy| legacy.get("type")).and_then(Value::as_str))
        .map(str::to_string);
    let kind = raw_type.as_deref().map(canonical_type).map(str::to_string);
    if let Some(kind) = &kind {
        map.insert("type".to_string(), Value::from(kind.as_str()));
    }

    if has_content(&map) {
        return Value::Object(map);
    }

    lift_legacy_object(&mut map);

    let content = kind
        .as_deref()
        .and_then(|kind| typed_content(kind, &mut map))
        .or_else(|| wrap_structural_keys(&mut map));
    if let Some(content) = content {
        map.insert("content".to_string(), content);
    }

    Value::Object(map)
}

/// Normalizes and converts to the typed model.
pub fn into_exercise(value: &Value) -> Result<Exercise, NormalizeError> {
    let normalized = normalize(value);
    let Value::Object(map) = &normalized else {
        return Err(NormalizeError::NotAnObject);
    };
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingType)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(NormalizeError::UnknownType(kind.to_string()));
    }
    if !map.get("content").is_some_and(Value::is_object) {
        let id = string_field(&normalized, &["id"]).unwrap_or("?").to_string();
        return Err(NormalizeError::MissingContent(id));
    }
    Ok(serde_json::from_value(normalized)?)
}

/// Normalizer that keeps a running report of what it processed.
#[derive(Debug, Default)]
pub struct ExerciseNormalizer {
    stats: NormalizerStats,
}

impl ExerciseNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &NormalizerStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = NormalizerStats::default();
    }

    pub fn record_issue(&mut self, exercise: &Value, message: String) {
        self.stats.errors.push(NormalizeIssue {
            exercise_id: string_field(exercise, &["id"]).map(str::to_string),
            exercise_type: string_field(exercise, &["type"]).map(str::to_string),
            message,
        });
    }

    pub fn normalize(&mut self, exercise: &Value) -> Value {
        self.stats.total_processed += 1;

        if !exercise.is_object() {
            self.stats.skipped += 1;
            self.record_issue(exercise, "exercise is not an object".to_string());
            EXERCISES_NORMALIZED_TOTAL.with_label_values(&["skipped"]).inc();
            return exercise.clone();
        }

        let normalized = normalize(exercise);
        if normalized.get("content").is_some_and(Value::is_object) {
            self.stats.normalized += 1;
            EXERCISES_NORMALIZED_TOTAL.with_label_values(&["normalized"]).inc();
        } else {
            self.record_issue(&normalized, "incomplete normalization: content is missing".to_string());
            EXERCISES_NORMALIZED_TOTAL.with_label_values(&["incomplete"]).inc();
        }
        normalized
    }

    /// Normalizes then converts, recording conversion failures in the report.
    pub fn into_exercise(&mut self, exercise: &Value) -> Result<Exercise, NormalizeError> {
        let normalized = self.normalize(exercise);
        match into_exercise(&normalized) {
            Ok(typed) => Ok(typed),
            Err(e) => {
                if normalized.get("content").is_some_and(Value::is_object) {
                    self.record_issue(&normalized, e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Normalizes the exercises of every step of a raw chapter, and the
    /// chapter-level exercise list when there is one.
    pub fn normalize_chapter(&mut self, chapter: &mut Value) {
        for steps_key in ["etapes", "steps"] {
            if let Some(Value::Array(steps)) = chapter.get_mut(steps_key) {
                for step in steps.iter_mut() {
                    self.normalize_list(step);
                }
            }
        }
        self.normalize_list(chapter);
    }

    fn normalize_list(&mut self, holder: &mut Value) {
        for key in ["exercices", "exercises"] {
            if let Some(Value::Array(exercises)) = holder.get_mut(key) {
                let normalized: Vec<Value> = exercises.iter().map(|e| self.normalize(e)).collect();
                *exercises = normalized;
            }
        }
    }

    pub fn log_report(&self) {
        let rate = self
            .stats
            .success_rate()
            .map(|rate| format!("{:.2}%", rate))
            .unwrap_or_else(|| "N/A".to_string());
        tracing::info!(
            "Exercise normalization: {} processed, {} normalized, {} skipped, success rate {}",
            self.stats.total_processed,
            self.stats.normalized,
            self.stats.skipped,
            rate
        );
        for issue in &self.stats.errors {
            tracing::warn!(
                "Exercise {} ({}): {}",
                issue.exercise_id.as_deref().unwrap_or("?"),
                issue.exercise_type.as_deref().unwrap_or("?"),
                issue.message
            );
        }
    }
}
