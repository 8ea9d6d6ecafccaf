use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::metrics::CATALOG_CHAPTERS;
use crate::models::{ContentCatalog, Level};

use super::exercise_normalizer::{into_exercise, ExerciseNormalizer, NormalizerStats};

const LEVELS_FILE: &str = "levels.json";
const EXERCISES_DIR: &str = "exercises";

/// Catalog loaded from disk plus the normalization report of its exercises.
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub catalog: ContentCatalog,
    pub stats: NormalizerStats,
}

/// Reads the course structure from a data directory:
///
/// ```text
/// data/
///   levels.json              levels with their chapters and steps
///   exercises/<chapter>.json exercises attached to the chapter's steps
/// ```
pub struct ContentService {
    data_dir: PathBuf,
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Takes the array stored under the first present key, or the value itself
/// when it already is an array.
fn take_list(value: &mut Value, keys: &[&str]) -> Option<Vec<Value>> {
    if let Value::Array(items) = value {
        return Some(std::mem::take(items));
    }
    let object = value.as_object_mut()?;
    keys.iter().find_map(|key| match object.remove(*key) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    })
}

fn exercise_key(step: &Value) -> &'static str {
    if step.get("exercices").is_some() {
        "exercices"
    } else {
        "exercises"
    }
}

fn push_exercises(step: &mut Value, exercises: Vec<Value>) {
    let key = exercise_key(step);
    let Some(object) = step.as_object_mut() else {
        return;
    };
    match object
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(list) => list.extend(exercises),
        other => *other = Value::Array(exercises),
    }
}

/// Distributes a chapter's exercise list over its steps: one per step when
/// the counts match, consecutive chunks of `ceil(n / steps)` when there are
/// more exercises than steps. With fewer exercises, the remaining steps
/// only keep their embedded exercises.
pub fn attach_exercises(chapter_id: &str, steps: &mut [Value], exercises: Vec<Value>) {
    if exercises.is_empty() {
        return;
    }
    if steps.is_empty() {
        tracing::warn!(
            "Chapter {} has {} exercises but no steps to attach them to",
            chapter_id,
            exercises.len()
        );
        return;
    }

    let chunk_size = exercises.len().div_ceil(steps.len()).max(1);
    if exercises.len() < steps.len() {
        tracing::debug!(
            "Chapter {}: {} exercises for {} steps, trailing steps keep their own",
            chapter_id,
            exercises.len(),
            steps.len()
        );
    }

    let mut remaining = exercises.into_iter();
    for step in steps.iter_mut() {
        let chunk: Vec<Value> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        push_exercises(step, chunk);
    }
}

impl ContentService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn load_catalog(&self) -> Result<LoadedCatalog> {
        let levels_path = self.data_dir.join(LEVELS_FILE);
        let mut root = read_json(&levels_path)?;
        let raw_levels = take_list(&mut root, &["levels", "niveaux"])
            .ok_or_else(|| anyhow!("{} holds no level list", levels_path.display()))?;

        let mut normalizer = ExerciseNormalizer::new();
        let mut levels = Vec::with_capacity(raw_levels.len());
        for mut raw_level in raw_levels {
            for chapters_key in ["chapters", "chapitres"] {
                if let Some(Value::Array(chapters)) = raw_level.get_mut(chapters_key) {
                    for chapter in chapters.iter_mut() {
                        self.prepare_chapter(chapter, &mut normalizer)?;
                    }
                }
            }
            let level: Level = serde_json::from_value(raw_level)
                .with_context(|| format!("Invalid level in {}", levels_path.display()))?;
            levels.push(level);
        }

        let catalog = ContentCatalog::new(levels);
        let chapter_count = catalog.chapters().count();
        CATALOG_CHAPTERS.set(chapter_count as i64);
        normalizer.log_report();
        tracing::info!(
            "Content catalog loaded from {}: {} levels, {} chapters",
            self.data_dir.display(),
            catalog.levels.len(),
            chapter_count
        );

        Ok(LoadedCatalog {
            catalog,
            stats: normalizer.stats().clone(),
        })
    }

    fn chapter_exercises(&self, chapter_id: &str) -> Result<Vec<Value>> {
        let path = self
            .data_dir
            .join(EXERCISES_DIR)
            .join(format!("{}.json", chapter_id));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut value = read_json(&path)?;
        take_list(&mut value, &["exercises", "exercices"])
            .ok_or_else(|| anyhow!("{} holds no exercise list", path.display()))
    }

    /// Attaches external exercises, normalizes every exercise of the chapter
    /// and drops the ones that still cannot be typed.
    fn prepare_chapter(&self, chapter: &mut Value, normalizer: &mut ExerciseNormalizer) -> Result<()> {
        let Some(chapter_id) = chapter.get("id").and_then(Value::as_str).map(str::to_string) else {
            return Err(anyhow!("Chapter without id in {}", LEVELS_FILE));
        };

        let mut exercises = take_list(chapter, &["exercices", "exercises"]).unwrap_or_default();
        exercises.extend(self.chapter_exercises(&chapter_id)?);

        let steps_key = if chapter.get("etapes").is_some() {
            "etapes"
        } else {
            "steps"
        };
        if let Some(Value::Array(steps)) = chapter.get_mut(steps_key) {
            attach_exercises(&chapter_id, steps, exercises);
        } else if !exercises.is_empty() {
            tracing::warn!("Chapter {} has exercises but no steps", chapter_id);
        }

        normalizer.normalize_chapter(chapter);

        if let Some(Value::Array(steps)) = chapter.get_mut(steps_key) {
            for step in steps.iter_mut() {
                let key = exercise_key(step);
                let Some(Value::Array(list)) = step.get_mut(key) else {
                    continue;
                };
                let mut typed = Vec::with_capacity(list.len());
                for exercise in list.drain(..) {
                    match into_exercise(&exercise) {
                        Ok(valid) => typed.push(serde_json::to_value(valid)?),
                        Err(e) => {
                            tracing::warn!("Dropping exercise in chapter {}: {}", chapter_id, e);
                            // incomplete ones were already reported by the normalizer
                            if exercise.get("content").is_some_and(Value::is_object) {
                                normalizer.record_issue(&exercise, e.to_string());
                            }
                        }
                    }
                }
                *list = typed;
            }
        }
        Ok(())
    }
}
