use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::extractors::AppJson;
use crate::models::{Chapter, Exercise, Level};
use crate::services::exercise_normalizer::{self, into_exercise};
use crate::services::AppState;

#[derive(Debug)]
pub enum ContentApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ContentApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ContentApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ContentApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ContentApiError::Internal(msg) => {
                tracing::error!("Content API error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16()
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterOverview {
    pub id: String,
    pub title: String,
    pub emoji: Option<String>,
    pub color: Option<String>,
    pub step_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOverview {
    pub id: String,
    pub title: String,
    pub description: String,
    pub chapters: Vec<ChapterOverview>,
}

impl From<&Chapter> for ChapterOverview {
    fn from(chapter: &Chapter) -> Self {
        Self {
            id: chapter.id.clone(),
            title: chapter.title.clone(),
            emoji: chapter.emoji.clone(),
            color: chapter.color.clone(),
            step_count: chapter.steps.len(),
        }
    }
}

impl From<&Level> for LevelOverview {
    fn from(level: &Level) -> Self {
        Self {
            id: level.id.clone(),
            title: level.title.clone(),
            description: level.description.clone(),
            chapters: level.chapters.iter().map(ChapterOverview::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExercises<'a> {
    pub step_id: &'a str,
    pub title: &'a str,
    pub exercises: &'a [Exercise],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeResponse {
    pub exercise: Value,
    pub valid: bool,
    pub errors: Vec<String>,
}

fn find_level<'a>(state: &'a AppState, level_id: &str) -> Result<&'a Level, ContentApiError> {
    state
        .catalog
        .level(level_id)
        .ok_or_else(|| ContentApiError::NotFound(format!("Level {} not found", level_id)))
}

/// GET /api/levels
pub async fn list_levels(State(state): State<Arc<AppState>>) -> Json<Vec<LevelOverview>> {
    Json(state.catalog.levels.iter().map(LevelOverview::from).collect())
}

/// GET /api/levels/{level_id}/chapters
pub async fn list_chapters(
    State(state): State<Arc<AppState>>,
    Path(level_id): Path<String>,
) -> Result<Json<Vec<Chapter>>, ContentApiError> {
    let level = find_level(&state, &level_id)?;
    Ok(Json(level.chapters.clone()))
}

/// GET /api/levels/{level_id}/exercises/{chapter_id}
pub async fn chapter_exercises(
    State(state): State<Arc<AppState>>,
    Path((level_id, chapter_id)): Path<(String, String)>,
) -> Result<Response, ContentApiError> {
    let level = find_level(&state, &level_id)?;
    let chapter = level
        .chapters
        .iter()
        .find(|chapter| chapter.id == chapter_id)
        .ok_or_else(|| {
            ContentApiError::NotFound(format!(
                "Chapter {} not found in level {}",
                chapter_id, level_id
            ))
        })?;

    let steps: Vec<StepExercises<'_>> = chapter
        .steps
        .iter()
        .map(|step| StepExercises {
            step_id: &step.id,
            title: &step.title,
            exercises: &step.exercises,
        })
        .collect();

    let steps = serde_json::to_value(&steps)
        .map_err(|e| ContentApiError::Internal(format!("Failed to encode exercises: {}", e)))?;
    let body = json!({
        "levelId": level.id,
        "chapterId": chapter.id,
        "steps": steps,
    });
    Ok(Json(body).into_response())
}

/// POST /api/exercises/normalize
pub async fn normalize_exercise(
    AppJson(payload): AppJson<Value>,
) -> Result<Json<NormalizeResponse>, ContentApiError> {
    if !payload.is_object() {
        return Err(ContentApiError::BadRequest(
            "Exercise must be a JSON object".to_string(),
        ));
    }

    let normalized = exercise_normalizer::normalize(&payload);
    let errors = match into_exercise(&normalized) {
        Ok(exercise) => exercise.validate(),
        Err(e) => vec![e.to_string()],
    };

    Ok(Json(NormalizeResponse {
        exercise: normalized,
        valid: errors.is_empty(),
        errors,
    }))
}
