use serde::{Deserialize, Serialize};

use super::exercise::Exercise;

pub type LevelId = String;
pub type ChapterId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Completed by visiting (video, reading, flashcards, milestones).
    Consultation,
    /// Completed by a scored submission against a threshold.
    Validation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    #[serde(alias = "titre")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "chapitres")]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    #[serde(alias = "titre")]
    pub title: String,
    #[serde(default, alias = "couleur")]
    pub color: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default, alias = "etapes")]
    pub steps: Vec<Step>,
    #[serde(default, alias = "objectifs")]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub portfolio: Option<PortfolioMilestone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioMilestone {
    #[serde(default, alias = "titre")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(alias = "titre")]
    pub title: String,
    #[serde(default, alias = "points")]
    pub max_points: Option<u32>,
    #[serde(default)]
    pub passing_score: Option<u8>,
    #[serde(default)]
    pub kind: Option<StepKind>,
    #[serde(default)]
    pub consultation: Option<bool>,
    #[serde(default, alias = "exercices")]
    pub exercises: Vec<Exercise>,
}

impl Step {
    /// Explicit kind wins; otherwise a step made only of consultation
    /// exercises is a consultation step.
    pub fn kind(&self) -> StepKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match self.consultation {
            Some(true) => return StepKind::Consultation,
            Some(false) => return StepKind::Validation,
            None => {}
        }
        if !self.exercises.is_empty() && self.exercises.iter().all(Exercise::is_consultation) {
            StepKind::Consultation
        } else {
            StepKind::Validation
        }
    }

    pub fn passing_score(&self, validation_default: u8) -> u8 {
        if let Some(score) = self.passing_score {
            return score.min(100);
        }
        match self.kind() {
            StepKind::Consultation => 100,
            StepKind::Validation => validation_default,
        }
    }

    pub fn points(&self, default_points: u32) -> u32 {
        self.max_points.unwrap_or(default_points)
    }
}

impl Chapter {
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn has_portfolio(&self) -> bool {
        self.portfolio.is_some()
    }
}

/// Ordered levels as delivered by the content API. The catalog is the
/// read-only structure every progress computation is projected onto.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentCatalog {
    pub levels: Vec<Level>,
}

impl ContentCatalog {
    pub fn new(levels: Vec<Level>) -> Self {
        Self { levels }
    }

    pub fn level(&self, level_id: &str) -> Option<&Level> {
        self.levels.iter().find(|level| level.id == level_id)
    }

    pub fn level_position(&self, level_id: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.id == level_id)
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters().find(|chapter| chapter.id == chapter_id)
    }

    pub fn chapter_mut(&mut self, chapter_id: &str) -> Option<&mut Chapter> {
        self.levels
            .iter_mut()
            .flat_map(|level| level.chapters.iter_mut())
            .find(|chapter| chapter.id == chapter_id)
    }

    pub fn level_of_chapter(&self, chapter_id: &str) -> Option<&Level> {
        self.levels
            .iter()
            .find(|level| level.chapters.iter().any(|chapter| chapter.id == chapter_id))
    }

    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.levels.iter().flat_map(|level| level.chapters.iter())
    }
}
