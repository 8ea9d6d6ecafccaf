use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display state of a step, derived from the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Locked,
    Active,
    Completed,
}

/// Persisted status of a step record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Locked,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StepRecord {
    pub completed: bool,
    pub status: StepStatus,
    pub score: Option<u8>,
    pub attempts: u32,
    pub visited: bool,
    pub points_awarded: bool,
    pub points_earned: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn apply(&mut self, patch: &StepPatch) {
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(score) = patch.score {
            self.score = Some(score);
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(visited) = patch.visited {
            self.visited = visited;
        }
        if let Some(points_awarded) = patch.points_awarded {
            self.points_awarded = points_awarded;
        }
        if let Some(points_earned) = patch.points_earned {
            self.points_earned = points_earned;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
    }
}

/// Partial update of a [`StepRecord`]; `None` fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub completed: Option<bool>,
    pub status: Option<StepStatus>,
    pub score: Option<u8>,
    pub attempts: Option<u32>,
    pub visited: Option<bool>,
    pub points_awarded: Option<bool>,
    pub points_earned: Option<u32>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepPatch {
    pub fn status(status: StepStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterAggregate {
    pub completion: u8,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub badge_earned: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneKind {
    Objectives,
    Portfolio,
}

impl MilestoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneKind::Objectives => "objectives",
            MilestoneKind::Portfolio => "portfolio",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MilestoneRecord {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub total_points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BadgeRecord {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub chapter_id: String,
    pub earned_at: DateTime<Utc>,
}

/// One row of a chapter projection.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub index: usize,
    pub step_id: String,
    pub title: String,
    pub state: StepState,
    pub score: Option<u8>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterView {
    pub chapter_id: String,
    pub objectives_completed: bool,
    pub steps: Vec<StepView>,
    pub portfolio_reachable: bool,
    pub portfolio_completed: bool,
    pub completion: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    pub id: String,
    pub title: String,
    pub completion: u8,
    pub unlocked: bool,
}
