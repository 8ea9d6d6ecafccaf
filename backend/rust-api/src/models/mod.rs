pub mod content;
pub mod exercise;
pub mod progress;

pub use content::{Chapter, ContentCatalog, Level, Step, StepKind};
pub use exercise::{Exercise, ExerciseBody};
pub use progress::{
    BadgeRecord, ChapterAggregate, ChapterView, LevelSummary, MilestoneKind, MilestoneRecord,
    Profile, StepPatch, StepRecord, StepState, StepStatus, StepView,
};
