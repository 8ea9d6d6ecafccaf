use crate::models::{Chapter, ChapterView, MilestoneKind, StepState, StepView};

use super::progress_store::ProgressStore;

/// Derives step display state from the progress store alone. Chapter
/// objects are read-only structure; completion is never cached on them.
#[derive(Clone)]
pub struct StepStateResolver {
    store: ProgressStore,
}

impl StepStateResolver {
    pub fn new(store: ProgressStore) -> Self {
        Self { store }
    }

    pub fn is_step_completed(&self, chapter_id: &str, index: usize) -> bool {
        self.store
            .get_step_state(chapter_id, index)
            .map(|record| record.completed)
            .unwrap_or(false)
    }

    pub fn resolve(&self, chapter: Option<&Chapter>, index: usize) -> StepState {
        let Some(chapter) = chapter else {
            tracing::warn!("Step state requested for an unknown chapter (step {})", index);
            return StepState::Locked;
        };
        if index >= chapter.steps.len() {
            tracing::warn!(
                "Step {} is out of range for chapter {} ({} steps)",
                index,
                chapter.id,
                chapter.steps.len()
            );
            return StepState::Locked;
        }

        if self.is_step_completed(&chapter.id, index) {
            return StepState::Completed;
        }

        if index == 0 {
            // Objectives gate the first step visually only; missing or
            // incomplete objectives never lock it.
            return StepState::Active;
        }

        if self.is_step_completed(&chapter.id, index - 1) {
            StepState::Active
        } else {
            StepState::Locked
        }
    }

    pub fn portfolio_reachable(&self, chapter: &Chapter) -> bool {
        !chapter.steps.is_empty()
            && (0..chapter.steps.len()).all(|index| self.is_step_completed(&chapter.id, index))
    }

    /// Read-only projection of a chapter for rendering.
    pub fn project(&self, chapter: &Chapter) -> ChapterView {
        let steps: Vec<StepView> = chapter
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let record = self.store.get_step_state(&chapter.id, index).unwrap_or_default();
                StepView {
                    index,
                    step_id: step.id.clone(),
                    title: step.title.clone(),
                    state: self.resolve(Some(chapter), index),
                    score: record.score,
                    attempts: record.attempts,
                }
            })
            .collect();

        let completed = steps
            .iter()
            .filter(|view| view.state == StepState::Completed)
            .count();
        let completion = completion_percent(completed, steps.len());

        let milestone_done = |kind| {
            self.store
                .get_milestone_state(&chapter.id, kind)
                .map(|record| record.completed)
                .unwrap_or(false)
        };

        ChapterView {
            chapter_id: chapter.id.clone(),
            objectives_completed: milestone_done(MilestoneKind::Objectives),
            portfolio_reachable: self.portfolio_reachable(chapter),
            portfolio_completed: milestone_done(MilestoneKind::Portfolio),
            steps,
            completion,
        }
    }
}

/// `round(100 * completed / total)`, 0 for an empty chapter.
pub fn completion_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}
