use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::config::ProgressPolicy;
use crate::metrics::{self, POINTS_AWARDED_TOTAL};
use crate::models::{Chapter, ContentCatalog, Step, StepKind, StepPatch, StepState, StepStatus};

use super::progress_aggregator::ProgressAggregator;
use super::progress_store::ProgressStore;
use super::step_resolver::StepStateResolver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// No answer was given; nothing was recorded.
    AnswerMissing,
    UnknownStep,
    StepLocked,
    /// Another submission for the same step is still being processed.
    InFlight,
    #[serde(rename_all = "camelCase")]
    Passed {
        score: u8,
        best_score: u8,
        points_awarded: u32,
        next_step_unlocked: bool,
        chapter_completion: u8,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        score: u8,
        attempts: u32,
        attempts_remaining: u32,
        exhausted: bool,
    },
    AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VisitOutcome {
    UnknownStep,
    StepLocked,
    InFlight,
    #[serde(rename_all = "camelCase")]
    Visited { first_visit: bool, completed: bool },
    /// The visit completed a consultation step.
    Completed(SubmissionOutcome),
}

impl SubmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionOutcome::AnswerMissing => "answer_missing",
            SubmissionOutcome::UnknownStep => "unknown_step",
            SubmissionOutcome::StepLocked => "step_locked",
            SubmissionOutcome::InFlight => "in_flight",
            SubmissionOutcome::Passed { .. } => "passed",
            SubmissionOutcome::Failed { .. } => "failed",
            SubmissionOutcome::AttemptsExhausted => "attempts_exhausted",
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, SubmissionOutcome::Passed { .. })
    }

    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            SubmissionOutcome::Failed {
                attempts_remaining, ..
            } => Some(*attempts_remaining),
            _ => None,
        }
    }
}

/// Steps currently being submitted, keyed by (chapter id, step index).
#[derive(Debug, Default)]
struct InFlightSet {
    keys: Mutex<HashSet<(String, usize)>>,
}

impl InFlightSet {
    fn try_acquire(&self, chapter_id: &str, step_index: usize) -> Option<InFlightToken<'_>> {
        let key = (chapter_id.to_string(), step_index);
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightToken { set: self, key })
    }
}

/// Releases its key when dropped.
struct InFlightToken<'a> {
    set: &'a InFlightSet,
    key: (String, usize),
}

impl Drop for InFlightToken<'_> {
    fn drop(&mut self) {
        let mut keys = self
            .set
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.remove(&self.key);
    }
}

/// Applies submissions and visits to step records: threshold check,
/// attempts, best score, points and unlocking of the next step.
#[derive(Clone)]
pub struct ScoringGate {
    catalog: Arc<ContentCatalog>,
    store: ProgressStore,
    resolver: StepStateResolver,
    aggregator: ProgressAggregator,
    policy: ProgressPolicy,
    in_flight: Arc<InFlightSet>,
}

impl ScoringGate {
    pub fn new(
        catalog: Arc<ContentCatalog>,
        store: ProgressStore,
        aggregator: ProgressAggregator,
        policy: ProgressPolicy,
    ) -> Self {
        Self {
            catalog,
            resolver: StepStateResolver::new(store.clone()),
            store,
            aggregator,
            policy,
            in_flight: Arc::new(InFlightSet::default()),
        }
    }

    fn locate(&self, chapter_id: &str, step_index: usize) -> Option<(&Chapter, &Step)> {
        let chapter = self.catalog.chapter(chapter_id)?;
        let step = chapter.step(step_index)?;
        Some((chapter, step))
    }

    pub fn submit(&self, chapter_id: &str, step_index: usize, score: Option<u8>) -> SubmissionOutcome {
        let outcome = self.submit_inner(chapter_id, step_index, score);
        metrics::record_submission(outcome.as_str());
        tracing::info!(
            "Submission on {}[{}]: {}",
            chapter_id,
            step_index,
            outcome.as_str()
        );
        outcome
    }

    fn submit_inner(&self, chapter_id: &str, step_index: usize, score: Option<u8>) -> SubmissionOutcome {
        let Some(score) = score else {
            return SubmissionOutcome::AnswerMissing;
        };
        let Some((chapter, step)) = self.locate(chapter_id, step_index) else {
            tracing::warn!("Submission for unknown step {}[{}]", chapter_id, step_index);
            return SubmissionOutcome::UnknownStep;
        };
        let Some(_token) = self.in_flight.try_acquire(chapter_id, step_index) else {
            return SubmissionOutcome::InFlight;
        };

        let state = self.resolver.resolve(Some(chapter), step_index);
        if state == StepState::Locked {
            return SubmissionOutcome::StepLocked;
        }

        let record = self
            .store
            .get_step_state(chapter_id, step_index)
            .unwrap_or_default();

        if self.policy.enforce_attempt_cap
            && !record.completed
            && record.attempts >= self.policy.max_attempts
        {
            return SubmissionOutcome::AttemptsExhausted;
        }

        let kind = step.kind();
        let max_points = step.points(self.policy.default_step_points);
        let (score, passing, points) = match kind {
            StepKind::Consultation => (100, 0, max_points),
            StepKind::Validation => {
                let score = score.min(100);
                (
                    score,
                    step.passing_score(self.policy.passing_score),
                    (max_points as f64 * score as f64 / 100.0).round() as u32,
                )
            }
        };
        let best_score = record.score.map_or(score, |best| best.max(score));

        if score < passing {
            let attempts = record.attempts.saturating_add(1);
            let mut patch = StepPatch {
                score: Some(best_score),
                attempts: Some(attempts),
                ..StepPatch::default()
            };
            // A completed step keeps its status; a late failure only counts
            // as an attempt.
            if !record.completed {
                patch.status = Some(StepStatus::Failed);
            }
            self.store.save_step_state(chapter_id, step_index, &patch);

            return SubmissionOutcome::Failed {
                score,
                attempts,
                attempts_remaining: self.policy.max_attempts.saturating_sub(attempts),
                exhausted: attempts >= self.policy.max_attempts,
            };
        }

        self.pass(chapter, step_index, score, best_score, points)
    }

    fn pass(
        &self,
        chapter: &Chapter,
        step_index: usize,
        score: u8,
        best_score: u8,
        points: u32,
    ) -> SubmissionOutcome {
        let points_awarded = self.complete_step(chapter, step_index, best_score, points);
        let next_step_unlocked = self.unlock_next(chapter, step_index);
        let chapter_completion = self
            .aggregator
            .recompute_and_persist(&chapter.id)
            .map(|aggregate| aggregate.completion)
            .unwrap_or(0);

        SubmissionOutcome::Passed {
            score,
            best_score,
            points_awarded,
            next_step_unlocked,
            chapter_completion,
        }
    }

    /// Marks the step completed and credits its points the first time.
    /// Returns the points credited by this call.
    fn complete_step(&self, chapter: &Chapter, step_index: usize, best_score: u8, points: u32) -> u32 {
        let record = self
            .store
            .get_step_state(&chapter.id, step_index)
            .unwrap_or_default();

        let mut patch = StepPatch {
            completed: Some(true),
            status: Some(StepStatus::Completed),
            score: Some(best_score),
            ..StepPatch::default()
        };
        if record.completed_at.is_none() {
            patch.completed_at = Some(Utc::now());
        }

        let award = !record.points_awarded && points > 0;
        if award {
            patch.points_awarded = Some(true);
            patch.points_earned = Some(points);
        }

        if !self.store.save_step_state(&chapter.id, step_index, &patch) {
            return 0;
        }
        if !award {
            return 0;
        }

        match self.store.add_points(points) {
            Some(total) => {
                POINTS_AWARDED_TOTAL.inc_by(points as u64);
                tracing::info!(
                    "{} points credited for {}[{}], total {}",
                    points,
                    chapter.id,
                    step_index,
                    total
                );
                points
            }
            None => 0,
        }
    }

    fn unlock_next(&self, chapter: &Chapter, step_index: usize) -> bool {
        let next = step_index + 1;
        if next >= chapter.steps.len() {
            return false;
        }
        if self.resolver.resolve(Some(chapter), next) != StepState::Active {
            return false;
        }

        let record = self.store.get_step_state(&chapter.id, next).unwrap_or_default();
        if record.status == StepStatus::Locked {
            self.store
                .save_step_state(&chapter.id, next, &StepPatch::status(StepStatus::InProgress));
        }
        true
    }

    /// Records a visit. A consultation step is completed by its first visit
    /// with score 100 and full points; later visits change nothing.
    pub fn visit(&self, chapter_id: &str, step_index: usize) -> VisitOutcome {
        let Some((chapter, step)) = self.locate(chapter_id, step_index) else {
            tracing::warn!("Visit of unknown step {}[{}]", chapter_id, step_index);
            return VisitOutcome::UnknownStep;
        };
        let Some(_token) = self.in_flight.try_acquire(chapter_id, step_index) else {
            return VisitOutcome::InFlight;
        };
        if self.resolver.resolve(Some(chapter), step_index) == StepState::Locked {
            return VisitOutcome::StepLocked;
        }

        let record = self
            .store
            .get_step_state(chapter_id, step_index)
            .unwrap_or_default();
        let first_visit = !record.visited;
        if first_visit {
            let mut patch = StepPatch {
                visited: Some(true),
                ..StepPatch::default()
            };
            if record.status == StepStatus::Locked {
                patch.status = Some(StepStatus::InProgress);
            }
            self.store.save_step_state(chapter_id, step_index, &patch);
        }

        if step.kind() == StepKind::Consultation && !record.completed {
            let points = step.points(self.policy.default_step_points);
            let outcome = self.pass(chapter, step_index, 100, 100, points);
            metrics::record_submission("consulted");
            tracing::info!("Consultation step {}[{}] completed", chapter_id, step_index);
            return VisitOutcome::Completed(outcome);
        }

        VisitOutcome::Visited {
            first_visit,
            completed: record.completed,
        }
    }
}
