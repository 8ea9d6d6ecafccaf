use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::config::{Config, ProgressPolicy};
use crate::models::{BadgeRecord, ChapterView, ContentCatalog, LevelSummary, MilestoneKind};

use super::grading::{grade_step, Answer};
use super::progress_aggregator::{BadgeNotifier, LogBadgeNotifier, ProgressAggregator};
use super::progress_store::ProgressStore;
use super::scoring_gate::{ScoringGate, SubmissionOutcome, VisitOutcome};
use super::step_resolver::StepStateResolver;
use super::storage::{FileStorage, KeyValueStorage, MemoryStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioOutcome {
    Completed,
    /// Some step of the chapter is not completed yet.
    NotReachable,
    UnknownChapter,
}

/// Entry point of the progress core for one learner.
#[derive(Clone)]
pub struct ProgressService {
    catalog: Arc<ContentCatalog>,
    store: ProgressStore,
    resolver: StepStateResolver,
    aggregator: ProgressAggregator,
    gate: ScoringGate,
    policy: ProgressPolicy,
}

impl ProgressService {
    pub fn new(
        catalog: Arc<ContentCatalog>,
        store: ProgressStore,
        policy: ProgressPolicy,
        notifier: Arc<dyn BadgeNotifier>,
    ) -> Self {
        let aggregator = ProgressAggregator::new(catalog.clone(), store.clone(), notifier);
        let gate = ScoringGate::new(catalog.clone(), store.clone(), aggregator.clone(), policy);
        Self {
            resolver: StepStateResolver::new(store.clone()),
            catalog,
            store,
            aggregator,
            gate,
            policy,
        }
    }

    /// Builds the service on the storage named by the configuration: a
    /// progress file when `storage_path` is set, memory otherwise.
    pub fn from_config(catalog: Arc<ContentCatalog>, config: &Config) -> Result<Self> {
        let storage: Arc<dyn KeyValueStorage> = match &config.storage_path {
            Some(path) => Arc::new(
                FileStorage::open(path)
                    .with_context(|| format!("Failed to open progress file {}", path.display()))?,
            ),
            None => {
                tracing::warn!("No storage path configured, progress is kept in memory only");
                Arc::new(MemoryStorage::new())
            }
        };
        let store = ProgressStore::new(storage, config.storage_namespace.clone());
        Ok(Self::new(
            catalog,
            store,
            ProgressPolicy::from(config),
            Arc::new(LogBadgeNotifier),
        ))
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    /// Prepares the records of a chapter and returns its projection.
    pub fn load_chapter(&self, chapter_id: &str) -> Option<ChapterView> {
        let Some(chapter) = self.catalog.chapter(chapter_id) else {
            tracing::warn!("Cannot load unknown chapter {}", chapter_id);
            return None;
        };
        let init = self
            .store
            .initialize_chapter(chapter, self.policy.suspicious_completion_ratio);
        if init.implausible_reset {
            tracing::warn!("Implausible progress discarded for chapter {}", chapter_id);
        }
        self.aggregator.recompute_and_persist(chapter_id);
        Some(self.resolver.project(chapter))
    }

    /// Initializes every chapter and rewrites every aggregate from the step
    /// records. Run once at startup.
    pub fn load_all(&self) -> usize {
        for chapter in self.catalog.chapters() {
            self.store
                .initialize_chapter(chapter, self.policy.suspicious_completion_ratio);
        }
        let recomputed = self.aggregator.recompute_all();
        tracing::info!("Progress loaded for {} chapters", recomputed);
        recomputed
    }

    pub fn chapter_view(&self, chapter_id: &str) -> Option<ChapterView> {
        self.catalog
            .chapter(chapter_id)
            .map(|chapter| self.resolver.project(chapter))
    }

    pub fn level_summaries(&self) -> Vec<LevelSummary> {
        self.aggregator.level_summaries()
    }

    /// Grades the answers against the step's exercises and submits the
    /// resulting score.
    pub fn submit_answers(
        &self,
        chapter_id: &str,
        step_index: usize,
        answers: &[Answer],
    ) -> SubmissionOutcome {
        let Some(step) = self
            .catalog
            .chapter(chapter_id)
            .and_then(|chapter| chapter.step(step_index))
        else {
            tracing::warn!("Answers posted for unknown step {}[{}]", chapter_id, step_index);
            return SubmissionOutcome::UnknownStep;
        };
        let score = grade_step(&step.exercises, answers);
        self.gate.submit(chapter_id, step_index, score)
    }

    pub fn submit_score(
        &self,
        chapter_id: &str,
        step_index: usize,
        score: Option<u8>,
    ) -> SubmissionOutcome {
        self.gate.submit(chapter_id, step_index, score)
    }

    pub fn visit(&self, chapter_id: &str, step_index: usize) -> VisitOutcome {
        self.gate.visit(chapter_id, step_index)
    }

    pub fn complete_objectives(&self, chapter_id: &str) -> bool {
        if self.catalog.chapter(chapter_id).is_none() {
            tracing::warn!("Objectives of unknown chapter {}", chapter_id);
            return false;
        }
        self.store
            .set_milestone_state(chapter_id, MilestoneKind::Objectives, true)
    }

    /// The portfolio can only be completed once every step is.
    pub fn complete_portfolio(&self, chapter_id: &str) -> PortfolioOutcome {
        let Some(chapter) = self.catalog.chapter(chapter_id) else {
            return PortfolioOutcome::UnknownChapter;
        };
        if !self.resolver.portfolio_reachable(chapter) {
            return PortfolioOutcome::NotReachable;
        }
        self.store
            .set_milestone_state(chapter_id, MilestoneKind::Portfolio, true);
        PortfolioOutcome::Completed
    }

    pub fn reset_chapter(&self, chapter_id: &str) -> bool {
        let Some(chapter) = self.catalog.chapter(chapter_id) else {
            return false;
        };
        self.store.reset_chapter(chapter)
    }

    pub fn reset_all(&self) -> bool {
        self.store.reset_all()
    }

    pub fn total_points(&self) -> u32 {
        self.store.get_profile().total_points
    }

    pub fn badges(&self) -> Vec<BadgeRecord> {
        self.store.badges()
    }

    pub fn export_progress(&self) -> Value {
        self.store.export_snapshot()
    }

    pub fn import_progress(&self, snapshot: &Value) -> bool {
        if !self.store.import_snapshot(snapshot) {
            return false;
        }
        self.aggregator.recompute_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> ProgressService {
        let levels = json!([{
            "id": "N1",
            "title": "Découverte",
            "chapters": [{
                "id": "ch1",
                "title": "Incoterms",
                "steps": [
                    {"id": "s1", "title": "QCM", "exercises": [
                        {"type": "qcm", "content": {"question": "?", "options": ["a", "b"], "correctAnswer": 1}}
                    ]}
                ],
                "portfolio": {"title": "Synthèse"}
            }]
        }]);
        let catalog = Arc::new(ContentCatalog::new(serde_json::from_value(levels).unwrap()));
        ProgressService::from_config(catalog, &Config::default()).unwrap()
    }

    #[test]
    fn answers_are_graded_before_submission() {
        let service = service();
        service.load_chapter("ch1");

        let failed = service.submit_answers("ch1", 0, &[Answer::Choice(0)]);
        assert!(!failed.passed());
        assert!(service.submit_answers("ch1", 0, &[Answer::Choice(1)]).passed());
        assert_eq!(
            service.submit_answers("ch1", 0, &[]),
            SubmissionOutcome::AnswerMissing
        );
        assert_eq!(
            service.submit_answers("ch1", 4, &[Answer::Choice(1)]),
            SubmissionOutcome::UnknownStep
        );
    }

    #[test]
    fn portfolio_requires_every_step() {
        let service = service();
        service.load_chapter("ch1");
        assert_eq!(service.complete_portfolio("ch1"), PortfolioOutcome::NotReachable);

        service.submit_score("ch1", 0, Some(100));
        assert_eq!(service.complete_portfolio("ch1"), PortfolioOutcome::Completed);
        assert!(service.chapter_view("ch1").unwrap().portfolio_completed);
        assert_eq!(service.complete_portfolio("nope"), PortfolioOutcome::UnknownChapter);
    }
}
