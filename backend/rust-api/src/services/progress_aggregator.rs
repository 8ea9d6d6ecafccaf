use std::sync::Arc;

use chrono::Utc;

use crate::metrics::BADGES_EARNED_TOTAL;
use crate::models::{BadgeRecord, Chapter, ChapterAggregate, ContentCatalog, LevelSummary, StepState};

use super::progress_store::ProgressStore;
use super::step_resolver::{completion_percent, StepStateResolver};

const DEFAULT_BADGE_EMOJI: &str = "🏆";

/// Receives badge unlocks. The presentation layer plugs a toast in here.
pub trait BadgeNotifier: Send + Sync {
    fn badge_unlocked(&self, badge: &BadgeRecord);
}

/// Default notifier: the unlock only shows up in the logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBadgeNotifier;

impl BadgeNotifier for LogBadgeNotifier {
    fn badge_unlocked(&self, badge: &BadgeRecord) {
        tracing::info!(
            "Badge unlocked: {} {} ({})",
            badge.emoji,
            badge.title,
            badge.chapter_id
        );
    }
}

#[derive(Clone)]
pub struct ProgressAggregator {
    catalog: Arc<ContentCatalog>,
    store: ProgressStore,
    resolver: StepStateResolver,
    notifier: Arc<dyn BadgeNotifier>,
}

impl ProgressAggregator {
    pub fn new(
        catalog: Arc<ContentCatalog>,
        store: ProgressStore,
        notifier: Arc<dyn BadgeNotifier>,
    ) -> Self {
        let resolver = StepStateResolver::new(store.clone());
        Self {
            catalog,
            store,
            resolver,
            notifier,
        }
    }

    fn completed_steps(&self, chapter: &Chapter) -> usize {
        (0..chapter.steps.len())
            .filter(|index| self.resolver.resolve(Some(chapter), *index) == StepState::Completed)
            .count()
    }

    /// Every step completed. Rounded percentages can read 100 before that.
    fn is_chapter_complete(&self, chapter: &Chapter) -> bool {
        !chapter.steps.is_empty() && self.completed_steps(chapter) == chapter.steps.len()
    }

    /// Percentage of completed steps; milestones are not counted.
    pub fn chapter_completion(&self, chapter_id: &str) -> u8 {
        let Some(chapter) = self.catalog.chapter(chapter_id) else {
            tracing::warn!("Completion requested for unknown chapter {}", chapter_id);
            return 0;
        };
        completion_percent(self.completed_steps(chapter), chapter.steps.len())
    }

    /// Rounded mean of the chapter completions of a level, for display.
    pub fn level_completion(&self, level_id: &str) -> u8 {
        let Some(level) = self.catalog.level(level_id) else {
            tracing::warn!("Completion requested for unknown level {}", level_id);
            return 0;
        };
        if level.chapters.is_empty() {
            return 0;
        }

        let sum: u32 = level
            .chapters
            .iter()
            .map(|chapter| self.chapter_completion(&chapter.id) as u32)
            .sum();
        (sum as f64 / level.chapters.len() as f64).round() as u8
    }

    /// The first level is always open; any other opens once every step of
    /// every chapter of the previous level is completed.
    pub fn is_level_unlocked(&self, level_id: &str) -> bool {
        match self.catalog.level_position(level_id) {
            Some(0) => true,
            Some(position) => {
                let previous = &self.catalog.levels[position - 1];
                !previous.chapters.is_empty()
                    && previous
                        .chapters
                        .iter()
                        .all(|chapter| self.is_chapter_complete(chapter))
            }
            None => {
                tracing::warn!("Unlock check for unknown level {}", level_id);
                false
            }
        }
    }

    /// Recomputes the chapter aggregate from the step records and writes
    /// it back. Unlocks the chapter badge the first time every step is
    /// completed.
    pub fn recompute_and_persist(&self, chapter_id: &str) -> Option<ChapterAggregate> {
        let Some(chapter) = self.catalog.chapter(chapter_id) else {
            tracing::warn!("Recompute requested for unknown chapter {}", chapter_id);
            return None;
        };

        let previous = self.store.get_chapter_aggregate(chapter_id).unwrap_or_default();
        let completed_steps = self.completed_steps(chapter);
        let total_steps = chapter.steps.len();
        let mut aggregate = ChapterAggregate {
            completion: completion_percent(completed_steps, total_steps),
            completed_steps,
            total_steps,
            badge_earned: previous.badge_earned,
        };

        if total_steps > 0 && completed_steps == total_steps && !aggregate.badge_earned {
            aggregate.badge_earned = self.unlock_badge(chapter);
        }

        if !self.store.set_chapter_aggregate(chapter_id, &aggregate) {
            tracing::error!("Failed to persist aggregate of chapter {}", chapter_id);
        }

        tracing::debug!(
            "Chapter {} at {}% ({}/{})",
            chapter_id,
            aggregate.completion,
            completed_steps,
            total_steps
        );
        Some(aggregate)
    }

    fn unlock_badge(&self, chapter: &Chapter) -> bool {
        if self.store.get_badge(&chapter.id).is_some() {
            return true;
        }

        let badge = BadgeRecord {
            id: format!("badge_{}", chapter.id),
            title: format!("Maître de {}", chapter.title),
            emoji: chapter
                .emoji
                .clone()
                .unwrap_or_else(|| DEFAULT_BADGE_EMOJI.to_string()),
            chapter_id: chapter.id.clone(),
            earned_at: Utc::now(),
        };

        if !self.store.save_badge(&badge) {
            return false;
        }
        BADGES_EARNED_TOTAL.inc();
        self.notifier.badge_unlocked(&badge);
        true
    }

    /// Rewrites every chapter aggregate from its step records.
    pub fn recompute_all(&self) -> usize {
        self.catalog
            .chapters()
            .filter_map(|chapter| self.recompute_and_persist(&chapter.id))
            .count()
    }

    pub fn level_summaries(&self) -> Vec<LevelSummary> {
        self.catalog
            .levels
            .iter()
            .map(|level| LevelSummary {
                id: level.id.clone(),
                title: level.title.clone(),
                completion: self.level_completion(&level.id),
                unlocked: self.is_level_unlocked(&level.id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepPatch;
    use crate::services::storage::MemoryStorage;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        unlocked: Mutex<Vec<String>>,
    }

    impl BadgeNotifier for RecordingNotifier {
        fn badge_unlocked(&self, badge: &BadgeRecord) {
            self.unlocked.lock().unwrap().push(badge.id.clone());
        }
    }

    fn catalog() -> Arc<ContentCatalog> {
        let levels = json!([
            {
                "id": "N1",
                "title": "Découverte",
                "chapters": [
                    {"id": "ch1", "title": "Incoterms", "emoji": "📦",
                     "steps": [{"id": "a", "title": "A"}, {"id": "b", "title": "B"}]},
                    {"id": "ch2", "title": "Tarif",
                     "steps": [{"id": "c", "title": "C"}]}
                ]
            },
            {"id": "N2", "title": "Approfondissement", "chapters": [
                {"id": "ch3", "title": "Origine", "steps": [{"id": "d", "title": "D"}]}
            ]},
            {"id": "N3", "title": "Vide", "chapters": []}
        ]);
        Arc::new(ContentCatalog::new(serde_json::from_value(levels).unwrap()))
    }

    fn setup() -> (ProgressStore, ProgressAggregator, Arc<RecordingNotifier>) {
        let store = ProgressStore::new(Arc::new(MemoryStorage::new()), "test");
        let notifier = Arc::new(RecordingNotifier::default());
        let aggregator = ProgressAggregator::new(catalog(), store.clone(), notifier.clone());
        (store, aggregator, notifier)
    }

    fn complete(store: &ProgressStore, chapter_id: &str, index: usize) {
        store.save_step_state(
            chapter_id,
            index,
            &StepPatch {
                completed: Some(true),
                ..StepPatch::default()
            },
        );
    }

    #[test]
    fn chapter_completion_counts_steps_only() {
        let (store, aggregator, _) = setup();
        assert_eq!(aggregator.chapter_completion("ch1"), 0);
        complete(&store, "ch1", 0);
        assert_eq!(aggregator.chapter_completion("ch1"), 50);
        assert_eq!(aggregator.chapter_completion("missing"), 0);
    }

    #[test]
    fn level_completion_is_mean_of_chapters() {
        let (store, aggregator, _) = setup();
        complete(&store, "ch1", 0);
        complete(&store, "ch2", 0);
        // (50 + 100) / 2
        assert_eq!(aggregator.level_completion("N1"), 75);
        assert_eq!(aggregator.level_completion("N3"), 0);
        assert_eq!(aggregator.level_completion("N9"), 0);
    }

    #[test]
    fn next_level_unlocks_only_at_exactly_100() {
        let (store, aggregator, _) = setup();
        assert!(aggregator.is_level_unlocked("N1"));
        assert!(!aggregator.is_level_unlocked("N2"));

        complete(&store, "ch1", 0);
        complete(&store, "ch2", 0);
        assert!(!aggregator.is_level_unlocked("N2"));

        complete(&store, "ch1", 1);
        assert!(aggregator.is_level_unlocked("N2"));
        assert!(!aggregator.is_level_unlocked("N3"));
        assert!(!aggregator.is_level_unlocked("N9"));
    }

    #[test]
    fn recompute_persists_aggregate() {
        let (store, aggregator, _) = setup();
        complete(&store, "ch1", 0);

        let aggregate = aggregator.recompute_and_persist("ch1").unwrap();
        assert_eq!(aggregate.completion, 50);
        assert_eq!(store.get_chapter_aggregate("ch1"), Some(aggregate));
        assert!(aggregator.recompute_and_persist("missing").is_none());
    }

    #[test]
    fn badge_is_awarded_once() {
        let (store, aggregator, notifier) = setup();
        complete(&store, "ch1", 0);
        complete(&store, "ch1", 1);

        assert!(aggregator.recompute_and_persist("ch1").unwrap().badge_earned);
        aggregator.recompute_and_persist("ch1");
        aggregator.recompute_all();

        assert_eq!(*notifier.unlocked.lock().unwrap(), vec!["badge_ch1".to_string()]);
        let badge = store.get_badge("ch1").unwrap();
        assert_eq!(badge.title, "Maître de Incoterms");
        assert_eq!(badge.emoji, "📦");
    }

    #[test]
    fn badge_waits_for_the_last_step_of_a_long_chapter() {
        let steps: Vec<_> = (0..200)
            .map(|i| json!({"id": format!("s{}", i), "title": format!("S{}", i)}))
            .collect();
        let levels = json!([{"id": "N1", "title": "Un", "chapters": [
            {"id": "long", "title": "Long", "steps": steps}
        ]}]);
        let catalog = Arc::new(ContentCatalog::new(serde_json::from_value(levels).unwrap()));
        let store = ProgressStore::new(Arc::new(MemoryStorage::new()), "test");
        let notifier = Arc::new(RecordingNotifier::default());
        let aggregator = ProgressAggregator::new(catalog, store.clone(), notifier.clone());

        for index in 0..199 {
            complete(&store, "long", index);
        }
        let aggregate = aggregator.recompute_and_persist("long").unwrap();
        // 199 / 200 rounds to 100
        assert_eq!(aggregate.completion, 100);
        assert!(!aggregate.badge_earned);
        assert!(store.get_badge("long").is_none());

        complete(&store, "long", 199);
        assert!(aggregator.recompute_and_persist("long").unwrap().badge_earned);
        assert_eq!(notifier.unlocked.lock().unwrap().len(), 1);
    }

    #[test]
    fn level_summaries_follow_catalog_order() {
        let (_, aggregator, _) = setup();
        let summaries = aggregator.level_summaries();
        let ids: Vec<_> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["N1", "N2", "N3"]);
        assert!(summaries[0].unlocked);
        assert!(!summaries[1].unlocked);
    }
}
