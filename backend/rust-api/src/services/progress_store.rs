use std::sync::Arc;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::metrics::{self, IMPLAUSIBLE_PROGRESS_RESETS_TOTAL};
use crate::models::{
    BadgeRecord, Chapter, ChapterAggregate, MilestoneKind, MilestoneRecord, Profile, StepPatch,
    StepRecord,
};

use super::storage::KeyValueStorage;

/// What `initialize_chapter` did to the stored records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterInit {
    pub steps_created: usize,
    pub implausible_reset: bool,
}

/// The single authoritative store of learner progress. Every write is
/// visible to the next read; write failures are logged and reported as
/// `false`, read failures as `None`.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<dyn KeyValueStorage>,
    namespace: String,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn step_key(&self, chapter_id: &str, step_index: usize) -> String {
        format!("{}::step::{}::{}", self.namespace, chapter_id, step_index)
    }

    fn step_prefix(&self, chapter_id: &str) -> String {
        format!("{}::step::{}::", self.namespace, chapter_id)
    }

    fn aggregate_key(&self, chapter_id: &str) -> String {
        format!("{}::chapterAggregate::{}", self.namespace, chapter_id)
    }

    fn milestone_key(&self, chapter_id: &str, kind: MilestoneKind) -> String {
        format!(
            "{}::milestone::{}::{}",
            self.namespace,
            chapter_id,
            kind.as_str()
        )
    }

    fn profile_key(&self) -> String {
        format!("{}::profile", self.namespace)
    }

    fn badge_key(&self, chapter_id: &str) -> String {
        format!("{}::badge::{}", self.namespace, chapter_id)
    }

    fn owned_prefix(&self) -> String {
        format!("{}::", self.namespace)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str, record: &str) -> Option<T> {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Progress read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding malformed {} record {}: {}", record, key, e);
                metrics::record_malformed(record);
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, record: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to serialize {} record {}: {}", record, key, e);
                metrics::record_write_failure(record);
                return false;
            }
        };

        match self.storage.set_item(key, &raw) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Progress write failed for {}: {}", key, e);
                metrics::record_write_failure(record);
                false
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        match self.storage.remove_item(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Progress delete failed for {}: {}", key, e);
                metrics::record_write_failure("delete");
                false
            }
        }
    }

    fn key_exists(&self, key: &str) -> bool {
        matches!(self.storage.get_item(key), Ok(Some(_)))
    }

    fn owned_keys(&self) -> Option<Vec<String>> {
        let prefix = self.owned_prefix();
        match self.storage.keys() {
            Ok(keys) => Some(keys.into_iter().filter(|k| k.starts_with(&prefix)).collect()),
            Err(e) => {
                tracing::error!("Failed to list progress keys: {}", e);
                None
            }
        }
    }

    pub fn get_step_state(&self, chapter_id: &str, step_index: usize) -> Option<StepRecord> {
        self.read_json(&self.step_key(chapter_id, step_index), "step")
    }

    /// Shallow merge of `patch` into the stored record (or the default one).
    pub fn save_step_state(&self, chapter_id: &str, step_index: usize, patch: &StepPatch) -> bool {
        let mut record = self
            .get_step_state(chapter_id, step_index)
            .unwrap_or_default();
        record.apply(patch);
        self.write_json(&self.step_key(chapter_id, step_index), "step", &record)
    }

    pub fn get_chapter_aggregate(&self, chapter_id: &str) -> Option<ChapterAggregate> {
        self.read_json(&self.aggregate_key(chapter_id), "chapter_aggregate")
    }

    pub fn set_chapter_aggregate(&self, chapter_id: &str, aggregate: &ChapterAggregate) -> bool {
        self.write_json(
            &self.aggregate_key(chapter_id),
            "chapter_aggregate",
            aggregate,
        )
    }

    pub fn get_milestone_state(
        &self,
        chapter_id: &str,
        kind: MilestoneKind,
    ) -> Option<MilestoneRecord> {
        self.read_json(&self.milestone_key(chapter_id, kind), "milestone")
    }

    pub fn set_milestone_state(&self, chapter_id: &str, kind: MilestoneKind, completed: bool) -> bool {
        let previous = self.get_milestone_state(chapter_id, kind);
        let completed_at = match previous {
            Some(record) if completed && record.completed => record.completed_at,
            _ if completed => Some(Utc::now()),
            _ => None,
        };
        let record = MilestoneRecord {
            completed,
            completed_at,
        };
        self.write_json(&self.milestone_key(chapter_id, kind), "milestone", &record)
    }

    /// Creates default records for a chapter on first load without touching
    /// existing ones. On a first load (no aggregate yet) a chapter whose
    /// stored steps are mostly complete is treated as left over from a
    /// previous bug and its step records are reset.
    pub fn initialize_chapter(&self, chapter: &Chapter, suspicious_ratio: f64) -> ChapterInit {
        let mut init = ChapterInit::default();
        let total = chapter.steps.len();
        let first_load = !self.key_exists(&self.aggregate_key(&chapter.id));

        if first_load && total > 0 {
            let completed = (0..total)
                .filter_map(|index| self.get_step_state(&chapter.id, index))
                .filter(|record| record.completed)
                .count();
            if completed as f64 / total as f64 > suspicious_ratio {
                tracing::warn!(
                    "Chapter {} has {}/{} steps complete on first load, resetting step records",
                    chapter.id,
                    completed,
                    total
                );
                for index in 0..total {
                    self.remove(&self.step_key(&chapter.id, index));
                }
                IMPLAUSIBLE_PROGRESS_RESETS_TOTAL.inc();
                init.implausible_reset = true;
            }
        }

        for index in 0..total {
            let key = self.step_key(&chapter.id, index);
            if !self.key_exists(&key) && self.write_json(&key, "step", &StepRecord::default()) {
                init.steps_created += 1;
            }
        }

        if first_load {
            let aggregate = ChapterAggregate {
                total_steps: total,
                ..ChapterAggregate::default()
            };
            self.set_chapter_aggregate(&chapter.id, &aggregate);
        }

        let mut milestones = vec![MilestoneKind::Objectives];
        if chapter.has_portfolio() {
            milestones.push(MilestoneKind::Portfolio);
        }
        for kind in milestones {
            let key = self.milestone_key(&chapter.id, kind);
            if !self.key_exists(&key) {
                self.write_json(&key, "milestone", &MilestoneRecord::default());
            }
        }

        tracing::debug!(
            "Storage initialized for {}: {} step records created",
            chapter.id,
            init.steps_created
        );
        init
    }

    /// Deletes every step record, the aggregate and the milestones of a
    /// chapter, then re-creates the defaults.
    pub fn reset_chapter(&self, chapter: &Chapter) -> bool {
        let mut ok = true;
        let prefix = self.step_prefix(&chapter.id);
        let mut keys: Vec<String> = (0..chapter.steps.len())
            .map(|index| self.step_key(&chapter.id, index))
            .collect();
        if let Some(owned) = self.owned_keys() {
            let extra: Vec<String> = owned
                .into_iter()
                .filter(|key| key.starts_with(&prefix) && !keys.contains(key))
                .collect();
            keys.extend(extra);
        }
        keys.push(self.aggregate_key(&chapter.id));
        keys.push(self.milestone_key(&chapter.id, MilestoneKind::Objectives));
        keys.push(self.milestone_key(&chapter.id, MilestoneKind::Portfolio));

        for key in &keys {
            ok &= self.remove(key);
        }

        tracing::warn!("Progress of chapter {} has been reset", chapter.id);
        self.initialize_chapter(chapter, 1.0);
        ok
    }

    /// Deletes every key under the store namespace.
    pub fn reset_all(&self) -> bool {
        let Some(keys) = self.owned_keys() else {
            return false;
        };
        let mut ok = true;
        for key in &keys {
            ok &= self.remove(key);
        }
        tracing::warn!("All progress under {} has been reset ({} keys)", self.namespace, keys.len());
        ok
    }

    pub fn get_profile(&self) -> Profile {
        self.read_json(&self.profile_key(), "profile")
            .unwrap_or_default()
    }

    /// Credits points to the learner; returns the new total, or `None` when
    /// the write failed.
    pub fn add_points(&self, points: u32) -> Option<u32> {
        let mut profile = self.get_profile();
        profile.total_points = profile.total_points.saturating_add(points);
        if self.write_json(&self.profile_key(), "profile", &profile) {
            Some(profile.total_points)
        } else {
            None
        }
    }

    pub fn get_badge(&self, chapter_id: &str) -> Option<BadgeRecord> {
        self.read_json(&self.badge_key(chapter_id), "badge")
    }

    pub fn save_badge(&self, badge: &BadgeRecord) -> bool {
        self.write_json(&self.badge_key(&badge.chapter_id), "badge", badge)
    }

    pub fn badges(&self) -> Vec<BadgeRecord> {
        let prefix = format!("{}::badge::", self.namespace);
        self.owned_keys()
            .unwrap_or_default()
            .iter()
            .filter(|key| key.starts_with(&prefix))
            .filter_map(|key| self.read_json(key, "badge"))
            .collect()
    }

    /// Every owned record, keyed without the namespace prefix.
    pub fn export_snapshot(&self) -> Value {
        let prefix = self.owned_prefix();
        let mut map = Map::new();
        for key in self.owned_keys().unwrap_or_default() {
            let Ok(Some(raw)) = self.storage.get_item(&key) else {
                continue;
            };
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            map.insert(key[prefix.len()..].to_string(), value);
        }
        Value::Object(map)
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> bool {
        let prefix = self.owned_prefix();
        entries.iter().fold(true, |ok, (key, value)| {
            self.write_json(&format!("{}{}", prefix, key), "import", value) && ok
        })
    }

    /// Replaces the namespace content with a snapshot produced by
    /// [`ProgressStore::export_snapshot`]. When a write fails, the previous
    /// content is put back and `false` is returned.
    pub fn import_snapshot(&self, snapshot: &Value) -> bool {
        let Some(entries) = snapshot.as_object() else {
            tracing::warn!("Rejected progress import: snapshot is not an object");
            return false;
        };
        let Value::Object(previous) = self.export_snapshot() else {
            return false;
        };
        if !self.reset_all() {
            return false;
        }

        if self.write_entries(entries) {
            tracing::info!("Imported {} progress records", entries.len());
            return true;
        }

        tracing::error!(
            "Progress import failed, restoring {} previous records",
            previous.len()
        );
        let restored = self.reset_all() && self.write_entries(&previous);
        if !restored {
            tracing::error!("Previous progress under {} could not be fully restored", self.namespace);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStatus;
    use crate::services::storage::MemoryStorage;
    use serde_json::json;

    fn store() -> (Arc<MemoryStorage>, ProgressStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = ProgressStore::new(storage.clone(), "test");
        (storage, store)
    }

    fn chapter(steps: usize) -> Chapter {
        let steps: Vec<_> = (0..steps)
            .map(|i| json!({"id": format!("s{}", i), "title": format!("Step {}", i)}))
            .collect();
        serde_json::from_value(json!({"id": "ch1", "title": "Intro", "steps": steps})).unwrap()
    }

    #[test]
    fn save_merges_with_existing_record() {
        let (_, store) = store();
        assert!(store.save_step_state(
            "ch1",
            0,
            &StepPatch {
                attempts: Some(2),
                score: Some(50),
                ..StepPatch::default()
            }
        ));
        assert!(store.save_step_state("ch1", 0, &StepPatch::status(StepStatus::Failed)));

        let record = store.get_step_state("ch1", 0).unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.score, Some(50));
        assert_eq!(record.status, StepStatus::Failed);
    }

    #[test]
    fn absent_and_malformed_records_read_as_none() {
        let (storage, store) = store();
        assert!(store.get_step_state("ch1", 3).is_none());

        storage.set_item("test::step::ch1::0", "{broken").unwrap();
        assert!(store.get_step_state("ch1", 0).is_none());
        // a malformed record is replaced by defaults on the next merge
        assert!(store.save_step_state("ch1", 0, &StepPatch::status(StepStatus::InProgress)));
        assert_eq!(store.get_step_state("ch1", 0).unwrap().attempts, 0);
    }

    #[test]
    fn initialize_does_not_overwrite_existing_records() {
        let (_, store) = store();
        store.save_step_state(
            "ch1",
            1,
            &StepPatch {
                attempts: Some(1),
                ..StepPatch::default()
            },
        );

        let init = store.initialize_chapter(&chapter(3), 0.6);
        assert_eq!(init.steps_created, 2);
        assert!(!init.implausible_reset);
        assert_eq!(store.get_step_state("ch1", 1).unwrap().attempts, 1);
        assert_eq!(store.get_chapter_aggregate("ch1").unwrap().total_steps, 3);
        assert!(store
            .get_milestone_state("ch1", MilestoneKind::Objectives)
            .is_some());
        assert!(store
            .get_milestone_state("ch1", MilestoneKind::Portfolio)
            .is_none());
    }

    #[test]
    fn initialize_resets_implausible_first_load() {
        let (_, store) = store();
        for index in 0..3 {
            store.save_step_state(
                "ch1",
                index,
                &StepPatch {
                    completed: Some(true),
                    ..StepPatch::default()
                },
            );
        }

        let init = store.initialize_chapter(&chapter(4), 0.6);
        assert!(init.implausible_reset);
        assert!((0..4).all(|i| !store.get_step_state("ch1", i).unwrap().completed));
    }

    #[test]
    fn initialize_keeps_progress_once_aggregate_exists() {
        let (_, store) = store();
        store.initialize_chapter(&chapter(2), 0.6);
        for index in 0..2 {
            store.save_step_state(
                "ch1",
                index,
                &StepPatch {
                    completed: Some(true),
                    ..StepPatch::default()
                },
            );
        }

        let init = store.initialize_chapter(&chapter(2), 0.6);
        assert!(!init.implausible_reset);
        assert!(store.get_step_state("ch1", 1).unwrap().completed);
    }

    #[test]
    fn milestone_keeps_first_completion_time() {
        let (_, store) = store();
        assert!(store.set_milestone_state("ch1", MilestoneKind::Objectives, true));
        let first = store
            .get_milestone_state("ch1", MilestoneKind::Objectives)
            .unwrap();
        assert!(store.set_milestone_state("ch1", MilestoneKind::Objectives, true));
        let second = store
            .get_milestone_state("ch1", MilestoneKind::Objectives)
            .unwrap();
        assert_eq!(first.completed_at, second.completed_at);

        store.set_milestone_state("ch1", MilestoneKind::Objectives, false);
        let cleared = store
            .get_milestone_state("ch1", MilestoneKind::Objectives)
            .unwrap();
        assert!(cleared.completed_at.is_none());
    }

    #[test]
    fn reset_chapter_recreates_defaults() {
        let (_, store) = store();
        let chapter = chapter(2);
        store.initialize_chapter(&chapter, 0.6);
        store.save_step_state(
            "ch1",
            0,
            &StepPatch {
                completed: Some(true),
                score: Some(100),
                ..StepPatch::default()
            },
        );
        store.set_chapter_aggregate(
            "ch1",
            &ChapterAggregate {
                completion: 50,
                completed_steps: 1,
                total_steps: 2,
                badge_earned: false,
            },
        );

        store.set_milestone_state("ch1", MilestoneKind::Objectives, true);

        assert!(store.reset_chapter(&chapter));
        assert_eq!(store.get_step_state("ch1", 0), Some(StepRecord::default()));
        assert!(!store
            .get_milestone_state("ch1", MilestoneKind::Objectives)
            .unwrap()
            .completed);
        assert_eq!(store.get_chapter_aggregate("ch1").unwrap().completion, 0);
    }

    #[test]
    fn reset_all_only_touches_namespace() {
        let (storage, store) = store();
        storage.set_item("other_app", "keep").unwrap();
        store.add_points(10);
        store.save_step_state("ch1", 0, &StepPatch::status(StepStatus::InProgress));

        assert!(store.reset_all());
        assert_eq!(storage.keys().unwrap(), vec!["other_app".to_string()]);
        assert_eq!(store.get_profile().total_points, 0);
    }

    #[test]
    fn export_then_import_restores_progress() {
        let (_, store) = store();
        store.add_points(25);
        store.save_step_state(
            "ch1",
            0,
            &StepPatch {
                completed: Some(true),
                ..StepPatch::default()
            },
        );
        let snapshot = store.export_snapshot();
        assert_eq!(snapshot["profile"]["totalPoints"], json!(25));

        store.reset_all();
        assert!(store.import_snapshot(&snapshot));
        assert_eq!(store.get_profile().total_points, 25);
        assert!(store.get_step_state("ch1", 0).unwrap().completed);
        assert!(!store.import_snapshot(&json!([1, 2])));
    }

    #[test]
    fn failed_import_keeps_previous_progress() {
        let storage = Arc::new(MemoryStorage::with_quota(2_000));
        let store = ProgressStore::new(storage, "q");
        store.add_points(40);
        store.save_step_state(
            "ch1",
            0,
            &StepPatch {
                completed: Some(true),
                score: Some(90),
                ..StepPatch::default()
            },
        );
        let before = store.get_step_state("ch1", 0);

        let oversized = json!({
            "profile": {"totalPoints": 999},
            "step::ch1::1": {"completed": true},
            "zz_notes": "x".repeat(5_000)
        });
        assert!(!store.import_snapshot(&oversized));

        assert_eq!(store.get_profile().total_points, 40);
        assert_eq!(store.get_step_state("ch1", 0), before);
        assert!(store.get_step_state("ch1", 1).is_none());
    }

    #[test]
    fn failed_write_returns_false_and_keeps_previous_value() {
        let storage = Arc::new(MemoryStorage::with_quota(300));
        let store = ProgressStore::new(storage.clone(), "q");
        assert!(store.save_step_state("ch1", 0, &StepPatch::status(StepStatus::InProgress)));
        let before = store.get_step_state("ch1", 0);

        storage.set_item("filler", &"x".repeat(124)).unwrap();
        let ok = store.save_step_state(
            "ch1",
            0,
            &StepPatch {
                completed_at: Some(Utc::now()),
                ..StepPatch::default()
            },
        );
        assert!(!ok);
        assert_eq!(store.get_step_state("ch1", 0), before);
    }
}
