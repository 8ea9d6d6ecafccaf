use std::sync::Arc;

use crate::config::Config;
use crate::models::ContentCatalog;

use self::content_service::ContentService;
use self::exercise_normalizer::NormalizerStats;

pub struct AppState {
    pub config: Config,
    pub catalog: Arc<ContentCatalog>,
    pub normalizer_stats: NormalizerStats,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Loading content from {}", config.data_dir.display());
        let loaded = ContentService::new(&config.data_dir).load_catalog()?;
        Ok(Self::with_catalog(config, loaded.catalog, loaded.stats))
    }

    pub fn with_catalog(config: Config, catalog: ContentCatalog, normalizer_stats: NormalizerStats) -> Self {
        Self {
            config,
            catalog: Arc::new(catalog),
            normalizer_stats,
        }
    }
}

pub mod content_service;
pub mod exercise_normalizer;
pub mod grading;
pub mod progress_aggregator;
pub mod progress_service;
pub mod progress_store;
pub mod scoring_gate;
pub mod step_resolver;
pub mod storage;

pub use progress_service::{PortfolioOutcome, ProgressService};
pub use progress_store::ProgressStore;
pub use scoring_gate::{SubmissionOutcome, VisitOutcome};
