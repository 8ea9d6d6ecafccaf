#![allow(dead_code)]

use axum::Router;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use elearning_api::{
    config::{Config, ProgressPolicy},
    create_router,
    models::ContentCatalog,
    services::{
        content_service::ContentService, progress_aggregator::LogBadgeNotifier,
        storage::{KeyValueStorage, MemoryStorage},
        AppState, ProgressService, ProgressStore,
    },
};

pub const NAMESPACE: &str = "test_lms";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Two levels: N1 holds a three-step chapter opened by a video and a
/// two-step quiz chapter; N2 holds a single reading chapter. Part of the
/// exercises use the legacy French shape and live in `exercises/`.
pub fn write_data_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(
        dir.path().join("levels.json"),
        json!({"niveaux": [
            {
                "id": "N1",
                "titre": "Découverte",
                "chapitres": [
                    {
                        "id": "ch1",
                        "titre": "Incoterms",
                        "emoji": "🚢",
                        "objectifs": ["Lire un incoterm"],
                        "etapes": [
                            {"id": "intro", "titre": "Vidéo", "points": 5},
                            {"id": "qcm", "titre": "QCM", "points": 20},
                            {"id": "vf", "titre": "Vrai ou faux", "points": 10}
                        ],
                        "portfolio": {"titre": "Synthèse"}
                    },
                    {
                        "id": "ch2",
                        "titre": "Dédouanement",
                        "etapes": [
                            {"id": "q1", "titre": "Quiz 1", "exercices": [
                                {"type": "qcm", "question": "DAU ?", "choix": [
                                    {"texte": "Déclaration"}, {"texte": "Document", "correct": true}
                                ]}
                            ]},
                            {"id": "q2", "titre": "Quiz 2", "exercices": [
                                {"type": "qcm", "content": {"question": "?", "options": ["a", "b"], "correctAnswer": 0}}
                            ]}
                        ]
                    }
                ]
            },
            {
                "id": "N2",
                "titre": "Approfondissement",
                "chapitres": [{
                    "id": "ch3",
                    "titre": "Origine",
                    "etapes": [{"id": "lecture", "titre": "Lecture", "exercices": [
                        {"type": "lecture", "texte": "Règles d'origine"}
                    ]}]
                }]
            }
        ]})
        .to_string(),
    )
    .expect("write levels");

    fs::create_dir(dir.path().join("exercises")).expect("exercises dir");
    fs::write(
        dir.path().join("exercises").join("ch1.json"),
        json!({"exercices": [
            {"id": "ch1-video", "type": "video", "url": "incoterms.mp4"},
            {"id": "ch1-qcm", "exercice": {"type": "qcm", "question": "EXW ?", "choix": [
                {"texte": "Vendeur", "correct": true}, {"texte": "Acheteur"}
            ]}},
            {"id": "ch1-vf", "type": "vrai_faux", "affirmations": [
                {"texte": "FOB concerne le maritime", "correct": true},
                {"texte": "DDP laisse les droits à l'acheteur"}
            ]}
        ]})
        .to_string(),
    )
    .expect("write exercises");

    dir
}

pub fn load_catalog(dir: &TempDir) -> Arc<ContentCatalog> {
    let loaded = ContentService::new(dir.path())
        .load_catalog()
        .expect("catalog should load");
    Arc::new(loaded.catalog)
}

pub fn service_with_storage(
    catalog: Arc<ContentCatalog>,
    storage: Arc<dyn KeyValueStorage>,
    policy: ProgressPolicy,
) -> ProgressService {
    ProgressService::new(
        catalog,
        ProgressStore::new(storage, NAMESPACE),
        policy,
        Arc::new(LogBadgeNotifier),
    )
}

pub fn memory_service(catalog: Arc<ContentCatalog>) -> ProgressService {
    service_with_storage(
        catalog,
        Arc::new(MemoryStorage::new()),
        ProgressPolicy::default(),
    )
}

/// Router over the sample data directory. The directory must outlive it.
pub fn create_test_app() -> (Router, TempDir) {
    init_tracing();
    let dir = write_data_dir();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let app_state = Arc::new(AppState::new(config).expect("app state"));
    (create_router(app_state), dir)
}
