use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_NAMESPACE: &str = "douane_lms_v2";
pub const DEFAULT_PASSING_SCORE: u8 = 80;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SUSPICIOUS_COMPLETION_RATIO: f64 = 0.6;
pub const DEFAULT_STEP_POINTS: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// File backing the progress store. `None` keeps progress in memory only.
    pub storage_path: Option<PathBuf>,
    pub storage_namespace: String,
    pub passing_score: u8,
    pub max_attempts: u32,
    pub enforce_attempt_cap: bool,
    pub suspicious_completion_ratio: f64,
    pub default_step_points: u32,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string());

        let data_dir = settings
            .get_string("content.data_dir")
            .or_else(|_| env::var("DATA_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let storage_path = settings
            .get_string("storage.path")
            .or_else(|_| env::var("STORAGE_PATH"))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let storage_namespace = settings
            .get_string("storage.namespace")
            .or_else(|_| env::var("STORAGE_NAMESPACE"))
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

        let passing_score = settings
            .get_int("scoring.passing_score")
            .ok()
            .map(|value| value.clamp(0, 100) as u8)
            .unwrap_or(DEFAULT_PASSING_SCORE);

        let max_attempts = settings
            .get_int("scoring.max_attempts")
            .ok()
            .filter(|value| *value > 0)
            .map(|value| value as u32)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let enforce_attempt_cap = settings
            .get_bool("scoring.enforce_attempt_cap")
            .unwrap_or(false);

        let suspicious_completion_ratio = settings
            .get_float("storage.suspicious_completion_ratio")
            .ok()
            .filter(|value| (0.0..=1.0).contains(value))
            .unwrap_or(DEFAULT_SUSPICIOUS_COMPLETION_RATIO);

        let default_step_points = settings
            .get_int("scoring.default_step_points")
            .ok()
            .filter(|value| *value >= 0)
            .map(|value| value as u32)
            .unwrap_or(DEFAULT_STEP_POINTS);

        Ok(Config {
            bind_addr,
            data_dir,
            storage_path,
            storage_namespace,
            passing_score,
            max_attempts,
            enforce_attempt_cap,
            suspicious_completion_ratio,
            default_step_points,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            data_dir: PathBuf::from("data"),
            storage_path: None,
            storage_namespace: DEFAULT_NAMESPACE.to_string(),
            passing_score: DEFAULT_PASSING_SCORE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enforce_attempt_cap: false,
            suspicious_completion_ratio: DEFAULT_SUSPICIOUS_COMPLETION_RATIO,
            default_step_points: DEFAULT_STEP_POINTS,
        }
    }
}

/// Progression rules handed to the progress core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPolicy {
    pub passing_score: u8,
    pub max_attempts: u32,
    pub enforce_attempt_cap: bool,
    pub suspicious_completion_ratio: f64,
    pub default_step_points: u32,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ProgressPolicy {
    fn from(config: &Config) -> Self {
        Self {
            passing_score: config.passing_score,
            max_attempts: config.max_attempts,
            enforce_attempt_cap: config.enforce_attempt_cap,
            suspicious_completion_ratio: config.suspicious_completion_ratio,
            default_step_points: config.default_step_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_reads_app_prefixed_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__SCORING__PASSING_SCORE", "70");
        env::set_var("APP__SCORING__ENFORCE_ATTEMPT_CAP", "true");
        env::set_var("APP__STORAGE__NAMESPACE", "test_ns");

        let config = Config::load().expect("config should load");

        env::remove_var("APP__SCORING__PASSING_SCORE");
        env::remove_var("APP__SCORING__ENFORCE_ATTEMPT_CAP");
        env::remove_var("APP__STORAGE__NAMESPACE");
        env::remove_var("SKIP_ROOT_ENV");

        assert_eq!(config.passing_score, 70);
        assert!(config.enforce_attempt_cap);
        assert_eq!(config.storage_namespace, "test_ns");
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    #[serial]
    fn load_falls_back_to_defaults() {
        env::set_var("SKIP_ROOT_ENV", "1");
        let config = Config::load().expect("config should load");
        env::remove_var("SKIP_ROOT_ENV");

        assert_eq!(config.passing_score, DEFAULT_PASSING_SCORE);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(!config.enforce_attempt_cap);
    }
}
