use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::analyzers::AnalyzerConfig;
use crate::services::prediction::PredictionConfig;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/genset-runtime/config.json";

fn setup_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GENSET_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    prediction_interval_seconds: Option<u64>,
    #[serde(default)]
    prediction_concurrency: Option<usize>,
    #[serde(default)]
    retention_interval_seconds: Option<u64>,
    #[serde(default)]
    telemetry_retention_days: Option<i64>,
    #[serde(default)]
    analyzer: Option<AnalyzerConfig>,
    #[serde(default)]
    prediction: Option<PredictionConfig>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn env_allows(key: &str) -> bool {
    env_optional_string(key).is_none()
}

fn apply_setup_overrides(config: &mut RuntimeConfig, overrides: SetupConfigOverrides) {
    if config.database_url.is_none() {
        config.database_url = overrides
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(normalize_database_url);
    }
    if env_allows("GENSET_PREDICTION_INTERVAL_SECONDS") {
        if let Some(value) = overrides.prediction_interval_seconds.filter(|v| *v != 0) {
            config.prediction_interval_seconds = value;
        }
    }
    if env_allows("GENSET_PREDICTION_CONCURRENCY") {
        if let Some(value) = overrides.prediction_concurrency.filter(|v| *v != 0) {
            config.prediction_concurrency = value;
        }
    }
    if env_allows("GENSET_RETENTION_INTERVAL_SECONDS") {
        if let Some(value) = overrides.retention_interval_seconds.filter(|v| *v != 0) {
            config.retention_interval_seconds = value;
        }
    }
    if env_allows("GENSET_TELEMETRY_RETENTION_DAYS") {
        if let Some(value) = overrides.telemetry_retention_days.filter(|v| *v > 0) {
            config.telemetry_retention_days = value;
        }
    }
    if let Some(analyzer) = overrides.analyzer {
        config.analyzer = analyzer;
    }
    if let Some(prediction) = overrides.prediction {
        let learning_rate = config.prediction.learning_rate;
        config.prediction = prediction;
        if !env_allows("GENSET_LEARNING_RATE") {
            config.prediction.learning_rate = learning_rate;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `None` runs against the in-process store.
    pub database_url: Option<String>,
    pub prediction_interval_seconds: u64,
    pub prediction_concurrency: usize,
    pub retention_interval_seconds: u64,
    pub telemetry_retention_days: i64,
    pub analyzer: AnalyzerConfig,
    pub prediction: PredictionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            prediction_interval_seconds: 1800,
            prediction_concurrency: 4,
            retention_interval_seconds: 86_400,
            telemetry_retention_days: 42,
            analyzer: AnalyzerConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let database_url = env_optional_string("GENSET_DATABASE_URL")
            .or_else(|| env_optional_string("DATABASE_URL"))
            .map(|url| normalize_database_url(&url));
        let mut prediction = defaults.prediction.clone();
        if let Some(rate) = env_f64("GENSET_LEARNING_RATE") {
            if !(rate > 0.0 && rate <= 1.0) {
                anyhow::bail!("GENSET_LEARNING_RATE must be in (0, 1], got {rate}");
            }
            prediction.learning_rate = rate;
        }

        let mut config = Self {
            database_url,
            prediction_interval_seconds: env_u64(
                "GENSET_PREDICTION_INTERVAL_SECONDS",
                defaults.prediction_interval_seconds,
            ),
            prediction_concurrency: env_u64(
                "GENSET_PREDICTION_CONCURRENCY",
                defaults.prediction_concurrency as u64,
            ) as usize,
            retention_interval_seconds: env_u64(
                "GENSET_RETENTION_INTERVAL_SECONDS",
                defaults.retention_interval_seconds,
            ),
            telemetry_retention_days: env_u64(
                "GENSET_TELEMETRY_RETENTION_DAYS",
                defaults.telemetry_retention_days as u64,
            ) as i64,
            analyzer: defaults.analyzer,
            prediction,
        };

        if let Some(overrides) = load_setup_config_overrides(&setup_config_path()) {
            apply_setup_overrides(&mut config, overrides);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.prediction_interval_seconds == 0 {
            anyhow::bail!("prediction interval must be positive");
        }
        if self.retention_interval_seconds == 0 {
            anyhow::bail!("retention interval must be positive");
        }
        if self.telemetry_retention_days <= 0 {
            anyhow::bail!("telemetry retention must be at least one day");
        }
        self.analyzer.validate()?;
        self.prediction.validate()?;
        Ok(())
    }

    pub fn prediction_interval(&self) -> Duration {
        Duration::from_secs(self.prediction_interval_seconds)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_seconds)
    }
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str) -> Option<f64> {
    env_optional_string(key).and_then(|value| value.parse::<f64>().ok())
}

fn normalize_database_url(url: &str) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_file_overrides_defaults_and_nested_tunables() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "database_url": "postgresql+asyncpg://genset@db/runtime",
                "prediction_concurrency": 8,
                "telemetry_retention_days": 0,
                "analyzer": { "fuel_min_points": 4 },
                "prediction": { "learning_rate": 0.5 }
            }"#,
        )?;

        let overrides = load_setup_config_overrides(&path).expect("overrides");
        let mut config = RuntimeConfig::default();
        apply_setup_overrides(&mut config, overrides);

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgresql://genset@db/runtime")
        );
        assert_eq!(config.prediction_concurrency, 8);
        // Non-positive values are ignored.
        assert_eq!(config.telemetry_retention_days, 42);
        assert_eq!(config.analyzer.fuel_min_points, 4);
        assert_eq!(config.analyzer.battery_min_points, 5);
        assert_eq!(config.prediction.learning_rate, 0.5);
        assert_eq!(config.prediction.reconcile_window_days, 7);
        assert!(config.validate().is_ok());
        Ok(())
    }

    #[test]
    fn env_database_url_wins_over_setup_file() {
        let mut config = RuntimeConfig {
            database_url: Some("postgresql://env/db".to_string()),
            ..RuntimeConfig::default()
        };
        apply_setup_overrides(
            &mut config,
            SetupConfigOverrides {
                database_url: Some("postgresql://file/db".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(config.database_url.as_deref(), Some("postgresql://env/db"));
    }

    #[test]
    fn unreadable_setup_file_falls_back_to_env_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json")?;
        assert!(load_setup_config_overrides(&path).is_none());
        assert!(load_setup_config_overrides(&temp.path().join("missing.json")).is_none());
        Ok(())
    }

    fn rejects(overrides: serde_json::Value, needle: &str) {
        let overrides: SetupConfigOverrides = serde_json::from_value(overrides).unwrap();
        let mut config = RuntimeConfig::default();
        apply_setup_overrides(&mut config, overrides);
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected `{needle}` in `{err}`"
        );
    }

    #[test]
    fn validate_rejects_inverted_fuel_estimate_bounds() {
        rejects(
            serde_json::json!({ "analyzer": { "min_estimated_fuel_rate": 20.0 } }),
            "min_estimated_fuel_rate",
        );
    }

    #[test]
    fn validate_rejects_zero_min_points() {
        rejects(
            serde_json::json!({ "analyzer": { "fuel_min_points": 0 } }),
            "fuel_min_points",
        );
        rejects(
            serde_json::json!({ "analyzer": { "battery_min_points": 0 } }),
            "battery_min_points",
        );
        rejects(
            serde_json::json!({ "analyzer": { "relaxed_min_points": 0 } }),
            "relaxed_min_points",
        );
    }

    #[test]
    fn validate_rejects_negative_change_and_elapsed_minimums() {
        rejects(
            serde_json::json!({ "analyzer": { "fuel_min_change_percent": -0.5 } }),
            "fuel_min_change_percent",
        );
        rejects(
            serde_json::json!({ "analyzer": { "battery_min_change_v": -0.1 } }),
            "battery_min_change_v",
        );
        rejects(
            serde_json::json!({ "analyzer": { "min_elapsed_hours": -1.0 } }),
            "min_elapsed_hours",
        );
        rejects(
            serde_json::json!({ "analyzer": { "relaxed_min_elapsed_hours": -0.01 } }),
            "relaxed_min_elapsed_hours",
        );
    }

    #[test]
    fn validate_rejects_non_positive_reconcile_window() {
        rejects(
            serde_json::json!({ "prediction": { "reconcile_window_days": 0 } }),
            "reconcile_window_days",
        );
    }

    #[test]
    fn validate_rejects_confidence_factor_outside_unit_interval() {
        rejects(
            serde_json::json!({ "prediction": { "estimated_confidence_factor": 0.0 } }),
            "estimated_confidence_factor",
        );
        rejects(
            serde_json::json!({ "prediction": { "estimated_confidence_factor": 1.5 } }),
            "estimated_confidence_factor",
        );
    }

    #[test]
    fn retention_runs_daily_by_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retention_interval(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.prediction_interval(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn validate_rejects_out_of_range_learning_rate() {
        let mut config = RuntimeConfig::default();
        config.prediction.learning_rate = 1.5;
        assert!(config.validate().is_err());
        config.prediction.learning_rate = 1.0;
        assert!(config.validate().is_ok());
    }
}
