use crate::error::{ConfigError, CoreError};
use crate::types::{PressurePolicy, ScoringWeights, Session};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_DISCOVERY_FEED: &str =
    "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/whats-hot";

pub const DEFAULT_MODEL_REPO: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub sync: SyncConfig,
    pub ranking: RankingConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    pub discovery_feed: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bsky.social".to_string(),
            user_agent: "mindfeed/0.1".to_string(),
            discovery_feed: DEFAULT_DISCOVERY_FEED.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub did: Option<String>,
    pub access_jwt: Option<String>,
}

impl SessionConfig {
    pub fn session(&self) -> Option<Session> {
        match (&self.did, &self.access_jwt) {
            (Some(did), Some(jwt)) if !did.trim().is_empty() && !jwt.trim().is_empty() => {
                Some(Session {
                    did: did.clone(),
                    access_jwt: jwt.clone(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://mindfeed.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: String,
    pub max_tokens: usize,
    pub repo_url: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: "models/all-MiniLM-L6-v2".to_string(),
            max_tokens: 256,
            repo_url: DEFAULT_MODEL_REPO.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeline_target: usize,
    pub discovery_target: usize,
    pub page_size: u32,
    pub likes_page_size: u32,
    pub max_feed_pages: usize,
    pub max_like_pages: usize,
    pub batch_size: usize,
    pub like_persist_batch: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub memory_threshold_mb: u64,
    pub pressure_policy: PressurePolicy,
    pub pressure_cooldown_secs: u64,
    pub memory_check_interval: usize,
    pub cooldown_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeline_target: 50,
            discovery_target: 150,
            page_size: 100,
            likes_page_size: 50,
            max_feed_pages: 10,
            max_like_pages: 3,
            batch_size: 5,
            like_persist_batch: 5,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            memory_threshold_mb: 150,
            pressure_policy: PressurePolicy::Continue,
            pressure_cooldown_secs: 30,
            memory_check_interval: 20,
            cooldown_ms: 200,
            progress_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    #[serde(flatten)]
    pub weights: ScoringWeights,
    pub feed_limit: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            feed_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub times: Vec<String>,
    pub retry_base_minutes: u64,
    pub max_retries: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            times: vec!["04:00".to_string(), "16:00".to_string()],
            retry_base_minutes: 15,
            max_retries: 3,
        }
    }
}

impl ScheduleConfig {
    pub fn parsed_times(&self) -> Result<Vec<NaiveTime>, ConfigError> {
        self.times
            .iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| ConfigError::InvalidValue {
                    field: "schedule.times".to_string(),
                    value: raw.clone(),
                })
            })
            .collect()
    }
}

impl AppConfig {
    /// Reads a TOML file, applies environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_overrides();
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Like `load`, but falls back to defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        debug!("No config at {}, using defaults", path.display());
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(did) = lookup("MINDFEED_DID") {
            self.session.did = Some(did);
        }
        if let Some(jwt) = lookup("MINDFEED_ACCESS_JWT") {
            self.session.access_jwt = Some(jwt);
        }
        if let Some(url) = lookup("MINDFEED_DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Some(dir) = lookup("MINDFEED_MODEL_DIR") {
            self.model.dir = dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sync = &self.sync;

        if sync.page_size == 0 || sync.page_size > 100 {
            return Err(invalid("sync.page_size", sync.page_size));
        }
        if sync.likes_page_size == 0 || sync.likes_page_size > 100 {
            return Err(invalid("sync.likes_page_size", sync.likes_page_size));
        }
        if sync.batch_size == 0 {
            return Err(invalid("sync.batch_size", sync.batch_size));
        }
        if sync.like_persist_batch == 0 {
            return Err(invalid("sync.like_persist_batch", sync.like_persist_batch));
        }
        if sync.max_feed_pages == 0 || sync.max_like_pages == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "page caps must be at least 1".to_string(),
            });
        }
        if sync.retry_attempts == 0 {
            return Err(invalid("sync.retry_attempts", sync.retry_attempts));
        }
        if sync.memory_check_interval == 0 {
            return Err(invalid(
                "sync.memory_check_interval",
                sync.memory_check_interval,
            ));
        }

        let weights = &self.ranking.weights;
        let all_finite = [
            weights.similarity,
            weights.recency,
            weights.engagement,
            weights.diversity,
            weights.small_creator,
        ]
        .iter()
        .all(|w| w.is_finite());
        if !all_finite {
            return Err(ConfigError::ValidationFailed {
                reason: "ranking weights must be finite".to_string(),
            });
        }

        if self.model.max_tokens == 0 {
            return Err(invalid("model.max_tokens", self.model.max_tokens));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "api.base_url".to_string(),
            });
        }

        self.schedule.parsed_times()?;
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.timeline_target, 50);
        assert_eq!(config.sync.discovery_target, 150);
        assert_eq!(config.ranking.weights, ScoringWeights::default());
        assert_eq!(config.schedule.parsed_times().unwrap().len(), 2);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            [sync]
            batch_size = 10
            pressure_policy = "suspend"

            [ranking]
            recency = 2.0
        "#;
        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.sync.pressure_policy, PressurePolicy::Suspend);
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.ranking.weights.recency, 2.0);
        assert_eq!(config.ranking.weights.similarity, 1.0);
        assert_eq!(config.api.discovery_feed, DEFAULT_DISCOVERY_FEED);
    }

    #[test]
    fn rejects_oversized_page() {
        let mut config = AppConfig::default();
        config.sync.page_size = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_schedule_time() {
        let mut config = AppConfig::default();
        config.schedule.times = vec!["25:99".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_nan_weight() {
        let mut config = AppConfig::default();
        config.ranking.weights.similarity = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn overrides_replace_session_and_paths() {
        let vars: HashMap<&str, &str> = [
            ("MINDFEED_DID", "did:plc:abc"),
            ("MINDFEED_ACCESS_JWT", "jwt"),
            ("MINDFEED_DATABASE_URL", "sqlite://other.db"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        let session = config.session.session().unwrap();
        assert_eq!(session.did, "did:plc:abc");
        assert_eq!(config.store.database_url, "sqlite://other.db");
        assert_eq!(config.model.dir, "models/all-MiniLM-L6-v2");
    }

    #[test]
    fn blank_credentials_are_no_session() {
        let session = SessionConfig {
            did: Some("did:plc:abc".to_string()),
            access_jwt: Some("  ".to_string()),
        };
        assert!(session.session().is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AppConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
