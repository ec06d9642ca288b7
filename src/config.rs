//! Configuration for the fixwire pipeline.

use crate::core::{DeliveryMode, Identity, DEFAULT_BATCH_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder key used until the user is issued a real one.
pub const DEFAULT_API_KEY: &str = "NO_INVITE";

pub const DEFAULT_ENDPOINT: &str = "https://api.shadowmaps.com/v1/update/";
pub const DEFAULT_BATCH_ENDPOINT: &str = "https://api.shadowmaps.com/v1/batch/";

/// Main configuration for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier sent with every update
    pub user_id: String,

    /// Bearer token for the improvement service
    pub api_key: String,

    pub device_model: Option<String>,

    /// URL receiving realtime updates
    pub endpoint: String,

    /// URL receiving batch uploads
    pub batch_endpoint: String,

    /// Current delivery mode. The CLI writes it; a running pipeline polls it.
    pub mode: DeliveryMode,

    /// Updates held in memory before a batch is persisted
    pub batch_capacity: usize,

    /// Oldest an in-progress update may get before it is finalized (0 disables)
    #[serde(with = "duration_serde")]
    pub max_update_age: Duration,

    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Path for storing stats
    pub data_path: PathBuf,

    /// Path for persisted batch files
    pub batch_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fixwire");

        Self {
            user_id: default_user_id(),
            api_key: DEFAULT_API_KEY.to_string(),
            device_model: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_endpoint: DEFAULT_BATCH_ENDPOINT.to_string(),
            mode: DeliveryMode::default(),
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            max_update_age: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            batch_path: data_dir.join("batches"),
            data_path: data_dir,
        }
    }
}

/// `{hostname}-{8 hex chars}`, stable once saved to the config file.
fn default_user_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "device".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fixwire")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        std::fs::create_dir_all(&self.batch_path)?;
        Ok(())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    pub fn identity(&self) -> Identity {
        let identity = Identity::new(&self.user_id, &self.api_key);
        match &self.device_model {
            Some(model) => identity.with_device_model(model),
            None => identity,
        }
    }

    /// A copy that is safe to print: the API key is masked unless it is the
    /// placeholder.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.api_key != DEFAULT_API_KEY {
            config.api_key = mask_secret(&config.api_key);
        }
        config
    }

    /// Maximum update age, or `None` when expiry is disabled.
    pub fn max_update_age(&self) -> Option<chrono::Duration> {
        if self.max_update_age.is_zero() {
            None
        } else {
            chrono::Duration::from_std(self.max_update_age).ok()
        }
    }
}

/// Keep the first four characters of `secret` and mask the rest.
fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if visible.chars().count() == secret.chars().count() {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_key, DEFAULT_API_KEY);
        assert_eq!(config.batch_capacity, 120);
        assert_eq!(config.mode, DeliveryMode::Realtime);
        assert_eq!(config.max_update_age, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.batch_path.starts_with(&config.data_path));
    }

    #[test]
    fn test_default_user_id_shape() {
        let id = default_user_id();
        let (host, suffix) = id.rsplit_once('-').unwrap();
        assert!(!host.is_empty());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_max_update_age_zero_disables() {
        let mut config = Config::default();
        assert_eq!(config.max_update_age(), Some(chrono::Duration::seconds(30)));

        config.max_update_age = Duration::ZERO;
        assert_eq!(config.max_update_age(), None);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.user_id = "field-unit-7".to_string();
        config.device_model = Some("Pixel 8".to_string());
        config.mode = DeliveryMode::Passive;
        config.max_update_age = Duration::ZERO;
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"mode\": \"passive\""));
        assert!(raw.contains("\"max_update_age\": 0"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.identity().device_model.as_deref(),
            Some("Pixel 8")
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"user_id":"abc","batch_capacity":5}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.user_id, "abc");
        assert_eq!(config.batch_capacity, 5);
        assert_eq!(config.api_key, DEFAULT_API_KEY);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let mut config = Config::default();
        config.api_key = "sk-live-0123456789abcdef".to_string();

        let redacted = config.redacted();
        assert_eq!(redacted.api_key, "sk-l****");
        assert_eq!(redacted.user_id, config.user_id);

        let printed = serde_json::to_string_pretty(&redacted).unwrap();
        assert!(!printed.contains("0123456789abcdef"));
        assert_eq!(config.api_key, "sk-live-0123456789abcdef");
    }

    #[test]
    fn test_redacted_short_and_placeholder_keys() {
        let mut config = Config::default();
        assert_eq!(config.redacted().api_key, DEFAULT_API_KEY);

        config.api_key = "abc".to_string();
        assert_eq!(config.redacted().api_key, "****");
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
