use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{info, debug, warn};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CourierConfig {
    pub queue: QueueSettings,
    pub intake: IntakeSettings,
    pub fetch: FetchSettings,
    pub delivery: DeliverySettings,
}

/// Which queue implementation backs the lanes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    /// In-process lanes, only meaningful when all stages share one process
    Memory,
}

/// Queue settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    pub redis_url: String,
    pub inbound_lane: String,
    pub outbound_lane: String,
    pub retry_delay_ms: u64, // Pause after a queue I/O error
}

/// Intake HTTP settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeSettings {
    pub bind_address: String,
    pub api_token_file: PathBuf,
}

/// Fetch stage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FetchSettings {
    pub download_dir: PathBuf,
    pub max_file_size_bytes: u64,
    pub ytdlp_path: Option<PathBuf>, // Looked up on PATH when unset
}

/// Delivery stage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DeliverySettings {
    pub api_base_url: String,
    pub bot_token_file: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: "redis://localhost:6379/0".to_string(),
            inbound_lane: "download_tasks".to_string(),
            outbound_lane: "download_results".to_string(),
            retry_delay_ms: 1000,
        }
    }
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            api_token_file: PathBuf::from("/run/secrets/api_token"),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            max_file_size_bytes: 50 * 1024 * 1024,
            ytdlp_path: None,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.telegram.org".to_string(),
            bot_token_file: PathBuf::from("/run/secrets/telegram_token"),
            request_timeout_secs: 120,
        }
    }
}

impl CourierConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "media-courier", "media-courier") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Path of the default configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    /// Load the configuration from `path`, or from the default location.
    ///
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            if let Err(e) = config.save_to_file(&config_path) {
                warn!("Could not write default configuration: {:#}", e);
            }
            Ok(config)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<PathBuf> {
        let config_path = Self::default_path();
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Apply deployment overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.queue.redis_url = url;
        } else if let Some(host) = lookup("REDIS_HOST") {
            self.queue.redis_url = format!("redis://{}:6379/0", host);
        }

        if let Some(path) = lookup("API_TOKEN_FILE") {
            self.intake.api_token_file = PathBuf::from(path);
        }

        if let Some(path) = lookup("BOT_TOKEN_FILE") {
            self.delivery.bot_token_file = PathBuf::from(path);
        }
    }
}
