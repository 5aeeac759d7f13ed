//! Application configuration from file and environment variables
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables (prefixed with IMGBED, sections split by `__`)
//! 2. Config file (imgbed.toml)
//! 3. Default values

use crate::naming::NamingStrategy;
use crate::transcode::TranscodeSettings;
use crate::upload_lock::DEFAULT_GRACE;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "imgbed.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Prefix for absolute URLs in responses. Empty means derive it from the
    /// request's Host header.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            public_base_url: String::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding served images
    pub content_dir: String,
    /// Directory for untouched uploads when `compression.save_original` is on
    pub original_dir: String,
    /// JSON document mapping content hashes to stored names
    pub index_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_dir: "./uploads/images".to_string(),
            original_dir: "./uploads/original".to_string(),
            index_path: "./uploads/file-hash-map.json".to_string(),
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Multipart field carrying files
    pub field_name: String,
    /// Maximum files per request
    pub max_files: usize,
    /// Maximum size per file in MB
    pub max_file_size_mb: u64,
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: "images".to_string(),
            max_files: 10,
            max_file_size_mb: 20,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "image/svg+xml".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == mime_type)
    }
}

/// File naming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub strategy: NamingStrategy,
    /// Suffix attempts before a name collision fails the item
    pub max_attempts: u32,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strategy: NamingStrategy::default(),
            max_attempts: 100,
        }
    }
}

/// Deduplication lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a finished hash stays locked
    pub lock_grace_ms: u64,
    /// How often expired locks are purged
    pub sweep_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lock_grace_ms: DEFAULT_GRACE.as_millis() as u64,
            sweep_interval_secs: 5,
        }
    }
}

impl DedupConfig {
    pub fn lock_grace(&self) -> Duration {
        Duration::from_millis(self.lock_grace_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub naming: NamingConfig,
    pub compression: TranscodeSettings,
    pub dedup: DedupConfig,
}

impl AppConfig {
    /// Load configuration from the file named by `IMGBED_CONFIG`, or
    /// `imgbed.toml`, plus environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("IMGBED_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add config file (optional)
            .add_source(File::new(path, FileFormat::Toml).required(false))
            // Override with environment variables
            // e.g., IMGBED__SERVER__BIND, IMGBED__COMPRESSION__QUALITY
            .add_source(
                Environment::with_prefix("IMGBED")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
