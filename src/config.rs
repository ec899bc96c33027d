//! Configuration management for mediachunk

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default fragment size in characters (safe margin under the 1 MiB document limit)
pub const DEFAULT_CHUNK_SIZE: usize = 800_000;

/// Default pause between sequential fragment writes
pub const DEFAULT_WRITE_PAUSE_MS: u64 = 60;

/// Default number of concurrent fragment reads per batch
pub const DEFAULT_READ_BATCH_SIZE: usize = 10;

/// Default maximum width for re-encoded images
pub const DEFAULT_MAX_IMAGE_WIDTH: u32 = 1600;

/// Default JPEG quality for re-encoded images
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Default ceiling for non-image media: 40 MiB
pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 40 * 1024 * 1024;

/// Default application identifier used to namespace collections
pub const DEFAULT_APP_ID: &str = "family-photo-app";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Document store configuration
    pub store: StoreConfig,

    /// Fragmenting configuration
    pub chunk: ChunkConfig,

    /// Media encoding configuration
    pub encoder: EncoderConfig,

    /// Resolved-media cache configuration
    pub cache: CacheConfig,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Application identifier, used as the collection path prefix
    pub app_id: String,

    /// Collection holding direct records and chunk manifests
    pub manifests_collection: String,

    /// Collection holding fragment documents
    pub fragments_collection: String,

    /// Directory for the local sled database
    pub data_dir: PathBuf,

    /// Per-operation timeout (ms)
    pub op_timeout_ms: u64,

    /// Retry attempts for failed operations
    pub retry_attempts: u32,

    /// Base delay for exponential backoff (ms)
    pub retry_base_delay_ms: u64,
}

/// Fragmenting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Fragment size in characters
    pub chunk_size: usize,

    /// Minimum pause between fragment writes (ms, 0 = no pacing)
    pub write_pause_ms: u64,

    /// Concurrent fragment reads per batch
    pub read_batch_size: usize,
}

/// Media encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Images wider than this are downscaled
    pub max_image_width: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Ceiling on the estimated decoded size of non-image media
    pub max_video_bytes: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum resolved entries kept (0 = unbounded)
    pub max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            chunk: ChunkConfig::default(),
            encoder: EncoderConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mediachunk");

        StoreConfig {
            app_id: DEFAULT_APP_ID.to_string(),
            manifests_collection: "images".to_string(),
            fragments_collection: "image_chunks".to_string(),
            data_dir,
            op_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl StoreConfig {
    /// Per-operation timeout as a duration
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Build the collection path builder for this deployment
    pub fn paths(&self) -> CollectionPaths {
        CollectionPaths::new(
            &self.app_id,
            &self.manifests_collection,
            &self.fragments_collection,
        )
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_pause_ms: DEFAULT_WRITE_PAUSE_MS,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }
}

impl ChunkConfig {
    /// Pause between fragment writes as a duration
    pub fn write_pause(&self) -> Duration {
        Duration::from_millis(self.write_pause_ms)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { max_entries: 0 }
    }
}

/// Namespaced collection paths for one deployment
///
/// Collections live under `artifacts/{app_id}/public/data/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPaths {
    manifests: String,
    fragments: String,
}

impl CollectionPaths {
    /// Build paths for the given application id and collection names
    pub fn new(app_id: &str, manifests: &str, fragments: &str) -> Self {
        CollectionPaths {
            manifests: Self::path(app_id, manifests),
            fragments: Self::path(app_id, fragments),
        }
    }

    /// Full path of a named collection
    pub fn path(app_id: &str, name: &str) -> String {
        format!("artifacts/{}/public/data/{}", app_id, name)
    }

    /// Path of the manifests collection
    pub fn manifests(&self) -> &str {
        &self.manifests
    }

    /// Path of the fragments collection
    pub fn fragments(&self) -> &str {
        &self.fragments
    }
}

impl Default for CollectionPaths {
    fn default() -> Self {
        StoreConfig::default().paths()
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(app_id) = std::env::var("MEDIACHUNK_APP_ID") {
            let app_id = app_id.trim().to_string();
            if !app_id.is_empty() {
                self.store.app_id = app_id;
            }
        }

        if let Ok(dir) = std::env::var("MEDIACHUNK_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.store.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(chunk_size) = std::env::var("MEDIACHUNK_CHUNK_SIZE") {
            if let Ok(size) = chunk_size.trim().parse::<usize>() {
                self.chunk.chunk_size = size;
            }
        }

        if let Ok(pause) = std::env::var("MEDIACHUNK_WRITE_PAUSE_MS") {
            if let Ok(ms) = pause.trim().parse::<u64>() {
                self.chunk.write_pause_ms = ms;
            }
        }

        if let Ok(batch) = std::env::var("MEDIACHUNK_READ_BATCH") {
            if let Ok(n) = batch.trim().parse::<usize>() {
                self.chunk.read_batch_size = n;
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.app_id.is_empty() {
            return Err(Error::InvalidConfig("Application id is required".to_string()));
        }

        if self.store.manifests_collection.is_empty() || self.store.fragments_collection.is_empty() {
            return Err(Error::InvalidConfig(
                "Collection names must not be empty".to_string(),
            ));
        }

        if self.store.manifests_collection == self.store.fragments_collection {
            return Err(Error::InvalidConfig(
                "Manifests and fragments must use different collections".to_string(),
            ));
        }

        if self.chunk.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.chunk.read_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "Read batch size must be greater than 0".to_string(),
            ));
        }

        if self.encoder.max_image_width == 0 {
            return Err(Error::InvalidConfig(
                "Maximum image width must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.encoder.jpeg_quality) {
            return Err(Error::InvalidConfig(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store.data_dir)?;
        Ok(())
    }
}
