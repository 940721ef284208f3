//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Background task scheduler limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once; extra work is queued.
    pub max_concurrent: usize,
    /// Interval between registry sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
    /// How long shutdown waits for running tasks, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            sweep_interval_ms: 5_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Playback defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Volume level, 0 – 100.
    pub volume: u8,
    /// Quality preference passed to the extractor (`"best"`, `"720p"`, …).
    pub default_quality: String,
    /// Resume videos from their last saved position.
    pub remember_position: bool,
    /// Cancel a video resolve that takes longer than this; `0` disables.
    pub resolve_timeout_secs: u64,
    /// Number of resolved stream descriptors kept in the LRU cache.
    pub source_cache_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 70,
            default_quality: "best".into(),
            remember_position: true,
            resolve_timeout_secs: 0,
            source_cache_size: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptConfig
// ---------------------------------------------------------------------------

/// Transcript behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Fetch the transcript automatically when a video starts playing.
    pub auto_fetch: bool,
    /// Keep the transcript view scrolled to the active cue.
    pub auto_scroll: bool,
    /// Preferred language code; `None` lets the source pick.
    pub language: Option<String>,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            auto_fetch: true,
            auto_scroll: true,
            language: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamingConfig
// ---------------------------------------------------------------------------

/// Network audio streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Address the stream is served on.
    pub host: String,
    pub port: u16,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

// ---------------------------------------------------------------------------
// LibraryConfig
// ---------------------------------------------------------------------------

/// One entry of the watch history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub url: String,
}

/// Persisted user data: watch history and resume positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Most recent first.
    pub history: Vec<HistoryEntry>,
    /// Resume position in seconds, keyed by normalized URL.
    pub positions: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use mediadeck::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub playback: PlaybackConfig,
    pub transcript: TranscriptConfig,
    pub streaming: StreamingConfig,
    pub library: LibraryConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
