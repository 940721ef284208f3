//! Settings manager: typed access to [`AppConfig`] plus the user library
//! (watch history, resume positions).
//!
//! Persistence goes through a [`SettingsStore`]; [`TomlSettingsStore`] writes
//! `settings.toml` in the platform config directory.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::collab::Validator;
use crate::config::{AppConfig, AppPaths, HistoryEntry};
use crate::error::CoreError;

/// Longest watch history kept.
pub const MAX_HISTORY: usize = 50;

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<AppConfig>;
    fn save(&self, config: &AppConfig) -> Result<()>;
}

/// TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `settings.toml` in the platform config directory.
    pub fn default_location() -> Self {
        Self::new(AppPaths::new().settings_file)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<AppConfig> {
        AppConfig::load_from(&self.path)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        config.save_to(&self.path)
    }
}

/// Keeps the last saved config in memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    saved: Mutex<Option<AppConfig>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<AppConfig> {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<AppConfig> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SettingsManager
// ---------------------------------------------------------------------------

pub struct SettingsManager {
    store: Arc<dyn SettingsStore>,
    validator: Arc<dyn Validator>,
    config: AppConfig,
    dirty: bool,
}

impl SettingsManager {
    /// Load the config from `store`. A missing file yields defaults.
    pub fn load(store: Arc<dyn SettingsStore>, validator: Arc<dyn Validator>) -> Result<Self> {
        let config = store.load()?;
        log::debug!("settings: loaded ({} history entries)", config.library.history.len());
        Ok(Self {
            store,
            validator,
            config,
            dirty: false,
        })
    }

    pub fn save(&mut self) -> Result<()> {
        self.store.save(&self.config)?;
        self.dirty = false;
        log::debug!("settings: saved");
        Ok(())
    }

    /// Save only when something changed since the last save.
    pub fn save_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    pub fn volume(&self) -> u8 {
        self.config.playback.volume
    }

    /// Clamped to 0 – 100.
    pub fn set_volume(&mut self, volume: i32) -> u8 {
        let volume = volume.clamp(0, 100) as u8;
        self.update(|c| c.playback.volume = volume);
        volume
    }

    pub fn quality(&self) -> &str {
        &self.config.playback.default_quality
    }

    pub fn set_quality(&mut self, quality: &str) -> Result<(), CoreError> {
        let quality = quality.trim();
        if quality.is_empty() {
            return Err(CoreError::validation("quality", "quality cannot be empty"));
        }
        let quality = quality.to_string();
        self.update(|c| c.playback.default_quality = quality);
        Ok(())
    }

    pub fn remember_position(&self) -> bool {
        self.config.playback.remember_position
    }

    pub fn set_remember_position(&mut self, enabled: bool) {
        self.update(|c| c.playback.remember_position = enabled);
    }

    // -----------------------------------------------------------------------
    // Transcript
    // -----------------------------------------------------------------------

    pub fn auto_fetch_transcript(&self) -> bool {
        self.config.transcript.auto_fetch
    }

    pub fn set_auto_fetch_transcript(&mut self, enabled: bool) {
        self.update(|c| c.transcript.auto_fetch = enabled);
    }

    pub fn auto_scroll(&self) -> bool {
        self.config.transcript.auto_scroll
    }

    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.update(|c| c.transcript.auto_scroll = enabled);
    }

    pub fn transcript_language(&self) -> Option<&str> {
        self.config.transcript.language.as_deref()
    }

    pub fn set_transcript_language(&mut self, language: Option<&str>) {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        self.update(|c| c.transcript.language = language);
    }

    // -----------------------------------------------------------------------
    // Streaming / scheduler
    // -----------------------------------------------------------------------

    pub fn streaming_enabled(&self) -> bool {
        self.config.streaming.enabled
    }

    pub fn set_streaming_enabled(&mut self, enabled: bool) {
        self.update(|c| c.streaming.enabled = enabled);
    }

    pub fn streaming_port(&self) -> u16 {
        self.config.streaming.port
    }

    pub fn set_streaming_port(&mut self, port: u16) -> Result<(), CoreError> {
        let port = self.validator.validate_port(port)?;
        self.update(|c| c.streaming.port = port);
        Ok(())
    }

    pub fn streaming_host(&self) -> &str {
        &self.config.streaming.host
    }

    pub fn set_streaming_host(&mut self, host: &str) -> Result<(), CoreError> {
        let host = self.validator.validate_bind_host(host)?;
        self.update(|c| c.streaming.host = host);
        Ok(())
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.scheduler.max_concurrent
    }

    /// Takes effect on the next start.
    pub fn set_max_concurrent(&mut self, max: usize) -> Result<(), CoreError> {
        if max == 0 {
            return Err(CoreError::validation(
                "max_concurrent",
                "at least one task must be allowed to run",
            ));
        }
        self.update(|c| c.scheduler.max_concurrent = max);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Library
    // -----------------------------------------------------------------------

    /// Most recent first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.config.library.history
    }

    /// Record a watched video. An existing entry for the same URL moves to
    /// the front; the list is capped at [`MAX_HISTORY`].
    pub fn add_to_history(&mut self, title: &str, url: &str) {
        let entry = HistoryEntry {
            title: title.to_string(),
            url: url.to_string(),
        };
        self.update(|c| {
            let history = &mut c.library.history;
            history.retain(|e| e.url != entry.url);
            history.insert(0, entry);
            history.truncate(MAX_HISTORY);
        });
    }

    pub fn clear_history(&mut self) {
        self.update(|c| c.library.history.clear());
    }

    /// Remember where playback of `url` stopped. `0` forgets it.
    pub fn save_position(&mut self, url: &str, seconds: u64) {
        self.update(|c| {
            if seconds == 0 {
                c.library.positions.remove(url);
            } else {
                c.library.positions.insert(url.to_string(), seconds);
            }
        });
    }

    pub fn position(&self, url: &str) -> Option<u64> {
        self.config.library.positions.get(url).copied()
    }

    fn update(&mut self, change: impl FnOnce(&mut AppConfig)) {
        change(&mut self.config);
        self.dirty = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
