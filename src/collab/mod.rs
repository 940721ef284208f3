//! Boundary contracts with the collaborators the core does not implement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── managers ────────────────────────┐
//! │ Playback   Transcript   Playlist   Streaming   Settings   │
//! └────┬───────────┬───────────┬──────────┬───────────┬──────┘
//!      │           │           │          │           │
//!      ▼           ▼           ▼          ▼           ▼
//! PlaybackEngine  TranscriptSource  MetadataSource  Validator  SettingsStore
//! VideoExtractor
//! ```
//!
//! Every trait is object-safe and `Send + Sync` so managers hold them as
//! `Arc<dyn …>` and task bodies can move clones onto worker tasks. Async
//! collaborators receive the task's [`CancellationToken`] and are expected to
//! stop early once it fires.

pub mod local;
pub mod validator;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

pub use validator::{video_id_from_url, BasicValidator, Validator};

// ---------------------------------------------------------------------------
// Data exchanged with collaborators
// ---------------------------------------------------------------------------

/// Result of video extraction: where to stream from and what it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDescriptor {
    pub video_id: String,
    pub title: String,
    /// Direct media URL handed to the engine.
    pub stream_url: String,
    pub duration_secs: Option<u64>,
    /// Quality actually selected by the extractor.
    pub quality: String,
}

/// Opaque engine-side reference to a prepared media source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaHandle {
    pub id: u64,
    pub source: String,
}

/// One transcript segment as delivered by the transcript source, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl RawCue {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Playlist item metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub title: String,
    pub duration_secs: Option<u64>,
}

/// A running network stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSession {
    pub host: String,
    pub port: u16,
    pub url: String,
}

/// Signals pushed by the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    BufferingStarted,
    BufferingFinished,
    /// Playback reached the end of the media.
    EndReached,
    /// Periodic position report.
    PositionChanged { time_ms: u64 },
    Error(String),
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// The media engine. Calls are synchronous; task bodies run the slow ones
/// (`resolve_source`, `enable_streaming`) on the blocking pool.
pub trait PlaybackEngine: Send + Sync {
    fn resolve_source(&self, stream_url: &str) -> Result<MediaHandle, CoreError>;
    fn start_playback(&self, media: &MediaHandle) -> Result<(), CoreError>;
    fn stop(&self);
    fn pause(&self) -> Result<(), CoreError>;
    fn resume(&self) -> Result<(), CoreError>;
    fn set_volume(&self, volume: u8);
    fn seek(&self, time_ms: u64) -> Result<(), CoreError>;
    fn time_ms(&self) -> u64;
    fn length_ms(&self) -> u64;
    fn enable_streaming(&self, host: &str, port: u16) -> Result<(), CoreError>;
    fn disable_streaming(&self) -> Result<(), CoreError>;
}

/// Turns a page URL into a playable stream.
#[async_trait]
pub trait VideoExtractor: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        quality: &str,
        token: &CancellationToken,
    ) -> Result<StreamDescriptor, CoreError>;
}

/// Retrieves transcript cues for a video.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_cues(
        &self,
        video_id: &str,
        language: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<RawCue>, CoreError>;

    /// Languages with a transcript for `video_id`, preferred first. Sources
    /// that cannot enumerate them return an empty list.
    async fn list_languages(
        &self,
        _video_id: &str,
        _token: &CancellationToken,
    ) -> Result<Vec<String>, CoreError> {
        Ok(Vec::new())
    }
}

/// Looks up display metadata for playlist entries.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_info(&self, url: &str, token: &CancellationToken)
        -> Result<VideoInfo, CoreError>;
}

// Compile-time assertion: the traits must stay object-safe.
const _: fn() = || {
    fn _assert_object_safe(
        _: Box<dyn PlaybackEngine>,
        _: Box<dyn VideoExtractor>,
        _: Box<dyn TranscriptSource>,
        _: Box<dyn MetadataSource>,
        _: Box<dyn Validator>,
    ) {
    }
};
