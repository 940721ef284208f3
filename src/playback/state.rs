//! Playback state machine and the description of the loaded media.

use serde::Serialize;

// ---------------------------------------------------------------------------
// PlaybackState
// ---------------------------------------------------------------------------

/// States of the player.
///
/// ```text
/// Idle ──load_video──▶ Loading ──resolved + started──▶ Playing ◀──▶ Paused
///                         │                             │  ▲
///                         │                   buffering │  │ buffered
///                         ▼                             ▼  │
///                       Error ◀──────engine error───── Buffering
///                         └──retry──▶ Loading
/// any ──stop──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// A VideoResolve task is in flight.
    Loading,
    Playing,
    Paused,
    /// The engine is refilling its buffer; playback resumes by itself.
    Buffering,
    Error,
}

impl PlaybackState {
    /// `true` while media is loaded in the engine.
    ///
    /// ```
    /// use mediadeck::playback::PlaybackState;
    ///
    /// assert!(PlaybackState::Paused.has_media());
    /// assert!(!PlaybackState::Loading.has_media());
    /// ```
    pub fn has_media(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Buffering
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Error => "in error",
        }
    }
}

// ---------------------------------------------------------------------------
// MediaInfo
// ---------------------------------------------------------------------------

/// What is currently loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    /// Normalized page URL.
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub quality: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
