//! Offline collaborators used when no real engine or network backend is
//! wired in.
//!
//! [`HeadlessEngine`] keeps playback state in memory and never produces sound;
//! [`PassthroughExtractor`] hands the page URL straight to the engine. Both
//! let the binary run end to end without external services.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::task::checkpoint;

use super::{
    video_id_from_url, MediaHandle, MetadataSource, PlaybackEngine, RawCue, StreamDescriptor,
    TranscriptSource, VideoExtractor, VideoInfo,
};

// ---------------------------------------------------------------------------
// HeadlessEngine
// ---------------------------------------------------------------------------

/// In-memory [`PlaybackEngine`].
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    next_id: AtomicU64,
    current: Mutex<Option<MediaHandle>>,
    paused: AtomicBool,
    volume: AtomicU8,
    time_ms: AtomicU64,
    length_ms: AtomicU64,
    streaming: Mutex<Option<(String, u16)>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Media length reported for every source.
    pub fn with_length_ms(self, length_ms: u64) -> Self {
        self.length_ms.store(length_ms, Ordering::SeqCst);
        self
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Address currently being streamed to, if any.
    pub fn streaming_target(&self) -> Option<(String, u16)> {
        self.streaming
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn require_media(&self, operation: &'static str) -> Result<(), CoreError> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_none() {
            return Err(CoreError::Engine(format!("cannot {operation}: no media loaded")));
        }
        Ok(())
    }
}

impl PlaybackEngine for HeadlessEngine {
    fn resolve_source(&self, stream_url: &str) -> Result<MediaHandle, CoreError> {
        if stream_url.is_empty() {
            return Err(CoreError::Engine("empty stream URL".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("headless: prepared media {id} for {stream_url}");
        Ok(MediaHandle {
            id,
            source: stream_url.to_string(),
        })
    }

    fn start_playback(&self, media: &MediaHandle) -> Result<(), CoreError> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(media.clone());
        self.paused.store(false, Ordering::SeqCst);
        self.time_ms.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.paused.store(false, Ordering::SeqCst);
        self.time_ms.store(0, Ordering::SeqCst);
    }

    fn pause(&self) -> Result<(), CoreError> {
        self.require_media("pause")?;
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), CoreError> {
        self.require_media("resume")?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(volume, Ordering::SeqCst);
    }

    fn seek(&self, time_ms: u64) -> Result<(), CoreError> {
        self.require_media("seek")?;
        self.time_ms.store(time_ms, Ordering::SeqCst);
        Ok(())
    }

    fn time_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    fn length_ms(&self) -> u64 {
        self.length_ms.load(Ordering::SeqCst)
    }

    fn enable_streaming(&self, host: &str, port: u16) -> Result<(), CoreError> {
        *self.streaming.lock().unwrap_or_else(|e| e.into_inner()) = Some((host.to_string(), port));
        Ok(())
    }

    fn disable_streaming(&self) -> Result<(), CoreError> {
        *self.streaming.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Extraction / metadata / transcripts
// ---------------------------------------------------------------------------

/// Uses the page URL itself as the stream URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughExtractor;

#[async_trait]
impl VideoExtractor for PassthroughExtractor {
    async fn fetch(
        &self,
        url: &str,
        quality: &str,
        token: &CancellationToken,
    ) -> Result<StreamDescriptor, CoreError> {
        checkpoint(token)?;
        let video_id = video_id_from_url(url)
            .ok_or_else(|| CoreError::validation("url", "could not extract video ID from URL"))?;
        Ok(StreamDescriptor {
            title: video_id.clone(),
            video_id,
            stream_url: url.to_string(),
            duration_secs: None,
            quality: quality.to_string(),
        })
    }
}

/// Titles every playlist entry with its video id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughMetadata;

#[async_trait]
impl MetadataSource for PassthroughMetadata {
    async fn fetch_info(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<VideoInfo, CoreError> {
        checkpoint(token)?;
        Ok(VideoInfo {
            title: video_id_from_url(url).unwrap_or_else(|| url.to_string()),
            duration_secs: None,
        })
    }
}

/// Transcript source for setups without one. Every fetch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTranscripts;

#[async_trait]
impl TranscriptSource for NoTranscripts {
    async fn fetch_cues(
        &self,
        video_id: &str,
        _language: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<RawCue>, CoreError> {
        checkpoint(token)?;
        Err(CoreError::Network(format!(
            "no transcript source configured for {video_id}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_engine_tracks_playback() {
        let engine = HeadlessEngine::new().with_length_ms(60_000);
        assert!(engine.pause().is_err());

        let media = engine.resolve_source("https://cdn.example/a").unwrap();
        engine.start_playback(&media).unwrap();
        engine.pause().unwrap();
        assert!(engine.is_paused());
        engine.seek(12_000).unwrap();
        assert_eq!(engine.time_ms(), 12_000);
        assert_eq!(engine.length_ms(), 60_000);

        engine.stop();
        assert_eq!(engine.time_ms(), 0);
        assert!(engine.seek(1).is_err());
    }

    #[test]
    fn resolved_handles_are_distinct() {
        let engine = HeadlessEngine::new();
        let a = engine.resolve_source("a").unwrap();
        let b = engine.resolve_source("b").unwrap();
        assert_ne!(a.id, b.id);
        assert!(engine.resolve_source("").is_err());
    }

    #[tokio::test]
    async fn passthrough_extractor_respects_cancellation() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let token = CancellationToken::new();
        let d = PassthroughExtractor.fetch(url, "best", &token).await.unwrap();
        assert_eq!(d.video_id, "dQw4w9WgXcQ");
        assert_eq!(d.stream_url, url);

        token.cancel();
        assert_eq!(
            PassthroughExtractor.fetch(url, "best", &token).await,
            Err(CoreError::Cancelled)
        );
    }

    #[tokio::test]
    async fn no_transcripts_always_fails() {
        let err = NoTranscripts
            .fetch_cues("abc", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "network");
    }
}
