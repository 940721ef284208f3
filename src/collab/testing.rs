//! Scriptable collaborator doubles shared by the manager unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

use super::{
    video_id_from_url, MediaHandle, MetadataSource, PlaybackEngine, RawCue, StreamDescriptor,
    TranscriptSource, VideoExtractor, VideoInfo,
};

/// Wait for a permit, bailing out when the token fires.
async fn wait_gate(gate: &Option<Arc<Semaphore>>, token: &CancellationToken) -> Result<(), CoreError> {
    let Some(gate) = gate else {
        return Ok(());
    };
    tokio::select! {
        permit = gate.acquire() => {
            permit.map_err(|e| CoreError::Task(e.to_string()))?.forget();
            Ok(())
        }
        _ = token.cancelled() => Err(CoreError::Cancelled),
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Resolves every URL to a descriptor unless a failure is scripted for it.
/// With a gate, each fetch waits for one permit (or cancellation).
#[derive(Default)]
pub struct ScriptedExtractor {
    pub gate: Option<Arc<Semaphore>>,
    failures: Mutex<HashMap<String, CoreError>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail(&self, url: &str, error: CoreError) {
        self.failures.lock().unwrap().insert(url.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoExtractor for ScriptedExtractor {
    async fn fetch(
        &self,
        url: &str,
        quality: &str,
        token: &CancellationToken,
    ) -> Result<StreamDescriptor, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        wait_gate(&self.gate, token).await?;
        if let Some(error) = self.failures.lock().unwrap().get(url) {
            return Err(error.clone());
        }
        let video_id = video_id_from_url(url).unwrap_or_else(|| url.to_string());
        Ok(StreamDescriptor {
            title: format!("Title of {video_id}"),
            video_id: video_id.clone(),
            stream_url: format!("https://cdn.test/{video_id}.mp4"),
            duration_secs: Some(120),
            quality: quality.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Records engine calls; `start_playback` can be made to fail.
#[derive(Default)]
pub struct RecordingEngine {
    pub calls: Mutex<Vec<String>>,
    pub fail_start: std::sync::atomic::AtomicBool,
    pub fail_streaming: std::sync::atomic::AtomicBool,
    next_id: AtomicUsize,
    time_ms: std::sync::atomic::AtomicU64,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl PlaybackEngine for RecordingEngine {
    fn resolve_source(&self, stream_url: &str) -> Result<MediaHandle, CoreError> {
        self.record(format!("resolve {stream_url}"));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(MediaHandle {
            id,
            source: stream_url.to_string(),
        })
    }

    fn start_playback(&self, media: &MediaHandle) -> Result<(), CoreError> {
        self.record(format!("start {}", media.source));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CoreError::Engine("no audio output".into()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.record("stop");
    }

    fn pause(&self) -> Result<(), CoreError> {
        self.record("pause");
        Ok(())
    }

    fn resume(&self) -> Result<(), CoreError> {
        self.record("resume");
        Ok(())
    }

    fn set_volume(&self, volume: u8) {
        self.record(format!("volume {volume}"));
    }

    fn seek(&self, time_ms: u64) -> Result<(), CoreError> {
        self.record(format!("seek {time_ms}"));
        self.time_ms.store(time_ms, Ordering::SeqCst);
        Ok(())
    }

    fn time_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    fn length_ms(&self) -> u64 {
        120_000
    }

    fn enable_streaming(&self, host: &str, port: u16) -> Result<(), CoreError> {
        self.record(format!("stream {host}:{port}"));
        if self.fail_streaming.load(Ordering::SeqCst) {
            return Err(CoreError::Engine("sout module unavailable".into()));
        }
        Ok(())
    }

    fn disable_streaming(&self) -> Result<(), CoreError> {
        self.record("unstream");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transcripts / metadata
// ---------------------------------------------------------------------------

/// Serves scripted cue lists per video id; unknown ids fail.
#[derive(Default)]
pub struct ScriptedTranscripts {
    pub gate: Option<Arc<Semaphore>>,
    cues: Mutex<HashMap<String, Vec<RawCue>>>,
    languages: Mutex<HashMap<String, Vec<String>>>,
    requested: Mutex<Vec<Option<String>>>,
}

impl ScriptedTranscripts {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn with(self, video_id: &str, cues: Vec<RawCue>) -> Self {
        self.cues.lock().unwrap().insert(video_id.to_string(), cues);
        self
    }

    pub fn with_languages(self, video_id: &str, languages: &[&str]) -> Self {
        self.languages.lock().unwrap().insert(
            video_id.to_string(),
            languages.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Language passed to each `fetch_cues` call, in order.
    pub fn requested(&self) -> Vec<Option<String>> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSource for ScriptedTranscripts {
    async fn fetch_cues(
        &self,
        video_id: &str,
        language: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<RawCue>, CoreError> {
        self.requested
            .lock()
            .unwrap()
            .push(language.map(str::to_string));
        wait_gate(&self.gate, token).await?;
        self.cues
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .ok_or_else(|| CoreError::Network(format!("no transcript for {video_id}")))
    }

    async fn list_languages(
        &self,
        video_id: &str,
        _token: &CancellationToken,
    ) -> Result<Vec<String>, CoreError> {
        Ok(self
            .languages
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Titles each URL "Video <id>"; URLs registered with `fail` error out.
#[derive(Default)]
pub struct ScriptedMetadata {
    pub gate: Option<Arc<Semaphore>>,
    failing: Mutex<Vec<String>>,
}

impl ScriptedMetadata {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().push(url.to_string());
    }
}

#[async_trait]
impl MetadataSource for ScriptedMetadata {
    async fn fetch_info(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<VideoInfo, CoreError> {
        wait_gate(&self.gate, token).await?;
        if self.failing.lock().unwrap().iter().any(|u| u == url) {
            return Err(CoreError::Network("metadata lookup failed".into()));
        }
        let id = video_id_from_url(url).unwrap_or_default();
        Ok(VideoInfo {
            title: format!("Video {id}"),
            duration_secs: Some(60),
        })
    }
}
