//! Collaborator doubles for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use mediadeck::collab::{video_id_from_url, RawCue, StreamDescriptor, TranscriptSource, VideoExtractor};
use mediadeck::error::CoreError;

pub const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test after [`WAIT`].
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("completed within timeout")
}

/// Extractor whose fetches each wait for one gate permit, giving up when
/// cancelled.
pub struct GatedExtractor {
    pub gate: Arc<Semaphore>,
}

impl GatedExtractor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl VideoExtractor for GatedExtractor {
    async fn fetch(
        &self,
        url: &str,
        quality: &str,
        token: &CancellationToken,
    ) -> Result<StreamDescriptor, CoreError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CoreError::Cancelled),
            permit = self.gate.acquire() => {
                permit.map_err(|e| CoreError::Task(e.to_string()))?.forget();
            }
        }
        let video_id = video_id_from_url(url)
            .ok_or_else(|| CoreError::validation("url", "no video id"))?;
        Ok(StreamDescriptor {
            title: format!("Video {video_id}"),
            stream_url: format!("https://media.test/{video_id}"),
            video_id,
            duration_secs: Some(300),
            quality: quality.to_string(),
        })
    }
}

/// Serves fixed cue lists by video id.
#[derive(Default)]
pub struct FixedTranscripts {
    cues: HashMap<String, Vec<RawCue>>,
}

impl FixedTranscripts {
    pub fn with(mut self, video_id: &str, cues: Vec<RawCue>) -> Self {
        self.cues.insert(video_id.to_string(), cues);
        self
    }
}

#[async_trait]
impl TranscriptSource for FixedTranscripts {
    async fn fetch_cues(
        &self,
        video_id: &str,
        _language: Option<&str>,
        _token: &CancellationToken,
    ) -> Result<Vec<RawCue>, CoreError> {
        self.cues
            .get(video_id)
            .cloned()
            .ok_or_else(|| CoreError::Network(format!("no captions for {video_id}")))
    }
}
