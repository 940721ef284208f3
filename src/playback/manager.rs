//! Playback manager: drives the player state machine from UI commands,
//! VideoResolve outcomes and engine signals.
//!
//! # Load flow
//!
//! ```text
//! load_video(url)
//!   └─▶ validate → cancel previous resolve → submit VideoResolve   [Loading]
//!         work: extractor.fetch (or LRU cache hit)
//!               → spawn_blocking(engine.resolve_source)
//!
//! handle_outcome
//!   ├─ stale id                 → ignored
//!   ├─ Completed → start_playback → [Playing]   (engine error → [Error])
//!   ├─ Failed                   → [Error] + descriptor
//!   └─ Cancelled, no successor  → [Error]
//! ```
//!
//! Every method runs on the owning context; only the task body runs on a
//! worker.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::collab::{
    EngineEvent, MediaHandle, PlaybackEngine, StreamDescriptor, Validator, VideoExtractor,
};
use crate::config::PlaybackConfig;
use crate::error::{CoreError, ErrorDescriptor};
use crate::events::{AppEvent, EventSink};
use crate::task::{
    checkpoint, Inbox, Scheduler, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskOutput,
    TaskResult, TaskState,
};

use super::state::{MediaInfo, PlaybackState};

const MAX_VOLUME: u8 = 100;

// ---------------------------------------------------------------------------
// PlaybackManager
// ---------------------------------------------------------------------------

pub struct PlaybackManager {
    scheduler: Scheduler,
    inbox: Inbox,
    events: EventSink,
    engine: Arc<dyn PlaybackEngine>,
    extractor: Arc<dyn VideoExtractor>,
    validator: Arc<dyn Validator>,

    state: PlaybackState,
    /// The one resolve whose outcome is still wanted.
    resolve: Option<TaskHandle>,
    resolve_started: Option<Instant>,
    /// Dropping it stops the resolve timeout watchdog.
    watchdog: Option<DropGuard>,
    /// URL of the most recent load attempt, used by `retry`.
    requested_url: Option<String>,
    media: Option<MediaInfo>,
    last_error: Option<ErrorDescriptor>,

    volume: u8,
    quality: String,
    resolve_timeout: Option<Duration>,
    sources: LruCache<String, StreamDescriptor>,
}

impl PlaybackManager {
    pub fn new(
        scheduler: Scheduler,
        engine: Arc<dyn PlaybackEngine>,
        extractor: Arc<dyn VideoExtractor>,
        validator: Arc<dyn Validator>,
        events: EventSink,
        config: &PlaybackConfig,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.source_cache_size).unwrap_or(NonZeroUsize::MIN);
        let resolve_timeout =
            (config.resolve_timeout_secs > 0).then(|| Duration::from_secs(config.resolve_timeout_secs));

        Self {
            scheduler,
            inbox: Inbox::new(),
            events,
            engine,
            extractor,
            validator,
            state: PlaybackState::Idle,
            resolve: None,
            resolve_started: None,
            watchdog: None,
            requested_url: None,
            media: None,
            last_error: None,
            volume: config.volume.min(MAX_VOLUME),
            quality: config.default_quality.clone(),
            resolve_timeout,
            sources: LruCache::new(cache_size),
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Start loading `url`, superseding any resolve still in flight.
    ///
    /// Validation errors are returned before anything changes.
    pub fn load_video(&mut self, url: &str) -> Result<TaskId, CoreError> {
        let url = self.validator.validate_url(url)?;

        if let Some(previous) = self.resolve.take() {
            log::debug!("playback: superseding resolve {}", previous.id());
            self.scheduler.cancel(previous.id());
        }

        self.requested_url = Some(url.clone());
        self.last_error = None;
        self.set_state(PlaybackState::Loading, None);

        let cached = self.sources.get(&url).cloned();
        if cached.is_some() {
            log::debug!("playback: source cache hit for {url}");
        }

        let extractor = Arc::clone(&self.extractor);
        let engine = Arc::clone(&self.engine);
        let quality = self.quality.clone();

        let handle = self.scheduler.submit(
            TaskKind::VideoResolve,
            &self.inbox.route(),
            CancellationToken::new(),
            move |token| resolve(extractor, engine, url, quality, cached, token),
        );

        let id = handle.id().clone();
        self.events
            .task_progress(&id, TaskKind::VideoResolve, handle.admitted_as());
        self.watchdog = self
            .resolve_timeout
            .map(|limit| self.spawn_watchdog(&handle, limit));
        self.resolve = Some(handle);
        self.resolve_started = Some(Instant::now());

        log::info!("playback: loading {}", self.requested_url.as_deref().unwrap_or_default());
        Ok(id)
    }

    /// Reload the last requested URL. Only valid from Error.
    pub fn retry(&mut self) -> Result<TaskId, CoreError> {
        if self.state != PlaybackState::Error {
            return Err(self.invalid("retry"));
        }
        let url = self
            .requested_url
            .clone()
            .ok_or_else(|| CoreError::validation("url", "nothing to retry"))?;
        self.load_video(&url)
    }

    /// Cancel the resolve if it is still running after `limit`. The
    /// watchdog exits early once the returned guard is dropped.
    fn spawn_watchdog(&self, handle: &TaskHandle, limit: Duration) -> DropGuard {
        let scheduler = self.scheduler.clone();
        let id = handle.id().clone();
        let token = handle.token().clone();
        let done = CancellationToken::new();
        let settled = done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    if scheduler.cancel(&id) {
                        log::warn!("playback: resolve {id} exceeded {limit:?}, cancelled");
                    }
                }
                _ = token.cancelled() => {}
                _ = settled.cancelled() => {}
            }
        });
        done.drop_guard()
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    /// Wait for the next task outcome addressed to this manager.
    pub async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        self.inbox.recv().await
    }

    /// Apply a VideoResolve outcome. Returns `false` when it was stale.
    pub fn handle_outcome(&mut self, outcome: TaskOutcome) -> bool {
        self.events
            .task_progress(&outcome.id, outcome.kind, outcome.state);

        let current = self.resolve.as_ref().map(|h| h.id());
        if current != Some(&outcome.id) {
            log::debug!(
                "playback: ignoring stale {} outcome for {}",
                outcome.state.label(),
                outcome.id
            );
            return false;
        }
        self.resolve = None;
        self.watchdog = None;
        let started = self.resolve_started.take();

        match outcome.state {
            TaskState::Completed => match outcome.output {
                Some(TaskOutput::Resolved { descriptor, media }) => {
                    self.start(descriptor, media);
                }
                other => {
                    let error = CoreError::Task(format!("unexpected resolve output: {other:?}"));
                    self.fail(ErrorDescriptor::from_task(outcome.kind, &error));
                }
            },
            TaskState::Failed => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| CoreError::Task("failed without error".into()));
                log::warn!("playback: resolve failed: {error}");
                self.fail(ErrorDescriptor::from_task(outcome.kind, &error));
            }
            TaskState::Cancelled => {
                let timed_out = match (self.resolve_timeout, started) {
                    (Some(limit), Some(at)) => at.elapsed() >= limit,
                    _ => false,
                };
                let error = timed_out.then(|| {
                    ErrorDescriptor::from_task(
                        outcome.kind,
                        &CoreError::Network("timed out while resolving the video".into()),
                    )
                });
                log::info!("playback: resolve cancelled with no replacement");
                self.last_error = error.clone();
                self.media = None;
                self.set_state(PlaybackState::Error, error);
            }
            TaskState::Queued | TaskState::Running => {
                log::error!("playback: non-terminal outcome for {}", outcome.id);
            }
        }
        true
    }

    fn start(&mut self, descriptor: StreamDescriptor, media: MediaHandle) {
        let url = self.requested_url.clone().unwrap_or_default();
        self.sources.put(url.clone(), descriptor.clone());

        if let Err(e) = self.engine.start_playback(&media) {
            log::error!("playback: engine refused to start: {e}");
            self.fail(ErrorDescriptor::from_command(&e));
            return;
        }
        self.engine.set_volume(self.volume);

        let info = MediaInfo {
            url,
            video_id: descriptor.video_id,
            title: descriptor.title,
            duration_secs: descriptor.duration_secs,
            quality: descriptor.quality,
        };
        log::info!("playback: playing \"{}\"", info.title);
        self.media = Some(info.clone());
        self.set_state(PlaybackState::Playing, None);
        self.events.emit(AppEvent::MediaLoaded(info));
    }

    fn fail(&mut self, error: ErrorDescriptor) {
        self.media = None;
        self.last_error = Some(error.clone());
        self.set_state(PlaybackState::Error, Some(error));
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    pub fn pause(&mut self) -> Result<(), CoreError> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            return Err(self.invalid("pause"));
        }
        self.engine.pause()?;
        self.set_state(PlaybackState::Paused, None);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), CoreError> {
        if self.state != PlaybackState::Paused {
            return Err(self.invalid("resume"));
        }
        self.engine.resume()?;
        self.set_state(PlaybackState::Playing, None);
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<(), CoreError> {
        match self.state {
            PlaybackState::Paused => self.resume(),
            _ => self.pause(),
        }
    }

    /// Stop playback and drop any in-flight resolve. Valid from any state.
    pub fn stop(&mut self) {
        if let Some(handle) = self.resolve.take() {
            self.scheduler.cancel(handle.id());
        }
        self.resolve_started = None;
        self.watchdog = None;
        self.engine.stop();
        self.media = None;
        self.set_state(PlaybackState::Idle, None);
    }

    /// Seek to a fraction (0.0 – 1.0) of the media length.
    pub fn seek(&mut self, fraction: f64) -> Result<u64, CoreError> {
        if !fraction.is_finite() {
            return Err(CoreError::validation("position", "seek position must be a number"));
        }
        let length = self.engine.length_ms();
        let target = (fraction.clamp(0.0, 1.0) * length as f64) as u64;
        self.seek_to(target)
    }

    /// Seek to an absolute position, clamped to the media length.
    pub fn seek_to(&mut self, time_ms: u64) -> Result<u64, CoreError> {
        if !self.state.has_media() {
            return Err(self.invalid("seek"));
        }
        let length = self.engine.length_ms();
        let target = if length > 0 { time_ms.min(length) } else { time_ms };
        self.engine.seek(target)?;
        self.events.emit(AppEvent::PositionChanged {
            time_ms: target,
            length_ms: length,
        });
        Ok(target)
    }

    /// Skip forwards or backwards by `seconds`.
    pub fn seek_relative(&mut self, seconds: i64) -> Result<u64, CoreError> {
        let now = self.engine.time_ms() as i64;
        let target = now.saturating_add(seconds.saturating_mul(1000)).max(0) as u64;
        self.seek_to(target)
    }

    /// Set the volume, clamped to 0 – 100. Returns the applied value.
    pub fn set_volume(&mut self, volume: i32) -> u8 {
        let volume = volume.clamp(0, MAX_VOLUME as i32) as u8;
        self.volume = volume;
        self.engine.set_volume(volume);
        self.events.emit(AppEvent::VolumeChanged(volume));
        volume
    }

    pub fn set_quality(&mut self, quality: impl Into<String>) {
        self.quality = quality.into();
    }

    // -----------------------------------------------------------------------
    // Engine signals
    // -----------------------------------------------------------------------

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::BufferingStarted if self.state == PlaybackState::Playing => {
                self.set_state(PlaybackState::Buffering, None);
            }
            EngineEvent::BufferingFinished if self.state == PlaybackState::Buffering => {
                self.set_state(PlaybackState::Playing, None);
            }
            EngineEvent::EndReached if self.state.has_media() => {
                log::info!("playback: end of media");
                self.media = None;
                self.set_state(PlaybackState::Idle, None);
            }
            EngineEvent::PositionChanged { time_ms } if self.state.has_media() => {
                self.events.emit(AppEvent::PositionChanged {
                    time_ms,
                    length_ms: self.engine.length_ms(),
                });
            }
            EngineEvent::Error(message) => {
                log::error!("playback: engine error: {message}");
                self.fail(ErrorDescriptor::from_command(&CoreError::Engine(message)));
            }
            other => log::trace!("playback: ignoring {other:?} while {}", self.state.label()),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn position_ms(&self) -> u64 {
        if self.state.has_media() {
            self.engine.time_ms()
        } else {
            0
        }
    }

    pub fn length_ms(&self) -> u64 {
        if self.state.has_media() {
            self.engine.length_ms()
        } else {
            0
        }
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }

    /// Id of the resolve whose outcome is still awaited.
    pub fn pending_resolve(&self) -> Option<&TaskId> {
        self.resolve.as_ref().map(|h| h.id())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: PlaybackState, error: Option<ErrorDescriptor>) {
        if self.state == state && error.is_none() {
            return;
        }
        log::debug!("playback: {} → {}", self.state.label(), state.label());
        self.state = state;
        self.events
            .emit(AppEvent::PlaybackStateChanged { state, error });
    }

    fn invalid(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidState {
            operation,
            state: self.state.label(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task body
// ---------------------------------------------------------------------------

/// VideoResolve work: extract (unless cached), then prepare the engine source.
async fn resolve(
    extractor: Arc<dyn VideoExtractor>,
    engine: Arc<dyn PlaybackEngine>,
    url: String,
    quality: String,
    cached: Option<StreamDescriptor>,
    token: CancellationToken,
) -> TaskResult {
    let descriptor = match cached {
        Some(descriptor) => descriptor,
        None => extractor.fetch(&url, &quality, &token).await?,
    };
    checkpoint(&token)?;

    let stream_url = descriptor.stream_url.clone();
    let media = tokio::task::spawn_blocking(move || engine.resolve_source(&stream_url))
        .await
        .map_err(|e| CoreError::Task(format!("resolve_source join failed: {e}")))??;
    checkpoint(&token)?;

    Ok(TaskOutput::Resolved { descriptor, media })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
