//! Composition root: builds the scheduler and every manager once, then runs
//! the single loop that owns them.
//!
//! # Data flow
//!
//! ```text
//!   UI ──Command──────────▶ ┌─────────────────────────────┐ ──AppEvent──▶ UI
//!                           │        MediaCore::run       │
//!   engine ──EngineEvent──▶ │  playback    transcript     │
//!                           │  playlist    streaming      │
//!   workers ──TaskOutcome──▶│  settings                   │
//!        (one inbox per     └─────────────────────────────┘
//!         manager)
//! ```
//!
//! Managers never talk to each other directly. Cross-manager reactions
//! (history, resume position, transcript auto-fetch, playlist auto-advance)
//! live here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collab::{EngineEvent, MetadataSource, PlaybackEngine, TranscriptSource, Validator, VideoExtractor};
use crate::config::AppPaths;
use crate::error::{CoreError, ErrorDescriptor};
use crate::events::{AppEvent, EventSink};
use crate::playback::{PlaybackManager, PlaybackState};
use crate::playlist::PlaylistManager;
use crate::settings::SettingsManager;
use crate::streaming::StreamingManager;
use crate::task::Scheduler;
use crate::transcript::{ExportFormat, TranscriptManager};

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Requests from the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Playback ─────────────────────────────────────────────────────────
    Load(String),
    Retry,
    Pause,
    Resume,
    TogglePause,
    Stop,
    /// Fraction of the media length, 0.0 – 1.0.
    Seek(f64),
    SeekRelative(i64),
    SetVolume(i32),
    SetQuality(String),

    // ── Transcript ───────────────────────────────────────────────────────
    FetchTranscript {
        video_id: String,
        language: Option<String>,
    },
    ExportTranscript {
        path: PathBuf,
        format: ExportFormat,
    },

    // ── Playlist ─────────────────────────────────────────────────────────
    /// One URL per line.
    AddToPlaylist(String),
    RemoveFromPlaylist(String),
    MovePlaylistItem {
        from: usize,
        to: usize,
    },
    /// Select the item at an index and start playing it.
    PlayPlaylistItem(usize),
    NextItem,
    PreviousItem,
    ClearPlaylist,

    // ── Streaming ────────────────────────────────────────────────────────
    StartStreaming {
        port: u16,
        host: String,
    },
    StopStreaming,
    CancelStreamingStart,

    SaveSettings,
    Shutdown,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External services the core is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn PlaybackEngine>,
    pub extractor: Arc<dyn VideoExtractor>,
    pub transcripts: Arc<dyn TranscriptSource>,
    pub metadata: Arc<dyn MetadataSource>,
    pub validator: Arc<dyn Validator>,
}

// ---------------------------------------------------------------------------
// MediaCore
// ---------------------------------------------------------------------------

pub struct MediaCore {
    scheduler: Scheduler,
    sweeper: JoinHandle<()>,
    events: EventSink,
    shutdown_grace: Duration,
    /// Relative export paths land here.
    export_dir: PathBuf,

    playback: PlaybackManager,
    transcript: TranscriptManager,
    playlist: PlaylistManager,
    streaming: StreamingManager,
    settings: SettingsManager,
}

impl MediaCore {
    /// Build the scheduler and all managers from the loaded settings.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(settings: SettingsManager, collab: Collaborators, events: EventSink) -> Self {
        let config = settings.config().clone();

        let scheduler = Scheduler::from_config(&config.scheduler, Handle::current());
        let sweep_every = Duration::from_millis(config.scheduler.sweep_interval_ms.max(1));
        let sweeper = scheduler.spawn_sweeper(sweep_every);

        let playback = PlaybackManager::new(
            scheduler.clone(),
            Arc::clone(&collab.engine),
            Arc::clone(&collab.extractor),
            Arc::clone(&collab.validator),
            events.clone(),
            &config.playback,
        );
        let transcript = TranscriptManager::new(
            scheduler.clone(),
            Arc::clone(&collab.transcripts),
            Arc::clone(&collab.validator),
            events.clone(),
        );
        let playlist = PlaylistManager::new(
            scheduler.clone(),
            Arc::clone(&collab.metadata),
            Arc::clone(&collab.validator),
            events.clone(),
        );
        let streaming = StreamingManager::new(
            scheduler.clone(),
            Arc::clone(&collab.engine),
            Arc::clone(&collab.validator),
            events.clone(),
        );

        log::info!(
            "core: ready (max {} concurrent tasks, sweep every {:?})",
            scheduler.max_concurrent(),
            sweep_every
        );

        Self {
            scheduler,
            sweeper,
            events,
            shutdown_grace: Duration::from_millis(config.scheduler.shutdown_grace_ms),
            export_dir: AppPaths::new().transcripts_dir,
            playback,
            transcript,
            playlist,
            streaming,
            settings,
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Drive the core until [`Command::Shutdown`] arrives or the command
    /// channel closes, then shut down.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<()> {
        self.restore_streaming();

        loop {
            tokio::select! {
                _ = self.pump() => {}
                Some(event) = engine_events.recv() => self.handle_engine_event(event),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.dispatch(command),
                },
            }
        }

        self.shutdown().await
    }

    /// Wait for the next task outcome addressed to any manager and apply it.
    /// Returns `false` when the outcome was stale.
    pub async fn pump(&mut self) -> bool {
        tokio::select! {
            Some(outcome) = self.playback.next_outcome() => {
                let applied = self.playback.handle_outcome(outcome);
                if applied {
                    self.on_playback_settled();
                }
                applied
            }
            Some(outcome) = self.transcript.next_outcome() => self.transcript.handle_outcome(outcome),
            Some(outcome) = self.playlist.next_outcome() => self.playlist.handle_outcome(outcome),
            Some(outcome) = self.streaming.next_outcome() => self.streaming.handle_outcome(outcome),
            else => false,
        }
    }

    /// Apply a command, reporting a refusal as [`AppEvent::CommandRejected`].
    pub fn dispatch(&mut self, command: Command) {
        log::debug!("core: {command:?}");
        if let Err(e) = self.apply(command) {
            log::warn!("core: command rejected: {e}");
            self.events
                .emit(AppEvent::CommandRejected(ErrorDescriptor::from_command(&e)));
        }
    }

    pub fn apply(&mut self, command: Command) -> Result<(), CoreError> {
        match command {
            Command::Load(url) => self.load(&url),
            Command::Retry => self.playback.retry().map(drop),
            Command::Pause => self.playback.pause(),
            Command::Resume => self.playback.resume(),
            Command::TogglePause => self.playback.toggle_pause(),
            Command::Stop => {
                self.remember_position();
                self.playback.stop();
                Ok(())
            }
            Command::Seek(fraction) => self.playback.seek(fraction).map(drop),
            Command::SeekRelative(seconds) => self.playback.seek_relative(seconds).map(drop),
            Command::SetVolume(volume) => {
                let volume = self.playback.set_volume(volume);
                self.settings.set_volume(i32::from(volume));
                Ok(())
            }
            Command::SetQuality(quality) => {
                self.settings.set_quality(&quality)?;
                self.playback.set_quality(self.settings.quality().to_string());
                Ok(())
            }

            Command::FetchTranscript { video_id, language } => {
                let language =
                    language.or_else(|| self.settings.transcript_language().map(str::to_string));
                self.transcript
                    .fetch_transcript(&video_id, language.as_deref())
                    .map(drop)
            }
            Command::ExportTranscript { path, format } => {
                let path = if path.is_relative() {
                    self.export_dir.join(path)
                } else {
                    path
                };
                self.transcript
                    .export(&path, format)
                    .map_err(CoreError::from_storage)
            }

            Command::AddToPlaylist(text) => self.playlist.add_urls(&text).map(drop),
            Command::RemoveFromPlaylist(id) => self.playlist.remove(&id).map(drop),
            Command::MovePlaylistItem { from, to } => self.playlist.move_item(from, to),
            Command::PlayPlaylistItem(index) => {
                let source = self.playlist.select(index)?.source.clone();
                self.load(&source)
            }
            Command::NextItem => match self.playlist.next().map(|item| item.source.clone()) {
                Some(source) => self.load(&source),
                None => Ok(()),
            },
            Command::PreviousItem => match self.playlist.previous().map(|item| item.source.clone()) {
                Some(source) => self.load(&source),
                None => Ok(()),
            },
            Command::ClearPlaylist => {
                self.playlist.clear();
                Ok(())
            }

            Command::StartStreaming { port, host } => {
                self.streaming.start(port, &host)?;
                self.settings.set_streaming_port(port)?;
                self.settings.set_streaming_host(&host)?;
                self.settings.set_streaming_enabled(true);
                Ok(())
            }
            Command::StopStreaming => {
                self.streaming.stop()?;
                self.settings.set_streaming_enabled(false);
                Ok(())
            }
            Command::CancelStreamingStart => {
                if self.streaming.cancel_start() {
                    self.settings.set_streaming_enabled(false);
                }
                Ok(())
            }

            Command::SaveSettings => self.settings.save().map_err(CoreError::from_storage),
            Command::Shutdown => {
                log::debug!("core: shutdown is handled by the run loop");
                Ok(())
            }
        }
    }

    /// Forward an engine signal to playback. At end of media the saved
    /// position is forgotten and the playlist advances.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        let ended = event == EngineEvent::EndReached && self.playback.state().has_media();
        if ended {
            if let Some(url) = self.playback.media().map(|m| m.url.clone()) {
                self.settings.save_position(&url, 0);
            }
        }

        self.playback.handle_engine_event(event);

        if ended && self.playlist.current().is_some() {
            if let Some(source) = self.playlist.next().map(|item| item.source.clone()) {
                log::info!("core: advancing playlist to {source}");
                if let Err(e) = self.load(&source) {
                    log::warn!("core: playlist advance failed: {e}");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Cancel outstanding work, wait up to the configured grace period, and
    /// persist settings.
    pub async fn shutdown(mut self) -> Result<()> {
        log::info!("core: shutting down");
        self.remember_position();
        self.playback.stop();

        if !self.scheduler.shutdown(self.shutdown_grace).await {
            log::warn!("core: some background tasks did not finish in time");
        }
        self.sweeper.abort();

        self.settings.save_if_dirty()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.playback
    }

    pub fn transcript(&self) -> &TranscriptManager {
        &self.transcript
    }

    pub fn playlist(&self) -> &PlaylistManager {
        &self.playlist
    }

    pub fn streaming(&self) -> &StreamingManager {
        &self.streaming
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn export_dir(&self) -> &std::path::Path {
        &self.export_dir
    }

    /// Directory for exports given as relative paths. Defaults to the
    /// platform data directory.
    pub fn set_export_dir(&mut self, dir: impl Into<PathBuf>) {
        self.export_dir = dir.into();
    }

    // -----------------------------------------------------------------------
    // Cross-manager reactions
    // -----------------------------------------------------------------------

    fn load(&mut self, url: &str) -> Result<(), CoreError> {
        self.remember_position();
        self.playback.load_video(url).map(drop)
    }

    /// A resolve finished. When playback started, record history, resume
    /// from the saved position and fetch the transcript.
    fn on_playback_settled(&mut self) {
        if self.playback.state() != PlaybackState::Playing {
            return;
        }
        let Some(media) = self.playback.media().cloned() else {
            return;
        };

        self.settings.add_to_history(&media.title, &media.url);

        if self.settings.remember_position() {
            if let Some(seconds) = self.settings.position(&media.url) {
                match self.playback.seek_to(seconds.saturating_mul(1000)) {
                    Ok(at) => log::info!("core: resumed \"{}\" at {}s", media.title, at / 1000),
                    Err(e) => log::warn!("core: could not resume position: {e}"),
                }
            }
        }

        if self.settings.auto_fetch_transcript() {
            let language = self.settings.transcript_language().map(str::to_string);
            if let Err(e) = self
                .transcript
                .fetch_transcript(&media.video_id, language.as_deref())
            {
                log::warn!("core: transcript auto-fetch skipped: {e}");
            }
        }
    }

    fn remember_position(&mut self) {
        if !self.settings.remember_position() || !self.playback.state().has_media() {
            return;
        }
        if let Some(url) = self.playback.media().map(|m| m.url.clone()) {
            let seconds = self.playback.position_ms() / 1000;
            self.settings.save_position(&url, seconds);
        }
    }

    fn restore_streaming(&mut self) {
        if !self.settings.streaming_enabled() {
            return;
        }
        let host = self.settings.streaming_host().to_string();
        let port = self.settings.streaming_port();
        if let Err(e) = self.streaming.start(port, &host) {
            log::warn!("core: could not restore streaming on {host}:{port}: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
