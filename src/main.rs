//! Headless entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG` overrides the `info` default).
//! 2. Load settings from `settings.toml` (defaults on first run).
//! 3. Build the offline collaborators and [`MediaCore`].
//! 4. Read commands from stdin, one per line, and log every [`AppEvent`].
//! 5. On `quit`, end of input or Ctrl-C: shut down and save settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use mediadeck::app::{Collaborators, Command, MediaCore};
use mediadeck::collab::local::{HeadlessEngine, NoTranscripts, PassthroughExtractor, PassthroughMetadata};
use mediadeck::collab::{BasicValidator, Validator};
use mediadeck::events::{AppEvent, EventSink};
use mediadeck::settings::{SettingsManager, TomlSettingsStore};
use mediadeck::transcript::ExportFormat;

// ---------------------------------------------------------------------------
// Command parsing
// ---------------------------------------------------------------------------

const HELP: &str = "commands: load <url> | retry | pause | resume | toggle | stop | \
seek <0-1> | skip <secs> | volume <0-100> | quality <q> | transcript <id> [lang] | \
export <path> | add <url> | remove <id> | move <from> <to> | play <index> | next | prev | \
clear | stream <port> [host] | unstream | save | quit";

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    let rest: Vec<&str> = parts.collect();
    let arg = rest.first().copied();

    let command = match (verb, arg) {
        ("load", Some(url)) => Command::Load(url.to_string()),
        ("retry", _) => Command::Retry,
        ("pause", _) => Command::Pause,
        ("resume", _) => Command::Resume,
        ("toggle", _) => Command::TogglePause,
        ("stop", _) => Command::Stop,
        ("seek", Some(f)) => Command::Seek(f.parse().ok()?),
        ("skip", Some(s)) => Command::SeekRelative(s.parse().ok()?),
        ("volume", Some(v)) => Command::SetVolume(v.parse().ok()?),
        ("quality", Some(q)) => Command::SetQuality(q.to_string()),
        ("transcript", Some(id)) => Command::FetchTranscript {
            video_id: id.to_string(),
            language: rest.get(1).map(|l| l.to_string()),
        },
        ("export", Some(path)) => {
            let path = PathBuf::from(path);
            Command::ExportTranscript {
                format: ExportFormat::from_path(&path),
                path,
            }
        }
        ("add", Some(_)) => Command::AddToPlaylist(rest.join("\n")),
        ("remove", Some(id)) => Command::RemoveFromPlaylist(id.to_string()),
        ("move", Some(from)) => Command::MovePlaylistItem {
            from: from.parse().ok()?,
            to: rest.get(1)?.parse().ok()?,
        },
        ("play", Some(i)) => Command::PlayPlaylistItem(i.parse().ok()?),
        ("next", _) => Command::NextItem,
        ("prev", _) => Command::PreviousItem,
        ("clear", _) => Command::ClearPlaylist,
        ("stream", Some(port)) => Command::StartStreaming {
            port: port.parse().ok()?,
            host: rest.get(1).copied().unwrap_or("127.0.0.1").to_string(),
        },
        ("unstream", _) => Command::StopStreaming,
        ("save", _) => Command::SaveSettings,
        ("quit" | "exit", _) => Command::Shutdown,
        _ => return None,
    };
    Some(command)
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::TaskProgress { id, kind, state } => {
            log::debug!("event: {kind:?} {id} {}", state.label());
        }
        AppEvent::PositionChanged { .. } => log::trace!("event: {event:?}"),
        AppEvent::TaskFailed(e) | AppEvent::TranscriptError(e) | AppEvent::CommandRejected(e) => {
            log::warn!("event: {}", e.message);
        }
        other => log::info!("event: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("mediadeck starting up");

    // 2. Settings
    let validator: Arc<dyn Validator> = Arc::new(BasicValidator::new());
    let store = Arc::new(TomlSettingsStore::default_location());
    log::info!("settings file: {}", store.path().display());
    let settings = SettingsManager::load(store, Arc::clone(&validator))?;

    // 3. Core
    let engine = Arc::new(HeadlessEngine::new());
    let collab = Collaborators {
        engine,
        extractor: Arc::new(PassthroughExtractor),
        transcripts: Arc::new(NoTranscripts),
        metadata: Arc::new(PassthroughMetadata),
        validator,
    };
    let (events, mut event_rx) = EventSink::channel();
    let core = MediaCore::new(settings, collab, events);
    log::info!("relative exports go to {}", core.export_dir().display());

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    // The headless engine raises no signals; the sender only keeps the
    // channel open.
    let (_engine_tx, engine_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    // 4. stdin commands
    let input_tx = command_tx.clone();
    tokio::spawn(async move {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_command(line) {
                Some(command) => {
                    if input_tx.send(command).await.is_err() {
                        break;
                    }
                }
                None => println!("{HELP}"),
            }
        }
        let _ = input_tx.send(Command::Shutdown).await;
    });

    // 5. Ctrl-C
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received");
            let _ = command_tx.send(Command::Shutdown).await;
        }
    });

    core.run(command_rx, engine_rx).await?;
    log::info!("mediadeck stopped");
    Ok(())
}
