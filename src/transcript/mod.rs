//! Transcript synchronisation.
//!
//! ```text
//! fetch_transcript(id) ──▶ TranscriptFetch task ──▶ Vec<RawCue>
//!                                                     │ sort, drop malformed
//!                                                     ▼
//!                         current_cue(pos) ◀── TranscriptIndex ──▶ search / export
//! ```

pub mod export;
pub mod index;
pub mod manager;

pub use export::{format_time, ExportFormat};
pub use index::{Cue, TranscriptIndex};
pub use manager::TranscriptManager;
