//! Player state machine fed by VideoResolve tasks and engine signals.

pub mod manager;
pub mod state;

pub use manager::PlaybackManager;
pub use state::{MediaInfo, PlaybackState};
