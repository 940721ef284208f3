//! Network audio streaming.

pub mod manager;

pub use manager::{stream_url, StreamingManager, StreamingState};
