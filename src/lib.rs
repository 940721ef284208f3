//! mediadeck: the core of a desktop media client.
//!
//! A bounded, cancellable background [`task`] scheduler feeds results to the
//! domain managers ([`playback`], [`transcript`], [`playlist`],
//! [`streaming`], [`settings`]). [`app::MediaCore`] wires them together and
//! owns the event loop; the UI talks to it through [`app::Command`] and
//! [`events::AppEvent`].

pub mod app;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod playlist;
pub mod settings;
pub mod streaming;
pub mod task;
pub mod transcript;
