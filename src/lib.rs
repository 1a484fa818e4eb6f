//! Core library for the siggen function generator controller.
//!
//! Keeps locally edited waveform parameters and a remote SCPI function
//! generator in sync. Edits are staged per channel, debounced, and applied as
//! ordered command sequences; refreshes read the instrument back and reformat
//! every value for display.
//!
//! - [`transport`]: the connection to one instrument (VISA or simulated).
//! - [`units`]: unit normalization, auto-ranging and display formatting.
//! - [`dispatch`]: per-key debouncing of deferred actions.
//! - [`channel`]: per-channel parameter models for each waveform family.
//! - [`engine`]: ties the above together behind an edit-driven API.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod logging;
pub mod transport;
pub mod units;

pub use engine::{Instrument, SyncEngine};
