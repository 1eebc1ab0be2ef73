//! Timeline-driven controller for networked addressable LED strings.
//!
//! A project holds devices, sequences of effect tracks, and playlists. The
//! [`scheduler::Scheduler`] ticks at a fixed rate, renders active effects into
//! per-device pixel buffers and ships them to WLED controllers over DDP.

pub mod config;
pub mod devices;
pub mod effects;
pub mod error;
pub mod logging;
pub mod model;
pub mod pixels;
pub mod playlist;
pub mod project;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod signal;
pub mod timeline;
pub mod virtual_string;
