//! Push local video files to YouTube Live over RTMP.
//!
//! Each batch is one FFmpeg process supervised on its own task. Output lines
//! are masked, kept in a bounded per-batch tail and written to SQLite through
//! a single log aggregator.

pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod utils;

pub use config::Config;
pub use state::{PersistenceMode, Stores, SupervisorState};
