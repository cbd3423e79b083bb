//! Centralized error handling for the live relay
//!
//! # Error Categories
//!
//! - **Stream Errors**: transcoder spawn failures, runtime failures, batch
//!   table conflicts and invalid encode settings
//! - **Persistence Errors**: log/session/channel writes and queries
//! - **API Errors**: YouTube OAuth and Data API calls
//!
//! # Usage
//!
//! ```rust
//! use yt_live_relay::errors::{AppResult, StreamError};
//!
//! fn example(index: u32) -> AppResult<()> {
//!     Err(StreamError::AlreadyRunning(index).into())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for supervisor and runner Results
pub type StreamResult<T> = Result<T, StreamError>;

/// Convenience type alias for persistence Results
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Convenience type alias for YouTube API Results
pub type ApiResult<T> = Result<T, ApiError>;
