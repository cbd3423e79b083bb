//! Error type definitions for the live relay
//!
//! The stream taxonomy mirrors how a batch can end: it never launched
//! (`Spawn`), it launched and died (`RuntimeFailure`), or it was refused before
//! anything happened (`AlreadyRunning`, `InvalidSettings`, `InvalidTarget`).

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Streaming supervisor errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Persistence layer errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// YouTube API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem and process I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while starting, running or controlling a streaming batch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The transcoder executable could not be launched
    #[error("Failed to spawn transcoder '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The transcoder exited non-zero or its output could not be read
    #[error("Transcoder failed (exit code {code:?}): {message}")]
    RuntimeFailure { code: Option<i32>, message: String },

    /// A batch with this index is already running
    #[error("Batch {0} is already running")]
    AlreadyRunning(u32),

    /// No batch is registered under this index
    #[error("Batch {0} not found")]
    NotFound(u32),

    /// Encode settings rejected at batch start
    #[error("Invalid encode setting '{field}': {message}")]
    InvalidSettings { field: String, message: String },

    /// Neither or both of stream key / explicit URL supplied
    #[error("Invalid stream target: {0}")]
    InvalidTarget(String),

    /// The input video does not exist
    #[error("Input video not found: {0}")]
    InputMissing(String),
}

/// Persistence sink errors; these never fail a running batch
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The backing store could not be opened
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A write was rejected
    #[error("Write to {table} failed: {message}")]
    WriteFailed { table: String, message: String },

    /// A query failed
    #[error("Query on {table} failed: {message}")]
    QueryFailed { table: String, message: String },

    /// Stored JSON could not be (de)serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// YouTube OAuth / Data API errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level HTTP failures
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status returned by Google
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// A field the caller relies on was missing from the response
    #[error("Missing field '{field}' in {endpoint} response")]
    MissingField { endpoint: String, field: String },

    /// Token payload could not be decoded
    #[error("Invalid token payload: {0}")]
    InvalidTokens(String),

    /// Client configuration is incomplete
    #[error("OAuth client not configured: {0}")]
    NotConfigured(String),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl StreamError {
    /// Create a spawn error
    pub fn spawn<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        Self::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a runtime failure
    pub fn runtime<M: Into<String>>(code: Option<i32>, message: M) -> Self {
        Self::RuntimeFailure {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid settings error
    pub fn invalid_settings<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidSettings {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl PersistenceError {
    /// Create a write failed error
    pub fn write_failed<T: Into<String>, M: ToString>(table: T, message: M) -> Self {
        Self::WriteFailed {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a query failed error
    pub fn query_failed<T: Into<String>, M: ToString>(table: T, message: M) -> Self {
        Self::QueryFailed {
            table: table.into(),
            message: message.to_string(),
        }
    }
}

impl ApiError {
    /// Create a missing field error
    pub fn missing_field<E: Into<String>, F: Into<String>>(endpoint: E, field: F) -> Self {
        Self::MissingField {
            endpoint: endpoint.into(),
            field: field.into(),
        }
    }
}
