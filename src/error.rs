//! Error types for the Daily Streak Bot
//!
//! Provides structured error types for the table storage adapters, the entity
//! cache, entity row conversion and the configuration layer.

use thiserror::Error;

/// Unified error type for the bot core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Table Storage Errors
    // =========================================================================
    #[error("Table [{table}] is not connected")]
    TableUnavailable { table: String },

    #[error("Table storage request failed: {0}")]
    RemoteRequest(#[from] reqwest::Error),

    #[error("Table storage {operation} on [{table}] returned {status}: {reason}")]
    RemoteStatus {
        table: String,
        operation: String,
        status: u16,
        reason: String,
    },

    #[error("Table storage unavailable: {reason}")]
    StoreUnavailable { reason: String },

    // =========================================================================
    // Entity Errors
    // =========================================================================
    #[error("Malformed row [{row_key}] in [{table}]: {reason}")]
    MalformedRow {
        table: String,
        row_key: String,
        reason: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Connection string parse error: {0}")]
    ConnectionString(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Scheduler Errors
    // =========================================================================
    #[error("Scheduled job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },
}

/// Broad class of an error, used to pick log severity and retry behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or remote store hiccup, the next call may succeed
    Transient,
    /// Missing credentials, bad connection string, unbound table
    Configuration,
    /// A stored record could not be interpreted
    Data,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::RemoteRequest(_) | Error::StoreUnavailable { .. } => ErrorClass::Transient,

            // 5xx and throttling are worth another try, 4xx are not
            Error::RemoteStatus { status, .. } if *status >= 500 || *status == 429 => {
                ErrorClass::Transient
            }
            Error::RemoteStatus { status, .. } if *status == 401 || *status == 403 => {
                ErrorClass::Configuration
            }
            Error::RemoteStatus { .. } => ErrorClass::Internal,

            Error::Configuration(_)
            | Error::ConnectionString(_)
            | Error::TableUnavailable { .. } => ErrorClass::Configuration,

            Error::MalformedRow { .. } | Error::JsonParse(_) => ErrorClass::Data,

            Error::Internal(_) | Error::JobFailed { .. } => ErrorClass::Internal,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Check if this error means the process is misconfigured
    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }
}

/// Result type alias for the bot core
pub type Result<T> = std::result::Result<T, Error>;
