//! Error types for the MongoDB adapter.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants are grouped by what went wrong: configuration, connection, transaction
//! sequencing, underlying driver operations, and context cancellation.

use thiserror::Error;

/// Error type produced by driver implementations.
///
/// Kept as a boxed trait object so the driver seam can be implemented by
/// something other than the real `mongodb` client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid configuration for '{key}': {message}")]
    Config { key: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Connection failed during {step}: {source}")]
    ConnectFailed {
        /// One of "client creation", "connect", "ping"
        step: String,
        #[source]
        source: BoxError,
    },

    #[error("Not connected: cannot {operation} before a successful connect")]
    NotConnected { operation: String },

    #[error("No database selected: cannot {operation} without a configured database name")]
    NoDatabase { operation: String },

    #[error(
        "Session already exist (transaction: {transaction_id}). Commit or rollback the last one first"
    )]
    SessionAlreadyExists { transaction_id: String },

    #[error("Transaction session does not exist yet: cannot {operation}")]
    NoActiveTransaction { operation: String },

    #[error("Unable to {operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Deadline exceeded: {operation}")]
    DeadlineExceeded { operation: String },
}

impl AdapterError {
    /// Create a configuration error for the given option key.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a connection error that has no underlying driver cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a connection error for a failed connect step.
    pub fn connect_failed(step: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConnectFailed {
            step: step.into(),
            source: source.into(),
        }
    }

    /// Create a not connected error.
    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    /// Create a no database selected error.
    pub fn no_database(operation: impl Into<String>) -> Self {
        Self::NoDatabase {
            operation: operation.into(),
        }
    }

    /// Create a session already exists error.
    pub fn session_already_exists(transaction_id: impl Into<String>) -> Self {
        Self::SessionAlreadyExists {
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a no active transaction error.
    pub fn no_active_transaction(operation: impl Into<String>) -> Self {
        Self::NoActiveTransaction {
            operation: operation.into(),
        }
    }

    /// Wrap a driver failure with the operation it interrupted.
    pub fn operation(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a deadline exceeded error.
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Sequencing errors are usage mistakes and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectFailed { .. }
                | Self::Cancelled { .. }
                | Self::DeadlineExceeded { .. }
        )
    }

    /// Check if this error reports a begin/commit/rollback ordering mistake.
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            Self::SessionAlreadyExists { .. } | Self::NoActiveTransaction { .. }
        )
    }

    /// Check if this error was produced by the operation context.
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
