//! Connection-related data models.
//!
//! This module defines the state and snapshot types reported by a connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connectivity state as reported to health-check tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A live client handle is held.
    Connected,
    /// No client handle: never connected, connect failed, or closed.
    Unknown,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Active,
}

impl TransactionState {
    /// Check if a transaction is open.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// The open transaction of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
}

impl TransactionInfo {
    /// Seconds since the transaction started.
    pub fn duration_secs(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64
    }
}

/// Snapshot of a connection, safe to log or serialize (no secrets).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Connection URI with the password masked.
    pub uri: String,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,
}

impl ConnectionInfo {
    /// Check if a transaction was open when the snapshot was taken.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}
