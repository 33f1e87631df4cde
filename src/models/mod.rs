//! Data models for the MongoDB adapter.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

// Re-export commonly used types
pub use connection::{ConnectionInfo, ConnectionState, TransactionInfo, TransactionState};
