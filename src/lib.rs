//! flexmongo
//!
//! A MongoDB connection adapter for driver-agnostic database access layers:
//! connection configuration and lifecycle, single-session transaction control,
//! and query objects bound to a connection.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::ConnectionConfig;
pub use db::{Connection, Context, Query};
pub use error::{AdapterError, AdapterResult};
pub use models::{ConnectionState, TransactionState};
