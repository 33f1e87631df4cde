//! Database abstraction layer.
//!
//! This module provides MongoDB access functionality:
//! - Connection lifecycle (connect, ping, state, close)
//! - Single-session transaction control
//! - Per-operation cancellation context
//! - The driver seam and its `mongodb` implementation
//! - Query objects bound to a connection

pub mod connection;
pub mod context;
pub mod driver;
#[cfg(test)]
pub(crate) mod fake;
pub mod query;
pub mod transaction;

pub use connection::Connection;
pub use context::Context;
pub use driver::{Driver, DriverClient, DriverDatabase, DriverSession, MongoDriver};
pub use query::Query;
pub use transaction::TransactionController;
