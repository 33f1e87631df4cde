//! Query objects bound to a connection.
//!
//! Building and running the actual find/insert/update/delete/aggregate
//! operations belongs to the query layer; this type only carries the binding
//! to a [`Connection`] and the target collection.

use crate::db::connection::Connection;
use crate::db::driver::{Driver, DriverClient, MongoDriver};

pub struct Query<D: Driver = MongoDriver> {
    connection: Connection<D>,
    collection: Option<String>,
}

impl<D: Driver> Query<D> {
    pub(crate) fn new(connection: Connection<D>) -> Self {
        Self {
            connection,
            collection: None,
        }
    }

    /// Set the target collection.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn collection_name(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// The connection this query is bound to.
    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    /// The database handle of the bound connection, if connected.
    pub fn database(&self) -> Option<<D::Client as DriverClient>::Database> {
        self.connection.database()
    }
}

impl<D: Driver> Clone for Query<D> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Query<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("host", &self.connection.config().host)
            .field("collection", &self.collection)
            .finish()
    }
}
