//! Driver seam.
//!
//! The adapter only sequences a handful of driver calls. These traits name
//! exactly those calls so the connection and transaction state machines can
//! run against the real `mongodb` client or against a test double.

use crate::config::DriverOptions;
use crate::error::BoxError;
use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, ClientSession, Database};

/// Creates clients from an assembled URI and translated options.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Client: DriverClient;

    async fn create_client(
        &self,
        uri: &str,
        options: &DriverOptions,
    ) -> Result<Self::Client, BoxError>;
}

/// A live client handle.
///
/// Clones must share the underlying connection pool.
#[async_trait]
pub trait DriverClient: Clone + Send + Sync + 'static {
    type Database: DriverDatabase;
    type Session: DriverSession;

    /// Establish the network session.
    async fn connect(&self) -> Result<(), BoxError>;

    /// Verify the server answers.
    async fn ping(&self) -> Result<(), BoxError>;

    fn database(&self, name: &str) -> Self::Database;

    async fn start_session(&self) -> Result<Self::Session, BoxError>;

    async fn shutdown(self);
}

#[async_trait]
pub trait DriverDatabase: Clone + Send + Sync + 'static {
    async fn drop_collection(&self, name: &str) -> Result<(), BoxError>;
}

#[async_trait]
pub trait DriverSession: Send + 'static {
    async fn start_transaction(&mut self) -> Result<(), BoxError>;
    async fn commit_transaction(&mut self) -> Result<(), BoxError>;
    async fn abort_transaction(&mut self) -> Result<(), BoxError>;
}

/// The official MongoDB driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

#[async_trait]
impl Driver for MongoDriver {
    type Client = Client;

    async fn create_client(&self, uri: &str, options: &DriverOptions) -> Result<Client, BoxError> {
        let mut client_options = ClientOptions::parse(uri).await?;

        if let Some(timeout) = options.server_selection_timeout {
            client_options.server_selection_timeout = Some(timeout);
        }
        if let Some(replica_set) = &options.replica_set {
            client_options.repl_set_name = Some(replica_set.clone());
        }

        Ok(Client::with_options(client_options)?)
    }
}

#[async_trait]
impl DriverClient for Client {
    type Database = Database;
    type Session = ClientSession;

    async fn connect(&self) -> Result<(), BoxError> {
        // The driver connects lazily; warming the pool opens the sockets now.
        self.warm_connection_pool().await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        self.database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn database(&self, name: &str) -> Database {
        Client::database(self, name)
    }

    async fn start_session(&self) -> Result<ClientSession, BoxError> {
        Ok(Client::start_session(self).await?)
    }

    async fn shutdown(self) {
        Client::shutdown(self).await;
    }
}

#[async_trait]
impl DriverDatabase for Database {
    async fn drop_collection(&self, name: &str) -> Result<(), BoxError> {
        self.collection::<Document>(name).drop().await?;
        Ok(())
    }
}

#[async_trait]
impl DriverSession for ClientSession {
    async fn start_transaction(&mut self) -> Result<(), BoxError> {
        ClientSession::start_transaction(self).await?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), BoxError> {
        ClientSession::commit_transaction(self).await?;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), BoxError> {
        ClientSession::abort_transaction(self).await?;
        Ok(())
    }
}
