//! MongoDB connection lifecycle.
//!
//! A [`Connection`] owns one logical link to a MongoDB deployment:
//! - URI assembly and option translation from [`ConnectionConfig`]
//! - connect, then ping, before anything is retained
//! - state reporting, disconnect, collection drop
//! - the single-session [`TransactionController`]
//!
//! `Connection` is a cheap `Clone` handle; clones share the same client and
//! transaction state.

use crate::config::{ConnectionConfig, DriverOptions};
use crate::db::context::Context;
use crate::db::driver::{Driver, DriverClient, DriverDatabase, MongoDriver};
use crate::db::query::Query;
use crate::db::transaction::TransactionController;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{ConnectionInfo, ConnectionState, TransactionInfo, TransactionState};
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{MappedMutexGuard, Mutex};
use tracing::{debug, info, warn};

type SessionOf<D> = <<D as Driver>::Client as DriverClient>::Session;
type DatabaseOf<D> = <<D as Driver>::Client as DriverClient>::Database;

/// Handles retained after a fully successful connect.
struct Link<C: DriverClient> {
    client: C,
    database: Option<C::Database>,
    connected_at: DateTime<Utc>,
}

struct Inner<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    /// Some iff connected. Uses std::sync::RwLock: never held across await.
    link: RwLock<Option<Link<D::Client>>>,
    /// Serializes connect and close.
    lifecycle: Mutex<()>,
    transaction: TransactionController<SessionOf<D>>,
}

pub struct Connection<D: Driver = MongoDriver> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Connection<MongoDriver> {
    /// Create an unconnected MongoDB connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_driver(MongoDriver, config)
    }
}

impl<D: Driver> Connection<D> {
    /// Create an unconnected connection that uses a specific driver.
    pub fn with_driver(driver: D, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                config,
                link: RwLock::new(None),
                lifecycle: Mutex::new(()),
                transaction: TransactionController::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Connect to the configured deployment.
    ///
    /// Steps: translate options, create the client, connect, ping, resolve the
    /// database. The connection becomes connected only when every step
    /// succeeds; on failure nothing is retained and `connect` may be retried.
    pub async fn connect(&self, ctx: &Context) -> AdapterResult<()> {
        let _lifecycle = ctx.lock("connect", &self.inner.lifecycle).await?;
        if self.read_link(|link| link.is_some()) {
            return Err(AdapterError::connection(format!(
                "already connected to '{}', close the connection first",
                self.inner.config.host
            )));
        }

        let config = &self.inner.config;
        let options = DriverOptions::from_options(&config.options)?;

        info!(
            uri = %config.masked_uri(),
            database = ?config.database_name(),
            "Connecting to MongoDB"
        );

        let uri = config.driver_uri();
        let client = ctx
            .run("create client", async {
                self.inner
                    .driver
                    .create_client(&uri, &options)
                    .await
                    .map_err(|e| AdapterError::connect_failed("client creation", e))
            })
            .await?;
        debug!("Client created");

        ctx.run("connect", async {
            client
                .connect()
                .await
                .map_err(|e| AdapterError::connect_failed("connect", e))
        })
        .await?;
        debug!("Client connected");

        ctx.run("ping", async {
            client
                .ping()
                .await
                .map_err(|e| AdapterError::connect_failed("ping", e))
        })
        .await?;
        debug!("Ping succeeded");

        let database = config.database_name().map(|name| client.database(name));
        let connected_at = Utc::now();
        *self.write_link() = Some(Link {
            client,
            database,
            connected_at,
        });

        info!(host = %config.host, "Connected successfully");
        Ok(())
    }

    /// `Connected` if a client is held, `Unknown` otherwise. No network round trip.
    pub fn state(&self) -> ConnectionState {
        if self.read_link(|link| link.is_some()) {
            ConnectionState::Connected
        } else {
            ConnectionState::Unknown
        }
    }

    /// Disconnect and release the client. No-op when not connected.
    ///
    /// An open transaction is rolled back (best effort) first. If the context
    /// ends while a connect or begin is still running, the client is released
    /// without waiting for it.
    pub async fn close(&self, ctx: &Context) {
        let _lifecycle = match ctx.lock("close", &self.inner.lifecycle).await {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "Closing without waiting for pending lifecycle operation");
                None
            }
        };
        self.inner.transaction.abandon(ctx).await;

        let link = self.write_link().take();
        let Some(link) = link else {
            return;
        };

        let result = ctx
            .run("disconnect", async {
                link.client.shutdown().await;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => info!(host = %self.inner.config.host, "Connection closed"),
            Err(e) => debug!(error = %e, "Disconnect interrupted, client released"),
        }
    }

    /// Create a query object bound to this connection.
    ///
    /// No connectivity check: an unconnected connection surfaces its error
    /// when the query runs.
    pub fn new_query(&self) -> Query<D> {
        Query::new(self.clone())
    }

    /// Drop a collection from the configured database.
    pub async fn drop_collection(&self, ctx: &Context, name: &str) -> AdapterResult<()> {
        let database = self.require_database("drop collection")?;

        ctx.run("drop collection", async {
            database
                .drop_collection(name)
                .await
                .map_err(|e| AdapterError::operation(format!("drop collection '{}'", name), e))
        })
        .await?;

        info!(collection = %name, "Collection dropped");
        Ok(())
    }

    /// The raw client handle, for layers that talk to the driver directly.
    pub fn client(&self) -> Option<D::Client> {
        self.read_link(|link| link.as_ref().map(|l| l.client.clone()))
    }

    /// The resolved database handle. `None` when not connected or when no
    /// database name is configured.
    pub fn database(&self) -> Option<DatabaseOf<D>> {
        self.read_link(|link| link.as_ref().and_then(|l| l.database.clone()))
    }

    /// Snapshot for logging and health checks.
    pub async fn info(&self) -> ConnectionInfo {
        let connected_at = self.read_link(|link| link.as_ref().map(|l| l.connected_at));
        let config = &self.inner.config;
        ConnectionInfo {
            host: config.host.clone(),
            database: config.database_name().map(String::from),
            uri: config.masked_uri(),
            state: if connected_at.is_some() {
                ConnectionState::Connected
            } else {
                ConnectionState::Unknown
            },
            connected_at,
            transaction: self.inner.transaction.info().await,
        }
    }

    /// Begin a transaction. Only one may be open per connection.
    ///
    /// Holds the lifecycle lock so a concurrent `close` either runs first and
    /// leaves nothing to begin on, or waits and then rolls the new one back.
    pub async fn begin_tx(&self, ctx: &Context) -> AdapterResult<TransactionInfo> {
        let _lifecycle = ctx.lock("begin transaction", &self.inner.lifecycle).await?;
        let client = self.require_client("begin transaction")?;
        self.inner.transaction.begin(&client, ctx).await
    }

    /// Commit the open transaction. On failure the transaction stays open.
    pub async fn commit(&self, ctx: &Context) -> AdapterResult<()> {
        self.inner.transaction.commit(ctx).await
    }

    /// Roll back the open transaction. On failure the transaction stays open.
    pub async fn rollback(&self, ctx: &Context) -> AdapterResult<()> {
        self.inner.transaction.rollback(ctx).await
    }

    /// Check if a transaction is open.
    pub async fn is_tx(&self) -> bool {
        self.inner.transaction.is_active().await
    }

    pub async fn transaction_state(&self) -> TransactionState {
        self.inner.transaction.state().await
    }

    pub async fn transaction(&self) -> Option<TransactionInfo> {
        self.inner.transaction.info().await
    }

    /// Borrow the open session to attach it to driver operations.
    ///
    /// Commit and rollback wait until the guard is dropped.
    pub async fn session(&self) -> AdapterResult<MappedMutexGuard<'_, SessionOf<D>>> {
        self.inner.transaction.session().await
    }

    fn require_client(&self, operation: &str) -> AdapterResult<D::Client> {
        self.client()
            .ok_or_else(|| AdapterError::not_connected(operation))
    }

    fn require_database(&self, operation: &str) -> AdapterResult<DatabaseOf<D>> {
        self.read_link(|link| match link {
            None => Err(AdapterError::not_connected(operation)),
            Some(l) => l
                .database
                .clone()
                .ok_or_else(|| AdapterError::no_database(operation)),
        })
    }

    fn read_link<R>(&self, f: impl FnOnce(&Option<Link<D::Client>>) -> R) -> R {
        let guard = self
            .inner
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_link(&self) -> std::sync::RwLockWriteGuard<'_, Option<Link<D::Client>>> {
        self.inner
            .link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("transaction", &self.inner.transaction)
            .finish()
    }
}
