//! In-memory driver double for exercising the state machines without a server.

use crate::config::DriverOptions;
use crate::db::driver::{Driver, DriverClient, DriverDatabase, DriverSession};
use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub String);

/// Which driver calls fail (or hang) and what the fake has observed.
#[derive(Debug, Default)]
pub struct FakeState {
    pub fail_create: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub hang_ping: AtomicBool,
    pub fail_start_session: AtomicBool,
    pub fail_start_transaction: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_abort: AtomicBool,
    pub fail_drop: AtomicBool,

    pub clients_created: AtomicUsize,
    pub sessions_started: AtomicUsize,
    pub commits: AtomicUsize,
    pub aborts: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub last_uri: Mutex<Option<String>>,
    pub last_options: Mutex<Option<DriverOptions>>,
    pub dropped: Mutex<Vec<(String, String)>>,
}

impl FakeState {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn check(flag: &AtomicBool, what: &str) -> Result<(), BoxError> {
    if flag.load(Ordering::SeqCst) {
        Err(Box::new(FakeError(format!("{what} failed"))))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Client = FakeClient;

    async fn create_client(
        &self,
        uri: &str,
        options: &DriverOptions,
    ) -> Result<FakeClient, BoxError> {
        *self.state.last_uri.lock().unwrap() = Some(uri.to_string());
        *self.state.last_options.lock().unwrap() = Some(options.clone());
        check(&self.state.fail_create, "client creation")?;
        self.state.clients_created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClient {
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeClient {
    state: Arc<FakeState>,
}

#[async_trait]
impl DriverClient for FakeClient {
    type Database = FakeDatabase;
    type Session = FakeSession;

    async fn connect(&self) -> Result<(), BoxError> {
        check(&self.state.fail_connect, "connect")
    }

    async fn ping(&self) -> Result<(), BoxError> {
        if self.state.hang_ping.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        check(&self.state.fail_ping, "ping")
    }

    fn database(&self, name: &str) -> FakeDatabase {
        FakeDatabase {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    async fn start_session(&self) -> Result<FakeSession, BoxError> {
        check(&self.state.fail_start_session, "start session")?;
        let id = self.state.sessions_started.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeSession {
            id,
            state: Arc::clone(&self.state),
        })
    }

    async fn shutdown(self) {
        self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct FakeDatabase {
    pub name: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl DriverDatabase for FakeDatabase {
    async fn drop_collection(&self, name: &str) -> Result<(), BoxError> {
        check(&self.state.fail_drop, "drop")?;
        self.state
            .dropped
            .lock()
            .unwrap()
            .push((self.name.clone(), name.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeSession {
    /// Sequence number of this session, starting at 1
    pub id: usize,
    state: Arc<FakeState>,
}

#[async_trait]
impl DriverSession for FakeSession {
    async fn start_transaction(&mut self) -> Result<(), BoxError> {
        check(&self.state.fail_start_transaction, "start transaction")
    }

    async fn commit_transaction(&mut self) -> Result<(), BoxError> {
        check(&self.state.fail_commit, "commit")?;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), BoxError> {
        check(&self.state.fail_abort, "abort")?;
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
