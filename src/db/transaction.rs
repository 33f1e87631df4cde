//! Single-session transaction controller.
//!
//! A connection owns at most one transaction at a time:
//!
//! ```text
//! Idle --begin--> Active --commit|rollback--> Idle
//! ```
//!
//! The state lives behind an async mutex that is held across the driver call
//! of each transition, so concurrent `begin` calls on one connection can never
//! both open a session.
//!
//! A failed commit or rollback keeps the session and stays `Active`; the
//! caller may retry the commit or fall back to a rollback.

use crate::db::context::Context;
use crate::db::driver::{DriverClient, DriverSession};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{TransactionInfo, TransactionState};
use chrono::{DateTime, Utc};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct ActiveTransaction<S> {
    session: S,
    id: String,
    started_at: DateTime<Utc>,
}

impl<S> ActiveTransaction<S> {
    fn info(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.id.clone(),
            started_at: self.started_at,
        }
    }
}

enum TxState<S> {
    Idle,
    Active(ActiveTransaction<S>),
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

impl Finish {
    fn operation(self) -> &'static str {
        match self {
            Finish::Commit => "commit",
            Finish::Rollback => "rollback",
        }
    }
}

pub struct TransactionController<S> {
    state: Mutex<TxState<S>>,
}

impl<S: DriverSession> TransactionController<S> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TxState::Idle),
        }
    }

    /// Start a session and a transaction on it.
    ///
    /// Fails with [`AdapterError::SessionAlreadyExists`] while another
    /// transaction is open; the open one is left untouched.
    pub async fn begin<C>(&self, client: &C, ctx: &Context) -> AdapterResult<TransactionInfo>
    where
        C: DriverClient<Session = S>,
    {
        let mut state = ctx.lock("start new transaction", &self.state).await?;
        if let TxState::Active(active) = &*state {
            return Err(AdapterError::session_already_exists(active.id.clone()));
        }

        let mut session = ctx
            .run("start session", async {
                client
                    .start_session()
                    .await
                    .map_err(|e| AdapterError::operation("start new transaction", e))
            })
            .await?;

        ctx.run("start transaction", async {
            session
                .start_transaction()
                .await
                .map_err(|e| AdapterError::operation("start new transaction", e))
        })
        .await?;

        let active = ActiveTransaction {
            session,
            id: generate_transaction_id(),
            started_at: Utc::now(),
        };
        let info = active.info();
        *state = TxState::Active(active);

        info!(transaction_id = %info.id, "Transaction started");
        Ok(info)
    }

    pub async fn commit(&self, ctx: &Context) -> AdapterResult<()> {
        self.finish(ctx, Finish::Commit).await
    }

    pub async fn rollback(&self, ctx: &Context) -> AdapterResult<()> {
        self.finish(ctx, Finish::Rollback).await
    }

    async fn finish(&self, ctx: &Context, finish: Finish) -> AdapterResult<()> {
        let operation = finish.operation();
        let mut state = ctx.lock(operation, &self.state).await?;
        let TxState::Active(active) = &mut *state else {
            return Err(AdapterError::no_active_transaction(operation));
        };

        let session = &mut active.session;
        let outcome = ctx
            .run(operation, async {
                let result = match finish {
                    Finish::Commit => session.commit_transaction().await,
                    Finish::Rollback => session.abort_transaction().await,
                };
                result.map_err(|e| AdapterError::operation(operation, e))
            })
            .await;

        if let Err(e) = outcome {
            debug!(
                transaction_id = %active.id,
                error = %e,
                "Transaction still active after failed {}",
                operation
            );
            return Err(e);
        }

        let info = active.info();
        *state = TxState::Idle;

        match finish {
            Finish::Commit => info!(
                transaction_id = %info.id,
                duration_secs = info.duration_secs(),
                "Transaction committed"
            ),
            Finish::Rollback => info!(
                transaction_id = %info.id,
                duration_secs = info.duration_secs(),
                "Transaction rolled back"
            ),
        }
        Ok(())
    }

    /// Drop the open transaction, if any, aborting it first.
    ///
    /// Used when the owning connection closes. Abort failures are logged and
    /// the session is released regardless. If the context ends while another
    /// task still borrows the session, the transaction is left to its holder.
    pub async fn abandon(&self, ctx: &Context) {
        let mut state = match ctx.lock("rollback", &self.state).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Transaction state busy, open transaction not rolled back");
                return;
            }
        };
        let TxState::Active(mut active) = std::mem::replace(&mut *state, TxState::Idle) else {
            return;
        };

        let result = ctx
            .run("rollback", async {
                active
                    .session
                    .abort_transaction()
                    .await
                    .map_err(|e| AdapterError::operation("rollback", e))
            })
            .await;

        match result {
            Ok(()) => info!(
                transaction_id = %active.id,
                "Rolled back open transaction on close"
            ),
            Err(e) => warn!(
                transaction_id = %active.id,
                error = %e,
                "Failed to roll back open transaction on close"
            ),
        }
    }

    /// Check if a transaction is open.
    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, TxState::Active(_))
    }

    pub async fn state(&self) -> TransactionState {
        match *self.state.lock().await {
            TxState::Idle => TransactionState::Idle,
            TxState::Active(_) => TransactionState::Active,
        }
    }

    /// Info about the open transaction, if any.
    pub async fn info(&self) -> Option<TransactionInfo> {
        match &*self.state.lock().await {
            TxState::Idle => None,
            TxState::Active(active) => Some(active.info()),
        }
    }

    /// Lock and borrow the open session so it can be attached to operations.
    ///
    /// No transition can happen while the guard is alive.
    pub async fn session(&self) -> AdapterResult<MappedMutexGuard<'_, S>> {
        let guard = self.state.lock().await;
        MutexGuard::try_map(guard, |state| match state {
            TxState::Active(active) => Some(&mut active.session),
            TxState::Idle => None,
        })
        .map_err(|_| AdapterError::no_active_transaction("access session"))
    }
}

impl<S: DriverSession> Default for TransactionController<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for TransactionController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.try_lock() {
            Ok(guard) => match &*guard {
                TxState::Idle => "idle",
                TxState::Active(_) => "active",
            },
            Err(_) => "locked",
        };
        f.debug_struct("TransactionController")
            .field("state", &state)
            .finish()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverOptions;
    use crate::db::driver::Driver;
    use crate::db::fake::{FakeClient, FakeDriver, FakeSession, FakeState};
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (FakeDriver, FakeClient, TransactionController<FakeSession>) {
        let driver = FakeDriver::new();
        let client = driver
            .create_client("mongodb://fake/", &DriverOptions::default())
            .await
            .unwrap();
        (driver, client, TransactionController::new())
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
    }

    #[tokio::test]
    async fn test_begin_commit_returns_to_idle() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        let info = tx.begin(&client, &ctx).await.unwrap();
        assert!(tx.is_active().await);
        assert_eq!(tx.state().await, TransactionState::Active);
        assert_eq!(tx.info().await, Some(info));

        tx.commit(&ctx).await.unwrap();
        assert!(!tx.is_active().await);
        assert_eq!(tx.info().await, None);
        assert_eq!(FakeState::count(&driver.state.commits), 1);
    }

    #[tokio::test]
    async fn test_begin_rollback_returns_to_idle() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        tx.begin(&client, &ctx).await.unwrap();
        tx.rollback(&ctx).await.unwrap();
        assert!(!tx.is_active().await);
        assert_eq!(FakeState::count(&driver.state.aborts), 1);
        assert_eq!(FakeState::count(&driver.state.commits), 0);
    }

    #[tokio::test]
    async fn test_second_begin_keeps_first_session() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        let first = tx.begin(&client, &ctx).await.unwrap();
        let err = tx.begin(&client, &ctx).await.unwrap_err();
        assert!(
            matches!(err, AdapterError::SessionAlreadyExists { ref transaction_id } if *transaction_id == first.id)
        );
        assert_eq!(tx.info().await.map(|i| i.id), Some(first.id));
        assert_eq!(tx.session().await.unwrap().id, 1);
        assert_eq!(FakeState::count(&driver.state.sessions_started), 1);
    }

    #[tokio::test]
    async fn test_commit_and_rollback_require_active_transaction() {
        let (driver, _client, tx) = setup().await;
        let ctx = Context::background();

        let err = tx.commit(&ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::NoActiveTransaction { ref operation } if operation == "commit"));
        let err = tx.rollback(&ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::NoActiveTransaction { ref operation } if operation == "rollback"));
        assert!(!tx.is_active().await);
        assert_eq!(FakeState::count(&driver.state.commits), 0);
        assert_eq!(FakeState::count(&driver.state.aborts), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_transaction_active() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        let info = tx.begin(&client, &ctx).await.unwrap();
        FakeState::set(&driver.state.fail_commit, true);
        let err = tx.commit(&ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::Operation { .. }));
        assert!(tx.is_active().await);
        assert_eq!(tx.info().await.map(|i| i.id), Some(info.id));

        // Retry succeeds once the driver recovers.
        FakeState::set(&driver.state.fail_commit, false);
        tx.commit(&ctx).await.unwrap();
        assert!(!tx.is_active().await);
    }

    #[tokio::test]
    async fn test_failed_commit_then_rollback() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        tx.begin(&client, &ctx).await.unwrap();
        FakeState::set(&driver.state.fail_commit, true);
        assert!(tx.commit(&ctx).await.is_err());
        tx.rollback(&ctx).await.unwrap();
        assert!(!tx.is_active().await);
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_transaction_active() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        tx.begin(&client, &ctx).await.unwrap();
        FakeState::set(&driver.state.fail_abort, true);
        assert!(tx.rollback(&ctx).await.is_err());
        assert!(tx.is_active().await);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_idle() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        FakeState::set(&driver.state.fail_start_session, true);
        let err = tx.begin(&client, &ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::Operation { .. }));
        assert!(!tx.is_active().await);

        FakeState::set(&driver.state.fail_start_session, false);
        FakeState::set(&driver.state.fail_start_transaction, true);
        assert!(tx.begin(&client, &ctx).await.is_err());
        assert!(!tx.is_active().await);

        FakeState::set(&driver.state.fail_start_transaction, false);
        tx.begin(&client, &ctx).await.unwrap();
        assert!(tx.is_active().await);
    }

    #[tokio::test]
    async fn test_cancelled_commit_keeps_transaction_active() {
        let (_driver, client, tx) = setup().await;
        let ctx = Context::background();
        tx.begin(&client, &ctx).await.unwrap();

        let cancelled = Context::background();
        cancelled.cancel();
        let err = tx.commit(&cancelled).await.unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));
        assert!(tx.is_active().await);
    }

    #[tokio::test]
    async fn test_session_access_requires_active_transaction() {
        let (_driver, client, tx) = setup().await;
        let ctx = Context::background();

        assert!(matches!(
            tx.session().await,
            Err(AdapterError::NoActiveTransaction { .. })
        ));

        tx.begin(&client, &ctx).await.unwrap();
        let session = tx.session().await.unwrap();
        assert_eq!(session.id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_deadline_while_session_borrowed() {
        let (driver, client, tx) = setup().await;
        tx.begin(&client, &Context::background()).await.unwrap();

        let session = tx.session().await.unwrap();
        let err = tx
            .commit(&Context::with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DeadlineExceeded { ref operation } if operation == "commit"));
        drop(session);

        assert!(tx.is_active().await);
        assert_eq!(FakeState::count(&driver.state.commits), 0);
        tx.commit(&Context::background()).await.unwrap();
        assert!(!tx.is_active().await);
    }

    #[tokio::test]
    async fn test_begin_cancelled_while_session_borrowed() {
        let (driver, client, tx) = setup().await;
        tx.begin(&client, &Context::background()).await.unwrap();

        let _session = tx.session().await.unwrap();
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = tx.begin(&client, &ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));
        assert_eq!(FakeState::count(&driver.state.sessions_started), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_gives_up_on_borrowed_session() {
        let (driver, client, tx) = setup().await;
        tx.begin(&client, &Context::background()).await.unwrap();

        let session = tx.session().await.unwrap();
        tx.abandon(&Context::with_timeout(Duration::from_millis(50)))
            .await;
        drop(session);

        assert!(tx.is_active().await);
        assert_eq!(FakeState::count(&driver.state.aborts), 0);
    }

    #[tokio::test]
    async fn test_abandon_aborts_open_transaction() {
        let (driver, client, tx) = setup().await;
        let ctx = Context::background();

        tx.abandon(&ctx).await;
        assert_eq!(FakeState::count(&driver.state.aborts), 0);

        tx.begin(&client, &ctx).await.unwrap();
        FakeState::set(&driver.state.fail_abort, true);
        tx.abandon(&ctx).await;
        assert!(!tx.is_active().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_begin_opens_one_session() {
        let (driver, client, tx) = setup().await;
        let tx = Arc::new(tx);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tx = Arc::clone(&tx);
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                tx.begin(&client, &Context::with_timeout(Duration::from_secs(5)))
                    .await
            }));
        }

        let mut opened = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(e) => assert!(e.is_sequencing(), "unexpected error: {e}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(FakeState::count(&driver.state.sessions_started), 1);
    }
}
