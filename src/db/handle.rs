//! Connection handles and the factory that builds them.
//!
//! DESIGN
//! ======
//! A `ConnectionHandle` wraps one `tokio-postgres` session to one target and
//! moves `Created → Connected → Failed` (or `Created → Failed`), never back.
//! Construction is synchronous: `PgConnectionFactory::create` returns the
//! handle immediately and spawns a driver task that performs the handshake
//! and then polls the connection future. When that future ends, for any
//! reason, the transport is gone.
//!
//! Each handle carries a one-shot failure observer. It fires at most once,
//! on handshake failure, transport loss, or explicit `close()`, and delivers
//! a `FailureNotice` tagged with the handle's id so the supervisor can tell
//! the current handle from a superseded one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_postgres::{Client, NoTls};
use tracing::info;

use super::target::Target;

// =============================================================================
// IDENTITY + STATE
// =============================================================================

/// Process-unique, monotonically increasing handle identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Created,
    Connected,
    Failed,
}

impl HandleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Connected,
            _ => Self::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Connected => 1,
            Self::Failed => 2,
        }
    }
}

// =============================================================================
// FAILURE NOTIFICATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    /// The asynchronous connect was rejected.
    #[error("handshake failed")]
    HandshakeFailed,
    /// An established session dropped.
    #[error("transport lost")]
    TransportLost,
    /// `close()` was called on the handle.
    #[error("closed")]
    Closed,
}

impl FailureKind {
    #[must_use]
    pub fn error_code(self) -> &'static str {
        match self {
            Self::HandshakeFailed => "E_HANDSHAKE_FAILED",
            Self::TransportLost => "E_TRANSPORT_LOST",
            Self::Closed => "E_CLOSED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureNotice {
    pub handle: HandleId,
    pub kind: FailureKind,
    pub message: String,
}

/// Sending half of the supervisor's failure channel, one clone per handle.
#[derive(Clone)]
pub struct FailureObserver {
    tx: mpsc::UnboundedSender<FailureNotice>,
}

impl FailureObserver {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<FailureNotice>) -> Self {
        Self { tx }
    }

    pub(crate) fn notify(&self, notice: FailureNotice) {
        // Receiver gone means the supervisor has stopped; nobody to rebuild.
        let _ = self.tx.send(notice);
    }
}

// =============================================================================
// HANDLE
// =============================================================================

pub struct ConnectionHandle {
    id: HandleId,
    target: Target,
    state: AtomicU8,
    client: OnceLock<Client>,
    observer: FailureObserver,
    /// Set once the observer has fired.
    reported: AtomicBool,
    /// Set once `close()` has run.
    closed: AtomicBool,
    driver: Mutex<Option<AbortHandle>>,
}

impl ConnectionHandle {
    /// A handle in `Created` state with no transport attached yet.
    #[must_use]
    pub fn new(id: HandleId, target: Target, observer: FailureObserver) -> Self {
        Self {
            id,
            target,
            state: AtomicU8::new(HandleState::Created.as_u8()),
            client: OnceLock::new(),
            observer,
            reported: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            driver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The session client, only while the handle is `Connected`.
    #[must_use]
    pub fn client(&self) -> Option<&Client> {
        if self.state() == HandleState::Connected {
            self.client.get()
        } else {
            None
        }
    }

    /// Install the client produced by a successful handshake.
    /// Returns `false` if the handle already failed or was closed.
    pub(crate) fn attach(&self, client: Client) -> bool {
        if self.client.set(client).is_err() {
            return false;
        }
        self.state
            .compare_exchange(
                HandleState::Created.as_u8(),
                HandleState::Connected.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Register the background task that owns the transport.
    pub(crate) fn set_driver(&self, driver: AbortHandle) {
        let mut slot = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            driver.abort();
            return;
        }
        *slot = Some(driver);
    }

    /// Mark the handle `Failed` and fire the observer if it has not fired yet.
    pub(crate) fn fail(&self, kind: FailureKind, message: impl Into<String>) {
        self.state.store(HandleState::Failed.as_u8(), Ordering::Release);
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        self.observer.notify(FailureNotice { handle: self.id, kind, message: message.into() });
    }

    /// Release the transport. Idempotent: returns `true` only for the call
    /// that actually closed the handle.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
        self.fail(FailureKind::Closed, "handle closed");
        true
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Builds handles for the supervisor. `create` must not block on I/O and is
/// only ever called with a resolved target.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, target: &Target, id: HandleId, observer: FailureObserver) -> Arc<ConnectionHandle>;
}

/// Real factory: spawns a `tokio-postgres` handshake + driver task per handle.
pub struct PgConnectionFactory {
    connect_timeout: Duration,
}

impl PgConnectionFactory {
    /// `connect_timeout` applies only when the target's string sets none.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ConnectionFactory for PgConnectionFactory {
    fn create(&self, target: &Target, id: HandleId, observer: FailureObserver) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(id, target.clone(), observer));

        let mut config = target.pg_config().clone();
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(self.connect_timeout);
        }

        let task = tokio::spawn(drive(Arc::clone(&handle), config));
        handle.set_driver(task.abort_handle());
        handle
    }
}

/// Handshake, then hold the session open until the transport ends.
async fn drive(handle: Arc<ConnectionHandle>, config: tokio_postgres::Config) {
    let (client, connection) = match config.connect(NoTls).await {
        Ok(pair) => pair,
        Err(e) => {
            handle.fail(FailureKind::HandshakeFailed, e.to_string());
            return;
        }
    };

    if !handle.attach(client) {
        return;
    }
    info!(handle = %handle.id(), target = %handle.target(), "connected to PostgreSQL");

    // The supervisor logs the failure once it accepts the notice.
    match connection.await {
        Ok(()) => handle.fail(FailureKind::TransportLost, "connection closed by server"),
        Err(e) => handle.fail(FailureKind::TransportLost, e.to_string()),
    }
}

#[cfg(test)]
#[path = "handle_test.rs"]
mod tests;
