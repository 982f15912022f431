//! Reconnect supervisor: owns the single "current handle" slot.
//!
//! DESIGN
//! ======
//! The slot is a `watch` channel written only by one actor task. Readers
//! (`Supervisor::current`) take an `Arc` snapshot, so a request sees either
//! the old or the new handle for its whole duration, never a partially
//! built one. The actor reacts to three inputs:
//!
//! - failure notices from handles: ignored unless the notice names the
//!   handle currently installed and no rebuild is pending; otherwise the
//!   handle is closed and one rebuild is scheduled after the backoff delay
//! - the rebuild deadline: create a handle through the factory and publish it
//! - shutdown: cancel any pending rebuild, empty the slot, close the handle
//!
//! The stale handle stays in the slot during the backoff window. Callers
//! see its `Failed` state and treat it as unavailable.
//!
//! INVARIANTS
//! ==========
//! - At most one pending rebuild. Duplicate or stale notices never arm a
//!   second timer.
//! - Every genuine failure of the current handle arms exactly one rebuild,
//!   so the slot cannot stay stuck on a failed handle.
//! - A rebuild never fires sooner than the policy's base delay, and that
//!   delay has a floor above zero.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionFactory, ConnectionHandle, FailureNotice, FailureObserver, HandleId};
use super::target::Target;

pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Contents of the current-handle slot.
pub type Slot = Option<Arc<ConnectionHandle>>;

// =============================================================================
// BACKOFF POLICY
// =============================================================================

/// Constant delay plus optional uniform jitter. Jitter is only ever added,
/// so `next_delay() >= delay()` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
    jitter: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        Self { delay: delay.max(MIN_RECONNECT_DELAY), jitter }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, Duration::ZERO)
    }
}

// =============================================================================
// PUBLIC HANDLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The handle that was current has been closed.
    Released(HandleId),
    /// The slot was empty; nothing to release.
    NoHandle,
    /// Another caller already shut the supervisor down.
    AlreadyStopped,
}

enum Command {
    Shutdown(oneshot::Sender<ShutdownOutcome>),
}

/// Cheap-to-clone accessor for the supervised slot.
#[derive(Clone)]
pub struct Supervisor {
    slot: watch::Receiver<Slot>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Supervisor {
    /// Build the first handle (if a target resolved) and spawn the actor.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        target: Option<Target>,
        factory: Arc<dyn ConnectionFactory>,
        policy: ReconnectPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (slot_tx, slot_rx) = watch::channel(None);
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut actor = Actor {
            target,
            factory,
            policy,
            observer: FailureObserver::new(failures_tx),
            slot: slot_tx,
            next_id: 1,
            rebuild_at: None,
        };
        actor.install_initial();

        let task = tokio::spawn(actor.run(failures_rx, commands_rx));
        (Self { slot: slot_rx, commands: commands_tx }, task)
    }

    /// Snapshot of the current handle. May be `None`, or a handle that is
    /// not yet (or no longer) connected.
    #[must_use]
    pub fn current(&self) -> Slot {
        self.slot.borrow().clone()
    }

    /// Watch the slot for replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Slot> {
        self.slot.clone()
    }

    /// Stop supervising: cancel any pending rebuild and close the current
    /// handle. Safe to call more than once; only the first call releases.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply_tx)).is_err() {
            return ShutdownOutcome::AlreadyStopped;
        }
        reply_rx.await.unwrap_or(ShutdownOutcome::AlreadyStopped)
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct Actor {
    target: Option<Target>,
    factory: Arc<dyn ConnectionFactory>,
    policy: ReconnectPolicy,
    observer: FailureObserver,
    slot: watch::Sender<Slot>,
    next_id: u64,
    /// Deadline of the single pending rebuild, if any.
    rebuild_at: Option<Instant>,
}

impl Actor {
    fn install_initial(&mut self) {
        let Some(target) = self.target.clone() else {
            error!("no PostgreSQL target configured; serving without a database handle");
            return;
        };
        let handle = self.create(&target);
        info!(handle = %handle.id(), target = %target, "initial PostgreSQL handle created");
        self.slot.send_replace(Some(handle));
    }

    async fn run(
        mut self,
        mut failures: mpsc::UnboundedReceiver<FailureNotice>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            let rebuild_at = self.rebuild_at;
            tokio::select! {
                biased;

                command = commands.recv() => {
                    let outcome = self.release();
                    // `None` means every `Supervisor` clone was dropped.
                    if let Some(Command::Shutdown(reply)) = command {
                        let _ = reply.send(outcome);
                    }
                    break;
                }
                Some(notice) = failures.recv() => self.on_failure(notice),
                () = tokio::time::sleep_until(rebuild_at.unwrap_or_else(Instant::now)), if rebuild_at.is_some() => {
                    self.on_rebuild_due();
                }
            }
        }
        debug!("supervisor stopped");
    }

    fn current_id(&self) -> Option<HandleId> {
        self.slot.borrow().as_ref().map(|h| h.id())
    }

    fn on_failure(&mut self, notice: FailureNotice) {
        if self.current_id() != Some(notice.handle) {
            warn!(handle = %notice.handle, kind = %notice.kind, "ignoring failure from superseded handle");
            return;
        }
        if self.rebuild_at.is_some() {
            debug!(handle = %notice.handle, "rebuild already scheduled");
            return;
        }

        error!(
            handle = %notice.handle,
            kind = %notice.kind,
            code = notice.kind.error_code(),
            error = %notice.message,
            target = ?self.target,
            "PostgreSQL handle failed"
        );

        let stale = self.slot.borrow().clone();
        if let Some(stale) = stale {
            stale.close();
        }

        let delay = self.policy.next_delay();
        self.rebuild_at = Some(Instant::now() + delay);
        info!(
            handle = %notice.handle,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "rebuild scheduled"
        );
    }

    fn on_rebuild_due(&mut self) {
        self.rebuild_at = None;
        let Some(target) = self.target.clone() else {
            warn!("rebuild fired without a target");
            return;
        };

        let handle = self.create(&target);
        let id = handle.id();
        let previous = self.slot.send_replace(Some(handle));
        info!(
            handle = %id,
            replaced = ?previous.map(|h| h.id()),
            target = %target,
            "rebuilt PostgreSQL handle installed"
        );
    }

    fn release(&mut self) -> ShutdownOutcome {
        if self.rebuild_at.take().is_some() {
            info!("pending rebuild cancelled");
        }
        match self.slot.send_replace(None) {
            Some(handle) => {
                handle.close();
                info!(handle = %handle.id(), "PostgreSQL handle released");
                ShutdownOutcome::Released(handle.id())
            }
            None => ShutdownOutcome::NoHandle,
        }
    }

    fn create(&mut self, target: &Target) -> Arc<ConnectionHandle> {
        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.factory.create(target, id, self.observer.clone())
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod tests;
