//! Graceful shutdown on SIGINT, SIGTERM, or SIGHUP.
//!
//! DESIGN
//! ======
//! All three signals feed one latch. The first trigger wins and records which
//! signal it was; later triggers are logged and dropped. The HTTP server
//! waits on the latch to stop accepting connections and drain in-flight
//! responses, then `release` closes the database handle exactly once and
//! `main` returns a success exit code.
//!
//! ERROR HANDLING
//! ==============
//! Cleanup failures are logged, never propagated. Shutdown always completes.

use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::supervisor::{ShutdownOutcome, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
        })
    }
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    latch: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (latch, _) = watch::channel(None);
        Self { latch: Arc::new(latch) }
    }

    /// Record a shutdown request. Returns `true` only for the first one.
    pub fn trigger(&self, signal: ShutdownSignal) -> bool {
        let first = self.latch.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });
        if first {
            info!(%signal, "shutdown requested; closing the web server gracefully");
        } else {
            warn!(%signal, "shutdown already in progress; ignoring signal");
        }
        first
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.latch.borrow().is_some()
    }

    /// Resolve once the first trigger has fired.
    pub async fn triggered(&self) -> ShutdownSignal {
        let mut rx = self.latch.subscribe();
        let signal = match rx.wait_for(Option::is_some).await {
            Ok(signal) => *signal,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => None,
        };
        signal.unwrap_or(ShutdownSignal::Terminate)
    }

    /// Install OS signal handlers that feed the latch until the process exits.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.signal_loop().await {
                error!(error = %e, "failed to install signal handlers");
            }
        })
    }

    #[cfg(unix)]
    async fn signal_loop(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        loop {
            let received = tokio::select! {
                _ = interrupt.recv() => ShutdownSignal::Interrupt,
                _ = terminate.recv() => ShutdownSignal::Terminate,
                _ = hangup.recv() => ShutdownSignal::Hangup,
            };
            self.trigger(received);
        }
    }

    #[cfg(not(unix))]
    async fn signal_loop(&self) -> std::io::Result<()> {
        loop {
            tokio::signal::ctrl_c().await?;
            self.trigger(ShutdownSignal::Interrupt);
        }
    }

    /// Drive `server` (already wired to stop on [`Self::triggered`]) to
    /// completion, bounded by `grace` once shutdown begins, then release the
    /// database handle.
    pub async fn run_until_shutdown<F>(&self, server: F, supervisor: &Supervisor, grace: Duration) -> ExitCode
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let drain_deadline = async {
            let signal = self.triggered().await;
            tokio::time::sleep(grace).await;
            signal
        };

        let code = tokio::select! {
            result = server => match result {
                Ok(()) => {
                    info!("the web server closed");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "web server failed");
                    ExitCode::FAILURE
                }
            },
            signal = drain_deadline => {
                warn!(%signal, grace_secs = grace.as_secs(), "in-flight requests did not drain in time");
                ExitCode::SUCCESS
            }
        };

        self.release(supervisor).await;
        code
    }

    /// Release the database handle. Idempotent through the supervisor.
    pub async fn release(&self, supervisor: &Supervisor) -> ShutdownOutcome {
        let outcome = supervisor.shutdown().await;
        match outcome {
            ShutdownOutcome::Released(handle) => info!(%handle, "database handle released"),
            ShutdownOutcome::NoHandle => info!("no database handle to release"),
            ShutdownOutcome::AlreadyStopped => warn!("database handle already released"),
        }
        outcome
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod tests;
