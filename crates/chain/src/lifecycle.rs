//! Lifecycle controller: waits for shutdown, then drains the client.
//!
//! The controller owns the single top-level [`CancellationToken`]. Operating
//! system signals and programmatic calls to [`Lifecycle::shutdown`] both cancel
//! it; every blocking stage of the process observes it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{DrainReport, NscClient};

/// Owns the shutdown token and sequences teardown.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    shutdown: CancellationToken,
}

impl Lifecycle {
    /// Creates a controller whose shutdown has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the shutdown token for stages that must observe it.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests shutdown programmatically.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels the shutdown token on SIGINT, SIGTERM, SIGHUP or SIGQUIT.
    ///
    /// Handlers are installed before this returns, so a signal delivered
    /// afterwards is never missed.
    #[cfg(unix)]
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut quit = signal(SignalKind::quit())?;
        let shutdown = self.shutdown.clone();

        Ok(tokio::spawn(async move {
            let received = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = hangup.recv() => "SIGHUP",
                _ = quit.recv() => "SIGQUIT",
                () = shutdown.cancelled() => return,
            };
            tracing::info!(signal = received, "shutdown signal received");
            shutdown.cancel();
        }))
    }

    /// Cancels the shutdown token on Ctrl-C.
    #[cfg(not(unix))]
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::error!(error = %err, "failed to listen for Ctrl-C");
                    }
                }
                () = shutdown.cancelled() => return,
            }
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }))
    }

    /// Blocks until shutdown is requested, then drains `client`.
    pub async fn run_until_shutdown(&self, client: &NscClient, grace: Duration) -> DrainReport {
        self.shutdown.cancelled().await;
        self.drain(client, grace).await
    }

    /// Drains `client` now, without waiting for shutdown.
    pub async fn drain(&self, client: &NscClient, grace: Duration) -> DrainReport {
        let report = client.drain_on_shutdown(grace).await;
        tracing::info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            "connections drained"
        );
        report
    }
}
