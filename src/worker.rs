//! Background worker that runs one bootstrap at a time on demand.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

use crate::stats::RunStats;

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Interval,
    Signal,
    Manual,
}

/// Owns the worker task. Runs once at start, then once per received
/// [`Trigger`], sequentially. A run that panics is logged and the worker
/// keeps serving triggers.
pub struct BootstrapWorker {
    triggers: mpsc::Sender<Trigger>,
    last_run: watch::Receiver<Option<RunStats>>,
    handle: JoinHandle<()>,
}

impl BootstrapWorker {
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: Fn(Trigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunStats> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(8);
        let (stats_tx, stats_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let mut trigger = Trigger::Startup;
            loop {
                let span = tracing::info_span!("bootstrap_run", trigger = ?trigger);
                match tokio::spawn(run(trigger).instrument(span)).await {
                    Ok(stats) => {
                        let _ = stats_tx.send(Some(stats));
                    }
                    Err(e) => error!(error = %e, ?trigger, "Bootstrap run aborted"),
                }
                match rx.recv().await {
                    Some(next) => trigger = next,
                    None => break,
                }
            }
            info!("Bootstrap worker stopped");
        });

        Self {
            triggers: tx,
            last_run: stats_rx,
            handle,
        }
    }

    /// A handle for requesting runs from other tasks.
    pub fn sender(&self) -> mpsc::Sender<Trigger> {
        self.triggers.clone()
    }

    /// Requests another run after the current one.
    pub async fn trigger(&self, trigger: Trigger) -> Result<()> {
        self.triggers
            .send(trigger)
            .await
            .map_err(|_| anyhow::anyhow!("bootstrap worker has stopped"))
    }

    /// Stats of the most recent completed run.
    pub fn subscribe(&self) -> watch::Receiver<Option<RunStats>> {
        self.last_run.clone()
    }

    /// Stops accepting triggers from this handle and waits for the worker to
    /// drain. Other senders keep it alive until they are dropped.
    pub async fn join(self) {
        drop(self.triggers);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Bootstrap worker task failed");
        }
    }
}

/// Sends [`Trigger::Interval`] every `every`, starting one period from now.
pub fn spawn_interval(sender: mpsc::Sender<Trigger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            if sender.send(Trigger::Interval).await.is_err() {
                break;
            }
        }
    })
}

/// Sends [`Trigger::Signal`] on every SIGHUP.
#[cfg(unix)]
pub fn spawn_sighup(sender: mpsc::Sender<Trigger>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, scheduling bootstrap");
            if sender.send(Trigger::Signal).await.is_err() {
                warn!("Bootstrap worker gone, ignoring SIGHUP");
                break;
            }
        }
    }))
}
