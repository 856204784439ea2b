//! Periodic drivers.
//!
//! Two independent loops share the process: one refreshes the image index,
//! the other ticks the scheduler. Each runs until the shared
//! `CancellationToken` is cancelled. A failing or panicking iteration is
//! logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::index::{ImageIndex, ScanOutcome};
use crate::metrics::AppMetrics;
use crate::scheduler::MenuScheduler;

/// Run one scan on the blocking pool and record it.
pub async fn scan_once(index: &Arc<ImageIndex>, metrics: Option<&Arc<AppMetrics>>) {
    let task_index = index.clone();
    let outcome = match tokio::task::spawn_blocking(move || task_index.scan()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("Index scan task failed: {}", err);
            if let Some(metrics) = metrics {
                metrics.scan_errors_total.inc();
            }
            return;
        }
    };

    if let Some(metrics) = metrics {
        match &outcome {
            ScanOutcome::Failed(_) => metrics.scan_errors_total.inc(),
            ScanOutcome::Indexed { .. } | ScanOutcome::DirectoryMissing => {
                metrics.scans_total.inc()
            }
        }
        metrics.images_indexed.set(index.snapshot().len() as f64);
    }
}

/// Refresh the index every `interval`. The first refresh happens one
/// interval after start; the caller is expected to have scanned already.
pub async fn run_index_refresh(
    index: Arc<ImageIndex>,
    metrics: Option<Arc<AppMetrics>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Index refresh started (dir: {}, interval: {}s)",
        index.dir().display(),
        interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => scan_once(&index, metrics.as_ref()).await,
        }
    }

    tracing::info!("Index refresh stopped cleanly");
}

/// Tick the scheduler every `interval`, starting immediately. Each tick is
/// awaited before the next one is scheduled, so ticks never overlap.
pub async fn run_scheduler_ticks(
    scheduler: Arc<MenuScheduler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Scheduler started (interval: {}s)", interval.as_secs());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let scheduler = scheduler.clone();
                // Own task so a panic inside a tick cannot end the loop.
                if let Err(err) = tokio::spawn(async move { scheduler.tick().await }).await {
                    tracing::error!("Scheduler tick failed: {}", err);
                }
            }
        }
    }

    tracing::info!("Scheduler stopped cleanly");
}

/// Handles of the running drivers.
pub struct Drivers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Drivers {
    /// Spawn both loops. An index interval of zero disables periodic refresh.
    pub fn spawn(
        index: Arc<ImageIndex>,
        scheduler: Arc<MenuScheduler>,
        metrics: Option<Arc<AppMetrics>>,
        scan_interval: Duration,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut handles = Vec::new();

        if scan_interval.is_zero() {
            tracing::info!("SCAN_INTERVAL_SECONDS is 0; periodic index refresh disabled");
        } else {
            handles.push(tokio::spawn(run_index_refresh(
                index,
                metrics,
                scan_interval,
                cancel.child_token(),
            )));
        }

        handles.push(tokio::spawn(run_scheduler_ticks(
            scheduler,
            tick_interval,
            cancel.child_token(),
        )));

        Self { cancel, handles }
    }

    /// Cancel both loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!("Driver task ended abnormally: {}", err);
            }
        }
    }
}
