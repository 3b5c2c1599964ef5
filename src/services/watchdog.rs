//! Heartbeat watchdog.
//!
//! Turns worker silence into a state transition: overdue `in_progress` jobs
//! are put back on the queue until `max_retries` reclaims have been spent,
//! then failed for good. Each pass also re-enqueues `pending` jobs that have
//! sat untouched past the stranded grace period and are no longer on the
//! queue, which covers a crash between a store write and the matching push.
//!
//! Ages are handed to the store, which measures them against its own clock,
//! so the watchdog host's clock never decides whether a job is overdue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{JobStore, StoreError};
use crate::models::job::ReclaimOutcome;
use crate::services::queue::WorkQueue;

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub overdue_threshold: Duration,
    pub max_retries: i32,
    pub stranded_grace: Duration,
}

impl WatchdogSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.watchdog_interval(),
            overdue_threshold: config.overdue_threshold(),
            max_retries: config.max_retries,
            stranded_grace: config.stranded_grace(),
        }
    }
}

/// Tally of one watchdog pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub overdue: usize,
    pub requeued: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stranded: usize,
    /// Stranded by age but still waiting on the queue, so not pushed again.
    pub backlogged: usize,
    pub errors: usize,
}

pub struct Watchdog {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    settings: WatchdogSettings,
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    /// Scan every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval = ?self.settings.interval,
            overdue_threshold = ?self.settings.overdue_threshold,
            max_retries = self.settings.max_retries,
            "Starting watchdog"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => match self.scan_once().await {
                    Ok(report) if report.overdue > 0 || report.stranded > 0 => {
                        tracing::info!(?report, "Watchdog pass complete");
                    }
                    Ok(_) => tracing::debug!("No overdue jobs found"),
                    Err(e) => {
                        metrics::counter!("watchdog_errors_total", "stage" => "scan").increment(1);
                        tracing::error!(error = %e, "Watchdog pass failed");
                    }
                },
            }
        }

        tracing::info!("Watchdog stopped");
    }

    /// One pass: the stranded sweep, then reclaim of overdue jobs.
    pub async fn scan_once(&self) -> Result<ScanReport, WatchdogError> {
        let mut report = ScanReport::default();

        self.sweep_stranded(&mut report).await;

        let threshold = self.settings.overdue_threshold;
        let overdue = self.store.list_overdue(threshold).await?;
        report.overdue = overdue.len();
        if !overdue.is_empty() {
            metrics::counter!("watchdog_overdue_jobs_total").increment(overdue.len() as u64);
            tracing::info!(count = overdue.len(), "Found overdue jobs");
        }

        for (job_id, retry_count) in overdue {
            match self
                .store
                .reclaim_or_fail(job_id, self.settings.max_retries, threshold)
                .await
            {
                Ok(ReclaimOutcome::Requeued { retry_count }) => {
                    if self.push(job_id, "requeue").await {
                        report.requeued += 1;
                        metrics::counter!("watchdog_requeued_jobs_total").increment(1);
                        tracing::info!(job_id = %job_id, retry_count, "Requeued stalled job");
                    } else {
                        report.errors += 1;
                    }
                }
                Ok(ReclaimOutcome::PermanentlyFailed) => {
                    report.failed += 1;
                    metrics::counter!("watchdog_failed_jobs_total").increment(1);
                    tracing::warn!(job_id = %job_id, retry_count, "Marking job as failed, retries exhausted");
                }
                Ok(ReclaimOutcome::Skipped) => {
                    report.skipped += 1;
                    tracing::debug!(job_id = %job_id, "Job no longer overdue, skipping");
                }
                Err(e) => {
                    report.errors += 1;
                    metrics::counter!("watchdog_errors_total", "stage" => "reclaim").increment(1);
                    tracing::error!(job_id = %job_id, error = %e, "Failed to reclaim job");
                }
            }
        }

        Ok(report)
    }

    async fn sweep_stranded(&self, report: &mut ScanReport) {
        let stranded = match self.store.requeue_stranded(self.settings.stranded_grace).await {
            Ok(ids) => ids,
            Err(e) => {
                report.errors += 1;
                metrics::counter!("watchdog_errors_total", "stage" => "stranded").increment(1);
                tracing::error!(error = %e, "Failed to sweep stranded jobs");
                return;
            }
        };
        if stranded.is_empty() {
            return;
        }

        // A long backlog ages pending jobs that are still queued; pushing
        // those again would only grow the backlog.
        let queued = match self.queue.queued_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read queue contents, re-enqueueing all stranded jobs");
                HashSet::new()
            }
        };

        for job_id in stranded {
            if queued.contains(&job_id) {
                report.backlogged += 1;
                tracing::debug!(job_id = %job_id, "Stranded job is still queued, leaving it");
                continue;
            }
            if self.push(job_id, "stranded").await {
                report.stranded += 1;
                metrics::counter!("watchdog_stranded_jobs_total").increment(1);
                tracing::info!(job_id = %job_id, "Re-enqueued stranded pending job");
            } else {
                report.errors += 1;
            }
        }
    }

    /// Enqueue, logging a failure. A job that misses the queue here stays
    /// `pending` and is picked up by a later stranded sweep.
    async fn push(&self, job_id: Uuid, stage: &'static str) -> bool {
        match self.queue.enqueue(job_id).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("watchdog_errors_total", "stage" => stage).increment(1);
                tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue job");
                false
            }
        }
    }
}

/// Register descriptions for the metrics the watchdog records.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "watchdog_overdue_jobs_total",
        "In-progress jobs found with a stale heartbeat"
    );
    metrics::describe_counter!(
        "watchdog_requeued_jobs_total",
        "Overdue jobs put back on the queue"
    );
    metrics::describe_counter!(
        "watchdog_failed_jobs_total",
        "Overdue jobs failed after exhausting their retries"
    );
    metrics::describe_counter!(
        "watchdog_stranded_jobs_total",
        "Pending jobs re-enqueued by the stranded sweep"
    );
    metrics::describe_counter!("watchdog_errors_total", "Watchdog store and queue errors");
}

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}
