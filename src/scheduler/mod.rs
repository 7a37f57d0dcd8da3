//! Scheduler module for running checks and tracking target state.

mod transition;
mod trigger;
mod uptime;

pub use transition::*;
pub use trigger::*;
pub use uptime::*;

use crate::db::{DbError, LogEntry, LogStore, Registry, Target};
use crate::probe::Probe;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};

/// Default number of targets probed at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Errors that abort a single target's check pipeline.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub checked: usize,
}

/// The per-target pipeline: probe, append the log, apply the state change.
struct Pipeline {
    registry: Arc<dyn Registry>,
    logs: Arc<dyn LogStore>,
    prober: Arc<dyn Probe>,
    tracker: StateTracker,
}

impl Pipeline {
    async fn check(&self, target: &Target) -> Result<LogEntry, CheckError> {
        let result = self.prober.probe(target.id, &target.url).await;
        let mut entry = LogEntry::from(&result);
        self.logs.append_log(&mut entry)?;

        tracing::debug!(
            target_id = target.id,
            "Checked {}: {} (code {}, {} ms) {}",
            target.name,
            entry.status,
            entry.status_code,
            entry.response_time,
            entry.error_detail().unwrap_or_default()
        );

        // The log row is already committed; a failed state update is retried
        // implicitly by the next check.
        match self.tracker.apply(target, &entry).await {
            Ok(t) if t.transitioned => {
                let edge = t.event.as_ref().map(|e| e.edge);
                tracing::debug!(target_id = target.id, "Scheduler: {} transitioned {:?}", target.name, edge);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Scheduler: state update for {} failed: {}", target.name, e);
            }
        }

        Ok(entry)
    }
}

/// Orchestrates checks over all registered targets.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn Registry>,
        logs: Arc<dyn LogStore>,
        prober: Arc<dyn Probe>,
        tracker: StateTracker,
        concurrency: usize,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                registry,
                logs,
                prober,
                tracker,
            }),
            concurrency: concurrency.max(1),
        }
    }

    /// Check every registered target with at most `concurrency` checks in flight.
    ///
    /// Workers claim targets through a shared counter until the list is
    /// exhausted. A target whose pipeline errors is logged and left out of
    /// `checked`; it never stops the other workers.
    pub async fn check_all(&self) -> Result<SweepSummary, CheckError> {
        let targets = Arc::new(self.pipeline.registry.list_targets()?);
        let total = targets.len();
        if total == 0 {
            return Ok(SweepSummary { total: 0, checked: 0 });
        }

        tracing::info!("Scheduler: sweeping {} targets", total);

        let next = Arc::new(AtomicUsize::new(0));
        let checked = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for _ in 0..self.concurrency.min(total) {
            let pipeline = self.pipeline.clone();
            let targets = targets.clone();
            let next = next.clone();
            let checked = checked.clone();

            workers.spawn(async move {
                loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(target) = targets.get(i) else {
                        break;
                    };

                    match pipeline.check(target).await {
                        Ok(_) => {
                            checked.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            tracing::error!("Scheduler: check failed for {}: {}", target.name, e);
                        }
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Scheduler: worker aborted: {}", e);
            }
        }

        let summary = SweepSummary {
            total,
            checked: checked.load(Ordering::SeqCst),
        };
        tracing::info!("Scheduler: sweep done, {}/{} checked", summary.checked, summary.total);
        Ok(summary)
    }

    /// Check a single target immediately, bypassing the worker pool.
    pub async fn check_one(&self, target: &Target) -> Result<LogEntry, CheckError> {
        self.pipeline.check(target).await
    }

    /// Registration hook: run one check for a newly created target in the background.
    pub fn on_target_created(&self, target: Target) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.check(&target).await {
                tracing::error!("Scheduler: initial check for {} failed: {}", target.name, e);
            }
        })
    }

    /// Kick off a sweep without waiting for it.
    pub fn spawn_sweep(&self, reason: &'static str) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.check_all().await {
                tracing::error!("Scheduler: {} sweep failed: {}", reason, e);
            }
        })
    }
}
