//! Periodic integrity check

use crate::config::IntegrityConfig;
use crate::engine::PolicyEngine;
use overlay_core::TransactionalStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Background task running the full integrity check on a timer
pub struct IntegrityScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    runs: Arc<AtomicU64>,
}

impl IntegrityScheduler {
    /// Start the scheduler with `config.interval_secs` between runs
    ///
    /// Must be called from within a tokio runtime. The first run starts
    /// immediately.
    pub fn spawn<S>(engine: Arc<PolicyEngine<S>>, config: &IntegrityConfig) -> Self
    where
        S: TransactionalStore + 'static,
    {
        Self::spawn_with_period(engine, Duration::from_secs(config.interval_secs), config.repair)
    }

    /// Start the scheduler with an explicit period
    pub fn spawn_with_period<S>(engine: Arc<PolicyEngine<S>>, period: Duration, repair: bool) -> Self
    where
        S: TransactionalStore + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let runs = Arc::new(AtomicU64::new(0));
        let run_counter = runs.clone();

        info!(period_secs = period.as_secs_f64(), repair, "integrity scheduler started");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.changed() => break,
                }

                let engine = engine.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    engine.run_full_integrity_check(repair, |discrepancy, fixed| {
                        warn!(kind = ?discrepancy.kind(), fixed, "{}", discrepancy);
                    })
                })
                .await;

                match outcome {
                    Ok(Ok(reports)) => {
                        let found: usize = reports.iter().map(|r| r.discrepancies.len()).sum();
                        info!(discrepancies = found, "scheduled integrity check complete");
                    }
                    Ok(Err(e)) => error!("scheduled integrity check failed: {}", e),
                    Err(e) => error!("integrity check task panicked: {}", e),
                }
                run_counter.fetch_add(1, Ordering::SeqCst);
            }

            info!("integrity scheduler stopped");
        });

        Self {
            shutdown,
            handle,
            runs,
        }
    }

    /// Completed runs so far
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("integrity scheduler task failed: {}", e);
        }
    }
}
