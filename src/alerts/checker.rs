//! Background alert checker

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::interval;

use super::engine::{EvaluationSummary, RuleEngine};
use super::latch::ManualAlertLatch;

/// Result of one checker pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CheckReport {
    pub summary: EvaluationSummary,
    /// Patients with a manual alert raised at the time of the pass
    pub manual_alerts: Vec<i64>,
    /// Wall clock time of the pass
    pub checked_at: i64,
}

/// Periodically evaluates every known patient
pub struct AlertChecker {
    engine: Arc<RuleEngine>,
    latch: Arc<ManualAlertLatch>,
    pool: Arc<rayon::ThreadPool>,
    last_report: Arc<Mutex<Option<CheckReport>>>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl AlertChecker {
    /// Create a checker evaluating on `threads` workers
    pub fn new(
        engine: Arc<RuleEngine>,
        latch: Arc<ManualAlertLatch>,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("vitalwatch-eval-{}", i))
            .build()?;

        Ok(Self {
            engine,
            latch,
            pool: Arc::new(pool),
            last_report: Arc::new(Mutex::new(None)),
            shutdown_tx: None,
        })
    }

    /// Create a checker sized to the machine
    pub fn with_default_threads(
        engine: Arc<RuleEngine>,
        latch: Arc<ManualAlertLatch>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        Self::new(engine, latch, num_cpus::get())
    }

    /// Evaluate every patient once, blocking the calling thread
    pub fn check_now(&self) -> CheckReport {
        Self::run_pass(&self.engine, &self.latch, &self.pool, &self.last_report)
    }

    /// Report from the most recent pass
    pub fn last_report(&self) -> Option<CheckReport> {
        self.last_report.lock().clone()
    }

    /// Start the background checker
    pub fn start(&mut self, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = Arc::clone(&self.engine);
        let latch = Arc::clone(&self.latch);
        let pool = Arc::clone(&self.pool);
        let last_report = Arc::clone(&self.last_report);

        tokio::spawn(async move {
            tracing::info!("Alert checker started with interval {:?}", check_interval);
            let mut ticker = interval(check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let engine = Arc::clone(&engine);
                        let latch = Arc::clone(&latch);
                        let pool = Arc::clone(&pool);
                        let last_report = Arc::clone(&last_report);

                        // Evaluation is CPU bound; keep it off the async workers
                        let pass = tokio::task::spawn_blocking(move || {
                            Self::run_pass(&engine, &latch, &pool, &last_report)
                        });
                        if let Err(e) = pass.await {
                            tracing::error!(error = %e, "Alert check pass panicked");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Alert checker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background checker
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    fn run_pass(
        engine: &RuleEngine,
        latch: &ManualAlertLatch,
        pool: &rayon::ThreadPool,
        last_report: &Mutex<Option<CheckReport>>,
    ) -> CheckReport {
        let checked_at = chrono::Utc::now().timestamp_millis();
        let summary = pool.install(|| engine.evaluate_all_at(checked_at));

        let manual_alerts = latch.active_patients();
        for patient_id in &manual_alerts {
            tracing::warn!(patient_id, "Manual alert active");
        }

        if summary.alerts > 0 || !summary.failed.is_empty() {
            tracing::info!(
                patients = summary.patients,
                alerts = summary.alerts,
                failed = summary.failed.len(),
                "Alert check pass complete"
            );
        } else {
            tracing::debug!(patients = summary.patients, "Alert check pass complete");
        }

        let report = CheckReport {
            summary,
            manual_alerts,
            checked_at,
        };
        *last_report.lock() = Some(report.clone());
        report
    }
}
