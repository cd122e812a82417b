use std::sync::atomic::{AtomicU64, Ordering};

/// Counts lines accepted and rejected across all ingestion adapters
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, count: u64) {
        self.accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, count: u64) {
        self.rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Fraction of lines rejected (0.0 when nothing was seen)
    pub fn rejection_ratio(&self) -> f64 {
        let accepted = self.accepted();
        let rejected = self.rejected();
        let total = accepted + rejected;
        if total == 0 {
            return 0.0;
        }
        rejected as f64 / total as f64
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot::from(self)
    }
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IngestSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub rejection_ratio: f64,
}

impl From<&IngestStats> for IngestSnapshot {
    fn from(stats: &IngestStats) -> Self {
        Self {
            accepted: stats.accepted(),
            rejected: stats.rejected(),
            rejection_ratio: stats.rejection_ratio(),
        }
    }
}
