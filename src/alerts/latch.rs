//! Manual alert latch
//!
//! Nurses or patients can raise and clear an alert by hand. The latch is
//! independent of rule evaluation; concurrent toggles resolve last write wins.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct ManualAlertLatch {
    states: DashMap<i64, bool>,
}

impl ManualAlertLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, patient_id: i64) {
        self.states.insert(patient_id, true);
        tracing::info!(patient_id, "Manual alert triggered");
    }

    pub fn untrigger(&self, patient_id: i64) {
        self.states.insert(patient_id, false);
        tracing::info!(patient_id, "Manual alert cleared");
    }

    /// Whether a manual alert is raised. Unknown patients are inactive.
    pub fn is_active(&self, patient_id: i64) -> bool {
        self.states.get(&patient_id).map(|s| *s).unwrap_or(false)
    }

    /// Patients with an active manual alert, ascending
    pub fn active_patients(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .states
            .iter()
            .filter(|e| *e.value())
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }
}
