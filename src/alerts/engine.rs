//! Rule evaluation over store windows

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use super::compose::DeliveryStage;
use super::config::{DeliveryPolicy, RuleSetConfig};
use super::event::{AlertEvent, AlertKind};
use super::rules::AlertRule;
use super::sink::AlertSink;
use crate::data::PatientRecord;
use crate::storage::{PatientStore, StorageError};

/// Runs the configured rules against a single snapshot per patient and
/// forwards what fires to the sink, in rule order.
///
/// Each call is independent: nothing is remembered between evaluations
/// unless a delivery policy with a repeat interval is configured.
pub struct RuleEngine {
    store: Arc<PatientStore>,
    rules: Vec<Box<dyn AlertRule>>,
    sink: Arc<dyn AlertSink>,
    delivery: DeliveryStage,
}

impl RuleEngine {
    pub fn new(
        store: Arc<PatientStore>,
        rules: Vec<Box<dyn AlertRule>>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            rules,
            sink,
            delivery: DeliveryStage::new(DeliveryPolicy::default()),
        }
    }

    /// Build the rules and delivery policy from configuration
    pub fn from_config(
        store: Arc<PatientStore>,
        config: &RuleSetConfig,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self::new(store, config.build_rules(), sink).with_delivery(config.delivery.clone())
    }

    pub fn with_delivery(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery = DeliveryStage::new(policy);
        self
    }

    pub fn store(&self) -> &Arc<PatientStore> {
        &self.store
    }

    /// Kinds of the active rules, in evaluation order
    pub fn rule_kinds(&self) -> Vec<AlertKind> {
        self.rules.iter().map(|r| r.kind()).collect()
    }

    /// Evaluate a patient's records up to the current time
    pub fn evaluate(&self, patient_id: i64) -> Result<Vec<AlertEvent>, StorageError> {
        self.evaluate_at(patient_id, chrono::Utc::now().timestamp_millis())
    }

    /// Evaluate the window `[0, now_ms]` and dispatch every alert raised.
    ///
    /// Returns all events the rules emitted, including any the delivery
    /// policy suppressed.
    pub fn evaluate_at(&self, patient_id: i64, now_ms: i64) -> Result<Vec<AlertEvent>, StorageError> {
        // The store lock is released once the snapshot is taken
        let window = self.store.window(patient_id, 0, now_ms)?;
        let events = self.evaluate_window(patient_id, &window);

        for event in &events {
            self.delivery
                .dispatch(event.clone(), self.sink.as_ref(), now_ms);
        }

        Ok(events)
    }

    /// Run every rule over a window without touching the sink
    pub fn evaluate_window(&self, patient_id: i64, window: &[PatientRecord]) -> Vec<AlertEvent> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(patient_id, window))
            .collect()
    }

    /// Evaluate every known patient in parallel on the current rayon pool
    pub fn evaluate_all_at(&self, now_ms: i64) -> EvaluationSummary {
        let ids: Vec<i64> = self.store.patient_ids().into_iter().collect();

        let results: Vec<(i64, Result<usize, StorageError>)> = ids
            .par_iter()
            .map(|&id| (id, self.evaluate_at(id, now_ms).map(|events| events.len())))
            .collect();

        let mut summary = EvaluationSummary {
            patients: ids.len(),
            ..Default::default()
        };
        for (patient_id, result) in results {
            match result {
                Ok(count) => summary.alerts += count,
                Err(e) => {
                    tracing::warn!(patient_id, error = %e, "Evaluation skipped");
                    summary.failed.push(patient_id);
                }
            }
        }
        summary
    }

    pub fn evaluate_all(&self) -> EvaluationSummary {
        self.evaluate_all_at(chrono::Utc::now().timestamp_millis())
    }
}

/// Outcome of one pass over all patients
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationSummary {
    pub patients: usize,
    pub alerts: usize,
    /// Patients whose window could not be read, to retry next pass
    pub failed: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::RuleId;
    use crate::alerts::event::{Pressure, Priority};
    use crate::alerts::rules::{BloodPressureCriticalThreshold, LowSaturation};
    use crate::alerts::sink::AlertHistory;
    use crate::data::RecordType;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn setup(config: &RuleSetConfig) -> (Arc<PatientStore>, Arc<AlertHistory>, RuleEngine) {
        let store = Arc::new(PatientStore::new());
        let history = Arc::new(AlertHistory::new(100));
        let engine = RuleEngine::from_config(
            Arc::clone(&store),
            config,
            Arc::clone(&history) as Arc<dyn AlertSink>,
        );
        (store, history, engine)
    }

    #[test]
    fn test_evaluate_emits_in_rule_order() {
        let (store, history, engine) = setup(&RuleSetConfig::default());
        store.ingest(1, 185.0, RecordType::SystolicPressure, NOW - 3000).unwrap();
        store.ingest(1, 91.0, RecordType::Saturation, NOW - 2000).unwrap();

        let events = engine.evaluate_at(1, NOW).unwrap();
        let kinds: Vec<AlertKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::LowSaturation,
                AlertKind::BloodPressureCriticalThreshold(Pressure::Systolic),
            ]
        );
        assert_eq!(history.events(), events);
    }

    #[test]
    fn test_evaluate_ignores_future_records() {
        let (store, history, engine) = setup(&RuleSetConfig::default());
        store.ingest(1, 80.0, RecordType::Saturation, NOW + 1000).unwrap();

        assert!(engine.evaluate_at(1, NOW).unwrap().is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn test_unknown_patient_is_quiet() {
        let (_store, history, engine) = setup(&RuleSetConfig::default());
        assert!(engine.evaluate_at(99, NOW).unwrap().is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn test_repeated_evaluation_is_idempotent() {
        let (store, history, engine) = setup(&RuleSetConfig::default());
        store.ingest(1, 100.0, RecordType::SystolicPressure, NOW - 3000).unwrap();
        store.ingest(1, 115.0, RecordType::SystolicPressure, NOW - 2000).unwrap();
        store.ingest(1, 127.0, RecordType::SystolicPressure, NOW - 1000).unwrap();

        let first = engine.evaluate_at(1, NOW).unwrap();
        let second = engine.evaluate_at(1, NOW).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        // No suppression between calls by default
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_explicit_rule_list() {
        let store = Arc::new(PatientStore::new());
        let history = Arc::new(AlertHistory::new(10));
        let engine = RuleEngine::new(
            Arc::clone(&store),
            vec![
                Box::new(BloodPressureCriticalThreshold::new(Pressure::Diastolic)),
                Box::new(LowSaturation::default()),
            ],
            Arc::clone(&history) as Arc<dyn AlertSink>,
        );
        assert_eq!(
            engine.rule_kinds(),
            vec![
                AlertKind::BloodPressureCriticalThreshold(Pressure::Diastolic),
                AlertKind::LowSaturation,
            ]
        );

        store.ingest(1, 50.0, RecordType::DiastolicPressure, NOW).unwrap();
        store.ingest(1, 50.0, RecordType::Saturation, NOW).unwrap();
        let events = engine.evaluate_at(1, NOW).unwrap();
        assert_eq!(events[0].kind, AlertKind::BloodPressureCriticalThreshold(Pressure::Diastolic));
        assert_eq!(events[1].kind, AlertKind::LowSaturation);
    }

    #[test]
    fn test_delivery_policy_suppresses_repeats() {
        let config = RuleSetConfig::default().with_delivery(
            DeliveryPolicy::default()
                .with_repeat_interval(Duration::from_secs(60))
                .with_priority(RuleId::LowSaturation, Priority::High),
        );
        let (store, history, engine) = setup(&config);
        store.ingest(1, 85.0, RecordType::Saturation, NOW - 1000).unwrap();

        assert_eq!(engine.evaluate_at(1, NOW).unwrap().len(), 1);
        assert_eq!(engine.evaluate_at(1, NOW + 10_000).unwrap().len(), 1);
        assert_eq!(engine.evaluate_at(1, NOW + 60_000).unwrap().len(), 1);

        let entries = history.recent();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.priority == Some(Priority::High)));
    }

    #[test]
    fn test_evaluate_all_patients() {
        let (store, history, engine) = setup(&RuleSetConfig::default());
        for id in 0..20 {
            let value = if id % 2 == 0 { 85.0 } else { 97.0 };
            store.ingest(id, value, RecordType::Saturation, NOW - 1000).unwrap();
        }

        let summary = engine.evaluate_all_at(NOW);
        assert_eq!(summary.patients, 20);
        assert_eq!(summary.alerts, 10);
        assert!(summary.failed.is_empty());
        assert_eq!(history.len(), 10);
    }
}
