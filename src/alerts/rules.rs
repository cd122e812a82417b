//! Clinical alert rules
//!
//! Every rule is a pure function of a patient's window: the same records
//! always produce the same result. Records whose type a rule does not watch
//! are skipped, and missing supporting data simply means "no alert".

use super::event::{AlertEvent, AlertKind, Pressure};
use crate::data::{PatientRecord, RecordType};

/// A rule evaluated against a timestamp-ordered window of one patient's records
pub trait AlertRule: Send + Sync {
    /// Kind reported on events this rule emits
    fn kind(&self) -> AlertKind;

    /// Evaluate the window, returning an alert if the rule fires
    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent>;
}

/// Most recent record of a type
fn latest_of<'a>(window: &'a [PatientRecord], record_type: &RecordType) -> Option<&'a PatientRecord> {
    window.iter().rev().find(|r| r.is(record_type))
}

// ============================================================================
// Oxygen saturation
// ============================================================================

/// Fires on the earliest `Saturation` reading below the threshold.
#[derive(Debug, Clone)]
pub struct LowSaturation {
    pub threshold: f64,
}

impl Default for LowSaturation {
    fn default() -> Self {
        Self { threshold: 92.0 }
    }
}

impl AlertRule for LowSaturation {
    fn kind(&self) -> AlertKind {
        AlertKind::LowSaturation
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let record = window
            .iter()
            .find(|r| r.is(&RecordType::Saturation) && r.value < self.threshold)?;

        Some(AlertEvent::new(
            patient_id,
            self.kind(),
            format!("Blood oxygen saturation level fell below {}%.", self.threshold),
            record.timestamp,
        ))
    }
}

/// Compares the latest `BloodSaturation` reading with the one just before it.
#[derive(Debug, Clone)]
pub struct RapidDrop {
    /// Maximum gap between the two readings
    pub window_ms: i64,
    /// Minimum relative drop, e.g. 0.05 for 5%
    pub min_drop_ratio: f64,
}

impl Default for RapidDrop {
    fn default() -> Self {
        Self {
            window_ms: 600_000,
            min_drop_ratio: 0.05,
        }
    }
}

impl AlertRule for RapidDrop {
    fn kind(&self) -> AlertKind {
        AlertKind::RapidDrop
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let mut readings = window
            .iter()
            .rev()
            .filter(|r| r.is(&RecordType::BloodSaturation));
        let current = readings.next()?;
        let previous = readings.next()?;

        if previous.value <= 0.0 {
            return None;
        }
        if current.timestamp - previous.timestamp > self.window_ms {
            return None;
        }

        let drop = (previous.value - current.value) / previous.value;
        if drop < self.min_drop_ratio {
            return None;
        }

        Some(AlertEvent::new(
            patient_id,
            self.kind(),
            format!(
                "Blood oxygen saturation level dropped by {:.1}% within {} minutes.",
                drop * 100.0,
                self.window_ms / 60_000
            ),
            current.timestamp,
        ))
    }
}

/// Low saturation together with low systolic pressure.
///
/// Scans chronologically and fires at the record that completes the pair.
/// With `pairing_window_ms` set, the two observations must also be at most
/// that far apart.
#[derive(Debug, Clone)]
pub struct HypotensiveHypoxemia {
    pub saturation_threshold: f64,
    pub systolic_threshold: f64,
    pub pairing_window_ms: Option<i64>,
}

impl Default for HypotensiveHypoxemia {
    fn default() -> Self {
        Self {
            saturation_threshold: 92.0,
            systolic_threshold: 90.0,
            pairing_window_ms: None,
        }
    }
}

impl HypotensiveHypoxemia {
    fn paired(&self, now: i64, other: Option<i64>) -> bool {
        match (other, self.pairing_window_ms) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(at), Some(gap)) => now - at <= gap,
        }
    }
}

impl AlertRule for HypotensiveHypoxemia {
    fn kind(&self) -> AlertKind {
        AlertKind::HypotensiveHypoxemia
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let mut low_saturation_at: Option<i64> = None;
        let mut low_systolic_at: Option<i64> = None;

        for record in window {
            let completes = match record.record_type {
                RecordType::Saturation if record.value < self.saturation_threshold => {
                    low_saturation_at = Some(record.timestamp);
                    self.paired(record.timestamp, low_systolic_at)
                }
                RecordType::SystolicPressure if record.value < self.systolic_threshold => {
                    low_systolic_at = Some(record.timestamp);
                    self.paired(record.timestamp, low_saturation_at)
                }
                _ => false,
            };

            if completes {
                return Some(AlertEvent::new(
                    patient_id,
                    self.kind(),
                    format!(
                        "Hypotensive hypoxemia: systolic pressure below {} mmHg with saturation below {}%.",
                        self.systolic_threshold, self.saturation_threshold
                    ),
                    record.timestamp,
                ));
            }
        }

        None
    }
}

// ============================================================================
// Blood pressure
// ============================================================================

/// Three consecutive readings moving the same way by more than `min_delta` each step.
#[derive(Debug, Clone)]
pub struct BloodPressureTrend {
    pub pressure: Pressure,
    pub min_delta: f64,
}

impl BloodPressureTrend {
    pub fn new(pressure: Pressure) -> Self {
        Self {
            pressure,
            min_delta: 10.0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }
}

impl AlertRule for BloodPressureTrend {
    fn kind(&self) -> AlertKind {
        AlertKind::BloodPressureTrend(self.pressure)
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let record_type = self.pressure.record_type();
        let recent: Vec<&PatientRecord> = window
            .iter()
            .rev()
            .filter(|r| r.is(&record_type))
            .take(3)
            .collect();

        // Newest first
        let [latest, middle, oldest] = recent.as_slice() else {
            return None;
        };

        let rising = middle.value - oldest.value > self.min_delta
            && latest.value - middle.value > self.min_delta;
        let falling = oldest.value - middle.value > self.min_delta
            && middle.value - latest.value > self.min_delta;

        if !(rising || falling) {
            return None;
        }

        Some(AlertEvent::new(
            patient_id,
            self.kind(),
            format!(
                "Blood Pressure {} Trend Alert: {} by more than {} mmHg over three readings",
                self.pressure.label(),
                if rising { "rising" } else { "falling" },
                self.min_delta
            ),
            latest.timestamp,
        ))
    }
}

/// Latest reading outside the safe band for its pressure component.
#[derive(Debug, Clone)]
pub struct BloodPressureCriticalThreshold {
    pub pressure: Pressure,
    /// Readings strictly below this fire
    pub low: f64,
    /// Readings strictly above this fire
    pub high: f64,
}

impl BloodPressureCriticalThreshold {
    pub fn new(pressure: Pressure) -> Self {
        let (low, high) = match pressure {
            Pressure::Systolic => (90.0, 180.0),
            Pressure::Diastolic => (60.0, 120.0),
        };
        Self { pressure, low, high }
    }
}

impl AlertRule for BloodPressureCriticalThreshold {
    fn kind(&self) -> AlertKind {
        AlertKind::BloodPressureCriticalThreshold(self.pressure)
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let latest = latest_of(window, &self.pressure.record_type())?;
        if latest.value >= self.low && latest.value <= self.high {
            return None;
        }

        Some(AlertEvent::new(
            patient_id,
            self.kind(),
            format!(
                "Blood Pressure {} Threshold Alert: {} mmHg outside [{}, {}]",
                self.pressure.label(),
                latest.value,
                self.low,
                self.high
            ),
            latest.timestamp,
        ))
    }
}

// ============================================================================
// ECG
// ============================================================================

/// Latest ECG reading deviating from the mean of the preceding window.
///
/// The baseline covers ECG records in `[latest - window_ms, latest)`. With
/// no baseline the rule stays quiet.
#[derive(Debug, Clone)]
pub struct EcgAnomaly {
    pub window_ms: i64,
    /// Allowed relative deviation, e.g. 0.2 for 20%
    pub max_deviation: f64,
}

impl Default for EcgAnomaly {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_deviation: 0.2,
        }
    }
}

impl AlertRule for EcgAnomaly {
    fn kind(&self) -> AlertKind {
        AlertKind::EcgAnomaly
    }

    fn evaluate(&self, patient_id: i64, window: &[PatientRecord]) -> Option<AlertEvent> {
        let latest = latest_of(window, &RecordType::Ecg)?;
        let since = latest.timestamp - self.window_ms;

        let (sum, count) = window
            .iter()
            .filter(|r| r.is(&RecordType::Ecg))
            .filter(|r| r.timestamp >= since && r.timestamp < latest.timestamp)
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.value, count + 1));

        if count == 0 {
            tracing::debug!(patient_id, "No ECG baseline in the preceding window");
            return None;
        }

        let average = sum / count as f64;
        let magnitude = latest.value.abs();
        let upper = (1.0 + self.max_deviation) * average;
        let lower = (1.0 - self.max_deviation) * average;

        if magnitude <= upper && magnitude >= lower {
            return None;
        }

        Some(AlertEvent::new(
            patient_id,
            self.kind(),
            format!(
                "ECG Abnormal Data Alert: {} deviates more than {:.0}% from average {:.2}",
                latest.value,
                self.max_deviation * 100.0,
                average
            ),
            latest.timestamp,
        ))
    }
}
