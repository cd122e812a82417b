//! Alert event types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::RecordType;

/// Blood pressure component a rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    Systolic,
    Diastolic,
}

impl Pressure {
    pub fn record_type(&self) -> RecordType {
        match self {
            Pressure::Systolic => RecordType::SystolicPressure,
            Pressure::Diastolic => RecordType::DiastolicPressure,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Pressure::Systolic => "Systolic",
            Pressure::Diastolic => "Diastolic",
        }
    }
}

/// Identifies the rule that produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowSaturation,
    RapidDrop,
    HypotensiveHypoxemia,
    BloodPressureTrend(Pressure),
    BloodPressureCriticalThreshold(Pressure),
    EcgAnomaly,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::LowSaturation => f.write_str("low_saturation"),
            AlertKind::RapidDrop => f.write_str("rapid_drop"),
            AlertKind::HypotensiveHypoxemia => f.write_str("hypotensive_hypoxemia"),
            AlertKind::BloodPressureTrend(p) => {
                write!(f, "blood_pressure_trend.{}", p.label().to_lowercase())
            }
            AlertKind::BloodPressureCriticalThreshold(p) => {
                write!(f, "blood_pressure_critical_threshold.{}", p.label().to_lowercase())
            }
            AlertKind::EcgAnomaly => f.write_str("ecg_anomaly"),
        }
    }
}

/// An alert raised by rule evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub patient_id: i64,
    pub kind: AlertKind,
    pub description: String,
    /// Epoch milliseconds of the measurement that raised the alert
    pub timestamp: i64,
}

impl AlertEvent {
    pub fn new(
        patient_id: i64,
        kind: AlertKind,
        description: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            patient_id,
            kind,
            description: description.into(),
            timestamp,
        }
    }
}

/// Severity tag attached by the delivery stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => f.write_str("low"),
            Priority::Medium => f.write_str("medium"),
            Priority::High => f.write_str("high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(AlertKind::LowSaturation.to_string(), "low_saturation");
        assert_eq!(
            AlertKind::BloodPressureTrend(Pressure::Diastolic).to_string(),
            "blood_pressure_trend.diastolic"
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = AlertEvent::new(
            3,
            AlertKind::BloodPressureCriticalThreshold(Pressure::Systolic),
            "Blood Pressure Systolic Threshold Alert",
            1000,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["patient_id"], 3);
        assert_eq!(json["kind"]["blood_pressure_critical_threshold"], "systolic");
        assert_eq!(json["timestamp"], 1000);
    }
}
