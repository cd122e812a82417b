use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of measurement carried by a record.
///
/// The set is open: tags the rules do not know about are kept as
/// `Other` and simply ignored during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordType {
    Saturation,
    BloodSaturation,
    SystolicPressure,
    DiastolicPressure,
    Ecg,
    Other(String),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::Saturation => "Saturation",
            RecordType::BloodSaturation => "BloodSaturation",
            RecordType::SystolicPressure => "SystolicPressure",
            RecordType::DiastolicPressure => "DiastolicPressure",
            RecordType::Ecg => "ECG",
            RecordType::Other(tag) => tag,
        }
    }
}

impl From<&str> for RecordType {
    fn from(tag: &str) -> Self {
        match tag {
            "Saturation" => RecordType::Saturation,
            "BloodSaturation" => RecordType::BloodSaturation,
            "SystolicPressure" => RecordType::SystolicPressure,
            "DiastolicPressure" => RecordType::DiastolicPressure,
            "ECG" => RecordType::Ecg,
            other => RecordType::Other(other.to_string()),
        }
    }
}

impl From<String> for RecordType {
    fn from(tag: String) -> Self {
        match RecordType::from(tag.as_str()) {
            RecordType::Other(_) => RecordType::Other(tag),
            known => known,
        }
    }
}

impl From<RecordType> for String {
    fn from(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for RecordType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RecordType::from(s))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single measurement. Records are immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: i64,
    pub record_type: RecordType,
    pub value: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl PatientRecord {
    pub fn new(
        patient_id: i64,
        value: f64,
        record_type: impl Into<RecordType>,
        timestamp: i64,
    ) -> Self {
        Self {
            patient_id,
            record_type: record_type.into(),
            value,
            timestamp,
        }
    }

    pub fn is(&self, record_type: &RecordType) -> bool {
        &self.record_type == record_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_round_trip_through_display() {
        for tag in ["Saturation", "BloodSaturation", "SystolicPressure", "DiastolicPressure", "ECG"] {
            let parsed = RecordType::from(tag);
            assert!(!matches!(parsed, RecordType::Other(_)), "{} should be known", tag);
            assert_eq!(parsed.to_string(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let parsed: RecordType = "HeartRate".parse().unwrap();
        assert_eq!(parsed, RecordType::Other("HeartRate".to_string()));
        assert_eq!(parsed.as_str(), "HeartRate");
    }

    #[test]
    fn test_record_serializes_tag_as_string() {
        let record = PatientRecord::new(7, 95.0, "ECG", 1000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record_type"], "ECG");

        let back: PatientRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.record_type, RecordType::Ecg);
    }
}
