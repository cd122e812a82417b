//! Canonical ingestion line format
//!
//! One record per line, four comma-separated fields in fixed order:
//!
//! ```text
//! patientId,measurementValue,recordType,timestamp
//! 12,97.5,Saturation,1700000000000
//! ```

use crate::data::{PatientRecord, RecordType};

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineError {
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid patient id '{0}'")]
    InvalidPatientId(String),

    #[error("invalid measurement value '{0}'")]
    InvalidValue(String),

    #[error("empty record type")]
    EmptyRecordType,

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("line is not valid UTF-8 (bad byte at offset {0})")]
    InvalidUtf8(usize),
}

/// Decode one raw line, dropping its `\n` or `\r\n` terminator
pub fn decode_line(raw: &[u8]) -> Result<&str, LineError> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|e| LineError::InvalidUtf8(e.valid_up_to()))
}

/// Parse one line into a record
pub fn parse_line(line: &str) -> Result<PatientRecord, LineError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    let [patient_id, value, record_type, timestamp] = fields.as_slice() else {
        return Err(LineError::FieldCount(fields.len()));
    };

    let patient_id: i64 = patient_id
        .parse()
        .map_err(|_| LineError::InvalidPatientId(patient_id.to_string()))?;

    let value: f64 = value
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| LineError::InvalidValue(value.to_string()))?;

    if record_type.is_empty() {
        return Err(LineError::EmptyRecordType);
    }

    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| LineError::InvalidTimestamp(timestamp.to_string()))?;

    Ok(PatientRecord {
        patient_id,
        record_type: RecordType::from(*record_type),
        value,
        timestamp,
    })
}

/// Render a record in the canonical line format
pub fn format_line(record: &PatientRecord) -> String {
    format!(
        "{},{},{},{}",
        record.patient_id, record.value, record.record_type, record.timestamp
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let record = parse_line("12,97.5,Saturation,1700000000000").unwrap();
        assert_eq!(record.patient_id, 12);
        assert_eq!(record.value, 97.5);
        assert_eq!(record.record_type, RecordType::Saturation);
        assert_eq!(record.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_unknown_types() {
        let record = parse_line(" 3 , -0.25 , HeartRate , 42 \r").unwrap();
        assert_eq!(record.patient_id, 3);
        assert_eq!(record.value, -0.25);
        assert_eq!(record.record_type, RecordType::Other("HeartRate".to_string()));
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(parse_line("1,2,ECG"), Err(LineError::FieldCount(3)));
        assert_eq!(parse_line("1,2,ECG,4,5"), Err(LineError::FieldCount(5)));
    }

    #[test]
    fn test_non_numeric_fields() {
        assert!(matches!(parse_line("x,1,ECG,1"), Err(LineError::InvalidPatientId(_))));
        assert!(matches!(parse_line("1.5,1,ECG,1"), Err(LineError::InvalidPatientId(_))));
        assert!(matches!(parse_line("1,abc,ECG,1"), Err(LineError::InvalidValue(_))));
        assert!(matches!(parse_line("1,NaN,ECG,1"), Err(LineError::InvalidValue(_))));
        assert!(matches!(parse_line("1,95%,Saturation,1"), Err(LineError::InvalidValue(_))));
        assert!(matches!(parse_line("1,1,ECG,soon"), Err(LineError::InvalidTimestamp(_))));
        assert_eq!(parse_line("1,1,,1"), Err(LineError::EmptyRecordType));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"1,2,ECG,3\r\n"), Ok("1,2,ECG,3"));
        assert_eq!(decode_line(b"1,2,ECG,3"), Ok("1,2,ECG,3"));
        assert_eq!(decode_line(b"1,9\xff7,ECG,3\n"), Err(LineError::InvalidUtf8(3)));
    }

    #[test]
    fn test_format_matches_parse() {
        let record = PatientRecord::new(5, 120.5, "SystolicPressure", 99);
        assert_eq!(format_line(&record), "5,120.5,SystolicPressure,99");
        assert_eq!(parse_line(&format_line(&record)).unwrap(), record);
    }
}
