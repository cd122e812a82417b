use super::record::PatientRecord;

/// A patient and the measurements recorded for them, kept sorted by timestamp.
#[derive(Debug, Clone)]
pub struct Patient {
    pub id: i64,
    records: Vec<PatientRecord>,
}

impl Patient {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            records: Vec::new(),
        }
    }

    /// Insert a record at the position that keeps the sequence ordered.
    ///
    /// Records sharing a timestamp keep their arrival order.
    pub fn insert(&mut self, record: PatientRecord) {
        let pos = self
            .records
            .partition_point(|r| r.timestamp <= record.timestamp);
        self.records.insert(pos, record);
    }

    /// Copy of every record with `start <= timestamp <= end`.
    pub fn range(&self, start: i64, end: i64) -> Vec<PatientRecord> {
        if start > end {
            return Vec::new();
        }
        let lo = self.records.partition_point(|r| r.timestamp < start);
        let hi = self.records.partition_point(|r| r.timestamp <= end);
        self.records[lo..hi].to_vec()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Timestamp of the most recent record
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.records.last().map(|r| r.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(records: &[PatientRecord]) -> Vec<i64> {
        records.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_insert_keeps_timestamp_order() {
        let mut patient = Patient::new(1);
        for ts in [500, 100, 300, 200, 400] {
            patient.insert(PatientRecord::new(1, ts as f64, "ECG", ts));
        }

        assert_eq!(timestamps(&patient.range(i64::MIN, i64::MAX)), vec![100, 200, 300, 400, 500]);
        assert_eq!(patient.latest_timestamp(), Some(500));
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut patient = Patient::new(1);
        patient.insert(PatientRecord::new(1, 1.0, "ECG", 100));
        patient.insert(PatientRecord::new(1, 2.0, "ECG", 100));
        patient.insert(PatientRecord::new(1, 0.5, "ECG", 50));

        let values: Vec<f64> = patient.range(0, 200).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let mut patient = Patient::new(1);
        for ts in [100, 200, 300, 400] {
            patient.insert(PatientRecord::new(1, 0.0, "Saturation", ts));
        }

        assert_eq!(timestamps(&patient.range(200, 300)), vec![200, 300]);
        assert_eq!(timestamps(&patient.range(150, 250)), vec![200]);
        assert!(patient.range(401, 500).is_empty());
        assert!(patient.range(300, 200).is_empty());
    }
}
