use crate::data::{Patient, PatientRecord, RecordType};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Bounded wait for a patient's lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// Thread-safe, per-patient time-ordered record store.
///
/// Each patient has its own lock, so writers for different patients never
/// contend. Window queries copy the matching records out under the lock and
/// release it before returning.
pub struct PatientStore {
    /// Patients indexed by id
    patients: DashMap<i64, Arc<RwLock<Patient>>>,
    /// Total records held across all patients
    record_count: AtomicUsize,
    config: StoreConfig,
}

impl PatientStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            patients: DashMap::new(),
            record_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Insert a measurement, creating the patient on first sight.
    pub fn ingest(
        &self,
        patient_id: i64,
        value: f64,
        record_type: RecordType,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        self.ingest_record(PatientRecord {
            patient_id,
            record_type,
            value,
            timestamp,
        })
    }

    pub fn ingest_record(&self, record: PatientRecord) -> Result<(), StorageError> {
        let patient_id = record.patient_id;
        let slot = self.get_or_create(patient_id);

        let mut patient = self.write_patient(patient_id, &slot)?;
        patient.insert(record);
        drop(patient);

        self.record_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Insert many records, returning how many were stored.
    pub fn ingest_batch(&self, records: Vec<PatientRecord>) -> Result<usize, StorageError> {
        let mut inserted = 0;
        for record in records {
            self.ingest_record(record)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Snapshot of the records with `start <= timestamp <= end`, ascending.
    ///
    /// An unknown patient yields an empty window.
    pub fn window(
        &self,
        patient_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<PatientRecord>, StorageError> {
        let Some(slot) = self.get(patient_id) else {
            return Ok(Vec::new());
        };

        let patient = self.read_patient(patient_id, &slot)?;
        Ok(patient.range(start, end))
    }

    /// Every record held for a patient
    pub fn history(&self, patient_id: i64) -> Result<Vec<PatientRecord>, StorageError> {
        self.window(patient_id, i64::MIN, i64::MAX)
    }

    /// Ids of every known patient
    pub fn patient_ids(&self) -> BTreeSet<i64> {
        self.patients.iter().map(|e| *e.key()).collect()
    }

    pub fn contains(&self, patient_id: i64) -> bool {
        self.patients.contains_key(&patient_id)
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn record_count(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Number of records held for one patient
    pub fn patient_record_count(&self, patient_id: i64) -> Result<usize, StorageError> {
        let Some(slot) = self.get(patient_id) else {
            return Ok(0);
        };
        let patient = self.read_patient(patient_id, &slot)?;
        Ok(patient.len())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            patients: self.patient_count(),
            records: self.record_count(),
        }
    }

    fn get(&self, patient_id: i64) -> Option<Arc<RwLock<Patient>>> {
        self.patients.get(&patient_id).map(|p| Arc::clone(&p))
    }

    fn get_or_create(&self, patient_id: i64) -> Arc<RwLock<Patient>> {
        if let Some(slot) = self.get(patient_id) {
            return slot;
        }

        // The map shard guard must be released before the patient lock is taken
        let entry = self
            .patients
            .entry(patient_id)
            .or_insert_with(|| Arc::new(RwLock::new(Patient::new(patient_id))));
        Arc::clone(&entry)
    }

    fn write_patient<'a>(
        &self,
        patient_id: i64,
        slot: &'a RwLock<Patient>,
    ) -> Result<RwLockWriteGuard<'a, Patient>, StorageError> {
        match self.config.lock_timeout {
            None => Ok(slot.write()),
            Some(timeout) => slot.try_write_for(timeout).ok_or_else(|| {
                tracing::warn!(patient_id, ?timeout, "Timed out waiting for patient write lock");
                StorageError::LockTimeout {
                    patient_id,
                    waited_ms: timeout.as_millis() as u64,
                }
            }),
        }
    }

    fn read_patient<'a>(
        &self,
        patient_id: i64,
        slot: &'a RwLock<Patient>,
    ) -> Result<RwLockReadGuard<'a, Patient>, StorageError> {
        match self.config.lock_timeout {
            None => Ok(slot.read()),
            Some(timeout) => slot.try_read_for(timeout).ok_or_else(|| {
                tracing::warn!(patient_id, ?timeout, "Timed out waiting for patient read lock");
                StorageError::LockTimeout {
                    patient_id,
                    waited_ms: timeout.as_millis() as u64,
                }
            }),
        }
    }
}

impl Default for PatientStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time store counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StoreStats {
    pub patients: usize,
    pub records: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Timed out after {waited_ms}ms waiting for patient {patient_id}")]
    LockTimeout { patient_id: i64, waited_ms: u64 },
}

impl StorageError {
    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::LockTimeout { .. })
    }
}
