//! vitalwatch: In-Memory Patient Vital-Sign Monitoring
//!
//! A concurrent per-patient store of timestamped measurements with a set of
//! windowed clinical alert rules evaluated over it.
//!
//! # Features
//!
//! - **Per-Patient Locking**: Readers and writers for different patients never contend
//! - **Ordered Records**: Each patient's records stay sorted by timestamp
//! - **Pure Rules**: Alert rules are functions of one snapshot window
//! - **Composable Delivery**: Priority tagging and rate limiting per alert stream
//! - **Ingestion**: Canonical text lines over HTTP, TCP or a directory of files
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vitalwatch::alerts::{AlertHistory, RuleEngine, RuleSetConfig};
//! use vitalwatch::data::RecordType;
//! use vitalwatch::storage::PatientStore;
//!
//! let store = Arc::new(PatientStore::new());
//! store.ingest(1, 90.0, RecordType::Saturation, 1000).unwrap();
//!
//! let history = Arc::new(AlertHistory::new(100));
//! let engine = RuleEngine::from_config(Arc::clone(&store), &RuleSetConfig::default(), history.clone());
//!
//! let alerts = engine.evaluate_at(1, 2000).unwrap();
//! println!("Alerts: {:?}", alerts);
//! ```

pub mod alerts;
pub mod api;
pub mod data;
pub mod ingest;
pub mod storage;

// Re-export commonly used types
pub use alerts::{AlertEvent, AlertKind, AlertRule, AlertSink, RuleEngine};
pub use data::{PatientRecord, RecordType};
pub use storage::{PatientStore, StorageError};
