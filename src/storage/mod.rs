pub mod engine;

pub use engine::{PatientStore, StorageError, StoreConfig, StoreStats};
