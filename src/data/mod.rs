pub mod patient;
pub mod record;

pub use patient::Patient;
pub use record::{PatientRecord, RecordType};
