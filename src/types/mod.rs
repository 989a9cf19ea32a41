//! Record types flowing through the pipeline

pub mod log_record;

pub use log_record::{facility_name, LogRecord, Severity};
