//! Configuration management for the collector

pub mod settings;

pub use settings::{
    CollectorConfig, ListenerSettings, MetricsSettings, OutputFormat, ParserSettings,
    QueueSettings, ShutdownSettings, StorageSettings,
};
