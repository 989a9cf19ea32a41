//! Log record types and utilities

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Format used for event times in the output sink
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Highest valid PRI value (facility 23, severity 7)
pub const MAX_PRI: u8 = 191;

/// Syslog severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Emergency: system is unusable
    Emergency = 0,
    /// Alert: action must be taken immediately
    Alert = 1,
    /// Critical: critical conditions
    Critical = 2,
    /// Error: error conditions
    Error = 3,
    /// Warning: warning conditions
    Warning = 4,
    /// Notice: normal but significant condition
    Notice = 5,
    /// Info: informational messages
    Info = 6,
    /// Debug: debug-level messages
    Debug = 7,
}

impl Severity {
    /// Map a numeric severity (0-7) to its level
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Severity::Emergency),
            1 => Some(Severity::Alert),
            2 => Some(Severity::Critical),
            3 => Some(Severity::Error),
            4 => Some(Severity::Warning),
            5 => Some(Severity::Notice),
            6 => Some(Severity::Info),
            7 => Some(Severity::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Emergency => write!(f, "EMERG"),
            Severity::Alert => write!(f, "ALERT"),
            Severity::Critical => write!(f, "CRIT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Notice => write!(f, "NOTICE"),
            Severity::Info => write!(f, "INFO"),
            Severity::Debug => write!(f, "DEBUG"),
        }
    }
}

const FACILITY_NAMES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "security", "console", "clock", "local0", "local1", "local2", "local3", "local4",
    "local5", "local6", "local7",
];

/// Keyword for a numeric facility (0-23)
pub fn facility_name(code: u8) -> Option<&'static str> {
    FACILITY_NAMES.get(code as usize).copied()
}

/// A single received syslog message
///
/// Created once at receipt and never modified; the writer consumes it exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Wall-clock time the message was received
    pub received_at: DateTime<Utc>,

    /// Transport-level sender address
    pub source_address: SocketAddr,

    /// Message text after the PRI prefix, or the whole text when it has none
    pub message: String,

    /// Syslog severity, 0-7
    pub severity: u8,

    /// Syslog facility, 0-23
    pub facility: u8,
}

impl LogRecord {
    /// Create a new record
    pub fn new(
        received_at: DateTime<Utc>,
        source_address: SocketAddr,
        message: String,
        severity: u8,
        facility: u8,
    ) -> Self {
        Self {
            received_at,
            source_address,
            message,
            severity,
            facility,
        }
    }

    /// Severity as a named level
    pub fn level(&self) -> Option<Severity> {
        Severity::from_code(self.severity)
    }

    /// Combined PRI value (`facility * 8 + severity`)
    pub fn priority(&self) -> u16 {
        u16::from(self.facility) * 8 + u16::from(self.severity)
    }

    /// Event time formatted to millisecond precision
    pub fn event_time(&self, local_time: bool) -> String {
        if local_time {
            self.received_at
                .with_timezone(&Local)
                .format(EVENT_TIME_FORMAT)
                .to_string()
        } else {
            self.received_at.format(EVENT_TIME_FORMAT).to_string()
        }
    }

    /// Sender IP as written to the sink
    pub fn device_ip(&self) -> String {
        self.source_address.ip().to_string()
    }

    /// Format as human-readable string
    pub fn to_human_readable(&self) -> String {
        let level = self
            .level()
            .map(|l| l.to_string())
            .unwrap_or_else(|| self.severity.to_string());
        match facility_name(self.facility) {
            Some(facility) => format!(
                "{} {} {}.{}: {}",
                self.event_time(false),
                self.device_ip(),
                facility,
                level,
                self.message
            ),
            None => format!(
                "{} {} {} facility={}: {}",
                self.event_time(false),
                self.device_ip(),
                level,
                self.facility,
                self.message
            ),
        }
    }
}
