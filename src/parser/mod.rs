//! Syslog wire parser
//!
//! Turns a raw datagram or TCP line into a [`LogRecord`]. Parsing never fails:
//! input without a usable `<PRI>` prefix keeps its full text as the message
//! and gets the configured default facility and severity.
//!
//! Only the PRI prefix is decoded. Timestamp, hostname and tag segments of
//! RFC 3164/5424 headers stay part of the message text.

use crate::config::ParserSettings;
use crate::metrics::Metrics;
use crate::types::log_record::MAX_PRI;
use crate::types::LogRecord;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Why a message did not yield a PRI value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Zero-length input
    Empty,
    /// Input does not start with `<`
    MissingPri,
    /// `<...>` is present but does not hold 1-3 digits
    MalformedPri,
    /// PRI value above 191
    PriOutOfRange(u16),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty message"),
            ParseError::MissingPri => write!(f, "missing <PRI> prefix"),
            ParseError::MalformedPri => write!(f, "malformed <PRI> prefix"),
            ParseError::PriOutOfRange(pri) => write!(f, "PRI {} out of range 0-{}", pri, MAX_PRI),
        }
    }
}

/// Outcome of parsing a single message
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// The record to enqueue
    pub record: LogRecord,
    /// Set when the PRI prefix could not be decoded
    pub error: Option<ParseError>,
    /// Input exceeded the maximum message size and was cut
    pub truncated: bool,
}

/// Parse one message without touching any shared state
pub fn parse_message(
    raw: &[u8],
    source_address: SocketAddr,
    received_at: DateTime<Utc>,
    settings: &ParserSettings,
) -> ParsedMessage {
    let truncated = raw.len() > settings.max_message_size;
    let raw = if truncated {
        &raw[..settings.max_message_size]
    } else {
        raw
    };

    let text = String::from_utf8_lossy(raw);

    let (facility, severity, body, error) = match split_pri(&text) {
        Ok((pri, rest)) => (pri / 8, pri % 8, rest, None),
        Err(e) => (
            settings.default_facility,
            settings.default_severity,
            text.as_ref(),
            Some(e),
        ),
    };

    ParsedMessage {
        record: LogRecord::new(
            received_at,
            source_address,
            clean_message(body),
            severity,
            facility,
        ),
        error,
        truncated,
    }
}

/// Split `<PRI>` off the front of `text`
fn split_pri(text: &str) -> Result<(u8, &str), ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let rest = text.strip_prefix('<').ok_or(ParseError::MissingPri)?;
    let close = rest.find('>').ok_or(ParseError::MalformedPri)?;
    let digits = &rest[..close];

    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedPri);
    }

    let pri: u16 = digits.parse().map_err(|_| ParseError::MalformedPri)?;
    if pri > u16::from(MAX_PRI) {
        return Err(ParseError::PriOutOfRange(pri));
    }

    Ok((pri as u8, &rest[close + 1..]))
}

/// Trim line terminators and surrounding whitespace
fn clean_message(body: &str) -> String {
    body.trim().to_string()
}

/// Parser bound to the shared metrics registry
///
/// Counts parse errors and truncations and logs them at debug level.
#[derive(Debug, Clone)]
pub struct SyslogParser {
    settings: ParserSettings,
    metrics: Arc<Metrics>,
}

impl SyslogParser {
    /// Create a parser
    pub fn new(settings: ParserSettings, metrics: Arc<Metrics>) -> Self {
        Self { settings, metrics }
    }

    /// Parse a message received at `received_at` from `source_address`
    pub fn parse(
        &self,
        raw: &[u8],
        source_address: SocketAddr,
        received_at: DateTime<Utc>,
    ) -> LogRecord {
        let parsed = parse_message(raw, source_address, received_at, &self.settings);

        if parsed.truncated {
            self.metrics.record_truncated();
            debug!(
                peer = %source_address,
                size = raw.len(),
                max = self.settings.max_message_size,
                "syslog message truncated"
            );
        }

        if let Some(error) = parsed.error {
            self.metrics.record_parse_error();
            debug!(peer = %source_address, %error, "syslog message without usable priority");
        }

        parsed.record
    }

    /// Parser settings
    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }
}
