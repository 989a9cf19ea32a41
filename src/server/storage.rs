//! Append-only output sink for log records

use crate::config::{OutputFormat, StorageSettings};
use crate::types::LogRecord;
use crate::{CollectorError, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Column names of the CSV output
pub const CSV_HEADER: [&str; 5] = ["Event_Time", "Device_IP", "Message", "Severity", "Facility"];

#[derive(Serialize)]
struct Row<'a> {
    #[serde(rename = "Event_Time")]
    event_time: String,
    #[serde(rename = "Device_IP")]
    device_ip: String,
    #[serde(rename = "Message")]
    message: &'a str,
    #[serde(rename = "Severity")]
    severity: u8,
    #[serde(rename = "Facility")]
    facility: u8,
}

impl<'a> Row<'a> {
    fn new(record: &'a LogRecord, local_time: bool) -> Self {
        Self {
            event_time: record.event_time(local_time),
            device_ip: record.device_ip(),
            message: &record.message,
            severity: record.severity,
            facility: record.facility,
        }
    }
}

/// Serialize one record as a terminated row in `format`
pub fn encode_row(
    record: &LogRecord,
    format: OutputFormat,
    local_time: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    let row = Row::new(record, local_time);
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .double_quote(true)
                .from_writer(&mut *out);
            writer.serialize(row)?;
            writer.flush()?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &row)?;
            out.push(b'\n');
        }
    }
    Ok(())
}

/// Buffered sink the writer appends rows to
///
/// Rows accumulate in memory until `flush`. A failed flush discards the
/// buffered rows, so rows already reported as lost never reach the output
/// later. Only the writer task owns a sink; nothing else writes to the output.
pub struct RecordSink<W = File> {
    writer: W,
    buffer: Vec<u8>,
    format: OutputFormat,
    local_time: bool,
}

impl RecordSink<File> {
    /// Open the configured output file in append mode
    ///
    /// The file is created if missing and never truncated. A CSV header is
    /// written only when the file is empty.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let path = &settings.output_path;
        let file = open_append(path).await?;
        let is_empty = file
            .metadata()
            .await
            .map_err(|e| CollectorError::Sink(format!("Failed to stat {}: {}", path.display(), e)))?
            .len()
            == 0;

        let mut sink = Self::from_writer(file, settings.format, settings.local_time);
        if is_empty && settings.format == OutputFormat::Csv {
            sink.write_header()?;
            sink.flush().await?;
        }
        Ok(sink)
    }
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| CollectorError::Sink(format!("Failed to open output {}: {}", path.display(), e)))
}

impl<W: AsyncWrite + Unpin> RecordSink<W> {
    /// Wrap an arbitrary writer
    pub fn from_writer(writer: W, format: OutputFormat, local_time: bool) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(8 * 1024),
            format,
            local_time,
        }
    }

    /// Buffer the CSV header row
    pub fn write_header(&mut self) -> Result<()> {
        let mut writer = csv::Writer::from_writer(&mut self.buffer);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(())
    }

    /// Append one record to the buffer
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let mark = self.buffer.len();
        if let Err(e) = encode_row(record, self.format, self.local_time, &mut self.buffer) {
            self.buffer.truncate(mark);
            return Err(e);
        }
        Ok(())
    }

    /// Bytes waiting for the next flush
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Push buffered rows to the underlying writer
    ///
    /// The buffer is emptied whether or not the write succeeds.
    pub async fn flush(&mut self) -> Result<()> {
        let written = self.writer.write_all(&self.buffer).await;
        self.buffer.clear();
        written?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and release the underlying writer
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Configured row format
    pub fn format(&self) -> OutputFormat {
        self.format
    }
}
