//! Append-only JSONL sinks: the event log and the audit log. Every line
//! passes through the PII redactor before it reaches the writer.

use crate::event::Event;
use agentchaos_core::PiiRedactor;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{error, info};

/// Event log sink: one redacted JSON object per line.
pub struct LogSink {
    writer: Mutex<Box<dyn Write + Send>>,
    redactor: PiiRedactor,
}

impl LogSink {
    /// Sink appending to a file.
    pub fn to_file(path: &Path, redactor: PiiRedactor) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "event log sink opened");
        Ok(Self::to_writer(Box::new(BufWriter::new(file)), redactor))
    }

    /// Sink writing to an arbitrary writer (stdout, a test buffer).
    pub fn to_writer(writer: Box<dyn Write + Send>, redactor: PiiRedactor) -> Self {
        Self { writer: Mutex::new(writer), redactor }
    }

    /// Serialize, redact and append one event.
    pub fn write_event(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                error!(%err, "failed to serialize event");
                return;
            }
        };
        let line = self.redactor.redact(&line);
        let mut writer = self.writer.lock();
        if let Err(err) = writeln!(writer, "{line}") {
            error!(%err, "failed to write event log line");
        }
    }

    /// Flush buffered lines.
    pub fn flush(&self) {
        if let Err(err) = self.writer.lock().flush() {
            error!(%err, "failed to flush event log");
        }
    }
}

/// One audit record: control-plane operations and auth failures.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Record time
    pub t: chrono::DateTime<Utc>,
    /// Operation, e.g. `plan_install`
    pub action: String,
    /// Free-form detail (redacted)
    pub detail: String,
    /// Whether the operation succeeded
    pub ok: bool,
}

/// Audit log sink at `CHAOS_AUDIT_LOG`. A disabled sink swallows records.
pub struct AuditLog {
    writer: Option<Mutex<BufWriter<File>>>,
    redactor: PiiRedactor,
}

impl AuditLog {
    /// Open the audit sink, or a disabled one when no path is configured.
    pub fn open(path: Option<&Path>, redactor: PiiRedactor) -> std::io::Result<Self> {
        let writer = match path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                info!(path = %path.display(), "audit log opened");
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self { writer, redactor })
    }

    /// Append one audit record.
    pub fn record(&self, action: &str, detail: &str, ok: bool) {
        let Some(writer) = &self.writer else {
            return;
        };
        let record = AuditRecord {
            t: Utc::now(),
            action: action.to_string(),
            detail: self.redactor.redact(detail),
            ok,
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let mut writer = writer.lock();
            if writeln!(writer, "{line}").and_then(|()| writer.flush()).is_err() {
                error!("failed to write audit record");
            }
        }
    }
}
