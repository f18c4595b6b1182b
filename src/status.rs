//! Scan status reporting.
//!
//! The ingestion pipeline emits coarse lifecycle events (scan start and end,
//! per-file start, fingerprint heartbeats, duplicates, missing files) so an
//! operator can see what is being worked on. Events are a one-way feed; the
//! pipeline never reads them back. Output goes to **stderr** so stdout stays
//! parseable for scripts.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// A single status event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusEvent {
    /// Work is in progress.
    Working(String),
    /// A unit of work finished; nothing is pending for this source.
    Idle(String),
    /// Something failed. The pipeline has already moved on.
    Error(String),
}

impl StatusEvent {
    pub fn state(&self) -> &'static str {
        match self {
            StatusEvent::Working(_) => "working",
            StatusEvent::Idle(_) => "idle",
            StatusEvent::Error(_) => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StatusEvent::Working(m) | StatusEvent::Idle(m) | StatusEvent::Error(m) => m,
        }
    }
}

/// Receives status events. Called concurrently from scan workers.
pub trait StatusSink: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Human-friendly status on stderr: "[working] Processing /data/a.bag.".
pub struct StderrStatus;

impl StatusSink for StderrStatus {
    fn report(&self, event: StatusEvent) {
        let line = format!("[{}] {}\n", event.state(), event.message());
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonStatus;

impl StatusSink for JsonStatus {
    fn report(&self, event: StatusEvent) {
        let obj = serde_json::json!({
            "event": "status",
            "state": event.state(),
            "message": event.message(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op sink when status output is disabled.
pub struct NoStatus;

impl StatusSink for NoStatus {
    fn report(&self, _event: StatusEvent) {}
}

/// Keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct StatusLog {
    events: Mutex<Vec<StatusEvent>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl StatusSink for StatusLog {
    fn report(&self, event: StatusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Status mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum StatusMode {
    Off,
    Human,
    Json,
}

impl StatusMode {
    /// Default: human status when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            StatusMode::Human
        } else {
            StatusMode::Off
        }
    }

    pub fn sink(&self) -> Arc<dyn StatusSink> {
        match self {
            StatusMode::Off => Arc::new(NoStatus),
            StatusMode::Human => Arc::new(StderrStatus),
            StatusMode::Json => Arc::new(JsonStatus),
        }
    }
}
