//! Scan lifecycle events and the sinks that receive them.
//!
//! The engine calls `EventSink::emit` from worker threads. The JSONL sink
//! forwards events over a bounded crossbeam channel to a dedicated logger
//! thread that owns the `JsonlWriter`; `try_send()` keeps a slow disk from
//! ever stalling a scan.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{BrecError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

/// Default bounded channel capacity for scan events.
pub const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Discrete, advisory lifecycle events emitted during a scan session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    SessionStarted {
        types: usize,
        config_hash: String,
    },
    ClassifierTrainingStarted {
        samples: usize,
        epochs: usize,
    },
    ClassifierTrainingCompleted {
        final_loss: f64,
        duration_ms: u64,
    },
    ClassifierUnavailable {
        reason: String,
    },
    ArtifactScanStarted {
        artifact: String,
    },
    ArtifactScanCompleted {
        artifact: String,
        structured: usize,
        carved: usize,
        duration_ms: u64,
    },
    ArtifactError {
        artifact: String,
        code: String,
        message: String,
    },
    SessionCompleted {
        types: usize,
        candidates: usize,
        duration_ms: u64,
    },
}

/// Receiver of scan events. Implementations must not block for long and
/// must never fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

// ──────────────────── public handle ────────────────────

enum LoggerMessage {
    Event(ScanEvent),
    Shutdown,
}

/// Cheaply-cloneable handle feeding the JSONL logger thread.
#[derive(Clone)]
pub struct EventLoggerHandle {
    tx: Sender<LoggerMessage>,
    dropped_events: Arc<AtomicU64>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventLoggerHandle {
    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Drain queued events, flush the writer and join the logger thread.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub fn shutdown(&self) {
        let Some(handle) = self.join.lock().take() else {
            return;
        };
        let _ = self.tx.send(LoggerMessage::Shutdown);
        let _ = handle.join();
    }
}

impl EventSink for EventLoggerHandle {
    fn emit(&self, event: ScanEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(LoggerMessage::Event(event)) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine after shutdown.
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle to it.
pub fn spawn_event_logger(config: JsonlConfig, capacity: usize) -> Result<EventLoggerHandle> {
    let (tx, rx) = bounded(capacity.max(1));
    let handle = thread::Builder::new()
        .name("brec-logger".to_string())
        .spawn(move || logger_thread_main(config, &rx))
        .map_err(|e| BrecError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok(EventLoggerHandle {
        tx,
        dropped_events: Arc::new(AtomicU64::new(0)),
        join: Arc::new(Mutex::new(Some(handle))),
    })
}

fn logger_thread_main(config: JsonlConfig, rx: &Receiver<LoggerMessage>) {
    let mut writer = JsonlWriter::open(config);

    while let Ok(message) = rx.recv() {
        match message {
            LoggerMessage::Event(event) => writer.write_entry(&event_to_log_entry(&event)),
            LoggerMessage::Shutdown => break,
        }
    }

    writer.flush();
    writer.fsync();
}

// ──────────────────── event → JSONL mapping ────────────────────

fn event_to_log_entry(event: &ScanEvent) -> LogEntry {
    match event {
        ScanEvent::SessionStarted { types, config_hash } => {
            let mut entry = LogEntry::new(EventType::SessionStart, Severity::Info);
            entry.count = Some(*types as u64);
            entry.details = Some(format!("config_hash={config_hash}"));
            entry
        }
        ScanEvent::ClassifierTrainingStarted { samples, epochs } => {
            let mut entry = LogEntry::new(EventType::TrainingStart, Severity::Info);
            entry.count = Some(*samples as u64);
            entry.details = Some(format!("epochs={epochs}"));
            entry
        }
        ScanEvent::ClassifierTrainingCompleted {
            final_loss,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::TrainingComplete, Severity::Info);
            entry.score = Some(*final_loss);
            entry.duration_ms = Some(*duration_ms);
            entry.ok = Some(true);
            entry
        }
        ScanEvent::ClassifierUnavailable { reason } => {
            let mut entry = LogEntry::new(EventType::ClassifierUnavailable, Severity::Warning);
            entry.ok = Some(false);
            entry.error_code = Some("BREC-2004".to_string());
            entry.error_message = Some(reason.clone());
            entry
        }
        ScanEvent::ArtifactScanStarted { artifact } => {
            let mut entry = LogEntry::new(EventType::ArtifactScanStart, Severity::Info);
            entry.artifact = Some(artifact.clone());
            entry
        }
        ScanEvent::ArtifactScanCompleted {
            artifact,
            structured,
            carved,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::ArtifactScanComplete, Severity::Info);
            entry.artifact = Some(artifact.clone());
            entry.count = Some((structured + carved) as u64);
            entry.duration_ms = Some(*duration_ms);
            entry.ok = Some(true);
            entry.details = Some(format!("structured={structured} carved={carved}"));
            entry
        }
        ScanEvent::ArtifactError {
            artifact,
            code,
            message,
        } => {
            let mut entry = LogEntry::new(EventType::ArtifactError, Severity::Warning);
            entry.artifact = Some(artifact.clone());
            entry.ok = Some(false);
            entry.error_code = Some(code.clone());
            entry.error_message = Some(message.clone());
            entry
        }
        ScanEvent::SessionCompleted {
            types,
            candidates,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::SessionComplete, Severity::Info);
            entry.count = Some(*candidates as u64);
            entry.duration_ms = Some(*duration_ms);
            entry.details = Some(format!("types={types}"));
            entry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn jsonl_config(path: std::path::PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 2,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn logger_writes_every_event_before_shutdown_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let handle = spawn_event_logger(jsonl_config(path.clone()), 64).unwrap();

        handle.emit(ScanEvent::SessionStarted {
            types: 2,
            config_hash: "abc".to_string(),
        });
        handle.emit(ScanEvent::ArtifactScanStarted {
            artifact: "Notes".to_string(),
        });
        handle.emit(ScanEvent::ArtifactError {
            artifact: "Notes".to_string(),
            code: "BREC-2002".to_string(),
            message: "no such table: ZNOTE".to_string(),
        });
        handle.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "session_start");
        assert_eq!(lines[1]["artifact"], "Notes");
        assert_eq!(lines[2]["error_code"], "BREC-2002");
        assert_eq!(lines[2]["severity"], "warning");
    }

    #[test]
    fn shutdown_twice_is_harmless_and_late_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_event_logger(jsonl_config(dir.path().join("e.jsonl")), 4).unwrap();
        handle.shutdown();
        handle.shutdown();
        handle.emit(ScanEvent::ClassifierUnavailable {
            reason: "disabled".to_string(),
        });
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn completed_event_carries_total_count_and_split() {
        let entry = event_to_log_entry(&ScanEvent::ArtifactScanCompleted {
            artifact: "Messages".to_string(),
            structured: 2,
            carved: 5,
            duration_ms: 12,
        });
        assert_eq!(entry.count, Some(7));
        assert_eq!(entry.details.as_deref(), Some("structured=2 carved=5"));
        assert_eq!(entry.event, EventType::ArtifactScanComplete);
    }

    #[test]
    fn training_completed_records_loss() {
        let entry = event_to_log_entry(&ScanEvent::ClassifierTrainingCompleted {
            final_loss: 0.25,
            duration_ms: 40,
        });
        assert_eq!(entry.score, Some(0.25));
        assert_eq!(entry.ok, Some(true));
    }

    #[test]
    fn null_sink_accepts_anything() {
        NullSink.emit(ScanEvent::SessionCompleted {
            types: 0,
            candidates: 0,
            duration_ms: 0,
        });
    }
}
