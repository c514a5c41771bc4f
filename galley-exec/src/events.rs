use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

pub use galley_core::cab::Severity;

/// A structured run-level record. The core emits these; the sink decides how
/// to render and where to write them.
#[derive(Debug, Clone)]
pub enum Event {
    RunStarted {
        run_id: Uuid,
        recipe: String,
        at: DateTime<Utc>,
    },
    RunFinished {
        run_id: Uuid,
        succeeded: bool,
        at: DateTime<Utc>,
    },
    StepStarted {
        run_id: Uuid,
        fqname: String,
    },
    StepSkipped {
        run_id: Uuid,
        fqname: String,
        reason: String,
    },
    StepSucceeded {
        run_id: Uuid,
        fqname: String,
    },
    StepFailed {
        run_id: Uuid,
        fqname: String,
        message: String,
    },
    /// One (possibly wrangler-modified) line of cab output. `display: None`
    /// means the line was suppressed from display.
    CabOutput {
        run_id: Uuid,
        fqname: String,
        line: String,
        display: Option<String>,
        severity: Severity,
        from_stderr: bool,
    },
    Warning {
        run_id: Uuid,
        fqname: String,
        message: String,
    },
}

/// Receives run events. Implementations must be safe for concurrent emits;
/// each event is one atomic record (scattered iterations share one sink).
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Routes cab output and step transitions through `tracing`.
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn emit(&self, event: Event) {
        match &event {
            Event::RunStarted { recipe, .. } => tracing::info!(%recipe, "run started"),
            Event::RunFinished { succeeded, .. } => {
                tracing::info!(succeeded, "run finished")
            }
            Event::StepStarted { fqname, .. } => tracing::info!(step = %fqname, "running"),
            Event::StepSkipped { fqname, reason, .. } => {
                tracing::info!(step = %fqname, %reason, "skipped")
            }
            Event::StepSucceeded { fqname, .. } => tracing::info!(step = %fqname, "succeeded"),
            Event::StepFailed { fqname, message, .. } => {
                tracing::error!(step = %fqname, %message, "failed")
            }
            Event::CabOutput {
                fqname,
                display,
                severity,
                ..
            } => {
                if let Some(line) = display {
                    match severity {
                        Severity::Debug => tracing::debug!(step = %fqname, "{line}"),
                        Severity::Info => tracing::info!(step = %fqname, "{line}"),
                        Severity::Warning => tracing::warn!(step = %fqname, "{line}"),
                        Severity::Error => tracing::error!(step = %fqname, "{line}"),
                    }
                }
            }
            Event::Warning {
                fqname, message, ..
            } => tracing::warn!(step = %fqname, "{message}"),
        }
    }
}

/// Writes events as JSON lines on stdout.
pub struct JsonLogSink;

#[async_trait]
impl LogSink for JsonLogSink {
    async fn emit(&self, event: Event) {
        let record = match event {
            Event::RunStarted { run_id, recipe, at } => {
                json!({"type": "run.started", "run_id": run_id.to_string(), "recipe": recipe, "at": at.to_rfc3339()})
            }
            Event::RunFinished {
                run_id,
                succeeded,
                at,
            } => {
                json!({"type": "run.finished", "run_id": run_id.to_string(), "succeeded": succeeded, "at": at.to_rfc3339()})
            }
            Event::StepStarted { run_id, fqname } => {
                json!({"type": "step.started", "run_id": run_id.to_string(), "step": fqname})
            }
            Event::StepSkipped {
                run_id,
                fqname,
                reason,
            } => {
                json!({"type": "step.skipped", "run_id": run_id.to_string(), "step": fqname, "reason": reason})
            }
            Event::StepSucceeded { run_id, fqname } => {
                json!({"type": "step.succeeded", "run_id": run_id.to_string(), "step": fqname})
            }
            Event::StepFailed {
                run_id,
                fqname,
                message,
            } => {
                json!({"type": "step.failed", "run_id": run_id.to_string(), "step": fqname, "message": message})
            }
            Event::CabOutput {
                run_id,
                fqname,
                display,
                from_stderr,
                ..
            } => match display {
                Some(line) => {
                    json!({"type": "cab.output", "run_id": run_id.to_string(), "step": fqname, "line": line, "stderr": from_stderr})
                }
                None => return,
            },
            Event::Warning {
                run_id,
                fqname,
                message,
            } => {
                json!({"type": "warning", "run_id": run_id.to_string(), "step": fqname, "message": message})
            }
        };
        println!("{}", serde_json::to_string(&record).unwrap_or_default());
    }
}

/// Collects events in memory; used by tests.
#[derive(Default)]
pub struct MemoryLogSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

pub struct CompositeLogSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl CompositeLogSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }
}

impl Default for CompositeLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for CompositeLogSink {
    async fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

pub struct NoOpLogSink;

#[async_trait]
impl LogSink for NoOpLogSink {
    async fn emit(&self, _event: Event) {}
}

/// Appends one JSON record per event to a log file. Writes are line-atomic
/// behind a mutex, so scattered iterations can share one sink.
pub struct FileLogSink {
    file: std::sync::Mutex<std::fs::File>,
}

impl FileLogSink {
    pub fn create(path: &std::path::Path) -> std::io::Result<FileLogSink> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(FileLogSink {
            file: std::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn emit(&self, event: Event) {
        use std::io::Write;
        let record = match &event {
            Event::CabOutput {
                fqname,
                display: Some(line),
                from_stderr,
                ..
            } => {
                json!({"type": "cab.output", "step": fqname, "line": line, "stderr": from_stderr})
            }
            Event::CabOutput { .. } => return,
            Event::StepStarted { fqname, .. } => json!({"type": "step.started", "step": fqname}),
            Event::StepSkipped { fqname, reason, .. } => {
                json!({"type": "step.skipped", "step": fqname, "reason": reason})
            }
            Event::StepSucceeded { fqname, .. } => {
                json!({"type": "step.succeeded", "step": fqname})
            }
            Event::StepFailed {
                fqname, message, ..
            } => json!({"type": "step.failed", "step": fqname, "message": message}),
            Event::Warning {
                fqname, message, ..
            } => json!({"type": "warning", "step": fqname, "message": message}),
            Event::RunStarted { recipe, at, .. } => {
                json!({"type": "run.started", "recipe": recipe, "at": at.to_rfc3339()})
            }
            Event::RunFinished { succeeded, at, .. } => {
                json!({"type": "run.finished", "succeeded": succeeded, "at": at.to_rfc3339()})
            }
        };
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(file, "{}", serde_json::to_string(&record).unwrap_or_default());
    }
}
