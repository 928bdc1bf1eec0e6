use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::device::ConsumerId;

/// Handle operation that produced a diagnostic.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    Construct,
    SetDevice,
    ReserveGpu,
    SynchronizeQueue,
    ReplicateObject,
    Destruct,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Construct => "construct",
            Operation::SetDevice => "set_device",
            Operation::ReserveGpu => "reserve_gpu",
            Operation::SynchronizeQueue => "synchronize_queue",
            Operation::ReplicateObject => "replicate_object",
            Operation::Destruct => "destruct",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One human-readable failure report from a handle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Diagnostic {
    pub consumer: ConsumerId,
    /// Label from the handle's configuration, if any.
    pub label: Option<String>,
    pub operation: Operation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuHandle ({}", self.consumer)?;
        if let Some(label) = &self.label {
            write!(f, " {label:?}")?;
        }
        write!(f, ") {}: {}", self.operation, self.message)
    }
}

/// Destination for handle diagnostics.
///
/// Sinks only observe; whatever a sink does, the handle's control flow is the
/// same.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

static WARNING_DISPLAY: AtomicBool = AtomicBool::new(true);

/// Turns the process-wide diagnostic display on or off.
pub fn set_warning_display(enabled: bool) {
    WARNING_DISPLAY.store(enabled, Ordering::Relaxed);
}

/// Returns whether diagnostics are currently displayed.
pub fn warning_display() -> bool {
    WARNING_DISPLAY.load(Ordering::Relaxed)
}

/// Default sink: forwards to the `log` facade, gated by [`warning_display`].
#[derive(Debug, Copy, Clone, Default)]
pub struct LogSink;

impl LogSink {
    /// Logs `diagnostic` if the display is on; returns whether it did.
    pub fn forward(&self, diagnostic: &Diagnostic) -> bool {
        let shown = warning_display();
        if shown {
            log::error!(target: "gpulease::diagnostics", "{diagnostic}");
        }
        shown
    }
}

impl DiagnosticSink for LogSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.forward(diagnostic);
    }
}

/// Sink that keeps every diagnostic in memory.
///
/// Has its own enable flag so inspection does not depend on the global toggle.
#[derive(Debug)]
pub struct RecordingSink {
    enabled: AtomicBool,
    records: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        if self.enabled.load(Ordering::Relaxed) {
            self.records.lock().push(diagnostic.clone());
        }
    }
}
