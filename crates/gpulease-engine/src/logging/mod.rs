//! Logging utilities.
//!
//! This module centralizes logger initialization and the diagnostic channel
//! handles report failures through. It stays on the standard `log` facade;
//! `env_logger` is only installed by [`init_logging`].

mod diagnostics;
mod init;

pub use diagnostics::{
    set_warning_display, warning_display, Diagnostic, DiagnosticSink, LogSink, Operation,
    RecordingSink,
};
pub use init::{init_logging, LoggingConfig};
