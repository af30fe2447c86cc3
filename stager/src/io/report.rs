//! Human-readable deployment trace.
//!
//! # Separation of Concerns
//!
//! - **Reporter (this module)**: product output. One line per transition (fetch
//!   started, move performed, unpack attempt failed, rollback performed, ...).
//!   Always emitted, unaffected by `RUST_LOG`.
//!
//! - **Tracing (`logging`)**: dev diagnostics via `RUST_LOG`, output to stderr.

/// Line-oriented message sinks.
pub trait Reporter {
    fn info(&self, line: &str);
    fn warn(&self, line: &str);
    fn error(&self, line: &str);
}

/// Writes info lines to stdout and warnings/errors to stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn info(&self, line: &str) {
        if !self.quiet {
            println!("{line}");
        }
    }

    fn warn(&self, line: &str) {
        eprintln!("warning: {line}");
    }

    fn error(&self, line: &str) {
        eprintln!("error: {line}");
    }
}
