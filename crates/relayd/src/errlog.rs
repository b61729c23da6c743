//! Error log shared by every handler.
//!
//! Each handled [`ChatError`] becomes a structured `tracing` event whose level
//! follows the recovery decision, and optionally one JSON line appended to an
//! error-log file. Recording never fails the caller: if the file cannot be
//! written the failure is reported on stderr and dropped.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use relay_core::{ChatError, ErrorDetails, ErrorKind, Phase, Recovery};

/// One line of the error-log file.
#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    phase: Phase,
    #[serde(flatten)]
    details: &'a ErrorDetails,
}

/// Records handled errors.
#[derive(Debug, Default)]
pub struct ErrorLog {
    /// JSON-lines file, if configured
    path: Option<PathBuf>,

    /// Errors recorded so far
    recorded: AtomicU64,
}

impl ErrorLog {
    /// Creates a log that also appends to `path`, when given.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            recorded: AtomicU64::new(0),
        }
    }

    /// Creates a log that only emits tracing events.
    pub fn tracing_only() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of errors recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Records `error`, raised during `phase`.
    pub fn record(&self, err: &ChatError, phase: Phase) {
        self.recorded.fetch_add(1, Ordering::Relaxed);

        let details = err.details();
        let cause_type = details.original_type.as_deref().unwrap_or("none");
        let cause = details.original_error.as_deref().unwrap_or("");

        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    kind = %err.kind(),
                    phase = %phase,
                    cause_type = cause_type,
                    cause = cause,
                    timestamp = %details.timestamp,
                    "{}",
                    err.message()
                )
            };
        }

        if err.kind() == ErrorKind::Disconnection {
            emit!(debug);
        } else {
            match err.recovery(phase) {
                Recovery::AbortServer => emit!(error),
                Recovery::TerminateSession | Recovery::PruneRecipient => emit!(warn),
                Recovery::RejectJoin | Recovery::Continue => emit!(info),
            }
        }

        if let Some(path) = &self.path {
            if let Err(e) = append_entry(path, &LogEntry { phase, details: &details }) {
                eprintln!("⚠️ Failed to write error log {}: {e}", path.display());
            }
        }
    }
}

fn append_entry(path: &Path, entry: &LogEntry<'_>) -> io::Result<()> {
    let mut line = serde_json::to_string(entry).map_err(io::Error::other)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
