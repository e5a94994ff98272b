use std::path::PathBuf;

use shared::domain::ServoId;
use thiserror::Error;

/// Failures at the servo bus boundary. Always absorbed close to the
/// call site: a single servo failing never aborts a sweep or a frame.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus init failed on {port}: {reason}")]
    Init { port: String, reason: String },
    #[error("servo {id} command failed: {reason}")]
    Command { id: ServoId, reason: String },
    #[error("bus shutdown failed: {reason}")]
    Shutdown { reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no recorded program named '{0}'")]
    NotFound(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}, line {line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("robot is not connected")]
    NotConnected,
    /// Another motion holds the busy claim. A status, not a fault:
    /// concurrent triggers are rejected, never queued.
    #[error("another motion is already running")]
    Busy,
    #[error("no recorded program named '{0}'")]
    ProgramNotFound(String),
    /// The program exists but could not be loaded. Deliberately distinct
    /// from `ProgramNotFound`: a malformed file never triggers the
    /// procedural fallback.
    #[error("program '{name}' failed to load")]
    BadProgram {
        name: String,
        #[source]
        source: StoreError,
    },
}
