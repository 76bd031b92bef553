//! Typed error kinds for the archive creation core (spec §7).
//!
//! Most code in this crate returns `anyhow::Error` the way the rest of the
//! workspace does; [`ArchiveCoreError`] exists for the handful of spots
//! where a caller needs to match on *kind* rather than just log a message
//! (run result, incremental map format checks, strict include patterns).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveCoreError {
    #[error("aborted")]
    Aborted,

    #[error("file not found: {0:?}")]
    FileNotFound(String),

    #[error("error writing file {0:?}: {1}")]
    WriteFile(String, String),

    #[error("error reading file {0:?}: {1}")]
    ReadFile(String, String),

    #[error("not a directory: {0:?}")]
    NotADirectory(String),

    #[error("no storage name given")]
    NoStorageName,

    #[error("invalid device block size: {0}")]
    InvalidDeviceBlockSize(u64),

    #[error("not an incremental list file: {0:?}")]
    NotAnIncrementalFile(String),

    #[error("wrong incremental list file version: {0}")]
    WrongIncrementalFileVersion(u16),

    #[error("delta source not found: {0:?}")]
    DeltaSourceNotFound(String),
}

/// The run controller's terminal result (spec §6 "Run result").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// `NONE` — the run completed without error.
    None,
    /// External abort request took effect, regardless of any `failError`.
    Aborted,
    /// The first sticky fatal error encountered by any task.
    Error(String),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::None)
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::None => write!(f, "ok"),
            RunResult::Aborted => write!(f, "aborted"),
            RunResult::Error(msg) => write!(f, "{msg}"),
        }
    }
}
