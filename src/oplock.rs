//! Operation markers and result files
//!
//! Only one device operation may run at a time. A running operation owns a
//! marker file in the state directory, created exclusively and removed when
//! the operation ends. Erase and program outcomes are written to result
//! files so `rcpld status` can report them after the process exits.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from the state directory
#[derive(Debug, Error)]
pub enum OpLockError {
    /// Another operation holds its marker
    #[error("{0}; try again later")]
    Busy(Operation),
    /// Filesystem access failed
    #[error("state directory {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// A device operation that takes the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Erase,
    Verify,
    Program,
}

impl Operation {
    /// Marker file probe order
    const ALL: [Operation; 3] = [Operation::Erase, Operation::Verify, Operation::Program];

    fn marker(self) -> &'static str {
        match self {
            Operation::Erase => "erase",
            Operation::Verify => "verify",
            Operation::Program => "program",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Operation::Erase => "CPLD Erase Operation is Running",
            Operation::Verify => "CPLD Verify Operation is Running",
            Operation::Program => "CPLD Program Operation is Running",
        };
        f.write_str(msg)
    }
}

/// Persisted operation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Erase,
    Flash,
}

impl ResultKind {
    fn file(self) -> &'static str {
        match self {
            ResultKind::Erase => "cplderase",
            ResultKind::Flash => "cpldflash",
        }
    }

    fn message(self, success: bool) -> &'static str {
        match (self, success) {
            (ResultKind::Erase, true) => "CPLD Device Erased Successfully",
            (ResultKind::Erase, false) => "CPLD Device Erased Failed",
            (ResultKind::Flash, true) => "CPLD Device Flashed Successfully",
            (ResultKind::Flash, false) => "CPLD Device Flashed Failed",
        }
    }

    fn not_initiated(self) -> &'static str {
        match self {
            ResultKind::Erase => "Erase Operation is not initiated",
            ResultKind::Flash => "Flashing Operation is not initiated",
        }
    }
}

/// Directory holding markers and result files
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn io_error(path: &Path, source: io::Error) -> OpLockError {
        OpLockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Take the operation lock
    ///
    /// Fails with [`OpLockError::Busy`] if any operation marker exists.
    pub fn begin(&self, op: Operation) -> Result<OpGuard, OpLockError> {
        fs::create_dir_all(&self.root).map_err(|e| Self::io_error(&self.root, e))?;

        if let Some(running) = self.running() {
            return Err(OpLockError::Busy(running));
        }

        let marker = self.root.join(op.marker());
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {
                log::debug!("Created operation marker {}", marker.display());
                Ok(OpGuard { marker })
            }
            // Lost a race with another process
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(OpLockError::Busy(op)),
            Err(e) => Err(Self::io_error(&marker, e)),
        }
    }

    /// The operation currently holding the lock, if any
    pub fn running(&self) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| self.root.join(op.marker()).exists())
    }

    /// Status line for the running operation
    pub fn status_message(&self) -> String {
        match self.running() {
            Some(op) => op.to_string(),
            None => "No CPLD Operation Initiated".to_string(),
        }
    }

    /// Record an operation outcome
    pub fn write_result(&self, kind: ResultKind, success: bool) -> Result<(), OpLockError> {
        fs::create_dir_all(&self.root).map_err(|e| Self::io_error(&self.root, e))?;
        let path = self.root.join(kind.file());
        fs::write(&path, kind.message(success)).map_err(|e| Self::io_error(&path, e))
    }

    /// Last recorded outcome, or the not-initiated text
    pub fn read_result(&self, kind: ResultKind) -> String {
        let path = self.root.join(kind.file());
        match fs::read_to_string(&path) {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("Failed to read {}: {}", path.display(), e);
                }
                kind.not_initiated().to_string()
            }
        }
    }
}

/// Held operation lock; the marker is removed on drop
#[derive(Debug)]
pub struct OpGuard {
    marker: PathBuf,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.marker) {
            log::warn!("Failed to remove {}: {}", self.marker.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> StateDir {
        let root = std::env::temp_dir().join(format!("rcpld-test-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        StateDir::new(root)
    }

    #[test]
    fn test_lock_is_exclusive() {
        let state = scratch("lock");
        assert_eq!(state.status_message(), "No CPLD Operation Initiated");

        let guard = state.begin(Operation::Program).unwrap();
        assert_eq!(state.running(), Some(Operation::Program));
        assert_eq!(state.status_message(), "CPLD Program Operation is Running");

        let err = state.begin(Operation::Erase).unwrap_err();
        assert!(matches!(err, OpLockError::Busy(Operation::Program)));

        drop(guard);
        assert_eq!(state.running(), None);
        assert!(state.begin(Operation::Verify).is_ok());
        let _ = fs::remove_dir_all(state.path());
    }

    #[test]
    fn test_results() {
        let state = scratch("results");
        assert_eq!(state.read_result(ResultKind::Erase), "Erase Operation is not initiated");
        assert_eq!(
            state.read_result(ResultKind::Flash),
            "Flashing Operation is not initiated"
        );

        state.write_result(ResultKind::Erase, true).unwrap();
        state.write_result(ResultKind::Flash, false).unwrap();
        assert_eq!(state.read_result(ResultKind::Erase), "CPLD Device Erased Successfully");
        assert_eq!(state.read_result(ResultKind::Flash), "CPLD Device Flashed Failed");
        let _ = fs::remove_dir_all(state.path());
    }
}
