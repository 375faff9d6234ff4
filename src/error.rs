//! Error types
//!
//! A single crate-level error with the registry errors nested inside it,
//! in the same shape as the per-module errors of the registry.

use std::io;

use thiserror::Error;

use crate::registry::RegistryError;
use crate::scheduler::WorkerId;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or stream I/O failure (reset, timeout, unexpected EOF)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Declared sizes in the input stream cannot describe a valid frame.
    /// The session that produced it is unusable.
    #[error("fatal framing error: {0}")]
    Framing(String),

    /// Registration or lookup failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Media type name not known to the reader table
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Route could not be resolved or bound
    #[error("route error: {0}")]
    Route(String),

    /// Client sent something that is not a supported HTTP request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A bounded wait elapsed
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Worker was started twice
    #[error("worker {0} is already started")]
    AlreadyStarted(WorkerId),

    /// Operation was interrupted by `stop()`
    #[error("stopped")]
    Stopped,
}

impl Error {
    /// Whether the error is a terminal decode error (as opposed to a transient one)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Framing(_))
    }

    /// Whether the error was caused by a cooperative stop
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Framing("negative header size".into()).is_fatal());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_fatal());
        assert!(!Error::Stopped.is_fatal());
        assert!(Error::Stopped.is_stopped());
    }

    #[test]
    fn test_registry_error_is_transparent() {
        let err: Error = RegistryError::DuplicatePath("live/a".into()).into();
        assert_eq!(err.to_string(), "path already registered: /live/a");
    }
}
