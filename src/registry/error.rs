//! Registry error types
//!
//! Error types for input registration and lookup.

use super::key::PathKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another input already serves this path
    DuplicatePath(PathKey),
    /// No input is registered for this path
    InputNotFound(PathKey),
    /// The input's route cannot be changed while it is registered
    RouteImmutable(PathKey),
    /// A route swap tried to change the transport protocol
    ProtocolMismatch(PathKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicatePath(key) => write!(f, "path already registered: {}", key),
            RegistryError::InputNotFound(key) => write!(f, "no input registered for path: {}", key),
            RegistryError::RouteImmutable(key) => {
                write!(f, "route of input at {} cannot be changed", key)
            }
            RegistryError::ProtocolMismatch(key) => {
                write!(f, "route swap for {} changes the protocol", key)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
