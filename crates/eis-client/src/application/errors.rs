//! Error taxonomy for every public input operation.
//!
//! Each variant tells the caller how far the failure reaches:
//!
//! | Variant                  | Scope                         | Wire traffic before failing |
//! |--------------------------|-------------------------------|-----------------------------|
//! | `Connection`             | whole session, permanent      | possibly                    |
//! | `ProtocolViolation`      | one device or object          | none for wrong-state calls  |
//! | `CapabilityUnavailable`  | one capability                | none                        |
//! | `Validation`             | one call                      | none                        |
//! | `Cancelled`              | one call, resources released  | possibly                    |
//! | `PartialGesture`         | one call, resources released  | yes                         |

use eis_core::{Capability, KeymapError, ProtocolError};
use thiserror::Error;

/// Error returned by every input operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    /// The channel is closed, failed to write, or the server disconnected.
    /// Every later call fails with this error without touching the wire.
    #[error("connection error: {0}")]
    Connection(String),

    /// A malformed message, a duplicate bind, or a call in the wrong
    /// emulation state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No usable device offers this capability.
    #[error("no device with {0} capability is available")]
    CapabilityUnavailable(Capability),

    /// A caller-supplied argument is out of range.  Nothing was sent.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The caller stopped waiting for the gesture.  The session stays
    /// usable.
    #[error("gesture cancelled by the caller")]
    Cancelled,

    /// A multi-step gesture failed after some of its steps were committed.
    /// Held buttons, keys and touches were released before returning.
    #[error("gesture failed after {completed_steps} completed steps: {source}")]
    PartialGesture {
        completed_steps: usize,
        source: Box<InputError>,
    },
}

impl InputError {
    /// Wraps `cause` as a partial failure after `completed_steps`.
    pub fn partial(completed_steps: usize, cause: InputError) -> Self {
        InputError::PartialGesture {
            completed_steps,
            source: Box::new(cause),
        }
    }

    /// Returns `true` if the error means the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            InputError::Connection(_) => true,
            InputError::PartialGesture { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<KeymapError> for InputError {
    fn from(e: KeymapError) -> Self {
        InputError::Validation(e.to_string())
    }
}

impl From<ProtocolError> for InputError {
    fn from(e: ProtocolError) -> Self {
        InputError::ProtocolViolation(e.to_string())
    }
}

impl From<std::io::Error> for InputError {
    fn from(e: std::io::Error) -> Self {
        InputError::Connection(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
