//! The input backend seam and the use case that runs gestures through it.
//!
//! [`InputBackend`] is what the rest of the program needs from a connected
//! session: perform a gesture, wait for a round trip, close.  The real
//! implementation is `InputSession` in the infrastructure layer; tests use
//! the mockall-generated `MockInputBackend`.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::errors::InputError;
use crate::application::gestures::Gesture;

/// A connected input session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputBackend: Send + Sync {
    /// Performs one gesture to completion.
    async fn perform(&self, gesture: Gesture) -> Result<(), InputError>;

    /// Waits until the server has processed everything sent so far.
    async fn sync(&self) -> Result<(), InputError>;

    /// Releases all held input and disconnects.
    async fn close(&self) -> Result<(), InputError>;
}

/// Runs `gestures` in order, then syncs and closes the backend.
///
/// Stops at the first failing gesture.  The backend is closed on every
/// path; a close failure is only reported if the gestures succeeded.
///
/// # Errors
///
/// Returns the first gesture error, or the sync/close error.
pub async fn perform_all(backend: &dyn InputBackend, gestures: Vec<Gesture>) -> Result<(), InputError> {
    let total = gestures.len();
    let mut result = Ok(());
    for (i, gesture) in gestures.into_iter().enumerate() {
        let name = gesture.name();
        if let Err(e) = backend.perform(gesture).await {
            warn!("{name} failed ({}/{total}): {e}", i + 1);
            result = Err(e);
            break;
        }
        info!("{name} done ({}/{total})", i + 1);
    }

    if result.is_ok() {
        result = backend.sync().await;
    }
    let closed = backend.close().await;
    result.and(closed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
