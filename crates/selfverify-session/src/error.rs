//! Verification error types.

/// Errors surfaced by collaborators and by the controller handle.
///
/// None of these ever end up stored in [`crate::VerificationState`]: service
/// failures collapse into a `DidFail` transition and recovery failures are
/// swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("Verification service call failed: {0}")]
    Service(String),

    #[error("Recovery status unavailable: {0}")]
    Recovery(String),

    #[error("Verification controller has shut down")]
    ControllerClosed,

    #[error("Verification controller queue is full")]
    QueueFull,
}
