//! Verification events and remote delegate callbacks.

use std::fmt;

use crate::state::ChallengeData;

/// Everything that can drive the verification state machine.
///
/// Local user intents (`RequestVerification`, `AcceptChallenge`, `Cancel`, ...)
/// and remote engine callbacks (`Did*`) share one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationEvent {
    /// Request verification from another session.
    RequestVerification,
    /// The current verification request has been accepted.
    DidAcceptVerificationRequest,
    /// Start a SAS verification flow.
    StartSasVerification,
    /// A SAS verification flow has started.
    DidStartSasVerification,
    /// The SAS challenge arrived.
    DidReceiveChallenge(ChallengeData),
    /// The challenge matches.
    AcceptChallenge,
    /// The challenge does not match.
    DeclineChallenge,
    /// The remote party accepted the challenge.
    DidAcceptChallenge,
    /// Request cancellation.
    Cancel,
    /// Verification canceled.
    DidCancel,
    /// A request failed.
    DidFail,
    /// Reset the flow to the initial state.
    Reset,
}

impl VerificationEvent {
    /// Stable name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestVerification => "RequestVerification",
            Self::DidAcceptVerificationRequest => "DidAcceptVerificationRequest",
            Self::StartSasVerification => "StartSasVerification",
            Self::DidStartSasVerification => "DidStartSasVerification",
            Self::DidReceiveChallenge(_) => "DidReceiveChallenge",
            Self::AcceptChallenge => "AcceptChallenge",
            Self::DeclineChallenge => "DeclineChallenge",
            Self::DidAcceptChallenge => "DidAcceptChallenge",
            Self::Cancel => "Cancel",
            Self::DidCancel => "DidCancel",
            Self::DidFail => "DidFail",
            Self::Reset => "Reset",
        }
    }
}

impl fmt::Display for VerificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callbacks from the verification engine's delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateCallback {
    AcceptedVerificationRequest,
    StartedSasVerification,
    ReceivedVerificationData(ChallengeData),
    Finished,
    Cancelled,
    Failed,
}

impl From<DelegateCallback> for VerificationEvent {
    fn from(callback: DelegateCallback) -> Self {
        match callback {
            DelegateCallback::AcceptedVerificationRequest => Self::DidAcceptVerificationRequest,
            DelegateCallback::StartedSasVerification => Self::DidStartSasVerification,
            DelegateCallback::ReceivedVerificationData(data) => Self::DidReceiveChallenge(data),
            DelegateCallback::Finished => Self::DidAcceptChallenge,
            DelegateCallback::Cancelled => Self::DidCancel,
            DelegateCallback::Failed => Self::DidFail,
        }
    }
}
