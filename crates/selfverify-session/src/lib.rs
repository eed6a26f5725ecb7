//! Session verification controller.
//!
//! Drives the interactive SAS handshake that lets two sessions of the same
//! account trust each other:
//! - **State model**: closed [`VerificationState`] / [`VerificationEvent`] sets
//! - **Machine**: pure `reduce(state, input) -> (next, effects)`
//! - **Controller**: single-consumer event queue that applies transitions and
//!   runs their effects against a [`VerificationService`]
//! - **Recovery wait**: best-effort, bounded wait for key backup recovery
//!   before reporting completion
//!
//! The cryptography itself (key agreement, MACs, SAS encoding) belongs to the
//! external verification engine behind [`VerificationService`].

pub mod controller;
pub mod error;
pub mod event;
pub mod machine;
pub mod recovery;
pub mod service;
pub mod sim;
pub mod state;

pub use controller::{ControllerHandle, VerificationController, WeakControllerHandle};
pub use error::VerificationError;
pub use event::{DelegateCallback, VerificationEvent};
pub use machine::{Effect, Input, Transition, on_entry, reduce};
pub use recovery::{RecoveryWaitOutcome, wait_for_recovery};
pub use service::{RecoveryMonitor, RecoveryStatus, VerificationService};
pub use state::{ChallengeData, SasEmoji, VerificationState};
