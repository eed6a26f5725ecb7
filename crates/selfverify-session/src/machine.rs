//! Pure transition function for the verification flow.
//!
//! [`reduce`] maps `(state, input)` to a [`Transition`]: the next state (if
//! any) plus the effects the controller must run. Effects are produced only
//! here, so an entry into a state issues its outbound call exactly once no
//! matter how often the state is read afterwards.

use crate::event::VerificationEvent;
use crate::state::VerificationState;

/// Work the controller performs after applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    RequestVerification,
    StartVerification,
    ApproveVerification,
    DeclineVerification,
    CancelVerification,
    /// Wait, bounded, for key backup recovery and then report back with
    /// [`Input::RecoveryWaitFinished`].
    AwaitRecovery,
}

impl Effect {
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestVerification => "request_verification",
            Self::StartVerification => "start_verification",
            Self::ApproveVerification => "approve_verification",
            Self::DeclineVerification => "decline_verification",
            Self::CancelVerification => "cancel_verification",
            Self::AwaitRecovery => "await_recovery",
        }
    }
}

/// Input consumed by [`reduce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A user intent or remote callback.
    Event(VerificationEvent),
    /// The post-acceptance recovery wait ended, however it ended.
    RecoveryWaitFinished,
}

impl Input {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Event(event) => event.name(),
            Self::RecoveryWaitFinished => "RecoveryWaitFinished",
        }
    }
}

impl From<VerificationEvent> for Input {
    fn from(event: VerificationEvent) -> Self {
        Self::Event(event)
    }
}

/// Outcome of reducing one input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transition {
    /// Replacement state, `None` when the input does not change the state.
    pub next: Option<VerificationState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// No state change, no effects.
    pub fn ignore() -> Self {
        Self::default()
    }

    /// Enter `state`, running its on-entry effect if it has one.
    pub fn enter(state: VerificationState) -> Self {
        let effects = on_entry(&state).into_iter().collect();
        Self {
            next: Some(state),
            effects,
        }
    }

    /// Keep the current state but run `effect`.
    pub fn stay(effect: Effect) -> Self {
        Self {
            next: None,
            effects: vec![effect],
        }
    }

    /// Whether this transition does anything at all.
    pub fn is_noop(&self) -> bool {
        self.next.is_none() && self.effects.is_empty()
    }
}

/// On-entry effect table.
pub const fn on_entry(state: &VerificationState) -> Option<Effect> {
    match state {
        VerificationState::RequestingVerification => Some(Effect::RequestVerification),
        VerificationState::StartingSasVerification => Some(Effect::StartVerification),
        VerificationState::Replying { accept: true, .. } => Some(Effect::ApproveVerification),
        VerificationState::Replying { accept: false, .. } => Some(Effect::DeclineVerification),
        VerificationState::Canceling => Some(Effect::CancelVerification),
        VerificationState::Initial
        | VerificationState::VerificationRequestAccepted
        | VerificationState::SasVerificationStarted
        | VerificationState::ChallengeReceived(_)
        | VerificationState::Canceled
        | VerificationState::Completed => None,
    }
}

/// Reduce one input against the current state.
pub fn reduce(state: &VerificationState, input: Input) -> Transition {
    match input {
        Input::Event(event) => reduce_event(state, event),
        Input::RecoveryWaitFinished => match state {
            VerificationState::Replying { .. } => Transition::enter(VerificationState::Completed),
            _ => Transition::ignore(),
        },
    }
}

fn reduce_event(state: &VerificationState, event: VerificationEvent) -> Transition {
    use VerificationEvent as E;
    use VerificationState as S;

    match (state, event) {
        // Per-state rules.
        (S::Initial | S::Canceled, E::RequestVerification) => {
            Transition::enter(S::RequestingVerification)
        }
        (S::Initial | S::VerificationRequestAccepted, E::StartSasVerification) => {
            Transition::enter(S::StartingSasVerification)
        }
        (S::RequestingVerification, E::DidAcceptVerificationRequest) => {
            Transition::enter(S::VerificationRequestAccepted)
        }
        (S::Canceled, E::Reset) => Transition::enter(S::Initial),
        (S::SasVerificationStarted, E::DidReceiveChallenge(data)) => {
            Transition::enter(S::ChallengeReceived(data))
        }
        (S::ChallengeReceived(data), E::AcceptChallenge) => Transition::enter(S::Replying {
            data: data.clone(),
            accept: true,
        }),
        (S::ChallengeReceived(data), E::DeclineChallenge) => Transition::enter(S::Replying {
            data: data.clone(),
            accept: false,
        }),
        (S::Replying { accept: true, .. }, E::DidAcceptChallenge) => {
            Transition::stay(Effect::AwaitRecovery)
        }
        (S::Replying { accept: false, .. }, E::DidAcceptChallenge) => {
            Transition::enter(S::Completed)
        }

        // Rules that hold in every state.
        (_, E::DidStartSasVerification) => Transition::enter(S::SasVerificationStarted),
        (S::Initial | S::Completed | S::Canceled, E::Cancel) => Transition::ignore(),
        // The engine does not reliably call back after a local cancel, so go
        // straight to Canceled instead of through Canceling.
        (_, E::Cancel) => Transition {
            next: Some(S::Canceled),
            effects: vec![Effect::CancelVerification],
        },
        (_, E::DidCancel) => Transition::enter(S::Canceled),
        (S::RequestingVerification, E::DidFail) => Transition::enter(S::Initial),
        (_, E::DidFail) => Transition::enter(S::Canceled),

        (
            _,
            E::RequestVerification
            | E::DidAcceptVerificationRequest
            | E::StartSasVerification
            | E::DidReceiveChallenge(_)
            | E::AcceptChallenge
            | E::DeclineChallenge
            | E::DidAcceptChallenge
            | E::Reset,
        ) => Transition::ignore(),
    }
}
