//! Verification state model.

use std::fmt;

use serde::Serialize;

/// One emoji of a SAS challenge, as rendered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SasEmoji {
    pub symbol: String,
    pub description: String,
}

impl SasEmoji {
    pub fn new(symbol: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            description: description.into(),
        }
    }
}

/// The short authentication string received from the remote party.
///
/// Opaque to the controller: it is carried from `DidReceiveChallenge` into
/// `ChallengeReceived` and `Replying` and only ever read by the presentation
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeData {
    Emojis(Vec<SasEmoji>),
    Decimals(Vec<u16>),
}

impl ChallengeData {
    /// Build an emoji challenge from bare symbols.
    pub fn emojis<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Emojis(
            symbols
                .into_iter()
                .map(|s| SasEmoji::new(s, String::new()))
                .collect(),
        )
    }
}

impl fmt::Display for ChallengeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emojis(emojis) => {
                for emoji in emojis {
                    f.write_str(&emoji.symbol)?;
                }
                Ok(())
            }
            Self::Decimals(numbers) => {
                let parts: Vec<String> = numbers.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join("-"))
            }
        }
    }
}

/// Progress of a single verification flow.
///
/// Exactly one value is current at any time. Transitions replace the whole
/// value; nothing is mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum VerificationState {
    /// Before verification started, or after a failed request.
    #[default]
    Initial,
    /// Request sent, waiting for the other session to accept.
    RequestingVerification,
    /// Request accepted. Waiting for SAS start.
    VerificationRequestAccepted,
    /// SAS start call in flight.
    StartingSasVerification,
    /// SAS flow active, waiting for the challenge.
    SasVerificationStarted,
    /// Challenge received and shown to the user.
    ChallengeReceived(ChallengeData),
    /// User decided; approve/decline call in flight.
    Replying { data: ChallengeData, accept: bool },
    /// Cancellation in flight. No transition targets it at the moment.
    Canceling,
    /// Canceled, locally or remotely.
    Canceled,
    /// Verification successful.
    Completed,
}

impl VerificationState {
    /// Stable name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::RequestingVerification => "RequestingVerification",
            Self::VerificationRequestAccepted => "VerificationRequestAccepted",
            Self::StartingSasVerification => "StartingSasVerification",
            Self::SasVerificationStarted => "SasVerificationStarted",
            Self::ChallengeReceived(_) => "ChallengeReceived",
            Self::Replying { .. } => "Replying",
            Self::Canceling => "Canceling",
            Self::Canceled => "Canceled",
            Self::Completed => "Completed",
        }
    }

    /// The challenge currently on display, if any.
    pub const fn challenge(&self) -> Option<&ChallengeData> {
        match self {
            Self::ChallengeReceived(data) | Self::Replying { data, .. } => Some(data),
            _ => None,
        }
    }

    /// `Completed` is the only state with no way out.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// States in which a local `Cancel` is a no-op.
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Initial | Self::Completed | Self::Canceled)
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
