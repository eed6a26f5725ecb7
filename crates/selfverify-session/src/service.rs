//! Collaborators the controller drives.
//!
//! Both are supplied by the environment. Neither one holds a reference back
//! into the controller's state; remote progress reaches the controller only
//! as [`crate::VerificationEvent`]s posted through a
//! [`crate::ControllerHandle`].

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::VerificationError;

/// Outbound operations of the verification engine.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Ask another session of the same account to verify this one.
    async fn request_verification(&self) -> Result<(), VerificationError>;

    /// Start the SAS flow on an accepted request.
    async fn start_verification(&self) -> Result<(), VerificationError>;

    /// Confirm that the displayed challenge matches.
    async fn approve_verification(&self) -> Result<(), VerificationError>;

    /// Report that the displayed challenge does not match.
    async fn decline_verification(&self) -> Result<(), VerificationError>;

    /// Abort the verification in progress and tell the other session.
    async fn cancel_verification(&self) -> Result<(), VerificationError>;
}

/// State of server-side key backup recovery on this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    #[default]
    Unknown,
    WaitingForSync,
    Disabled,
    Enabled,
    Incomplete,
}

/// Source of key backup recovery information.
#[async_trait]
pub trait RecoveryMonitor: Send + Sync {
    /// Whether the server holds a key backup this session could recover.
    async fn does_backup_exist_on_server(&self) -> Result<bool, VerificationError>;

    /// Subscribe to recovery status changes.
    fn recovery_status(&self) -> watch::Receiver<RecoveryStatus>;
}
