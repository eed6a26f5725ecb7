//! Best-effort wait for key backup recovery.
//!
//! Once the remote party accepts the challenge, keys may still be arriving
//! from the server-side backup. If a backup exists the controller gives
//! recovery a bounded amount of time to reach [`RecoveryStatus::Enabled`]
//! before reporting completion. Every outcome of the wait leads to completion;
//! it never fails the verification.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::service::{RecoveryMonitor, RecoveryStatus};

/// How the recovery wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryWaitOutcome {
    /// No backup on the server, nothing to wait for.
    NoBackup,
    /// Recovery reported `Enabled` in time.
    Enabled,
    /// The timeout elapsed first.
    TimedOut,
    /// The backup existence query failed.
    QueryFailed,
    /// The status stream closed before reporting `Enabled`.
    StatusClosed,
}

/// Wait for recovery to be enabled, bounded by `timeout`.
///
/// The timeout covers the backup existence query as well as the status wait.
pub async fn wait_for_recovery<M>(monitor: &M, timeout: Duration) -> RecoveryWaitOutcome
where
    M: RecoveryMonitor + ?Sized,
{
    let wait = async {
        let has_backup = match monitor.does_backup_exist_on_server().await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(error = %e, "Backup existence query failed, not waiting for recovery");
                return RecoveryWaitOutcome::QueryFailed;
            }
        };
        if !has_backup {
            debug!("No key backup on server");
            return RecoveryWaitOutcome::NoBackup;
        }

        let mut status = monitor.recovery_status();
        match status.wait_for(|s| *s == RecoveryStatus::Enabled).await {
            Ok(_) => RecoveryWaitOutcome::Enabled,
            Err(_) => RecoveryWaitOutcome::StatusClosed,
        }
    };

    let outcome = tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(RecoveryWaitOutcome::TimedOut);

    match outcome {
        RecoveryWaitOutcome::NoBackup | RecoveryWaitOutcome::Enabled => {
            info!(?outcome, "Recovery wait finished");
        }
        RecoveryWaitOutcome::TimedOut
        | RecoveryWaitOutcome::QueryFailed
        | RecoveryWaitOutcome::StatusClosed => {
            warn!(?outcome, timeout_ms = timeout.as_millis(), "Recovery wait gave up");
        }
    }
    outcome
}
