//! In-memory collaborators for demos and tests.
//!
//! [`SimulatedVerificationService`] records every outbound call, can be told
//! to fail specific ones, and can play the remote session by posting the
//! delegate callbacks a real engine would deliver. [`SimulatedRecoveryMonitor`]
//! exposes a controllable backup flag and recovery status channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::controller::{ControllerHandle, WeakControllerHandle};
use crate::error::VerificationError;
use crate::event::{DelegateCallback, VerificationEvent};
use crate::service::{RecoveryMonitor, RecoveryStatus, VerificationService};
use crate::state::ChallengeData;

/// An outbound call made on the verification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCall {
    RequestVerification,
    StartVerification,
    ApproveVerification,
    DeclineVerification,
    CancelVerification,
}

impl ServiceCall {
    /// Callbacks a cooperative remote session sends after a successful call.
    fn remote_replies(self, challenge: &ChallengeData) -> Vec<DelegateCallback> {
        match self {
            Self::RequestVerification => vec![DelegateCallback::AcceptedVerificationRequest],
            Self::StartVerification => vec![
                DelegateCallback::StartedSasVerification,
                DelegateCallback::ReceivedVerificationData(challenge.clone()),
            ],
            Self::ApproveVerification => vec![DelegateCallback::Finished],
            // A mismatch makes the remote side cancel.
            Self::DeclineVerification | Self::CancelVerification => {
                vec![DelegateCallback::Cancelled]
            }
        }
    }
}

struct RemotePeer {
    handle: WeakControllerHandle,
    latency: Duration,
    challenge: ChallengeData,
}

/// Verification service that talks to nobody.
#[derive(Default)]
pub struct SimulatedVerificationService {
    calls: RwLock<Vec<ServiceCall>>,
    failing: RwLock<HashSet<ServiceCall>>,
    remote: RwLock<Option<RemotePeer>>,
}

impl SimulatedVerificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `call` fail.
    pub async fn fail_on(&self, call: ServiceCall) {
        self.failing.write().await.insert(call);
    }

    /// Play a cooperative remote session: after each successful call, post
    /// the matching delegate callbacks to `handle`, `latency` apart.
    ///
    /// Only a weak handle is kept, so the controller still stops when its
    /// owners drop their handles.
    pub async fn attach_remote(
        &self,
        handle: &ControllerHandle,
        latency: Duration,
        challenge: ChallengeData,
    ) {
        *self.remote.write().await = Some(RemotePeer {
            handle: handle.downgrade(),
            latency,
            challenge,
        });
    }

    /// Stop playing the remote session.
    pub async fn detach_remote(&self) {
        self.remote.write().await.take();
    }

    /// Calls made so far, in order.
    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.calls.read().await.clone()
    }

    /// How many times `call` was made.
    pub async fn count(&self, call: ServiceCall) -> usize {
        self.calls.read().await.iter().filter(|c| **c == call).count()
    }

    async fn record(&self, call: ServiceCall) -> Result<(), VerificationError> {
        self.calls.write().await.push(call);

        if self.failing.read().await.contains(&call) {
            debug!(?call, "Simulated service call failing");
            return Err(VerificationError::Service(format!("simulated {call:?} failure")));
        }

        if let Some(remote) = self.remote.read().await.as_ref() {
            let handle = remote.handle.clone();
            let latency = remote.latency;
            let replies = call.remote_replies(&remote.challenge);
            // Deliver from a separate task: the controller is awaiting this call.
            tokio::spawn(async move {
                for reply in replies {
                    tokio::time::sleep(latency).await;
                    let Some(handle) = handle.upgrade() else {
                        return;
                    };
                    if handle.dispatch(VerificationEvent::from(reply)).await.is_err() {
                        return;
                    }
                }
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationService for SimulatedVerificationService {
    async fn request_verification(&self) -> Result<(), VerificationError> {
        self.record(ServiceCall::RequestVerification).await
    }

    async fn start_verification(&self) -> Result<(), VerificationError> {
        self.record(ServiceCall::StartVerification).await
    }

    async fn approve_verification(&self) -> Result<(), VerificationError> {
        self.record(ServiceCall::ApproveVerification).await
    }

    async fn decline_verification(&self) -> Result<(), VerificationError> {
        self.record(ServiceCall::DeclineVerification).await
    }

    async fn cancel_verification(&self) -> Result<(), VerificationError> {
        self.record(ServiceCall::CancelVerification).await
    }
}

/// Recovery monitor backed by a local status channel.
pub struct SimulatedRecoveryMonitor {
    backup_exists: AtomicBool,
    query_fails: AtomicBool,
    status: Arc<watch::Sender<RecoveryStatus>>,
}

impl SimulatedRecoveryMonitor {
    pub fn new(backup_exists: bool) -> Self {
        let (status, _) = watch::channel(RecoveryStatus::Unknown);
        Self {
            backup_exists: AtomicBool::new(backup_exists),
            query_fails: AtomicBool::new(false),
            status: Arc::new(status),
        }
    }

    pub fn set_backup_exists(&self, exists: bool) {
        self.backup_exists.store(exists, Ordering::Relaxed);
    }

    /// Make the backup existence query return an error.
    pub fn fail_backup_query(&self, fail: bool) {
        self.query_fails.store(fail, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: RecoveryStatus) {
        self.status.send_replace(status);
    }

    /// Report [`RecoveryStatus::Enabled`] once `delay` has passed.
    pub fn enable_after(&self, delay: Duration) {
        let status = Arc::clone(&self.status);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            status.send_replace(RecoveryStatus::Enabled);
        });
    }
}

#[async_trait]
impl RecoveryMonitor for SimulatedRecoveryMonitor {
    async fn does_backup_exist_on_server(&self) -> Result<bool, VerificationError> {
        if self.query_fails.load(Ordering::Relaxed) {
            return Err(VerificationError::Recovery(
                "simulated backup query failure".to_string(),
            ));
        }
        Ok(self.backup_exists.load(Ordering::Relaxed))
    }

    fn recovery_status(&self) -> watch::Receiver<RecoveryStatus> {
        self.status.subscribe()
    }
}
