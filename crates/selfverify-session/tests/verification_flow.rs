#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the verification controller.
//!
//! Drives full flows through the public handle: happy path, decline, backup
//! wait, cancellation at every stage, and cancel/failure interleaving.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};

use selfverify_core::VerificationConfig;
use selfverify_session::sim::{ServiceCall, SimulatedRecoveryMonitor, SimulatedVerificationService};
use selfverify_session::{
    ChallengeData, ControllerHandle, RecoveryMonitor, RecoveryStatus, VerificationController,
    VerificationError, VerificationEvent, VerificationService, VerificationState,
};

const WAIT: Duration = Duration::from_secs(30);

fn challenge() -> ChallengeData {
    ChallengeData::emojis(["🍎", "🍌"])
}

struct Harness {
    service: Arc<SimulatedVerificationService>,
    monitor: Arc<SimulatedRecoveryMonitor>,
    handle: ControllerHandle,
}

impl Harness {
    fn new(backup_exists: bool) -> Self {
        let service = Arc::new(SimulatedVerificationService::new());
        let monitor = Arc::new(SimulatedRecoveryMonitor::new(backup_exists));
        let handle = VerificationController::spawn(
            Arc::clone(&service) as Arc<dyn VerificationService>,
            Arc::clone(&monitor) as Arc<dyn RecoveryMonitor>,
            &VerificationConfig::default(),
        );
        Self {
            service,
            monitor,
            handle,
        }
    }

    async fn send(&self, events: impl IntoIterator<Item = VerificationEvent>) {
        for event in events {
            self.handle.dispatch(event).await.unwrap();
        }
        self.handle.flush().await.unwrap();
    }

    async fn until(&self, target: &VerificationState) -> VerificationState {
        tokio::time::timeout(WAIT, self.handle.wait_for(|s| s == target))
            .await
            .unwrap()
            .unwrap()
    }

    /// Walk the flow up to `Replying` with the given decision.
    async fn reach_replying(&self, accept: bool) {
        self.send([
            VerificationEvent::RequestVerification,
            VerificationEvent::DidAcceptVerificationRequest,
            VerificationEvent::StartSasVerification,
            VerificationEvent::DidStartSasVerification,
            VerificationEvent::DidReceiveChallenge(challenge()),
            if accept {
                VerificationEvent::AcceptChallenge
            } else {
                VerificationEvent::DeclineChallenge
            },
        ])
        .await;
    }
}

#[tokio::test]
async fn happy_path_without_backup_completes() {
    let h = Harness::new(false);

    h.send([VerificationEvent::RequestVerification]).await;
    assert_eq!(h.handle.state(), VerificationState::RequestingVerification);

    h.send([VerificationEvent::DidAcceptVerificationRequest]).await;
    assert_eq!(
        h.handle.state(),
        VerificationState::VerificationRequestAccepted
    );

    h.send([
        VerificationEvent::StartSasVerification,
        VerificationEvent::DidStartSasVerification,
        VerificationEvent::DidReceiveChallenge(challenge()),
    ])
    .await;
    assert_eq!(
        h.handle.state(),
        VerificationState::ChallengeReceived(challenge())
    );

    h.send([VerificationEvent::AcceptChallenge]).await;
    assert_eq!(
        h.handle.state(),
        VerificationState::Replying {
            data: challenge(),
            accept: true
        }
    );

    h.send([VerificationEvent::DidAcceptChallenge]).await;
    h.until(&VerificationState::Completed).await;

    assert_eq!(
        h.service.calls().await,
        vec![
            ServiceCall::RequestVerification,
            ServiceCall::StartVerification,
            ServiceCall::ApproveVerification,
        ]
    );
}

#[tokio::test]
async fn decline_path_calls_decline_and_still_completes() {
    let h = Harness::new(true);
    h.reach_replying(false).await;

    assert_eq!(h.service.count(ServiceCall::DeclineVerification).await, 1);
    assert_eq!(h.service.count(ServiceCall::ApproveVerification).await, 0);

    h.send([VerificationEvent::DidAcceptChallenge]).await;
    assert_eq!(h.handle.state(), VerificationState::Completed);
}

#[tokio::test(start_paused = true)]
async fn backup_never_enabled_completes_after_timeout() {
    let h = Harness::new(true);
    h.monitor.set_status(RecoveryStatus::Incomplete);
    h.reach_replying(true).await;

    let started = tokio::time::Instant::now();
    h.send([VerificationEvent::DidAcceptChallenge]).await;
    h.until(&VerificationState::Completed).await;

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.service.count(ServiceCall::CancelVerification).await, 0);
}

#[tokio::test(start_paused = true)]
async fn backup_enabled_in_time_completes_early() {
    let h = Harness::new(true);
    h.reach_replying(true).await;
    h.monitor.enable_after(Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    h.send([VerificationEvent::DidAcceptChallenge]).await;
    // Still waiting on recovery.
    assert!(matches!(
        h.handle.state(),
        VerificationState::Replying { accept: true, .. }
    ));

    h.until(&VerificationState::Completed).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn backup_query_failure_does_not_block_completion() {
    let h = Harness::new(true);
    h.monitor.fail_backup_query(true);
    h.reach_replying(true).await;

    h.send([VerificationEvent::DidAcceptChallenge]).await;
    h.until(&VerificationState::Completed).await;
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_recovery_wait() {
    let h = Harness::new(true);
    h.reach_replying(true).await;

    h.send([
        VerificationEvent::DidAcceptChallenge,
        // Repeated acceptance must not start a second wait.
        VerificationEvent::DidAcceptChallenge,
        VerificationEvent::Cancel,
    ])
    .await;
    assert_eq!(h.handle.state(), VerificationState::Canceled);

    // Let the abandoned wait's timeout pass.
    tokio::time::sleep(Duration::from_secs(20)).await;
    h.handle.flush().await.unwrap();

    assert_eq!(h.handle.state(), VerificationState::Canceled);
    assert_eq!(h.service.count(ServiceCall::CancelVerification).await, 1);
}

#[tokio::test]
async fn cancel_from_every_active_state_calls_cancel_once() {
    let paths: Vec<Vec<VerificationEvent>> = vec![
        vec![VerificationEvent::RequestVerification],
        vec![
            VerificationEvent::RequestVerification,
            VerificationEvent::DidAcceptVerificationRequest,
        ],
        vec![VerificationEvent::StartSasVerification],
        vec![VerificationEvent::DidStartSasVerification],
        vec![
            VerificationEvent::DidStartSasVerification,
            VerificationEvent::DidReceiveChallenge(challenge()),
        ],
        vec![
            VerificationEvent::DidStartSasVerification,
            VerificationEvent::DidReceiveChallenge(challenge()),
            VerificationEvent::AcceptChallenge,
        ],
        vec![
            VerificationEvent::DidStartSasVerification,
            VerificationEvent::DidReceiveChallenge(challenge()),
            VerificationEvent::DeclineChallenge,
        ],
    ];

    for path in paths {
        let h = Harness::new(false);
        h.send(path.clone()).await;
        let before = h.handle.state();
        assert!(!before.is_idle(), "path {path:?} ended idle");

        h.send([VerificationEvent::Cancel]).await;
        assert_eq!(h.handle.state(), VerificationState::Canceled, "from {before}");
        assert_eq!(
            h.service.count(ServiceCall::CancelVerification).await,
            1,
            "from {before}"
        );
    }
}

#[tokio::test]
async fn cancel_when_idle_is_noop() {
    let h = Harness::new(false);
    h.send([VerificationEvent::Cancel]).await;
    assert_eq!(h.handle.state(), VerificationState::Initial);

    h.reach_replying(false).await;
    h.send([VerificationEvent::DidAcceptChallenge]).await;
    assert_eq!(h.handle.state(), VerificationState::Completed);
    h.send([VerificationEvent::Cancel]).await;
    assert_eq!(h.handle.state(), VerificationState::Completed);

    assert_eq!(h.service.count(ServiceCall::CancelVerification).await, 0);
}

#[tokio::test]
async fn canceled_flow_can_reset_and_restart() {
    let h = Harness::new(false);
    h.send([
        VerificationEvent::RequestVerification,
        VerificationEvent::DidCancel,
    ])
    .await;
    assert_eq!(h.handle.state(), VerificationState::Canceled);

    // Cancel after a remote cancel is a no-op.
    h.send([VerificationEvent::Cancel]).await;
    assert_eq!(h.service.count(ServiceCall::CancelVerification).await, 0);

    h.send([VerificationEvent::Reset]).await;
    assert_eq!(h.handle.state(), VerificationState::Initial);

    h.send([VerificationEvent::Reset]).await;
    assert_eq!(h.handle.state(), VerificationState::Initial);

    h.send([VerificationEvent::RequestVerification]).await;
    assert_eq!(h.service.count(ServiceCall::RequestVerification).await, 2);
}

#[tokio::test]
async fn failure_outside_request_cancels() {
    let h = Harness::new(false);
    h.service.fail_on(ServiceCall::StartVerification).await;
    h.send([
        VerificationEvent::RequestVerification,
        VerificationEvent::DidAcceptVerificationRequest,
        VerificationEvent::StartSasVerification,
    ])
    .await;
    assert_eq!(h.handle.state(), VerificationState::Canceled);
}

#[tokio::test(start_paused = true)]
async fn scripted_remote_runs_to_completion() {
    let h = Harness::new(false);
    h.service
        .attach_remote(&h.handle, Duration::from_millis(50), challenge())
        .await;

    h.send([VerificationEvent::RequestVerification]).await;
    h.until(&VerificationState::VerificationRequestAccepted).await;

    h.send([VerificationEvent::StartSasVerification]).await;
    h.until(&VerificationState::ChallengeReceived(challenge()))
        .await;

    h.send([VerificationEvent::AcceptChallenge]).await;
    h.until(&VerificationState::Completed).await;

    h.service.detach_remote().await;
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_wait_keeps_last_state() {
    let h = Harness::new(true);
    h.reach_replying(true).await;
    h.send([VerificationEvent::DidAcceptChallenge]).await;

    h.handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(matches!(
        h.handle.state(),
        VerificationState::Replying { accept: true, .. }
    ));
    assert_eq!(
        h.handle.dispatch(VerificationEvent::Cancel).await,
        Err(VerificationError::ControllerClosed)
    );
}

/// Service whose request call blocks until released, then fails.
struct GatedService {
    entered: Notify,
    release: watch::Sender<bool>,
    cancels: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl VerificationService for GatedService {
    async fn request_verification(&self) -> Result<(), VerificationError> {
        self.entered.notify_one();
        let mut release = self.release.subscribe();
        release.wait_for(|open| *open).await.unwrap();
        Err(VerificationError::Service("request timed out".to_string()))
    }

    async fn start_verification(&self) -> Result<(), VerificationError> {
        Ok(())
    }

    async fn approve_verification(&self) -> Result<(), VerificationError> {
        Ok(())
    }

    async fn decline_verification(&self) -> Result<(), VerificationError> {
        Ok(())
    }

    async fn cancel_verification(&self) -> Result<(), VerificationError> {
        self.cancels
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn cancel_during_request_is_not_undone_by_late_failure() {
    let (release, _) = watch::channel(false);
    let service = Arc::new(GatedService {
        entered: Notify::new(),
        release,
        cancels: std::sync::atomic::AtomicUsize::new(0),
    });
    let monitor = Arc::new(SimulatedRecoveryMonitor::new(false));
    let handle = VerificationController::spawn(
        Arc::clone(&service) as Arc<dyn VerificationService>,
        monitor as Arc<dyn RecoveryMonitor>,
        &VerificationConfig::default(),
    );

    handle
        .dispatch(VerificationEvent::RequestVerification)
        .await
        .unwrap();
    service.entered.notified().await;

    // Posted while the request call is still in flight, and reduced without
    // waiting for it.
    handle.dispatch(VerificationEvent::Cancel).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| *s == VerificationState::Canceled),
    )
    .await
    .unwrap()
    .unwrap();

    service.release.send_replace(true);
    handle.flush().await.unwrap();

    assert_eq!(handle.state(), VerificationState::Canceled);
    assert_eq!(
        service.cancels.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // A late acceptance from the remote side does not revive the flow either.
    handle
        .dispatch(VerificationEvent::DidAcceptVerificationRequest)
        .await
        .unwrap();
    handle.flush().await.unwrap();
    assert_eq!(handle.state(), VerificationState::Canceled);
}

/// Service whose calls never return.
#[derive(Default)]
struct StalledService {
    entered: Notify,
}

#[async_trait]
impl VerificationService for StalledService {
    async fn request_verification(&self) -> Result<(), VerificationError> {
        self.entered.notify_one();
        std::future::pending().await
    }

    async fn start_verification(&self) -> Result<(), VerificationError> {
        std::future::pending().await
    }

    async fn approve_verification(&self) -> Result<(), VerificationError> {
        std::future::pending().await
    }

    async fn decline_verification(&self) -> Result<(), VerificationError> {
        std::future::pending().await
    }

    async fn cancel_verification(&self) -> Result<(), VerificationError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_request_does_not_block_cancel() {
    let service = Arc::new(StalledService::default());
    let monitor = Arc::new(SimulatedRecoveryMonitor::new(false));
    let handle = VerificationController::spawn(
        Arc::clone(&service) as Arc<dyn VerificationService>,
        monitor as Arc<dyn RecoveryMonitor>,
        &VerificationConfig::default(),
    );

    handle
        .dispatch(VerificationEvent::RequestVerification)
        .await
        .unwrap();
    service.entered.notified().await;

    handle.dispatch(VerificationEvent::Cancel).await.unwrap();
    let state = tokio::time::timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| *s == VerificationState::Canceled),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(state, VerificationState::Canceled);

    // Other events keep flowing while both calls hang.
    handle.dispatch(VerificationEvent::Reset).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        handle.wait_for(|s| *s == VerificationState::Initial),
    )
    .await
    .unwrap()
    .unwrap();

    // Teardown does not wait on the hung calls.
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .unwrap();
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn attached_remote_does_not_keep_controller_alive() {
    let h = Harness::new(false);
    h.service
        .attach_remote(&h.handle, Duration::from_millis(50), challenge())
        .await;

    let mut states = h.handle.subscribe();
    let weak = h.handle.downgrade();
    drop(h.handle);

    // The worker drops its state sender once it stops.
    let changed = tokio::time::timeout(Duration::from_secs(5), states.changed())
        .await
        .unwrap();
    assert!(changed.is_err());
    assert!(weak.upgrade().is_none());
}
