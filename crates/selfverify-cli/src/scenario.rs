//! Scripted verification scenarios.
//!
//! Each scenario plays the local user against a simulated remote session and
//! records the states the controller went through.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use selfverify_core::VerificationConfig;
use selfverify_session::sim::{ServiceCall, SimulatedRecoveryMonitor, SimulatedVerificationService};
use selfverify_session::{
    ChallengeData, ControllerHandle, RecoveryMonitor, RecoveryStatus, SasEmoji,
    VerificationController, VerificationEvent, VerificationService, VerificationState,
};

/// Scripted flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Request, start SAS, accept the challenge. No key backup.
    Happy,
    /// Decline the challenge; the remote session cancels.
    Decline,
    /// Key backup exists and recovery is enabled shortly after acceptance.
    BackupWait,
    /// Key backup exists but recovery never becomes enabled.
    BackupTimeout,
    /// Cancel right after requesting.
    Cancel,
    /// The verification request itself fails.
    RequestFailure,
}

impl Scenario {
    /// Name of the state the flow must end in.
    pub const fn expected_final(self) -> &'static str {
        match self {
            Self::Happy | Self::BackupWait | Self::BackupTimeout => "Completed",
            Self::Decline | Self::Cancel => "Canceled",
            Self::RequestFailure => "Initial",
        }
    }

    const fn backup_exists(self) -> bool {
        matches!(self, Self::BackupWait | Self::BackupTimeout)
    }
}

/// Timing knobs for the simulated peers.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioOptions {
    /// Delay before each remote callback.
    pub remote_latency: Duration,
    /// When recovery becomes enabled in [`Scenario::BackupWait`].
    pub recovery_delay: Duration,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            remote_latency: Duration::from_millis(50),
            recovery_delay: Duration::from_millis(500),
        }
    }
}

/// What happened during a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub flow_id: String,
    /// States observed on the controller's watch channel, in order.
    pub states: Vec<VerificationState>,
    pub calls: Vec<ServiceCall>,
    pub final_state: VerificationState,
    pub expected: &'static str,
    pub passed: bool,
}

/// Challenge the simulated remote session presents.
pub fn demo_challenge() -> ChallengeData {
    ChallengeData::Emojis(vec![
        SasEmoji::new("🍎", "Apple"),
        SasEmoji::new("🍌", "Banana"),
        SasEmoji::new("🔑", "Key"),
        SasEmoji::new("🐶", "Dog"),
        SasEmoji::new("🚀", "Rocket"),
        SasEmoji::new("🎸", "Guitar"),
        SasEmoji::new("⚓", "Anchor"),
    ])
}

/// Run `scenario` to its end.
pub async fn run(
    scenario: Scenario,
    config: &VerificationConfig,
    options: ScenarioOptions,
) -> anyhow::Result<ScenarioReport> {
    let service = Arc::new(SimulatedVerificationService::new());
    let monitor = Arc::new(SimulatedRecoveryMonitor::new(scenario.backup_exists()));
    if scenario == Scenario::RequestFailure {
        service.fail_on(ServiceCall::RequestVerification).await;
    }

    let handle = VerificationController::spawn(
        Arc::clone(&service) as Arc<dyn VerificationService>,
        Arc::clone(&monitor) as Arc<dyn RecoveryMonitor>,
        config,
    );
    info!(flow_id = %handle.flow_id(), ?scenario, "Running scenario");

    let observer = tokio::spawn(
        WatchStream::from_changes(handle.subscribe()).collect::<Vec<VerificationState>>(),
    );
    service
        .attach_remote(&handle, options.remote_latency, demo_challenge())
        .await;

    // Longest legitimate pause is the recovery wait.
    let step_timeout =
        config.recovery_wait_timeout() + options.remote_latency * 4 + Duration::from_secs(1);
    let driven = drive(scenario, &handle, &monitor, options, step_timeout).await;

    service.detach_remote().await;
    let final_state = handle.state();
    handle.shutdown().await;
    driven?;

    let states = observer.await.context("state observer task failed")?;
    let expected = scenario.expected_final();
    Ok(ScenarioReport {
        scenario,
        flow_id: handle.flow_id().to_string(),
        states,
        calls: service.calls().await,
        passed: final_state.name() == expected,
        final_state,
        expected,
    })
}

async fn drive(
    scenario: Scenario,
    handle: &ControllerHandle,
    monitor: &SimulatedRecoveryMonitor,
    options: ScenarioOptions,
    step_timeout: Duration,
) -> anyhow::Result<()> {
    handle
        .dispatch(VerificationEvent::RequestVerification)
        .await?;

    match scenario {
        Scenario::Cancel => {
            handle.dispatch(VerificationEvent::Cancel).await?;
            handle.flush().await?;
            return Ok(());
        }
        Scenario::RequestFailure => {
            handle.flush().await?;
            return Ok(());
        }
        Scenario::Happy | Scenario::Decline | Scenario::BackupWait | Scenario::BackupTimeout => {}
    }

    wait_until(handle, step_timeout, "request acceptance", |s| {
        *s == VerificationState::VerificationRequestAccepted
    })
    .await?;

    handle
        .dispatch(VerificationEvent::StartSasVerification)
        .await?;
    wait_until(handle, step_timeout, "challenge", |s| {
        matches!(s, VerificationState::ChallengeReceived(_))
    })
    .await?;

    match scenario {
        Scenario::BackupWait => monitor.enable_after(options.recovery_delay),
        Scenario::BackupTimeout => monitor.set_status(RecoveryStatus::Incomplete),
        _ => {}
    }

    let decision = if scenario == Scenario::Decline {
        VerificationEvent::DeclineChallenge
    } else {
        VerificationEvent::AcceptChallenge
    };
    handle.dispatch(decision).await?;

    wait_until(handle, step_timeout, "end of flow", |s| {
        matches!(s, VerificationState::Completed | VerificationState::Canceled)
    })
    .await?;
    Ok(())
}

async fn wait_until<F>(
    handle: &ControllerHandle,
    timeout: Duration,
    what: &str,
    predicate: F,
) -> anyhow::Result<VerificationState>
where
    F: FnMut(&VerificationState) -> bool,
{
    let state = tokio::time::timeout(timeout, handle.wait_for(predicate))
        .await
        .with_context(|| format!("timed out waiting for {what} (state: {})", handle.state()))??;
    Ok(state)
}
