//! Verification controller: the single owner of a flow's state.
//!
//! Events from the user, from the verification engine's delegate and from the
//! controller's own effects all go through one queue. A single worker task
//! pulls them in order, reduces each one with [`reduce`], publishes the new
//! state and starts the resulting effects before pulling the next message.
//!
//! Service calls and the recovery wait run in their own tasks and post their
//! outcome back onto the queue, so the worker is free while they are pending.
//! A `Cancel` posted mid-call is reduced next; when the call finally returns
//! its outcome carries a stale epoch and is dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use selfverify_core::VerificationConfig;

use crate::error::VerificationError;
use crate::event::VerificationEvent;
use crate::machine::{Effect, Input, reduce};
use crate::recovery::{RecoveryWaitOutcome, wait_for_recovery};
use crate::service::{RecoveryMonitor, VerificationService};
use crate::state::VerificationState;

/// Messages on the controller queue.
enum Message {
    Event(VerificationEvent),
    /// A service call issued while the state had entry `epoch` returned.
    EffectFinished {
        epoch: u64,
        effect: Effect,
        result: Result<(), VerificationError>,
    },
    /// The recovery wait started at entry `epoch` ended.
    RecoveryWaitFinished {
        epoch: u64,
        outcome: RecoveryWaitOutcome,
    },
    Flush(oneshot::Sender<()>),
}

struct PendingRecoveryWait {
    epoch: u64,
    cancel: CancellationToken,
}

/// The worker side of a verification flow.
///
/// Created with [`VerificationController::spawn`]; callers only ever hold a
/// [`ControllerHandle`].
pub struct VerificationController {
    flow_id: Uuid,
    state: VerificationState,
    /// Bumped on every realized transition. Effect outcomes carry the epoch
    /// they were issued at and are dropped once it moves on.
    epoch: u64,
    service: Arc<dyn VerificationService>,
    monitor: Arc<dyn RecoveryMonitor>,
    recovery_timeout: Duration,
    state_tx: watch::Sender<VerificationState>,
    rx: mpsc::Receiver<Message>,
    self_tx: mpsc::WeakSender<Message>,
    /// Service calls started but not yet reported back.
    in_flight: usize,
    /// Flushes waiting for `in_flight` to drain.
    parked_flushes: Vec<oneshot::Sender<()>>,
    recovery_wait: Option<PendingRecoveryWait>,
    shutdown: CancellationToken,
}

impl VerificationController {
    /// Start a controller for one verification attempt on the current runtime.
    pub fn spawn(
        service: Arc<dyn VerificationService>,
        monitor: Arc<dyn RecoveryMonitor>,
        config: &VerificationConfig,
    ) -> ControllerHandle {
        let flow_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(VerificationState::Initial);
        let shutdown = CancellationToken::new();

        let controller = Self {
            flow_id,
            state: VerificationState::Initial,
            epoch: 0,
            service,
            monitor,
            recovery_timeout: config.recovery_wait_timeout(),
            state_tx,
            rx,
            self_tx: tx.downgrade(),
            in_flight: 0,
            parked_flushes: Vec::new(),
            recovery_wait: None,
            shutdown: shutdown.clone(),
        };

        let span = info_span!("verification_flow", %flow_id);
        let worker = tokio::spawn(controller.run().instrument(span));

        ControllerHandle {
            flow_id,
            tx,
            state_rx,
            shutdown,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    async fn run(mut self) {
        info!(flow_id = %self.flow_id, "Verification controller started");

        loop {
            let message = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle_message(message);
            self.release_flushes();
        }

        // Stops in-flight service calls along with the recovery wait.
        self.shutdown.cancel();
        self.abandon_recovery_wait();
        info!(state = %self.state, "Verification controller stopped");
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Event(event) => self.apply(Input::Event(event)),
            Message::EffectFinished {
                epoch,
                effect,
                result,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match result {
                    Ok(()) => debug!(effect = effect.name(), "Effect completed"),
                    Err(e) => {
                        warn!(effect = effect.name(), error = %e, "Verification service call failed");
                        if epoch != self.epoch {
                            debug!(
                                effect = effect.name(),
                                state = %self.state,
                                "Dropping failure of superseded effect"
                            );
                            return;
                        }
                        self.apply(Input::Event(VerificationEvent::DidFail));
                    }
                }
            }
            Message::RecoveryWaitFinished { epoch, outcome } => {
                let current = self
                    .recovery_wait
                    .as_ref()
                    .is_some_and(|wait| wait.epoch == epoch);
                if !current {
                    debug!(?outcome, "Dropping result of abandoned recovery wait");
                    return;
                }
                self.recovery_wait = None;
                self.apply(Input::RecoveryWaitFinished);
            }
            Message::Flush(reply) => self.parked_flushes.push(reply),
        }
    }

    fn release_flushes(&mut self) {
        if self.in_flight > 0 {
            return;
        }
        for reply in self.parked_flushes.drain(..) {
            let _ = reply.send(());
        }
    }

    fn apply(&mut self, input: Input) {
        let trigger = input.name();
        debug!(state = %self.state, input = trigger, "Received input");

        let transition = reduce(&self.state, input);
        if transition.is_noop() {
            debug!(state = %self.state, input = trigger, "Input ignored");
            return;
        }

        if let Some(next) = transition.next {
            if next == self.state {
                debug!(state = %self.state, input = trigger, "Already in target state");
                return;
            }
            let from = std::mem::replace(&mut self.state, next);
            self.epoch += 1;
            self.abandon_recovery_wait();
            info!(from = %from, to = %self.state, trigger, "Verification state changed");
            self.state_tx.send_replace(self.state.clone());
        }

        for effect in transition.effects {
            self.start_effect(effect);
        }
    }

    fn start_effect(&mut self, effect: Effect) {
        if effect == Effect::AwaitRecovery {
            self.start_recovery_wait();
            return;
        }

        let epoch = self.epoch;
        let service = Arc::clone(&self.service);
        let token = self.shutdown.clone();
        let tx = self.self_tx.clone();
        self.in_flight += 1;

        debug!(effect = effect.name(), "Running effect");
        tokio::spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!(effect = effect.name(), "Effect interrupted by shutdown");
                        return;
                    }
                    result = call_service(service.as_ref(), effect) => result,
                };
                if let Some(tx) = tx.upgrade() {
                    let _ = tx
                        .send(Message::EffectFinished {
                            epoch,
                            effect,
                            result,
                        })
                        .await;
                }
            }
            .in_current_span(),
        );
    }

    fn start_recovery_wait(&mut self) {
        if self
            .recovery_wait
            .as_ref()
            .is_some_and(|wait| wait.epoch == self.epoch)
        {
            debug!("Recovery wait already pending");
            return;
        }

        let epoch = self.epoch;
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let monitor = Arc::clone(&self.monitor);
        let timeout = self.recovery_timeout;
        let tx = self.self_tx.clone();

        info!(timeout_ms = timeout.as_millis(), "Waiting for key backup recovery");
        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    outcome = wait_for_recovery(monitor.as_ref(), timeout) => outcome,
                };
                if let Some(tx) = tx.upgrade() {
                    let _ = tx
                        .send(Message::RecoveryWaitFinished { epoch, outcome })
                        .await;
                }
            }
            .in_current_span(),
        );

        self.recovery_wait = Some(PendingRecoveryWait { epoch, cancel });
    }

    fn abandon_recovery_wait(&mut self) {
        if let Some(wait) = self.recovery_wait.take() {
            wait.cancel.cancel();
            debug!("Recovery wait abandoned");
        }
    }
}

async fn call_service(
    service: &dyn VerificationService,
    effect: Effect,
) -> Result<(), VerificationError> {
    match effect {
        Effect::RequestVerification => service.request_verification().await,
        Effect::StartVerification => service.start_verification().await,
        Effect::ApproveVerification => service.approve_verification().await,
        Effect::DeclineVerification => service.decline_verification().await,
        Effect::CancelVerification => service.cancel_verification().await,
        // Not a service call; run by the worker itself.
        Effect::AwaitRecovery => Ok(()),
    }
}

/// Cloneable handle to a running [`VerificationController`].
///
/// This is the whole surface the presentation layer and the engine's delegate
/// get: post events, read or watch the state, tear down.
#[derive(Clone)]
pub struct ControllerHandle {
    flow_id: Uuid,
    tx: mpsc::Sender<Message>,
    state_rx: watch::Receiver<VerificationState>,
    shutdown: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// A [`ControllerHandle`] that does not keep the controller alive.
///
/// The worker stops once every strong handle is gone, whether or not weak
/// ones remain.
#[derive(Clone)]
pub struct WeakControllerHandle {
    flow_id: Uuid,
    tx: mpsc::WeakSender<Message>,
    state_rx: watch::Receiver<VerificationState>,
    shutdown: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WeakControllerHandle {
    /// A strong handle, if the controller still has one.
    pub fn upgrade(&self) -> Option<ControllerHandle> {
        let tx = self.tx.upgrade()?;
        Some(ControllerHandle {
            flow_id: self.flow_id,
            tx,
            state_rx: self.state_rx.clone(),
            shutdown: self.shutdown.clone(),
            worker: Arc::clone(&self.worker),
        })
    }
}

impl fmt::Debug for WeakControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakControllerHandle")
            .field("flow_id", &self.flow_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("flow_id", &self.flow_id)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl ControllerHandle {
    /// Identifier of this verification attempt, as recorded in logs.
    pub const fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// A handle for collaborators that must not keep this flow running.
    pub fn downgrade(&self) -> WeakControllerHandle {
        WeakControllerHandle {
            flow_id: self.flow_id,
            tx: self.tx.downgrade(),
            state_rx: self.state_rx.clone(),
            shutdown: self.shutdown.clone(),
            worker: Arc::clone(&self.worker),
        }
    }

    /// Post an event, waiting for queue space if needed.
    pub async fn dispatch(&self, event: VerificationEvent) -> Result<(), VerificationError> {
        if self.shutdown.is_cancelled() {
            return Err(VerificationError::ControllerClosed);
        }
        self.tx
            .send(Message::Event(event))
            .await
            .map_err(|_| VerificationError::ControllerClosed)
    }

    /// Post an event without waiting; for synchronous delegate callbacks.
    ///
    /// Fails with [`VerificationError::QueueFull`] when the queue has no free
    /// slot right now.
    pub fn try_dispatch(&self, event: VerificationEvent) -> Result<(), VerificationError> {
        if self.shutdown.is_cancelled() {
            return Err(VerificationError::ControllerClosed);
        }
        self.tx
            .try_send(Message::Event(event))
            .map_err(|e| match e {
                TrySendError::Full(_) => VerificationError::QueueFull,
                TrySendError::Closed(_) => VerificationError::ControllerClosed,
            })
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> VerificationState {
        self.state_rx.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<VerificationState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<VerificationState, VerificationError>
    where
        F: FnMut(&VerificationState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| predicate(state))
            .await
            .map(|state| state.clone())
            .map_err(|_| VerificationError::ControllerClosed)
    }

    /// Resolve once every event posted before this call has been reduced and
    /// no service call is in flight.
    ///
    /// Recovery waits still running in the background are not waited for. A
    /// call that never returns holds the flush until [`Self::shutdown`].
    pub async fn flush(&self) -> Result<(), VerificationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Message::Flush(reply_tx))
            .await
            .map_err(|_| VerificationError::ControllerClosed)?;
        reply_rx
            .await
            .map_err(|_| VerificationError::ControllerClosed)
    }

    /// Whether the controller has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }

    /// Tear the flow down: abandon any pending wait and stop the worker.
    ///
    /// The last state stays readable through [`Self::state`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(flow_id = %self.flow_id, error = %e, "Verification controller task failed");
        }
    }
}
