use std::collections::VecDeque;
use std::sync::Arc;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::handler::SessionBridge;
use super::types::response::{DecodeError, RecognizedEvent, classify, decode};
use crate::Result;
use crate::config::ConnectionParams;
use crate::error::Error;
use crate::session::Session;
use crate::ws::config::Config;
use crate::ws::{Connection, ConnectionManager, ConnectionState, WsError};

/// Lifecycle of the background bridge task.
///
/// `Idle -> Running -> Stopping -> Idle`. Failures are logged and land back in `Idle`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No task, or the last one has finished cleaning up
    Idle,
    /// Connected (or reconnecting) and reacting to events
    Running,
    /// Releasing the connection
    Stopping,
}

/// The retained handle of a spawned bridge task.
///
/// Dropping it cancels the task through the [`DropGuard`].
struct BridgeTask {
    id: Uuid,
    token: CancellationToken,
    _guard: DropGuard,
    handle: JoinHandle<()>,
}

/// Publishes `Idle` if `on_session_enter` fails or is dropped before the task is spawned.
struct Starting<'state> {
    state_tx: &'state watch::Sender<BridgeState>,
    spawned: bool,
}

impl Drop for Starting<'_> {
    fn drop(&mut self) {
        if !self.spawned {
            self.state_tx.send_replace(BridgeState::Idle);
        }
    }
}

/// Starts the bridge when a session becomes active and stops it when the session ends.
///
/// At most one bridge task is alive per controller. Dropping the controller cancels it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use inbox_bridge::bridge::LifecycleController;
/// use inbox_bridge::config::ConnectionParams;
/// use inbox_bridge::session::Session;
/// use inbox_bridge::ws::config::Config;
///
/// # async fn example(session: Arc<dyn Session>) -> inbox_bridge::Result<()> {
/// let params = ConnectionParams::from_env(["support@agentmail.to"])?;
/// let mut controller = LifecycleController::new(Config::default());
///
/// controller.on_session_enter(session, params).await?;
/// // ... the conversation runs ...
/// controller.on_session_exit().await;
/// # Ok(())
/// # }
/// ```
pub struct LifecycleController {
    manager: ConnectionManager,
    bridge: SessionBridge,
    state_tx: watch::Sender<BridgeState>,
    state_rx: watch::Receiver<BridgeState>,
    task: Option<BridgeTask>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_bridge(config, SessionBridge::default())
    }

    #[must_use]
    pub fn with_bridge(config: Config, bridge: SessionBridge) -> Self {
        let (state_tx, state_rx) = watch::channel(BridgeState::Idle);

        Self {
            manager: ConnectionManager::new(config),
            bridge,
            state_tx,
            state_rx,
            task: None,
        }
    }

    /// Connect and start the bridge task for `session`.
    ///
    /// The initial connect happens before this returns, so a rejected token or an unreachable
    /// endpoint is reported here. Calling this while a task is still running is an error; a task
    /// whose stream already ended on its own is reaped and replaced.
    pub async fn on_session_enter(
        &mut self,
        session: Arc<dyn Session>,
        params: ConnectionParams,
    ) -> Result<()> {
        if self.is_running() {
            return Err(Error::validation(
                "Unable to start another bridge task while one is running",
            ));
        }

        if let Some(finished) = self.task.take() {
            _ = finished.handle.await;
        }

        self.state_tx.send_replace(BridgeState::Running);
        let mut starting = Starting {
            state_tx: &self.state_tx,
            spawned: false,
        };

        let connection = self.manager.connect(&params).await?;

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let worker = Worker {
            manager: self.manager.clone(),
            bridge: self.bridge.clone(),
            session,
            params,
            token: token.clone(),
            state_tx: self.state_tx.clone(),
        };

        let future = worker.run(connection);
        #[cfg(feature = "tracing")]
        let future = tracing::Instrument::instrument(
            future,
            tracing::debug_span!("bridge_task", task_id = %id),
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(task_id = %id, "Bridge task started");

        let handle = tokio::spawn(future);
        starting.spawned = true;
        self.task = Some(BridgeTask {
            id,
            _guard: token.clone().drop_guard(),
            token,
            handle,
        });

        Ok(())
    }

    /// Cancel the bridge task and wait until its connection is released.
    ///
    /// A no-op when no task exists.
    pub async fn on_session_exit(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(task_id = %task.id, "Stopping bridge task");

        task.token.cancel();
        if let Err(e) = task.handle.await {
            #[cfg(feature = "tracing")]
            tracing::error!(task_id = %task.id, error = %e, "Bridge task did not shut down cleanly");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        self.state_tx.send_replace(BridgeState::Idle);
    }

    /// Whether a bridge task is alive.
    ///
    /// A task that has published [`BridgeState::Idle`] no longer counts, even if its future
    /// has not been polled to completion yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished() && self.state() != BridgeState::Idle)
    }

    /// Identifier of the current (or last, until reaped) bridge task.
    #[must_use]
    pub fn task_id(&self) -> Option<Uuid> {
        self.task.as_ref().map(|task| task.id)
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn connection_state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    #[must_use]
    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }
}

enum Exit {
    Cancelled,
    StreamEnded,
}

/// Everything the spawned task owns.
struct Worker {
    manager: ConnectionManager,
    bridge: SessionBridge,
    session: Arc<dyn Session>,
    params: ConnectionParams,
    token: CancellationToken,
    state_tx: watch::Sender<BridgeState>,
}

impl Worker {
    async fn run(self, mut connection: Connection) {
        let mut backoff: Option<ExponentialBackoff> =
            self.manager.config().reconnect.clone().map(Into::into);

        loop {
            let exit = self.pump(&mut connection).await;

            if matches!(exit, Exit::StreamEnded) {
                log_end(connection.end_reason());
            }

            match (exit, backoff.as_mut()) {
                (Exit::StreamEnded, Some(backoff)) => {
                    connection.close().await;
                    match self.reconnect(backoff).await {
                        Some(next) => connection = next,
                        None => {
                            self.state_tx.send_replace(BridgeState::Stopping);
                            break;
                        }
                    }
                }
                _ => {
                    self.state_tx.send_replace(BridgeState::Stopping);
                    connection.close().await;
                    break;
                }
            }
        }

        self.state_tx.send_replace(BridgeState::Idle);

        #[cfg(feature = "tracing")]
        tracing::debug!("Bridge task finished");
    }

    /// Decode, classify and react to frames until the stream ends or the task is cancelled.
    ///
    /// The transport keeps being read while a reaction is in flight, so heartbeats stay
    /// answered; frames that arrive meanwhile wait in `backlog` and are handled in order.
    async fn pump(&self, connection: &mut Connection) -> Exit {
        let mut backlog = VecDeque::new();

        loop {
            let frame = match backlog.pop_front() {
                Some(frame) => Some(frame),
                None => tokio::select! {
                    biased;
                    () = self.token.cancelled() => return Exit::Cancelled,
                    frame = connection.next_frame() => frame,
                },
            };

            let Some(frame) = frame else {
                return Exit::StreamEnded;
            };

            let envelope = match decode(&frame) {
                Ok(envelope) => envelope,
                Err(DecodeError::Empty) => continue,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, len = frame.len(), "Dropping malformed notification frame");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    continue;
                }
            };

            #[cfg(feature = "tracing")]
            tracing::trace!(
                kind = envelope.kind(),
                event_kind = envelope.event_kind(),
                "Decoded notification"
            );

            let event = classify(envelope);
            if matches!(event, RecognizedEvent::Ignored) {
                continue;
            }

            let reaction = self.bridge.handle(event, self.session.as_ref());
            tokio::pin!(reaction);

            loop {
                tokio::select! {
                    biased;
                    // Dropping the reaction cancels the in-flight turn; that is shutdown, not failure.
                    () = self.token.cancelled() => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Cancelled while reacting to an inbound message");
                        return Exit::Cancelled;
                    }
                    _reaction = &mut reaction => break,
                    frame = connection.next_frame(), if !connection.is_ended() => {
                        if let Some(frame) = frame {
                            backlog.push_back(frame);
                        }
                    }
                }
            }
        }
    }

    /// Reopen the connection with backoff. `None` when cancelled or out of attempts.
    async fn reconnect(&self, backoff: &mut ExponentialBackoff) -> Option<Connection> {
        let max_attempts = self
            .manager
            .config()
            .reconnect
            .as_ref()
            .and_then(|reconnect| reconnect.max_attempts);
        let mut attempt = 0_u32;

        loop {
            let delay = backoff.next_backoff()?;
            tokio::select! {
                biased;
                () = self.token.cancelled() => return None,
                () = sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
            let result = tokio::select! {
                biased;
                () = self.token.cancelled() => return None,
                result = self.manager.connect(&self.params) => result,
            };

            match result {
                Ok(connection) => {
                    backoff.reset();
                    #[cfg(feature = "tracing")]
                    tracing::info!(attempt, "Reconnected to notification service");
                    return Some(connection);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %e, "Unable to reconnect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;

                    if let Some(max) = max_attempts
                        && attempt >= max
                    {
                        #[cfg(feature = "tracing")]
                        tracing::error!(attempt, "Giving up on notification service");
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(feature = "tracing")]
fn log_end(reason: Option<&WsError>) {
    match reason {
        Some(reason) => tracing::debug!(reason = %reason, "Notification stream ended"),
        None => tracing::debug!("Notification stream ended"),
    }
}

#[cfg(not(feature = "tracing"))]
fn log_end(_reason: Option<&WsError>) {}
