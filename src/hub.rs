//! Session hub: the single owner of session state.
//!
//! All mutations funnel through one task that owns the [`SessionStore`] and
//! the [`TransitionScheduler`]. Connection handlers talk to it through a
//! cloneable [`HubHandle`]. After every state-changing operation the hub
//! publishes a full snapshot on a broadcast channel that every connection
//! subscribes to.
//!
//! Because the hub processes one command at a time, concurrent client
//! messages and timer expirations are serialized: no update is lost and no
//! client sees a snapshot from the middle of an operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::schema::SessionConfig;
use crate::config::validation::MAX_BROADCAST_CAPACITY;
use crate::error::TransportError;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::session::{
    ConnectionId, Outcome, Phase, Role, SessionStore, Snapshot, TimerFired, TransitionScheduler,
};
use crate::transport::protocol::ClientMessage;

/// Capacity of the command queue into the hub.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// What a newly connected client receives from the hub.
#[derive(Debug)]
pub struct Subscription {
    /// State at the moment of subscribing.
    pub initial: Snapshot,
    /// Every later snapshot, in order.
    pub updates: broadcast::Receiver<Arc<Snapshot>>,
}

enum HubCommand {
    Connect {
        id: ConnectionId,
        reply: oneshot::Sender<Subscription>,
    },
    Client {
        id: ConnectionId,
        message: ClientMessage,
    },
    Disconnect {
        id: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Cloneable handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Registers a connection and returns its initial snapshot plus the
    /// update stream. The initial snapshot is taken in the same step as the
    /// subscription, so no update can slip between them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::HubClosed`] if the hub has stopped.
    pub async fn connect(&self, id: ConnectionId) -> Result<Subscription, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(HubCommand::Connect { id, reply }).await?;
        rx.await.map_err(|_| TransportError::HubClosed)
    }

    /// Forwards a decoded client message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::HubClosed`] if the hub has stopped.
    pub async fn send(&self, id: ConnectionId, message: ClientMessage) -> Result<(), TransportError> {
        self.send_command(HubCommand::Client { id, message }).await
    }

    /// Reports that a connection closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::HubClosed`] if the hub has stopped.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), TransportError> {
        self.send_command(HubCommand::Disconnect { id }).await
    }

    /// Reads the current state.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::HubClosed`] if the hub has stopped.
    pub async fn snapshot(&self) -> Result<Snapshot, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(HubCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| TransportError::HubClosed)
    }

    async fn send_command(&self, command: HubCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::HubClosed)
    }
}

/// Hub task state.
pub struct SessionHub {
    store: SessionStore,
    scheduler: TransitionScheduler,
    updates: broadcast::Sender<Arc<Snapshot>>,
    connections: HashMap<ConnectionId, Option<Role>>,
    events: Arc<EventEmitter>,
}

impl SessionHub {
    /// Spawns the hub task.
    ///
    /// `broadcast_capacity` is the number of snapshots a slow connection may
    /// fall behind before it skips ahead; it is clamped to
    /// `1..=MAX_BROADCAST_CAPACITY`. The task exits when `cancel` fires or
    /// every [`HubHandle`] is dropped.
    #[must_use]
    pub fn spawn(
        config: SessionConfig,
        broadcast_capacity: usize,
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (updates, _) = broadcast::channel(broadcast_capacity.clamp(1, MAX_BROADCAST_CAPACITY));
        let (scheduler, timers_rx) = TransitionScheduler::new();

        let hub = Self {
            store: SessionStore::new(config),
            scheduler,
            updates,
            connections: HashMap::new(),
            events,
        };
        metrics::set_current_phase(Phase::Waiting, None);

        let handle = tokio::spawn(hub.run(commands_rx, timers_rx, cancel));
        (
            HubHandle {
                commands: commands_tx,
            },
            handle,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HubCommand>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("session hub cancelled");
                    break;
                }
                Some(fired) = timers.recv() => self.on_timer(fired),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("all hub handles dropped");
                        break;
                    }
                },
            }
        }
        self.scheduler.cancel();
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { id, reply } => {
                self.connections.insert(id, None);
                let subscription = Subscription {
                    initial: self.store.snapshot(),
                    updates: self.updates.subscribe(),
                };
                if reply.send(subscription).is_err() {
                    // Connection gave up before we answered.
                    self.connections.remove(&id);
                    return;
                }
                self.events.emit(Event::ClientConnected {
                    timestamp: Utc::now(),
                    connection_id: id,
                });
            }
            HubCommand::Client { id, message } => self.on_client_message(id, message),
            HubCommand::Disconnect { id } => {
                if self.connections.remove(&id).is_none() {
                    return;
                }
                let outcome = self.store.unregister_watcher(id);
                self.apply(outcome);
                self.events.emit(Event::ClientDisconnected {
                    timestamp: Utc::now(),
                    connection_id: id,
                    watchers: self.store.watchers(),
                });
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
        }
    }

    fn on_client_message(&mut self, id: ConnectionId, message: ClientMessage) {
        let event = message.event_name();
        metrics::record_client_message(event);

        let Some(role) = self.connections.get(&id).copied() else {
            debug!(connection_id = %id, event, "message from unknown connection");
            metrics::record_ignored_message(event);
            return;
        };

        let (outcome, accepted) = self.dispatch(id, role, message);
        if accepted {
            trace!(connection_id = %id, event, "applied");
        } else {
            trace!(connection_id = %id, event, "ignored");
            metrics::record_ignored_message(event);
        }
        self.apply(outcome);
    }

    /// Runs a message against the session. The flag is `true` when the
    /// message took effect, which a join can do without changing state.
    fn dispatch(
        &mut self,
        id: ConnectionId,
        role: Option<Role>,
        message: ClientMessage,
    ) -> (Outcome, bool) {
        let outcome = match message {
            ClientMessage::JoinAs(next) => return self.join_as(id, role, next),
            ClientMessage::GazeStart => self.store.start_gaze(id),
            ClientMessage::GazeHold => self.store.hold_gaze(id),
            ClientMessage::GazeEnd => self.store.end_gaze(id),
            ClientMessage::TriggerTransmutation if self.may_control(role) => {
                self.store.trigger_transmutation()
            }
            ClientMessage::ResetExperience if self.may_control(role) => {
                self.store.reset_experience()
            }
            ClientMessage::TriggerTransmutation | ClientMessage::ResetExperience => {
                debug!(connection_id = %id, "control event from non-experiencer");
                Outcome::ignored()
            }
        };
        let accepted = outcome.changed;
        (outcome, accepted)
    }

    fn join_as(
        &mut self,
        id: ConnectionId,
        current: Option<Role>,
        next: Role,
    ) -> (Outcome, bool) {
        self.connections.insert(id, Some(next));
        debug!(connection_id = %id, role = next.as_str(), "joined");
        let outcome = match (current, next) {
            (_, Role::Audience) => self.store.register_watcher(id),
            (Some(Role::Audience), Role::Experiencer) => self.store.unregister_watcher(id),
            (_, Role::Experiencer) => Outcome::ignored(),
        };
        let accepted = outcome.changed || current != Some(next);
        (outcome, accepted)
    }

    fn may_control(&self, role: Option<Role>) -> bool {
        !self.store.config().experiencer_controls_only || role == Some(Role::Experiencer)
    }

    fn on_timer(&mut self, fired: TimerFired) {
        let outcome = self.store.fire(fired.step, fired.generation);
        if !outcome.changed {
            debug!(
                step = fired.step.as_str(),
                generation = fired.generation,
                "stale timer ignored"
            );
            return;
        }
        self.apply(outcome);
    }

    /// Publishes the effects of an outcome: timers, observability, broadcast.
    fn apply(&mut self, outcome: Outcome) {
        if !outcome.changed {
            return;
        }

        self.scheduler.sync(self.store.generation());
        if let Some(request) = outcome.schedule {
            self.scheduler.arm(request);
        }

        let snapshot = self.store.snapshot();

        if let Some(change) = outcome.transition {
            let cause = change.cause.as_str();
            info!(
                from = change.from.as_str(),
                to = change.to.as_str(),
                cause,
                pressure = snapshot.total_pressure,
                "phase transition"
            );
            metrics::record_phase_transition(change.from, change.to, cause);
            self.events.emit(Event::PhaseEntered {
                timestamp: Utc::now(),
                from: change.from,
                phase: change.to,
                pressure: snapshot.total_pressure,
                cause,
            });
            if change.to == Phase::Waiting {
                self.events.emit(Event::ExperienceReset {
                    timestamp: Utc::now(),
                    cause,
                });
            }
        }

        metrics::set_session_gauges(snapshot.watchers, snapshot.total_pressure);
        metrics::record_broadcast();
        // No subscribers is fine.
        let _ = self.updates.send(Arc::new(snapshot));
    }
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("store", &self.store)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
