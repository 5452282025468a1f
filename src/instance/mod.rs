//! Per-entity lifecycle state machine.
//!
//! ```text
//! Uninitialized --Init--> Recovering --Event*--> Recovering --ReplayEnd--> Ready
//! Ready --Command--> Processing --(PersistAck | PersistFailed | no persistence)--> Ready
//! Ready --idle--> Passivating --PassivateAck--> Stopped
//! Passivating --PassivateDenied--> Ready
//! Passivating --Command--> Processing   (passivation abandoned)
//! ```
//!
//! The instance is synchronous: every input returns the messages to send.
//! Time only enters through the deadlines it exposes, which the session loop
//! sleeps on.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::dispatch::DispatchError;
use crate::effect::{CommandContext, Effect, Persistence, SideEffect, StateChange};
use crate::entity::{EntityDefinition, EntityKind, StateModel};
use crate::error::{Result, SessionError};
use crate::passivation::{deadline_after, PassivationStrategy, PassivationTimer};
use crate::proto::{self, entity_stream_in, entity_stream_out, persist, FailureKind};
use crate::replay::{self, ReplayStep, SnapshotPolicy};


/// Lifecycle states of an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Uninitialized,
    Recovering,
    Ready,
    Processing,
    Passivating,
    Stopped,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Settings resolved for one entity type from its options and the runtime defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    pub passivation: PassivationStrategy,
    pub snapshot_every: u64,
    pub persist_ack_timeout: Duration,
}

impl InstanceSettings {
    pub fn resolve(definition: &dyn EntityDefinition, runtime: &RuntimeConfig) -> Self {
        let options = definition.options();
        let snapshot_every = match definition.kind() {
            EntityKind::Value => 0,
            EntityKind::EventSourced => options.snapshot_every.unwrap_or(runtime.snapshot_every),
        };
        Self {
            passivation: options
                .passivation
                .unwrap_or_else(|| PassivationStrategy::timeout(runtime.passivation_timeout())),
            snapshot_every,
            persist_ack_timeout: runtime.persist_ack_timeout(),
        }
    }
}

type Outbound = Vec<entity_stream_out::Message>;

/// A command whose persistence the proxy has not yet answered.
struct PendingCommand {
    correlation_id: String,
    response: entity_stream_out::Message,
    sequence: u64,
    events: u64,
    deadline: Instant,
}

/// One live entity: its state, sequence and lifecycle.
pub struct EntityInstance {
    definition: Arc<dyn EntityDefinition>,
    model: Box<dyn StateModel>,
    settings: InstanceSettings,
    entity_id: String,
    lifecycle: Lifecycle,
    sequence: u64,
    snapshots: SnapshotPolicy,
    passivation: PassivationTimer,
    pending: Option<PendingCommand>,
    snapshot_deferred: bool,
    unanswered_passivations: u32,
    /// Outstanding requests a command has since overtaken. The proxy answers
    /// in order, so this many answers belong to requests no longer current.
    abandoned_passivations: u32,
}

impl EntityInstance {
    pub fn new(definition: Arc<dyn EntityDefinition>, settings: InstanceSettings) -> Self {
        let model = definition.new_model();
        Self {
            model,
            snapshots: SnapshotPolicy::new(settings.snapshot_every),
            passivation: PassivationTimer::new(settings.passivation),
            definition,
            settings,
            entity_id: String::new(),
            lifecycle: Lifecycle::Uninitialized,
            sequence: 0,
            pending: None,
            snapshot_deferred: false,
            unanswered_passivations: 0,
            abandoned_passivations: 0,
        }
    }

    /// Feed one inbound protocol message.
    pub fn handle(&mut self, message: entity_stream_in::Message) -> Result<Outbound> {
        use entity_stream_in::Message;

        match message {
            Message::Init(init) => self.init(init).map(|()| Vec::new()),
            Message::Event(event) => self.replay_event(event),
            Message::ReplayEnd(_) => self.replay_end(),
            Message::Command(command) => self.handle_command(command),
            Message::PersistAck(_) => self.persist_acked(),
            Message::PersistFailed(failed) => self.persist_failed(failed.reason),
            Message::SnapshotRequest(_) => self.snapshot_requested(),
            Message::PassivateAck(_) => self.passivation_answered(true),
            Message::PassivateDenied(_) => self.passivation_answered(false),
        }
    }

    pub fn init(&mut self, init: proto::Init) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return Err(self.violation("duplicate Init"));
        }
        if init.entity_id.is_empty() {
            return Err(self.violation("Init without an entity id"));
        }
        if init.entity_type != self.definition.entity_type() {
            return Err(self.violation(format!(
                "Init for entity type '{}' sent to a '{}' instance",
                init.entity_type,
                self.definition.entity_type()
            )));
        }

        let (sequence, snapshot) = match init.snapshot {
            Some(snapshot) => (snapshot.sequence, Some(snapshot.state)),
            None => (0, None),
        };
        self.model
            .seed(snapshot.as_deref())
            .map_err(|err| match err {
                DispatchError::Decode { source, .. } => SessionError::StateDecode(source),
                other => fatal(other, sequence),
            })?;

        self.entity_id = init.entity_id;
        self.sequence = sequence;
        self.lifecycle = Lifecycle::Recovering;
        debug!(
            entity_id = %self.entity_id,
            sequence,
            from_snapshot = snapshot.is_some(),
            "Entity recovering"
        );
        Ok(())
    }

    fn replay_event(&mut self, event: proto::Event) -> Result<Outbound> {
        if self.lifecycle != Lifecycle::Recovering {
            return Err(self.violation("Event outside the replay phase"));
        }
        if self.definition.kind() == EntityKind::Value {
            return Err(self.violation("value entities do not replay events"));
        }

        if replay::classify(self.sequence, event.sequence)? == ReplayStep::Duplicate {
            debug!(
                sequence = event.sequence,
                current = self.sequence,
                "Discarding duplicate event"
            );
            return Ok(Vec::new());
        }

        self.model
            .apply_event(&event.type_name, &event.payload)
            .map_err(|err| fatal(err, event.sequence))?;
        self.sequence = event.sequence;
        self.snapshots.record(1);
        Ok(Vec::new())
    }

    fn replay_end(&mut self) -> Result<Outbound> {
        if self.lifecycle != Lifecycle::Recovering {
            return Err(self.violation("ReplayEnd outside the replay phase"));
        }
        self.lifecycle = Lifecycle::Ready;
        self.passivation.reset();
        info!(
            entity_id = %self.entity_id,
            sequence = self.sequence,
            "Entity ready"
        );
        Ok(Vec::new())
    }

    fn handle_command(&mut self, command: proto::Command) -> Result<Outbound> {
        match self.lifecycle {
            Lifecycle::Ready => {}
            Lifecycle::Passivating => {
                self.abandoned_passivations += 1;
                info!(
                    entity_id = %self.entity_id,
                    command = %command.name,
                    "Command arrived while passivating, passivation abandoned"
                );
            }
            Lifecycle::Processing => {
                return Err(self.violation(format!(
                    "command '{}' while another command is in flight",
                    command.name
                )));
            }
            _ => return Err(self.violation(format!("command '{}'", command.name))),
        }

        self.passivation.disarm();
        self.lifecycle = Lifecycle::Processing;
        debug!(
            command = %command.name,
            correlation_id = %command.correlation_id,
            "Handling command"
        );

        let ctx = CommandContext::new(
            self.definition.entity_type(),
            self.entity_id.as_str(),
            command.name.as_str(),
            command.correlation_id.as_str(),
            self.sequence,
        );
        let effect = match self
            .model
            .handle_command(&command.name, &command.payload, &ctx)
        {
            Ok(effect) => effect,
            Err(err @ DispatchError::Panicked { .. }) => return Err(fatal(err, self.sequence)),
            Err(err) => {
                let kind = match &err {
                    DispatchError::CommandNotFound(_) => FailureKind::HandlerNotFound,
                    DispatchError::Decode { .. } => FailureKind::InvalidPayload,
                    _ => FailureKind::InvalidEffect,
                };
                return Ok(self.reject(command.correlation_id, err.to_string(), kind));
            }
        };

        let correlation_id = command.correlation_id;
        let (response, persistence) = match effect {
            Effect::Failure { message } => {
                return Ok(self.reject(correlation_id, message, FailureKind::Rejected));
            }
            Effect::Reply {
                payload,
                persistence,
                side_effects,
            } => (
                entity_stream_out::Message::Reply(proto::Reply {
                    correlation_id: correlation_id.clone(),
                    payload,
                    side_effects: wire_side_effects(side_effects),
                }),
                persistence,
            ),
            Effect::Forward {
                call,
                persistence,
                side_effects,
            } => (
                entity_stream_out::Message::Forward(proto::Forward {
                    correlation_id: correlation_id.clone(),
                    target_service: call.service,
                    target_method: call.method,
                    payload: call.payload,
                    side_effects: wire_side_effects(side_effects),
                }),
                persistence,
            ),
        };

        if persistence.is_empty() {
            return Ok(self.finish_command(vec![response]));
        }

        if let Err(err) = self.model.stage(&persistence) {
            if matches!(err, DispatchError::Panicked { .. }) {
                return Err(fatal(err, self.sequence));
            }
            return Ok(self.reject(
                correlation_id,
                format!("effect could not be applied: {}", err),
                FailureKind::InvalidEffect,
            ));
        }

        let (batch, next_sequence, events) = self.persist_batch(&correlation_id, persistence);
        debug!(
            correlation_id = %correlation_id,
            events,
            next_sequence,
            "Awaiting persistence"
        );
        self.pending = Some(PendingCommand {
            correlation_id,
            response,
            sequence: next_sequence,
            events,
            deadline: deadline_after(self.settings.persist_ack_timeout),
        });
        Ok(vec![entity_stream_out::Message::Persist(batch)])
    }

    fn persist_batch(
        &self,
        correlation_id: &str,
        persistence: Persistence,
    ) -> (proto::Persist, u64, u64) {
        match self.definition.kind() {
            EntityKind::EventSourced => {
                let count = persistence.events.len() as u64;
                let events = persistence
                    .events
                    .into_iter()
                    .zip(self.sequence + 1..)
                    .map(|(event, sequence)| proto::PersistEvent {
                        sequence,
                        type_name: event.type_name,
                        payload: event.payload,
                    })
                    .collect();
                let batch = proto::Persist {
                    correlation_id: correlation_id.to_string(),
                    events,
                    state_action: None,
                };
                (batch, self.sequence + count, count)
            }
            EntityKind::Value => {
                let state_action = persistence.state.map(|change| match change {
                    StateChange::Update(bytes) => persist::StateAction::Update(bytes),
                    StateChange::Delete => persist::StateAction::Delete(proto::StateDelete {}),
                });
                let batch = proto::Persist {
                    correlation_id: correlation_id.to_string(),
                    events: Vec::new(),
                    state_action,
                };
                (batch, self.sequence + 1, 0)
            }
        }
    }

    fn persist_acked(&mut self) -> Result<Outbound> {
        let pending = self.take_pending("PersistAck")?;
        self.model.commit();
        self.sequence = pending.sequence;
        self.snapshots.record(pending.events);
        debug!(
            correlation_id = %pending.correlation_id,
            sequence = self.sequence,
            "Persistence acknowledged"
        );
        Ok(self.finish_command(vec![pending.response]))
    }

    fn persist_failed(&mut self, reason: String) -> Result<Outbound> {
        let pending = self.take_pending("PersistFailed")?;
        self.model.rollback();
        warn!(
            entity_id = %self.entity_id,
            correlation_id = %pending.correlation_id,
            reason = %reason,
            "Persistence failed"
        );
        let failure = failure(
            pending.correlation_id,
            format!("persistence failed: {}", reason),
            FailureKind::PersistenceFailed,
        );
        Ok(self.finish_command(vec![failure]))
    }

    fn take_pending(&mut self, what: &str) -> Result<PendingCommand> {
        if self.lifecycle != Lifecycle::Processing {
            return Err(self.violation(format!("{} without a pending persist", what)));
        }
        match self.pending.take() {
            Some(pending) => Ok(pending),
            None => Err(self.violation(format!("{} without a pending persist", what))),
        }
    }

    fn snapshot_requested(&mut self) -> Result<Outbound> {
        if self.definition.kind() == EntityKind::Value {
            return Err(self.violation("value entities do not take snapshots"));
        }
        match self.lifecycle {
            Lifecycle::Ready | Lifecycle::Passivating => Ok(vec![self.snapshot_offer()]),
            Lifecycle::Processing => {
                debug!("Snapshot requested mid-command, deferring");
                self.snapshot_deferred = true;
                Ok(Vec::new())
            }
            _ => Err(self.violation("SnapshotRequest")),
        }
    }

    fn snapshot_offer(&mut self) -> entity_stream_out::Message {
        self.snapshots.mark_taken();
        debug!(sequence = self.sequence, "Offering snapshot");
        entity_stream_out::Message::SnapshotOffer(proto::SnapshotOffer {
            sequence: self.sequence,
            state: self.model.encode_state(),
        })
    }

    /// Called by the session when the idle deadline passes.
    pub fn passivation_expired(&mut self) -> Result<Outbound> {
        if self.lifecycle != Lifecycle::Ready {
            self.passivation.disarm();
            return Ok(Vec::new());
        }
        self.passivation.disarm();
        self.lifecycle = Lifecycle::Passivating;
        self.unanswered_passivations += 1;
        info!(
            entity_id = %self.entity_id,
            idle = ?self.passivation.timeout(),
            "Requesting passivation"
        );
        Ok(vec![entity_stream_out::Message::PassivateRequest(
            proto::PassivateRequest {},
        )])
    }

    fn passivation_answered(&mut self, accepted: bool) -> Result<Outbound> {
        if self.unanswered_passivations == 0 {
            return Err(self.violation("passivation answer without a passivation request"));
        }
        self.unanswered_passivations -= 1;

        if self.abandoned_passivations > 0 {
            self.abandoned_passivations -= 1;
            debug!(accepted, "Ignoring answer to an abandoned passivation request");
            return Ok(Vec::new());
        }
        if self.lifecycle != Lifecycle::Passivating {
            return Err(self.violation("passivation answer outside passivation"));
        }
        if accepted {
            self.lifecycle = Lifecycle::Stopped;
            info!(entity_id = %self.entity_id, sequence = self.sequence, "Entity passivated");
        } else {
            self.lifecycle = Lifecycle::Ready;
            self.passivation.reset();
            debug!(entity_id = %self.entity_id, "Passivation denied");
        }
        Ok(Vec::new())
    }

    /// Called by the session when the persist acknowledgement deadline passes.
    /// The in-flight command is abandoned and the instance stops.
    pub fn persist_ack_timed_out(&mut self) -> SessionError {
        let correlation_id = self
            .pending
            .take()
            .map(|pending| pending.correlation_id)
            .unwrap_or_default();
        self.model.rollback();
        self.lifecycle = Lifecycle::Stopped;
        self.passivation.disarm();
        SessionError::PersistAckTimeout {
            correlation_id,
            timeout: self.settings.persist_ack_timeout,
        }
    }

    /// Stream closed: discard any unresolved command.
    pub fn stop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.model.rollback();
            debug!(
                correlation_id = %pending.correlation_id,
                "Discarding unacknowledged command"
            );
        }
        self.passivation.disarm();
        self.lifecycle = Lifecycle::Stopped;
    }

    fn finish_command(&mut self, mut out: Outbound) -> Outbound {
        self.lifecycle = Lifecycle::Ready;
        self.passivation.reset();
        let deferred = std::mem::take(&mut self.snapshot_deferred);
        if self.snapshots.is_due() || deferred {
            out.push(self.snapshot_offer());
        }
        out
    }

    fn reject(&mut self, correlation_id: String, message: String, kind: FailureKind) -> Outbound {
        match kind {
            FailureKind::Rejected => {
                debug!(correlation_id = %correlation_id, %message, "Command rejected")
            }
            _ => warn!(
                correlation_id = %correlation_id,
                kind = kind.as_str_name(),
                %message,
                "Command failed"
            ),
        }
        self.finish_command(vec![failure(correlation_id, message, kind)])
    }

    fn violation(&self, message: impl Into<String>) -> SessionError {
        SessionError::protocol(self.lifecycle, message)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle == Lifecycle::Stopped
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity_type(&self) -> &str {
        self.definition.entity_type()
    }

    /// Sequence of the last committed event or state write.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encoded committed state.
    pub fn state(&self) -> Vec<u8> {
        self.model.encode_state()
    }

    pub fn in_flight_commands(&self) -> usize {
        usize::from(self.lifecycle == Lifecycle::Processing)
    }

    pub fn passivation_deadline(&self) -> Option<Instant> {
        self.passivation.deadline()
    }

    pub fn persist_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }
}

/// Map a dispatch error during recovery or handling to the terminal error.
fn fatal(err: DispatchError, sequence: u64) -> SessionError {
    match err {
        DispatchError::EventNotFound(type_name) => SessionError::UnknownEvent {
            type_name,
            sequence,
        },
        DispatchError::Decode { name, source } => SessionError::UndecodableEvent {
            type_name: name,
            sequence,
            source,
        },
        DispatchError::Panicked { name, message } => SessionError::HandlerPanicked {
            handler: name,
            message,
        },
        DispatchError::CommandNotFound(name) | DispatchError::InvalidEffect(name) => {
            SessionError::HandlerPanicked {
                handler: name,
                message: "unexpected dispatch failure".to_string(),
            }
        }
    }
}

fn failure(
    correlation_id: String,
    message: String,
    kind: FailureKind,
) -> entity_stream_out::Message {
    entity_stream_out::Message::Failure(proto::Failure {
        correlation_id,
        message,
        kind: kind as i32,
    })
}

fn wire_side_effects(side_effects: Vec<SideEffect>) -> Vec<proto::SideEffect> {
    side_effects
        .into_iter()
        .map(|effect| proto::SideEffect {
            service: effect.service,
            method: effect.method,
            payload: effect.payload,
            synchronous: effect.synchronous,
        })
        .collect()
}
