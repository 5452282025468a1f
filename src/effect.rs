//! Command handler results.
//!
//! A handler returns exactly one [`Effect`]. Reply and forward effects may
//! carry persistence (events for event-sourced entities, a state write for
//! value entities) and side effects; the runtime sends the reply or forward
//! only after the proxy acknowledges the persistence.
//!
//! ```rust,ignore
//! fn add_item(cart: &Cart, cmd: AddLineItem, _ctx: &CommandContext) -> Effect {
//!     if cmd.quantity == 0 {
//!         return Effect::failure("quantity must be positive");
//!     }
//!     let added = ItemAdded { product_id: cmd.product_id, quantity: cmd.quantity };
//!     Effect::emit("ItemAdded", &added).then_reply(&Empty {})
//! }
//! ```

use prost::Message;

/// An event a command wants appended to the entity's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    pub type_name: String,
    pub payload: Vec<u8>,
}

impl EmittedEvent {
    pub fn new<E: Message>(type_name: impl Into<String>, event: &E) -> Self {
        Self {
            type_name: type_name.into(),
            payload: event.encode_to_vec(),
        }
    }
}

/// Replacement of a value entity's stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Update(Vec<u8>),
    Delete,
}

/// Everything an effect asks the proxy to persist before it is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persistence {
    pub events: Vec<EmittedEvent>,
    pub state: Option<StateChange>,
}

impl Persistence {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.state.is_none()
    }
}

/// A call the proxy issues on the entity's behalf after persistence succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffect {
    pub service: String,
    pub method: String,
    pub payload: Vec<u8>,
    pub synchronous: bool,
}

impl SideEffect {
    pub fn new<M: Message>(service: impl Into<String>, method: impl Into<String>, msg: &M) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            payload: msg.encode_to_vec(),
            synchronous: false,
        }
    }

    /// Require the proxy to complete this call before replying to the client.
    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }
}

/// Target of a forward effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCall {
    pub service: String,
    pub method: String,
    pub payload: Vec<u8>,
}

impl ForwardCall {
    pub fn new<M: Message>(service: impl Into<String>, method: impl Into<String>, msg: &M) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            payload: msg.encode_to_vec(),
        }
    }
}

/// The outcome of handling one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Reply {
        payload: Vec<u8>,
        persistence: Persistence,
        side_effects: Vec<SideEffect>,
    },
    Forward {
        call: ForwardCall,
        persistence: Persistence,
        side_effects: Vec<SideEffect>,
    },
    /// Business rejection; nothing is persisted.
    Failure { message: String },
}

impl Effect {
    pub fn reply<M: Message>(msg: &M) -> Self {
        Effect::Reply {
            payload: msg.encode_to_vec(),
            persistence: Persistence::default(),
            side_effects: Vec::new(),
        }
    }

    pub fn forward(call: ForwardCall) -> Self {
        Effect::Forward {
            call,
            persistence: Persistence::default(),
            side_effects: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Effect::Failure {
            message: message.into(),
        }
    }

    /// Start an effect that persists events. Event-sourced entities only.
    pub fn emit<E: Message>(type_name: impl Into<String>, event: &E) -> EffectBuilder {
        EffectBuilder::default().emit(type_name, event)
    }

    /// Start an effect that replaces the stored state. Value entities only.
    pub fn update_state<S: Message>(state: &S) -> EffectBuilder {
        EffectBuilder::default().update_state(state)
    }

    /// Start an effect that deletes the stored state. Value entities only.
    pub fn delete_state() -> EffectBuilder {
        EffectBuilder::default().delete_state()
    }

    /// Attach a side effect. Ignored on failures, which never release side effects.
    pub fn with_side_effect(mut self, side_effect: SideEffect) -> Self {
        match &mut self {
            Effect::Reply { side_effects, .. } | Effect::Forward { side_effects, .. } => {
                side_effects.push(side_effect)
            }
            Effect::Failure { .. } => {}
        }
        self
    }

    pub fn persistence(&self) -> Option<&Persistence> {
        match self {
            Effect::Reply { persistence, .. } | Effect::Forward { persistence, .. } => {
                Some(persistence)
            }
            Effect::Failure { .. } => None,
        }
    }
}

/// Accumulates persistence until the effect is finished with a reply or forward.
#[derive(Debug, Clone, Default)]
pub struct EffectBuilder {
    persistence: Persistence,
}

impl EffectBuilder {
    pub fn emit<E: Message>(mut self, type_name: impl Into<String>, event: &E) -> Self {
        self.persistence
            .events
            .push(EmittedEvent::new(type_name, event));
        self
    }

    pub fn update_state<S: Message>(mut self, state: &S) -> Self {
        self.persistence.state = Some(StateChange::Update(state.encode_to_vec()));
        self
    }

    pub fn delete_state(mut self) -> Self {
        self.persistence.state = Some(StateChange::Delete);
        self
    }

    pub fn then_reply<M: Message>(self, msg: &M) -> Effect {
        Effect::Reply {
            payload: msg.encode_to_vec(),
            persistence: self.persistence,
            side_effects: Vec::new(),
        }
    }

    pub fn then_forward(self, call: ForwardCall) -> Effect {
        Effect::Forward {
            call,
            persistence: self.persistence,
            side_effects: Vec::new(),
        }
    }
}

/// Read-only facts about the command being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    entity_type: String,
    entity_id: String,
    command_name: String,
    correlation_id: String,
    sequence: u64,
}

impl CommandContext {
    pub(crate) fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        command_name: impl Into<String>,
        correlation_id: impl Into<String>,
        sequence: u64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            command_name: command_name.into(),
            correlation_id: correlation_id.into(),
            sequence,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Sequence of the last committed event or state write.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
