//! Event-sourced entities: state is only ever the fold of events.

use std::sync::Arc;

use prost::Message;

use super::{
    validate_names, validate_options, EntityDefinition, EntityKind, EntityOptions, StateModel,
};
use crate::dispatch::{guarded, DispatchError, HandlerTable};
use crate::effect::{CommandContext, Effect, Persistence};
use crate::error::DefinitionError;
use crate::passivation::PassivationStrategy;

type EmptyState<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// Registration table for an event-sourced entity type.
///
/// ```rust,ignore
/// let cart = EventSourcedEntity::<Cart>::new("shopping-cart")
///     .command("AddItem", add_item)
///     .command("GetCart", get_cart)
///     .event("ItemAdded", item_added)
///     .snapshot_every(50);
/// ```
pub struct EventSourcedEntity<S> {
    entity_type: String,
    handlers: Arc<HandlerTable<S>>,
    empty_state: EmptyState<S>,
    options: EntityOptions,
}

impl<S> EventSourcedEntity<S>
where
    S: Message + Default + Clone + 'static,
{
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            handlers: Arc::new(HandlerTable::new()),
            empty_state: Arc::new(S::default),
            options: EntityOptions::default(),
        }
    }

    /// Handle command `name`. The handler sees the current state read-only.
    pub fn command<C, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        C: Message + Default + 'static,
        F: Fn(&S, C, &CommandContext) -> Effect + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.handlers).add_command(name, handler);
        self
    }

    /// Fold event `name` into the state.
    pub fn event<E, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        E: Message + Default + 'static,
        F: Fn(&mut S, E) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.handlers).add_event(name, handler);
        self
    }

    /// State used when no snapshot is available. Defaults to `S::default()`.
    pub fn empty_state(mut self, empty: impl Fn() -> S + Send + Sync + 'static) -> Self {
        self.empty_state = Arc::new(empty);
        self
    }

    pub fn passivation(mut self, strategy: PassivationStrategy) -> Self {
        self.options.passivation = Some(strategy);
        self
    }

    pub fn snapshot_every(mut self, events: u64) -> Self {
        self.options.snapshot_every = Some(events);
        self
    }
}

impl<S> EntityDefinition for EventSourcedEntity<S>
where
    S: Message + Default + Clone + 'static,
{
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn kind(&self) -> EntityKind {
        EntityKind::EventSourced
    }

    fn options(&self) -> &EntityOptions {
        &self.options
    }

    fn command_names(&self) -> Vec<String> {
        self.handlers.command_names().to_vec()
    }

    fn event_names(&self) -> Vec<String> {
        self.handlers.event_names().to_vec()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        validate_names(
            &self.entity_type,
            self.handlers.command_names(),
            self.handlers.event_names(),
            self.handlers.duplicates(),
        )?;
        validate_options(&self.entity_type, &self.options)
    }

    fn new_model(&self) -> Box<dyn StateModel> {
        Box::new(EventSourcedModel {
            handlers: Arc::clone(&self.handlers),
            empty_state: Arc::clone(&self.empty_state),
            state: S::default(),
            staged: None,
        })
    }
}

struct EventSourcedModel<S> {
    handlers: Arc<HandlerTable<S>>,
    empty_state: EmptyState<S>,
    state: S,
    staged: Option<S>,
}

impl<S> StateModel for EventSourcedModel<S>
where
    S: Message + Default + Clone + 'static,
{
    fn seed(&mut self, snapshot: Option<&[u8]>) -> Result<(), DispatchError> {
        self.state = match snapshot {
            Some(bytes) => S::decode(bytes).map_err(|source| DispatchError::Decode {
                name: "snapshot".to_string(),
                source,
            })?,
            None => guarded("empty_state", || Ok((self.empty_state)()))?,
        };
        self.staged = None;
        Ok(())
    }

    fn apply_event(&mut self, type_name: &str, payload: &[u8]) -> Result<(), DispatchError> {
        self.handlers.apply_event(&mut self.state, type_name, payload)
    }

    fn handle_command(
        &self,
        name: &str,
        payload: &[u8],
        ctx: &CommandContext,
    ) -> Result<Effect, DispatchError> {
        let effect = self
            .handlers
            .dispatch_command(&self.state, name, payload, ctx)?;
        if effect.persistence().is_some_and(|p| p.state.is_some()) {
            return Err(DispatchError::InvalidEffect(
                "event-sourced entities persist events, not state".to_string(),
            ));
        }
        Ok(effect)
    }

    fn stage(&mut self, persistence: &Persistence) -> Result<(), DispatchError> {
        let mut next = self.state.clone();
        for event in &persistence.events {
            self.handlers
                .apply_event(&mut next, &event.type_name, &event.payload)?;
        }
        self.staged = Some(next);
        Ok(())
    }

    fn commit(&mut self) {
        if let Some(next) = self.staged.take() {
            self.state = next;
        }
    }

    fn rollback(&mut self) {
        self.staged = None;
    }

    fn encode_state(&self) -> Vec<u8> {
        self.state.encode_to_vec()
    }
}
