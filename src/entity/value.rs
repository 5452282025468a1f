//! Value entities: the stored state is replaced wholesale by commands.

use std::sync::Arc;

use prost::Message;

use super::{
    validate_names, validate_options, EntityDefinition, EntityKind, EntityOptions, StateModel,
};
use crate::dispatch::{guarded, DispatchError, HandlerTable};
use crate::effect::{CommandContext, Effect, Persistence, StateChange};
use crate::error::DefinitionError;
use crate::passivation::PassivationStrategy;

type EmptyState<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// Registration table for a value entity type.
///
/// ```rust,ignore
/// let customer = ValueEntity::<Customer>::new("customer")
///     .command("Create", create)
///     .command("ChangeName", change_name)
///     .command("Delete", |_, _: Empty, _| Effect::delete_state().then_reply(&Empty {}));
/// ```
pub struct ValueEntity<S> {
    entity_type: String,
    handlers: Arc<HandlerTable<S>>,
    empty_state: EmptyState<S>,
    options: EntityOptions,
}

impl<S> ValueEntity<S>
where
    S: Message + Default + Clone + 'static,
{
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            handlers: Arc::new(HandlerTable::new()),
            empty_state: Arc::new(S::default),
            // Value entities never offer snapshots.
            options: EntityOptions {
                passivation: None,
                snapshot_every: Some(0),
            },
        }
    }

    pub fn command<C, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        C: Message + Default + 'static,
        F: Fn(&S, C, &CommandContext) -> Effect + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.handlers).add_command(name, handler);
        self
    }

    /// State before the first write and after a delete.
    pub fn empty_state(mut self, empty: impl Fn() -> S + Send + Sync + 'static) -> Self {
        self.empty_state = Arc::new(empty);
        self
    }

    pub fn passivation(mut self, strategy: PassivationStrategy) -> Self {
        self.options.passivation = Some(strategy);
        self
    }
}

impl<S> EntityDefinition for ValueEntity<S>
where
    S: Message + Default + Clone + 'static,
{
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Value
    }

    fn options(&self) -> &EntityOptions {
        &self.options
    }

    fn command_names(&self) -> Vec<String> {
        self.handlers.command_names().to_vec()
    }

    fn event_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        validate_names(
            &self.entity_type,
            self.handlers.command_names(),
            &[],
            self.handlers.duplicates(),
        )?;
        validate_options(&self.entity_type, &self.options)
    }

    fn new_model(&self) -> Box<dyn StateModel> {
        Box::new(ValueModel {
            handlers: Arc::clone(&self.handlers),
            empty_state: Arc::clone(&self.empty_state),
            state: S::default(),
            staged: None,
        })
    }
}

struct ValueModel<S> {
    handlers: Arc<HandlerTable<S>>,
    empty_state: EmptyState<S>,
    state: S,
    staged: Option<S>,
}

impl<S> ValueModel<S> {
    fn empty(&self) -> Result<S, DispatchError> {
        guarded("empty_state", || Ok((self.empty_state)()))
    }
}

impl<S> StateModel for ValueModel<S>
where
    S: Message + Default + Clone + 'static,
{
    fn seed(&mut self, snapshot: Option<&[u8]>) -> Result<(), DispatchError> {
        self.state = match snapshot {
            Some(bytes) => S::decode(bytes).map_err(|source| DispatchError::Decode {
                name: "snapshot".to_string(),
                source,
            })?,
            None => self.empty()?,
        };
        self.staged = None;
        Ok(())
    }

    fn apply_event(&mut self, type_name: &str, _payload: &[u8]) -> Result<(), DispatchError> {
        Err(DispatchError::EventNotFound(type_name.to_string()))
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
        if effect.persistence().is_some_and(|p| !p.events.is_empty()) {
            return Err(DispatchError::InvalidEffect(
                "value entities persist state, not events".to_string(),
            ));
        }
        Ok(effect)
    }

    fn stage(&mut self, persistence: &Persistence) -> Result<(), DispatchError> {
        self.staged = match &persistence.state {
            Some(StateChange::Update(bytes)) => {
                Some(S::decode(bytes.as_slice()).map_err(|source| DispatchError::Decode {
                    name: "state".to_string(),
                    source,
                })?)
            }
            Some(StateChange::Delete) => Some(self.empty()?),
            None => None,
        };
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
