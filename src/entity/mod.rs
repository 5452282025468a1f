//! Entity definitions and the state models they create per instance.
//!
//! An [`EntityDefinition`] is registered once at startup and describes an
//! entity type: its name, kind, handler names and options. Each live instance
//! gets its own [`StateModel`] from [`EntityDefinition::new_model`], which
//! owns the materialized state and the staged copy awaiting persistence.

mod event_sourced;
mod value;

pub use event_sourced::EventSourcedEntity;
pub use value::ValueEntity;

use crate::dispatch::DispatchError;
use crate::effect::{CommandContext, Effect, Persistence};
use crate::error::{DefinitionError, HandlerKind};
use crate::passivation::PassivationStrategy;
pub use crate::proto::EntityKind;

/// Per-entity-type overrides of the runtime defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityOptions {
    pub passivation: Option<PassivationStrategy>,
    /// Events between opportunistic snapshots. Zero disables them.
    pub snapshot_every: Option<u64>,
}

/// A registered entity type.
pub trait EntityDefinition: Send + Sync + 'static {
    fn entity_type(&self) -> &str;

    fn kind(&self) -> EntityKind;

    fn options(&self) -> &EntityOptions;

    fn command_names(&self) -> Vec<String>;

    fn event_names(&self) -> Vec<String>;

    /// Definition-time checks, run when the registry is built.
    fn validate(&self) -> Result<(), DefinitionError>;

    /// Fresh state model for a new instance.
    fn new_model(&self) -> Box<dyn StateModel>;
}

/// The typed state of one instance behind an untyped interface.
///
/// Persistence is two-phase: [`stage`](StateModel::stage) computes the
/// post-effect state without exposing it, and only
/// [`commit`](StateModel::commit) makes it current.
pub trait StateModel: Send {
    /// Seed from a snapshot, or the empty state when there is none.
    fn seed(&mut self, snapshot: Option<&[u8]>) -> Result<(), DispatchError>;

    /// Fold a replayed event into the current state.
    fn apply_event(&mut self, type_name: &str, payload: &[u8]) -> Result<(), DispatchError>;

    /// Run a command handler against the current state. Effects that do not
    /// fit the entity kind are rejected with [`DispatchError::InvalidEffect`].
    fn handle_command(
        &self,
        name: &str,
        payload: &[u8],
        ctx: &CommandContext,
    ) -> Result<Effect, DispatchError>;

    fn stage(&mut self, persistence: &Persistence) -> Result<(), DispatchError>;

    fn commit(&mut self);

    fn rollback(&mut self);

    fn encode_state(&self) -> Vec<u8>;
}

pub(crate) fn validate_names(
    entity_type: &str,
    commands: &[String],
    events: &[String],
    duplicates: &[(HandlerKind, String)],
) -> Result<(), DefinitionError> {
    if entity_type.is_empty() {
        return Err(DefinitionError::EmptyEntityType);
    }
    if let Some((kind, name)) = duplicates.first() {
        return Err(DefinitionError::DuplicateHandler {
            entity_type: entity_type.to_string(),
            kind: *kind,
            name: name.clone(),
        });
    }
    if commands.iter().any(String::is_empty) {
        return Err(DefinitionError::EmptyHandlerName {
            entity_type: entity_type.to_string(),
            kind: HandlerKind::Command,
        });
    }
    if events.iter().any(String::is_empty) {
        return Err(DefinitionError::EmptyHandlerName {
            entity_type: entity_type.to_string(),
            kind: HandlerKind::Event,
        });
    }
    if commands.is_empty() {
        return Err(DefinitionError::NoCommandHandlers(entity_type.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_options(
    entity_type: &str,
    options: &EntityOptions,
) -> Result<(), DefinitionError> {
    match options.passivation {
        Some(strategy) if strategy.duration().is_zero() => Err(DefinitionError::InvalidOption {
            entity_type: entity_type.to_string(),
            reason: "passivation timeout must be positive".to_string(),
        }),
        Some(strategy) if strategy.duration() > PassivationStrategy::MAX_TIMEOUT => {
            Err(DefinitionError::InvalidOption {
                entity_type: entity_type.to_string(),
                reason: format!(
                    "passivation timeout exceeds {:?}",
                    PassivationStrategy::MAX_TIMEOUT
                ),
            })
        }
        _ => Ok(()),
    }
}
