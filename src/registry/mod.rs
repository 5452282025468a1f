//! Startup-time table of entity types.
//!
//! Built once, validated as a whole, then shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::entity::EntityDefinition;
use crate::error::DefinitionError;
use crate::proto::EntityDescriptor;


/// Maps entity type names to their definitions.
pub struct EntityRegistry {
    entities: HashMap<String, Arc<dyn EntityDefinition>>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn get(&self, entity_type: &str) -> Option<Arc<dyn EntityDefinition>> {
        self.entities.get(entity_type).cloned()
    }

    /// Entity type names in registration order.
    pub fn entity_types(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Discovery view of every entity type, with runtime defaults filled in
    /// where a type has no override.
    pub fn descriptors(&self, defaults: &RuntimeConfig) -> Vec<EntityDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entities.get(name))
            .map(|definition| {
                let options = definition.options();
                let passivation = options
                    .passivation
                    .map(|p| p.duration())
                    .unwrap_or_else(|| defaults.passivation_timeout());
                EntityDescriptor {
                    entity_type: definition.entity_type().to_string(),
                    kind: definition.kind() as i32,
                    commands: definition.command_names(),
                    events: definition.event_names(),
                    passivation_timeout_ms: passivation.as_millis() as u64,
                    snapshot_every: options.snapshot_every.unwrap_or(defaults.snapshot_every),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entity_types", &self.order)
            .finish()
    }
}

/// Collects definitions; [`build`](EntityRegistryBuilder::build) validates them.
#[derive(Default)]
pub struct EntityRegistryBuilder {
    definitions: Vec<Arc<dyn EntityDefinition>>,
}

impl EntityRegistryBuilder {
    pub fn register<D: EntityDefinition>(mut self, definition: D) -> Self {
        self.definitions.push(Arc::new(definition));
        self
    }

    pub fn build(self) -> Result<EntityRegistry, DefinitionError> {
        let mut entities: HashMap<String, Arc<dyn EntityDefinition>> = HashMap::new();
        let mut order = Vec::with_capacity(self.definitions.len());

        for definition in self.definitions {
            definition.validate()?;
            let name = definition.entity_type().to_string();
            if entities.contains_key(&name) {
                return Err(DefinitionError::DuplicateEntityType(name));
            }
            info!(
                entity_type = %name,
                kind = definition.kind().as_str_name(),
                commands = definition.command_names().len(),
                events = definition.event_names().len(),
                "Registered entity type"
            );
            order.push(name.clone());
            entities.insert(name, definition);
        }

        Ok(EntityRegistry { entities, order })
    }
}
