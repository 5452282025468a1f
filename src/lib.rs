//! Entity runtime.
//!
//! Hosts event-sourced and value entities behind a streamed protocol spoken
//! by an external proxy. The proxy owns durability and sharding; the runtime
//! owns per-entity state, command serialization, replay, snapshots and
//! passivation.
//!
//! ```ignore
//! let cart = EventSourcedEntity::<Cart>::new("cart")
//!     .command("AddLineItem", add_line_item)
//!     .event("ItemAdded", item_added);
//!
//! let registry = EntityRegistry::builder().register(cart).build()?;
//! let config = Config::load(None)?;
//! serve(EntityRuntime::new(registry, config.runtime.clone()), &config).await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod effect;
pub mod entity;
pub mod error;
pub mod grpc;
pub mod instance;
pub mod passivation;
pub mod proto;
pub mod registry;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::{Config, ConfigError, RuntimeConfig};
pub use effect::{CommandContext, Effect, EffectBuilder, ForwardCall, SideEffect};
pub use entity::{EntityDefinition, EntityKind, EventSourcedEntity, ValueEntity};
pub use error::{DefinitionError, SessionError};
pub use passivation::PassivationStrategy;
pub use registry::EntityRegistry;
pub use runtime::{serve, serve_on, serve_with_shutdown, EntityRuntime};
pub use transport::EntityListener;
