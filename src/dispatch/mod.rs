//! Name-based routing of commands and events to typed handlers.
//!
//! Each entity type owns one [`HandlerTable`]. Registration wraps a typed
//! handler in a closure that decodes the wire payload with `prost` first, so
//! dispatch itself is a lookup plus invocation.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use prost::Message;

use crate::effect::{CommandContext, Effect};
use crate::error::HandlerKind;


/// Per-message dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no command handler for '{0}'")]
    CommandNotFound(String),

    #[error("no event handler for '{0}'")]
    EventNotFound(String),

    #[error("payload for '{name}' did not decode: {source}")]
    Decode {
        name: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("invalid effect: {0}")]
    InvalidEffect(String),

    #[error("handler '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

type CommandFn<S> =
    Arc<dyn Fn(&S, &[u8], &CommandContext) -> Result<Effect, DispatchError> + Send + Sync>;
type EventFn<S> = Arc<dyn Fn(&mut S, &[u8]) -> Result<(), DispatchError> + Send + Sync>;

/// Command and event handlers for one entity type.
pub struct HandlerTable<S> {
    commands: HashMap<String, CommandFn<S>>,
    events: HashMap<String, EventFn<S>>,
    command_order: Vec<String>,
    event_order: Vec<String>,
    duplicates: Vec<(HandlerKind, String)>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            events: HashMap::new(),
            command_order: Vec::new(),
            event_order: Vec::new(),
            duplicates: Vec::new(),
        }
    }
}

impl<S> Clone for HandlerTable<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            command_order: self.command_order.clone(),
            event_order: self.event_order.clone(),
            duplicates: self.duplicates.clone(),
        }
    }
}

impl<S: 'static> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler. A repeated name is kept aside and
    /// reported when the registry is built.
    pub fn add_command<C, F>(&mut self, name: impl Into<String>, handler: F)
    where
        C: Message + Default + 'static,
        F: Fn(&S, C, &CommandContext) -> Effect + Send + Sync + 'static,
    {
        let name = name.into();
        if self.commands.contains_key(&name) {
            self.duplicates.push((HandlerKind::Command, name));
            return;
        }
        let decode_name = name.clone();
        let wrapped: CommandFn<S> =
            Arc::new(move |state: &S, payload: &[u8], ctx: &CommandContext| {
                let command = C::decode(payload).map_err(|source| DispatchError::Decode {
                    name: decode_name.clone(),
                    source,
                })?;
                Ok(handler(state, command, ctx))
            });
        self.command_order.push(name.clone());
        self.commands.insert(name, wrapped);
    }

    /// Register an event handler.
    pub fn add_event<E, F>(&mut self, name: impl Into<String>, handler: F)
    where
        E: Message + Default + 'static,
        F: Fn(&mut S, E) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.events.contains_key(&name) {
            self.duplicates.push((HandlerKind::Event, name));
            return;
        }
        let decode_name = name.clone();
        let wrapped: EventFn<S> = Arc::new(move |state: &mut S, payload: &[u8]| {
            let event = E::decode(payload).map_err(|source| DispatchError::Decode {
                name: decode_name.clone(),
                source,
            })?;
            handler(state, event);
            Ok(())
        });
        self.event_order.push(name.clone());
        self.events.insert(name, wrapped);
    }

    /// Route a command to its handler.
    pub fn dispatch_command(
        &self,
        state: &S,
        name: &str,
        payload: &[u8],
        ctx: &CommandContext,
    ) -> Result<Effect, DispatchError> {
        let handler = self
            .commands
            .get(name)
            .ok_or_else(|| DispatchError::CommandNotFound(name.to_string()))?;
        guarded(name, || handler(state, payload, ctx))
    }

    /// Route an event to its handler, folding it into `state`.
    pub fn apply_event(
        &self,
        state: &mut S,
        name: &str,
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let handler = self
            .events
            .get(name)
            .ok_or_else(|| DispatchError::EventNotFound(name.to_string()))?;
        guarded(name, || handler(state, payload))
    }

    pub fn command_names(&self) -> &[String] {
        &self.command_order
    }

    pub fn event_names(&self) -> &[String] {
        &self.event_order
    }

    /// Names registered more than once, in registration order.
    pub fn duplicates(&self) -> &[(HandlerKind, String)] {
        &self.duplicates
    }
}

/// Run user code, turning a panic into a [`DispatchError::Panicked`].
pub(crate) fn guarded<T>(
    name: &str,
    f: impl FnOnce() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(DispatchError::Panicked {
            name: name.to_string(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
