//! Error types for the entity runtime.
//!
//! Failures split three ways: definition errors surface once when the
//! registry is built, dispatch errors are per-message and usually become a
//! command `Failure`, and session errors end the stream.

use std::time::Duration;

use tonic::Status;

use crate::instance::Lifecycle;

/// Registry build failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("entity type name must not be empty")]
    EmptyEntityType,

    #[error("entity type '{0}' registered more than once")]
    DuplicateEntityType(String),

    #[error("entity type '{entity_type}' has an empty {kind} handler name")]
    EmptyHandlerName {
        entity_type: String,
        kind: HandlerKind,
    },

    #[error("entity type '{entity_type}' registers {kind} handler '{name}' more than once")]
    DuplicateHandler {
        entity_type: String,
        kind: HandlerKind,
        name: String,
    },

    #[error("entity type '{0}' has no command handlers")]
    NoCommandHandlers(String),

    #[error("entity type '{entity_type}': {reason}")]
    InvalidOption { entity_type: String, reason: String },
}

/// Which handler table a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Command,
    Event,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Command => write!(f, "command"),
            HandlerKind::Event => write!(f, "event"),
        }
    }
}

/// Errors that end an entity stream.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol violation in {state}: {message}")]
    Protocol { state: Lifecycle, message: String },

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("instance limit of {limit} reached")]
    AtCapacity { limit: usize },

    #[error("no event handler for '{type_name}' at sequence {sequence}")]
    UnknownEvent { type_name: String, sequence: u64 },

    #[error("event '{type_name}' at sequence {sequence} did not decode: {source}")]
    UndecodableEvent {
        type_name: String,
        sequence: u64,
        #[source]
        source: prost::DecodeError,
    },

    #[error("sequence gap: expected {expected}, received {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    #[error("snapshot state did not decode: {0}")]
    StateDecode(#[source] prost::DecodeError),

    #[error("handler '{handler}' panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    #[error("persistence of command '{correlation_id}' not acknowledged within {timeout:?}")]
    PersistAckTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    #[error("inbound stream failed: {0}")]
    Transport(Box<Status>),
}

impl SessionError {
    pub(crate) fn protocol(state: Lifecycle, message: impl Into<String>) -> Self {
        SessionError::Protocol {
            state,
            message: message.into(),
        }
    }
}

impl From<Status> for SessionError {
    fn from(status: Status) -> Self {
        SessionError::Transport(Box::new(status))
    }
}

impl From<SessionError> for Status {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Protocol { .. } => Status::failed_precondition(err.to_string()),
            SessionError::UnknownEntityType(_) => Status::not_found(err.to_string()),
            SessionError::AtCapacity { .. } => Status::resource_exhausted(err.to_string()),
            SessionError::UnknownEvent { .. }
            | SessionError::UndecodableEvent { .. }
            | SessionError::SequenceGap { .. }
            | SessionError::StateDecode(_) => Status::data_loss(err.to_string()),
            SessionError::HandlerPanicked { .. } => Status::internal(err.to_string()),
            SessionError::PersistAckTimeout { .. } => Status::deadline_exceeded(err.to_string()),
            SessionError::Transport(status) => *status,
        }
    }
}

/// Result type for session-level operations.
pub type Result<T> = std::result::Result<T, SessionError>;
