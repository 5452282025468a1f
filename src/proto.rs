//! Wire protocol between the proxy and the entity runtime.
//!
//! Messages are declared directly with `prost` derives; there is no `.proto`
//! build step. Field tags are part of the contract with the proxy and must
//! not be renumbered.

/// Protocol major version spoken by this runtime.
pub const PROTOCOL_MAJOR_VERSION: u32 = 1;

// ============================================================================
// Proxy -> runtime
// ============================================================================

/// Envelope for every message the proxy sends on an entity stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityStreamIn {
    #[prost(oneof = "entity_stream_in::Message", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub message: ::core::option::Option<entity_stream_in::Message>,
}

pub mod entity_stream_in {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Init(super::Init),
        #[prost(message, tag = "2")]
        Event(super::Event),
        #[prost(message, tag = "3")]
        ReplayEnd(super::ReplayEnd),
        #[prost(message, tag = "4")]
        Command(super::Command),
        #[prost(message, tag = "5")]
        PersistAck(super::PersistAck),
        #[prost(message, tag = "6")]
        PersistFailed(super::PersistFailed),
        #[prost(message, tag = "7")]
        SnapshotRequest(super::SnapshotRequest),
        #[prost(message, tag = "8")]
        PassivateAck(super::PassivateAck),
        #[prost(message, tag = "9")]
        PassivateDenied(super::PassivateDenied),
    }
}

/// First message on every stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Init {
    #[prost(string, tag = "1")]
    pub entity_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub entity_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub snapshot: ::core::option::Option<Snapshot>,
}

/// Serialized state tagged with the sequence it was taken at.
///
/// For value entities this is the stored value itself.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Snapshot {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub state: ::prost::alloc::vec::Vec<u8>,
}

/// A historical event replayed during recovery.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "3")]
    pub type_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplayEnd {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(string, tag = "1")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistAck {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistFailed {
    #[prost(string, tag = "1")]
    pub reason: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SnapshotRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PassivateAck {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PassivateDenied {}

// ============================================================================
// Runtime -> proxy
// ============================================================================

/// Envelope for every message the runtime sends on an entity stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityStreamOut {
    #[prost(oneof = "entity_stream_out::Message", tags = "1, 2, 3, 4, 5, 6")]
    pub message: ::core::option::Option<entity_stream_out::Message>,
}

pub mod entity_stream_out {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Reply(super::Reply),
        #[prost(message, tag = "2")]
        Forward(super::Forward),
        #[prost(message, tag = "3")]
        Failure(super::Failure),
        #[prost(message, tag = "4")]
        Persist(super::Persist),
        #[prost(message, tag = "5")]
        SnapshotOffer(super::SnapshotOffer),
        #[prost(message, tag = "6")]
        PassivateRequest(super::PassivateRequest),
    }
}

impl From<entity_stream_out::Message> for EntityStreamOut {
    fn from(message: entity_stream_out::Message) -> Self {
        Self {
            message: Some(message),
        }
    }
}

impl From<entity_stream_in::Message> for EntityStreamIn {
    fn from(message: entity_stream_in::Message) -> Self {
        Self {
            message: Some(message),
        }
    }
}

/// A call the proxy issues once the command's persistence has succeeded.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SideEffect {
    #[prost(string, tag = "1")]
    pub service: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub method: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "4")]
    pub synchronous: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reply {
    #[prost(string, tag = "1")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub side_effects: ::prost::alloc::vec::Vec<SideEffect>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Forward {
    #[prost(string, tag = "1")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub target_service: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub target_method: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub side_effects: ::prost::alloc::vec::Vec<SideEffect>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Failure {
    #[prost(string, tag = "1")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(enumeration = "FailureKind", tag = "3")]
    pub kind: i32,
}

/// Classification of a command failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FailureKind {
    /// Business logic rejected the command.
    Rejected = 0,
    /// No handler registered for the command name.
    HandlerNotFound = 1,
    /// Command payload did not decode into the handler's message type.
    InvalidPayload = 2,
    /// The proxy reported that persisting the command's effect failed.
    PersistenceFailed = 3,
    /// The effect is not valid for this entity kind.
    InvalidEffect = 4,
}

impl FailureKind {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            FailureKind::Rejected => "REJECTED",
            FailureKind::HandlerNotFound => "HANDLER_NOT_FOUND",
            FailureKind::InvalidPayload => "INVALID_PAYLOAD",
            FailureKind::PersistenceFailed => "PERSISTENCE_FAILED",
            FailureKind::InvalidEffect => "INVALID_EFFECT",
        }
    }
}

/// Everything a command wants persisted, sent ahead of its reply.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Persist {
    #[prost(string, tag = "1")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub events: ::prost::alloc::vec::Vec<PersistEvent>,
    #[prost(oneof = "persist::StateAction", tags = "3, 4")]
    pub state_action: ::core::option::Option<persist::StateAction>,
}

pub mod persist {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum StateAction {
        #[prost(bytes = "vec", tag = "3")]
        Update(::prost::alloc::vec::Vec<u8>),
        #[prost(message, tag = "4")]
        Delete(super::StateDelete),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateDelete {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PersistEvent {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(string, tag = "2")]
    pub type_name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SnapshotOffer {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub state: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PassivateRequest {}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProxyInfo {
    #[prost(string, tag = "1")]
    pub proxy_name: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub protocol_major_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntitySpec {
    #[prost(string, tag = "1")]
    pub runtime_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub runtime_version: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub protocol_major_version: u32,
    #[prost(message, repeated, tag = "4")]
    pub entities: ::prost::alloc::vec::Vec<EntityDescriptor>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityDescriptor {
    #[prost(string, tag = "1")]
    pub entity_type: ::prost::alloc::string::String,
    #[prost(enumeration = "EntityKind", tag = "2")]
    pub kind: i32,
    #[prost(string, repeated, tag = "3")]
    pub commands: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "4")]
    pub events: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(uint64, tag = "5")]
    pub passivation_timeout_ms: u64,
    #[prost(uint64, tag = "6")]
    pub snapshot_every: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EntityKind {
    EventSourced = 0,
    Value = 1,
}

impl EntityKind {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            EntityKind::EventSourced => "EVENT_SOURCED",
            EntityKind::Value => "VALUE",
        }
    }
}
