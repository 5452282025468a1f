//! gRPC surface of the entity protocol.
//!
//! The message types in [`crate::proto`] are plain prost structs, so the
//! service plumbing lives here instead of in generated code.

mod client;
mod server;

pub use client::EntityProtocolClient;
pub use server::{EntityProtocol, EntityProtocolServer, SERVICE_NAME};
