//! Entity runtime tuning.

use std::time::Duration;

use serde::Deserialize;

/// Default idle time before an instance asks to be passivated (30 s).
pub const DEFAULT_PASSIVATION_TIMEOUT_MS: u64 = 30_000;

/// Default number of events between opportunistic snapshots.
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 100;

/// Default cap on concurrently live instances.
pub const DEFAULT_MAX_CONCURRENT_INSTANCES: usize = 10_000;

/// Default wait for the proxy to acknowledge a persist batch (30 s).
pub const DEFAULT_PERSIST_ACK_TIMEOUT_MS: u64 = 30_000;

/// Default capacity of each stream's outbound channel.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Default maximum encoded gRPC message size (4 MB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Runtime-wide defaults and limits.
///
/// Passivation timeout and snapshot interval can be overridden per entity
/// type; the rest apply to the whole process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub passivation_timeout_ms: u64,
    /// Zero disables opportunistic snapshots.
    pub snapshot_every: u64,
    pub max_concurrent_instances: usize,
    pub persist_ack_timeout_ms: u64,
    pub outbound_buffer: usize,
    pub max_message_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            passivation_timeout_ms: DEFAULT_PASSIVATION_TIMEOUT_MS,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            max_concurrent_instances: DEFAULT_MAX_CONCURRENT_INSTANCES,
            persist_ack_timeout_ms: DEFAULT_PERSIST_ACK_TIMEOUT_MS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl RuntimeConfig {
    pub fn passivation_timeout(&self) -> Duration {
        Duration::from_millis(self.passivation_timeout_ms)
    }

    pub fn persist_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_ack_timeout_ms)
    }
}
