//! Test utilities shared by the session and runtime tests.
//!
//! Provides a small counter entity and a channel-backed proxy stand-in that
//! drives a session the way a real proxy would.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;

use crate::config::RuntimeConfig;
use crate::effect::Effect;
use crate::entity::EventSourcedEntity;
use crate::passivation::PassivationStrategy;
use crate::proto::{self, entity_stream_in, entity_stream_out, EntityStreamIn, EntityStreamOut};
use crate::registry::EntityRegistry;
use crate::session::{run_session, InstanceLimiter, SessionContext};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Counter {
    #[prost(int64, tag = "1")]
    pub value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Add {
    #[prost(int64, tag = "1")]
    pub amount: i64,
}

/// Counter with `Add`, `Get` and a handler that always panics.
pub fn counter_entity() -> EventSourcedEntity<Counter> {
    EventSourcedEntity::new("counter")
        .command("Add", |state: &Counter, cmd: Add, _| {
            if cmd.amount == 0 {
                return Effect::failure("nothing to add");
            }
            Effect::emit("Added", &cmd).then_reply(&Counter {
                value: state.value + cmd.amount,
            })
        })
        .command("Get", |state: &Counter, _: Add, _| Effect::reply(state))
        .command("Explode", |_: &Counter, _: Add, _| panic!("counter exploded"))
        .event("Added", |state: &mut Counter, ev: Add| state.value += ev.amount)
        .passivation(PassivationStrategy::timeout(Duration::from_secs(10)))
}

pub fn counter_registry() -> Arc<EntityRegistry> {
    Arc::new(
        EntityRegistry::builder()
            .register(counter_entity())
            .build()
            .unwrap(),
    )
}

pub fn session_context(limit: usize) -> SessionContext {
    let runtime = RuntimeConfig {
        max_concurrent_instances: limit,
        persist_ack_timeout_ms: 5_000,
        ..RuntimeConfig::default()
    };
    SessionContext {
        registry: counter_registry(),
        runtime: Arc::new(runtime),
        limiter: InstanceLimiter::new(limit),
    }
}

/// Proxy side of one session.
pub struct MockProxy {
    inbound: Option<mpsc::Sender<Result<EntityStreamIn, Status>>>,
    outbound: ReceiverStream<Result<EntityStreamOut, Status>>,
}

impl MockProxy {
    /// Spawn a session on the given context and return its proxy side.
    pub fn spawn(ctx: SessionContext) -> Self {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        tokio::spawn(run_session(ctx, ReceiverStream::new(in_rx), out_tx));
        Self {
            inbound: Some(in_tx),
            outbound: ReceiverStream::new(out_rx),
        }
    }

    pub async fn send(&self, message: impl Into<EntityStreamIn>) {
        if let Some(inbound) = &self.inbound {
            inbound.send(Ok(message.into())).await.unwrap();
        }
    }

    pub async fn start(&self, entity_id: &str) {
        self.send(init("counter", entity_id)).await;
        self.send(replay_end()).await;
    }

    /// Next outbound message; `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<Result<entity_stream_out::Message, Status>> {
        self.outbound
            .next()
            .await
            .map(|item| item.map(|out| out.message.unwrap()))
    }

    pub async fn expect_message(&mut self) -> entity_stream_out::Message {
        match self.recv().await {
            Some(Ok(message)) => message,
            other => panic!("expected outbound message, got {:?}", other),
        }
    }

    pub async fn expect_status(&mut self) -> Status {
        match self.recv().await {
            Some(Err(status)) => status,
            other => panic!("expected terminal status, got {:?}", other),
        }
    }

    /// Close the proxy's half of the stream.
    pub fn close(&mut self) {
        self.inbound = None;
    }
}

pub fn init(entity_type: &str, entity_id: &str) -> entity_stream_in::Message {
    entity_stream_in::Message::Init(proto::Init {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        snapshot: None,
    })
}

pub fn replay_end() -> entity_stream_in::Message {
    entity_stream_in::Message::ReplayEnd(proto::ReplayEnd {})
}

pub fn add(correlation_id: &str, amount: i64) -> entity_stream_in::Message {
    command(correlation_id, "Add", amount)
}

pub fn command(correlation_id: &str, name: &str, amount: i64) -> entity_stream_in::Message {
    entity_stream_in::Message::Command(proto::Command {
        correlation_id: correlation_id.to_string(),
        name: name.to_string(),
        payload: Add { amount }.encode_to_vec(),
    })
}

pub fn persist_ack() -> entity_stream_in::Message {
    entity_stream_in::Message::PersistAck(proto::PersistAck {})
}

pub fn decode_counter(payload: &[u8]) -> i64 {
    Counter::decode(payload).unwrap().value
}
