//! Step definitions: the world plays the proxy against an in-process runtime.

use std::collections::HashMap;
use std::time::Duration;

use cucumber::{given, then, when, World};
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;

use entity_runtime::proto::entity_stream_in::Message as In;
use entity_runtime::proto::entity_stream_out::Message as Out;
use entity_runtime::proto::{self, persist, EntityStreamIn, EntityStreamOut, FailureKind};
use entity_runtime::{EntityRuntime, RuntimeConfig};

use crate::fixtures::{
    self, AddLineItem, Cart, ChangeName, Empty, GetCart, ItemAdded, LineItem, Profile,
    RemoveLineItem,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One open entity stream, seen from the proxy.
#[derive(Debug)]
struct ProxyStream {
    inbound: Option<mpsc::Sender<Result<EntityStreamIn, Status>>>,
    outbound: ReceiverStream<Result<EntityStreamOut, Status>>,
}

#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct EntityWorld {
    config: RuntimeConfig,
    runtime: Option<EntityRuntime>,
    streams: HashMap<String, ProxyStream>,
    current: String,
    last_reply: Option<proto::Reply>,
    replies: HashMap<String, Cart>,
}

impl EntityWorld {
    fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            runtime: None,
            streams: HashMap::new(),
            current: String::new(),
            last_reply: None,
            replies: HashMap::new(),
        }
    }

    fn runtime(&mut self) -> &EntityRuntime {
        let config = self.config.clone();
        self.runtime
            .get_or_insert_with(|| EntityRuntime::new(fixtures::registry(), config))
    }

    async fn open_and_send(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        snapshot: Option<proto::Snapshot>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let outbound = self.runtime().open_session(ReceiverStream::new(rx));
        self.streams.insert(
            entity_id.to_string(),
            ProxyStream {
                inbound: Some(tx),
                outbound,
            },
        );
        self.current = entity_id.to_string();
        self.send(In::Init(proto::Init {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            snapshot,
        }))
        .await;
    }

    fn stream(&mut self) -> &mut ProxyStream {
        self.streams
            .get_mut(&self.current)
            .expect("no stream opened for the current entity")
    }

    async fn send(&mut self, message: In) {
        let inbound = self
            .stream()
            .inbound
            .clone()
            .expect("proxy already closed this stream");
        // A session that already ended shows up on the outbound side.
        let _ = inbound.send(Ok(message.into())).await;
    }

    async fn next(&mut self) -> Option<Result<EntityStreamOut, Status>> {
        let outbound = &mut self.stream().outbound;
        tokio::time::timeout(RECV_TIMEOUT, outbound.next())
            .await
            .expect("timed out waiting for the runtime")
    }

    async fn expect_message(&mut self) -> Out {
        match self.next().await {
            Some(Ok(EntityStreamOut {
                message: Some(message),
            })) => message,
            other => panic!("expected a message from the runtime, got {:?}", other),
        }
    }

    async fn command<M: Message>(&mut self, name: &str, correlation_id: &str, payload: &M) {
        self.send(In::Command(proto::Command {
            correlation_id: correlation_id.to_string(),
            name: name.to_string(),
            payload: payload.encode_to_vec(),
        }))
        .await;
    }
}

fn item_added(product_id: &str, quantity: i32) -> Vec<u8> {
    ItemAdded {
        item: Some(LineItem {
            product_id: product_id.to_string(),
            quantity,
        }),
    }
    .encode_to_vec()
}

fn cart_of(items: &[(&str, i32)]) -> Cart {
    Cart {
        items: items
            .iter()
            .map(|(product_id, quantity)| LineItem {
                product_id: product_id.to_string(),
                quantity: *quantity,
            })
            .collect(),
    }
}

// --- Given ---

#[given(expr = "a passivation timeout of {int} ms")]
async fn given_passivation_timeout(world: &mut EntityWorld, ms: u64) {
    world.config.passivation_timeout_ms = ms;
}

#[given(expr = "a snapshot interval of {int} events")]
async fn given_snapshot_interval(world: &mut EntityWorld, every: u64) {
    world.config.snapshot_every = every;
}

#[given(expr = "an instance limit of {int}")]
async fn given_instance_limit(world: &mut EntityWorld, limit: usize) {
    world.config.max_concurrent_instances = limit;
}

#[given(expr = "cart {string} is open")]
async fn given_cart_open(world: &mut EntityWorld, cart_id: String) {
    world.open_and_send("cart", &cart_id, None).await;
    world.send(In::ReplayEnd(proto::ReplayEnd {})).await;
}

#[given(expr = "cart {string} is recovering")]
async fn given_cart_recovering(world: &mut EntityWorld, cart_id: String) {
    world.open_and_send("cart", &cart_id, None).await;
}

#[given(expr = "cart {string} is recovering from a snapshot at sequence {int} holding {string} x{int}")]
async fn given_cart_from_snapshot(
    world: &mut EntityWorld,
    cart_id: String,
    sequence: u64,
    product_id: String,
    quantity: i32,
) {
    let snapshot = proto::Snapshot {
        sequence,
        state: cart_of(&[(product_id.as_str(), quantity)]).encode_to_vec(),
    };
    world.open_and_send("cart", &cart_id, Some(snapshot)).await;
}

#[given(expr = "profile {string} is open")]
async fn given_profile_open(world: &mut EntityWorld, profile_id: String) {
    world.open_and_send("profile", &profile_id, None).await;
    world.send(In::ReplayEnd(proto::ReplayEnd {})).await;
}

// --- When ---

#[when(expr = "the proxy opens {string} of type {string}")]
async fn when_proxy_opens(world: &mut EntityWorld, entity_id: String, entity_type: String) {
    world.open_and_send(&entity_type, &entity_id, None).await;
    world.send(In::ReplayEnd(proto::ReplayEnd {})).await;
}

#[when(expr = "the proxy replays ItemAdded {string} x{int} at sequence {int}")]
async fn when_replay_item_added(
    world: &mut EntityWorld,
    product_id: String,
    quantity: i32,
    sequence: u64,
) {
    world
        .send(In::Event(proto::Event {
            sequence,
            payload: item_added(&product_id, quantity),
            type_name: "ItemAdded".to_string(),
        }))
        .await;
}

#[when(expr = "the proxy replays an unknown event at sequence {int}")]
async fn when_replay_unknown_event(world: &mut EntityWorld, sequence: u64) {
    world
        .send(In::Event(proto::Event {
            sequence,
            payload: Vec::new(),
            type_name: "CartArchived".to_string(),
        }))
        .await;
}

#[when("the proxy ends the replay")]
async fn when_replay_ends(world: &mut EntityWorld) {
    world.send(In::ReplayEnd(proto::ReplayEnd {})).await;
}

#[when(expr = "the proxy sends AddLineItem {string} x{int} as {string}")]
async fn when_add_line_item(
    world: &mut EntityWorld,
    product_id: String,
    quantity: i32,
    correlation_id: String,
) {
    let cmd = AddLineItem {
        product_id,
        quantity,
    };
    world.command("AddLineItem", &correlation_id, &cmd).await;
}

#[when(expr = "the proxy sends RemoveLineItem {string} as {string}")]
async fn when_remove_line_item(world: &mut EntityWorld, product_id: String, correlation_id: String) {
    let cmd = RemoveLineItem { product_id };
    world.command("RemoveLineItem", &correlation_id, &cmd).await;
}

#[when(expr = "the proxy sends GetCart as {string}")]
async fn when_get_cart(world: &mut EntityWorld, correlation_id: String) {
    world.command("GetCart", &correlation_id, &GetCart {}).await;
}

#[when(expr = "the proxy sends command {string} as {string}")]
async fn when_send_command(world: &mut EntityWorld, name: String, correlation_id: String) {
    world.command(&name, &correlation_id, &Empty {}).await;
}

#[when(expr = "the proxy sends ChangeName {string} as {string}")]
async fn when_change_name(world: &mut EntityWorld, name: String, correlation_id: String) {
    world
        .command("ChangeName", &correlation_id, &ChangeName { name })
        .await;
}

#[when("the proxy acknowledges persistence")]
async fn when_persist_ack(world: &mut EntityWorld) {
    world.send(In::PersistAck(proto::PersistAck {})).await;
}

#[when(expr = "the proxy reports persistence failed with {string}")]
async fn when_persist_failed(world: &mut EntityWorld, reason: String) {
    world
        .send(In::PersistFailed(proto::PersistFailed { reason }))
        .await;
}

#[when("the proxy acknowledges passivation")]
async fn when_passivate_ack(world: &mut EntityWorld) {
    world.send(In::PassivateAck(proto::PassivateAck {})).await;
}

#[when("the proxy denies passivation")]
async fn when_passivate_denied(world: &mut EntityWorld) {
    world
        .send(In::PassivateDenied(proto::PassivateDenied {}))
        .await;
}

#[when("the proxy requests a snapshot")]
async fn when_snapshot_request(world: &mut EntityWorld) {
    world
        .send(In::SnapshotRequest(proto::SnapshotRequest {}))
        .await;
}

#[when(expr = "the proxy closes {string}")]
async fn when_proxy_closes(world: &mut EntityWorld, entity_id: String) {
    world.current = entity_id;
    world.stream().inbound = None;
    match world.next().await {
        None => {}
        other => panic!("expected the stream to end, got {:?}", other),
    }
}

#[when(expr = "{int} ms pass")]
async fn when_time_passes(_world: &mut EntityWorld, ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[when(expr = "the proxy adds {string} to cart {string} every {int} ms, {int} times")]
async fn when_steady_traffic(
    world: &mut EntityWorld,
    product_id: String,
    cart_id: String,
    interval_ms: u64,
    times: u32,
) {
    world.current = cart_id;
    for round in 0..times {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        let correlation_id = format!("steady-{}", round);
        let cmd = AddLineItem {
            product_id: product_id.clone(),
            quantity: 1,
        };
        world.command("AddLineItem", &correlation_id, &cmd).await;
        match world.expect_message().await {
            Out::Persist(_) => {}
            other => panic!("expected persist during steady traffic, got {:?}", other),
        }
        world.send(In::PersistAck(proto::PersistAck {})).await;
        match world.expect_message().await {
            Out::Reply(reply) => assert_eq!(reply.correlation_id, correlation_id),
            other => panic!("expected reply during steady traffic, got {:?}", other),
        }
    }
}

// --- Then ---

#[then(expr = "the proxy receives a Persist for {string} with sequences {string}")]
async fn then_persist(world: &mut EntityWorld, correlation_id: String, sequences: String) {
    let expected: Vec<u64> = sequences
        .split(',')
        .map(|s| s.trim().parse().expect("sequence list"))
        .collect();
    match world.expect_message().await {
        Out::Persist(batch) => {
            assert_eq!(batch.correlation_id, correlation_id);
            let actual: Vec<u64> = batch.events.iter().map(|e| e.sequence).collect();
            assert_eq!(actual, expected);
        }
        other => panic!("expected persist, got {:?}", other),
    }
}

#[then(expr = "the proxy receives a Persist updating the state for {string}")]
async fn then_persist_update(world: &mut EntityWorld, correlation_id: String) {
    match world.expect_message().await {
        Out::Persist(batch) => {
            assert_eq!(batch.correlation_id, correlation_id);
            assert!(batch.events.is_empty());
            assert!(matches!(
                batch.state_action,
                Some(persist::StateAction::Update(_))
            ));
        }
        other => panic!("expected persist, got {:?}", other),
    }
}

#[then(expr = "the proxy receives a Persist deleting the state for {string}")]
async fn then_persist_delete(world: &mut EntityWorld, correlation_id: String) {
    match world.expect_message().await {
        Out::Persist(batch) => {
            assert_eq!(batch.correlation_id, correlation_id);
            assert!(matches!(
                batch.state_action,
                Some(persist::StateAction::Delete(_))
            ));
        }
        other => panic!("expected persist, got {:?}", other),
    }
}

#[then(expr = "the proxy receives a reply for {string}")]
async fn then_reply(world: &mut EntityWorld, correlation_id: String) {
    match world.expect_message().await {
        Out::Reply(reply) => {
            assert_eq!(reply.correlation_id, correlation_id);
            world.last_reply = Some(reply);
        }
        other => panic!("expected reply, got {:?}", other),
    }
}

#[then(expr = "the cart in the reply holds {string} x{int}")]
async fn then_cart_holds(world: &mut EntityWorld, product_id: String, quantity: i32) {
    let reply = world.last_reply.as_ref().expect("no reply received");
    let cart = Cart::decode(reply.payload.as_slice()).expect("reply is a cart");
    assert_eq!(cart.quantity_of(&product_id), Some(quantity));
    world.replies.insert(world.current.clone(), cart);
}

#[then(expr = "the cart in the reply does not hold {string}")]
async fn then_cart_lacks(world: &mut EntityWorld, product_id: String) {
    let reply = world.last_reply.as_ref().expect("no reply received");
    let cart = Cart::decode(reply.payload.as_slice()).expect("reply is a cart");
    assert_eq!(cart.quantity_of(&product_id), None);
}

#[then(expr = "the cart in the reply has {int} line item(s)")]
async fn then_cart_size(world: &mut EntityWorld, count: usize) {
    let reply = world.last_reply.as_ref().expect("no reply received");
    let cart = Cart::decode(reply.payload.as_slice()).expect("reply is a cart");
    assert_eq!(cart.items.len(), count);
}

#[then(expr = "carts {string} and {string} replied with the same contents")]
async fn then_same_carts(world: &mut EntityWorld, first: String, second: String) {
    assert_eq!(world.replies.get(&first), world.replies.get(&second));
    assert!(world.replies.contains_key(&first));
}

#[then(expr = "the profile in the reply is named {string}")]
async fn then_profile_named(world: &mut EntityWorld, name: String) {
    let reply = world.last_reply.as_ref().expect("no reply received");
    let profile = Profile::decode(reply.payload.as_slice()).expect("reply is a profile");
    assert_eq!(profile.name, name);
}

#[then(expr = "the proxy receives a {word} failure for {string}")]
async fn then_failure(world: &mut EntityWorld, kind: String, correlation_id: String) {
    match world.expect_message().await {
        Out::Failure(failure) => {
            assert_eq!(failure.correlation_id, correlation_id);
            let actual = FailureKind::try_from(failure.kind).expect("known failure kind");
            assert_eq!(actual.as_str_name(), kind);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[then("the proxy receives a passivation request")]
async fn then_passivation_request(world: &mut EntityWorld) {
    match world.expect_message().await {
        Out::PassivateRequest(_) => {}
        other => panic!("expected passivation request, got {:?}", other),
    }
}

#[then(expr = "the proxy receives a snapshot offer at sequence {int}")]
async fn then_snapshot_offer(world: &mut EntityWorld, sequence: u64) {
    match world.expect_message().await {
        Out::SnapshotOffer(offer) => assert_eq!(offer.sequence, sequence),
        other => panic!("expected snapshot offer, got {:?}", other),
    }
}

#[then(expr = "nothing is received within {int} ms")]
async fn then_silence(world: &mut EntityWorld, ms: u64) {
    let outbound = &mut world.stream().outbound;
    let next = tokio::time::timeout(Duration::from_millis(ms), outbound.next()).await;
    assert!(next.is_err(), "unexpected message: {:?}", next);
}

#[then("the stream ends")]
async fn then_stream_ends(world: &mut EntityWorld) {
    match world.next().await {
        None => {}
        other => panic!("expected the stream to end, got {:?}", other),
    }
}

#[then(expr = "the stream ends with status {word}")]
async fn then_stream_ends_with(world: &mut EntityWorld, code: String) {
    match world.next().await {
        Some(Err(status)) => assert_eq!(format!("{:?}", status.code()), code),
        other => panic!("expected a terminal status, got {:?}", other),
    }
    match world.next().await {
        None => {}
        other => panic!("expected the stream to end, got {:?}", other),
    }
}

#[then(expr = "{int} free instance slot(s) remain")]
async fn then_free_slots(world: &mut EntityWorld, free: usize) {
    assert_eq!(world.runtime().available_instances(), free);
}
