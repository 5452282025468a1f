//! Runtime host: owns the registry and instance limiter and serves the
//! entity protocol.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tonic_health::server::health_reporter;
use tracing::{info, warn};

use crate::config::{Config, RuntimeConfig};
use crate::grpc::{EntityProtocol, EntityProtocolServer};
use crate::proto::{
    EntitySpec, EntityStreamIn, EntityStreamOut, ProxyInfo, PROTOCOL_MAJOR_VERSION,
};
use crate::registry::EntityRegistry;
use crate::session::{run_session, InstanceLimiter, SessionContext};
use crate::transport::{grpc_trace_layer, serve_on_listener, EntityListener};

/// Name reported in discovery and used for the UDS socket file.
pub const RUNTIME_NAME: &str = "entity-runtime";

/// Hosts every registered entity type behind one gRPC service.
///
/// Each `Handle` stream gets its own worker task; instances of different
/// entities never share state.
#[derive(Debug, Clone)]
pub struct EntityRuntime {
    registry: Arc<EntityRegistry>,
    config: Arc<RuntimeConfig>,
    limiter: InstanceLimiter,
}

impl EntityRuntime {
    pub fn new(registry: EntityRegistry, config: RuntimeConfig) -> Self {
        let limiter = InstanceLimiter::new(config.max_concurrent_instances);
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
            limiter,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Instance slots currently free.
    pub fn available_instances(&self) -> usize {
        self.limiter.available()
    }

    /// Spawn a worker for one inbound stream and return its outbound side.
    pub fn open_session<St>(
        &self,
        inbound: St,
    ) -> ReceiverStream<Result<EntityStreamOut, Status>>
    where
        St: Stream<Item = Result<EntityStreamIn, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        let ctx = SessionContext {
            registry: Arc::clone(&self.registry),
            runtime: Arc::clone(&self.config),
            limiter: self.limiter.clone(),
        };
        tokio::spawn(run_session(ctx, inbound, tx));
        ReceiverStream::new(rx)
    }

    /// Discovery answer describing every registered entity type.
    pub fn entity_spec(&self) -> EntitySpec {
        EntitySpec {
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_major_version: PROTOCOL_MAJOR_VERSION,
            entities: self.registry.descriptors(&self.config),
        }
    }
}

#[async_trait]
impl EntityProtocol for EntityRuntime {
    type HandleStream =
        Pin<Box<dyn Stream<Item = Result<EntityStreamOut, Status>> + Send + 'static>>;

    async fn handle(
        &self,
        request: Request<Streaming<EntityStreamIn>>,
    ) -> Result<Response<Self::HandleStream>, Status> {
        let outbound = self.open_session(request.into_inner());
        Ok(Response::new(Box::pin(outbound)))
    }

    async fn discover(&self, request: Request<ProxyInfo>) -> Result<Response<EntitySpec>, Status> {
        let info = request.into_inner();
        if info.protocol_major_version != 0 && info.protocol_major_version != PROTOCOL_MAJOR_VERSION
        {
            warn!(
                proxy = %info.proxy_name,
                proxy_version = info.protocol_major_version,
                runtime_version = PROTOCOL_MAJOR_VERSION,
                "Refusing proxy with incompatible protocol version"
            );
            return Err(Status::failed_precondition(format!(
                "proxy speaks protocol {}, runtime speaks {}",
                info.protocol_major_version, PROTOCOL_MAJOR_VERSION
            )));
        }

        info!(
            proxy = %info.proxy_name,
            entity_types = self.registry.len(),
            "Proxy connected"
        );
        Ok(Response::new(self.entity_spec()))
    }
}

/// Serve the runtime until the process receives Ctrl-C.
pub async fn serve(
    runtime: EntityRuntime,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_shutdown(runtime, config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await
}

/// Serve the runtime until `signal` completes.
pub async fn serve_with_shutdown<F>(
    runtime: EntityRuntime,
    config: &Config,
    signal: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send,
{
    let listener = EntityListener::bind(&config.transport, RUNTIME_NAME).await?;
    serve_on(runtime, listener, signal).await
}

/// Serve the runtime on an already bound listener until `signal` completes.
pub async fn serve_on<F>(
    runtime: EntityRuntime,
    listener: EntityListener,
    signal: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send,
{
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<EntityProtocolServer<EntityRuntime>>()
        .await;

    let msg_size = runtime.config.max_message_bytes;
    info!(
        entity_types = ?runtime.registry.entity_types(),
        max_instances = runtime.config.max_concurrent_instances,
        "Entity runtime starting"
    );

    let router = Server::builder()
        .layer(grpc_trace_layer())
        .add_service(health_service)
        .add_service(
            EntityProtocolServer::new(runtime)
                .max_decoding_message_size(msg_size)
                .max_encoding_message_size(msg_size),
        );

    serve_on_listener(router, listener, signal).await
}
