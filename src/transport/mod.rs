//! Server transport for the entity protocol.
//!
//! Supports:
//! - TCP: the proxy connects over the network (default)
//! - UDS: the proxy runs as a local sidecar and connects over a Unix socket

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::service::Routes;
use tonic::transport::server::Router;
use tower::Layer;
use tower::Service;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Transport type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Tcp,
    Uds,
}

/// Transport configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub tcp: TcpConfig,
    pub uds: UdsConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
        }
    }
}

impl TcpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Unix socket listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdsConfig {
    /// Directory holding socket files.
    pub base_path: PathBuf,
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/tmp/entity-runtime"),
        }
    }
}

impl UdsConfig {
    /// Socket path for a named service: `{base_path}/{service_name}.sock`.
    pub fn socket_path(&self, service_name: &str) -> PathBuf {
        self.base_path.join(format!("{}.sock", service_name))
    }
}

/// Removes a socket file when dropped.
#[derive(Debug)]
pub struct UdsCleanupGuard {
    path: PathBuf,
}

impl UdsCleanupGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsCleanupGuard {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Cleaned up UDS socket"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to clean up UDS socket"
            ),
        }
    }
}

/// Create parent directories and remove a stale socket before binding.
pub fn prepare_uds_socket(path: &Path) -> std::io::Result<UdsCleanupGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        info!(path = %path.display(), "Removing stale UDS socket");
        std::fs::remove_file(path)?;
    }
    Ok(UdsCleanupGuard::new(path))
}

/// A bound listener for the entity protocol.
///
/// Binding happens before serving so callers can read the actual address
/// (port 0) and so a bind failure surfaces before the health service reports
/// serving.
#[derive(Debug)]
pub enum EntityListener {
    Tcp(TcpListener),
    Uds {
        listener: UnixListener,
        guard: UdsCleanupGuard,
    },
}

impl EntityListener {
    /// Bind the configured transport. The UDS socket is named after `runtime_name`.
    pub async fn bind(config: &TransportConfig, runtime_name: &str) -> std::io::Result<Self> {
        match config.transport_type {
            TransportType::Tcp => Ok(Self::Tcp(TcpListener::bind(config.tcp.addr()).await?)),
            TransportType::Uds => {
                let socket_path = config.uds.socket_path(runtime_name);
                let guard = prepare_uds_socket(&socket_path)?;
                let listener = UnixListener::bind(&socket_path)?;
                Ok(Self::Uds { listener, guard })
            }
        }
    }

    /// Where the proxy should connect, for logs.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:?".to_string()),
            Self::Uds { guard, .. } => guard.path().display().to_string(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Uds { .. } => None,
        }
    }
}

/// Serve `router` on `listener` until `signal` completes, then drain open
/// entity streams.
pub async fn serve_on_listener<L, ResBody, F>(
    router: Router<L>,
    listener: EntityListener,
    signal: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    L: Layer<Routes> + Clone,
    L::Service: Service<http::Request<tonic::body::BoxBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    <L::Service as Service<http::Request<tonic::body::BoxBody>>>::Future: Send + 'static,
    <L::Service as Service<http::Request<tonic::body::BoxBody>>>::Error:
        Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    ResBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    F: Future<Output = ()> + Send,
{
    let endpoint = listener.endpoint();
    match listener {
        EntityListener::Tcp(listener) => {
            info!(%endpoint, transport = "tcp", "Accepting proxy connections");
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await?;
        }
        EntityListener::Uds { listener, guard } => {
            info!(%endpoint, transport = "uds", "Accepting proxy connections");
            router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                .await?;
            drop(guard);
        }
    }
    info!(%endpoint, "Stopped accepting proxy connections");
    Ok(())
}

/// Tower trace layer that opens a span per gRPC request carrying the
/// `x-correlation-id` header, so entity sessions inherit it.
pub fn grpc_trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::GrpcErrorsAsFailures>,
    impl Fn(&http::Request<tonic::body::BoxBody>) -> tracing::Span + Clone,
> {
    TraceLayer::new_for_grpc().make_span_with(|request: &http::Request<tonic::body::BoxBody>| {
        let correlation_id = request
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let path = request.uri().path();
        tracing::info_span!("grpc", %correlation_id, %path)
    })
}
