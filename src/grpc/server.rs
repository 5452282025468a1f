//! Server side of `entityruntime.EntityProtocol`.

use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tonic::codegen::{empty_body, http, Body, BoxFuture, StdError};
use tonic::{Request, Response, Status, Streaming};

use crate::proto::{EntitySpec, EntityStreamIn, EntityStreamOut, ProxyInfo};

pub const SERVICE_NAME: &str = "entityruntime.EntityProtocol";

const HANDLE_PATH: &str = "/entityruntime.EntityProtocol/Handle";
const DISCOVER_PATH: &str = "/entityruntime.EntityProtocol/Discover";

/// The runtime's half of the proxy protocol.
#[async_trait]
pub trait EntityProtocol: Send + Sync + 'static {
    type HandleStream: futures::Stream<Item = Result<EntityStreamOut, Status>> + Send + 'static;

    /// One bidirectional stream per live entity instance.
    async fn handle(
        &self,
        request: Request<Streaming<EntityStreamIn>>,
    ) -> Result<Response<Self::HandleStream>, Status>;

    /// Handshake: the proxy announces itself and learns the registered entities.
    async fn discover(&self, request: Request<ProxyInfo>) -> Result<Response<EntitySpec>, Status>;
}

#[derive(Debug)]
pub struct EntityProtocolServer<T> {
    inner: Arc<T>,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
}

impl<T> EntityProtocolServer<T> {
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self {
            inner,
            max_decoding_message_size: None,
            max_encoding_message_size: None,
        }
    }

    /// Limit the size of a decoded inbound message.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = Some(limit);
        self
    }

    /// Limit the size of an encoded outbound message.
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = Some(limit);
        self
    }
}

impl<T> Clone for EntityProtocolServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            max_decoding_message_size: self.max_decoding_message_size,
            max_encoding_message_size: self.max_encoding_message_size,
        }
    }
}

impl<T> tonic::server::NamedService for EntityProtocolServer<T> {
    const NAME: &'static str = SERVICE_NAME;
}

struct HandleSvc<T: EntityProtocol>(Arc<T>);

impl<T: EntityProtocol> tonic::server::StreamingService<EntityStreamIn> for HandleSvc<T> {
    type Response = EntityStreamOut;
    type ResponseStream = T::HandleStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<EntityStreamIn>>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.handle(request).await })
    }
}

struct DiscoverSvc<T: EntityProtocol>(Arc<T>);

impl<T: EntityProtocol> tonic::server::UnaryService<ProxyInfo> for DiscoverSvc<T> {
    type Response = EntitySpec;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<ProxyInfo>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.discover(request).await })
    }
}

impl<T, B> tower::Service<http::Request<B>> for EntityProtocolServer<T>
where
    T: EntityProtocol,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        let max_decoding = self.max_decoding_message_size;
        let max_encoding = self.max_encoding_message_size;

        match req.uri().path() {
            HANDLE_PATH => Box::pin(async move {
                let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default())
                    .apply_max_message_size_config(max_decoding, max_encoding);
                Ok(grpc.streaming(HandleSvc(inner), req).await)
            }),
            DISCOVER_PATH => Box::pin(async move {
                let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default())
                    .apply_max_message_size_config(max_decoding, max_encoding);
                Ok(grpc.unary(DiscoverSvc(inner), req).await)
            }),
            _ => Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    http::HeaderName::from_static("grpc-status"),
                    http::HeaderValue::from_static("12"),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            }),
        }
    }
}
