//! Proxy side of `entityruntime.EntityProtocol`.

use futures::Stream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};

use crate::proto::{EntitySpec, EntityStreamIn, EntityStreamOut, ProxyInfo};

/// Client used by proxies and end-to-end tests.
#[derive(Debug, Clone)]
pub struct EntityProtocolClient {
    inner: tonic::client::Grpc<Channel>,
}

impl EntityProtocolClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Connect to a runtime at `host:port`.
    pub async fn connect(address: &str) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::new(format!("http://{}", address))?
            .connect()
            .await?;
        Ok(Self::new(channel))
    }

    pub async fn discover(&mut self, info: ProxyInfo) -> Result<Response<EntitySpec>, Status> {
        self.ready().await?;
        let path = PathAndQuery::from_static("/entityruntime.EntityProtocol/Discover");
        self.inner
            .unary(Request::new(info), path, tonic::codec::ProstCodec::default())
            .await
    }

    pub async fn handle<S>(
        &mut self,
        messages: S,
    ) -> Result<Response<Streaming<EntityStreamOut>>, Status>
    where
        S: Stream<Item = EntityStreamIn> + Send + 'static,
    {
        self.ready().await?;
        let path = PathAndQuery::from_static("/entityruntime.EntityProtocol/Handle");
        self.inner
            .streaming(Request::new(messages), path, tonic::codec::ProstCodec::default())
            .await
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))
    }
}
