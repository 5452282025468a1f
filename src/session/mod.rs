//! Protocol session adapter.
//!
//! One session drives one proxy stream: it reads `Init`, claims an instance
//! slot, then feeds every inbound message to the [`EntityInstance`] and writes
//! whatever it returns back to the proxy. The loop also sleeps on the
//! instance's passivation and persist-ack deadlines. Terminal errors are sent
//! to the proxy as a `Status` and end the stream.

mod limiter;

pub use limiter::InstanceLimiter;

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tonic::Status;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::SessionError;
use crate::instance::{EntityInstance, InstanceSettings, Lifecycle};
use crate::proto::{entity_stream_in, EntityStreamIn, EntityStreamOut};
use crate::registry::EntityRegistry;


/// Sender half of a session's outbound stream.
pub type Outbound = mpsc::Sender<Result<EntityStreamOut, Status>>;

/// Everything a session shares with the rest of the runtime.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub registry: Arc<EntityRegistry>,
    pub runtime: Arc<RuntimeConfig>,
    pub limiter: InstanceLimiter,
}

/// Run one entity stream to completion.
pub async fn run_session<St>(ctx: SessionContext, inbound: St, outbound: Outbound)
where
    St: Stream<Item = Result<EntityStreamIn, Status>> + Send + 'static,
{
    let span = info_span!(
        "entity",
        session = %Uuid::new_v4(),
        entity_type = field::Empty,
        entity_id = field::Empty,
    );

    async move {
        match drive(ctx, inbound, &outbound).await {
            Ok(()) => debug!("Session ended"),
            Err(err) => {
                match &err {
                    SessionError::Transport(status) => {
                        debug!(code = ?status.code(), "Inbound stream failed")
                    }
                    SessionError::Protocol { .. }
                    | SessionError::UnknownEntityType(_)
                    | SessionError::AtCapacity { .. } => warn!(error = %err, "Session rejected"),
                    _ => error!(error = %err, "Session failed"),
                }
                let _ = outbound.send(Err(err.into())).await;
            }
        }
    }
    .instrument(span)
    .await
}

async fn drive<St>(ctx: SessionContext, inbound: St, outbound: &Outbound) -> Result<(), SessionError>
where
    St: Stream<Item = Result<EntityStreamIn, Status>> + Send + 'static,
{
    let mut inbound = Box::pin(inbound);

    let init = match inbound.next().await {
        None => {
            debug!("Stream closed before Init");
            return Ok(());
        }
        Some(Err(status)) => return Err(status.into()),
        Some(Ok(EntityStreamIn {
            message: Some(entity_stream_in::Message::Init(init)),
        })) => init,
        Some(Ok(_)) => {
            return Err(SessionError::protocol(
                Lifecycle::Uninitialized,
                "first message must be Init",
            ))
        }
    };

    let span = Span::current();
    span.record("entity_type", init.entity_type.as_str());
    span.record("entity_id", init.entity_id.as_str());

    let definition = ctx
        .registry
        .get(&init.entity_type)
        .ok_or_else(|| SessionError::UnknownEntityType(init.entity_type.clone()))?;
    let _permit = ctx.limiter.try_acquire()?;

    let settings = InstanceSettings::resolve(definition.as_ref(), &ctx.runtime);
    let mut instance = EntityInstance::new(definition, settings);
    instance.init(init)?;
    info!(sequence = instance.sequence(), "Entity instance started");

    loop {
        if instance.is_stopped() {
            info!(sequence = instance.sequence(), "Entity instance stopped");
            return Ok(());
        }

        let passivate_at = instance.passivation_deadline();
        let ack_deadline = instance.persist_deadline();

        let out = tokio::select! {
            biased;
            _ = outbound.closed() => {
                debug!("Proxy stopped reading");
                instance.stop();
                return Ok(());
            }
            next = inbound.next() => match next {
                None => {
                    instance.stop();
                    info!(sequence = instance.sequence(), "Stream closed, entity instance stopped");
                    return Ok(());
                }
                Some(Err(status)) => {
                    instance.stop();
                    return Err(status.into());
                }
                Some(Ok(EntityStreamIn { message: None })) => {
                    return Err(SessionError::protocol(instance.lifecycle(), "empty message"));
                }
                Some(Ok(EntityStreamIn { message: Some(message) })) => instance.handle(message)?,
            },
            _ = sleep_until(ack_deadline.unwrap_or_else(far_future)), if ack_deadline.is_some() => {
                return Err(instance.persist_ack_timed_out());
            }
            _ = sleep_until(passivate_at.unwrap_or_else(far_future)), if passivate_at.is_some() => {
                instance.passivation_expired()?
            }
        };

        for message in out {
            if outbound.send(Ok(message.into())).await.is_err() {
                debug!("Proxy stopped reading");
                instance.stop();
                return Ok(());
            }
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
