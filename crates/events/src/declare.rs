//! Queue declaration and binding.

use thiserror::Error;
use tracing::{debug, instrument};

use peril_core::{BindingSpec, DomainError, QueueKind};

use crate::broker::{BrokerError, Channel, ChannelGuard, Connection, QueueInfo};

/// Setup failure while declaring or binding a queue.
///
/// None of these are retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclareError {
    /// Bad classification or queue name; nothing was sent to the broker.
    #[error("invalid queue configuration: {0}")]
    Invalid(#[from] DomainError),

    #[error("could not open channel: {0}")]
    OpenChannel(#[source] BrokerError),

    #[error("could not declare queue '{queue}': {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("could not bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}

/// Open a dedicated channel, declare the binding's queue and bind it.
///
/// The returned guard owns the channel. On any failure the channel opened
/// here is closed before the error is returned.
#[instrument(
    skip(connection, binding),
    fields(
        exchange = %binding.exchange(),
        queue = %binding.queue().name(),
        routing_key = %binding.routing_key(),
        kind = %binding.queue().kind()
    ),
    err
)]
pub fn declare_and_bind<C>(
    connection: &C,
    binding: &BindingSpec,
) -> Result<(ChannelGuard<C::Channel>, QueueInfo), DeclareError>
where
    C: Connection,
{
    let channel = ChannelGuard::new(connection.open_channel().map_err(DeclareError::OpenChannel)?);

    let spec = binding.queue();
    let info = channel
        .declare_queue(spec)
        .map_err(|source| DeclareError::DeclareQueue {
            queue: spec.name().to_string(),
            source,
        })?;

    channel
        .bind_queue(&info.name, binding.exchange(), binding.routing_key())
        .map_err(|source| DeclareError::BindQueue {
            queue: info.name.clone(),
            exchange: binding.exchange().to_string(),
            routing_key: binding.routing_key().to_string(),
            source,
        })?;

    debug!(
        messages = info.message_count,
        consumers = info.consumer_count,
        "queue declared and bound"
    );
    Ok((channel, info))
}

/// [`declare_and_bind`] from raw parts.
///
/// The classification is validated before any broker call is made.
pub fn declare_and_bind_parts<C, K>(
    connection: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: K,
) -> Result<(ChannelGuard<C::Channel>, QueueInfo), DeclareError>
where
    C: Connection,
    K: TryInto<QueueKind>,
    K::Error: Into<DomainError>,
{
    let binding = BindingSpec::parse(exchange, queue_name, routing_key, kind)?;
    declare_and_bind(connection, &binding)
}
