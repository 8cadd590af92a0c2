//! Broker boundary (mechanics only).
//!
//! The delivery engine talks to a message broker exclusively through the
//! three traits below. They mirror the AMQP object model:
//!
//! ```text
//! Connection ──open_channel()──▶ Channel ──consume()──▶ Delivery*
//!                                   │                     ├─ ack()
//!                                   ├─ declare_queue()    └─ nack(requeue)
//!                                   ├─ bind_queue()
//!                                   └─ publish()
//! ```
//!
//! ## Ownership
//!
//! - A `Connection` may be shared by many subscriptions and publishers.
//! - A `Channel` belongs to exactly one subscription (or publisher); its
//!   acknowledgment state is never shared.
//! - A `Delivery` is consumed by `ack`/`nack`, so each message can be settled
//!   at most once. Dropping a delivery without settling it leaves it
//!   unacknowledged until its channel closes.
//!
//! There is no global connection: callers pass a connection handle to every
//! component that needs one.

use std::ops::Deref;

use thiserror::Error;
use tracing::debug;

use peril_core::QueueSpec;

use crate::Envelope;

/// Errors raised by a broker implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Could not reach the broker, or the connection is gone.
    #[error("connection error: {0}")]
    Connection(String),

    /// The channel is closed or unusable.
    #[error("channel error: {0}")]
    Channel(String),

    /// A referenced exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Redeclaration with different parameters, or an invalid argument.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Exclusive resource owned by another connection.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// The delivery tag is unknown on this channel (already settled or stale).
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}

/// Broker-side view of a declared queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: usize,
    pub consumer_count: usize,
}

/// A connection to the broker; a factory for channels.
pub trait Connection: Send + Sync {
    type Channel: Channel;

    fn open_channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// A lightweight session on a connection.
pub trait Channel: Send + 'static {
    type Delivery: Delivery;

    /// Lazy, blocking sequence of deliveries; ends when the channel or its
    /// connection closes.
    type Consumer: Iterator<Item = Self::Delivery> + Send + 'static;

    /// Declare (or passively attach to) a queue. Idempotent for identical specs.
    fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BrokerError>;

    /// Bind a queue to an exchange. Idempotent for identical triples.
    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
    -> Result<(), BrokerError>;

    /// Start consuming with manual acknowledgment.
    fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Self::Consumer, BrokerError>;

    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError>;

    /// Close the channel; unsettled deliveries return to their queues.
    fn close(&self) -> Result<(), BrokerError>;
}

/// One message handed to a consumer.
pub trait Delivery: Send {
    fn body(&self) -> &[u8];

    fn routing_key(&self) -> &str;

    fn delivery_tag(&self) -> u64;

    /// `true` when the broker delivered this message before.
    fn redelivered(&self) -> bool;

    /// Positive acknowledgment: the message is removed for good.
    fn ack(self) -> Result<(), BrokerError>;

    /// Negative acknowledgment: requeue, or drop/dead-letter.
    fn nack(self, requeue: bool) -> Result<(), BrokerError>;
}

/// Scoped channel ownership: the channel is closed when the guard drops.
#[derive(Debug)]
pub struct ChannelGuard<C: Channel> {
    channel: C,
}

impl<C: Channel> ChannelGuard<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: Channel> Deref for ChannelGuard<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl<C: Channel> Drop for ChannelGuard<C> {
    fn drop(&mut self) {
        if let Err(err) = self.channel.close() {
            // Usually the connection already went away.
            debug!(error = %err, "channel close on release failed");
        }
    }
}
