//! `peril-events`: delivery mechanics.
//!
//! Everything here is broker-agnostic: the engine talks to a broker through
//! the [`Connection`] / [`Channel`] / [`Delivery`] traits and to payloads
//! through [`Codec`] and [`Handler`].
//!
//! - [`declare`]: queue declaration and binding
//! - [`subscription`]: the decode → handle → acknowledge loop
//! - [`publisher`]: encoding publish helpers
//! - [`fanout`] and [`aggregate`]: in-process distribution and collection

pub mod aggregate;
pub mod broker;
pub mod codec;
pub mod declare;
pub mod envelope;
pub mod fanout;
pub mod handler;
pub mod publisher;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use aggregate::{
    AggregateError, AggregatorHandle, aggregate, aggregate_with, spawn_aggregator,
    spawn_aggregator_with,
};
pub use broker::{BrokerError, Channel, ChannelGuard, Connection, Delivery, QueueInfo};
pub use codec::{BITCODE_CONTENT_TYPE, BitcodeCodec, Codec, CodecError, JSON_CONTENT_TYPE, JsonCodec};
pub use declare::{DeclareError, declare_and_bind, declare_and_bind_parts};
pub use envelope::Envelope;
pub use fanout::{
    DistributionReport, DistributorHandle, FanOut, FanOutError, SubscriberBuffer,
    SubscriberChannel, SubscriberSender, distribute, subscriber_channel,
};
pub use handler::Handler;
pub use publisher::{PublishError, Publisher, publish, publish_bitcode, publish_json};
pub use subscription::{
    DecodeFailurePolicy, SubscribeError, SubscribeOptions, SubscriptionHandle, SubscriptionStats,
    subscribe, subscribe_bitcode, subscribe_json, subscribe_with,
};
