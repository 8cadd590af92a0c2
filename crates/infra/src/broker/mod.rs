//! In-process AMQP-style broker implementing the `peril-events` broker traits.

mod in_memory;
mod topic;

pub use in_memory::{
    ExchangeKind, InMemoryBroker, InMemoryChannel, InMemoryConnection, InMemoryConsumer,
    InMemoryDelivery,
};
pub use topic::topic_matches;
