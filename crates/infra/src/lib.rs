//! Infrastructure layer: in-memory broker, configuration.

pub mod broker;
pub mod config;


pub use broker::{ExchangeKind, InMemoryBroker, InMemoryConnection};
pub use config::{ConfigError, PerilConfig};
