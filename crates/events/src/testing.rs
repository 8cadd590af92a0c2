//! Scripted broker doubles for unit tests.

use std::sync::{Arc, Mutex};

use peril_core::QueueSpec;

use crate::broker::{BrokerError, Channel, Connection, Delivery, QueueInfo};
use crate::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Open,
    Declare,
    Bind,
    Consume,
}

#[derive(Debug, Default)]
struct MockState {
    log: Vec<String>,
    settlements: Vec<String>,
    published: Vec<Envelope>,
    bodies: Vec<Vec<u8>>,
    failure: Option<MockFailure>,
    reject_settlements: bool,
}

/// Connection whose channels record every call and replay a fixed set of bodies.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn with_bodies(bodies: Vec<Vec<u8>>) -> Self {
        let conn = Self::default();
        conn.state.lock().unwrap().bodies = bodies;
        conn
    }

    pub fn failing(failure: MockFailure) -> Self {
        let conn = Self::default();
        conn.state.lock().unwrap().failure = Some(failure);
        conn
    }

    pub fn rejecting_settlements(self) -> Self {
        self.state.lock().unwrap().reject_settlements = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn settlements(&self) -> Vec<String> {
        self.state.lock().unwrap().settlements.clone()
    }

    pub fn published(&self) -> Vec<Envelope> {
        self.state.lock().unwrap().published.clone()
    }

    fn fails_at(&self, stage: MockFailure) -> bool {
        self.state.lock().unwrap().failure == Some(stage)
    }

    fn record(&self, entry: String) {
        self.state.lock().unwrap().log.push(entry);
    }
}

impl Connection for MockConnection {
    type Channel = MockChannel;

    fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        if self.fails_at(MockFailure::Open) {
            return Err(BrokerError::Connection("refused".to_string()));
        }
        self.record("open".to_string());
        Ok(MockChannel { conn: self.clone() })
    }
}

#[derive(Debug)]
pub struct MockChannel {
    conn: MockConnection,
}

impl Channel for MockChannel {
    type Delivery = MockDelivery;
    type Consumer = std::vec::IntoIter<MockDelivery>;

    fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BrokerError> {
        if self.conn.fails_at(MockFailure::Declare) {
            return Err(BrokerError::PreconditionFailed("inequivalent arg 'durable'".to_string()));
        }
        self.conn.record(format!(
            "declare {} durable={} auto_delete={} exclusive={} dlx={}",
            spec.name(),
            spec.is_durable(),
            spec.is_auto_delete(),
            spec.is_exclusive(),
            spec.dead_letter_exchange()
        ));
        Ok(QueueInfo {
            name: spec.name().to_string(),
            message_count: 0,
            consumer_count: 0,
        })
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        if self.conn.fails_at(MockFailure::Bind) {
            return Err(BrokerError::NotFound(format!("exchange '{exchange}'")));
        }
        self.conn.record(format!("bind {queue} {exchange} {routing_key}"));
        Ok(())
    }

    fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<Self::Consumer, BrokerError> {
        if self.conn.fails_at(MockFailure::Consume) {
            return Err(BrokerError::Channel("consume refused".to_string()));
        }
        self.conn.record(format!("consume {queue}"));

        let bodies = std::mem::take(&mut self.conn.state.lock().unwrap().bodies);
        let deliveries: Vec<MockDelivery> = bodies
            .into_iter()
            .enumerate()
            .map(|(idx, body)| MockDelivery {
                tag: idx as u64 + 1,
                body,
                conn: self.conn.clone(),
            })
            .collect();
        Ok(deliveries.into_iter())
    }

    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.conn.state.lock().unwrap().published.push(envelope);
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.conn.record("close".to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockDelivery {
    tag: u64,
    body: Vec<u8>,
    conn: MockConnection,
}

impl MockDelivery {
    fn settle(&self, entry: String) -> Result<(), BrokerError> {
        let mut state = self.conn.state.lock().unwrap();
        if state.reject_settlements {
            return Err(BrokerError::UnknownDeliveryTag(self.tag));
        }
        state.settlements.push(entry);
        Ok(())
    }
}

impl Delivery for MockDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn routing_key(&self) -> &str {
        "mock"
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn redelivered(&self) -> bool {
        false
    }

    fn ack(self) -> Result<(), BrokerError> {
        self.settle(format!("ack {}", self.tag))
    }

    fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.settle(format!("nack {} requeue={requeue}", self.tag))
    }
}
