//! In-process fan-out of one event source to many subscribers.
//!
//! ```text
//! source ──▶ distributor ──┬─▶ subscriber 1 ──▶ aggregator
//!                          ├─▶ subscriber 2 ──▶ aggregator
//!                          └─▶ ...
//! ```
//!
//! Each event is handed to every subscriber in registration order before the
//! next event is read. Sends block, so with bounded buffers the slowest
//! subscriber paces the whole distribution. Subscribers must be registered
//! before distribution starts; when the source is drained every subscriber
//! channel is closed.

use core::fmt;
use core::str::FromStr;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, SendError, Sender, SyncSender};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use peril_core::DomainError;

/// Channel capacity for one subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SubscriberBuffer {
    #[default]
    Unbounded,
    /// At most `n` events in flight; `Bounded(0)` is a rendezvous channel.
    Bounded(usize),
}

impl fmt::Display for SubscriberBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberBuffer::Unbounded => f.write_str("unbounded"),
            SubscriberBuffer::Bounded(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for SubscriberBuffer {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(SubscriberBuffer::Unbounded);
        }
        s.parse::<usize>()
            .map(SubscriberBuffer::Bounded)
            .map_err(|_| DomainError::validation(format!("invalid subscriber buffer '{s}'")))
    }
}

/// Receiving side handed to a subscriber.
#[derive(Debug)]
pub struct SubscriberChannel<M> {
    receiver: Receiver<M>,
}

impl<M> SubscriberChannel<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next event is available, or the distributor is done.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl<M> IntoIterator for SubscriberChannel<M> {
    type Item = M;
    type IntoIter = mpsc::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

/// Sending side kept by the distributor.
#[derive(Debug)]
pub enum SubscriberSender<M> {
    Unbounded(Sender<M>),
    Bounded(SyncSender<M>),
}

impl<M> SubscriberSender<M> {
    /// Blocking send; fails only when the receiver is gone.
    pub fn send(&self, message: M) -> Result<(), SendError<M>> {
        match self {
            SubscriberSender::Unbounded(tx) => tx.send(message),
            SubscriberSender::Bounded(tx) => tx.send(message),
        }
    }
}

pub fn subscriber_channel<M>(buffer: SubscriberBuffer) -> (SubscriberSender<M>, SubscriberChannel<M>) {
    match buffer {
        SubscriberBuffer::Unbounded => {
            let (tx, rx) = mpsc::channel();
            (SubscriberSender::Unbounded(tx), SubscriberChannel::new(rx))
        }
        SubscriberBuffer::Bounded(n) => {
            let (tx, rx) = mpsc::sync_channel(n);
            (SubscriberSender::Bounded(tx), SubscriberChannel::new(rx))
        }
    }
}

/// Outcome of one distribution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    /// Events read from the source.
    pub events: u64,
    /// Successful sends across all subscribers.
    pub deliveries: u64,
    /// Subscribers removed because their receiver was dropped.
    pub dropped_subscribers: usize,
}

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("could not spawn distributor thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("distributor thread panicked")]
    Panicked,
}

/// Forward every event from `source` to every subscriber, then close them all.
///
/// A subscriber whose receiver was dropped is removed; the rest keep receiving.
pub fn distribute<M, I>(source: I, mut subscribers: Vec<SubscriberSender<M>>) -> DistributionReport
where
    M: Clone,
    I: IntoIterator<Item = M>,
{
    let mut report = DistributionReport::default();

    for event in source {
        report.events += 1;
        let before = subscribers.len();

        let mut idx = 0usize;
        subscribers.retain(|tx| {
            let position = idx;
            idx += 1;
            match tx.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    warn!(subscriber = position, "subscriber went away; removing it");
                    false
                }
            }
        });

        report.deliveries += subscribers.len() as u64;
        report.dropped_subscribers += before - subscribers.len();
    }

    debug!(
        events = report.events,
        deliveries = report.deliveries,
        "source drained; closing subscriber channels"
    );
    drop(subscribers);
    report
}

/// Subscriber registry plus distribution entry points.
#[derive(Debug)]
pub struct FanOut<M> {
    subscribers: Vec<SubscriberSender<M>>,
}

impl<M> Default for FanOut<M> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<M> FanOut<M>
where
    M: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Registration order is delivery order.
    pub fn subscribe(&mut self, buffer: SubscriberBuffer) -> SubscriberChannel<M> {
        let (tx, rx) = subscriber_channel(buffer);
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Distribute on the calling thread; returns once the source is drained.
    pub fn distribute<I>(self, source: I) -> DistributionReport
    where
        I: IntoIterator<Item = M>,
    {
        let subscribers = self.subscriber_count();
        let report = distribute(source, self.subscribers);
        info!(
            subscribers,
            events = report.events,
            dropped = report.dropped_subscribers,
            "distribution finished"
        );
        report
    }

    /// Distribute on a dedicated thread.
    pub fn spawn<I>(self, source: I) -> Result<DistributorHandle, FanOutError>
    where
        I: IntoIterator<Item = M> + Send + 'static,
    {
        let join = thread::Builder::new()
            .name("fanout".to_string())
            .spawn(move || self.distribute(source))
            .map_err(FanOutError::Spawn)?;
        Ok(DistributorHandle { join })
    }
}

#[derive(Debug)]
pub struct DistributorHandle {
    join: thread::JoinHandle<DistributionReport>,
}

impl DistributorHandle {
    pub fn join(self) -> Result<DistributionReport, FanOutError> {
        self.join.join().map_err(|_| FanOutError::Panicked)
    }
}
