use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};

use tracing::{debug, info, instrument, warn};

use peril_core::routing::{DEAD_LETTER_EXCHANGE, EXCHANGE_DIRECT, EXCHANGE_TOPIC};
use peril_core::{DEAD_LETTER_ARGUMENT, QueuePolicy, QueueSpec};
use peril_events::{BrokerError, Channel, Connection, Delivery, Envelope, QueueInfo};

use super::topic::topic_matches;

const MEMORY_SCHEME: &str = "memory";
const SUPPORTED_SCHEMES: [&str; 3] = ["amqp", "amqps", MEMORY_SCHEME];

type Shared = Arc<Mutex<BrokerState>>;

fn lock(shared: &Shared) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
    shared
        .lock()
        .map_err(|_| BrokerError::Connection("broker state poisoned".to_string()))
}

/// Routing behaviour of an exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routing key equals binding key.
    Direct,
    /// Dot-separated patterns with `*` and `#`.
    Topic,
    /// Every bound queue, key ignored.
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

impl Exchange {
    fn route(&self, routing_key: &str) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for b in &self.bindings {
            let hit = match self.kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
                ExchangeKind::Fanout => true,
            };
            // One copy per queue, however many of its bindings match.
            if hit && !targets.contains(&b.queue) {
                targets.push(b.queue.clone());
            }
        }
        targets
    }
}

#[derive(Debug, Clone)]
struct Message {
    envelope: Envelope,
    redelivered: bool,
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: String,
    channel: u64,
    tx: mpsc::Sender<InMemoryDelivery>,
}

#[derive(Debug)]
struct Queue {
    policy: QueuePolicy,
    arguments: Vec<(&'static str, String)>,
    owner: Option<u64>,
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
    had_consumer: bool,
}

impl Queue {
    fn dead_letter_exchange(&self) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(key, _)| *key == DEAD_LETTER_ARGUMENT)
            .map(|(_, value)| value.as_str())
    }

    fn check_owner(&self, name: &str, connection: u64) -> Result<(), BrokerError> {
        match self.owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(format!(
                "cannot obtain exclusive access to locked queue '{name}'"
            ))),
            _ => Ok(()),
        }
    }

    fn info(&self, name: &str) -> QueueInfo {
        QueueInfo {
            name: name.to_string(),
            message_count: self.ready.len(),
            consumer_count: self.consumers.len(),
        }
    }
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    message: Message,
}

#[derive(Debug)]
struct ChannelState {
    connection: u64,
    next_tag: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<u64, Vec<u64>>,
    channels: HashMap<u64, ChannelState>,
    unacked: HashMap<(u64, u64), Unacked>,
    next_id: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_channel(&self, channel: u64) -> Result<(), BrokerError> {
        if self.channels.contains_key(&channel) {
            Ok(())
        } else {
            Err(BrokerError::Channel(format!("channel {channel} is closed")))
        }
    }

    fn route(&mut self, shared: &Shared, envelope: Envelope) -> Result<usize, BrokerError> {
        let targets = if envelope.exchange().is_empty() {
            // Default exchange: the routing key names the queue.
            if self.queues.contains_key(envelope.routing_key()) {
                vec![envelope.routing_key().to_string()]
            } else {
                Vec::new()
            }
        } else {
            self.exchanges
                .get(envelope.exchange())
                .ok_or_else(|| BrokerError::NotFound(format!("exchange '{}'", envelope.exchange())))?
                .route(envelope.routing_key())
        };

        if targets.is_empty() {
            debug!(
                exchange = %envelope.exchange(),
                routing_key = %envelope.routing_key(),
                "message unroutable; dropped"
            );
            return Ok(0);
        }

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(Message {
                    envelope: envelope.clone(),
                    redelivered: false,
                });
            }
        }
        for name in &targets {
            self.dispatch(shared, name);
        }
        Ok(targets.len())
    }

    /// Hand ready messages to consumers, round-robin.
    fn dispatch(&mut self, shared: &Shared, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        let mut lost_consumer = false;
        while !queue.consumers.is_empty() {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };

            let idx = queue.next_consumer % queue.consumers.len();
            let channel_id = queue.consumers[idx].channel;
            let Some(channel) = self.channels.get_mut(&channel_id) else {
                queue.consumers.remove(idx);
                lost_consumer = true;
                queue.ready.push_front(message);
                continue;
            };

            channel.next_tag += 1;
            let tag = channel.next_tag;
            let delivery = InMemoryDelivery {
                shared: shared.clone(),
                channel: channel_id,
                tag,
                routing_key: message.envelope.routing_key().to_string(),
                body: message.envelope.body().to_vec(),
                redelivered: message.redelivered,
            };

            match queue.consumers[idx].tx.send(delivery) {
                Ok(()) => {
                    queue.next_consumer = idx + 1;
                    self.unacked.insert(
                        (channel_id, tag),
                        Unacked {
                            queue: queue_name.to_string(),
                            message,
                        },
                    );
                }
                Err(_) => {
                    let slot = queue.consumers.remove(idx);
                    lost_consumer = true;
                    debug!(queue = queue_name, consumer_tag = %slot.tag, "consumer went away");
                    queue.ready.push_front(message);
                }
            }
        }

        let abandoned = lost_consumer
            && queue.consumers.is_empty()
            && queue.policy.auto_delete
            && queue.had_consumer;
        if abandoned {
            self.delete_queue(queue_name);
        }
    }

    fn requeue(&mut self, shared: &Shared, queue_name: &str, mut message: Message) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        message.redelivered = true;
        queue.ready.push_front(message);
        self.dispatch(shared, queue_name);
    }

    fn dead_letter(&mut self, shared: &Shared, queue_name: &str, message: Message) {
        let dlx = self
            .queues
            .get(queue_name)
            .and_then(Queue::dead_letter_exchange)
            .map(str::to_string);

        let Some(dlx) = dlx else {
            debug!(queue = queue_name, "discarded message dropped (no dead-letter exchange)");
            return;
        };

        if let Err(err) = self.route(shared, message.envelope.rerouted(dlx.clone())) {
            warn!(queue = queue_name, dead_letter_exchange = %dlx, error = %err, "dead-lettering failed; message dropped");
        }
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_none() {
            return;
        }
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
        self.unacked.retain(|_, u| u.queue != name);
        info!(queue = name, "queue deleted");
    }

    fn close_channel(&mut self, shared: &Shared, channel_id: u64) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };
        if let Some(list) = self.connections.get_mut(&channel.connection) {
            list.retain(|id| *id != channel_id);
        }

        let mut touched = Vec::new();
        let mut emptied = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|slot| slot.channel != channel_id);
            if queue.consumers.len() != before {
                touched.push(name.clone());
                if queue.consumers.is_empty() && queue.policy.auto_delete && queue.had_consumer {
                    emptied.push(name.clone());
                }
            }
        }

        let mut tags: Vec<u64> = self
            .unacked
            .keys()
            .filter(|(ch, _)| *ch == channel_id)
            .map(|(_, tag)| *tag)
            .collect();
        // Highest tag first so that pushing to the front restores order.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        let requeued = tags.len();
        for tag in tags {
            if let Some(Unacked { queue, mut message }) = self.unacked.remove(&(channel_id, tag)) {
                if let Some(q) = self.queues.get_mut(&queue) {
                    message.redelivered = true;
                    q.ready.push_front(message);
                    if !touched.contains(&queue) {
                        touched.push(queue);
                    }
                }
            }
        }

        for name in &emptied {
            self.delete_queue(name);
        }
        for name in &touched {
            self.dispatch(shared, name);
        }

        debug!(channel = channel_id, requeued, "channel closed");
    }

    fn close_connection(&mut self, shared: &Shared, connection: u64) {
        let Some(channels) = self.connections.remove(&connection) else {
            return;
        };
        for channel in channels {
            self.close_channel(shared, channel);
        }

        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            self.delete_queue(name);
        }
        info!(connection, exclusive_queues_deleted = owned.len(), "connection closed");
    }
}

/// AMQP-style broker living entirely in process memory.
///
/// Intended for tests/dev. Implements the exchange, queue and
/// acknowledgment semantics the delivery engine relies on:
///
/// - direct, topic and fanout exchanges; the empty name is the default exchange
/// - redeclaration with different flags or arguments fails with `PreconditionFailed`
/// - exclusive queues belong to the declaring connection and vanish with it
/// - auto-delete queues vanish when their last consumer goes away
/// - round-robin delivery across consumers, manual ack/nack
/// - unacknowledged messages return to the head of their queue, marked
///   redelivered, when their channel closes
/// - discarded messages are republished to the queue's dead-letter exchange
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Shared,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker").finish_non_exhaustive()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with the game's direct, topic and dead-letter exchanges.
    pub fn with_peril_exchanges() -> Result<Self, BrokerError> {
        let broker = Self::new();
        broker.declare_exchange(EXCHANGE_DIRECT, ExchangeKind::Direct)?;
        broker.declare_exchange(EXCHANGE_TOPIC, ExchangeKind::Topic)?;
        broker.declare_exchange(DEAD_LETTER_EXCHANGE, ExchangeKind::Fanout)?;
        Ok(broker)
    }

    /// Declare an exchange. Idempotent for the same kind.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be declared".to_string(),
            ));
        }

        let mut state = lock(&self.shared)?;
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::PreconditionFailed(format!(
                "inequivalent arg 'type' for exchange '{name}': received {kind:?} but current is {:?}",
                existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                debug!(exchange = name, ?kind, "exchange declared");
                Ok(())
            }
        }
    }

    /// Open a connection.
    ///
    /// Accepts `amqp://`, `amqps://` and `memory://` URLs; the rest of the URL
    /// is not interpreted.
    #[instrument(skip(self, url), err)]
    pub fn connect(&self, url: &str) -> Result<InMemoryConnection, BrokerError> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .filter(|scheme| SUPPORTED_SCHEMES.contains(&scheme.as_str()))
            .ok_or_else(|| BrokerError::Connection("unsupported broker url scheme".to_string()))?;

        let mut state = lock(&self.shared)?;
        let id = state.next_id();
        state.connections.insert(id, Vec::new());
        info!(connection = id, %scheme, "connected to in-memory broker");
        if scheme != MEMORY_SCHEME {
            warn!(
                connection = id,
                %scheme,
                "network broker url served in-process; no external broker is contacted"
            );
        }

        Ok(InMemoryConnection {
            shared: self.shared.clone(),
            id,
        })
    }

    fn inspect<R>(&self, f: impl FnOnce(&BrokerState) -> R) -> Option<R> {
        self.shared.lock().ok().map(|state| f(&state))
    }

    pub fn queue_info(&self, name: &str) -> Option<QueueInfo> {
        self.inspect(|s| s.queues.get(name).map(|q| q.info(name))).flatten()
    }

    pub fn queue_policy(&self, name: &str) -> Option<QueuePolicy> {
        self.inspect(|s| s.queues.get(name).map(|q| q.policy)).flatten()
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queue_info(name).is_some()
    }

    /// Messages delivered from `queue` and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inspect(|s| s.unacked.values().filter(|u| u.queue == queue).count())
            .unwrap_or(0)
    }

    pub fn binding_count(&self, exchange: &str, queue: &str) -> usize {
        self.inspect(|s| {
            s.exchanges
                .get(exchange)
                .map(|e| e.bindings.iter().filter(|b| b.queue == queue).count())
                .unwrap_or(0)
        })
        .unwrap_or(0)
    }

    /// Remove and return every ready message in `queue`, bypassing consumers.
    pub fn take_ready(&self, queue: &str) -> Vec<Envelope> {
        let Ok(mut state) = self.shared.lock() else {
            return Vec::new();
        };
        match state.queues.get_mut(queue) {
            Some(q) => q.ready.drain(..).map(|m| m.envelope).collect(),
            None => Vec::new(),
        }
    }
}

/// One client connection. Closing it (or dropping it) closes its channels and
/// deletes the exclusive queues it owns.
pub struct InMemoryConnection {
    shared: Shared,
    id: u64,
}

impl fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryConnection").field("id", &self.id).finish()
    }
}

impl InMemoryConnection {
    pub fn is_open(&self) -> bool {
        self.shared
            .lock()
            .map(|s| s.connections.contains_key(&self.id))
            .unwrap_or(false)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        state.close_connection(&self.shared, self.id);
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(connection = self.id, error = %err, "connection close on drop failed");
        }
    }
}

impl Connection for InMemoryConnection {
    type Channel = InMemoryChannel;

    fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        let mut state = lock(&self.shared)?;
        if !state.connections.contains_key(&self.id) {
            return Err(BrokerError::Connection(format!("connection {} is closed", self.id)));
        }

        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                next_tag: 0,
            },
        );
        if let Some(list) = state.connections.get_mut(&self.id) {
            list.push(id);
        }

        Ok(InMemoryChannel {
            shared: self.shared.clone(),
            id,
            connection: self.id,
        })
    }
}

pub struct InMemoryChannel {
    shared: Shared,
    id: u64,
    connection: u64,
}

impl fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Channel for InMemoryChannel {
    type Delivery = InMemoryDelivery;
    type Consumer = InMemoryConsumer;

    fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BrokerError> {
        let mut state = lock(&self.shared)?;
        state.ensure_channel(self.id)?;

        let name = spec.name();
        let policy = spec.policy();
        let arguments = spec.arguments();

        if let Some(existing) = state.queues.get(name) {
            existing.check_owner(name, self.connection)?;
            if existing.policy != policy {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent flags for queue '{name}': received {policy:?} but current is {:?}",
                    existing.policy
                )));
            }
            if existing.arguments != arguments {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg '{DEAD_LETTER_ARGUMENT}' for queue '{name}'"
                )));
            }
            return Ok(existing.info(name));
        }

        let queue = Queue {
            policy,
            arguments,
            owner: policy.exclusive.then_some(self.connection),
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            had_consumer: false,
        };
        let info = queue.info(name);
        state.queues.insert(name.to_string(), queue);
        debug!(
            queue = name,
            durable = policy.durable,
            auto_delete = policy.auto_delete,
            exclusive = policy.exclusive,
            "queue declared"
        );
        Ok(info)
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        state.ensure_channel(self.id)?;

        state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?
            .check_owner(queue, self.connection)?;

        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;

        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !target.bindings.contains(&binding) {
            target.bindings.push(binding);
            debug!(queue, exchange, routing_key, "queue bound");
        }
        Ok(())
    }

    fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Self::Consumer, BrokerError> {
        let mut state = lock(&self.shared)?;
        state.ensure_channel(self.id)?;

        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        target.check_owner(queue, self.connection)?;
        if target.consumers.iter().any(|slot| slot.tag == consumer_tag) {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{consumer_tag}' already in use on queue '{queue}'"
            )));
        }

        let (tx, rx) = mpsc::channel();
        target.consumers.push(ConsumerSlot {
            tag: consumer_tag.to_string(),
            channel: self.id,
            tx,
        });
        target.had_consumer = true;

        state.dispatch(&self.shared, queue);
        debug!(queue, consumer_tag, channel = self.id, "consumer registered");
        Ok(InMemoryConsumer { rx })
    }

    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        state.ensure_channel(self.id)?;
        state.route(&self.shared, envelope).map(|_| ())
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        state.close_channel(&self.shared, self.id);
        Ok(())
    }
}

/// Blocking delivery stream for one consumer; ends when its channel, queue
/// or connection goes away.
#[derive(Debug)]
pub struct InMemoryConsumer {
    rx: mpsc::Receiver<InMemoryDelivery>,
}

impl Iterator for InMemoryConsumer {
    type Item = InMemoryDelivery;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

pub struct InMemoryDelivery {
    shared: Shared,
    channel: u64,
    tag: u64,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

impl fmt::Debug for InMemoryDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDelivery")
            .field("channel", &self.channel)
            .field("tag", &self.tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

impl InMemoryDelivery {
    fn take_unacked(&self, state: &mut BrokerState) -> Result<Unacked, BrokerError> {
        state.ensure_channel(self.channel)?;
        state
            .unacked
            .remove(&(self.channel, self.tag))
            .ok_or(BrokerError::UnknownDeliveryTag(self.tag))
    }
}

impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn ack(self) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        self.take_unacked(&mut state)?;
        Ok(())
    }

    fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        let mut state = lock(&self.shared)?;
        let Unacked { queue, message } = self.take_unacked(&mut state)?;
        if requeue {
            state.requeue(&self.shared, &queue, message);
        } else {
            state.dead_letter(&self.shared, &queue, message);
        }
        Ok(())
    }
}
