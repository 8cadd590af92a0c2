//! Generic subscription engine: decode → handle → acknowledge.
//!
//! One subscription owns one channel and one consumer thread for its whole
//! lifetime:
//!
//! ```text
//! declare_and_bind ─▶ consume (manual ack) ─▶ thread: for each delivery
//!                                                 ├─ codec.decode(body)
//!                                                 │    └─ Err → log, apply DecodeFailurePolicy, next
//!                                                 ├─ handler.handle(payload) → AckDecision
//!                                                 └─ Ack / Nack(requeue) / Nack(discard)
//! ```
//!
//! ## Ordering
//!
//! Messages are handled strictly in delivery order; the handler is never
//! invoked concurrently for the same subscription. Separate subscriptions run
//! on separate threads with no ordering between them.
//!
//! ## Termination
//!
//! There is no shutdown switch. The loop ends when its delivery source
//! closes (channel or connection teardown) and then releases its channel.
//! A per-message failure (decode error, failed ack) never ends the loop.

use core::fmt;
use core::str::FromStr;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use peril_core::{AckDecision, BindingSpec, DomainError, QueueKind};

use crate::broker::{BrokerError, Channel, ChannelGuard, Connection, Delivery, QueueInfo};
use crate::codec::{BitcodeCodec, Codec, JsonCodec};
use crate::declare::{DeclareError, declare_and_bind};
use crate::handler::Handler;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Declare(#[from] DeclareError),

    #[error("could not consume from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("could not spawn consumer thread: {0}")]
    Spawn(#[source] io::Error),
}

impl From<DomainError> for SubscribeError {
    fn from(value: DomainError) -> Self {
        Self::Declare(DeclareError::Invalid(value))
    }
}

/// What to do with a message whose body cannot be decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Leave it unacknowledged; it stays in flight until the channel closes.
    #[default]
    Leave,
    /// Negative-ack with requeue. A permanently malformed body will loop.
    Requeue,
    /// Negative-ack without requeue; routed to the dead-letter exchange.
    Discard,
}

impl DecodeFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeFailurePolicy::Leave => "leave",
            DecodeFailurePolicy::Requeue => "requeue",
            DecodeFailurePolicy::Discard => "discard",
        }
    }
}

impl fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecodeFailurePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave" => Ok(DecodeFailurePolicy::Leave),
            "requeue" => Ok(DecodeFailurePolicy::Requeue),
            "discard" => Ok(DecodeFailurePolicy::Discard),
            other => Err(DomainError::validation(format!(
                "unknown decode failure policy '{other}'"
            ))),
        }
    }
}

/// Per-subscription knobs.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Consumer tag; generated when absent.
    pub consumer_tag: Option<String>,
    pub decode_failure: DecodeFailurePolicy,
}

impl SubscribeOptions {
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    pub fn with_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure = policy;
        self
    }
}

/// Snapshot of a subscription's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub decode_failures: u64,
    pub ack_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    delivered: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    discarded: AtomicU64,
    decode_failures: AtomicU64,
    ack_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_settled(&self, decision: AckDecision) {
        match decision {
            AckDecision::Ack => Self::bump(&self.acked),
            AckDecision::NackRequeue => Self::bump(&self.requeued),
            AckDecision::NackDiscard => Self::bump(&self.discarded),
        }
    }

    fn snapshot(&self) -> SubscriptionStats {
        SubscriptionStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle detaches the consumer thread; it keeps running until
/// its source closes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: QueueInfo,
    consumer_tag: String,
    counters: Arc<StatsCounters>,
    join: Option<thread::JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Queue metadata as returned by the declaration.
    pub fn queue(&self) -> &QueueInfo {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Live counters.
    pub fn stats(&self) -> SubscriptionStats {
        self.counters.snapshot()
    }

    /// `true` once the consumer loop has returned.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Block until the loop ends (its source closed) and return final counters.
    pub fn join(mut self) -> SubscriptionStats {
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!(queue = %self.queue.name, "subscription handler panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Subscribe with an explicit binding, codec and options.
pub fn subscribe_with<C, T, D, H>(
    connection: &C,
    binding: &BindingSpec,
    codec: D,
    handler: H,
    options: SubscribeOptions,
) -> Result<SubscriptionHandle, SubscribeError>
where
    C: Connection,
    T: 'static,
    D: Codec<T>,
    H: Handler<T>,
{
    let (channel, queue) = declare_and_bind(connection, binding)?;

    let consumer_tag = options
        .consumer_tag
        .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::now_v7()));

    // A consume failure drops `channel` here, releasing it.
    let deliveries = channel
        .consume(&queue.name, &consumer_tag)
        .map_err(|source| SubscribeError::Consume {
            queue: queue.name.clone(),
            source,
        })?;

    let counters = Arc::new(StatsCounters::default());
    let ctx = LoopContext {
        queue: queue.name.clone(),
        decode_failure: options.decode_failure,
        counters: counters.clone(),
    };

    let join = thread::Builder::new()
        .name(format!("sub-{}", queue.name))
        .spawn(move || {
            consume_loop::<C::Channel, T, D, H>(channel, deliveries, codec, handler, ctx)
        })
        .map_err(SubscribeError::Spawn)?;

    info!(
        queue = %queue.name,
        exchange = %binding.exchange(),
        routing_key = %binding.routing_key(),
        consumer_tag = %consumer_tag,
        "subscription started"
    );

    Ok(SubscriptionHandle {
        queue,
        consumer_tag,
        counters,
        join: Some(join),
    })
}

/// Declare/bind `queue_name` on `exchange` under `routing_key` and start
/// handling its messages on a dedicated thread.
pub fn subscribe<C, T, K, D, H>(
    connection: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: K,
    codec: D,
    handler: H,
) -> Result<SubscriptionHandle, SubscribeError>
where
    C: Connection,
    T: 'static,
    K: TryInto<QueueKind>,
    K::Error: Into<DomainError>,
    D: Codec<T>,
    H: Handler<T>,
{
    let binding = BindingSpec::parse(exchange, queue_name, routing_key, kind)?;
    subscribe_with::<C, T, D, H>(connection, &binding, codec, handler, SubscribeOptions::default())
}

/// [`subscribe`] with JSON bodies.
pub fn subscribe_json<C, T, K, H>(
    connection: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: K,
    handler: H,
) -> Result<SubscriptionHandle, SubscribeError>
where
    C: Connection,
    T: DeserializeOwned + Serialize + 'static,
    K: TryInto<QueueKind>,
    K::Error: Into<DomainError>,
    H: Handler<T>,
{
    subscribe::<C, T, K, JsonCodec, H>(
        connection,
        exchange,
        queue_name,
        routing_key,
        kind,
        JsonCodec,
        handler,
    )
}

/// [`subscribe`] with bitcode bodies.
pub fn subscribe_bitcode<C, T, K, H>(
    connection: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: K,
    handler: H,
) -> Result<SubscriptionHandle, SubscribeError>
where
    C: Connection,
    T: DeserializeOwned + Serialize + 'static,
    K: TryInto<QueueKind>,
    K::Error: Into<DomainError>,
    H: Handler<T>,
{
    subscribe::<C, T, K, BitcodeCodec, H>(
        connection,
        exchange,
        queue_name,
        routing_key,
        kind,
        BitcodeCodec,
        handler,
    )
}

struct LoopContext {
    queue: String,
    decode_failure: DecodeFailurePolicy,
    counters: Arc<StatsCounters>,
}

fn consume_loop<Ch, T, D, H>(
    channel: ChannelGuard<Ch>,
    deliveries: Ch::Consumer,
    codec: D,
    mut handler: H,
    ctx: LoopContext,
) where
    Ch: Channel,
    D: Codec<T>,
    H: Handler<T>,
{
    let queue = ctx.queue.as_str();

    for delivery in deliveries {
        StatsCounters::bump(&ctx.counters.delivered);
        let tag = delivery.delivery_tag();

        let payload = match codec.decode(delivery.body()) {
            Ok(payload) => payload,
            Err(err) => {
                StatsCounters::bump(&ctx.counters.decode_failures);
                warn!(
                    queue,
                    delivery_tag = tag,
                    policy = %ctx.decode_failure,
                    error = %err,
                    "could not decode message"
                );
                settle_undecodable(delivery, ctx.decode_failure, &ctx);
                continue;
            }
        };

        let decision = handler.handle(payload);
        let outcome = match decision {
            AckDecision::Ack => delivery.ack(),
            AckDecision::NackRequeue => delivery.nack(true),
            AckDecision::NackDiscard => delivery.nack(false),
        };

        match outcome {
            Ok(()) => {
                ctx.counters.record_settled(decision);
                debug!(queue, delivery_tag = tag, %decision, "message settled");
            }
            Err(err) => {
                StatsCounters::bump(&ctx.counters.ack_failures);
                error!(queue, delivery_tag = tag, %decision, error = %err, "acknowledgment failed");
            }
        }
    }

    info!(queue, "delivery source closed; subscription stopped");
    drop(channel);
}

fn settle_undecodable<De: Delivery>(delivery: De, policy: DecodeFailurePolicy, ctx: &LoopContext) {
    let tag = delivery.delivery_tag();
    let (decision, outcome) = match policy {
        DecodeFailurePolicy::Leave => return,
        DecodeFailurePolicy::Requeue => (AckDecision::NackRequeue, delivery.nack(true)),
        DecodeFailurePolicy::Discard => (AckDecision::NackDiscard, delivery.nack(false)),
    };

    match outcome {
        Ok(()) => ctx.counters.record_settled(decision),
        Err(err) => {
            StatsCounters::bump(&ctx.counters.ack_failures);
            error!(queue = %ctx.queue, delivery_tag = tag, error = %err, "could not settle undecodable message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use peril_core::PlayingState;

    use crate::testing::{MockConnection, MockFailure};

    fn json(state: bool) -> Vec<u8> {
        serde_json::to_vec(&PlayingState { is_paused: state }).unwrap()
    }

    #[test]
    fn each_decision_maps_to_exactly_one_primitive() {
        let conn = MockConnection::with_bodies(vec![json(true), json(false), json(true)]);
        let decisions = Arc::new(Mutex::new(vec![
            AckDecision::Ack,
            AckDecision::NackRequeue,
            AckDecision::NackDiscard,
        ]));

        let script = decisions.clone();
        let handle = subscribe_json(
            &conn,
            "peril_direct",
            "pause.alice",
            "pause",
            QueueKind::Transient,
            move |_state: PlayingState| script.lock().unwrap().remove(0),
        )
        .unwrap();

        let stats = handle.join();

        assert_eq!(
            conn.settlements(),
            vec![
                "ack 1".to_string(),
                "nack 2 requeue=true".to_string(),
                "nack 3 requeue=false".to_string(),
            ]
        );
        assert_eq!(stats.delivered, 3);
        assert_eq!((stats.acked, stats.requeued, stats.discarded), (1, 1, 1));
    }

    #[test]
    fn undecodable_messages_are_skipped_without_settling() {
        let conn = MockConnection::with_bodies(vec![b"garbage".to_vec(), json(true)]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = subscribe_json(
            &conn,
            "peril_direct",
            "pause.bob",
            "pause",
            QueueKind::Transient,
            move |state: PlayingState| {
                sink.lock().unwrap().push(state);
                AckDecision::Ack
            },
        )
        .unwrap();

        let stats = handle.join();

        assert_eq!(*seen.lock().unwrap(), vec![PlayingState { is_paused: true }]);
        assert_eq!(conn.settlements(), vec!["ack 2".to_string()]);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.acked, 1);
    }

    #[test]
    fn discard_policy_dead_letters_undecodable_messages() {
        let conn = MockConnection::with_bodies(vec![b"garbage".to_vec()]);
        let binding = BindingSpec::parse("peril_direct", "q", "pause", QueueKind::Durable).unwrap();

        let handle = subscribe_with(
            &conn,
            &binding,
            JsonCodec,
            |_: PlayingState| AckDecision::Ack,
            SubscribeOptions::default()
                .with_decode_failure(DecodeFailurePolicy::Discard)
                .with_consumer_tag("tag-1"),
        )
        .unwrap();

        assert_eq!(handle.consumer_tag(), "tag-1");
        let stats = handle.join();
        assert_eq!(conn.settlements(), vec!["nack 1 requeue=false".to_string()]);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn channel_is_released_when_the_source_closes() {
        let conn = MockConnection::with_bodies(vec![json(true)]);

        let handle = subscribe_json(
            &conn,
            "peril_direct",
            "q",
            "pause",
            QueueKind::Durable,
            |_: PlayingState| AckDecision::Ack,
        )
        .unwrap();
        handle.join();

        assert_eq!(conn.log().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn consume_failure_surfaces_and_releases_the_channel() {
        let conn = MockConnection::failing(MockFailure::Consume);

        let err = subscribe_json(
            &conn,
            "peril_direct",
            "q",
            "pause",
            QueueKind::Durable,
            |_: PlayingState| AckDecision::Ack,
        )
        .unwrap_err();

        assert!(matches!(err, SubscribeError::Consume { .. }));
        assert_eq!(conn.log().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn invalid_classification_is_a_setup_error() {
        let conn = MockConnection::default();

        let err = subscribe_json(
            &conn,
            "peril_direct",
            "q",
            "pause",
            "sometimes",
            |_: PlayingState| AckDecision::Ack,
        )
        .unwrap_err();

        assert!(matches!(err, SubscribeError::Declare(DeclareError::Invalid(_))));
        assert!(conn.log().is_empty());
    }

    #[test]
    fn failed_acks_are_counted_and_do_not_stop_the_loop() {
        let conn = MockConnection::with_bodies(vec![json(true), json(false)]).rejecting_settlements();

        let handle = subscribe_json(
            &conn,
            "peril_direct",
            "q",
            "pause",
            QueueKind::Durable,
            |_: PlayingState| AckDecision::Ack,
        )
        .unwrap();

        let stats = handle.join();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.ack_failures, 2);
        assert_eq!(stats.acked, 0);
    }

    #[test]
    fn decode_failure_policy_parses() {
        assert_eq!("Discard".parse::<DecodeFailurePolicy>(), Ok(DecodeFailurePolicy::Discard));
        assert!("drop".parse::<DecodeFailurePolicy>().is_err());
    }
}
