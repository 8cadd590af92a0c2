//! Predicate-driven collectors over a subscriber channel.
//!
//! An aggregator drains its channel until it closes and only then hands back
//! what it matched, in arrival order. Aggregators never share state; run one
//! per subscriber.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("could not spawn aggregator thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("aggregator thread panicked")]
    Panicked,
}

/// Keep the events matching `predicate`.
pub fn aggregate<M, I, P>(channel: I, mut predicate: P) -> Vec<M>
where
    I: IntoIterator<Item = M>,
    P: FnMut(&M) -> bool,
{
    channel.into_iter().filter(|event| predicate(event)).collect()
}

/// Map each event to zero or more owned matches and keep them all.
pub fn aggregate_with<M, R, I, F, It>(channel: I, mut select: F) -> Vec<R>
where
    I: IntoIterator<Item = M>,
    F: FnMut(&M) -> It,
    It: IntoIterator<Item = R>,
{
    let mut matches = Vec::new();
    for event in channel {
        matches.extend(select(&event));
    }
    matches
}

/// A running aggregator thread.
#[derive(Debug)]
pub struct AggregatorHandle<R> {
    matched: Arc<AtomicUsize>,
    join: thread::JoinHandle<Vec<R>>,
}

impl<R> AggregatorHandle<R> {
    /// Diagnostic count of matches so far; the results are only final after
    /// [`AggregatorHandle::join`].
    pub fn matched_so_far(&self) -> usize {
        self.matched.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the channel to close and take the results.
    pub fn join(self) -> Result<Vec<R>, AggregateError> {
        self.join.join().map_err(|_| AggregateError::Panicked)
    }
}

/// [`aggregate`] on a dedicated thread.
pub fn spawn_aggregator<M, I, P>(
    name: &str,
    channel: I,
    mut predicate: P,
) -> Result<AggregatorHandle<M>, AggregateError>
where
    M: Send + 'static,
    I: IntoIterator<Item = M> + Send + 'static,
    P: FnMut(&M) -> bool + Send + 'static,
{
    spawn_collector(name, channel, move |event, out| {
        if predicate(&event) {
            out.push(event);
        }
    })
}

/// [`aggregate_with`] on a dedicated thread.
pub fn spawn_aggregator_with<M, R, I, F, It>(
    name: &str,
    channel: I,
    mut select: F,
) -> Result<AggregatorHandle<R>, AggregateError>
where
    M: Send + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = M> + Send + 'static,
    F: FnMut(&M) -> It + Send + 'static,
    It: IntoIterator<Item = R>,
{
    spawn_collector(name, channel, move |event, out| out.extend(select(&event)))
}

fn spawn_collector<M, R, I, S>(
    name: &str,
    channel: I,
    mut step: S,
) -> Result<AggregatorHandle<R>, AggregateError>
where
    M: Send + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = M> + Send + 'static,
    S: FnMut(M, &mut Vec<R>) + Send + 'static,
{
    let matched = Arc::new(AtomicUsize::new(0));
    let counter = matched.clone();
    let label = name.to_string();

    let join = thread::Builder::new()
        .name(format!("agg-{name}"))
        .spawn(move || {
            let mut results = Vec::new();
            for event in channel {
                step(event, &mut results);
                counter.store(results.len(), Ordering::Relaxed);
            }
            debug!(aggregator = %label, matched = results.len(), "channel closed; aggregation finished");
            results
        })
        .map_err(AggregateError::Spawn)?;

    Ok(AggregatorHandle { matched, join })
}
