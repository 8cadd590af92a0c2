use peril_core::AckDecision;

/// Consumes one decoded payload and decides its fate.
///
/// A handler is the sole authority over what happens to a message: it never
/// raises errors, it returns [`AckDecision::NackRequeue`] ("try again later")
/// or [`AckDecision::NackDiscard`] ("never going to work") instead.
///
/// Each subscription calls its handler from a single dedicated thread, one
/// message at a time, so `&mut self` state needs no locking.
///
/// Closures are handlers:
///
/// ```ignore
/// let handler = |state: PlayingState| {
///     game.handle_pause(state);
///     AckDecision::Ack
/// };
/// ```
pub trait Handler<T>: Send + 'static {
    fn handle(&mut self, message: T) -> AckDecision;
}

impl<T, F> Handler<T> for F
where
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    fn handle(&mut self, message: T) -> AckDecision {
        self(message)
    }
}
