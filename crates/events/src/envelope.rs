/// A published message as handed to the broker.
///
/// This is the unit a [`crate::Channel`] publishes and the broker routes:
///
/// - `exchange` + `routing_key` decide which bound queues receive a copy
/// - `body` is the encoded payload; the broker never looks inside it
/// - `content_type` names the codec that produced `body`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    exchange: String,
    routing_key: String,
    content_type: String,
    body: Vec<u8>,
}

impl Envelope {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        content_type: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            content_type: content_type.into(),
            body,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Same body and content type, routed somewhere else (dead-lettering).
    pub fn rerouted(&self, exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: self.routing_key.clone(),
            content_type: self.content_type.clone(),
            body: self.body.clone(),
        }
    }
}
