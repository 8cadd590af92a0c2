//! Queue classification, declaration policy and binding specs.
//!
//! A queue is either **durable** (survives broker restarts, shareable between
//! consumers) or **transient** (private to one consumer and removed once that
//! consumer goes away). Everything the broker needs to declare a queue is
//! derived from that single classification; nothing else is configurable.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::routing::DEAD_LETTER_EXCHANGE;

/// Queue argument key carrying the dead-letter exchange name.
pub const DEAD_LETTER_ARGUMENT: &str = "x-dead-letter-exchange";

/// Two-valued queue classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Durable,
    Transient,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Durable, QueueKind::Transient];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Durable => "durable",
            QueueKind::Transient => "transient",
        }
    }

    /// Declaration parameters for this classification.
    pub fn policy(self) -> QueuePolicy {
        QueuePolicy::for_kind(self)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric codes follow declaration order: `0` durable, `1` transient.
impl TryFrom<u8> for QueueKind {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QueueKind::Durable),
            1 => Ok(QueueKind::Transient),
            other => Err(DomainError::invalid_queue_kind(other.to_string())),
        }
    }
}

impl TryFrom<&str> for QueueKind {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "durable" => Ok(QueueKind::Durable),
            "transient" => Ok(QueueKind::Transient),
            _ => Err(DomainError::invalid_queue_kind(value)),
        }
    }
}

impl FromStr for QueueKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueKind::try_from(s)
    }
}

/// Broker declaration flags resolved from a [`QueueKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueuePolicy {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueuePolicy {
    pub fn for_kind(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Durable => Self {
                durable: true,
                auto_delete: false,
                exclusive: false,
            },
            QueueKind::Transient => Self {
                durable: false,
                auto_delete: true,
                exclusive: true,
            },
        }
    }

    /// Resolve a policy from any classification representation.
    ///
    /// Unknown classifications are rejected here, before anything reaches the
    /// broker.
    pub fn resolve<K>(kind: K) -> DomainResult<Self>
    where
        K: TryInto<QueueKind>,
        K::Error: Into<DomainError>,
    {
        let kind = kind.try_into().map_err(Into::into)?;
        Ok(Self::for_kind(kind))
    }
}

/// Everything needed to declare one named queue.
///
/// Only the name and classification are stored; the flags and dead-letter
/// exchange are always derived from them. Deserialization goes through
/// [`QueueSpec::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawQueueSpec")]
pub struct QueueSpec {
    name: String,
    kind: QueueKind,
}

#[derive(Deserialize)]
struct RawQueueSpec {
    name: String,
    kind: QueueKind,
}

impl TryFrom<RawQueueSpec> for QueueSpec {
    type Error = DomainError;

    fn try_from(raw: RawQueueSpec) -> Result<Self, Self::Error> {
        QueueSpec::new(raw.name, raw.kind)
    }
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, kind: QueueKind) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("queue name must not be empty"));
        }
        Ok(Self { name, kind })
    }

    pub fn durable(name: impl Into<String>) -> DomainResult<Self> {
        Self::new(name, QueueKind::Durable)
    }

    pub fn transient(name: impl Into<String>) -> DomainResult<Self> {
        Self::new(name, QueueKind::Transient)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.policy().durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.policy().auto_delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.policy().exclusive
    }

    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy::for_kind(self.kind)
    }

    pub fn dead_letter_exchange(&self) -> &'static str {
        DEAD_LETTER_EXCHANGE
    }

    /// Declaration arguments sent alongside the flags.
    pub fn arguments(&self) -> Vec<(&'static str, String)> {
        vec![(DEAD_LETTER_ARGUMENT, DEAD_LETTER_EXCHANGE.to_string())]
    }
}

/// A queue bound to an exchange under a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingSpec {
    exchange: String,
    routing_key: String,
    queue: QueueSpec,
}

impl BindingSpec {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, queue: QueueSpec) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue,
        }
    }

    /// Build a binding from raw parts, validating the classification first.
    pub fn parse<K>(
        exchange: impl Into<String>,
        queue_name: impl Into<String>,
        routing_key: impl Into<String>,
        kind: K,
    ) -> DomainResult<Self>
    where
        K: TryInto<QueueKind>,
        K::Error: Into<DomainError>,
    {
        let kind = kind.try_into().map_err(Into::into)?;
        let queue = QueueSpec::new(queue_name, kind)?;
        Ok(Self::new(exchange, routing_key, queue))
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn transient_queue_is_private_and_ephemeral() {
        let spec = QueueSpec::transient("q1").unwrap();

        assert!(!spec.is_durable());
        assert!(spec.is_auto_delete());
        assert!(spec.is_exclusive());
        assert_eq!(spec.dead_letter_exchange(), "peril_dlx");
    }

    #[test]
    fn durable_queue_is_shareable_and_persistent() {
        let spec = QueueSpec::durable("q1").unwrap();

        assert!(spec.is_durable());
        assert!(!spec.is_auto_delete());
        assert!(!spec.is_exclusive());
    }

    #[test]
    fn dead_letter_argument_is_always_present() {
        for kind in QueueKind::ALL {
            let spec = QueueSpec::new("q", kind).unwrap();
            assert_eq!(
                spec.arguments(),
                vec![(DEAD_LETTER_ARGUMENT, "peril_dlx".to_string())]
            );
        }
    }

    #[test]
    fn empty_queue_name_is_rejected() {
        let err = QueueSpec::durable("  ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn unknown_classifications_fail_fast() {
        assert_eq!(
            QueueKind::try_from(2u8),
            Err(DomainError::InvalidQueueKind("2".to_string()))
        );
        assert!(QueueKind::try_from("sticky").is_err());
        assert!(QueuePolicy::resolve(7u8).is_err());
        assert!(BindingSpec::parse("peril_topic", "q", "k", "forever").is_err());
    }

    #[test]
    fn classifications_parse_from_codes_and_names() {
        assert_eq!(QueueKind::try_from(0u8), Ok(QueueKind::Durable));
        assert_eq!(QueueKind::try_from(1u8), Ok(QueueKind::Transient));
        assert_eq!("Durable".parse::<QueueKind>(), Ok(QueueKind::Durable));
        assert_eq!(QueuePolicy::resolve(QueueKind::Transient), Ok(QueueKind::Transient.policy()));
    }

    #[test]
    fn deserialized_spec_rederives_its_flags() {
        let json = r#"{"name":"q1","kind":"durable","durable":false,"auto_delete":true,"exclusive":true,"dead_letter_exchange":"elsewhere"}"#;
        let spec: QueueSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.policy(), QueuePolicy::for_kind(QueueKind::Durable));
        assert_eq!(spec.dead_letter_exchange(), "peril_dlx");
    }

    #[test]
    fn deserializing_an_empty_name_is_rejected() {
        let json = r#"{"name":"","kind":"durable"}"#;
        assert!(serde_json::from_str::<QueueSpec>(json).is_err());

        let binding = r#"{"exchange":"peril_topic","routing_key":"k","queue":{"name":" ","kind":"transient"}}"#;
        assert!(serde_json::from_str::<BindingSpec>(binding).is_err());
    }

    #[test]
    fn serialized_spec_round_trips_through_validation() {
        let spec = QueueSpec::transient("q1").unwrap();
        let json = serde_json::to_string(&spec).unwrap();

        assert_eq!(json, r#"{"name":"q1","kind":"transient"}"#);
        assert_eq!(serde_json::from_str::<QueueSpec>(&json).unwrap(), spec);
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&QueueKind::Transient).unwrap();
        assert_eq!(json, "\"transient\"");
    }

    proptest! {
        /// Durable implies neither auto-delete nor exclusive; transient implies both.
        #[test]
        fn policy_flags_follow_durability(code in 0u8..2, name in "[a-z][a-z0-9_.]{0,24}") {
            let kind = QueueKind::try_from(code).unwrap();
            let spec = QueueSpec::new(name, kind).unwrap();

            if spec.is_durable() {
                prop_assert!(!spec.is_auto_delete());
                prop_assert!(!spec.is_exclusive());
            } else {
                prop_assert!(spec.is_auto_delete());
                prop_assert!(spec.is_exclusive());
            }
            prop_assert_eq!(spec.policy(), QueuePolicy::for_kind(kind));
        }

        #[test]
        fn codes_outside_the_classification_are_rejected(code in 2u8..=u8::MAX) {
            prop_assert!(QueuePolicy::resolve(code).is_err());
        }
    }
}
