use core::fmt;

use serde::{Deserialize, Serialize};

/// What should happen to a message after its handler ran.
///
/// Only handlers produce this value; infrastructure code translates it into
/// the matching broker primitive and never invents one on its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckDecision {
    /// Processed; remove the message from the queue.
    Ack,
    /// Not processed now; put it back for redelivery.
    NackRequeue,
    /// Not processable; drop it (dead-lettered when the queue has a DLX).
    NackDiscard,
}

impl AckDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckDecision::Ack => "ack",
            AckDecision::NackRequeue => "nack_requeue",
            AckDecision::NackDiscard => "nack_discard",
        }
    }

    /// `Some(requeue)` for negative decisions.
    pub fn requeue(&self) -> Option<bool> {
        match self {
            AckDecision::Ack => None,
            AckDecision::NackRequeue => Some(true),
            AckDecision::NackDiscard => Some(false),
        }
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_decisions_carry_requeue_flag() {
        assert_eq!(AckDecision::Ack.requeue(), None);
        assert_eq!(AckDecision::NackRequeue.requeue(), Some(true));
        assert_eq!(AckDecision::NackDiscard.requeue(), Some(false));
    }

    #[test]
    fn displays_as_snake_case() {
        assert_eq!(AckDecision::NackRequeue.to_string(), "nack_requeue");
        assert_eq!(serde_json::to_string(&AckDecision::NackDiscard).unwrap(), "\"nack_discard\"");
    }
}
