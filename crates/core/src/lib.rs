//! `peril-core`: messaging domain building blocks.
//!
//! This crate contains **pure** primitives (no broker, no threads): queue
//! classification and declaration policy, binding specs, acknowledgment
//! decisions, routing vocabulary and message payloads.

pub mod ack;
pub mod error;
pub mod payload;
pub mod queue;
pub mod routing;

pub use ack::AckDecision;
pub use error::{DomainError, DomainResult};
pub use payload::{ArmyMove, GameLog, Move, Piece, Player, PlayingState, RecognitionOfWar, Unit};
pub use queue::{BindingSpec, DEAD_LETTER_ARGUMENT, QueueKind, QueuePolicy, QueueSpec};
