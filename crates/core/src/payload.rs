//! Message bodies carried over the bus.
//!
//! These are plain serde types; the delivery engine treats them as opaque
//! payloads and never inspects their fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pause/resume broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    pub rank: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: String,
}

/// Published when two players' armies meet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

impl GameLog {
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}

/// A piece on the board, as seen by the in-process fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub location: String,
    pub name: String,
}

impl Piece {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
        }
    }
}

/// One player's piece marching somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub user_name: String,
    pub piece: Piece,
}

impl Move {
    pub fn new(user_name: impl Into<String>, piece: Piece) -> Self {
        Self {
            user_name: user_name.into(),
            piece,
        }
    }

    pub fn location(&self) -> &str {
        &self.piece.location
    }
}
