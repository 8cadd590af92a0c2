//! Exchange names, routing keys and queue naming conventions.
//!
//! Keys are dot-separated words so they can be matched by topic bindings
//! (`army_moves.*`, `game_logs.*`).

/// Direct exchange for point-to-point control signals (pause/resume).
pub const EXCHANGE_DIRECT: &str = "peril_direct";

/// Topic exchange for game traffic.
pub const EXCHANGE_TOPIC: &str = "peril_topic";

/// Dead-letter exchange attached to every declared queue.
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `army_moves.<username>`
pub fn army_moves_key(username: &str) -> String {
    format!("{ARMY_MOVES_PREFIX}.{username}")
}

/// `war.<username>`
pub fn war_key(username: &str) -> String {
    format!("{WAR_RECOGNITIONS_PREFIX}.{username}")
}

/// `game_logs.<username>`
pub fn game_log_key(username: &str) -> String {
    format!("{GAME_LOG_SLUG}.{username}")
}

/// Per-player pause queue name: `pause.<username>`.
pub fn pause_queue(username: &str) -> String {
    format!("{PAUSE_KEY}.{username}")
}

/// Binding pattern matching every key under `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_by_their_slug() {
        assert_eq!(army_moves_key("alice"), "army_moves.alice");
        assert_eq!(war_key("bob"), "war.bob");
        assert_eq!(game_log_key("carol"), "game_logs.carol");
        assert_eq!(pause_queue("dave"), "pause.dave");
        assert_eq!(wildcard(GAME_LOG_SLUG), "game_logs.*");
    }
}
