//! Topic-exchange pattern matching.
//!
//! Keys and patterns are dot-separated words. In a pattern `*` matches
//! exactly one word and `#` matches zero or more words.

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

/// Bottom-up over pattern suffixes: `next[j]` holds whether `pattern[i + 1..]`
/// matches `key[j..]`. Runs in `O(pattern.len() * key.len())`.
fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut next = vec![false; key.len() + 1];
    next[key.len()] = true;

    for &word in pattern.iter().rev() {
        let mut current = vec![false; key.len() + 1];
        for j in (0..=key.len()).rev() {
            current[j] = if word == "#" {
                // Absorb nothing, or absorb `key[j]` and stay on `#`.
                next[j] || (j < key.len() && current[j + 1])
            } else {
                j < key.len() && (word == "*" || word == key[j]) && next[j + 1]
            };
        }
        next = current;
    }

    next[0]
}
