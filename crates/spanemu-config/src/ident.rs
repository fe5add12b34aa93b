//! Random identifier generation and identifier validation.
//!
//! Generated identifiers are not cryptographically secure; uniqueness is
//! probabilistic, which is acceptable for test-scoped resources.

use rand::Rng;

/// Total length of a generated identifier.
pub const RANDOM_ID_LEN: usize = 30;

const FIRST_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const REST_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random identifier: one `[a-z]` character followed by 29
/// characters from `[a-z0-9]`, each drawn independently.
pub fn random_id() -> String {
    random_id_with(&mut rand::thread_rng())
}

pub fn random_id_with<R: Rng>(rng: &mut R) -> String {
    let mut id = String::with_capacity(RANDOM_ID_LEN);
    id.push(char::from(FIRST_CHARSET[rng.gen_range(0..FIRST_CHARSET.len())]));
    for _ in 1..RANDOM_ID_LEN {
        id.push(char::from(REST_CHARSET[rng.gen_range(0..REST_CHARSET.len())]));
    }
    id
}

/// Identifiers end up embedded in resource paths, so they must not contain
/// path separators or whitespace.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c == '/' || c.is_whitespace())
}
