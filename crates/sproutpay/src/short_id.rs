//! Short, shareable payment link identifiers.

use rand::seq::IndexedRandom;

/// Alphabet without look-alike characters (no `I`, `L`, `O`, `i`, `l`, `o`, `0`, `1`).
pub const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

pub const SHORT_ID_LEN: usize = 8;

/// Random string of `len` characters drawn uniformly from [`ALPHABET`].
pub fn random_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .filter_map(|_| ALPHABET.choose(&mut rng))
        .map(|&b| char::from(b))
        .collect()
}

/// Candidate short id. Uniqueness is enforced by the store.
pub fn generate() -> String {
    random_string(SHORT_ID_LEN)
}

pub fn is_short_id(s: &str) -> bool {
    s.len() == SHORT_ID_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
}
