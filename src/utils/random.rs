use rand::seq::IndexedRandom;
use rand::Rng;

/// Largest seed handed to the model server.
pub const MAX_SEED: i64 = 1_000_000_000;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A seed in `0..=MAX_SEED`.
pub fn random_seed() -> i64 {
    rand::rng().random_range(0..=MAX_SEED)
}

/// Lowercase alphanumeric string of `len` characters.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .filter_map(|_| SUFFIX_ALPHABET.choose(&mut rng))
        .map(|&byte| char::from(byte))
        .collect()
}
