#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub struct FuzzParams {
    pub seed: u64,
    pub steps: usize,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok()
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse::<usize>().ok()
}

fn mix_seed(mut seed: u64, tag: &str) -> u64 {
    // Stable per-test stream from one base seed.
    for (i, b) in tag.as_bytes().iter().enumerate() {
        seed ^= (*b as u64) << ((i % 8) * 8);
        seed = seed.rotate_left(13).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    }
    seed
}

pub fn params(test_tag: &str, default_steps: usize) -> FuzzParams {
    let base_seed = env_u64("RDRS_FUZZ_SEED").unwrap_or(0x5EED_0DB0_0400_0001);
    let steps = env_usize("RDRS_FUZZ_STEPS").unwrap_or(default_steps);
    FuzzParams {
        seed: mix_seed(base_seed, test_tag),
        steps,
    }
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

const IDENT_CHARS: &[char] = &[
    'a', 'b', 'c', 'x', 'y', 'z', 'A', 'Q', '0', '7', '9', '_', '$', 'é', 'ü', '中',
];

const VALUE_CHARS: &[char] = &[
    'a', 'z', 'M', '0', '5', ' ', '"', '\\', '/', '\n', '\t', '{', '}', 'ß', '€', '\u{1F600}',
];

/// Valid identifier: 1 to 16 characters from a mixed-width alphabet.
pub fn identifier(rng: &mut StdRng) -> String {
    let len = rng.gen_range(1..=16);
    (0..len)
        .map(|_| IDENT_CHARS[rng.gen_range(0..IDENT_CHARS.len())])
        .collect()
}

/// Arbitrary text without NUL bytes.
pub fn text(rng: &mut StdRng, max_chars: usize) -> String {
    let len = rng.gen_range(0..=max_chars);
    (0..len)
        .map(|_| VALUE_CHARS[rng.gen_range(0..VALUE_CHARS.len())])
        .collect()
}

/// Filter value as a client sends it, with the bytes the engine must see.
pub fn filter_value(rng: &mut StdRng) -> (String, String) {
    if rng.gen_bool(0.3) {
        let n = rng.gen::<i64>().to_string();
        (n.clone(), n)
    } else {
        let raw = text(rng, 48);
        let quoted = serde_json::Value::String(raw.clone()).to_string();
        (quoted, raw)
    }
}
