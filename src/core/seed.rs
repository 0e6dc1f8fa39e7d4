//! Stable seeding: every random choice in a run derives from the run seed
//! and a short label, so stages never share or disturb each other's streams.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Added per retry so re-rolls explore a different stream.
pub const RETRY_PRIME: u64 = 7919;

pub fn stable_seed(base: u64, parts: &[&str]) -> u64 {
    let mut hasher = FxHasher::default();
    base.hash(&mut hasher);
    for part in parts {
        part.hash(&mut hasher);
    }
    hasher.finish()
}

pub fn rng_for(base: u64, parts: &[&str]) -> StdRng {
    StdRng::seed_from_u64(stable_seed(base, parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_inputs_same_stream() {
        let a: u64 = rng_for(42, &["world", "mystery"]).gen();
        let b: u64 = rng_for(42, &["world", "mystery"]).gen();
        assert_eq!(a, b);
    }

    #[test]
    fn labels_separate_streams() {
        assert_ne!(stable_seed(42, &["world"]), stable_seed(42, &["cast"]));
        assert_ne!(stable_seed(42, &["ab", "c"]), stable_seed(42, &["a", "bc"]));
        assert_ne!(stable_seed(1, &["world"]), stable_seed(2, &["world"]));
    }
}
