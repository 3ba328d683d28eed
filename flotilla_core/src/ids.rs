use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

/// Produces opaque 128-bit identities rendered as 32 lowercase hex characters.
///
/// The generator owns its RNG behind a mutex so a single instance can be shared
/// by every caller of a store. Production instances seed from the thread RNG;
/// tests pass a fixed seed to get a reproducible sequence.
#[derive(Debug)]
pub struct IdGenerator {
    rng: Mutex<ChaCha8Rng>,
}

impl IdGenerator {
    /// Creates a generator seeded from the operating system's thread RNG.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_rng(&mut rand::rng())),
        }
    }

    /// Creates a generator with a fixed seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_seed(seed)),
        }
    }

    pub fn next_id(&self) -> String {
        let mut rng = self.rng.lock();
        let high = rng.next_u64();
        let low = rng.next_u64();
        format!("{high:016x}{low:016x}")
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
