//! Explicit PRNG collaborator.
//!
//! The original source reaches for a process-wide `getCommonPRNG()`
//! singleton; per the Design Notes this is replaced with an explicit handle
//! threaded into every constructor that needs randomness (handle
//! generation, batch shuffling, the binomial mix pool's coin flips).

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const HANDLE_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-";

/// A shareable, explicit PRNG handle.
///
/// Cloning a `Prng` shares the same underlying generator (it's a thin
/// `Arc`-like wrapper over a mutex), so handing the same handle to a
/// `Queue` and the mix pools built atop it draws from one shared stream,
/// matching spec §5's "Random batch selection uses a shared PRNG".
#[derive(Clone)]
pub struct Prng {
    inner: std::sync::Arc<Mutex<StdRng>>,
}

impl Prng {
    /// Construct a PRNG seeded from the OS entropy source.
    pub fn from_entropy() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Construct a PRNG with a fixed seed — for deterministic tests only.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Draw an 8-character handle from the alphabet `[A-Za-z0-9+-]`.
    pub fn handle(&self) -> String {
        let mut rng = self.inner.lock();
        (0..8)
            .map(|_| HANDLE_ALPHABET[rng.gen_range(0..HANDLE_ALPHABET.len())] as char)
            .collect()
    }

    /// Shuffle `items` in place and, if `count` is given, truncate to the
    /// first `count` elements. Mirrors `getCommonPRNG().shuffle(handles, count)`.
    pub fn shuffle<T>(&self, items: &mut Vec<T>, count: Option<usize>) {
        let mut rng = self.inner.lock();
        items.shuffle(&mut *rng);
        if let Some(n) = count {
            items.truncate(n);
        }
    }

    /// Draw a uniform float in `[0, 1)`, used by the binomial mix pool.
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen_range(0.0..1.0)
    }
}

impl std::fmt::Debug for Prng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Prng(..)")
    }
}
