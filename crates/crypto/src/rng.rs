//! # Secure random source
//!
//! A process-wide random generator handle. Components that need randomness
//! receive a [`SecureRandom`] explicitly at construction instead of reaching
//! for a lazily-initialized global.

use std::sync::{Arc, Mutex};

use rand::distributions::{Alphanumeric, DistString};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Length of protocol tokens (nonces, codes, access tokens). 22 characters
/// over the 62-symbol alphanumeric alphabet carry ~131 bits of entropy.
pub const TOKEN_LEN: usize = 22;

/// A cloneable handle onto a cryptographically secure random generator.
///
/// Constructed once at process start and passed into every component that
/// needs randomness.
#[derive(Clone, Debug)]
pub struct SecureRandom {
    inner: Arc<Mutex<ChaCha20Rng>>,
}

impl SecureRandom {
    /// Create a handle seeded from operating-system entropy.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(ChaCha20Rng::from_entropy())) }
    }

    /// Create a deterministic handle from a fixed seed. Only useful in tests.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { inner: Arc::new(Mutex::new(ChaCha20Rng::from_seed(seed))) }
    }

    /// Generate a protocol token: [`TOKEN_LEN`] alphanumeric characters.
    #[must_use]
    pub fn token(&self) -> String {
        let mut rng = self.inner.lock().expect("rng mutex poisoned");
        Alphanumeric.sample_string(&mut *rng, TOKEN_LEN)
    }

    /// Generate an alphanumeric string of the given length.
    #[must_use]
    pub fn string(&self, len: usize) -> String {
        let mut rng = self.inner.lock().expect("rng mutex poisoned");
        Alphanumeric.sample_string(&mut *rng, len)
    }

    /// Fill a fixed-size array with random bytes.
    #[must_use]
    pub fn bytes<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        let mut rng = self.inner.lock().expect("rng mutex poisoned");
        rng.fill_bytes(&mut out);
        out
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `value` has the shape of a generated protocol token. Used to
/// reject malformed correlation values before they reach the store.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    value.len() == TOKEN_LEN && value.bytes().all(|b| b.is_ascii_alphanumeric())
}
