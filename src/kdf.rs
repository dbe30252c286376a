//! Passphrase key derivation
//!
//! Keys are derived with PBKDF2-HMAC-SHA1, matching the build-time tool that
//! produces envelopes. The salt is chosen once when the envelope is sealed,
//! so derivation is deterministic for a given envelope.

use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use std::fmt;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count used by sealed envelopes unless configured otherwise
pub const DEFAULT_ITERATIONS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(PagelockError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                "PBKDF2 iteration count must be at least 1",
            ));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// A 256-bit symmetric key, wiped from memory on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive a 32-byte key from a passphrase and salt
pub fn derive(passphrase: &str, salt: &[u8; SALT_LEN], params: KdfParams) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), salt, params.iterations, &mut *key);
    DerivedKey(key)
}
