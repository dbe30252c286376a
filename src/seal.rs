//! Sealing plaintext HTML into an envelope
//!
//! This is the build-time counterpart of the unlock pipeline: it derives a
//! key from the passphrase and a fresh salt, encrypts with AES-256-CBC, and
//! signs the hex salt, hex IV and base64 ciphertext with HMAC-SHA256.

use crate::cipher::{self, IV_LEN};
use crate::error::Result;
use crate::integrity;
use crate::kdf::{self, KdfParams, SALT_LEN};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rand::RngCore;
use rand::rngs::OsRng;

/// Seal `plaintext` under `passphrase` using a random salt and IV.
pub fn seal(passphrase: &str, plaintext: &str, params: KdfParams) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    seal_deterministic(passphrase, plaintext, params, &salt, &iv)
}

/// Seal `plaintext` with a caller-provided salt and IV.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `seal()` which generates random salt/IV.
pub fn seal_deterministic(
    passphrase: &str,
    plaintext: &str,
    params: KdfParams,
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
) -> Result<String> {
    let key = kdf::derive(passphrase, salt, params);
    let ciphertext = cipher::encrypt(plaintext.as_bytes(), &key, iv)?;

    let mut signed = String::new();
    signed.push_str(&hex::encode(salt));
    signed.push_str(&hex::encode(iv));
    signed.push_str(&BASE64_STANDARD.encode(&ciphertext));

    let mac = integrity::compute_mac(passphrase, &signed)?;

    Ok(format!("{}{}", hex::encode(mac), signed))
}
