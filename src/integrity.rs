//! Envelope integrity verification
//!
//! The MAC is HMAC-SHA256 over the signed text of the envelope. Its key is
//! the lower-case hex SHA-256 digest of the passphrase, used as ASCII bytes,
//! so it is independent of the PBKDF2-derived cipher key.

use crate::envelope::Envelope;
use crate::error::{ErrorCategory, PagelockError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of the HMAC-SHA256 tag in bytes
pub const MAC_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Compute the tag for `signed_text` under `passphrase`.
pub fn compute_mac(passphrase: &str, signed_text: &str) -> Result<[u8; MAC_LEN]> {
    let key = Zeroizing::new(hex::encode(Sha256::digest(passphrase.as_bytes())));
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| PagelockError::new(ErrorCategory::Internal, "failed to key HMAC"))?;
    mac.update(signed_text.as_bytes());

    let mut tag = [0u8; MAC_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Returns true only if the envelope's tag matches the one computed for
/// `passphrase`. The comparison runs in constant time.
pub fn verify(envelope: &Envelope, passphrase: &str) -> bool {
    match compute_mac(passphrase, envelope.signed_text()) {
        Ok(computed) => computed[..].ct_eq(&envelope.mac()[..]).into(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "da488872c680a6452d7a02a111cb6b3a347a34bb6003aace24caa5eeb56df3d7\
                           bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\
                           cccccccccccccccccccccccccccccccc\
                           ZAmtUSL0m/VjCtkwPcJ9fw==";

    #[test]
    fn test_correct_passphrase_verifies() {
        let envelope = Envelope::parse(FIXTURE).unwrap();
        assert!(verify(&envelope, "letmein"));
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let envelope = Envelope::parse(FIXTURE).unwrap();
        assert!(!verify(&envelope, "wrong"));
        assert!(!verify(&envelope, ""));
        assert!(!verify(&envelope, "letmein "));
    }

    #[test]
    fn test_compute_mac_matches_fixture() {
        let tag = compute_mac("letmein", &FIXTURE[64..]).unwrap();
        assert_eq!(hex::encode(tag), &FIXTURE[..64]);
    }

    #[test]
    fn test_any_tampered_character_fails() {
        // Flip each character after the tag to a different one of the same class.
        for i in 64..FIXTURE.len() {
            let original = FIXTURE.as_bytes()[i];
            let replacement = match original {
                b'b' | b'c' => b'a',
                b'A' => b'B',
                _ => b'A',
            };
            let mut raw = FIXTURE.as_bytes().to_vec();
            raw[i] = replacement;
            let raw = String::from_utf8(raw).unwrap();

            let envelope = Envelope::parse(&raw).unwrap();
            assert!(!verify(&envelope, "letmein"), "tamper at {} not detected", i);
        }
    }

    #[test]
    fn test_tampered_mac_fails() {
        let raw = format!("{}{}", "aa".repeat(32), &FIXTURE[64..]);
        let envelope = Envelope::parse(&raw).unwrap();
        assert!(!verify(&envelope, "letmein"));
    }
}
