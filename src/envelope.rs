//! Envelope text codec
//!
//! An envelope is one locked block, serialized as a single string with no
//! delimiters. Field boundaries are fixed offsets:
//! - `0..64`: HMAC-SHA256 tag, hex
//! - `64..96`: salt, hex
//! - `96..128`: IV, hex
//! - `128..`: ciphertext, standard base64
//!
//! The tag covers everything from offset 64 to the end, as text.

use crate::cipher::IV_LEN;
use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use crate::integrity::MAC_LEN;
use crate::kdf::SALT_LEN;
use std::fmt;
use std::str::FromStr;

const MAC_END: usize = MAC_LEN * 2;
const SALT_END: usize = MAC_END + SALT_LEN * 2;
const IV_END: usize = SALT_END + IV_LEN * 2;

/// Minimum length of a well-formed envelope, in characters
pub const MIN_ENVELOPE_LEN: usize = IV_END;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    mac: [u8; MAC_LEN],
    salt: [u8; SALT_LEN],
    iv: [u8; IV_LEN],
    raw: String,
}

impl Envelope {
    /// Parse an envelope string.
    ///
    /// Only the structure is checked here. Whether the tag matches is up to
    /// the integrity verifier, and the ciphertext text is not decoded until
    /// after verification.
    ///
    /// The MAC must be lower-case hex, matching the tag as computed in the
    /// browser, where it is compared as a string. Salt and IV may be either
    /// case; they are covered by the MAC as written.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() < MIN_ENVELOPE_LEN {
            return Err(PagelockError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedEnvelope,
                format!(
                    "envelope is {} characters long; at least {} are required",
                    raw.len(),
                    MIN_ENVELOPE_LEN
                ),
            ));
        }

        let bytes = raw.as_bytes();
        let mac = decode_field(&bytes[..MAC_END], "MAC")?;
        if bytes[..MAC_END].iter().any(u8::is_ascii_uppercase) {
            return Err(PagelockError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedEnvelope,
                "envelope MAC field must be lower-case hex",
            ));
        }
        let salt = decode_field(&bytes[MAC_END..SALT_END], "salt")?;
        let iv = decode_field(&bytes[SALT_END..IV_END], "IV")?;

        Ok(Self {
            mac,
            salt,
            iv,
            raw: raw.to_string(),
        })
    }

    pub fn mac(&self) -> &[u8; MAC_LEN] {
        &self.mac
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// The text covered by the MAC: salt, IV and ciphertext exactly as they
    /// appeared in the envelope.
    pub fn signed_text(&self) -> &str {
        // The header was validated as hex, so these offsets are char boundaries.
        &self.raw[MAC_END..]
    }

    /// The base64 ciphertext, undecoded.
    pub fn ciphertext_text(&self) -> &str {
        &self.raw[IV_END..]
    }
}

impl FromStr for Envelope {
    type Err = PagelockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn decode_field<const N: usize>(text: &[u8], name: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(text, &mut out).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedEnvelope,
            format!("envelope {} field is not valid hex: {}", name, e),
            e,
        )
    })?;
    Ok(out)
}
