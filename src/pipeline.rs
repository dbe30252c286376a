//! Verify-then-decrypt pipeline for a single envelope

use crate::cipher::{AesCbcDecryptor, Decryptor};
use crate::envelope::Envelope;
use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use crate::integrity;
use crate::kdf::{self, KdfParams};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};

pub struct Pipeline {
    params: KdfParams,
    decryptor: Box<dyn Decryptor>,
}

impl Pipeline {
    pub fn new(params: KdfParams) -> Self {
        Self::with_decryptor(params, Box::new(AesCbcDecryptor))
    }

    pub fn with_decryptor(params: KdfParams, decryptor: Box<dyn Decryptor>) -> Self {
        Self { params, decryptor }
    }

    /// Verify the envelope under `passphrase` and, only if the MAC matches,
    /// derive the key and decrypt.
    ///
    /// A wrong passphrase and a tampered envelope both yield
    /// `VerificationFailed` with the same message.
    pub fn open(&self, envelope: &Envelope, passphrase: &str) -> Result<String> {
        if !integrity::verify(envelope, passphrase) {
            return Err(PagelockError::with_kind(
                ErrorCategory::User,
                ErrorKind::VerificationFailed,
                "wrong passphrase or corrupted envelope",
            ));
        }

        let ciphertext = BASE64_STANDARD
            .decode(envelope.ciphertext_text())
            .map_err(|e| {
                PagelockError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::DecryptionFailure,
                    "verified ciphertext is not valid base64",
                    e,
                )
            })?;
        let key = kdf::derive(passphrase, envelope.salt(), self.params);

        self.decryptor.decrypt(&ciphertext, &key, envelope.iv())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}
