//! AES-256-CBC with PKCS#7 padding

use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use crate::kdf::DerivedKey;
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// Length of the CBC initialization vector in bytes
pub const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// The decrypt step of the unlock pipeline.
///
/// Only ever called once the envelope MAC has verified, so any error from
/// an implementation is a `DecryptionFailure`, never a passphrase problem.
pub trait Decryptor {
    fn decrypt(&self, ciphertext: &[u8], key: &DerivedKey, iv: &[u8; IV_LEN]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbcDecryptor;

impl Decryptor for AesCbcDecryptor {
    fn decrypt(&self, ciphertext: &[u8], key: &DerivedKey, iv: &[u8; IV_LEN]) -> Result<String> {
        decrypt(ciphertext, key, iv)
    }
}

/// Decrypt, strip padding, and decode the plaintext as UTF-8.
pub fn decrypt(ciphertext: &[u8], key: &DerivedKey, iv: &[u8; IV_LEN]) -> Result<String> {
    let plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| decryption_failure("failed to initialize AES-256-CBC"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| decryption_failure("ciphertext length or padding is invalid"))?;

    String::from_utf8(plaintext).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::DecryptionFailure,
            "decrypted plaintext is not valid UTF-8",
            e,
        )
    })
}

/// Pad and encrypt `plaintext`.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey, iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv).map_err(|_| {
        PagelockError::new(ErrorCategory::Internal, "failed to initialize AES-256-CBC")
    })?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decryption_failure(msg: &str) -> PagelockError {
    PagelockError::with_kind(ErrorCategory::Internal, ErrorKind::DecryptionFailure, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{self, KdfParams};

    fn test_key() -> DerivedKey {
        kdf::derive("letmein", &[0xbb; 16], KdfParams::default())
    }

    #[test]
    fn test_known_ciphertext() {
        // Ciphertext of "<p>Secret</p>" produced by an independent AES implementation.
        let ciphertext = hex::decode("6409ad5122f49bf5630ad9303dc27d7f").unwrap();
        let plaintext = decrypt(&ciphertext, &test_key(), &[0xcc; IV_LEN]).unwrap();
        assert_eq!(plaintext, "<p>Secret</p>");
    }

    #[test]
    fn test_padding_lengths() {
        let key = test_key();
        let iv = [9u8; IV_LEN];
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            let plaintext = "x".repeat(len);
            let ciphertext = encrypt(plaintext.as_bytes(), &key, &iv).unwrap();
            assert_eq!(ciphertext.len(), (len / 16 + 1) * 16, "length {}", len);
            assert_eq!(decrypt(&ciphertext, &key, &iv).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_truncated_ciphertext() {
        let key = test_key();
        let iv = [9u8; IV_LEN];
        let ciphertext = encrypt(b"some html", &key, &iv).unwrap();

        let err = decrypt(&ciphertext[..ciphertext.len() - 1], &key, &iv)
            .expect_err("expected partial block to fail");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailure));

        let err = decrypt(&[], &key, &iv).expect_err("expected empty ciphertext to fail");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailure));
    }

    #[test]
    fn test_wrong_key_is_decryption_failure() {
        let iv = [9u8; IV_LEN];
        let ciphertext = encrypt(b"<p>hello</p>", &test_key(), &iv).unwrap();
        let other = kdf::derive("other", &[0xbb; 16], KdfParams::default());

        // Wrong keys almost always break the padding; when they do not, the
        // garbage is rarely UTF-8. Either way it must not decode to the input.
        match decrypt(&ciphertext, &other, &iv) {
            Ok(plaintext) => assert_ne!(plaintext, "<p>hello</p>"),
            Err(err) => assert_eq!(err.kind, Some(ErrorKind::DecryptionFailure)),
        }
    }

    #[test]
    fn test_non_utf8_plaintext() {
        let key = test_key();
        let iv = [9u8; IV_LEN];
        let ciphertext = encrypt(&[0xff, 0xfe, 0xfd], &key, &iv).unwrap();

        let err = decrypt(&ciphertext, &key, &iv).expect_err("expected UTF-8 failure");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailure));
    }
}
