//! Pagelock - passphrase-locked HTML blocks for static pages
//!
//! Content is sealed at build time into an envelope (HMAC-SHA256 tag, salt,
//! IV, AES-256-CBC ciphertext) and unlocked on the client with no server
//! round trip. A passphrase that unlocks one block is cached and tried
//! against every other block on later loads.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod file_ops;
pub mod inline;
pub mod integrity;
pub mod kdf;
pub mod passphrase;
pub mod pipeline;
pub mod seal;
pub mod session;
