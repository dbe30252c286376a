//! Cached unlock session
//!
//! The last passphrase that unlocked any block is kept as a small JSON record
//! under one slot of a key-value store, so later page loads can skip the form.
//! There is only ever one cached passphrase, shared by every block.

use crate::config::DEFAULT_SESSION_KEY;
use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};
use zeroize::Zeroize;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    passphrase: String,
}

impl Session {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

/// Scoped get/set key-value store, in the manner of browser local storage.
///
/// Methods take `&self`; implementations handle their own interior mutability.
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Non-persistent storage, for tests and single-run hosts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Handle to the cached session. Clones share the same storage slot.
#[derive(Clone)]
pub struct SessionCache {
    storage: Rc<dyn Storage>,
    key: String,
}

impl SessionCache {
    pub fn new(storage: Rc<dyn Storage>) -> Self {
        Self::with_key(storage, DEFAULT_SESSION_KEY)
    }

    pub fn with_key(storage: Rc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Load the cached session.
    ///
    /// A missing, unreadable or malformed record is reported as no session.
    pub fn load(&self) -> Option<Session> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(slot = %self.key, "no cached session");
                return None;
            }
            Err(e) => {
                warn!(slot = %self.key, error = %e, "session storage unavailable");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(slot = %self.key, error = %e, "ignoring malformed cached session");
                None
            }
        }
    }

    /// Overwrite the cached session.
    pub fn save(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::StorageUnavailable,
                "failed to serialize session",
                e,
            )
        })?;
        self.storage.set(&self.key, &raw)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
