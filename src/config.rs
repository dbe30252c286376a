//! Unlock configuration

use crate::kdf::KdfParams;

/// Storage slot that holds the cached session unless configured otherwise
pub const DEFAULT_SESSION_KEY: &str = "session";

/// Settings shared by every locked block on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockConfig {
    pub kdf: KdfParams,
    pub session_key: String,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }
}
