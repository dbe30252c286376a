//! File sealing/unlocking operations
//!
//! This module provides the file-level operations behind the CLI, and a
//! JSON-file-backed [`Storage`] so that a cached session survives between runs
//! the way it survives page loads in a browser.

use crate::config::UnlockConfig;
use crate::controller::{
    ContentReveal, PassphraseForm, SubmitHandler, UnlockController, UnlockState,
};
use crate::envelope::Envelope;
use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use crate::inline;
use crate::integrity;
use crate::passphrase::PassphraseReader;
use crate::pipeline::Pipeline;
use crate::seal;
use crate::session::{SessionCache, Storage};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Seal an HTML file with a passphrase
///
/// Reads plaintext from `input_path`, seals it using a passphrase from
/// `passphrase_reader`, and writes the envelope text to `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn seal_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
    config: &UnlockConfig,
) -> Result<()> {
    let plaintext = read_utf8(input_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let envelope = seal::seal(&passphrase, &plaintext, config.kdf)
        .map_err(|e| e.with_context("sealing failed"))?;
    write_file_secure(output_path, envelope.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    info!(path = %output_path.display(), "sealed envelope written");
    Ok(())
}

/// Seal the private element of an HTML page in place
///
/// Reads the page at `input_path`, seals the first `<div>` or `<article>`
/// carrying `class`, and writes the page with a placeholder holding the
/// envelope to `output_path` (mode 0o600 on Unix).
pub fn seal_file_inline(
    input_path: &Path,
    output_path: &Path,
    class: &str,
    passphrase_reader: &mut dyn PassphraseReader,
    config: &UnlockConfig,
) -> Result<()> {
    let html = read_utf8(input_path)?;
    // Fail on a page with nothing to seal before asking for a passphrase.
    inline::find_private_element(&html, class)
        .map_err(|e| e.with_context(format!("cannot seal {}", input_path.display())))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let page = inline::seal_inline(&html, &passphrase, config.kdf, class)
        .map_err(|e| e.with_context("sealing failed"))?;
    write_file_secure(output_path, page.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    info!(path = %output_path.display(), class, "sealed page written");
    Ok(())
}

/// Unlock an envelope file and write the revealed HTML
///
/// The input may be a bare envelope or a page sealed by
/// [`seal_file_inline`], in which case the first placeholder is unlocked.
///
/// Runs the unlock controller: a session cached in `session` is tried first,
/// and only if it does not open the envelope are passphrases read from
/// `passphrase_reader`, up to `attempts` times. Rejected passphrases are
/// retried silently; running out of attempts is reported as
/// `VerificationFailed`. An envelope that verifies but does not decrypt
/// stops the prompting at once with the `DecryptionFailure`.
pub fn unlock_file(
    input_path: &Path,
    output_path: &Path,
    session: SessionCache,
    passphrase_reader: &mut dyn PassphraseReader,
    config: &UnlockConfig,
    attempts: u32,
) -> Result<()> {
    let raw = read_envelope(input_path)?;

    let form = PromptForm::default();
    let reveal = CapturedReveal::default();
    let controller = UnlockController::with_pipeline(
        &raw,
        session,
        Box::new(form.clone()),
        Box::new(reveal.clone()),
        Pipeline::new(config.kdf),
    )?;

    let mut state = controller.unlock();
    let mut remaining = attempts;
    loop {
        if let Some(defect) = controller.take_defect() {
            return Err(defect.with_context("envelope verified but could not be decrypted"));
        }
        if state != UnlockState::AwaitingInput || remaining == 0 {
            break;
        }
        let passphrase = passphrase_reader.read_passphrase()?;
        form.submit(&passphrase);
        remaining -= 1;
        state = controller.state();
    }

    let Some(plaintext) = reveal.take() else {
        return Err(PagelockError::with_kind(
            ErrorCategory::User,
            ErrorKind::VerificationFailed,
            "passphrase did not unlock the envelope",
        ));
    };

    write_file_secure(output_path, plaintext.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    Ok(())
}

/// Check whether a passphrase from `passphrase_reader` verifies against the
/// envelope at `input_path`, without decrypting it.
pub fn verify_file(
    input_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<bool> {
    let raw = read_envelope(input_path)?;
    let envelope =
        Envelope::parse(&raw).map_err(|e| e.with_context("failed to parse envelope"))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    Ok(integrity::verify(&envelope, &passphrase))
}

/// Form that hands submissions to whatever handler the controller bound.
#[derive(Clone, Default)]
struct PromptForm {
    handler: Rc<RefCell<Option<SubmitHandler>>>,
}

impl PromptForm {
    fn submit(&self, passphrase: &str) {
        if let Some(handler) = self.handler.borrow_mut().as_mut() {
            handler(passphrase);
        }
    }
}

impl PassphraseForm for PromptForm {
    fn show(&mut self) {
        debug!("passphrase required");
    }

    fn on_submit(&mut self, handler: SubmitHandler) {
        *self.handler.borrow_mut() = Some(handler);
    }
}

#[derive(Clone, Default)]
struct CapturedReveal {
    plaintext: Rc<RefCell<Option<Zeroizing<String>>>>,
}

impl CapturedReveal {
    fn take(&self) -> Option<Zeroizing<String>> {
        self.plaintext.borrow_mut().take()
    }
}

impl ContentReveal for CapturedReveal {
    fn replace(&mut self, plaintext_html: &str) {
        *self.plaintext.borrow_mut() = Some(Zeroizing::new(plaintext_html.to_string()));
    }
}

/// Key-value storage persisted as a JSON object in a single file.
///
/// A missing file is an empty store. Writes replace the file atomically.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file contents, or `None` if the file does not exist yet.
    fn read_data(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::StorageUnavailable,
                format!("failed to read {}", self.path.display()),
                e,
            )),
        }
    }

    fn parse_entries(&self, data: &[u8]) -> Result<BTreeMap<String, String>> {
        serde_json::from_slice(data).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::StorageUnavailable,
                format!("{} is not a JSON object of strings", self.path.display()),
                e,
            )
        })
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.read_data()? {
            Some(data) => Ok(self.parse_entries(&data)?.remove(key)),
            None => Ok(None),
        }
    }

    /// Unparsable contents are replaced. Read errors are returned as is and
    /// leave the file untouched.
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = match self.read_data()? {
            Some(data) => self.parse_entries(&data).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unparsable storage file");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        entries.insert(key.to_string(), value.to_string());

        let data = serde_json::to_vec(&entries).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::StorageUnavailable,
                "failed to serialize storage",
                e,
            )
        })?;
        write_file_atomic(&self.path, &data).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::StorageUnavailable,
                format!("failed to write {}", self.path.display()),
                e,
            )
        })
    }
}

fn read_utf8(path: &Path) -> Result<String> {
    let data = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(data).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not valid UTF-8", path.display()),
            e,
        )
    })
}

fn read_envelope(path: &Path) -> Result<String> {
    let text = read_utf8(path)?;
    match inline::extract_envelope(&text)? {
        Some(envelope) => Ok(envelope.to_string()),
        None => Ok(text.trim().to_string()),
    }
}

/// Atomically replace `path` with `contents` (tempfile + fsync + rename).
///
/// Either the old file or the new file exists afterwards, never a partial one.
fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to create tempfile",
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file.flush().map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to flush tempfile",
            e,
        )
    })?;
    temp_file.as_file().sync_all().map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })?;

    // NamedTempFile is created with mode 0o600 on Unix, and the rename keeps it.
    temp_file.persist(path).map_err(|e| {
        PagelockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

/// Write file with secure permissions (0o600 on Unix)
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| {
                PagelockError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to open {}", path.display()),
                    e,
                )
            })?;

        file.write_all(contents).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| {
            PagelockError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }
}

fn read_error(path: &Path, err: io::Error) -> PagelockError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    PagelockError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
