//! Unlock controller for one locked block
//!
//! The controller drives the reveal flow:
//!
//! ```text
//! Locked --cached session opens envelope--> Unlocked
//! Locked --no session / session rejected--> AwaitingInput
//! AwaitingInput --submit, opens envelope--> Unlocked (session saved)
//! AwaitingInput --submit, rejected--------> AwaitingInput (silent)
//! ```
//!
//! Rendering is reached only through [`PassphraseForm`] and [`ContentReveal`],
//! and the session through a shared [`SessionCache`]. One controller is created
//! per block; blocks on the same page share the cache.

use crate::envelope::Envelope;
use crate::error::{ErrorKind, PagelockError, Result};
use crate::pipeline::Pipeline;
use crate::session::{Session, SessionCache};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// Callback invoked by the form with the submitted passphrase.
pub type SubmitHandler = Box<dyn FnMut(&str)>;

/// The passphrase form owned by the host page.
pub trait PassphraseForm {
    fn show(&mut self);
    fn on_submit(&mut self, handler: SubmitHandler);
}

/// Swaps the locked element for the decrypted HTML.
pub trait ContentReveal {
    fn replace(&mut self, plaintext_html: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    AwaitingInput,
    Unlocked,
}

pub struct UnlockController {
    block: Rc<RefCell<Block>>,
}

struct Block {
    envelope: Envelope,
    session: SessionCache,
    pipeline: Pipeline,
    form: Box<dyn PassphraseForm>,
    reveal: Box<dyn ContentReveal>,
    state: UnlockState,
    submit_bound: bool,
    defect: Option<PagelockError>,
}

impl UnlockController {
    /// Create a controller for the block whose envelope text is `raw_envelope`.
    ///
    /// A malformed envelope is the only error surfaced to the host: such a
    /// block can never be revealed and no form should be shown for it.
    pub fn new(
        raw_envelope: &str,
        session: SessionCache,
        form: Box<dyn PassphraseForm>,
        reveal: Box<dyn ContentReveal>,
    ) -> Result<Self> {
        Self::with_pipeline(raw_envelope, session, form, reveal, Pipeline::default())
    }

    pub fn with_pipeline(
        raw_envelope: &str,
        session: SessionCache,
        form: Box<dyn PassphraseForm>,
        reveal: Box<dyn ContentReveal>,
        pipeline: Pipeline,
    ) -> Result<Self> {
        let envelope = Envelope::parse(raw_envelope)
            .map_err(|e| e.with_context("locked block cannot be unlocked"))?;

        Ok(Self {
            block: Rc::new(RefCell::new(Block {
                envelope,
                session,
                pipeline,
                form,
                reveal,
                state: UnlockState::Locked,
                submit_bound: false,
                defect: None,
            })),
        })
    }

    /// Entry point: try the cached session, otherwise show the form.
    ///
    /// Safe to call repeatedly. The submit handler is bound at most once per
    /// controller, and an unlocked block stays unlocked.
    pub fn unlock(&self) -> UnlockState {
        let mut block = self.block.borrow_mut();
        if block.state == UnlockState::Unlocked {
            return UnlockState::Unlocked;
        }

        if block.try_cached_session() {
            return block.state;
        }

        if !block.submit_bound {
            let weak = Rc::downgrade(&self.block);
            block.form.on_submit(submit_handler(weak));
            block.submit_bound = true;
        }

        block.state = UnlockState::AwaitingInput;
        block.form.show();
        debug!("awaiting passphrase");
        block.state
    }

    pub fn state(&self) -> UnlockState {
        self.block.borrow().state
    }

    /// Take the most recent `DecryptionFailure`, if any.
    ///
    /// Such a failure means the envelope verified but could not be decrypted.
    /// It is not a passphrase problem, so hosts should stop prompting and
    /// report it instead.
    pub fn take_defect(&self) -> Option<PagelockError> {
        self.block.borrow_mut().defect.take()
    }
}

fn submit_handler(block: Weak<RefCell<Block>>) -> SubmitHandler {
    Box::new(move |passphrase: &str| {
        let Some(block) = block.upgrade() else {
            debug!("submission for a dropped block ignored");
            return;
        };
        match block.try_borrow_mut() {
            Ok(mut block) => block.submit(passphrase),
            Err(_) => warn!("submission ignored while a previous one is still in progress"),
        };
    })
}

impl Block {
    fn try_cached_session(&mut self) -> bool {
        let Some(session) = self.session.load() else {
            return false;
        };

        match self.open(session.passphrase()) {
            Some(plaintext) => {
                debug!("unlocked from cached session");
                self.reveal(&plaintext);
                true
            }
            None => {
                debug!("cached session does not unlock this block");
                false
            }
        }
    }

    fn submit(&mut self, passphrase: &str) {
        if self.state != UnlockState::AwaitingInput {
            debug!(state = ?self.state, "ignoring submission");
            return;
        }

        // A rejected passphrase leaves the form in place with no message.
        let Some(plaintext) = self.open(passphrase) else {
            debug!("submitted passphrase rejected");
            return;
        };

        if let Err(e) = self.session.save(&Session::new(passphrase)) {
            warn!(error = %e, "failed to cache session");
        }
        self.reveal(&plaintext);
    }

    fn open(&mut self, passphrase: &str) -> Option<Zeroizing<String>> {
        match self.pipeline.open(&self.envelope, passphrase) {
            Ok(plaintext) => Some(Zeroizing::new(plaintext)),
            Err(e) => {
                if e.is(ErrorKind::DecryptionFailure) {
                    error!(error = %e, "envelope verified but did not decrypt");
                    self.defect = Some(e);
                }
                None
            }
        }
    }

    fn reveal(&mut self, plaintext: &str) {
        self.reveal.replace(plaintext);
        self.state = UnlockState::Unlocked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::KdfParams;
    use crate::seal;
    use crate::session::MemoryStorage;
    use std::cell::Cell;

    #[derive(Default)]
    struct FormProbe {
        shown: Cell<usize>,
        handlers: RefCell<Vec<SubmitHandler>>,
    }

    impl FormProbe {
        fn submit(&self, passphrase: &str) {
            let mut handlers = self.handlers.take();
            for handler in handlers.iter_mut() {
                handler(passphrase);
            }
            self.handlers.replace(handlers);
        }
    }

    struct Form(Rc<FormProbe>);

    impl PassphraseForm for Form {
        fn show(&mut self) {
            self.0.shown.set(self.0.shown.get() + 1);
        }

        fn on_submit(&mut self, handler: SubmitHandler) {
            self.0.handlers.borrow_mut().push(handler);
        }
    }

    struct Reveal(Rc<RefCell<Vec<String>>>);

    impl ContentReveal for Reveal {
        fn replace(&mut self, plaintext_html: &str) {
            self.0.borrow_mut().push(plaintext_html.to_string());
        }
    }

    struct Harness {
        controller: UnlockController,
        form: Rc<FormProbe>,
        revealed: Rc<RefCell<Vec<String>>>,
    }

    fn fast() -> KdfParams {
        KdfParams::new(16).unwrap()
    }

    fn harness(raw: &str, cache: &SessionCache) -> Harness {
        let form = Rc::new(FormProbe::default());
        let revealed = Rc::new(RefCell::new(Vec::new()));
        let controller = UnlockController::with_pipeline(
            raw,
            cache.clone(),
            Box::new(Form(form.clone())),
            Box::new(Reveal(revealed.clone())),
            Pipeline::new(fast()),
        )
        .unwrap();
        Harness {
            controller,
            form,
            revealed,
        }
    }

    #[test]
    fn test_first_visit_shows_form_then_unlocks() {
        let raw = seal::seal("pw", "<p>hi</p>", fast()).unwrap();
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let h = harness(&raw, &cache);

        assert_eq!(h.controller.state(), UnlockState::Locked);
        assert_eq!(h.controller.unlock(), UnlockState::AwaitingInput);
        assert_eq!(h.form.shown.get(), 1);

        h.form.submit("nope");
        assert_eq!(h.controller.state(), UnlockState::AwaitingInput);
        assert!(h.revealed.borrow().is_empty());
        assert!(cache.load().is_none());

        h.form.submit("pw");
        assert_eq!(h.controller.state(), UnlockState::Unlocked);
        assert_eq!(*h.revealed.borrow(), vec!["<p>hi</p>".to_string()]);
        assert_eq!(cache.load().unwrap().passphrase(), "pw");
    }

    #[test]
    fn test_submissions_after_unlock_are_ignored() {
        let raw = seal::seal("pw", "<p>hi</p>", fast()).unwrap();
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let h = harness(&raw, &cache);

        h.controller.unlock();
        h.form.submit("pw");
        h.form.submit("pw");
        assert_eq!(h.revealed.borrow().len(), 1);
        assert_eq!(h.controller.unlock(), UnlockState::Unlocked);
        assert_eq!(h.revealed.borrow().len(), 1);
    }

    #[test]
    fn test_submit_before_unlock_is_ignored() {
        let raw = seal::seal("pw", "<p>hi</p>", fast()).unwrap();
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let h = harness(&raw, &cache);

        // Nothing bound yet, so this reaches no handler at all.
        h.form.submit("pw");
        assert_eq!(h.controller.state(), UnlockState::Locked);
    }

    #[test]
    fn test_malformed_envelope_is_fatal() {
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let form = Rc::new(FormProbe::default());
        let result = UnlockController::new(
            "deadbeef",
            cache,
            Box::new(Form(form.clone())),
            Box::new(Reveal(Rc::new(RefCell::new(Vec::new())))),
        );

        let err = result.err().expect("expected malformed envelope error");
        assert_eq!(err.kind, Some(ErrorKind::MalformedEnvelope));
        assert_eq!(form.shown.get(), 0);
    }

    #[test]
    fn test_decryption_failure_is_recorded_as_defect() {
        let signed = format!("{}{}{}", "00".repeat(16), "11".repeat(16), "%%%");
        let mac = crate::integrity::compute_mac("pw", &signed).unwrap();
        let raw = format!("{}{}", hex::encode(mac), signed);
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let h = harness(&raw, &cache);

        h.controller.unlock();
        assert!(h.controller.take_defect().is_none());

        h.form.submit("wrong");
        assert!(h.controller.take_defect().is_none());

        h.form.submit("pw");
        assert_eq!(h.controller.state(), UnlockState::AwaitingInput);
        assert!(h.revealed.borrow().is_empty());
        assert!(cache.load().is_none());
        let defect = h.controller.take_defect().expect("expected a recorded defect");
        assert_eq!(defect.kind, Some(ErrorKind::DecryptionFailure));
        assert!(h.controller.take_defect().is_none());
    }

    #[test]
    fn test_dropped_controller_ignores_submission() {
        let raw = seal::seal("pw", "<p>hi</p>", fast()).unwrap();
        let cache = SessionCache::new(Rc::new(MemoryStorage::new()));
        let h = harness(&raw, &cache);
        h.controller.unlock();

        let form = h.form.clone();
        let revealed = h.revealed.clone();
        drop(h);

        form.submit("pw");
        assert!(revealed.borrow().is_empty());
    }
}
