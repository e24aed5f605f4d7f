//! Per-attempt state shared between the lifecycle hooks.
//!
//! Authentication and session-open fire as separate hook invocations, in an
//! order the host framework does not fix. [`AttemptState`] is the single
//! value they coordinate through: authentication stashes the derived key,
//! session-open records that a session exists, and whichever hook observes
//! both conditions takes the key out and launches the daemon.
//!
//! Taking the key is destructive, so one attempt can never produce two
//! launches: the second taker finds the slot empty.

use crate::secret::WalletKey;

/// Cross-hook state for a single login attempt.
#[derive(Debug, Default)]
pub struct AttemptState {
    wallet_key: Option<WalletKey>,
    session_opened: bool,
}

impl AttemptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the derived wallet key until a session is ready for it.
    ///
    /// A previously stashed key is dropped, which wipes it.
    pub fn stash_key(&mut self, key: WalletKey) {
        self.wallet_key = Some(key);
    }

    /// Take the key out for the daemon handoff, leaving the slot empty.
    pub fn take_key(&mut self) -> Option<WalletKey> {
        self.wallet_key.take()
    }

    /// Whether a derived key is currently stashed.
    pub fn has_key(&self) -> bool {
        self.wallet_key.is_some()
    }

    /// Record that the session-open hook has fired for this attempt.
    pub fn mark_session_opened(&mut self) {
        self.session_opened = true;
    }

    pub fn session_opened(&self) -> bool {
        self.session_opened
    }
}
