//! Mock host session for testing.
//!
//! This module provides a configurable mock implementation of [`HostSession`]
//! that can be used in tests without a login stack. It scripts the account,
//! the captured token, the conversation reply and the session environment,
//! and tracks how often it was prompted.

use std::collections::HashMap;

use secrecy::SecretString;

use kwallet_pam_core::host::{HostError, HostSession};
use kwallet_pam_core::session::AttemptState;
use kwallet_pam_core::user::TargetUser;

/// A scripted login attempt.
///
/// # Example
///
/// ```
/// use kwallet_pam::mock::MockSession;
/// use kwallet_pam_core::{HostSession, TargetUser};
///
/// let user = TargetUser::current().expect("process user");
/// let mut session = MockSession::with_prompt(user, "hunter2");
///
/// session.set_env("PAM_KWALLET_LOGIN", "/tmp/x.socket").unwrap();
/// assert_eq!(
///     session.env("PAM_KWALLET_LOGIN").as_deref(),
///     Some("/tmp/x.socket")
/// );
/// ```
pub struct MockSession {
    user: TargetUser,
    auth_token: Option<SecretString>,
    /// Conversation reply, or `None` to simulate a cancelled prompt.
    prompt_response: Option<SecretString>,
    prompt_calls: usize,
    store_calls: usize,
    fail_env: bool,
    env: HashMap<String, String>,
    attempt: AttemptState,
}

impl MockSession {
    /// A session with no captured token and a conversation that cancels.
    pub fn new(user: TargetUser) -> Self {
        Self {
            user,
            auth_token: None,
            prompt_response: None,
            prompt_calls: 0,
            store_calls: 0,
            fail_env: false,
            env: HashMap::new(),
            attempt: AttemptState::new(),
        }
    }

    /// A session where an earlier stack module already captured the token.
    pub fn with_auth_token(user: TargetUser, token: impl Into<String>) -> Self {
        let mut session = Self::new(user);
        session.auth_token = Some(SecretString::from(token.into()));
        session
    }

    /// A session with no captured token whose conversation replies with
    /// `password`.
    pub fn with_prompt(user: TargetUser, password: impl Into<String>) -> Self {
        let mut session = Self::new(user);
        session.prompt_response = Some(SecretString::from(password.into()));
        session
    }

    /// Pre-set a session environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Make every `set_env` call fail.
    pub fn with_failing_env(mut self) -> Self {
        self.fail_env = true;
        self
    }

    /// Number of times the conversation was prompted.
    pub fn prompt_calls(&self) -> usize {
        self.prompt_calls
    }

    /// Number of times a token was stored back into the session.
    pub fn store_calls(&self) -> usize {
        self.store_calls
    }
}

impl HostSession for MockSession {
    fn target_user(&self) -> Result<TargetUser, HostError> {
        Ok(self.user.clone())
    }

    fn auth_token(&self) -> Result<Option<SecretString>, HostError> {
        Ok(self.auth_token.clone())
    }

    fn store_auth_token(&mut self, token: SecretString) -> Result<(), HostError> {
        // Like the real stack item: later reads observe the stored token.
        self.auth_token = Some(token);
        self.store_calls += 1;
        Ok(())
    }

    fn prompt_hidden(&mut self, _message: &str) -> Result<SecretString, HostError> {
        self.prompt_calls += 1;
        self.prompt_response
            .clone()
            .ok_or(HostError::PromptCancelled)
    }

    fn env(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn set_env(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        if self.fail_env {
            return Err(HostError::Env {
                name: name.to_owned(),
                reason: "scripted failure".to_owned(),
            });
        }
        self.env.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn attempt(&mut self) -> &mut AttemptState {
        &mut self.attempt
    }
}
