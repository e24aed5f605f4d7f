//! The host-framework boundary.
//!
//! Everything the lifecycle hooks need from the surrounding login stack comes
//! through [`HostSession`]:
//! - the account being authenticated
//! - the captured authentication token, or a conversation prompt to ask for one
//! - the session environment
//! - per-attempt storage ([`AttemptState`])
//!
//! Production adapters wrap the framework's module handle; tests use a mock
//! session. The hooks themselves never touch the framework directly, which is
//! what keeps the whole bridge testable as a plain library.
//!
//! Hook invocations for one attempt are sequential, so implementations are
//! not required to be `Send` or `Sync`.

use secrecy::SecretString;
use thiserror::Error;

use crate::session::AttemptState;
use crate::user::TargetUser;

/// Environment variable the rendezvous socket path is published under.
///
/// Its presence doubles as the skip marker: a hook that finds it set knows an
/// earlier invocation in this session already did the work.
pub const SOCKET_ENV_VAR: &str = "PAM_KWALLET_LOGIN";

/// Outcome a hook reports back to the host framework.
///
/// There is no failure member. Anything that goes wrong maps to
/// [`HookStatus::Ignore`], telling the host to proceed as if the module were
/// not configured at all; login is never blocked over the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// The hook did its part (or correctly did nothing).
    Success,
    /// The hook could not do its part; ignore this module.
    Ignore,
}

impl std::fmt::Display for HookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookStatus::Success => write!(f, "success"),
            HookStatus::Ignore => write!(f, "ignore"),
        }
    }
}

/// Error type for host session operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The login account could not be obtained or resolved.
    #[error("could not resolve the login account: {0}")]
    User(String),

    /// The captured authentication token could not be read.
    #[error("could not read the authentication token: {0}")]
    AuthToken(String),

    /// The conversation prompt failed.
    #[error("conversation prompt failed: {0}")]
    Prompt(String),

    /// User cancelled the prompt.
    #[error("prompt cancelled by user")]
    PromptCancelled,

    /// A variable could not be published into the session environment.
    #[error("could not publish {name} into the session environment: {reason}")]
    Env { name: String, reason: String },
}

/// One login attempt, as seen through the host framework.
pub trait HostSession {
    /// The account this attempt authenticates, resolved against the user
    /// database.
    fn target_user(&self) -> Result<TargetUser, HostError>;

    /// The authentication token captured earlier in the stack, if any.
    fn auth_token(&self) -> Result<Option<SecretString>, HostError>;

    /// Store a freshly prompted token so modules later in the stack observe
    /// it.
    fn store_auth_token(&mut self, token: SecretString) -> Result<(), HostError>;

    /// Ask the user for a secret through the host conversation, echo off.
    fn prompt_hidden(&mut self, message: &str) -> Result<SecretString, HostError>;

    /// Read a session environment variable.
    ///
    /// Implementations consult the framework's own environment first and fall
    /// back to the process environment, matching how display managers and
    /// text logins differ in where they put variables.
    fn env(&self, name: &str) -> Option<String>;

    /// Publish a variable to the session environment.
    ///
    /// Implementations publish to both the framework environment and the
    /// process environment, so the variable reaches session children no
    /// matter which one the session setup propagates.
    fn set_env(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    /// This attempt's cross-hook state.
    fn attempt(&mut self) -> &mut AttemptState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_status_display() {
        assert_eq!(HookStatus::Success.to_string(), "success");
        assert_eq!(HookStatus::Ignore.to_string(), "ignore");
    }

    #[test]
    fn host_error_display() {
        assert_eq!(
            HostError::PromptCancelled.to_string(),
            "prompt cancelled by user"
        );
        assert_eq!(
            HostError::Env {
                name: "PAM_KWALLET_LOGIN".into(),
                reason: "out of memory".into(),
            }
            .to_string(),
            "could not publish PAM_KWALLET_LOGIN into the session environment: out of memory"
        );
    }
}
