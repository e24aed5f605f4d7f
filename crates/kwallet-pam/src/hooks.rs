//! Lifecycle hook entry points.
//!
//! Two of the host framework's hooks carry the real work: authentication
//! derives the wallet key from the login passphrase, session-open tells us a
//! session exists for the daemon to live in. The host does not guarantee
//! their order, so both run the same rendezvous logic: record what you
//! learned, and if the attempt state now holds both a key and an open
//! session, launch the daemon.
//!
//! The bridge is strictly non-essential. Whatever goes wrong before the
//! launch, the hook answers [`HookStatus::Ignore`] so the host treats the
//! module as absent; launch failures are logged and the hook still reports
//! success. A login is never blocked over a wallet.

use tracing::{debug, warn};

use kwallet_pam_core::config::ModuleConfig;
use kwallet_pam_core::host::{HookStatus, HostSession, SOCKET_ENV_VAR};
use kwallet_pam_core::kdf::{derive_key, load_or_create_salt};
use kwallet_pam_core::user::TargetUser;

use crate::launcher::launch_walletd;

/// Conversation message used when no token was captured for us.
const PASSWORD_PROMPT: &str = "Password: ";

/// Authentication hook: derive the wallet key and stash it on the attempt.
///
/// If the session-open hook already fired, the daemon is launched right
/// here; otherwise the key waits on the attempt state.
pub fn authenticate(session: &mut dyn HostSession, config: &ModuleConfig) -> HookStatus {
    if skip_marker_present(session) {
        debug!("wallet already provisioned for this session, nothing to do");
        return HookStatus::Success;
    }

    let user = match session.target_user() {
        Ok(user) => user,
        Err(err) => {
            warn!(error = %err, "cannot resolve the login account");
            return HookStatus::Ignore;
        }
    };
    debug!(user = %user.name, "authenticate");

    let token = match session.auth_token() {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "cannot read the authentication token");
            return HookStatus::Ignore;
        }
    };

    if token.is_none() {
        // Nothing captured earlier in the stack; ask ourselves and store the
        // reply so modules after us observe it too.
        debug!(user = %user.name, "no authentication token captured, prompting");
        let prompted = match session.prompt_hidden(PASSWORD_PROMPT) {
            Ok(prompted) => prompted,
            Err(err) => {
                warn!(error = %err, "passphrase prompt failed");
                return HookStatus::Ignore;
            }
        };
        if let Err(err) = session.store_auth_token(prompted) {
            warn!(error = %err, "cannot store the prompted token");
            return HookStatus::Ignore;
        }
    }

    // Read the token back through the session either way; the stored item is
    // what the rest of the stack sees, so it is what the key derives from.
    let passphrase = match session.auth_token() {
        Ok(Some(passphrase)) => passphrase,
        Ok(None) => {
            warn!("authentication token missing right after storing it");
            return HookStatus::Ignore;
        }
        Err(err) => {
            warn!(error = %err, "cannot re-read the authentication token");
            return HookStatus::Ignore;
        }
    };

    let salt = match load_or_create_salt(config, &user) {
        Ok(salt) => salt,
        Err(err) => {
            warn!(error = %err, user = %user.name, "cannot obtain the wallet salt");
            return HookStatus::Ignore;
        }
    };

    let key = derive_key(&passphrase, &salt);
    drop(passphrase);
    session.attempt().stash_key(key);
    debug!(user = %user.name, "wallet key derived and stashed");

    if session.attempt().session_opened() {
        // Session-open beat us to it; the launch is ours to do.
        debug!(user = %user.name, "session already open, launching the wallet daemon now");
        launch_stashed(session, config, &user);
    }

    HookStatus::Success
}

/// Session-open hook: record that a session exists, and launch the daemon if
/// authentication already produced a key.
pub fn open_session(session: &mut dyn HostSession, config: &ModuleConfig) -> HookStatus {
    if skip_marker_present(session) {
        debug!("wallet already provisioned for this session, nothing to do");
        return HookStatus::Success;
    }

    session.attempt().mark_session_opened();

    let user = match session.target_user() {
        Ok(user) => user,
        Err(err) => {
            warn!(error = %err, "cannot resolve the login account");
            return HookStatus::Ignore;
        }
    };
    debug!(user = %user.name, "open_session");

    if !session.attempt().has_key() {
        // Normal with display managers that order session setup before
        // authentication finishes its part; the launch happens there.
        debug!(user = %user.name, "no wallet key yet, waiting for authentication");
        return HookStatus::Success;
    }

    launch_stashed(session, config, &user);
    HookStatus::Success
}

/// Session-close hook. The daemon belongs to the session, not to us; nothing
/// to tear down here.
pub fn close_session(_session: &mut dyn HostSession) -> HookStatus {
    debug!("close_session");
    HookStatus::Success
}

/// Credential-establishment hook. Nothing to do.
pub fn setcred(_session: &mut dyn HostSession) -> HookStatus {
    debug!("setcred");
    HookStatus::Success
}

/// Token-change hook. Re-keying the wallet after a passphrase change is the
/// wallet's own interactive flow.
pub fn chauthtok(_session: &mut dyn HostSession) -> HookStatus {
    debug!("chauthtok");
    HookStatus::Success
}

/// Whether an earlier invocation in this session already provisioned the
/// wallet. The socket path variable doubles as the marker.
fn skip_marker_present(session: &dyn HostSession) -> bool {
    session.env(SOCKET_ENV_VAR).is_some()
}

/// Take the stashed key, if any, and hand it to the launcher.
///
/// Taking is destructive, so a second caller finds the slot empty and does
/// nothing; that is what makes the launch once-per-attempt. Launch failures
/// are logged and swallowed.
fn launch_stashed(session: &mut dyn HostSession, config: &ModuleConfig, user: &TargetUser) {
    let Some(key) = session.attempt().take_key() else {
        return;
    };
    if let Err(err) = launch_walletd(session, config, user, key) {
        warn!(error = %err, user = %user.name, "wallet daemon launch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use nix::unistd::{Gid, Uid};
    use tempfile::TempDir;

    use kwallet_pam_core::host::HostSession;
    use crate::mock::MockSession;

    fn test_user(home: &Path) -> TargetUser {
        TargetUser {
            name: "tester".to_owned(),
            uid: Uid::current(),
            gid: Gid::current(),
            home: home.to_owned(),
        }
    }

    /// Config whose salt and socket both land in `dir`, with a daemon that
    /// exits immediately. Enough to drive both hooks end to end without a
    /// real wallet.
    fn test_config(dir: &Path) -> ModuleConfig {
        ModuleConfig::from_args([
            format!("socketPath={}", dir.display()).as_str(),
            "kwalletd=/bin/true",
        ])
    }

    #[test]
    fn authenticate_with_captured_token_stashes_a_key() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::with_auth_token(test_user(dir.path()), "hunter2");

        let status = authenticate(&mut session, &config);

        assert_eq!(status, HookStatus::Success);
        assert!(session.attempt().has_key());
        assert_eq!(session.prompt_calls(), 0);
        assert!(config.salt_path(dir.path()).exists());
    }

    #[test]
    fn authenticate_prompts_when_no_token_was_captured() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::with_prompt(test_user(dir.path()), "hunter2");

        let status = authenticate(&mut session, &config);

        assert_eq!(status, HookStatus::Success);
        assert_eq!(session.prompt_calls(), 1);
        assert_eq!(session.store_calls(), 1);
        assert!(session.attempt().has_key());
    }

    #[test]
    fn authenticate_without_any_passphrase_is_ignored() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::new(test_user(dir.path()));

        let status = authenticate(&mut session, &config);

        assert_eq!(status, HookStatus::Ignore);
        assert!(!session.attempt().has_key());
        assert!(!config.salt_path(dir.path()).exists());
    }

    #[test]
    fn authenticate_skips_on_the_session_marker() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::with_auth_token(test_user(dir.path()), "hunter2")
            .with_env(SOCKET_ENV_VAR, "/tmp/tester.socket");

        let status = authenticate(&mut session, &config);

        assert_eq!(status, HookStatus::Success);
        assert!(!session.attempt().has_key());
        assert!(!config.salt_path(dir.path()).exists());
    }

    #[test]
    fn open_session_skips_on_the_session_marker() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::new(test_user(dir.path()))
            .with_env(SOCKET_ENV_VAR, "/tmp/tester.socket");

        let status = open_session(&mut session, &config);

        assert_eq!(status, HookStatus::Success);
        assert!(!session.attempt().session_opened());
    }

    #[test]
    fn open_session_without_a_key_waits_for_authentication() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::new(test_user(dir.path()));

        let status = open_session(&mut session, &config);

        assert_eq!(status, HookStatus::Success);
        assert!(session.attempt().session_opened());
        assert!(session.env(SOCKET_ENV_VAR).is_none());
    }

    #[test]
    fn authenticate_then_open_session_launches_once() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let user = test_user(dir.path());
        let mut session = MockSession::with_auth_token(user.clone(), "hunter2");

        assert_eq!(authenticate(&mut session, &config), HookStatus::Success);
        assert!(session.attempt().has_key());

        assert_eq!(open_session(&mut session, &config), HookStatus::Success);

        let socket_path = config.socket_path(&user.name);
        assert_eq!(
            session.env(SOCKET_ENV_VAR).as_deref(),
            Some(socket_path.to_string_lossy().as_ref())
        );
        assert!(socket_path.exists());
        assert!(!session.attempt().has_key(), "key was consumed by the launch");
    }

    #[test]
    fn open_session_then_authenticate_launches_inline() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let user = test_user(dir.path());
        let mut session = MockSession::with_auth_token(user.clone(), "hunter2");

        assert_eq!(open_session(&mut session, &config), HookStatus::Success);
        assert!(session.env(SOCKET_ENV_VAR).is_none());

        assert_eq!(authenticate(&mut session, &config), HookStatus::Success);

        assert!(session.env(SOCKET_ENV_VAR).is_some());
        assert!(config.socket_path(&user.name).exists());
        assert!(!session.attempt().has_key());
    }

    #[test]
    fn relaunch_is_short_circuited_by_the_published_marker() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session = MockSession::with_auth_token(test_user(dir.path()), "hunter2");

        authenticate(&mut session, &config);
        open_session(&mut session, &config);
        let published = session.env(SOCKET_ENV_VAR);
        assert!(published.is_some());

        // The launch published the marker into the session, so both hooks
        // now no-op without prompting or deriving again.
        assert_eq!(open_session(&mut session, &config), HookStatus::Success);
        assert_eq!(authenticate(&mut session, &config), HookStatus::Success);
        assert_eq!(session.prompt_calls(), 0);
        assert_eq!(session.env(SOCKET_ENV_VAR), published);
    }

    #[test]
    fn truncated_salt_aborts_authentication() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let user = test_user(dir.path());

        let salt_path = config.salt_path(&user.home);
        std::fs::create_dir_all(salt_path.parent().unwrap()).unwrap();
        std::fs::write(&salt_path, [0u8; 10]).unwrap();

        let mut session = MockSession::with_auth_token(user, "hunter2");
        let status = authenticate(&mut session, &config);

        assert_eq!(status, HookStatus::Ignore);
        assert!(!session.attempt().has_key());
    }

    #[test]
    fn launch_failure_still_completes_the_hook() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let mut session =
            MockSession::with_auth_token(test_user(dir.path()), "hunter2").with_failing_env();

        assert_eq!(authenticate(&mut session, &config), HookStatus::Success);
        assert_eq!(open_session(&mut session, &config), HookStatus::Success);

        // The launch died publishing the socket path; the key is still
        // consumed and the login proceeds.
        assert!(!session.attempt().has_key());
    }

    #[test]
    fn remaining_hooks_are_quiet_successes() {
        let dir = TempDir::new().unwrap();
        let mut session = MockSession::new(test_user(dir.path()));

        assert_eq!(close_session(&mut session), HookStatus::Success);
        assert_eq!(setcred(&mut session), HookStatus::Success);
        assert_eq!(chauthtok(&mut session), HookStatus::Success);
    }
}
