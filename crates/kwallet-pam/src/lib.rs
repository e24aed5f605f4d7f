//! Wallet provisioning for login sessions.
//!
//! This crate is the host-facing half of the kwallet PAM bridge: the
//! lifecycle hooks a PAM shim dispatches into, and the launcher that hands
//! the derived wallet key to the wallet daemon over a private pipe while
//! publishing the session rendezvous socket.
//!
//! Key derivation, attempt state and the host abstraction live in
//! `kwallet-pam-core`; this crate supplies the process-level pieces that
//! spawn and feed the daemon.
//!
//! Note: the hooks never fail a login. Anything that goes wrong before the
//! daemon launch downgrades the module to "ignore me"; anything after is
//! logged and swallowed.

pub mod hooks;
pub mod launcher;
pub mod mock;

// Re-export main components
pub use hooks::{authenticate, chauthtok, close_session, open_session, setcred};
pub use launcher::{launch_walletd, LaunchError};
pub use mock::MockSession;
