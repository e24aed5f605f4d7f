//! Core building blocks for the KWallet login bridge.
//!
//! This crate holds everything the lifecycle hooks need that is independent
//! of the host login framework: configuration, account resolution, salt
//! persistence, key derivation, secret hygiene, and the per-attempt state the
//! hooks coordinate through. Keeping it framework-free means:
//!
//! - The key-handling code can be audited and unit-tested on its own
//! - Hooks are exercised against a mock session instead of a login stack
//!
//! # Modules
//!
//! - [`config`]: `ModuleConfig` parsed from the host's `key=value` arguments
//! - [`user`]: `TargetUser` resolved from the system user database
//! - [`kdf`]: persisted per-user salt and PBKDF2-HMAC-SHA-512 key derivation
//! - [`secret`]: the memory-locked `WalletKey`
//! - [`wipe`]: volatile overwrite of raw secret buffers
//! - [`session`]: `AttemptState` shared between the lifecycle hooks
//! - [`host`]: the `HostSession` boundary trait and hook status vocabulary
//!
//! # Example
//!
//! ```
//! use kwallet_pam_core::config::ModuleConfig;
//! use kwallet_pam_core::kdf::{derive_key, Salt, SALT_SIZE};
//! use secrecy::SecretString;
//!
//! let config = ModuleConfig::from_args(["kdehome=.kde4"]);
//! assert!(config.salt_path("/home/joe".as_ref()).starts_with("/home/joe/.kde4"));
//!
//! // Same passphrase and salt always derive the same wallet key.
//! let salt = Salt::from_bytes([0x24; SALT_SIZE]);
//! let key = derive_key(&SecretString::from("hunter2"), &salt);
//! let again = derive_key(&SecretString::from("hunter2"), &salt);
//! assert_eq!(key.as_bytes(), again.as_bytes());
//! ```

pub mod config;
pub mod host;
pub mod kdf;
pub mod secret;
pub mod session;
pub mod user;
pub mod wipe;

// Re-export commonly used types at the crate root for convenience
pub use config::ModuleConfig;
pub use host::{HookStatus, HostError, HostSession, SOCKET_ENV_VAR};
pub use kdf::{derive_key, load_or_create_salt, KdfError, Salt, PBKDF2_ITERATIONS, SALT_SIZE};
pub use secret::{WalletKey, KEY_SIZE};
pub use session::AttemptState;
pub use user::{TargetUser, UserError};
pub use wipe::{wipe_bytes, wipe_string};
