//! Module configuration parsed from the host framework's argument list.
//!
//! The host framework hands every login module a list of `key=value` strings
//! from its configuration line. Three keys are understood here:
//!
//! - `kdehome=<dir>`: per-user settings directory, relative to the user's
//!   home (default: `.kde`)
//! - `kwalletd=<path>`: wallet daemon executable (default: `/usr/bin/kwalletd`)
//! - `socketPath=<dir>`: directory for per-user rendezvous sockets
//!   (default: `/tmp/`)
//!
//! Parsing is total: unknown keys are logged and ignored, and a missing key
//! falls back to its default, so a configuration line can never fail the
//! module. The parsed [`ModuleConfig`] is built once per invocation and passed
//! by reference; there is no process-global configuration state.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Default per-user settings directory, relative to the user's home.
pub const DEFAULT_KDEHOME: &str = ".kde";

/// Default wallet daemon executable.
pub const DEFAULT_KWALLETD: &str = "/usr/bin/kwalletd";

/// Default directory for per-user rendezvous sockets.
pub const DEFAULT_SOCKET_DIR: &str = "/tmp/";

/// Configuration for one module invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Per-user settings directory, relative to the target user's home.
    pub kdehome: PathBuf,
    /// Wallet daemon executable to launch.
    pub kwalletd: PathBuf,
    /// Directory the rendezvous socket is created in.
    pub socket_dir: PathBuf,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            kdehome: PathBuf::from(DEFAULT_KDEHOME),
            kwalletd: PathBuf::from(DEFAULT_KWALLETD),
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }
}

impl ModuleConfig {
    /// Parse a module argument list.
    ///
    /// Later occurrences of a key override earlier ones. Arguments that are
    /// not one of the known `key=value` forms are logged at warn level and
    /// otherwise ignored.
    pub fn from_args<'a, I>(args: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = Self::default();
        for arg in args {
            if let Some(value) = arg.strip_prefix("kdehome=") {
                config.kdehome = PathBuf::from(value);
            } else if let Some(value) = arg.strip_prefix("kwalletd=") {
                config.kwalletd = PathBuf::from(value);
            } else if let Some(value) = arg.strip_prefix("socketPath=") {
                config.socket_dir = PathBuf::from(value);
            } else {
                warn!(argument = %arg, "ignoring unrecognized module argument");
            }
        }
        config
    }

    /// Path of the persisted salt file for `home`, the target user's home
    /// directory.
    pub fn salt_path(&self, home: &Path) -> PathBuf {
        home.join(&self.kdehome)
            .join("share/apps/kwallet/kdewallet.salt")
    }

    /// Path of the rendezvous socket for `username`.
    pub fn socket_path(&self, username: &str) -> PathBuf {
        self.socket_dir.join(format!("{username}.socket"))
    }
}
