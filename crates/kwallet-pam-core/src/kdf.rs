//! Wallet key derivation.
//!
//! The wallet key is derived from the login passphrase with PBKDF2-HMAC-SHA-512
//! over a per-user salt that is created on first login and persisted under the
//! user's settings directory. The same passphrase and salt always yield the
//! same key; that determinism is what lets the wallet daemon re-open a vault
//! provisioned during an earlier session.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::chown;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha512;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModuleConfig;
use crate::secret::WalletKey;
use crate::user::TargetUser;

/// Size of the persisted salt in bytes.
pub const SALT_SIZE: usize = 56;

/// PBKDF2 iteration count.
///
/// Compatibility constant: every previously provisioned wallet was keyed with
/// this count, so changing it orphans existing vaults.
pub const PBKDF2_ITERATIONS: u32 = 50_000;

/// Errors from loading or creating the per-user salt.
#[derive(Debug, Error)]
pub enum KdfError {
    /// A directory on the way to the salt file could not be created.
    #[error("failed to create salt directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The salt file exists but could not be read.
    #[error("failed to read salt file {path:?}")]
    ReadSalt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The salt file holds fewer bytes than a salt.
    ///
    /// Re-salting implicitly would orphan the user's existing wallet, so a
    /// damaged salt file fails the derivation instead.
    #[error("salt file {path:?} is truncated ({len} of {SALT_SIZE} bytes)")]
    TruncatedSalt { path: PathBuf, len: usize },

    /// The salt file could not be written.
    #[error("failed to write salt file {path:?}")]
    WriteSalt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A per-user key derivation salt.
///
/// Not secret; it lives on disk next to the wallet. Its job is making the
/// derived key user- and installation-specific.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Wrap raw salt bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Salt {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt({SALT_SIZE} bytes)")
    }
}

/// Load the user's salt, creating and persisting a fresh one if none exists.
///
/// An absent or empty salt file means this is the user's first wallet login:
/// the directory hierarchy is created (each newly created directory handed to
/// the user), a random salt is written with mode 0600, and the file is
/// chowned to the user. An existing non-empty file is read; anything shorter
/// than a full salt is an error, extra trailing bytes are ignored.
pub fn load_or_create_salt(config: &ModuleConfig, user: &TargetUser) -> Result<Salt, KdfError> {
    let path = config.salt_path(&user.home);

    let needs_create = match fs::metadata(&path) {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    };

    if needs_create {
        create_salt(&path, user)
    } else {
        read_salt(&path)
    }
}

/// Derive the wallet key from the login passphrase and the user's salt.
///
/// The derived bytes are written directly into memory-locked storage; no
/// intermediate copy of the key exists.
pub fn derive_key(passphrase: &SecretString, salt: &Salt) -> WalletKey {
    let mut key = WalletKey::zeroed();
    pbkdf2_hmac::<Sha512>(
        passphrase.expose_secret().as_bytes(),
        salt.as_ref(),
        PBKDF2_ITERATIONS,
        key.as_mut_bytes(),
    );
    key
}

fn read_salt(path: &Path) -> Result<Salt, KdfError> {
    let bytes = fs::read(path).map_err(|source| KdfError::ReadSalt {
        path: path.to_owned(),
        source,
    })?;

    if bytes.len() < SALT_SIZE {
        return Err(KdfError::TruncatedSalt {
            path: path.to_owned(),
            len: bytes.len(),
        });
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&bytes[..SALT_SIZE]);
    Ok(Salt(salt))
}

fn create_salt(path: &Path, user: &TargetUser) -> Result<Salt, KdfError> {
    debug!(path = %path.display(), user = %user.name, "creating wallet salt");

    if let Some(dir) = path.parent() {
        create_tree_owned(dir, user)?;
    }

    // A leftover empty or unreadable file is replaced wholesale.
    let _ = fs::remove_file(path);

    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .and_then(|mut file| file.write_all(&salt))
        .map_err(|source| KdfError::WriteSalt {
            path: path.to_owned(),
            source,
        })?;

    if let Err(err) = chown(path, Some(user.uid), Some(user.gid)) {
        warn!(
            path = %path.display(),
            error = %err,
            "could not hand salt file to user"
        );
    }

    Ok(Salt(salt))
}

/// Create every missing directory on the way to `dir`, assigning each one
/// this call creates to the target user. Pre-existing directories are left
/// untouched.
fn create_tree_owned(dir: &Path, user: &TargetUser) -> Result<(), KdfError> {
    let mut missing = Vec::new();
    let mut cursor = dir;
    while !cursor.exists() {
        missing.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(parent) => cursor = parent,
            None => break,
        }
    }

    for component in missing.iter().rev() {
        match fs::create_dir(component) {
            Ok(()) => {
                if let Err(err) = chown(component, Some(user.uid), Some(user.gid)) {
                    warn!(
                        path = %component.display(),
                        error = %err,
                        "could not hand salt directory to user"
                    );
                }
            }
            // Another login for the same user may have won the race.
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(KdfError::CreateDir {
                    path: component.to_owned(),
                    source,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    use nix::unistd::{Gid, Uid};
    use tempfile::TempDir;

    fn test_user(home: &Path) -> TargetUser {
        TargetUser {
            name: "tester".to_owned(),
            uid: Uid::current(),
            gid: Gid::current(),
            home: home.to_owned(),
        }
    }

    fn passphrase(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn first_login_creates_the_salt_file() {
        let home = TempDir::new().unwrap();
        let config = ModuleConfig::default();
        let user = test_user(home.path());

        let salt = load_or_create_salt(&config, &user).expect("salt creation");

        let path = config.salt_path(&user.home);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), SALT_SIZE);
        assert_eq!(bytes, salt.as_ref());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn existing_salt_is_reused() {
        let home = TempDir::new().unwrap();
        let config = ModuleConfig::default();
        let user = test_user(home.path());

        let first = load_or_create_salt(&config, &user).unwrap();
        let second = load_or_create_salt(&config, &user).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn empty_salt_file_is_replaced() {
        let home = TempDir::new().unwrap();
        let config = ModuleConfig::default();
        let user = test_user(home.path());

        let path = config.salt_path(&user.home);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();

        let salt = load_or_create_salt(&config, &user).expect("empty file triggers creation");

        assert_eq!(fs::read(&path).unwrap(), salt.as_ref());
    }

    #[test]
    fn truncated_salt_file_is_fatal() {
        let home = TempDir::new().unwrap();
        let config = ModuleConfig::default();
        let user = test_user(home.path());

        let path = config.salt_path(&user.home);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0xAB; 10]).unwrap();

        let result = load_or_create_salt(&config, &user);

        assert!(matches!(
            result,
            Err(KdfError::TruncatedSalt { len: 10, .. })
        ));
    }

    #[test]
    fn oversized_salt_file_uses_the_leading_bytes() {
        let home = TempDir::new().unwrap();
        let config = ModuleConfig::default();
        let user = test_user(home.path());

        let path = config.salt_path(&user.home);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut contents = vec![0x11u8; SALT_SIZE];
        contents.extend_from_slice(b"trailing junk");
        fs::write(&path, &contents).unwrap();

        let salt = load_or_create_salt(&config, &user).expect("long file is tolerated");

        assert_eq!(salt.as_ref(), &[0x11u8; SALT_SIZE][..]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::from_bytes([7u8; SALT_SIZE]);

        let first = derive_key(&passphrase("hunter2"), &salt);
        let second = derive_key(&passphrase("hunter2"), &salt);

        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn passphrase_changes_the_key() {
        let salt = Salt::from_bytes([7u8; SALT_SIZE]);

        let a = derive_key(&passphrase("hunter2"), &salt);
        let b = derive_key(&passphrase("hunter3"), &salt);

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_changes_the_key() {
        let a = derive_key(&passphrase("hunter2"), &Salt::from_bytes([7u8; SALT_SIZE]));
        let b = derive_key(&passphrase("hunter2"), &Salt::from_bytes([8u8; SALT_SIZE]));

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn fresh_salts_differ_between_users() {
        let config = ModuleConfig::default();
        let home_a = TempDir::new().unwrap();
        let home_b = TempDir::new().unwrap();

        let salt_a = load_or_create_salt(&config, &test_user(home_a.path())).unwrap();
        let salt_b = load_or_create_salt(&config, &test_user(home_b.path())).unwrap();

        assert_ne!(salt_a, salt_b);
    }
}
