//! Target account resolution.
//!
//! Every operation in this crate acts on behalf of the user who is logging
//! in, not the (typically privileged) process running the login stack. The
//! account is resolved once from the system user database and carried around
//! as an explicit [`TargetUser`] value instead of a raw `passwd` record.

use std::path::PathBuf;

use nix::unistd::{Gid, Uid, User};
use thiserror::Error;

/// Errors from resolving a login account.
#[derive(Debug, Error)]
pub enum UserError {
    /// The user database could not be queried.
    #[error("user database lookup for {name:?} failed")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },

    /// The name has no entry in the user database.
    #[error("unknown user {name:?}")]
    Unknown { name: String },

    /// The uid has no entry in the user database.
    #[error("no user database entry for uid {uid}")]
    UnknownUid { uid: Uid },
}

/// The account a login attempt authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUser {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: Uid,
    /// Primary group id.
    pub gid: Gid,
    /// Home directory from the user database.
    pub home: PathBuf,
}

impl TargetUser {
    /// Resolve a login name against the system user database.
    pub fn lookup(name: &str) -> Result<Self, UserError> {
        let entry = User::from_name(name)
            .map_err(|source| UserError::Lookup {
                name: name.to_owned(),
                source,
            })?
            .ok_or_else(|| UserError::Unknown {
                name: name.to_owned(),
            })?;
        Ok(Self::from_entry(entry))
    }

    /// Resolve the account of the calling process's real uid.
    ///
    /// Used by tooling and tests; the login hooks always resolve the name the
    /// host framework hands them.
    pub fn current() -> Result<Self, UserError> {
        let uid = Uid::current();
        let entry = User::from_uid(uid)
            .map_err(|source| UserError::Lookup {
                name: uid.to_string(),
                source,
            })?
            .ok_or(UserError::UnknownUid { uid })?;
        Ok(Self::from_entry(entry))
    }

    fn from_entry(entry: User) -> Self {
        Self {
            name: entry.name,
            uid: entry.uid,
            gid: entry.gid,
            home: entry.dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_user_resolves() {
        let user = TargetUser::current().expect("calling process has a passwd entry");

        assert!(!user.name.is_empty());
        assert_eq!(user.uid, Uid::current());
    }

    #[test]
    fn lookup_round_trips_current_name() {
        let current = TargetUser::current().unwrap();
        let by_name = TargetUser::lookup(&current.name).expect("lookup by own name");

        assert_eq!(by_name, current);
    }

    #[test]
    fn unknown_user_is_an_error() {
        let result = TargetUser::lookup("no-such-user-kwallet-pam");

        assert!(matches!(result, Err(UserError::Unknown { .. })));
    }
}
