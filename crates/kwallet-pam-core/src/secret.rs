//! In-memory handling of the derived wallet key.
//!
//! The wallet key is the one secret this crate produces. It is derived from
//! the login passphrase, lives for at most the span of one login attempt, and
//! leaves the process exactly once, over the handoff pipe to the wallet
//! daemon.
//!
//! # Security
//!
//! - Key material is heap-allocated and memory-locked (`mlock`) so it cannot
//!   be swapped to disk while alive
//! - The key is zeroed on drop via `Zeroize`
//! - Debug output shows `[REDACTED]` instead of key bytes

use std::fmt;

use tracing::warn;
use zeroize::Zeroize;

/// Size of the derived wallet key in bytes.
///
/// Fixed by the wallet daemon's key-provisioning format; the daemon reads
/// exactly this many bytes from the handoff pipe.
pub const KEY_SIZE: usize = 56;

/// A derived wallet key with secure memory handling.
pub struct WalletKey {
    /// The raw key material.
    key: Box<[u8; KEY_SIZE]>,
    /// Whether the key memory is locked.
    memory_locked: bool,
}

impl WalletKey {
    /// Take ownership of raw key bytes.
    ///
    /// The stack copy passed in is wiped before this returns; the key then
    /// exists only in the locked heap allocation.
    pub fn from_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let mut key = Self::zeroed();
        key.key.copy_from_slice(&bytes);
        crate::wipe::wipe_bytes(&mut bytes);
        key
    }

    /// Allocate an all-zero key and lock its memory.
    ///
    /// Used as the output buffer of the key derivation, so the derived bytes
    /// are written straight into locked storage.
    pub(crate) fn zeroed() -> Self {
        let mut key = Self {
            key: Box::new([0u8; KEY_SIZE]),
            memory_locked: false,
        };
        key.try_lock_memory();
        key
    }

    /// Attempt to lock the key memory to prevent swapping.
    ///
    /// Failure is logged and non-fatal; the key still works, it is just not
    /// protected against being paged out.
    fn try_lock_memory(&mut self) {
        let ptr = self.key.as_ptr() as *mut u8;

        // Safety: we lock memory we own and unlock it on drop
        let locked = unsafe { memsec::mlock(ptr, KEY_SIZE) };

        if locked {
            self.memory_locked = true;
        } else {
            warn!(
                "failed to lock wallet key memory, key may be swapped to disk \
                 (raise RLIMIT_MEMLOCK or grant CAP_IPC_LOCK)"
            );
        }
    }

    /// The raw key bytes, for the handoff write.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.key
    }
}

impl Drop for WalletKey {
    fn drop(&mut self) {
        self.key.zeroize();

        if self.memory_locked {
            let ptr = self.key.as_ptr() as *mut u8;
            // Safety: we unlock memory we previously locked
            unsafe {
                memsec::munlock(ptr, KEY_SIZE);
            }
        }
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKey")
            .field("key", &"[REDACTED]")
            .field("memory_locked", &self.memory_locked)
            .finish()
    }
}
