//! Best-effort erasure of secret buffers.
//!
//! Typed secrets ([`secrecy::SecretString`], [`crate::secret::WalletKey`])
//! already zeroize themselves on drop. This module covers the raw buffers
//! that exist in between: a passphrase pulled out of a conversation reply, a
//! key staged for a pipe write. Those are overwritten in place before their
//! storage is released.
//!
//! The overwrite uses two distinct fill patterns and finishes with a volatile
//! pass, so the stores survive dead-store elimination even when the buffer is
//! freed immediately afterwards.

use std::sync::atomic::{compiler_fence, Ordering};

const WIPE_PATTERN_A: u8 = 0xAA;
const WIPE_PATTERN_B: u8 = 0xBB;

/// Overwrite `buf` in place.
///
/// On return every byte of `buf` holds a fixed fill pattern; none of the
/// previous contents remain.
pub fn wipe_bytes(buf: &mut [u8]) {
    buf.fill(WIPE_PATTERN_B);
    let ptr = buf.as_mut_ptr();
    for offset in 0..buf.len() {
        // SAFETY: `offset` is within `buf`, which is exclusively borrowed.
        unsafe { ptr.add(offset).write_volatile(WIPE_PATTERN_A) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Consume and overwrite a string's backing storage.
pub fn wipe_string(s: String) {
    let mut bytes = s.into_bytes();
    wipe_bytes(&mut bytes);
}
