//! Fallible user-memory copies.
//!
//! The VFS treats these as a black box with fault semantics: a bad user
//! range yields `EFAULT`, never a crash. Because a user access may
//! page-fault and block on allocation, copies must run with preemption
//! enabled; the assertions hold callers to that.

use nix::{Errno, Result};

use crate::consts::USER_SPACE_END;
use crate::preempt::is_preemption_enabled;

fn user_range_ok(addr: usize, len: usize) -> bool {
    if addr == 0 {
        return false;
    }
    match addr.checked_add(len) {
        Some(end) => end <= USER_SPACE_END,
        None => false,
    }
}

pub fn copy_to_user(dst: *mut u8, src: &[u8]) -> Result<()> {
    assert!(
        is_preemption_enabled(),
        "user copy with preemption disabled"
    );
    if !user_range_ok(dst as usize, src.len()) {
        return Err(Errno::EFAULT);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
    }
    Ok(())
}

pub fn copy_from_user(dst: &mut [u8], src: *const u8) -> Result<()> {
    assert!(
        is_preemption_enabled(),
        "user copy with preemption disabled"
    );
    if !user_range_ok(src as usize, dst.len()) {
        return Err(Errno::EFAULT);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
    }
    Ok(())
}
