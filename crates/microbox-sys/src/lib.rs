//! Low-level Linux syscall wrappers for sandbox launching.
//!
//! This crate provides thin wrappers around Linux-specific process and
//! security syscalls that are not available in rustix or libc. For standard
//! syscalls, use rustix.
//!
//! ## Modules
//!
//! - **clone** - `clone3(2)` with namespace flags and pidfd, plus pidfd wait
//! - **pipe** - the one-shot parent/child synchronization pipe
//! - **seccomp** - syscall name resolution for seccomp filter construction
//! - **check** - runtime system capability detection
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod check;
pub mod clone;
pub mod pipe;
pub mod seccomp;

pub use check::{CheckError, SystemInfo, check};

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
