//! One-shot synchronization pipe between the launcher and the sandboxed child.
//!
//! The pipe is created before `clone3`, so both processes inherit both ends.
//! The child's first act is a blocking 1-byte read; the parent writes a single
//! wake byte once all host-side setup (ID maps, cgroup attach, host network)
//! has succeeded. If the parent fails it closes both ends without writing,
//! which the child observes as EOF. Exactly one byte ever crosses the pipe;
//! the parent is authoritative.
//!
//! Both fds are close-on-exec so the pipe never leaks into the user command.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use rustix::io::Errno;

use crate::last_errno;

/// Both ends of the synchronization pipe.
pub struct SyncPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SyncPipe {
    /// Creates the pipe with `O_CLOEXEC` on both ends.
    ///
    /// # Errors
    ///
    /// Returns the raw errno if `pipe2` fails.
    pub fn new() -> Result<Self, Errno> {
        let mut fds = [-1 as libc::c_int; 2];
        // SAFETY: fds is a valid 2-element output buffer.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(last_errno());
        }
        // SAFETY: pipe2 returned two fresh fds we now own.
        unsafe {
            Ok(Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }

    /// Child side: blocks until the parent writes the wake byte.
    ///
    /// Drops the write end first so that a parent crash is observed as EOF
    /// rather than a deadlock. Both ends are closed on return.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF (parent gave up without waking us) or on a
    /// read failure.
    pub fn wait_for_parent(self) -> Result<(), Errno> {
        drop(self.write);
        let mut byte = [0u8; 1];
        loop {
            // SAFETY: byte is a valid 1-byte buffer for the owned read fd.
            let n = unsafe { libc::read(self.read.as_raw_fd(), byte.as_mut_ptr().cast(), 1) };
            return match n {
                1 => Ok(()),
                0 => Err(Errno::PIPE),
                _ => {
                    let errno = last_errno();
                    if errno == Errno::INTR {
                        continue;
                    }
                    Err(errno)
                }
            };
        }
    }

    /// Parent side: writes the wake byte and closes both ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (the child already died).
    pub fn signal_child(self) -> Result<(), Errno> {
        drop(self.read);
        let byte = [1u8; 1];
        // SAFETY: byte is a valid 1-byte buffer for the owned write fd.
        let n = unsafe { libc::write(self.write.as_raw_fd(), byte.as_ptr().cast(), 1) };
        if n == 1 { Ok(()) } else { Err(last_errno()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_byte_roundtrip() {
        let parent = SyncPipe::new().expect("pipe");
        // Duplicate the fds to simulate the post-clone child copy.
        let child = SyncPipe {
            read: parent.read.try_clone().expect("dup"),
            write: parent.write.try_clone().expect("dup"),
        };
        parent.signal_child().expect("signal");
        child.wait_for_parent().expect("wake");
    }

    #[test]
    fn parent_failure_is_eof() {
        let parent = SyncPipe::new().expect("pipe");
        let child = SyncPipe {
            read: parent.read.try_clone().expect("dup"),
            write: parent.write.try_clone().expect("dup"),
        };
        // Parent gives up: both ends close without a wake byte.
        drop(parent);
        assert_eq!(child.wait_for_parent(), Err(Errno::PIPE));
    }
}
