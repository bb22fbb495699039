//! Error taxonomy for sandbox launching.
//!
//! One variant per failure domain so callers (and log readers) can tell a
//! host-side privilege problem from a broken mount table from an exhausted
//! address pool. Parent-side errors propagate upward and trigger best-effort
//! teardown. The child reports failures differently: it prints one
//! diagnostic line and calls `_exit(127)`.

use std::path::PathBuf;

use rustix::io::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("{0} requires root privileges; re-run with sudo")]
    PrivilegeRequired(String),

    #[error("unsupported system: {0}")]
    Unsupported(String),

    #[error("cannot create sandbox process: {0}")]
    CloneFailed(Errno),

    #[error("id mapping failed: {0}")]
    IdMapFailed(String),

    #[error("cgroup setup failed: {0}")]
    CgroupFailed(String),

    #[error("mount failed on {path}: {errno}")]
    MountFailed { path: PathBuf, errno: Errno },

    #[error("netlink operation failed: {0}")]
    NetlinkFailed(String),

    #[error("firewall setup failed: {0}")]
    FirewallFailed(String),

    #[error("no free addresses in {0}")]
    IpamExhausted(String),

    #[error("address database busy: {0}")]
    IpamBusy(String),

    #[error("seccomp filter failed: {0}")]
    SeccompFailed(String),

    #[error("capability setup failed: {0}")]
    CapabilityFailed(String),

    #[error("child setup failed: {0}")]
    ChildSetupFailed(String),

    #[error("exec {path:?} failed: {errno}")]
    ExecFailed { path: String, errno: Errno },
}

impl Error {
    /// Helper for the pervasive mount-wrapper case.
    pub(crate) fn mount(path: impl Into<PathBuf>, errno: Errno) -> Self {
        Error::MountFailed {
            path: path.into(),
            errno,
        }
    }
}
