//! Runtime system capability detection.
//!
//! Verifies once per process what the kernel can host. The result is
//! cached in a static `OnceLock`.
//!
//! ## Probed Features
//!
//! | Feature | Minimum | Check Method | On failure |
//! |---------|---------|--------------|------------|
//! | Kernel | 5.6 | `uname` (clone3 + pidfd + time namespaces) | fatal |
//! | Seccomp | enabled | `prctl(PR_GET_SECCOMP)` | fatal |
//! | Cgroup v2 | mounted | `/sys/fs/cgroup/cgroup.controllers` | reported; enforced where the cgroup is created |
//! | User NS | enabled | sysctl probe, fork + unshare fallback | reported; enforced before an unprivileged clone |
//!
//! ## User Namespaces
//!
//! Unprivileged user-namespace support varies by distribution:
//! - **Debian/Ubuntu**: `/proc/sys/kernel/unprivileged_userns_clone`
//! - **NixOS/Fedora**: `/proc/sys/user/max_user_namespaces`
//! - **Fallback**: fork + unshare test
//!
//! A root caller may create user namespaces regardless, so the probe is
//! surfaced in [`SystemInfo`] rather than failing the check outright; the
//! launcher consults it only for rootless launches, turning a would-be
//! `EPERM` from `clone3` into a precise diagnostic.

use std::sync::OnceLock;

use rustix::system::uname;
use thiserror::Error;

use crate::seccomp;

/// What the running system offers for sandboxing.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub kernel_version: (u32, u32, u32),
    pub cgroup_v2: bool,
    pub user_ns_enabled: bool,
    pub seccomp_enabled: bool,
}

/// Errors that can occur during system capability checking.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("kernel version {}.{}.{} is too old, need at least {}.{}.{}", .found.0, .found.1, .found.2, .required.0, .required.1, .required.2)]
    KernelTooOld {
        required: (u32, u32, u32),
        found: (u32, u32, u32),
    },

    #[error("seccomp is not available")]
    SeccompNotAvailable,

    #[error("failed to read kernel version")]
    KernelVersionReadFailed,
}

// clone3 with CLONE_NEWTIME needs 5.6.
const MIN_KERNEL_VERSION: (u32, u32, u32) = (5, 6, 0);

static SYSTEM_INFO: OnceLock<Result<SystemInfo, CheckError>> = OnceLock::new();

/// Checks system capabilities and caches the result.
pub fn check() -> Result<&'static SystemInfo, &'static CheckError> {
    SYSTEM_INFO.get_or_init(check_impl).as_ref()
}

fn check_impl() -> Result<SystemInfo, CheckError> {
    let kernel_version = get_kernel_version()?;
    if kernel_version < MIN_KERNEL_VERSION {
        return Err(CheckError::KernelTooOld {
            required: MIN_KERNEL_VERSION,
            found: kernel_version,
        });
    }

    let seccomp_enabled = seccomp::seccomp_available();
    if !seccomp_enabled {
        return Err(CheckError::SeccompNotAvailable);
    }

    Ok(SystemInfo {
        kernel_version,
        cgroup_v2: std::path::Path::new("/sys/fs/cgroup/cgroup.controllers").exists(),
        user_ns_enabled: check_user_namespaces(),
        seccomp_enabled,
    })
}

fn get_kernel_version() -> Result<(u32, u32, u32), CheckError> {
    let uts = uname();
    let release = uts
        .release()
        .to_str()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;
    parse_kernel_version(release)
}

fn parse_kernel_version(release: &str) -> Result<(u32, u32, u32), CheckError> {
    let parts: Vec<&str> = release.split('.').collect();
    if parts.len() < 2 {
        return Err(CheckError::KernelVersionReadFailed);
    }

    let major = parts[0]
        .parse::<u32>()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;

    let minor = parts[1]
        .parse::<u32>()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;

    // Patch may carry a suffix like "0-generic".
    let patch = parts
        .get(2)
        .and_then(|p| p.split('-').next())
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    Ok((major, minor, patch))
}

/// Whether an unprivileged caller may create user namespaces.
fn check_user_namespaces() -> bool {
    // Check sysctl first (Debian/Ubuntu).
    if let Ok(content) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        return content.trim() == "1";
    }

    // Check max_user_namespaces (NixOS and others).
    if let Ok(content) = std::fs::read_to_string("/proc/sys/user/max_user_namespaces")
        && content.trim().parse::<u32>().unwrap_or(0) > 0
    {
        return true;
    }

    // Last resort: fork + unshare test (must fork to avoid polluting the
    // caller).
    // SAFETY: the child calls only unshare and _exit; the parent reaps it.
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            return false;
        }
        if pid == 0 {
            let ret = libc::unshare(libc::CLONE_NEWUSER);
            libc::_exit(if ret == 0 { 0 } else { 1 });
        }
        let mut status: i32 = 0;
        libc::waitpid(pid, &mut status, 0);
        libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_release_strings() {
        assert_eq!(parse_kernel_version("5.15.0").unwrap(), (5, 15, 0));
        assert_eq!(parse_kernel_version("6.1.0-generic").unwrap(), (6, 1, 0));
        assert_eq!(parse_kernel_version("6.8").unwrap(), (6, 8, 0));
        assert!(parse_kernel_version("weird").is_err());
    }

    #[test]
    fn check_runs() {
        // Informational: print what this machine offers.
        match check() {
            Ok(info) => println!("system: {info:?}"),
            Err(e) => println!("system check failed: {e}"),
        }
    }
}
