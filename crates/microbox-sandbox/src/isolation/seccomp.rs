//! Seccomp filter: default-allow with an ERRNO(ENOSYS) deny-list.
//!
//! The filter is installed last in the child, immediately before exec, so
//! the builder itself is never restricted. Denied syscalls return `ENOSYS`
//! rather than `EPERM`: well-behaved programs probe for syscall support and
//! take fallback paths on `ENOSYS`, whereas `EPERM` tends to be treated as
//! a hard failure.
//!
//! The effective deny-list is `default ∪ user_deny \ user_allow`, sorted
//! and deduplicated. Names the target architecture doesn't know are skipped
//! silently (see `microbox_sys::seccomp`).

use std::collections::BTreeMap;

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};

use crate::error::{Error, Result};

/// Default deny-list, mirroring the Docker profile's hard blocks.
pub const DEFAULT_DENY: &[&str] = &[
    // kernel module & kexec
    "create_module",
    "init_module",
    "finit_module",
    "delete_module",
    "kexec_load",
    "kexec_file_load",
    // keyring & bpf
    "add_key",
    "request_key",
    "keyctl",
    "bpf",
    // ptrace family
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    // clock tampering
    "adjtimex",
    "clock_adjtime",
    "settimeofday",
    "stime",
    // reboot, quotas, nfs, sysfs, legacy
    "reboot",
    "quotactl",
    "nfsservctl",
    "sysfs",
    "_sysctl",
    // personality tweaks
    "personality",
    // mount & root switching
    "mount",
    "umount",
    "umount2",
    "pivot_root",
    // namespace escapes
    "setns",
    "unshare",
    "nsenter",
    // file-handle bypasses
    "open_by_handle_at",
    "name_to_handle_at",
    "lookup_dcookie",
    // perf & fanotify
    "perf_event_open",
    "fanotify_init",
    // userfault / vm86 / port io
    "userfaultfd",
    "vm86",
    "vm86old",
    "iopl",
    "ioperm",
    // memory policy & page moving
    "set_mempolicy",
    "move_pages",
    // info leaks & accounting
    "kcmp",
    "acct",
    // new-style mount API
    "open_tree",
    "move_mount",
    "fsopen",
    "fsconfig",
    "fsmount",
    "fspick",
    "mount_setattr",
    // io_uring
    "io_uring_setup",
    "io_uring_enter",
    "io_uring_register",
];

/// Computes `sort(unique(default ∪ deny \ allow))`.
#[must_use]
pub fn deny_list(allow: &[String], deny: &[String]) -> Vec<String> {
    let mut set: std::collections::BTreeSet<&str> = DEFAULT_DENY.iter().copied().collect();
    for name in deny {
        set.insert(name.as_str());
    }
    for name in allow {
        set.remove(name.as_str());
    }
    set.into_iter().map(str::to_owned).collect()
}

/// Builds and loads the filter for the current process.
///
/// Requires `PR_SET_NO_NEW_PRIVS` (set by the capability applier).
pub fn install(allow: &[String], deny: &[String]) -> Result<()> {
    let err = |stage: &str, e: String| Error::SeccompFailed(format!("{stage}: {e}"));

    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    for name in deny_list(allow, deny) {
        // Unresolvable names are kernel/arch-dependent; skip them.
        if let Some(nr) = microbox_sys::seccomp::resolve_syscall(&name) {
            rules.insert(nr, Vec::new());
        }
    }

    let arch = TargetArch::try_from(std::env::consts::ARCH)
        .map_err(|_| err("arch", std::env::consts::ARCH.into()))?;

    #[allow(clippy::cast_sign_loss)]
    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::ENOSYS as u32),
        arch,
    )
    .map_err(|e| err("build", e.to_string()))?;

    let program: BpfProgram = filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| err("compile", e.to_string()))?;
    seccompiler::apply_filter(&program).map_err(|e| err("load", e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn deny_list_is_sorted_unique() {
        let list = deny_list(&[], &[]);
        let mut sorted = list.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(list, sorted);
        assert!(list.iter().any(|n| n == "mount"));
    }

    #[test]
    fn user_deny_is_added() {
        let list = deny_list(&[], &strings(&["socket"]));
        assert!(list.iter().any(|n| n == "socket"));
    }

    #[test]
    fn user_allow_subtracts() {
        let list = deny_list(&strings(&["mount"]), &[]);
        assert!(!list.iter().any(|n| n == "mount"));
        // Allow of something never denied is a no-op.
        let baseline = deny_list(&[], &[]);
        let list = deny_list(&strings(&["socket"]), &[]);
        assert_eq!(baseline, list);
    }

    #[test]
    fn deny_beats_duplicate_entries() {
        let list = deny_list(&[], &strings(&["mount", "mount"]));
        assert_eq!(list.iter().filter(|n| *n == "mount").count(), 1);
    }
}
