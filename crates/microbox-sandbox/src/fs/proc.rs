//! Sandbox `/proc` with Docker-style hardening.
//!
//! A fresh proc instance is mounted `nosuid,noexec,nodev`, then two lists of
//! subpaths are locked down: masked paths disappear behind an empty
//! read-only tmpfs (directories) or a read-only `/dev/null` bind (files),
//! and read-only paths are remounted without write access. Subpaths missing
//! on the running kernel are skipped silently, and individual lockdowns are
//! best-effort (some proc subtrees refuse remounts on older kernels).

use std::path::Path;

use crate::error::Result;
use crate::fs::mount;

/// Subpaths remounted read-only.
const READONLY_PATHS: &[&str] = &[
    "/proc/sys",
    "/proc/sysrq-trigger",
    "/proc/irq",
    "/proc/bus",
    "/proc/fs",
];

/// Subpaths masked out of the sandbox's view.
const MASKED_PATHS: &[&str] = &[
    "/proc/asound",
    "/proc/acpi",
    "/proc/interrupts",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/proc/scsi",
    "/proc/firmware",
    "/proc/devices/virtual/powercap",
];

/// Mounts and hardens `/proc` under `base`.
pub fn mount_proc(base: &Path) -> Result<()> {
    let target = mount::resolve_target(base, Path::new("/proc"));
    std::fs::create_dir_all(&target).map_err(mount::io_to_mount(&target))?;

    mount::raw(
        Some("proc"),
        &target,
        Some("proc"),
        libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_NODEV,
        None,
    )?;

    for sub in MASKED_PATHS {
        let path = mount::resolve_target(base, Path::new(sub));
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            // Empty read-only tmpfs so no writes can leak into the mask.
            let _ = mount::raw(
                Some("tmpfs"),
                &path,
                Some("tmpfs"),
                libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_NODEV | libc::MS_RDONLY,
                Some("size=0"),
            );
        } else {
            let _ = mask_file(&path);
        }
    }

    for sub in READONLY_PATHS {
        let path = mount::resolve_target(base, Path::new(sub));
        if std::fs::symlink_metadata(&path).is_err() {
            continue;
        }
        let _ = mount::readonly_remount(&path);
    }

    Ok(())
}

fn mask_file(path: &Path) -> Result<()> {
    mount::raw(Some("/dev/null"), path, None, libc::MS_BIND, None)?;
    mount::readonly_remount(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockdown_lists_are_disjoint() {
        for masked in MASKED_PATHS {
            assert!(!READONLY_PATHS.contains(masked), "{masked} in both lists");
        }
    }
}
