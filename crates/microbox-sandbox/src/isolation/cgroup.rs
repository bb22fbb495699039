//! Cgroup v2 resource limits.
//!
//! One parent group (`/sys/fs/cgroup/microbox`) is shared by all sandboxes;
//! each launch gets a private child directory named `<pid>-<nanos>` (the
//! timestamp guards against PID-reuse races). Limits are written before the
//! PID is attached so the child never runs unlimited.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const CGROUP_PARENT: &str = "/sys/fs/cgroup/microbox";

/// The `cpu.max` line for a fractional-core budget. Period is fixed at
/// 100 ms; 0 cores means unlimited.
#[must_use]
pub fn cpu_max_line(cpus: f64) -> String {
    const PERIOD: u64 = 100_000;
    if cpus <= 0.0 {
        return format!("max {PERIOD}");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let quota = (cpus * PERIOD as f64).round() as u64;
    format!("{quota} {PERIOD}")
}

/// The `memory.max` line for a byte budget; 0 means unlimited.
#[must_use]
pub fn memory_max_line(memory: u64) -> String {
    if memory == 0 {
        "max".to_string()
    } else {
        memory.to_string()
    }
}

/// Creates a cgroup, applies cpu/memory limits, then attaches `pid`.
///
/// Returns the cgroup directory for later cleanup.
pub fn setup_limits(pid: i32, cpus: f64, memory: u64) -> Result<PathBuf> {
    ensure_parent()?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path = Path::new(CGROUP_PARENT).join(format!("{pid}-{nanos}"));
    create_dir(&path)?;

    write_control(&path, "cpu.max", &cpu_max_line(cpus))?;
    write_control(&path, "memory.max", &memory_max_line(memory))?;
    if memory > 0 {
        // Best-effort: no swap escape hatch for the memory budget.
        let _ = std::fs::write(path.join("memory.swap.max"), "0");
    }

    // Attach after the limits so the child never runs unlimited.
    write_control(&path, "cgroup.procs", &pid.to_string())?;

    tracing::debug!(cgroup = %path.display(), cpus, memory, "cgroup configured");
    Ok(path)
}

/// Ensures the shared parent group exists with cpu/memory delegated.
fn ensure_parent() -> Result<()> {
    if !Path::new(CGROUP_ROOT).join("cgroup.controllers").exists() {
        return Err(Error::CgroupFailed(
            "cgroup v2 is not mounted at /sys/fs/cgroup".into(),
        ));
    }

    create_dir(Path::new(CGROUP_PARENT))?;

    // The root must delegate for the parent to, and the parent must
    // delegate for the per-sandbox children to accept limits.
    enable_controllers(Path::new(CGROUP_ROOT))?;
    enable_controllers(Path::new(CGROUP_PARENT))?;
    Ok(())
}

/// Enables the cpu and memory controllers on `path`'s subtree.
///
/// EBUSY means a controller is pinned by an existing configuration and is
/// non-fatal; the limit writes will fail loudly later if it mattered.
fn enable_controllers(path: &Path) -> Result<()> {
    let control = path.join("cgroup.subtree_control");
    for ctrl in ["+cpu", "+memory"] {
        if let Err(e) = std::fs::write(&control, ctrl) {
            if e.raw_os_error() == Some(libc::EBUSY) {
                continue;
            }
            return Err(Error::CgroupFailed(format!(
                "enable {ctrl} on {}: {e}",
                control.display()
            )));
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(Error::CgroupFailed(format!(
            "mkdir {}: {e}",
            path.display()
        ))),
    }
}

fn write_control(path: &Path, file: &str, value: &str) -> Result<()> {
    let control = path.join(file);
    std::fs::write(&control, value)
        .map_err(|e| Error::CgroupFailed(format!("write {}: {e}", control.display())))
}

/// Kills everything in the cgroup and removes it.
///
/// `cgroup.kill` (5.14+) does the heavy lifting; older kernels fall back to
/// signalling each listed PID.
pub fn cleanup(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }

    if let Err(e) = std::fs::write(path.join("cgroup.kill"), "1") {
        if e.kind() != std::io::ErrorKind::NotFound {
            signal_remaining(path);
        }
    }

    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::CgroupFailed(format!(
            "remove {}: {e}",
            path.display()
        ))),
    }
}

/// Removes per-sandbox groups whose launcher died before cleanup.
///
/// Group names embed the child PID; a name whose PID no longer exists is
/// garbage from a crashed run. Opportunistic: failures are ignored and a
/// recycled PID just postpones collection to a later run.
pub fn collect_stale() {
    let Ok(entries) = std::fs::read_dir(CGROUP_PARENT) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name
            .to_string_lossy()
            .split('-')
            .next()
            .and_then(|p| p.parse::<i32>().ok())
        else {
            continue;
        };
        if Path::new(&format!("/proc/{pid}")).exists() {
            continue;
        }
        match cleanup(&entry.path()) {
            Ok(()) => tracing::debug!(cgroup = %entry.path().display(), "collected stale cgroup"),
            Err(e) => tracing::debug!(error = %e, "stale cgroup not collectable"),
        }
    }
}

fn signal_remaining(path: &Path) {
    let Ok(procs) = std::fs::read_to_string(path.join("cgroup.procs")) else {
        return;
    };
    for pid in procs.split_whitespace().filter_map(|p| p.parse::<i32>().ok()) {
        // SAFETY: signalling an arbitrary pid is always memory-safe.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_max_formatting() {
        assert_eq!(cpu_max_line(0.0), "max 100000");
        assert_eq!(cpu_max_line(1.5), "150000 100000");
        assert_eq!(cpu_max_line(0.5), "50000 100000");
        // Rounded, not truncated.
        assert_eq!(cpu_max_line(0.333), "33300 100000");
    }

    #[test]
    fn memory_max_formatting() {
        assert_eq!(memory_max_line(0), "max");
        assert_eq!(memory_max_line(64 * 1024 * 1024), "67108864");
    }

    #[test]
    fn stale_collection_is_quiet() {
        // Must never panic, whether or not the parent group exists.
        collect_stale();
    }

    #[test]
    fn cleanup_of_missing_group_is_ok() {
        assert!(cleanup(Path::new("/sys/fs/cgroup/microbox/does-not-exist")).is_ok());
        assert!(cleanup(Path::new("")).is_ok());
    }
}
