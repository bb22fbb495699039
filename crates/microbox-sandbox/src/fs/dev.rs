//! Sandbox `/dev`: a small tmpfs populated with the essentials.
//!
//! The sandbox never sees the host's device tree. A fresh tmpfs carries a
//! new devpts instance, `/dev/shm`, `/dev/mqueue`, the standard fd symlinks,
//! and a bind-mounted allow-list of safe host device nodes.

use std::path::Path;

use crate::error::Result;
use crate::fs::mount;
use crate::plan::MountSpec;

/// Device nodes bind-mounted from the host.
const DEV_ALLOWLIST: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/random",
    "/dev/urandom",
    "/dev/tty",
];

/// Builds `/dev` under `base`.
pub fn mount_dev(base: &Path) -> Result<()> {
    let dev = mount::resolve_target(base, Path::new("/dev"));
    std::fs::create_dir_all(&dev).map_err(mount::io_to_mount(&dev))?;
    mount::raw(
        Some("tmpfs"),
        &dev,
        Some("tmpfs"),
        libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_STRICTATIME,
        Some("mode=755,size=65536k"),
    )?;

    // New devpts instance so the sandbox cannot reach host terminals.
    let pts = dev.join("pts");
    std::fs::create_dir_all(&pts).map_err(mount::io_to_mount(&pts))?;
    if let Err(e) = mount::raw(
        Some("devpts"),
        &pts,
        Some("devpts"),
        libc::MS_NOSUID | libc::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=0620"),
    ) {
        // Kernels without CONFIG_DEVPTS_MULTIPLE_INSTANCES reject this.
        tracing::debug!(error = %e, "devpts instance unavailable");
    }
    link_dev("pts/ptmx", &dev.join("ptmx"))?;

    let shm = dev.join("shm");
    std::fs::create_dir_all(&shm).map_err(mount::io_to_mount(&shm))?;
    mount::raw(
        Some("tmpfs"),
        &shm,
        Some("tmpfs"),
        libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_NODEV,
        Some("mode=1777,size=65536k"),
    )?;

    let mqueue = dev.join("mqueue");
    std::fs::create_dir_all(&mqueue).map_err(mount::io_to_mount(&mqueue))?;
    if let Err(e) = mount::raw(
        Some("mqueue"),
        &mqueue,
        Some("mqueue"),
        libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_NODEV,
        None,
    ) {
        tracing::debug!(error = %e, "mqueue unavailable");
    }

    link_dev("/proc/self/fd", &dev.join("fd"))?;
    link_dev("/proc/self/fd/0", &dev.join("stdin"))?;
    link_dev("/proc/self/fd/1", &dev.join("stdout"))?;
    link_dev("/proc/self/fd/2", &dev.join("stderr"))?;
    link_dev("/proc/kcore", &dev.join("core"))?;

    for &node in DEV_ALLOWLIST {
        let spec = MountSpec::rw(node, node);
        if let Err(e) = mount::bind_mount(base, &spec) {
            // A host missing e.g. /dev/tty should not break the sandbox.
            tracing::debug!(node, error = %e, "device node not bound");
        }
    }

    Ok(())
}

/// Creates a symlink, replacing any existing destination entry.
fn link_dev(src: &str, dest: &Path) -> Result<()> {
    let _ = std::fs::remove_file(dest);
    std::os::unix::fs::symlink(src, dest).map_err(mount::io_to_mount(dest))
}
