//! Private root filesystem construction.
//!
//! Runs exclusively in the child, inside its new mount namespace. The first
//! action is always a recursive-private remount of `/` so nothing the
//! builder does can propagate to the host. Three strategies follow:
//!
//! - **tmpfs**: an empty tmpfs root with `/proc`, `/dev`, `/tmp`, `/etc`
//!   built inside it.
//! - **rootfs**: an overlay whose read-only lower layer is a user-supplied
//!   directory, with upper/work layers on tmpfs so writes are ephemeral.
//! - **host**: the host's root bind-mounted into a tmpfs staging dir,
//!   optionally read-only.
//!
//! Every strategy ends with `pivot_root` into the constructed tree, so the
//! old root is gone before the user command ever runs.

pub mod dev;
pub mod etc;
pub mod mount;
pub mod proc;

use std::path::Path;

use crate::error::Result;
use crate::plan::{FsMode, MountSpec, Plan};

/// Staging directory for the new root; lives only inside the child's
/// mount namespace.
const BOX_DIR: &str = "/box";

/// Builds the sandbox filesystem chosen by the plan and pivots into it.
pub fn setup(plan: &Plan) -> Result<()> {
    mount::make_rprivate()?;

    match &plan.fs {
        FsMode::Tmpfs => setup_tmpfs_root(plan),
        FsMode::Host => setup_host_root(plan),
        FsMode::Rootfs(lower) => setup_overlay_root(plan, lower),
    }
}

fn setup_tmpfs_root(plan: &Plan) -> Result<()> {
    let base = Path::new(BOX_DIR);
    mount::mount_tmpfs(base, plan.storage_bytes, "755")?;

    populate(base, plan)?;

    mount::pivot_to(base)?;
    if plan.read_only {
        mount::remount_root_readonly()?;
    }
    Ok(())
}

fn setup_overlay_root(plan: &Plan, lower: &Path) -> Result<()> {
    let base = Path::new(BOX_DIR);
    mount::mount_tmpfs(base, plan.storage_bytes, "755")?;

    let layout = mount::create_overlay(lower, &base.join("overlay"))?;
    populate(&layout.merged, plan)?;

    mount::pivot_to(&layout.merged)?;
    if plan.read_only {
        mount::remount_root_readonly()?;
    }
    Ok(())
}

fn setup_host_root(plan: &Plan) -> Result<()> {
    let base = Path::new(BOX_DIR);
    mount::mount_tmpfs(base, plan.storage_bytes, "755")?;

    let mut spec = MountSpec::rw("/", "/");
    spec.read_only = plan.read_only;
    mount::bind_mount(base, &spec)?;

    mount::pivot_to(base)
}

/// Builds the standard interior: `/proc`, `/dev`, `/tmp`, `/etc`, the
/// cgroup view, then the user binds.
fn populate(base: &Path, plan: &Plan) -> Result<()> {
    proc::mount_proc(base)?;
    dev::mount_dev(base)?;
    etc::ensure_tmp(base)?;
    etc::setup_etc(base, &plan.nameservers, &plan.hostname)?;
    mount_cgroup2(base);

    for spec in plan.mounts() {
        mount::bind_mount(base, spec)?;
    }
    Ok(())
}

/// Best-effort cgroup2 mount at `/sys/fs/cgroup` so the sandbox can read
/// its own limits. Requires the child's cgroup namespace to have been
/// re-rooted after the cgroup attach.
fn mount_cgroup2(base: &Path) {
    let target = mount::resolve_target(base, Path::new("/sys/fs/cgroup"));
    if let Err(e) = std::fs::create_dir_all(&target) {
        tracing::debug!(error = %e, "cannot create /sys/fs/cgroup");
        return;
    }
    if let Err(e) = mount::raw(
        Some("cgroup2"),
        &target,
        Some("cgroup2"),
        libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC,
        None,
    ) {
        tracing::debug!(error = %e, "cgroup2 mount unavailable");
    }
}
