//! Sandbox orchestration: clone, parent/child choreography, wait, teardown.
//!
//! The launch is two state machines joined by a one-shot pipe:
//!
//! ```text
//! parent                                child
//! ------                                -----
//! validate plan
//! lease address (bridge only)
//! make sync pipe
//! clone3(new namespaces) ------------>  blocks on pipe read
//! write uid/gid maps
//! create cgroup, write limits, attach
//! bridge + veth + firewall (host side)
//! write wake byte ------------------->  re-root cgroup namespace
//!                                       sethostname
//! waitid(pidfd) ...                     build root fs, pivot_root
//!                                       finalize eth0 (bridge only)
//!                                       reduce capabilities
//!                                       install seccomp filter
//!                                       execve(user command)
//! ... child exits
//! delete veth, release lease, kill cgroup
//! ```
//!
//! The parent is authoritative: if any pre-wake step fails it closes the
//! pipe without writing, the child reads EOF and exits 127, and whatever
//! host state was created is rolled back. Child-side failures print one
//! line to stderr and `_exit(127)`; the child never tries to recover.

use std::ffi::CString;
use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};

use microbox_sys::clone::{Fork, clone3, wait_pidfd};
use microbox_sys::pipe::SyncPipe;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::isolation::{capabilities, cgroup, idmap, seccomp};
use crate::net::{self, NetConfig, NetworkHandle};
use crate::plan::{NetMode, Plan, UserNsMode};
use crate::{fs, validate};

/// A running sandbox, owned by the parent.
pub struct SandboxProcess {
    id: Uuid,
    pid: i32,
    pidfd: OwnedFd,
    network: Option<NetworkHandle>,
    cgroup: PathBuf,
}

/// Creates and starts a sandboxed process.
///
/// On success the child is already past the wake byte and racing towards
/// exec; call [`SandboxProcess::wait`] to collect it and tear down host
/// state.
pub fn spawn(plan: &Plan) -> Result<SandboxProcess> {
    validate::validate(plan)?;
    let info = microbox_sys::check().map_err(|e| Error::Unsupported(e.to_string()))?;
    check_privileges(plan, info)?;

    // Opportunistic: reclaim groups left behind by crashed launchers.
    cgroup::collect_stale();

    // Leased before clone so the child inherits the config through its
    // copied address space; the wake byte carries no payload.
    let mut network = match plan.net {
        NetMode::Bridge => Some(net::allocate(Path::new(net::ipam::DEFAULT_DB_PATH))?),
        _ => None,
    };

    let pipe = SyncPipe::new().map_err(Error::CloneFailed)?;
    let net_config = network.as_ref().map(|n| n.config.clone());

    let fork = match clone3(clone_flags(plan)) {
        Ok(fork) => fork,
        Err(errno) => {
            if let Some(network) = network.take() {
                network.teardown();
            }
            return Err(Error::CloneFailed(errno));
        }
    };

    match fork {
        Fork::Child => child_main(plan, net_config.as_ref(), pipe),
        Fork::Parent { pid, pidfd } => {
            tracing::debug!(pid, "sandbox process created");
            // The wake closure owns the pipe: if setup fails before it
            // runs, dropping it closes both ends and the child reads EOF.
            let wake = move |cgroup: PathBuf| -> Result<PathBuf> {
                pipe.signal_child().map_err(Error::CloneFailed)?;
                Ok(cgroup)
            };
            match parent_setup(plan, pid, &mut network).and_then(wake) {
                Ok(cgroup) => Ok(SandboxProcess {
                    id: plan.id,
                    pid,
                    pidfd,
                    network,
                    cgroup,
                }),
                Err(e) => {
                    if let Some(cg) = parent_cleanup_cgroup(pid) {
                        let _ = cgroup::cleanup(&cg);
                    }
                    if let Some(network) = network.take() {
                        network.teardown();
                    }
                    let _ = rustix::process::pidfd_send_signal(
                        pidfd.as_fd(),
                        rustix::process::Signal::KILL,
                    );
                    let _ = wait_pidfd(pidfd.as_fd());
                    Err(e)
                }
            }
        }
    }
}

/// Parent-side setup between clone and the wake byte. Returns the created
/// cgroup path.
fn parent_setup(
    plan: &Plan,
    pid: i32,
    network: &mut Option<NetworkHandle>,
) -> Result<PathBuf> {
    if plan.user_ns == UserNsMode::Isolated {
        idmap::setup_id_mappings(pid)?;
    }

    // Every sandbox gets its own cgroup, limited or not, so membership
    // and the configured cpu.max/memory.max are always observable. A
    // rootless caller can only get here with a delegated parent group.
    let cgroup = cgroup::setup_limits(pid, plan.cpus, plan.memory_bytes).map_err(|e| {
        // SAFETY: geteuid cannot fail.
        if unsafe { libc::geteuid() } != 0 {
            Error::PrivilegeRequired(format!("cgroup setup ({e})"))
        } else {
            e
        }
    })?;

    if let Some(network) = network.as_mut() {
        network.setup_host_side(pid)?;
    }

    Ok(cgroup)
}

/// The failure path cannot know whether cgroup setup got as far as
/// creating the directory; glob for this PID's group so a half-created one
/// is not leaked.
fn parent_cleanup_cgroup(pid: i32) -> Option<PathBuf> {
    let parent = Path::new("/sys/fs/cgroup/microbox");
    let prefix = format!("{pid}-");
    for entry in std::fs::read_dir(parent).ok()?.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            return Some(entry.path());
        }
    }
    None
}

impl SandboxProcess {
    /// Unique identifier of this launch.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Host-visible PID of the sandboxed process.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Sends SIGKILL to the sandboxed process through its pidfd.
    ///
    /// The caller still owns the handle and must [`wait`](Self::wait) to
    /// reap the child and release host resources.
    pub fn kill(&self) -> Result<()> {
        rustix::process::pidfd_send_signal(self.pidfd.as_fd(), rustix::process::Signal::KILL)
            .map_err(|e| Error::ChildSetupFailed(format!("kill: {e}")))
    }

    /// Waits for the child to exit, tears down host state, and maps the
    /// termination to an exit code (`status`, or `128 + signum`).
    ///
    /// Teardown is best-effort: a failed step logs a warning and the rest
    /// proceeds, so one stuck resource cannot leak the others.
    pub fn wait(mut self) -> Result<i32> {
        let status = wait_pidfd(self.pidfd.as_fd());

        if let Some(network) = self.network.take() {
            network.teardown();
        }
        if let Err(e) = cgroup::cleanup(&self.cgroup) {
            tracing::warn!(cgroup = %self.cgroup.display(), error = %e, "cgroup cleanup failed");
        }

        let status = status.map_err(|e| Error::ChildSetupFailed(format!("waitid: {e}")))?;
        Ok(status.code())
    }
}

/// Namespace flags for the clone: always PID, UTS, IPC, cgroup, time and
/// mount; user and net namespaces bow out in their host modes.
fn clone_flags(plan: &Plan) -> u64 {
    let mut flags = libc::CLONE_NEWPID
        | libc::CLONE_NEWUTS
        | libc::CLONE_NEWIPC
        | libc::CLONE_NEWCGROUP
        | libc::CLONE_NEWTIME
        | libc::CLONE_NEWNS;
    if plan.net != NetMode::Host {
        flags |= libc::CLONE_NEWNET;
    }
    if plan.user_ns != UserNsMode::Host {
        flags |= libc::CLONE_NEWUSER;
    }
    flags as u64
}

/// Modes that touch host-global state need real root; everything else can
/// run rootless through the subid helpers, provided the kernel allows
/// unprivileged user namespaces. Checked before `clone3` so a disabled
/// sysctl surfaces as a diagnostic rather than a bare EPERM.
fn check_privileges(plan: &Plan, info: &microbox_sys::SystemInfo) -> Result<()> {
    // SAFETY: geteuid cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        return Ok(());
    }
    if plan.net == NetMode::Bridge {
        return Err(Error::PrivilegeRequired(
            "bridged networking (CAP_NET_ADMIN on the host)".into(),
        ));
    }
    if plan.user_ns == UserNsMode::Host {
        return Err(Error::PrivilegeRequired(
            "--userns host (mount operations outside a user namespace)".into(),
        ));
    }
    if !info.user_ns_enabled {
        return Err(Error::Unsupported(
            "unprivileged user namespaces are disabled \
             (see kernel.unprivileged_userns_clone); run as root instead"
                .into(),
        ));
    }
    Ok(())
}

/// Everything the child does between the wake byte and exec. Never
/// returns; failures print one diagnostic and `_exit(127)`.
fn child_main(plan: &Plan, net: Option<&NetConfig>, pipe: SyncPipe) -> ! {
    if pipe.wait_for_parent().is_err() {
        // Parent failed before waking us; it owns the error report.
        // SAFETY: terminating the child process.
        unsafe { libc::_exit(127) };
    }

    if let Err(e) = child_setup(plan, net) {
        let _ = writeln!(std::io::stderr(), "microbox: {e}");
        // SAFETY: terminating the child process.
        unsafe { libc::_exit(127) };
    }

    let e = exec_command(plan);
    let _ = writeln!(std::io::stderr(), "microbox: {e}");
    // SAFETY: terminating the child process.
    unsafe { libc::_exit(127) };
}

fn child_setup(plan: &Plan, net: Option<&NetConfig>) -> Result<()> {
    // The cgroup namespace captured at clone predates the cgroup attach;
    // re-rooting it here makes /sys/fs/cgroup show this sandbox's own
    // limits.
    // SAFETY: unshare with a flag argument only.
    if unsafe { libc::unshare(libc::CLONE_NEWCGROUP) } != 0 {
        tracing::debug!(errno = %microbox_sys::last_errno(), "cgroup namespace re-root skipped");
    }

    if !plan.hostname.is_empty() {
        // SAFETY: pointer/length pair of a live str buffer.
        let ret = unsafe {
            libc::sethostname(plan.hostname.as_ptr().cast(), plan.hostname.len())
        };
        if ret != 0 {
            tracing::warn!(errno = %microbox_sys::last_errno(), "sethostname failed");
        }
    }

    fs::setup(plan)?;

    if let Some(config) = net {
        net::configure_child(config)?;
    }

    capabilities::apply(&plan.capabilities)?;
    seccomp::install(&plan.allow_syscalls, &plan.deny_syscalls)?;
    Ok(())
}

/// Replaces the child with the user command. Only returns on failure.
fn exec_command(plan: &Plan) -> Error {
    let path = plan.argv[0].clone();
    let to_cstring = |s: &str| {
        CString::new(s.as_bytes()).map_err(|_| Error::ExecFailed {
            path: path.clone(),
            errno: rustix::io::Errno::INVAL,
        })
    };

    let argv = match plan
        .argv
        .iter()
        .map(|a| to_cstring(a))
        .collect::<std::result::Result<Vec<CString>, Error>>()
    {
        Ok(argv) => argv,
        Err(e) => return e,
    };
    let envp = match plan
        .env
        .iter()
        .map(|var| to_cstring(&format!("{}={}", var.key, var.value)))
        .collect::<std::result::Result<Vec<CString>, Error>>()
    {
        Ok(envp) => envp,
        Err(e) => return e,
    };

    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let envp_ptrs: Vec<*const libc::c_char> = envp
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    // SAFETY: argv/envp are null-terminated arrays of live CStrings.
    unsafe { libc::execve(argv[0].as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };

    Error::ExecFailed {
        path,
        errno: microbox_sys::last_errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FsMode;

    #[test]
    fn flags_for_default_plan() {
        let plan = Plan::new(["/bin/true"]);
        let flags = clone_flags(&plan);
        for required in [
            libc::CLONE_NEWPID,
            libc::CLONE_NEWUTS,
            libc::CLONE_NEWIPC,
            libc::CLONE_NEWCGROUP,
            libc::CLONE_NEWNS,
            libc::CLONE_NEWNET,
            libc::CLONE_NEWUSER,
        ] {
            assert_ne!(flags & required as u64, 0, "missing {required:#x}");
        }
        assert_ne!(flags & libc::CLONE_NEWTIME as u64, 0);
    }

    #[test]
    fn host_modes_drop_their_namespaces() {
        let plan = Plan::new(["/bin/true"]).net(NetMode::Host);
        assert_eq!(clone_flags(&plan) & libc::CLONE_NEWNET as u64, 0);

        let plan = Plan::new(["/bin/true"]).user_ns(UserNsMode::Host);
        assert_eq!(clone_flags(&plan) & libc::CLONE_NEWUSER as u64, 0);
    }

    #[test]
    fn rootless_policy() {
        // SAFETY: geteuid cannot fail.
        if unsafe { libc::geteuid() } == 0 {
            // Everything is permitted as root; nothing to assert here.
            return;
        }
        let Ok(info) = microbox_sys::check() else {
            return;
        };

        let plan = Plan::new(["/bin/true"]).net(NetMode::Bridge);
        assert!(matches!(
            check_privileges(&plan, info),
            Err(Error::PrivilegeRequired(_))
        ));

        let plan = Plan::new(["/bin/true"]).user_ns(UserNsMode::Host);
        assert!(matches!(
            check_privileges(&plan, info),
            Err(Error::PrivilegeRequired(_))
        ));

        let plan = Plan::new(["/bin/true"]).fs(FsMode::Tmpfs);
        if info.user_ns_enabled {
            assert!(check_privileges(&plan, info).is_ok());
        } else {
            assert!(matches!(
                check_privileges(&plan, info),
                Err(Error::Unsupported(_))
            ));
        }
    }
}
