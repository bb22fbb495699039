//! Sandbox launch plan.
//!
//! A [`Plan`] describes everything needed to run a command in the sandbox:
//! the filesystem strategy, network mode, identity, resource limits,
//! security deltas, and the command itself. It is fully populated before
//! spawn; nothing is negotiated afterwards.
//!
//! ## Example
//!
//! ```ignore
//! use microbox_sandbox::{Plan, FsMode, NetMode};
//!
//! let plan = Plan::new(["/bin/sh", "-c", "echo hi"])
//!     .fs(FsMode::Tmpfs)
//!     .net(NetMode::Bridge)
//!     .memory(64 * 1024 * 1024)
//!     .cpus(0.5)
//!     .hostname("alpha");
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `fs` | `Tmpfs` |
//! | `net` | `None` |
//! | `user_ns` | `Isolated` |
//! | `storage_bytes` | 512 MiB |
//! | `cpus` / `memory_bytes` | 0 (unlimited) |
//! | `env` | baseline `PATH`, `HOME`, `TERM`, `LANG` |

use std::net::IpAddr;
use std::path::PathBuf;

use caps::Capability;
use uuid::Uuid;

use crate::env::{self, EnvVar};

/// Root filesystem strategy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FsMode {
    /// Empty tmpfs root with `/proc`, `/dev`, `/tmp`, `/etc` built inside.
    #[default]
    Tmpfs,
    /// The host's root, bind-mounted under a private mount table.
    Host,
    /// An overlay whose read-only lower layer is the given directory.
    Rootfs(PathBuf),
}

impl std::fmt::Display for FsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsMode::Tmpfs => write!(f, "tmpfs"),
            FsMode::Host => write!(f, "host"),
            FsMode::Rootfs(path) => write!(f, "rootfs({})", path.display()),
        }
    }
}

/// Network mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetMode {
    /// Fresh network namespace with only loopback.
    #[default]
    None,
    /// Share the host's network namespace.
    Host,
    /// Veth pair to a shared bridge with NAT egress.
    Bridge,
}

impl std::fmt::Display for NetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetMode::None => write!(f, "none"),
            NetMode::Host => write!(f, "host"),
            NetMode::Bridge => write!(f, "bridge"),
        }
    }
}

/// User namespace mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserNsMode {
    /// New user namespace with root mapped per the ID-mapping policy.
    #[default]
    Isolated,
    /// Stay in the host's user namespace.
    Host,
}

/// A single bind mount from the host into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Path on the host filesystem.
    pub host: PathBuf,
    /// Absolute path inside the sandbox.
    pub dest: PathBuf,
    /// If true, remounted read-only after binding.
    pub read_only: bool,
}

impl MountSpec {
    pub fn ro(host: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            dest: dest.into(),
            read_only: true,
        }
    }

    pub fn rw(host: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            dest: dest.into(),
            read_only: false,
        }
    }
}

/// Capability deltas applied on top of the default allow-list.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOpts {
    /// Capabilities added to the baseline.
    pub add: Vec<Capability>,
    /// Capabilities removed from the baseline.
    pub drop: Vec<Capability>,
    /// `--cap-drop ALL`: start from an empty set instead of the baseline.
    pub drop_all: bool,
}

/// Complete sandbox launch plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this launch.
    pub id: Uuid,
    pub fs: FsMode,
    /// Remount the new `/` read-only after setup.
    pub read_only: bool,
    /// Byte budget of the in-memory root.
    pub storage_bytes: u64,
    pub mounts_ro: Vec<MountSpec>,
    pub mounts_rw: Vec<MountSpec>,
    pub net: NetMode,
    /// Nameservers written to the sandbox resolv.conf.
    pub nameservers: Vec<IpAddr>,
    /// UTS hostname; empty means leave the namespace default.
    pub hostname: String,
    pub user_ns: UserNsMode,
    pub capabilities: CapabilityOpts,
    /// Fractional CPU cores; 0 = unlimited.
    pub cpus: f64,
    /// Memory budget in bytes; 0 = unlimited.
    pub memory_bytes: u64,
    /// Seccomp deny-list subtractions.
    pub allow_syscalls: Vec<String>,
    /// Seccomp deny-list additions.
    pub deny_syscalls: Vec<String>,
    /// Command and arguments; `argv[0]` is the path to execute.
    pub argv: Vec<String>,
    /// Merged environment (baseline first, user keys sorted after).
    pub env: Vec<EnvVar>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            fs: FsMode::default(),
            read_only: false,
            storage_bytes: 512 * 1024 * 1024,
            mounts_ro: Vec::new(),
            mounts_rw: Vec::new(),
            net: NetMode::default(),
            nameservers: Vec::new(),
            hostname: String::new(),
            user_ns: UserNsMode::default(),
            capabilities: CapabilityOpts::default(),
            cpus: 0.0,
            memory_bytes: 0,
            allow_syscalls: Vec::new(),
            deny_syscalls: Vec::new(),
            argv: Vec::new(),
            env: env::merge(&[]),
        }
    }
}

impl Plan {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn fs(mut self, fs: FsMode) -> Self {
        self.fs = fs;
        self
    }

    pub fn net(mut self, net: NetMode) -> Self {
        self.net = net;
        self
    }

    pub fn user_ns(mut self, mode: UserNsMode) -> Self {
        self.user_ns = mode;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn storage(mut self, bytes: u64) -> Self {
        self.storage_bytes = bytes;
        self
    }

    pub fn mount(mut self, spec: MountSpec) -> Self {
        if spec.read_only {
            self.mounts_ro.push(spec);
        } else {
            self.mounts_rw.push(spec);
        }
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn cpus(mut self, cpus: f64) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn nameserver(mut self, ip: IpAddr) -> Self {
        self.nameservers.push(ip);
        self
    }

    pub fn capabilities(mut self, caps: CapabilityOpts) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn allow_syscall(mut self, name: impl Into<String>) -> Self {
        self.allow_syscalls.push(name.into());
        self
    }

    pub fn deny_syscall(mut self, name: impl Into<String>) -> Self {
        self.deny_syscalls.push(name.into());
        self
    }

    /// Replaces the environment with the baseline merged with `user` entries.
    pub fn environment(mut self, user: &[EnvVar]) -> Self {
        self.env = env::merge(user);
        self
    }

    /// All bind mounts in application order (read-only first).
    pub(crate) fn mounts(&self) -> impl Iterator<Item = &MountSpec> {
        self.mounts_ro.iter().chain(self.mounts_rw.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_new() {
        let plan = Plan::new(["/bin/echo", "hi"]);
        assert_eq!(plan.argv, vec!["/bin/echo", "hi"]);
        assert_eq!(plan.fs, FsMode::Tmpfs);
        assert_eq!(plan.net, NetMode::None);
        assert_eq!(plan.cpus, 0.0);
    }

    #[test]
    fn plan_builder() {
        let plan = Plan::new(["/bin/true"])
            .fs(FsMode::Rootfs("/srv/rootfs".into()))
            .net(NetMode::Bridge)
            .memory(64 * 1024 * 1024)
            .cpus(1.5)
            .hostname("alpha")
            .mount(MountSpec::ro("/etc", "/host-etc"))
            .mount(MountSpec::rw("/data", "/data"));

        assert_eq!(plan.fs, FsMode::Rootfs("/srv/rootfs".into()));
        assert_eq!(plan.hostname, "alpha");
        assert_eq!(plan.mounts_ro.len(), 1);
        assert_eq!(plan.mounts_rw.len(), 1);
        assert_eq!(plan.mounts().count(), 2);
    }

    #[test]
    fn default_env_is_baseline() {
        let plan = Plan::new(["/bin/true"]);
        let keys: Vec<&str> = plan.env.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["PATH", "HOME", "TERM", "LANG"]);
    }
}
