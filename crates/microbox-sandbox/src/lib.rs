//! Linux sandbox orchestration.
//!
//! Spawns a command inside a fresh combination of kernel namespaces with a
//! private root filesystem, cgroup v2 limits, a reduced capability set, a
//! seccomp filter and optional bridged networking, then waits for it and
//! tears down every host-side resource it created.
//!
//! ## Example
//!
//! ```ignore
//! use microbox_sandbox::{Plan, spawn};
//!
//! let plan = Plan::new(["/bin/sh", "-c", "echo hi"]);
//! let process = spawn(&plan)?;
//! let exit_code = process.wait()?;
//! ```
//!
//! ## Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`plan`] | launch plan, modes, builder |
//! | [`validate`] | invariant checks before anything is touched |
//! | [`env`] | baseline/user environment merging |
//! | [`fs`] | private root construction (tmpfs/overlay/host), `pivot_root` |
//! | [`isolation`] | id maps, cgroups, capabilities, seccomp |
//! | [`net`] | bridge + veth plumbing, address leases, firewall |
//! | [`sandbox`] | the parent/child choreography itself |
//!
//! Linux-only: the crate leans on namespaces, cgroup v2, `clone3` and
//! pidfds throughout.

pub mod env;
pub mod error;
pub mod fs;
pub mod isolation;
pub mod net;
pub mod plan;
pub mod sandbox;
pub mod validate;

pub use env::EnvVar;
pub use error::{Error, Result};
pub use plan::{CapabilityOpts, FsMode, MountSpec, NetMode, Plan, UserNsMode};
pub use sandbox::{SandboxProcess, spawn};
