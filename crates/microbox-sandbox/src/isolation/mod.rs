//! Host-side and child-side isolation pieces.
//!
//! - **idmap** - user namespace UID/GID mappings (parent, pre-wake)
//! - **cgroup** - cgroup v2 limits and attach (parent, pre-wake)
//! - **capabilities** - capability reduction (child, post-filesystem)
//! - **seccomp** - syscall filter (child, last before exec)

pub mod capabilities;
pub mod cgroup;
pub mod idmap;
pub mod seccomp;
