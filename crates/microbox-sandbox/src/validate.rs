//! Plan validation.
//!
//! Every invariant of the data model is checked here, before any host
//! resource is touched, so a bad plan can never leave half-built state:
//!
//! - `argv` non-empty, no empty or NUL-containing arguments
//! - every bind destination is absolute
//! - the host-root filesystem mode forbids bind mounts
//! - resource values are finite and non-negative

use crate::error::{Error, Result};
use crate::plan::{FsMode, Plan};

/// Validates the plan against the data-model invariants.
///
/// # Errors
///
/// Returns `InvalidOption` with a message naming the offending field.
pub fn validate(plan: &Plan) -> Result<()> {
    if plan.argv.is_empty() {
        return Err(Error::InvalidOption(
            "missing command; usage: microbox [options] -- command [args...]".into(),
        ));
    }
    for (i, arg) in plan.argv.iter().enumerate() {
        if i == 0 && arg.is_empty() {
            return Err(Error::InvalidOption("command cannot be empty".into()));
        }
        if arg.contains('\0') {
            return Err(Error::InvalidOption(format!(
                "argument {i} contains a NUL byte"
            )));
        }
    }

    for spec in plan.mounts() {
        if !spec.dest.is_absolute() {
            return Err(Error::InvalidOption(format!(
                "mount destination {:?} must be absolute",
                spec.dest
            )));
        }
        if spec.host.as_os_str().is_empty() {
            return Err(Error::InvalidOption("mount source cannot be empty".into()));
        }
    }

    if plan.fs == FsMode::Host && plan.mounts().next().is_some() {
        return Err(Error::InvalidOption(
            "--fs host conflicts with --mount-ro/--mount-rw (requires a private root)".into(),
        ));
    }

    if let FsMode::Rootfs(path) = &plan.fs {
        if !path.is_dir() {
            return Err(Error::InvalidOption(format!(
                "rootfs {:?} is not a directory",
                path
            )));
        }
    }

    if !plan.cpus.is_finite() || plan.cpus < 0.0 {
        return Err(Error::InvalidOption(format!(
            "--cpus {} must be a non-negative number",
            plan.cpus
        )));
    }

    for var in &plan.env {
        if var.key.contains('\0') || var.value.contains('\0') {
            return Err(Error::InvalidOption(format!(
                "environment variable {:?} contains a NUL byte",
                var.key
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MountSpec;

    #[test]
    fn accepts_minimal_plan() {
        assert!(validate(&Plan::new(["/bin/true"])).is_ok());
    }

    #[test]
    fn rejects_empty_argv() {
        let plan = Plan::new(Vec::<String>::new());
        assert!(matches!(validate(&plan), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn rejects_relative_mount_dest() {
        let plan = Plan::new(["/bin/true"]).mount(MountSpec::ro("/etc", "etc"));
        assert!(matches!(validate(&plan), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn rejects_host_fs_with_mounts() {
        let plan = Plan::new(["/bin/true"])
            .fs(FsMode::Host)
            .mount(MountSpec::ro("/etc", "/etc"));
        let err = validate(&plan).unwrap_err();
        assert!(err.to_string().contains("host"), "{err}");
    }

    #[test]
    fn rejects_negative_cpus() {
        let plan = Plan::new(["/bin/true"]).cpus(-1.0);
        assert!(validate(&plan).is_err());
        let plan = Plan::new(["/bin/true"]).cpus(f64::NAN);
        assert!(validate(&plan).is_err());
    }
}
