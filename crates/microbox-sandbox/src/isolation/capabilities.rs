//! Capability reduction for the sandboxed process.
//!
//! The baseline matches the Docker/runc default allow-list; user
//! `--cap-add`/`--cap-drop` deltas apply on top, and `--cap-drop ALL`
//! empties the baseline first. The final set lands in all four process
//! capability sets (bounding, permitted, effective, inheritable) with the
//! ambient set cleared, after `PR_SET_NO_NEW_PRIVS`.
//!
//! Unknown capability names are hard errors: the user named something
//! specific and silently ignoring it would change the sandbox's privilege
//! surface.

use std::collections::HashSet;
use std::str::FromStr;

use caps::{CapSet, Capability, CapsHashSet};

use crate::error::{Error, Result};
use crate::plan::CapabilityOpts;

/// Docker-equivalent default capability allow-list.
pub const DEFAULT_CAPS: &[Capability] = &[
    Capability::CAP_CHOWN,
    Capability::CAP_DAC_OVERRIDE,
    Capability::CAP_FSETID,
    Capability::CAP_FOWNER,
    Capability::CAP_MKNOD,
    Capability::CAP_NET_RAW,
    Capability::CAP_SETGID,
    Capability::CAP_SETUID,
    Capability::CAP_SETFCAP,
    Capability::CAP_SETPCAP,
    Capability::CAP_NET_BIND_SERVICE,
    Capability::CAP_SYS_CHROOT,
    Capability::CAP_KILL,
    Capability::CAP_AUDIT_READ,
    Capability::CAP_AUDIT_WRITE,
];

/// Parses a capability name: case-insensitive, `CAP_` prefix optional.
///
/// # Errors
///
/// Returns `InvalidOption` for names the kernel headers don't know.
pub fn parse_cap(name: &str) -> Result<Capability> {
    let normalized = normalize(name);
    Capability::from_str(&normalized)
        .map_err(|_| Error::InvalidOption(format!("unknown capability {name:?}")))
}

/// True if `name` is the special `ALL` marker accepted by `--cap-drop`.
#[must_use]
pub fn is_all(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case("all")
}

fn normalize(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    }
}

/// The final capability set: `baseline ∪ add \ drop` (empty baseline when
/// `drop_all` is set).
#[must_use]
pub fn effective_set(opts: &CapabilityOpts) -> CapsHashSet {
    let mut set: HashSet<Capability> = if opts.drop_all {
        HashSet::new()
    } else {
        DEFAULT_CAPS.iter().copied().collect()
    };
    for cap in &opts.drop {
        set.remove(cap);
    }
    for cap in &opts.add {
        set.insert(*cap);
    }
    set
}

/// Applies the computed set to the current process.
///
/// Runs in the child after filesystem setup. Ordering matters: bounding
/// drops and the inheritable write need CAP_SETPCAP still effective, so the
/// effective/permitted reductions come last.
pub fn apply(opts: &CapabilityOpts) -> Result<()> {
    let err = |what: &str, e: caps::errors::CapsError| {
        Error::CapabilityFailed(format!("{what}: {e}"))
    };

    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS) takes no pointers.
    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
        return Err(Error::CapabilityFailed(format!(
            "prctl(NO_NEW_PRIVS): {}",
            microbox_sys::last_errno()
        )));
    }

    let target = effective_set(opts);

    caps::clear(None, CapSet::Ambient).map_err(|e| err("clear ambient", e))?;

    for cap in caps::all() {
        if !target.contains(&cap) {
            // Bounding caps can only be dropped one by one.
            caps::drop(None, CapSet::Bounding, cap).map_err(|e| err("drop bounding", e))?;
        }
    }

    caps::set(None, CapSet::Inheritable, &target).map_err(|e| err("set inheritable", e))?;
    caps::set(None, CapSet::Effective, &target).map_err(|e| err("set effective", e))?;
    caps::set(None, CapSet::Permitted, &target).map_err(|e| err("set permitted", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(parse_cap("CAP_NET_ADMIN").unwrap(), Capability::CAP_NET_ADMIN);
        assert_eq!(parse_cap("net_admin").unwrap(), Capability::CAP_NET_ADMIN);
        assert_eq!(parse_cap(" Chown ").unwrap(), Capability::CAP_CHOWN);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(matches!(
            parse_cap("CAP_TELEPORT"),
            Err(Error::InvalidOption(_))
        ));
    }

    #[test]
    fn all_marker() {
        assert!(is_all("ALL"));
        assert!(is_all("all"));
        assert!(!is_all("CAP_ALL"));
    }

    #[test]
    fn set_composition() {
        let opts = CapabilityOpts {
            add: vec![Capability::CAP_NET_ADMIN],
            drop: vec![Capability::CAP_CHOWN],
            drop_all: false,
        };
        let set = effective_set(&opts);
        assert!(set.contains(&Capability::CAP_NET_ADMIN));
        assert!(!set.contains(&Capability::CAP_CHOWN));
        assert!(set.contains(&Capability::CAP_KILL));
    }

    #[test]
    fn drop_all_keeps_only_adds() {
        let opts = CapabilityOpts {
            add: vec![Capability::CAP_KILL],
            drop: vec![],
            drop_all: true,
        };
        let set = effective_set(&opts);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&Capability::CAP_KILL));
    }

    #[test]
    fn add_wins_over_drop() {
        // add ∪ ... \ drop is applied drop-first, so re-adding wins.
        let opts = CapabilityOpts {
            add: vec![Capability::CAP_CHOWN],
            drop: vec![Capability::CAP_CHOWN],
            drop_all: false,
        };
        assert!(effective_set(&opts).contains(&Capability::CAP_CHOWN));
    }
}
