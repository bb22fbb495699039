//! UID/GID mappings for the child's user namespace.
//!
//! Written by the parent, before the wake byte, so the child never runs
//! with an unmapped identity. Two paths:
//!
//! - **Privileged** (euid 0): container root maps straight to host root,
//!   range 1.
//! - **Rootless**: delegate to the setuid `newuidmap`/`newgidmap` helpers,
//!   mapping container root to the start of the caller's subordinate range
//!   (full length) plus an identity mapping of the caller's own IDs so
//!   their files stay accessible. This is the mapping runc and podman use.
//!
//! The kernel requires `setgroups` to read `deny` before an unprivileged
//! writer may touch `gid_map`, so that write always comes first. There is
//! deliberately no fallback to a root-less single mapping: a sandbox whose
//! root has no capabilities cannot mount anything, and silently degrading
//! would produce a crippled container.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Writes `setgroups`, `uid_map` and `gid_map` for `child_pid`.
pub fn setup_id_mappings(child_pid: i32) -> Result<()> {
    if child_pid <= 0 {
        return Err(Error::IdMapFailed(format!("invalid child pid {child_pid}")));
    }

    // SAFETY: geteuid/getegid cannot fail.
    let euid = unsafe { libc::geteuid() };
    let egid = unsafe { libc::getegid() };

    let setgroups = format!("/proc/{child_pid}/setgroups");
    let uid_map = format!("/proc/{child_pid}/uid_map");
    let gid_map = format!("/proc/{child_pid}/gid_map");

    // Required before gid_map on modern kernels; harmless when privileged.
    let _ = std::fs::write(&setgroups, "deny");

    if euid == 0 {
        write_map(&uid_map, 0, euid, 1)?;
        write_map(&gid_map, 0, egid, 1)?;
        return Ok(());
    }

    let newuidmap = find_in_path("newuidmap");
    let newgidmap = find_in_path("newgidmap");
    let (Some(newuidmap), Some(newgidmap)) = (newuidmap, newgidmap) else {
        return Err(Error::IdMapFailed(
            "rootless ID mapping requires newuidmap/newgidmap (shadow-utils); \
             install them or run as root"
                .into(),
        ));
    };

    let user = current_username(euid)?;
    let (uid_start, uid_len) = first_subid_range(Path::new("/etc/subuid"), &user, euid)?;
    let (gid_start, gid_len) = first_subid_range(Path::new("/etc/subgid"), &user, egid)?;

    run_map_helper(
        &newuidmap,
        child_pid,
        &[(0, uid_start, uid_len), (euid, euid, 1)],
    )?;
    run_map_helper(
        &newgidmap,
        child_pid,
        &[(0, gid_start, gid_len), (egid, egid, 1)],
    )?;
    Ok(())
}

fn write_map(path: &str, inside: u32, outside: u32, length: u32) -> Result<()> {
    std::fs::write(path, format!("{inside} {outside} {length}\n"))
        .map_err(|e| Error::IdMapFailed(format!("write {path}: {e}")))
}

fn run_map_helper(helper: &Path, child_pid: i32, ranges: &[(u32, u32, u32)]) -> Result<()> {
    let mut cmd = Command::new(helper);
    cmd.arg(child_pid.to_string());
    for (inside, outside, length) in ranges {
        cmd.args([inside.to_string(), outside.to_string(), length.to_string()]);
    }
    let output = cmd
        .output()
        .map_err(|e| Error::IdMapFailed(format!("{}: {e}", helper.display())))?;
    if !output.status.success() {
        return Err(Error::IdMapFailed(format!(
            "{} failed: {}",
            helper.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Username of the calling user, for the subid lookup.
fn current_username(euid: u32) -> Result<String> {
    let passwd = std::fs::read_to_string("/etc/passwd")
        .map_err(|e| Error::IdMapFailed(format!("read /etc/passwd: {e}")))?;
    for line in passwd.lines() {
        let mut fields = line.split(':');
        let name = fields.next().unwrap_or_default();
        let uid = fields.nth(1).and_then(|u| u.parse::<u32>().ok());
        if uid == Some(euid) {
            return Ok(name.to_string());
        }
    }
    Err(Error::IdMapFailed(format!(
        "no /etc/passwd entry for uid {euid}"
    )))
}

/// First `/etc/subuid`-style range for `user` (by name or numeric ID).
fn first_subid_range(file: &Path, user: &str, id: u32) -> Result<(u32, u32)> {
    let content = std::fs::read_to_string(file).map_err(|_| {
        Error::IdMapFailed(format!(
            "configure {} (e.g. '{user}:100000:65536') or run as root",
            file.display()
        ))
    })?;
    if let Some(range) = parse_subid_ranges(&content, user, id) {
        return Ok(range);
    }
    Err(Error::IdMapFailed(format!(
        "no {} entry for user {user:?}; add '{user}:100000:65536' or run as root",
        file.display()
    )))
}

fn parse_subid_ranges(content: &str, user: &str, id: u32) -> Option<(u32, u32)> {
    let id_str = id.to_string();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(':');
        let (Some(name), Some(start), Some(len)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if name != user && name != id_str {
            continue;
        }
        if let (Ok(start), Ok(len)) = (start.parse::<u32>(), len.parse::<u32>()) {
            if len > 0 {
                return Some((start, len));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subid_parsing() {
        let content = "# comment\n\nalice:100000:65536\nbob:200000:65536\n";
        assert_eq!(
            parse_subid_ranges(content, "alice", 1000),
            Some((100000, 65536))
        );
        assert_eq!(
            parse_subid_ranges(content, "bob", 1001),
            Some((200000, 65536))
        );
        assert_eq!(parse_subid_ranges(content, "carol", 1002), None);
    }

    #[test]
    fn subid_numeric_match_and_bad_lines() {
        let content = "1000:300000:65536\nmallory:zero:10\nempty:1:0\n";
        assert_eq!(
            parse_subid_ranges(content, "alice", 1000),
            Some((300000, 65536))
        );
        // Unparseable and zero-length ranges are ignored.
        assert_eq!(parse_subid_ranges(content, "mallory", 7), None);
        assert_eq!(parse_subid_ranges(content, "empty", 8), None);
    }
}
