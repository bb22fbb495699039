//! Sandbox `/etc` and `/tmp`.
//!
//! The sandbox gets its own `resolv.conf` rather than a bind of the host's:
//! hosts running systemd-resolved or a local stub resolver would hand the
//! sandbox a nameserver it cannot reach. `/etc/hosts` is bound read-only
//! when present, and the configured hostname lands in `/etc/hostname`.

use std::net::IpAddr;
use std::path::Path;

use crate::error::Result;
use crate::fs::mount;
use crate::plan::MountSpec;

/// Nameservers used when the plan provides none.
const DEFAULT_NAMESERVERS: [IpAddr; 2] = [
    IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 8, 8)),
    IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 4, 4)),
];

/// Builds `/etc` under `base`.
pub fn setup_etc(base: &Path, nameservers: &[IpAddr], hostname: &str) -> Result<()> {
    let etc = mount::resolve_target(base, Path::new("/etc"));
    std::fs::create_dir_all(&etc).map_err(mount::io_to_mount(&etc))?;

    if let Err(e) = write_resolv_conf(&etc, nameservers) {
        tracing::warn!(error = %e, "failed to set nameservers");
    }

    if Path::new("/etc/hosts").exists() {
        mount::bind_mount(base, &MountSpec::ro("/etc/hosts", "/etc/hosts"))?;
    }

    if !hostname.is_empty() {
        if let Err(e) = std::fs::write(etc.join("hostname"), format!("{hostname}\n")) {
            tracing::warn!(error = %e, "failed to write /etc/hostname");
        }
    }

    Ok(())
}

fn write_resolv_conf(etc: &Path, nameservers: &[IpAddr]) -> Result<()> {
    let resolv = etc.join("resolv.conf");

    // A pre-existing symlink (e.g. into /run/systemd) must not be followed.
    if let Ok(meta) = std::fs::symlink_metadata(&resolv) {
        if meta.file_type().is_symlink() {
            std::fs::remove_file(&resolv).map_err(mount::io_to_mount(&resolv))?;
        }
    }

    let mut content = String::new();
    let servers: &[IpAddr] = if nameservers.is_empty() {
        &DEFAULT_NAMESERVERS
    } else {
        nameservers
    };
    for ns in servers {
        content.push_str(&format!("nameserver {ns}\n"));
    }

    std::fs::write(&resolv, content).map_err(mount::io_to_mount(&resolv))
}

/// Ensures `/tmp` exists, world-writable and sticky.
pub fn ensure_tmp(base: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let tmp = mount::resolve_target(base, Path::new("/tmp"));
    std::fs::create_dir_all(&tmp).map_err(mount::io_to_mount(&tmp))?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o1777))
        .map_err(mount::io_to_mount(&tmp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolv_conf_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_resolv_conf(dir.path(), &[]).unwrap();
        let content = std::fs::read_to_string(dir.path().join("resolv.conf")).unwrap();
        assert_eq!(content, "nameserver 8.8.8.8\nnameserver 8.8.4.4\n");
    }

    #[test]
    fn resolv_conf_custom_and_symlink_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let resolv = dir.path().join("resolv.conf");
        std::os::unix::fs::symlink("/run/somewhere/stub.conf", &resolv).unwrap();

        let ns = ["1.1.1.1".parse().unwrap()];
        write_resolv_conf(dir.path(), &ns).unwrap();

        let meta = std::fs::symlink_metadata(&resolv).unwrap();
        assert!(!meta.file_type().is_symlink());
        assert_eq!(
            std::fs::read_to_string(&resolv).unwrap(),
            "nameserver 1.1.1.1\n"
        );
    }

    #[test]
    fn tmp_is_sticky() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        ensure_tmp(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join("tmp"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }
}
