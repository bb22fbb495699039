//! Low-level mount primitives for the filesystem builder.
//!
//! Thin wrappers over `mount(2)`, `pivot_root(2)` and friends. Everything
//! here runs in the child, inside its private mount namespace; nothing can
//! propagate back to the host once the root is rec-private.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rustix::io::Errno;
use rustix::process::pivot_root as sys_pivot_root;

use crate::error::{Error, Result};
use crate::plan::MountSpec;

/// Upper/work/merged layout of an overlay root on tmpfs.
#[derive(Debug)]
pub struct OverlayLayout {
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
}

fn path_to_cstring(path: &Path) -> std::result::Result<CString, Errno> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::INVAL)
}

/// `mount(2)` with optional source/fstype/data, mapped to `MountFailed`.
pub(crate) fn raw(
    source: Option<&str>,
    target: &Path,
    fstype: Option<&str>,
    flags: libc::c_ulong,
    data: Option<&str>,
) -> Result<()> {
    let err = |errno| Error::mount(target, errno);
    let source = source
        .map(|s| CString::new(s).map_err(|_| err(Errno::INVAL)))
        .transpose()?;
    let fstype = fstype
        .map(|s| CString::new(s).map_err(|_| err(Errno::INVAL)))
        .transpose()?;
    let data = data
        .map(|s| CString::new(s).map_err(|_| err(Errno::INVAL)))
        .transpose()?;
    let target = path_to_cstring(target).map_err(err)?;

    let as_ptr = |c: &Option<CString>| c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());
    // SAFETY: all pointers are either null or point to live CStrings.
    let ret = unsafe {
        libc::mount(
            as_ptr(&source),
            target.as_ptr(),
            as_ptr(&fstype),
            flags,
            as_ptr(&data).cast(),
        )
    };
    if ret != 0 {
        return Err(err(microbox_sys::last_errno()));
    }
    Ok(())
}

/// Marks the whole mount table private so nothing propagates to the host.
///
/// This must be the first mount operation in the child.
pub fn make_rprivate() -> Result<()> {
    raw(
        None,
        Path::new("/"),
        None,
        libc::MS_PRIVATE | libc::MS_REC,
        None,
    )
}

/// Creates `path` and mounts a tmpfs of `size` bytes on it.
pub fn mount_tmpfs(path: &Path, size: u64, mode: &str) -> Result<()> {
    std::fs::create_dir_all(path).map_err(io_to_mount(path))?;
    raw(
        Some("tmpfs"),
        path,
        Some("tmpfs"),
        libc::MS_NOSUID | libc::MS_NODEV,
        Some(&format!("mode={mode},size={size}")),
    )
}

/// Resolves an absolute in-sandbox destination under `base`.
pub(crate) fn resolve_target(base: &Path, dest: &Path) -> PathBuf {
    match dest.strip_prefix("/") {
        Ok(rel) => base.join(rel),
        Err(_) => base.join(dest),
    }
}

/// Bind-mounts one spec under `base`.
///
/// Directory sources get their target created recursively; file-like sources
/// (regular, char, block, fifo, socket) get a touched placeholder. Symlink
/// sources are refused. The mount carries `MS_NOSUID|MS_NODEV` and is
/// remounted read-only when the spec asks for it.
pub fn bind_mount(base: &Path, spec: &MountSpec) -> Result<()> {
    let target = resolve_target(base, &spec.dest);

    let meta = std::fs::symlink_metadata(&spec.host).map_err(io_to_mount(&spec.host))?;
    let ftype = meta.file_type();
    if ftype.is_symlink() {
        return Err(Error::InvalidOption(format!(
            "bind-mounting symlinks is not supported: {:?}",
            spec.host
        )));
    }
    if ftype.is_dir() {
        std::fs::create_dir_all(&target).map_err(io_to_mount(&target))?;
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_to_mount(parent))?;
        }
        if !target.exists() {
            std::fs::File::create(&target).map_err(io_to_mount(&target))?;
        }
    }

    let host = spec
        .host
        .to_str()
        .ok_or_else(|| Error::mount(&spec.host, Errno::INVAL))?;
    raw(
        Some(host),
        &target,
        None,
        libc::MS_BIND | libc::MS_REC | libc::MS_NOSUID | libc::MS_NODEV,
        None,
    )?;

    if spec.read_only {
        raw(
            None,
            &target,
            None,
            libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY | libc::MS_NOSUID | libc::MS_NODEV,
            None,
        )?;
    }
    Ok(())
}

/// Builds an overlay over `lower` with upper/work/merged on `mountpoint`.
///
/// `mountpoint` must already sit on a writable filesystem (the /box tmpfs).
pub fn create_overlay(lower: &Path, mountpoint: &Path) -> Result<OverlayLayout> {
    let layout = OverlayLayout {
        lower: lower.to_path_buf(),
        upper: mountpoint.join("upper"),
        work: mountpoint.join("work"),
        merged: mountpoint.join("merged"),
    };
    for dir in [&layout.upper, &layout.work, &layout.merged] {
        std::fs::create_dir_all(dir).map_err(io_to_mount(dir))?;
    }

    let opts = format!(
        "lowerdir={},upperdir={},workdir={}",
        layout.lower.display(),
        layout.upper.display(),
        layout.work.display()
    );
    raw(
        Some("overlay"),
        &layout.merged,
        Some("overlay"),
        0,
        Some(&opts),
    )?;
    Ok(layout)
}

/// Swaps the root for `new_root` and detaches the old one.
///
/// `chdir(new_root)`, `pivot_root(., ./.old_root)`, `chdir("/")`,
/// lazy-unmount and remove `/.old_root`.
pub fn pivot_to(new_root: &Path) -> Result<()> {
    let err = |errno| Error::mount(new_root, errno);

    std::env::set_current_dir(new_root).map_err(io_to_mount(new_root))?;
    std::fs::create_dir_all(".old_root").map_err(io_to_mount(new_root))?;
    sys_pivot_root(".", "./.old_root").map_err(err)?;
    std::env::set_current_dir("/").map_err(io_to_mount(new_root))?;

    // SAFETY: static path strings.
    let ret = unsafe { libc::umount2(c"/.old_root".as_ptr(), libc::MNT_DETACH) };
    if ret != 0 {
        return Err(err(microbox_sys::last_errno()));
    }
    std::fs::remove_dir("/.old_root").map_err(io_to_mount(new_root))?;
    Ok(())
}

/// Remounts the current root read-only.
pub fn remount_root_readonly() -> Result<()> {
    raw(
        None,
        Path::new("/"),
        None,
        libc::MS_REMOUNT | libc::MS_RDONLY,
        None,
    )
}

/// Bind-to-self then read-only remount of `target` with hardening flags.
/// Used for the locked-down /proc subpaths.
pub(crate) fn readonly_remount(target: &Path) -> Result<()> {
    let source = target
        .to_str()
        .ok_or_else(|| Error::mount(target, Errno::INVAL))?;
    raw(Some(source), target, None, libc::MS_BIND, None)?;
    raw(
        None,
        target,
        None,
        libc::MS_BIND
            | libc::MS_REMOUNT
            | libc::MS_RDONLY
            | libc::MS_NOSUID
            | libc::MS_NODEV
            | libc::MS_NOEXEC,
        None,
    )
}

pub(crate) fn io_to_mount(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| Error::mount(path, Errno::from_raw_os_error(e.raw_os_error().unwrap_or(libc::EIO)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_resolution_strips_leading_slash() {
        assert_eq!(
            resolve_target(Path::new("/box"), Path::new("/etc/hosts")),
            Path::new("/box/etc/hosts")
        );
        assert_eq!(
            resolve_target(Path::new("/box"), Path::new("/")),
            Path::new("/box")
        );
    }
}
