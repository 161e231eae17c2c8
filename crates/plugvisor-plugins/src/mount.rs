//! Mount propagation for plugin rootfs paths.
//!
//! Volume and graph driver plugins create mounts inside their rootfs that
//! the host must see. The manager makes the propagated path a recursive
//! shared mount point before start and unmounts it after exit.

use std::fmt::Debug;
use std::path::Path;

/// Mount operations used by the manager.
pub trait Mounter: Send + Sync + Debug {
    /// Make `path` a mount point with recursive shared propagation,
    /// bind-mounting it onto itself first if needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error.
    fn make_rshared(&self, path: &Path) -> std::io::Result<()>;

    /// Unmount `path` if it is a mount point.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error.
    fn unmount(&self, path: &Path) -> std::io::Result<()>;
}

/// [`Mounter`] backed by the host kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounter;

#[cfg(target_os = "linux")]
impl Mounter for HostMounter {
    fn make_rshared(&self, path: &Path) -> std::io::Result<()> {
        use nix::mount::{MsFlags, mount};

        if !is_mounted(path)? {
            mount(
                Some(path),
                path,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )?;
        }
        mount(
            None::<&str>,
            path,
            None::<&str>,
            MsFlags::MS_SHARED | MsFlags::MS_REC,
            None::<&str>,
        )?;
        Ok(())
    }

    fn unmount(&self, path: &Path) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::mount::{MntFlags, umount2};

        if !is_mounted(path)? {
            return Ok(());
        }
        match umount2(path, MntFlags::empty()) {
            Err(Errno::EBUSY) => umount2(path, MntFlags::MNT_DETACH)?,
            other => other?,
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for HostMounter {
    fn make_rshared(&self, _path: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "mount propagation requires Linux",
        ))
    }

    fn unmount(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn is_mounted(path: &Path) -> std::io::Result<bool> {
    let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mountinfo_contains(&mountinfo, path))
}

/// Whether a `/proc/self/mountinfo` listing has `path` as a mount point.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn mountinfo_contains(mountinfo: &str, path: &Path) -> bool {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|field| Path::new(&unescape_mountinfo(field)) == path)
}

/// Decode the `\NNN` octal escapes mountinfo uses for whitespace.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(code) = bytes
                .get(i.saturating_add(1)..i.saturating_add(4))
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(code);
                i = i.saturating_add(4);
                continue;
            }
        }
        out.push(bytes[i]);
        i = i.saturating_add(1);
    }
    String::from_utf8_lossy(&out).into_owned()
}
