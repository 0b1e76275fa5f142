//! Filesystem plan execution.
//!
//! Runs inside the child's fresh mount namespace, after the cgroup attach
//! and before the credential drop. The step order is fixed: bind mounts,
//! read-only remounts, chroot (with a fresh /proc), tmpfs mounts, the
//! optional /dev rebuild, and the final chdir. Any failure aborts the
//! child.

use crate::config::FsPlan;
use crate::error::{LrunError, Result};
use nix::mount::{mount, MsFlags};
use nix::sys::stat::{self, makedev, mknod, Mode, SFlag};
use nix::unistd;
use std::path::Path;

/// Basic character devices recreated by the /dev rebuild.
const BASIC_DEVICES: [(&str, u64, u64); 6] = [
    ("null", 1, 3),
    ("zero", 1, 5),
    ("full", 1, 7),
    ("random", 1, 8),
    ("urandom", 1, 9),
    ("tty", 5, 0),
];

pub fn apply(plan: &FsPlan) -> Result<()> {
    for (dest, src) in &plan.binds {
        bind(dest, src)?;
    }

    for (dest, flags) in &plan.remounts {
        remount(dest, *flags)?;
    }

    if let Some(root) = &plan.chroot {
        enter_root(root)?;
    }

    for (path, bytes) in &plan.tmpfs {
        mount_tmpfs(path, *bytes)?;
    }

    if plan.remount_dev {
        rebuild_dev()?;
    }

    if let Some(dir) = &plan.chdir {
        unistd::chdir(dir)
            .map_err(|e| LrunError::Mount(format!("can not chdir to {}: {}", dir.display(), e)))?;
    }

    Ok(())
}

fn bind(dest: &Path, src: &Path) -> Result<()> {
    let mut flags = MsFlags::MS_BIND;
    if src.is_dir() {
        flags |= MsFlags::MS_REC;
    }
    mount(Some(src), dest, None::<&str>, flags, None::<&str>).map_err(|e| {
        LrunError::Mount(format!(
            "can not bind {} to {}: {}",
            src.display(),
            dest.display(),
            e
        ))
    })
}

fn remount(dest: &Path, flags: MsFlags) -> Result<()> {
    mount(
        None::<&str>,
        dest,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | flags,
        None::<&str>,
    )
    .map_err(|e| LrunError::Mount(format!("can not remount {}: {}", dest.display(), e)))
}

/// Mount a fresh /proc inside the new root, then move into it. The proc
/// mount must happen first: after chroot the real /proc is unreachable.
fn enter_root(root: &Path) -> Result<()> {
    let proc_dir = root.join("proc");
    mount(
        Some("proc"),
        &proc_dir,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| LrunError::Mount(format!("can not mount proc at {}: {}", proc_dir.display(), e)))?;

    unistd::chroot(root)
        .map_err(|e| LrunError::Mount(format!("can not chroot to {}: {}", root.display(), e)))?;
    unistd::chdir("/").map_err(|e| LrunError::Mount(format!("can not chdir to /: {}", e)))?;
    Ok(())
}

fn mount_tmpfs(path: &Path, bytes: u64) -> Result<()> {
    let options = format!("size={}", bytes);
    let data = if bytes > 0 { Some(options.as_str()) } else { None };

    mount(Some("tmpfs"), path, Some("tmpfs"), MsFlags::empty(), data).map_err(|e| {
        LrunError::Mount(format!("can not mount tmpfs at {}: {}", path.display(), e))
    })?;

    // size 0 hides the subtree read-only
    if bytes == 0 {
        mount(
            None::<&str>,
            path,
            None::<&str>,
            MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| {
            LrunError::Mount(format!("can not remount {} read-only: {}", path.display(), e))
        })?;
    }

    Ok(())
}

/// Replace /dev with a fresh tmpfs holding only the basic device nodes.
fn rebuild_dev() -> Result<()> {
    let dev = Path::new("/dev");
    mount(
        Some("tmpfs"),
        dev,
        Some("tmpfs"),
        MsFlags::empty(),
        Some("mode=755"),
    )
    .map_err(|e| LrunError::Mount(format!("can not mount tmpfs on /dev: {}", e)))?;

    let old_umask = stat::umask(Mode::empty());
    let result = make_device_nodes(dev);
    stat::umask(old_umask);
    result
}

fn make_device_nodes(dev: &Path) -> Result<()> {
    for (name, major, minor) in BASIC_DEVICES {
        let path = dev.join(name);
        mknod(
            &path,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(0o666),
            makedev(major, minor),
        )
        .map_err(|e| {
            LrunError::Mount(format!("can not create device {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsPlan;

    #[test]
    fn test_empty_plan_is_a_no_op() {
        apply(&FsPlan::default()).unwrap();
    }

    #[test]
    fn test_bind_of_missing_source_fails() {
        let mut plan = FsPlan::default();
        plan.binds.push((
            "/tmp/lrun-no-such-dest".into(),
            "/tmp/lrun-no-such-source".into(),
        ));
        assert!(apply(&plan).is_err());
    }
}
