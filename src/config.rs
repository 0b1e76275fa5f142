//! Run configuration as plain values.
//!
//! Everything the supervisor and the child pipeline need is assembled
//! once, validated, and then passed by reference through
//! `configure -> launch -> supervise`. No global state.

use crate::error::{LrunError, Result};
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::resource::Resource;
use nix::unistd::{self, AccessFlags};
use seccompiler::BpfProgram;
use std::collections::{BTreeMap, HashSet};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Memory limits below this are silently raised; tiny cgroup limits make
/// the kernel kill the child before it can even exec.
pub const MIN_MEMORY_LIMIT: u64 = 500_000;

/// Default supervisor sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_micros(20_000);

/// Resource limits enforced by sampling cgroup accounting.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub cpu_time: Option<f64>,
    pub real_time: Option<f64>,
    pub memory: Option<u64>,
    pub output: Option<u64>,
}

/// Namespace and device isolation switches.
#[derive(Debug, Clone)]
pub struct Isolation {
    /// Network available to the child (true keeps the host network).
    pub network: bool,
    /// New PID + IPC namespaces for the child.
    pub isolate_process: bool,
    /// Install the device whitelist in the devices subsystem.
    pub basic_devices: bool,
}

impl Default for Isolation {
    fn default() -> Self {
        Self {
            network: true,
            isolate_process: true,
            basic_devices: false,
        }
    }
}

/// Per-process kernel limits applied in the child before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RlimitKind {
    Cpu,
    Fsize,
    Stack,
    Core,
    Nofile,
    Nproc,
    Rtprio,
    Nice,
}

impl RlimitKind {
    pub fn resource(self) -> Resource {
        match self {
            RlimitKind::Cpu => Resource::RLIMIT_CPU,
            RlimitKind::Fsize => Resource::RLIMIT_FSIZE,
            RlimitKind::Stack => Resource::RLIMIT_STACK,
            RlimitKind::Core => Resource::RLIMIT_CORE,
            RlimitKind::Nofile => Resource::RLIMIT_NOFILE,
            RlimitKind::Nproc => Resource::RLIMIT_NPROC,
            RlimitKind::Rtprio => Resource::RLIMIT_RTPRIO,
            RlimitKind::Nice => Resource::RLIMIT_NICE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RlimitKind::Cpu => "RLIMIT_CPU",
            RlimitKind::Fsize => "RLIMIT_FSIZE",
            RlimitKind::Stack => "RLIMIT_STACK",
            RlimitKind::Core => "RLIMIT_CORE",
            RlimitKind::Nofile => "RLIMIT_NOFILE",
            RlimitKind::Nproc => "RLIMIT_NPROC",
            RlimitKind::Rtprio => "RLIMIT_RTPRIO",
            RlimitKind::Nice => "RLIMIT_NICE",
        }
    }
}

/// Defaults applied before CLI overrides.
pub fn default_rlimits() -> BTreeMap<RlimitKind, u64> {
    let mut rlimits = BTreeMap::new();
    rlimits.insert(RlimitKind::Nofile, 256);
    rlimits.insert(RlimitKind::Nproc, 2048);
    rlimits.insert(RlimitKind::Rtprio, 0);
    rlimits.insert(RlimitKind::Core, 0);
    rlimits
}

/// UTS namespace overrides. `nodename`/`domainname` use the plain
/// syscalls; the other three need kernel support for writable
/// `/proc/sys/kernel/{ostype,osrelease,osversion}` entries.
#[derive(Debug, Clone, Default)]
pub struct UtsOverride {
    pub nodename: Option<String>,
    pub domainname: Option<String>,
    pub sysname: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
}

impl UtsOverride {
    pub fn is_empty(&self) -> bool {
        self.nodename.is_none()
            && self.domainname.is_none()
            && self.sysname.is_none()
            && self.release.is_none()
            && self.version.is_none()
    }
}

/// Filesystem view assembled inside the child's mount namespace, applied
/// in the order the fields are listed.
#[derive(Debug, Clone, Default)]
pub struct FsPlan {
    /// (dest, src) bind mounts, applied in order.
    pub binds: Vec<(PathBuf, PathBuf)>,
    /// Destinations of the binds above; remount targets must be members.
    pub bind_dests: HashSet<PathBuf>,
    /// Accumulated remount flags per destination (notably MS_RDONLY).
    pub remounts: BTreeMap<PathBuf, MsFlags>,
    /// (path, bytes) tmpfs mounts; 0 bytes means mount read-only.
    pub tmpfs: Vec<(PathBuf, u64)>,
    pub chroot: Option<PathBuf>,
    pub chdir: Option<PathBuf>,
    /// Replace /dev with a fresh tmpfs holding only basic device nodes.
    pub remount_dev: bool,
}

/// Everything the child applies between clone and exec.
#[derive(Clone)]
pub struct SpawnArg {
    /// Command and arguments to exec.
    pub args: Vec<String>,
    /// Namespace flags accumulated from the isolation options. CLONE_NEWNS
    /// is added unconditionally at spawn time.
    pub clone_flags: CloneFlags,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub umask: libc::mode_t,
    pub nice: i32,
    pub no_new_privs: bool,
    pub reset_env: bool,
    /// Environment overrides applied after the optional reset.
    pub env: Vec<(String, String)>,
    /// File descriptors left open across exec (besides 0, 1, 2).
    pub keep_fds: HashSet<RawFd>,
    /// Shell commands executed after the filesystem plan, before the
    /// credential drop. Root only.
    pub cmds: Vec<String>,
    pub rlimits: BTreeMap<RlimitKind, u64>,
    pub fs: FsPlan,
    pub uts: UtsOverride,
    /// Compiled seccomp programs, installed last before exec.
    pub seccomp: Vec<BpfProgram>,
}

impl Default for SpawnArg {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            clone_flags: CloneFlags::empty(),
            uid: unistd::getuid().as_raw(),
            gid: unistd::getgid().as_raw(),
            umask: 0o022,
            nice: 0,
            no_new_privs: true,
            reset_env: false,
            env: Vec::new(),
            keep_fds: HashSet::new(),
            cmds: Vec::new(),
            rlimits: default_rlimits(),
            fs: FsPlan::default(),
            uts: UtsOverride::default(),
            seccomp: Vec::new(),
        }
    }
}

/// The complete run configuration.
#[derive(Clone, Default)]
pub struct Config {
    pub limits: Limits,
    pub isolation: Isolation,
    pub spawn: SpawnArg,
    /// Supplementary groups applied to the supervisor itself. Root only.
    pub groups: Vec<libc::gid_t>,
    /// User-supplied cgroup name; when set the group is borrowed and is
    /// never destroyed, only emptied.
    pub cgname: Option<String>,
    /// Extra (subsystem, key, value) control-file writes.
    pub cgroup_options: Vec<(crate::cgroup::Subsys, String, String)>,
    pub pass_exitcode: bool,
    pub interval: Duration,
    /// Set when `--syscalls` named a whitelist whose effective allow set
    /// is empty; validation rejects it.
    pub empty_whitelist: bool,
}

fn access_mode_to_str(mode: AccessFlags) -> String {
    let mut out = String::new();
    if mode.contains(AccessFlags::R_OK) {
        out.push('r');
    }
    if mode.contains(AccessFlags::W_OK) {
        out.push('w');
    }
    if mode.contains(AccessFlags::X_OK) {
        out.push('x');
    }
    out
}

fn check_path_permission(path: &Path, errors: &mut Vec<String>) {
    if !path.is_absolute() {
        errors.push(format!(
            "Relative paths are forbidden for non-root users.\nPlease change: {}",
            path.display()
        ));
        return;
    }

    let mut mode = AccessFlags::R_OK;
    if path.is_dir() {
        mode |= AccessFlags::X_OK;
    }
    if unistd::access(path, mode).is_err() {
        errors.push(format!(
            "You do not have `{}` permission on {}",
            access_mode_to_str(mode),
            path.display()
        ));
    }
}

/// Translate `path` through the bind mounts the child will see, so that
/// permission checks look at what the path will actually resolve to.
fn follow_binds(binds: &[(PathBuf, PathBuf)], path: &Path) -> PathBuf {
    if !path.is_absolute() {
        return path.to_path_buf();
    }
    for (dest, src) in binds.iter().rev() {
        if let Ok(rest) = path.strip_prefix(dest) {
            // src already followed earlier binds when it was recorded
            return src.join(rest);
        }
    }
    path.to_path_buf()
}

/// Validate the configuration, collecting every problem so the user sees
/// the full set at once.
pub fn check(config: &Config) -> Vec<String> {
    let is_root = unistd::getuid().is_root();
    let mut errors = Vec::new();

    if config.spawn.uid == 0 {
        errors.push(
            "For security reason, running commands with uid = 0 is not allowed.\n\
             Please specify a user ID using `--uid`."
                .to_string(),
        );
    } else if !is_root && config.spawn.uid != unistd::getuid().as_raw() {
        errors.push("For security reason, setting uid to another user requires root.".to_string());
    }

    if config.spawn.gid == 0 {
        errors.push(
            "For security reason, running commands with gid = 0 is not allowed.\n\
             Please specify a group ID using `--gid`."
                .to_string(),
        );
    } else if !is_root && config.spawn.gid != unistd::getgid().as_raw() {
        errors.push("For security reason, setting gid to another group requires root.".to_string());
    }

    if config.spawn.args.is_empty() {
        errors.push("command_args can not be empty.\nUse `--help` to see full options.".to_string());
    }

    if !is_root {
        if !config.spawn.cmds.is_empty() {
            errors.push("For security reason, `--cmd` requires root.".to_string());
        }

        if !config.groups.is_empty() {
            errors.push("For security reason, `--group` requires root.".to_string());
        }

        // Bind sources and chroot/chdir targets must be absolute and
        // readable through the binds established before them.
        let mut binds: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (dest, src) in &config.spawn.fs.binds {
            let followed_src = follow_binds(&binds, src);
            check_path_permission(&followed_src, &mut errors);
            binds.push((dest.clone(), followed_src));
        }

        if let Some(chroot) = &config.spawn.fs.chroot {
            check_path_permission(&follow_binds(&binds, chroot), &mut errors);
        }

        if let Some(chdir) = &config.spawn.fs.chdir {
            let full = match &config.spawn.fs.chroot {
                Some(root) => root.join(chdir.strip_prefix("/").unwrap_or(chdir.as_path())),
                None => chdir.clone(),
            };
            check_path_permission(&follow_binds(&binds, &full), &mut errors);
        }

        // `--remount-ro /` would affect the outside world; only prior
        // bindfs destinations are eligible.
        for dest in config.spawn.fs.remounts.keys() {
            if !config.spawn.fs.bind_dests.contains(dest) {
                errors.push(
                    "For security reason, `--remount-ro A` is only allowed \
                     if there is a `--bindfs A B`."
                        .to_string(),
                );
            }
        }

        if !config.spawn.no_new_privs {
            errors.push(
                "For security reason, `--no-new-privs false` is forbidden for non-root users."
                    .to_string(),
            );
        }

        if config.spawn.nice < 0 {
            errors.push("Non-root users cannot set a negative value of `--nice`".to_string());
        }
    }

    if config.empty_whitelist {
        errors.push("Syscall filter forbids all syscalls, which is not allowed.".to_string());
    }

    errors
}

/// Environment checks and supervisor-side credential normalization.
/// Must run before any cgroup is touched.
pub fn check_environment(config: &Config) -> Result<()> {
    if !unistd::geteuid().is_root() {
        return Err(LrunError::Environment(format!(
            "root required (current euid = {}, uid = {})",
            unistd::geteuid(),
            unistd::getuid()
        )));
    }

    unistd::setuid(unistd::Uid::from_raw(0))
        .map_err(|e| LrunError::Environment(format!("setuid(0) failed: {}", e)))?;

    if let Err(e) = unistd::setgid(unistd::Gid::from_raw(0)) {
        log::error!("setgid(0) failed: {}", e);
    }

    let groups: Vec<unistd::Gid> = config
        .groups
        .iter()
        .map(|&g| unistd::Gid::from_raw(g))
        .collect();
    if let Err(e) = unistd::setgroups(&groups) {
        log::error!("setgroups failed: {}", e);
    }

    if !config.spawn.seccomp.is_empty() && !crate::probe::seccomp_supported() {
        return Err(LrunError::Environment(
            "`--syscalls` was given but the kernel does not support seccomp".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.spawn.uid = 1000;
        config.spawn.gid = 1000;
        config.spawn.args = vec!["/bin/true".to_string()];
        config.interval = DEFAULT_INTERVAL;
        config
    }

    #[test]
    fn test_uid_zero_rejected() {
        let mut config = valid_config();
        config.spawn.uid = 0;
        let errors = check(&config);
        assert!(errors.iter().any(|e| e.contains("uid = 0")));
    }

    #[test]
    fn test_gid_zero_rejected() {
        let mut config = valid_config();
        config.spawn.gid = 0;
        let errors = check(&config);
        assert!(errors.iter().any(|e| e.contains("gid = 0")));
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = valid_config();
        config.spawn.args.clear();
        let errors = check(&config);
        assert!(errors.iter().any(|e| e.contains("can not be empty")));
    }

    #[test]
    fn test_remount_ro_requires_matching_bind() {
        let mut config = valid_config();
        config
            .spawn
            .fs
            .remounts
            .insert(PathBuf::from("/etc"), MsFlags::MS_RDONLY);
        let errors = check(&config);
        if unistd::getuid().is_root() {
            // Root skips the remount-ro restriction entirely.
            assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        } else {
            assert!(errors.iter().any(|e| e.contains("--remount-ro")));
        }
    }

    #[test]
    fn test_empty_whitelist_rejected() {
        let mut config = valid_config();
        config.empty_whitelist = true;
        let errors = check(&config);
        assert!(errors.iter().any(|e| e.contains("forbids all syscalls")));
    }

    #[test]
    fn test_all_errors_collected() {
        let mut config = valid_config();
        config.spawn.uid = 0;
        config.spawn.gid = 0;
        config.spawn.args.clear();
        let errors = check(&config);
        assert!(errors.len() >= 3, "expected all errors, got {:?}", errors);
    }

    #[test]
    fn test_follow_binds_rewrites_prefix() {
        let binds = vec![(PathBuf::from("/jail/etc"), PathBuf::from("/etc"))];
        assert_eq!(
            follow_binds(&binds, Path::new("/jail/etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            follow_binds(&binds, Path::new("/usr/bin")),
            PathBuf::from("/usr/bin")
        );
    }

    #[test]
    fn test_default_rlimits() {
        let rlimits = default_rlimits();
        assert_eq!(rlimits.get(&RlimitKind::Nofile), Some(&256));
        assert_eq!(rlimits.get(&RlimitKind::Nproc), Some(&2048));
        assert_eq!(rlimits.get(&RlimitKind::Rtprio), Some(&0));
        assert_eq!(rlimits.get(&RlimitKind::Core), Some(&0));
    }
}
