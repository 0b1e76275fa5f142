//! Command-line interface.
//!
//! Thin collaborator around the core: it parses the option surface into a
//! `Config`, applying the documented defaults, and collects every
//! configuration problem before exiting so the user sees the full set.

use crate::config::{self, Config, RlimitKind, DEFAULT_INTERVAL, MIN_MEMORY_LIMIT};
use crate::seccomp::SyscallFilter;
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use std::path::PathBuf;
use std::time::Duration;

const SYSCALLS_HELP: &str = "\
--syscalls FILTER
  Default action for unlisted syscalls is to return EPERM.

--syscalls !FILTER
  Default action for unlisted syscalls is to allow.

Format:
  FILTER       := RULE | FILTER ',' RULE
  RULE         := NAME ARG_RULES? ACTION?
  ARG_RULES    := '[' ARG_RULE (',' ARG_RULE)* ']'
  ARG_RULE     := ARG_NAME OP NUMBER | ARG_NAME '&' NUMBER '==' NUMBER
  ARG_NAME     := 'a' | 'b' | 'c' | 'd' | 'e' | 'f'
  OP           := '==' | '=' | '!=' | '!' | '<' | '>' | '<=' | '>='
  ACTION       := ':k' | ':e' | ':a'

Notes:
  ARG_NAME: `a` is the first syscall argument, `b` the second, ...
  OP:       `=` is short for `==`, `!` is short for `!=`
  `&`:      bitwise-and compare, `a&M==V` matches when (a & M) == V
  ACTION:   `k` kills the process, `e` returns EPERM, `a` allows
  NAME:     a syscall name or number, ex: `read`, `0`
  NUMBER:   a decimal number

Examples:
  --syscalls 'read,write,openat,exit_group'
    Only the listed syscalls are allowed
  --syscalls '!write[a==2]'
    Disallow writes to fd 2 (stderr)
  --syscalls '!sethostname:k'
    Whoever calls sethostname gets killed
  --syscalls '!clone[a&268435456==268435456]'
    Forbid creating new user namespaces (CLONE_NEWUSER = 0x10000000)
";

#[derive(Parser, Debug)]
#[command(
    name = "lrun",
    version,
    about = "Run a command with resources limited and namespaces isolated",
    after_help = "Return value:\n  \
        Non-zero if the command could not be executed; nothing is written to fd 3.\n  \
        Otherwise 0, with time, memory and exit status of the command on fd 3\n  \
        (or the command's own exit code with --pass-exitcode true)."
)]
pub struct Cli {
    /// Limit cpu time; seconds may be fractional
    #[arg(long, value_name = "SECONDS")]
    max_cpu_time: Option<f64>,

    /// Limit wall clock time; seconds may be fractional
    #[arg(long, value_name = "SECONDS")]
    max_real_time: Option<f64>,

    /// Limit memory (+swap) usage; accepts k/m/g suffixes
    #[arg(long, value_name = "BYTES", value_parser = parse_bytes)]
    max_memory: Option<u64>,

    /// Limit output size, best effort; also seeds RLIMIT_FSIZE
    #[arg(long, value_name = "BYTES", value_parser = parse_bytes)]
    max_output: Option<u64>,

    /// Set RLIMIT_NPROC
    #[arg(long, value_name = "N")]
    max_nprocess: Option<u64>,

    /// Set max realtime priority
    #[arg(long, value_name = "N")]
    max_rtprio: Option<u64>,

    /// Set max number of open file descriptors
    #[arg(long, value_name = "N")]
    max_nfile: Option<u64>,

    /// Set max stack size per process; accepts k/m/g suffixes
    #[arg(long, value_name = "BYTES", value_parser = parse_bytes)]
    max_stack: Option<u64>,

    /// Deprecated alias: sets RLIMIT_NICE to 20 - N
    #[arg(long, value_name = "N", hide = true)]
    min_nice: Option<i64>,

    /// Isolate PID and IPC namespaces
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    isolate_process: Option<bool>,

    /// Whether network access is permitted
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    network: Option<bool>,

    /// Enable the device whitelist: null, zero, full, random, urandom, tty
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    basic_devices: Option<bool>,

    /// Remount /dev and create only basic device files in it
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    remount_dev: Option<bool>,

    /// Clean environment variables before exec
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    reset_env: Option<bool>,

    /// Forbid gaining privileges via exec (sudo, ping, ...); only root
    /// can set this to false
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    no_new_privs: Option<bool>,

    /// Discard lrun's exit code and pass the child's through
    #[arg(long, value_name = "BOOL", value_parser = parse_bool)]
    pass_exitcode: Option<bool>,

    /// Chroot to this path before exec
    #[arg(long, value_name = "PATH")]
    chroot: Option<PathBuf>,

    /// Chdir to this path after chroot
    #[arg(long, value_name = "PATH")]
    chdir: Option<PathBuf>,

    /// Add nice; only root can use a negative value
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true)]
    nice: Option<i32>,

    /// Set umask (a leading 0 means octal)
    #[arg(long, value_name = "INT", value_parser = parse_mode)]
    umask: Option<u32>,

    /// Run as this uid (must be > 0); only root can use this
    #[arg(long, value_name = "UID")]
    uid: Option<u32>,

    /// Run as this gid (must be > 0); only root can use this
    #[arg(long, value_name = "GID")]
    gid: Option<u32>,

    /// Set a new hostname inside the UTS namespace
    #[arg(long, value_name = "STRING")]
    hostname: Option<String>,

    /// Set a new domainname inside the UTS namespace
    #[arg(long, value_name = "STRING")]
    domainname: Option<String>,

    // the uname overrides below need kernel support for writable
    // /proc/sys/kernel/ostype etc.
    #[arg(long, value_name = "STRING", hide = true)]
    ostype: Option<String>,

    #[arg(long, value_name = "STRING", hide = true)]
    osrelease: Option<String>,

    #[arg(long, value_name = "STRING", hide = true)]
    osversion: Option<String>,

    /// Supervisor sampling interval in seconds
    #[arg(long, value_name = "SECONDS")]
    interval: Option<f64>,

    /// Use this cgroup name; the group is created on demand and kept
    /// alive on exit instead of being destroyed
    #[arg(long, value_name = "NAME")]
    cgname: Option<String>,

    /// Apply a syscall filter; see --help-syscalls for the syntax
    #[arg(long, value_name = "FILTER")]
    syscalls: Option<String>,

    /// Show the full syntax of the --syscalls filter string
    #[arg(long)]
    help_syscalls: bool,

    /// Bind SRC over DEST before chroot (repeatable)
    #[arg(long, num_args = 2, value_names = ["DEST", "SRC"], action = ArgAction::Append)]
    bindfs: Vec<String>,

    /// Like --bindfs but DEST is also remounted read-only (repeatable)
    #[arg(long = "bindfs-ro", num_args = 2, value_names = ["DEST", "SRC"], action = ArgAction::Append)]
    bindfs_ro: Vec<String>,

    /// Remount a prior --bindfs DEST read-only (repeatable)
    #[arg(long = "remount-ro", value_name = "DEST", action = ArgAction::Append)]
    remount_ro: Vec<PathBuf>,

    /// Mount a tmpfs of BYTES at PATH; 0 bytes mounts it read-only
    /// (repeatable, applied after chroot)
    #[arg(long, num_args = 2, value_names = ["PATH", "BYTES"], action = ArgAction::Append)]
    tmpfs: Vec<String>,

    /// Set an environment variable before exec (repeatable)
    #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"], action = ArgAction::Append)]
    env: Vec<String>,

    /// Apply a cgroup setting before exec (repeatable)
    #[arg(long = "cgroup-option", num_args = 3, value_names = ["SUBSYS", "KEY", "VALUE"], action = ArgAction::Append)]
    cgroup_option: Vec<String>,

    /// Do not close fd N across exec (repeatable)
    #[arg(long, value_name = "N", action = ArgAction::Append)]
    fd: Vec<i32>,

    /// Execute a shell command after tmpfs mounts; only root (repeatable)
    #[arg(long, value_name = "CMD", action = ArgAction::Append)]
    cmd: Vec<String>,

    /// Add a supplementary group to lrun itself; only root (repeatable)
    #[arg(long, value_name = "GID", action = ArgAction::Append)]
    group: Vec<u32>,

    /// Command and arguments to run
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Parse the process arguments into a validated `Config`. Prints help or
/// collected configuration errors and exits as appropriate.
pub fn parse() -> Config {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(crate::error::exit_code::BAD_CONFIG);
        }
    };

    if cli.help_syscalls {
        eprintln!("{}", SYSCALLS_HELP);
        std::process::exit(0);
    }

    let (config, mut errors) = build_config(cli);
    errors.extend(config::check(&config));

    if !errors.is_empty() {
        for message in &errors {
            eprintln!("{}\n", message);
        }
        eprintln!("Please fix these errors and try again.");
        std::process::exit(crate::error::exit_code::BAD_CONFIG);
    }

    config
}

/// Apply CLI values over the documented defaults. Problems that are not
/// clap's business (filter grammar, bad byte counts inside repeated
/// options) are collected rather than failing fast.
pub fn build_config(cli: Cli) -> (Config, Vec<String>) {
    let mut errors = Vec::new();
    let mut config = Config {
        interval: DEFAULT_INTERVAL,
        ..Config::default()
    };

    if let Some(seconds) = cli.max_cpu_time {
        if seconds > 0.0 {
            config.limits.cpu_time = Some(seconds);
        }
    }
    if let Some(seconds) = cli.max_real_time {
        if seconds > 0.0 {
            config.limits.real_time = Some(seconds);
        }
    }
    if let Some(bytes) = cli.max_memory {
        let bytes = if bytes < MIN_MEMORY_LIMIT {
            log::warn!("max-memory too small, changed to {}.", MIN_MEMORY_LIMIT);
            MIN_MEMORY_LIMIT
        } else {
            bytes
        };
        config.limits.memory = Some(bytes);
    }
    if let Some(bytes) = cli.max_output {
        config.limits.output = Some(bytes);
        config.spawn.rlimits.insert(RlimitKind::Fsize, bytes);
    }

    if let Some(n) = cli.max_nprocess {
        config.spawn.rlimits.insert(RlimitKind::Nproc, n);
    }
    if let Some(n) = cli.max_rtprio {
        config.spawn.rlimits.insert(RlimitKind::Rtprio, n);
    }
    if let Some(n) = cli.max_nfile {
        config.spawn.rlimits.insert(RlimitKind::Nofile, n);
    }
    if let Some(bytes) = cli.max_stack {
        config.spawn.rlimits.insert(RlimitKind::Stack, bytes);
    }
    if let Some(n) = cli.min_nice {
        // deprecated mapping kept for compatibility
        config
            .spawn
            .rlimits
            .insert(RlimitKind::Nice, (20 - n).max(0) as u64);
    }

    if let Some(v) = cli.isolate_process {
        config.isolation.isolate_process = v;
    }
    if let Some(v) = cli.network {
        config.isolation.network = v;
    }
    if let Some(v) = cli.basic_devices {
        config.isolation.basic_devices = v;
    }
    if let Some(v) = cli.remount_dev {
        config.spawn.fs.remount_dev = v;
    }
    if let Some(v) = cli.reset_env {
        config.spawn.reset_env = v;
    }
    if let Some(v) = cli.no_new_privs {
        config.spawn.no_new_privs = v;
    }
    if let Some(v) = cli.pass_exitcode {
        config.pass_exitcode = v;
    }

    config.spawn.fs.chroot = cli.chroot;
    config.spawn.fs.chdir = cli.chdir;
    if let Some(nice) = cli.nice {
        config.spawn.nice = nice;
    }
    if let Some(umask) = cli.umask {
        config.spawn.umask = umask as libc::mode_t;
    }
    if let Some(uid) = cli.uid {
        config.spawn.uid = uid;
    }
    if let Some(gid) = cli.gid {
        config.spawn.gid = gid;
    }

    config.spawn.uts.nodename = cli.hostname;
    config.spawn.uts.domainname = cli.domainname;
    config.spawn.uts.sysname = cli.ostype;
    config.spawn.uts.release = cli.osrelease;
    config.spawn.uts.version = cli.osversion;

    if let Some(seconds) = cli.interval {
        if seconds > 0.0 {
            config.interval = Duration::from_secs_f64(seconds);
        }
    }

    config.cgname = cli.cgname;
    config.groups = cli.group.into_iter().filter(|&g| g != 0).collect();

    for pair in cli.bindfs.chunks(2) {
        let dest = PathBuf::from(&pair[0]);
        config.spawn.fs.binds.push((dest.clone(), PathBuf::from(&pair[1])));
        config.spawn.fs.bind_dests.insert(dest);
    }
    for pair in cli.bindfs_ro.chunks(2) {
        let dest = PathBuf::from(&pair[0]);
        config.spawn.fs.binds.push((dest.clone(), PathBuf::from(&pair[1])));
        config.spawn.fs.bind_dests.insert(dest.clone());
        *config
            .spawn
            .fs
            .remounts
            .entry(dest)
            .or_insert(MsFlags::empty()) |= MsFlags::MS_RDONLY;
    }
    for dest in cli.remount_ro {
        *config
            .spawn
            .fs
            .remounts
            .entry(dest)
            .or_insert(MsFlags::empty()) |= MsFlags::MS_RDONLY;
    }
    for pair in cli.tmpfs.chunks(2) {
        match parse_bytes(&pair[1]) {
            Ok(bytes) => config.spawn.fs.tmpfs.push((PathBuf::from(&pair[0]), bytes)),
            Err(e) => errors.push(format!("Invalid --tmpfs size '{}': {}", pair[1], e)),
        }
    }

    for pair in cli.env.chunks(2) {
        config.spawn.env.push((pair[0].clone(), pair[1].clone()));
    }

    for triple in cli.cgroup_option.chunks(3) {
        match crate::cgroup::Subsys::from_name(&triple[0]) {
            Some(subsys) => {
                config
                    .cgroup_options
                    .push((subsys, triple[1].clone(), triple[2].clone()));
            }
            None => log::warn!(
                "cgroup option '{}' = '{}' ignored: subsystem '{}' not found",
                triple[1],
                triple[2],
                triple[0]
            ),
        }
    }

    config.spawn.keep_fds = cli.fd.into_iter().collect();
    config.spawn.cmds = cli.cmd;
    config.spawn.args = cli.command;

    if let Some(spec) = &cli.syscalls {
        match SyscallFilter::parse(spec) {
            Ok(filter) => {
                if filter.forbids_everything() {
                    config.empty_whitelist = true;
                } else {
                    match filter.compile() {
                        Ok(programs) => config.spawn.seccomp = programs,
                        Err(e) => errors.push(e.to_string()),
                    }
                }
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    // accumulate namespace flags last so every UTS option counts
    if !config.spawn.uts.is_empty() {
        config.spawn.clone_flags |= CloneFlags::CLONE_NEWUTS;
    }
    if !config.isolation.network {
        config.spawn.clone_flags |= CloneFlags::CLONE_NEWNET;
    }
    if config.isolation.isolate_process {
        config.spawn.clone_flags |= CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWIPC;
    }

    (config, errors)
}

/// Byte counts with optional k/m/g suffix (case-insensitive).
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let t = s.trim();
    let (digits, multiplier) = match t.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&t[..t.len() - 1], 1u64 << 10),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&t[..t.len() - 1], 1u64 << 20),
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&t[..t.len() - 1], 1u64 << 30),
        _ => (t, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{}' is not a byte count", s))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{}' is too large", s))
}

/// Boolean option values: true/false, 1/0, yes/no, on/off.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(format!("'{}' is not a boolean", s)),
    }
}

/// Mode values; a leading 0 selects octal, matching shell habit.
pub fn parse_mode(s: &str) -> Result<u32, String> {
    let parsed = if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.map_err(|_| format!("'{}' is not a mode", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(args: &[&str]) -> (Config, Vec<String>) {
        let cli = Cli::try_parse_from(args).unwrap();
        build_config(cli)
    }

    #[test]
    fn test_parse_bytes_suffixes() {
        assert_eq!(parse_bytes("1024"), Ok(1024));
        assert_eq!(parse_bytes("4k"), Ok(4096));
        assert_eq!(parse_bytes("64M"), Ok(64 << 20));
        assert_eq!(parse_bytes("2g"), Ok(2 << 30));
        assert!(parse_bytes("abc").is_err());
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("99999999999g").is_err());
    }

    #[test]
    fn test_parse_bool_values() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("FALSE"), Ok(false));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_parse_mode_octal_and_decimal() {
        assert_eq!(parse_mode("022"), Ok(0o22));
        assert_eq!(parse_mode("0777"), Ok(0o777));
        assert_eq!(parse_mode("18"), Ok(18));
        assert_eq!(parse_mode("0"), Ok(0));
        assert!(parse_mode("08").is_err());
    }

    #[test]
    fn test_defaults_match_documentation() {
        let (config, errors) = config_from(&["lrun", "--", "/bin/true"]);
        assert!(errors.is_empty());
        assert!(config.isolation.network);
        assert!(config.isolation.isolate_process);
        assert!(!config.isolation.basic_devices);
        assert!(!config.spawn.fs.remount_dev);
        assert!(!config.spawn.reset_env);
        assert!(config.spawn.no_new_privs);
        assert!(!config.pass_exitcode);
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.spawn.umask, 0o022);
        assert_eq!(config.spawn.rlimits.get(&RlimitKind::Nofile), Some(&256));
        assert_eq!(config.spawn.rlimits.get(&RlimitKind::Nproc), Some(&2048));
        assert_eq!(config.spawn.args, vec!["/bin/true"]);
        // default isolation yields PID + IPC namespaces, nothing else
        assert!(config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(!config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWUTS));
    }

    #[test]
    fn test_limits_and_rlimits() {
        let (config, errors) = config_from(&[
            "lrun",
            "--max-cpu-time",
            "1.5",
            "--max-memory",
            "64m",
            "--max-output",
            "1m",
            "--max-nfile",
            "100",
            "--",
            "/bin/true",
        ]);
        assert!(errors.is_empty());
        assert_eq!(config.limits.cpu_time, Some(1.5));
        assert_eq!(config.limits.memory, Some(64 << 20));
        assert_eq!(config.limits.output, Some(1 << 20));
        // output limit also seeds RLIMIT_FSIZE
        assert_eq!(
            config.spawn.rlimits.get(&RlimitKind::Fsize),
            Some(&(1u64 << 20))
        );
        assert_eq!(config.spawn.rlimits.get(&RlimitKind::Nofile), Some(&100));
    }

    #[test]
    fn test_tiny_memory_limit_is_raised() {
        let (config, _) = config_from(&["lrun", "--max-memory", "1k", "--", "/bin/true"]);
        assert_eq!(config.limits.memory, Some(MIN_MEMORY_LIMIT));
    }

    #[test]
    fn test_min_nice_alias_maps_to_rlimit_nice() {
        let (config, _) = config_from(&["lrun", "--min-nice", "5", "--", "/bin/true"]);
        assert_eq!(config.spawn.rlimits.get(&RlimitKind::Nice), Some(&15));
    }

    #[test]
    fn test_bindfs_ro_accumulates_remount() {
        let (config, errors) = config_from(&[
            "lrun",
            "--bindfs",
            "/jail/usr",
            "/usr",
            "--bindfs-ro",
            "/jail/etc",
            "/etc",
            "--remount-ro",
            "/jail/usr",
            "--",
            "/bin/true",
        ]);
        assert!(errors.is_empty());
        assert_eq!(config.spawn.fs.binds.len(), 2);
        assert!(config
            .spawn
            .fs
            .remounts
            .get(&PathBuf::from("/jail/etc"))
            .unwrap()
            .contains(MsFlags::MS_RDONLY));
        assert!(config
            .spawn
            .fs
            .remounts
            .get(&PathBuf::from("/jail/usr"))
            .unwrap()
            .contains(MsFlags::MS_RDONLY));
    }

    #[test]
    fn test_network_and_uts_flags() {
        let (config, _) = config_from(&[
            "lrun",
            "--network",
            "false",
            "--hostname",
            "judge",
            "--",
            "/bin/true",
        ]);
        assert!(config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWUTS));
        assert_eq!(config.spawn.uts.nodename.as_deref(), Some("judge"));
    }

    #[test]
    fn test_isolate_process_false_drops_pid_ns() {
        let (config, _) =
            config_from(&["lrun", "--isolate-process", "false", "--", "/bin/true"]);
        assert!(!config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(!config.spawn.clone_flags.contains(CloneFlags::CLONE_NEWIPC));
    }

    #[test]
    fn test_bad_filter_is_collected_not_fatal() {
        let (_, errors) = config_from(&[
            "lrun",
            "--syscalls",
            "no_such_syscall_xyz",
            "--",
            "/bin/true",
        ]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown syscall"));
    }

    #[test]
    fn test_kill_only_whitelist_flags_empty() {
        let (config, errors) =
            config_from(&["lrun", "--syscalls", "read:k", "--", "/bin/true"]);
        assert!(errors.is_empty());
        assert!(config.empty_whitelist);
        assert!(config.spawn.seccomp.is_empty());
    }

    #[test]
    fn test_valid_filter_compiles_into_programs() {
        let (config, errors) = config_from(&[
            "lrun",
            "--syscalls",
            "!sethostname:k",
            "--",
            "/bin/true",
        ]);
        assert!(errors.is_empty());
        assert_eq!(config.spawn.seccomp.len(), 1);
    }

    #[test]
    fn test_repeated_env_and_fd() {
        let (config, _) = config_from(&[
            "lrun", "--env", "A", "1", "--env", "B", "2", "--fd", "4", "--fd", "5", "--",
            "/bin/sh", "-c", "true",
        ]);
        assert_eq!(
            config.spawn.env,
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
        assert!(config.spawn.keep_fds.contains(&4));
        assert!(config.spawn.keep_fds.contains(&5));
        assert_eq!(config.spawn.args, vec!["/bin/sh", "-c", "true"]);
    }

    #[test]
    fn test_cgroup_option_unknown_subsystem_ignored() {
        let (config, errors) = config_from(&[
            "lrun",
            "--cgroup-option",
            "blkio",
            "some.key",
            "1",
            "--cgroup-option",
            "memory",
            "memory.swappiness",
            "0",
            "--",
            "/bin/true",
        ]);
        assert!(errors.is_empty());
        assert_eq!(config.cgroup_options.len(), 1);
        assert_eq!(config.cgroup_options[0].0, crate::cgroup::Subsys::Memory);
    }
}
