//! Syscall filter: grammar parsing and seccomp-BPF compilation.
//!
//! Filter strings look like `read,write[a==1],sethostname:k` with an
//! optional leading `!` (or `-`) switching from whitelist to blacklist
//! mode. Rules compile into up to three stacked BPF programs (allow set,
//! EPERM set, kill set); the kernel applies the most restrictive verdict
//! across installed filters, which is exactly the per-rule action
//! semantics. All programs are installed with TSYNC so later threads
//! cannot escape the filter.

use crate::error::{LrunError, Result};
use seccompiler::{
    apply_filter_all_threads, BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp,
    SeccompCondition, SeccompFilter, SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::fmt;

/// What happens to syscalls that match no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Listed syscalls are allowed, everything else returns EPERM.
    Whitelist,
    /// Listed syscalls get their rule action, everything else is allowed.
    Blacklist,
}

/// Per-rule action suffix (`:k`, `:e`, `:a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// No suffix: allow in whitelist mode, EPERM in blacklist mode.
    Default,
    Kill,
    Eperm,
    Allow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// `(arg & mask) == value`
    MaskedEq(u64),
}

/// One argument comparison, e.g. `a==2` or `c&4==4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgCmp {
    /// 0-based argument index (`a` = 0 .. `f` = 5).
    pub index: u8,
    pub op: CmpOp,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRule {
    pub name: String,
    pub nr: i64,
    pub args: Vec<ArgCmp>,
    pub action: RuleAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallFilter {
    pub mode: FilterMode,
    pub rules: Vec<SyscallRule>,
}

impl SyscallRule {
    fn effective_action(&self, mode: FilterMode) -> RuleAction {
        match (self.action, mode) {
            (RuleAction::Default, FilterMode::Whitelist) => RuleAction::Allow,
            (RuleAction::Default, FilterMode::Blacklist) => RuleAction::Eperm,
            (action, _) => action,
        }
    }
}

impl SyscallFilter {
    /// Parse a filter specification. Invalid grammar or an unknown
    /// syscall name is a configuration error.
    pub fn parse(spec: &str) -> Result<SyscallFilter> {
        let (mode, body) = match spec.as_bytes().first() {
            Some(b'!') | Some(b'-') => (FilterMode::Blacklist, &spec[1..]),
            Some(b'=') | Some(b'+') => (FilterMode::Whitelist, &spec[1..]),
            _ => (FilterMode::Whitelist, spec),
        };

        let mut rules = Vec::new();
        for part in split_rules(body) {
            rules.push(parse_rule(part)?);
        }

        Ok(SyscallFilter { mode, rules })
    }

    /// Whitelist with nothing effectively allowed: rejected up front,
    /// since such a filter would forbid every syscall including exit.
    pub fn forbids_everything(&self) -> bool {
        self.mode == FilterMode::Whitelist
            && !self
                .rules
                .iter()
                .any(|r| r.effective_action(self.mode) == RuleAction::Allow)
    }

    /// Compile into BPF programs ready for installation.
    pub fn compile(&self) -> Result<Vec<BpfProgram>> {
        // None marks an unconditional rule for the syscall, which
        // subsumes any conditional ones.
        let mut allow: BTreeMap<i64, Option<Vec<SeccompRule>>> = BTreeMap::new();
        let mut eperm: BTreeMap<i64, Option<Vec<SeccompRule>>> = BTreeMap::new();
        let mut kill: BTreeMap<i64, Option<Vec<SeccompRule>>> = BTreeMap::new();

        for rule in &self.rules {
            let set = match (self.mode, rule.effective_action(self.mode)) {
                (FilterMode::Whitelist, RuleAction::Allow) => &mut allow,
                // whitelist default is already EPERM
                (FilterMode::Whitelist, RuleAction::Eperm) => continue,
                // blacklist default is already allow
                (FilterMode::Blacklist, RuleAction::Allow) => continue,
                (FilterMode::Blacklist, RuleAction::Eperm) => &mut eperm,
                (_, RuleAction::Kill) => &mut kill,
                (_, RuleAction::Default) => unreachable!("resolved by effective_action"),
            };
            add_rule(set, rule)?;
        }

        let arch = target_arch();
        let eperm_action = SeccompAction::Errno(libc::EPERM as u32);
        let mut programs = Vec::new();

        match self.mode {
            FilterMode::Whitelist => {
                if allow.is_empty() {
                    return Err(LrunError::Seccomp(
                        "syscall filter forbids all syscalls".to_string(),
                    ));
                }
                programs.push(build_program(allow, eperm_action, SeccompAction::Allow, arch)?);
            }
            FilterMode::Blacklist => {
                if !eperm.is_empty() {
                    programs.push(build_program(
                        eperm,
                        SeccompAction::Allow,
                        eperm_action,
                        arch,
                    )?);
                }
            }
        }

        if !kill.is_empty() {
            programs.push(build_program(
                kill,
                SeccompAction::Allow,
                SeccompAction::KillProcess,
                arch,
            )?);
        }

        Ok(programs)
    }
}

/// Install the compiled programs on the calling thread and, via TSYNC,
/// every other thread of the process.
pub fn install(programs: &[BpfProgram]) -> Result<()> {
    for program in programs {
        apply_filter_all_threads(program)
            .map_err(|e| LrunError::Seccomp(format!("can not install filter: {}", e)))?;
    }
    Ok(())
}

fn add_rule(
    set: &mut BTreeMap<i64, Option<Vec<SeccompRule>>>,
    rule: &SyscallRule,
) -> Result<()> {
    if rule.args.is_empty() {
        set.insert(rule.nr, None);
        return Ok(());
    }

    let conditions = rule
        .args
        .iter()
        .map(|arg| {
            let (op, value) = match arg.op {
                CmpOp::Eq => (SeccompCmpOp::Eq, arg.value),
                CmpOp::Ne => (SeccompCmpOp::Ne, arg.value),
                CmpOp::Lt => (SeccompCmpOp::Lt, arg.value),
                CmpOp::Gt => (SeccompCmpOp::Gt, arg.value),
                CmpOp::Le => (SeccompCmpOp::Le, arg.value),
                CmpOp::Ge => (SeccompCmpOp::Ge, arg.value),
                CmpOp::MaskedEq(mask) => (SeccompCmpOp::MaskedEq(mask), arg.value),
            };
            SeccompCondition::new(arg.index, SeccompCmpArgLen::Qword, op, value)
                .map_err(|e| LrunError::Seccomp(format!("bad argument rule: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let compiled = SeccompRule::new(conditions)
        .map_err(|e| LrunError::Seccomp(format!("bad rule for {}: {}", rule.name, e)))?;

    match set.entry(rule.nr) {
        std::collections::btree_map::Entry::Vacant(entry) => {
            entry.insert(Some(vec![compiled]));
        }
        std::collections::btree_map::Entry::Occupied(mut entry) => {
            // an unconditional rule already covers this syscall
            if let Some(rules) = entry.get_mut() {
                rules.push(compiled);
            }
        }
    }
    Ok(())
}

fn build_program(
    set: BTreeMap<i64, Option<Vec<SeccompRule>>>,
    mismatch_action: SeccompAction,
    match_action: SeccompAction,
    arch: TargetArch,
) -> Result<BpfProgram> {
    let rules: BTreeMap<i64, Vec<SeccompRule>> = set
        .into_iter()
        .map(|(nr, rules)| (nr, rules.unwrap_or_default()))
        .collect();

    let filter = SeccompFilter::new(rules, mismatch_action, match_action, arch)
        .map_err(|e| LrunError::Seccomp(format!("can not build filter: {}", e)))?;

    filter
        .try_into()
        .map_err(|e| LrunError::Seccomp(format!("can not compile filter: {}", e)))
}

fn target_arch() -> TargetArch {
    #[cfg(target_arch = "x86_64")]
    return TargetArch::x86_64;

    #[cfg(target_arch = "aarch64")]
    return TargetArch::aarch64;

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    compile_error!("unsupported architecture for seccomp filtering");
}

// ---------------------------------------------------------------------------
// grammar
// ---------------------------------------------------------------------------

/// Split rules on ',' while respecting '[...]' argument groups.
fn split_rules(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn parse_rule(part: &str) -> Result<SyscallRule> {
    let bad = |msg: &str| LrunError::Seccomp(format!("invalid syscall rule '{}': {}", part, msg));

    let name_end = part
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(part.len());
    let name = &part[..name_end];
    if name.is_empty() {
        return Err(bad("missing syscall name"));
    }
    let nr = resolve_syscall(name).ok_or_else(|| bad("unknown syscall"))?;

    let mut rest = &part[name_end..];
    let mut args = Vec::new();
    if let Some(inner) = rest.strip_prefix('[') {
        let close = inner.find(']').ok_or_else(|| bad("missing ']'"))?;
        for arg in inner[..close].split(',') {
            args.push(parse_arg(arg).map_err(|e| bad(&e))?);
        }
        rest = &inner[close + 1..];
    }

    let action = match rest {
        "" => RuleAction::Default,
        ":k" => RuleAction::Kill,
        ":e" => RuleAction::Eperm,
        ":a" => RuleAction::Allow,
        _ => return Err(bad("trailing garbage")),
    };

    Ok(SyscallRule {
        name: name.to_string(),
        nr,
        args,
        action,
    })
}

fn parse_arg(arg: &str) -> std::result::Result<ArgCmp, String> {
    let bytes = arg.as_bytes();
    let index = match bytes.first() {
        Some(c @ b'a'..=b'f') => c - b'a',
        _ => return Err(format!("argument name must be 'a'..'f' in '{}'", arg)),
    };
    let rest = &arg[1..];

    // masked compare: `a&==N`, `a&M==V`, `a&=M`, `a&M`
    if let Some(rest) = rest.strip_prefix('&') {
        let rest = if let Some(r) = rest.strip_prefix("==") {
            // mask and value are the same number
            let value = parse_number(r)?;
            return Ok(ArgCmp {
                index,
                op: CmpOp::MaskedEq(value),
                value,
            });
        } else {
            rest.strip_prefix('=').unwrap_or(rest)
        };

        let (mask_str, value_str) = match rest.find("==") {
            Some(pos) => (&rest[..pos], &rest[pos + 2..]),
            None => (rest, rest),
        };
        let mask = parse_number(mask_str)?;
        let value = parse_number(value_str)?;
        return Ok(ArgCmp {
            index,
            op: CmpOp::MaskedEq(mask),
            value,
        });
    }

    let (op, number) = if let Some(r) = rest.strip_prefix("==") {
        (CmpOp::Eq, r)
    } else if let Some(r) = rest.strip_prefix("!=") {
        (CmpOp::Ne, r)
    } else if let Some(r) = rest.strip_prefix("<=") {
        (CmpOp::Le, r)
    } else if let Some(r) = rest.strip_prefix(">=") {
        (CmpOp::Ge, r)
    } else if let Some(r) = rest.strip_prefix('=') {
        (CmpOp::Eq, r)
    } else if let Some(r) = rest.strip_prefix('!') {
        (CmpOp::Ne, r)
    } else if let Some(r) = rest.strip_prefix('<') {
        (CmpOp::Lt, r)
    } else if let Some(r) = rest.strip_prefix('>') {
        (CmpOp::Gt, r)
    } else {
        return Err(format!("missing comparison operator in '{}'", arg));
    };

    Ok(ArgCmp {
        index,
        op,
        value: parse_number(number)?,
    })
}

fn parse_number(s: &str) -> std::result::Result<u64, String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a decimal number", s));
    }
    s.parse().map_err(|e| format!("'{}': {}", s, e))
}

// ---------------------------------------------------------------------------
// canonical display (round-trips through parse)
// ---------------------------------------------------------------------------

impl fmt::Display for SyscallFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mode == FilterMode::Blacklist {
            write!(f, "!")?;
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", rule)?;
        }
        Ok(())
    }
}

impl fmt::Display for SyscallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, "]")?;
        }
        match self.action {
            RuleAction::Default => Ok(()),
            RuleAction::Kill => write!(f, ":k"),
            RuleAction::Eperm => write!(f, ":e"),
            RuleAction::Allow => write!(f, ":a"),
        }
    }
}

impl fmt::Display for ArgCmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = (b'a' + self.index) as char;
        match self.op {
            CmpOp::Eq => write!(f, "{}=={}", name, self.value),
            CmpOp::Ne => write!(f, "{}!={}", name, self.value),
            CmpOp::Lt => write!(f, "{}<{}", name, self.value),
            CmpOp::Gt => write!(f, "{}>{}", name, self.value),
            CmpOp::Le => write!(f, "{}<={}", name, self.value),
            CmpOp::Ge => write!(f, "{}>={}", name, self.value),
            CmpOp::MaskedEq(mask) => write!(f, "{}&{}=={}", name, mask, self.value),
        }
    }
}

// ---------------------------------------------------------------------------
// name table
// ---------------------------------------------------------------------------

/// Map a syscall name (or a bare decimal number) to its number on the
/// build architecture.
fn resolve_syscall(name: &str) -> Option<i64> {
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return name.parse().ok();
    }

    let nr = match name {
        "read" => libc::SYS_read,
        "write" => libc::SYS_write,
        "close" => libc::SYS_close,
        "fstat" => libc::SYS_fstat,
        "lseek" => libc::SYS_lseek,
        "mmap" => libc::SYS_mmap,
        "mprotect" => libc::SYS_mprotect,
        "munmap" => libc::SYS_munmap,
        "brk" => libc::SYS_brk,
        "rt_sigaction" => libc::SYS_rt_sigaction,
        "rt_sigprocmask" => libc::SYS_rt_sigprocmask,
        "rt_sigreturn" => libc::SYS_rt_sigreturn,
        "rt_sigpending" => libc::SYS_rt_sigpending,
        "rt_sigtimedwait" => libc::SYS_rt_sigtimedwait,
        "rt_sigsuspend" => libc::SYS_rt_sigsuspend,
        "sigaltstack" => libc::SYS_sigaltstack,
        "ioctl" => libc::SYS_ioctl,
        "pread64" => libc::SYS_pread64,
        "pwrite64" => libc::SYS_pwrite64,
        "readv" => libc::SYS_readv,
        "writev" => libc::SYS_writev,
        "sched_yield" => libc::SYS_sched_yield,
        "mremap" => libc::SYS_mremap,
        "msync" => libc::SYS_msync,
        "mincore" => libc::SYS_mincore,
        "madvise" => libc::SYS_madvise,
        "shmget" => libc::SYS_shmget,
        "shmat" => libc::SYS_shmat,
        "shmctl" => libc::SYS_shmctl,
        "shmdt" => libc::SYS_shmdt,
        "dup" => libc::SYS_dup,
        "dup3" => libc::SYS_dup3,
        "nanosleep" => libc::SYS_nanosleep,
        "getitimer" => libc::SYS_getitimer,
        "setitimer" => libc::SYS_setitimer,
        "getpid" => libc::SYS_getpid,
        "gettid" => libc::SYS_gettid,
        "sendfile" => libc::SYS_sendfile,
        "socket" => libc::SYS_socket,
        "connect" => libc::SYS_connect,
        "accept" => libc::SYS_accept,
        "accept4" => libc::SYS_accept4,
        "sendto" => libc::SYS_sendto,
        "recvfrom" => libc::SYS_recvfrom,
        "sendmsg" => libc::SYS_sendmsg,
        "recvmsg" => libc::SYS_recvmsg,
        "sendmmsg" => libc::SYS_sendmmsg,
        "recvmmsg" => libc::SYS_recvmmsg,
        "shutdown" => libc::SYS_shutdown,
        "bind" => libc::SYS_bind,
        "listen" => libc::SYS_listen,
        "getsockname" => libc::SYS_getsockname,
        "getpeername" => libc::SYS_getpeername,
        "socketpair" => libc::SYS_socketpair,
        "setsockopt" => libc::SYS_setsockopt,
        "getsockopt" => libc::SYS_getsockopt,
        "clone" => libc::SYS_clone,
        "clone3" => libc::SYS_clone3,
        "execve" => libc::SYS_execve,
        "execveat" => libc::SYS_execveat,
        "exit" => libc::SYS_exit,
        "exit_group" => libc::SYS_exit_group,
        "wait4" => libc::SYS_wait4,
        "waitid" => libc::SYS_waitid,
        "kill" => libc::SYS_kill,
        "tkill" => libc::SYS_tkill,
        "tgkill" => libc::SYS_tgkill,
        "uname" => libc::SYS_uname,
        "fcntl" => libc::SYS_fcntl,
        "flock" => libc::SYS_flock,
        "fsync" => libc::SYS_fsync,
        "fdatasync" => libc::SYS_fdatasync,
        "truncate" => libc::SYS_truncate,
        "ftruncate" => libc::SYS_ftruncate,
        "getcwd" => libc::SYS_getcwd,
        "chdir" => libc::SYS_chdir,
        "fchdir" => libc::SYS_fchdir,
        "fchmod" => libc::SYS_fchmod,
        "fchmodat" => libc::SYS_fchmodat,
        "fchown" => libc::SYS_fchown,
        "fchownat" => libc::SYS_fchownat,
        "umask" => libc::SYS_umask,
        "gettimeofday" => libc::SYS_gettimeofday,
        "getrlimit" => libc::SYS_getrlimit,
        "setrlimit" => libc::SYS_setrlimit,
        "prlimit64" => libc::SYS_prlimit64,
        "getrusage" => libc::SYS_getrusage,
        "sysinfo" => libc::SYS_sysinfo,
        "times" => libc::SYS_times,
        "ptrace" => libc::SYS_ptrace,
        "getuid" => libc::SYS_getuid,
        "getgid" => libc::SYS_getgid,
        "geteuid" => libc::SYS_geteuid,
        "getegid" => libc::SYS_getegid,
        "setuid" => libc::SYS_setuid,
        "setgid" => libc::SYS_setgid,
        "setpgid" => libc::SYS_setpgid,
        "getppid" => libc::SYS_getppid,
        "setsid" => libc::SYS_setsid,
        "getsid" => libc::SYS_getsid,
        "setreuid" => libc::SYS_setreuid,
        "setregid" => libc::SYS_setregid,
        "getgroups" => libc::SYS_getgroups,
        "setgroups" => libc::SYS_setgroups,
        "setresuid" => libc::SYS_setresuid,
        "getresuid" => libc::SYS_getresuid,
        "setresgid" => libc::SYS_setresgid,
        "getresgid" => libc::SYS_getresgid,
        "getpgid" => libc::SYS_getpgid,
        "capget" => libc::SYS_capget,
        "capset" => libc::SYS_capset,
        "personality" => libc::SYS_personality,
        "statfs" => libc::SYS_statfs,
        "fstatfs" => libc::SYS_fstatfs,
        "getpriority" => libc::SYS_getpriority,
        "setpriority" => libc::SYS_setpriority,
        "sched_setparam" => libc::SYS_sched_setparam,
        "sched_getparam" => libc::SYS_sched_getparam,
        "sched_setscheduler" => libc::SYS_sched_setscheduler,
        "sched_getscheduler" => libc::SYS_sched_getscheduler,
        "sched_get_priority_max" => libc::SYS_sched_get_priority_max,
        "sched_get_priority_min" => libc::SYS_sched_get_priority_min,
        "sched_setaffinity" => libc::SYS_sched_setaffinity,
        "sched_getaffinity" => libc::SYS_sched_getaffinity,
        "mlock" => libc::SYS_mlock,
        "munlock" => libc::SYS_munlock,
        "mlockall" => libc::SYS_mlockall,
        "munlockall" => libc::SYS_munlockall,
        "prctl" => libc::SYS_prctl,
        "chroot" => libc::SYS_chroot,
        "sync" => libc::SYS_sync,
        "mount" => libc::SYS_mount,
        "umount2" => libc::SYS_umount2,
        "sethostname" => libc::SYS_sethostname,
        "setdomainname" => libc::SYS_setdomainname,
        "futex" => libc::SYS_futex,
        "set_tid_address" => libc::SYS_set_tid_address,
        "restart_syscall" => libc::SYS_restart_syscall,
        "timer_create" => libc::SYS_timer_create,
        "timer_settime" => libc::SYS_timer_settime,
        "timer_gettime" => libc::SYS_timer_gettime,
        "timer_delete" => libc::SYS_timer_delete,
        "clock_settime" => libc::SYS_clock_settime,
        "clock_gettime" => libc::SYS_clock_gettime,
        "clock_getres" => libc::SYS_clock_getres,
        "clock_nanosleep" => libc::SYS_clock_nanosleep,
        "epoll_ctl" => libc::SYS_epoll_ctl,
        "epoll_pwait" => libc::SYS_epoll_pwait,
        "epoll_create1" => libc::SYS_epoll_create1,
        "openat" => libc::SYS_openat,
        "mkdirat" => libc::SYS_mkdirat,
        "mknodat" => libc::SYS_mknodat,
        "unlinkat" => libc::SYS_unlinkat,
        "renameat" => libc::SYS_renameat,
        "renameat2" => libc::SYS_renameat2,
        "linkat" => libc::SYS_linkat,
        "symlinkat" => libc::SYS_symlinkat,
        "readlinkat" => libc::SYS_readlinkat,
        "faccessat" => libc::SYS_faccessat,
        "newfstatat" => libc::SYS_newfstatat,
        "getdents64" => libc::SYS_getdents64,
        "pselect6" => libc::SYS_pselect6,
        "ppoll" => libc::SYS_ppoll,
        "unshare" => libc::SYS_unshare,
        "set_robust_list" => libc::SYS_set_robust_list,
        "get_robust_list" => libc::SYS_get_robust_list,
        "splice" => libc::SYS_splice,
        "tee" => libc::SYS_tee,
        "vmsplice" => libc::SYS_vmsplice,
        "utimensat" => libc::SYS_utimensat,
        "signalfd4" => libc::SYS_signalfd4,
        "eventfd2" => libc::SYS_eventfd2,
        "timerfd_create" => libc::SYS_timerfd_create,
        "timerfd_settime" => libc::SYS_timerfd_settime,
        "timerfd_gettime" => libc::SYS_timerfd_gettime,
        "fallocate" => libc::SYS_fallocate,
        "pipe2" => libc::SYS_pipe2,
        "inotify_init1" => libc::SYS_inotify_init1,
        "inotify_add_watch" => libc::SYS_inotify_add_watch,
        "inotify_rm_watch" => libc::SYS_inotify_rm_watch,
        "preadv" => libc::SYS_preadv,
        "pwritev" => libc::SYS_pwritev,
        "preadv2" => libc::SYS_preadv2,
        "pwritev2" => libc::SYS_pwritev2,
        "perf_event_open" => libc::SYS_perf_event_open,
        "setns" => libc::SYS_setns,
        "getcpu" => libc::SYS_getcpu,
        "process_vm_readv" => libc::SYS_process_vm_readv,
        "process_vm_writev" => libc::SYS_process_vm_writev,
        "kcmp" => libc::SYS_kcmp,
        "seccomp" => libc::SYS_seccomp,
        "getrandom" => libc::SYS_getrandom,
        "memfd_create" => libc::SYS_memfd_create,
        "bpf" => libc::SYS_bpf,
        "userfaultfd" => libc::SYS_userfaultfd,
        "membarrier" => libc::SYS_membarrier,
        "mlock2" => libc::SYS_mlock2,
        "copy_file_range" => libc::SYS_copy_file_range,
        "statx" => libc::SYS_statx,
        "io_setup" => libc::SYS_io_setup,
        "io_destroy" => libc::SYS_io_destroy,
        "io_getevents" => libc::SYS_io_getevents,
        "io_submit" => libc::SYS_io_submit,
        "io_cancel" => libc::SYS_io_cancel,
        "syslog" => libc::SYS_syslog,
        "acct" => libc::SYS_acct,
        "swapon" => libc::SYS_swapon,
        "swapoff" => libc::SYS_swapoff,
        "reboot" => libc::SYS_reboot,
        "init_module" => libc::SYS_init_module,
        "finit_module" => libc::SYS_finit_module,
        "delete_module" => libc::SYS_delete_module,
        #[cfg(target_arch = "x86_64")]
        "open" => libc::SYS_open,
        #[cfg(target_arch = "x86_64")]
        "stat" => libc::SYS_stat,
        #[cfg(target_arch = "x86_64")]
        "lstat" => libc::SYS_lstat,
        #[cfg(target_arch = "x86_64")]
        "poll" => libc::SYS_poll,
        #[cfg(target_arch = "x86_64")]
        "access" => libc::SYS_access,
        #[cfg(target_arch = "x86_64")]
        "pipe" => libc::SYS_pipe,
        #[cfg(target_arch = "x86_64")]
        "select" => libc::SYS_select,
        #[cfg(target_arch = "x86_64")]
        "dup2" => libc::SYS_dup2,
        #[cfg(target_arch = "x86_64")]
        "pause" => libc::SYS_pause,
        #[cfg(target_arch = "x86_64")]
        "alarm" => libc::SYS_alarm,
        #[cfg(target_arch = "x86_64")]
        "fork" => libc::SYS_fork,
        #[cfg(target_arch = "x86_64")]
        "vfork" => libc::SYS_vfork,
        #[cfg(target_arch = "x86_64")]
        "getdents" => libc::SYS_getdents,
        #[cfg(target_arch = "x86_64")]
        "rename" => libc::SYS_rename,
        #[cfg(target_arch = "x86_64")]
        "mkdir" => libc::SYS_mkdir,
        #[cfg(target_arch = "x86_64")]
        "rmdir" => libc::SYS_rmdir,
        #[cfg(target_arch = "x86_64")]
        "creat" => libc::SYS_creat,
        #[cfg(target_arch = "x86_64")]
        "link" => libc::SYS_link,
        #[cfg(target_arch = "x86_64")]
        "unlink" => libc::SYS_unlink,
        #[cfg(target_arch = "x86_64")]
        "symlink" => libc::SYS_symlink,
        #[cfg(target_arch = "x86_64")]
        "readlink" => libc::SYS_readlink,
        #[cfg(target_arch = "x86_64")]
        "chmod" => libc::SYS_chmod,
        #[cfg(target_arch = "x86_64")]
        "chown" => libc::SYS_chown,
        #[cfg(target_arch = "x86_64")]
        "lchown" => libc::SYS_lchown,
        #[cfg(target_arch = "x86_64")]
        "mknod" => libc::SYS_mknod,
        #[cfg(target_arch = "x86_64")]
        "utimes" => libc::SYS_utimes,
        #[cfg(target_arch = "x86_64")]
        "getpgrp" => libc::SYS_getpgrp,
        #[cfg(target_arch = "x86_64")]
        "epoll_create" => libc::SYS_epoll_create,
        #[cfg(target_arch = "x86_64")]
        "epoll_wait" => libc::SYS_epoll_wait,
        #[cfg(target_arch = "x86_64")]
        "inotify_init" => libc::SYS_inotify_init,
        #[cfg(target_arch = "x86_64")]
        "time" => libc::SYS_time,
        #[cfg(target_arch = "x86_64")]
        "arch_prctl" => libc::SYS_arch_prctl,
        _ => return None,
    };
    Some(nr as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(filter: &SyscallFilter) -> SyscallFilter {
        SyscallFilter::parse(&filter.to_string()).unwrap()
    }

    #[test]
    fn test_parse_plain_whitelist() {
        let filter = SyscallFilter::parse("read,write,exit").unwrap();
        assert_eq!(filter.mode, FilterMode::Whitelist);
        assert_eq!(filter.rules.len(), 3);
        assert_eq!(filter.rules[0].name, "read");
        assert_eq!(filter.rules[0].nr, libc::SYS_read as i64);
        assert_eq!(filter.rules[0].action, RuleAction::Default);
    }

    #[test]
    fn test_parse_blacklist_prefixes() {
        for spec in ["!sethostname:k", "-sethostname:k"] {
            let filter = SyscallFilter::parse(spec).unwrap();
            assert_eq!(filter.mode, FilterMode::Blacklist);
            assert_eq!(filter.rules[0].action, RuleAction::Kill);
        }
    }

    #[test]
    fn test_parse_arg_rules() {
        let filter = SyscallFilter::parse("!write[a==2,b<100]:e").unwrap();
        let rule = &filter.rules[0];
        assert_eq!(
            rule.args,
            vec![
                ArgCmp { index: 0, op: CmpOp::Eq, value: 2 },
                ArgCmp { index: 1, op: CmpOp::Lt, value: 100 },
            ]
        );
        assert_eq!(rule.action, RuleAction::Eperm);
    }

    #[test]
    fn test_short_operators_normalize() {
        let short = SyscallFilter::parse("!write[a=2],read[b!3]").unwrap();
        let long = SyscallFilter::parse("!write[a==2],read[b!=3]").unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn test_masked_compare_forms() {
        // the CLONE_NEWUSER example from the filter documentation
        let general = SyscallFilter::parse("!clone[a&268435456==268435456]").unwrap();
        let shorthand = SyscallFilter::parse("!clone[a&==268435456]").unwrap();
        assert_eq!(general, shorthand);
        assert_eq!(
            general.rules[0].args[0],
            ArgCmp {
                index: 0,
                op: CmpOp::MaskedEq(268435456),
                value: 268435456
            }
        );

        let split = SyscallFilter::parse("!clone[a&12==4]").unwrap();
        assert_eq!(
            split.rules[0].args[0],
            ArgCmp { index: 0, op: CmpOp::MaskedEq(12), value: 4 }
        );
    }

    #[test]
    fn test_numeric_syscall_names() {
        let filter = SyscallFilter::parse("0,1").unwrap();
        assert_eq!(filter.rules[0].nr, 0);
        assert_eq!(filter.rules[1].nr, 1);
    }

    #[test]
    fn test_round_trip_is_stable() {
        for spec in [
            "read,write,openat,exit_group",
            "!sethostname:k",
            "!write[a==2]:e,read[b>=10]:a",
            "!clone[a&268435456==268435456]",
            "read[c<=5],write[d>1,e!=0]:k",
        ] {
            let parsed = SyscallFilter::parse(spec).unwrap();
            assert_eq!(parsed, reparse(&parsed), "spec: {}", spec);
            // printing twice is also stable
            assert_eq!(parsed.to_string(), reparse(&parsed).to_string());
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(SyscallFilter::parse("definitely_not_a_syscall").is_err());
        assert!(SyscallFilter::parse("read[").is_err());
        assert!(SyscallFilter::parse("read[g==1]").is_err());
        assert!(SyscallFilter::parse("read[a~1]").is_err());
        assert!(SyscallFilter::parse("read:x").is_err());
        assert!(SyscallFilter::parse("read,").is_err());
        assert!(SyscallFilter::parse("read[a==0x10]").is_err());
    }

    #[test]
    fn test_forbids_everything() {
        assert!(SyscallFilter::parse("").is_err());
        let kill_only = SyscallFilter::parse("read:k").unwrap();
        assert!(kill_only.forbids_everything());
        let normal = SyscallFilter::parse("read,write").unwrap();
        assert!(!normal.forbids_everything());
        let blacklist = SyscallFilter::parse("!read").unwrap();
        assert!(!blacklist.forbids_everything());
    }

    #[test]
    fn test_compile_whitelist_single_program() {
        let filter = SyscallFilter::parse("read,write,exit_group").unwrap();
        let programs = filter.compile().unwrap();
        assert_eq!(programs.len(), 1);
        assert!(!programs[0].is_empty());
    }

    #[test]
    fn test_compile_blacklist_kill_program() {
        let filter = SyscallFilter::parse("!sethostname:k").unwrap();
        let programs = filter.compile().unwrap();
        assert_eq!(programs.len(), 1);
    }

    #[test]
    fn test_compile_splits_by_action() {
        let filter = SyscallFilter::parse("read,write,sethostname:k").unwrap();
        let programs = filter.compile().unwrap();
        // allow set plus kill set
        assert_eq!(programs.len(), 2);
    }

    #[test]
    fn test_compile_rejects_forbidding_filter() {
        let filter = SyscallFilter::parse("read:k").unwrap();
        assert!(filter.compile().is_err());
    }
}
