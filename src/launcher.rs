//! Child launch pipeline.
//!
//! The child is cloned into its namespaces and runs a strict, linear
//! setup sequence; each step is irreversible, so the order must not
//! drift. Failures travel back to the supervisor as a one-byte stage tag
//! over a close-on-exec pipe: a successful exec closes the pipe and the
//! parent reads EOF.

use crate::cgroup::Cgroup;
use crate::config::{SpawnArg, UtsOverride};
use crate::error::{LrunError, Result};
use crate::filesystem;
use crate::seccomp;
use nix::errno::Errno;
use nix::sched::{clone, CloneFlags};
use nix::sys::prctl;
use nix::sys::resource::setrlimit;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{self, Mode};
use nix::sys::wait::waitpid;
use nix::unistd::{self, Gid, Pid, Uid};
use std::collections::HashSet;
use std::ffi::CString;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

const CHILD_STACK_SIZE: usize = 256 * 1024;

/// Setup pipeline stages, in execution order. The failing stage is the
/// byte written to the error pipe, and the supervisor exits with
/// `10 + stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetupStage {
    CgroupSync = 1,
    Uts = 2,
    CloseFds = 3,
    Filesystem = 4,
    Command = 5,
    Credentials = 6,
    Rlimit = 7,
    Environ = 8,
    Nice = 9,
    NoNewPrivs = 10,
    Seccomp = 11,
    Exec = 12,
}

impl SetupStage {
    pub fn describe(tag: u8) -> &'static str {
        match tag {
            1 => "waiting for cgroup attach",
            2 => "applying UTS overrides",
            3 => "closing inherited file descriptors",
            4 => "building the filesystem view",
            5 => "running --cmd commands",
            6 => "dropping credentials",
            7 => "applying resource limits",
            8 => "preparing the environment",
            9 => "applying nice",
            10 => "setting no-new-privs",
            11 => "installing the syscall filter",
            12 => "executing the command",
            _ => "unknown setup stage",
        }
    }
}

type StageResult<T> = std::result::Result<T, (SetupStage, String)>;

/// Clone the child with the requested namespace flags (plus a private
/// mount namespace, always), attach it to every cgroup subsystem, then
/// release it into its setup pipeline.
pub(crate) fn spawn(cg: &Cgroup, arg: &SpawnArg) -> Result<Pid> {
    let (sync_r, mut sync_w) = pipe_cloexec()?;
    let (mut err_r, err_w) = pipe_cloexec()?;

    let flags = arg.clone_flags | CloneFlags::CLONE_NEWNS;
    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    let sync_r_fd = sync_r.as_raw_fd();
    let sync_w_fd = sync_w.as_raw_fd();
    let err_r_fd = err_r.as_raw_fd();
    let err_w_fd = err_w.as_raw_fd();

    let child = {
        let cb = Box::new(|| child_main(arg, sync_r_fd, sync_w_fd, err_r_fd, err_w_fd));
        unsafe { clone(cb, &mut stack, flags, Some(libc::SIGCHLD)) }
            .map_err(|e| LrunError::Process(format!("clone failed: {}", e)))?
    };

    // parent keeps the sync write end and the error read end
    drop(sync_r);
    drop(err_w);

    if let Err(e) = cg.attach_task(child) {
        let _ = kill(child, Signal::SIGKILL);
        let _ = waitpid(child, None);
        return Err(e);
    }

    // the child is in every subsystem now; let it run
    let _ = sync_w.write_all(&[0]);
    drop(sync_w);

    let mut tag = [0u8; 1];
    let n = loop {
        match err_r.read(&mut tag) {
            Ok(n) => break n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(LrunError::Process(format!(
                    "can not read child setup pipe: {}",
                    e
                )))
            }
        }
    };

    if n == 0 {
        // EOF: the pipe was closed by a successful exec
        Ok(child)
    } else {
        let _ = waitpid(child, None);
        Err(LrunError::Spawn {
            stage: tag[0],
            message: format!("child failed while {}", SetupStage::describe(tag[0])),
        })
    }
}

fn pipe_cloexec() -> Result<(File, File)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(LrunError::Io(std::io::Error::last_os_error()));
    }
    // SAFETY: pipe2 just created these descriptors
    let read_end = unsafe { File::from_raw_fd(fds[0]) };
    let write_end = unsafe { File::from_raw_fd(fds[1]) };
    Ok((read_end, write_end))
}

fn child_main(arg: &SpawnArg, sync_r: RawFd, sync_w: RawFd, err_r: RawFd, err_w: RawFd) -> isize {
    unsafe {
        libc::close(sync_w);
        libc::close(err_r);
    }

    let (stage, message) = match child_setup(arg, sync_r, err_w) {
        Err(failure) => failure,
        Ok(infallible) => match infallible {},
    };

    eprintln!("lrun: {}: {}", SetupStage::describe(stage as u8), message);
    let tag = [stage as u8];
    unsafe {
        libc::write(err_w, tag.as_ptr() as *const libc::c_void, 1);
    }
    stage as isize
}

fn child_setup(arg: &SpawnArg, sync_r: RawFd, err_w: RawFd) -> StageResult<std::convert::Infallible> {
    wait_for_attach(sync_r).map_err(|e| (SetupStage::CgroupSync, e))?;

    apply_uts(&arg.uts).map_err(|e| (SetupStage::Uts, e))?;

    close_inherited_fds(&arg.keep_fds, err_w).map_err(|e| (SetupStage::CloseFds, e))?;

    filesystem::apply(&arg.fs).map_err(|e| (SetupStage::Filesystem, e.to_string()))?;

    run_commands(&arg.cmds).map_err(|e| (SetupStage::Command, e))?;

    drop_credentials(arg).map_err(|e| (SetupStage::Credentials, e))?;

    apply_rlimits(arg).map_err(|e| (SetupStage::Rlimit, e))?;

    apply_environment(arg).map_err(|e| (SetupStage::Environ, e))?;

    apply_nice(arg.nice).map_err(|e| (SetupStage::Nice, e))?;

    if arg.no_new_privs {
        prctl::set_no_new_privs().map_err(|e| (SetupStage::NoNewPrivs, e.to_string()))?;
    }

    seccomp::install(&arg.seccomp).map_err(|e| (SetupStage::Seccomp, e.to_string()))?;

    exec(&arg.args)
}

/// Block until the parent has written this pid into every subsystem's
/// tasks file; accounting starts before the first instruction of the
/// payload this way.
fn wait_for_attach(sync_r: RawFd) -> std::result::Result<(), String> {
    let mut byte = [0u8; 1];
    loop {
        let n = unsafe { libc::read(sync_r, byte.as_mut_ptr() as *mut libc::c_void, 1) };
        match n {
            1 => return Ok(()),
            0 => return Err("parent closed the sync pipe before attaching".to_string()),
            _ if Errno::last() == Errno::EINTR => continue,
            _ => return Err(std::io::Error::last_os_error().to_string()),
        }
    }
}

fn apply_uts(uts: &UtsOverride) -> std::result::Result<(), String> {
    if let Some(nodename) = &uts.nodename {
        unistd::sethostname(nodename).map_err(|e| format!("sethostname: {}", e))?;
    }

    if let Some(domainname) = &uts.domainname {
        let rc = unsafe {
            libc::setdomainname(domainname.as_ptr() as *const libc::c_char, domainname.len())
        };
        if rc != 0 {
            return Err(format!("setdomainname: {}", std::io::Error::last_os_error()));
        }
    }

    // these three need a kernel that exposes writable uname fields
    for (key, value) in [
        ("ostype", &uts.sysname),
        ("osrelease", &uts.release),
        ("osversion", &uts.version),
    ] {
        if let Some(value) = value {
            std::fs::write(format!("/proc/sys/kernel/{}", key), value)
                .map_err(|e| format!("{} override not supported by this kernel: {}", key, e))?;
        }
    }

    Ok(())
}

/// Close every inherited descriptor above stderr except the requested
/// keep set, the status channel (closed at exec by its FD_CLOEXEC flag)
/// and the error pipe.
fn close_inherited_fds(keep: &HashSet<RawFd>, err_w: RawFd) -> std::result::Result<(), String> {
    let entries = std::fs::read_dir("/proc/self/fd")
        .map_err(|e| format!("can not list /proc/self/fd: {}", e))?;

    let fds: Vec<RawFd> = entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
        .collect();

    for fd in fds {
        if fd <= 3 || fd == err_w || keep.contains(&fd) {
            continue;
        }
        unsafe { libc::close(fd) };
    }
    Ok(())
}

fn run_commands(cmds: &[String]) -> std::result::Result<(), String> {
    for cmd in cmds {
        let status = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(|e| format!("can not run '{}': {}", cmd, e))?;
        if !status.success() {
            log::warn!("--cmd '{}' exited with {}", cmd, status);
        }
    }
    Ok(())
}

/// Point of no return: after setuid nothing below may require root.
fn drop_credentials(arg: &SpawnArg) -> std::result::Result<(), String> {
    stat::umask(Mode::from_bits_truncate(arg.umask));

    unistd::setgid(Gid::from_raw(arg.gid)).map_err(|e| format!("setgid: {}", e))?;
    unistd::setgroups(&[]).map_err(|e| format!("setgroups: {}", e))?;
    unistd::setuid(Uid::from_raw(arg.uid)).map_err(|e| format!("setuid: {}", e))?;
    Ok(())
}

fn apply_rlimits(arg: &SpawnArg) -> std::result::Result<(), String> {
    for (kind, value) in &arg.rlimits {
        setrlimit(kind.resource(), *value, *value)
            .map_err(|e| format!("can not set {} = {}: {}", kind.name(), value, e))?;
    }
    Ok(())
}

fn apply_environment(arg: &SpawnArg) -> std::result::Result<(), String> {
    if arg.reset_env {
        let rc = unsafe { libc::clearenv() };
        if rc != 0 {
            return Err("clearenv failed".to_string());
        }
    }

    for (key, value) in &arg.env {
        let key_c = CString::new(key.as_str())
            .map_err(|_| format!("environment key contains NUL byte: {}", key))?;
        let value_c = CString::new(value.as_str())
            .map_err(|_| format!("environment value for {} contains NUL byte", key))?;
        let rc = unsafe { libc::setenv(key_c.as_ptr(), value_c.as_ptr(), 1) };
        if rc != 0 {
            return Err(format!("setenv {} failed", key));
        }
    }
    Ok(())
}

fn apply_nice(value: i32) -> std::result::Result<(), String> {
    Errno::clear();
    let rc = unsafe { libc::nice(value) };
    if rc == -1 && Errno::last_raw() != 0 {
        return Err(format!("nice({}): {}", value, Errno::last()));
    }
    Ok(())
}

fn exec(args: &[String]) -> StageResult<std::convert::Infallible> {
    let exec_err = |msg: String| (SetupStage::Exec, msg);

    let argv: Vec<CString> = args
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| exec_err("command argument contains NUL byte".to_string()))?;

    let err = unistd::execvp(&argv[0], &argv).unwrap_err();
    Err(exec_err(format!("execvp {}: {}", args[0], err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_descriptions_cover_all_tags() {
        for tag in 1..=12u8 {
            assert_ne!(SetupStage::describe(tag), "unknown setup stage");
        }
        assert_eq!(SetupStage::describe(0), "unknown setup stage");
        assert_eq!(SetupStage::describe(200), "unknown setup stage");
    }

    #[test]
    fn test_pipe_ends_are_cloexec() {
        let (read_end, write_end) = pipe_cloexec().unwrap();
        for file in [&read_end, &write_end] {
            let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFD) };
            assert!(flags >= 0);
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }

    #[test]
    fn test_pipe_delivers_eof_after_write_end_drops() {
        let (mut read_end, mut write_end) = pipe_cloexec().unwrap();
        write_end.write_all(&[7]).unwrap();
        drop(write_end);

        let mut buf = [0u8; 2];
        assert_eq!(read_end.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 7);
        assert_eq!(read_end.read(&mut buf).unwrap(), 0);
    }
}
