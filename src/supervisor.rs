//! Cgroup setup, the monitoring loop, and the status report.
//!
//! The loop samples cgroup accounting at a fixed interval and breaks on
//! the first of: fatal signal, child reaped, cpu limit, wall deadline,
//! memory limit, output limit, or an empty group. The sample order is
//! fixed so that the attributed `EXCEED` tag is deterministic.

use crate::cgroup::{Cgroup, Ownership};
use crate::config::{Config, Limits, RlimitKind};
use crate::error::{exit_code, LrunError};
use crate::probe;
use crate::signals;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use std::fmt;
use std::time::{Duration, Instant};

/// Which limit terminated the run, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exceeded {
    #[default]
    None,
    CpuTime,
    RealTime,
    Memory,
    Output,
}

impl fmt::Display for Exceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Exceeded::None => "none",
            Exceeded::CpuTime => "CPU_TIME",
            Exceeded::RealTime => "REAL_TIME",
            Exceeded::Memory => "MEMORY",
            Exceeded::Output => "OUTPUT",
        };
        f.write_str(tag)
    }
}

/// The record written to the status channel on normal termination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub memory_bytes: u64,
    pub cpu_seconds: f64,
    pub real_seconds: f64,
    pub signaled: bool,
    pub exit_code: i32,
    pub term_signal: i32,
    pub exceeded: Exceeded,
}

impl RunReport {
    /// Exact wire format of the status channel; consumers parse it by
    /// key, so the key set, order and alignment are all fixed.
    pub fn render(&self) -> String {
        format!(
            "MEMORY   {}\n\
             CPUTIME  {:.3}\n\
             REALTIME {:.3}\n\
             SIGNALED {}\n\
             EXITCODE {}\n\
             TERMSIG  {}\n\
             EXCEED   {}\n",
            self.memory_bytes,
            self.cpu_seconds,
            self.real_seconds,
            self.signaled as i32,
            self.exit_code,
            self.term_signal,
            self.exceeded,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChildStatus {
    signaled: bool,
    exit_code: i32,
    term_signal: i32,
}

impl ChildStatus {
    fn from_wait(status: WaitStatus) -> Option<ChildStatus> {
        match status {
            WaitStatus::Exited(_, code) => Some(ChildStatus {
                signaled: false,
                exit_code: code,
                term_signal: 0,
            }),
            WaitStatus::Signaled(_, signal, _) => Some(ChildStatus {
                signaled: true,
                exit_code: 0,
                term_signal: signal as i32,
            }),
            _ => None,
        }
    }
}

/// The single cleanup choke point for every exit path. Owned groups are
/// destroyed; borrowed groups are only emptied.
pub fn clean_exit(cg: &Cgroup, code: i32) -> ! {
    log::info!("cleaning and exiting with code = {}", code);

    match cg.ownership() {
        Ownership::Owned => {
            if let Err(e) = cg.destroy() {
                log::warn!("can not destroy cgroup: {}", e);
            }
        }
        Ownership::Borrowed => {
            if let Err(e) = cg.killall() {
                log::warn!("can not kill remaining tasks: {}", e);
            }
        }
    }

    std::process::exit(code);
}

/// Configure the group before spawning: device whitelist, memory limit,
/// user-supplied cgroup options, then empty the group and reset its
/// counters in case a borrowed name was used before.
pub fn setup_cgroup(cg: &Cgroup, config: &mut Config) {
    if config.isolation.basic_devices {
        if let Err(e) = cg.limit_devices() {
            log::error!("can not enable devices whitelist: {}", e);
            clean_exit(cg, exit_code::DEVICE_SETUP);
        }
    }

    if let Some(bytes) = config.limits.memory {
        if let Err(e) = cg.set_memory_limit(bytes) {
            log::error!("can not set memory limit: {}", e);
            clean_exit(cg, exit_code::MEMORY_SETUP);
        }
    }

    for (subsys, key, value) in &config.cgroup_options {
        if let Err(e) = cg.set(*subsys, key, value) {
            log::error!("can not set cgroup option '{}' to '{}': {}", key, value, e);
            clean_exit(cg, exit_code::CGROUP_OPTION);
        }
    }

    if let Err(e) = cg.killall() {
        log::error!("can not empty reused cgroup: {}", e);
        clean_exit(cg, exit_code::RESET_OR_SIGNAL);
    }
    if let Err(e) = cg.reset_usages() {
        log::error!("can not reset cpu time / memory usage counter: {}", e);
        clean_exit(cg, exit_code::RESET_OR_SIGNAL);
    }

    // RLIMIT_CPU backstop: the kernel delivers SIGXCPU even if the
    // sampling loop falls behind
    if let Some(limit) = config.limits.cpu_time {
        config
            .spawn
            .rlimits
            .insert(RlimitKind::Cpu, limit.ceil() as u64);
    }
}

/// Spawn the child and supervise it to completion. Returns the process
/// exit code for the supervisor (0, or the child's code when
/// `--pass-exitcode true`). Setup failures never return.
pub fn run(cg: &mut Cgroup, config: &Config) -> i32 {
    // fd 3 must not leak into the child; EBADF only means the caller
    // did not open a status channel
    let rc = unsafe { libc::fcntl(3, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc != 0 && std::io::Error::last_os_error().raw_os_error() != Some(libc::EBADF) {
        log::error!("can not set FD_CLOEXEC on fd 3");
        clean_exit(cg, exit_code::STATUS_FD);
    }

    let pid = match cg.spawn(&config.spawn) {
        Ok(pid) => pid,
        Err(LrunError::Spawn { stage, message }) => {
            log::error!("{}", message);
            clean_exit(cg, exit_code::SPAWN_BASE + stage as i32);
        }
        Err(e) => {
            log::error!("can not spawn child: {}", e);
            clean_exit(cg, exit_code::SPAWN_BASE);
        }
    };

    if let Err(e) = signals::install() {
        log::warn!("{}", e);
    }

    // keep the supervisor ahead of a cpu-bound child tree
    Errno::clear();
    if unsafe { libc::nice(-5) } == -1 && Errno::last_raw() != 0 {
        log::error!("can not renice");
    }

    log::info!("entering main loop, watching pid {}", pid);

    let start = Instant::now();
    let deadline = config.limits.real_time.map(Duration::from_secs_f64);
    let interval = config.interval;

    let mut status = ChildStatus::default();
    let mut exceeded = Exceeded::None;
    let mut running = true;

    while running {
        if let Some(signal) = signals::triggered() {
            eprintln!("Receive signal {}, exiting...", signal);
            clean_exit(cg, exit_code::RESET_OR_SIGNAL);
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(wait_status) => {
                if let Some(reaped) = ChildStatus::from_wait(wait_status) {
                    status = reaped;
                    log::info!("child exited");
                    break;
                }
            }
            // right after clone the pid can briefly be invisible
            Err(Errno::ECHILD) => std::thread::sleep(interval),
            Err(e) => log::warn!("waitpid: {}", e),
        }

        if let Some(limit) = config.limits.cpu_time {
            match cg.cpu_usage() {
                Ok(usage) if usage >= limit => {
                    exceeded = Exceeded::CpuTime;
                    break;
                }
                Ok(_) => {}
                Err(e) => log::warn!("cpu accounting read failed: {}", e),
            }
        }

        if let Some(deadline) = deadline {
            if start.elapsed() >= deadline {
                exceeded = Exceeded::RealTime;
                break;
            }
        }

        if let Some(limit) = config.limits.memory {
            match cg.memory_peak() {
                Ok(peak) if peak >= limit => {
                    exceeded = Exceeded::Memory;
                    break;
                }
                Ok(_) => {}
                Err(e) => log::warn!("memory accounting read failed: {}", e),
            }
        }

        // belt and braces for an unreliable SIGCHLD: notice the zombie
        // through /proc and reap once more
        if probe::process_state(pid.as_raw()) == Some('Z') {
            log::info!("child becomes zombie");
            running = false;
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(wait_status) => {
                    if let Some(reaped) = ChildStatus::from_wait(wait_status) {
                        status = reaped;
                    }
                }
                Err(_) => {
                    log::error!("can not reap zombie child");
                    clean_exit(cg, exit_code::REAP);
                }
            }
        }

        if let Some(limit) = config.limits.output {
            cg.update_output_count();
            if cg.output_usage() > limit {
                exceeded = Exceeded::Output;
                break;
            }
        }

        if cg.empty() {
            log::info!("no process remaining");
            running = false;
        }

        if running {
            std::thread::sleep(interval);
        }
    }

    let mut report = RunReport {
        memory_bytes: cg.memory_peak().unwrap_or(0),
        cpu_seconds: cg.cpu_usage().unwrap_or(0.0),
        real_seconds: start.elapsed().as_secs_f64(),
        signaled: status.signaled,
        exit_code: status.exit_code,
        term_signal: status.term_signal,
        exceeded,
    };
    attribute_limits(&mut report, &config.limits);

    let payload = report.render();
    // best effort: the reader may be gone, and SIGPIPE is ignored.
    // close fd 3 right away so the consumer can proceed while we clean up
    unsafe {
        libc::write(3, payload.as_ptr() as *const libc::c_void, payload.len());
        libc::close(3);
    }

    if config.pass_exitcode {
        report.exit_code
    } else {
        0
    }
}

/// Final exceeded-tag attribution and usage clamping. Kernel-delivered
/// limit signals win over sampled values: SIGXCPU means the cpu limit,
/// SIGXFSZ means the output limit. Order matters; a later clause
/// overrides an earlier tag exactly like the sampling loop would have.
fn attribute_limits(report: &mut RunReport, limits: &Limits) {
    if let Some(limit) = limits.memory {
        if report.memory_bytes >= limit {
            report.memory_bytes = limit;
            report.exceeded = Exceeded::Memory;
        }
    }

    let cpu_killed = report.signaled && report.term_signal == libc::SIGXCPU;
    if let Some(limit) = limits.cpu_time {
        if cpu_killed || report.cpu_seconds >= limit {
            report.cpu_seconds = limit;
            report.exceeded = Exceeded::CpuTime;
        }
    } else if cpu_killed {
        report.exceeded = Exceeded::CpuTime;
    }

    if report.signaled && report.term_signal == libc::SIGXFSZ {
        report.exceeded = Exceeded::Output;
    }

    if let Some(limit) = limits.real_time {
        if report.real_seconds >= limit {
            report.real_seconds = limit;
            report.exceeded = Exceeded::RealTime;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_format() {
        let report = RunReport {
            memory_bytes: 1048576,
            cpu_seconds: 0.3004,
            real_seconds: 1.25,
            signaled: true,
            exit_code: 0,
            term_signal: 9,
            exceeded: Exceeded::Memory,
        };
        assert_eq!(
            report.render(),
            "MEMORY   1048576\n\
             CPUTIME  0.300\n\
             REALTIME 1.250\n\
             SIGNALED 1\n\
             EXITCODE 0\n\
             TERMSIG  9\n\
             EXCEED   MEMORY\n"
        );
    }

    #[test]
    fn test_report_none_tag() {
        let report = RunReport::default();
        assert!(report.render().ends_with("EXCEED   none\n"));
    }

    #[test]
    fn test_memory_usage_clamped_to_limit() {
        let mut report = RunReport {
            memory_bytes: 40_000_000,
            ..Default::default()
        };
        let limits = Limits {
            memory: Some(32_000_000),
            ..Default::default()
        };
        attribute_limits(&mut report, &limits);
        assert_eq!(report.memory_bytes, 32_000_000);
        assert_eq!(report.exceeded, Exceeded::Memory);
    }

    #[test]
    fn test_sigxcpu_attributes_cpu_time() {
        let mut report = RunReport {
            signaled: true,
            term_signal: libc::SIGXCPU,
            cpu_seconds: 0.1,
            ..Default::default()
        };
        let limits = Limits {
            cpu_time: Some(0.3),
            ..Default::default()
        };
        attribute_limits(&mut report, &limits);
        assert_eq!(report.exceeded, Exceeded::CpuTime);
        assert_eq!(report.cpu_seconds, 0.3);

        // without a configured limit the tag is still set, usage untouched
        let mut report = RunReport {
            signaled: true,
            term_signal: libc::SIGXCPU,
            cpu_seconds: 0.1,
            ..Default::default()
        };
        attribute_limits(&mut report, &Limits::default());
        assert_eq!(report.exceeded, Exceeded::CpuTime);
        assert_eq!(report.cpu_seconds, 0.1);
    }

    #[test]
    fn test_sigxfsz_attributes_output() {
        let mut report = RunReport {
            signaled: true,
            term_signal: libc::SIGXFSZ,
            ..Default::default()
        };
        attribute_limits(&mut report, &Limits::default());
        assert_eq!(report.exceeded, Exceeded::Output);
    }

    #[test]
    fn test_real_time_clamp_wins_last() {
        let mut report = RunReport {
            real_seconds: 1.0,
            memory_bytes: 100,
            ..Default::default()
        };
        let limits = Limits {
            real_time: Some(0.5),
            memory: Some(50),
            ..Default::default()
        };
        attribute_limits(&mut report, &limits);
        // both exceeded; real time is attributed last
        assert_eq!(report.exceeded, Exceeded::RealTime);
        assert_eq!(report.real_seconds, 0.5);
        assert_eq!(report.memory_bytes, 50);
    }

    #[test]
    fn test_no_limits_leaves_report_untouched() {
        let mut report = RunReport {
            memory_bytes: 123,
            cpu_seconds: 0.5,
            real_seconds: 0.7,
            exit_code: 3,
            ..Default::default()
        };
        let before = report.clone();
        attribute_limits(&mut report, &Limits::default());
        assert_eq!(report, before);
    }
}
