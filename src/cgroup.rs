//! Control group (cgroup v1) management.
//!
//! One `Cgroup` owns the group's whole lifecycle across the cpu, cpuacct,
//! memory, devices and freezer subsystems: creation, limit configuration,
//! accounting reads, task enumeration, freezer-assisted kill and removal.
//! The supervisor is the only writer of control files; the child tree only
//! ever appears in the `tasks` files.

use crate::config::SpawnArg;
use crate::error::{LrunError, Result};
use crate::probe;
use nix::mount::{mount, MsFlags};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CGROUP_BASE: &str = "/sys/fs/cgroup";

/// Rounds of FREEZE / SIGKILL / THAW before killall gives up.
const KILLALL_ATTEMPTS: u32 = 500;

/// Polls of `freezer.state` while waiting for FROZEN.
const FREEZE_POLLS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsys {
    Cpu,
    Cpuacct,
    Memory,
    Devices,
    Freezer,
}

impl Subsys {
    pub const ALL: [Subsys; 5] = [
        Subsys::Cpu,
        Subsys::Cpuacct,
        Subsys::Memory,
        Subsys::Devices,
        Subsys::Freezer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subsys::Cpu => "cpu",
            Subsys::Cpuacct => "cpuacct",
            Subsys::Memory => "memory",
            Subsys::Devices => "devices",
            Subsys::Freezer => "freezer",
        }
    }

    pub fn from_name(name: &str) -> Option<Subsys> {
        Subsys::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Who is responsible for removing the group directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created by this supervisor; destroyed on every exit path.
    Owned,
    /// Named by the user via `--cgname`; only emptied, never removed.
    Borrowed,
}

/// Device whitelist entries installed by `limit_devices` after the
/// initial deny-all: null, zero, full, random, urandom, tty, ptmx, pts.
const DEVICE_WHITELIST: [&str; 8] = [
    "c 1:3 rwm",
    "c 1:5 rwm",
    "c 1:7 rwm",
    "c 1:8 rwm",
    "c 1:9 rwm",
    "c 5:0 rwm",
    "c 5:2 rwm",
    "c 136:* rwm",
];

pub struct Cgroup {
    name: String,
    ownership: Ownership,
    /// Last observed `/proc/<pid>/io` write_bytes per task. Entries for
    /// exited tasks are retained so their output still counts.
    output: HashMap<libc::pid_t, u64>,
}

impl Cgroup {
    /// Create (or reuse) the named group in every required subsystem,
    /// mounting missing hierarchies on the way.
    pub fn create(name: &str, ownership: Ownership) -> Result<Cgroup> {
        if name.is_empty() || name.len() > 255 || name.contains('/') || name.contains("..") {
            return Err(LrunError::Cgroup(format!("invalid cgroup name '{}'", name)));
        }

        for subsys in Subsys::ALL {
            Self::ensure_hierarchy(subsys)?;
            let dir = Path::new(CGROUP_BASE).join(subsys.name()).join(name);
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(LrunError::Cgroup(format!(
                        "can not create {} in subsystem {}: {}",
                        dir.display(),
                        subsys.name(),
                        e
                    )));
                }
            }
        }

        log::info!("cgroup '{}' ready in all subsystems", name);
        Ok(Cgroup {
            name: name.to_string(),
            ownership,
            output: HashMap::new(),
        })
    }

    fn ensure_hierarchy(subsys: Subsys) -> Result<()> {
        let root = Path::new(CGROUP_BASE).join(subsys.name());
        if root.join("tasks").exists() {
            return Ok(());
        }

        fs::create_dir_all(&root).map_err(|e| {
            LrunError::Cgroup(format!("can not create {}: {}", root.display(), e))
        })?;
        mount(
            Some("cgroup"),
            &root,
            Some("cgroup"),
            MsFlags::empty(),
            Some(subsys.name()),
        )
        .map_err(|e| {
            LrunError::Cgroup(format!(
                "cgroup hierarchy for '{}' is not mounted and mounting failed: {}",
                subsys.name(),
                e
            ))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// The group directory in one subsystem; the cpu directory doubles as
    /// the lock target for supervisors sharing a name.
    pub fn subsys_path(&self, subsys: Subsys) -> PathBuf {
        Path::new(CGROUP_BASE).join(subsys.name()).join(&self.name)
    }

    fn control_path(&self, subsys: Subsys, key: &str) -> PathBuf {
        self.subsys_path(subsys).join(key)
    }

    /// Write a control file. Callers decide whether a failure is fatal.
    pub fn set(&self, subsys: Subsys, key: &str, value: &str) -> Result<()> {
        let path = self.control_path(subsys, key);
        fs::write(&path, value).map_err(|e| {
            LrunError::Cgroup(format!("can not write {} = '{}': {}", path.display(), value.trim(), e))
        })
    }

    fn read_value(&self, subsys: Subsys, key: &str) -> Result<String> {
        let path = self.control_path(subsys, key);
        fs::read_to_string(&path)
            .map_err(|e| LrunError::Cgroup(format!("can not read {}: {}", path.display(), e)))
    }

    fn read_u64(&self, subsys: Subsys, key: &str) -> Result<u64> {
        let raw = self.read_value(subsys, key)?;
        raw.trim().parse().map_err(|e| {
            LrunError::Cgroup(format!("can not parse {} value '{}': {}", key, raw.trim(), e))
        })
    }

    /// Deny all devices, then allow only the basic whitelist.
    pub fn limit_devices(&self) -> Result<()> {
        self.set(Subsys::Devices, "devices.deny", "a")?;
        for entry in DEVICE_WHITELIST {
            self.set(Subsys::Devices, "devices.allow", entry)?;
        }
        Ok(())
    }

    /// Limit memory (and memory+swap where accounted), pin swappiness to
    /// zero and keep the OOM killer enabled so a runaway child dies
    /// instead of freezing the group.
    pub fn set_memory_limit(&self, bytes: u64) -> Result<()> {
        let value = bytes.to_string();
        self.set(Subsys::Memory, "memory.limit_in_bytes", &value)?;

        if self
            .control_path(Subsys::Memory, "memory.memsw.limit_in_bytes")
            .exists()
        {
            self.set(Subsys::Memory, "memory.memsw.limit_in_bytes", &value)?;
        }

        if let Err(e) = self.set(Subsys::Memory, "memory.swappiness", "0") {
            log::warn!("{}", e);
        }
        if let Err(e) = self.set(Subsys::Memory, "memory.oom_control", "0") {
            log::warn!("{}", e);
        }
        Ok(())
    }

    /// Zero the cpu and peak-memory counters; required when reusing a
    /// borrowed group.
    pub fn reset_usages(&self) -> Result<()> {
        self.set(Subsys::Cpuacct, "cpuacct.usage", "0")?;
        self.set(Subsys::Memory, "memory.max_usage_in_bytes", "0")?;
        Ok(())
    }

    /// Accumulated cpu time in seconds, at nanosecond precision.
    pub fn cpu_usage(&self) -> Result<f64> {
        Ok(self.read_u64(Subsys::Cpuacct, "cpuacct.usage")? as f64 / 1e9)
    }

    pub fn memory_current(&self) -> Result<u64> {
        self.read_u64(Subsys::Memory, "memory.usage_in_bytes")
    }

    pub fn memory_peak(&self) -> Result<u64> {
        self.read_u64(Subsys::Memory, "memory.max_usage_in_bytes")
    }

    fn tasks(&self, subsys: Subsys) -> Vec<libc::pid_t> {
        let path = self.control_path(subsys, "tasks");
        match fs::read_to_string(&path) {
            Ok(content) => content.lines().filter_map(|l| l.trim().parse().ok()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn all_tasks(&self) -> HashSet<libc::pid_t> {
        let mut tasks = HashSet::new();
        for subsys in Subsys::ALL {
            tasks.extend(self.tasks(subsys));
        }
        tasks
    }

    /// True iff no task remains in any subsystem of the group.
    pub fn empty(&self) -> bool {
        self.all_tasks().is_empty()
    }

    /// Put a pid into the group in every subsystem.
    pub fn attach_task(&self, pid: Pid) -> Result<()> {
        let value = pid.as_raw().to_string();
        for subsys in Subsys::ALL {
            self.set(subsys, "tasks", &value).map_err(|e| {
                LrunError::Cgroup(format!(
                    "can not attach pid {} to subsystem {}: {}",
                    pid,
                    subsys.name(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Refresh the per-task output counters from `/proc/<pid>/io`.
    pub fn update_output_count(&mut self) {
        for pid in self.all_tasks() {
            if let Some(bytes) = probe::io_write_bytes(pid) {
                self.output.insert(pid, bytes);
            }
        }
    }

    /// Bytes written by all tasks observed so far. Best effort: a task
    /// that exits between two samples keeps its last observed value.
    pub fn output_usage(&self) -> u64 {
        self.output.values().sum()
    }

    fn freeze(&self) {
        if self.set(Subsys::Freezer, "freezer.state", "FROZEN").is_err() {
            return;
        }
        for _ in 0..FREEZE_POLLS {
            match self.read_value(Subsys::Freezer, "freezer.state") {
                Ok(state) if state.trim() == "FROZEN" => return,
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
                Err(_) => return,
            }
        }
        log::warn!("cgroup '{}' did not reach FROZEN state", self.name);
    }

    fn thaw(&self) {
        let _ = self.set(Subsys::Freezer, "freezer.state", "THAWED");
    }

    /// SIGKILL every task until the group is empty. The freezer stops the
    /// tree first so a fork bomb can not outrun the kill loop.
    pub fn killall(&self) -> Result<()> {
        for attempt in 0..KILLALL_ATTEMPTS {
            let tasks = self.all_tasks();
            if tasks.is_empty() {
                return Ok(());
            }
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(2));
            }

            self.freeze();
            for pid in self.all_tasks() {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
            self.thaw();
        }

        Err(LrunError::Cgroup(format!(
            "tasks still remain in cgroup '{}' after {} kill rounds",
            self.name, KILLALL_ATTEMPTS
        )))
    }

    /// Kill every task and remove the group directory in every subsystem.
    /// Idempotent: destroying an already-destroyed group succeeds.
    pub fn destroy(&self) -> Result<()> {
        self.killall()?;

        let mut failures = Vec::new();
        for subsys in Subsys::ALL {
            let dir = self.subsys_path(subsys);
            let mut attempt = 0;
            loop {
                match fs::remove_dir(&dir) {
                    Ok(()) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                    // rmdir of a freshly emptied group can report EBUSY for
                    // a few ticks while the kernel finishes releasing it
                    Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempt < 50 => {
                        attempt += 1;
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => {
                        failures.push(format!("{}: {}", subsys.name(), e));
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LrunError::Cgroup(format!(
                "can not remove cgroup '{}': {:?}",
                self.name, failures
            )))
        }
    }

    /// Clone the child, attach it to every subsystem, then let it run its
    /// setup pipeline. The handoff lives here so no task can escape the
    /// group between clone and exec.
    pub fn spawn(&self, arg: &SpawnArg) -> Result<Pid> {
        crate::launcher::spawn(self, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsys_names_round_trip() {
        for subsys in Subsys::ALL {
            assert_eq!(Subsys::from_name(subsys.name()), Some(subsys));
        }
        assert_eq!(Subsys::from_name("pids"), None);
    }

    #[test]
    fn test_invalid_names_rejected_before_any_fs_access() {
        assert!(Cgroup::create("", Ownership::Owned).is_err());
        assert!(Cgroup::create("a/b", Ownership::Owned).is_err());
        assert!(Cgroup::create("..", Ownership::Owned).is_err());
        let long = "x".repeat(256);
        assert!(Cgroup::create(&long, Ownership::Owned).is_err());
    }

    #[test]
    fn test_paths_are_per_subsystem() {
        let cg = Cgroup {
            name: "lrun-test".to_string(),
            ownership: Ownership::Owned,
            output: HashMap::new(),
        };
        assert_eq!(
            cg.subsys_path(Subsys::Memory),
            PathBuf::from("/sys/fs/cgroup/memory/lrun-test")
        );
        assert_eq!(
            cg.control_path(Subsys::Cpuacct, "cpuacct.usage"),
            PathBuf::from("/sys/fs/cgroup/cpuacct/lrun-test/cpuacct.usage")
        );
    }

    #[test]
    fn test_output_accumulates_last_observations() {
        let mut cg = Cgroup {
            name: "lrun-test".to_string(),
            ownership: Ownership::Borrowed,
            output: HashMap::new(),
        };
        cg.output.insert(100, 4096);
        cg.output.insert(101, 512);
        // A later, larger observation replaces; an exited task keeps its
        // last value.
        cg.output.insert(100, 8192);
        assert_eq!(cg.output_usage(), 8192 + 512);
    }
}
