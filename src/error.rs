//! Crate-wide error type and the supervisor's exit-code map.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LrunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("seccomp error: {0}")]
    Seccomp(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("child setup failed during {stage}: {message}")]
    Spawn { stage: u8, message: String },
}

impl From<nix::errno::Errno> for LrunError {
    fn from(err: nix::errno::Errno) -> Self {
        LrunError::Process(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LrunError>;

/// Exit codes of the supervisor process itself. The child's exit code is
/// only surfaced when `--pass-exitcode true` is given.
pub mod exit_code {
    /// Bad arguments or invalid configuration; nothing was started.
    pub const BAD_CONFIG: i32 = 1;
    /// Device whitelist could not be installed.
    pub const DEVICE_SETUP: i32 = 1;
    /// Memory limit could not be applied to the control group.
    pub const MEMORY_SETUP: i32 = 2;
    /// Killall/usage-reset failed, or a fatal signal forced cleanup.
    pub const RESET_OR_SIGNAL: i32 = 4;
    /// FD_CLOEXEC could not be set on the status channel (fd 3).
    pub const STATUS_FD: i32 = 5;
    /// The zombie child could not be reaped.
    pub const REAP: i32 = 6;
    /// A `--cgroup-option` write was rejected by the kernel.
    pub const CGROUP_OPTION: i32 = 7;
    /// Base for child spawn failures; the child's setup-stage tag is added.
    pub const SPAWN_BASE: i32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_converts_to_process_error() {
        let err: LrunError = nix::errno::Errno::EPERM.into();
        assert!(matches!(err, LrunError::Process(_)));
    }

    #[test]
    fn test_spawn_error_names_its_stage() {
        let err = LrunError::Spawn {
            stage: 12,
            message: "child failed while executing the command".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("12"));
        assert!(text.contains("executing the command"));
    }
}
