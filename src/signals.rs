//! Signal disposition for the supervisor.
//!
//! The handler only stores the signal number in an atomic; the main loop
//! notices the flag at the top of its next iteration and runs the normal
//! cleanup path. No allocation, locks or I/O ever happen in the handler.

use crate::error::{LrunError, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

static SIGNAL_TRIGGERED: AtomicI32 = AtomicI32::new(0);

extern "C" fn flag_signal(signal: libc::c_int) {
    SIGNAL_TRIGGERED.store(signal, Ordering::SeqCst);
}

const FATAL_SIGNALS: [Signal; 8] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGABRT,
    Signal::SIGQUIT,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGTRAP,
];

pub fn install() -> Result<()> {
    // a consumer of the status channel may close its end early; the
    // supervisor must survive the SIGPIPE and keep cleaning up
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for signal in [Signal::SIGPIPE, Signal::SIGALRM] {
        unsafe { sigaction(signal, &ignore) }
            .map_err(|e| LrunError::Process(format!("can not ignore {}: {}", signal, e)))?;
    }

    let flag = SigAction::new(
        SigHandler::Handler(flag_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        unsafe { sigaction(signal, &flag) }
            .map_err(|e| LrunError::Process(format!("can not handle {}: {}", signal, e)))?;
    }

    Ok(())
}

/// The last fatal signal delivered, if any.
pub fn triggered() -> Option<i32> {
    match SIGNAL_TRIGGERED.load(Ordering::SeqCst) {
        0 => None,
        signal => Some(signal),
    }
}

#[cfg(test)]
pub fn reset() {
    SIGNAL_TRIGGERED.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_flag() {
        install().unwrap();
        reset();
        assert_eq!(triggered(), None);

        // deliver a real signal; the handler stores it for the main loop
        unsafe { libc::raise(libc::SIGHUP) };
        assert_eq!(triggered(), Some(libc::SIGHUP));
        reset();
    }
}
