//! Launch the supervised command and own it until it exits.

use std::process::ExitStatus;

use nix::unistd::Pid;
use tracing::info;

use crate::command::SupervisedCommand;
use crate::error::{InitError, InitResult};
use crate::reaper::ProtectedPid;
use crate::signals::SignalForwarder;

/// How the supervised command terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    status: ExitStatus,
}

impl ExitOutcome {
    pub fn new(status: ExitStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, mapping death-by-signal to 128 + signal number.
    pub fn code(&self) -> i32 {
        use std::os::unix::process::ExitStatusExt;
        self.status
            .code()
            .unwrap_or_else(|| self.status.signal().map(|sig| 128 + sig).unwrap_or(1))
    }
}

/// Start `cmd` in its own process group, relay signals to that group, and
/// wait for it to exit.
///
/// Signals are registered before the spawn so none received in between are
/// lost. A spawn failure returns immediately; a non-zero exit is not an error
/// here and comes back as an [`ExitOutcome`].
pub async fn launch(cmd: &SupervisedCommand, protected: &ProtectedPid) -> InitResult<ExitOutcome> {
    let forwarder = SignalForwarder::register();

    let spawned = {
        let mut slot = protected.lock();
        let spawned = cmd.to_command().spawn();
        if let Ok(child) = &spawned {
            *slot = child
                .id()
                .and_then(|id| i32::try_from(id).ok())
                .map(Pid::from_raw);
        }
        spawned
    };

    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => {
            forwarder.abandon();
            return Err(InitError::Spawn {
                program: cmd.program().to_string(),
                source,
            });
        }
    };

    let forwarding = match protected.get() {
        Some(pgid) => {
            info!(pid = pgid.as_raw(), "command started");
            Some(forwarder.start(pgid))
        }
        None => {
            forwarder.abandon();
            None
        }
    };

    let result = child.wait().await;

    *protected.lock() = None;
    if let Some(forwarding) = forwarding {
        forwarding.stop().await;
    }

    let status = result.map_err(|source| InitError::Wait {
        program: cmd.program().to_string(),
        source,
    })?;
    Ok(ExitOutcome::new(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn exit_code_passes_through() {
        assert_eq!(ExitOutcome::new(ExitStatus::from_raw(0)).code(), 0);
        assert_eq!(ExitOutcome::new(ExitStatus::from_raw(3 << 8)).code(), 3);
        assert!(ExitOutcome::new(ExitStatus::from_raw(0)).success());
        assert!(!ExitOutcome::new(ExitStatus::from_raw(3 << 8)).success());
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        // Raw wait status for "killed by SIGTERM" is the bare signal number.
        let sigterm = nix::sys::signal::Signal::SIGTERM as i32;
        let outcome = ExitOutcome::new(ExitStatus::from_raw(sigterm));
        assert!(!outcome.success());
        assert_eq!(outcome.code(), 128 + 15);
    }
}
