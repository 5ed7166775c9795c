//! Zombie reaping.
//!
//! As PID 1, every orphan in the container is reparented to us and stays a
//! zombie until we collect it. The reaper polls instead of blocking in
//! `wait(2)` so it can notice cancellation within one poll interval.
//!
//! The supervised child is never collected here: its pid sits in
//! [`ProtectedPid`] while it runs, and the supervisor's own wait is the only
//! one allowed to reap it. Reaping it here would make that wait fail with
//! `ECHILD`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{Id, WaitPidFlag, waitid, waitpid};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Pid of the supervised child, shared between supervisor and reaper.
///
/// The lock is held across spawn-and-record on one side and across a single
/// peek-and-reap on the other, so the reaper can never observe the child
/// before its pid is recorded.
#[derive(Clone, Default)]
pub struct ProtectedPid(Arc<Mutex<Option<Pid>>>);

impl ProtectedPid {
    pub fn lock(&self) -> MutexGuard<'_, Option<Pid>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<Pid> {
        *self.lock()
    }
}

pub struct ZombieReaper {
    interval: Duration,
    protected: ProtectedPid,
}

impl ZombieReaper {
    pub fn new(interval: Duration, protected: ProtectedPid) -> Self {
        Self {
            interval,
            protected,
        }
    }

    /// Reap until `shutdown` is cancelled. Returns the number of processes reaped.
    ///
    /// Run this with `tokio::spawn` and await the handle after cancelling:
    /// the join is the acknowledgement that no reap is in flight.
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        let mut total = 0;
        loop {
            total += reap_available(&self.protected);

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }

            if shutdown.is_cancelled() {
                total += reap_available(&self.protected);
                debug!(reaped = total, "zombie reaper stopping");
                return total;
            }
        }
    }
}

/// Reap every exited child that is ready right now, except the protected one.
///
/// Never blocks. Returns the number of processes reaped.
pub fn reap_available(protected: &ProtectedPid) -> usize {
    let mut reaped = 0;
    loop {
        let slot = protected.lock();

        // Peek without consuming so the protected child stays waitable.
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        let pid = match waitid(Id::All, flags) {
            Ok(status) => match status.pid() {
                Some(pid) => pid,
                None => break,
            },
            Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "waitid failed");
                break;
            }
        };

        if *slot == Some(pid) {
            break;
        }

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                debug!(pid = pid.as_raw(), ?status, "reaped zombie");
                reaped += 1;
            }
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                break;
            }
        }
    }
    reaped
}
