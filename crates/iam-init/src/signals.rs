//! Signal relay to the supervised process group.
//!
//! Every catchable signal is registered with tokio and pushed onto one
//! bounded queue. A single consumer drains the queue and `killpg`s the child's
//! group. Producers wait for queue capacity instead of dropping, so a signal
//! received before the child exists is still delivered once forwarding starts.
//!
//! Once the child is gone the relayed signals go back to their default
//! disposition. tokio installs its OS handler only once per process, so the
//! handler swapped out there is parked and put back by the next
//! [`SignalForwarder::register`]. Without that, a second launch in the same
//! process would listen on streams that never fire.

use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, killpg, sigaction};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal as listen};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 64;

/// Handlers displaced by [`ActiveForwarder::restore_defaults`].
static PARKED: Mutex<Vec<(Signal, SigAction)>> = Mutex::new(Vec::new());

fn parked() -> MutexGuard<'static, Vec<(Signal, SigAction)>> {
    PARKED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Put back the handler parked for `sig`, if any.
fn reinstate(sig: Signal) {
    let mut parked = parked();
    let Some(pos) = parked.iter().position(|(s, _)| *s == sig) else {
        return;
    };
    let (_, action) = parked.swap_remove(pos);
    // SAFETY: `action` is the handler this process had installed for `sig`
    // before it was swapped out.
    if let Err(e) = unsafe { sigaction(sig, &action) } {
        warn!(signal = %sig, error = %e, "failed to reinstate signal handler");
    }
}

/// Signals that are relayed to the child rather than handled here.
///
/// Excludes what cannot be caught (SIGKILL, SIGSTOP) and the synchronous
/// fault signals, which describe this process's own state.
pub fn relayed_signals() -> impl Iterator<Item = Signal> {
    Signal::iterator().filter(|sig| {
        !matches!(
            sig,
            Signal::SIGKILL
                | Signal::SIGSTOP
                | Signal::SIGSEGV
                | Signal::SIGBUS
                | Signal::SIGILL
                | Signal::SIGFPE
                | Signal::SIGTRAP
                | Signal::SIGSYS
        )
    })
}

/// SIGCHLD only tells us a child changed state; it means nothing to the child.
pub fn is_forwardable(sig: Signal) -> bool {
    sig != Signal::SIGCHLD
}

/// Registered signal queue. Created before the child is spawned.
pub struct SignalForwarder {
    registered: Vec<Signal>,
    producers: Vec<JoinHandle<()>>,
    rx: mpsc::Receiver<Signal>,
}

impl SignalForwarder {
    /// Register for all relayed signals. Must be called inside a tokio runtime.
    pub fn register() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut registered = Vec::new();
        let mut producers = Vec::new();

        for sig in relayed_signals() {
            let mut stream = match listen(SignalKind::from_raw(sig as i32)) {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(signal = %sig, error = %e, "signal not registered");
                    continue;
                }
            };
            reinstate(sig);
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(sig).await.is_err() {
                        break;
                    }
                }
            }));
            registered.push(sig);
        }

        debug!(count = registered.len(), "signal handlers registered");
        Self {
            registered,
            producers,
            rx,
        }
    }

    /// Start relaying queued signals to process group `pgid`.
    pub fn start(self, pgid: Pid) -> ActiveForwarder {
        let mut rx = self.rx;
        let consumer = tokio::spawn(async move {
            while let Some(sig) = rx.recv().await {
                if !is_forwardable(sig) {
                    continue;
                }
                debug!(signal = %sig, pgid = pgid.as_raw(), "forwarding signal");
                if let Err(e) = killpg(pgid, sig) {
                    debug!(signal = %sig, pgid = pgid.as_raw(), error = %e, "forward failed");
                }
            }
        });
        ActiveForwarder {
            registered: self.registered,
            producers: self.producers,
            consumer: Some(consumer),
        }
    }

    /// Tear down without ever forwarding (the child failed to start).
    pub fn abandon(self) {
        ActiveForwarder {
            registered: self.registered,
            producers: self.producers,
            consumer: None,
        }
        .restore_defaults();
    }
}

/// Forwarding in progress.
pub struct ActiveForwarder {
    registered: Vec<Signal>,
    producers: Vec<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl ActiveForwarder {
    /// Close the queue and wait for the consumer to finish what was queued.
    pub async fn stop(mut self) {
        for producer in &self.producers {
            producer.abort();
        }
        for producer in self.producers.drain(..) {
            let _ = producer.await;
        }
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
        self.restore_defaults();
    }

    fn restore_defaults(self) {
        for producer in &self.producers {
            producer.abort();
        }
        let mut parked = parked();
        for sig in self.registered {
            if sig == Signal::SIGCHLD {
                continue;
            }
            // The Rust runtime starts with SIGPIPE ignored.
            let handler = if sig == Signal::SIGPIPE {
                SigHandler::SigIgn
            } else {
                SigHandler::SigDfl
            };
            let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
            // SAFETY: installing SIG_DFL/SIG_IGN runs no user code in the handler.
            match unsafe { sigaction(sig, &action) } {
                Ok(previous) => {
                    if matches!(
                        previous.handler(),
                        SigHandler::Handler(_) | SigHandler::SigAction(_)
                    ) {
                        parked.retain(|(s, _)| *s != sig);
                        parked.push((sig, previous));
                    }
                }
                Err(e) => warn!(signal = %sig, error = %e, "failed to restore signal disposition"),
            }
        }
    }
}
