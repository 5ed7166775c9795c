//! Top-level sequencing: reaper up, credential gate, supervised command,
//! reaper down.
//!
//! The reaper is always cancelled and joined before a code is returned, on
//! every path, so the caller can `exit` as soon as `run` comes back.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ExitCodeMode, InitConfig};
use crate::credentials::{self, CredentialSource, MetadataClient};
use crate::reaper::{ProtectedPid, ZombieReaper};
use crate::supervisor::{self, ExitOutcome};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Run the full lifecycle against the HTTP metadata service in `config`.
/// Returns the exit code for this process.
pub async fn run(config: InitConfig) -> i32 {
    let shutdown = CancellationToken::new();
    let protected = ProtectedPid::default();
    let reaper = spawn_reaper(&config, &shutdown, &protected);

    let exit_code = match MetadataClient::new(&config.credentials) {
        Ok(source) => gate_and_supervise(&config, &source, &protected).await,
        Err(e) => {
            error!(error = %e, "metadata client setup failed");
            EXIT_FAILURE
        }
    };

    stop_reaper(shutdown, reaper).await;
    exit_code
}

/// Same as [`run`] with a caller-supplied credential source.
pub async fn run_with(config: InitConfig, source: &dyn CredentialSource) -> i32 {
    let shutdown = CancellationToken::new();
    let protected = ProtectedPid::default();
    let reaper = spawn_reaper(&config, &shutdown, &protected);

    let exit_code = gate_and_supervise(&config, source, &protected).await;

    stop_reaper(shutdown, reaper).await;
    exit_code
}

fn spawn_reaper(
    config: &InitConfig,
    shutdown: &CancellationToken,
    protected: &ProtectedPid,
) -> JoinHandle<usize> {
    let reaper = ZombieReaper::new(config.reap_interval, protected.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { reaper.run(shutdown).await }
    })
}

async fn stop_reaper(shutdown: CancellationToken, reaper: JoinHandle<usize>) {
    shutdown.cancel();
    match reaper.await {
        Ok(reaped) => info!(reaped, "zombie reaper stopped"),
        Err(e) => warn!(error = %e, "zombie reaper task failed"),
    }
}

async fn gate_and_supervise(
    config: &InitConfig,
    source: &dyn CredentialSource,
    protected: &ProtectedPid,
) -> i32 {
    if let Err(e) = credentials::await_credentials(source, &config.credentials).await {
        error!(error = %e, "failed getting credentials, exiting");
        return EXIT_FAILURE;
    }

    info!(command = %config.command, "command launched");
    match supervisor::launch(&config.command, protected).await {
        Ok(outcome) => {
            let code = exit_code_for(&outcome, config.exit_code_mode);
            if outcome.success() {
                info!("command exited");
            } else {
                error!(status = %outcome.status(), exit_code = code, "command failed");
            }
            code
        }
        Err(e) => {
            error!(error = %e, "command failed");
            EXIT_FAILURE
        }
    }
}

/// Map the child's outcome to this process's exit code.
pub fn exit_code_for(outcome: &ExitOutcome, mode: ExitCodeMode) -> i32 {
    if outcome.success() {
        return EXIT_SUCCESS;
    }
    match mode {
        ExitCodeMode::Collapse => EXIT_FAILURE,
        ExitCodeMode::Propagate => outcome.code(),
    }
}
