//! Command-line arguments and the validated configuration they resolve to.

use std::time::Duration;

use clap::Parser;

use crate::command::SupervisedCommand;
use crate::credentials::{self, CredentialPolicy};
use crate::error::{InitError, InitResult};
use crate::reaper;

/// What the process exits with once the child is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCodeMode {
    /// 0 on clean exit, 1 on anything else.
    #[default]
    Collapse,
    /// The child's own exit code (128 + signal when killed).
    Propagate,
}

#[derive(Parser, Debug)]
#[command(
    name = "iam-init",
    version,
    about = "Init process that waits for IAM credentials, then runs and supervises one command"
)]
pub struct Args {
    /// Command to run (split on whitespace, no shell quoting)
    #[arg(short = 'c', long = "command", env = "IAM_INIT_COMMAND")]
    pub command: Option<String>,

    /// Metadata endpoint polled for credentials
    #[arg(long, env = "IAM_INIT_METADATA_URL", default_value = credentials::DEFAULT_CREDENTIALS_URL)]
    pub metadata_url: String,

    /// Credential probes before giving up
    #[arg(long, env = "IAM_INIT_MAX_ATTEMPTS", default_value_t = credentials::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Timeout of a single credential probe, in milliseconds
    #[arg(long, env = "IAM_INIT_ATTEMPT_TIMEOUT_MS", default_value_t = millis(credentials::DEFAULT_ATTEMPT_TIMEOUT))]
    pub attempt_timeout_ms: u64,

    /// Delay after a failed credential probe, in milliseconds
    #[arg(long, env = "IAM_INIT_RETRY_DELAY_MS", default_value_t = millis(credentials::DEFAULT_RETRY_DELAY))]
    pub retry_delay_ms: u64,

    /// Idle interval between zombie reaping passes, in milliseconds
    #[arg(long, env = "IAM_INIT_REAP_INTERVAL_MS", default_value_t = millis(reaper::DEFAULT_REAP_INTERVAL))]
    pub reap_interval_ms: u64,

    /// Exit with the command's own exit code instead of 0/1
    #[arg(long, env = "IAM_INIT_PROPAGATE_EXIT_CODE")]
    pub propagate_exit_code: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "IAM_INIT_LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Resolved configuration for one lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    pub command: SupervisedCommand,
    pub credentials: CredentialPolicy,
    pub reap_interval: Duration,
    pub exit_code_mode: ExitCodeMode,
}

impl InitConfig {
    /// Config with the production defaults for `command`.
    pub fn new(command: SupervisedCommand) -> Self {
        Self {
            command,
            credentials: CredentialPolicy::default(),
            reap_interval: reaper::DEFAULT_REAP_INTERVAL,
            exit_code_mode: ExitCodeMode::default(),
        }
    }
}

impl Args {
    pub fn into_config(self) -> InitResult<InitConfig> {
        // Missing and blank are the same failure: nothing to supervise.
        let command = SupervisedCommand::parse(self.command.as_deref().unwrap_or_default())?;

        if self.max_attempts == 0 {
            return Err(InitError::Config("--max-attempts must be at least 1".into()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(InitError::Config(
                "--attempt-timeout-ms must be greater than 0".into(),
            ));
        }
        if self.reap_interval_ms == 0 {
            return Err(InitError::Config(
                "--reap-interval-ms must be greater than 0".into(),
            ));
        }

        Ok(InitConfig {
            command,
            credentials: CredentialPolicy {
                url: self.metadata_url,
                max_attempts: self.max_attempts,
                attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            reap_interval: Duration::from_millis(self.reap_interval_ms),
            exit_code_mode: if self.propagate_exit_code {
                ExitCodeMode::Propagate
            } else {
                ExitCodeMode::Collapse
            },
        })
    }
}
