//! iam-init — a minimal PID 1 for containers that need IAM credentials.
//!
//! Waits for the instance-metadata service to serve credentials, then runs a
//! single command in its own process group. While it runs, every received
//! signal except SIGCHLD is relayed to that group and orphaned processes are
//! reaped in the background.
//!
//! Lifecycle:
//! 1. Start the zombie reaper
//! 2. Poll the metadata service until it answers 200 (bounded retries)
//! 3. Launch the command and relay signals until it exits
//! 4. Cancel and join the reaper, exit with the mapped code

pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod reaper;
pub mod signals;
pub mod supervisor;
