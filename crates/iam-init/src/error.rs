//! Error types for the init lifecycle and single credential probes.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no command defined")]
    EmptyCommand,

    #[error("config error: {0}")]
    Config(String),

    #[error("http client: {0}")]
    HttpClient(String),

    #[error("failed getting credentials after {attempts} attempts")]
    CredentialsExhausted { attempts: u32 },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

pub type InitResult<T> = Result<T, InitError>;

/// Why a single metadata probe did not count as success.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),
}
