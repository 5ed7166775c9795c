//! The single command iam-init supervises.

use std::fmt;
use std::process::Stdio;

use crate::error::{InitError, InitResult};

/// Program and arguments split out of a command string.
///
/// Splitting is on whitespace only: no shell expansion, no quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedCommand {
    program: String,
    args: Vec<String>,
}

impl SupervisedCommand {
    pub fn parse(command: &str) -> InitResult<Self> {
        let mut fields = command.split_whitespace().map(String::from);
        let program = fields.next().ok_or(InitError::EmptyCommand)?;
        Ok(Self {
            program,
            args: fields.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build the tokio command: stdin from `/dev/null`, stdout/stderr shared
    /// with this process, and a fresh process group whose id is the child pid.
    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);
        cmd
    }
}

impl fmt::Display for SupervisedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
