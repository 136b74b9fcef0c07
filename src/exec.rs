//! Shell command execution capability
//!
//! The command string is handed to `sh -c` untouched. There is no allow-list,
//! no quoting and no timeout.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch shell: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("command '{command}' failed: {status}")]
    NonZeroExit { command: String, status: ExitStatus },
}

/// Runs a string as a shell command and returns captured stdout
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<Vec<u8>, ExecError>;
}

/// Launches `/bin/sh -c <command>` on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(&self, command: &str) -> Result<Vec<u8>, ExecError> {
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExecError::NonZeroExit {
                command: command.to_string(),
                status: output.status,
            });
        }
        Ok(output.stdout)
    }
}
