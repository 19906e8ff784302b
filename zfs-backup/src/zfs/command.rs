//! External command execution.
//!
//! A command's exit status is the only success signal. Mutating commands
//! honour simulate mode (echoed, never run); read-only probes always run.

use crate::utils::errors::CommandError;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Spawns external commands and waits for them
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner {
    /// Echo mutating commands instead of running them
    pub simulate: bool,

    /// Log every command before it runs
    pub echo: bool,
}

impl CommandRunner {
    pub fn new(simulate: bool, echo: bool) -> Self {
        Self { simulate, echo }
    }

    /// Render a command line for logs and error messages
    pub fn render(program: &str, args: &[String]) -> String {
        if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        }
    }

    /// Announce a mutating command. Returns `false` when simulating,
    /// in which case the caller must not run it.
    pub fn announce(&self, command: &str) -> bool {
        if self.simulate {
            warn!("SIM: {}", command);
            return false;
        }
        if self.echo {
            info!("RUN: {}", command);
        }
        true
    }

    /// Run a mutating command, streaming its stdout to the debug log.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<(), CommandError> {
        let command = Self::render(program, args);
        if !self.announce(&command) {
            return Ok(());
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => debug!("{}", line.trim_end()),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Lost output of `{}`: {}", command, e);
                        break;
                    }
                }
            }
        }

        wait(child, &command).await
    }

    /// Run a read-only command and report only whether it succeeded.
    pub async fn probe(&self, program: &str, args: &[String]) -> Result<(), CommandError> {
        let command = Self::render(program, args);
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Status { command, status })
        }
    }

    /// Run a read-only command and return stdout followed by stderr.
    pub async fn capture(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
        let command = Self::render(program, args);
        if self.echo || self.simulate {
            info!("RUN: {}", command);
        }

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Status {
                command,
                status: output.status,
            });
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Spawn a command whose stdin or stdout is wired up by the caller.
    pub fn spawn(
        &self,
        program: &str,
        args: &[String],
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Child, CommandError> {
        Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: Self::render(program, args),
                source,
            })
    }
}

/// Wait for a child and turn a non-zero exit into an error
pub async fn wait(mut child: Child, command: &str) -> Result<(), CommandError> {
    let status = child.wait().await.map_err(|e| CommandError::Other {
        command: command.to_string(),
        reason: e.to_string(),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Status {
            command: command.to_string(),
            status,
        })
    }
}
