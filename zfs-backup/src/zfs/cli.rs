//! Snapshot engine backed by the `zfs` command line tool.

use crate::transfer::pipeline::{StreamConsumer, StreamProducer};
use crate::utils::errors::CommandError;
use crate::zfs::command::{self, CommandRunner};
use crate::zfs::{ReceiveOptions, SnapshotEngine, SnapshotOracle};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

const ZFS: &str = "zfs";

/// Engine issuing `zfs` commands through a [`CommandRunner`]
#[derive(Debug, Clone, Copy)]
pub struct ZfsCli {
    runner: CommandRunner,
    /// Pass `-v` to zfs so it narrates what it does
    verbose: bool,
}

impl ZfsCli {
    pub fn new(runner: CommandRunner, verbose: bool) -> Self {
        Self { runner, verbose }
    }

    fn verbose_flag(&self, args: &mut Vec<String>) {
        if self.verbose {
            args.push("-v".to_string());
        }
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl SnapshotOracle for ZfsCli {
    async fn exists(&self, identity: &str) -> bool {
        let args = owned(&["list", "-H", "-t", "all", "-o", "name", identity]);
        self.runner.probe(ZFS, &args).await.is_ok()
    }
}

impl SnapshotEngine for ZfsCli {
    type Producer = ZfsSend;
    type Consumer = ZfsReceive;

    async fn create_snapshot(
        &self,
        dataset: &str,
        name: &str,
        recursive: bool,
    ) -> Result<(), CommandError> {
        let mut args = owned(&["snapshot"]);
        if recursive {
            args.push("-r".to_string());
        }
        args.push(format!("{}@{}", dataset, name));
        self.runner.run(ZFS, &args).await
    }

    async fn destroy(&self, identity: &str, recursive: bool) -> Result<(), CommandError> {
        let mut args = owned(&["destroy"]);
        self.verbose_flag(&mut args);
        if recursive {
            args.push("-r".to_string());
        }
        args.push(identity.to_string());
        self.runner.run(ZFS, &args).await
    }

    async fn rename_snapshot(
        &self,
        old_identity: &str,
        new_identity: &str,
        recursive: bool,
    ) -> Result<(), CommandError> {
        let mut args = owned(&["rename"]);
        if recursive {
            args.push("-r".to_string());
        }
        args.push(old_identity.to_string());
        args.push(new_identity.to_string());
        self.runner.run(ZFS, &args).await
    }

    fn send_full(&self, identity: &str) -> ZfsSend {
        let mut args = owned(&["send"]);
        self.verbose_flag(&mut args);
        args.push("-Rw".to_string());
        args.push(identity.to_string());
        ZfsSend {
            runner: self.runner,
            args,
        }
    }

    fn send_incremental(&self, from_identity: &str, to_identity: &str) -> ZfsSend {
        let mut args = owned(&["send"]);
        self.verbose_flag(&mut args);
        args.extend(owned(&["-Rw", "-i", from_identity, to_identity]));
        ZfsSend {
            runner: self.runner,
            args,
        }
    }

    fn receive(&self, dataset: &str, options: ReceiveOptions) -> ZfsReceive {
        let mut args = owned(&["recv"]);
        self.verbose_flag(&mut args);
        if !options.allow_mount {
            args.extend(owned(&["-o", "canmount=noauto"]));
        }
        args.push(if options.force_overwrite { "-Fu" } else { "-u" }.to_string());
        args.push(dataset.to_string());
        ZfsReceive {
            runner: self.runner,
            args,
        }
    }

    async fn estimate_incremental(
        &self,
        from_identity: &str,
        to_identity: &str,
    ) -> Result<String, CommandError> {
        let args = owned(&["send", "-Rvwn", "-i", from_identity, to_identity]);
        self.runner.capture(ZFS, &args).await
    }
}

/// `zfs send ...` writing its stream into the pipeline
#[derive(Debug, Clone)]
pub struct ZfsSend {
    runner: CommandRunner,
    args: Vec<String>,
}

impl ZfsSend {
    pub fn command_line(&self) -> String {
        CommandRunner::render(ZFS, &self.args)
    }
}

impl StreamProducer for ZfsSend {
    async fn produce<W>(self, mut out: W) -> Result<u64, CommandError>
    where
        W: AsyncWrite + Unpin,
    {
        let command = self.command_line();
        if !self.runner.announce(&command) {
            return Ok(0);
        }

        let mut child = self
            .runner
            .spawn(ZFS, &self.args, Stdio::null(), Stdio::piped())?;
        let Some(mut stdout) = child.stdout.take() else {
            return Err(CommandError::Other {
                command,
                reason: "stdout was not captured".to_string(),
            });
        };

        let copied = tokio::io::copy(&mut stdout, &mut out).await;
        // Close our end so the receiver sees end of stream
        let _ = out.shutdown().await;
        drop(out);

        match copied {
            Ok(bytes) => {
                command::wait(child, &command).await?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = child.kill().await;
                Err(CommandError::Other {
                    command,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// `zfs recv ...` reading its stream from the pipeline
#[derive(Debug, Clone)]
pub struct ZfsReceive {
    runner: CommandRunner,
    args: Vec<String>,
}

impl ZfsReceive {
    pub fn command_line(&self) -> String {
        CommandRunner::render(ZFS, &self.args)
    }
}

impl StreamConsumer for ZfsReceive {
    async fn consume<R>(self, mut input: R) -> Result<(), CommandError>
    where
        R: AsyncRead + Unpin,
    {
        let command = self.command_line();
        if !self.runner.announce(&command) {
            tokio::io::copy(&mut input, &mut tokio::io::sink())
                .await
                .map_err(|e| CommandError::Other {
                    command,
                    reason: e.to_string(),
                })?;
            return Ok(());
        }

        let mut child = self
            .runner
            .spawn(ZFS, &self.args, Stdio::piped(), Stdio::inherit())?;
        let Some(mut stdin) = child.stdin.take() else {
            return Err(CommandError::Other {
                command,
                reason: "stdin was not captured".to_string(),
            });
        };

        let copied = tokio::io::copy(&mut input, &mut stdin).await;
        drop(stdin);

        // The exit status explains a broken pipe better than the pipe error does
        let status = command::wait(child, &command).await;
        match (copied, status) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(CommandError::Other {
                command,
                reason: e.to_string(),
            }),
            (Ok(_), Ok(())) => Ok(()),
        }
    }
}
