//! Error types for the backup tool.
//!
//! `BackupError` is the outcome vocabulary of the dataset state machine.
//! Whether an error stops the whole run or only the current dataset is
//! decided here, not by the command layer.

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("source dataset {0} does not exist")]
    MissingSource(String),

    #[error("destination {0} already exists, destroy it or use --retry")]
    DestinationConflict(String),

    #[error("head snapshot {0} already exists, destroy it or use --retry")]
    HeadConflict(String),

    #[error("origin snapshot {0} already exists, destroy it or use --retry")]
    OriginConflict(String),

    #[error("failed to destroy {0}")]
    CleanupFailed(String),

    #[error("destroy of {0} aborted by operator")]
    CleanupAborted(String),

    #[error("failed to create origin snapshot {0}")]
    SnapshotCreateFailed(String),

    #[error("full transfer to {0} failed: {1}")]
    FullTransferFailed(String, TransferError),

    #[error("head snapshot {0} already exists, run again with --retry")]
    HeadAlreadyPending(String),

    #[error("retry requested but head snapshot {0} does not exist")]
    NoPendingHead(String),

    #[error("failed to create head snapshot {0}")]
    HeadSnapshotFailed(String),

    #[error("incremental transfer to {0} failed: {1}")]
    IncrementalTransferFailed(String, TransferError),

    #[error("snapshot rotation for {dataset} failed: {reason}")]
    RotationFailed { dataset: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackupError {
    /// Fatal errors abort the entire run; the rest only fail one dataset.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::MissingSource(_)
                | BackupError::SnapshotCreateFailed(_)
                | BackupError::FullTransferFailed(..)
        )
    }
}

/// An external command that could not run or exited unsuccessfully.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Status { command: String, status: ExitStatus },

    #[error("`{command}` failed: {reason}")]
    Other { command: String, reason: String },
}

/// One stage of a transfer pipeline failed.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("send stage failed: {0}")]
    Producer(#[source] CommandError),

    #[error("receive stage failed: {0}")]
    Consumer(#[source] CommandError),

    #[error("send and receive both failed: {producer}; {consumer}")]
    Both {
        producer: CommandError,
        consumer: CommandError,
    },
}

pub type Result<T> = std::result::Result<T, BackupError>;
