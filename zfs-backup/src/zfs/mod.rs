//! Snapshot storage collaborators.
//!
//! The backup logic never talks to ZFS directly. It goes through
//! [`SnapshotOracle`] for existence queries and [`SnapshotEngine`] for
//! everything that changes state, so the same state machine runs against
//! the `zfs` binary ([`cli::ZfsCli`]) or an in-memory pool
//! ([`memory::MemoryEngine`]).

pub mod cli;
pub mod command;
pub mod memory;

use crate::config::Config;
use crate::transfer::pipeline::{StreamConsumer, StreamProducer};
use crate::utils::errors::CommandError;
use std::future::Future;

/// Options applied when receiving a stream into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Roll the destination back to the stream's base before receiving (`-F`)
    pub force_overwrite: bool,

    /// Let the received copy mount automatically (no `canmount=noauto`)
    pub allow_mount: bool,
}

/// Answers existence questions about datasets and snapshots.
pub trait SnapshotOracle {
    /// Whether `identity` (`pool/name` or `pool/name@snap`) exists.
    /// A missing identity is `false`, never an error.
    fn exists(&self, identity: &str) -> impl Future<Output = bool>;
}

/// Mutating snapshot operations. Success or failure of each is all the
/// caller learns; policy is decided by the dataset state machine.
pub trait SnapshotEngine: SnapshotOracle {
    type Producer: StreamProducer;
    type Consumer: StreamConsumer;

    fn create_snapshot(
        &self,
        dataset: &str,
        name: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<(), CommandError>>;

    fn destroy(&self, identity: &str, recursive: bool)
        -> impl Future<Output = Result<(), CommandError>>;

    fn rename_snapshot(
        &self,
        old_identity: &str,
        new_identity: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<(), CommandError>>;

    /// Stream holding the whole of `identity` and its descendants.
    fn send_full(&self, identity: &str) -> Self::Producer;

    /// Stream holding the changes from `from_identity` to `to_identity`.
    fn send_incremental(&self, from_identity: &str, to_identity: &str) -> Self::Producer;

    /// Sink that applies a send stream to `dataset`.
    fn receive(&self, dataset: &str, options: ReceiveOptions) -> Self::Consumer;

    /// Dry-run output of an incremental send; used only for size estimates.
    fn estimate_incremental(
        &self,
        from_identity: &str,
        to_identity: &str,
    ) -> impl Future<Output = Result<String, CommandError>>;
}

/// Fully qualified identities for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetIds {
    /// `source/name`
    pub source: String,
    /// `destination/name`
    pub destination: String,
    /// `source/name@origin`
    pub origin: String,
    /// `source/name@head`
    pub head: String,
    pub origin_label: String,
    pub head_label: String,
}

/// Pool roots and snapshot labels used to build [`DatasetIds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    pub source_pool: String,
    pub destination_pool: String,
    pub origin: String,
    pub head: String,
}

impl SnapshotLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_pool: config.pools.source.clone(),
            destination_pool: config.pools.destination.clone(),
            origin: config.snapshots.origin.clone(),
            head: config.snapshots.head.clone(),
        }
    }

    pub fn dataset(&self, name: &str) -> DatasetIds {
        let source = format!("{}/{}", self.source_pool, name);
        DatasetIds {
            destination: format!("{}/{}", self.destination_pool, name),
            origin: format!("{}@{}", source, self.origin),
            head: format!("{}@{}", source, self.head),
            source,
            origin_label: self.origin.clone(),
            head_label: self.head.clone(),
        }
    }
}
