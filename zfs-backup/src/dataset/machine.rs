//! Per-dataset snapshot lifecycle.
//!
//! `initialize` takes a dataset from uninitialized to ready with a full
//! transfer of a fresh origin snapshot. `backup` takes a ready dataset
//! through pending (head created, incremental transfer running) and back
//! to ready by rotating head into origin.
//!
//! Every precondition is checked against the pool before anything is
//! changed, and a failed transfer never touches the snapshots, so a
//! pending dataset can always be resumed with `retry`.
//!
//! Rotation is destroy-origin then rename-head. If the process dies
//! between the two the dataset is left with a head and no origin, which
//! classifies as [`LifecycleState::Error`] and must be repaired by hand.

use crate::dataset::cleanup::Cleanup;
use crate::dataset::state::{LifecycleState, Markers};
use crate::transfer::estimate::{self, SizeEstimate};
use crate::transfer::pipeline::{self, StreamConsumer, StreamProducer};
use crate::transfer::progress::{format_bytes, ConsoleProgress};
use crate::utils::errors::TransferError;
use crate::utils::errors::{BackupError, Result};
use crate::zfs::{DatasetIds, ReceiveOptions, SnapshotEngine, SnapshotLayout};
use tracing::{debug, error, info, warn};

/// Behaviour switches shared by every dataset in a run
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineOptions {
    /// Destroy conflicting destination/head/origin during `initialize`
    pub force: bool,

    /// Let received copies mount automatically
    pub allow_mount: bool,

    /// Redraw a progress line while transfers run
    pub show_progress: bool,
}

/// Result of one `backup` call. The estimate is kept even when the
/// backup fails so the run summary can show it.
#[derive(Debug)]
pub struct BackupAttempt {
    pub estimate: Option<SizeEstimate>,
    pub result: Result<u64>,
}

/// Drives one dataset at a time through its snapshot lifecycle
pub struct DatasetMachine<'a, E> {
    engine: &'a E,
    layout: &'a SnapshotLayout,
    cleanup: &'a Cleanup,
    options: MachineOptions,
}

impl<'a, E: SnapshotEngine> DatasetMachine<'a, E> {
    pub fn new(
        engine: &'a E,
        layout: &'a SnapshotLayout,
        cleanup: &'a Cleanup,
        options: MachineOptions,
    ) -> Self {
        Self {
            engine,
            layout,
            cleanup,
            options,
        }
    }

    pub async fn state(&self, name: &str) -> LifecycleState {
        Markers::probe(self.engine, &self.layout.dataset(name))
            .await
            .state()
    }

    fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            force_overwrite: true,
            allow_mount: self.options.allow_mount,
        }
    }

    /// Create the origin snapshot and fully replicate it to the destination.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        let ids = self.layout.dataset(name);

        info!("Checking for source dataset (must exist to init)...");
        if !self.engine.exists(&ids.source).await {
            error!("Unable to continue, {} does not exist", ids.source);
            return Err(BackupError::MissingSource(ids.source));
        }
        info!(outcome = "ok", "Dataset {} exists", ids.source);

        info!("Checking for target dataset (should not exist to --init)...");
        self.clear_conflict(&ids.destination, BackupError::DestinationConflict)
            .await?;

        info!("Checking for dataset head (should not exist to --init)...");
        self.clear_conflict(&ids.head, BackupError::HeadConflict)
            .await?;

        info!("Checking for dataset origin (should not exist to --init)...");
        self.clear_conflict(&ids.origin, BackupError::OriginConflict)
            .await?;

        info!("Creating origin snapshot {}", ids.origin);
        if let Err(e) = self
            .engine
            .create_snapshot(&ids.source, &ids.origin_label, true)
            .await
        {
            error!("Failed to create origin snapshot, failing hard: {}", e);
            return Err(BackupError::SnapshotCreateFailed(ids.origin));
        }

        info!(
            "Transferring origin {} to target {}...",
            ids.origin, ids.destination
        );
        match self
            .transfer(
                self.engine.send_full(&ids.origin),
                self.engine.receive(&ids.destination, self.receive_options()),
                None,
            )
            .await
        {
            Ok(bytes) => {
                info!(
                    outcome = "ok",
                    "Dataset initialized successfully ({}), ready for incremental backup",
                    format_bytes(bytes)
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize dataset, failing hard: {}", e);
                Err(BackupError::FullTransferFailed(ids.destination, e))
            }
        }
    }

    /// Fail with `conflict` if `identity` exists, unless forcing, in which
    /// case it is destroyed after the cancellation window.
    async fn clear_conflict(
        &self,
        identity: &str,
        conflict: fn(String) -> BackupError,
    ) -> Result<()> {
        if !self.engine.exists(identity).await {
            info!(outcome = "ok", "{} does not exist", identity);
            return Ok(());
        }

        if !self.options.force {
            error!(
                "Unable to initialize, please zfs destroy -r {} or use --retry to continue",
                identity
            );
            return Err(conflict(identity.to_string()));
        }

        self.cleanup.destroy(self.engine, identity).await
    }

    /// Replicate the changes since origin and rotate head into origin.
    ///
    /// With `retry` the existing head is resumed instead of a new one being
    /// created.
    pub async fn backup(&self, name: &str, retry: bool) -> BackupAttempt {
        let ids = self.layout.dataset(name);
        info!(
            "Preparing incremental xfer of {} -> {} to {}",
            ids.origin, ids.head_label, ids.destination
        );

        if let Err(e) = self.prepare_head(&ids, retry).await {
            return BackupAttempt {
                estimate: None,
                result: Err(e),
            };
        }

        debug!("Guessing size of incremental transfer...");
        let estimate = estimate::estimate_incremental(self.engine, &ids.origin, &ids.head).await;
        match &estimate {
            Some(size) => info!(outcome = "ok", "Estimated size {}", size),
            None => warn!("Unable to estimate size, trying anyways..."),
        }

        let result = self.transfer_and_rotate(&ids, estimate).await;
        BackupAttempt { estimate, result }
    }

    async fn prepare_head(&self, ids: &DatasetIds, retry: bool) -> Result<()> {
        let head_exists = self.engine.exists(&ids.head).await;

        if retry {
            if !head_exists {
                error!(
                    "Unable to continue, retry specified but head snapshot {} does not exist",
                    ids.head
                );
                return Err(BackupError::NoPendingHead(ids.head.clone()));
            }
            warn!("Skipping {} snapshot creation, this is a retry...", ids.head_label);
            return Ok(());
        }

        if head_exists {
            error!("Head snapshot {} already exists, run again with --retry", ids.head);
            return Err(BackupError::HeadAlreadyPending(ids.head.clone()));
        }

        debug!("Creating snapshot {}...", ids.head);
        self.engine
            .create_snapshot(&ids.source, &ids.head_label, true)
            .await
            .map_err(|e| {
                error!("Failed to create head snapshot {}: {}", ids.head, e);
                BackupError::HeadSnapshotFailed(ids.head.clone())
            })
    }

    async fn transfer_and_rotate(
        &self,
        ids: &DatasetIds,
        estimate: Option<SizeEstimate>,
    ) -> Result<u64> {
        info!(
            "Starting incremental xfer of {} to {}",
            estimate.map(|e| e.to_string()).unwrap_or_else(|| "unknown size".into()),
            ids.destination
        );

        let bytes = match self
            .transfer(
                self.engine.send_incremental(&ids.origin, &ids.head),
                self.engine.receive(&ids.destination, self.receive_options()),
                estimate.and_then(|e| e.approx_bytes()),
            )
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    "Failed to backup dataset, not rotating snapshots, retry with --retry: {}",
                    e
                );
                return Err(BackupError::IncrementalTransferFailed(
                    ids.destination.clone(),
                    e,
                ));
            }
        };

        self.rotate(ids).await?;
        info!(outcome = "ok", "Backed up {} ({})", ids.source, format_bytes(bytes));
        Ok(bytes)
    }

    /// Run one send/receive pair, with a status line when progress is on.
    async fn transfer<P, C>(
        &self,
        producer: P,
        consumer: C,
        total_bytes: Option<u64>,
    ) -> std::result::Result<u64, TransferError>
    where
        P: StreamProducer,
        C: StreamConsumer,
    {
        let progress = self
            .options
            .show_progress
            .then(|| ConsoleProgress::new(total_bytes));
        let result = pipeline::run(
            producer,
            consumer,
            progress.as_ref().map(ConsoleProgress::callback),
        )
        .await;
        if let Some(progress) = progress {
            progress.finish();
        }
        result
    }

    async fn rotate(&self, ids: &DatasetIds) -> Result<()> {
        debug!("Destroying old origin {}", ids.origin);
        if let Err(e) = self.engine.destroy(&ids.origin, true).await {
            error!(
                "Failed to destroy old origin {}: {}. The destination already holds {}; \
                 destroy the origin and rename the head by hand",
                ids.origin, e, ids.head
            );
            return Err(BackupError::RotationFailed {
                dataset: ids.source.clone(),
                reason: format!("destroy of {} failed", ids.origin),
            });
        }

        debug!("Moving head ({}) to origin ({})", ids.head_label, ids.origin_label);
        if let Err(e) = self.engine.rename_snapshot(&ids.head, &ids.origin, true).await {
            error!(
                "Failed to rename {} to {}: {}. Dataset has a head and no origin; \
                 run zfs rename -r {} {} by hand",
                ids.head, ids.origin, e, ids.head, ids.origin
            );
            return Err(BackupError::RotationFailed {
                dataset: ids.source.clone(),
                reason: format!("rename of {} failed", ids.head),
            });
        }

        Ok(())
    }
}
