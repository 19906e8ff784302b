//! Backup driver - runs the dataset state machine over a list of datasets.
//!
//! Datasets are processed strictly one after another. A dataset that
//! fails is recorded and the run moves on to the next one.

use crate::config::Config;
use crate::dataset::cleanup::Cleanup;
use crate::dataset::machine::{DatasetMachine, MachineOptions};
use crate::dataset::state::Markers;
use crate::interrupt::CancellationWindow;
use crate::report::{DatasetStatus, Outcome, RunReport, TimingRecord};
use crate::utils::errors::Result;
use crate::zfs::{SnapshotEngine, SnapshotLayout};
use std::time::Instant;
use tracing::{error, warn};

/// Operator choices for one invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Resume pending heads; with `--init`, destroy conflicts first
    pub retry: bool,

    /// Let received copies mount automatically
    pub allow_mount: bool,

    /// Show live transfer progress
    pub show_progress: bool,
}

pub struct BackupDriver<E> {
    engine: E,
    config: Config,
    layout: SnapshotLayout,
    cleanup: Cleanup,
    options: RunOptions,
}

impl<E: SnapshotEngine> BackupDriver<E> {
    pub fn new(engine: E, config: Config, options: RunOptions, window: CancellationWindow) -> Self {
        let layout = SnapshotLayout::from_config(&config);
        let cleanup = Cleanup::new(config.cleanup_delay(), window);
        Self {
            engine,
            config,
            layout,
            cleanup,
            options,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// The explicitly requested datasets, or the configured list
    pub fn requested_or_configured(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            self.config.datasets.clone()
        } else {
            requested.to_vec()
        }
    }

    fn machine(&self, force: bool) -> DatasetMachine<'_, E> {
        DatasetMachine::new(
            &self.engine,
            &self.layout,
            &self.cleanup,
            MachineOptions {
                force,
                allow_mount: self.options.allow_mount,
                show_progress: self.options.show_progress,
            },
        )
    }

    /// Keep the datasets that can be backed up incrementally, logging why
    /// each of the others was skipped.
    pub async fn select(&self, names: &[String]) -> Vec<String> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let ids = self.layout.dataset(name);
            if !self.engine.exists(&ids.source).await {
                error!("Listed dataset {} does not exist, skipping....", ids.source);
            } else if !self.engine.exists(&ids.origin).await {
                warn!(
                    "Dataset source snapshot does not exist ({}), --init required",
                    ids.origin
                );
            } else {
                selected.push(name.clone());
            }
        }
        selected
    }

    /// Back up each dataset in turn. A failure is recorded and the next
    /// dataset still runs.
    pub async fn run_backups(&self, datasets: &[String]) -> RunReport {
        let machine = self.machine(false);
        let mut report = RunReport::new();

        for name in datasets {
            let start = Instant::now();
            let attempt = machine.backup(name, self.options.retry).await;

            let outcome = match attempt.result {
                Ok(_) => Outcome::Success,
                Err(e) => {
                    warn!("Backup of {} failed: {}", name, e);
                    Outcome::Failure
                }
            };

            report.record(TimingRecord {
                dataset: name.clone(),
                estimate: attempt.estimate,
                elapsed: start.elapsed(),
                outcome,
            });
        }

        report
    }

    /// Initialize (or with retry, re-initialize) a single dataset.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        self.machine(self.options.retry).initialize(name).await
    }

    /// Marker status of each dataset; changes nothing.
    pub async fn list(&self, names: &[String]) -> Vec<DatasetStatus> {
        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            let ids = self.layout.dataset(name);
            statuses.push(DatasetStatus {
                markers: Markers::probe(&self.engine, &ids).await,
                source: ids.source,
            });
        }
        statuses
    }
}
