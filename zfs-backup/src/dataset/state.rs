//! Lifecycle state derived from which snapshot markers exist.
//!
//! Nothing is stored: the state is recomputed from the pool every time.

use crate::zfs::{DatasetIds, SnapshotOracle};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No origin: needs `--init`
    Uninitialized,
    /// Origin only: ready for an incremental backup
    Ready,
    /// Origin and head: a transfer failed or is in flight, resume with `--retry`
    Pending,
    /// Head without origin: rotation was interrupted, needs manual repair
    Error,
}

/// The single mapping from marker existence to lifecycle state.
pub fn classify(origin_exists: bool, head_exists: bool) -> LifecycleState {
    match (origin_exists, head_exists) {
        (false, false) => LifecycleState::Uninitialized,
        (true, false) => LifecycleState::Ready,
        (true, true) => LifecycleState::Pending,
        (false, true) => LifecycleState::Error,
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Ready => "ready",
            LifecycleState::Pending => "pending",
            LifecycleState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Observed existence of everything belonging to one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markers {
    pub source: bool,
    pub destination: bool,
    pub origin: bool,
    pub head: bool,
}

impl Markers {
    pub async fn probe<O: SnapshotOracle>(oracle: &O, ids: &DatasetIds) -> Self {
        Self {
            source: oracle.exists(&ids.source).await,
            destination: oracle.exists(&ids.destination).await,
            origin: oracle.exists(&ids.origin).await,
            head: oracle.exists(&ids.head).await,
        }
    }

    pub fn state(&self) -> LifecycleState {
        classify(self.origin, self.head)
    }
}
