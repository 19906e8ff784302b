//! In-memory snapshot engine.
//!
//! Holds a set of dataset and snapshot identities and applies the same
//! recursive semantics as ZFS for snapshot, destroy and rename. Every
//! engine call is journaled and any operation can be made to fail, which
//! lets the state machine be driven through partial failures without a
//! real pool.

use crate::transfer::pipeline::{StreamConsumer, StreamProducer};
use crate::utils::errors::CommandError;
use crate::zfs::{ReceiveOptions, SnapshotEngine, SnapshotOracle};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Operation that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateSnapshot,
    Destroy,
    Rename,
    Send,
    Receive,
    Estimate,
}

/// A journaled engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSnapshot(String),
    Destroy(String),
    Rename(String, String),
    SendFull(String),
    SendIncremental(String, String),
    Receive(String),
    Estimate(String, String),
}

impl Call {
    /// Whether the call changes pool state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::SendFull(_) | Call::SendIncremental(..) | Call::Estimate(..)
        )
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Call::Destroy(_))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    identities: BTreeSet<String>,
    failures: HashSet<FailPoint>,
    calls: Vec<Call>,
    estimate_output: Option<String>,
}

impl MemoryState {
    fn fails(&self, point: FailPoint) -> bool {
        self.failures.contains(&point)
    }

    /// Datasets strictly below `dataset`
    fn children(&self, dataset: &str) -> Vec<String> {
        let prefix = format!("{}/", dataset);
        self.identities
            .iter()
            .filter(|id| id.starts_with(&prefix) && !id.contains('@'))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
}

fn failure(command: &str, reason: &str) -> CommandError {
    CommandError::Other {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn split_snapshot(identity: &str) -> Option<(&str, &str)> {
    identity.split_once('@')
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine pre-populated with the given identities
    pub fn with_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let engine = Self::new();
        for identity in identities {
            engine.insert(identity);
        }
        engine
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens inside a failing test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, identity: impl Into<String>) {
        self.lock().identities.insert(identity.into());
    }

    pub fn remove(&self, identity: &str) {
        self.lock().identities.remove(identity);
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().identities.contains(identity)
    }

    pub fn identities(&self) -> Vec<String> {
        self.lock().identities.iter().cloned().collect()
    }

    pub fn fail(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn recover(&self, point: FailPoint) {
        self.lock().failures.remove(&point);
    }

    pub fn set_estimate_output(&self, output: impl Into<String>) {
        self.lock().estimate_output = Some(output.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Journaled calls that change pool state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }
}

impl SnapshotOracle for MemoryEngine {
    async fn exists(&self, identity: &str) -> bool {
        self.contains(identity)
    }
}

impl SnapshotEngine for MemoryEngine {
    type Producer = MemorySend;
    type Consumer = MemoryReceive;

    async fn create_snapshot(
        &self,
        dataset: &str,
        name: &str,
        recursive: bool,
    ) -> Result<(), CommandError> {
        let identity = format!("{}@{}", dataset, name);
        let mut state = self.lock();
        state.calls.push(Call::CreateSnapshot(identity.clone()));

        if state.fails(FailPoint::CreateSnapshot) {
            return Err(failure("snapshot", "injected failure"));
        }
        if !state.identities.contains(dataset) {
            return Err(failure("snapshot", "dataset does not exist"));
        }
        if state.identities.contains(&identity) {
            return Err(failure("snapshot", "snapshot already exists"));
        }

        state.identities.insert(identity);
        if recursive {
            for child in state.children(dataset) {
                state.identities.insert(format!("{}@{}", child, name));
            }
        }
        Ok(())
    }

    async fn destroy(&self, identity: &str, recursive: bool) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.calls.push(Call::Destroy(identity.to_string()));

        if state.fails(FailPoint::Destroy) {
            return Err(failure("destroy", "injected failure"));
        }
        if !state.identities.contains(identity) {
            return Err(failure("destroy", "dataset does not exist"));
        }

        match split_snapshot(identity) {
            Some((dataset, snap)) => {
                state.identities.remove(identity);
                if recursive {
                    for child in state.children(dataset) {
                        state.identities.remove(&format!("{}@{}", child, snap));
                    }
                }
            }
            None => {
                let below: Vec<String> = state
                    .identities
                    .iter()
                    .filter(|id| {
                        id.starts_with(&format!("{}/", identity))
                            || id.starts_with(&format!("{}@", identity))
                    })
                    .cloned()
                    .collect();
                if !below.is_empty() && !recursive {
                    return Err(failure("destroy", "dataset has children"));
                }
                for id in below {
                    state.identities.remove(&id);
                }
                state.identities.remove(identity);
            }
        }
        Ok(())
    }

    async fn rename_snapshot(
        &self,
        old_identity: &str,
        new_identity: &str,
        recursive: bool,
    ) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.calls.push(Call::Rename(
            old_identity.to_string(),
            new_identity.to_string(),
        ));

        if state.fails(FailPoint::Rename) {
            return Err(failure("rename", "injected failure"));
        }
        let (Some((dataset, old_snap)), Some((new_dataset, new_snap))) =
            (split_snapshot(old_identity), split_snapshot(new_identity))
        else {
            return Err(failure("rename", "not a snapshot"));
        };
        if dataset != new_dataset {
            return Err(failure("rename", "snapshots must stay in their dataset"));
        }
        if !state.identities.contains(old_identity) {
            return Err(failure("rename", "snapshot does not exist"));
        }
        if state.identities.contains(new_identity) {
            return Err(failure("rename", "target snapshot exists"));
        }

        state.identities.remove(old_identity);
        state.identities.insert(new_identity.to_string());
        if recursive {
            for child in state.children(dataset) {
                let old = format!("{}@{}", child, old_snap);
                if state.identities.remove(&old) {
                    state.identities.insert(format!("{}@{}", child, new_snap));
                }
            }
        }
        Ok(())
    }

    fn send_full(&self, identity: &str) -> MemorySend {
        let mut state = self.lock();
        state.calls.push(Call::SendFull(identity.to_string()));
        MemorySend {
            header: format!("full {}\n", label(identity)),
            fail: state.fails(FailPoint::Send),
        }
    }

    fn send_incremental(&self, from_identity: &str, to_identity: &str) -> MemorySend {
        let mut state = self.lock();
        state.calls.push(Call::SendIncremental(
            from_identity.to_string(),
            to_identity.to_string(),
        ));
        MemorySend {
            header: format!(
                "incremental {} {}\n",
                label(from_identity),
                label(to_identity)
            ),
            fail: state.fails(FailPoint::Send),
        }
    }

    fn receive(&self, dataset: &str, options: ReceiveOptions) -> MemoryReceive {
        let mut state = self.lock();
        state.calls.push(Call::Receive(dataset.to_string()));
        MemoryReceive {
            state: Arc::clone(&self.state),
            dataset: dataset.to_string(),
            options,
            fail: state.fails(FailPoint::Receive),
        }
    }

    async fn estimate_incremental(
        &self,
        from_identity: &str,
        to_identity: &str,
    ) -> Result<String, CommandError> {
        let mut state = self.lock();
        state.calls.push(Call::Estimate(
            from_identity.to_string(),
            to_identity.to_string(),
        ));
        if state.fails(FailPoint::Estimate) {
            return Err(failure("send -n", "injected failure"));
        }
        Ok(state
            .estimate_output
            .clone()
            .unwrap_or_else(|| "total estimated size is 1.2G".to_string()))
    }
}

fn label(identity: &str) -> &str {
    split_snapshot(identity).map(|(_, snap)| snap).unwrap_or(identity)
}

/// Stream carrying a one-line header naming the snapshots it holds
#[derive(Debug)]
pub struct MemorySend {
    header: String,
    fail: bool,
}

impl StreamProducer for MemorySend {
    async fn produce<W>(self, mut out: W) -> Result<u64, CommandError>
    where
        W: AsyncWrite + Unpin,
    {
        if self.fail {
            return Err(failure("send", "injected failure"));
        }
        out.write_all(self.header.as_bytes())
            .await
            .map_err(|e| failure("send", &e.to_string()))?;
        out.shutdown()
            .await
            .map_err(|e| failure("send", &e.to_string()))?;
        Ok(self.header.len() as u64)
    }
}

/// Applies a [`MemorySend`] stream to the destination dataset
#[derive(Debug)]
pub struct MemoryReceive {
    state: Arc<Mutex<MemoryState>>,
    dataset: String,
    options: ReceiveOptions,
    fail: bool,
}

impl StreamConsumer for MemoryReceive {
    async fn consume<R>(self, mut input: R) -> Result<(), CommandError>
    where
        R: AsyncRead + Unpin,
    {
        let mut stream = String::new();
        input
            .read_to_string(&mut stream)
            .await
            .map_err(|e| failure("recv", &e.to_string()))?;

        if self.fail {
            return Err(failure("recv", "injected failure"));
        }

        let words: Vec<&str> = stream.split_whitespace().collect();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match words.as_slice() {
            ["full", snap] => {
                if state.identities.contains(&self.dataset) && !self.options.force_overwrite {
                    return Err(failure("recv", "destination exists"));
                }
                state.identities.insert(self.dataset.clone());
                state.identities.insert(format!("{}@{}", self.dataset, snap));
                Ok(())
            }
            ["incremental", from, to] => {
                if !state.identities.contains(&format!("{}@{}", self.dataset, from)) {
                    return Err(failure("recv", "destination lacks the incremental source"));
                }
                state.identities.insert(format!("{}@{}", self.dataset, to));
                Ok(())
            }
            _ => Err(failure("recv", "invalid stream")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::pipeline;

    #[tokio::test]
    async fn test_recursive_snapshot_and_rename() {
        let engine = MemoryEngine::with_identities(["p/a", "p/a/child"]);

        engine.create_snapshot("p/a", "backup", true).await.unwrap();
        assert!(engine.contains("p/a@backup"));
        assert!(engine.contains("p/a/child@backup"));

        engine
            .rename_snapshot("p/a@backup", "p/a@current", true)
            .await
            .unwrap();
        assert!(engine.contains("p/a@current"));
        assert!(engine.contains("p/a/child@current"));
        assert!(!engine.contains("p/a/child@backup"));
    }

    #[tokio::test]
    async fn test_recursive_destroy_of_dataset() {
        let engine = MemoryEngine::with_identities(["v/a", "v/a@current", "v/a/child", "v/ab"]);

        assert!(engine.destroy("v/a", false).await.is_err());
        engine.destroy("v/a", true).await.unwrap();
        assert_eq!(engine.identities(), vec!["v/ab".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_snapshot_rejected() {
        let engine = MemoryEngine::with_identities(["p/a", "p/a@backup"]);
        assert!(engine.create_snapshot("p/a", "backup", true).await.is_err());
    }

    #[tokio::test]
    async fn test_full_then_incremental_receive() {
        let engine = MemoryEngine::with_identities(["p/a", "p/a@current", "p/a@backup"]);
        let options = ReceiveOptions {
            force_overwrite: true,
            allow_mount: false,
        };

        pipeline::run(
            engine.send_full("p/a@current"),
            engine.receive("v/a", options),
            None,
        )
        .await
        .unwrap();
        assert!(engine.contains("v/a"));
        assert!(engine.contains("v/a@current"));

        pipeline::run(
            engine.send_incremental("p/a@current", "p/a@backup"),
            engine.receive("v/a", options),
            None,
        )
        .await
        .unwrap();
        assert!(engine.contains("v/a@backup"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_journaled() {
        let engine = MemoryEngine::with_identities(["p/a"]);
        engine.fail(FailPoint::CreateSnapshot);

        assert!(engine.create_snapshot("p/a", "backup", true).await.is_err());
        assert!(!engine.contains("p/a@backup"));
        assert_eq!(
            engine.mutations(),
            vec![Call::CreateSnapshot("p/a@backup".to_string())]
        );

        engine.recover(FailPoint::CreateSnapshot);
        assert!(engine.create_snapshot("p/a", "backup", true).await.is_ok());
    }
}
