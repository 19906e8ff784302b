//! Destructive cleanup used by forced re-initialization.

use crate::interrupt::CancellationWindow;
use crate::utils::errors::{BackupError, Result};
use crate::zfs::SnapshotEngine;
use std::time::Duration;
use tracing::{error, warn};

/// Destroys identities recursively, always after a cancellation window
#[derive(Clone)]
pub struct Cleanup {
    delay: Duration,
    window: CancellationWindow,
}

impl Cleanup {
    pub fn new(delay: Duration, window: CancellationWindow) -> Self {
        Self { delay, window }
    }

    /// Destroy `identity` and all of its descendants.
    pub async fn destroy<E: SnapshotEngine>(&self, engine: &E, identity: &str) -> Result<()> {
        warn!(
            "WARNING -- destroying {} in {}s, hit Ctrl+C to abort",
            identity,
            self.delay.as_secs()
        );

        if !self.window.wait(self.delay).await {
            warn!("Destroy of {} aborted", identity);
            return Err(BackupError::CleanupAborted(identity.to_string()));
        }

        engine.destroy(identity, true).await.map_err(|e| {
            error!("Failed to destroy {}: {}", identity, e);
            BackupError::CleanupFailed(identity.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::memory::{Call, FailPoint, MemoryEngine};

    #[tokio::test]
    async fn test_destroy_is_recursive() {
        let engine = MemoryEngine::with_identities(["v/a", "v/a@current", "v/a/child"]);
        let cleanup = Cleanup::new(Duration::ZERO, CancellationWindow::new());

        cleanup.destroy(&engine, "v/a").await.unwrap();
        assert!(engine.identities().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_failure_maps_to_cleanup_failed() {
        let engine = MemoryEngine::with_identities(["v/a"]);
        engine.fail(FailPoint::Destroy);
        let cleanup = Cleanup::new(Duration::ZERO, CancellationWindow::new());

        let result = cleanup.destroy(&engine, "v/a").await;
        assert!(matches!(result, Err(BackupError::CleanupFailed(_))));
        assert!(engine.contains("v/a"));
    }

    #[tokio::test]
    async fn test_interrupted_window_destroys_nothing() {
        let engine = MemoryEngine::with_identities(["v/a"]);
        let window = CancellationWindow::new();
        let cleanup = Cleanup::new(Duration::from_secs(30), window.clone());

        let interrupter = async {
            for _ in 0..200 {
                if window.interrupt() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        let (result, ()) = tokio::join!(cleanup.destroy(&engine, "v/a"), interrupter);
        assert!(matches!(result, Err(BackupError::CleanupAborted(_))));
        assert!(engine.contains("v/a"));
        assert!(!engine.calls().iter().any(Call::is_destructive));
    }
}
