//! End-to-end backup pass over a mix of initialized and uninitialized
//! datasets, using the in-memory snapshot engine.

use std::io;
use std::sync::{Arc, Mutex};
use zfs_backup::config::Config;
use zfs_backup::dataset::state::{LifecycleState, Markers};
use zfs_backup::driver::{BackupDriver, RunOptions};
use zfs_backup::interrupt::CancellationWindow;
use zfs_backup::report::Outcome;
use zfs_backup::zfs::memory::{Call, FailPoint, MemoryEngine};

fn test_config() -> Config {
    let mut config = Config::default();
    config.pools.source = "tank".to_string();
    config.pools.destination = "vault/tank".to_string();
    config.datasets = vec!["alpha".to_string(), "beta".to_string()];
    config.cleanup.delay_secs = 0;
    config
}

/// alpha is ready for an incremental backup, beta has never been initialized
fn seeded_engine() -> MemoryEngine {
    MemoryEngine::with_identities([
        "tank/alpha",
        "tank/alpha@current",
        "vault/tank/alpha",
        "vault/tank/alpha@current",
        "tank/beta",
    ])
}

/// Log sink shared with the subscriber installed for one test
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn driver(engine: MemoryEngine) -> BackupDriver<MemoryEngine> {
    BackupDriver::new(
        engine,
        test_config(),
        RunOptions::default(),
        CancellationWindow::new(),
    )
}

#[tokio::test]
async fn test_default_pass_backs_up_ready_datasets_only() {
    let log = CapturedLog::default();
    let _guard = log.install();
    let engine = seeded_engine();
    let driver = driver(engine.clone());

    let requested = driver.requested_or_configured(&[]);
    let selected = driver.select(&requested).await;
    assert_eq!(selected, vec!["alpha".to_string()]);

    let skipped = log
        .text()
        .lines()
        .find(|line| line.contains("tank/beta@current"))
        .map(str::to_string)
        .unwrap_or_default();
    assert!(skipped.contains("WARN"), "no skip warning in: {}", log.text());
    assert!(skipped.contains("--init required"));

    let report = driver.run_backups(&selected).await;
    assert_eq!(report.records().len(), 1);
    assert_eq!(report.records()[0].dataset, "alpha");
    assert_eq!(report.records()[0].outcome, Outcome::Success);
    assert!(!report.any_failed());
    assert_eq!(report.exit_status(), 0);

    // alpha rotated, destination holds the new snapshot
    let alpha = driver.layout().dataset("alpha");
    let markers = Markers::probe(&engine, &alpha).await;
    assert_eq!(markers.state(), LifecycleState::Ready);
    assert!(engine.contains("vault/tank/alpha@backup"));

    // beta untouched
    let beta = driver.layout().dataset("beta");
    let markers = Markers::probe(&engine, &beta).await;
    assert_eq!(markers.state(), LifecycleState::Uninitialized);
    assert!(!engine.calls().iter().any(|call| match call {
        Call::CreateSnapshot(id) | Call::Destroy(id) | Call::Receive(id) => id.contains("beta"),
        _ => false,
    }));
}

#[tokio::test]
async fn test_failure_of_ready_dataset_fails_the_run() {
    let engine = seeded_engine();
    engine.fail(FailPoint::Receive);
    let driver = driver(engine.clone());

    let selected = driver.select(&driver.requested_or_configured(&[])).await;
    let report = driver.run_backups(&selected).await;
    assert!(report.any_failed());
    assert_eq!(report.exit_status(), 1);

    // the failed transfer leaves alpha pending, ready for --retry
    let alpha = driver.layout().dataset("alpha");
    assert_eq!(
        Markers::probe(&engine, &alpha).await.state(),
        LifecycleState::Pending
    );

    engine.recover(FailPoint::Receive);
    let retry = BackupDriver::new(
        engine.clone(),
        test_config(),
        RunOptions {
            retry: true,
            ..Default::default()
        },
        CancellationWindow::new(),
    );
    let report = retry.run_backups(&selected).await;
    assert_eq!(report.exit_status(), 0);
    assert_eq!(
        Markers::probe(&engine, &alpha).await.state(),
        LifecycleState::Ready
    );
}

#[tokio::test]
async fn test_initialize_then_back_up() {
    let engine = seeded_engine();
    let driver = driver(engine.clone());

    driver.initialize("beta").await.unwrap();
    assert!(engine.contains("vault/tank/beta@current"));

    let selected = driver.select(&driver.requested_or_configured(&[])).await;
    assert_eq!(selected, vec!["alpha".to_string(), "beta".to_string()]);

    let report = driver.run_backups(&selected).await;
    assert!(report
        .records()
        .iter()
        .all(|record| record.outcome == Outcome::Success));
}
