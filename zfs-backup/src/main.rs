//! ZFS Backup - Main entry point
//!
//! Incremental snapshot replication between two ZFS pools.

use anyhow::Result;
use chrono::Local;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use zfs_backup::config::Config;
use zfs_backup::driver::{BackupDriver, RunOptions};
use zfs_backup::interrupt::CancellationWindow;
use zfs_backup::report::render_status;
use zfs_backup::utils::logger::{self, ECHO_VERBOSITY, PROGRESS_VERBOSITY};
use zfs_backup::zfs::cli::ZfsCli;
use zfs_backup::zfs::command::CommandRunner;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Resume a pending head snapshot instead of creating a new one
    /// (with --init: destroy whatever is in the way first)
    #[arg(short, long)]
    retry: bool,

    /// Only process this dataset (repeatable)
    #[arg(short, long = "dataset", value_name = "NAME")]
    datasets: Vec<String>,

    /// Increase output (-vv shows progress, -vvv echoes every command)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Show the snapshot status of each dataset and exit
    #[arg(short, long)]
    list: bool,

    /// Allow the received copy to be mounted
    #[arg(short, long)]
    mount: bool,

    /// Print the commands that would change anything instead of running them
    #[arg(short, long)]
    simulate: bool,

    /// (Re)initialize a single dataset with a full transfer
    #[arg(short, long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // The logger needs the config, so failures before it exists go to stdout directly
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            println!("Error: failed to load configuration: {:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let level = logger::level_for_verbosity(args.verbose, &config.log.level);
    if let Err(e) = logger::init(level) {
        println!("Error: failed to initialize logging: {:#}", e);
        return Ok(ExitCode::FAILURE);
    }

    let window = CancellationWindow::new();
    window.listen_for_interrupts();

    let echo = args.verbose >= ECHO_VERBOSITY;
    let engine = ZfsCli::new(CommandRunner::new(args.simulate, echo), echo);
    if args.simulate {
        tracing::warn!("Simulate mode, nothing will be changed");
    }

    let options = RunOptions {
        retry: args.retry,
        allow_mount: args.mount,
        show_progress: args.verbose >= PROGRESS_VERBOSITY,
    };
    let driver = BackupDriver::new(engine, config, options, window);

    if args.list {
        let names = driver.requested_or_configured(&args.datasets);
        print!("{}", render_status(&driver.list(&names).await));
        return Ok(ExitCode::SUCCESS);
    }

    let started = Instant::now();

    if args.init {
        let Some(name) = init_target(&args.datasets) else {
            tracing::error!(
                "--init requires exactly one --dataset, got {}",
                args.datasets.len()
            );
            return Ok(ExitCode::FAILURE);
        };

        tracing::info!(
            "Initializing {} at {}",
            name,
            Local::now().format(TIMESTAMP_FORMAT)
        );
        let result = driver.initialize(name).await;
        tracing::info!(
            "Finished at {} ({:.1}s)",
            Local::now().format(TIMESTAMP_FORMAT),
            started.elapsed().as_secs_f64()
        );

        return Ok(match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) if e.is_fatal() => {
                tracing::error!("Initialization of {} failed: {}", name, e);
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::warn!("Initialization of {} stopped: {}", name, e);
                ExitCode::FAILURE
            }
        });
    }

    tracing::info!(
        "Starting zfs-backup v{} at {}",
        env!("CARGO_PKG_VERSION"),
        Local::now().format(TIMESTAMP_FORMAT)
    );

    let requested = driver.requested_or_configured(&args.datasets);
    let selected = driver.select(&requested).await;
    if selected.is_empty() {
        tracing::warn!("No datasets ready for incremental backup");
    }

    let report = driver.run_backups(&selected).await;

    print!("{}", report.render());
    tracing::info!(
        "Finished at {} ({:.1}s)",
        Local::now().format(TIMESTAMP_FORMAT),
        started.elapsed().as_secs_f64()
    );

    Ok(ExitCode::from(report.exit_status()))
}

/// The single dataset `--init` works on
fn init_target(datasets: &[String]) -> Option<&str> {
    match datasets {
        [name] => Some(name.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_takes_exactly_one_dataset() {
        let args = Args::try_parse_from(["zfs-backup", "--init", "-d", "a", "-d", "b"]).unwrap();
        assert!(args.init);
        assert_eq!(init_target(&args.datasets), None);

        let args = Args::try_parse_from(["zfs-backup", "--init"]).unwrap();
        assert_eq!(init_target(&args.datasets), None);

        let args = Args::try_parse_from(["zfs-backup", "-i", "-r", "--dataset", "lxd"]).unwrap();
        assert!(args.retry);
        assert_eq!(init_target(&args.datasets), Some("lxd"));
    }

    #[test]
    fn test_verbosity_counts_flags() {
        let args = Args::try_parse_from(["zfs-backup", "-vvv", "--simulate"]).unwrap();
        assert_eq!(args.verbose, 3);
        assert!(args.simulate);
        assert!(!args.list);
    }
}
