//! ZFS Backup Library
//!
//! Incremental replication of ZFS datasets from a source pool to a backup
//! pool, driven by a pair of marker snapshots per dataset.

pub mod config;
pub mod dataset;
pub mod driver;
pub mod interrupt;
pub mod report;
pub mod transfer;
pub mod utils;
pub mod zfs;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
