//! Transfer size estimation.
//!
//! A dry-run send prints a summary such as `total estimated size is 1.2G`.
//! The figure is rounded up to a whole number of its unit. Estimation is
//! best-effort: any failure yields `None` and the transfer goes ahead.

use crate::zfs::SnapshotEngine;
use std::fmt;
use tracing::debug;

/// A rounded-up size such as `2G`, or a plain byte count such as `512`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    pub value: u64,
    /// Upper-case unit letter; `None` means bytes
    pub unit: Option<char>,
}

impl SizeEstimate {
    /// Approximate size in bytes, treating units as powers of 1024.
    pub fn approx_bytes(&self) -> Option<u64> {
        let shift = match self.unit {
            None => 0,
            Some('K') => 10,
            Some('M') => 20,
            Some('G') => 30,
            Some('T') => 40,
            Some('P') => 50,
            Some('E') => 60,
            Some(_) => return None,
        };
        self.value.checked_mul(1u64 << shift)
    }
}

impl fmt::Display for SizeEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{}{}", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Parse one size token: digits with an optional fraction, then an optional
/// single-letter unit.
pub fn parse_size(token: &str) -> Option<SizeEstimate> {
    let token = token.trim();
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (number, suffix) = token.split_at(split);

    if number.is_empty() || !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let size: f64 = number.parse().ok()?;

    let mut rest = suffix.chars();
    let unit = match (rest.next(), rest.next()) {
        (None, _) => None,
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
        _ => return None,
    };

    let value = size.ceil() as u64;
    Some(SizeEstimate {
        value,
        unit: unit.filter(|u| *u != 'B'),
    })
}

/// Find the last `total` line in dry-run output and parse its final token.
pub fn parse_total(output: &str) -> Option<SizeEstimate> {
    let line = output.lines().rev().find(|line| line.contains("total"))?;
    parse_size(line.split_whitespace().last()?)
}

/// Estimate the incremental transfer from `from` to `to`.
pub async fn estimate_incremental<E: SnapshotEngine>(
    engine: &E,
    from: &str,
    to: &str,
) -> Option<SizeEstimate> {
    match engine.estimate_incremental(from, to).await {
        Ok(output) => {
            let estimate = parse_total(&output);
            if estimate.is_none() {
                debug!("No size summary in dry-run output for {} -> {}", from, to);
            }
            estimate
        }
        Err(e) => {
            debug!("Size estimate failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::memory::{FailPoint, MemoryEngine};

    #[test]
    fn test_fraction_rounds_up() {
        let estimate = parse_total("total estimated size is 1.2G").unwrap();
        assert_eq!(estimate, SizeEstimate { value: 2, unit: Some('G') });
        assert_eq!(estimate.to_string(), "2G");
    }

    #[test]
    fn test_bytes_have_no_unit() {
        let estimate = parse_total("total estimated size is 512B").unwrap();
        assert_eq!(estimate.unit, None);
        assert_eq!(estimate.to_string(), "512");
        assert_eq!(estimate.approx_bytes(), Some(512));
    }

    #[test]
    fn test_lowercase_unit_is_normalised() {
        assert_eq!(parse_size("3.01m").unwrap().to_string(), "4M");
    }

    #[test]
    fn test_whole_numbers_unchanged() {
        assert_eq!(parse_size("7K").unwrap().to_string(), "7K");
        assert_eq!(parse_size("0").unwrap().to_string(), "0");
    }

    #[test]
    fn test_last_total_line_wins() {
        let output = "send from @current to tank/a@backup estimated size is 1.1M\n\
                      send from @current to tank/a/child@backup estimated size is 300K\n\
                      total estimated size is 1.4M\n";
        assert_eq!(parse_total(output).unwrap().to_string(), "2M");
    }

    #[test]
    fn test_unparseable_output() {
        assert!(parse_total("").is_none());
        assert!(parse_total("cannot open 'tank/a@backup': dataset does not exist").is_none());
        assert!(parse_total("total estimated size is unknown").is_none());
        assert!(parse_size("1.2GB").is_none());
        assert!(parse_size(".5G").is_none());
    }

    #[test]
    fn test_approx_bytes() {
        assert_eq!(parse_size("2G").unwrap().approx_bytes(), Some(2 << 30));
        assert_eq!(parse_size("1K").unwrap().approx_bytes(), Some(1024));
        assert_eq!(
            SizeEstimate { value: 1, unit: Some('Z') }.approx_bytes(),
            None
        );
    }

    #[tokio::test]
    async fn test_estimator_failure_is_none() {
        let engine = MemoryEngine::new();
        engine.fail(FailPoint::Estimate);
        assert!(estimate_incremental(&engine, "p/a@current", "p/a@backup").await.is_none());
    }

    #[tokio::test]
    async fn test_estimator_reads_engine_output() {
        let engine = MemoryEngine::new();
        engine.set_estimate_output("total estimated size is 9.5K");
        let estimate = estimate_incremental(&engine, "p/a@current", "p/a@backup").await;
        assert_eq!(estimate.map(|e| e.to_string()), Some("10K".to_string()));
    }
}
