//! Run summary and dataset listing.

use crate::dataset::state::{LifecycleState, Markers};
use crate::transfer::estimate::SizeEstimate;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// One attempted dataset
#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub dataset: String,
    pub estimate: Option<SizeEstimate>,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// Append-only log of the datasets attempted in a run
#[derive(Debug, Default)]
pub struct RunReport {
    records: Vec<TimingRecord>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: TimingRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    pub fn any_failed(&self) -> bool {
        self.records.iter().any(|r| r.outcome == Outcome::Failure)
    }

    /// Process exit status for the run: 1 if any dataset failed
    pub fn exit_status(&self) -> u8 {
        u8::from(self.any_failed())
    }

    /// One row per dataset: name, estimate (blank when unknown), seconds, result
    pub fn render(&self) -> String {
        let width = self
            .records
            .iter()
            .map(|r| r.dataset.len())
            .max()
            .unwrap_or(0)
            .max("Dataset".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:>6}  {:>8}  Result", "Dataset", "Size", "Time");
        for record in &self.records {
            let size = record.estimate.map(|e| e.to_string()).unwrap_or_default();
            let result = match record.outcome {
                Outcome::Success => "Successful",
                Outcome::Failure => "Failed",
            };
            let _ = writeln!(
                out,
                "{:<width$}  {:>6}  {:>7.1}s  [{}]",
                record.dataset,
                size,
                record.elapsed.as_secs_f64(),
                result
            );
        }
        out
    }
}

/// Marker status of one dataset for `--list`
#[derive(Debug, Clone)]
pub struct DatasetStatus {
    /// `source/name`
    pub source: String,
    pub markers: Markers,
}

pub fn render_status(statuses: &[DatasetStatus]) -> String {
    let width = statuses.iter().map(|s| s.source.len()).max().unwrap_or(0);

    let mut out = String::new();
    for status in statuses {
        let markers = &status.markers;
        let origin = if markers.origin {
            "Origin [Ready]"
        } else {
            "Origin [Missing] (init)"
        };
        let head = if markers.head {
            "Head [Ready] (Retry?)"
        } else {
            "Head [Missing] (Ready)"
        };
        let note = match (markers.source, markers.state(), markers.destination) {
            (false, _, _) => " source missing",
            (true, LifecycleState::Error, _) => " needs manual repair",
            // an origin without its copy cannot seed an incremental receive
            (true, LifecycleState::Ready | LifecycleState::Pending, false) => {
                " destination missing (init)"
            }
            _ => "",
        };
        let _ = writeln!(
            out,
            "** Dataset {:<width$}  {:<23}  {:<22}  {}{}",
            status.source,
            origin,
            head,
            markers.state(),
            note
        );
    }
    out
}
