//! Outcome of a conversion run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

/// Cell and record tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionCounts {
    /// Cells visited, summed over layers.
    pub cells_processed: u64,
    /// Cells dropped because the value was absent.
    pub skipped_nodata: u64,
    /// Cells skipped because their coordinate could not be reprojected.
    pub skipped_unprojectable: u64,
    pub records_written: u64,
}

/// A successful (possibly cancelled) run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub counts: ConversionCounts,
    pub layers_completed: usize,
    pub layers_total: usize,
    pub outputs: Vec<PathBuf>,
    /// Up to `max_warnings` messages
    pub warnings: Vec<String>,
    /// All warnings, including those not stored
    pub warning_count: u64,
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
    pub source_crs: String,
    pub target_crs: String,
}

fn serialize_seconds<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Bounded warning collector.
#[derive(Debug, Clone)]
pub(crate) struct WarningLog {
    stored: Vec<String>,
    total: u64,
    max: usize,
}

impl WarningLog {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            stored: Vec::new(),
            total: 0,
            max,
        }
    }

    pub(crate) fn push(&mut self, message: String) {
        self.total += 1;
        if self.stored.len() < self.max {
            warn!("{}", message);
            self.stored.push(message);
        } else {
            debug!("{}", message);
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, u64) {
        (self.stored, self.total)
    }
}
