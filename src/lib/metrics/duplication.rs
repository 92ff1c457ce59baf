//! Per-library duplication metrics.
//!
//! One row is emitted per library. Counts accumulate as raw reads during the
//! final pass; [`DuplicationMetrics::calculate_derived_fields`] then halves
//! the pair counts (each examined pair was counted once per end) and derives
//! the duplication fraction and the estimated library size.

use std::path::Path;

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};

/// Duplication counts and derived statistics for one library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DuplicationMetrics {
    /// The library on which the duplicate marking was performed.
    pub library: String,
    /// The number of mapped reads examined which did not have a mapped mate.
    pub unpaired_reads_examined: u64,
    /// The number of mapped read pairs examined.
    pub read_pairs_examined: u64,
    /// The number of reads that were either secondary or supplementary.
    pub secondary_or_supplementary_rds: u64,
    /// The total number of unmapped reads examined.
    pub unmapped_reads: u64,
    /// The number of fragments that were marked as duplicates.
    pub unpaired_read_duplicates: u64,
    /// The number of read pairs that were marked as duplicates.
    pub read_pair_duplicates: u64,
    /// The number of read pairs duplicates that were caused by optical
    /// duplication. Value is always < `READ_PAIR_DUPLICATES`.
    pub read_pair_optical_duplicates: u64,
    /// The fraction of mapped sequence that is marked as duplicate.
    pub percent_duplication: f64,
    /// The estimated number of unique molecules in the library.
    pub estimated_library_size: Option<u64>,
}

/// Writes the finalized per-library rows as a TSV table, one row per library.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to.
pub fn write_duplication_metrics<P: AsRef<Path>>(
    path: P,
    rows: &[DuplicationMetrics],
) -> Result<()> {
    let path = path.as_ref();
    DelimFile::default()
        .write_tsv(&path, rows)
        .with_context(|| format!("Failed to write duplication metrics: {}", path.display()))
}

impl DuplicationMetrics {
    /// Halves the per-end pair counts and fills in the derived statistics.
    /// Call exactly once, after all counting is finished.
    pub fn calculate_derived_fields(&mut self) {
        self.read_pairs_examined /= 2;
        self.read_pair_duplicates /= 2;

        let examined = self.unpaired_reads_examined + 2 * self.read_pairs_examined;
        if examined > 0 {
            let duplicates = self.unpaired_read_duplicates + 2 * self.read_pair_duplicates;
            self.percent_duplication = duplicates as f64 / examined as f64;
        }

        self.estimated_library_size = estimate_library_size(
            self.read_pairs_examined - self.read_pair_optical_duplicates,
            self.read_pairs_examined - self.read_pair_duplicates,
        );
    }
}

/// Estimates the size of a library based on the number of paired end
/// molecules observed and the number of unique pairs observed.
///
/// Solves `c = n * (1 - exp(-t/n))` for the library size `n`, where `t` is
/// the number of read pairs and `c` the number of distinct fragments
/// observed, by bisection on `f(x) = c/x - 1 + exp(-t/x)`.
#[must_use]
pub fn estimate_library_size(read_pairs: u64, unique_read_pairs: u64) -> Option<u64> {
    let read_pair_duplicates = read_pairs.saturating_sub(unique_read_pairs);
    if read_pairs == 0 || read_pair_duplicates == 0 || unique_read_pairs >= read_pairs {
        return None;
    }

    fn f(x: f64, c: f64, n: f64) -> f64 {
        c / x - 1.0 + (-n / x).exp()
    }

    let c = unique_read_pairs as f64;
    let n = read_pairs as f64;

    let mut m = 1.0f64;
    let mut big_m = 100.0f64;

    if f(m * c, c, n) < 0.0 {
        return None;
    }

    while f(big_m * c, c, n) >= 0.0 {
        big_m *= 10.0;
    }

    for _ in 0..40 {
        let r = (m + big_m) / 2.0;
        let u = f(r * c, c, n);
        if u == 0.0 {
            break;
        } else if u > 0.0 {
            m = r;
        } else {
            big_m = r;
        }
    }

    Some((c * (m + big_m) / 2.0) as u64)
}
