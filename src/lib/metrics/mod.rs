//! Per-library duplication metrics and their TSV output.

pub mod duplication;

pub use duplication::{DuplicationMetrics, write_duplication_metrics};
