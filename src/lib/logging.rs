//! Logging utilities for formatted output.
//!
//! This module provides consistent, user-friendly logging utilities for counts,
//! durations and operation summaries.

use std::time::{Duration, Instant};

use log::info;

/// Formats a count with thousands separators.
///
/// # Examples
///
/// ```
/// use fgdup_lib::logging::format_count;
///
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// assert_eq!(format_count(42), "42");
/// ```
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a duration in human-readable form.
///
/// # Examples
///
/// ```
/// use fgdup_lib::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(135)), "2m 15s");
/// assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        if remaining_secs == 0 { format!("{mins}m") } else { format!("{mins}m {remaining_secs}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Times a long-running operation and logs a completion summary.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Starts timing the named operation.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Logs the elapsed time together with a records-processed count.
    pub fn log_completion(&self, records: u64) {
        let elapsed = self.start.elapsed();
        info!(
            "{} complete: {} records in {}",
            self.name,
            format_count(records),
            format_duration(elapsed)
        );
    }
}
