//! Physical-location parsing and optical (sequencing) duplicate discovery.
//!
//! Read names on Illumina-style instruments embed the flowcell tile and pixel
//! coordinates of the cluster. Duplicates whose clusters sit within a small
//! pixel distance of each other arose from the sequencing process rather than
//! library preparation, and are classified separately.

use std::cell::Cell;

use log::warn;
use regex::bytes::Regex;

use crate::errors::{FgdupError, Result};
use crate::read_ends::ReadEnds;

/// Default pixel distance within which two clusters are considered optical
/// duplicates of one another.
pub const DEFAULT_OPTICAL_DUPLICATE_PIXEL_DISTANCE: i32 = 100;

/// Sentinel accepted by `--read-name-regex` selecting the optimized parser.
pub const DEFAULT_READ_NAME_REGEX: &str = "default";

/// Sentinel accepted by `--read-name-regex` disabling optical discovery.
pub const NO_READ_NAME_REGEX: &str = "none";

/// Extracts (tile, x, y) from read names.
pub enum ReadNameParser {
    /// Fast path for standard Illumina names: the last three `:`-separated
    /// fields are tile, x and y. Handles both 5- and 7-field layouts.
    Optimized,
    /// User-supplied pattern with three capture groups for tile, x and y.
    Pattern(Regex),
}

impl ReadNameParser {
    /// Builds a parser from the `--read-name-regex` option value.
    ///
    /// Returns `None` for the "none" sentinel (optical discovery disabled).
    ///
    /// # Errors
    ///
    /// Fails on an invalid pattern or one without three capture groups.
    pub fn from_option(value: &str) -> Result<Option<Self>> {
        match value {
            NO_READ_NAME_REGEX => Ok(None),
            DEFAULT_READ_NAME_REGEX => Ok(Some(Self::Optimized)),
            pattern => {
                let regex = Regex::new(pattern).map_err(|e| FgdupError::InvalidParameter {
                    parameter: "read-name-regex".to_string(),
                    reason: e.to_string(),
                })?;
                if regex.captures_len() < 4 {
                    return Err(FgdupError::InvalidParameter {
                        parameter: "read-name-regex".to_string(),
                        reason: "pattern must have three capture groups (tile, x, y)".to_string(),
                    });
                }
                Ok(Some(Self::Pattern(regex)))
            }
        }
    }

    /// Parses (tile, x, y) out of a read name, or `None` if it does not match.
    #[must_use]
    pub fn read_location(&self, name: &[u8]) -> Option<(i16, i32, i32)> {
        match self {
            Self::Optimized => {
                let fields: Vec<&[u8]> = name.split(|&b| b == b':').collect();
                // Standard names have 5 or 7 fields; tile/x/y are the last 3.
                if fields.len() < 5 {
                    return None;
                }
                let n = fields.len();
                let tile = parse_i32(fields[n - 3])?;
                let x = parse_i32(fields[n - 2])?;
                let y = parse_i32(fields[n - 1])?;
                Some((i16::try_from(tile).ok()?, x, y))
            }
            Self::Pattern(regex) => {
                let captures = regex.captures(name)?;
                let tile = parse_i32(captures.get(1)?.as_bytes())?;
                let x = parse_i32(captures.get(2)?.as_bytes())?;
                let y = parse_i32(captures.get(3)?.as_bytes())?;
                Some((i16::try_from(tile).ok()?, x, y))
            }
        }
    }
}

fn parse_i32(bytes: &[u8]) -> Option<i32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Discovers optical duplicates within chunks of equivalent pair signatures.
pub struct OpticalDuplicateFinder {
    parser: ReadNameParser,
    pixel_distance: i32,
    warned: Cell<bool>,
}

impl OpticalDuplicateFinder {
    #[must_use]
    pub fn new(parser: ReadNameParser, pixel_distance: i32) -> Self {
        Self { parser, pixel_distance, warned: Cell::new(false) }
    }

    /// Parses the physical location out of `name` into `ends`.
    ///
    /// Returns `true` on success; on failure the signature keeps its sentinel
    /// location and a warning is logged once per run.
    pub fn add_location_information(&self, name: &[u8], ends: &mut ReadEnds) -> bool {
        match self.parser.read_location(name) {
            Some((tile, x, y)) => {
                ends.tile = tile;
                ends.x = x;
                ends.y = y;
                true
            }
            None => {
                if !self.warned.get() {
                    self.warned.set(true);
                    warn!(
                        "A physical location could not be parsed from read name '{}'; \
                         optical duplicate detection will be incomplete.",
                        String::from_utf8_lossy(name)
                    );
                }
                false
            }
        }
    }

    /// Flags optical duplicates among signatures already known to be library
    /// duplicates of one another.
    ///
    /// All entries must share one `orientation_for_optical` value (the caller
    /// splits mixed FR/RF chunks). `keeper` is the index of the chunk's
    /// chosen representative, if it is present in this slice; the keeper is
    /// never flagged. Duplicates may chain, so when a pair is within range
    /// the entry with the higher index is flagged, which transitively marks
    /// whole clusters.
    #[must_use]
    pub fn find_optical_duplicates(
        &self,
        ends: &[&ReadEnds],
        keeper: Option<usize>,
    ) -> Vec<bool> {
        let mut flags = vec![false; ends.len()];
        for i in 0..ends.len() {
            let lhs = ends[i];
            if !lhs.has_location() {
                continue;
            }
            for j in (i + 1)..ends.len() {
                if flags[j] {
                    continue;
                }
                let rhs = ends[j];
                if !rhs.has_location()
                    || lhs.read_group != rhs.read_group
                    || lhs.tile != rhs.tile
                {
                    continue;
                }
                if (lhs.x - rhs.x).abs() <= self.pixel_distance
                    && (lhs.y - rhs.y).abs() <= self.pixel_distance
                {
                    let flagged = if keeper == Some(j) { i } else { j };
                    flags[flagged] = true;
                }
            }
        }
        flags
    }
}
