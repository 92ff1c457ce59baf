//! Library resolution and per-library accounting.
//!
//! Duplicate calling is scoped per library: every read resolves through its
//! `RG` tag to a library name (from the header's `@RG LB` fields), and each
//! library gets a compact integer id for use inside signatures, a metrics
//! row, and an optical-duplicate cluster count.

use std::collections::BTreeMap;

use ahash::AHashMap;
use bstr::BString;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;

use crate::metrics::DuplicationMetrics;

/// Library name used for reads without a resolvable read group or library.
pub const UNKNOWN_LIBRARY: &str = "Unknown Library";

/// Returns the record's `RG` tag value, if any.
#[must_use]
pub fn read_group_id(record: &RecordBuf) -> Option<&BString> {
    match record.data().get(&Tag::READ_GROUP) {
        Some(Value::String(id)) => Some(id),
        _ => None,
    }
}

/// Resolves read groups to libraries and owns the per-library stores.
pub struct LibraryIdGenerator {
    /// Read-group id -> library name, from the header.
    rg_to_library: AHashMap<String, String>,
    /// Read-group id -> ordinal position of the @RG line in the header.
    rg_ordinals: AHashMap<String, u16>,
    /// Library name -> compact id, assigned on first sight.
    library_ids: AHashMap<String, u16>,
    next_library_id: u16,
    /// Per-library metrics, keyed by library name (sorted for stable output).
    metrics_by_library: BTreeMap<String, DuplicationMetrics>,
    /// Per-library-id count of optical duplicates discovered.
    optical_duplicates_by_library_id: AHashMap<u16, u64>,
}

impl LibraryIdGenerator {
    /// Builds the read-group lookup tables from a header.
    #[must_use]
    pub fn from_header(header: &Header) -> Self {
        let mut rg_to_library = AHashMap::new();
        let mut rg_ordinals = AHashMap::new();

        for (ordinal, (id, rg)) in header.read_groups().iter().enumerate() {
            let id = String::from_utf8_lossy(id).to_string();
            if let Some(library) = rg.other_fields().get(&rg_tag::LIBRARY) {
                rg_to_library.insert(id.clone(), String::from_utf8_lossy(library).to_string());
            }
            rg_ordinals.insert(id, ordinal as u16);
        }

        Self {
            rg_to_library,
            rg_ordinals,
            library_ids: AHashMap::new(),
            next_library_id: 1,
            metrics_by_library: BTreeMap::new(),
            optical_duplicates_by_library_id: AHashMap::new(),
        }
    }

    /// The library name for a record, falling back to "Unknown Library".
    #[must_use]
    pub fn library_name(&self, record: &RecordBuf) -> &str {
        read_group_id(record)
            .and_then(|rg| self.rg_to_library.get(&String::from_utf8_lossy(rg).to_string()))
            .map_or(UNKNOWN_LIBRARY, String::as_str)
    }

    /// The compact id for a record's library, assigned on first sight.
    pub fn library_id(&mut self, record: &RecordBuf) -> u16 {
        let name = self.library_name(record).to_string();
        if let Some(&id) = self.library_ids.get(&name) {
            return id;
        }
        let id = self.next_library_id;
        self.next_library_id += 1;
        self.library_ids.insert(name, id);
        id
    }

    /// The ordinal of a record's read group in the header, or 0 when the
    /// record has no resolvable read group.
    #[must_use]
    pub fn read_group_ordinal(&self, record: &RecordBuf) -> u16 {
        read_group_id(record)
            .and_then(|rg| self.rg_ordinals.get(&String::from_utf8_lossy(rg).to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// The metrics row for a library, created on first access.
    pub fn metrics_mut(&mut self, library: &str) -> &mut DuplicationMetrics {
        self.metrics_by_library.entry(library.to_string()).or_insert_with(|| {
            DuplicationMetrics { library: library.to_string(), ..DuplicationMetrics::default() }
        })
    }

    /// Adds optical-duplicate clusters discovered for a library.
    pub fn add_optical_duplicates(&mut self, library_id: u16, count: u64) {
        *self.optical_duplicates_by_library_id.entry(library_id).or_insert(0) += count;
    }

    /// Total optical duplicates discovered across libraries.
    #[must_use]
    pub fn optical_duplicate_count(&self) -> u64 {
        self.optical_duplicates_by_library_id.values().sum()
    }

    /// Finalizes and returns the metrics rows in library-name order: pair
    /// counts are halved, optical counts are folded in, and the derived
    /// statistics are computed.
    #[must_use]
    pub fn finalize_metrics(mut self) -> Vec<DuplicationMetrics> {
        let mut rows = Vec::with_capacity(self.metrics_by_library.len());
        for (library, mut metrics) in std::mem::take(&mut self.metrics_by_library) {
            if let Some(&library_id) = self.library_ids.get(&library) {
                if let Some(&count) = self.optical_duplicates_by_library_id.get(&library_id) {
                    metrics.read_pair_optical_duplicates = count;
                }
            }
            metrics.calculate_derived_fields();
            rows.push(metrics);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::{RecordBuilder, SamBuilder};

    #[test]
    fn test_library_resolution_from_header() {
        let builder = SamBuilder::new().read_group("B", Some("LibraryB"));
        let generator = LibraryIdGenerator::from_header(&builder.header());

        let record = RecordBuilder::mapped_read().name("r").sequence("ACGT").tag("RG", "B").build();
        assert_eq!(generator.library_name(&record), "LibraryB");
        assert_eq!(generator.read_group_ordinal(&record), 1);
    }

    #[test]
    fn test_missing_read_group_is_unknown_library() {
        let builder = SamBuilder::new();
        let generator = LibraryIdGenerator::from_header(&builder.header());

        let record = RecordBuilder::mapped_read().name("r").sequence("ACGT").build();
        assert_eq!(generator.library_name(&record), UNKNOWN_LIBRARY);
        assert_eq!(generator.read_group_ordinal(&record), 0);
    }

    #[test]
    fn test_library_ids_are_stable_per_library() {
        let builder = SamBuilder::new().read_group("B", Some("LibraryB"));
        let mut generator = LibraryIdGenerator::from_header(&builder.header());

        let a = RecordBuilder::mapped_read().name("a").sequence("ACGT").tag("RG", "A").build();
        let b = RecordBuilder::mapped_read().name("b").sequence("ACGT").tag("RG", "B").build();

        let id_a = generator.library_id(&a);
        let id_b = generator.library_id(&b);
        assert_ne!(id_a, id_b);
        assert_eq!(generator.library_id(&a), id_a);
    }

    #[test]
    fn test_finalize_folds_in_optical_counts() {
        let builder = SamBuilder::new();
        let mut generator = LibraryIdGenerator::from_header(&builder.header());

        let record = RecordBuilder::mapped_read().name("r").sequence("ACGT").tag("RG", "A").build();
        let library_id = generator.library_id(&record);
        {
            let metrics = generator.metrics_mut("LibraryA");
            metrics.read_pairs_examined = 8;
            metrics.read_pair_duplicates = 4;
        }
        generator.add_optical_duplicates(library_id, 1);

        let rows = generator.finalize_metrics();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].read_pairs_examined, 4);
        assert_eq!(rows[0].read_pair_duplicates, 2);
        assert_eq!(rows[0].read_pair_optical_duplicates, 1);
    }
}
