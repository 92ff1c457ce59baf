//! Builders for creating test SAM/BAM records and files.
//!
//! This module provides a fluent API for constructing SAM/BAM records for
//! testing, modeled after fgbio's `SamBuilder`. Duplicate-marking tests need
//! tight control over positions, strands, clipping and base qualities, so the
//! builders default everything else.
//!
//! ## Builders
//!
//! - [`SamBuilder`]: Accumulates records, manages the header (including the
//!   `@HD SO` line) and writes BAM/SAM files
//! - [`RecordBuilder`]: Creates individual records without header management

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Result;
use bstr::BString;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::MappingQuality;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;
use noodles::sam::header::record::value::map::{ReadGroup, ReferenceSequence};

pub const DEFAULT_READ_LENGTH: usize = 100;
pub const DEFAULT_BASE_QUALITY: u8 = 30;
pub const DEFAULT_MAPQ: u8 = 60;
pub const DEFAULT_READ_GROUP_ID: &str = "A";
pub const DEFAULT_LIBRARY: &str = "LibraryA";
pub const DEFAULT_REFERENCE_LENGTH: usize = 200_000_000;

/// Strand orientation for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    #[must_use]
    pub fn is_negative(&self) -> bool {
        matches!(self, Strand::Minus)
    }
}

/// Parses a CIGAR string (e.g. "3S7M") into operations.
///
/// # Panics
///
/// Panics on malformed CIGAR strings; intended for test inputs only.
#[must_use]
pub fn parse_cigar(cigar: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut len = 0usize;
    for c in cigar.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + digit as usize;
        } else {
            let kind = match c {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => panic!("invalid CIGAR operation: {c}"),
            };
            ops.push(Op::new(kind, len));
            len = 0;
        }
    }
    ops
}

//////////////////////////////////////////////////////////////////////////////
// SamBuilder
//////////////////////////////////////////////////////////////////////////////

/// Accumulates test records and writes them to SAM/BAM files with a header
/// carrying reference sequences, read groups, and a sort-order declaration.
#[derive(Debug)]
pub struct SamBuilder {
    /// Value of the `@HD SO` field ("coordinate" or "queryname").
    sort_order: String,
    /// Read groups as (id, library) pairs.
    read_groups: Vec<(String, Option<String>)>,
    /// Accumulated records, in intended file order.
    records: Vec<RecordBuf>,
    read_length: usize,
    base_quality: u8,
    counter: u64,
}

impl Default for SamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SamBuilder {
    /// Creates a builder declaring coordinate sort order, with one read group
    /// ("A", library "LibraryA") and references chr1-chr8 of 200Mbp each.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sort_order: "coordinate".to_string(),
            read_groups: vec![(
                DEFAULT_READ_GROUP_ID.to_string(),
                Some(DEFAULT_LIBRARY.to_string()),
            )],
            records: Vec::new(),
            read_length: DEFAULT_READ_LENGTH,
            base_quality: DEFAULT_BASE_QUALITY,
            counter: 0,
        }
    }

    /// Sets the declared sort order ("coordinate" or "queryname").
    #[must_use]
    pub fn sort_order(mut self, sort_order: &str) -> Self {
        self.sort_order = sort_order.to_string();
        self
    }

    /// Adds a read group (id, optional library name).
    #[must_use]
    pub fn read_group(mut self, id: &str, library: Option<&str>) -> Self {
        self.read_groups.push((id.to_string(), library.map(str::to_string)));
        self
    }

    /// Sets the default read length for generated records.
    #[must_use]
    pub fn read_length(mut self, read_length: usize) -> Self {
        self.read_length = read_length;
        self
    }

    /// The accumulated records.
    #[must_use]
    pub fn records(&self) -> &[RecordBuf] {
        &self.records
    }

    /// Appends an already-built record.
    pub fn push_record(&mut self, record: RecordBuf) {
        self.records.push(record);
    }

    /// Starts building a mapped pair; `build()` adds both records.
    pub fn add_pair(&mut self) -> PairBuilder<'_> {
        PairBuilder::new(self)
    }

    /// Starts building a single-end read; `build()` adds the record.
    pub fn add_frag(&mut self) -> FragBuilder<'_> {
        FragBuilder::new(self)
    }

    /// Builds the header for the accumulated configuration.
    ///
    /// # Panics
    ///
    /// Panics if header maps fail validation; intended for test inputs only.
    #[must_use]
    pub fn header(&self) -> Header {
        let mut builder = Header::builder();

        for i in 1..=8 {
            let name = format!("chr{i}");
            let map =
                Map::<ReferenceSequence>::new(NonZeroUsize::new(DEFAULT_REFERENCE_LENGTH).unwrap());
            builder = builder.add_reference_sequence(BString::from(name), map);
        }

        for (id, library) in &self.read_groups {
            let rg = match library {
                Some(lib) => Map::<ReadGroup>::builder()
                    .insert(rg_tag::LIBRARY, BString::from(lib.as_str()))
                    .build()
                    .expect("valid read group"),
                None => Map::<ReadGroup>::default(),
            };
            builder = builder.add_read_group(BString::from(id.as_str()), rg);
        }

        let hd = Map::<noodles::sam::header::record::value::map::Header>::builder()
            .insert(header_tag::SORT_ORDER, BString::from(self.sort_order.as_str()))
            .build()
            .expect("valid header");
        builder = builder.set_header(hd);

        builder.build()
    }

    /// Writes the accumulated records to a BAM file.
    pub fn write_bam<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = self.header();
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = noodles::bam::io::Writer::new(file);
        writer.write_header(&header)?;
        for record in &self.records {
            writer.write_alignment_record(&header, record)?;
        }
        writer.finish(&header)?;
        Ok(())
    }

    /// Writes the accumulated records to a SAM file.
    pub fn write_sam<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = self.header();
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = noodles::sam::io::Writer::new(file);
        writer.write_header(&header)?;
        for record in &self.records {
            writer.write_alignment_record(&header, record)?;
        }
        Ok(())
    }

    fn next_name(&mut self) -> String {
        let name = format!("q{:04}", self.counter);
        self.counter += 1;
        name
    }

    fn bases(&self, n: usize) -> String {
        // Deterministic filler; content never affects duplicate detection.
        "ACGT".chars().cycle().take(n).collect()
    }
}

//////////////////////////////////////////////////////////////////////////////
// PairBuilder
//////////////////////////////////////////////////////////////////////////////

/// Builder for a mapped paired-end read pair.
pub struct PairBuilder<'a> {
    parent: &'a mut SamBuilder,
    name: Option<String>,
    read_group: String,
    contig: usize,
    contig2: Option<usize>,
    start1: usize,
    start2: usize,
    cigar1: Option<String>,
    cigar2: Option<String>,
    strand1: Strand,
    strand2: Strand,
    base_quality: Option<u8>,
    extra_flags: Flags,
    attrs: Vec<(String, BufValue)>,
}

impl<'a> PairBuilder<'a> {
    fn new(parent: &'a mut SamBuilder) -> Self {
        Self {
            parent,
            name: None,
            read_group: DEFAULT_READ_GROUP_ID.to_string(),
            contig: 0,
            contig2: None,
            start1: 100,
            start2: 300,
            cigar1: None,
            cigar2: None,
            strand1: Strand::Plus,
            strand2: Strand::Minus,
            base_quality: None,
            extra_flags: Flags::empty(),
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn read_group(mut self, id: &str) -> Self {
        self.read_group = id.to_string();
        self
    }

    #[must_use]
    pub fn contig(mut self, contig: usize) -> Self {
        self.contig = contig;
        self
    }

    #[must_use]
    pub fn contig2(mut self, contig: usize) -> Self {
        self.contig2 = Some(contig);
        self
    }

    #[must_use]
    pub fn start1(mut self, start: usize) -> Self {
        self.start1 = start;
        self
    }

    #[must_use]
    pub fn start2(mut self, start: usize) -> Self {
        self.start2 = start;
        self
    }

    #[must_use]
    pub fn cigar1(mut self, cigar: &str) -> Self {
        self.cigar1 = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn cigar2(mut self, cigar: &str) -> Self {
        self.cigar2 = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn strand1(mut self, strand: Strand) -> Self {
        self.strand1 = strand;
        self
    }

    #[must_use]
    pub fn strand2(mut self, strand: Strand) -> Self {
        self.strand2 = strand;
        self
    }

    /// Uniform base quality for both reads of the pair.
    #[must_use]
    pub fn base_quality(mut self, quality: u8) -> Self {
        self.base_quality = Some(quality);
        self
    }

    /// Extra flags OR-ed into both records.
    #[must_use]
    pub fn extra_flags(mut self, flags: Flags) -> Self {
        self.extra_flags = flags;
        self
    }

    /// Adds a tag to both reads.
    #[must_use]
    pub fn attr<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        self.attrs.push((tag.to_string(), value.into()));
        self
    }

    /// Builds the pair and appends both records to the parent builder.
    pub fn build(self) -> (RecordBuf, RecordBuf) {
        let name = self.name.unwrap_or_else(|| self.parent.next_name());
        let read_length = self.parent.read_length;
        let quality = self.base_quality.unwrap_or(self.parent.base_quality);
        let bases = self.parent.bases(read_length);
        let cigar1 = self.cigar1.unwrap_or_else(|| format!("{read_length}M"));
        let cigar2 = self.cigar2.unwrap_or_else(|| format!("{read_length}M"));
        let contig2 = self.contig2.unwrap_or(self.contig);

        let mut flags1 = Flags::SEGMENTED | Flags::FIRST_SEGMENT | self.extra_flags;
        let mut flags2 = Flags::SEGMENTED | Flags::LAST_SEGMENT | self.extra_flags;
        if self.strand1.is_negative() {
            flags1 |= Flags::REVERSE_COMPLEMENTED;
            flags2 |= Flags::MATE_REVERSE_COMPLEMENTED;
        }
        if self.strand2.is_negative() {
            flags2 |= Flags::REVERSE_COMPLEMENTED;
            flags1 |= Flags::MATE_REVERSE_COMPLEMENTED;
        }

        let build_one = |read_name: &str,
                         flags: Flags,
                         contig: usize,
                         start: usize,
                         cigar: &str,
                         mate_contig: usize,
                         mate_start: usize| {
            let mut record = RecordBuf::default();
            *record.name_mut() = Some(BString::from(read_name));
            *record.sequence_mut() = Sequence::from(bases.as_bytes().to_vec());
            *record.quality_scores_mut() = QualityScores::from(vec![quality; read_length]);
            *record.flags_mut() = flags;
            *record.reference_sequence_id_mut() = Some(contig);
            *record.alignment_start_mut() = Some(Position::try_from(start).unwrap());
            *record.cigar_mut() = parse_cigar(cigar).into_iter().collect();
            *record.mapping_quality_mut() = Some(MappingQuality::try_from(DEFAULT_MAPQ).unwrap());
            *record.mate_reference_sequence_id_mut() = Some(mate_contig);
            *record.mate_alignment_start_mut() = Some(Position::try_from(mate_start).unwrap());
            record
                .data_mut()
                .insert(Tag::READ_GROUP, BufValue::from(self.read_group.clone()));
            for (tag_str, value) in &self.attrs {
                if tag_str.len() == 2 {
                    let tag = Tag::from([tag_str.as_bytes()[0], tag_str.as_bytes()[1]]);
                    record.data_mut().insert(tag, value.clone());
                }
            }
            record
        };

        let first =
            build_one(&name, flags1, self.contig, self.start1, &cigar1, contig2, self.start2);
        let second =
            build_one(&name, flags2, contig2, self.start2, &cigar2, self.contig, self.start1);

        self.parent.records.push(first.clone());
        self.parent.records.push(second.clone());
        (first, second)
    }
}

//////////////////////////////////////////////////////////////////////////////
// FragBuilder
//////////////////////////////////////////////////////////////////////////////

/// Builder for a single-end (fragment) read.
pub struct FragBuilder<'a> {
    parent: &'a mut SamBuilder,
    name: Option<String>,
    read_group: String,
    contig: usize,
    start: Option<usize>,
    cigar: Option<String>,
    strand: Strand,
    base_quality: Option<u8>,
    extra_flags: Flags,
    attrs: Vec<(String, BufValue)>,
}

impl<'a> FragBuilder<'a> {
    fn new(parent: &'a mut SamBuilder) -> Self {
        Self {
            parent,
            name: None,
            read_group: DEFAULT_READ_GROUP_ID.to_string(),
            contig: 0,
            start: Some(100),
            cigar: None,
            strand: Strand::Plus,
            base_quality: None,
            extra_flags: Flags::empty(),
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn read_group(mut self, id: &str) -> Self {
        self.read_group = id.to_string();
        self
    }

    #[must_use]
    pub fn contig(mut self, contig: usize) -> Self {
        self.contig = contig;
        self
    }

    #[must_use]
    pub fn start(mut self, start: usize) -> Self {
        self.start = Some(start);
        self
    }

    /// Marks the read unmapped (no reference, no position).
    #[must_use]
    pub fn unmapped(mut self) -> Self {
        self.start = None;
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn strand(mut self, strand: Strand) -> Self {
        self.strand = strand;
        self
    }

    #[must_use]
    pub fn base_quality(mut self, quality: u8) -> Self {
        self.base_quality = Some(quality);
        self
    }

    /// Extra flags OR-ed into the record (e.g. supplementary or secondary).
    #[must_use]
    pub fn extra_flags(mut self, flags: Flags) -> Self {
        self.extra_flags = flags;
        self
    }

    #[must_use]
    pub fn attr<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        self.attrs.push((tag.to_string(), value.into()));
        self
    }

    /// Builds the read and appends it to the parent builder.
    pub fn build(self) -> RecordBuf {
        let name = self.name.unwrap_or_else(|| self.parent.next_name());
        let read_length = self.parent.read_length;
        let quality = self.base_quality.unwrap_or(self.parent.base_quality);
        let bases = self.parent.bases(read_length);

        let mut record = RecordBuf::default();
        *record.name_mut() = Some(BString::from(name));
        *record.sequence_mut() = Sequence::from(bases.into_bytes());
        *record.quality_scores_mut() = QualityScores::from(vec![quality; read_length]);

        let mut flags = self.extra_flags;
        if self.strand.is_negative() {
            flags |= Flags::REVERSE_COMPLEMENTED;
        }

        match self.start {
            Some(start) => {
                let cigar = self.cigar.unwrap_or_else(|| format!("{read_length}M"));
                *record.reference_sequence_id_mut() = Some(self.contig);
                *record.alignment_start_mut() = Some(Position::try_from(start).unwrap());
                *record.cigar_mut() = parse_cigar(&cigar).into_iter().collect();
                *record.mapping_quality_mut() =
                    Some(MappingQuality::try_from(DEFAULT_MAPQ).unwrap());
            }
            None => {
                flags |= Flags::UNMAPPED;
            }
        }
        *record.flags_mut() = flags;

        record.data_mut().insert(Tag::READ_GROUP, BufValue::from(self.read_group.clone()));
        for (tag_str, value) in &self.attrs {
            if tag_str.len() == 2 {
                let tag = Tag::from([tag_str.as_bytes()[0], tag_str.as_bytes()[1]]);
                record.data_mut().insert(tag, value.clone());
            }
        }

        self.parent.records.push(record.clone());
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// RecordBuilder
//////////////////////////////////////////////////////////////////////////////

/// Standalone builder for a single record, without header management.
pub struct RecordBuilder {
    name: Option<Vec<u8>>,
    flags: Flags,
    reference_sequence_id: Option<usize>,
    alignment_start: Option<usize>,
    mapping_quality: Option<u8>,
    cigar: Option<String>,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
    tags: Vec<(Tag, BufValue)>,
    mate_reference_sequence_id: Option<usize>,
    mate_alignment_start: Option<usize>,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            flags: Flags::empty(),
            reference_sequence_id: None,
            alignment_start: None,
            mapping_quality: Some(DEFAULT_MAPQ),
            cigar: None,
            sequence: Vec::new(),
            qualities: Vec::new(),
            tags: Vec::new(),
            mate_reference_sequence_id: None,
            mate_alignment_start: None,
        }
    }

    /// Creates a builder pre-configured for a mapped read on reference 0.
    #[must_use]
    pub fn mapped_read() -> Self {
        Self { reference_sequence_id: Some(0), alignment_start: Some(100), ..Self::new() }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.as_bytes().to_vec());
        self
    }

    #[must_use]
    pub fn sequence(mut self, seq: &str) -> Self {
        self.sequence = seq.as_bytes().to_vec();
        if self.qualities.is_empty() {
            self.qualities = vec![DEFAULT_BASE_QUALITY; seq.len()];
        }
        self
    }

    #[must_use]
    pub fn qualities(mut self, quals: &[u8]) -> Self {
        self.qualities = quals.to_vec();
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn paired(mut self, paired: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, paired);
        self
    }

    #[must_use]
    pub fn first_segment(mut self, is_first: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.flags.set(Flags::FIRST_SEGMENT, is_first);
        if !is_first {
            self.flags.set(Flags::LAST_SEGMENT, true);
        }
        self
    }

    #[must_use]
    pub fn unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::UNMAPPED, unmapped);
        self
    }

    #[must_use]
    pub fn mate_unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::MATE_UNMAPPED, unmapped);
        self
    }

    #[must_use]
    pub fn reverse_complement(mut self, reverse: bool) -> Self {
        self.flags.set(Flags::REVERSE_COMPLEMENTED, reverse);
        self
    }

    #[must_use]
    pub fn secondary(mut self, secondary: bool) -> Self {
        self.flags.set(Flags::SECONDARY, secondary);
        self
    }

    #[must_use]
    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.flags.set(Flags::SUPPLEMENTARY, supplementary);
        self
    }

    #[must_use]
    pub fn reference_sequence_id(mut self, id: usize) -> Self {
        self.reference_sequence_id = Some(id);
        self
    }

    #[must_use]
    pub fn alignment_start(mut self, pos: usize) -> Self {
        self.alignment_start = Some(pos);
        self
    }

    #[must_use]
    pub fn mapping_quality(mut self, mapq: u8) -> Self {
        self.mapping_quality = Some(mapq);
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn mate_reference_sequence_id(mut self, id: usize) -> Self {
        self.mate_reference_sequence_id = Some(id);
        self
    }

    #[must_use]
    pub fn mate_alignment_start(mut self, pos: usize) -> Self {
        self.mate_alignment_start = Some(pos);
        self
    }

    /// Adds a SAM tag.
    #[must_use]
    pub fn tag<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        let tag_bytes = tag.as_bytes();
        if tag_bytes.len() == 2 {
            let tag = Tag::from([tag_bytes[0], tag_bytes[1]]);
            self.tags.push((tag, value.into()));
        }
        self
    }

    /// Builds the record.
    ///
    /// # Panics
    ///
    /// Panics on invalid positions or mapping qualities; intended for test
    /// inputs only.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let mut record = RecordBuf::default();

        if let Some(name) = self.name {
            *record.name_mut() = Some(BString::from(name));
        }
        *record.flags_mut() = self.flags;
        *record.sequence_mut() = Sequence::from(self.sequence.clone());
        *record.quality_scores_mut() = QualityScores::from(self.qualities);

        if !self.flags.is_unmapped() {
            if let Some(id) = self.reference_sequence_id {
                *record.reference_sequence_id_mut() = Some(id);
            }
            if let Some(start) = self.alignment_start {
                *record.alignment_start_mut() = Some(Position::try_from(start).unwrap());
            }
            let cigar = self.cigar.unwrap_or_else(|| format!("{}M", self.sequence.len()));
            *record.cigar_mut() = parse_cigar(&cigar).into_iter().collect();
            if let Some(mapq) = self.mapping_quality {
                *record.mapping_quality_mut() = Some(MappingQuality::try_from(mapq).unwrap());
            }
        }

        if let Some(id) = self.mate_reference_sequence_id {
            *record.mate_reference_sequence_id_mut() = Some(id);
        }
        if let Some(start) = self.mate_alignment_start {
            *record.mate_alignment_start_mut() = Some(Position::try_from(start).unwrap());
        }

        for (tag, value) in self.tags {
            record.data_mut().insert(tag, value);
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_builder_sets_mate_fields() {
        let mut builder = SamBuilder::new();
        let (r1, r2) = builder.add_pair().name("p1").contig(0).start1(100).start2(300).build();

        assert_eq!(r1.name().map(|n| n.to_vec()), Some(b"p1".to_vec()));
        assert!(r1.flags().is_first_segment());
        assert!(r2.flags().is_last_segment());
        assert!(r2.flags().is_reverse_complemented());
        assert!(r1.flags().is_mate_reverse_complemented());
        assert_eq!(r1.mate_alignment_start().map(usize::from), Some(300));
        assert_eq!(builder.records().len(), 2);
    }

    #[test]
    fn test_frag_builder_unmapped() {
        let mut builder = SamBuilder::new();
        let frag = builder.add_frag().name("u1").unmapped().build();
        assert!(frag.flags().is_unmapped());
        assert!(frag.reference_sequence_id().is_none());
    }

    #[test]
    fn test_header_carries_sort_order_and_library() {
        let builder = SamBuilder::new().sort_order("queryname");
        let header = builder.header();
        let hd = header.header().expect("@HD present");
        let so = hd.other_fields().get(&header_tag::SORT_ORDER).expect("SO present");
        assert_eq!(so.as_slice(), b"queryname");
        assert_eq!(header.read_groups().len(), 1);
    }

    #[test]
    fn test_parse_cigar() {
        let ops = parse_cigar("3S7M2I");
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], Op::new(Kind::SoftClip, 3));
        assert_eq!(ops[1], Op::new(Kind::Match, 7));
        assert_eq!(ops[2], Op::new(Kind::Insertion, 2));
    }
}
