//! Pass 1: streams the input once and builds the two sorted signature
//! collections.
//!
//! Every primary mapped read yields a fragment signature. Paired reads with a
//! mapped mate additionally participate in the pair protocol: the first end
//! seen is parked in the unmatched-mate map under the *mate's* reference
//! index; when the second end arrives the two are combined into a single pair
//! signature with the genomically earlier end as read1.
//!
//! Under queryname ordering all records of a template share one file index
//! (the index of the first record carrying the name), which is what lets the
//! third pass propagate duplicate flags to mates and supplementary records.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::info;
use murmur3::murmur3_32;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;

use crate::bam_io::AlignmentReader;
use crate::ends_map::DiskReadEndsMap;
use crate::library::{LibraryIdGenerator, read_group_id};
use crate::optical::OpticalDuplicateFinder;
use crate::progress::ProgressTracker;
use crate::read_ends::{NO_REFERENCE_INDEX, ReadEnds, ReadEndsCodec, orientation, pair_orientation};
use crate::sam::record_utils::{reference_length, unclipped_end, unclipped_start};
use crate::sort::SortingCollection;

/// Per-end scores are clamped so the sum over a pair cannot overflow the
/// signature's 16-bit score field.
const MAX_SCORE_PER_END: u32 = (i16::MAX / 2) as u32;

/// How a read's duplicate score is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScoringStrategy {
    /// Sum of those base qualities that are at least 15.
    SumOfBaseQualities,
    /// Number of reference bases covered by the alignment.
    TotalMappedReferenceLength,
}

/// Computes the duplicate score of a single read end.
#[must_use]
pub fn compute_duplicate_score(record: &RecordBuf, strategy: ScoringStrategy) -> u16 {
    let score = match strategy {
        ScoringStrategy::SumOfBaseQualities => record
            .quality_scores()
            .as_ref()
            .iter()
            .filter(|&&q| q >= 15)
            .map(|&q| u32::from(q))
            .sum(),
        ScoringStrategy::TotalMappedReferenceLength => {
            if record.flags().is_unmapped() {
                0
            } else {
                reference_length(record.cigar().as_ref()) as u32
            }
        }
    };
    score.min(MAX_SCORE_PER_END) as u16
}

/// Barcode tags to fold into signature comparability, when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarcodeTags {
    pub barcode: Option<Tag>,
    pub read_one: Option<Tag>,
    pub read_two: Option<Tag>,
}

impl BarcodeTags {
    /// True if any barcode tag is configured.
    #[must_use]
    pub fn any(&self) -> bool {
        self.barcode.is_some() || self.read_one.is_some() || self.read_two.is_some()
    }
}

/// Stable hash of a record's barcode tag value, or 0 when absent.
#[must_use]
pub fn barcode_value(record: &RecordBuf, tag: Option<Tag>) -> u32 {
    let Some(tag) = tag else { return 0 };
    match record.data().get(&tag) {
        Some(Value::String(bytes)) => murmur3_32(&mut Cursor::new(bytes.as_slice()), 42).unwrap_or(0),
        _ => 0,
    }
}

/// Configuration for the signature-building pass.
pub struct Pass1Config {
    pub queryname_sorted: bool,
    pub scoring_strategy: ScoringStrategy,
    pub barcode_tags: BarcodeTags,
    pub tag_representative_read: bool,
    /// In-memory record budget per signature sorter.
    pub max_records_in_ram: usize,
    /// In-memory entry budget for the unmatched-mate map.
    pub max_map_entries_in_ram: usize,
    /// Open spill-file quota for the unmatched-mate map.
    pub max_file_handles: usize,
    pub temp_dirs: Vec<PathBuf>,
}

impl Pass1Config {
    /// The signature codec implied by this configuration.
    #[must_use]
    pub fn codec(&self) -> ReadEndsCodec {
        ReadEndsCodec {
            with_barcodes: self.barcode_tags.any(),
            with_read_name: self.tag_representative_read,
        }
    }
}

/// The sorted signature collections produced by Pass 1.
pub struct Pass1Output {
    pub pair_sort: SortingCollection<ReadEnds, ReadEndsCodec>,
    pub frag_sort: SortingCollection<ReadEnds, ReadEndsCodec>,
    pub records_read: u64,
    pub unmatched_pairs: u64,
}

/// Builds a signature for a single read end.
fn build_read_ends(
    record: &RecordBuf,
    index: u64,
    libraries: &mut LibraryIdGenerator,
    optical_finder: Option<&OpticalDuplicateFinder>,
    config: &Pass1Config,
) -> ReadEnds {
    let flags = record.flags();
    let negative = flags.is_reverse_complemented();

    let mut ends = ReadEnds {
        library_id: libraries.library_id(record),
        read1_reference_index: record.reference_sequence_id().map_or(NO_REFERENCE_INDEX, |i| i as i32),
        read1_coordinate: if negative {
            unclipped_end(record).unwrap_or(-1) as i32
        } else {
            unclipped_start(record).unwrap_or(-1) as i32
        },
        orientation: if negative { orientation::R } else { orientation::F },
        read1_index_in_file: index,
        read2_index_in_file: index,
        score: compute_duplicate_score(record, config.scoring_strategy),
        ..ReadEnds::default()
    };

    // Lets the ends object know that it's part of a pair.
    if flags.is_segmented() && !flags.is_mate_unmapped() {
        ends.read2_reference_index =
            record.mate_reference_sequence_id().map_or(NO_REFERENCE_INDEX, |i| i as i32);
    }

    if let Some(finder) = optical_finder {
        let name = record.name().map(|n| n.to_vec()).unwrap_or_default();
        if finder.add_location_information(&name, &mut ends) {
            ends.read_group = libraries.read_group_ordinal(record);
        }
    }

    if config.barcode_tags.any() {
        ends.barcode = barcode_value(record, config.barcode_tags.barcode);
        if !flags.is_segmented() || flags.is_first_segment() {
            ends.read_one_barcode = barcode_value(record, config.barcode_tags.read_one);
        } else {
            ends.read_two_barcode = barcode_value(record, config.barcode_tags.read_two);
        }
    }

    ends
}

/// Streams the input, emitting fragment and pair signatures into external
/// sorters. Both sorters are `done_adding` when this returns.
///
/// # Errors
///
/// Fails on unreadable records, unwritable temp directories, or spill errors;
/// any such failure aborts the pipeline.
pub fn build_sorted_read_ends(
    reader: &mut AlignmentReader,
    header: &Header,
    libraries: &mut LibraryIdGenerator,
    optical_finder: Option<&OpticalDuplicateFinder>,
    config: &Pass1Config,
) -> Result<Pass1Output> {
    let codec = config.codec();
    let mut pair_sort = SortingCollection::new(codec, config.max_records_in_ram, &config.temp_dirs)
        .context("Failed to create pair signature sorter")?;
    let mut frag_sort = SortingCollection::new(codec, config.max_records_in_ram, &config.temp_dirs)
        .context("Failed to create fragment signature sorter")?;
    let mut ends_map = DiskReadEndsMap::new(
        codec,
        config.max_map_entries_in_ram,
        config.max_file_handles,
        &config.temp_dirs,
    )
    .context("Failed to create unmatched-mate map")?;

    let mut index: u64 = 0;
    let mut query_name: Vec<u8> = Vec::new();
    let mut query_name_index: u64 = 0;
    let mut progress = ProgressTracker::new("Read");
    let mut record = RecordBuf::default();

    loop {
        let bytes_read = reader
            .read_record_buf(header, &mut record)
            .with_context(|| format!("Failed to read record at index {index}"))?;
        if bytes_read == 0 {
            break;
        }

        // Under queryname ordering, every record of a template uses the file
        // index of the first record carrying the name.
        if config.queryname_sorted {
            let name: &[u8] = record.name().map(|n| n.as_ref()).unwrap_or_default();
            if name != query_name.as_slice() {
                query_name.clear();
                query_name.extend_from_slice(name);
                query_name_index = index;
            }
        }

        let flags = record.flags();
        if flags.is_unmapped() {
            if record.reference_sequence_id().is_none() && !config.queryname_sorted {
                // Trailing unmapped block under coordinate ordering: nothing
                // left in the stream can produce a signature.
                break;
            }
            // Unmapped but interleaved with mapped reads: skip.
        } else if !flags.is_secondary() && !flags.is_supplementary() {
            let index_for_read = if config.queryname_sorted { query_name_index } else { index };
            let fragment_end =
                build_read_ends(&record, index_for_read, libraries, optical_finder, config);

            if flags.is_segmented() && !flags.is_mate_unmapped() {
                let rg = read_group_id(&record)
                    .map(|id| String::from_utf8_lossy(id).to_string())
                    .unwrap_or_default();
                let name = record
                    .name()
                    .map(|n| String::from_utf8_lossy(n).to_string())
                    .unwrap_or_default();
                let key = format!("{rg}:{name}");

                match ends_map.remove(fragment_end.read1_reference_index, &key)? {
                    None => {
                        // First end of the pair: park it under the mate's
                        // reference index until the mate shows up.
                        let partial = fragment_end.clone();
                        ends_map.put(partial.read2_reference_index, key, partial)?;
                    }
                    Some(mut paired) => {
                        let sequence = fragment_end.read1_reference_index;
                        let coordinate = fragment_end.read1_coordinate;
                        let negative = flags.is_reverse_complemented();

                        if config.tag_representative_read {
                            paired.first_encountered_read_name =
                                record.name().map(bstr::BString::from);
                        }

                        // The optical orientation always leads with the
                        // first-of-pair strand; compute it before the ends
                        // are possibly swapped below.
                        if flags.is_first_segment() {
                            paired.orientation_for_optical =
                                pair_orientation(negative, paired.orientation == orientation::R);
                            if config.barcode_tags.any() {
                                paired.read_one_barcode =
                                    barcode_value(&record, config.barcode_tags.read_one);
                            }
                        } else {
                            paired.orientation_for_optical =
                                pair_orientation(paired.orientation == orientation::R, negative);
                            if config.barcode_tags.any() {
                                paired.read_two_barcode =
                                    barcode_value(&record, config.barcode_tags.read_two);
                            }
                        }

                        // If the second end is genomically later, it becomes
                        // read2; otherwise the stored end's fields shift to
                        // the read2 slots and this end takes read1.
                        if sequence > paired.read1_reference_index
                            || (sequence == paired.read1_reference_index
                                && coordinate >= paired.read1_coordinate)
                        {
                            paired.read2_reference_index = sequence;
                            paired.read2_coordinate = coordinate;
                            paired.read2_index_in_file = index_for_read;
                            paired.orientation =
                                pair_orientation(paired.orientation == orientation::R, negative);
                        } else {
                            paired.read2_reference_index = paired.read1_reference_index;
                            paired.read2_coordinate = paired.read1_coordinate;
                            paired.read2_index_in_file = paired.read1_index_in_file;
                            paired.read1_reference_index = sequence;
                            paired.read1_coordinate = coordinate;
                            paired.read1_index_in_file = index_for_read;
                            paired.orientation =
                                pair_orientation(negative, paired.orientation == orientation::R);
                        }

                        paired.score = paired.score.saturating_add(fragment_end.score);
                        pair_sort.add(paired)?;
                    }
                }
            }

            frag_sort.add(fragment_end)?;
        }

        index += 1;
        if progress.record() {
            info!(
                "Tracking {} as yet unmatched pairs. {} records in RAM.",
                ends_map.size(),
                ends_map.size_in_ram()
            );
        }
    }

    let unmatched_pairs = ends_map.size() as u64;
    info!("Read {index} records. {unmatched_pairs} pairs never matched.");

    pair_sort.done_adding()?;
    frag_sort.done_adding()?;

    Ok(Pass1Output { pair_sort, frag_sort, records_read: index, unmatched_pairs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bam_io::open_alignment_reader;
    use crate::sam::builder::{SamBuilder, Strand};
    use tempfile::TempDir;

    fn config(queryname_sorted: bool) -> Pass1Config {
        Pass1Config {
            queryname_sorted,
            scoring_strategy: ScoringStrategy::SumOfBaseQualities,
            barcode_tags: BarcodeTags::default(),
            tag_representative_read: false,
            max_records_in_ram: 1000,
            max_map_entries_in_ram: 1000,
            max_file_handles: 8,
            temp_dirs: Vec::new(),
        }
    }

    struct Pass1Summary {
        records_read: u64,
        unmatched_pairs: u64,
    }

    fn run_pass1(
        builder: &SamBuilder,
        queryname_sorted: bool,
    ) -> (Pass1Summary, Vec<ReadEnds>, Vec<ReadEnds>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.bam");
        builder.write_bam(&path).unwrap();

        let (mut reader, header) = open_alignment_reader(&path).unwrap();
        let mut libraries = LibraryIdGenerator::from_header(&header);
        let output = build_sorted_read_ends(
            &mut reader,
            &header,
            &mut libraries,
            None,
            &config(queryname_sorted),
        )
        .unwrap();

        let summary = Pass1Summary {
            records_read: output.records_read,
            unmatched_pairs: output.unmatched_pairs,
        };
        let pair_items: Vec<ReadEnds> =
            output.pair_sort.into_sorted_iter().unwrap().map(Result::unwrap).collect();
        let frag_items: Vec<ReadEnds> =
            output.frag_sort.into_sorted_iter().unwrap().map(Result::unwrap).collect();
        (summary, pair_items, frag_items)
    }

    #[test]
    fn test_score_sums_qualities_of_at_least_15() {
        let record = crate::sam::builder::RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTA")
            .qualities(&[10, 15, 20, 14, 30])
            .build();
        // 15 + 20 + 30; the 10 and 14 fall below the threshold
        assert_eq!(compute_duplicate_score(&record, ScoringStrategy::SumOfBaseQualities), 65);
    }

    #[test]
    fn test_score_total_mapped_reference_length() {
        let record = crate::sam::builder::RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .cigar("2S8M")
            .build();
        assert_eq!(compute_duplicate_score(&record, ScoringStrategy::TotalMappedReferenceLength), 8);
    }

    #[test]
    fn test_pair_produces_one_pair_and_two_fragment_signatures() {
        let mut builder = SamBuilder::new();
        builder.add_pair().name("p1").contig(0).start1(100).start2(300).build();

        let (output, pairs, frags) = run_pass1(&builder, false);
        assert_eq!(output.records_read, 2);
        assert_eq!(output.unmatched_pairs, 0);
        assert_eq!(pairs.len(), 1);
        assert_eq!(frags.len(), 2);

        let pair = &pairs[0];
        assert_eq!(pair.orientation, orientation::FR);
        assert_eq!(pair.read1_index_in_file, 0);
        assert_eq!(pair.read2_index_in_file, 1);
        // read1 is the genomically earlier end
        assert!(
            (pair.read1_reference_index, pair.read1_coordinate)
                <= (pair.read2_reference_index, pair.read2_coordinate)
        );
        // both fragment signatures know their mate is mapped
        assert!(frags.iter().all(ReadEnds::is_paired));
    }

    #[test]
    fn test_pair_score_sums_both_ends() {
        let mut builder = SamBuilder::new().read_length(10);
        builder.add_pair().name("p1").contig(0).start1(100).start2(300).base_quality(20).build();

        let (_, pairs, _) = run_pass1(&builder, false);
        // 10 bases * 20 per end, summed over both ends
        assert_eq!(pairs[0].score, 400);
    }

    #[test]
    fn test_reverse_strand_uses_unclipped_end() {
        let mut builder = SamBuilder::new().read_length(10);
        builder
            .add_frag()
            .name("f1")
            .contig(0)
            .start(100)
            .strand(Strand::Minus)
            .cigar("8M2S")
            .build();

        let (_, _, frags) = run_pass1(&builder, false);
        // alignment end 107 plus 2 trailing soft-clipped bases
        assert_eq!(frags[0].read1_coordinate, 109);
        assert_eq!(frags[0].orientation, orientation::R);
    }

    #[test]
    fn test_secondary_and_supplementary_produce_no_signatures() {
        use noodles::sam::alignment::record::Flags;

        let mut builder = SamBuilder::new();
        builder.add_frag().name("f1").contig(0).start(100).build();
        builder
            .add_frag()
            .name("f1")
            .contig(0)
            .start(500)
            .extra_flags(Flags::SECONDARY)
            .build();
        builder
            .add_frag()
            .name("f1")
            .contig(1)
            .start(900)
            .extra_flags(Flags::SUPPLEMENTARY)
            .build();

        let (output, pairs, frags) = run_pass1(&builder, false);
        assert_eq!(output.records_read, 3);
        assert_eq!(pairs.len(), 0);
        assert_eq!(frags.len(), 1);
    }

    #[test]
    fn test_trailing_unmapped_block_stops_coordinate_pass() {
        let mut builder = SamBuilder::new();
        builder.add_frag().name("f1").contig(0).start(100).build();
        builder.add_frag().name("u1").unmapped().build();
        builder.add_frag().name("u2").unmapped().build();

        let (output, _, frags) = run_pass1(&builder, false);
        // the loop stops at the first no-reference unmapped record
        assert_eq!(output.records_read, 1);
        assert_eq!(frags.len(), 1);
    }

    #[test]
    fn test_queryname_ordering_shares_first_index() {
        let mut builder = SamBuilder::new().sort_order("queryname");
        builder.add_pair().name("p1").contig(0).start1(100).start2(300).build();

        let (_, pairs, _) = run_pass1(&builder, true);
        assert_eq!(pairs[0].read1_index_in_file, 0);
        assert_eq!(pairs[0].read2_index_in_file, 0);
    }

    #[test]
    fn test_interleaved_unmapped_records_are_skipped() {
        let mut builder = SamBuilder::new().sort_order("queryname");
        builder.add_frag().name("u0").unmapped().build();
        builder.add_frag().name("f1").contig(0).start(100).build();

        let (output, _, frags) = run_pass1(&builder, true);
        assert_eq!(output.records_read, 2);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].read1_index_in_file, 1);
    }

    #[test]
    fn test_unmatched_pair_is_reported() {
        let mut builder = SamBuilder::new();
        builder.add_pair().name("p1").contig(0).start1(100).start2(300).build();
        // Keep only R1 so its mate never appears in the stream.
        let mut orphaned = SamBuilder::new();
        orphaned.push_record(builder.records()[0].clone());

        let (output, pairs, _) = run_pass1(&orphaned, false);
        assert_eq!(pairs.len(), 0);
        assert_eq!(output.unmatched_pairs, 1);
    }
}
