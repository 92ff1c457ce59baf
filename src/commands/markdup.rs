//! Duplicate marking command.
//!
//! Reads a coordinate- or queryname-sorted SAM/BAM file, identifies reads
//! originating from the same source fragment by their unclipped 5' positions
//! and strand orientations, and writes the input back out with duplicate
//! flags (and optional classification tags) set.
//!
//! # Algorithm
//!
//! 1. Stream the input once, collecting a 5'-end signature per primary
//!    mapped read and per completed mate pair into external sorters
//! 2. Traverse the sorted signatures, keep the highest-scoring member of
//!    each equivalence class, and record the file indices of the losers
//! 3. Stream the input again, flagging records whose index appears in the
//!    sorted duplicate-index streams
//!
//! # Output Modes
//!
//! - Mark only (default): set the duplicate flag (0x400) on losing reads
//! - Remove: exclude duplicates (or only sequencing duplicates) from output

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bstr::BString;
use bytesize::ByteSize;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value;

use fgdup_lib::bam_io::{
    SortOrder, create_alignment_writer, header_sort_order, open_alignment_reader,
};
use fgdup_lib::detect::{DetectConfig, generate_duplicate_indexes};
use fgdup_lib::errors::FgdupError;
use fgdup_lib::header::with_program_record;
use fgdup_lib::index_stream::{IndexCursor, RepresentativeCursor};
use fgdup_lib::library::LibraryIdGenerator;
use fgdup_lib::logging::OperationTimer;
use fgdup_lib::metrics::write_duplication_metrics;
use fgdup_lib::optical::{
    DEFAULT_OPTICAL_DUPLICATE_PIXEL_DISTANCE, DEFAULT_READ_NAME_REGEX, OpticalDuplicateFinder,
    ReadNameParser,
};
use fgdup_lib::pass1::{BarcodeTags, Pass1Config, ScoringStrategy, build_sorted_read_ends};
use fgdup_lib::progress::ProgressTracker;
use fgdup_lib::validation::{optional_string_to_tag, validate_file_exists};

use crate::commands::command::Command;

/// Memory footprint of one representative-info budget unit: two 8-byte
/// indices plus one fixed-length representative record.
const REPRESENTATIVE_UNIT_BYTES: u64 = 356;

/// Controls how duplicates are annotated in the `DT` optional tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaggingPolicy {
    /// Do not emit `DT` tags.
    DontTag,
    /// Tag only sequencing (optical) duplicates, with `DT:Z:SQ`.
    OpticalOnly,
    /// Tag sequencing duplicates with `DT:Z:SQ` and the rest with `DT:Z:LB`.
    All,
}

/// Duplicate marking command.
#[derive(Debug, Parser)]
#[command(
    name = "mark",
    about = "\x1b[38;5;151m[MARK]\x1b[0m  \x1b[36mIdentify and mark duplicate reads\x1b[0m",
    long_about = r#"
Identifies duplicate reads in a coordinate- or queryname-sorted SAM/BAM file.

Duplicates are read pairs (or unpaired reads) whose unclipped 5' positions and
strand orientations match; within each duplicate set the highest-scoring read
(by default, sum of base qualities) is kept unflagged. Reads clustered close
together on the flowcell are additionally classified as sequencing (optical)
duplicates, which drives the DT tag and the READ_PAIR_OPTICAL_DUPLICATES
metric.

When the input is queryname-sorted, unmapped mates, secondary and
supplementary records inherit the decision made for their primary records.
Under coordinate ordering only primary mapped records are flagged.
"#
)]
pub struct MarkDuplicates {
    /// Input SAM or BAM file (must be coordinate or queryname sorted)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output SAM or BAM file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Path to write per-library duplication metrics
    #[arg(short = 'm', long = "metrics")]
    pub metrics: PathBuf,

    /// Remove duplicates from the output instead of flagging them
    #[arg(long = "remove-duplicates", default_value = "false")]
    pub remove_duplicates: bool,

    /// Remove only sequencing (optical) duplicates from the output
    #[arg(long = "remove-sequencing-duplicates", default_value = "false")]
    pub remove_sequencing_duplicates: bool,

    /// How duplicates are annotated in the DT tag
    #[arg(long = "tagging-policy", value_enum, default_value = "dont-tag")]
    pub tagging_policy: TaggingPolicy,

    /// Tag each duplicate-set member with the representative read name (RR)
    /// and the set size (DS)
    #[arg(long = "tag-representative-read", default_value = "false")]
    pub tag_representative_read: bool,

    /// How the retained read of a duplicate set is chosen
    #[arg(long = "scoring-strategy", value_enum, default_value = "sum-of-base-qualities")]
    pub scoring_strategy: ScoringStrategy,

    /// Template barcode tag (e.g. BC); enables barcode-aware grouping
    #[arg(long = "barcode-tag")]
    pub barcode_tag: Option<String>,

    /// Read-one barcode tag (e.g. BX)
    #[arg(long = "read-one-barcode-tag")]
    pub read_one_barcode_tag: Option<String>,

    /// Read-two barcode tag (e.g. BX)
    #[arg(long = "read-two-barcode-tag")]
    pub read_two_barcode_tag: Option<String>,

    /// Regex with three capture groups (tile, x, y) for parsing physical
    /// locations out of read names; "default" selects the optimized parser
    /// for standard Illumina names, "none" disables optical-duplicate
    /// discovery entirely
    #[arg(long = "read-name-regex", default_value = DEFAULT_READ_NAME_REGEX)]
    pub read_name_regex: String,

    /// Maximum pixel distance between clusters considered optical duplicates
    #[arg(long = "optical-duplicate-pixel-distance", default_value_t = DEFAULT_OPTICAL_DUPLICATE_PIXEL_DISTANCE)]
    pub optical_duplicate_pixel_distance: i32,

    /// Memory ceiling used to size the in-memory buffers of the sorting
    /// collections (accepts e.g. "512MiB", "2GiB")
    #[arg(long = "max-memory", default_value = "1GiB")]
    pub max_memory: ByteSize,

    /// Fraction of the memory ceiling given to each signature sorter
    #[arg(long = "sorting-collection-size-ratio", default_value_t = 0.25)]
    pub sorting_collection_size_ratio: f64,

    /// Maximum spill files the unmatched-mate map may hold open
    #[arg(long = "max-file-handles", default_value_t = 8000)]
    pub max_file_handles: usize,

    /// Directories for temporary spill files (repeatable)
    #[arg(long = "tmp-dir")]
    pub tmp_dir: Vec<PathBuf>,
}

impl MarkDuplicates {
    fn barcode_tags(&self) -> Result<BarcodeTags> {
        Ok(BarcodeTags {
            barcode: optional_string_to_tag(self.barcode_tag.as_deref(), "barcode-tag")?,
            read_one: optional_string_to_tag(
                self.read_one_barcode_tag.as_deref(),
                "read-one-barcode-tag",
            )?,
            read_two: optional_string_to_tag(
                self.read_two_barcode_tag.as_deref(),
                "read-two-barcode-tag",
            )?,
        })
    }

    fn optical_finder(&self) -> Result<Option<OpticalDuplicateFinder>> {
        let parser = ReadNameParser::from_option(&self.read_name_regex)?;
        Ok(parser
            .map(|p| OpticalDuplicateFinder::new(p, self.optical_duplicate_pixel_distance)))
    }
}

impl Command for MarkDuplicates {
    fn execute(&self, command_line: &str) -> Result<()> {
        validate_file_exists(&self.input, "input alignment file")?;
        if !(0.0..=1.0).contains(&self.sorting_collection_size_ratio) {
            bail!(FgdupError::InvalidParameter {
                parameter: "sorting-collection-size-ratio".to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }

        let barcode_tags = self.barcode_tags()?;
        let optical_finder = self.optical_finder()?;
        let index_optical_duplicates = self.remove_sequencing_duplicates
            || self.tagging_policy != TaggingPolicy::DontTag;

        let timer = OperationTimer::new("Marking duplicates");

        info!("Input: {}", self.input.display());
        info!("Output: {}", self.output.display());
        info!("Metrics: {}", self.metrics.display());

        // Pass 1: build the sorted signature collections.
        let (mut reader, header) = open_alignment_reader(&self.input)?;
        let sort_order: SortOrder = match header_sort_order(&header) {
            Some(order) => order,
            None => bail!(FgdupError::UnsupportedSortOrder { found: "unknown".to_string() }),
        };
        info!("Reads are assumed to be ordered by: {sort_order}");

        let mut libraries = LibraryIdGenerator::from_header(&header);

        let pass1_config = Pass1Config {
            queryname_sorted: sort_order.is_queryname(),
            scoring_strategy: self.scoring_strategy,
            barcode_tags,
            tag_representative_read: self.tag_representative_read,
            max_records_in_ram: 0,
            max_map_entries_in_ram: 0,
            max_file_handles: self.max_file_handles,
            temp_dirs: self.tmp_dir.clone(),
        };
        let pass1_config = self.with_memory_budgets(pass1_config);

        info!("Reading input file and constructing read end information.");
        info!(
            "Will retain up to {} data points before spilling to disk.",
            pass1_config.max_records_in_ram
        );
        let pass1 = build_sorted_read_ends(
            &mut reader,
            &header,
            &mut libraries,
            optical_finder.as_ref(),
            &pass1_config,
        )?;

        // Pass 2: traverse the sorted signatures and emit index streams.
        let memory = self.max_memory.as_u64();
        let mut max_indexes_in_ram = ((memory as f64 * 0.25) / 8.0) as usize;
        if index_optical_duplicates {
            max_indexes_in_ram /= 2;
        }
        let max_representatives_in_ram = (memory / 4 / REPRESENTATIVE_UNIT_BYTES) as usize;

        let detect_config = DetectConfig {
            use_barcodes: pass1_config.codec().with_barcodes,
            tag_representative_read: self.tag_representative_read,
            index_optical_duplicates,
            max_indexes_in_ram,
            max_representatives_in_ram,
            temp_dirs: self.tmp_dir.clone(),
        };
        let indexes = generate_duplicate_indexes(
            pass1.pair_sort,
            pass1.frag_sort,
            &mut libraries,
            optical_finder.as_ref(),
            &detect_config,
        )?;

        info!("Marking {} records as duplicates.", indexes.num_duplicate_indices);
        if optical_finder.is_none() {
            warn!(
                "Skipped optical duplicate cluster discovery; library size estimation \
                 may be inaccurate!"
            );
        } else {
            info!("Found {} optical duplicate clusters.", libraries.optical_duplicate_count());
        }

        // Pass 3: re-stream the input, flagging and writing.
        let (mut reader, header) = open_alignment_reader(&self.input)?;
        let out_header =
            with_program_record(header.clone(), crate::version::VERSION.as_str(), command_line)?;
        let mut writer = create_alignment_writer(&self.output, &out_header)?;

        let queryname = sort_order.is_queryname();
        let mut duplicate_cursor = IndexCursor::new(indexes.duplicates, queryname)?;
        let mut optical_cursor = match indexes.opticals {
            Some(opticals) => Some(IndexCursor::new(opticals, queryname)?),
            None => None,
        };
        let mut representative_cursor = match indexes.representatives {
            Some(representatives) => Some(RepresentativeCursor::new(representatives, queryname)?),
            None => None,
        };

        let dt_tag = Tag::new(b'D', b'T');
        let rr_tag = Tag::new(b'R', b'R');
        let ds_tag = Tag::new(b'D', b'S');

        let mut progress = ProgressTracker::new("Written").with_interval(10_000_000);
        let mut index: u64 = 0;
        let mut record = RecordBuf::default();

        loop {
            let bytes_read = reader
                .read_record_buf(&header, &mut record)
                .with_context(|| format!("Failed to read record at index {index}"))?;
            if bytes_read == 0 {
                break;
            }

            let library = libraries.library_name(&record).to_string();
            let flags = record.flags();
            {
                let metrics = libraries.metrics_mut(&library);
                if flags.is_unmapped() {
                    metrics.unmapped_reads += 1;
                } else if flags.is_secondary() || flags.is_supplementary() {
                    metrics.secondary_or_supplementary_rds += 1;
                } else if !flags.is_segmented() || flags.is_mate_unmapped() {
                    metrics.unpaired_reads_examined += 1;
                } else {
                    // Counted once per end; halved at finalization.
                    metrics.read_pairs_examined += 1;
                }
            }

            let name: BString = record.name().map(BString::from).unwrap_or_default();
            let is_duplicate = duplicate_cursor.check(index, &name)?;

            if is_duplicate {
                *record.flags_mut() = flags | Flags::DUPLICATE;
                // Only decider reads update the duplicate counts, not
                // tag-along secondary/supplementary/unmapped records.
                if !flags.is_secondary() && !flags.is_supplementary() && !flags.is_unmapped() {
                    let metrics = libraries.metrics_mut(&library);
                    if !flags.is_segmented() || flags.is_mate_unmapped() {
                        metrics.unpaired_read_duplicates += 1;
                    } else {
                        metrics.read_pair_duplicates += 1;
                    }
                }
            } else {
                let mut cleared = flags;
                cleared.remove(Flags::DUPLICATE);
                *record.flags_mut() = cleared;
            }

            let is_optical_duplicate = match optical_cursor.as_mut() {
                Some(cursor) => cursor.check(index, &name)?,
                None => false,
            };

            record.data_mut().remove(&dt_tag);
            if self.tagging_policy != TaggingPolicy::DontTag && record.flags().is_duplicate() {
                if is_optical_duplicate {
                    record.data_mut().insert(dt_tag, Value::String(BString::from("SQ")));
                } else if self.tagging_policy == TaggingPolicy::All {
                    record.data_mut().insert(dt_tag, Value::String(BString::from("LB")));
                }
            }

            if let Some(cursor) = representative_cursor.as_mut() {
                if let Some((representative, set_size)) = cursor.check(index, &name)? {
                    if !flags.is_secondary() && !flags.is_supplementary() && !flags.is_unmapped() {
                        record.data_mut().insert(rr_tag, Value::String(representative));
                        record.data_mut().insert(ds_tag, Value::from(set_size as i32));
                    }
                }
            }

            index += 1;
            if self.remove_duplicates && record.flags().is_duplicate() {
                continue;
            }
            if self.remove_sequencing_duplicates && is_optical_duplicate {
                continue;
            }

            writer.write_record(&out_header, &record)?;
            progress.record();
        }
        progress.log_final();

        writer
            .finish(&out_header)
            .with_context(|| format!("Failed to finish output: {}", self.output.display()))?;

        // Finalize and write the per-library metrics.
        let rows = libraries.finalize_metrics();
        write_duplication_metrics(&self.metrics, &rows)?;

        timer.log_completion(pass1.records_read);
        Ok(())
    }
}

impl MarkDuplicates {
    /// Partitions the memory ceiling across the pipeline's collections.
    fn with_memory_budgets(&self, mut config: Pass1Config) -> Pass1Config {
        let memory = self.max_memory.as_u64();
        let record_size = config.codec().record_size() as u64;

        let sorter_budget =
            ((memory as f64 * self.sorting_collection_size_ratio) / record_size as f64) as usize;
        config.max_records_in_ram = sorter_budget.max(2);

        // The mate map shares the remaining headroom with both sorters.
        config.max_map_entries_in_ram = ((memory / record_size) / 2).max(1) as usize;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> MarkDuplicates {
        let mut full = vec!["mark"];
        full.extend_from_slice(args);
        MarkDuplicates::parse_from(full)
    }

    const REQUIRED: &[&str] =
        &["-i", "in.bam", "-o", "out.bam", "-m", "metrics.txt"];

    #[test]
    fn test_default_options() {
        let cmd = command(REQUIRED);
        assert_eq!(cmd.tagging_policy, TaggingPolicy::DontTag);
        assert_eq!(cmd.scoring_strategy, ScoringStrategy::SumOfBaseQualities);
        assert_eq!(cmd.read_name_regex, DEFAULT_READ_NAME_REGEX);
        assert_eq!(cmd.max_file_handles, 8000);
        assert!(!cmd.remove_duplicates);
    }

    #[test]
    fn test_memory_budgets_scale_with_ratio() {
        let mut args = REQUIRED.to_vec();
        args.extend_from_slice(&["--max-memory", "100MiB"]);
        let cmd = command(&args);

        let config = cmd.with_memory_budgets(Pass1Config {
            queryname_sorted: false,
            scoring_strategy: ScoringStrategy::SumOfBaseQualities,
            barcode_tags: BarcodeTags::default(),
            tag_representative_read: false,
            max_records_in_ram: 0,
            max_map_entries_in_ram: 0,
            max_file_handles: 8000,
            temp_dirs: Vec::new(),
        });

        let memory = 100 * 1024 * 1024u64;
        let record_size = config.codec().record_size() as u64;
        assert_eq!(config.max_records_in_ram, (memory / 4 / record_size) as usize);
        assert_eq!(config.max_map_entries_in_ram, (memory / record_size / 2) as usize);
    }

    #[test]
    fn test_barcode_tags_enable_barcode_codec() {
        let mut args = REQUIRED.to_vec();
        args.extend_from_slice(&["--barcode-tag", "BC"]);
        let cmd = command(&args);
        let tags = cmd.barcode_tags().unwrap();
        assert!(tags.any());
    }

    #[test]
    fn test_invalid_barcode_tag_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend_from_slice(&["--barcode-tag", "TOOLONG"]);
        let cmd = command(&args);
        assert!(cmd.barcode_tags().is_err());
    }

    #[test]
    fn test_read_name_regex_none_disables_optical() {
        let mut args = REQUIRED.to_vec();
        args.extend_from_slice(&["--read-name-regex", "none"]);
        let cmd = command(&args);
        assert!(cmd.optical_finder().unwrap().is_none());
    }
}
