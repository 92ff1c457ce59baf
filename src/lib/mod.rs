#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! # fgdup - duplicate marking for aligned short reads
//!
//! This library implements the duplicate-detection engine behind the `fgdup`
//! CLI: reads originating from the same source DNA fragment are identified by
//! matching unclipped 5'-end positions and strand orientations (optionally
//! refined by molecular barcodes), and all but the best-scoring member of
//! each group are flagged as duplicates. Reads that additionally sit close
//! together on the flowcell are classified as sequencing (optical)
//! duplicates.
//!
//! ## Pipeline
//!
//! The engine runs three sequential, single-threaded passes:
//!
//! 1. **[`pass1`]** streams the input once, building a 5'-end signature per
//!    primary mapped read and per completed mate pair. Signatures go into
//!    external sorting collections ([`sort`]); partial pairs wait in a
//!    spill-capable map ([`ends_map`]) until their mates arrive.
//! 2. **[`detect`]** traverses the two sorted signature streams, groups
//!    equivalent signatures, scores each group, and emits sorted streams of
//!    duplicate file indices (plus optical indices and representative-read
//!    info when requested), consulting [`optical`] for flowcell proximity.
//! 3. The writing pass (in the CLI command) re-streams the input and flags
//!    records by cursor lookups over the index streams ([`index_stream`]).
//!
//! ## Supporting modules
//!
//! - [`read_ends`] - the signature record, its ordering, and spill codecs
//! - [`library`] - read-group to library resolution and per-library metrics
//! - [`bam_io`] - SAM/BAM readers and writers over noodles
//! - [`metrics`] - duplication metrics and TSV output
//! - [`sam`] - record position helpers and test-record builders

pub mod bam_io;
pub mod detect;
pub mod ends_map;
pub mod errors;
pub mod header;
pub mod index_stream;
pub mod library;
pub mod logging;
pub mod metrics;
pub mod optical;
pub mod pass1;
pub mod progress;
pub mod read_ends;
pub mod sam;
pub mod sort;
pub mod validation;
