//! Record-level utilities for SAM/BAM records.
//!
//! Position helpers here use signed coordinates: an unclipped start can fall
//! before the first base of the contig when a read is soft-clipped at its 5'
//! end, and duplicate signatures must distinguish those positions.

use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;

/// Sums clipping operations (soft or hard) at the start of a CIGAR.
#[must_use]
pub fn leading_clipping(ops: &[Op]) -> usize {
    let mut clipped = 0;
    for op in ops {
        match op.kind() {
            Kind::SoftClip | Kind::HardClip => clipped += op.len(),
            _ => break,
        }
    }
    clipped
}

/// Sums clipping operations (soft or hard) at the end of a CIGAR.
#[must_use]
pub fn trailing_clipping(ops: &[Op]) -> usize {
    let mut clipped = 0;
    for op in ops.iter().rev() {
        match op.kind() {
            Kind::SoftClip | Kind::HardClip => clipped += op.len(),
            _ => break,
        }
    }
    clipped
}

/// Counts reference-consuming bases in a CIGAR.
#[must_use]
pub fn reference_length(ops: &[Op]) -> usize {
    ops.iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
                    | Kind::Deletion
                    | Kind::Skip
            )
        })
        .map(|op| op.len())
        .sum()
}

/// Gets the unclipped start position of a read (alignment start minus leading
/// clips), which can be zero or negative.
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_start(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = usize::from(record.alignment_start()?) as i64;
    let leading = leading_clipping(record.cigar().as_ref()) as i64;
    Some(start - leading)
}

/// Gets the unclipped end position of a read (alignment end plus trailing
/// clips). Matches HTSJDK's `SAMRecord.getUnclippedEnd()`, counting both soft
/// and hard clips.
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_end(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    let ops = record.cigar().as_ref();
    let start = usize::from(record.alignment_start()?) as i64;
    let ref_len = reference_length(ops) as i64;
    let trailing = trailing_clipping(ops) as i64;
    Some(start + ref_len - 1 + trailing)
}

/// Gets the unclipped 5' coordinate of a read: the unclipped start on the
/// forward strand, the unclipped end on the reverse strand.
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_five_prime_coordinate(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_reverse_complemented() {
        unclipped_end(record)
    } else {
        unclipped_start(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::RecordBuilder;

    #[test]
    fn test_unclipped_start_no_clipping() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .build();
        assert_eq!(unclipped_start(&record), Some(100));
        assert_eq!(unclipped_end(&record), Some(109));
    }

    #[test]
    fn test_unclipped_start_soft_clipped() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("3S7M")
            .build();
        assert_eq!(unclipped_start(&record), Some(97));
    }

    #[test]
    fn test_unclipped_start_can_go_negative() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .alignment_start(2)
            .cigar("5S5M")
            .build();
        assert_eq!(unclipped_start(&record), Some(-3));
    }

    #[test]
    fn test_unclipped_end_with_trailing_clips() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("6M4S")
            .build();
        // alignment end = 105, plus 4 trailing clipped bases
        assert_eq!(unclipped_end(&record), Some(109));
    }

    #[test]
    fn test_unclipped_end_counts_hard_clips() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTAC")
            .alignment_start(100)
            .cigar("6M4H")
            .build();
        assert_eq!(unclipped_end(&record), Some(109));
    }

    #[test]
    fn test_five_prime_coordinate_by_strand() {
        let fwd = RecordBuilder::mapped_read()
            .name("f")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .build();
        let rev = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .reverse_complement(true)
            .build();
        assert_eq!(unclipped_five_prime_coordinate(&fwd), Some(100));
        assert_eq!(unclipped_five_prime_coordinate(&rev), Some(109));
    }

    #[test]
    fn test_unmapped_has_no_positions() {
        let record = RecordBuilder::new().name("u").sequence("ACGT").unmapped(true).build();
        assert_eq!(unclipped_start(&record), None);
        assert_eq!(unclipped_end(&record), None);
    }

    #[test]
    fn test_reference_length_with_indels() {
        let record = RecordBuilder::mapped_read()
            .name("r")
            .sequence("ACGTACGTACGT")
            .alignment_start(100)
            .cigar("4M2D4M2I4M")
            .build();
        // 4 + 2 (D) + 4 + 4 = 14 reference bases
        assert_eq!(reference_length(record.cigar().as_ref()), 14);
    }
}
