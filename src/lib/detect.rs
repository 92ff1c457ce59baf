//! Pass 2: traverses the sorted signature streams, delimits runs of
//! equivalent signatures, and emits the sorted duplicate-index streams.
//!
//! Two sweeps run back to back. The pair sweep groups pair signatures that
//! match on both 5' ends, keeps the highest-scoring member of each group, and
//! marks the rest; when a read-name parser is configured it also classifies
//! co-located members as optical duplicates. The fragment sweep groups on the
//! read1 end only: lone fragments lose to any pair sharing their 5' end, and
//! groups of lone fragments keep their best member.
//!
//! All emitted file indices go into sorting collections, so the streams the
//! third pass consumes are globally non-decreasing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::library::LibraryIdGenerator;
use crate::optical::OpticalDuplicateFinder;
use crate::read_ends::{
    ReadEnds, ReadEndsCodec, RepresentativeRead, RepresentativeReadCodec, orientation,
};
use crate::sort::{SortingCollection, SortingLongCollection};

/// Configuration for the duplicate-detection pass.
pub struct DetectConfig {
    pub use_barcodes: bool,
    pub tag_representative_read: bool,
    /// Track optical-duplicate indices in their own stream (needed when
    /// tagging or removing sequencing duplicates).
    pub index_optical_duplicates: bool,
    /// In-memory budget per index sorter, in 8-byte slots.
    pub max_indexes_in_ram: usize,
    /// In-memory budget for the representative-info sorter, in records.
    pub max_representatives_in_ram: usize,
    pub temp_dirs: Vec<PathBuf>,
}

/// The sorted index streams produced by Pass 2.
pub struct DuplicateIndexes {
    /// File indices of every record to flag as a duplicate.
    pub duplicates: SortingLongCollection,
    /// File indices of optical duplicates, when tracked.
    pub opticals: Option<SortingLongCollection>,
    /// Representative-read info per duplicate-set member, when tracked.
    pub representatives: Option<SortingCollection<RepresentativeRead, RepresentativeReadCodec>>,
    /// Number of indices emitted to the duplicate stream.
    pub num_duplicate_indices: u64,
}

/// Two signatures are comparable when they share a library (and barcodes,
/// when in use), the same read1 position and orientation, and, for the pair
/// sweep, the same read2 position.
#[must_use]
pub fn are_comparable(
    lhs: &ReadEnds,
    rhs: &ReadEnds,
    compare_read2: bool,
    use_barcodes: bool,
) -> bool {
    let mut comparable = lhs.library_id == rhs.library_id;

    if use_barcodes && comparable {
        comparable = lhs.barcode == rhs.barcode
            && lhs.read_one_barcode == rhs.read_one_barcode
            && lhs.read_two_barcode == rhs.read_two_barcode;
    }

    if comparable {
        comparable = lhs.read1_reference_index == rhs.read1_reference_index
            && lhs.read1_coordinate == rhs.read1_coordinate
            && lhs.orientation == rhs.orientation;
    }

    if comparable && compare_read2 {
        comparable = lhs.read2_reference_index == rhs.read2_reference_index
            && lhs.read2_coordinate == rhs.read2_coordinate;
    }

    comparable
}

/// Index of the highest-scoring signature; ties keep the earliest.
fn best_index(chunk: &[ReadEnds]) -> usize {
    let mut best = 0;
    for (i, end) in chunk.iter().enumerate().skip(1) {
        if end.score > chunk[best].score {
            best = i;
        }
    }
    best
}

struct IndexCollector {
    duplicates: SortingLongCollection,
    opticals: Option<SortingLongCollection>,
    representatives: Option<SortingCollection<RepresentativeRead, RepresentativeReadCodec>>,
    num_duplicate_indices: u64,
}

impl IndexCollector {
    fn add_index_as_duplicate(&mut self, index: u64) -> std::io::Result<()> {
        self.duplicates.add(index)?;
        self.num_duplicate_indices += 1;
        Ok(())
    }
}

/// Flags optical duplicates within one chunk and counts the clusters against
/// the chunk's library. Mixed FR/RF chunks are tracked per orientation so
/// that the two strand layouts never cluster together.
fn track_optical_duplicates(
    chunk: &mut [ReadEnds],
    best_idx: usize,
    finder: &OpticalDuplicateFinder,
    libraries: &mut LibraryIdGenerator,
) {
    let has_fr = chunk.iter().any(|e| e.orientation_for_optical == orientation::FR);
    let has_rf = chunk.iter().any(|e| e.orientation_for_optical == orientation::RF);

    if has_fr && has_rf {
        for target in [orientation::FR, orientation::RF] {
            let indices: Vec<usize> = chunk
                .iter()
                .enumerate()
                .filter(|(_, e)| e.orientation_for_optical == target)
                .map(|(i, _)| i)
                .collect();
            track_optical_subset(chunk, &indices, best_idx, finder, libraries);
        }
    } else {
        let indices: Vec<usize> = (0..chunk.len()).collect();
        track_optical_subset(chunk, &indices, best_idx, finder, libraries);
    }
}

fn track_optical_subset(
    chunk: &mut [ReadEnds],
    indices: &[usize],
    best_idx: usize,
    finder: &OpticalDuplicateFinder,
    libraries: &mut LibraryIdGenerator,
) {
    if indices.is_empty() {
        return;
    }

    let flags = {
        let subset: Vec<&ReadEnds> = indices.iter().map(|&i| &chunk[i]).collect();
        let keeper = indices.iter().position(|&i| i == best_idx);
        finder.find_optical_duplicates(&subset, keeper)
    };

    let mut count = 0u64;
    for (k, &i) in indices.iter().enumerate() {
        if flags[k] {
            chunk[i].is_optical_duplicate = true;
            count += 1;
        }
    }
    if count > 0 {
        libraries.add_optical_duplicates(chunk[indices[0]].library_id, count);
    }
}

/// Marks all but the best-scoring member of a pair chunk as duplicates.
fn mark_duplicate_pairs(
    collector: &mut IndexCollector,
    chunk: &mut [ReadEnds],
    libraries: &mut LibraryIdGenerator,
    optical_finder: Option<&OpticalDuplicateFinder>,
) -> std::io::Result<()> {
    let best = best_index(chunk);

    if let Some(finder) = optical_finder {
        track_optical_duplicates(chunk, best, finder, libraries);
    }

    for (i, end) in chunk.iter().enumerate() {
        if i == best {
            continue;
        }
        collector.add_index_as_duplicate(end.read1_index_in_file)?;
        // Under queryname ordering both ends share one index.
        if end.read2_index_in_file != end.read1_index_in_file {
            collector.add_index_as_duplicate(end.read2_index_in_file)?;
        }
        if end.is_optical_duplicate {
            if let Some(opticals) = collector.opticals.as_mut() {
                opticals.add(end.read1_index_in_file)?;
                opticals.add(end.read2_index_in_file)?;
            }
        }
    }
    Ok(())
}

/// Emits one representative-read record per chunk member, all pointing at the
/// best-scoring member's first-encountered read name.
fn mark_representative_read(
    collector: &mut IndexCollector,
    chunk: &[ReadEnds],
) -> std::io::Result<()> {
    let Some(representatives) = collector.representatives.as_mut() else {
        return Ok(());
    };
    let best = best_index(chunk);
    let name = chunk[best].first_encountered_read_name.clone().unwrap_or_default();

    for end in chunk {
        representatives.add(RepresentativeRead {
            name: name.clone(),
            set_size: chunk.len() as u64,
            read1_index_in_file: end.read1_index_in_file,
        })?;
    }
    Ok(())
}

/// Marks duplicate fragments within a chunk grouped on the read1 end.
///
/// Lone fragments colliding with any pair lose outright; chunks of only
/// fragments keep their best member.
fn mark_duplicate_fragments(
    collector: &mut IndexCollector,
    chunk: &[ReadEnds],
    contains_pairs: bool,
) -> std::io::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }

    if contains_pairs {
        for end in chunk {
            if !end.is_paired() {
                collector.add_index_as_duplicate(end.read1_index_in_file)?;
            }
        }
    } else {
        let best = best_index(chunk);
        for (i, end) in chunk.iter().enumerate() {
            if i != best {
                collector.add_index_as_duplicate(end.read1_index_in_file)?;
            }
        }
    }
    Ok(())
}

/// Runs both sweeps over the sorted signature collections and returns the
/// frozen index streams.
///
/// # Errors
///
/// Fails on spill-file corruption or unwritable temp directories.
pub fn generate_duplicate_indexes(
    pair_sort: SortingCollection<ReadEnds, ReadEndsCodec>,
    frag_sort: SortingCollection<ReadEnds, ReadEndsCodec>,
    libraries: &mut LibraryIdGenerator,
    optical_finder: Option<&OpticalDuplicateFinder>,
    config: &DetectConfig,
) -> Result<DuplicateIndexes> {
    let duplicates = SortingLongCollection::new(config.max_indexes_in_ram, &config.temp_dirs)
        .context("Failed to create duplicate-index sorter")?;
    let opticals = if config.index_optical_duplicates {
        Some(
            SortingLongCollection::new(config.max_indexes_in_ram, &config.temp_dirs)
                .context("Failed to create optical-index sorter")?,
        )
    } else {
        None
    };
    let representatives = if config.tag_representative_read {
        Some(
            SortingCollection::new(
                RepresentativeReadCodec,
                config.max_representatives_in_ram,
                &config.temp_dirs,
            )
            .context("Failed to create representative-info sorter")?,
        )
    } else {
        None
    };

    let mut collector =
        IndexCollector { duplicates, opticals, representatives, num_duplicate_indices: 0 };

    // Pair sweep.
    info!("Traversing read pair information and detecting duplicates.");
    let mut chunk: Vec<ReadEnds> = Vec::with_capacity(200);
    for result in pair_sort.into_sorted_iter()? {
        let next = result.context("Failed to read pair signature spill")?;
        if chunk.first().is_some_and(|first| are_comparable(first, &next, true, config.use_barcodes))
        {
            chunk.push(next);
        } else {
            if chunk.len() > 1 {
                mark_duplicate_pairs(&mut collector, &mut chunk, libraries, optical_finder)?;
                mark_representative_read(&mut collector, &chunk)?;
            }
            chunk.clear();
            chunk.push(next);
        }
    }
    if chunk.len() > 1 {
        mark_duplicate_pairs(&mut collector, &mut chunk, libraries, optical_finder)?;
        mark_representative_read(&mut collector, &chunk)?;
    }

    // Fragment sweep.
    info!("Traversing fragment information and detecting duplicates.");
    chunk.clear();
    let mut contains_pairs = false;
    let mut contains_frags = false;
    for result in frag_sort.into_sorted_iter()? {
        let next = result.context("Failed to read fragment signature spill")?;
        if chunk.first().is_some_and(|first| are_comparable(first, &next, false, config.use_barcodes))
        {
            contains_pairs = contains_pairs || next.is_paired();
            contains_frags = contains_frags || !next.is_paired();
            chunk.push(next);
        } else {
            if chunk.len() > 1 && contains_frags {
                mark_duplicate_fragments(&mut collector, &chunk, contains_pairs)?;
            }
            contains_pairs = next.is_paired();
            contains_frags = !next.is_paired();
            chunk.clear();
            chunk.push(next);
        }
    }
    if contains_frags {
        mark_duplicate_fragments(&mut collector, &chunk, contains_pairs)?;
    }

    info!("Sorting list of duplicate records.");
    collector.duplicates.done_adding();
    if let Some(opticals) = collector.opticals.as_mut() {
        opticals.done_adding();
    }
    if let Some(representatives) = collector.representatives.as_mut() {
        representatives.done_adding()?;
    }

    Ok(DuplicateIndexes {
        duplicates: collector.duplicates,
        opticals: collector.opticals,
        representatives: collector.representatives,
        num_duplicate_indices: collector.num_duplicate_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optical::ReadNameParser;
    use crate::read_ends::NO_REFERENCE_INDEX;
    use crate::sam::builder::SamBuilder;

    fn pair_end(coordinate: i32, score: u16, r1_index: u64, r2_index: u64) -> ReadEnds {
        ReadEnds {
            library_id: 1,
            read1_reference_index: 0,
            read1_coordinate: coordinate,
            orientation: orientation::FR,
            read1_index_in_file: r1_index,
            read2_reference_index: 0,
            read2_coordinate: coordinate + 200,
            read2_index_in_file: r2_index,
            orientation_for_optical: orientation::FR,
            score,
            ..ReadEnds::default()
        }
    }

    fn frag_end(coordinate: i32, score: u16, index: u64, paired: bool) -> ReadEnds {
        ReadEnds {
            library_id: 1,
            read1_reference_index: 0,
            read1_coordinate: coordinate,
            orientation: orientation::F,
            read1_index_in_file: index,
            read2_index_in_file: index,
            read2_reference_index: if paired { 0 } else { NO_REFERENCE_INDEX },
            score,
            ..ReadEnds::default()
        }
    }

    fn config() -> DetectConfig {
        DetectConfig {
            use_barcodes: false,
            tag_representative_read: false,
            index_optical_duplicates: false,
            max_indexes_in_ram: 1000,
            max_representatives_in_ram: 1000,
            temp_dirs: Vec::new(),
        }
    }

    fn run_detect(
        pairs: Vec<ReadEnds>,
        frags: Vec<ReadEnds>,
        cfg: &DetectConfig,
        optical_finder: Option<&OpticalDuplicateFinder>,
    ) -> (Vec<u64>, Vec<u64>, u64) {
        let codec = ReadEndsCodec {
            with_barcodes: cfg.use_barcodes,
            with_read_name: cfg.tag_representative_read,
        };
        let mut pair_sort = SortingCollection::new(codec, 1000, &[]).unwrap();
        for p in pairs {
            pair_sort.add(p).unwrap();
        }
        pair_sort.done_adding().unwrap();

        let mut frag_sort = SortingCollection::new(codec, 1000, &[]).unwrap();
        for f in frags {
            frag_sort.add(f).unwrap();
        }
        frag_sort.done_adding().unwrap();

        let builder = SamBuilder::new();
        let mut libraries = LibraryIdGenerator::from_header(&builder.header());
        let indexes =
            generate_duplicate_indexes(pair_sort, frag_sort, &mut libraries, optical_finder, cfg)
                .unwrap();

        let num = indexes.num_duplicate_indices;
        let dups: Vec<u64> =
            indexes.duplicates.into_sorted_iter().unwrap().map(Result::unwrap).collect();
        let opts: Vec<u64> = indexes
            .opticals
            .map(|o| o.into_sorted_iter().unwrap().map(Result::unwrap).collect())
            .unwrap_or_default();
        (dups, opts, num)
    }

    #[test]
    fn test_two_identical_pairs_marks_lower_scoring() {
        // P1 at indices (0,1) scored 40; P2 at (2,3) scored 60.
        let pairs = vec![pair_end(100, 40, 0, 1), pair_end(100, 60, 2, 3)];
        let frags = vec![
            frag_end(100, 20, 0, true),
            frag_end(300, 20, 1, true),
            frag_end(100, 30, 2, true),
            frag_end(300, 30, 3, true),
        ];
        let (dups, _, num) = run_detect(pairs, frags, &config(), None);
        assert_eq!(dups, vec![0, 1]);
        assert_eq!(num, 2);
    }

    #[test]
    fn test_score_tie_keeps_first_occurrence() {
        let pairs = vec![pair_end(100, 50, 0, 1), pair_end(100, 50, 2, 3)];
        let (dups, _, _) = run_detect(pairs, Vec::new(), &config(), None);
        assert_eq!(dups, vec![2, 3]);
    }

    #[test]
    fn test_distinct_positions_make_no_duplicates() {
        let pairs = vec![pair_end(100, 50, 0, 1), pair_end(500, 50, 2, 3)];
        let (dups, _, _) = run_detect(pairs, Vec::new(), &config(), None);
        assert!(dups.is_empty());
    }

    #[test]
    fn test_fragment_loses_to_pair_at_same_position() {
        // A pair's read1 fragment signature and a lone fragment collide.
        let frags = vec![frag_end(100, 60, 0, true), frag_end(100, 99, 4, false)];
        let (dups, _, _) = run_detect(Vec::new(), frags, &config(), None);
        // The lone fragment loses despite its higher score.
        assert_eq!(dups, vec![4]);
    }

    #[test]
    fn test_lone_fragment_group_keeps_best() {
        let frags = vec![
            frag_end(100, 10, 0, false),
            frag_end(100, 50, 1, false),
            frag_end(100, 30, 2, false),
        ];
        let (dups, _, _) = run_detect(Vec::new(), frags, &config(), None);
        assert_eq!(dups, vec![0, 2]);
    }

    #[test]
    fn test_all_pairs_fragment_chunk_marks_nothing() {
        let frags = vec![frag_end(100, 10, 0, true), frag_end(100, 50, 2, true)];
        let (dups, _, _) = run_detect(Vec::new(), frags, &config(), None);
        assert!(dups.is_empty());
    }

    #[test]
    fn test_barcodes_split_otherwise_identical_pairs() {
        let mut a = pair_end(100, 40, 0, 1);
        let mut b = pair_end(100, 60, 2, 3);
        a.barcode = 111;
        b.barcode = 222;
        let cfg = DetectConfig { use_barcodes: true, ..config() };
        let (dups, _, _) = run_detect(vec![a, b], Vec::new(), &cfg, None);
        assert!(dups.is_empty());
    }

    #[test]
    fn test_optical_duplicates_tracked_in_second_stream() {
        let finder =
            OpticalDuplicateFinder::new(ReadNameParser::Optimized, 100);

        // Three colliding pairs; the best (score 90) sits at (5000, 5000),
        // and the two losers are within pixel range of each other only.
        let mut p1 = pair_end(100, 40, 0, 1);
        p1.tile = 1;
        p1.x = 1000;
        p1.y = 1000;
        let mut p2 = pair_end(100, 50, 2, 3);
        p2.tile = 1;
        p2.x = 1050;
        p2.y = 1010;
        let mut p3 = pair_end(100, 90, 4, 5);
        p3.tile = 1;
        p3.x = 5000;
        p3.y = 5000;

        let cfg = DetectConfig { index_optical_duplicates: true, ..config() };
        let (dups, opts, _) = run_detect(vec![p1, p2, p3], Vec::new(), &cfg, Some(&finder));
        assert_eq!(dups, vec![0, 1, 2, 3]);
        // p2 clusters with p1; the flagged member's two indices are recorded
        assert_eq!(opts, vec![2, 3]);
    }

    #[test]
    fn test_are_comparable_orientation_matters() {
        let mut a = pair_end(100, 40, 0, 1);
        let b = pair_end(100, 40, 2, 3);
        a.orientation = orientation::RF;
        assert!(!are_comparable(&a, &b, true, false));
    }

    #[test]
    fn test_are_comparable_read2_only_for_pairs() {
        let mut a = pair_end(100, 40, 0, 1);
        let mut b = pair_end(100, 40, 2, 3);
        a.read2_coordinate = 500;
        b.read2_coordinate = 900;
        assert!(!are_comparable(&a, &b, true, false));
        assert!(are_comparable(&a, &b, false, false));
    }
}
