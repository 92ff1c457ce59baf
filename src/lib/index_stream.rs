//! Pass 3 driver: cursors over the sorted index streams.
//!
//! The output-writing pass advances a file-position counter and asks, per
//! record, whether that position is a duplicate, an optical duplicate, or a
//! member of a duplicate set. Because the streams are sorted, each question
//! is one comparison plus an amortized-O(1) advance.
//!
//! Under queryname ordering the answer is "sticky": all records sharing a
//! query name were assigned the file index of the first such record, so later
//! records of the template sit past the stored index but still belong to the
//! same duplicate group. A match is therefore remembered by query name, and
//! the cursor only advances once the query name changes.

use bstr::BString;

use crate::read_ends::{RepresentativeRead, RepresentativeReadCodec};
use crate::sort::external::SortedIter;
use crate::sort::index::SortedLongIter;
use crate::sort::{SortingCollection, SortingLongCollection};

/// Sentinel past any real file index; an exhausted cursor parks here.
pub const NO_SUCH_INDEX: u64 = u64::MAX;

/// Cursor over a sorted stream of duplicate file indices.
pub struct IndexCursor {
    iter: SortedLongIter,
    next: u64,
    queryname_sorted: bool,
    last_match_name: Option<Vec<u8>>,
}

impl IndexCursor {
    /// Builds a cursor over a frozen index collection.
    ///
    /// # Errors
    ///
    /// Fails when the collection's spill files cannot be read.
    pub fn new(collection: SortingLongCollection, queryname_sorted: bool) -> std::io::Result<Self> {
        let mut iter = collection.into_sorted_iter()?;
        let next = match iter.next() {
            Some(value) => value?,
            None => NO_SUCH_INDEX,
        };
        Ok(Self { iter, next, queryname_sorted, last_match_name: None })
    }

    /// Returns whether the record at `index` (with query name `name`) is in
    /// the stream, advancing the cursor as needed.
    ///
    /// # Errors
    ///
    /// Fails when the underlying spill files cannot be read.
    pub fn check(&mut self, index: u64, name: &[u8]) -> std::io::Result<bool> {
        while index > self.next && self.may_advance(name) {
            self.next = match self.iter.next() {
                Some(value) => value?,
                None => NO_SUCH_INDEX,
            };
        }

        let sticky_match = self.last_match_name.as_deref() == Some(name);
        let hit = index == self.next
            || (self.queryname_sorted && index > self.next && sticky_match);

        if hit && self.queryname_sorted && !sticky_match {
            self.last_match_name = Some(name.to_vec());
        }
        Ok(hit)
    }

    fn may_advance(&self, name: &[u8]) -> bool {
        if self.next == NO_SUCH_INDEX {
            return false;
        }
        !self.queryname_sorted || self.last_match_name.as_deref() != Some(name)
    }
}

/// Cursor over the sorted representative-read stream, yielding the
/// representative name and duplicate-set size for matching records.
pub struct RepresentativeCursor {
    iter: SortedIter<RepresentativeRead, RepresentativeReadCodec>,
    next: Option<RepresentativeRead>,
    queryname_sorted: bool,
    /// Query name of the last matching record, with the values it matched.
    last_match: Option<(Vec<u8>, BString, u64)>,
}

impl RepresentativeCursor {
    /// Builds a cursor over a frozen representative-info collection.
    ///
    /// # Errors
    ///
    /// Fails when the collection's spill files cannot be read.
    pub fn new(
        collection: SortingCollection<RepresentativeRead, RepresentativeReadCodec>,
        queryname_sorted: bool,
    ) -> std::io::Result<Self> {
        let mut iter = collection.into_sorted_iter()?;
        let next = iter.next().transpose()?;
        Ok(Self { iter, next, queryname_sorted, last_match: None })
    }

    fn next_index(&self) -> u64 {
        self.next.as_ref().map_or(NO_SUCH_INDEX, |r| r.read1_index_in_file)
    }

    /// Returns `(representative name, set size)` when the record at `index`
    /// belongs to a duplicate set.
    ///
    /// # Errors
    ///
    /// Fails when the underlying spill files cannot be read.
    pub fn check(&mut self, index: u64, name: &[u8]) -> std::io::Result<Option<(BString, u64)>> {
        while index > self.next_index() && self.may_advance(name) {
            self.next = self.iter.next().transpose()?;
        }

        if let Some(current) = self.next.as_ref() {
            if index == current.read1_index_in_file {
                let result = (current.name.clone(), current.set_size);
                if self.queryname_sorted {
                    self.last_match = Some((name.to_vec(), result.0.clone(), result.1));
                }
                return Ok(Some(result));
            }
        }

        if self.queryname_sorted && index > self.next_index() {
            if let Some((last_name, representative, set_size)) = &self.last_match {
                if last_name.as_slice() == name {
                    return Ok(Some((representative.clone(), *set_size)));
                }
            }
        }

        Ok(None)
    }

    fn may_advance(&self, name: &[u8]) -> bool {
        if self.next.is_none() {
            return false;
        }
        if !self.queryname_sorted {
            return true;
        }
        self.last_match.as_ref().is_none_or(|(last_name, _, _)| last_name.as_slice() != name)
    }
}
