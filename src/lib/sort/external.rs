//! Generic external merge-sort collection.
//!
//! # Algorithm
//!
//! 1. **Accumulate phase**: records are buffered in memory up to a configured
//!    count
//! 2. **Spill phase**: the buffer is stably sorted and encoded to a temporary
//!    run file, round-robin across the configured temp directories
//! 3. **Merge phase**: iteration performs a k-way merge over all run files
//!    plus the sorted in-memory residue, using a binary heap
//!
//! If nothing was spilled, iteration simply drains the in-memory buffer.
//! Stability: the in-memory sort is stable, and heap ties are broken by run
//! ordinal (runs are written in insertion order, with the residue last), so
//! records that compare equal are yielded in insertion order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::debug;
use tempfile::TempDir;

/// Buffer size for reading run files during the merge.
const MERGE_BUFFER_SIZE: usize = 64 * 1024;

/// Serialization for records spilled to run files.
///
/// `decode` must return `Ok(None)` on a clean end-of-stream and an error when
/// a record is truncated mid-way (spill-file corruption is fatal).
pub trait SpillCodec {
    type Item;

    fn encode<W: io::Write>(&self, item: &Self::Item, sink: &mut W) -> io::Result<()>;

    fn decode<R: io::Read>(&self, source: &mut R) -> io::Result<Option<Self::Item>>;
}

/// An external sorting collection of records of type `C::Item`.
///
/// The comparator is the record type's `Ord` implementation. The collection
/// exclusively owns its spill files; they are deleted when the collection (or
/// the iterator taken from it) is dropped.
pub struct SortingCollection<T: Ord, C: SpillCodec<Item = T>> {
    codec: C,
    buffer: Vec<T>,
    max_in_ram: usize,
    /// Scoped spill directories, one per configured temp dir.
    spill_dirs: Vec<TempDir>,
    run_files: Vec<PathBuf>,
    next_dir: usize,
    run_counter: u64,
    total_added: u64,
    done: bool,
}

impl<T: Ord, C: SpillCodec<Item = T>> SortingCollection<T, C> {
    /// Creates a collection holding at most `max_in_ram` records in memory.
    ///
    /// Run files go to scoped subdirectories of `temp_dirs` (round-robin), or
    /// of the system temp directory when `temp_dirs` is empty.
    ///
    /// # Errors
    ///
    /// Fails if a temp directory cannot be created (unwritable temp root).
    pub fn new(codec: C, max_in_ram: usize, temp_dirs: &[PathBuf]) -> io::Result<Self> {
        let spill_dirs = create_spill_dirs(temp_dirs)?;
        Ok(Self {
            codec,
            buffer: Vec::new(),
            max_in_ram: max_in_ram.max(2),
            spill_dirs,
            run_files: Vec::new(),
            next_dir: 0,
            run_counter: 0,
            total_added: 0,
            done: false,
        })
    }

    /// Adds a record, spilling the buffer to disk when it is full.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Self::done_adding`].
    pub fn add(&mut self, item: T) -> io::Result<()> {
        assert!(!self.done, "add called after done_adding");
        self.buffer.push(item);
        self.total_added += 1;
        if self.buffer.len() >= self.max_in_ram {
            self.spill()?;
        }
        Ok(())
    }

    /// Finishes the accumulate phase: sorts any in-memory residue and freezes
    /// the collection for iteration.
    pub fn done_adding(&mut self) -> io::Result<()> {
        self.buffer.sort();
        self.done = true;
        if !self.run_files.is_empty() {
            debug!(
                "Sorted {} records across {} spill files plus residue",
                self.total_added,
                self.run_files.len()
            );
        }
        Ok(())
    }

    /// Total number of records added.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.total_added
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_added == 0
    }

    /// Consumes the collection, yielding records in sorted order.
    ///
    /// # Panics
    ///
    /// Panics unless [`Self::done_adding`] was called first.
    pub fn into_sorted_iter(self) -> io::Result<SortedIter<T, C>> {
        assert!(self.done, "into_sorted_iter called before done_adding");

        let mut sources: Vec<RunSource<T>> = Vec::with_capacity(self.run_files.len() + 1);
        for path in &self.run_files {
            let file = File::open(path)?;
            sources.push(RunSource::File(BufReader::with_capacity(MERGE_BUFFER_SIZE, file)));
        }
        // The residue is the newest run: it must come last for stability.
        sources.push(RunSource::Memory(self.buffer.into_iter()));

        let mut iter = SortedIter {
            codec: self.codec,
            sources,
            heap: BinaryHeap::new(),
            _spill_dirs: self.spill_dirs,
        };
        for idx in 0..iter.sources.len() {
            iter.push_next_from(idx)?;
        }
        Ok(iter)
    }

    fn spill(&mut self) -> io::Result<()> {
        self.buffer.sort();

        let dir = &self.spill_dirs[self.next_dir % self.spill_dirs.len()];
        self.next_dir += 1;
        let path =
            dir.path().join(format!("run.{}.{:06}.spill", std::process::id(), self.run_counter));
        self.run_counter += 1;

        let file = File::create(&path)?;
        let mut sink = BufWriter::new(file);
        for item in &self.buffer {
            self.codec.encode(item, &mut sink)?;
        }
        sink.flush()?;

        self.run_files.push(path);
        self.buffer.clear();
        Ok(())
    }
}

/// Creates one scoped spill directory per configured temp dir.
pub(crate) fn create_spill_dirs(temp_dirs: &[PathBuf]) -> io::Result<Vec<TempDir>> {
    if temp_dirs.is_empty() {
        return Ok(vec![TempDir::new()?]);
    }
    temp_dirs
        .iter()
        .map(|base| {
            std::fs::create_dir_all(base)?;
            TempDir::new_in(base)
        })
        .collect()
}

enum RunSource<T> {
    File(BufReader<File>),
    Memory(std::vec::IntoIter<T>),
}

/// Entry in the merge heap; ties on the item break by run ordinal so that
/// insertion order survives the merge.
struct HeapEntry<T: Ord> {
    item: T,
    source_idx: usize,
}

impl<T: Ord> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item && self.source_idx == other.source_idx
    }
}

impl<T: Ord> Eq for HeapEntry<T> {}

impl<T: Ord> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.item.cmp(&other.item).then_with(|| self.source_idx.cmp(&other.source_idx))
    }
}

/// Merged iterator over the sorted runs of a [`SortingCollection`].
pub struct SortedIter<T: Ord, C: SpillCodec<Item = T>> {
    codec: C,
    sources: Vec<RunSource<T>>,
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
    /// Keeps the spill files alive until iteration finishes.
    _spill_dirs: Vec<TempDir>,
}

impl<T: Ord, C: SpillCodec<Item = T>> SortedIter<T, C> {
    fn push_next_from(&mut self, source_idx: usize) -> io::Result<()> {
        let next = match &mut self.sources[source_idx] {
            RunSource::File(reader) => self.codec.decode(reader)?,
            RunSource::Memory(iter) => iter.next(),
        };
        if let Some(item) = next {
            self.heap.push(Reverse(HeapEntry { item, source_idx }));
        }
        Ok(())
    }
}

impl<T: Ord, C: SpillCodec<Item = T>> Iterator for SortedIter<T, C> {
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(entry) = self.heap.pop()?;
        if let Err(e) = self.push_next_from(entry.source_idx) {
            return Some(Err(e));
        }
        Some(Ok(entry.item))
    }
}
