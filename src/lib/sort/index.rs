//! External sorting collection specialized to 64-bit file indices.
//!
//! Same spill-and-merge discipline as [`super::external`], but with 8-byte
//! slots and no codec indirection: the duplicate- and optical-index streams
//! are plain `u64` ordinals, and their in-memory budget is far larger than
//! the signature sorters' for the same number of bytes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use tempfile::TempDir;

use super::external::create_spill_dirs;

/// Buffer size for reading run files during the merge.
const MERGE_BUFFER_SIZE: usize = 64 * 1024;

/// An external sorting collection of `u64` values.
pub struct SortingLongCollection {
    buffer: Vec<u64>,
    max_in_ram: usize,
    spill_dirs: Vec<TempDir>,
    run_files: Vec<PathBuf>,
    next_dir: usize,
    run_counter: u64,
    total_added: u64,
    done: bool,
}

impl SortingLongCollection {
    /// Creates a collection holding at most `max_in_ram` values in memory.
    ///
    /// # Errors
    ///
    /// Fails if a temp directory cannot be created.
    pub fn new(max_in_ram: usize, temp_dirs: &[PathBuf]) -> io::Result<Self> {
        let spill_dirs = create_spill_dirs(temp_dirs)?;
        Ok(Self {
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

    /// Adds a value, spilling the buffer to disk when it is full.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Self::done_adding`].
    pub fn add(&mut self, value: u64) -> io::Result<()> {
        assert!(!self.done, "add called after done_adding");
        self.buffer.push(value);
        self.total_added += 1;
        if self.buffer.len() >= self.max_in_ram {
            self.spill()?;
        }
        Ok(())
    }

    /// Finishes the accumulate phase and freezes the collection for iteration.
    pub fn done_adding(&mut self) {
        self.buffer.sort_unstable();
        self.done = true;
    }

    /// Total number of values added.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.total_added
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_added == 0
    }

    /// Consumes the collection, yielding values in ascending order.
    ///
    /// # Panics
    ///
    /// Panics unless [`Self::done_adding`] was called first.
    pub fn into_sorted_iter(self) -> io::Result<SortedLongIter> {
        assert!(self.done, "into_sorted_iter called before done_adding");

        let mut sources: Vec<LongSource> = Vec::with_capacity(self.run_files.len() + 1);
        for path in &self.run_files {
            let file = File::open(path)?;
            sources.push(LongSource::File(BufReader::with_capacity(MERGE_BUFFER_SIZE, file)));
        }
        sources.push(LongSource::Memory(self.buffer.into_iter()));

        let mut iter =
            SortedLongIter { sources, heap: BinaryHeap::new(), _spill_dirs: self.spill_dirs };
        for idx in 0..iter.sources.len() {
            iter.push_next_from(idx)?;
        }
        Ok(iter)
    }

    fn spill(&mut self) -> io::Result<()> {
        self.buffer.sort_unstable();

        let dir = &self.spill_dirs[self.next_dir % self.spill_dirs.len()];
        self.next_dir += 1;
        let path =
            dir.path().join(format!("idx.{}.{:06}.spill", std::process::id(), self.run_counter));
        self.run_counter += 1;

        let file = File::create(&path)?;
        let mut sink = BufWriter::new(file);
        for value in &self.buffer {
            sink.write_all(&value.to_le_bytes())?;
        }
        sink.flush()?;

        self.run_files.push(path);
        self.buffer.clear();
        Ok(())
    }
}

enum LongSource {
    File(BufReader<File>),
    Memory(std::vec::IntoIter<u64>),
}

impl LongSource {
    fn next_value(&mut self) -> io::Result<Option<u64>> {
        match self {
            LongSource::File(reader) => {
                let mut buf = [0u8; 8];
                match reader.read_exact(&mut buf) {
                    Ok(()) => Ok(Some(u64::from_le_bytes(buf))),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
                    Err(e) => Err(e),
                }
            }
            LongSource::Memory(iter) => Ok(iter.next()),
        }
    }
}

/// Merged ascending iterator over a [`SortingLongCollection`].
pub struct SortedLongIter {
    sources: Vec<LongSource>,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
    _spill_dirs: Vec<TempDir>,
}

impl SortedLongIter {
    fn push_next_from(&mut self, source_idx: usize) -> io::Result<()> {
        if let Some(value) = self.sources[source_idx].next_value()? {
            self.heap.push(Reverse((value, source_idx)));
        }
        Ok(())
    }
}

impl Iterator for SortedLongIter {
    type Item = io::Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((value, source_idx)) = self.heap.pop()?;
        if let Err(e) = self.push_next_from(source_idx) {
            return Some(Err(e));
        }
        Some(Ok(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(mut collection: SortingLongCollection, values: Vec<u64>) -> Vec<u64> {
        for value in values {
            collection.add(value).unwrap();
        }
        collection.done_adding();
        collection.into_sorted_iter().unwrap().map(Result::unwrap).collect()
    }

    #[test]
    fn test_in_memory_sorting() {
        let collection = SortingLongCollection::new(100, &[]).unwrap();
        let sorted = collect(collection, vec![9, 3, 7, 3, 1]);
        assert_eq!(sorted, vec![1, 3, 3, 7, 9]);
    }

    #[test]
    fn test_spill_and_merge() {
        let collection = SortingLongCollection::new(8, &[]).unwrap();
        let values: Vec<u64> = (0..1000).rev().collect();
        let sorted = collect(collection, values);
        assert_eq!(sorted.len(), 1000);
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sorted[0], 0);
        assert_eq!(sorted[999], 999);
    }

    #[test]
    fn test_duplicate_values_survive() {
        let collection = SortingLongCollection::new(4, &[]).unwrap();
        let sorted = collect(collection, vec![5, 5, 5, 5, 5, 5, 5]);
        assert_eq!(sorted, vec![5; 7]);
    }

    #[test]
    fn test_empty() {
        let mut collection = SortingLongCollection::new(4, &[]).unwrap();
        collection.done_adding();
        assert_eq!(collection.into_sorted_iter().unwrap().count(), 0);
    }
}
