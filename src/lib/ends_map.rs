//! Spill-capable store for partial pair signatures awaiting their mates.
//!
//! During the first pass, each mapped end of a pair is held here (keyed by
//! `"<read-group-id>:<query-name>"`) until the other end arrives. Entries are
//! partitioned by the reference index of the *mate*, so under coordinate
//! ordering only a small set of partitions is ever live: once the input
//! stream moves past a reference, its partition is only read, never written.
//!
//! Each partition keeps entries in RAM while a global budget allows, then
//! appends overflow to a per-partition spill file. Open append handles are
//! bounded by an LRU cache so the map never exceeds its file-handle quota.
//! The first `remove` that touches a partition with spilled entries drains
//! the file back into RAM.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use ahash::AHashMap;
use lru::LruCache;
use tempfile::TempDir;

use crate::read_ends::{ReadEnds, ReadEndsCodec};
use crate::sort::SpillCodec;

/// Buffer size for draining spill files.
const DRAIN_BUFFER_SIZE: usize = 64 * 1024;

struct Partition {
    ram: AHashMap<String, ReadEnds>,
    spill_path: Option<PathBuf>,
    spilled: usize,
}

impl Partition {
    fn new() -> Self {
        Self { ram: AHashMap::new(), spill_path: None, spilled: 0 }
    }
}

/// Associative store of unmatched pair ends, partitioned by mate reference
/// index, with bounded RAM and bounded open file handles.
pub struct DiskReadEndsMap {
    codec: ReadEndsCodec,
    max_entries_in_ram: usize,
    max_open_files: usize,
    partitions: AHashMap<i32, Partition>,
    handles: LruCache<i32, BufWriter<File>>,
    spill_dir: TempDir,
    ram_entries: usize,
    total_entries: usize,
}

impl DiskReadEndsMap {
    /// Creates a map that keeps at most `max_entries_in_ram` entries in RAM
    /// (across all partitions) and at most `max_open_files` spill files open.
    /// Spill files go to a scoped subdirectory of the first entry in
    /// `temp_dirs`, or of the system temp directory when none is configured.
    ///
    /// # Errors
    ///
    /// Fails if the scoped spill directory cannot be created.
    pub fn new(
        codec: ReadEndsCodec,
        max_entries_in_ram: usize,
        max_open_files: usize,
        temp_dirs: &[PathBuf],
    ) -> io::Result<Self> {
        let spill_dir = match temp_dirs.first() {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                TempDir::new_in(base)?
            }
            None => TempDir::new()?,
        };
        let capacity = NonZeroUsize::new(max_open_files).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            codec,
            max_entries_in_ram: max_entries_in_ram.max(1),
            max_open_files: max_open_files.max(1),
            partitions: AHashMap::new(),
            handles: LruCache::new(capacity),
            spill_dir,
            ram_entries: 0,
            total_entries: 0,
        })
    }

    /// Stores a partial pair signature under `(reference_index, key)`.
    pub fn put(&mut self, reference_index: i32, key: String, ends: ReadEnds) -> io::Result<()> {
        self.total_entries += 1;
        if self.ram_entries < self.max_entries_in_ram {
            let partition = self.partitions.entry(reference_index).or_insert_with(Partition::new);
            partition.ram.insert(key, ends);
            self.ram_entries += 1;
            return Ok(());
        }

        // RAM budget exhausted: append to the partition's spill file.
        let path = {
            let partition = self.partitions.entry(reference_index).or_insert_with(Partition::new);
            if partition.spill_path.is_none() {
                partition.spill_path =
                    Some(self.spill_dir.path().join(format!("ends.{reference_index}.spill")));
            }
            partition.spilled += 1;
            partition.spill_path.clone().unwrap()
        };

        let codec = self.codec;
        let sink = self.handle_for(reference_index, &path)?;
        let key_len = u16::try_from(key.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "pair key too long"))?;
        sink.write_all(&key_len.to_le_bytes())?;
        sink.write_all(key.as_bytes())?;
        codec.encode(&ends, sink)?;
        Ok(())
    }

    /// Removes and returns the signature stored under `(reference_index, key)`.
    pub fn remove(&mut self, reference_index: i32, key: &str) -> io::Result<Option<ReadEnds>> {
        if !self.partitions.contains_key(&reference_index) {
            return Ok(None);
        }

        if self.partitions[&reference_index].spilled > 0 {
            self.drain_partition(reference_index)?;
        }

        let partition = self.partitions.get_mut(&reference_index).expect("partition exists");
        match partition.ram.remove(key) {
            Some(ends) => {
                self.ram_entries -= 1;
                self.total_entries -= 1;
                Ok(Some(ends))
            }
            None => Ok(None),
        }
    }

    /// Number of entries currently stored (RAM + disk).
    #[must_use]
    pub fn size(&self) -> usize {
        self.total_entries
    }

    /// Number of entries currently held in RAM.
    #[must_use]
    pub fn size_in_ram(&self) -> usize {
        self.ram_entries
    }

    /// Reads a partition's spill file back into its RAM map and deletes it.
    fn drain_partition(&mut self, reference_index: i32) -> io::Result<()> {
        // Close the append handle first so all bytes are on disk.
        if let Some(mut handle) = self.handles.pop(&reference_index) {
            handle.flush()?;
        }

        let partition = self.partitions.get_mut(&reference_index).expect("partition exists");
        let Some(path) = partition.spill_path.take() else {
            return Ok(());
        };

        let file = File::open(&path)?;
        let mut source = BufReader::with_capacity(DRAIN_BUFFER_SIZE, file);
        let mut drained = 0usize;
        loop {
            let mut len_buf = [0u8; 2];
            match source.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let key_len = u16::from_le_bytes(len_buf) as usize;
            let mut key = vec![0u8; key_len];
            source.read_exact(&mut key)?;
            let key = String::from_utf8(key)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "corrupt pair key"))?;
            let ends = self.codec.decode(&mut source)?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "truncated pair entry")
            })?;
            partition.ram.insert(key, ends);
            drained += 1;
        }

        partition.spilled = 0;
        self.ram_entries += drained;
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Returns an open append handle for a partition's spill file, evicting
    /// the least-recently-used handle when the quota is reached.
    fn handle_for(
        &mut self,
        reference_index: i32,
        path: &PathBuf,
    ) -> io::Result<&mut BufWriter<File>> {
        if !self.handles.contains(&reference_index) {
            if self.handles.len() >= self.max_open_files {
                if let Some((_, mut evicted)) = self.handles.pop_lru() {
                    evicted.flush()?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.handles.put(reference_index, BufWriter::new(file));
        }
        Ok(self.handles.get_mut(&reference_index).expect("handle just inserted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(coordinate: i32) -> ReadEnds {
        ReadEnds { read1_coordinate: coordinate, ..ReadEnds::default() }
    }

    #[test]
    fn test_put_then_remove_in_ram() {
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 100, 8, &[]).unwrap();
        map.put(0, "A:q1".to_string(), entry(100)).unwrap();
        assert_eq!(map.size(), 1);
        assert_eq!(map.size_in_ram(), 1);

        let found = map.remove(0, "A:q1").unwrap().unwrap();
        assert_eq!(found.read1_coordinate, 100);
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_remove_missing_key() {
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 100, 8, &[]).unwrap();
        assert!(map.remove(0, "A:q1").unwrap().is_none());
        map.put(1, "A:q1".to_string(), entry(1)).unwrap();
        // Same key, different partition.
        assert!(map.remove(0, "A:q1").unwrap().is_none());
    }

    #[test]
    fn test_spills_beyond_ram_budget_and_drains() {
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 4, 8, &[]).unwrap();
        for i in 0..20 {
            map.put(i % 3, format!("A:q{i}"), entry(i)).unwrap();
        }
        assert_eq!(map.size(), 20);
        assert_eq!(map.size_in_ram(), 4);

        // Every entry must come back, spilled or not.
        for i in 0..20 {
            let found = map.remove(i % 3, &format!("A:q{i}")).unwrap();
            assert_eq!(found.map(|e| e.read1_coordinate), Some(i), "entry {i}");
        }
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_partition_reusable_after_drain() {
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 1, 2, &[]).unwrap();
        map.put(0, "A:q0".to_string(), entry(0)).unwrap();
        map.put(0, "A:q1".to_string(), entry(1)).unwrap(); // spilled
        assert_eq!(map.remove(0, "A:q1").unwrap().map(|e| e.read1_coordinate), Some(1));

        map.put(0, "A:q2".to_string(), entry(2)).unwrap();
        assert_eq!(map.remove(0, "A:q2").unwrap().map(|e| e.read1_coordinate), Some(2));
        assert_eq!(map.remove(0, "A:q0").unwrap().map(|e| e.read1_coordinate), Some(0));
    }

    #[test]
    fn test_file_handle_quota_respected() {
        // 2 open handles, 10 partitions spilling concurrently.
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 1, 2, &[]).unwrap();
        map.put(99, "A:seed".to_string(), entry(-1)).unwrap(); // consumes the RAM budget
        for i in 0..30 {
            map.put(i % 10, format!("A:q{i}"), entry(i)).unwrap();
        }
        assert!(map.handles.len() <= 2);
        for i in 0..30 {
            let found = map.remove(i % 10, &format!("A:q{i}")).unwrap();
            assert_eq!(found.map(|e| e.read1_coordinate), Some(i), "entry {i}");
        }
    }

    #[test]
    fn test_keys_carry_read_group_qualifier() {
        let mut map = DiskReadEndsMap::new(ReadEndsCodec::default(), 10, 8, &[]).unwrap();
        map.put(0, "A:q1".to_string(), entry(1)).unwrap();
        map.put(0, "B:q1".to_string(), entry(2)).unwrap();
        assert_eq!(map.remove(0, "B:q1").unwrap().map(|e| e.read1_coordinate), Some(2));
        assert_eq!(map.remove(0, "A:q1").unwrap().map(|e| e.read1_coordinate), Some(1));
    }
}
