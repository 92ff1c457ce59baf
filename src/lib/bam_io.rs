//! SAM/BAM file I/O utilities.
//!
//! Readers and writers are chosen by file extension (`.bam` gets BGZF-backed
//! BAM I/O, anything else is treated as plain-text SAM) and exposed through
//! enums so the passes can stream records without caring about the container
//! format.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use noodles::bam;
use noodles::sam;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::header::record::value::map::header::tag as header_tag;

/// The record orderings the duplicate-marking pipeline can traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ordered by (reference, position); unmapped reads trail the mapped ones.
    Coordinate,
    /// Grouped by query name: all records of a template are adjacent.
    Queryname,
}

impl SortOrder {
    #[must_use]
    pub fn is_queryname(self) -> bool {
        matches!(self, Self::Queryname)
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "coordinate" => Ok(Self::Coordinate),
            "queryname" => Ok(Self::Queryname),
            other => Err(format!("unsupported sort order: {other}")),
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinate => write!(f, "coordinate"),
            Self::Queryname => write!(f, "queryname"),
        }
    }
}

/// Reads the `@HD SO` field from a header, if one is declared.
#[must_use]
pub fn header_sort_order(header: &Header) -> Option<SortOrder> {
    let hd = header.header()?;
    let so = hd.other_fields().get(&header_tag::SORT_ORDER)?;
    std::str::from_utf8(so.as_ref()).ok()?.parse().ok()
}

fn is_bam_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("bam"))
}

/// Reader over either container format, yielding `RecordBuf`s.
pub enum AlignmentReader {
    Bam(bam::io::Reader<noodles::bgzf::io::Reader<File>>),
    Sam(sam::io::Reader<BufReader<File>>),
}

impl AlignmentReader {
    /// Reads one record; returns 0 at end of stream.
    ///
    /// # Errors
    /// Returns an error on malformed records (data corruption is fatal).
    pub fn read_record_buf(&mut self, header: &Header, record: &mut RecordBuf) -> io::Result<usize> {
        match self {
            Self::Bam(reader) => reader.read_record_buf(header, record),
            Self::Sam(reader) => reader.read_record_buf(header, record),
        }
    }
}

/// Opens an alignment file and reads its header.
///
/// # Errors
/// Fails if the file cannot be opened or its header is malformed.
pub fn open_alignment_reader<P: AsRef<Path>>(path: P) -> Result<(AlignmentReader, Header)> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open input: {}", path.display()))?;

    if is_bam_path(path) {
        let mut reader = bam::io::Reader::new(file);
        let header = reader
            .read_header()
            .with_context(|| format!("Failed to read BAM header: {}", path.display()))?;
        Ok((AlignmentReader::Bam(reader), header))
    } else {
        let mut reader = sam::io::Reader::new(BufReader::new(file));
        let header = reader
            .read_header()
            .with_context(|| format!("Failed to read SAM header: {}", path.display()))?;
        Ok((AlignmentReader::Sam(reader), header))
    }
}

/// Writer over either container format.
pub enum AlignmentWriter {
    Bam(bam::io::Writer<noodles::bgzf::io::Writer<File>>),
    Sam(sam::io::Writer<BufWriter<File>>),
}

impl AlignmentWriter {
    /// Writes one record.
    ///
    /// # Errors
    /// Returns an error if the record cannot be encoded or written.
    pub fn write_record(&mut self, header: &Header, record: &RecordBuf) -> io::Result<()> {
        match self {
            Self::Bam(writer) => writer.write_alignment_record(header, record),
            Self::Sam(writer) => writer.write_alignment_record(header, record),
        }
    }

    /// Flushes buffers and writes any end-of-file marker.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn finish(self, header: &Header) -> io::Result<()> {
        match self {
            Self::Bam(mut writer) => writer.finish(header),
            Self::Sam(writer) => {
                use std::io::Write;
                writer.into_inner().flush()
            }
        }
    }
}

/// Creates an alignment writer and writes the header.
///
/// # Errors
/// Fails if the file cannot be created or the header cannot be written.
pub fn create_alignment_writer<P: AsRef<Path>>(
    path: P,
    header: &Header,
) -> Result<AlignmentWriter> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create output: {}", path.display()))?;

    if is_bam_path(path) {
        let mut writer = bam::io::Writer::new(file);
        writer
            .write_header(header)
            .with_context(|| format!("Failed to write BAM header: {}", path.display()))?;
        Ok(AlignmentWriter::Bam(writer))
    } else {
        let mut writer = sam::io::Writer::new(BufWriter::new(file));
        writer
            .write_header(header)
            .with_context(|| format!("Failed to write SAM header: {}", path.display()))?;
        Ok(AlignmentWriter::Sam(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::SamBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("coordinate".parse::<SortOrder>().unwrap(), SortOrder::Coordinate);
        assert_eq!("queryname".parse::<SortOrder>().unwrap(), SortOrder::Queryname);
        assert!("unsorted".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_header_sort_order_round_trip() {
        let builder = SamBuilder::new().sort_order("queryname");
        assert_eq!(header_sort_order(&builder.header()), Some(SortOrder::Queryname));
    }

    #[test]
    fn test_bam_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.bam");

        let mut builder = SamBuilder::new();
        builder.add_pair().name("p1").contig(0).start1(100).start2(300).build();
        builder.add_frag().name("f1").contig(1).start(500).build();
        builder.write_bam(&path).unwrap();

        let (mut reader, header) = open_alignment_reader(&path).unwrap();
        assert_eq!(header_sort_order(&header), Some(SortOrder::Coordinate));

        let mut record = RecordBuf::default();
        let mut names = Vec::new();
        while reader.read_record_buf(&header, &mut record).unwrap() != 0 {
            names.push(record.name().map(|n| n.to_vec()));
        }
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], Some(b"p1".to_vec()));
        assert_eq!(names[2], Some(b"f1".to_vec()));
    }

    #[test]
    fn test_sam_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sam");

        let mut builder = SamBuilder::new();
        builder.add_frag().name("f1").contig(0).start(500).build();
        builder.write_sam(&path).unwrap();

        let (mut reader, header) = open_alignment_reader(&path).unwrap();
        let mut record = RecordBuf::default();
        let mut count = 0;
        while reader.read_record_buf(&header, &mut record).unwrap() != 0 {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
