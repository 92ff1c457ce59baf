//! The 5'-end signature record used for duplicate detection.
//!
//! A [`ReadEnds`] summarizes one primary mapped read (a fragment signature) or
//! one completed mate pair (a pair signature): library, 5'-end positions,
//! strand orientation, optical location, score, and the ordinal positions of
//! the source records in the input file. Signatures are accumulated in
//! external sorting collections during the first pass and traversed in sorted
//! order during the second.
//!
//! The record is a single struct for all three shapes the pipeline needs
//! (plain, with barcodes, with representative read names): barcode fields
//! default to zero and the read name to `None`, and [`ReadEndsCodec`] only
//! serializes them when the corresponding capability is enabled.

use std::cmp::Ordering;
use std::io::{self, Read, Write};

use bstr::BString;

use crate::sort::SpillCodec;

/// Sentinel for "no reference sequence" (unmapped mate / lone fragment).
pub const NO_REFERENCE_INDEX: i32 = -1;

/// Strand orientation bytes for signatures.
///
/// `F`/`R` describe lone fragments; the four pair values encode the strands of
/// read1 and read2 after the two ends have been put in genomic order.
pub mod orientation {
    pub const F: u8 = 0;
    pub const R: u8 = 1;
    pub const FF: u8 = 2;
    pub const FR: u8 = 3;
    pub const RF: u8 = 4;
    pub const RR: u8 = 5;
}

/// Encodes the strand combination of an ordered pair of reads.
#[must_use]
pub fn pair_orientation(read1_negative: bool, read2_negative: bool) -> u8 {
    orientation::FF + ((u8::from(read1_negative) << 1) | u8::from(read2_negative))
}

/// A 5'-end signature for one read or one completed read pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEnds {
    /// Compact id of the library the read belongs to.
    pub library_id: u16,
    /// Reference index of the (genomically earlier) read1 end.
    pub read1_reference_index: i32,
    /// Unclipped 5' coordinate of read1.
    pub read1_coordinate: i32,
    /// One of the [`orientation`] bytes.
    pub orientation: u8,
    /// 0-based ordinal of read1 in the input stream.
    pub read1_index_in_file: u64,
    /// Reference index of the later read2 end, or -1 for a lone fragment.
    /// A fragment signature whose mate is mapped carries the mate reference
    /// index here so the fragment sweep can tell pairs from fragments.
    pub read2_reference_index: i32,
    /// Unclipped 5' coordinate of read2, or -1.
    pub read2_coordinate: i32,
    /// 0-based ordinal of read2, or the read1 ordinal for a fragment.
    pub read2_index_in_file: u64,
    /// Duplicate score of the read (for pairs, the sum of both ends).
    pub score: u16,
    /// Ordinal of the read group within the header, for optical comparison.
    pub read_group: u16,
    /// Flowcell tile, or -1 when no physical location was parsed.
    pub tile: i16,
    /// Pixel x coordinate on the tile.
    pub x: i32,
    /// Pixel y coordinate on the tile.
    pub y: i32,
    /// Strand pair with the first-of-pair read fixed in the leading position,
    /// regardless of genomic order.
    pub orientation_for_optical: u8,
    /// Set by optical clustering during the second pass; never serialized.
    pub is_optical_duplicate: bool,
    /// Hash of the template barcode, or 0.
    pub barcode: u32,
    /// Hash of the read-one barcode, or 0.
    pub read_one_barcode: u32,
    /// Hash of the read-two barcode, or 0.
    pub read_two_barcode: u32,
    /// Name of the mate that completed the pair; present only when
    /// representative-read tagging is enabled.
    pub first_encountered_read_name: Option<BString>,
}

impl Default for ReadEnds {
    fn default() -> Self {
        Self {
            library_id: 0,
            read1_reference_index: NO_REFERENCE_INDEX,
            read1_coordinate: -1,
            orientation: orientation::F,
            read1_index_in_file: 0,
            read2_reference_index: NO_REFERENCE_INDEX,
            read2_coordinate: -1,
            read2_index_in_file: 0,
            score: 0,
            read_group: 0,
            tile: -1,
            x: -1,
            y: -1,
            orientation_for_optical: orientation::F,
            is_optical_duplicate: false,
            barcode: 0,
            read_one_barcode: 0,
            read_two_barcode: 0,
            first_encountered_read_name: None,
        }
    }
}

impl ReadEnds {
    /// True if this signature knows about a mapped mate (pair signatures, and
    /// fragment signatures emitted from the primary side of a mapped pair).
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.read2_reference_index != NO_REFERENCE_INDEX
    }

    /// True if a physical location was parsed from the read name.
    #[must_use]
    pub fn has_location(&self) -> bool {
        self.tile >= 0
    }
}

impl Ord for ReadEnds {
    /// Orders by library, barcodes, read1 position, orientation, read2
    /// position, then file indices. Barcode fields are all zero when barcodes
    /// are not in use, so a single chain serves both modes.
    fn cmp(&self, other: &Self) -> Ordering {
        self.library_id
            .cmp(&other.library_id)
            .then_with(|| self.barcode.cmp(&other.barcode))
            .then_with(|| self.read_one_barcode.cmp(&other.read_one_barcode))
            .then_with(|| self.read_two_barcode.cmp(&other.read_two_barcode))
            .then_with(|| self.read1_reference_index.cmp(&other.read1_reference_index))
            .then_with(|| self.read1_coordinate.cmp(&other.read1_coordinate))
            .then_with(|| self.orientation.cmp(&other.orientation))
            .then_with(|| self.read2_reference_index.cmp(&other.read2_reference_index))
            .then_with(|| self.read2_coordinate.cmp(&other.read2_coordinate))
            .then_with(|| self.read1_index_in_file.cmp(&other.read1_index_in_file))
            .then_with(|| self.read2_index_in_file.cmp(&other.read2_index_in_file))
    }
}

impl PartialOrd for ReadEnds {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

//////////////////////////////////////////////////////////////////////////////
// Codec
//////////////////////////////////////////////////////////////////////////////

/// Fixed-width spill codec for [`ReadEnds`].
///
/// The two capability flags must match between the encoding and decoding
/// sides of a run; they are set once at startup from the command options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadEndsCodec {
    /// Serialize the three barcode hashes.
    pub with_barcodes: bool,
    /// Serialize the first-encountered read name.
    pub with_read_name: bool,
}

impl ReadEndsCodec {
    /// Approximate serialized size of one record, used for memory budgeting.
    #[must_use]
    pub fn record_size(&self) -> usize {
        let mut size = 50;
        if self.with_barcodes {
            size += 12;
        }
        if self.with_read_name {
            size += 2 + 34;
        }
        size
    }
}

/// Reads an exact number of bytes, mapping a clean EOF at the first byte to
/// `None` and a mid-record EOF to a corruption error.
fn read_exact_or_eof<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<Option<()>> {
    match source.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_u16<R: Read>(source: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_i16<R: Read>(source: &mut R) -> io::Result<i16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

fn read_i32<R: Read>(source: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(source: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(source: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u8<R: Read>(source: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    source.read_exact(&mut buf)?;
    Ok(buf[0])
}

impl SpillCodec for ReadEndsCodec {
    type Item = ReadEnds;

    fn encode<W: Write>(&self, item: &ReadEnds, sink: &mut W) -> io::Result<()> {
        sink.write_all(&item.library_id.to_le_bytes())?;
        sink.write_all(&item.read1_reference_index.to_le_bytes())?;
        sink.write_all(&item.read1_coordinate.to_le_bytes())?;
        sink.write_all(&[item.orientation])?;
        sink.write_all(&item.read1_index_in_file.to_le_bytes())?;
        sink.write_all(&item.read2_reference_index.to_le_bytes())?;
        sink.write_all(&item.read2_coordinate.to_le_bytes())?;
        sink.write_all(&item.read2_index_in_file.to_le_bytes())?;
        sink.write_all(&item.score.to_le_bytes())?;
        sink.write_all(&item.read_group.to_le_bytes())?;
        sink.write_all(&item.tile.to_le_bytes())?;
        sink.write_all(&item.x.to_le_bytes())?;
        sink.write_all(&item.y.to_le_bytes())?;
        sink.write_all(&[item.orientation_for_optical])?;
        if self.with_barcodes {
            sink.write_all(&item.barcode.to_le_bytes())?;
            sink.write_all(&item.read_one_barcode.to_le_bytes())?;
            sink.write_all(&item.read_two_barcode.to_le_bytes())?;
        }
        if self.with_read_name {
            let name = item.first_encountered_read_name.as_ref();
            let len = name.map_or(0, |n| n.len());
            let len = u16::try_from(len)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "read name too long"))?;
            sink.write_all(&len.to_le_bytes())?;
            if let Some(name) = name {
                sink.write_all(name)?;
            }
        }
        Ok(())
    }

    fn decode<R: Read>(&self, source: &mut R) -> io::Result<Option<ReadEnds>> {
        let mut first = [0u8; 2];
        if read_exact_or_eof(source, &mut first)?.is_none() {
            return Ok(None);
        }
        let mut item = ReadEnds {
            library_id: u16::from_le_bytes(first),
            read1_reference_index: read_i32(source)?,
            read1_coordinate: read_i32(source)?,
            orientation: read_u8(source)?,
            read1_index_in_file: read_u64(source)?,
            read2_reference_index: read_i32(source)?,
            read2_coordinate: read_i32(source)?,
            read2_index_in_file: read_u64(source)?,
            score: read_u16(source)?,
            read_group: read_u16(source)?,
            tile: read_i16(source)?,
            x: read_i32(source)?,
            y: read_i32(source)?,
            orientation_for_optical: read_u8(source)?,
            ..ReadEnds::default()
        };
        if self.with_barcodes {
            item.barcode = read_u32(source)?;
            item.read_one_barcode = read_u32(source)?;
            item.read_two_barcode = read_u32(source)?;
        }
        if self.with_read_name {
            let len = read_u16(source)? as usize;
            if len > 0 {
                let mut name = vec![0u8; len];
                source.read_exact(&mut name)?;
                item.first_encountered_read_name = Some(BString::from(name));
            }
        }
        Ok(Some(item))
    }
}

//////////////////////////////////////////////////////////////////////////////
// Representative reads
//////////////////////////////////////////////////////////////////////////////

/// One member of a duplicate set, pointing at the set's representative read.
///
/// Emitted once per set member during the pair sweep and consumed in file
/// order by the third pass to populate the `RR` and `DS` tags. Indices are
/// 64-bit so the record count is not bounded by a 32-bit ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentativeRead {
    /// Name of the representative read of the set.
    pub name: BString,
    /// Cardinality of the duplicate set.
    pub set_size: u64,
    /// File ordinal of this member's read1.
    pub read1_index_in_file: u64,
}

impl Ord for RepresentativeRead {
    fn cmp(&self, other: &Self) -> Ordering {
        self.read1_index_in_file.cmp(&other.read1_index_in_file)
    }
}

impl PartialOrd for RepresentativeRead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Spill codec for [`RepresentativeRead`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RepresentativeReadCodec;

impl SpillCodec for RepresentativeReadCodec {
    type Item = RepresentativeRead;

    fn encode<W: Write>(&self, item: &RepresentativeRead, sink: &mut W) -> io::Result<()> {
        sink.write_all(&item.read1_index_in_file.to_le_bytes())?;
        sink.write_all(&item.set_size.to_le_bytes())?;
        let len = u16::try_from(item.name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "read name too long"))?;
        sink.write_all(&len.to_le_bytes())?;
        sink.write_all(&item.name)?;
        Ok(())
    }

    fn decode<R: Read>(&self, source: &mut R) -> io::Result<Option<RepresentativeRead>> {
        let mut first = [0u8; 8];
        if read_exact_or_eof(source, &mut first)?.is_none() {
            return Ok(None);
        }
        let read1_index_in_file = u64::from_le_bytes(first);
        let set_size = read_u64(source)?;
        let len = read_u16(source)? as usize;
        let mut name = vec![0u8; len];
        source.read_exact(&mut name)?;
        Ok(Some(RepresentativeRead { name: BString::from(name), set_size, read1_index_in_file }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_orientation_bytes() {
        assert_eq!(pair_orientation(false, false), orientation::FF);
        assert_eq!(pair_orientation(false, true), orientation::FR);
        assert_eq!(pair_orientation(true, false), orientation::RF);
        assert_eq!(pair_orientation(true, true), orientation::RR);
    }

    #[test]
    fn test_ordering_position_before_orientation() {
        let a = ReadEnds {
            read1_reference_index: 0,
            read1_coordinate: 100,
            orientation: orientation::FR,
            ..ReadEnds::default()
        };
        let b = ReadEnds {
            read1_reference_index: 0,
            read1_coordinate: 101,
            orientation: orientation::FF,
            ..ReadEnds::default()
        };
        assert!(a < b);
    }

    #[test]
    fn test_ordering_falls_back_to_file_index() {
        let a = ReadEnds { read1_coordinate: 100, read1_index_in_file: 4, ..ReadEnds::default() };
        let b = ReadEnds { read1_coordinate: 100, read1_index_in_file: 9, ..ReadEnds::default() };
        assert!(a < b);
    }

    #[test]
    fn test_ordering_library_first() {
        let a = ReadEnds { library_id: 2, read1_coordinate: 1, ..ReadEnds::default() };
        let b = ReadEnds { library_id: 1, read1_coordinate: 999, ..ReadEnds::default() };
        assert!(b < a);
    }

    #[test]
    fn test_codec_round_trip_plain() {
        let codec = ReadEndsCodec::default();
        let item = ReadEnds {
            library_id: 3,
            read1_reference_index: 1,
            read1_coordinate: 12345,
            orientation: orientation::FR,
            read1_index_in_file: 42,
            read2_reference_index: 1,
            read2_coordinate: 12545,
            read2_index_in_file: 43,
            score: 180,
            read_group: 1,
            tile: 1101,
            x: 1000,
            y: 2000,
            orientation_for_optical: orientation::RF,
            ..ReadEnds::default()
        };

        let mut buf = Vec::new();
        codec.encode(&item, &mut buf).unwrap();
        assert_eq!(buf.len(), codec.record_size());

        let mut cursor = io::Cursor::new(buf);
        let decoded = codec.decode(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, item);
        assert!(codec.decode(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_codec_round_trip_with_capabilities() {
        let codec = ReadEndsCodec { with_barcodes: true, with_read_name: true };
        let item = ReadEnds {
            barcode: 0xDEAD_BEEF,
            read_one_barcode: 7,
            read_two_barcode: 9,
            first_encountered_read_name: Some(BString::from("q1:1101:1000:2000")),
            ..ReadEnds::default()
        };

        let mut buf = Vec::new();
        codec.encode(&item, &mut buf).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let decoded = codec.decode(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.barcode, 0xDEAD_BEEF);
        assert_eq!(decoded.first_encountered_read_name, item.first_encountered_read_name);
    }

    #[test]
    fn test_codec_truncated_record_is_an_error() {
        let codec = ReadEndsCodec::default();
        let mut buf = Vec::new();
        codec.encode(&ReadEnds::default(), &mut buf).unwrap();
        buf.truncate(buf.len() - 4);

        let mut cursor = io::Cursor::new(buf);
        assert!(codec.decode(&mut cursor).is_err());
    }

    #[test]
    fn test_representative_codec_round_trip() {
        let codec = RepresentativeReadCodec;
        let item = RepresentativeRead {
            name: BString::from("machine:1:1101:2:3"),
            set_size: 4,
            read1_index_in_file: 17,
        };
        let mut buf = Vec::new();
        codec.encode(&item, &mut buf).unwrap();
        let mut cursor = io::Cursor::new(buf);
        assert_eq!(codec.decode(&mut cursor).unwrap().unwrap(), item);
    }

    #[test]
    fn test_is_paired_uses_read2_reference() {
        let frag = ReadEnds::default();
        assert!(!frag.is_paired());
        let pair = ReadEnds { read2_reference_index: 0, ..ReadEnds::default() };
        assert!(pair.is_paired());
    }
}
