//! .tpx index file format
//!
//! # File Structure
//!
//! ```text
//! Offset   Size      Type        Description
//! ───────────────────────────────────────────────────────────────
//! 0x00     8         [u8; 8]     Magic: "TRIPLEX1"
//! 0x08     4         u32 LE      Vector type tag (codec ordinal)
//! 0x0C     4         u32 LE      D: Dimensions
//! 0x10     4         u32 LE      N: Number of triples
//! 0x14     N*D*w     [u8]        Quantized vector matrix, row-major
//! ...      4         u32 LE      P: Number of paths
//! ...      P × var   len-prefixed UTF-8 path strings (u32 LE length)
//! ...      N × var   len-prefixed location records (u16 LE length)
//!                    record: u32 LE path id, u32 LE chunk ordinal
//! ```
//!
//! `w` is the element width of the vector type. There is no compression and
//! no checksum; corruption is detected only through the consistency checks
//! performed by [`read_index`].

use std::io::{self, Write};

use thiserror::Error;

use crate::codec::{CodecError, VectorType};
use crate::store::{FileLocation, Index};

/// Magic bytes identifying a triples index file: "TRIPLEX1"
pub const MAGIC: [u8; 8] = *b"TRIPLEX1";

/// Header size in bytes: 8 (magic) + 4 (type) + 4 (dims) + 4 (count)
pub const HEADER_SIZE: usize = 20;

/// Wire size of a location record as written by this version.
pub const LOCATION_RECORD_SIZE: usize = 8;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    #[error("Truncated file: expected at least {expected} bytes, got {actual}")]
    TruncatedFile { expected: u64, actual: u64 },

    #[error("Unsupported vector type tag: {0}")]
    UnsupportedVectorType(u32),

    #[error("Refusing to write an index with zero triples")]
    EmptyIndex,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for FormatError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedVectorType(tag) => Self::UnsupportedVectorType(tag),
            other => Self::FormatMismatch(other.to_string()),
        }
    }
}

/// Expectations checked against the header at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub vector_type: Option<VectorType>,
    pub dim: Option<usize>,
}

impl LoadOptions {
    pub fn expect(vector_type: VectorType, dim: usize) -> Self {
        Self {
            vector_type: Some(vector_type),
            dim: Some(dim),
        }
    }
}

/// Parsed file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub vector_type: VectorType,
    pub dimensions: u32,
    pub count: u32,
}

impl IndexHeader {
    /// Parse header from the first [`HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TruncatedFile {
                expected: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }
        if bytes[0..8] != MAGIC {
            return Err(FormatError::FormatMismatch(
                "invalid magic bytes: expected TRIPLEX1".into(),
            ));
        }

        let tag = le_u32(&bytes[8..12]);
        let vector_type = VectorType::from_tag(tag)?;
        let dimensions = le_u32(&bytes[12..16]);
        let count = le_u32(&bytes[16..20]);

        if dimensions == 0 {
            return Err(FormatError::FormatMismatch("dimension count is zero".into()));
        }
        if count == 0 {
            return Err(FormatError::FormatMismatch("index has zero triples".into()));
        }

        Ok(Self {
            vector_type,
            dimensions,
            count,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.vector_type.tag().to_le_bytes());
        buf[12..16].copy_from_slice(&self.dimensions.to_le_bytes());
        buf[16..20].copy_from_slice(&self.count.to_le_bytes());
        buf
    }

    /// Size of the vector matrix in bytes, `None` on overflow.
    pub fn matrix_len(&self) -> Option<u64> {
        (self.count as u64)
            .checked_mul(self.dimensions as u64)?
            .checked_mul(self.vector_type.width() as u64)
    }

    fn check(&self, opts: &LoadOptions) -> Result<(), FormatError> {
        if let Some(expected) = opts.vector_type {
            if expected != self.vector_type {
                return Err(FormatError::FormatMismatch(format!(
                    "vector type {} does not match expected {}",
                    self.vector_type, expected
                )));
            }
        }
        if let Some(expected) = opts.dim {
            if expected != self.dimensions as usize {
                return Err(FormatError::FormatMismatch(format!(
                    "dimension {} does not match expected {}",
                    self.dimensions, expected
                )));
            }
        }
        Ok(())
    }
}

#[inline]
fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Bounds-checked forward reader over the file body.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let out = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(FormatError::TruncatedFile {
                expected: self.pos as u64 + n as u64,
                actual: self.bytes.len() as u64,
            }),
        }
    }

    fn u16(&mut self) -> Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        self.take(4).map(le_u32)
    }
}

/// Parse a complete index image. Never returns a partial index.
pub fn read_index(bytes: &[u8], opts: &LoadOptions) -> Result<Index, FormatError> {
    let header = IndexHeader::from_bytes(bytes)?;
    header.check(opts)?;

    let matrix_len = header
        .matrix_len()
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| FormatError::FormatMismatch("matrix size overflows".into()))?;

    let mut cursor = Cursor {
        bytes,
        pos: HEADER_SIZE,
    };
    let matrix = cursor.take(matrix_len)?;

    if header.vector_type == VectorType::Float32 {
        let non_finite = matrix
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .position(|x| !x.is_finite());
        if let Some(pos) = non_finite {
            return Err(FormatError::FormatMismatch(format!(
                "non-finite component at matrix offset {pos}"
            )));
        }
    }

    let path_count = cursor.u32()? as usize;
    // Each path costs at least its 4-byte length prefix.
    let remaining = bytes.len() - cursor.pos;
    if path_count > remaining / 4 {
        return Err(FormatError::TruncatedFile {
            expected: cursor.pos as u64 + path_count as u64 * 4,
            actual: bytes.len() as u64,
        });
    }
    let mut paths = Vec::with_capacity(path_count);
    for i in 0..path_count {
        let len = cursor.u32()? as usize;
        let raw = cursor.take(len)?;
        let path = std::str::from_utf8(raw)
            .map_err(|e| FormatError::FormatMismatch(format!("path {i} is not UTF-8: {e}")))?;
        paths.push(path.to_string());
    }

    let count = header.count as usize;
    let mut path_ids = Vec::with_capacity(count.min(bytes.len() / 2));
    let mut locations = Vec::with_capacity(count.min(bytes.len() / 2));
    for i in 0..count {
        let len = cursor.u16()? as usize;
        let record = cursor.take(len)?;
        if len < LOCATION_RECORD_SIZE {
            return Err(FormatError::FormatMismatch(format!(
                "location record {i} is {len} bytes, need {LOCATION_RECORD_SIZE}"
            )));
        }
        let path_id = le_u32(&record[0..4]);
        if path_id as usize >= paths.len() {
            return Err(FormatError::FormatMismatch(format!(
                "location record {i} references path {path_id} of {}",
                paths.len()
            )));
        }
        path_ids.push(path_id);
        locations.push(FileLocation {
            chunk: le_u32(&record[4..8]),
        });
    }

    if cursor.pos != bytes.len() {
        return Err(FormatError::FormatMismatch(format!(
            "{} trailing bytes after metadata",
            bytes.len() - cursor.pos
        )));
    }

    Ok(Index::from_parts(
        header.vector_type,
        header.dimensions as usize,
        matrix.to_vec(),
        paths,
        path_ids,
        locations,
    ))
}

/// Serialize `index` to `writer`, returning the number of bytes written.
pub fn write_index<W: Write>(index: &Index, writer: &mut W) -> Result<u64, FormatError> {
    if index.is_empty() {
        return Err(FormatError::EmptyIndex);
    }

    let header = IndexHeader {
        vector_type: index.vector_type(),
        dimensions: index.dim() as u32,
        count: index.len() as u32,
    };
    let mut written = 0u64;

    writer.write_all(&header.to_bytes())?;
    written += HEADER_SIZE as u64;

    writer.write_all(index.matrix_bytes())?;
    written += index.matrix_bytes().len() as u64;

    writer.write_all(&(index.paths().len() as u32).to_le_bytes())?;
    written += 4;
    for path in index.paths() {
        writer.write_all(&(path.len() as u32).to_le_bytes())?;
        writer.write_all(path.as_bytes())?;
        written += 4 + path.len() as u64;
    }

    for triple in index.triples() {
        let mut record = [0u8; 2 + LOCATION_RECORD_SIZE];
        record[0..2].copy_from_slice(&(LOCATION_RECORD_SIZE as u16).to_le_bytes());
        record[2..6].copy_from_slice(&triple.path_id().to_le_bytes());
        record[6..10].copy_from_slice(&triple.location().chunk.to_le_bytes());
        writer.write_all(&record)?;
        written += record.len() as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexBuilder;

    fn sample_index() -> Index {
        let mut builder = IndexBuilder::new(VectorType::Int8);
        builder
            .push(&[1.0, 0.0, 0.0], "docs/a.json", FileLocation { chunk: 0 })
            .unwrap();
        builder
            .push(&[0.0, 1.0, 0.0], "docs/a.json", FileLocation { chunk: 1 })
            .unwrap();
        builder
            .push(&[0.6, 0.8, 0.0], "docs/b.json", FileLocation { chunk: 0 })
            .unwrap();
        builder.finish().unwrap()
    }

    fn image(index: &Index) -> Vec<u8> {
        let mut buf = Vec::new();
        write_index(index, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_roundtrip() {
        let header = IndexHeader {
            vector_type: VectorType::Float32,
            dimensions: 1536,
            count: 1000,
        };
        let parsed = IndexHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.matrix_len(), Some(1000 * 1536 * 4));
    }

    #[test]
    fn test_layout() {
        let index = sample_index();
        let bytes = image(&index);

        assert_eq!(&bytes[0..8], b"TRIPLEX1");
        assert_eq!(le_u32(&bytes[8..12]), 1);
        assert_eq!(le_u32(&bytes[12..16]), 3);
        assert_eq!(le_u32(&bytes[16..20]), 3);
        // Matrix: 3 rows × 3 dims × 1 byte
        assert_eq!(bytes[20] as i8, 127);
        assert_eq!(le_u32(&bytes[29..33]), 2);

        let paths_len = 4 + (4 + 11) * 2;
        let records_len = 3 * (2 + LOCATION_RECORD_SIZE);
        assert_eq!(bytes.len(), HEADER_SIZE + 9 + paths_len + records_len);
    }

    #[test]
    fn test_roundtrip_is_identical() {
        let index = sample_index();
        let bytes = image(&index);
        let loaded = read_index(&bytes, &LoadOptions::default()).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(image(&loaded), bytes);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = image(&sample_index());
        bytes[0] = b'X';
        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)));
    }

    #[test]
    fn test_unknown_vector_type() {
        let mut bytes = image(&sample_index());
        bytes[8..12].copy_from_slice(&9u32.to_le_bytes());
        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVectorType(9)));
    }

    #[test]
    fn test_expectations_checked() {
        let bytes = image(&sample_index());
        let err = read_index(&bytes, &LoadOptions::expect(VectorType::Int8, 4)).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)));

        let err = read_index(&bytes, &LoadOptions::expect(VectorType::Float32, 3)).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)));

        assert!(read_index(&bytes, &LoadOptions::expect(VectorType::Int8, 3)).is_ok());
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = image(&sample_index());
        for len in 0..bytes.len() {
            let err = read_index(&bytes[..len], &LoadOptions::default()).unwrap_err();
            assert!(
                matches!(err, FormatError::TruncatedFile { .. }),
                "len {len}: {err:?}"
            );
        }
    }

    #[test]
    fn test_count_larger_than_body() {
        let mut bytes = image(&sample_index());
        bytes[16..20].copy_from_slice(&1_000_000u32.to_le_bytes());
        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            FormatError::TruncatedFile {
                expected: 3_000_020,
                ..
            }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = image(&sample_index());
        bytes.push(0);
        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)));
    }

    #[test]
    fn test_path_id_out_of_range() {
        let mut bytes = image(&sample_index());
        // Last record's path id sits 8 bytes from the end.
        let at = bytes.len() - 8;
        bytes[at..at + 4].copy_from_slice(&5u32.to_le_bytes());
        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)));
    }

    #[test]
    fn test_write_empty_refused() {
        let index = Index::from_parts(VectorType::Int8, 3, vec![], vec![], vec![], vec![]);
        let mut buf = Vec::new();
        assert!(matches!(
            write_index(&index, &mut buf),
            Err(FormatError::EmptyIndex)
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_triples_rejected_on_load() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let err = read_index(&bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch(_)), "{err:?}");
        assert!(IndexHeader::from_bytes(&bytes[..HEADER_SIZE]).is_err());
    }
}
