//! Triples index store
//!
//! An [`Index`] holds one logical record per position, stored column-wise:
//!
//! ```text
//! matrix     [N × D quantized elements, row-major]
//! path_ids   [N × u32]  → paths (deduplicated, first-use order)
//! locations  [N × FileLocation]
//! ```
//!
//! Indexes are built once with [`IndexBuilder`], saved, and loaded
//! read-only. Nothing mutates an index after construction, so `&Index` can
//! be shared freely across query threads.
//!
//! # Safety
//!
//! [`Index::open`] memory-maps the file while parsing. The file must not be
//! truncated or rewritten during the call; the parsed index owns copies of
//! every column and does not keep the mapping alive.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;

use crate::codec::{self, CodecError, VectorType};
use crate::format::{self, FormatError, LoadOptions};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index construction produced zero triples")]
    EmptyIndex,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vectors must have at least one component")]
    EmptyVector,

    #[error("Index is full: at most {max} triples or paths")]
    Capacity { max: usize },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Where a triple's text lives inside its path's chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileLocation {
    /// Ordinal of the chunk within the payload.
    pub chunk: u32,
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.chunk)
    }
}

#[derive(Clone, PartialEq)]
pub struct Index {
    vector_type: VectorType,
    dim: usize,
    matrix: Vec<u8>,
    paths: Vec<String>,
    path_ids: Vec<u32>,
    locations: Vec<FileLocation>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("vector_type", &self.vector_type)
            .field("dim", &self.dim)
            .field("triples", &self.len())
            .field("paths", &self.paths.len())
            .finish()
    }
}

impl Index {
    /// Assemble an index from already-validated columns.
    pub(crate) fn from_parts(
        vector_type: VectorType,
        dim: usize,
        matrix: Vec<u8>,
        paths: Vec<String>,
        path_ids: Vec<u32>,
        locations: Vec<FileLocation>,
    ) -> Self {
        debug_assert_eq!(path_ids.len(), locations.len());
        debug_assert_eq!(matrix.len(), vector_type.encoded_len(dim) * path_ids.len());
        Self {
            vector_type,
            dim,
            matrix,
            paths,
            path_ids,
            locations,
        }
    }

    /// Open an index file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        Self::open_with(path, &LoadOptions::default())
    }

    /// Open an index file, checking the header against `opts`.
    pub fn open_with<P: AsRef<Path>>(path: P, opts: &LoadOptions) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            // Zero-length files cannot be mapped on every platform.
            return Err(FormatError::TruncatedFile {
                expected: format::HEADER_SIZE as u64,
                actual: 0,
            });
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let index = format::read_index(&mmap, opts)?;

        tracing::info!(
            "Loaded index {:?}: {} triples, dim {}, {}",
            path,
            index.len(),
            index.dim,
            index.vector_type
        );
        Ok(index)
    }

    /// Parse an in-memory index image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        format::read_index(bytes, &LoadOptions::default())
    }

    /// Parse an in-memory index image, checking the header against `opts`.
    pub fn from_bytes_with(bytes: &[u8], opts: &LoadOptions) -> Result<Self, FormatError> {
        format::read_index(bytes, opts)
    }

    /// Serialize to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64, FormatError> {
        format::write_index(self, writer)
    }

    /// Write the index to `path`.
    ///
    /// The image is written to a sibling `.tmp` file, synced, then renamed
    /// over `path`. The `.tmp` file is removed if any step fails. Concurrent
    /// saves to the same path are not supported.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<u64, FormatError> {
        if self.is_empty() {
            return Err(FormatError::EmptyIndex);
        }

        let path = path.as_ref();
        let tmp = tmp_path(path);
        let result = self.write_synced(&tmp).and_then(|written| {
            fs::rename(&tmp, path)?;
            Ok(written)
        });
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        tracing::info!("Saved index {:?} ({} bytes)", path, written);
        Ok(written)
    }

    fn write_synced(&self, tmp: &Path) -> Result<u64, FormatError> {
        let mut writer = BufWriter::new(File::create(tmp)?);
        let written = self.write_to(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(written)
    }

    #[inline]
    pub fn vector_type(&self) -> VectorType {
        self.vector_type
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of triples.
    #[inline]
    pub fn len(&self) -> usize {
        self.path_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.path_ids.is_empty()
    }

    /// Deduplicated path table.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Raw row-major matrix in storage form.
    pub fn matrix_bytes(&self) -> &[u8] {
        &self.matrix
    }

    /// Bytes per stored row.
    #[inline]
    pub fn row_len(&self) -> usize {
        self.vector_type.encoded_len(self.dim)
    }

    pub fn triple(&self, position: usize) -> Option<TripleRef<'_>> {
        (position < self.len()).then_some(TripleRef {
            index: self,
            position,
        })
    }

    pub fn triples(&self) -> impl ExactSizeIterator<Item = TripleRef<'_>> + '_ {
        (0..self.len()).map(move |position| TripleRef {
            index: self,
            position,
        })
    }

    #[inline]
    fn row(&self, position: usize) -> &[u8] {
        let len = self.row_len();
        &self.matrix[position * len..(position + 1) * len]
    }

    /// Dequantize row `position` into `out` (`out.len() == dim`).
    ///
    /// # Panics
    ///
    /// Panics if `position >= len()` or `out` has the wrong length.
    #[inline]
    pub fn dequantize_row_into(&self, position: usize, out: &mut [f32]) {
        assert_eq!(out.len(), self.dim, "scratch buffer must hold one row");
        codec::decode_unchecked(self.row(position), self.vector_type, out);
    }

    /// Dequantize a contiguous run of rows into `out`, row-major.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or `out.len() != rows * dim`.
    pub fn dequantize_rows_into(&self, rows: Range<usize>, out: &mut [f32]) {
        assert_eq!(out.len(), rows.len() * self.dim, "buffer must hold the row range");
        let len = self.row_len();
        let bytes = &self.matrix[rows.start * len..rows.end * len];
        codec::decode_unchecked(bytes, self.vector_type, out);
    }

    /// Summary used by the `stats` command.
    pub fn stats(&self) -> IndexStats {
        let mut per_path = vec![0usize; self.paths.len()];
        for &id in &self.path_ids {
            per_path[id as usize] += 1;
        }
        IndexStats {
            vector_type: self.vector_type,
            dim: self.dim,
            triples: self.len(),
            matrix_bytes: self.matrix.len(),
            per_path: self.paths.iter().cloned().zip(per_path).collect(),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Borrowed view of one aligned (vector, path, file-location) record.
#[derive(Clone, Copy)]
pub struct TripleRef<'a> {
    index: &'a Index,
    position: usize,
}

impl<'a> TripleRef<'a> {
    /// Position of the triple in the index.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn path_id(&self) -> u32 {
        self.index.path_ids[self.position]
    }

    pub fn path(&self) -> &'a str {
        &self.index.paths[self.path_id() as usize]
    }

    #[inline]
    pub fn location(&self) -> FileLocation {
        self.index.locations[self.position]
    }

    /// Storage-form vector bytes.
    pub fn vector_bytes(&self) -> &'a [u8] {
        self.index.row(self.position)
    }

    /// Dequantized vector.
    pub fn vector(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.index.dim];
        self.index.dequantize_row_into(self.position, &mut out);
        out
    }
}

impl PartialEq for TripleRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.path() == other.path()
            && self.location() == other.location()
            && self.vector_bytes() == other.vector_bytes()
    }
}

impl fmt::Debug for TripleRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Triple")
            .field("position", &self.position)
            .field("path", &self.path())
            .field("location", &self.location())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub vector_type: VectorType,
    pub dim: usize,
    pub triples: usize,
    pub matrix_bytes: usize,
    /// (path, triple count) in path-table order
    pub per_path: Vec<(String, usize)>,
}

/// Append-only builder producing an [`Index`].
///
/// The first pushed vector fixes the dimension. Paths are interned in
/// first-use order.
pub struct IndexBuilder {
    vector_type: VectorType,
    dim: Option<usize>,
    matrix: Vec<u8>,
    paths: Vec<String>,
    path_lookup: HashMap<String, u32>,
    path_ids: Vec<u32>,
    locations: Vec<FileLocation>,
}

impl IndexBuilder {
    pub fn new(vector_type: VectorType) -> Self {
        Self {
            vector_type,
            dim: None,
            matrix: Vec::new(),
            paths: Vec::new(),
            path_lookup: HashMap::new(),
            path_ids: Vec::new(),
            locations: Vec::new(),
        }
    }

    /// Require a specific dimension instead of taking it from the first vector.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn vector_type(&self) -> VectorType {
        self.vector_type
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.path_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_ids.is_empty()
    }

    fn check_dim(&self, actual: usize) -> Result<usize, IndexError> {
        if actual == 0 {
            return Err(IndexError::EmptyVector);
        }
        match self.dim {
            Some(expected) if expected != actual => {
                Err(IndexError::DimensionMismatch { expected, actual })
            }
            _ => Ok(actual),
        }
    }

    fn intern(&mut self, path: &str) -> Result<u32, IndexError> {
        if let Some(&id) = self.path_lookup.get(path) {
            return Ok(id);
        }
        let id = u32::try_from(self.paths.len()).map_err(|_| IndexError::Capacity {
            max: u32::MAX as usize,
        })?;
        self.paths.push(path.to_string());
        self.path_lookup.insert(path.to_string(), id);
        Ok(id)
    }

    fn ensure_capacity(&self) -> Result<(), IndexError> {
        if self.path_ids.len() >= u32::MAX as usize {
            return Err(IndexError::Capacity {
                max: u32::MAX as usize,
            });
        }
        Ok(())
    }

    fn append(&mut self, path: &str, location: FileLocation) -> Result<usize, IndexError> {
        let id = self.intern(path)?;
        self.path_ids.push(id);
        self.locations.push(location);
        Ok(self.path_ids.len() - 1)
    }

    /// Quantize and append a float vector. Returns its position.
    pub fn push(
        &mut self,
        vector: &[f32],
        path: &str,
        location: FileLocation,
    ) -> Result<usize, IndexError> {
        let dim = self.check_dim(vector.len())?;
        self.ensure_capacity()?;
        codec::encode_into(vector, self.vector_type, &mut self.matrix)?;
        self.dim = Some(dim);
        self.append(path, location)
    }

    /// Append a vector already in this index's storage form.
    pub fn push_encoded(
        &mut self,
        bytes: &[u8],
        path: &str,
        location: FileLocation,
    ) -> Result<usize, IndexError> {
        let dim = self.check_dim(codec::component_count(bytes, self.vector_type)?)?;
        self.ensure_capacity()?;
        if self.vector_type == VectorType::Float32 {
            // Validates finiteness the same way `push` does.
            codec::decode(bytes, VectorType::Float32).and_then(|v| {
                v.iter()
                    .position(|x| !x.is_finite())
                    .map_or(Ok(()), |index| Err(CodecError::NonFinite { index }))
            })?;
        }
        self.matrix.extend_from_slice(bytes);
        self.dim = Some(dim);
        self.append(path, location)
    }

    /// Finish construction. Fails with `EmptyIndex` if nothing was pushed.
    pub fn finish(self) -> Result<Index, IndexError> {
        let dim = match self.dim {
            Some(dim) if !self.path_ids.is_empty() => dim,
            _ => return Err(IndexError::EmptyIndex),
        };
        Ok(Index::from_parts(
            self.vector_type,
            dim,
            self.matrix,
            self.paths,
            self.path_ids,
            self.locations,
        ))
    }
}
