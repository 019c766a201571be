// BYTE SOURCE - Random-access reads over files and in-memory buffers
//
// Every structural reader and demuxer goes through this trait:
// • bounded reads at arbitrary offsets
// • sizes are clamped against the source length BEFORE allocating
// • one implementation per backing store (file, memory)

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Range {offset}+{len} is outside a source of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

// ============================================================================
// ByteRange
// ============================================================================

/// Location of a payload inside a source. Bytes are only read on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-range relative to this one, or `None` if it would leave it.
    pub fn slice(&self, rel_offset: u64, len: u64) -> Option<ByteRange> {
        let end = rel_offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(ByteRange::new(self.offset + rel_offset, len))
    }
}

// ============================================================================
// ByteSource
// ============================================================================

pub trait ByteSource {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset`. Short reads only happen at the end.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
        let size = self.size();
        let len = buf.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(SourceError::OutOfBounds { offset, len, size });
        }

        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(SourceError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source ended early",
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Materialize a range. Fails without allocating if the range leaves the source.
    fn read_range(&mut self, range: ByteRange) -> Result<Vec<u8>, SourceError> {
        let size = self.size();
        if range.end() > size || range.offset.checked_add(range.len).is_none() {
            return Err(SourceError::OutOfBounds {
                offset: range.offset,
                len: range.len,
                size,
            });
        }
        let mut buf = vec![0u8; range.len as usize];
        self.read_exact_at(range.offset, &mut buf)?;
        Ok(buf)
    }

    /// Read at most `max_len` bytes starting at `offset`, clamped to the source end.
    fn read_clamped(&mut self, offset: u64, max_len: u64) -> Result<Vec<u8>, SourceError> {
        let size = self.size();
        if offset >= size {
            return Ok(Vec::new());
        }
        let len = max_len.min(size - offset);
        self.read_range(ByteRange::new(offset, len))
    }
}

// ============================================================================
// File backed
// ============================================================================

pub struct FileSource {
    reader: BufReader<File>,
    size: u64,
    pos: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::with_capacity(64 * 1024, file),
            size,
            pos: 0,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        if offset != self.pos {
            // Short forward hops stay inside the BufReader buffer
            let delta = offset as i128 - self.pos as i128;
            if delta > 0 && delta < 64 * 1024 {
                self.reader.seek_relative(delta as i64)?;
            } else {
                self.reader.seek(SeekFrom::Start(offset))?;
            }
            self.pos = offset;
        }

        let want = buf.len().min((self.size - offset) as usize);
        let mut filled = 0;
        while filled < want {
            let n = self.reader.read(&mut buf[filled..want])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.pos += filled as u64;
        Ok(filled)
    }
}

// ============================================================================
// Memory backed
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
