//! RIFF chunk walker (AVI, WAVE).
//!
//! Chunk = 4-byte ASCII id, 4-byte little-endian size, payload, and one pad
//! byte when the size is odd. `RIFF` and `LIST` chunks start their payload
//! with a 4-byte list type.

use std::ops::ControlFlow;

use bytes::Buf;

use crate::source::{ByteRange, ByteSource};
use crate::tree::{ElementSize, TreeError};

pub const RIFF: [u8; 4] = *b"RIFF";
pub const LIST: [u8; 4] = *b"LIST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: [u8; 4],
    pub size: u32,
}

impl ChunkHeader {
    pub fn is_list(&self) -> bool {
        self.id == RIFF || self.id == LIST
    }

    pub fn padded_size(&self) -> u64 {
        self.size as u64 + (self.size as u64 & 1)
    }
}

pub fn decode_header(data: &[u8], offset: u64) -> Result<ChunkHeader, TreeError> {
    if data.len() < 8 {
        return Err(TreeError::Truncated { offset });
    }
    let mut cursor = &data[..8];
    let mut id = [0u8; 4];
    cursor.copy_to_slice(&mut id);
    let size = cursor.get_u32_le();
    Ok(ChunkHeader { id, size })
}

/// Decode the chunk at `offset`, returning header, payload and next sibling offset.
/// A missing pad byte at the very end of the buffer is tolerated.
pub fn read_header(buf: &[u8], offset: usize) -> Result<(ChunkHeader, &[u8], usize), TreeError> {
    let rest = buf.get(offset..).ok_or(TreeError::Truncated { offset: offset as u64 })?;
    let header = decode_header(rest, offset as u64)?;
    let remaining = rest.len() as u64 - 8;
    let len = ElementSize::Known(header.size as u64).resolve(offset as u64, remaining)? as usize;
    let start = offset + 8;
    let next = (start as u64 + header.padded_size()).min(buf.len() as u64) as usize;
    Ok((header, &buf[start..start + len], next))
}

/// Visit sibling chunks, stopping at the first bad header.
pub fn walk<'a, F>(buf: &'a [u8], mut visit: F) -> usize
where
    F: FnMut(&ChunkHeader, &'a [u8]) -> ControlFlow<()>,
{
    let mut offset = 0usize;
    let mut visited = 0usize;
    while offset < buf.len() {
        let (header, payload, next) = match read_header(buf, offset) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!("riff walk stopped: {}", err);
                break;
            }
        };
        visited += 1;
        if visit(&header, payload).is_break() {
            break;
        }
        offset = next;
    }
    visited
}

/// Split a LIST/RIFF payload into (list type, children).
pub fn list_body(payload: &[u8]) -> Option<([u8; 4], &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let mut list_type = [0u8; 4];
    list_type.copy_from_slice(&payload[..4]);
    Some((list_type, &payload[4..]))
}

/// Walk chunks straight from a source without reading payloads.
pub fn walk_source<F>(src: &mut dyn ByteSource, range: ByteRange, mut visit: F) -> usize
where
    F: FnMut(&mut dyn ByteSource, &ChunkHeader, ByteRange) -> ControlFlow<()>,
{
    let end = range.end().min(src.size());
    let mut offset = range.offset;
    let mut visited = 0usize;
    while offset + 8 <= end {
        let head = match src.read_clamped(offset, 8) {
            Ok(head) => head,
            Err(err) => {
                tracing::debug!("riff walk read failed: {}", err);
                break;
            }
        };
        let header = match decode_header(&head, offset) {
            Ok(header) => header,
            Err(_) => break,
        };
        let remaining = end - offset - 8;
        let len = match ElementSize::Known(header.size as u64).resolve(offset, remaining) {
            Ok(len) => len,
            Err(err) => {
                tracing::debug!("riff walk stopped: {}", err);
                break;
            }
        };
        let payload = ByteRange::new(offset + 8, len);
        visited += 1;
        if visit(src, &header, payload).is_break() {
            break;
        }
        offset = offset + 8 + header.padded_size();
    }
    visited
}

pub fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    let mut bytes = data.get(at..at + 2)?;
    Some(bytes.get_u16_le())
}

pub fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    let mut bytes = data.get(at..at + 4)?;
    Some(bytes.get_u32_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    #[test]
    fn odd_chunks_are_padded() {
        let mut data = chunk(b"strn", b"abc");
        data.extend(chunk(b"JUNK", b"xy"));
        let mut seen = Vec::new();
        walk(&data, |h, payload| {
            seen.push((h.id, payload.to_vec()));
            ControlFlow::Continue(())
        });
        assert_eq!(seen, vec![(*b"strn", b"abc".to_vec()), (*b"JUNK", b"xy".to_vec())]);
    }

    #[test]
    fn missing_final_pad_is_tolerated() {
        let mut data = b"strn".to_vec();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"abc");
        let (_, payload, next) = read_header(&data, 0).expect("chunk");
        assert_eq!(payload, b"abc");
        assert_eq!(next, data.len());
    }

    #[test]
    fn oversize_chunk_stops_walk() {
        let mut data = chunk(b"avih", &[0u8; 4]);
        data.extend_from_slice(b"strh");
        data.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        assert_eq!(walk(&data, |_, _| ControlFlow::Continue(())), 1);
        assert!(matches!(read_header(&data, 12).unwrap_err(), TreeError::SizeOverflow { .. }));
    }

    #[test]
    fn list_body_splits_type() {
        let payload = b"hdrlrest";
        assert_eq!(list_body(payload), Some((*b"hdrl", &b"rest"[..])));
        assert_eq!(list_body(b"ab"), None);
    }

    #[test]
    fn source_walk_visits_lists() {
        let mut inner = b"movi".to_vec();
        inner.extend(chunk(b"00dc", &[0u8; 5]));
        let mut data = chunk(b"LIST", &inner);
        data.extend(chunk(b"idx1", &[0u8; 16]));
        let len = data.len() as u64;
        let mut src = MemorySource::new(data);
        let mut ids = Vec::new();
        walk_source(&mut src, ByteRange::new(0, len), |_, h, range| {
            ids.push((h.id, range.len, h.is_list()));
            ControlFlow::Continue(())
        });
        assert_eq!(ids, vec![(*b"LIST", 18, true), (*b"idx1", 16, false)]);
    }
}
