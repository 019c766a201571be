//! EBML element walker and Matroska block/lacing helpers.
//!
//! IDs and sizes are independently length-prefixed variable-length integers.
//! A size with every data bit set means "unknown": the payload then runs to
//! the end of the parent.

use std::ops::{ControlFlow, Range};

use thiserror::Error;

use crate::source::{ByteRange, ByteSource};
use crate::tree::{ElementSize, TreeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EbmlHeader {
    pub id: u32,
    pub header_size: u64,
    pub size: ElementSize,
}

// ============================================================================
// Variable-length integers
// ============================================================================

fn vint_length(first: u8, max: usize) -> Option<usize> {
    let length = first.leading_zeros() as usize + 1;
    if length > max {
        None
    } else {
        Some(length)
    }
}

/// Read a size-style vint (marker bit stripped). Returns (value, length, all_ones).
pub fn read_vint(buf: &[u8], offset: usize) -> Result<(u64, usize, bool), TreeError> {
    let at = offset as u64;
    let first = *buf.get(offset).ok_or(TreeError::Truncated { offset: at })?;
    let length = vint_length(first, 8).ok_or(TreeError::InvalidVint { offset: at })?;
    let bytes = buf
        .get(offset..offset + length)
        .ok_or(TreeError::Truncated { offset: at })?;

    let mask = if length == 8 { 0 } else { 0xFFu8 >> length };
    let mut value = (first & mask) as u64;
    for &b in &bytes[1..] {
        value = (value << 8) | b as u64;
    }
    let all_ones = value == (1u64 << (7 * length)) - 1;
    Ok((value, length, all_ones))
}

/// Read an element ID (marker bit kept, 1-4 bytes).
pub fn read_vint_id(buf: &[u8], offset: usize) -> Result<(u32, usize), TreeError> {
    let at = offset as u64;
    let first = *buf.get(offset).ok_or(TreeError::Truncated { offset: at })?;
    let length = vint_length(first, 4).ok_or(TreeError::InvalidVint { offset: at })?;
    let bytes = buf
        .get(offset..offset + length)
        .ok_or(TreeError::Truncated { offset: at })?;
    let id = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
    Ok((id, length))
}

/// Decode an element header from the start of `data`.
pub fn decode_header(data: &[u8], offset: u64) -> Result<EbmlHeader, TreeError> {
    let rebase = |err: TreeError| match err {
        TreeError::Truncated { .. } => TreeError::Truncated { offset },
        TreeError::InvalidVint { .. } => TreeError::InvalidVint { offset },
        other => other,
    };
    let (id, id_len) = read_vint_id(data, 0).map_err(rebase)?;
    let (value, size_len, all_ones) = read_vint(data, id_len).map_err(rebase)?;
    let size = if all_ones {
        ElementSize::Unknown
    } else {
        ElementSize::Known(value)
    };
    Ok(EbmlHeader {
        id,
        header_size: (id_len + size_len) as u64,
        size,
    })
}

pub fn read_header(buf: &[u8], offset: usize) -> Result<(EbmlHeader, &[u8], usize), TreeError> {
    let rest = buf.get(offset..).ok_or(TreeError::Truncated { offset: offset as u64 })?;
    let header = decode_header(rest, offset as u64)?;
    let remaining = rest.len() as u64 - header.header_size;
    let payload_len = header.size.resolve(offset as u64, remaining)? as usize;
    let start = offset + header.header_size as usize;
    Ok((header, &buf[start..start + payload_len], start + payload_len))
}

/// Visit every sibling element in `buf`, stopping at the first bad header.
pub fn walk<'a, F>(buf: &'a [u8], mut visit: F) -> usize
where
    F: FnMut(&EbmlHeader, &'a [u8]) -> ControlFlow<()>,
{
    let mut offset = 0usize;
    let mut visited = 0usize;
    while offset < buf.len() {
        let (header, payload, next) = match read_header(buf, offset) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!("ebml walk stopped: {}", err);
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

/// First child with the given ID.
pub fn find(buf: &[u8], id: u32) -> Option<&[u8]> {
    let mut found = None;
    walk(buf, |header, payload| {
        if header.id == id {
            found = Some(payload);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    found
}

/// Walk elements from a source, reading headers only.
pub fn walk_source<F>(src: &mut dyn ByteSource, range: ByteRange, mut visit: F) -> usize
where
    F: FnMut(&mut dyn ByteSource, &EbmlHeader, ByteRange) -> ControlFlow<()>,
{
    let end = range.end().min(src.size());
    let mut offset = range.offset;
    let mut visited = 0usize;
    while offset < end {
        let head = match src.read_clamped(offset, 12.min(end - offset)) {
            Ok(head) => head,
            Err(err) => {
                tracing::debug!("ebml walk read failed: {}", err);
                break;
            }
        };
        let header = match decode_header(&head, offset) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!("ebml walk stopped: {}", err);
                break;
            }
        };
        let remaining = (end - offset).saturating_sub(header.header_size);
        let payload_len = match header.size.resolve(offset, remaining) {
            Ok(len) => len,
            Err(err) => {
                tracing::debug!("ebml walk stopped: {}", err);
                break;
            }
        };
        let payload = ByteRange::new(offset + header.header_size, payload_len);
        visited += 1;
        if visit(src, &header, payload).is_break() {
            break;
        }
        offset = payload.end();
    }
    visited
}

// ============================================================================
// Typed values
// ============================================================================

pub fn read_uint(payload: &[u8]) -> Option<u64> {
    if payload.len() > 8 {
        return None;
    }
    Some(payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

pub fn read_float(payload: &[u8]) -> Option<f64> {
    match payload.len() {
        0 => Some(0.0),
        4 => Some(f32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as f64),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(payload);
            Some(f64::from_be_bytes(raw))
        }
        _ => None,
    }
}

/// Strings may be NUL padded.
pub fn read_string(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

// ============================================================================
// Blocks and lacing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaceError {
    #[error("Block truncated")]
    Truncated,
    #[error("Lace size {declared} exceeds the {remaining} bytes left in the block")]
    SizeOverflow { declared: u64, remaining: u64 },
    #[error("Fixed lacing: {remaining} bytes do not split into {count} frames")]
    Uneven { remaining: usize, count: usize },
    #[error("Invalid lace size vint")]
    InvalidVint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lacing {
    None,
    Xiph,
    Fixed,
    Ebml,
}

/// A SimpleBlock / Block: frames are byte ranges into the block payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub track: u64,
    pub timecode: i16,
    pub flags: u8,
    pub lacing: Lacing,
    pub frames: Vec<Range<usize>>,
}

impl Block {
    /// Only meaningful for SimpleBlock.
    pub fn keyframe(&self) -> bool {
        self.flags & 0x80 != 0
    }
}

pub fn parse_block(data: &[u8]) -> Result<Block, LaceError> {
    let (track, track_len, _) = read_vint(data, 0).map_err(|err| match err {
        TreeError::InvalidVint { .. } => LaceError::InvalidVint,
        _ => LaceError::Truncated,
    })?;
    let header = data.get(track_len..track_len + 3).ok_or(LaceError::Truncated)?;
    let timecode = i16::from_be_bytes([header[0], header[1]]);
    let flags = header[2];
    let body = track_len + 3;

    let lacing = match (flags >> 1) & 0x03 {
        0 => Lacing::None,
        1 => Lacing::Xiph,
        2 => Lacing::Fixed,
        _ => Lacing::Ebml,
    };

    let frames = match lacing {
        Lacing::None => vec![body..data.len()],
        _ => lace_ranges(data, body, lacing)?,
    };

    Ok(Block {
        track,
        timecode,
        flags,
        lacing,
        frames,
    })
}

/// Split a laced payload starting at `start`. Every size is checked against
/// the bytes left in the block before it is used.
pub fn lace_ranges(data: &[u8], start: usize, lacing: Lacing) -> Result<Vec<Range<usize>>, LaceError> {
    let count = *data.get(start).ok_or(LaceError::Truncated)? as usize + 1;
    let mut pos = start + 1;
    let mut sizes: Vec<u64> = Vec::with_capacity(count);

    match lacing {
        Lacing::None => return Ok(vec![start..data.len()]),
        Lacing::Fixed => {
            let remaining = data.len() - pos;
            if remaining % count != 0 {
                return Err(LaceError::Uneven { remaining, count });
            }
            let each = remaining / count;
            return Ok((0..count).map(|i| pos + i * each..pos + (i + 1) * each).collect());
        }
        Lacing::Xiph => {
            let mut total = 0u64;
            for _ in 0..count - 1 {
                let mut size = 0u64;
                loop {
                    let b = *data.get(pos).ok_or(LaceError::Truncated)?;
                    pos += 1;
                    size += b as u64;
                    if b != 255 {
                        break;
                    }
                }
                total += size;
                check_fits(total, data.len(), pos)?;
                sizes.push(size);
            }
        }
        // a single laced frame carries no sizes
        Lacing::Ebml if count > 1 => {
            let (first, len, _) = read_vint(data, pos).map_err(|_| LaceError::InvalidVint)?;
            pos += len;
            check_fits(first, data.len(), pos)?;
            sizes.push(first);
            let mut total = first;
            let mut prev = first as i64;
            for _ in 1..count - 1 {
                let (raw, len, _) = read_vint(data, pos).map_err(|_| LaceError::InvalidVint)?;
                pos += len;
                let bias = (1i64 << (7 * len - 1)) - 1;
                let size = prev + (raw as i64 - bias);
                if size < 0 {
                    return Err(LaceError::InvalidVint);
                }
                total += size as u64;
                check_fits(total, data.len(), pos)?;
                sizes.push(size as u64);
                prev = size;
            }
        }
        Lacing::Ebml => {}
    }

    let used: u64 = sizes.iter().sum();
    let remaining = (data.len() - pos) as u64;
    if used > remaining {
        return Err(LaceError::SizeOverflow {
            declared: used,
            remaining,
        });
    }
    sizes.push(remaining - used);

    let mut ranges = Vec::with_capacity(sizes.len());
    for size in sizes {
        let end = pos + size as usize;
        ranges.push(pos..end);
        pos = end;
    }
    Ok(ranges)
}

fn check_fits(total: u64, len: usize, pos: usize) -> Result<(), LaceError> {
    let remaining = len.saturating_sub(pos) as u64;
    if total > remaining {
        Err(LaceError::SizeOverflow {
            declared: total,
            remaining,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn reads_single_byte_vint() {
        let (value, len, all_ones) = read_vint(b"\x81", 0).expect("vint");
        assert_eq!((value, len, all_ones), (1, 1, false));
    }

    #[test]
    fn reads_two_byte_vint() {
        let (value, len, _) = read_vint(b"\x40\x7F", 0).expect("vint");
        assert_eq!((value, len), (0x7F, 2));
    }

    #[test]
    fn fails_on_truncated_vint() {
        assert_eq!(read_vint(b"\x40", 0).unwrap_err(), TreeError::Truncated { offset: 0 });
        assert_eq!(read_vint(b"\x00", 0).unwrap_err(), TreeError::InvalidVint { offset: 0 });
    }

    #[test]
    fn reads_four_byte_ids() {
        assert_eq!(read_vint_id(&[0x1A, 0x45, 0xDF, 0xA3], 0).unwrap(), (0x1A45DFA3, 4));
        assert_eq!(read_vint_id(&[0xAE], 0).unwrap(), (0xAE, 1));
        assert!(read_vint_id(&[0x08, 0, 0, 0, 0], 0).is_err());
    }

    #[test]
    fn unknown_size_spans_parent() {
        // Segment with unknown size (8-byte all ones) followed by payload
        let mut data = vec![0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(b"payload");
        let (header, payload, next) = read_header(&data, 0).expect("header");
        assert_eq!(header.id, 0x18538067);
        assert_eq!(header.size, ElementSize::Unknown);
        assert_eq!(payload, b"payload");
        assert_eq!(next, data.len());
    }

    #[test]
    fn element_size_overflow_is_rejected() {
        // Tracks declaring 0x3FFF bytes with 3 bytes available
        let data = [0x16, 0x54, 0xAE, 0x6B, 0x7F, 0xFE, 1, 2, 3];
        let err = read_header(&data, 0).unwrap_err();
        assert_eq!(
            err,
            TreeError::SizeOverflow {
                offset: 0,
                declared: 0x3FFE,
                remaining: 3
            }
        );
        assert_eq!(walk(&data, |_, _| ControlFlow::Continue(())), 0);
    }

    #[test]
    fn walk_visits_siblings() {
        let data = [0xD7, 0x81, 0x01, 0x83, 0x81, 0x02, 0x86, 0x85, b'V', b'_', b'V', b'P', b'9'];
        let mut ids = Vec::new();
        walk(&data, |h, payload| {
            ids.push((h.id, payload.to_vec()));
            ControlFlow::Continue(())
        });
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], (0x86, b"V_VP9".to_vec()));
        assert_eq!(read_string(&ids[2].1), "V_VP9");
        assert_eq!(read_uint(&ids[0].1), Some(1));
    }

    #[test]
    fn source_walk_reads_headers_only() {
        let mut data = vec![0x1F, 0x43, 0xB6, 0x75, 0x10, 0x00, 0x10, 0x00];
        data.extend(vec![0u8; 0x1000]);
        data.extend_from_slice(&[0xEC, 0x80]);
        let len = data.len() as u64;
        let mut src = MemorySource::new(data);
        let mut seen = Vec::new();
        walk_source(&mut src, ByteRange::new(0, len), |_, h, range| {
            seen.push((h.id, range.len));
            ControlFlow::Continue(())
        });
        assert_eq!(seen, vec![(0x1F43B675, 0x1000), (0xEC, 0)]);
    }

    #[test]
    fn floats_and_strings() {
        assert_eq!(read_float(&0.5f32.to_be_bytes()), Some(0.5));
        assert_eq!(read_float(&1234.5f64.to_be_bytes()), Some(1234.5));
        assert_eq!(read_float(&[0, 0, 0]), None);
        assert_eq!(read_string(b"eng\0\0"), "eng");
    }

    #[test]
    fn parses_unlaced_simple_block() {
        let data = [0x81, 0x00, 0x10, 0x80, 0xAA, 0xBB];
        let block = parse_block(&data).expect("block");
        assert_eq!(block.track, 1);
        assert_eq!(block.timecode, 16);
        assert!(block.keyframe());
        assert_eq!(block.frames, vec![4..6]);
    }

    #[test]
    fn xiph_lacing_splits_frames() {
        // 3 frames: sizes 2, 256 (255 + 1), remainder 1
        let mut data = vec![0x82, 0x00, 0x00, 0x02, 0x02, 0x02, 0xFF, 0x01];
        data.extend(vec![7u8; 2 + 256 + 1]);
        let block = parse_block(&data).expect("block");
        assert_eq!(block.lacing, Lacing::Xiph);
        let lens: Vec<usize> = block.frames.iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![2, 256, 1]);
    }

    #[test]
    fn ebml_lacing_uses_signed_differences() {
        // 3 frames: first 4, diff -1 (0xBE = 62 - 63), remainder
        let mut data = vec![0x81, 0x00, 0x00, 0x06, 0x02, 0x84, 0xBE];
        data.extend(vec![0u8; 4 + 3 + 5]);
        let block = parse_block(&data).expect("block");
        let lens: Vec<usize> = block.frames.iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![4, 3, 5]);
    }

    #[test]
    fn single_frame_lace_is_the_whole_payload() {
        let data = [0x00, 0x81, 0xAA, 0xBB];
        assert_eq!(lace_ranges(&data, 0, Lacing::Ebml), Ok(vec![1..4]));
        assert_eq!(lace_ranges(&data, 0, Lacing::Xiph), Ok(vec![1..4]));
    }

    #[test]
    fn fixed_lacing_requires_even_split() {
        let mut data = vec![0x81, 0x00, 0x00, 0x04, 0x01];
        data.extend(vec![0u8; 6]);
        assert_eq!(parse_block(&data).expect("block").frames, vec![5..8, 8..11]);
        data.push(0);
        assert_eq!(
            parse_block(&data).unwrap_err(),
            LaceError::Uneven { remaining: 7, count: 2 }
        );
    }

    #[test]
    fn oversized_lace_vint_is_rejected() {
        // EBML lacing, 2 frames, first size claims 0x0FFF_FFFE bytes in a tiny block
        let data = [0x81, 0x00, 0x00, 0x06, 0x01, 0x1F, 0xFF, 0xFF, 0xFE, 1, 2, 3];
        let err = parse_block(&data).unwrap_err();
        assert_eq!(
            err,
            LaceError::SizeOverflow {
                declared: 0x0FFF_FFFE,
                remaining: 3
            }
        );
    }
}
