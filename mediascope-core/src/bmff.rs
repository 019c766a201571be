//! ISO-BMFF (MP4/QuickTime) box walker.
//!
//! A box header is a 4-byte big-endian size followed by a 4-byte type.
//! Size 1 means a 64-bit size follows, size 0 means "to the end of the parent".

use std::ops::ControlFlow;

use bytes::Buf;

use crate::source::{ByteRange, ByteSource};
use crate::tree::{ElementSize, TreeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub header_size: u64,
    pub size: ElementSize,
}

/// Decode a box header from the first bytes of `data`. `data` may be longer
/// than the header; only 8 or 16 bytes are consumed.
pub fn decode_header(data: &[u8], offset: u64) -> Result<BoxHeader, TreeError> {
    if data.len() < 8 {
        return Err(TreeError::Truncated { offset });
    }
    let mut cursor = &data[..8];
    let size = cursor.get_u32() as u64;
    let mut box_type = [0u8; 4];
    cursor.copy_to_slice(&mut box_type);

    let (size, header_size) = match size {
        1 => {
            if data.len() < 16 {
                return Err(TreeError::Truncated { offset });
            }
            let mut ext_cursor = &data[8..16];
            let ext_size = ext_cursor.get_u64();
            if ext_size < 16 {
                return Err(TreeError::InvalidSize { offset });
            }
            (ElementSize::Known(ext_size - 16), 16)
        }
        0 => (ElementSize::Unknown, 8),
        n if n < 8 => return Err(TreeError::InvalidSize { offset }),
        n => (ElementSize::Known(n - 8), 8),
    };

    Ok(BoxHeader {
        box_type,
        header_size,
        size,
    })
}

/// Decode the box at `offset` inside `buf`, returning the header, its payload
/// and the offset of the next sibling.
pub fn read_header(buf: &[u8], offset: usize) -> Result<(BoxHeader, &[u8], usize), TreeError> {
    let rest = buf.get(offset..).ok_or(TreeError::Truncated { offset: offset as u64 })?;
    let header = decode_header(rest, offset as u64)?;
    let remaining = (rest.len() as u64).saturating_sub(header.header_size);
    if (rest.len() as u64) < header.header_size {
        return Err(TreeError::Truncated { offset: offset as u64 });
    }
    let payload_len = header.size.resolve(offset as u64, remaining)? as usize;
    let start = offset + header.header_size as usize;
    let end = start + payload_len;
    Ok((header, &buf[start..end], end))
}

/// Visit every sibling box in `buf`. Stops at the first header that fails
/// to decode and returns how many boxes were visited.
pub fn walk<'a, F>(buf: &'a [u8], mut visit: F) -> usize
where
    F: FnMut(&BoxHeader, &'a [u8]) -> ControlFlow<()>,
{
    let mut offset = 0usize;
    let mut visited = 0usize;
    while offset < buf.len() {
        let (header, payload, next) = match read_header(buf, offset) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!("box walk stopped: {}", err);
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

/// Find the first child of the given type.
pub fn find<'a>(buf: &'a [u8], box_type: &[u8; 4]) -> Option<&'a [u8]> {
    let mut found = None;
    walk(buf, |header, payload| {
        if &header.box_type == box_type {
            found = Some(payload);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    found
}

/// Follow a path of box types (`moov/trak/mdia`...) taking the first match at each level.
pub fn find_path<'a>(buf: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut current = buf;
    for box_type in path {
        current = find(current, box_type)?;
    }
    Some(current)
}

/// Walk boxes directly from a source, reading headers only.
pub fn walk_source<F>(src: &mut dyn ByteSource, range: ByteRange, mut visit: F) -> usize
where
    F: FnMut(&mut dyn ByteSource, &BoxHeader, ByteRange) -> ControlFlow<()>,
{
    let end = range.end().min(src.size());
    let mut offset = range.offset;
    let mut visited = 0usize;
    while offset < end {
        let head = match src.read_clamped(offset, 16.min(end - offset)) {
            Ok(head) => head,
            Err(err) => {
                tracing::debug!("box walk read failed: {}", err);
                break;
            }
        };
        let header = match decode_header(&head, offset) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!("box walk stopped: {}", err);
                break;
            }
        };
        let remaining = (end - offset).saturating_sub(header.header_size);
        let payload_len = match header.size.resolve(offset, remaining) {
            Ok(len) => len,
            Err(err) => {
                tracing::debug!("box walk stopped: {}", err);
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

/// Split a full box payload into (version, flags, body).
pub fn full_box(payload: &[u8]) -> Option<(u8, u32, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let mut cursor = payload;
    let word = cursor.get_u32();
    Some(((word >> 24) as u8, word & 0x00FF_FFFF, &payload[4..]))
}
