// PES - Packetized Elementary Stream headers
//
// Shared by the TS and PS demuxers. Handles both header syntaxes:
// • MPEG-2: '10' marker, flags byte, header_data_length
// • MPEG-1: stuffing, optional STD buffer, PTS/DTS nibble prefixes

use crate::bits::{BitResult, BitstreamError};

pub const PROGRAM_STREAM_MAP: u8 = 0xBC;
pub const PRIVATE_STREAM_1: u8 = 0xBD;
pub const PADDING_STREAM: u8 = 0xBE;
pub const PRIVATE_STREAM_2: u8 = 0xBF;

/// Cap on bytes held while a program stream packet is incomplete.
pub const MAX_PES_CARRY: usize = 1024 * 1024;

/// 33-bit timestamp mask.
pub const TIMESTAMP_MASK: u64 = (1 << 33) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// 0 means unbounded (video in TS).
    pub packet_length: u16,
    /// Offset of the first payload byte from the start code.
    pub payload_offset: usize,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub mpeg1: bool,
}

impl PesHeader {
    /// Total bytes covered by this packet, if bounded.
    pub fn packet_end(&self) -> Option<usize> {
        (self.packet_length != 0).then(|| 6 + self.packet_length as usize)
    }
}

pub fn is_video_stream_id(id: u8) -> bool {
    (0xE0..=0xEF).contains(&id) || id == 0xFD
}

pub fn is_audio_stream_id(id: u8) -> bool {
    (0xC0..=0xDF).contains(&id)
}

/// Stream ids whose packets carry no optional header.
fn has_no_header(id: u8) -> bool {
    matches!(
        id,
        PROGRAM_STREAM_MAP | PADDING_STREAM | PRIVATE_STREAM_2 | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

/// Decode a 5-byte marker-delimited timestamp. None if a marker bit is clear.
pub fn decode_timestamp(b: &[u8]) -> Option<u64> {
    if b.len() < 5 || b[0] & 1 == 0 || b[2] & 1 == 0 || b[4] & 1 == 0 {
        return None;
    }
    let ts = ((b[0] as u64 >> 1) & 0x07) << 30
        | (b[1] as u64) << 22
        | (b[2] as u64 >> 1) << 15
        | (b[3] as u64) << 7
        | (b[4] as u64 >> 1);
    Some(ts & TIMESTAMP_MASK)
}

fn need(data: &[u8], len: usize) -> BitResult<()> {
    if data.len() < len {
        return Err(BitstreamError::Truncated {
            needed: len * 8,
            available: data.len() * 8,
        });
    }
    Ok(())
}

/// Parse the PES header at the start of `data` (which begins with `00 00 01`).
pub fn parse_header(data: &[u8]) -> BitResult<PesHeader> {
    need(data, 6)?;
    if data[0] != 0 || data[1] != 0 || data[2] != 1 {
        return Err(BitstreamError::NoSync);
    }
    let stream_id = data[3];
    if stream_id < PROGRAM_STREAM_MAP {
        return Err(BitstreamError::Reserved("stream_id"));
    }
    let packet_length = u16::from_be_bytes([data[4], data[5]]);
    let mut header = PesHeader {
        stream_id,
        packet_length,
        payload_offset: 6,
        pts: None,
        dts: None,
        mpeg1: false,
    };
    if has_no_header(stream_id) {
        return Ok(header);
    }

    need(data, 7)?;
    if data[6] & 0xC0 == 0x80 {
        need(data, 9)?;
        let flags = data[7] >> 6;
        let header_data_length = data[8] as usize;
        need(data, 9 + header_data_length)?;
        let optional = &data[9..9 + header_data_length];
        if flags & 0b10 != 0 {
            header.pts = optional.get(..5).and_then(decode_timestamp);
        }
        if flags == 0b11 {
            header.dts = optional.get(5..10).and_then(decode_timestamp);
        }
        header.payload_offset = 9 + header_data_length;
        return Ok(header);
    }

    header.mpeg1 = true;
    let mut pos = 6;
    let mut stuffing = 0;
    while data.get(pos) == Some(&0xFF) {
        stuffing += 1;
        if stuffing > 16 {
            return Err(BitstreamError::Reserved("stuffing"));
        }
        pos += 1;
    }
    need(data, pos + 1)?;
    if data[pos] & 0xC0 == 0x40 {
        pos += 2;
        need(data, pos + 1)?;
    }
    match data[pos] & 0xF0 {
        0x20 => {
            need(data, pos + 5)?;
            header.pts = decode_timestamp(&data[pos..pos + 5]);
            pos += 5;
        }
        0x30 => {
            need(data, pos + 10)?;
            header.pts = decode_timestamp(&data[pos..pos + 5]);
            header.dts = decode_timestamp(&data[pos + 5..pos + 10]);
            pos += 10;
        }
        _ if data[pos] == 0x0F => pos += 1,
        _ => return Err(BitstreamError::Reserved("mpeg1 pes flags")),
    }
    header.payload_offset = pos;
    Ok(header)
}

/// Encode a timestamp with the given 4-bit prefix, for fixtures.
#[cfg(test)]
pub(crate) fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8) << 1) | 1,
        (ts >> 7) as u8,
        ((ts as u8) << 1) | 1,
    ]
}

/// MPEG-2 PES packet with PTS around `payload`, for fixtures.
#[cfg(test)]
pub(crate) fn build_packet(stream_id: u8, pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let mut optional = Vec::new();
    let mut flags = 0u8;
    if let Some(pts) = pts {
        flags = 0x80;
        optional.extend_from_slice(&encode_timestamp(0b0010, pts));
    }
    let len = 3 + optional.len() + payload.len();
    let mut out = vec![0, 0, 1, stream_id, (len >> 8) as u8, len as u8, 0x80, flags, optional.len() as u8];
    out.extend_from_slice(&optional);
    out.extend_from_slice(payload);
    out
}
