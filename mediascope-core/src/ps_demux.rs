// PS DEMUXER - MPEG Program Stream (VOB, MPG) inspection
//
// No fixed packet size: pack headers and PES packets are found by start
// code and split by their length fields. Incomplete packets wait in a
// carry buffer until the next read.
//
// Private stream 1 substreams (DVD):
// • 0x20-0x3F subpictures
// • 0x80-0x87 AC-3, 0x88-0x8F DTS
// • 0xA0-0xA7 LPCM

use std::collections::BTreeMap;

use crate::bits::{find_start_code, BitResult, BitstreamError};
use crate::collab::IfoAttributes;
use crate::display;
use crate::es::CodecProbe;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::pes::{self, MAX_PES_CARRY, PADDING_STREAM, PRIVATE_STREAM_1, PRIVATE_STREAM_2, PROGRAM_STREAM_MAP};
use crate::probe::ProbeContext;
use crate::report::{Report, Stream};
use crate::source::ByteSource;
use crate::stats::{self, ScanPlan, StreamStats, TimestampTracker, PS_ROUNDING};

// ============================================================================
// Constants
// ============================================================================

const PACK_START: u8 = 0xBA;
const PROGRAM_END: u8 = 0xB9;
const SYSTEM_HEADER: u8 = 0xBB;

const READ_CHUNK: u64 = 64 * 1024;
/// Where the first pack header must appear.
const PACK_SEARCH: u64 = 64 * 1024;

// ============================================================================
// Pack header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub mpeg2: bool,
    /// System clock reference base, 90 kHz.
    pub scr: u64,
    /// Units of 50 bytes/s.
    pub mux_rate: u32,
    /// Total header length including stuffing.
    pub len: usize,
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

/// Parse a pack header starting at its `00 00 01 BA` start code.
pub fn parse_pack(data: &[u8]) -> BitResult<PackHeader> {
    need(data, 5)?;
    if data[..4] != [0x00, 0x00, 0x01, PACK_START] {
        return Err(BitstreamError::NoSync);
    }
    if data[4] & 0xC0 == 0x40 {
        need(data, 14)?;
        let b = &data[4..14];
        if b[0] & 0x04 == 0 || b[2] & 0x04 == 0 || b[4] & 0x04 == 0 || b[5] & 0x01 == 0 {
            return Err(BitstreamError::Marker("pack header"));
        }
        let scr = ((b[0] as u64 >> 3) & 0x07) << 30
            | (b[0] as u64 & 0x03) << 28
            | (b[1] as u64) << 20
            | (b[2] as u64 >> 3) << 15
            | (b[2] as u64 & 0x03) << 13
            | (b[3] as u64) << 5
            | (b[4] as u64 >> 3);
        let mux_rate = (b[6] as u32) << 14 | (b[7] as u32) << 6 | (b[8] as u32) >> 2;
        let stuffing = (b[9] & 0x07) as usize;
        return Ok(PackHeader {
            mpeg2: true,
            scr,
            mux_rate,
            len: 14 + stuffing,
        });
    }
    if data[4] & 0xF0 == 0x20 {
        need(data, 12)?;
        let scr = pes::decode_timestamp(&data[4..9]).ok_or(BitstreamError::Marker("pack header"))?;
        let mux_rate = (data[9] as u32 & 0x7F) << 15 | (data[10] as u32) << 7 | (data[11] as u32) >> 1;
        return Ok(PackHeader {
            mpeg2: false,
            scr,
            mux_rate,
            len: 12,
        });
    }
    Err(BitstreamError::Reserved("pack header version"))
}

// ============================================================================
// LPCM (DVD)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpcmInfo {
    pub bits: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl LpcmInfo {
    /// From the audio attribute byte after the 4-byte substream header.
    fn parse(attributes: u8) -> Option<Self> {
        let bits = match attributes >> 6 {
            0 => 16,
            1 => 20,
            2 => 24,
            _ => return None,
        };
        let sample_rate = match (attributes >> 4) & 0x03 {
            0 => 48_000,
            1 => 96_000,
            _ => return None,
        };
        Some(Self {
            bits,
            sample_rate,
            channels: (attributes & 0x07) as u32 + 1,
        })
    }

    pub fn bitrate(&self) -> u64 {
        self.sample_rate as u64 * self.bits as u64 * self.channels as u64
    }

    fn describe(&self, stream: &mut Stream) {
        stream.push("Format settings", "Big / Signed");
        stream.push_both("Bit rate mode", "Constant", "CBR");
        stream.push_both("Bit rate", display::bitrate(self.bitrate()), self.bitrate());
        stream.push_both("Channel(s)", display::channels(self.channels), self.channels);
        stream.push_both("Sampling rate", display::sample_rate(self.sample_rate), self.sample_rate);
        stream.push_both("Bit depth", display::bit_depth(self.bits), self.bits);
    }
}

// ============================================================================
// Substreams
// ============================================================================

#[derive(Debug)]
pub struct PsStream {
    pub stream_id: u8,
    pub substream: Option<u8>,
    pub codec: CodecId,
    pub stats: StreamStats,
    pub probe: CodecProbe,
    pub lpcm: Option<LpcmInfo>,
}

/// (codec, bytes of substream header before the elementary data)
fn private_substream(sub: u8) -> (CodecId, usize) {
    match sub {
        0x20..=0x3F => (CodecId::VobSub, 1),
        0x80..=0x87 => (CodecId::Ac3, 4),
        0x88..=0x8F => (CodecId::Dts, 4),
        0xA0..=0xA7 => (CodecId::Lpcm, 7),
        _ => (CodecId::Unknown, 1),
    }
}

fn stream_codec(stream_id: u8) -> CodecId {
    match stream_id {
        0xE0..=0xEF => CodecId::Mpeg2Video,
        0xC0..=0xDF => CodecId::MpegAudio,
        0xFD => CodecId::Vc1,
        _ => CodecId::Unknown,
    }
}

fn stream_key(stream_id: u8, substream: Option<u8>) -> u16 {
    (stream_id as u16) << 8 | substream.unwrap_or(0) as u16
}

// ============================================================================
// PS Demuxer
// ============================================================================

#[derive(Debug, Default)]
pub struct PsDemuxer {
    carry: Vec<u8>,
    pub streams: BTreeMap<u16, PsStream>,
    pub scr: TimestampTracker,
    pub mux_rate: Option<u32>,
    pub mpeg2: Option<bool>,
    pub packs: u64,
    pub skipped_bytes: u64,
    pub bad_packets: u64,
    tail: bool,
}

impl PsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop partial state before jumping to the tail window.
    pub fn begin_tail(&mut self) {
        self.carry.clear();
        self.tail = true;
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        let mut carry = std::mem::take(&mut self.carry);
        carry.extend_from_slice(chunk);
        let mut pos = 0usize;
        loop {
            let Some(at) = find_start_code(&carry, pos) else {
                // keep a possible partial start code
                let keep_from = carry.len().saturating_sub(3).max(pos);
                self.skipped_bytes += (keep_from - pos) as u64;
                pos = keep_from;
                break;
            };
            self.skipped_bytes += (at - pos) as u64;
            pos = at;
            let Some(&code) = carry.get(pos + 3) else {
                break;
            };
            match code {
                PACK_START => match parse_pack(&carry[pos..]) {
                    Ok(pack) => {
                        self.packs += 1;
                        self.scr.observe(pack.scr);
                        self.mux_rate.get_or_insert(pack.mux_rate);
                        self.mpeg2.get_or_insert(pack.mpeg2);
                        pos += pack.len;
                    }
                    Err(BitstreamError::Truncated { .. }) => break,
                    Err(err) => {
                        tracing::debug!("bad pack header: {}", err);
                        self.bad_packets += 1;
                        pos += 4;
                    }
                },
                PROGRAM_END => pos += 4,
                SYSTEM_HEADER..=0xFF => {
                    let Some(len) = carry.get(pos + 4..pos + 6).map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
                    else {
                        break;
                    };
                    let end = pos + 6 + len;
                    if end > carry.len() {
                        break;
                    }
                    self.packet(&carry[pos..end]);
                    pos = end;
                }
                _ => {
                    // elementary start code outside a packet
                    self.skipped_bytes += 3;
                    pos += 3;
                }
            }
        }
        carry.drain(..pos);
        if carry.len() > MAX_PES_CARRY {
            tracing::warn!("program stream carry over {} bytes, dropping", MAX_PES_CARRY);
            self.skipped_bytes += carry.len() as u64;
            carry.clear();
        }
        self.carry = carry;
    }

    fn packet(&mut self, data: &[u8]) {
        let stream_id = data[3];
        if matches!(stream_id, SYSTEM_HEADER | PROGRAM_STREAM_MAP | PADDING_STREAM | PRIVATE_STREAM_2) {
            return;
        }
        let header = match pes::parse_header(data) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!("stream 0x{:02X}: bad PES header: {}", stream_id, err);
                self.bad_packets += 1;
                return;
            }
        };
        let Some(mut body) = data.get(header.payload_offset..) else {
            self.bad_packets += 1;
            return;
        };

        let (substream, codec) = if stream_id == PRIVATE_STREAM_1 {
            let Some(&sub) = body.first() else {
                return;
            };
            let (codec, skip) = private_substream(sub);
            let lpcm_attributes = body.get(5).copied();
            body = body.get(skip..).unwrap_or(&[]);
            let key = stream_key(stream_id, Some(sub));
            let stream = self.streams.entry(key).or_insert_with(|| new_stream(stream_id, Some(sub), codec));
            if codec == CodecId::Lpcm && stream.lpcm.is_none() {
                stream.lpcm = lpcm_attributes.and_then(LpcmInfo::parse);
            }
            (Some(sub), codec)
        } else {
            (None, stream_codec(stream_id))
        };

        let tail = self.tail;
        let stream = self
            .streams
            .entry(stream_key(stream_id, substream))
            .or_insert_with(|| new_stream(stream_id, substream, codec));
        stream.stats.add_frame(header.pts);
        stream.stats.add_payload(body.len());
        if !tail {
            stream.probe.feed(body);
        }
    }

    pub fn into_report(mut self, file_size: u64, ctx: &ProbeContext, full: bool) -> Report {
        let policy = ctx.options.duration_policy;
        let mut report = Report::new(ContainerKind::MpegPs, file_size);
        for stream in self.streams.values_mut() {
            stream.probe.flush();
        }

        let video = self
            .streams
            .values()
            .filter(|s| s.codec.kind() == StreamKind::Video)
            .filter_map(|s| s.stats.duration_ms(policy))
            .max();
        let duration = video
            .or_else(|| self.streams.values().filter_map(|s| s.stats.duration_ms(policy)).max())
            .or_else(|| self.scr.duration_ms(policy));
        report.container.duration_ms = duration;
        let mux_bps = self.mux_rate.map(|r| r as u64 * 50 * 8);
        report.container.overall_bitrate = duration
            .and_then(|ms| stats::bitrate(file_size, ms, PS_ROUNDING))
            .or(mux_bps);
        if full {
            let payload: u64 = self.streams.values().map(|s| s.stats.bytes).sum();
            report.container.stream_overhead = Some(file_size.saturating_sub(payload));
        }
        if let Some(bps) = mux_bps {
            report.general.set_key("program_mux_rate", bps);
        }
        if let Some(mpeg2) = self.mpeg2 {
            report.general.push("Format version", if mpeg2 { "Version 2" } else { "Version 1" });
        }

        for stream in self.streams.values() {
            report.streams.push(describe_stream(stream, ctx, full));
            if let Some(captions) = stream.probe.captions() {
                report.streams.extend(captions.streams("A/53 / DTVCC Transport"));
                captions.describe_general(&mut report.general);
            }
        }
        if let Some(ifo) = &ctx.ifo {
            if ifo.chapters > 0 {
                let mut menu = Stream::new(StreamKind::Menu);
                menu.push_both("Count of chapters", ifo.chapters.to_string(), ifo.chapters);
                report.streams.push(menu);
            }
        }
        if self.skipped_bytes > 0 {
            report.general.set_key("skipped_bytes", self.skipped_bytes);
        }
        report.finish();
        report
    }
}

fn new_stream(stream_id: u8, substream: Option<u8>, codec: CodecId) -> PsStream {
    tracing::debug!("stream 0x{:02X}/{:?} -> {}", stream_id, substream, codec.name());
    PsStream {
        stream_id,
        substream,
        codec,
        stats: StreamStats::default(),
        probe: CodecProbe::for_codec(codec),
        lpcm: None,
    }
}

/// Language recorded in the IFO for this substream.
fn ifo_language<'i>(stream: &PsStream, ifo: &'i IfoAttributes) -> Option<&'i str> {
    let index = match (stream.stream_id, stream.substream) {
        (PRIVATE_STREAM_1, Some(sub @ 0x20..=0x3F)) => {
            return ifo.subtitles.get((sub - 0x20) as usize)?.as_deref();
        }
        (PRIVATE_STREAM_1, Some(sub @ 0x80..=0x8F)) => (sub & 0x07) as usize,
        (PRIVATE_STREAM_1, Some(sub @ 0xA0..=0xA7)) => (sub & 0x07) as usize,
        (id @ 0xC0..=0xC7, None) => (id & 0x07) as usize,
        _ => return None,
    };
    ifo.audio.get(index)?.language.as_deref()
}

fn describe_stream(stream: &PsStream, ctx: &ProbeContext, full: bool) -> Stream {
    let codec = stream.probe.detected_codec().unwrap_or(stream.codec);
    let mut s = Stream::new(codec.kind());
    match stream.substream {
        Some(sub) => s.push_both(
            "ID",
            format!("{} (0x{:X})-{} (0x{:X})", stream.stream_id, stream.stream_id, sub, sub),
            format!("{}-{}", stream.stream_id, sub),
        ),
        None => s.push_both("ID", format!("{} (0x{:X})", stream.stream_id, stream.stream_id), stream.stream_id),
    };
    s.push("Format", codec.name());
    stream.probe.describe(&mut s);
    if let Some(lpcm) = &stream.lpcm {
        lpcm.describe(&mut s);
    }
    let duration = stream.stats.duration_ms(ctx.options.duration_policy);
    if let Some(ms) = duration {
        s.push_both("Duration", display::duration(ms), ms);
    }
    if full {
        if s.get("Bit rate").is_none() {
            if let Some(bps) = duration.and_then(|ms| stats::bitrate(stream.stats.bytes, ms, PS_ROUNDING)) {
                s.push_both("Bit rate", display::bitrate(bps), bps);
            }
        }
        s.push_both("Stream size", display::file_size(stream.stats.bytes), stream.stats.bytes);
    }
    if let Some(lang) = ctx.ifo.as_ref().and_then(|ifo| ifo_language(stream, ifo)) {
        s.push("Language", ctx.language.normalize(lang));
    }
    s
}

// ============================================================================
// Scanning
// ============================================================================

fn scan_window(src: &mut dyn ByteSource, demux: &mut PsDemuxer, start: u64, end: u64) {
    let mut offset = start;
    while offset < end {
        match src.read_clamped(offset, (end - offset).min(READ_CHUNK)) {
            Ok(chunk) if !chunk.is_empty() => {
                offset += chunk.len() as u64;
                demux.feed(&chunk);
            }
            Ok(_) => break,
            Err(err) => {
                tracing::warn!("read failed at {}: {}", offset, err);
                break;
            }
        }
    }
}

/// Probe a program stream. None unless a valid pack header is found near
/// the start of the file.
pub fn probe(src: &mut dyn ByteSource, ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let head = match src.read_clamped(0, PACK_SEARCH) {
        Ok(head) => head,
        Err(err) => {
            tracing::warn!("cannot read program stream head: {}", err);
            return None;
        }
    };
    let mut pos = 0;
    let start = loop {
        let at = find_start_code(&head, pos)?;
        if head.get(at + 3) == Some(&PACK_START) && parse_pack(&head[at..]).is_ok() {
            break at as u64;
        }
        pos = at + 1;
    };

    let plan = ScanPlan::new(size, ctx.options.speed());
    let mut demux = PsDemuxer::new();
    scan_window(src, &mut demux, start, plan.head);
    if let Some(tail) = plan.tail_start {
        demux.begin_tail();
        scan_window(src, &mut demux, tail, size);
    }
    Some(demux.into_report(size, ctx, plan.is_full()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// MPEG-2 pack header with no stuffing.
    pub(crate) fn pack(scr: u64, mux_rate: u32) -> Vec<u8> {
        vec![
            0x00,
            0x00,
            0x01,
            0xBA,
            0x40 | ((scr >> 30) as u8 & 0x07) << 3 | 0x04 | ((scr >> 28) as u8 & 0x03),
            (scr >> 20) as u8,
            ((scr >> 15) as u8 & 0x1F) << 3 | 0x04 | ((scr >> 13) as u8 & 0x03),
            (scr >> 5) as u8,
            ((scr as u8) & 0x1F) << 3 | 0x04,
            0x01,
            (mux_rate >> 14) as u8,
            (mux_rate >> 6) as u8,
            ((mux_rate as u8) & 0x3F) << 2 | 0x03,
            0xF8,
        ]
    }

    /// MPEG-1 pack header.
    pub(crate) fn pack_mpeg1(scr: u64, mux_rate: u32) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, 0xBA];
        out.extend_from_slice(&crate::pes::encode_timestamp(0b0010, scr));
        out.push(0x80 | (mux_rate >> 15) as u8);
        out.push((mux_rate >> 7) as u8);
        out.push((mux_rate as u8) << 1 | 0x01);
        out
    }
}
