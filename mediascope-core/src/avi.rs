// AVI - RIFF AVI probe
//
// • hdrl: avih, one strl per stream (strh / strf / strn), odml/dmlh
// • movi: chunk headers give per-stream byte counts, payloads feed the
//   codec probes (MPEG-4 VOP scanner, AC-3, MPEG audio)
// • idx1: byte counts for the whole file without walking movi
// • RIFF AVIX extension chunks (OpenDML) continue movi past 1 GiB

use std::ops::ControlFlow;

use serde::Serialize;

use crate::display;
use crate::es::CodecProbe;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::probe::ProbeContext;
use crate::report::{Report, Stream};
use crate::riff::{self, le_u16, le_u32, ChunkHeader, LIST, RIFF};
use crate::source::{ByteRange, ByteSource};
use crate::stats::{self, Rounding, ScanPlan, AVI_AUDIO_ROUNDING, AVI_VIDEO_ROUNDING};
use crate::tree::fourcc_str;

const MAX_HDRL: u64 = 1024 * 1024;
const MAX_INFO: u64 = 64 * 1024;
const MAX_IDX1: u64 = 64 * 1024 * 1024;
/// Chunks per stream handed to the codec probe.
const PROBE_CHUNKS: u64 = 256;
const MAX_PROBE_CHUNK: u64 = 256 * 1024;
const MAX_LIST_DEPTH: u32 = 2;

// ============================================================================
// Headers
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MainHeader {
    pub micro_sec_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub streams: u32,
    pub width: u32,
    pub height: u32,
}

impl MainHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        Some(Self {
            micro_sec_per_frame: le_u32(data, 0)?,
            max_bytes_per_sec: le_u32(data, 4)?,
            flags: le_u32(data, 12)?,
            total_frames: le_u32(data, 16)?,
            streams: le_u32(data, 24)?,
            width: le_u32(data, 32)?,
            height: le_u32(data, 36)?,
        })
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let us = self.total_frames as u64 * self.micro_sec_per_frame as u64;
        (us > 0).then_some(us / 1000)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamHeader {
    pub fcc_type: [u8; 4],
    pub handler: [u8; 4],
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub sample_size: u32,
}

impl StreamHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let fourcc = |at: usize| -> Option<[u8; 4]> {
            let b = data.get(at..at + 4)?;
            Some([b[0], b[1], b[2], b[3]])
        };
        Some(Self {
            fcc_type: fourcc(0)?,
            handler: fourcc(4)?,
            scale: le_u32(data, 20)?,
            rate: le_u32(data, 24)?,
            start: le_u32(data, 28)?,
            length: le_u32(data, 32)?,
            sample_size: le_u32(data, 44)?,
        })
    }

    /// `length` units of `scale / rate` seconds.
    pub fn duration_ms(&self) -> Option<u64> {
        (self.rate > 0 && self.length > 0)
            .then(|| (self.length as u128 * self.scale as u128 * 1000 / self.rate as u128) as u64)
    }
}

// ============================================================================
// Streams
// ============================================================================

#[derive(Debug, Default)]
pub struct StreamProbe {
    pub index: usize,
    pub header: StreamHeader,
    pub codec: CodecId,
    /// BITMAPINFOHEADER compression.
    pub compression: Option<[u8; 4]>,
    /// WAVEFORMATEX format tag.
    pub format_tag: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub avg_bytes_per_sec: Option<u32>,
    pub bits_per_sample: Option<u16>,
    pub name: Option<String>,
    pub bytes: u64,
    pub chunks: u64,
    pub probe: CodecProbe,
    fed: u64,
}

impl StreamProbe {
    fn from_strl(index: usize, body: &[u8]) -> Self {
        let mut stream = StreamProbe {
            index,
            ..Default::default()
        };
        let mut format: &[u8] = &[];
        riff::walk(body, |header, data| {
            match &header.id {
                b"strh" => stream.header = StreamHeader::parse(data).unwrap_or_default(),
                b"strf" => format = data,
                b"strn" => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    stream.name = Some(String::from_utf8_lossy(&data[..end]).into_owned());
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
        match &stream.header.fcc_type {
            b"vids" => stream.parse_bitmap_info(format),
            b"auds" => stream.parse_wave_format(format),
            _ => {}
        }
        stream.probe = CodecProbe::for_codec(stream.codec);
        stream
    }

    fn parse_bitmap_info(&mut self, data: &[u8]) {
        self.width = le_u32(data, 4).map(|w| (w as i32).unsigned_abs());
        self.height = le_u32(data, 8).map(|h| (h as i32).unsigned_abs());
        self.compression = data.get(16..20).map(|c| [c[0], c[1], c[2], c[3]]);
        self.codec = match self.compression.map(|c| CodecId::from_fourcc(&c)) {
            Some(CodecId::Unknown) | None => CodecId::from_fourcc(&self.header.handler),
            Some(codec) => codec,
        };
    }

    fn parse_wave_format(&mut self, data: &[u8]) {
        self.format_tag = le_u16(data, 0);
        self.channels = le_u16(data, 2);
        self.sample_rate = le_u32(data, 4);
        self.avg_bytes_per_sec = le_u32(data, 8);
        self.bits_per_sample = le_u16(data, 14).filter(|&b| b > 0);
        self.codec = self.format_tag.map_or(CodecId::Unknown, CodecId::from_wave_format);
    }

    pub fn kind(&self) -> StreamKind {
        match &self.header.fcc_type {
            b"vids" => StreamKind::Video,
            b"auds" => StreamKind::Audio,
            b"txts" => StreamKind::Text,
            _ => self.codec.kind(),
        }
    }

    fn wants_payload(&self) -> bool {
        self.probe.is_active() && self.fed < PROBE_CHUNKS
    }

    /// Constant-rate audio: duration follows from the byte count.
    fn is_cbr_audio(&self) -> bool {
        self.kind() == StreamKind::Audio && self.header.sample_size != 0 && self.avg_bytes_per_sec.unwrap_or(0) > 0
    }
}

/// Stream number from a movi/idx1 chunk id ("01wb" -> 1).
pub fn chunk_stream(id: &[u8; 4]) -> Option<usize> {
    let digits = std::str::from_utf8(&id[..2]).ok()?;
    usize::from_str_radix(digits, 16).ok()
}

// ============================================================================
// Layout
// ============================================================================

#[derive(Debug, Default)]
struct Layout {
    main: Option<MainHeader>,
    streams: Vec<StreamProbe>,
    odml_frames: Option<u32>,
    info: Vec<([u8; 4], String)>,
    movi: Vec<ByteRange>,
    idx1: Option<ByteRange>,
    extensions: u32,
}

impl Layout {
    fn chunk(&mut self, src: &mut dyn ByteSource, header: &ChunkHeader, range: ByteRange) {
        if header.id == LIST {
            let list_type = match src.read_clamped(range.offset, 4) {
                Ok(t) if t.len() == 4 => [t[0], t[1], t[2], t[3]],
                _ => return,
            };
            let body = ByteRange::new(range.offset + 4, range.len.saturating_sub(4));
            match &list_type {
                b"hdrl" => {
                    if let Some(data) = read_capped(src, body, MAX_HDRL, "hdrl") {
                        self.parse_hdrl(&data);
                    }
                }
                b"INFO" => {
                    if let Some(data) = read_capped(src, body, MAX_INFO, "INFO") {
                        self.parse_info(&data);
                    }
                }
                b"movi" => self.movi.push(body),
                other => tracing::debug!("LIST {} skipped", fourcc_str(other)),
            }
            return;
        }
        match &header.id {
            b"idx1" => self.idx1 = Some(range),
            other => tracing::debug!("chunk {} skipped", fourcc_str(other)),
        }
    }

    fn parse_hdrl(&mut self, body: &[u8]) {
        riff::walk(body, |header, data| {
            match (&header.id, riff::list_body(data)) {
                (b"avih", _) => self.main = MainHeader::parse(data),
                (b"LIST", Some((list_type, children))) if &list_type == b"strl" => {
                    let index = self.streams.len();
                    self.streams.push(StreamProbe::from_strl(index, children));
                }
                (b"LIST", Some((list_type, children))) if &list_type == b"odml" => {
                    let dmlh = find_chunk(children, b"dmlh");
                    self.odml_frames = dmlh.and_then(|d| le_u32(d, 0));
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }

    fn parse_info(&mut self, body: &[u8]) {
        riff::walk(body, |header, data| {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            let text = String::from_utf8_lossy(&data[..end]).trim().to_string();
            if !text.is_empty() {
                self.info.push((header.id, text));
            }
            ControlFlow::Continue(())
        });
    }
}

fn find_chunk<'a>(body: &'a [u8], id: &[u8; 4]) -> Option<&'a [u8]> {
    let mut found = None;
    riff::walk(body, |header, data| {
        if &header.id == id {
            found = Some(data);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    found
}

fn read_capped(src: &mut dyn ByteSource, range: ByteRange, cap: u64, what: &str) -> Option<Vec<u8>> {
    if range.len > cap {
        tracing::warn!("{} of {} bytes over the {} byte cap, skipped", what, range.len, cap);
        return None;
    }
    match src.read_range(range) {
        Ok(data) => Some(data),
        Err(err) => {
            tracing::warn!("cannot read {}: {}", what, err);
            None
        }
    }
}

// ============================================================================
// movi / idx1
// ============================================================================

fn apply_idx1(data: &[u8], streams: &mut [StreamProbe]) -> bool {
    let mut entries = 0u64;
    for entry in data.chunks_exact(16) {
        let id = [entry[0], entry[1], entry[2], entry[3]];
        let (Some(index), Some(size)) = (chunk_stream(&id), le_u32(entry, 12)) else {
            continue;
        };
        if let Some(stream) = streams.get_mut(index) {
            stream.bytes += size as u64;
            stream.chunks += 1;
            entries += 1;
        }
    }
    tracing::debug!("idx1: {} entries", entries);
    entries > 0
}

struct MoviScan<'a> {
    streams: &'a mut [StreamProbe],
    /// Counts come from idx1, movi is only walked for probe payloads.
    indexed: bool,
    limit: u64,
    complete: bool,
    depth: u32,
}

impl MoviScan<'_> {
    fn walk(&mut self, src: &mut dyn ByteSource, range: ByteRange) -> ControlFlow<()> {
        let mut flow = ControlFlow::Continue(());
        riff::walk_source(src, range, |src, header, payload| {
            flow = self.chunk(src, header, payload);
            flow
        });
        flow
    }

    fn chunk(&mut self, src: &mut dyn ByteSource, header: &ChunkHeader, payload: ByteRange) -> ControlFlow<()> {
        if payload.offset > self.limit {
            self.complete = false;
            return ControlFlow::Break(());
        }
        if self.indexed && !self.streams.iter().any(StreamProbe::wants_payload) {
            return ControlFlow::Break(());
        }
        if header.id == LIST {
            // "rec " groups; anything nested deeper is not a real muxer's output
            if self.depth >= MAX_LIST_DEPTH {
                return ControlFlow::Continue(());
            }
            let body = ByteRange::new(payload.offset + 4, payload.len.saturating_sub(4));
            self.depth += 1;
            let flow = self.walk(src, body);
            self.depth -= 1;
            return flow;
        }
        let Some(stream) = chunk_stream(&header.id).and_then(|i| self.streams.get_mut(i)) else {
            return ControlFlow::Continue(());
        };
        if !self.indexed {
            stream.bytes += payload.len;
            stream.chunks += 1;
        }
        if stream.wants_payload() && !payload.is_empty() {
            stream.fed += 1;
            match src.read_range(ByteRange::new(payload.offset, payload.len.min(MAX_PROBE_CHUNK))) {
                Ok(data) => stream.probe.feed(&data),
                Err(err) => tracing::debug!("cannot read chunk at {}: {}", payload.offset, err),
            }
        }
        ControlFlow::Continue(())
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Probe a RIFF AVI file. None if the first chunk is not `RIFF....AVI `.
pub fn probe(src: &mut dyn ByteSource, ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let head = src.read_clamped(0, 12).ok()?;
    if head.len() < 12 || head[..4] != RIFF || &head[8..12] != b"AVI " {
        return None;
    }

    // RIFF sizes are clamped to the file so a truncated tail still walks
    let mut layout = Layout::default();
    let mut offset = 0u64;
    while offset + 12 <= size {
        let Ok(head) = src.read_clamped(offset, 12) else {
            break;
        };
        if head.len() < 12 || head[..4] != RIFF {
            break;
        }
        let declared = le_u32(&head, 4).unwrap_or(0) as u64;
        let len = declared.min(size - offset - 8);
        match &head[8..12] {
            b"AVI " => {}
            b"AVIX" => layout.extensions += 1,
            other => tracing::debug!("RIFF form {:?} skipped", String::from_utf8_lossy(other)),
        }
        let body = ByteRange::new(offset + 12, len.saturating_sub(4));
        riff::walk_source(src, body, |src, header, range| {
            layout.chunk(src, header, range);
            ControlFlow::Continue(())
        });
        offset += 8 + len + (len & 1);
    }

    let mut indexed = false;
    if let Some(range) = layout.idx1 {
        if let Some(data) = read_capped(src, range, MAX_IDX1, "idx1") {
            indexed = apply_idx1(&data, &mut layout.streams);
        }
    }
    let plan = ScanPlan::new(size, ctx.options.speed());
    let mut scan = MoviScan {
        streams: &mut layout.streams,
        indexed,
        limit: plan.head,
        complete: true,
        depth: 0,
    };
    for range in &layout.movi {
        if scan.walk(src, *range).is_break() {
            break;
        }
    }
    // a movi list cut off by truncation is never recorded
    let counted = indexed || (scan.complete && !layout.movi.is_empty());
    for stream in layout.streams.iter_mut() {
        stream.probe.flush();
    }
    tracing::debug!("avi: {} streams, indexed: {}, counted: {}", layout.streams.len(), indexed, counted);

    let mut report = build_report(&layout, size, counted);
    report.finish();
    Some(report)
}

fn build_report(layout: &Layout, size: u64, counted: bool) -> Report {
    let mut report = Report::new(ContainerKind::Avi, size);
    if layout.extensions > 0 || layout.odml_frames.is_some() {
        report.general.push("Format profile", "OpenDML");
    }
    for (id, text) in &layout.info {
        match id {
            b"INAM" => report.general.push("Title", text.clone()),
            b"ISFT" => report.general.push("Writing application", text.clone()),
            b"ICRD" => report.general.push("Recorded date", text.clone()),
            _ => continue,
        };
    }

    let mut longest: Option<u64> = None;
    let mut first_video = true;
    for stream in &layout.streams {
        // dmlh counts frames across every RIFF; strh only covers the first
        let odml = if stream.kind() == StreamKind::Video && first_video {
            first_video = false;
            layout.odml_frames
        } else {
            None
        };
        let s = describe_stream(stream, odml, counted);
        longest = longest.max(s.key("duration").and_then(|v| v.parse().ok()));
        report.streams.push(s);
    }

    let duration = longest.or_else(|| layout.main.as_ref().and_then(MainHeader::duration_ms));
    report.container.duration_ms = duration;
    report.container.overall_bitrate = duration.and_then(|ms| stats::bitrate(size, ms, Rounding::Round));
    if counted && !layout.streams.is_empty() {
        let payload: u64 = layout.streams.iter().map(|s| s.bytes).sum();
        report.container.stream_overhead = Some(size.saturating_sub(payload));
    }
    report
}

fn describe_stream(stream: &StreamProbe, odml_frames: Option<u32>, counted: bool) -> Stream {
    let kind = stream.kind();
    let h = &stream.header;
    let mut s = Stream::new(kind);
    s.push_both("ID", stream.index.to_string(), stream.index);
    s.push("Format", stream.codec.name());
    match (stream.compression, stream.format_tag) {
        (Some(c), _) => s.push("Codec ID", fourcc_str(&c)),
        (None, Some(tag)) => s.push("Codec ID", format!("{:X}", tag)),
        (None, None) => s.push("Codec ID", fourcc_str(&h.handler)),
    };
    if stream.probe.is_detected() {
        stream.probe.describe(&mut s);
    }

    let bytes = counted.then_some(stream.bytes);
    let frames = match odml_frames {
        Some(total) if total > h.length => total,
        _ => h.length,
    };
    let duration = if stream.is_cbr_audio() {
        let avg = stream.avg_bytes_per_sec.unwrap_or(0) as u64;
        bytes
            .filter(|&b| b > 0)
            .map(|b| (b as u128 * 1000 / avg as u128) as u64)
            .or_else(|| h.duration_ms())
    } else {
        StreamHeader { length: frames, ..*h }.duration_ms()
    };
    if let Some(ms) = duration {
        s.push_both("Duration", display::duration(ms), ms);
    }

    if s.key("bit_rate").is_none() {
        let bps = if stream.is_cbr_audio() {
            stream.avg_bytes_per_sec.map(|avg| avg as u64 * 8)
        } else {
            let rounding = if kind == StreamKind::Audio { AVI_AUDIO_ROUNDING } else { AVI_VIDEO_ROUNDING };
            bytes.zip(duration).and_then(|(b, ms)| stats::bitrate(b, ms, rounding))
        };
        if let Some(bps) = bps.filter(|&b| b > 0) {
            s.push_both("Bit rate", display::bitrate(bps), bps);
        }
    }

    match kind {
        StreamKind::Video => {
            if s.get("Width").is_none() {
                if let (Some(w), Some(ht)) = (stream.width, stream.height) {
                    s.push_both("Width", display::pixels(w), w);
                    s.push_both("Height", display::pixels(ht), ht);
                }
            }
            if s.get("Frame rate").is_none() && h.rate > 0 && h.scale > 0 {
                s.push_both(
                    "Frame rate",
                    display::frame_rate(h.rate, h.scale),
                    format!("{:.3}", h.rate as f64 / h.scale as f64),
                );
            }
            if frames > 0 {
                s.set_key("frame_count", frames);
            }
        }
        StreamKind::Audio => {
            if s.get("Channel(s)").is_none() {
                if let Some(ch) = stream.channels.filter(|&c| c > 0) {
                    s.push_both("Channel(s)", display::channels(ch as u32), ch);
                }
            }
            if s.get("Sampling rate").is_none() {
                if let Some(rate) = stream.sample_rate.filter(|&r| r > 0) {
                    s.push_both("Sampling rate", display::sample_rate(rate), rate);
                }
            }
            if stream.codec == CodecId::Pcm {
                if let Some(bits) = stream.bits_per_sample {
                    s.push_both("Bit depth", display::bit_depth(bits as u32), bits);
                }
            }
        }
        _ => {}
    }
    if let Some(bytes) = bytes.filter(|&b| b > 0) {
        s.push_both("Stream size", display::file_size(bytes), bytes);
    }
    if let Some(name) = &stream.name {
        s.push("Title", name.clone());
    }
    s
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Chunk with its pad byte.
    pub(crate) fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    pub(crate) fn list(kind: &[u8; 4], children: &[u8]) -> Vec<u8> {
        chunk(b"LIST", &[&kind[..], children].concat())
    }

    pub(crate) fn riff(form: &[u8; 4], children: &[u8]) -> Vec<u8> {
        chunk(b"RIFF", &[&form[..], children].concat())
    }

    pub(crate) fn le(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub(crate) fn strh(fcc_type: &[u8; 4], handler: &[u8; 4], scale: u32, rate: u32, length: u32, sample_size: u32) -> Vec<u8> {
        let mut payload = [&fcc_type[..], &handler[..]].concat();
        payload.extend(le(&[0, 0, 0, scale, rate, 0, length, 0, 0, sample_size, 0, 0]));
        chunk(b"strh", &payload)
    }

    pub(crate) fn bitmap_info(width: u32, height: u32, compression: &[u8; 4]) -> Vec<u8> {
        let mut payload = le(&[40, width, height]);
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&24u16.to_le_bytes());
        payload.extend_from_slice(compression);
        payload.extend(le(&[0; 5]));
        chunk(b"strf", &payload)
    }

    pub(crate) fn wave_format(tag: u16, channels: u16, rate: u32, avg: u32, bits: u16) -> Vec<u8> {
        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(&channels.to_le_bytes());
        payload.extend(le(&[rate, avg]));
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&bits.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        chunk(b"strf", &payload)
    }
}
