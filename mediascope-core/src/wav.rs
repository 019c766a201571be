// WAV - RIFF WAVE probe
//
// fmt gives the sample layout, data gives the payload size. Compressed
// payloads (AC-3, MPEG audio) get their head fed to the codec probe.

use crate::display;
use crate::es::CodecProbe;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::probe::ProbeContext;
use crate::report::{BitrateMode, Report, Stream};
use crate::riff::{self, le_u16, le_u32, RIFF};
use crate::source::{ByteRange, ByteSource};
use crate::stats::{self, Rounding};

const MAX_FMT: u64 = 4096;
const PROBE_HEAD: u64 = 64 * 1024;
const EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// WAVE_FORMAT_EXTENSIBLE only.
    pub channel_mask: Option<u32>,
}

impl WaveFormat {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut fmt = Self {
            format_tag: le_u16(data, 0)?,
            channels: le_u16(data, 2)?,
            sample_rate: le_u32(data, 4)?,
            avg_bytes_per_sec: le_u32(data, 8)?,
            block_align: le_u16(data, 12)?,
            bits_per_sample: le_u16(data, 14).unwrap_or(0),
            channel_mask: None,
        };
        // the sub-format GUID starts with the real format tag
        if fmt.format_tag == EXTENSIBLE {
            fmt.channel_mask = le_u32(data, 20);
            if let Some(tag) = le_u16(data, 24) {
                fmt.format_tag = tag;
            }
        }
        Some(fmt)
    }

    pub fn codec(&self) -> CodecId {
        CodecId::from_wave_format(self.format_tag)
    }
}

/// Probe a RIFF WAVE file. None without a `RIFF....WAVE` header.
pub fn probe(src: &mut dyn ByteSource, _ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let head = src.read_clamped(0, 12).ok()?;
    if head.len() < 12 || head[..4] != RIFF || &head[8..12] != b"WAVE" {
        return None;
    }
    let declared = le_u32(&head, 4).unwrap_or(0) as u64;
    let body = ByteRange::new(12, declared.min(size - 8).saturating_sub(4));

    let mut fmt: Option<WaveFormat> = None;
    let mut data: Option<ByteRange> = None;
    // data is often declared larger than what was written; clamp by hand
    let mut offset = body.offset;
    while offset + 8 <= body.end() {
        let Ok(chunk) = src.read_clamped(offset, 8) else {
            break;
        };
        let Ok(header) = riff::decode_header(&chunk, offset) else {
            break;
        };
        let payload = ByteRange::new(offset + 8, (header.size as u64).min(body.end() - offset - 8));
        match &header.id {
            b"fmt " => {
                fmt = src
                    .read_range(ByteRange::new(payload.offset, payload.len.min(MAX_FMT)))
                    .ok()
                    .and_then(|raw| WaveFormat::parse(&raw));
            }
            b"data" => data = Some(payload),
            other => tracing::debug!("wave chunk {:?} skipped", String::from_utf8_lossy(other)),
        }
        offset = payload.offset + header.padded_size();
    }

    let mut report = Report::new(ContainerKind::Wave, size);
    let Some(fmt) = fmt else {
        tracing::warn!("wave file without a fmt chunk");
        report.finish();
        return Some(report);
    };
    let codec = fmt.codec();
    let mut stream = Stream::new(StreamKind::Audio);
    stream.push("Format", codec.name());
    stream.push("Codec ID", format!("{:X}", fmt.format_tag));

    let mut probe = CodecProbe::for_codec(codec);
    if let Some(range) = data.filter(|_| probe.is_active()) {
        match src.read_range(ByteRange::new(range.offset, range.len.min(PROBE_HEAD))) {
            Ok(head) => probe.feed(&head),
            Err(err) => tracing::warn!("cannot read data chunk: {}", err),
        }
        probe.flush();
        if probe.is_detected() {
            probe.describe(&mut stream);
        }
    }

    let bytes = data.map_or(0, |d| d.len);
    let duration = (fmt.avg_bytes_per_sec > 0 && bytes > 0).then(|| bytes * 1000 / fmt.avg_bytes_per_sec as u64);
    if let Some(ms) = duration {
        stream.push_both("Duration", display::duration(ms), ms);
    }
    if stream.key("bit_rate").is_none() && fmt.avg_bytes_per_sec > 0 {
        let bps = fmt.avg_bytes_per_sec as u64 * 8;
        stream.push_both("Bit rate mode", BitrateMode::Constant.name(), "CBR");
        stream.push_both("Bit rate", display::bitrate(bps), bps);
    }
    if stream.get("Channel(s)").is_none() && fmt.channels > 0 {
        stream.push_both("Channel(s)", display::channels(fmt.channels as u32), fmt.channels);
    }
    if stream.get("Sampling rate").is_none() && fmt.sample_rate > 0 {
        stream.push_both("Sampling rate", display::sample_rate(fmt.sample_rate), fmt.sample_rate);
    }
    if codec == CodecId::Pcm && fmt.bits_per_sample > 0 {
        stream.push_both("Bit depth", display::bit_depth(fmt.bits_per_sample as u32), fmt.bits_per_sample);
        let sign = if fmt.bits_per_sample > 8 { "Signed" } else { "Unsigned" };
        stream.push("Format settings", format!("Little / {}", sign));
    }
    if let Some(mask) = fmt.channel_mask {
        stream.set_key("channel_mask", format!("0x{:X}", mask));
    }
    if bytes > 0 {
        stream.push_both("Stream size", display::file_size(bytes), bytes);
        report.container.stream_overhead = Some(size.saturating_sub(bytes));
    }
    report.streams.push(stream);

    report.container.duration_ms = duration;
    report.container.bitrate_mode = Some(BitrateMode::Constant);
    report.container.overall_bitrate = duration.and_then(|ms| stats::bitrate(size, ms, Rounding::Round));
    report.finish();
    Some(report)
}
