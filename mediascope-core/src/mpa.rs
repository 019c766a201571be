// MPEG AUDIO - MPEG-1/2/2.5 Layer I/II/III frame headers
//
// • decode_header: 32-bit header to MpaHeader
// • MpaProbe: sync search over a running stream, two-frame confirmation

use serde::Serialize;

use crate::bits::{BitReader, BitResult, BitstreamError};
use crate::display;
use crate::report::Stream;

const MAX_CARRY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MpaVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

impl MpaVersion {
    pub fn name(&self) -> &'static str {
        match self {
            MpaVersion::Mpeg1 => "Version 1",
            MpaVersion::Mpeg2 => "Version 2",
            MpaVersion::Mpeg25 => "Version 2.5",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualMono,
    Mono,
}

impl ChannelMode {
    pub fn channels(&self) -> u32 {
        match self {
            ChannelMode::Mono => 1,
            _ => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelMode::Stereo => "Stereo",
            ChannelMode::JointStereo => "Joint stereo",
            ChannelMode::DualMono => "Dual mono",
            ChannelMode::Mono => "Mono",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MpaHeader {
    pub version: MpaVersion,
    /// 1, 2 or 3.
    pub layer: u8,
    pub protected: bool,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mode: ChannelMode,
    pub mode_extension: u8,
    pub copyright: bool,
    pub original: bool,
    pub emphasis: u8,
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

impl MpaHeader {
    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (1, _) => 384,
            (3, MpaVersion::Mpeg2 | MpaVersion::Mpeg25) => 576,
            _ => 1152,
        }
    }

    /// Frame length in bytes, padding included. None for free-format frames.
    pub fn frame_length(&self) -> Option<usize> {
        if self.bitrate_kbps == 0 {
            return None;
        }
        let bits = self.bitrate_kbps as usize * 1000;
        let rate = self.sample_rate as usize;
        let pad = self.padding as usize;
        Some(match self.layer {
            1 => (12 * bits / rate + pad) * 4,
            _ => self.samples_per_frame() as usize / 8 * bits / rate + pad,
        })
    }

    /// Version, layer and sample rate equal (the fields that never change mid-stream).
    pub fn same_stream(&self, other: &MpaHeader) -> bool {
        self.version == other.version && self.layer == other.layer && self.sample_rate == other.sample_rate
    }
}

pub fn decode_header(buf: &[u8]) -> BitResult<MpaHeader> {
    let mut r = BitReader::new(buf);
    if r.read_bits(11)? != 0x7FF {
        return Err(BitstreamError::NoSync);
    }
    let version = match r.read_u8(2)? {
        0 => MpaVersion::Mpeg25,
        2 => MpaVersion::Mpeg2,
        3 => MpaVersion::Mpeg1,
        _ => return Err(BitstreamError::Reserved("version")),
    };
    let layer = match r.read_u8(2)? {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return Err(BitstreamError::Reserved("layer")),
    };
    let protected = !r.read_bool()?;
    let bitrate_index = r.read_u8(4)? as usize;
    if bitrate_index == 15 {
        return Err(BitstreamError::Reserved("bitrate_index"));
    }
    let rate_index = r.read_u8(2)? as usize;
    let base_rate = *SAMPLE_RATES_V1
        .get(rate_index)
        .ok_or(BitstreamError::Reserved("sampling_frequency"))?;
    let padding = r.read_bool()?;
    r.skip(1)?; // private
    let mode = match r.read_u8(2)? {
        0 => ChannelMode::Stereo,
        1 => ChannelMode::JointStereo,
        2 => ChannelMode::DualMono,
        _ => ChannelMode::Mono,
    };
    let mode_extension = r.read_u8(2)?;
    let copyright = r.read_bool()?;
    let original = r.read_bool()?;
    let emphasis = r.read_u8(2)?;
    if emphasis == 2 {
        return Err(BitstreamError::Reserved("emphasis"));
    }

    let (bitrate_kbps, sample_rate) = match version {
        MpaVersion::Mpeg1 => (BITRATES_V1[layer as usize - 1][bitrate_index], base_rate),
        MpaVersion::Mpeg2 => (BITRATES_V2[usize::from(layer != 1)][bitrate_index], base_rate / 2),
        MpaVersion::Mpeg25 => (BITRATES_V2[usize::from(layer != 1)][bitrate_index], base_rate / 4),
    };

    Ok(MpaHeader {
        version,
        layer,
        protected,
        bitrate_kbps,
        sample_rate,
        padding,
        mode,
        mode_extension,
        copyright,
        original,
        emphasis,
    })
}

// ============================================================================
// Running probe
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MpaProbe {
    carry: Vec<u8>,
    pub first: Option<MpaHeader>,
    pub frames: u64,
    pub bytes: u64,
    min_kbps: Option<u32>,
    max_kbps: Option<u32>,
    pub skipped_bytes: u64,
}

impl MpaProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        let mut pos = 0usize;
        while pos + 4 <= self.carry.len() {
            if self.carry[pos] != 0xFF || self.carry[pos + 1] & 0xE0 != 0xE0 {
                pos += 1;
                self.skipped_bytes += 1;
                continue;
            }
            let Some((header, len)) = decode_header(&self.carry[pos..])
                .ok()
                .and_then(|h| Some((h, h.frame_length()?)))
            else {
                pos += 1;
                self.skipped_bytes += 1;
                continue;
            };
            let next = pos + len;
            if next > self.carry.len() {
                break;
            }
            // before the stream is locked, a second header must follow
            if self.first.is_none() {
                if next + 4 > self.carry.len() {
                    break;
                }
                let confirmed = decode_header(&self.carry[next..]).is_ok_and(|n| n.same_stream(&header));
                if !confirmed {
                    pos += 1;
                    self.skipped_bytes += 1;
                    continue;
                }
            } else if self.first.is_some_and(|f| !f.same_stream(&header)) {
                pos += 1;
                self.skipped_bytes += 1;
                continue;
            }
            self.record(header, len);
            pos += len;
        }
        let pos = pos.min(self.carry.len());
        self.carry.drain(..pos);
        if self.carry.len() > MAX_CARRY {
            tracing::warn!("mpeg audio carry over {} bytes, dropping", MAX_CARRY);
            self.carry.clear();
        }
    }

    fn record(&mut self, header: MpaHeader, len: usize) {
        self.first.get_or_insert(header);
        self.frames += 1;
        self.bytes += len as u64;
        let kbps = header.bitrate_kbps;
        self.min_kbps = Some(self.min_kbps.map_or(kbps, |m| m.min(kbps)));
        self.max_kbps = Some(self.max_kbps.map_or(kbps, |m| m.max(kbps)));
    }

    pub fn is_detected(&self) -> bool {
        self.first.is_some()
    }

    pub fn is_vbr(&self) -> bool {
        self.min_kbps != self.max_kbps
    }

    /// Duration implied by the frames seen, in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        let first = self.first?;
        Some(self.frames * first.samples_per_frame() as u64 * 1000 / first.sample_rate as u64)
    }

    pub fn describe(&self, stream: &mut Stream) {
        let Some(h) = self.first else {
            return;
        };
        stream.push("Format", "MPEG Audio");
        stream.push("Format version", h.version.name());
        stream.push("Format profile", format!("Layer {}", h.layer));
        if h.mode == ChannelMode::JointStereo {
            let ext = if h.layer == 3 {
                ["", "Intensity Stereo", "MS Stereo", "Intensity Stereo + MS Stereo"][h.mode_extension as usize & 3]
            } else {
                ""
            };
            stream.push("Mode", "Joint stereo");
            if !ext.is_empty() {
                stream.push("Mode extension", ext);
            }
        }
        if self.is_vbr() {
            stream.push_both("Bit rate mode", "Variable", "VBR");
        } else {
            let bps = h.bitrate_kbps as u64 * 1000;
            stream.push_both("Bit rate mode", "Constant", "CBR");
            stream.push_both("Bit rate", display::bitrate(bps), bps);
        }
        let channels = h.mode.channels();
        stream.push_both("Channel(s)", display::channels(channels), channels);
        stream.push_both("Sampling rate", display::sample_rate(h.sample_rate), h.sample_rate);
        let spf = h.samples_per_frame();
        stream.push(
            "Frame rate",
            format!("{:.3} FPS ({} SPF)", h.sample_rate as f64 / spf as f64, spf),
        );
        stream.push("Compression mode", "Lossy");
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// MPEG-1 Layer III, 128 kb/s, 44.1 kHz, joint stereo: 417 bytes.
    pub(crate) fn layer3_frame() -> Vec<u8> {
        let mut frame = vec![0xFF, 0xFB, 0x90, 0x64];
        frame.resize(417, 0x55);
        frame
    }
}
