// MP4 - ISO-BMFF / QuickTime container probe
//
// Top level is walked from the source (mdat is never read); moov is
// materialized once, capped at MAX_MOOV, and walked in memory:
//   moov/mvhd                      movie duration
//   moov/trak/tkhd                 track id, presentation size
//   moov/trak/mdia/mdhd            timescale, duration, language
//   moov/trak/mdia/hdlr            handler (vide/soun/text/subt)
//   .../minf/stbl/stsd             sample entry + avcC / dac3 / dec3
//   .../minf/stbl/stsz, stts       byte totals, sample counts

use std::ops::ControlFlow;

use bytes::Buf;
use serde::Serialize;

use crate::ac3;
use crate::bits::{BitReader, BitResult};
use crate::bmff::{self, full_box};
use crate::display;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::probe::ProbeContext;
use crate::report::{BitrateMode, Report, Stream};
use crate::source::{ByteRange, ByteSource};
use crate::stats::{self, MP4_ROUNDING};
use crate::tree::fourcc_str;

/// Largest moov payload read into memory.
pub const MAX_MOOV: u64 = 64 * 1024 * 1024;
const MAX_FTYP: u64 = 4096;

const AC3_BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

// ============================================================================
// Decoded boxes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dac3 {
    pub fscod: u8,
    pub bsid: u8,
    pub bsmod: u8,
    pub acmod: u8,
    pub lfeon: bool,
    pub bit_rate_code: u8,
}

impl Dac3 {
    pub fn parse(payload: &[u8]) -> BitResult<Self> {
        let mut r = BitReader::new(payload);
        Ok(Self {
            fscod: r.read_u8(2)?,
            bsid: r.read_u8(5)?,
            bsmod: r.read_u8(3)?,
            acmod: r.read_u8(3)?,
            lfeon: r.read_bool()?,
            bit_rate_code: r.read_u8(5)?,
        })
    }

    pub fn bitrate(&self) -> Option<u32> {
        AC3_BITRATES.get(self.bit_rate_code as usize).map(|k| k * 1000)
    }
}

/// First independent substream of a dec3 box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dec3 {
    /// kb/s
    pub data_rate: u16,
    pub independent_substreams: u8,
    pub fscod: u8,
    pub bsid: u8,
    pub acmod: u8,
    pub lfeon: bool,
    pub dependent_substreams: u8,
}

impl Dec3 {
    pub fn parse(payload: &[u8]) -> BitResult<Self> {
        let mut r = BitReader::new(payload);
        let data_rate = r.read_u16(13)?;
        let independent_substreams = r.read_u8(3)? + 1;
        let fscod = r.read_u8(2)?;
        let bsid = r.read_u8(5)?;
        r.skip(1 + 1 + 3)?; // reserved, asvc, bsmod
        let acmod = r.read_u8(3)?;
        let lfeon = r.read_bool()?;
        r.skip(3)?;
        let dependent_substreams = r.read_u8(4)?;
        Ok(Self {
            data_rate,
            independent_substreams,
            fscod,
            bsid,
            acmod,
            lfeon,
            dependent_substreams,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvcConfig {
    pub profile: u8,
    pub constraints: u8,
    pub level: u8,
}

impl AvcConfig {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 || payload[0] != 1 {
            return None;
        }
        Some(Self {
            profile: payload[1],
            constraints: payload[2],
            level: payload[3],
        })
    }

    pub fn profile_name(&self) -> String {
        let profile = match self.profile {
            66 if self.constraints & 0x40 != 0 => "Constrained Baseline",
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4 Predictive",
            _ => "Unknown",
        };
        if self.level % 10 == 0 {
            format!("{}@L{}", profile, self.level / 10)
        } else {
            format!("{}@L{}.{}", profile, self.level / 10, self.level % 10)
        }
    }
}

/// Packed ISO-639-2/T code from mdhd.
fn unpack_language(packed: u16) -> Option<String> {
    if packed == 0 || packed == 0x7FFF {
        return None;
    }
    let chars: Vec<u8> = [10u16, 5, 0]
        .into_iter()
        .map(|shift| ((packed >> shift) & 0x1F) as u8 + 0x60)
        .collect();
    if !chars.iter().all(u8::is_ascii_lowercase) {
        return None;
    }
    let code = String::from_utf8_lossy(&chars).into_owned();
    (code != "und").then_some(code)
}

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Handler {
    Video,
    Audio,
    Text,
    Other([u8; 4]),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Mp4Track {
    pub id: u32,
    pub handler: Option<Handler>,
    pub timescale: u32,
    pub duration: u64,
    pub language: Option<String>,
    pub sample_entry: Option<[u8; 4]>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u16>,
    pub sample_size: Option<u16>,
    pub sample_rate: Option<u32>,
    pub sample_count: u64,
    pub sample_bytes: u64,
    pub avc: Option<AvcConfig>,
    pub dac3: Option<Dac3>,
    pub dec3: Option<Dec3>,
}

impl Mp4Track {
    pub fn codec(&self) -> CodecId {
        match self.sample_entry.as_ref().map(|e| &e[..]) {
            Some(b"avc1" | b"avc3") => CodecId::Avc,
            Some(b"hvc1" | b"hev1") => CodecId::Hevc,
            Some(b"mp4v") => CodecId::Mpeg4Visual,
            Some(b"vp08") => CodecId::Vp8,
            Some(b"vp09") => CodecId::Vp9,
            Some(b"av01") => CodecId::Av1,
            Some(b"jpeg" | b"mjpa") => CodecId::Mjpeg,
            Some(b"mp4a") => CodecId::Aac,
            Some(b"ac-3") => CodecId::Ac3,
            Some(b"ec-3") => CodecId::Eac3,
            Some(b"fLaC") => CodecId::Flac,
            Some(b"Opus") => CodecId::Opus,
            Some(b".mp3") => CodecId::MpegAudio,
            Some(b"lpcm" | b"sowt" | b"twos" | b"in24") => CodecId::Pcm,
            Some(b"tx3g" | b"wvtt") => CodecId::Text,
            Some(b"c608") => CodecId::Eia608,
            Some(b"c708") => CodecId::Cea708,
            _ => CodecId::Unknown,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        (self.timescale > 0 && self.duration > 0).then(|| (self.duration as u128 * 1000 / self.timescale as u128) as u64)
    }

    fn kind(&self) -> StreamKind {
        match self.handler {
            Some(Handler::Video) => StreamKind::Video,
            Some(Handler::Audio) => StreamKind::Audio,
            Some(Handler::Text) => StreamKind::Text,
            _ => self.codec().kind(),
        }
    }
}

fn parse_tkhd(payload: &[u8], track: &mut Mp4Track) {
    let Some((version, _flags, mut body)) = full_box(payload) else {
        return;
    };
    let skip = if version == 1 { 16 } else { 8 };
    if body.len() < skip + 4 {
        return;
    }
    body.advance(skip);
    track.id = body.get_u32();
    // width and height are the last two 16.16 fields
    if payload.len() >= 8 {
        let mut tail = &payload[payload.len() - 8..];
        let width = tail.get_u32() >> 16;
        let height = tail.get_u32() >> 16;
        if width > 0 && height > 0 {
            track.width = Some(width);
            track.height = Some(height);
        }
    }
}

fn parse_mdhd(payload: &[u8], track: &mut Mp4Track) {
    let Some((version, _flags, mut body)) = full_box(payload) else {
        return;
    };
    let (times, duration_len) = if version == 1 { (16, 8) } else { (8, 4) };
    if body.len() < times + 4 + duration_len + 2 {
        return;
    }
    body.advance(times);
    track.timescale = body.get_u32();
    track.duration = if version == 1 { body.get_u64() } else { body.get_u32() as u64 };
    track.language = unpack_language(body.get_u16());
}

fn parse_hdlr(payload: &[u8], track: &mut Mp4Track) {
    let Some((_, _, body)) = full_box(payload) else {
        return;
    };
    let Some(kind) = body.get(4..8) else {
        return;
    };
    track.handler = Some(match kind {
        b"vide" => Handler::Video,
        b"soun" => Handler::Audio,
        b"text" | b"subt" | b"sbtl" | b"clcp" => Handler::Text,
        other => Handler::Other([other[0], other[1], other[2], other[3]]),
    });
}

/// First sample entry of stsd.
fn parse_stsd(payload: &[u8], track: &mut Mp4Track) {
    let Some((_, _, body)) = full_box(payload) else {
        return;
    };
    let Some(entries) = body.get(4..) else {
        return;
    };
    let Ok((header, entry, _)) = bmff::read_header(entries, 0) else {
        tracing::debug!("track {}: unreadable sample entry", track.id);
        return;
    };
    track.sample_entry = Some(header.box_type);

    // 6 reserved + 2 data_reference_index
    let children = match track.handler {
        Some(Handler::Video) if entry.len() >= 78 => {
            let mut fields = &entry[24..28];
            let width = fields.get_u16() as u32;
            let height = fields.get_u16() as u32;
            if width > 0 && height > 0 {
                track.width = Some(width);
                track.height = Some(height);
            }
            &entry[78..]
        }
        Some(Handler::Audio) if entry.len() >= 28 => {
            let mut fields = &entry[16..28];
            track.channels = Some(fields.get_u16());
            track.sample_size = Some(fields.get_u16());
            fields.advance(4);
            let rate = fields.get_u32() >> 16;
            if rate > 0 {
                track.sample_rate = Some(rate);
            }
            &entry[28..]
        }
        _ => return,
    };

    bmff::walk(children, |child, data| {
        match &child.box_type {
            b"avcC" => track.avc = AvcConfig::parse(data),
            b"dac3" => track.dac3 = Dac3::parse(data).ok(),
            b"dec3" => track.dec3 = Dec3::parse(data).ok(),
            _ => {}
        }
        ControlFlow::Continue(())
    });
}

fn parse_stsz(payload: &[u8], track: &mut Mp4Track) {
    let Some((_, _, mut body)) = full_box(payload) else {
        return;
    };
    if body.len() < 8 {
        return;
    }
    let sample_size = body.get_u32() as u64;
    let declared = body.get_u32() as u64;
    if sample_size != 0 {
        track.sample_count = declared;
        track.sample_bytes = sample_size * declared;
        return;
    }
    // never trust the count beyond what the box holds
    let available = (body.len() / 4) as u64;
    if declared > available {
        tracing::warn!("track {}: stsz declares {} sizes, holds {}", track.id, declared, available);
    }
    track.sample_count = declared.min(available);
    track.sample_bytes = body
        .chunks_exact(4)
        .take(track.sample_count as usize)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as u64)
        .sum();
}

fn parse_trak(payload: &[u8]) -> Mp4Track {
    let mut track = Mp4Track::default();
    if let Some(tkhd) = bmff::find(payload, b"tkhd") {
        parse_tkhd(tkhd, &mut track);
    }
    let Some(mdia) = bmff::find(payload, b"mdia") else {
        return track;
    };
    if let Some(mdhd) = bmff::find(mdia, b"mdhd") {
        parse_mdhd(mdhd, &mut track);
    }
    if let Some(hdlr) = bmff::find(mdia, b"hdlr") {
        parse_hdlr(hdlr, &mut track);
    }
    if let Some(stbl) = bmff::find_path(mdia, &[b"minf", b"stbl"]) {
        bmff::walk(stbl, |child, data| {
            match &child.box_type {
                b"stsd" => parse_stsd(data, &mut track),
                b"stsz" => parse_stsz(data, &mut track),
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }
    track
}

// ============================================================================
// Movie
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct Movie {
    pub major_brand: Option<[u8; 4]>,
    pub compatible_brands: Vec<[u8; 4]>,
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<Mp4Track>,
    pub mdat_bytes: u64,
    pub fragmented: bool,
}

impl Movie {
    pub fn duration_ms(&self) -> Option<u64> {
        (self.timescale > 0 && self.duration > 0).then(|| (self.duration as u128 * 1000 / self.timescale as u128) as u64)
    }

    pub fn is_quicktime(&self) -> bool {
        self.major_brand == Some(*b"qt  ")
    }
}

fn parse_ftyp(payload: &[u8], movie: &mut Movie) {
    let mut chunks = payload.chunks_exact(4);
    if let Some(major) = chunks.next() {
        movie.major_brand = Some([major[0], major[1], major[2], major[3]]);
    }
    chunks.next(); // minor version
    movie.compatible_brands = chunks.map(|c| [c[0], c[1], c[2], c[3]]).collect();
}

pub fn parse_moov(payload: &[u8], movie: &mut Movie) {
    bmff::walk(payload, |header, data| {
        match &header.box_type {
            b"mvhd" => {
                if let Some((version, _, mut body)) = full_box(data) {
                    let times = if version == 1 { 16 } else { 8 };
                    if body.len() >= times + 4 + 8 {
                        body.advance(times);
                        movie.timescale = body.get_u32();
                        movie.duration = if version == 1 { body.get_u64() } else { body.get_u32() as u64 };
                    }
                }
            }
            b"trak" => movie.tracks.push(parse_trak(data)),
            b"mvex" => movie.fragmented = true,
            _ => {}
        }
        ControlFlow::Continue(())
    });
}

/// Probe an ISO-BMFF file. None if no ftyp or moov is found.
pub fn probe(src: &mut dyn ByteSource, ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let mut movie = Movie::default();
    let mut saw_ftyp = false;
    let mut saw_moov = false;

    bmff::walk_source(src, ByteRange::new(0, size), |src, header, range| {
        match &header.box_type {
            b"ftyp" => match src.read_range(ByteRange::new(range.offset, range.len.min(MAX_FTYP))) {
                Ok(payload) => {
                    saw_ftyp = true;
                    parse_ftyp(&payload, &mut movie);
                }
                Err(err) => tracing::warn!("cannot read ftyp: {}", err),
            },
            b"moov" if range.len > MAX_MOOV => {
                tracing::warn!("moov of {} bytes over the {} byte cap, skipped", range.len, MAX_MOOV);
            }
            b"moov" => match src.read_range(range) {
                Ok(payload) => {
                    saw_moov = true;
                    parse_moov(&payload, &mut movie);
                }
                Err(err) => tracing::warn!("cannot read moov: {}", err),
            },
            b"mdat" => movie.mdat_bytes += range.len,
            b"moof" => movie.fragmented = true,
            other => tracing::debug!("top-level box {} skipped", fourcc_str(other)),
        }
        ControlFlow::Continue(())
    });
    if !saw_ftyp && !saw_moov {
        return None;
    }
    Some(build_report(&movie, size, ctx))
}

fn build_report(movie: &Movie, file_size: u64, ctx: &ProbeContext) -> Report {
    let kind = if movie.is_quicktime() { ContainerKind::QuickTime } else { ContainerKind::Mp4 };
    let mut report = Report::new(kind, file_size);
    if let Some(brand) = &movie.major_brand {
        report.general.push("Codec ID", fourcc_str(brand).trim_end().to_string());
        let compatible: Vec<String> = movie.compatible_brands.iter().map(|b| fourcc_str(b).trim_end().to_string()).collect();
        if !compatible.is_empty() {
            report.general.push("Compatible brands", compatible.join("/"));
        }
    }
    if movie.fragmented {
        report.general.push("Format profile", "Fragmented");
    }

    let duration = movie
        .duration_ms()
        .or_else(|| movie.tracks.iter().filter_map(Mp4Track::duration_ms).max());
    report.container.duration_ms = duration;
    report.container.overall_bitrate = duration.and_then(|ms| stats::bitrate(file_size, ms, MP4_ROUNDING));
    let payload = movie.tracks.iter().fold(0u64, |acc, t| acc.saturating_add(t.sample_bytes));
    if payload > 0 {
        report.container.stream_overhead = Some(file_size.saturating_sub(payload));
    }

    for track in &movie.tracks {
        report.streams.push(describe_track(track, ctx));
    }
    report.finish();
    report
}

fn describe_track(track: &Mp4Track, ctx: &ProbeContext) -> Stream {
    let codec = track.codec();
    let mut s = Stream::new(track.kind());
    s.push_both("ID", track.id.to_string(), track.id);
    s.push("Format", codec.name());
    if let Some(entry) = &track.sample_entry {
        s.push("Codec ID", fourcc_str(entry));
    }
    if let Some(avc) = &track.avc {
        s.push("Format profile", avc.profile_name());
    }

    let duration = track.duration_ms();
    if let Some(ms) = duration {
        s.push_both("Duration", display::duration(ms), ms);
    }
    if let Some(bps) = duration.and_then(|ms| stats::bitrate(track.sample_bytes, ms, MP4_ROUNDING)) {
        s.push_both("Bit rate", display::bitrate(bps), bps);
    }
    if let Some(dac3) = &track.dac3 {
        s.push("Commercial name", "Dolby Digital");
        s.push_both("Bit rate mode", BitrateMode::Constant.name(), "CBR");
        if let Some(bps) = dac3.bitrate() {
            s.push_both("Bit rate", display::bitrate(bps as u64), bps);
        }
        let channels = ac3::acmod_channels(dac3.acmod) as u32 + dac3.lfeon as u32;
        s.push_both("Channel(s)", display::channels(channels), channels);
        s.push("Channel positions", ac3::channel_positions(dac3.acmod, dac3.lfeon));
        s.push_both("bsid", dac3.bsid.to_string(), dac3.bsid);
    }
    if let Some(dec3) = &track.dec3 {
        s.push("Commercial name", "Dolby Digital Plus");
        let bps = dec3.data_rate as u64 * 1000;
        s.push_both("Bit rate", display::bitrate(bps), bps);
        let channels = ac3::acmod_channels(dec3.acmod) as u32 + dec3.lfeon as u32;
        s.push_both("Channel(s)", display::channels(channels), channels);
        s.push("Channel positions", ac3::channel_positions(dec3.acmod, dec3.lfeon));
        if dec3.dependent_substreams > 0 {
            s.set_key("dependent_substreams", dec3.dependent_substreams);
        }
    }

    if let (Some(w), Some(h)) = (track.width, track.height) {
        s.push_both("Width", display::pixels(w), w);
        s.push_both("Height", display::pixels(h), h);
    }
    if track.kind() == StreamKind::Video && track.sample_count > 0 && track.duration > 0 {
        let num = track.sample_count * track.timescale as u64;
        let fps = num as f64 / track.duration as f64;
        s.push_both("Frame rate", format!("{:.3} FPS", fps), format!("{:.3}", fps));
        s.push_both("Frame count", track.sample_count.to_string(), track.sample_count);
    }
    if track.dac3.is_none() && track.dec3.is_none() {
        if let Some(channels) = track.channels {
            s.push_both("Channel(s)", display::channels(channels as u32), channels);
        }
    }
    let rate = track.sample_rate.or((track.kind() == StreamKind::Audio).then_some(track.timescale));
    if let Some(rate) = rate.filter(|&r| r > 0) {
        s.push_both("Sampling rate", display::sample_rate(rate), rate);
    }
    if codec == CodecId::Pcm {
        if let Some(bits) = track.sample_size {
            s.push_both("Bit depth", display::bit_depth(bits as u32), bits);
        }
    }
    if track.sample_bytes > 0 {
        s.push_both("Stream size", display::file_size(track.sample_bytes), track.sample_bytes);
    }
    if let Some(lang) = &track.language {
        s.push("Language", ctx.language.normalize(lang));
    }
    s
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Box with a 32-bit size.
    pub(crate) fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    pub(crate) fn full(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![version, 0, 0, 0];
        payload.extend_from_slice(body);
        mp4_box(kind, &payload)
    }

    pub(crate) fn ftyp(major: &[u8; 4]) -> Vec<u8> {
        let mut payload = major.to_vec();
        payload.extend_from_slice(&[0, 0, 2, 0]);
        payload.extend_from_slice(b"isomiso2");
        mp4_box(b"ftyp", &payload)
    }

    pub(crate) fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&duration.to_be_bytes());
        body.extend_from_slice(&[0u8; 80]);
        full(b"mvhd", 0, &body)
    }

    pub(crate) fn tkhd(id: u32, width: u32, height: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&[0u8; 60]);
        body.extend_from_slice(&(width << 16).to_be_bytes());
        body.extend_from_slice(&(height << 16).to_be_bytes());
        full(b"tkhd", 0, &body)
    }

    pub(crate) fn mdhd(timescale: u32, duration: u32, language: &[u8; 3]) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&duration.to_be_bytes());
        let packed = language.iter().fold(0u16, |acc, c| acc << 5 | (c - 0x60) as u16);
        body.extend_from_slice(&packed.to_be_bytes());
        body.extend_from_slice(&[0, 0]);
        full(b"mdhd", 0, &body)
    }

    pub(crate) fn hdlr(kind: &[u8; 4]) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        body.extend_from_slice(kind);
        body.extend_from_slice(&[0u8; 13]);
        full(b"hdlr", 0, &body)
    }

    pub(crate) fn stsz_fixed(size: u32, count: u32) -> Vec<u8> {
        let mut body = size.to_be_bytes().to_vec();
        body.extend_from_slice(&count.to_be_bytes());
        full(b"stsz", 0, &body)
    }

    pub(crate) fn visual_entry(kind: &[u8; 4], width: u16, height: u16, children: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 24];
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&[0u8; 50]);
        payload.extend_from_slice(children);
        mp4_box(kind, &payload)
    }

    pub(crate) fn audio_entry(kind: &[u8; 4], channels: u16, rate: u32, children: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 16];
        payload.extend_from_slice(&channels.to_be_bytes());
        payload.extend_from_slice(&16u16.to_be_bytes());
        payload.extend_from_slice(&[0u8; 4]);
        payload.extend_from_slice(&(rate << 16).to_be_bytes());
        payload.extend_from_slice(children);
        mp4_box(kind, &payload)
    }

    pub(crate) fn stsd(entry: &[u8]) -> Vec<u8> {
        let mut body = 1u32.to_be_bytes().to_vec();
        body.extend_from_slice(entry);
        full(b"stsd", 0, &body)
    }

    pub(crate) fn trak(tkhd: Vec<u8>, mdhd: Vec<u8>, hdlr: Vec<u8>, stbl_children: Vec<u8>) -> Vec<u8> {
        let stbl = mp4_box(b"stbl", &stbl_children);
        let minf = mp4_box(b"minf", &stbl);
        let mdia = mp4_box(b"mdia", &[mdhd, hdlr, minf].concat());
        mp4_box(b"trak", &[tkhd, mdia].concat())
    }

    /// Movie with an AVC video track (1280x720, 250 frames of 4000 bytes over
    /// 10 s) and an AC-3 audio track (448 kb/s, 5.1, German).
    pub(crate) fn sample_movie() -> Vec<u8> {
        let avcc = mp4_box(b"avcC", &[1, 100, 0, 31, 0xFF, 0xE1]);
        let video = trak(
            tkhd(1, 1280, 720),
            mdhd(12_800, 128_000, b"und"),
            hdlr(b"vide"),
            [stsd(&visual_entry(b"avc1", 1280, 720, &avcc)), stsz_fixed(4000, 250)].concat(),
        );
        // fscod 0, bsid 8, bsmod 0, acmod 7, lfeon 1, bit_rate_code 14
        let dac3 = mp4_box(b"dac3", &[0x10, 0x3D, 0xC0]);
        let audio = trak(
            tkhd(2, 0, 0),
            mdhd(48_000, 480_000, b"deu"),
            hdlr(b"soun"),
            [stsd(&audio_entry(b"ac-3", 2, 48_000, &dac3)), stsz_fixed(1536, 313)].concat(),
        );
        let moov = mp4_box(b"moov", &[mvhd(1000, 10_000), video, audio].concat());
        let mdat = mp4_box(b"mdat", &vec![0u8; 4096]);
        [ftyp(b"isom"), moov, mdat].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::collab::Iso639;
    use crate::options::ProbeOptions;
    use crate::source::MemorySource;

    fn run(data: Vec<u8>) -> Option<Report> {
        let mut ctx = ProbeContext::new(ProbeOptions::default(), &Iso639);
        probe(&mut MemorySource::new(data), &mut ctx)
    }

    #[test]
    fn decodes_ac3_specific_box() {
        let dac3 = Dac3::parse(&[0x10, 0x3D, 0xC0]).unwrap();
        assert_eq!((dac3.fscod, dac3.bsid, dac3.bsmod, dac3.acmod), (0, 8, 0, 7));
        assert!(dac3.lfeon);
        assert_eq!(dac3.bitrate(), Some(448_000));
        assert!(Dac3::parse(&[0x10]).is_err());
    }

    #[test]
    fn probes_tracks() {
        let data = sample_movie();
        let size = data.len() as u64;
        let report = run(data).unwrap();
        assert_eq!(report.container.format, ContainerKind::Mp4);
        assert_eq!(report.container.duration_ms, Some(10_000));
        assert_eq!(report.general.get("Codec ID"), Some("isom"));
        assert_eq!(report.general.get("Compatible brands"), Some("isom/iso2"));
        assert_eq!(report.container.overall_bitrate, Some(size * 8 / 10));

        let video = report.streams_of(StreamKind::Video).next().unwrap();
        assert_eq!(video.get("Format"), Some("AVC"));
        assert_eq!(video.get("Format profile"), Some("High@L3.1"));
        assert_eq!(video.get("Width"), Some("1 280 pixels"));
        assert_eq!(video.get("Frame rate"), Some("25.000 FPS"));
        assert_eq!(video.key("bit_rate"), Some("800000"));
        assert_eq!(video.get("Language"), None);

        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.get("Format"), Some("AC-3"));
        assert_eq!(audio.get("Channel(s)"), Some("6 channels"));
        assert_eq!(audio.key("bit_rate"), Some("448000"));
        assert_eq!(audio.get("Sampling rate"), Some("48.0 kHz"));
        assert_eq!(audio.get("Language"), Some("de"));
    }

    #[test]
    fn quicktime_brand_and_missing_moov() {
        let report = run([ftyp(b"qt  "), mp4_box(b"mdat", &[0; 16])].concat()).unwrap();
        assert_eq!(report.container.format, ContainerKind::QuickTime);
        assert!(report.streams.is_empty());
        assert_eq!(run(mp4_box(b"free", &[0; 16])), None);
    }

    #[test]
    fn stsz_count_is_bounded_by_box() {
        let mut body = 0u32.to_be_bytes().to_vec();
        body.extend_from_slice(&u32::MAX.to_be_bytes());
        body.extend_from_slice(&100u32.to_be_bytes());
        body.extend_from_slice(&200u32.to_be_bytes());
        let stsz = full(b"stsz", 0, &body);
        let mut track = Mp4Track::default();
        parse_stsz(&stsz[8..], &mut track);
        assert_eq!((track.sample_count, track.sample_bytes), (2, 300));
    }
}
