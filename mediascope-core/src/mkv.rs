// MKV - Matroska / WebM probe
//
// • EBML header: DocType selects Matroska or WebM
// • Segment children are walked from the source; Info, Tracks, Tags and
//   Chapters are read into memory, each capped at MKV_MAX_METADATA
// • Clusters are read until the speed-scaled budget is spent
// • Statistics tags written by the muxer win over the cluster scan

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use serde::Serialize;

use crate::ac3::FrameMode;
use crate::display;
use crate::ebml::{self, Block, Lacing};
use crate::es::CodecProbe;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::probe::ProbeContext;
use crate::report::{Report, Stream};
use crate::source::{ByteRange, ByteSource};
use crate::stats::{self, Rounding, StreamStats, MIN_WINDOW, MKV_AUDIO_ROUNDING, MKV_VIDEO_ROUNDING};

/// Largest Info / Tracks / Tags / Chapters payload read into memory.
pub const MKV_MAX_METADATA: u64 = 16 * 1024 * 1024;
/// Cluster bytes scanned at parse speed 1.0 before scaling; 1.0 itself scans everything.
pub const MKV_MAX_CLUSTER_SCAN: u64 = 64 * 1024 * 1024;
/// Frames per track handed to the codec probe.
const PROBE_FRAMES: u64 = 512;
const MAX_EBML_HEADER: u64 = 4096;
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

#[rustfmt::skip]
mod ids {
    pub const EBML: u32            = 0x1A45_DFA3;
    pub const DOC_TYPE: u32        = 0x4282;
    pub const SEGMENT: u32         = 0x1853_8067;

    pub const INFO: u32            = 0x1549_A966;
    pub const TIMECODE_SCALE: u32  = 0x2A_D7B1;
    pub const DURATION: u32        = 0x4489;
    pub const TITLE: u32           = 0x7BA9;
    pub const MUXING_APP: u32      = 0x4D80;
    pub const WRITING_APP: u32     = 0x5741;

    pub const TRACKS: u32          = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32     = 0xAE;
    pub const TRACK_NUMBER: u32    = 0xD7;
    pub const TRACK_UID: u32       = 0x73C5;
    pub const TRACK_TYPE: u32      = 0x83;
    pub const FLAG_DEFAULT: u32    = 0x88;
    pub const FLAG_FORCED: u32     = 0x55AA;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const NAME: u32            = 0x536E;
    pub const LANGUAGE: u32        = 0x22_B59C;
    pub const CODEC_ID: u32        = 0x86;
    pub const CODEC_PRIVATE: u32   = 0x63A2;
    pub const VIDEO: u32           = 0xE0;
    pub const PIXEL_WIDTH: u32     = 0xB0;
    pub const PIXEL_HEIGHT: u32    = 0xBA;
    pub const DISPLAY_WIDTH: u32   = 0x54B0;
    pub const DISPLAY_HEIGHT: u32  = 0x54BA;
    pub const AUDIO: u32           = 0xE1;
    pub const SAMPLING_FREQ: u32   = 0xB5;
    pub const CHANNELS: u32        = 0x9F;
    pub const BIT_DEPTH: u32       = 0x6264;

    pub const CLUSTER: u32         = 0x1F43_B675;
    pub const TIMECODE: u32        = 0xE7;
    pub const SIMPLE_BLOCK: u32    = 0xA3;
    pub const BLOCK_GROUP: u32     = 0xA0;
    pub const BLOCK: u32           = 0xA1;

    pub const TAGS: u32            = 0x1254_C367;
    pub const TAG: u32             = 0x7373;
    pub const TARGETS: u32         = 0x63C0;
    pub const TAG_TRACK_UID: u32   = 0x63C5;
    pub const SIMPLE_TAG: u32      = 0x67C8;
    pub const TAG_NAME: u32        = 0x45A3;
    pub const TAG_STRING: u32      = 0x4487;

    pub const CHAPTERS: u32        = 0x1043_A770;
    pub const EDITION_ENTRY: u32   = 0x45B9;
    pub const CHAPTER_ATOM: u32    = 0xB6;
    pub const CUES: u32            = 0x1C53_BB6B;
}

// ============================================================================
// Tracks
// ============================================================================

/// Values from the muxer's statistics tags (mkvmerge writes these).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsTags {
    pub bit_rate: Option<u64>,
    pub duration_ms: Option<u64>,
    pub frames: Option<u64>,
    pub bytes: Option<u64>,
}

impl StatisticsTags {
    fn set(&mut self, name: &str, value: &str) {
        let value = value.trim();
        match name {
            "BPS" => self.bit_rate = value.parse().ok(),
            "DURATION" => self.duration_ms = parse_tag_duration(value),
            "NUMBER_OF_FRAMES" => self.frames = value.parse().ok(),
            "NUMBER_OF_BYTES" => self.bytes = value.parse().ok(),
            _ => {}
        }
    }
}

/// "HH:MM:SS.nnnnnnnnn" to milliseconds.
fn parse_tag_duration(value: &str) -> Option<u64> {
    let mut parts = value.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs = parts.next()?;
    let (whole, fraction) = secs.split_once('.').unwrap_or((secs, ""));
    let seconds: u64 = whole.parse().ok()?;
    let millis = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .try_fold(0u64, |acc, c| c.to_digit(10).map(|d| acc * 10 + d as u64))?;
    let total = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?.checked_add(seconds)?;
    total.checked_mul(1000)?.checked_add(millis)
}

#[derive(Debug, Default)]
pub struct TrackProbe {
    pub number: u64,
    pub uid: u64,
    pub track_type: u64,
    pub codec_id: String,
    pub codec: CodecId,
    pub name: Option<String>,
    pub language: Option<String>,
    pub default: bool,
    pub forced: bool,
    pub default_duration_ns: Option<u64>,
    pub pixel_width: Option<u32>,
    pub pixel_height: Option<u32>,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub sampling_rate: Option<f64>,
    pub channels: Option<u32>,
    pub bit_depth: Option<u32>,
    pub tags: StatisticsTags,
    pub stats: StreamStats,
    pub probe: CodecProbe,
    pub bad_frames: u64,
}

impl TrackProbe {
    fn parse(payload: &[u8]) -> Self {
        let mut track = TrackProbe {
            default: true,
            ..Default::default()
        };
        let mut private: &[u8] = &[];
        ebml::walk(payload, |header, data| {
            match header.id {
                ids::TRACK_NUMBER => track.number = ebml::read_uint(data).unwrap_or(0),
                ids::TRACK_UID => track.uid = ebml::read_uint(data).unwrap_or(0),
                ids::TRACK_TYPE => track.track_type = ebml::read_uint(data).unwrap_or(0),
                ids::FLAG_DEFAULT => track.default = ebml::read_uint(data) != Some(0),
                ids::FLAG_FORCED => track.forced = ebml::read_uint(data).unwrap_or(0) != 0,
                ids::DEFAULT_DURATION => track.default_duration_ns = ebml::read_uint(data).filter(|&d| d > 0),
                ids::NAME => track.name = Some(ebml::read_string(data)),
                ids::LANGUAGE => track.language = Some(ebml::read_string(data)),
                ids::CODEC_ID => track.codec_id = ebml::read_string(data),
                ids::CODEC_PRIVATE => private = data,
                ids::VIDEO => track.parse_video(data),
                ids::AUDIO => track.parse_audio(data),
                _ => {}
            }
            ControlFlow::Continue(())
        });
        track.codec = codec_for(&track.codec_id, private);
        track.probe = CodecProbe::for_codec(track.codec);
        track
    }

    fn parse_video(&mut self, payload: &[u8]) {
        let dim = |data: &[u8]| ebml::read_uint(data).and_then(|v| u32::try_from(v).ok()).filter(|&v| v > 0);
        ebml::walk(payload, |header, data| {
            match header.id {
                ids::PIXEL_WIDTH => self.pixel_width = dim(data),
                ids::PIXEL_HEIGHT => self.pixel_height = dim(data),
                ids::DISPLAY_WIDTH => self.display_width = dim(data),
                ids::DISPLAY_HEIGHT => self.display_height = dim(data),
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }

    fn parse_audio(&mut self, payload: &[u8]) {
        ebml::walk(payload, |header, data| {
            match header.id {
                ids::SAMPLING_FREQ => self.sampling_rate = ebml::read_float(data).filter(|r| *r > 0.0),
                ids::CHANNELS => self.channels = ebml::read_uint(data).and_then(|v| u32::try_from(v).ok()),
                ids::BIT_DEPTH => self.bit_depth = ebml::read_uint(data).and_then(|v| u32::try_from(v).ok()),
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }

    pub fn kind(&self) -> StreamKind {
        match (self.codec.kind(), self.track_type) {
            (StreamKind::Other, 1) => StreamKind::Video,
            (StreamKind::Other, 2) => StreamKind::Audio,
            (StreamKind::Other, 17) => StreamKind::Text,
            (kind, _) => kind,
        }
    }

    fn rounding(&self) -> Rounding {
        if self.kind() == StreamKind::Audio {
            MKV_AUDIO_ROUNDING
        } else {
            MKV_VIDEO_ROUNDING
        }
    }

    /// One frame of a block. Laced AC-3 frames must hold exactly one sync frame.
    fn frame(&mut self, frame: &[u8], pts: Option<u64>, laced: bool) {
        self.stats.add_payload(frame.len());
        self.stats.add_frame(pts);
        if self.stats.frames > PROBE_FRAMES {
            return;
        }
        match &mut self.probe {
            CodecProbe::Ac3(probe) => {
                let mode = if laced { FrameMode::Strict } else { FrameMode::Repeated };
                if let Err(err) = probe.feed_packet(frame, mode) {
                    self.bad_frames += 1;
                    tracing::debug!("track {}: ac-3 frame rejected: {}", self.number, err);
                }
            }
            probe => probe.feed(frame),
        }
    }
}

pub fn codec_for(codec_id: &str, private: &[u8]) -> CodecId {
    match codec_id {
        "V_MPEG4/ISO/AVC" => CodecId::Avc,
        "V_MPEGH/ISO/HEVC" => CodecId::Hevc,
        "V_MPEG1" => CodecId::Mpeg1Video,
        "V_MPEG2" => CodecId::Mpeg2Video,
        id if id.starts_with("V_MPEG4/ISO/") => CodecId::Mpeg4Visual,
        "V_MS/VFW/FOURCC" => match private.get(16..20) {
            Some(&[a, b, c, d]) => CodecId::from_fourcc(&[a, b, c, d]),
            _ => CodecId::Unknown,
        },
        "V_VP8" => CodecId::Vp8,
        "V_VP9" => CodecId::Vp9,
        "V_AV1" => CodecId::Av1,
        "V_MJPEG" => CodecId::Mjpeg,
        "V_UNCOMPRESSED" => CodecId::RawVideo,
        "A_AC3" | "A_AC3/BSID9" | "A_AC3/BSID10" => CodecId::Ac3,
        "A_EAC3" => CodecId::Eac3,
        id if id.starts_with("A_DTS") => CodecId::Dts,
        "A_TRUEHD" | "A_MLP" => CodecId::TrueHd,
        id if id.starts_with("A_AAC") => CodecId::Aac,
        "A_MPEG/L1" | "A_MPEG/L2" | "A_MPEG/L3" => CodecId::MpegAudio,
        id if id.starts_with("A_PCM/") => CodecId::Pcm,
        "A_FLAC" => CodecId::Flac,
        "A_VORBIS" => CodecId::Vorbis,
        "A_OPUS" => CodecId::Opus,
        "A_MS/ACM" => match private.get(0..2) {
            Some(&[lo, hi]) => CodecId::from_wave_format(u16::from_le_bytes([lo, hi])),
            _ => CodecId::Unknown,
        },
        id if id.starts_with("S_TEXT/") => CodecId::Text,
        "S_HDMV/PGS" => CodecId::Pgs,
        "S_VOBSUB" => CodecId::VobSub,
        "S_DVBSUB" => CodecId::DvbSubtitle,
        _ => CodecId::Unknown,
    }
}

// ============================================================================
// Segment scan
// ============================================================================

#[derive(Debug)]
struct SegmentScan {
    timecode_scale: u64,
    /// In timecode-scale units.
    duration: Option<f64>,
    title: Option<String>,
    muxing_app: Option<String>,
    writing_app: Option<String>,
    tracks: BTreeMap<u64, TrackProbe>,
    /// Statistics tags keyed by TrackUID, resolved once all tracks are known.
    tags: BTreeMap<u64, StatisticsTags>,
    chapters: Option<usize>,
    has_cues: bool,
    clusters: u64,
    bad_blocks: u64,
    budget: u64,
    scan_complete: bool,
}

impl SegmentScan {
    fn new(budget: u64) -> Self {
        Self {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
            title: None,
            muxing_app: None,
            writing_app: None,
            tracks: BTreeMap::new(),
            tags: BTreeMap::new(),
            chapters: None,
            has_cues: false,
            clusters: 0,
            bad_blocks: 0,
            budget,
            scan_complete: true,
        }
    }

    fn element(&mut self, src: &mut dyn ByteSource, id: u32, range: ByteRange) {
        match id {
            ids::INFO | ids::TRACKS | ids::TAGS | ids::CHAPTERS => {
                if range.len > MKV_MAX_METADATA {
                    tracing::warn!("element 0x{:X} of {} bytes over the metadata cap, skipped", id, range.len);
                    return;
                }
                let payload = match src.read_range(range) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!("cannot read element 0x{:X}: {}", id, err);
                        return;
                    }
                };
                match id {
                    ids::INFO => self.parse_info(&payload),
                    ids::TRACKS => self.parse_tracks(&payload),
                    ids::TAGS => self.parse_tags(&payload),
                    _ => self.parse_chapters(&payload),
                }
            }
            ids::CLUSTER => self.cluster(src, range),
            ids::CUES => self.has_cues = true,
            other => tracing::debug!("segment child 0x{:X} skipped", other),
        }
    }

    fn parse_info(&mut self, payload: &[u8]) {
        ebml::walk(payload, |header, data| {
            match header.id {
                ids::TIMECODE_SCALE => {
                    if let Some(scale) = ebml::read_uint(data).filter(|&s| s > 0) {
                        self.timecode_scale = scale;
                    }
                }
                ids::DURATION => self.duration = ebml::read_float(data).filter(|d| d.is_finite() && *d > 0.0),
                ids::TITLE => self.title = Some(ebml::read_string(data)),
                ids::MUXING_APP => self.muxing_app = Some(ebml::read_string(data)),
                ids::WRITING_APP => self.writing_app = Some(ebml::read_string(data)),
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }

    fn parse_tracks(&mut self, payload: &[u8]) {
        ebml::walk(payload, |header, data| {
            if header.id == ids::TRACK_ENTRY {
                let track = TrackProbe::parse(data);
                if track.number == 0 {
                    tracing::debug!("track entry without a number skipped");
                } else {
                    self.tracks.insert(track.number, track);
                }
            }
            ControlFlow::Continue(())
        });
    }

    fn parse_tags(&mut self, payload: &[u8]) {
        ebml::walk(payload, |header, tag| {
            if header.id != ids::TAG {
                return ControlFlow::Continue(());
            }
            let uid = ebml::find(tag, ids::TARGETS)
                .and_then(|targets| ebml::find(targets, ids::TAG_TRACK_UID))
                .and_then(ebml::read_uint);
            let Some(uid) = uid.filter(|&u| u != 0) else {
                return ControlFlow::Continue(());
            };
            let entry = self.tags.entry(uid).or_default();
            ebml::walk(tag, |header, simple| {
                if header.id == ids::SIMPLE_TAG {
                    let name = ebml::find(simple, ids::TAG_NAME).map(ebml::read_string);
                    let value = ebml::find(simple, ids::TAG_STRING).map(ebml::read_string);
                    if let (Some(name), Some(value)) = (name, value) {
                        entry.set(&name, &value);
                    }
                }
                ControlFlow::Continue(())
            });
            ControlFlow::Continue(())
        });
    }

    fn parse_chapters(&mut self, payload: &[u8]) {
        // first edition only
        if let Some(edition) = ebml::find(payload, ids::EDITION_ENTRY) {
            let mut count = 0usize;
            ebml::walk(edition, |header, _| {
                if header.id == ids::CHAPTER_ATOM {
                    count += 1;
                }
                ControlFlow::Continue(())
            });
            self.chapters = Some(count);
        }
    }

    fn cluster(&mut self, src: &mut dyn ByteSource, range: ByteRange) {
        if self.budget == 0 {
            self.scan_complete = false;
            return;
        }
        let take = range.len.min(self.budget);
        if take < range.len {
            tracing::debug!("cluster scan budget reached at offset {}", range.offset);
            self.scan_complete = false;
        }
        self.budget -= take;
        let payload = match src.read_range(ByteRange::new(range.offset, take)) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("cannot read cluster at {}: {}", range.offset, err);
                self.scan_complete = false;
                return;
            }
        };
        self.clusters += 1;
        let mut cluster_time = 0u64;
        ebml::walk(&payload, |header, data| {
            match header.id {
                ids::TIMECODE => cluster_time = ebml::read_uint(data).unwrap_or(0),
                ids::SIMPLE_BLOCK => self.block(data, cluster_time),
                ids::BLOCK_GROUP => {
                    if let Some(block) = ebml::find(data, ids::BLOCK) {
                        self.block(block, cluster_time);
                    }
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
    }

    fn block(&mut self, data: &[u8], cluster_time: u64) {
        let block: Block = match ebml::parse_block(data) {
            Ok(block) => block,
            Err(err) => {
                self.bad_blocks += 1;
                tracing::debug!("bad block: {}", err);
                return;
            }
        };
        let scale = self.timecode_scale;
        let Some(track) = self.tracks.get_mut(&block.track) else {
            return;
        };
        let time = (cluster_time as i64).saturating_add(block.timecode as i64);
        // 90 kHz ticks from timecode-scale units
        let pts = u64::try_from(time)
            .ok()
            .map(|t| (t as u128 * scale as u128 * 9 / 100_000) as u64);
        let laced = block.lacing != Lacing::None;
        for (i, range) in block.frames.iter().enumerate() {
            if let Some(frame) = data.get(range.clone()) {
                track.frame(frame, if i == 0 { pts } else { None }, laced);
            }
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        self.duration
            .map(|d| (d * self.timecode_scale as f64 / 1_000_000.0).round() as u64)
    }
}

fn cluster_budget(speed: f32) -> u64 {
    if speed >= 1.0 {
        u64::MAX
    } else {
        ((MKV_MAX_CLUSTER_SCAN as f64 * speed as f64) as u64).max(MIN_WINDOW)
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Probe a Matroska or WebM file. None if it does not start with an EBML header.
pub fn probe(src: &mut dyn ByteSource, ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let mut doc_type: Option<String> = None;
    let mut segment: Option<ByteRange> = None;
    let mut first = true;

    ebml::walk_source(src, ByteRange::new(0, size), |src, header, range| {
        if first {
            first = false;
            if header.id != ids::EBML {
                return ControlFlow::Break(());
            }
            let head = src.read_range(ByteRange::new(range.offset, range.len.min(MAX_EBML_HEADER)));
            doc_type = Some(match head {
                Ok(head) => ebml::find(&head, ids::DOC_TYPE)
                    .map(ebml::read_string)
                    .unwrap_or_else(|| "matroska".to_string()),
                Err(_) => "matroska".to_string(),
            });
            return ControlFlow::Continue(());
        }
        if header.id == ids::SEGMENT {
            segment = Some(range);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    let doc_type = doc_type?;
    let kind = if doc_type == "webm" { ContainerKind::WebM } else { ContainerKind::Matroska };
    let Some(segment) = segment else {
        tracing::warn!("no segment after the EBML header");
        let mut report = Report::new(kind, size);
        report.finish();
        return Some(report);
    };

    let mut scan = SegmentScan::new(cluster_budget(ctx.options.speed()));
    ebml::walk_source(src, segment, |src, header, range| {
        scan.element(src, header.id, range);
        ControlFlow::Continue(())
    });
    tracing::debug!(
        "segment scan: {} tracks, {} clusters, complete: {}",
        scan.tracks.len(),
        scan.clusters,
        scan.scan_complete
    );

    let mut tags = std::mem::take(&mut scan.tags);
    for track in scan.tracks.values_mut() {
        if let Some(found) = tags.remove(&track.uid) {
            track.tags = found;
        }
        track.probe.flush();
    }
    let mut report = build_report(&scan, ctx, size, kind);
    report.finish();
    Some(report)
}

fn build_report(scan: &SegmentScan, ctx: &ProbeContext, size: u64, kind: ContainerKind) -> Report {
    let mut report = Report::new(kind, size);
    let g = &mut report.general;
    if let Some(title) = &scan.title {
        g.push("Title", title.clone());
    }
    if let Some(app) = &scan.muxing_app {
        g.push("Muxing application", app.clone());
    }
    if let Some(app) = &scan.writing_app {
        g.push("Writing application", app.clone());
    }
    if scan.bad_blocks > 0 {
        g.set_key("bad_blocks", scan.bad_blocks);
    }

    let mut payload_total = Some(0u64);
    let mut longest: Option<u64> = None;
    for track in scan.tracks.values() {
        let stream = describe_track(track, scan, ctx);
        let bytes = stream.key("stream_size").and_then(|v| v.parse::<u64>().ok());
        payload_total = payload_total.zip(bytes).and_then(|(a, b)| a.checked_add(b));
        let ms = stream.key("duration").and_then(|v| v.parse::<u64>().ok());
        longest = longest.max(ms);
        report.streams.push(stream);
    }

    let duration = scan.duration_ms().or(longest);
    report.container.duration_ms = duration;
    report.container.overall_bitrate = duration.and_then(|ms| stats::bitrate(size, ms, Rounding::Round));
    if !scan.tracks.is_empty() {
        report.container.stream_overhead = payload_total.map(|total| size.saturating_sub(total));
    }
    if let Some(count) = scan.chapters {
        let mut menu = Stream::new(StreamKind::Menu);
        menu.push_both("Count of chapters", count.to_string(), count);
        report.streams.push(menu);
    }
    report
}

fn describe_track(track: &TrackProbe, scan: &SegmentScan, ctx: &ProbeContext) -> Stream {
    let mut s = Stream::new(track.kind());
    s.push_both("ID", track.number.to_string(), track.number);
    s.push("Format", track.codec.name());
    s.push("Codec ID", track.codec_id.clone());
    track.probe.describe(&mut s);

    let policy = ctx.options.duration_policy;
    let frame_ms = track.default_duration_ns.map(|ns| ns / 1_000_000).unwrap_or(0);
    let scanned_duration = scan
        .scan_complete
        .then(|| track.stats.duration_ms(policy))
        .flatten()
        .map(|ms| ms.saturating_add(frame_ms));
    let duration = track.tags.duration_ms.or(scanned_duration);
    if let Some(ms) = duration {
        s.push_both("Duration", display::duration(ms), ms);
    }

    let bytes = track.tags.bytes.or(scan.scan_complete.then_some(track.stats.bytes));
    // a bitstream bit rate (AC-3, CBR MPEG audio) is exact
    if s.key("bit_rate").is_none() {
        let bps = track
            .tags
            .bit_rate
            .or_else(|| bytes.zip(duration).and_then(|(b, ms)| stats::bitrate(b, ms, track.rounding())));
        if let Some(bps) = bps {
            s.push_both("Bit rate", display::bitrate(bps), bps);
        }
    }

    if let (Some(w), Some(h)) = (track.pixel_width, track.pixel_height) {
        s.push_both("Width", display::pixels(w), w);
        s.push_both("Height", display::pixels(h), h);
        let (dw, dh) = (track.display_width.unwrap_or(w), track.display_height.unwrap_or(h));
        let dar = dw as f64 / dh as f64;
        s.push_both("Display aspect ratio", format!("{:.3}", dar), format!("{:.3}", dar));
    }
    if let Some(ns) = track.default_duration_ns {
        if track.kind() == StreamKind::Video {
            let fps = 1e9 / ns as f64;
            s.push_both("Frame rate", format!("{:.3} FPS", fps), format!("{:.3}", fps));
        }
    }
    let frames = track.tags.frames.or(scan.scan_complete.then_some(track.stats.frames));
    if let Some(frames) = frames.filter(|&f| f > 0) {
        s.set_key("frame_count", frames);
    }

    if s.get("Channel(s)").is_none() {
        if let Some(channels) = track.channels {
            s.push_both("Channel(s)", display::channels(channels), channels);
        }
    }
    if s.get("Sampling rate").is_none() {
        if let Some(rate) = track.sampling_rate {
            let hz = rate.round() as u32;
            s.push_both("Sampling rate", display::sample_rate(hz), hz);
        }
    }
    if let Some(bits) = track.bit_depth {
        s.push_both("Bit depth", display::bit_depth(bits), bits);
    }
    if let Some(bytes) = bytes.filter(|&b| b > 0) {
        s.push_both("Stream size", display::file_size(bytes), bytes);
    }
    if let Some(name) = &track.name {
        s.push("Title", name.clone());
    }
    if let Some(lang) = track.language.as_deref().filter(|l| *l != "und") {
        s.push("Language", ctx.language.normalize(lang));
    }
    s.push("Default", if track.default { "Yes" } else { "No" });
    s.push("Forced", if track.forced { "Yes" } else { "No" });
    if track.bad_frames > 0 {
        s.set_key("bad_frames", track.bad_frames);
    }
    s
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::ac3::fixtures::ac3_frame;
    use crate::collab::Iso639;
    use crate::options::ProbeOptions;
    use crate::source::MemorySource;

    fn run(data: Vec<u8>) -> Option<Report> {
        let mut ctx = ProbeContext::new(ProbeOptions::default(), &Iso639);
        probe(&mut MemorySource::new(data), &mut ctx)
    }

    fn tracks() -> Vec<u8> {
        let video = el(
            TRACK_ENTRY,
            &[
                uint(TRACK_NUMBER, 1),
                uint(TRACK_UID, 101),
                uint(TRACK_TYPE, 1),
                string(CODEC_ID, "V_MPEG4/ISO/AVC"),
                uint(DEFAULT_DURATION, 40_000_000),
                el(VIDEO, &[uint(PIXEL_WIDTH, 640), uint(PIXEL_HEIGHT, 360)].concat()),
            ]
            .concat(),
        );
        let audio = el(
            TRACK_ENTRY,
            &[
                uint(TRACK_NUMBER, 2),
                uint(TRACK_UID, 102),
                uint(TRACK_TYPE, 2),
                string(CODEC_ID, "A_AC3"),
                string(LANGUAGE, "ger"),
                el(AUDIO, &[float(SAMPLING_FREQ, 48_000.0), uint(CHANNELS, 2)].concat()),
            ]
            .concat(),
        );
        el(TRACKS, &[video, audio].concat())
    }

    /// Two seconds of 640x360 AVC with statistics tags plus ten AC-3 frames.
    fn sample_file() -> Vec<u8> {
        let info = el(
            INFO,
            &[
                uint(TIMECODE_SCALE, 1_000_000),
                float(DURATION, 2000.0),
                string(MUXING_APP, "libebml"),
                string(WRITING_APP, "mkvmerge"),
            ]
            .concat(),
        );
        let mut cluster = uint(TIMECODE, 0);
        for k in 0..5i16 {
            cluster.extend(simple_block(1, k * 40, 0x80, &[0u8; 1000]));
        }
        for k in 0..10i16 {
            cluster.extend(simple_block(2, k * 32, 0x80, &ac3_frame(8, 2, 27, None)));
        }
        let tag = el(
            TAG,
            &[
                el(TARGETS, &uint(TAG_TRACK_UID, 101)),
                simple_tag("BPS", "4000"),
                simple_tag("DURATION", "00:00:02.000000000"),
                simple_tag("NUMBER_OF_FRAMES", "50"),
                simple_tag("NUMBER_OF_BYTES", "1000"),
            ]
            .concat(),
        );
        let chapters = el(
            CHAPTERS,
            &el(EDITION_ENTRY, &[el(CHAPTER_ATOM, &[]), el(CHAPTER_ATOM, &[])].concat()),
        );
        let segment = el(
            SEGMENT,
            &[info, tracks(), el(CLUSTER, &cluster), el(TAGS, &tag), chapters].concat(),
        );
        [header("matroska"), segment].concat()
    }

    #[test]
    fn tag_durations() {
        assert_eq!(parse_tag_duration("00:00:02.000000000"), Some(2000));
        assert_eq!(parse_tag_duration("01:02:03.5"), Some(3_723_500));
        assert_eq!(parse_tag_duration("00:00:07"), Some(7000));
        assert_eq!(parse_tag_duration("garbage"), None);
    }

    #[test]
    fn maps_codec_ids() {
        assert_eq!(codec_for("A_AAC/MPEG4/LC", &[]), CodecId::Aac);
        assert_eq!(codec_for("V_MPEG4/ISO/ASP", &[]), CodecId::Mpeg4Visual);
        let mut bih = vec![0u8; 40];
        bih[16..20].copy_from_slice(b"XVID");
        assert_eq!(codec_for("V_MS/VFW/FOURCC", &bih), CodecId::Mpeg4Visual);
        assert_eq!(codec_for("A_MS/ACM", &[0x00, 0x20]), CodecId::Ac3);
        assert_eq!(codec_for("V_MS/VFW/FOURCC", &[0; 4]), CodecId::Unknown);
    }

    #[test]
    fn probes_tracks_tags_and_clusters() {
        let data = sample_file();
        let size = data.len() as u64;
        let report = run(data).unwrap();
        assert_eq!(report.container.format, ContainerKind::Matroska);
        assert_eq!(report.container.duration_ms, Some(2000));
        assert_eq!(report.general.get("Writing application"), Some("mkvmerge"));
        assert_eq!(report.container.stream_overhead, Some(size - 1000 - 1280));

        let video = report.streams_of(StreamKind::Video).next().unwrap();
        assert_eq!(video.get("Format"), Some("AVC"));
        assert_eq!(video.key("bit_rate"), Some("4000"));
        assert_eq!(video.key("duration"), Some("2000"));
        assert_eq!(video.key("frame_count"), Some("50"));
        assert_eq!(video.get("Frame rate"), Some("25.000 FPS"));
        assert_eq!(video.get("Width"), Some("640 pixels"));

        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.get("Format"), Some("AC-3"));
        assert_eq!(audio.key("bit_rate"), Some("32000"));
        assert_eq!(audio.key("stream_size"), Some("1280"));
        assert_eq!(audio.key("frame_count"), Some("10"));
        assert_eq!(audio.key("duration"), Some("288"));
        assert_eq!(audio.get("Language"), Some("de"));

        let menu = report.streams_of(StreamKind::Menu).next().unwrap();
        assert_eq!(menu.key("count_of_chapters"), Some("2"));
    }

    #[test]
    fn laced_ac3_frames_are_counted_one_by_one() {
        let frame = ac3_frame(8, 2, 27, None);
        // Xiph lacing: count - 1 = 1, first size 128
        let mut laced = vec![1u8, 128];
        laced.extend_from_slice(&frame);
        laced.extend_from_slice(&frame);
        let cluster = [uint(TIMECODE, 0), simple_block(2, 0, 0x80 | 0x02, &laced)].concat();
        let segment = el(SEGMENT, &[tracks(), el(CLUSTER, &cluster)].concat());
        let report = run([header("matroska"), segment].concat()).unwrap();
        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.key("frame_count"), Some("2"));
        assert_eq!(audio.key("stream_size"), Some("256"));
        assert_eq!(audio.key("bad_frames"), None);
        assert_eq!(audio.get("Format"), Some("AC-3"));
    }

    #[test]
    fn webm_doc_type_and_missing_segment() {
        let report = run(header("webm")).unwrap();
        assert_eq!(report.container.format, ContainerKind::WebM);
        assert!(report.streams.is_empty());
        assert_eq!(run(b"not an ebml file".to_vec()), None);
    }

    #[test]
    fn oversized_lace_is_a_bad_block() {
        // EBML lacing whose first size claims more than the block holds
        let block = simple_block(2, 0, 0x06, &[1, 0x40, 0xFF, 0, 0]);
        let cluster = [uint(TIMECODE, 0), block].concat();
        let segment = el(SEGMENT, &[tracks(), el(CLUSTER, &cluster)].concat());
        let report = run([header("matroska"), segment].concat()).unwrap();
        assert_eq!(report.general.key("bad_blocks"), Some("1"));
    }
}
