// TS DEMUXER - MPEG Transport Stream and BDAV inspection
//
// TS is the container for:
// • DVB / ATSC broadcasts
// • Blu-ray discs (BDAV, 192-byte packets with a 4-byte arrival time)
// • Recorder captures split into numbered files
//
// Fixed-size packets, so damage stays local: every fault is counted and
// the scan moves on to the next sync byte.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::bits::BitstreamError;
use crate::es::CodecProbe;
use crate::media::{CodecId, ContainerKind, StreamKind};
use crate::pes;
use crate::probe::ProbeContext;
use crate::report::{BitrateMode, Report, Stream};
use crate::source::ByteSource;
use crate::stats::{self, PcrBitrate, ScanPlan, StreamStats, TimestampTracker, TS_ROUNDING};
use crate::display;

// ============================================================================
// Constants
// ============================================================================

pub const TS_PACKET_SIZE: usize = 188;
pub const BDAV_PACKET_SIZE: usize = 192;
pub const SYNC_BYTE: u8 = 0x47;

/// Longest PSI section accepted.
pub const MAX_SECTION: usize = 4096;

const PAT_PID: u16 = 0x0000;
const NULL_PID: u16 = 0x1FFF;

/// Consecutive sync bytes needed to lock onto a packet size.
const SYNC_RUN: usize = 5;
/// PES headers are at most 9 + 255 bytes.
const MAX_PES_HEADER: usize = 512;
const PACKETS_PER_READ: usize = 512;

// Stream types
const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
const STREAM_TYPE_AAC: u8 = 0x0F;
const STREAM_TYPE_MPEG4_VISUAL: u8 = 0x10;
const STREAM_TYPE_AAC_LATM: u8 = 0x11;
const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_LPCM: u8 = 0x80;
const STREAM_TYPE_AC3: u8 = 0x81;
const STREAM_TYPE_DTS: u8 = 0x82;
const STREAM_TYPE_TRUEHD: u8 = 0x83;
const STREAM_TYPE_EAC3_HDMV: u8 = 0x84;
const STREAM_TYPE_DTS_HD: u8 = 0x85;
const STREAM_TYPE_DTS_HD_MA: u8 = 0x86;
const STREAM_TYPE_EAC3: u8 = 0x87;
const STREAM_TYPE_PGS: u8 = 0x90;
const STREAM_TYPE_EAC3_SECONDARY: u8 = 0xA1;
const STREAM_TYPE_DTS_SECONDARY: u8 = 0xA2;
const STREAM_TYPE_VC1: u8 = 0xEA;

// Descriptor tags
const DESC_REGISTRATION: u8 = 0x05;
const DESC_LANGUAGE: u8 = 0x0A;
const DESC_DVB_SUBTITLE: u8 = 0x59;
const DESC_DVB_AC3: u8 = 0x6A;
const DESC_DVB_EAC3: u8 = 0x7A;
const DESC_ATSC_AC3: u8 = 0x81;
const DESC_CAPTION_SERVICE: u8 = 0x86;

// ============================================================================
// Packet layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketLayout {
    pub packet_size: usize,
    /// Bytes before the sync byte in each packet (BDAV arrival time).
    pub prefix: usize,
    /// Offset of the first packet.
    pub start: usize,
    /// Sync bytes confirmed at the packet stride.
    pub syncs: usize,
}

impl PacketLayout {
    pub fn is_bdav(&self) -> bool {
        self.packet_size == BDAV_PACKET_SIZE
    }
}

/// Score both packet sizes by sync-byte stride, searching the first packet
/// for the alignment. Ties go to plain 188-byte TS.
pub fn detect_layout(buf: &[u8]) -> Option<PacketLayout> {
    let mut best: Option<PacketLayout> = None;
    for packet_size in [TS_PACKET_SIZE, BDAV_PACKET_SIZE] {
        let prefix = packet_size - TS_PACKET_SIZE;
        for start in 0..packet_size {
            let first = start + prefix;
            if first >= buf.len() {
                break;
            }
            let available = (buf.len() - first).div_ceil(packet_size);
            let need = available.min(SYNC_RUN);
            if (0..need).all(|k| buf[first + k * packet_size] == SYNC_BYTE) {
                if best.map_or(true, |b| need > b.syncs) {
                    best = Some(PacketLayout {
                        packet_size,
                        prefix,
                        start,
                        syncs: need,
                    });
                }
                break;
            }
        }
    }
    best
}

/// Skip to the next offset that looks like a packet start.
fn resync(buf: &[u8], layout: &PacketLayout) -> Option<usize> {
    let size = layout.packet_size;
    (1..buf.len().saturating_sub(layout.prefix)).find(|&i| {
        let at = i + layout.prefix;
        buf[at] == SYNC_BYTE && buf.get(at + size).map_or(true, |&b| b == SYNC_BYTE)
    })
}

// ============================================================================
// TS Packet Header
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct TsHeader {
    transport_error: bool,
    payload_unit_start: bool,
    pid: u16,
    scrambling_control: u8,
    adaptation_field_exists: bool,
    payload_exists: bool,
    continuity_counter: u8,
}

impl TsHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data[0] != SYNC_BYTE {
            return None;
        }
        Some(Self {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            payload_exists: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }
}

// ============================================================================
// Adaptation Field
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct AdaptationField {
    discontinuity: bool,
    random_access: bool,
    /// 27 MHz.
    pcr: Option<u64>,
}

impl AdaptationField {
    /// `data` is the field body after its length byte.
    fn parse(data: &[u8]) -> Self {
        let Some(&flags) = data.first() else {
            return Self::default();
        };
        let pcr = if flags & 0x10 != 0 && data.len() >= 7 {
            // 33 bits base + 6 reserved + 9 bits extension
            let base = (data[1] as u64) << 25
                | (data[2] as u64) << 17
                | (data[3] as u64) << 9
                | (data[4] as u64) << 1
                | (data[5] as u64) >> 7;
            let ext = ((data[5] as u64 & 0x01) << 8) | data[6] as u64;
            Some(base * 300 + ext)
        } else {
            None
        };
        Self {
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            pcr,
        }
    }
}

// ============================================================================
// Continuity counters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuity {
    Ok,
    Duplicate,
    Gap,
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterState {
    last: Option<u8>,
    errors: u64,
    duplicates: u64,
}

impl CounterState {
    /// Only called for packets that carry payload.
    fn check(&mut self, cc: u8, discontinuity: bool) -> Continuity {
        let previous = self.last.replace(cc);
        match previous {
            _ if discontinuity => Continuity::Ok,
            None => Continuity::Ok,
            Some(last) if last == cc => {
                self.duplicates += 1;
                Continuity::Duplicate
            }
            Some(last) if (last + 1) & 0x0F == cc => Continuity::Ok,
            Some(last) => {
                tracing::debug!("continuity gap: {} -> {}", last, cc);
                self.errors += 1;
                Continuity::Gap
            }
        }
    }
}

// ============================================================================
// PSI sections
// ============================================================================

#[derive(Debug, Default)]
struct SectionBuffer {
    buf: Vec<u8>,
    active: bool,
}

impl SectionBuffer {
    fn reset(&mut self) {
        self.buf.clear();
        self.active = false;
    }

    /// Append one packet payload and move completed sections to `out`.
    fn push(&mut self, unit_start: bool, payload: &[u8], out: &mut Vec<Vec<u8>>) {
        let mut data = payload;
        if unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                return;
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                self.reset();
                return;
            }
            if self.active {
                self.buf.extend_from_slice(&rest[..pointer]);
                self.drain(out);
            }
            self.reset();
            self.active = true;
            data = &rest[pointer..];
        } else if !self.active {
            return;
        }
        self.buf.extend_from_slice(data);
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<Vec<u8>>) {
        loop {
            match self.buf.first() {
                None | Some(0xFF) => {
                    // stuffing ends the packet's sections
                    self.reset();
                    return;
                }
                _ => {}
            }
            if self.buf.len() < 3 {
                return;
            }
            let len = 3 + ((((self.buf[1] & 0x0F) as usize) << 8) | self.buf[2] as usize);
            if len > MAX_SECTION {
                tracing::warn!("section of {} bytes over the {} byte cap, dropped", len, MAX_SECTION);
                self.reset();
                return;
            }
            if self.buf.len() < len {
                return;
            }
            out.push(self.buf[..len].to_vec());
            self.buf.drain(..len);
        }
    }
}

/// Body of a long-form section (after the 8-byte header, before the CRC).
fn section_body(section: &[u8]) -> Option<&[u8]> {
    if section.len() < 12 {
        return None;
    }
    section.get(8..section.len() - 4)
}

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionService {
    pub language: String,
    pub digital: bool,
    /// 708 service number, or 608 channel (1 or 3) when not digital.
    pub service: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Descriptors {
    pub language: Option<String>,
    pub registration: Option<[u8; 4]>,
    pub ac3: bool,
    pub eac3: bool,
    pub dvb_subtitle: bool,
    pub captions: Vec<CaptionService>,
}

pub fn parse_descriptors(data: &[u8]) -> Descriptors {
    let mut out = Descriptors::default();
    let mut pos = 0usize;
    while pos + 2 <= data.len() {
        let tag = data[pos];
        let len = data[pos + 1] as usize;
        let Some(body) = data.get(pos + 2..pos + 2 + len) else {
            tracing::debug!("descriptor 0x{:02X} overruns its loop", tag);
            break;
        };
        match tag {
            DESC_LANGUAGE if body.len() >= 3 => {
                let code = &body[..3];
                if code.iter().all(|b| b.is_ascii_alphabetic()) {
                    out.language = Some(String::from_utf8_lossy(code).into_owned());
                }
            }
            DESC_REGISTRATION if body.len() >= 4 => {
                out.registration = Some([body[0], body[1], body[2], body[3]]);
            }
            DESC_DVB_AC3 | DESC_ATSC_AC3 => out.ac3 = true,
            DESC_DVB_EAC3 => out.eac3 = true,
            DESC_DVB_SUBTITLE => out.dvb_subtitle = true,
            DESC_CAPTION_SERVICE => out.captions = parse_caption_services(body),
            _ => {}
        }
        pos += 2 + len;
    }
    out
}

fn parse_caption_services(body: &[u8]) -> Vec<CaptionService> {
    let Some((&count, rest)) = body.split_first() else {
        return Vec::new();
    };
    rest.chunks_exact(6)
        .take((count & 0x1F) as usize)
        .map(|entry| {
            let digital = entry[3] & 0x80 != 0;
            CaptionService {
                language: String::from_utf8_lossy(&entry[..3]).into_owned(),
                digital,
                service: if digital { entry[3] & 0x3F } else if entry[3] & 0x01 != 0 { 3 } else { 1 },
            }
        })
        .collect()
}

/// Map a PMT stream type to a codec. `hdmv` is set for Blu-ray programs.
pub fn codec_for(stream_type: u8, desc: &Descriptors, hdmv: bool) -> CodecId {
    match stream_type {
        STREAM_TYPE_MPEG1_VIDEO => CodecId::Mpeg1Video,
        STREAM_TYPE_MPEG2_VIDEO => CodecId::Mpeg2Video,
        STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => CodecId::MpegAudio,
        STREAM_TYPE_AAC | STREAM_TYPE_AAC_LATM => CodecId::Aac,
        STREAM_TYPE_MPEG4_VISUAL => CodecId::Mpeg4Visual,
        STREAM_TYPE_H264 => CodecId::Avc,
        STREAM_TYPE_H265 => CodecId::Hevc,
        STREAM_TYPE_VC1 => CodecId::Vc1,
        STREAM_TYPE_LPCM if hdmv => CodecId::Lpcm,
        STREAM_TYPE_AC3 => CodecId::Ac3,
        STREAM_TYPE_DTS if hdmv => CodecId::Dts,
        STREAM_TYPE_TRUEHD => CodecId::TrueHd,
        STREAM_TYPE_EAC3 | STREAM_TYPE_EAC3_SECONDARY => CodecId::Eac3,
        STREAM_TYPE_EAC3_HDMV if hdmv => CodecId::Eac3,
        STREAM_TYPE_DTS_HD | STREAM_TYPE_DTS_HD_MA if hdmv => CodecId::Dts,
        STREAM_TYPE_DTS_SECONDARY => CodecId::Dts,
        STREAM_TYPE_PGS => CodecId::Pgs,
        STREAM_TYPE_PRIVATE_PES => {
            if desc.eac3 {
                CodecId::Eac3
            } else if desc.ac3 || desc.registration == Some(*b"AC-3") {
                CodecId::Ac3
            } else if desc.registration == Some(*b"VC-1") {
                CodecId::Vc1
            } else if desc.dvb_subtitle {
                CodecId::DvbSubtitle
            } else {
                CodecId::Unknown
            }
        }
        _ if desc.registration == Some(*b"VC-1") => CodecId::Vc1,
        _ if desc.registration == Some(*b"AC-3") => CodecId::Ac3,
        _ => CodecId::Unknown,
    }
}

// ============================================================================
// Programs and streams
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    pub number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: Option<u16>,
    pub registration: Option<[u8; 4]>,
    pub pids: Vec<u16>,
}

#[derive(Debug)]
pub struct TsStream {
    pub pid: u16,
    pub program: u16,
    pub stream_type: u8,
    pub codec: CodecId,
    pub descriptors: Descriptors,
    pub stats: StreamStats,
    pub probe: CodecProbe,
    pub scrambled: bool,
    pub bad_pes: u64,
    pub random_access_points: u64,
    pes_header: Vec<u8>,
    header_pending: bool,
    in_pes: bool,
}

impl TsStream {
    fn new(pid: u16, program: u16, stream_type: u8, codec: CodecId, descriptors: Descriptors) -> Self {
        Self {
            pid,
            program,
            stream_type,
            codec,
            descriptors,
            stats: StreamStats::default(),
            probe: CodecProbe::for_codec(codec),
            scrambled: false,
            bad_pes: 0,
            random_access_points: 0,
            pes_header: Vec::new(),
            header_pending: false,
            in_pes: false,
        }
    }

    fn reset_pes(&mut self) {
        self.pes_header.clear();
        self.header_pending = false;
        self.in_pes = false;
    }

    fn push_payload(&mut self, unit_start: bool, payload: &[u8], probe_payload: bool) {
        if unit_start {
            self.pes_header.clear();
            self.pes_header.extend_from_slice(payload);
            self.header_pending = true;
        } else if self.header_pending {
            if self.pes_header.len() + payload.len() > MAX_PES_HEADER {
                self.bad_pes += 1;
                self.reset_pes();
                return;
            }
            self.pes_header.extend_from_slice(payload);
        } else {
            if self.in_pes {
                self.stats.add_payload(payload.len());
                if probe_payload {
                    self.probe.feed(payload);
                }
            }
            return;
        }

        match pes::parse_header(&self.pes_header) {
            Ok(header) => {
                self.header_pending = false;
                self.in_pes = true;
                self.stats.add_frame(header.pts);
                let body = &self.pes_header[header.payload_offset.min(self.pes_header.len())..];
                self.stats.add_payload(body.len());
                if probe_payload {
                    self.probe.feed(body);
                }
                self.pes_header.clear();
            }
            Err(BitstreamError::Truncated { .. }) if self.pes_header.len() < MAX_PES_HEADER => {}
            Err(err) => {
                tracing::debug!("pid {}: bad PES header: {}", self.pid, err);
                self.bad_pes += 1;
                self.reset_pes();
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PcrClock {
    pub bitrate: PcrBitrate,
    /// PCR base on the 90 kHz clock.
    pub span: TimestampTracker,
}

// ============================================================================
// TS Demuxer
// ============================================================================

#[derive(Debug)]
pub struct TsDemuxer {
    layout: PacketLayout,
    sections: HashMap<u16, SectionBuffer>,
    pmt_pids: HashMap<u16, u16>,
    counters: HashMap<u16, CounterState>,
    pub programs: BTreeMap<u16, Program>,
    pub streams: BTreeMap<u16, TsStream>,
    pub pcr: BTreeMap<u16, PcrClock>,
    pub packets: u64,
    pub error_packets: u64,
    pub sync_losses: u64,
    tail: bool,
    expect_resync: bool,
}

impl TsDemuxer {
    pub fn new(layout: PacketLayout) -> Self {
        Self {
            layout,
            sections: HashMap::new(),
            pmt_pids: HashMap::new(),
            counters: HashMap::new(),
            programs: BTreeMap::new(),
            streams: BTreeMap::new(),
            pcr: BTreeMap::new(),
            packets: 0,
            error_packets: 0,
            sync_losses: 0,
            tail: false,
            expect_resync: false,
        }
    }

    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    /// Switch to a window that does not follow the bytes seen so far.
    /// From here on only timestamps are collected.
    pub fn begin_tail(&mut self) {
        self.tail = true;
        self.expect_resync = true;
        self.counters.clear();
        for section in self.sections.values_mut() {
            section.reset();
        }
        for clock in self.pcr.values_mut() {
            clock.bitrate.break_chain();
        }
        for stream in self.streams.values_mut() {
            stream.reset_pes();
        }
    }

    /// Consume whole packets from `buf`, which starts at file offset `base`.
    /// Returns the bytes used; the remainder is a partial packet.
    pub fn feed(&mut self, buf: &[u8], base: u64) -> usize {
        let size = self.layout.packet_size;
        let prefix = self.layout.prefix;
        let mut pos = 0usize;
        while pos + size <= buf.len() {
            let at = pos + prefix;
            // after a seek the next stride must confirm the sync byte
            let aligned = !self.expect_resync || buf.get(at + size).map_or(true, |&b| b == SYNC_BYTE);
            if buf[at] == SYNC_BYTE && aligned {
                self.expect_resync = false;
                self.push_packet(&buf[pos..pos + size], base + pos as u64);
                pos += size;
                continue;
            }
            if !self.expect_resync {
                self.sync_losses += 1;
                tracing::debug!("sync lost at offset {}", base + pos as u64);
            }
            self.expect_resync = false;
            match resync(&buf[pos..], &self.layout) {
                Some(skip) => pos += skip,
                None => {
                    pos = (buf.len() + 1).saturating_sub(size).max(pos + 1);
                    break;
                }
            }
        }
        pos
    }

    /// One packet of `layout.packet_size` bytes.
    pub fn push_packet(&mut self, packet: &[u8], offset: u64) {
        let Some(ts) = packet.get(self.layout.prefix..self.layout.prefix + TS_PACKET_SIZE) else {
            return;
        };
        let Some(header) = TsHeader::parse(ts) else {
            return;
        };
        self.packets += 1;
        if header.transport_error {
            self.error_packets += 1;
            return;
        }
        if header.pid == NULL_PID {
            return;
        }

        let mut payload_start = 4;
        let mut af = AdaptationField::default();
        if header.adaptation_field_exists {
            let af_len = ts[4] as usize;
            if 5 + af_len > TS_PACKET_SIZE {
                self.error_packets += 1;
                return;
            }
            af = AdaptationField::parse(&ts[5..5 + af_len]);
            payload_start = 5 + af_len;
        }
        if let Some(pcr) = af.pcr {
            let clock = self.pcr.entry(header.pid).or_default();
            clock.bitrate.observe(pcr, offset);
            clock.span.observe(pcr / 300);
        }
        if af.random_access {
            if let Some(stream) = self.streams.get_mut(&header.pid) {
                stream.random_access_points += 1;
            }
        }
        if !header.payload_exists || payload_start >= TS_PACKET_SIZE {
            if af.discontinuity {
                self.counters.remove(&header.pid);
            }
            return;
        }

        let counter = self.counters.entry(header.pid).or_default();
        if counter.check(header.continuity_counter, af.discontinuity) == Continuity::Duplicate {
            return;
        }

        let payload = &ts[payload_start..];
        if header.pid == PAT_PID || self.pmt_pids.contains_key(&header.pid) {
            self.push_section(header.pid, header.payload_unit_start, payload);
        } else if let Some(stream) = self.streams.get_mut(&header.pid) {
            if header.scrambling_control != 0 {
                stream.scrambled = true;
                stream.stats.add_payload(payload.len());
                return;
            }
            stream.push_payload(header.payload_unit_start, payload, !self.tail);
        }
    }

    fn push_section(&mut self, pid: u16, unit_start: bool, payload: &[u8]) {
        let mut complete = Vec::new();
        self.sections.entry(pid).or_default().push(unit_start, payload, &mut complete);
        for section in complete {
            match section[0] {
                0x00 if pid == PAT_PID => self.parse_pat(&section),
                0x02 => self.parse_pmt(pid, &section),
                _ => {}
            }
        }
    }

    fn parse_pat(&mut self, section: &[u8]) {
        let Some(body) = section_body(section) else {
            return;
        };
        for entry in body.chunks_exact(4) {
            let number = u16::from_be_bytes([entry[0], entry[1]]);
            let pmt_pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);
            if number == 0 {
                continue; // network PID
            }
            if self.pmt_pids.insert(pmt_pid, number).is_none() {
                tracing::debug!("program {} on pmt pid {}", number, pmt_pid);
            }
            self.programs.entry(number).or_insert_with(|| Program {
                number,
                pmt_pid,
                pcr_pid: None,
                registration: None,
                pids: Vec::new(),
            });
        }
    }

    fn parse_pmt(&mut self, pmt_pid: u16, section: &[u8]) {
        let Some(body) = section_body(section) else {
            return;
        };
        if body.len() < 4 {
            return;
        }
        let number = u16::from_be_bytes([section[3], section[4]]);
        let pcr_pid = u16::from_be_bytes([body[0] & 0x1F, body[1]]);
        let info_len = (u16::from_be_bytes([body[2] & 0x0F, body[3]]) as usize).min(body.len() - 4);
        let program_desc = parse_descriptors(&body[4..4 + info_len]);
        let hdmv = program_desc.registration == Some(*b"HDMV");

        let mut pids = Vec::new();
        let mut pos = 4 + info_len;
        while pos + 5 <= body.len() {
            let stream_type = body[pos];
            let pid = u16::from_be_bytes([body[pos + 1] & 0x1F, body[pos + 2]]);
            let es_len = u16::from_be_bytes([body[pos + 3] & 0x0F, body[pos + 4]]) as usize;
            let Some(es_info) = body.get(pos + 5..pos + 5 + es_len) else {
                tracing::debug!("pmt {}: es info overruns section", number);
                break;
            };
            let desc = parse_descriptors(es_info);
            let codec = codec_for(stream_type, &desc, hdmv);
            pids.push(pid);
            // a repeated PMT keeps the running state
            self.streams.entry(pid).or_insert_with(|| {
                tracing::debug!("pid {} stream type 0x{:02X} -> {}", pid, stream_type, codec.name());
                TsStream::new(pid, number, stream_type, codec, desc)
            });
            pos += 5 + es_len;
        }

        let program = self.programs.entry(number).or_insert_with(|| Program {
            number,
            pmt_pid,
            pcr_pid: None,
            registration: None,
            pids: Vec::new(),
        });
        program.pcr_pid = (pcr_pid != NULL_PID).then_some(pcr_pid);
        program.registration = program_desc.registration;
        program.pids = pids;
    }

    /// PCR clock of the first program that has one, else any PCR seen.
    pub fn main_clock(&self) -> Option<&PcrClock> {
        self.programs
            .values()
            .filter_map(|p| p.pcr_pid)
            .find_map(|pid| self.pcr.get(&pid))
            .or_else(|| self.pcr.values().next())
    }

    pub fn continuity_errors(&self, pid: u16) -> u64 {
        self.counters.get(&pid).map_or(0, |c| c.errors)
    }

    /// Build the report. `full` is set when every byte of the file was scanned.
    pub fn into_report(mut self, file_size: u64, ctx: &ProbeContext, full: bool) -> Report {
        let kind = if self.layout.is_bdav() { ContainerKind::Bdav } else { ContainerKind::MpegTs };
        let policy = ctx.options.duration_policy;
        let mut report = Report::new(kind, file_size);

        for stream in self.streams.values_mut() {
            stream.probe.flush();
        }

        let mut duration = self.main_clock().and_then(|c| c.span.duration_ms(policy));
        if duration.is_none() {
            duration = self.streams.values().filter_map(|s| s.stats.duration_ms(policy)).max();
        }
        let clock = self.main_clock();
        report.container.duration_ms = duration;
        report.container.bitrate_bracket = clock.and_then(|c| c.bitrate.bracket());
        report.container.overall_bitrate = clock
            .and_then(|c| c.bitrate.mean())
            .or_else(|| stats::bitrate(file_size, duration?, TS_ROUNDING));
        report.container.bitrate_mode = report.container.bitrate_bracket.map(|(min, max)| {
            if max - min <= max / 100 {
                BitrateMode::Constant
            } else {
                BitrateMode::Variable
            }
        });
        if full {
            let payload: u64 = self.streams.values().map(|s| s.stats.bytes).sum();
            report.container.stream_overhead = Some(file_size.saturating_sub(payload));
        }

        for stream in self.streams.values() {
            let mut s = describe_stream(stream, ctx, full);
            let errors = self.continuity_errors(stream.pid);
            if errors > 0 {
                s.set_key("continuity_errors", errors);
            }
            report.streams.push(s);
            if let Some(captions) = stream.probe.captions() {
                for mut text in captions.streams("A/53 / DTVCC Transport") {
                    if let Some(id) = text.get("ID").map(str::to_string) {
                        text.push("ID", format!("{}-{}", stream.pid, id));
                    }
                    annotate_caption_language(&mut text, &stream.descriptors.captions, ctx);
                    report.streams.push(text);
                }
                captions.describe_general(&mut report.general);
            }
        }

        for program in self.programs.values() {
            let mut menu = Stream::new(StreamKind::Menu);
            menu.push_both("ID", format!("{} (0x{:X})", program.pmt_pid, program.pmt_pid), program.pmt_pid);
            menu.push_both("Menu ID", format!("{} (0x{:X})", program.number, program.number), program.number);
            let list: Vec<String> = program.pids.iter().map(|p| format!("{} (0x{:X})", p, p)).collect();
            menu.push("List", list.join(" / "));
            report.streams.push(menu);
        }

        report.general.set_key("packets", self.packets);
        if self.error_packets > 0 {
            report.general.set_key("transport_errors", self.error_packets);
        }
        if self.sync_losses > 0 {
            report.general.set_key("sync_losses", self.sync_losses);
        }
        report.finish();
        report
    }
}

fn describe_stream(stream: &TsStream, ctx: &ProbeContext, full: bool) -> Stream {
    let codec = stream.probe.detected_codec().unwrap_or(stream.codec);
    let mut s = Stream::new(codec.kind());
    s.push_both("ID", format!("{} (0x{:X})", stream.pid, stream.pid), stream.pid);
    s.push_both("Menu ID", format!("{} (0x{:X})", stream.program, stream.program), stream.program);
    s.push("Format", codec.name());
    stream.probe.describe(&mut s);
    s.push_both("Codec ID", stream.stream_type.to_string(), stream.stream_type);

    let duration = stream.stats.duration_ms(ctx.options.duration_policy);
    if let Some(ms) = duration {
        s.push_both("Duration", display::duration(ms), ms);
    }
    if full {
        if s.get("Bit rate").is_none() {
            if let Some(bps) = duration.and_then(|ms| stats::bitrate(stream.stats.bytes, ms, TS_ROUNDING)) {
                s.push_both("Bit rate", display::bitrate(bps), bps);
            }
        }
        s.push_both("Stream size", display::file_size(stream.stats.bytes), stream.stats.bytes);
    }
    if let Some(first) = stream.stats.pts.first() {
        s.set_key("first_pts", first);
    }
    if let Some(lang) = &stream.descriptors.language {
        s.push("Language", ctx.language.normalize(lang));
    }
    if stream.scrambled {
        s.push("Encryption", "Encrypted");
    }
    s
}

fn annotate_caption_language(text: &mut Stream, services: &[CaptionService], ctx: &ProbeContext) {
    let declared = match (text.key("service"), text.get("ID")) {
        (Some(service), _) => services
            .iter()
            .find(|c| c.digital && c.service.to_string() == service),
        (None, Some(id)) => services
            .iter()
            .find(|c| !c.digital && id.ends_with(&format!("CC{}", c.service))),
        _ => None,
    };
    if let Some(service) = declared {
        text.push("Language", ctx.language.normalize(&service.language));
    }
}

// ============================================================================
// Scanning
// ============================================================================

fn scan_window(src: &mut dyn ByteSource, demux: &mut TsDemuxer, start: u64, end: u64) {
    let chunk = (demux.layout().packet_size * PACKETS_PER_READ) as u64;
    let mut offset = start;
    while offset < end {
        let buf = match src.read_clamped(offset, (end - offset).min(chunk)) {
            Ok(buf) => buf,
            Err(err) => {
                tracing::warn!("read failed at {}: {}", offset, err);
                break;
            }
        };
        if buf.len() < demux.layout().packet_size {
            break;
        }
        let used = demux.feed(&buf, offset);
        if used == 0 {
            break;
        }
        offset += used as u64;
    }
}

/// Probe a transport stream. None if no packet layout is found.
pub fn probe(src: &mut dyn ByteSource, ctx: &mut ProbeContext) -> Option<Report> {
    let size = src.size();
    let head = match src.read_clamped(0, (BDAV_PACKET_SIZE * (SYNC_RUN + 1)) as u64) {
        Ok(head) => head,
        Err(err) => {
            tracing::warn!("cannot read transport stream head: {}", err);
            return None;
        }
    };
    let layout = detect_layout(&head)?;
    tracing::debug!(
        "transport stream: {} byte packets from offset {}",
        layout.packet_size,
        layout.start
    );

    let speed = ctx.options.speed();
    let plan = ScanPlan::new(size, speed);
    let mut demux = TsDemuxer::new(layout);
    scan_window(src, &mut demux, layout.start as u64, plan.head);
    if let Some(tail) = plan.tail_start {
        demux.begin_tail();
        scan_window(src, &mut demux, tail, size);
    }

    let mut file_size = size;
    let mut full = plan.is_full();
    if let Some(continuation) = ctx.continuation.as_mut() {
        let last = continuation.last.as_mut();
        let last_size = last.size();
        let start = ScanPlan::new(last_size, speed)
            .tail_start
            .unwrap_or(0);
        tracing::debug!(
            "continuous set of {} files, scanning last from {}",
            continuation.set.count,
            start
        );
        demux.begin_tail();
        scan_window(last, &mut demux, start, last_size);
        file_size = continuation.set.total_size;
        full = false;
    }

    let mut report = demux.into_report(file_size, ctx, full);
    if let Some(continuation) = &ctx.continuation {
        report.general.set_key("continuous_file_count", continuation.set.count);
    }
    Some(report)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::ac3::fixtures::ac3_frame;
    use crate::collab::Iso639;
    use crate::mpeg2::fixtures as m2v;
    use crate::options::ProbeOptions;
    use crate::pes::build_packet;
    use crate::source::MemorySource;

    const VIDEO: u16 = 0x100;
    const AUDIO: u16 = 0x101;

    fn sample_stream(bdav: bool) -> Vec<u8> {
        let mut w = TsWriter::new(bdav);
        w.section(0, &pat(1, 0x1000));
        w.section(
            0x1000,
            &pmt(
                1,
                VIDEO,
                &[
                    (0x02, VIDEO, Vec::new()),
                    (0x81, AUDIO, vec![0x0A, 4, b'e', b'n', b'g', 0]),
                ],
            ),
        );
        for i in 0..10u64 {
            let pts = 90_000 + i * 9000;
            let mut es = Vec::new();
            if i == 0 {
                es.extend(m2v::sequence_header(720, 576, 2, 3));
                es.extend(m2v::sequence_extension(false));
                es.extend(m2v::gop(true));
            }
            es.extend(m2v::picture(0, if i == 0 { 1 } else { 2 }));
            es.extend(vec![0x11; 300]);
            w.pes(VIDEO, &build_packet(0xE0, Some(pts), &es), Some((pts - 9000) * 300));
            w.pes(AUDIO, &build_packet(0xBD, Some(pts), &ac3_frame(8, 2, 27, None)), None);
        }
        w.out
    }

    fn context(options: ProbeOptions) -> ProbeContext<'static> {
        ProbeContext::new(options, &Iso639)
    }

    #[test]
    fn detects_both_layouts() {
        let ts = sample_stream(false);
        let layout = detect_layout(&ts).unwrap();
        assert_eq!((layout.packet_size, layout.start), (188, 0));

        let mut bdav = vec![0x12; 10];
        bdav.extend(sample_stream(true));
        let layout = detect_layout(&bdav).unwrap();
        assert_eq!((layout.packet_size, layout.prefix, layout.start), (192, 4, 10));
        assert!(layout.is_bdav());

        assert_eq!(detect_layout(&[0u8; 400]), None);
    }

    #[test]
    fn probes_programs_and_streams() {
        let data = sample_stream(false);
        let mut src = MemorySource::new(data.clone());
        let mut ctx = context(ProbeOptions::default().with_parse_speed(1.0));
        let report = probe(&mut src, &mut ctx).unwrap();

        assert_eq!(report.container.format, ContainerKind::MpegTs);
        assert_eq!(report.container.duration_ms, Some(900));
        let (min, max) = report.container.bitrate_bracket.unwrap();
        assert!(min > 0 && min <= max);

        let video = report.streams_of(StreamKind::Video).next().unwrap();
        assert_eq!(video.get("ID"), Some("256 (0x100)"));
        assert_eq!(video.get("Format"), Some("MPEG Video"));
        assert_eq!(video.get("Width"), Some("720 pixels"));
        assert_eq!(video.get("Duration"), Some("900 ms"));

        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.get("Format"), Some("AC-3"));
        assert_eq!(audio.get("Language"), Some("en"));
        assert_eq!(audio.key("continuity_errors"), None);

        let menu = report.streams_of(StreamKind::Menu).next().unwrap();
        assert_eq!(menu.get("List"), Some("256 (0x100) / 257 (0x101)"));
        assert!(report.container.stream_overhead.unwrap() < data.len() as u64);
    }

    #[test]
    fn continuity_gaps_and_duplicates() {
        let mut counter = CounterState::default();
        assert_eq!(counter.check(14, false), Continuity::Ok);
        assert_eq!(counter.check(15, false), Continuity::Ok);
        assert_eq!(counter.check(0, false), Continuity::Ok);
        assert_eq!(counter.check(0, false), Continuity::Duplicate);
        assert_eq!(counter.check(3, false), Continuity::Gap);
        assert_eq!(counter.check(9, true), Continuity::Ok);
        assert_eq!((counter.errors, counter.duplicates), (1, 1));
    }

    #[test]
    fn dropped_packet_is_counted_not_fatal() {
        let mut data = sample_stream(false);
        // remove the second audio packet
        let audio_packets: Vec<usize> = data
            .chunks(188)
            .enumerate()
            .filter(|(_, p)| u16::from_be_bytes([p[1] & 0x1F, p[2]]) == AUDIO)
            .map(|(i, _)| i)
            .collect();
        let cut = audio_packets[1] * 188;
        data.drain(cut..cut + 188);

        let mut src = MemorySource::new(data);
        let mut ctx = context(ProbeOptions::default());
        let report = probe(&mut src, &mut ctx).unwrap();
        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.key("continuity_errors"), Some("1"));
    }

    #[test]
    fn resyncs_after_garbage() {
        let data = sample_stream(false);
        let mut damaged = data[..188 * 3].to_vec();
        damaged.extend_from_slice(&[0x00; 57]);
        damaged.extend_from_slice(&data[188 * 3..]);
        let mut demux = TsDemuxer::new(detect_layout(&data).unwrap());
        let mut pos = 0;
        while pos + 188 <= damaged.len() {
            let used = demux.feed(&damaged[pos..], pos as u64);
            assert!(used > 0);
            pos += used;
        }
        assert_eq!(demux.sync_losses, 1);
        assert_eq!(demux.packets as usize, data.len() / 188);
        assert_eq!(demux.streams.len(), 2);
    }

    #[test]
    fn tail_window_ignores_unaligned_sync_byte() {
        let data = sample_stream(false);
        let mut tail = vec![0x47];
        tail.extend_from_slice(&[0x00; 99]);
        tail.extend_from_slice(&data);
        let mut demux = TsDemuxer::new(detect_layout(&data).unwrap());
        demux.begin_tail();
        let mut pos = 0;
        while pos + 188 <= tail.len() {
            let used = demux.feed(&tail[pos..], pos as u64);
            assert!(used > 0);
            pos += used;
        }
        assert_eq!(demux.sync_losses, 0);
        assert_eq!(demux.packets as usize, data.len() / 188);
    }

    #[test]
    fn section_assembly_across_packets() {
        let services: Vec<(u8, u16, Vec<u8>)> =
            (0..40).map(|i| (0x81, 0x200 + i, vec![0x0A, 4, b'f', b'r', b'e', 0])).collect();
        let section = pmt(7, 0x200, &services);
        assert!(section.len() > 184);
        let mut w = TsWriter::new(false);
        w.section(0, &pat(7, 0x30));
        w.section(0x30, &section);
        let mut demux = TsDemuxer::new(detect_layout(&w.out).unwrap());
        demux.feed(&w.out, 0);
        assert_eq!(demux.streams.len(), 40);
        assert_eq!(demux.programs[&7].pcr_pid, Some(0x200));
        assert_eq!(demux.streams[&0x227].descriptors.language.as_deref(), Some("fre"));
    }

    #[test]
    fn maps_private_stream_types() {
        let ac3 = parse_descriptors(&[0x6A, 1, 0x00]);
        assert_eq!(codec_for(0x06, &ac3, false), CodecId::Ac3);
        let vc1 = parse_descriptors(&[0x05, 4, b'V', b'C', b'-', b'1']);
        assert_eq!(codec_for(0x06, &vc1, false), CodecId::Vc1);
        assert_eq!(codec_for(0x80, &Descriptors::default(), true), CodecId::Lpcm);
        assert_eq!(codec_for(0x80, &Descriptors::default(), false), CodecId::Unknown);
        let captions = parse_descriptors(&[0x86, 7, 0xE1, b'e', b'n', b'g', 0xC1, 0x3F, 0xFF]);
        assert_eq!(
            captions.captions,
            vec![CaptionService {
                language: "eng".into(),
                digital: true,
                service: 1
            }]
        );
        // truncated descriptor loop stops without panicking
        assert_eq!(parse_descriptors(&[0x0A, 9, b'e']).language, None);
    }

    #[test]
    fn continuation_extends_duration() {
        let first = sample_stream(false);
        let mut w = TsWriter::new(false);
        for i in 0..3u64 {
            let pts = 900_000 + i * 9000;
            w.pes(VIDEO, &build_packet(0xE0, Some(pts), &[0x11; 64]), Some((pts - 9000) * 300));
        }
        let last = w.out;
        let set = crate::continuous::ContinuousSet {
            count: 2,
            total_size: (first.len() + last.len()) as u64,
            last_path: "00001.m2ts".into(),
            last_size: last.len() as u64,
        };
        let mut ctx = context(ProbeOptions::default().with_continuous(true));
        ctx.continuation = Some(crate::probe::Continuation {
            set: set.clone(),
            last: Box::new(MemorySource::new(last)),
        });
        let mut src = MemorySource::new(first);
        let report = probe(&mut src, &mut ctx).unwrap();
        assert_eq!(report.container.file_size, set.total_size);
        // PCR span from 81 000 to 909 000 ticks
        assert_eq!(report.container.duration_ms, Some(9200));
        assert_eq!(report.general.key("continuous_file_count"), Some("2"));
    }
}
