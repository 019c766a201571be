// Sample files for the integration tests, one small valid file per container.

#![allow(dead_code)]

use mediascope_core::{MemorySource, ProbeOptions, Prober, Report};

pub fn probe_bytes(data: &[u8], ext: Option<&str>) -> Report {
    let prober = Prober::new(ProbeOptions::default().with_parse_speed(1.0));
    let mut src = MemorySource::new(data.to_vec());
    prober.probe_source(&mut src, ext).expect("in-memory sources always sniff")
}

/// Deterministic xorshift64 for the mutation tests.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, n: usize) -> usize {
        (self.next() % n.max(1) as u64) as usize
    }
}

// ============================================================================
// Elementary streams
// ============================================================================

/// AC-3 frame: 48 kHz, 32 kb/s, bsid 8, 2/0 plus LFE, 128 bytes.
pub fn ac3_frame() -> Vec<u8> {
    let mut frame = vec![0x0B, 0x77, 0x00, 0x00, 0x00, 0x40, 0x57, 0x63];
    frame.resize(128, 0);
    frame
}

fn pts_bytes(pts: u64) -> [u8; 5] {
    [
        0x21 | ((pts >> 29) & 0x0E) as u8,
        (pts >> 22) as u8,
        ((pts >> 14) & 0xFE) as u8 | 1,
        (pts >> 7) as u8,
        ((pts << 1) & 0xFE) as u8 | 1,
    ]
}

pub fn pes(stream_id: u8, pts: u64, payload: &[u8]) -> Vec<u8> {
    let len = 3 + 5 + payload.len();
    let mut out = vec![0x00, 0x00, 0x01, stream_id, (len >> 8) as u8, len as u8, 0x80, 0x80, 5];
    out.extend_from_slice(&pts_bytes(pts));
    out.extend_from_slice(payload);
    out
}

// ============================================================================
// MPEG-TS
// ============================================================================

pub const AUDIO_PID: u16 = 0x101;
const PMT_PID: u16 = 0x1000;

pub struct TsWriter {
    cc: [u8; 0x2000],
    pub out: Vec<u8>,
}

impl TsWriter {
    pub fn new() -> Self {
        Self {
            cc: [0; 0x2000],
            out: Vec::new(),
        }
    }

    fn packet(&mut self, pid: u16, unit_start: bool, pcr: Option<u64>, data: &[u8]) -> usize {
        let mut af = Vec::new();
        if let Some(pcr) = pcr {
            let (base, ext) = (pcr / 300, pcr % 300);
            af = vec![
                0x10,
                (base >> 25) as u8,
                (base >> 17) as u8,
                (base >> 9) as u8,
                (base >> 1) as u8,
                ((base & 1) as u8) << 7 | 0x7E | (ext >> 8) as u8,
                ext as u8,
            ];
        }
        let reserved = if af.is_empty() { 0 } else { 1 + af.len() };
        let take = data.len().min(184 - reserved);
        let af_total = 184 - take;
        let cc = self.cc[pid as usize];
        self.cc[pid as usize] = (cc + 1) & 0x0F;
        let mut pkt = vec![0x47, (unit_start as u8) << 6 | (pid >> 8) as u8, pid as u8];
        if af_total > 0 {
            pkt.push(0x30 | cc);
            pkt.push((af_total - 1) as u8);
            if af_total > 1 {
                if af.is_empty() {
                    af.push(0x00);
                }
                af.resize(af_total - 1, 0xFF);
                pkt.extend_from_slice(&af);
            }
        } else {
            pkt.push(0x10 | cc);
        }
        pkt.extend_from_slice(&data[..take]);
        self.out.extend_from_slice(&pkt);
        take
    }

    pub fn payload(&mut self, pid: u16, data: &[u8], pcr: Option<u64>) {
        let mut pos = self.packet(pid, true, pcr, data);
        while pos < data.len() {
            pos += self.packet(pid, false, None, &data[pos..]);
        }
    }

    pub fn tables(&mut self) {
        let mut pat = vec![0x00, 0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0, 0, 0x00, 0x01];
        pat.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
        pat.extend_from_slice(&[0; 4]);
        self.payload(0, &pat, None);

        let mut pmt = vec![0x00, 0x02, 0xB0, 18, 0x00, 0x01, 0xC1, 0, 0];
        pmt.extend_from_slice(&(0xE000 | AUDIO_PID).to_be_bytes());
        pmt.extend_from_slice(&[0xF0, 0x00, 0x81]);
        pmt.extend_from_slice(&(0xE000 | AUDIO_PID).to_be_bytes());
        pmt.extend_from_slice(&[0xF0, 0x00]);
        pmt.extend_from_slice(&[0; 4]);
        self.payload(PMT_PID, &pmt, None);
    }
}

/// `frames` AC-3 frames 32 ms apart, PTS starting at `start`, PCR on the audio PID.
pub fn ts_file(start: u64, frames: u64) -> Vec<u8> {
    let mut w = TsWriter::new();
    w.tables();
    for i in 0..frames {
        let pts = start + i * 2880;
        w.payload(AUDIO_PID, &pes(0xBD, pts, &ac3_frame()), Some(pts.saturating_sub(2880) * 300));
    }
    w.out
}

// ============================================================================
// MPEG-PS
// ============================================================================

pub fn ps_file(frames: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..frames {
        out.extend_from_slice(&[0x00, 0x00, 0x01, 0xBA, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x89, 0xC3, 0xF8]);
        let mut payload = vec![0x80, 0x01, 0x00, 0x01];
        payload.extend(ac3_frame());
        out.extend(pes(0xBD, 90_000 + i * 2880, &payload));
    }
    out.extend_from_slice(&[0x00, 0x00, 0x01, 0xB9]);
    out
}

// ============================================================================
// ISO-BMFF
// ============================================================================

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    mp4_box(kind, &[&[0u8, 0, 0, 0][..], body].concat())
}

fn be(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// 640x360 AVC track, 100 samples of 500 bytes over 4 s.
pub fn mp4_file() -> Vec<u8> {
    let ftyp = mp4_box(b"ftyp", b"isom\0\0\x02\0isomavc1");
    let mvhd = full_box(b"mvhd", &[be(&[0, 0, 1000, 4000]), vec![0u8; 80]].concat());
    let tkhd = full_box(b"tkhd", &[be(&[0, 0, 1]), vec![0u8; 60], be(&[640 << 16, 360 << 16])].concat());
    let mdhd = full_box(b"mdhd", &[be(&[0, 0, 25_000, 100_000]), vec![0x55, 0xC4, 0, 0]].concat());
    let hdlr = full_box(b"hdlr", &[vec![0u8; 4], b"vide".to_vec(), vec![0u8; 13]].concat());
    let avcc = mp4_box(b"avcC", &[1, 100, 0, 30, 0xFF, 0xE1]);
    let entry = mp4_box(
        b"avc1",
        &[vec![0u8; 24], 640u16.to_be_bytes().to_vec(), 360u16.to_be_bytes().to_vec(), vec![0u8; 50], avcc].concat(),
    );
    let stsd = full_box(b"stsd", &[be(&[1]), entry].concat());
    let stsz = full_box(b"stsz", &be(&[500, 100]));
    let stbl = mp4_box(b"stbl", &[stsd, stsz].concat());
    let mdia = mp4_box(b"mdia", &[mdhd, hdlr, mp4_box(b"minf", &stbl)].concat());
    let trak = mp4_box(b"trak", &[tkhd, mdia].concat());
    let moov = mp4_box(b"moov", &[mvhd, trak].concat());
    let mdat = mp4_box(b"mdat", &vec![0u8; 50_000]);
    [ftyp, moov, mdat].concat()
}

// ============================================================================
// Matroska
// ============================================================================

fn el(id: u32, payload: &[u8]) -> Vec<u8> {
    let id_bytes = id.to_be_bytes();
    let skip = id_bytes.iter().position(|&b| b != 0).unwrap_or(3);
    let mut out = id_bytes[skip..].to_vec();
    out.push(0x01);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

fn uint(id: u32, value: u64) -> Vec<u8> {
    el(id, &value.to_be_bytes())
}

/// One AC-3 track with ten frames in a single cluster.
pub fn mkv_file() -> Vec<u8> {
    let header = el(0x1A45_DFA3, &el(0x4282, b"matroska"));
    let info = el(0x1549_A966, &[uint(0x2A_D7B1, 1_000_000), el(0x4489, &320.0f64.to_be_bytes())].concat());
    let track = el(
        0xAE,
        &[
            uint(0xD7, 1),
            uint(0x73C5, 7),
            uint(0x83, 2),
            el(0x86, b"A_AC3"),
            el(0xE1, &[el(0xB5, &48_000.0f64.to_be_bytes()), uint(0x9F, 2)].concat()),
        ]
        .concat(),
    );
    let mut cluster = uint(0xE7, 0);
    for k in 0..10u16 {
        let mut block = vec![0x81];
        block.extend_from_slice(&(k * 32).to_be_bytes());
        block.push(0x80);
        block.extend(ac3_frame());
        cluster.extend(el(0xA3, &block));
    }
    let segment = el(
        0x1853_8067,
        &[info, el(0x1654_AE6B, &track), el(0x1F43_B675, &cluster)].concat(),
    );
    [header, segment].concat()
}

// ============================================================================
// RIFF
// ============================================================================

fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn le(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// 16-bit mono PCM at 8 kHz, `ms` milliseconds long.
pub fn wav_file(ms: u32) -> Vec<u8> {
    let mut fmt = 1u16.to_le_bytes().to_vec();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend(le(&[8000, 16_000]));
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    let data = vec![0u8; (ms * 16) as usize];
    let body = [b"WAVE".to_vec(), chunk(b"fmt ", &fmt), chunk(b"data", &data)].concat();
    chunk(b"RIFF", &body)
}

/// XVID 320x240 at 25 fps, ten frames.
pub fn avi_file() -> Vec<u8> {
    let avih = chunk(b"avih", &le(&[40_000, 0, 0, 0x10, 10, 0, 1, 0, 320, 240, 0, 0, 0, 0]));
    let strh = chunk(b"strh", &[b"vidsXVID".to_vec(), le(&[0, 0, 0, 1, 25, 0, 10, 0, 0, 0, 0, 0])].concat());
    let mut bih = le(&[40, 320, 240]);
    bih.extend_from_slice(&1u16.to_le_bytes());
    bih.extend_from_slice(&24u16.to_le_bytes());
    bih.extend_from_slice(b"XVID");
    bih.extend(le(&[0; 5]));
    let strl = chunk(b"LIST", &[b"strl".to_vec(), strh, chunk(b"strf", &bih)].concat());
    let hdrl = chunk(b"LIST", &[b"hdrl".to_vec(), avih, strl].concat());
    let mut movi = b"movi".to_vec();
    for _ in 0..10 {
        movi.extend(chunk(b"00dc", &[0x11; 300]));
    }
    let body = [b"AVI ".to_vec(), hdrl, chunk(b"LIST", &movi)].concat();
    chunk(b"RIFF", &body)
}

/// Every sample with its expected General format name.
pub fn samples() -> Vec<(&'static str, Vec<u8>, &'static str)> {
    vec![
        ("mp4", mp4_file(), "MPEG-4"),
        ("mkv", mkv_file(), "Matroska"),
        ("avi", avi_file(), "AVI"),
        ("wav", wav_file(500), "Wave"),
        ("ts", ts_file(90_000, 40), "MPEG-TS"),
        ("mpg", ps_file(40), "MPEG-PS"),
    ]
}
