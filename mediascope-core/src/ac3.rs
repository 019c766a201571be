// AC-3 / E-AC-3 - Sync frame header decoders (ATSC A/52)
//
// • decode_ac3: syncinfo + BSI, frame size from the (fscod, frmsizecod) table
// • decode_eac3: frame size from frmsiz, substreams, fscod2
// • decode_frames: one or many frames per payload
// • Ac3Probe: running aggregation across packets
//
// Every optional BSI field is gated exactly by the bits that signal it.

use serde::Serialize;

use crate::bits::{BitReader, BitResult, BitstreamError};
use crate::display;
use crate::report::Stream;

pub const SYNC_WORD: u16 = 0x0B77;
pub const SAMPLES_PER_FRAME: u32 = 1536;

/// Carry cap while waiting for the rest of a frame.
const MAX_CARRY: usize = 8 * 4096;

// ============================================================================
// Tables
// ============================================================================

const BITRATE_KBPS: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

// 16-bit words per frame at 44.1 kHz for even frmsizecod; odd codes add one word.
const WORDS_44K: [u32; 19] = [
    69, 87, 104, 121, 139, 174, 208, 243, 278, 348, 417, 487, 557, 696, 835, 975, 1114, 1253, 1393,
];

const SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
const REDUCED_SAMPLE_RATES: [u32; 3] = [24000, 22050, 16000];
const EAC3_BLOCKS: [u8; 4] = [1, 2, 3, 6];

/// Frame length in bytes for (fscod, frmsizecod). None for reserved codes.
pub fn frame_size(fscod: u8, frmsizecod: u8) -> Option<usize> {
    let index = (frmsizecod / 2) as usize;
    let kbps = *BITRATE_KBPS.get(index)?;
    let words = match fscod {
        0 => kbps * 2,
        1 => WORDS_44K[index] + (frmsizecod & 1) as u32,
        2 => kbps * 3,
        _ => return None,
    };
    Some(words as usize * 2)
}

/// Full-bandwidth channels for an audio coding mode.
pub fn acmod_channels(acmod: u8) -> u8 {
    [2, 1, 2, 3, 3, 4, 4, 5][(acmod & 7) as usize]
}

pub fn channel_positions(acmod: u8, lfe: bool) -> String {
    let base = match acmod & 7 {
        0 => "Front: L R (dual mono)",
        1 => "Front: C",
        2 => "Front: L R",
        3 => "Front: L C R",
        4 => "Front: L R, Back: C",
        5 => "Front: L C R, Back: C",
        6 => "Front: L R, Side: L R",
        _ => "Front: L C R, Side: L R",
    };
    if lfe {
        format!("{}, LFE", base)
    } else {
        base.to_string()
    }
}

fn dialnorm_db(dialnorm: u8) -> i32 {
    if dialnorm == 0 {
        -31
    } else {
        -(dialnorm as i32)
    }
}

fn service_kind(bsmod: u8, acmod: u8) -> &'static str {
    match bsmod {
        0 => "Complete Main",
        1 => "Music and Effects",
        2 => "Visually Impaired",
        3 => "Hearing Impaired",
        4 => "Dialogue",
        5 => "Commentary",
        6 => "Emergency",
        _ if acmod == 1 => "Voice Over",
        _ => "Karaoke",
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Xbsi1 {
    pub dmixmod: u8,
    pub ltrtcmixlev: u8,
    pub ltrtsurmixlev: u8,
    pub lorocmixlev: u8,
    pub lorosurmixlev: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Xbsi2 {
    pub dsurexmod: u8,
    pub dheadphonmod: u8,
    pub adconvtyp: u8,
    pub xbsi2: u8,
    pub encinfo: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioProduction {
    pub mixlevel: u8,
    pub roomtyp: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ac3Frame {
    pub fscod: u8,
    pub frmsizecod: u8,
    pub frame_size: usize,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    pub bsid: u8,
    pub bsmod: u8,
    pub acmod: u8,
    pub cmixlev: Option<u8>,
    pub surmixlev: Option<u8>,
    pub dsurmod: Option<u8>,
    pub lfeon: bool,
    pub dialnorm: u8,
    pub compr: Option<u8>,
    pub langcod: Option<u8>,
    pub audprod: Option<AudioProduction>,
    pub dialnorm2: Option<u8>,
    pub compr2: Option<u8>,
    pub langcod2: Option<u8>,
    pub audprod2: Option<AudioProduction>,
    pub copyright: bool,
    pub original: bool,
    pub xbsi1: Option<Xbsi1>,
    pub xbsi2: Option<Xbsi2>,
    pub timecod1: Option<u16>,
    pub timecod2: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eac3Frame {
    pub strmtyp: u8,
    pub substreamid: u8,
    pub frmsiz: u16,
    pub frame_size: usize,
    pub fscod: u8,
    pub fscod2: Option<u8>,
    pub numblkscod: Option<u8>,
    pub blocks: u8,
    pub sample_rate: u32,
    pub acmod: u8,
    pub lfeon: bool,
    pub bsid: u8,
    pub dialnorm: u8,
    pub compr: Option<u8>,
    pub dialnorm2: Option<u8>,
    pub compr2: Option<u8>,
    pub chanmap: Option<u16>,
}

impl Eac3Frame {
    pub fn bitrate(&self) -> u32 {
        let samples = self.blocks as u64 * 256;
        (self.frame_size as u64 * 8 * self.sample_rate as u64 / samples) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncFrame {
    Ac3(Ac3Frame),
    Eac3(Eac3Frame),
}

impl SyncFrame {
    pub fn frame_size(&self) -> usize {
        match self {
            SyncFrame::Ac3(f) => f.frame_size,
            SyncFrame::Eac3(f) => f.frame_size,
        }
    }

    pub fn dialnorm(&self) -> u8 {
        match self {
            SyncFrame::Ac3(f) => f.dialnorm,
            SyncFrame::Eac3(f) => f.dialnorm,
        }
    }

    pub fn acmod(&self) -> u8 {
        match self {
            SyncFrame::Ac3(f) => f.acmod,
            SyncFrame::Eac3(f) => f.acmod,
        }
    }

    pub fn lfeon(&self) -> bool {
        match self {
            SyncFrame::Ac3(f) => f.lfeon,
            SyncFrame::Eac3(f) => f.lfeon,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            SyncFrame::Ac3(f) => f.sample_rate,
            SyncFrame::Eac3(f) => f.sample_rate,
        }
    }

    pub fn bitrate(&self) -> u32 {
        match self {
            SyncFrame::Ac3(f) => f.bitrate_kbps * 1000,
            SyncFrame::Eac3(f) => f.bitrate(),
        }
    }

    pub fn channels(&self) -> u8 {
        acmod_channels(self.acmod()) + self.lfeon() as u8
    }
}

// ============================================================================
// Decoders
// ============================================================================

fn read_sync(r: &mut BitReader) -> BitResult<()> {
    if r.read_u16(16)? != SYNC_WORD {
        return Err(BitstreamError::NoSync);
    }
    Ok(())
}

fn need_frame(buf: &[u8], frame_size: usize) -> BitResult<()> {
    if buf.len() < frame_size {
        return Err(BitstreamError::Truncated {
            needed: frame_size * 8,
            available: buf.len() * 8,
        });
    }
    Ok(())
}

fn read_audprod(r: &mut BitReader) -> BitResult<Option<AudioProduction>> {
    if !r.read_bool()? {
        return Ok(None);
    }
    Ok(Some(AudioProduction {
        mixlevel: r.read_u8(5)?,
        roomtyp: r.read_u8(2)?,
    }))
}

fn read_opt_u8(r: &mut BitReader, bits: u32) -> BitResult<Option<u8>> {
    let present = r.read_bool()?;
    Ok(r.read_if(present, bits)?.map(|v| v as u8))
}

/// Decode one AC-3 sync frame. Returns the record and the frame length.
pub fn decode_ac3(buf: &[u8]) -> BitResult<(Ac3Frame, usize)> {
    let mut r = BitReader::new(buf);
    read_sync(&mut r)?;
    r.skip(16)?; // crc1
    let fscod = r.read_u8(2)?;
    let frmsizecod = r.read_u8(6)?;
    if fscod == 3 {
        return Err(BitstreamError::Reserved("fscod"));
    }
    let size = frame_size(fscod, frmsizecod).ok_or(BitstreamError::Reserved("frmsizecod"))?;
    need_frame(buf, size)?;

    let bsid = r.read_u8(5)?;
    if bsid > 10 {
        return Err(BitstreamError::Reserved("bsid"));
    }
    let bsmod = r.read_u8(3)?;
    let acmod = r.read_u8(3)?;
    // carried by every mode with three front channels (3/0, 3/1, 3/2)
    let cmixlev = r.read_if(acmod & 1 != 0 && acmod != 1, 2)?.map(|v| v as u8);
    // a surround channel
    let surmixlev = r.read_if(acmod & 4 != 0, 2)?.map(|v| v as u8);
    let dsurmod = r.read_if(acmod == 2, 2)?.map(|v| v as u8);
    let lfeon = r.read_bool()?;
    let dialnorm = r.read_u8(5)?;
    let compr = read_opt_u8(&mut r, 8)?;
    let langcod = read_opt_u8(&mut r, 8)?;
    let audprod = read_audprod(&mut r)?;

    let (mut dialnorm2, mut compr2, mut langcod2, mut audprod2) = (None, None, None, None);
    if acmod == 0 {
        dialnorm2 = Some(r.read_u8(5)?);
        compr2 = read_opt_u8(&mut r, 8)?;
        langcod2 = read_opt_u8(&mut r, 8)?;
        audprod2 = read_audprod(&mut r)?;
    }
    let copyright = r.read_bool()?;
    let original = r.read_bool()?;

    let (mut xbsi1, mut xbsi2, mut timecod1, mut timecod2) = (None, None, None, None);
    if bsid == 6 {
        if r.read_bool()? {
            xbsi1 = Some(Xbsi1 {
                dmixmod: r.read_u8(2)?,
                ltrtcmixlev: r.read_u8(3)?,
                ltrtsurmixlev: r.read_u8(3)?,
                lorocmixlev: r.read_u8(3)?,
                lorosurmixlev: r.read_u8(3)?,
            });
        }
        if r.read_bool()? {
            xbsi2 = Some(Xbsi2 {
                dsurexmod: r.read_u8(2)?,
                dheadphonmod: r.read_u8(2)?,
                adconvtyp: r.read_u8(1)?,
                xbsi2: r.read_u8(8)?,
                encinfo: r.read_u8(1)?,
            });
        }
    } else {
        timecod1 = read_opt_u8_wide(&mut r)?;
        timecod2 = read_opt_u8_wide(&mut r)?;
    }
    if r.read_bool()? {
        let addbsil = r.read_bits(6)? as usize;
        r.skip((addbsil + 1) * 8)?;
    }

    // bsid 9 and 10 are the half and quarter rate variants
    let shift = bsid.saturating_sub(8) as u32;
    let frame = Ac3Frame {
        fscod,
        frmsizecod,
        frame_size: size,
        sample_rate: SAMPLE_RATES[fscod as usize] >> shift,
        bitrate_kbps: BITRATE_KBPS[(frmsizecod / 2) as usize] >> shift,
        bsid,
        bsmod,
        acmod,
        cmixlev,
        surmixlev,
        dsurmod,
        lfeon,
        dialnorm,
        compr,
        langcod,
        audprod,
        dialnorm2,
        compr2,
        langcod2,
        audprod2,
        copyright,
        original,
        xbsi1,
        xbsi2,
        timecod1,
        timecod2,
    };
    Ok((frame, size))
}

fn read_opt_u8_wide(r: &mut BitReader) -> BitResult<Option<u16>> {
    let present = r.read_bool()?;
    Ok(r.read_if(present, 14)?.map(|v| v as u16))
}

/// Decode one E-AC-3 sync frame header.
pub fn decode_eac3(buf: &[u8]) -> BitResult<(Eac3Frame, usize)> {
    let mut r = BitReader::new(buf);
    read_sync(&mut r)?;
    let strmtyp = r.read_u8(2)?;
    if strmtyp == 3 {
        return Err(BitstreamError::Reserved("strmtyp"));
    }
    let substreamid = r.read_u8(3)?;
    let frmsiz = r.read_u16(11)?;
    let size = (frmsiz as usize + 1) * 2;
    need_frame(buf, size)?;

    let fscod = r.read_u8(2)?;
    let (fscod2, numblkscod, blocks, sample_rate) = if fscod == 3 {
        let fscod2 = r.read_u8(2)?;
        let rate = *REDUCED_SAMPLE_RATES
            .get(fscod2 as usize)
            .ok_or(BitstreamError::Reserved("fscod2"))?;
        (Some(fscod2), None, 6, rate)
    } else {
        let code = r.read_u8(2)?;
        (None, Some(code), EAC3_BLOCKS[code as usize], SAMPLE_RATES[fscod as usize])
    };
    let acmod = r.read_u8(3)?;
    let lfeon = r.read_bool()?;
    let bsid = r.read_u8(5)?;
    if !(11..=16).contains(&bsid) {
        return Err(BitstreamError::Reserved("bsid"));
    }
    let dialnorm = r.read_u8(5)?;
    let compr = read_opt_u8(&mut r, 8)?;
    let (mut dialnorm2, mut compr2) = (None, None);
    if acmod == 0 {
        dialnorm2 = Some(r.read_u8(5)?);
        compr2 = read_opt_u8(&mut r, 8)?;
    }
    let chanmap = if strmtyp == 1 {
        let present = r.read_bool()?;
        r.read_if(present, 16)?.map(|v| v as u16)
    } else {
        None
    };

    let frame = Eac3Frame {
        strmtyp,
        substreamid,
        frmsiz,
        frame_size: size,
        fscod,
        fscod2,
        numblkscod,
        blocks,
        sample_rate,
        acmod,
        lfeon,
        bsid,
        dialnorm,
        compr,
        dialnorm2,
        compr2,
        chanmap,
    };
    Ok((frame, size))
}

/// Dispatch on bsid: up to 10 is AC-3, 11-16 is E-AC-3.
pub fn decode_sync_frame(buf: &[u8]) -> BitResult<(SyncFrame, usize)> {
    if buf.len() < 6 {
        return Err(BitstreamError::Truncated {
            needed: 48,
            available: buf.len() * 8,
        });
    }
    if u16::from_be_bytes([buf[0], buf[1]]) != SYNC_WORD {
        return Err(BitstreamError::NoSync);
    }
    match buf[5] >> 3 {
        0..=10 => decode_ac3(buf).map(|(f, n)| (SyncFrame::Ac3(f), n)),
        11..=16 => decode_eac3(buf).map(|(f, n)| (SyncFrame::Eac3(f), n)),
        _ => Err(BitstreamError::Reserved("bsid")),
    }
}

// ============================================================================
// Frame runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// The payload must hold exactly one frame.
    Strict,
    /// Decode back-to-back frames until the payload is exhausted.
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRun {
    pub first: SyncFrame,
    pub frames: usize,
    pub consumed: usize,
    pub dialnorm_min: u8,
    pub dialnorm_max: u8,
}

pub fn decode_frames(buf: &[u8], mode: FrameMode) -> BitResult<FrameRun> {
    let (first, size) = decode_sync_frame(buf)?;
    if mode == FrameMode::Strict {
        if size != buf.len() {
            return Err(BitstreamError::MultipleFrames(buf.len() - size));
        }
        let dialnorm = first.dialnorm();
        return Ok(FrameRun {
            first,
            frames: 1,
            consumed: size,
            dialnorm_min: dialnorm,
            dialnorm_max: dialnorm,
        });
    }

    let mut run = FrameRun {
        dialnorm_min: first.dialnorm(),
        dialnorm_max: first.dialnorm(),
        first,
        frames: 1,
        consumed: size,
    };
    while run.consumed < buf.len() {
        match decode_sync_frame(&buf[run.consumed..]) {
            Ok((frame, size)) => {
                run.frames += 1;
                run.consumed += size;
                run.dialnorm_min = run.dialnorm_min.min(frame.dialnorm());
                run.dialnorm_max = run.dialnorm_max.max(frame.dialnorm());
            }
            Err(err) => {
                tracing::debug!("ac3 run stopped after {} frames: {}", run.frames, err);
                break;
            }
        }
    }
    Ok(run)
}

// ============================================================================
// Running probe
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Ac3Probe {
    carry: Vec<u8>,
    pub first: Option<SyncFrame>,
    pub frames: u64,
    pub dialnorm_min: Option<u8>,
    pub dialnorm_max: Option<u8>,
    /// Dependent E-AC-3 substreams seen.
    pub dependent_frames: u64,
    pub skipped_bytes: u64,
}

impl Ac3Probe {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, frame: SyncFrame, count: u64, min: u8, max: u8) {
        if let SyncFrame::Eac3(f) = &frame {
            if f.strmtyp == 1 {
                self.dependent_frames += count;
            }
        }
        self.frames += count;
        self.dialnorm_min = Some(self.dialnorm_min.map_or(min, |m| m.min(min)));
        self.dialnorm_max = Some(self.dialnorm_max.map_or(max, |m| m.max(max)));
        if self.first.is_none() {
            self.first = Some(frame);
        }
    }

    /// Feed a payload whose framing is known (one Matroska frame, one sample).
    pub fn feed_packet(&mut self, packet: &[u8], mode: FrameMode) -> BitResult<usize> {
        let run = decode_frames(packet, mode)?;
        let frames = run.frames;
        self.record(run.first, run.frames as u64, run.dialnorm_min, run.dialnorm_max);
        Ok(frames)
    }

    /// Feed an arbitrary slice of the elementary stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        let mut pos = 0usize;
        while pos + 6 <= self.carry.len() {
            if self.carry[pos] != 0x0B || self.carry[pos + 1] != 0x77 {
                pos += 1;
                self.skipped_bytes += 1;
                continue;
            }
            match decode_sync_frame(&self.carry[pos..]) {
                Ok((frame, size)) => {
                    let dialnorm = frame.dialnorm();
                    self.record(frame, 1, dialnorm, dialnorm);
                    pos += size;
                }
                Err(BitstreamError::Truncated { .. }) => break,
                Err(_) => {
                    pos += 1;
                    self.skipped_bytes += 1;
                }
            }
        }
        self.carry.drain(..pos);
        if self.carry.len() > MAX_CARRY {
            tracing::warn!("ac3 carry over {} bytes, dropping", MAX_CARRY);
            self.carry.clear();
        }
    }

    pub fn is_detected(&self) -> bool {
        self.first.is_some()
    }

    /// Append decoded fields to `stream`.
    pub fn describe(&self, stream: &mut Stream) {
        let Some(first) = &self.first else {
            return;
        };
        describe_frame(first, stream);
        if let (Some(min), Some(max)) = (self.dialnorm_min, self.dialnorm_max) {
            if min != max {
                stream.push_both("dialnorm_Minimum", format!("{} dB", dialnorm_db(max)), dialnorm_db(max));
                stream.push_both("dialnorm_Maximum", format!("{} dB", dialnorm_db(min)), dialnorm_db(min));
            }
        }
    }
}

pub fn describe_frame(frame: &SyncFrame, stream: &mut Stream) {
    let acmod = frame.acmod();
    let channels = frame.channels() as u32;
    match frame {
        SyncFrame::Ac3(f) => {
            stream.push("Format", "AC-3");
            stream.push("Commercial name", "Dolby Digital");
            stream.push_both("Bit rate mode", "Constant", "CBR");
            stream.push_both("Bit rate", display::bitrate(frame.bitrate() as u64), frame.bitrate());
            stream.push_both("bsid", f.bsid.to_string(), f.bsid);
            stream.push("Service kind", service_kind(f.bsmod, acmod));
            if let Some(cmix) = f.cmixlev {
                stream.push("cmixlev", ["-3.0 dB", "-4.5 dB", "-6.0 dB", "Reserved"][cmix as usize & 3]);
            }
            if let Some(surmix) = f.surmixlev {
                stream.push("surmixlev", ["-3 dB", "-6 dB", "-inf dB", "Reserved"][surmix as usize & 3]);
            }
            if let Some(dsur) = f.dsurmod {
                stream.push(
                    "dsurmod",
                    ["Not indicated", "Not Dolby Surround", "Dolby Surround", "Reserved"][dsur as usize & 3],
                );
            }
            if let Some(prod) = f.audprod {
                stream.push("mixlevel", format!("{} dB", prod.mixlevel as u32 + 80));
                stream.push("roomtyp", ["Not indicated", "Large", "Small", "Reserved"][prod.roomtyp as usize & 3]);
            }
            if let Some(compr) = f.compr {
                stream.push_both("compr", format!("{:.2} dB", compr_db(compr)), compr);
            }
            if let Some(x) = f.xbsi1 {
                stream.push_both("dmixmod", x.dmixmod.to_string(), x.dmixmod);
            }
        }
        SyncFrame::Eac3(f) => {
            stream.push("Format", "E-AC-3");
            stream.push("Commercial name", "Dolby Digital Plus");
            stream.push_both("Bit rate mode", "Constant", "CBR");
            stream.push_both("Bit rate", display::bitrate(frame.bitrate() as u64), frame.bitrate());
            stream.push_both("bsid", f.bsid.to_string(), f.bsid);
            if let Some(compr) = f.compr {
                stream.push_both("compr", format!("{:.2} dB", compr_db(compr)), compr);
            }
            if let Some(map) = f.chanmap {
                stream.push("chanmap", format!("0x{:04X}", map));
            }
        }
    }
    stream.push_both("Channel(s)", display::channels(channels), channels);
    stream.push("Channel positions", channel_positions(acmod, frame.lfeon()));
    stream.push_both("Sampling rate", display::sample_rate(frame.sample_rate()), frame.sample_rate());
    let fps_den = match frame {
        SyncFrame::Ac3(_) => SAMPLES_PER_FRAME,
        SyncFrame::Eac3(f) => f.blocks as u32 * 256,
    };
    stream.push(
        "Frame rate",
        format!("{:.3} FPS ({} SPF)", frame.sample_rate() as f64 / fps_den as f64, fps_den),
    );
    stream.push("Compression mode", "Lossy");
    let db = dialnorm_db(frame.dialnorm());
    stream.push_both("Dialog Normalization", format!("{} dB", db), db);
}

/// Compression gain word to dB (A/52 7.7.1.1).
fn compr_db(compr: u8) -> f64 {
    let x = ((compr >> 4) as i8) << 4 >> 4;
    let y = (compr & 0x0F) as f64;
    20.0 * ((x as f64 + 1.0) * (2f64).log10()) + 20.0 * ((16.0 + y) / 32.0).log10()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::bits::BitWriter;

    /// AC-3 frame at 48 kHz, 32 kb/s (128 bytes).
    pub(crate) fn ac3_frame(bsid: u64, acmod: u64, dialnorm: u64, compr: Option<u8>) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(16, 0x0B77).put(16, 0).put(2, 0).put(6, 0);
        w.put(5, bsid).put(3, 0).put(3, acmod);
        if acmod & 1 != 0 && acmod != 1 {
            w.put(2, 1);
        }
        if acmod & 4 != 0 {
            w.put(2, 2);
        }
        if acmod == 2 {
            w.put(2, 2);
        }
        w.put(1, 1).put(5, dialnorm);
        match compr {
            Some(c) => w.put(1, 1).put(8, c as u64),
            None => w.put(1, 0),
        };
        w.put(1, 0).put(1, 0); // langcode, audprodie
        if acmod == 0 {
            w.put(5, dialnorm).put(1, 0).put(1, 0).put(1, 0);
        }
        w.put(1, 1).put(1, 1); // copyrightb, origbs
        w.put(1, 0).put(1, 0).put(1, 0);
        w.finish_padded(128)
    }

    /// E-AC-3 independent frame, 48 kHz, 6 blocks, stereo.
    pub(crate) fn eac3_frame(dialnorm: u64, bytes: usize) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(16, 0x0B77).put(2, 0).put(3, 0).put(11, (bytes / 2 - 1) as u64);
        w.put(2, 0).put(2, 3).put(3, 2).put(1, 0).put(5, 16).put(5, dialnorm).put(1, 0);
        w.finish_padded(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::bits::BitWriter;
    use crate::media::StreamKind;

    #[test]
    fn frame_size_table() {
        assert_eq!(frame_size(0, 0), Some(128));
        assert_eq!(frame_size(1, 0), Some(138));
        assert_eq!(frame_size(1, 1), Some(140));
        assert_eq!(frame_size(2, 37), Some(3840));
        assert_eq!(frame_size(0, 30), Some(1792));
        assert_eq!(frame_size(0, 38), None);
        assert_eq!(frame_size(3, 0), None);
    }

    #[test]
    fn mono_has_no_cmixlev() {
        let buf = ac3_frame(8, 1, 27, Some(0xA5));
        let (f, size) = decode_ac3(&buf).unwrap();
        assert_eq!(size, 128);
        assert_eq!(f.acmod, 1);
        assert_eq!(f.cmixlev, None);
        assert_eq!(f.surmixlev, None);
        assert_eq!(f.dsurmod, None);
        // fields after the gated ones stay aligned
        assert!(f.lfeon);
        assert_eq!(f.dialnorm, 27);
        assert_eq!(f.compr, Some(0xA5));
        assert!(f.copyright && f.original);
    }

    #[test]
    fn three_front_channels_have_cmixlev() {
        for acmod in [3u64, 5, 7] {
            let buf = ac3_frame(8, acmod, 31, None);
            let (f, _) = decode_ac3(&buf).unwrap();
            assert_eq!(f.cmixlev, Some(1), "acmod {}", acmod);
            assert_eq!(f.dialnorm, 31);
            assert_eq!(f.compr, None);
        }
        let (f, _) = decode_ac3(&ac3_frame(8, 7, 20, None)).unwrap();
        assert_eq!(f.surmixlev, Some(2));
        let (f, _) = decode_ac3(&ac3_frame(8, 2, 20, None)).unwrap();
        assert_eq!((f.cmixlev, f.surmixlev, f.dsurmod), (None, None, Some(2)));
        assert_eq!(f.dialnorm, 20);
    }

    #[test]
    fn dual_mono_second_channel_fields() {
        let (f, _) = decode_ac3(&ac3_frame(8, 0, 12, None)).unwrap();
        assert_eq!(f.dialnorm2, Some(12));
        assert!(f.copyright);
    }

    #[test]
    fn bsid6_alternate_bsi() {
        let mut w = BitWriter::new();
        w.put(16, 0x0B77).put(16, 0).put(2, 0).put(6, 0);
        w.put(5, 6).put(3, 0).put(3, 2).put(2, 0).put(1, 0).put(5, 24);
        w.put(1, 0).put(1, 0).put(1, 0).put(1, 0).put(1, 1);
        w.put(1, 1).put(2, 2).put(3, 1).put(3, 2).put(3, 3).put(3, 4);
        w.put(1, 0).put(1, 0);
        let (f, _) = decode_ac3(&w.finish_padded(128)).unwrap();
        let x = f.xbsi1.unwrap();
        assert_eq!((x.dmixmod, x.ltrtcmixlev, x.lorosurmixlev), (2, 1, 4));
        assert_eq!(f.xbsi2, None);
        assert_eq!(f.timecod1, None);
        assert!(f.original);
    }

    #[test]
    fn rejects_reserved_and_short() {
        let mut buf = ac3_frame(8, 2, 1, None);
        assert!(matches!(decode_ac3(&buf[..100]), Err(BitstreamError::Truncated { .. })));
        buf[4] = 0xC0;
        assert_eq!(decode_ac3(&buf).unwrap_err(), BitstreamError::Reserved("fscod"));
        assert_eq!(decode_ac3(&[0u8; 128]).unwrap_err(), BitstreamError::NoSync);
    }

    #[test]
    fn eac3_two_frames() {
        let mut buf = eac3_frame(20, 128);
        buf.extend(eac3_frame(24, 128));
        let run = decode_frames(&buf, FrameMode::Repeated).unwrap();
        assert_eq!(run.frames, 2);
        assert_eq!(run.consumed, 256);
        assert_eq!((run.dialnorm_min, run.dialnorm_max), (20, 24));
        assert_eq!(
            decode_frames(&buf, FrameMode::Strict).unwrap_err(),
            BitstreamError::MultipleFrames(128)
        );
        let single = decode_frames(&buf[..128], FrameMode::Strict).unwrap();
        assert_eq!(single.frames, 1);
    }

    #[test]
    fn eac3_header_fields() {
        let (f, size) = decode_eac3(&eac3_frame(18, 256)).unwrap();
        assert_eq!(size, 256);
        assert_eq!(f.blocks, 6);
        assert_eq!(f.sample_rate, 48000);
        assert_eq!(f.bsid, 16);
        assert_eq!(f.bitrate(), 256 * 8 * 48000 / 1536);
        assert_eq!(f.chanmap, None);
    }

    #[test]
    fn probe_across_split_chunks() {
        let mut es = ac3_frame(8, 7, 27, None);
        es.extend(ac3_frame(8, 7, 30, None));
        es.extend(ac3_frame(8, 7, 27, None));
        let mut probe = Ac3Probe::new();
        for chunk in es.chunks(50) {
            probe.feed(chunk);
        }
        assert_eq!(probe.frames, 3);
        assert_eq!((probe.dialnorm_min, probe.dialnorm_max), (Some(27), Some(30)));
        let mut stream = Stream::new(StreamKind::Audio);
        probe.describe(&mut stream);
        assert_eq!(stream.get("Format"), Some("AC-3"));
        assert_eq!(stream.get("Channel(s)"), Some("6 channels"));
        assert_eq!(stream.get("Channel positions"), Some("Front: L C R, Side: L R, LFE"));
        assert_eq!(stream.key("dialnorm_minimum"), Some("-30"));
    }
}
