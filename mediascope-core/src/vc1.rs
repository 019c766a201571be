// VC-1 - Advanced profile sequence header (SMPTE 421M Annex-B streams)
//
// Emulation prevention bytes are removed before decoding. The display
// extension carries three independently flagged sub-blocks (aspect ratio,
// frame rate, colour), each read only when its flag is set.

use serde::Serialize;

use crate::bits::{unescape_rbsp, BitReader, BitResult, BitstreamError, UnitSplitter};
use crate::display;
use crate::mpeg2::aspect_string;
use crate::report::Stream;

pub const SEQUENCE_HEADER: u8 = 0x0F;
pub const ENTRY_POINT: u8 = 0x0E;
pub const FRAME_START: u8 = 0x0D;
pub const FIELD_START: u8 = 0x0C;

const ADVANCED_PROFILE: u8 = 3;

// Sample aspect ratios for ASPECT_RATIO 1-13
const ASPECT_RATIOS: [(u8, u8); 13] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
];

const FRAME_RATE_NR: [u32; 7] = [24000, 25000, 30000, 50000, 60000, 48000, 72000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vc1FrameRate {
    /// FRAMERATENR / FRAMERATEDR codes.
    Coded { nr: u8, dr: u8 },
    /// FRAMERATEEXP: (value + 1) / 32 fps.
    Explicit(u16),
}

impl Vc1FrameRate {
    pub fn as_ratio(&self) -> Option<(u32, u32)> {
        match *self {
            Vc1FrameRate::Coded { nr, dr } => {
                let num = *FRAME_RATE_NR.get((nr as usize).checked_sub(1)?)?;
                let den = match dr {
                    1 => 1000,
                    2 => 1001,
                    _ => return None,
                };
                Some((num, den))
            }
            Vc1FrameRate::Explicit(exp) => Some((exp as u32 + 1, 32)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vc1Colour {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayInfo {
    pub width: u16,
    pub height: u16,
    /// ASPECT_RATIO code, with explicit (h, v) when the code is 15.
    pub aspect_ratio: Option<(u8, Option<(u8, u8)>)>,
    pub frame_rate: Option<Vc1FrameRate>,
    pub colour: Option<Vc1Colour>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeakyBucket {
    pub rate: u16,
    pub buffer: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HrdParams {
    pub bit_rate_exponent: u8,
    pub buffer_size_exponent: u8,
    pub buckets: Vec<LeakyBucket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vc1SequenceHeader {
    pub profile: u8,
    pub level: u8,
    pub colordiff_format: u8,
    pub frmrtq_postproc: u8,
    pub bitrtq_postproc: u8,
    pub postproc: bool,
    pub coded_width: u32,
    pub coded_height: u32,
    pub pulldown: bool,
    pub interlace: bool,
    pub tfcntr: bool,
    pub finterp: bool,
    pub psf: bool,
    pub display: Option<DisplayInfo>,
    pub hrd: Option<HrdParams>,
}

impl Vc1SequenceHeader {
    /// Sample aspect ratio as (h, v).
    pub fn sample_aspect(&self) -> Option<(u8, u8)> {
        match self.display.as_ref()?.aspect_ratio? {
            (15, explicit) => explicit,
            (code, _) => ASPECT_RATIOS.get((code as usize).checked_sub(1)?).copied(),
        }
    }

    pub fn display_aspect(&self) -> Option<f64> {
        let (h, v) = self.sample_aspect()?;
        if v == 0 || self.coded_height == 0 {
            return None;
        }
        Some(self.coded_width as f64 * h as f64 / (self.coded_height as f64 * v as f64))
    }

    pub fn frame_rate(&self) -> Option<(u32, u32)> {
        self.display.as_ref()?.frame_rate?.as_ratio()
    }
}

/// Decode a sequence header payload (bytes after `00 00 01 0F`, still escaped).
pub fn decode_sequence_header(escaped: &[u8]) -> BitResult<Vc1SequenceHeader> {
    let data = unescape_rbsp(escaped);
    let mut r = BitReader::new(&data);
    let profile = r.read_u8(2)?;
    if profile != ADVANCED_PROFILE {
        return Err(BitstreamError::Reserved("profile"));
    }
    let level = r.read_u8(3)?;
    if level > 4 {
        return Err(BitstreamError::Reserved("level"));
    }
    let colordiff_format = r.read_u8(2)?;
    let frmrtq_postproc = r.read_u8(3)?;
    let bitrtq_postproc = r.read_u8(5)?;
    let postproc = r.read_bool()?;
    let coded_width = (r.read_bits(12)? + 1) * 2;
    let coded_height = (r.read_bits(12)? + 1) * 2;
    let pulldown = r.read_bool()?;
    let interlace = r.read_bool()?;
    let tfcntr = r.read_bool()?;
    let finterp = r.read_bool()?;
    r.skip(1)?; // reserved
    let psf = r.read_bool()?;

    let display = if r.read_bool()? {
        Some(read_display(&mut r)?)
    } else {
        None
    };
    let hrd = if r.read_bool()? {
        Some(read_hrd(&mut r)?)
    } else {
        None
    };

    Ok(Vc1SequenceHeader {
        profile,
        level,
        colordiff_format,
        frmrtq_postproc,
        bitrtq_postproc,
        postproc,
        coded_width,
        coded_height,
        pulldown,
        interlace,
        tfcntr,
        finterp,
        psf,
        display,
        hrd,
    })
}

fn read_display(r: &mut BitReader) -> BitResult<DisplayInfo> {
    let width = r.read_u16(14)? + 1;
    let height = r.read_u16(14)? + 1;
    let aspect_ratio = if r.read_bool()? {
        let code = r.read_u8(4)?;
        let explicit = if code == 15 {
            Some((r.read_u8(8)?, r.read_u8(8)?))
        } else {
            None
        };
        Some((code, explicit))
    } else {
        None
    };
    let frame_rate = if r.read_bool()? {
        if r.read_bool()? {
            Some(Vc1FrameRate::Explicit(r.read_u16(16)?))
        } else {
            Some(Vc1FrameRate::Coded {
                nr: r.read_u8(8)?,
                dr: r.read_u8(4)?,
            })
        }
    } else {
        None
    };
    let colour = if r.read_bool()? {
        Some(Vc1Colour {
            primaries: r.read_u8(8)?,
            transfer: r.read_u8(8)?,
            matrix: r.read_u8(8)?,
        })
    } else {
        None
    };
    Ok(DisplayInfo {
        width,
        height,
        aspect_ratio,
        frame_rate,
        colour,
    })
}

fn read_hrd(r: &mut BitReader) -> BitResult<HrdParams> {
    let count = r.read_u8(5)? as usize;
    let bit_rate_exponent = r.read_u8(4)?;
    let buffer_size_exponent = r.read_u8(4)?;
    // at most 31 buckets, bounded by the field width
    let mut buckets = Vec::with_capacity(count);
    for _ in 0..count {
        buckets.push(LeakyBucket {
            rate: r.read_u16(16)?,
            buffer: r.read_u16(16)?,
        });
    }
    Ok(HrdParams {
        bit_rate_exponent,
        buffer_size_exponent,
        buckets,
    })
}

// ============================================================================
// Running probe
// ============================================================================

#[derive(Debug, Default)]
pub struct Vc1Probe {
    splitter: UnitSplitter,
    pub sequence: Option<Vc1SequenceHeader>,
    pub entry_points: u64,
    pub frames: u64,
    pub fields: u64,
}

impl Vc1Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.feed(chunk, |code, data| self.unit(code, data));
        self.splitter = splitter;
    }

    pub fn flush(&mut self) {
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.flush(|code, data| self.unit(code, data));
        self.splitter = splitter;
    }

    fn unit(&mut self, code: u8, data: &[u8]) {
        match code {
            SEQUENCE_HEADER if self.sequence.is_none() => match decode_sequence_header(data) {
                Ok(seq) => self.sequence = Some(seq),
                Err(err) => tracing::debug!("bad vc-1 sequence header: {}", err),
            },
            ENTRY_POINT => self.entry_points += 1,
            FRAME_START => self.frames += 1,
            FIELD_START => self.fields += 1,
            _ => {}
        }
    }

    pub fn is_detected(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn describe(&self, stream: &mut Stream) {
        let Some(seq) = &self.sequence else {
            return;
        };
        stream.push("Format", "VC-1");
        stream.push("Format profile", format!("Advanced@L{}", seq.level));
        stream.push_both("Width", display::pixels(seq.coded_width), seq.coded_width);
        stream.push_both("Height", display::pixels(seq.coded_height), seq.coded_height);
        if let Some(dar) = seq.display_aspect() {
            stream.push_both("Display aspect ratio", aspect_string(dar), format!("{:.3}", dar));
        }
        if let Some((num, den)) = seq.frame_rate() {
            stream.push_both("Frame rate", display::frame_rate(num, den), format!("{:.3}", num as f64 / den as f64));
        }
        stream.push("Chroma subsampling", if seq.colordiff_format == 1 { "4:2:0" } else { "Reserved" });
        stream.push("Scan type", if seq.interlace { "Interlaced" } else { "Progressive" });
        if seq.pulldown {
            stream.push("Pulldown", "Yes");
        }
        if let Some(hrd) = &seq.hrd {
            if let Some(bucket) = hrd.buckets.first() {
                let rate = (bucket.rate as u64 + 1) << (hrd.bit_rate_exponent as u32 + 6);
                stream.push_both("Maximum bit rate", display::bitrate(rate), rate);
            }
        }
        stream.push("Compression mode", "Lossy");
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::bits::BitWriter;

    /// 1920x1080 advanced profile header with display extension and one HRD bucket.
    pub(crate) fn sequence_header() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bytes(&[0, 0, 1, 0x0F]);
        w.put(2, 3).put(3, 3).put(2, 1).put(3, 7).put(5, 31).put(1, 0);
        w.put(12, 959).put(12, 539);
        w.put(1, 1).put(1, 1).put(1, 0).put(1, 0).put(1, 1).put(1, 0);
        w.put(1, 1); // display_ext
        w.put(14, 1919).put(14, 1079);
        w.put(1, 1).put(4, 1);
        w.put(1, 1).put(1, 0).put(8, 2).put(4, 2);
        w.put(1, 0);
        w.put(1, 1); // hrd
        w.put(5, 1).put(4, 3).put(4, 4).put(16, 31_249).put(16, 2000);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;
    use crate::media::StreamKind;

    #[test]
    fn decodes_full_header() {
        let unit = fixtures::sequence_header();
        let seq = decode_sequence_header(&unit[4..]).unwrap();
        assert_eq!(seq.level, 3);
        assert_eq!((seq.coded_width, seq.coded_height), (1920, 1080));
        assert!(seq.pulldown && seq.interlace && !seq.tfcntr);
        let display = seq.display.as_ref().unwrap();
        assert_eq!((display.width, display.height), (1920, 1080));
        assert_eq!(display.aspect_ratio, Some((1, None)));
        assert_eq!(display.colour, None);
        assert_eq!(seq.frame_rate(), Some((25000, 1001)));
        let hrd = seq.hrd.as_ref().unwrap();
        assert_eq!(hrd.buckets, vec![LeakyBucket { rate: 31_249, buffer: 2000 }]);
    }

    #[test]
    fn flags_gate_sub_blocks() {
        let mut w = BitWriter::new();
        w.put(2, 3).put(3, 1).put(2, 1).put(3, 0).put(5, 0).put(1, 0);
        w.put(12, 359).put(12, 239);
        w.put(6, 0);
        w.put(1, 1).put(14, 719).put(14, 479);
        w.put(1, 1).put(4, 15).put(8, 10).put(8, 11);
        w.put(1, 1).put(1, 1).put(16, 959);
        w.put(1, 1).put(8, 1).put(8, 1).put(8, 1);
        w.put(1, 0);
        let seq = decode_sequence_header(&w.finish()).unwrap();
        assert_eq!(seq.sample_aspect(), Some((10, 11)));
        assert_eq!(seq.frame_rate(), Some((960, 32)));
        assert_eq!(seq.display.unwrap().colour.unwrap().matrix, 1);
        assert_eq!(seq.hrd, None);
    }

    #[test]
    fn rejects_simple_profile_and_truncation() {
        assert_eq!(decode_sequence_header(&[0x00, 0x00]).unwrap_err(), BitstreamError::Reserved("profile"));
        let unit = fixtures::sequence_header();
        assert!(matches!(decode_sequence_header(&unit[4..9]), Err(BitstreamError::Truncated { .. })));
    }

    #[test]
    fn probe_counts_units() {
        let mut es = fixtures::sequence_header();
        es.extend([0, 0, 1, ENTRY_POINT, 0x55]);
        for _ in 0..3 {
            es.extend([0, 0, 1, FRAME_START, 0x77, 0x77]);
        }
        let mut probe = Vc1Probe::new();
        for chunk in es.chunks(5) {
            probe.feed(chunk);
        }
        probe.flush();
        assert!(probe.is_detected());
        assert_eq!(probe.frames, 3);
        let mut s = Stream::new(StreamKind::Video);
        probe.describe(&mut s);
        assert_eq!(s.get("Format profile"), Some("Advanced@L3"));
        assert_eq!(s.get("Scan type"), Some("Interlaced"));
        assert_eq!(s.get("Display aspect ratio"), Some("16:9"));
    }
}
