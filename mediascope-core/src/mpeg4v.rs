// MPEG-4 VISUAL - VOP scanner for AVI DivX/Xvid streams
//
// Stateful scanner with a single feed(chunk) operation. Only the first
// bytes of each start-code unit are kept, and the whole scan stops after
// MAX_VOP_SCAN bytes.

use serde::Serialize;

use crate::bits::{BitReader, BitResult, BitstreamError, UnitSplitter};
use crate::display;
use crate::mpeg2::aspect_string;
use crate::report::Stream;

/// Total bytes fed before the scanner stops looking.
pub const MAX_VOP_SCAN: usize = 1024 * 1024;

/// Bytes of a unit needed for any header we decode.
const UNIT_HEAD: usize = 256;

pub const VOS_START: u8 = 0xB0;
pub const USER_DATA: u8 = 0xB2;
pub const VOP_START: u8 = 0xB6;

const SHAPE_RECTANGULAR: u8 = 0;
const SHAPE_BINARY_ONLY: u8 = 2;
const SHAPE_GRAYSCALE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolHeader {
    pub object_type: u8,
    pub verid: Option<u8>,
    pub aspect_ratio_info: u8,
    pub par: Option<(u8, u8)>,
    pub chroma_format: Option<u8>,
    pub low_delay: Option<bool>,
    pub shape: u8,
    pub time_increment_resolution: u16,
    pub fixed_vop_time_increment: Option<u16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub interlaced: Option<bool>,
}

impl VolHeader {
    pub fn pixel_aspect(&self) -> Option<(u8, u8)> {
        match self.aspect_ratio_info {
            1 => Some((1, 1)),
            2 => Some((12, 11)),
            3 => Some((10, 11)),
            4 => Some((16, 11)),
            5 => Some((40, 33)),
            15 => self.par,
            _ => None,
        }
    }
}

/// Decode a video object layer header (bytes after `00 00 01 2x`).
pub fn decode_vol(buf: &[u8]) -> BitResult<VolHeader> {
    let mut r = BitReader::new(buf);
    r.skip(1)?; // random_accessible_vol
    let object_type = r.read_u8(8)?;
    let verid = if r.read_bool()? {
        let verid = r.read_u8(4)?;
        r.skip(3)?;
        Some(verid)
    } else {
        None
    };
    let aspect_ratio_info = r.read_u8(4)?;
    if aspect_ratio_info == 0 {
        return Err(BitstreamError::Reserved("aspect_ratio_info"));
    }
    let par = if aspect_ratio_info == 15 {
        Some((r.read_u8(8)?, r.read_u8(8)?))
    } else {
        None
    };
    let (mut chroma_format, mut low_delay) = (None, None);
    if r.read_bool()? {
        chroma_format = Some(r.read_u8(2)?);
        low_delay = Some(r.read_bool()?);
        if r.read_bool()? {
            r.skip(79)?; // vbv_parameters
        }
    }
    let shape = r.read_u8(2)?;
    if shape == SHAPE_GRAYSCALE && verid.is_some_and(|v| v != 1) {
        r.skip(4)?;
    }
    r.marker("vop_time_increment_resolution")?;
    let time_increment_resolution = r.read_u16(16)?;
    if time_increment_resolution == 0 {
        return Err(BitstreamError::Reserved("vop_time_increment_resolution"));
    }
    r.marker("vop_time_increment_resolution")?;
    let fixed_vop_time_increment = if r.read_bool()? {
        let bits = (16 - (time_increment_resolution - 1).leading_zeros()).max(1);
        Some(r.read_u16(bits)?)
    } else {
        None
    };

    let (mut width, mut height, mut interlaced) = (None, None, None);
    if shape != SHAPE_BINARY_ONLY {
        if shape == SHAPE_RECTANGULAR {
            r.marker("video_object_layer_width")?;
            width = Some(r.read_u16(13)?);
            r.marker("video_object_layer_width")?;
            height = Some(r.read_u16(13)?);
            r.marker("video_object_layer_height")?;
        }
        interlaced = Some(r.read_bool()?);
    }

    Ok(VolHeader {
        object_type,
        verid,
        aspect_ratio_info,
        par,
        chroma_format,
        low_delay,
        shape,
        time_increment_resolution,
        fixed_vop_time_increment,
        width,
        height,
        interlaced,
    })
}

pub fn profile_level_name(indication: u8) -> String {
    match indication {
        0x08 => "Simple@L0".to_string(),
        0x01..=0x03 => format!("Simple@L{}", indication),
        0x04 => "Simple@L4a".to_string(),
        0x05 => "Simple@L5".to_string(),
        0x11 | 0x12 => format!("Simple Scalable@L{}", indication - 0x10),
        0x21 | 0x22 => format!("Core@L{}", indication - 0x20),
        0x32..=0x34 => format!("Main@L{}", indication - 0x30),
        0xF0..=0xF5 => format!("Advanced Simple@L{}", indication - 0xF0),
        0xF7 => "Advanced Simple@L3b".to_string(),
        _ => format!("0x{:02X}", indication),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderTag {
    pub text: String,
    /// DivX packed bitstream ("p" suffix on the build tag).
    pub packed: bool,
}

fn parse_user_data(data: &[u8]) -> Option<EncoderTag> {
    let end = data.iter().position(|&b| b == 0 || !(0x20..0x7F).contains(&b)).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).ok()?.trim();
    if text.starts_with("DivX") {
        Some(EncoderTag {
            packed: text.ends_with('p'),
            text: text.to_string(),
        })
    } else if text.starts_with("XviD") || text.starts_with("FFmpeg") || text.starts_with("Lavc") {
        Some(EncoderTag {
            text: text.to_string(),
            packed: false,
        })
    } else {
        None
    }
}

#[derive(Debug)]
pub struct VopScanner {
    splitter: UnitSplitter,
    scanned: usize,
    pub profile_level: Option<u8>,
    pub vol: Option<VolHeader>,
    /// I, P, B, S counts.
    pub vop_types: [u64; 4],
    pub encoder: Option<EncoderTag>,
}

impl Default for VopScanner {
    fn default() -> Self {
        Self {
            splitter: UnitSplitter::new(UNIT_HEAD),
            scanned: 0,
            profile_level: None,
            vol: None,
            vop_types: [0; 4],
            encoder: None,
        }
    }
}

impl VopScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once the scan budget is used up.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let take = chunk.len().min(MAX_VOP_SCAN - self.scanned);
        self.scanned += take;
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.feed(&chunk[..take], |code, data| self.unit(code, data));
        if self.is_exhausted() {
            tracing::debug!("vop scan budget of {} bytes used", MAX_VOP_SCAN);
            splitter.flush(|code, data| self.unit(code, data));
        }
        self.splitter = splitter;
        !self.is_exhausted()
    }

    pub fn flush(&mut self) {
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.flush(|code, data| self.unit(code, data));
        self.splitter = splitter;
    }

    pub fn is_exhausted(&self) -> bool {
        self.scanned >= MAX_VOP_SCAN
    }

    fn unit(&mut self, code: u8, data: &[u8]) {
        match code {
            VOS_START => {
                if let Some(&level) = data.first() {
                    self.profile_level.get_or_insert(level);
                }
            }
            0x20..=0x2F if self.vol.is_none() => match decode_vol(data) {
                Ok(vol) => self.vol = Some(vol),
                Err(err) => tracing::debug!("bad vol header: {}", err),
            },
            VOP_START => {
                if let Some(&first) = data.first() {
                    self.vop_types[(first >> 6) as usize] += 1;
                }
            }
            USER_DATA => {
                if let Some(tag) = parse_user_data(data) {
                    // a later packed tag wins over an earlier plain one
                    if self.encoder.as_ref().map_or(true, |e| !e.packed) {
                        self.encoder = Some(tag);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn vops(&self) -> u64 {
        self.vop_types.iter().sum()
    }

    pub fn is_detected(&self) -> bool {
        self.vol.is_some() || self.vops() > 0
    }

    pub fn describe(&self, stream: &mut Stream) {
        stream.push("Format", "MPEG-4 Visual");
        if let Some(level) = self.profile_level {
            stream.push("Format profile", profile_level_name(level));
        }
        stream.push("Format settings, BVOP", if self.vop_types[2] > 0 { "Yes" } else { "No" });
        if self.vop_types[3] > 0 {
            stream.push("Format settings, GMC", "Yes");
        }
        if let Some(tag) = &self.encoder {
            stream.push("Format settings, Packed bitstream", if tag.packed { "Yes" } else { "No" });
            stream.push("Writing library", tag.text.clone());
        }
        let Some(vol) = &self.vol else {
            return;
        };
        if let (Some(w), Some(h)) = (vol.width, vol.height) {
            stream.push_both("Width", display::pixels(w as u32), w);
            stream.push_both("Height", display::pixels(h as u32), h);
            if let Some((pw, ph)) = vol.pixel_aspect() {
                if h > 0 && ph > 0 {
                    let dar = w as f64 * pw as f64 / (h as f64 * ph as f64);
                    stream.push_both("Display aspect ratio", aspect_string(dar), format!("{:.3}", dar));
                }
            }
        }
        if let Some(inc) = vol.fixed_vop_time_increment.filter(|&i| i > 0) {
            stream.push_both(
                "Frame rate",
                display::frame_rate(vol.time_increment_resolution as u32, inc as u32),
                format!("{:.3}", vol.time_increment_resolution as f64 / inc as f64),
            );
        }
        if let Some(interlaced) = vol.interlaced {
            stream.push("Scan type", if interlaced { "Interlaced" } else { "Progressive" });
        }
        stream.push("Chroma subsampling", "4:2:0");
        stream.push("Compression mode", "Lossy");
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::bits::BitWriter;

    pub(crate) fn vol(width: u64, height: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bytes(&[0, 0, 1, 0x20]);
        w.put(1, 0).put(8, 1).put(1, 0).put(4, 1).put(1, 0).put(2, 0);
        w.put(1, 1).put(16, 25).put(1, 1).put(1, 1).put(5, 1);
        w.put(1, 1).put(13, width).put(1, 1).put(13, height).put(1, 1).put(1, 0);
        w.put(1, 1);
        w.finish()
    }

    pub(crate) fn vop(coding_type: u8) -> Vec<u8> {
        vec![0, 0, 1, 0xB6, coding_type << 6 | 0x10, 0x42, 0x42, 0x42]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::media::StreamKind;

    #[test]
    fn decodes_vol() {
        let unit = vol(640, 352);
        let v = decode_vol(&unit[4..]).unwrap();
        assert_eq!((v.width, v.height), (Some(640), Some(352)));
        assert_eq!(v.time_increment_resolution, 25);
        assert_eq!(v.fixed_vop_time_increment, Some(1));
        assert_eq!(v.interlaced, Some(false));
        assert_eq!(v.pixel_aspect(), Some((1, 1)));
    }

    #[test]
    fn counts_vops_and_packed_tag() {
        let mut es = vec![0, 0, 1, 0xB0, 0xF5];
        es.extend(vol(640, 352));
        es.extend([0, 0, 1, 0xB2]);
        es.extend(b"DivX503b1393p");
        for t in [0u8, 1, 2, 1, 2] {
            es.extend(vop(t));
        }
        let mut scanner = VopScanner::new();
        for chunk in es.chunks(3) {
            scanner.feed(chunk);
        }
        scanner.flush();
        assert_eq!(scanner.vop_types, [1, 2, 2, 0]);
        assert!(scanner.encoder.as_ref().unwrap().packed);
        let mut s = Stream::new(StreamKind::Video);
        scanner.describe(&mut s);
        assert_eq!(s.get("Format profile"), Some("Advanced Simple@L5"));
        assert_eq!(s.get("Format settings, Packed bitstream"), Some("Yes"));
        assert_eq!(s.get("Frame rate"), Some("25.000 FPS"));
    }

    #[test]
    fn stops_after_budget() {
        let mut scanner = VopScanner::new();
        let junk = vec![0x11u8; 256 * 1024];
        let mut calls = 0;
        while scanner.feed(&junk) {
            calls += 1;
        }
        assert_eq!(calls, 3);
        assert!(scanner.is_exhausted());
        assert!(!scanner.feed(&vop(0)));
        assert_eq!(scanner.vops(), 0);
    }
}
