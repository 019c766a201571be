// MPEG-1/2 VIDEO - Header decoders and incremental start-code parser
//
// • Sequence header / sequence, display and picture coding extensions
// • GOP and picture headers
// • Mpeg2Parser::feed(chunk): start codes split across calls, GOP state,
//   interlace heuristic, ATSC user data reordered per GOP into captions

use serde::Serialize;

use crate::bits::{BitReader, BitResult, BitstreamError, UnitSplitter};
use crate::captions::CaptionDecoder;
use crate::display;
use crate::report::Stream;

pub const PICTURE_START: u8 = 0x00;
pub const USER_DATA_START: u8 = 0xB2;
pub const SEQUENCE_HEADER: u8 = 0xB3;
pub const EXTENSION_START: u8 = 0xB5;
pub const SEQUENCE_END: u8 = 0xB7;
pub const GROUP_START: u8 = 0xB8;

/// Consecutive field pictures before the stream is called interlaced.
pub const FIELD_RUN_FOR_INTERLACE: u32 = 3;

/// User data packets buffered inside one GOP.
const MAX_PENDING_USER_DATA: usize = 128;

// (numerator, denominator) per frame_rate_code
const FRAME_RATES: [(u32, u32); 8] = [
    (24000, 1001),
    (24, 1),
    (25, 1),
    (30000, 1001),
    (30, 1),
    (50, 1),
    (60000, 1001),
    (60, 1),
];

// MPEG-1 pixel aspect (height/width) per aspect_ratio_information
const MPEG1_PAR: [f64; 14] = [
    1.0, 0.6735, 0.7031, 0.7615, 0.8055, 0.8437, 0.8935, 0.9157, 0.9815, 1.0255, 1.0695, 1.0950,
    1.1575, 1.2015,
];

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceHeader {
    pub width: u16,
    pub height: u16,
    pub aspect_ratio_code: u8,
    pub frame_rate_code: u8,
    /// Units of 400 b/s.
    pub bit_rate_value: u32,
    pub vbv_buffer_size: u16,
    pub constrained: bool,
    pub intra_matrix: bool,
    pub non_intra_matrix: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceExtension {
    pub profile_and_level: u8,
    pub progressive_sequence: bool,
    pub chroma_format: u8,
    pub horizontal_size_ext: u8,
    pub vertical_size_ext: u8,
    pub bit_rate_ext: u16,
    pub vbv_buffer_size_ext: u8,
    pub low_delay: bool,
    pub frame_rate_ext_n: u8,
    pub frame_rate_ext_d: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColourDescription {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayExtension {
    pub video_format: u8,
    pub colour: Option<ColourDescription>,
    pub display_width: u16,
    pub display_height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompositeDisplay {
    pub v_axis: bool,
    pub field_sequence: u8,
    pub sub_carrier: bool,
    pub burst_amplitude: u8,
    pub sub_carrier_phase: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PictureCodingExtension {
    pub f_codes: u16,
    pub intra_dc_precision: u8,
    /// 1 top field, 2 bottom field, 3 frame.
    pub picture_structure: u8,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub concealment_motion_vectors: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub repeat_first_field: bool,
    pub chroma_420_type: bool,
    pub progressive_frame: bool,
    pub composite: Option<CompositeDisplay>,
}

impl PictureCodingExtension {
    pub fn is_field_picture(&self) -> bool {
        self.picture_structure != 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeCode {
    pub drop_frame: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub pictures: u8,
}

impl std::fmt::Display for TimeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.pictures
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GopHeader {
    pub time_code: TimeCode,
    pub closed_gop: bool,
    pub broken_link: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PictureType {
    I,
    P,
    B,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PictureHeader {
    pub temporal_reference: u16,
    pub picture_type: PictureType,
    pub vbv_delay: u16,
}

// ============================================================================
// Decoders (input starts right after the 4-byte start code)
// ============================================================================

pub fn decode_sequence_header(buf: &[u8]) -> BitResult<(SequenceHeader, usize)> {
    let mut r = BitReader::new(buf);
    let width = r.read_u16(12)?;
    let height = r.read_u16(12)?;
    let aspect_ratio_code = r.read_u8(4)?;
    let frame_rate_code = r.read_u8(4)?;
    if aspect_ratio_code == 0 || aspect_ratio_code == 15 {
        return Err(BitstreamError::Reserved("aspect_ratio_information"));
    }
    if frame_rate_code == 0 || frame_rate_code > 8 {
        return Err(BitstreamError::Reserved("frame_rate_code"));
    }
    let bit_rate_value = r.read_bits(18)?;
    r.marker("sequence_header")?;
    let vbv_buffer_size = r.read_u16(10)?;
    let constrained = r.read_bool()?;
    let intra_matrix = r.read_bool()?;
    if intra_matrix {
        r.skip(64 * 8)?;
    }
    let non_intra_matrix = r.read_bool()?;
    if non_intra_matrix {
        r.skip(64 * 8)?;
    }
    let header = SequenceHeader {
        width,
        height,
        aspect_ratio_code,
        frame_rate_code,
        bit_rate_value,
        vbv_buffer_size,
        constrained,
        intra_matrix,
        non_intra_matrix,
    };
    Ok((header, r.bit_position().div_ceil(8)))
}

fn expect_extension_id(r: &mut BitReader, id: u8) -> BitResult<()> {
    if r.read_u8(4)? != id {
        return Err(BitstreamError::Reserved("extension_start_code_identifier"));
    }
    Ok(())
}

pub fn decode_sequence_extension(buf: &[u8]) -> BitResult<SequenceExtension> {
    let mut r = BitReader::new(buf);
    expect_extension_id(&mut r, 1)?;
    let profile_and_level = r.read_u8(8)?;
    let progressive_sequence = r.read_bool()?;
    let chroma_format = r.read_u8(2)?;
    if chroma_format == 0 {
        return Err(BitstreamError::Reserved("chroma_format"));
    }
    let horizontal_size_ext = r.read_u8(2)?;
    let vertical_size_ext = r.read_u8(2)?;
    let bit_rate_ext = r.read_u16(12)?;
    r.marker("sequence_extension")?;
    Ok(SequenceExtension {
        profile_and_level,
        progressive_sequence,
        chroma_format,
        horizontal_size_ext,
        vertical_size_ext,
        bit_rate_ext,
        vbv_buffer_size_ext: r.read_u8(8)?,
        low_delay: r.read_bool()?,
        frame_rate_ext_n: r.read_u8(2)?,
        frame_rate_ext_d: r.read_u8(5)?,
    })
}

pub fn decode_display_extension(buf: &[u8]) -> BitResult<DisplayExtension> {
    let mut r = BitReader::new(buf);
    expect_extension_id(&mut r, 2)?;
    let video_format = r.read_u8(3)?;
    let colour = if r.read_bool()? {
        Some(ColourDescription {
            primaries: r.read_u8(8)?,
            transfer: r.read_u8(8)?,
            matrix: r.read_u8(8)?,
        })
    } else {
        None
    };
    let display_width = r.read_u16(14)?;
    r.marker("sequence_display_extension")?;
    let display_height = r.read_u16(14)?;
    Ok(DisplayExtension {
        video_format,
        colour,
        display_width,
        display_height,
    })
}

pub fn decode_picture_coding_extension(buf: &[u8]) -> BitResult<PictureCodingExtension> {
    let mut r = BitReader::new(buf);
    expect_extension_id(&mut r, 8)?;
    let f_codes = r.read_u16(16)?;
    let intra_dc_precision = r.read_u8(2)?;
    let picture_structure = r.read_u8(2)?;
    if picture_structure == 0 {
        return Err(BitstreamError::Reserved("picture_structure"));
    }
    let top_field_first = r.read_bool()?;
    let frame_pred_frame_dct = r.read_bool()?;
    let concealment_motion_vectors = r.read_bool()?;
    let q_scale_type = r.read_bool()?;
    let intra_vlc_format = r.read_bool()?;
    let alternate_scan = r.read_bool()?;
    let repeat_first_field = r.read_bool()?;
    let chroma_420_type = r.read_bool()?;
    let progressive_frame = r.read_bool()?;
    let composite = if r.read_bool()? {
        Some(CompositeDisplay {
            v_axis: r.read_bool()?,
            field_sequence: r.read_u8(3)?,
            sub_carrier: r.read_bool()?,
            burst_amplitude: r.read_u8(7)?,
            sub_carrier_phase: r.read_u8(8)?,
        })
    } else {
        None
    };
    Ok(PictureCodingExtension {
        f_codes,
        intra_dc_precision,
        picture_structure,
        top_field_first,
        frame_pred_frame_dct,
        concealment_motion_vectors,
        q_scale_type,
        intra_vlc_format,
        alternate_scan,
        repeat_first_field,
        chroma_420_type,
        progressive_frame,
        composite,
    })
}

pub fn decode_gop_header(buf: &[u8]) -> BitResult<GopHeader> {
    let mut r = BitReader::new(buf);
    let drop_frame = r.read_bool()?;
    let hours = r.read_u8(5)?;
    let minutes = r.read_u8(6)?;
    r.marker("time_code")?;
    let seconds = r.read_u8(6)?;
    let pictures = r.read_u8(6)?;
    Ok(GopHeader {
        time_code: TimeCode {
            drop_frame,
            hours,
            minutes,
            seconds,
            pictures,
        },
        closed_gop: r.read_bool()?,
        broken_link: r.read_bool()?,
    })
}

pub fn decode_picture_header(buf: &[u8]) -> BitResult<PictureHeader> {
    let mut r = BitReader::new(buf);
    let temporal_reference = r.read_u16(10)?;
    let picture_type = match r.read_u8(3)? {
        1 => PictureType::I,
        2 => PictureType::P,
        3 => PictureType::B,
        4 => PictureType::D,
        _ => return Err(BitstreamError::Reserved("picture_coding_type")),
    };
    Ok(PictureHeader {
        temporal_reference,
        picture_type,
        vbv_delay: r.read_u16(16)?,
    })
}

// ============================================================================
// Derived values
// ============================================================================

pub fn frame_rate(seq: &SequenceHeader, ext: Option<&SequenceExtension>) -> Option<(u32, u32)> {
    let (mut num, mut den) = *FRAME_RATES.get((seq.frame_rate_code as usize).checked_sub(1)?)?;
    if let Some(ext) = ext {
        num *= ext.frame_rate_ext_n as u32 + 1;
        den *= ext.frame_rate_ext_d as u32 + 1;
    }
    Some((num, den))
}

pub fn dimensions(seq: &SequenceHeader, ext: Option<&SequenceExtension>) -> (u32, u32) {
    match ext {
        Some(ext) => (
            (ext.horizontal_size_ext as u32) << 12 | seq.width as u32,
            (ext.vertical_size_ext as u32) << 12 | seq.height as u32,
        ),
        None => (seq.width as u32, seq.height as u32),
    }
}

/// Nominal bit rate in b/s. None for the MPEG-1 "variable" marker.
pub fn nominal_bitrate(seq: &SequenceHeader, ext: Option<&SequenceExtension>) -> Option<u64> {
    match ext {
        Some(ext) => Some((((ext.bit_rate_ext as u64) << 18) | seq.bit_rate_value as u64) * 400),
        None if seq.bit_rate_value == 0x3FFFF => None,
        None => Some(seq.bit_rate_value as u64 * 400),
    }
}

pub fn display_aspect_ratio(seq: &SequenceHeader, ext: Option<&SequenceExtension>) -> Option<f64> {
    let (w, h) = dimensions(seq, ext);
    if w == 0 || h == 0 {
        return None;
    }
    match (ext, seq.aspect_ratio_code) {
        (Some(_), 1) => Some(w as f64 / h as f64),
        (Some(_), 2) => Some(4.0 / 3.0),
        (Some(_), 3) => Some(16.0 / 9.0),
        (Some(_), 4) => Some(2.21),
        (Some(_), _) => None,
        (None, code) => {
            let par = MPEG1_PAR.get((code as usize).checked_sub(1)?)?;
            Some(w as f64 / (h as f64 * par))
        }
    }
}

pub fn profile_level(profile_and_level: u8) -> String {
    if profile_and_level & 0x80 != 0 {
        return match profile_and_level {
            0x82 | 0x85 => "4:2:2@".to_string() + if profile_and_level == 0x82 { "High" } else { "Main" },
            0x8A | 0x8B | 0x8D | 0x8E => "Multi-view".to_string(),
            _ => format!("Escape 0x{:02X}", profile_and_level),
        };
    }
    let profile = match (profile_and_level >> 4) & 7 {
        1 => "High",
        2 => "Spatial",
        3 => "SNR",
        4 => "Main",
        5 => "Simple",
        _ => "Reserved",
    };
    let level = match profile_and_level & 0x0F {
        4 => "High",
        6 => "High 1440",
        8 => "Main",
        10 => "Low",
        _ => "Reserved",
    };
    format!("{}@{}", profile, level)
}

// ============================================================================
// Incremental parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanType {
    Progressive,
    Interlaced,
}

#[derive(Debug, Default)]
pub struct Mpeg2Parser {
    splitter: UnitSplitter,
    pub sequence: Option<SequenceHeader>,
    pub extension: Option<SequenceExtension>,
    pub display: Option<DisplayExtension>,
    pub first_gop: Option<GopHeader>,
    pub first_coding_ext: Option<PictureCodingExtension>,
    pub sequence_headers: u64,
    pub gops: u64,
    pub closed_gops: u64,
    /// Pictures in the first complete GOP.
    pub gop_length: Option<u32>,
    current_gop_pictures: u32,
    pub pictures: u64,
    /// I, P, B, D counts.
    pub picture_types: [u64; 4],
    pub interlaced_frames: u64,
    pub repeat_first_field: u64,
    field_run: u32,
    pub field_coded: bool,
    last_temporal_reference: Option<u16>,
    pending_user_data: Vec<(u16, Vec<u8>)>,
    pub captions: CaptionDecoder,
}

impl Mpeg2Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn is_mpeg2(&self) -> bool {
        self.extension.is_some()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.feed(chunk, |code, data| self.unit(code, data));
        self.splitter = splitter;
    }

    /// Parse the unit still held back and flush captions.
    pub fn flush(&mut self) {
        let mut splitter = std::mem::take(&mut self.splitter);
        splitter.flush(|code, data| self.unit(code, data));
        self.splitter = splitter;
        self.flush_user_data();
    }

    fn unit(&mut self, code: u8, data: &[u8]) {
        match code {
            SEQUENCE_HEADER => match decode_sequence_header(data) {
                Ok((seq, _)) => {
                    self.sequence_headers += 1;
                    if self.sequence.is_none() {
                        self.sequence = Some(seq);
                    }
                }
                Err(err) => tracing::debug!("bad sequence header: {}", err),
            },
            EXTENSION_START => self.extension_unit(data),
            GROUP_START => match decode_gop_header(data) {
                Ok(gop) => self.start_gop(gop),
                Err(err) => tracing::debug!("bad gop header: {}", err),
            },
            PICTURE_START => match decode_picture_header(data) {
                Ok(picture) => {
                    self.pictures += 1;
                    self.current_gop_pictures += 1;
                    let index = match picture.picture_type {
                        PictureType::I => 0,
                        PictureType::P => 1,
                        PictureType::B => 2,
                        PictureType::D => 3,
                    };
                    self.picture_types[index] += 1;
                    self.last_temporal_reference = Some(picture.temporal_reference);
                }
                Err(err) => tracing::debug!("bad picture header: {}", err),
            },
            USER_DATA_START => self.user_data(data),
            SEQUENCE_END => self.flush_user_data(),
            _ => {}
        }
    }

    fn extension_unit(&mut self, data: &[u8]) {
        let Some(&first) = data.first() else {
            return;
        };
        match first >> 4 {
            1 => {
                if let Ok(ext) = decode_sequence_extension(data) {
                    self.extension.get_or_insert(ext);
                }
            }
            2 => {
                if let Ok(ext) = decode_display_extension(data) {
                    self.display.get_or_insert(ext);
                }
            }
            8 => {
                if let Ok(ext) = decode_picture_coding_extension(data) {
                    self.picture_coding(ext);
                }
            }
            _ => {}
        }
    }

    fn picture_coding(&mut self, ext: PictureCodingExtension) {
        if ext.is_field_picture() {
            self.field_run += 1;
            if self.field_run >= FIELD_RUN_FOR_INTERLACE {
                self.field_coded = true;
            }
        } else {
            self.field_run = 0;
            if !ext.progressive_frame {
                self.interlaced_frames += 1;
            }
        }
        if ext.repeat_first_field {
            self.repeat_first_field += 1;
        }
        self.first_coding_ext.get_or_insert(ext);
    }

    fn start_gop(&mut self, gop: GopHeader) {
        if self.gops > 0 && self.gop_length.is_none() {
            self.gop_length = Some(self.current_gop_pictures);
        }
        self.flush_user_data();
        self.current_gop_pictures = 0;
        self.gops += 1;
        if gop.closed_gop {
            self.closed_gops += 1;
        }
        self.first_gop.get_or_insert(gop);
    }

    fn user_data(&mut self, data: &[u8]) {
        if !data.starts_with(b"GA94") {
            return;
        }
        if self.pending_user_data.len() >= MAX_PENDING_USER_DATA {
            tracing::warn!("user data backlog full, flushing early");
            self.flush_user_data();
        }
        let reference = self.last_temporal_reference.unwrap_or(0);
        self.pending_user_data.push((reference, data.to_vec()));
    }

    /// Hand buffered caption data over in display order.
    fn flush_user_data(&mut self) {
        let mut pending = std::mem::take(&mut self.pending_user_data);
        pending.sort_by_key(|(reference, _)| *reference);
        for (_, data) in &pending {
            self.captions.feed_user_data(data);
        }
    }

    pub fn scan_type(&self) -> ScanType {
        match &self.extension {
            None => ScanType::Progressive,
            Some(ext) if ext.progressive_sequence => ScanType::Progressive,
            Some(_) if self.field_coded || self.interlaced_frames > 0 => ScanType::Interlaced,
            Some(_) => ScanType::Progressive,
        }
    }

    pub fn frame_rate(&self) -> Option<(u32, u32)> {
        frame_rate(self.sequence.as_ref()?, self.extension.as_ref())
    }

    pub fn describe(&self, stream: &mut Stream) {
        let Some(seq) = &self.sequence else {
            return;
        };
        let ext = self.extension.as_ref();
        stream.push("Format", "MPEG Video");
        stream.push("Format version", if ext.is_some() { "Version 2" } else { "Version 1" });
        if let Some(ext) = ext {
            stream.push("Format profile", profile_level(ext.profile_and_level));
        }
        stream.push("Format settings, BVOP", if self.picture_types[2] > 0 { "Yes" } else { "No" });
        stream.push("Format settings, Matrix", if seq.intra_matrix || seq.non_intra_matrix { "Custom" } else { "Default" });
        if let Some(len) = self.gop_length {
            stream.push_both("Format settings, GOP", format!("N={}", len), len);
        }
        if self.gops > 0 {
            let open = self.gops - self.closed_gops;
            stream.push(
                "GOP, Open/Closed",
                if open == 0 { "Closed" } else if self.closed_gops == 0 { "Open" } else { "Variable" },
            );
        }
        if let Some(rate) = nominal_bitrate(seq, ext) {
            stream.push_both("Maximum bit rate", display::bitrate(rate), rate);
        }
        let (w, h) = dimensions(seq, ext);
        stream.push_both("Width", display::pixels(w), w);
        stream.push_both("Height", display::pixels(h), h);
        if let Some(dar) = display_aspect_ratio(seq, ext) {
            stream.push_both("Display aspect ratio", aspect_string(dar), format!("{:.3}", dar));
        }
        if let Some((num, den)) = self.frame_rate() {
            stream.push_both("Frame rate", display::frame_rate(num, den), format!("{:.3}", num as f64 / den as f64));
        }
        let chroma = ext.map_or(1, |e| e.chroma_format);
        stream.push("Color space", "YUV");
        stream.push("Chroma subsampling", ["4:2:0", "4:2:0", "4:2:2", "4:4:4"][chroma as usize & 3]);
        stream.push("Bit depth", display::bit_depth(8));
        let scan = self.scan_type();
        stream.push("Scan type", match scan {
            ScanType::Progressive => "Progressive",
            ScanType::Interlaced => "Interlaced",
        });
        if scan == ScanType::Interlaced {
            if let Some(coding) = &self.first_coding_ext {
                stream.push("Scan order", if coding.top_field_first { "Top Field First" } else { "Bottom Field First" });
            }
        }
        stream.push("Compression mode", "Lossy");
        if let Some(gop) = &self.first_gop {
            stream.push("Time code of first frame", gop.time_code.to_string());
        }
        if let Some(colour) = self.display.and_then(|d| d.colour) {
            stream.set_key("colour_primaries", colour.primaries);
            stream.set_key("transfer_characteristics", colour.transfer);
            stream.set_key("matrix_coefficients", colour.matrix);
        }
    }
}

pub fn aspect_string(dar: f64) -> String {
    const NAMED: [(f64, &str); 5] = [
        (4.0 / 3.0, "4:3"),
        (16.0 / 9.0, "16:9"),
        (2.21, "2.21:1"),
        (1.0, "1:1"),
        (1.85, "1.85:1"),
    ];
    for (value, name) in NAMED {
        if (dar - value).abs() < 0.01 {
            return name.to_string();
        }
    }
    format!("{:.3}", dar)
}
