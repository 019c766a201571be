// MEDIA KINDS - Closed enumerations resolved once at detection time
//
// Container, stream and codec identities are matched exhaustively
// downstream instead of comparing format strings.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContainerKind {
    Mp4,
    QuickTime,
    Matroska,
    WebM,
    Avi,
    Wave,
    MpegTs,
    Bdav,
    MpegPs,
    MpegVideoEs,
    Ac3Es,
    Vc1Es,
    Unknown,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Mp4 => "MPEG-4",
            ContainerKind::QuickTime => "QuickTime",
            ContainerKind::Matroska => "Matroska",
            ContainerKind::WebM => "WebM",
            ContainerKind::Avi => "AVI",
            ContainerKind::Wave => "Wave",
            ContainerKind::MpegTs => "MPEG-TS",
            ContainerKind::Bdav => "BDAV",
            ContainerKind::MpegPs => "MPEG-PS",
            ContainerKind::MpegVideoEs => "MPEG Video",
            ContainerKind::Ac3Es => "AC-3",
            ContainerKind::Vc1Es => "VC-1",
            ContainerKind::Unknown => "Unknown",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ContainerKind::MpegTs | ContainerKind::Bdav)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StreamKind {
    General,
    Video,
    Audio,
    Text,
    Menu,
    Other,
}

impl StreamKind {
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::General => "General",
            StreamKind::Video => "Video",
            StreamKind::Audio => "Audio",
            StreamKind::Text => "Text",
            StreamKind::Menu => "Menu",
            StreamKind::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum CodecId {
    // Video
    Mpeg1Video,
    Mpeg2Video,
    Mpeg4Visual,
    Avc,
    Hevc,
    Vc1,
    Vp8,
    Vp9,
    Av1,
    Mjpeg,
    RawVideo,
    // Audio
    Ac3,
    Eac3,
    Dts,
    TrueHd,
    Aac,
    MpegAudio,
    Pcm,
    Lpcm,
    Flac,
    Vorbis,
    Opus,
    // Text
    Eia608,
    Cea708,
    DvbSubtitle,
    Pgs,
    VobSub,
    Text,
    #[default]
    Unknown,
}

impl CodecId {
    pub fn kind(&self) -> StreamKind {
        match self {
            CodecId::Mpeg1Video
            | CodecId::Mpeg2Video
            | CodecId::Mpeg4Visual
            | CodecId::Avc
            | CodecId::Hevc
            | CodecId::Vc1
            | CodecId::Vp8
            | CodecId::Vp9
            | CodecId::Av1
            | CodecId::Mjpeg
            | CodecId::RawVideo => StreamKind::Video,
            CodecId::Ac3
            | CodecId::Eac3
            | CodecId::Dts
            | CodecId::TrueHd
            | CodecId::Aac
            | CodecId::MpegAudio
            | CodecId::Pcm
            | CodecId::Lpcm
            | CodecId::Flac
            | CodecId::Vorbis
            | CodecId::Opus => StreamKind::Audio,
            CodecId::Eia608
            | CodecId::Cea708
            | CodecId::DvbSubtitle
            | CodecId::Pgs
            | CodecId::VobSub
            | CodecId::Text => StreamKind::Text,
            CodecId::Unknown => StreamKind::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::Mpeg1Video | CodecId::Mpeg2Video => "MPEG Video",
            CodecId::Mpeg4Visual => "MPEG-4 Visual",
            CodecId::Avc => "AVC",
            CodecId::Hevc => "HEVC",
            CodecId::Vc1 => "VC-1",
            CodecId::Vp8 => "VP8",
            CodecId::Vp9 => "VP9",
            CodecId::Av1 => "AV1",
            CodecId::Mjpeg => "JPEG",
            CodecId::RawVideo => "RGB",
            CodecId::Ac3 => "AC-3",
            CodecId::Eac3 => "E-AC-3",
            CodecId::Dts => "DTS",
            CodecId::TrueHd => "MLP FBA",
            CodecId::Aac => "AAC",
            CodecId::MpegAudio => "MPEG Audio",
            CodecId::Pcm | CodecId::Lpcm => "PCM",
            CodecId::Flac => "FLAC",
            CodecId::Vorbis => "Vorbis",
            CodecId::Opus => "Opus",
            CodecId::Eia608 => "EIA-608",
            CodecId::Cea708 => "EIA-708",
            CodecId::DvbSubtitle => "DVB Subtitle",
            CodecId::Pgs => "PGS",
            CodecId::VobSub => "RLE",
            CodecId::Text => "UTF-8",
            CodecId::Unknown => "Unknown",
        }
    }

    /// WAVEFORMATEX format tag (AVI `strf`, WAV `fmt `, Matroska A_MS/ACM).
    pub fn from_wave_format(tag: u16) -> CodecId {
        match tag {
            0x0001 | 0x0003 | 0xFFFE => CodecId::Pcm,
            0x0050 | 0x0055 => CodecId::MpegAudio,
            0x00FF | 0x1600 | 0x1610 | 0x706D => CodecId::Aac,
            0x2000 => CodecId::Ac3,
            0x2001 => CodecId::Dts,
            0xF1AC => CodecId::Flac,
            _ => CodecId::Unknown,
        }
    }

    /// BITMAPINFOHEADER compression / AVI stream handler fourcc.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> CodecId {
        let mut upper = *fourcc;
        upper.make_ascii_uppercase();
        match &upper {
            b"DIVX" | b"DX50" | b"XVID" | b"FMP4" | b"MP4V" | b"3IV2" | b"DIV3" | b"MP4S" | b"M4S2" => {
                CodecId::Mpeg4Visual
            }
            b"H264" | b"X264" | b"AVC1" => CodecId::Avc,
            b"HEVC" | b"H265" | b"HVC1" => CodecId::Hevc,
            b"WVC1" | b"WMV3" => CodecId::Vc1,
            b"MPG1" => CodecId::Mpeg1Video,
            b"MPG2" | b"MPEG" => CodecId::Mpeg2Video,
            b"MJPG" => CodecId::Mjpeg,
            b"VP80" => CodecId::Vp8,
            b"VP90" => CodecId::Vp9,
            b"AV01" => CodecId::Av1,
            b"\0\0\0\0" | b"RAW " | b"DIB " => CodecId::RawVideo,
            _ => CodecId::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_kinds() {
        assert_eq!(CodecId::Vc1.kind(), StreamKind::Video);
        assert_eq!(CodecId::Eac3.kind(), StreamKind::Audio);
        assert_eq!(CodecId::Eia608.kind(), StreamKind::Text);
        assert_eq!(CodecId::Unknown.kind(), StreamKind::Other);
    }

    #[test]
    fn riff_codec_tags() {
        assert_eq!(CodecId::from_wave_format(0x2000), CodecId::Ac3);
        assert_eq!(CodecId::from_wave_format(0x55), CodecId::MpegAudio);
        assert_eq!(CodecId::from_fourcc(b"xvid"), CodecId::Mpeg4Visual);
        assert_eq!(CodecId::from_fourcc(&[0; 4]), CodecId::RawVideo);
        assert_eq!(CodecId::from_fourcc(b"ZZZZ"), CodecId::Unknown);
    }

    #[test]
    fn transport_kinds() {
        assert!(ContainerKind::Bdav.is_transport());
        assert!(!ContainerKind::MpegPs.is_transport());
        assert_eq!(ContainerKind::MpegTs.name(), "MPEG-TS");
    }
}
