// ELEMENTARY STREAMS - Codec probe attached to each demuxed substream
//
// The demuxers only know a declared CodecId. The probe picked for it
// receives payload bytes as they arrive and describes what it found.

use crate::ac3::Ac3Probe;
use crate::captions::CaptionDecoder;
use crate::display;
use crate::media::{CodecId, ContainerKind};
use crate::mpa::MpaProbe;
use crate::mpeg2::Mpeg2Parser;
use crate::mpeg4v::VopScanner;
use crate::probe::ProbeContext;
use crate::report::{BitrateMode, Report, Stream};
use crate::source::ByteSource;
use crate::stats::ScanPlan;
use crate::vc1::Vc1Probe;

const READ_CHUNK: u64 = 64 * 1024;

#[derive(Debug, Default)]
pub enum CodecProbe {
    Mpeg2(Box<Mpeg2Parser>),
    Ac3(Ac3Probe),
    Vc1(Vc1Probe),
    Mpa(MpaProbe),
    Mpeg4(VopScanner),
    #[default]
    None,
}

impl CodecProbe {
    pub fn for_codec(codec: CodecId) -> Self {
        match codec {
            CodecId::Mpeg1Video | CodecId::Mpeg2Video => CodecProbe::Mpeg2(Box::default()),
            CodecId::Ac3 | CodecId::Eac3 => CodecProbe::Ac3(Ac3Probe::new()),
            CodecId::Vc1 => CodecProbe::Vc1(Vc1Probe::new()),
            CodecId::MpegAudio => CodecProbe::Mpa(MpaProbe::new()),
            CodecId::Mpeg4Visual => CodecProbe::Mpeg4(VopScanner::new()),
            _ => CodecProbe::None,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        match self {
            CodecProbe::Mpeg2(p) => p.feed(chunk),
            CodecProbe::Ac3(p) => p.feed(chunk),
            CodecProbe::Vc1(p) => p.feed(chunk),
            CodecProbe::Mpa(p) => p.feed(chunk),
            CodecProbe::Mpeg4(p) => {
                p.feed(chunk);
            }
            CodecProbe::None => {}
        }
    }

    /// Hand over units still held in carry buffers.
    pub fn flush(&mut self) {
        match self {
            CodecProbe::Mpeg2(p) => p.flush(),
            CodecProbe::Vc1(p) => p.flush(),
            CodecProbe::Mpeg4(p) => p.flush(),
            _ => {}
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, CodecProbe::None)
    }

    pub fn is_detected(&self) -> bool {
        match self {
            CodecProbe::Mpeg2(p) => p.is_detected(),
            CodecProbe::Ac3(p) => p.is_detected(),
            CodecProbe::Vc1(p) => p.is_detected(),
            CodecProbe::Mpa(p) => p.is_detected(),
            CodecProbe::Mpeg4(p) => p.is_detected(),
            CodecProbe::None => false,
        }
    }

    /// Codec as found in the bitstream, which can refine the declared one.
    pub fn detected_codec(&self) -> Option<CodecId> {
        match self {
            CodecProbe::Mpeg2(p) if p.is_detected() => {
                Some(if p.is_mpeg2() { CodecId::Mpeg2Video } else { CodecId::Mpeg1Video })
            }
            CodecProbe::Ac3(p) => match &p.first {
                Some(crate::ac3::SyncFrame::Ac3(_)) => Some(CodecId::Ac3),
                Some(crate::ac3::SyncFrame::Eac3(_)) => Some(CodecId::Eac3),
                None => None,
            },
            CodecProbe::Vc1(p) if p.is_detected() => Some(CodecId::Vc1),
            CodecProbe::Mpa(p) if p.is_detected() => Some(CodecId::MpegAudio),
            CodecProbe::Mpeg4(p) if p.is_detected() => Some(CodecId::Mpeg4Visual),
            _ => None,
        }
    }

    pub fn describe(&self, stream: &mut Stream) {
        match self {
            CodecProbe::Mpeg2(p) => p.describe(stream),
            CodecProbe::Ac3(p) => p.describe(stream),
            CodecProbe::Vc1(p) => p.describe(stream),
            CodecProbe::Mpa(p) => p.describe(stream),
            CodecProbe::Mpeg4(p) => p.describe(stream),
            CodecProbe::None => {}
        }
    }

    pub fn captions(&self) -> Option<&CaptionDecoder> {
        match self {
            CodecProbe::Mpeg2(p) if p.captions.is_detected() => Some(&p.captions),
            _ => None,
        }
    }

    pub fn ac3(&mut self) -> Option<&mut Ac3Probe> {
        match self {
            CodecProbe::Ac3(p) => Some(p),
            _ => None,
        }
    }
}

// ============================================================================
// Raw elementary stream files
// ============================================================================

/// Probe a file holding a bare elementary stream. None if the codec is not
/// found in the scanned head.
pub fn probe(src: &mut dyn ByteSource, ctx: &ProbeContext, kind: ContainerKind) -> Option<Report> {
    let codec = match kind {
        ContainerKind::MpegVideoEs => CodecId::Mpeg2Video,
        ContainerKind::Ac3Es => CodecId::Ac3,
        ContainerKind::Vc1Es => CodecId::Vc1,
        _ => return None,
    };
    let size = src.size();
    let plan = ScanPlan::new(size, ctx.options.speed());
    let mut probe = CodecProbe::for_codec(codec);
    let mut offset = 0u64;
    while offset < plan.head {
        match src.read_clamped(offset, (plan.head - offset).min(READ_CHUNK)) {
            Ok(chunk) if !chunk.is_empty() => {
                offset += chunk.len() as u64;
                probe.feed(&chunk);
            }
            Ok(_) => break,
            Err(err) => {
                tracing::warn!("read failed at {}: {}", offset, err);
                break;
            }
        }
    }
    probe.flush();
    let found = probe.detected_codec()?;

    let mut report = Report::new(kind, size);
    let mut stream = Stream::new(found.kind());
    stream.push("Format", found.name());
    probe.describe(&mut stream);
    // constant-rate audio: duration follows from the frame bitrate
    let bps = match &probe {
        CodecProbe::Ac3(_) => stream.key("bit_rate").and_then(|v| v.parse::<u64>().ok()),
        _ => None,
    };
    if let Some(bps) = bps.filter(|&b| b > 0) {
        let ms = (size as u128 * 8 * 1000 / bps as u128) as u64;
        stream.push_both("Duration", display::duration(ms), ms);
        report.container.duration_ms = Some(ms);
        report.container.overall_bitrate = Some(bps);
        report.container.bitrate_mode = Some(BitrateMode::Constant);
    }
    stream.push_both("Stream size", display::file_size(size), size);
    report.streams.push(stream);
    if let Some(captions) = probe.captions() {
        report.streams.extend(captions.streams("A/53 / DTVCC Transport"));
        captions.describe_general(&mut report.general);
    }
    report.finish();
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ac3::fixtures::ac3_frame;
    use crate::media::StreamKind;

    #[test]
    fn picks_probe_by_codec() {
        assert!(matches!(CodecProbe::for_codec(CodecId::Mpeg2Video), CodecProbe::Mpeg2(_)));
        assert!(matches!(CodecProbe::for_codec(CodecId::Eac3), CodecProbe::Ac3(_)));
        assert!(!CodecProbe::for_codec(CodecId::Avc).is_active());
    }

    #[test]
    fn refines_declared_codec() {
        let mut probe = CodecProbe::for_codec(CodecId::Ac3);
        assert_eq!(probe.detected_codec(), None);
        let frame = ac3_frame(8, 2, 27, None);
        probe.feed(&frame);
        probe.feed(&frame);
        assert_eq!(probe.detected_codec(), Some(CodecId::Ac3));
        let mut s = Stream::new(StreamKind::Audio);
        probe.describe(&mut s);
        assert_eq!(s.get("Format"), Some("AC-3"));
    }

    #[test]
    fn raw_ac3_file_duration() {
        use crate::collab::Iso639;
        use crate::options::ProbeOptions;
        use crate::source::MemorySource;

        // 32 kb/s, 128 bytes per frame, 250 frames = 8 s
        let data: Vec<u8> = (0..250).flat_map(|_| ac3_frame(8, 2, 27, None)).collect();
        let ctx = ProbeContext::new(ProbeOptions::default(), &Iso639);
        let mut src = MemorySource::new(data);
        let report = probe(&mut src, &ctx, ContainerKind::Ac3Es).unwrap();
        assert_eq!(report.container.duration_ms, Some(8000));
        assert_eq!(report.general.get("Overall bit rate mode"), Some("Constant"));
        let audio = report.streams_of(StreamKind::Audio).next().unwrap();
        assert_eq!(audio.get("Duration"), Some("8 s 0 ms"));

        let mut junk = MemorySource::new(vec![0u8; 4096]);
        assert!(probe(&mut junk, &ctx, ContainerKind::Ac3Es).is_none());
    }
}
