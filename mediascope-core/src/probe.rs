// PROBE - Format sniffing and dispatch to the container probes
//
// • sniff: magic bytes first, extension only as a tie-break
// • Prober: owns options + collaborators, one call per file
// • ProbeContext: what a container probe may consult while it runs
//
// A container probe returning None means "not this format"; the file is
// then reported with Format: Unknown. Probes never fail after the open.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::collab::{DirLister, FsLister, IfoAttributes, IfoReader, Iso639, LanguageNormalizer, NoIfo};
use crate::continuous::{self, ContinuousSet};
use crate::media::ContainerKind;
use crate::options::ProbeOptions;
use crate::report::Report;
use crate::source::{ByteSource, FileSource, SourceError};
use crate::{avi, es, mkv, mp4, ps_demux, ts_demux, wav};

/// Bytes read for sniffing.
pub const SNIFF_LEN: u64 = 4096;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read header: {0}")]
    Read(#[from] SourceError),
}

// ============================================================================
// Context
// ============================================================================

/// Last file of a continuous set, scanned for the closing timestamps.
pub struct Continuation {
    pub set: ContinuousSet,
    pub last: Box<dyn ByteSource>,
}

pub struct ProbeContext<'a> {
    pub options: ProbeOptions,
    pub language: &'a dyn LanguageNormalizer,
    /// DVD attributes for a VOB, when an IFO describes it.
    pub ifo: Option<IfoAttributes>,
    pub continuation: Option<Continuation>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(options: ProbeOptions, language: &'a dyn LanguageNormalizer) -> Self {
        Self {
            options,
            language,
            ifo: None,
            continuation: None,
        }
    }
}

// ============================================================================
// Sniffing
// ============================================================================

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const PACK_START: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];
const MPEG_SEQUENCE: [u8; 4] = [0x00, 0x00, 0x01, 0xB3];
const VC1_SEQUENCE: [u8; 4] = [0x00, 0x00, 0x01, 0x0F];
const BMFF_TYPES: [&[u8; 4]; 7] = [b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"pnot"];

fn extension_hint(ext: &str) -> ContainerKind {
    match ext.to_ascii_lowercase().as_str() {
        "ts" | "tp" | "trp" | "mts" | "m2ts" | "m2t" => ContainerKind::MpegTs,
        "vob" | "mpg" | "mpeg" | "m2p" | "evo" => ContainerKind::MpegPs,
        "m2v" | "mpv" => ContainerKind::MpegVideoEs,
        "ac3" | "eac3" | "ec3" => ContainerKind::Ac3Es,
        "vc1" => ContainerKind::Vc1Es,
        _ => ContainerKind::Unknown,
    }
}

/// Pick a container from the first bytes of the file.
pub fn sniff(head: &[u8], ext: Option<&str>) -> ContainerKind {
    if head.starts_with(&EBML_MAGIC) {
        return ContainerKind::Matroska;
    }
    if head.len() >= 12 && &head[..4] == b"RIFF" {
        match &head[8..12] {
            b"AVI " | b"AVIX" => return ContainerKind::Avi,
            b"WAVE" => return ContainerKind::Wave,
            _ => {}
        }
    }
    if head.len() >= 8 && BMFF_TYPES.iter().any(|t| &head[4..8] == *t) {
        return ContainerKind::Mp4;
    }
    if head.starts_with(&PACK_START) {
        return ContainerKind::MpegPs;
    }
    if let Some(layout) = ts_demux::detect_layout(head) {
        // a single sync byte proves nothing
        if layout.syncs >= 3 {
            return if layout.is_bdav() { ContainerKind::Bdav } else { ContainerKind::MpegTs };
        }
    }
    if head.starts_with(&MPEG_SEQUENCE) {
        return ContainerKind::MpegVideoEs;
    }
    if head.starts_with(&VC1_SEQUENCE) {
        return ContainerKind::Vc1Es;
    }
    if head.starts_with(&[0x0B, 0x77]) {
        return ContainerKind::Ac3Es;
    }
    ext.map_or(ContainerKind::Unknown, extension_hint)
}

// ============================================================================
// Prober
// ============================================================================

pub struct Prober {
    options: ProbeOptions,
    lister: Box<dyn DirLister + Send + Sync>,
    language: Box<dyn LanguageNormalizer + Send + Sync>,
    ifo: Box<dyn IfoReader + Send + Sync>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(ProbeOptions::default())
    }
}

impl Prober {
    pub fn new(options: ProbeOptions) -> Self {
        Self {
            options,
            lister: Box::new(FsLister),
            language: Box::new(Iso639),
            ifo: Box::new(NoIfo),
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    pub fn with_lister(mut self, lister: impl DirLister + Send + Sync + 'static) -> Self {
        self.lister = Box::new(lister);
        self
    }

    pub fn with_language(mut self, language: impl LanguageNormalizer + Send + Sync + 'static) -> Self {
        self.language = Box::new(language);
        self
    }

    pub fn with_ifo_reader(mut self, ifo: impl IfoReader + Send + Sync + 'static) -> Self {
        self.ifo = Box::new(ifo);
        self
    }

    /// Open and probe one file. Fails only when the file cannot be opened
    /// or its first bytes cannot be read.
    pub fn probe_path(&self, path: &Path) -> Result<Report, ProbeError> {
        let mut src = FileSource::open(path).map_err(|source| ProbeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str());
        let head = src.read_clamped(0, SNIFF_LEN)?;
        let kind = sniff(&head, ext);
        tracing::debug!("{:?}: sniffed {}", path, kind.name());

        let mut ctx = ProbeContext::new(self.options, self.language.as_ref());
        if kind.is_transport() && self.options.test_continuous_file_names {
            ctx.continuation = self.continuation(path);
        }
        if kind == ContainerKind::MpegPs {
            ctx.ifo = self.ifo.read(path);
        }
        Ok(dispatch(&mut src, &mut ctx, kind))
    }

    /// Probe an already opened source. `ext` is only a sniffing hint.
    pub fn probe_source(&self, src: &mut dyn ByteSource, ext: Option<&str>) -> Result<Report, ProbeError> {
        let head = src.read_clamped(0, SNIFF_LEN)?;
        let kind = sniff(&head, ext);
        let mut ctx = ProbeContext::new(self.options, self.language.as_ref());
        Ok(dispatch(src, &mut ctx, kind))
    }

    fn continuation(&self, path: &Path) -> Option<Continuation> {
        let set = continuous::detect(path, self.lister.as_ref())?;
        if set.count < 2 {
            return None;
        }
        match FileSource::open(&set.last_path) {
            Ok(last) => {
                tracing::info!("continuous set: {} files, {} bytes", set.count, set.total_size);
                Some(Continuation {
                    set,
                    last: Box::new(last),
                })
            }
            Err(err) => {
                tracing::warn!("cannot open last file {:?}: {}", set.last_path, err);
                None
            }
        }
    }
}

/// Run the probe for `kind`, falling back to an Unknown report.
pub fn dispatch(src: &mut dyn ByteSource, ctx: &mut ProbeContext, kind: ContainerKind) -> Report {
    let report = match kind {
        ContainerKind::Mp4 | ContainerKind::QuickTime => mp4::probe(src, ctx),
        ContainerKind::Matroska | ContainerKind::WebM => mkv::probe(src, ctx),
        ContainerKind::Avi => avi::probe(src, ctx),
        ContainerKind::Wave => wav::probe(src, ctx),
        ContainerKind::MpegTs | ContainerKind::Bdav => ts_demux::probe(src, ctx),
        ContainerKind::MpegPs => ps_demux::probe(src, ctx),
        ContainerKind::MpegVideoEs | ContainerKind::Ac3Es | ContainerKind::Vc1Es => es::probe(src, ctx, kind),
        ContainerKind::Unknown => None,
    };
    report.unwrap_or_else(|| {
        tracing::debug!("no probe matched, reporting unknown format");
        let mut unknown = Report::new(ContainerKind::Unknown, src.size());
        unknown.finish();
        unknown
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn sniffs_magic_before_extension() {
        assert_eq!(sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F], Some("avi")), ContainerKind::Matroska);
        assert_eq!(sniff(b"RIFF\x10\0\0\0AVI LIST", None), ContainerKind::Avi);
        assert_eq!(sniff(b"RIFF\x10\0\0\0WAVEfmt ", None), ContainerKind::Wave);
        assert_eq!(sniff(b"\0\0\0\x18ftypisom", None), ContainerKind::Mp4);
        assert_eq!(sniff(&[0, 0, 1, 0xBA, 0x44], None), ContainerKind::MpegPs);
        assert_eq!(sniff(&[0, 0, 1, 0xB3, 0x2D], Some("ts")), ContainerKind::MpegVideoEs);
        assert_eq!(sniff(&[0x0B, 0x77, 0, 0], None), ContainerKind::Ac3Es);
        assert_eq!(sniff(&[1, 2, 3], Some("M2TS")), ContainerKind::MpegTs);
        assert_eq!(sniff(&[1, 2, 3], Some("txt")), ContainerKind::Unknown);
    }

    #[test]
    fn sniffs_transport_packets() {
        let mut ts = vec![0u8; 188 * 4];
        for k in 0..4 {
            ts[k * 188] = 0x47;
        }
        assert_eq!(sniff(&ts, None), ContainerKind::MpegTs);
        let mut bdav = vec![0u8; 192 * 4];
        for k in 0..4 {
            bdav[k * 192 + 4] = 0x47;
        }
        assert_eq!(sniff(&bdav, None), ContainerKind::Bdav);
    }

    #[test]
    fn unknown_input_still_reports() {
        let prober = Prober::default();
        let mut src = MemorySource::new(vec![0x5Au8; 1000]);
        let report = prober.probe_source(&mut src, None).unwrap();
        assert_eq!(report.container.format, ContainerKind::Unknown);
        assert_eq!(report.general.get("Format"), Some("Unknown"));
        assert_eq!(report.general.key("file_size"), Some("1000"));
        assert!(report.streams.is_empty());

        // sniffed as MPEG-PS but nothing parses
        let mut src = MemorySource::new(vec![0u8; 10]);
        let report = prober.probe_source(&mut src, Some("vob")).unwrap();
        assert_eq!(report.container.format, ContainerKind::Unknown);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = Prober::default().probe_path(Path::new("/nonexistent/mediascope.ts")).unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
    }
}
