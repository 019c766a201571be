//! # mediascope core
//!
//! Container and codec header inspection in pure Rust. A file is sniffed,
//! handed to one container probe, and described as a [`Report`]: a General
//! stream plus one stream per track, each an ordered list of display fields
//! with machine-readable twins.
//!
//! ```no_run
//! use mediascope_core::{ProbeOptions, Prober};
//!
//! let prober = Prober::new(ProbeOptions::default());
//! let report = prober.probe_path("movie.mkv".as_ref())?;
//! println!("{}", report.general.get("Format").unwrap_or("?"));
//! # Ok::<(), mediascope_core::ProbeError>(())
//! ```

// ============================================================================
// Byte access and bit reading
// ============================================================================
pub mod bits;
pub mod source;

// ============================================================================
// Container walkers
// ============================================================================
pub mod bmff;
pub mod ebml;
pub mod riff;
pub mod tree;

// ============================================================================
// Report model
// ============================================================================
pub mod display;
pub mod media;
pub mod report;
pub mod stats;

// ============================================================================
// Configuration and collaborators
// ============================================================================
pub mod collab;
pub mod continuous;
pub mod options;

// ============================================================================
// Codec parsers
// ============================================================================
pub mod ac3;
pub mod captions;
pub mod es;
pub mod mpa;
pub mod mpeg2;
pub mod mpeg4v;
pub mod vc1;

// ============================================================================
// Container probes
// ============================================================================
pub mod avi;
pub mod mkv;
pub mod mp4;
pub mod pes;
pub mod ps_demux;
pub mod ts_demux;
pub mod wav;

// ============================================================================
// Dispatch
// ============================================================================
pub mod probe;

pub use collab::{DirLister, FsLister, IfoReader, Iso639, LanguageNormalizer, NoIfo};
pub use media::{CodecId, ContainerKind, StreamKind};
pub use options::{OptionsError, ProbeOptions};
pub use probe::{ProbeError, Prober};
pub use report::{Field, Report, Stream};
pub use source::{ByteRange, ByteSource, FileSource, MemorySource, SourceError};
pub use stats::DurationPolicy;
