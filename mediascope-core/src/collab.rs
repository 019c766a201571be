// COLLABORATORS - Interfaces the core consumes but does not own
//
// • DirLister: sibling listing for continuous file sets
// • LanguageNormalizer: ISO 639 3-letter -> 2-letter
// • IfoReader: DVD IFO attributes for VOB aggregation

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::Serialize;

// ============================================================================
// Directory listing
// ============================================================================

pub trait DirLister {
    /// Regular files in `dir` with their sizes.
    fn list(&self, dir: &Path) -> io::Result<Vec<(PathBuf, u64)>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsLister;

impl DirLister for FsLister {
    fn list(&self, dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::debug!("skipping {:?}: {}", entry.path(), err);
                    continue;
                }
            };
            if meta.is_file() {
                out.push((entry.path(), meta.len()));
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Language codes
// ============================================================================

pub trait LanguageNormalizer {
    fn normalize(&self, code: &str) -> String;
}

// ISO 639-2 (B and T forms) for the languages seen in broadcast and disc media.
static ISO639_2_TO_1: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("eng", "en"),
        ("fre", "fr"),
        ("fra", "fr"),
        ("ger", "de"),
        ("deu", "de"),
        ("spa", "es"),
        ("ita", "it"),
        ("por", "pt"),
        ("dut", "nl"),
        ("nld", "nl"),
        ("swe", "sv"),
        ("nor", "no"),
        ("dan", "da"),
        ("fin", "fi"),
        ("pol", "pl"),
        ("cze", "cs"),
        ("ces", "cs"),
        ("hun", "hu"),
        ("gre", "el"),
        ("ell", "el"),
        ("tur", "tr"),
        ("rus", "ru"),
        ("ukr", "uk"),
        ("ara", "ar"),
        ("heb", "he"),
        ("hin", "hi"),
        ("chi", "zh"),
        ("zho", "zh"),
        ("jpn", "ja"),
        ("kor", "ko"),
        ("tha", "th"),
        ("vie", "vi"),
        ("ind", "id"),
        ("may", "ms"),
        ("msa", "ms"),
        ("rum", "ro"),
        ("ron", "ro"),
        ("bul", "bg"),
        ("hrv", "hr"),
        ("srp", "sr"),
        ("slo", "sk"),
        ("slk", "sk"),
        ("slv", "sl"),
        ("cat", "ca"),
        ("ice", "is"),
        ("isl", "is"),
        ("est", "et"),
        ("lav", "lv"),
        ("lit", "lt"),
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Default, Clone, Copy)]
pub struct Iso639;

impl LanguageNormalizer for Iso639 {
    fn normalize(&self, code: &str) -> String {
        let lower = code.trim().trim_end_matches('\0').to_ascii_lowercase();
        match ISO639_2_TO_1.get(lower.as_str()) {
            Some(short) => short.to_string(),
            None => lower,
        }
    }
}

// ============================================================================
// DVD IFO
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IfoAudio {
    pub language: Option<String>,
    pub format: Option<String>,
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IfoAttributes {
    pub chapters: u32,
    pub audio: Vec<IfoAudio>,
    /// Subpicture languages, indexed by subpicture stream number.
    pub subtitles: Vec<Option<String>>,
}

pub trait IfoReader {
    /// Attributes from the IFO that describes `vob`, if any.
    fn read(&self, vob: &Path) -> Option<IfoAttributes>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoIfo;

impl IfoReader for NoIfo {
    fn read(&self, _vob: &Path) -> Option<IfoAttributes> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_codes() {
        let iso = Iso639;
        assert_eq!(iso.normalize("eng"), "en");
        assert_eq!(iso.normalize("GER"), "de");
        assert_eq!(iso.normalize("fr"), "fr");
        assert_eq!(iso.normalize("und"), "und");
        assert_eq!(iso.normalize("spa\0"), "es");
    }

    #[test]
    fn fs_lister_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let listed = FsLister.list(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, 3);
    }
}
