// CONTINUOUS FILE SETS - Numbered sibling detection (00000.m2ts, 00001.m2ts, ...)
//
// A set is the starting file plus every sibling with the same prefix,
// digit width and extension whose number is not lower. Gaps are allowed.

use std::path::{Path, PathBuf};

use crate::collab::DirLister;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousSet {
    /// Files in the set, including the starting file.
    pub count: usize,
    pub total_size: u64,
    pub last_path: PathBuf,
    pub last_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NumberedName {
    prefix: String,
    width: usize,
    number: u64,
    extension: Option<String>,
}

fn split_name(path: &Path) -> Option<NumberedName> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let prefix = &stem[..stem.len() - digits];
    let number = stem[stem.len() - digits..].parse().ok()?;
    Some(NumberedName {
        prefix: prefix.to_string(),
        width: digits,
        number,
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase()),
    })
}

/// Resolve the set starting at `path`. None when the file has no numbered
/// sibling or the directory cannot be listed.
pub fn detect(path: &Path, lister: &dyn DirLister) -> Option<ContinuousSet> {
    let start = split_name(path)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let entries = match lister.list(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("cannot list {:?}: {}", dir, err);
            return None;
        }
    };

    let mut members: Vec<(u64, PathBuf, u64)> = entries
        .into_iter()
        .filter_map(|(candidate, size)| {
            let name = split_name(&candidate)?;
            let same_family = name.prefix == start.prefix
                && name.width == start.width
                && name.extension == start.extension;
            (same_family && name.number >= start.number).then_some((name.number, candidate, size))
        })
        .collect();
    members.sort_by_key(|(number, _, _)| *number);
    members.dedup_by_key(|(number, _, _)| *number);

    if members.len() < 2 {
        return None;
    }
    let total_size = members.iter().map(|(_, _, size)| size).sum();
    let (_, last_path, last_size) = members.last()?.clone();
    tracing::debug!("continuous set of {} files from {:?}", members.len(), path);
    Some(ContinuousSet {
        count: members.len(),
        total_size,
        last_path,
        last_size,
    })
}
