//! Assigning files to file types by filename.
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::pattern::{FilePattern, FilenameInfo};
use crate::Result;

/// A file matched to a file type, with the metadata parsed from its name.
pub type MatchedFile = (PathBuf, FilenameInfo);

/// Files directly in `dir` whose names match any of `patterns`, sorted and prefixed
/// with `dir`.
///
/// # Errors
/// [Error::Io](crate::Error::Io) if `dir` cannot be read.
pub fn find_files<P: AsRef<Path>>(dir: P, patterns: &[FilePattern]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::default();
    for entry in walkdir::WalkDir::new(dir.as_ref()).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if patterns.iter().any(|p| p.matches(entry.path())) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    found.dedup();
    debug!(dir=?dir.as_ref(), count = found.len(), "found files");
    Ok(found)
}

/// Partition `filenames` into those matching any of `patterns` and the remainder.
///
/// Each file is claimed at most once, and both outputs preserve input order.
#[must_use]
pub fn match_existing(
    filenames: Vec<PathBuf>,
    patterns: &[FilePattern],
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let (matched, remaining): (Vec<PathBuf>, Vec<PathBuf>) = filenames
        .into_iter()
        .partition(|f| patterns.iter().any(|p| p.matches(f)));
    trace!(matched = matched.len(), remaining = remaining.len(), "matched existing files");
    (matched, remaining)
}

/// Assign each of `filenames` to the first of `file_types` with a matching pattern.
///
/// Within a file type the first matching pattern provides the metadata. A file is
/// claimed by at most one file type, so the order of `file_types` decides overlaps.
#[must_use]
pub fn match_file_types(
    filenames: &[PathBuf],
    file_types: &[(String, Vec<FilePattern>)],
) -> HashMap<String, Vec<MatchedFile>> {
    let mut matches: HashMap<String, Vec<MatchedFile>> = HashMap::default();
    for path in filenames {
        let claimed = file_types.iter().find_map(|(file_type, patterns)| {
            patterns
                .iter()
                .find_map(|p| p.parse(path).ok())
                .map(|info| (file_type, info))
        });
        let Some((file_type, info)) = claimed else {
            continue;
        };
        trace!(?path, %file_type, "matched file type");
        matches
            .entry(file_type.clone())
            .or_default()
            .push((path.clone(), info));
    }
    matches
}

/// First navigation candidate whose metadata is a subset, by key and value, of the
/// `primary` metadata.
#[must_use]
pub fn pair_navigation<'a>(
    primary: &FilenameInfo,
    candidates: &'a [MatchedFile],
) -> Option<&'a MatchedFile> {
    candidates.iter().find(|(_, nav)| {
        nav.iter()
            .all(|(key, value)| primary.get(key).is_some_and(|v| v == value))
    })
}
