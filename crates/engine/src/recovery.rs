/// Startup recovery and segment file naming.
///
/// A database directory holds nothing but segment files: `seg-<id>.bin`
/// for plain segments and `compact<ts>-<maxid>.bin` for compacted ones.
/// Recovery lists them ascending by id, rebuilds each index by scanning
/// the file, and registers every one sealed; the id counter resumes past
/// the highest id seen. Files matching neither pattern are ignored.
///
/// When a crash left both an input and the compacted segment that
/// absorbed it under the same id, the compacted one wins the map slot:
/// it holds a record version at least as recent for every key it knows,
/// and the next compaction pass merges whatever the two files disagree
/// on.
use anyhow::{Context, Result};
use log::debug;
use segment::Segment;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Shared;

/// File name of a plain segment.
pub(crate) fn plain_file_name(id: u64) -> String {
    format!("seg-{}.bin", id)
}

/// File name of a compacted segment produced at `timestamp_ms` covering
/// inputs up to `max_source_id`.
pub(crate) fn compacted_file_name(timestamp_ms: u128, max_source_id: u64) -> String {
    format!("compact{}-{}.bin", timestamp_ms, max_source_id)
}

/// Parses a segment file name into `(id, compacted)`.
///
/// Recognizes `seg-<id>.bin` and `compact<ts>-<id>.bin`; anything else
/// yields `None`.
pub(crate) fn parse_file_name(name: &str) -> Option<(u64, bool)> {
    let stem = name.strip_suffix(".bin")?;
    let (rest, compacted) = if let Some(rest) = stem.strip_prefix("compact") {
        (rest, true)
    } else if let Some(rest) = stem.strip_prefix("seg") {
        (rest, false)
    } else {
        return None;
    };

    let (ts, id) = rest.split_once('-')?;
    if !ts.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((id.parse().ok()?, compacted))
}

/// Lists the segment files under `dir`, sorted ascending by id, plain
/// before compacted where a crash left both flavours of one id.
pub(crate) fn list_segment_files(dir: &Path) -> Result<Vec<(PathBuf, u64, bool)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((id, compacted)) = parse_file_name(name) {
            files.push((path, id, compacted));
        }
    }
    files.sort_by_key(|&(_, id, compacted)| (id, compacted));
    Ok(files)
}

/// Replays every segment file in the base directory, registering each as
/// a sealed segment. Returns how many files were recovered.
pub(crate) fn recover(shared: &Shared) -> Result<usize> {
    let files = list_segment_files(&shared.base_dir)?;
    let mut map = shared.segments.write();

    for (path, id, compacted) in &files {
        let seg = Segment::recover(path, *id, *compacted)
            .with_context(|| format!("recovering segment file {}", path.display()))?;
        debug!(
            "recovered segment {} ({} keys, compacted: {})",
            id,
            seg.len(),
            compacted
        );
        map.by_id.insert(*id, Arc::new(seg));
        map.current_id = map.current_id.max(*id);
    }

    Ok(files.len())
}

/// Creates the next plain active segment file.
pub(crate) fn create_plain_segment(shared: &Shared, id: u64) -> Result<Segment> {
    let path = shared.base_dir.join(plain_file_name(id));
    Segment::create(&path, id, false, shared.segment_capacity)
        .with_context(|| format!("creating segment file {}", path.display()))
}
