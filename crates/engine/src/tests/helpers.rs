use crate::Database;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Opt into log output with `RUST_LOG=debug cargo test`.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Opens a started database in a fresh temp directory.
pub fn open_db(segment_capacity: u64) -> (TempDir, Database) {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path(), segment_capacity);
    db.start().unwrap();
    (dir, db)
}

/// Like [`open_db`], but with automatic compaction wake-ups disabled so
/// tests can assert on exact file layouts and drive passes themselves.
pub fn open_db_manual_compaction(segment_capacity: u64) -> (TempDir, Database) {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path(), segment_capacity);
    db.set_auto_compact(false);
    db.start().unwrap();
    (dir, db)
}

/// Segment file names currently in `dir`, sorted.
pub fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn compact_files(dir: &Path) -> Vec<String> {
    segment_files(dir)
        .into_iter()
        .filter(|n| n.starts_with("compact"))
        .collect()
}

/// Polls `cond` until it holds or the deadline passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
