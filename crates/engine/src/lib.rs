//! # Engine - EbbKV storage engine
//!
//! The central orchestrator that ties the `record` codec and the
//! [`segment`] abstraction into a log-structured key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                  DATABASE                     │
//! │                                               │
//! │ write.rs → append to active segment           │
//! │              |                                │
//! │              |  (size threshold reached?)     │
//! │              |            yes                 │
//! │              v                                │
//! │           roll → seal + fresh active segment  │
//! │              |                                │
//! │              v                                │
//! │        signal compactor                       │
//! │                                               │
//! │ read.rs → segments, highest id first          │
//! │            (first hit wins; a compacted       │
//! │             segment closes the search)        │
//! └───────────────────────────────────────────────┘
//!        |
//!        v  (background thread)
//! compaction.rs → merge all sealed segments into
//!                 one compacted segment, retire inputs
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | [`lib.rs`]     | `Database` struct, lifecycle, accessors, `Debug`, `Drop` |
//! | [`recovery`]   | segment file naming, directory scan, startup replay      |
//! | [`write`]      | `write()`, `put()`, `delete()`, segment rolling          |
//! | [`read`]       | `read()`, `get()` routed newest segment first            |
//! | [`compaction`] | background worker, wake-up trigger, merge pass           |
//!
//! ## Crash Safety
//!
//! Every record carries a CRC over its payload. On startup every segment
//! file is scanned to rebuild its index; a torn or bit-flipped record is
//! skipped with byte-granular resync, so a crash mid-append costs at most
//! the damaged tail. The compactor publishes its merged segment in the
//! segment map *before* deleting any input, so concurrent readers always
//! see either the old inputs or the new compacted segment, never a gap.

mod compaction;
mod read;
mod recovery;
mod write;

use anyhow::{Context, Result};
use compaction::{Compactor, Trigger};
use log::{error, info};
use parking_lot::{Mutex, RwLock};
use segment::Segment;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The segment ring: every live segment keyed by id, plus the id of the
/// one currently receiving writes.
pub(crate) struct SegmentMap {
    pub(crate) by_id: HashMap<u64, Arc<Segment>>,
    /// Highest allocated id; the active segment's id once started.
    pub(crate) current_id: u64,
}

/// State shared between the database handle and the compactor thread.
pub(crate) struct Shared {
    pub(crate) base_dir: PathBuf,
    pub(crate) segment_capacity: u64,
    pub(crate) segments: RwLock<SegmentMap>,
    pub(crate) trigger: Trigger,
    pub(crate) shutdown: AtomicBool,
    /// When cleared, rolls and recovery no longer wake the compactor on
    /// their own; explicit [`Database::compact`] calls still do.
    pub(crate) auto_compact: AtomicBool,
}

/// An embedded, single-node, persistent key-value store.
///
/// Keys and values are opaque byte strings. Writes append to the active
/// segment and update its in-memory offset index; reads walk the segments
/// from the highest id down and return the first hit; deletes append a
/// tombstone. A background compactor merges sealed segments and retires
/// the inputs.
///
/// All public operations take `&self` and may be called from any thread.
///
/// # Example
///
/// ```rust,no_run
/// use engine::Database;
///
/// let db = Database::new("./data", 4 * 1024 * 1024);
/// db.start().unwrap();
/// db.put(b"hello", b"world").unwrap();
/// assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
/// db.delete(b"hello").unwrap();
/// db.stop().unwrap();
/// ```
pub struct Database {
    pub(crate) shared: Arc<Shared>,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Creates a cold database handle. Nothing touches disk until
    /// [`start`](Database::start).
    ///
    /// # Arguments
    ///
    /// * `base_dir` - directory holding the segment files; created on
    ///   first start.
    /// * `segment_capacity` - byte threshold at which the active segment
    ///   is sealed and a fresh one opened.
    pub fn new<P: AsRef<Path>>(base_dir: P, segment_capacity: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                base_dir: base_dir.as_ref().to_path_buf(),
                segment_capacity,
                segments: RwLock::new(SegmentMap {
                    by_id: HashMap::new(),
                    current_id: 0,
                }),
                trigger: Trigger::new(),
                shutdown: AtomicBool::new(false),
                auto_compact: AtomicBool::new(true),
            }),
            compactor: Mutex::new(None),
        }
    }

    /// Brings the database online.
    ///
    /// Creates the base directory on first use; otherwise recovers every
    /// segment file found there, rebuilding each index from disk. Either
    /// way a fresh empty segment becomes the active one, so a recovered
    /// maximum is sealed immediately. Finally the compactor thread is
    /// spawned; if recovery found segments it is signalled once so
    /// leftovers from the previous run get merged promptly.
    pub fn start(&self) -> Result<()> {
        let mut compactor = self.compactor.lock();
        anyhow::ensure!(compactor.is_none(), "database already started");

        let recovered = if self.shared.base_dir.exists() {
            recovery::recover(&self.shared)?
        } else {
            std::fs::create_dir_all(&self.shared.base_dir).with_context(|| {
                format!(
                    "creating database directory {}",
                    self.shared.base_dir.display()
                )
            })?;
            0
        };

        {
            let mut map = self.shared.segments.write();
            let id = map.current_id + 1;
            let seg = recovery::create_plain_segment(&self.shared, id)?;
            map.by_id.insert(id, Arc::new(seg));
            map.current_id = id;
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("ebbkv-compactor".into())
            .spawn(move || Compactor::new(shared).run())
            .context("spawning compactor thread")?;
        *compactor = Some(handle);
        drop(compactor);

        if recovered > 0 && self.shared.auto_compact.load(Ordering::SeqCst) {
            self.shared.trigger.notify();
        }

        info!(
            "database online at {} ({} segments recovered)",
            self.shared.base_dir.display(),
            recovered
        );
        Ok(())
    }

    /// Takes the database offline: stops the compactor and seals every
    /// segment, syncing them to disk.
    ///
    /// In-flight operations finish first (sealing happens under the
    /// segment-map write lock); operations issued afterwards fail. A
    /// stopped database stays stopped; open a new handle to restart.
    /// Idempotent, and run best-effort on drop.
    pub fn stop(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.trigger.notify();

        {
            let map = self.shared.segments.write();
            for seg in map.by_id.values() {
                if let Err(e) = seg.close() {
                    error!("closing segment {}: {}", seg.id(), e);
                }
            }
        }

        if let Some(handle) = self.compactor.lock().take() {
            if handle.join().is_err() {
                error!("compactor thread panicked");
            }
        }

        info!("database stopped");
        Ok(())
    }

    /// Enables or disables automatic compaction wake-ups from rolls and
    /// recovery. Enabled by default; disabling leaves compaction entirely
    /// to [`compact`](Database::compact) calls. Useful for testing and
    /// bulk loads.
    pub fn set_auto_compact(&self, enabled: bool) {
        self.shared.auto_compact.store(enabled, Ordering::SeqCst);
    }

    /// Directory holding the segment files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.shared.base_dir
    }

    /// Number of live segments, the active one included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.shared.segments.read().by_id.len()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.shared.segments.read();
        f.debug_struct("Database")
            .field("base_dir", &self.shared.base_dir)
            .field("segment_capacity", &self.shared.segment_capacity)
            .field("current_id", &map.current_id)
            .field("segment_count", &map.by_id.len())
            .finish()
    }
}

/// Best-effort shutdown on drop.
///
/// Drop cannot propagate errors; anything notable was already logged by
/// [`Database::stop`].
impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests;
