/// The background compactor and its wake-up trigger.
///
/// One pass merges every sealed segment into a single compacted segment
/// holding only the most recent record per key (tombstones included, so
/// deletions keep shadowing after a restart), publishes it under the
/// highest input id, then deletes the inputs. The active segment is never
/// touched. Publication happens in the segment map *before* any deletion,
/// so a concurrent reader sees either the old inputs or the new compacted
/// segment, never a gap.
///
/// A pass is not transactional: any I/O failure abandons it, the error is
/// logged, and the next wake-up retries from scratch. A partially written
/// compact file left behind by a crash is replayed on startup and
/// superseded by the next successful pass.
use anyhow::{Context, Result};
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use segment::Segment;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{recovery, Database, Shared};

/// Wake-up signal for the compactor.
///
/// A signal arriving while a pass is running leaves one pending wake-up
/// behind, so a burst of `notify` calls costs at most one extra pass.
pub(crate) struct Trigger {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Trigger {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        *self.pending.lock() = true;
        self.cv.notify_one();
    }

    /// Blocks until signalled. Returns `false` once `shutdown` is set.
    fn wait(&self, shutdown: &AtomicBool) -> bool {
        let mut pending = self.pending.lock();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            if *pending {
                *pending = false;
                return true;
            }
            self.cv.wait(&mut pending);
        }
    }
}

/// Background worker owning the merge loop. One per database, spawned by
/// `start` and joined by `stop`.
pub(crate) struct Compactor {
    shared: Arc<Shared>,
}

impl Compactor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Thread body: wait for a wake-up, run one pass, repeat until
    /// shutdown.
    pub(crate) fn run(self) {
        debug!("compactor ready");
        while self.shared.trigger.wait(&self.shared.shutdown) {
            if let Err(e) = self.pass() {
                error!("compaction pass failed: {:#}", e);
            }
        }
        debug!("compactor stopped");
    }

    /// One merge pass.
    ///
    /// Reads its inputs straight from disk with fresh indexes; the live
    /// segment map is only touched at the publish step.
    fn pass(&self) -> Result<()> {
        let mut files = recovery::list_segment_files(&self.shared.base_dir)?;

        // The highest id is the active segment. Never an input.
        files.pop();
        if files.len() < 2 {
            return Ok(());
        }
        let max_input_id = files[files.len() - 1].1;

        info!(
            "compacting {} segments (max input id {})",
            files.len(),
            max_input_id
        );

        let mut inputs = Vec::with_capacity(files.len());
        for (path, id, compacted) in &files {
            let seg = Segment::recover(path, *id, *compacted)
                .with_context(|| format!("scanning input segment {}", path.display()))?;
            inputs.push(seg);
        }

        // Later inputs overwrite earlier entries, so each key ends up
        // pointing at the highest-id input that holds it.
        let mut most_recent: HashMap<Vec<u8>, &Segment> = HashMap::new();
        for seg in &inputs {
            for key in seg.keys() {
                most_recent.insert(key, seg);
            }
        }

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_millis();
        let name = recovery::compacted_file_name(now_ms, max_input_id);
        let path = self.shared.base_dir.join(&name);
        let merged = Segment::create(&path, max_input_id, true, self.shared.segment_capacity)
            .with_context(|| format!("creating compacted segment {}", path.display()))?;

        let mut buf = Vec::new();
        for (key, source) in &most_recent {
            buf.clear();
            let live = source
                .read(key, &mut buf)
                .with_context(|| format!("reading key from input segment {}", source.id()))?;
            if live {
                merged.append(key, Some(buf.as_slice()))?;
            } else {
                merged.append(key, None)?;
            }
        }
        merged.close()?;

        {
            let mut map = self.shared.segments.write();
            map.by_id.insert(max_input_id, Arc::new(merged));

            for id in (1..max_input_id).rev() {
                if let Some(seg) = map.by_id.remove(&id) {
                    seg.delete_file()
                        .with_context(|| format!("deleting retired segment {}", id))?;
                }
            }
        }

        // Whatever inputs the map loop did not already unlink (the one the
        // merged segment replaced, plus any orphan compact files).
        for (path, _, _) in &files {
            let _ = std::fs::remove_file(path);
        }

        info!(
            "compaction done: {} inputs merged into {} ({} keys)",
            files.len(),
            name,
            most_recent.len()
        );
        Ok(())
    }
}

impl Database {
    /// Asks the compactor for a pass and returns immediately. Rapid
    /// repeated calls coalesce into at most one queued pass.
    pub fn compact(&self) {
        self.shared.trigger.notify();
    }

    /// Runs one compaction pass on the calling thread.
    #[cfg(test)]
    pub(crate) fn compact_blocking(&self) -> Result<()> {
        Compactor::new(Arc::clone(&self.shared)).pass()
    }
}
