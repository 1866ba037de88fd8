/// Write path: `write()`, `put()`, `delete()`, and the roll that seals a
/// full active segment.
///
/// All mutations flow through this module. A mutation appends one record
/// to the active segment under the segment-map write lock; if that pushes
/// the segment past its capacity, the segment is sealed, a fresh one with
/// the next id becomes active, and the compactor is signalled.
use anyhow::{ensure, Context, Result};
use log::{debug, trace};
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::{recovery, Database};

impl Database {
    /// Writes `key` with the bytes drained from `value`.
    pub fn write<R: Read>(&self, key: &[u8], value: &mut R) -> Result<()> {
        let mut buf = Vec::new();
        value.read_to_end(&mut buf).context("draining value source")?;
        self.put(key, &buf)
    }

    /// Writes `key` with `value`.
    ///
    /// # Errors
    ///
    /// Fails on an empty key, on I/O failure, or once the database has
    /// been stopped.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        trace!("put: {} byte key, {} byte value", key.len(), value.len());
        self.append_to_active(key, Some(value))
    }

    /// Deletes `key` by appending a tombstone.
    ///
    /// Deleting a key that was never written is legal; the tombstone
    /// simply shadows nothing.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        trace!("delete: {} byte key", key.len());
        self.append_to_active(key, None)
    }

    fn append_to_active(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let mut map = self.shared.segments.write();

        let active = map
            .by_id
            .get(&map.current_id)
            .cloned()
            .context("no active segment; database not started")?;
        active
            .append(key, value)
            .with_context(|| format!("appending to segment {}", active.id()))?;

        if active
            .at_capacity()
            .with_context(|| format!("checking capacity of segment {}", active.id()))?
        {
            debug!("segment {} is at capacity, rolling", active.id());
            active
                .close()
                .with_context(|| format!("sealing segment {}", active.id()))?;

            let id = map.current_id + 1;
            let seg = recovery::create_plain_segment(&self.shared, id)?;
            map.by_id.insert(id, Arc::new(seg));
            map.current_id = id;

            if self.shared.auto_compact.load(Ordering::SeqCst) {
                self.shared.trigger.notify();
            }
        }

        Ok(())
    }
}
