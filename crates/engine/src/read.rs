/// Read path: `read()` and `get()`.
///
/// Lookups walk the segments from the highest id down. Within a segment
/// the index already resolved to the most recent offset, and later writes
/// always land in higher ids, so the first segment that knows the key
/// holds its most recent record. A compacted segment that does not know
/// the key ends the walk: by construction it covers every key that
/// appeared in any of its inputs, so nothing older can hold the key
/// either.
use anyhow::{Context, Result};
use log::trace;
use std::io::Write;

use crate::Database;

impl Database {
    /// Looks up `key`, streaming the value into `out`.
    ///
    /// Returns `false` both for a key that was never written and for one
    /// whose most recent record is a tombstone; callers treat both as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record at an indexed offset fails to read
    /// or fails its CRC check (on-disk corruption).
    pub fn read<W: Write>(&self, key: &[u8], out: &mut W) -> Result<bool> {
        let map = self.shared.segments.read();
        let mut id = map.current_id;

        while id > 0 {
            match map.by_id.get(&id) {
                Some(seg) if seg.contains(key) => {
                    trace!("read: segment {} holds the key", id);
                    return seg
                        .read(key, out)
                        .with_context(|| format!("reading key from segment {}", id));
                }
                Some(seg) if seg.is_compacted() => {
                    trace!("read: compacted segment {} closes the search", id);
                    break;
                }
                _ => {}
            }
            id -= 1;
        }

        trace!("read: key not found");
        Ok(false)
    }

    /// Convenience lookup returning the value as a buffer, `None` when
    /// absent or tombstoned.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut out = Vec::new();
        Ok(if self.read(key, &mut out)? {
            Some(out)
        } else {
            None
        })
    }
}
