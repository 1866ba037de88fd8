//! # Segment - one append-only log file plus its offset index
//!
//! A segment is the unit of storage rotation in the engine. On disk it is
//! a pure concatenation of [`record::Record`] images; in memory it carries
//! an index mapping each key to the byte offset of its most recent record
//! in the file.
//!
//! Segments come in two flavours:
//!
//! - **active**: created empty via [`Segment::create`], holds an open
//!   append handle and accepts writes until sealed.
//! - **sealed**: either an active segment after [`Segment::close`], or an
//!   existing file opened via [`Segment::recover`], which rebuilds the
//!   index by scanning every record.
//!
//! The recovery scan is corruption-tolerant: after any decode failure it
//! advances a single byte and tries again, so a torn tail or a flipped bit
//! costs only the records it actually damaged.
//!
//! ## Concurrency
//!
//! A segment is shared (`&self`) between any number of readers and at most
//! one appender. The append handle and the running file length live behind
//! one mutex so the offset captured for the index always matches the byte
//! range written; the index itself sits behind an `RwLock`. Readers open
//! a fresh read-only handle per lookup and never block each other.

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use record::{Record, RecordError};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// An underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Decode failure at an indexed offset or during a scan.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Lookup for a key this segment's index does not hold. The database
    /// checks [`Segment::contains`] first, so hitting this is a logic bug.
    #[error("key not present in segment index")]
    NotIndexed,

    /// Append on a segment with no open write handle.
    #[error("segment is closed for writing")]
    Closed,
}

/// Write-side state of an active segment.
struct Appender {
    file: File,
    /// Running file length; the next record's offset.
    len: u64,
}

/// One append-only segment file and its in-memory key index.
pub struct Segment {
    id: u64,
    compacted: bool,
    path: PathBuf,
    /// Roll threshold in bytes. Zero for recovered segments, which never
    /// take appends.
    capacity: u64,
    index: RwLock<HashMap<Vec<u8>, u64>>,
    appender: Mutex<Option<Appender>>,
}

impl Segment {
    /// Creates a brand-new active segment at `path`.
    ///
    /// Fails if the file already exists: segment ids are never reused, so
    /// a pre-existing file means id allocation went wrong upstream.
    pub fn create<P: AsRef<Path>>(
        path: P,
        id: u64,
        compacted: bool,
        capacity: u64,
    ) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        debug!("created segment {} at {}", id, path.display());

        Ok(Self {
            id,
            compacted,
            path,
            capacity,
            index: RwLock::new(HashMap::new()),
            appender: Mutex::new(Some(Appender { file, len: 0 })),
        })
    }

    /// Opens an existing segment file as sealed, rebuilding its index by
    /// scanning every record in the file.
    pub fn recover<P: AsRef<Path>>(path: P, id: u64, compacted: bool) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let index = rebuild_index(&path)?;
        debug!(
            "recovered segment {} from {} ({} keys)",
            id,
            path.display(),
            index.len()
        );

        Ok(Self {
            id,
            compacted,
            path,
            capacity: 0,
            index: RwLock::new(index),
            appender: Mutex::new(None),
        })
    }

    /// Appends one record and indexes it, returning the offset it was
    /// written at. A `None` value appends a tombstone.
    ///
    /// # Errors
    ///
    /// [`SegmentError::Closed`] if the segment has been sealed.
    pub fn append(&self, key: &[u8], value: Option<&[u8]>) -> Result<u64, SegmentError> {
        let mut guard = self.appender.lock();
        let appender = guard.as_mut().ok_or(SegmentError::Closed)?;

        let record = match value {
            Some(value) => Record::put(key.to_vec(), value.to_vec()),
            None => Record::tombstone(key.to_vec()),
        };
        let image = record.encode();

        let offset = appender.len;
        appender.file.write_all(&image)?;
        appender.len += image.len() as u64;
        trace!(
            "segment {}: appended {} bytes at offset {}",
            self.id,
            image.len(),
            offset
        );

        self.index.write().insert(record.key, offset);
        Ok(offset)
    }

    /// Reads the record for `key`, streaming its value into `out`.
    ///
    /// Returns `true` for a live record, `false` for a tombstone.
    ///
    /// # Errors
    ///
    /// [`SegmentError::NotIndexed`] if the key is absent from the index;
    /// a [`RecordError::CrcMismatch`] here means the bytes at the indexed
    /// offset are corrupt on disk.
    pub fn read<W: Write>(&self, key: &[u8], out: &mut W) -> Result<bool, SegmentError> {
        let offset = *self.index.read().get(key).ok_or(SegmentError::NotIndexed)?;
        trace!("segment {}: reading record at offset {}", self.id, offset);

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let record = Record::decode(&mut BufReader::new(file))?;

        if record.tombstone {
            return Ok(false);
        }
        out.write_all(&record.value)?;
        Ok(true)
    }

    /// In-memory index test only; touches no file.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Snapshot of the indexed keys. The compactor folds these across its
    /// input segments; a snapshot keeps the lock scope short.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.read().keys().cloned().collect()
    }

    /// Number of keys in the index.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Current file size on disk.
    pub fn size_bytes(&self) -> Result<u64, SegmentError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Whether the segment has reached its roll threshold. Only meaningful
    /// while active.
    ///
    /// # Errors
    ///
    /// [`SegmentError::Closed`] if the segment has been sealed.
    pub fn at_capacity(&self) -> Result<bool, SegmentError> {
        let guard = self.appender.lock();
        let appender = guard.as_ref().ok_or(SegmentError::Closed)?;
        Ok(appender.len >= self.capacity)
    }

    /// Seals the segment, syncing it to disk first. Idempotent; the index
    /// stays readable.
    pub fn close(&self) -> Result<(), SegmentError> {
        if let Some(appender) = self.appender.lock().take() {
            appender.file.sync_all()?;
            debug!("sealed segment {}", self.id);
        }
        Ok(())
    }

    /// Seals the segment and unlinks its file.
    pub fn delete_file(&self) -> Result<(), SegmentError> {
        drop(self.appender.lock().take());
        std::fs::remove_file(&self.path)?;
        debug!("deleted segment file {}", self.path.display());
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this segment was produced by compaction. A compacted
    /// segment covers every key that appeared in any of its inputs.
    pub fn is_compacted(&self) -> bool {
        self.compacted
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("compacted", &self.compacted)
            .field("path", &self.path)
            .field("keys", &self.index.read().len())
            .field("active", &self.appender.lock().is_some())
            .finish()
    }
}

/// Rebuilds a segment index by scanning every record in the file.
///
/// Decoding restarts one byte forward after any failure, so the scan
/// resyncs at the next offset where a whole record checks out. Worst case
/// this is O(file size x record size); corruption is rare and confined to
/// the tail, so the common case is a single straight pass.
fn rebuild_index(path: &Path) -> Result<HashMap<Vec<u8>, u64>, SegmentError> {
    let data = std::fs::read(path)?;
    let mut index = HashMap::new();
    let mut offset = 0usize;

    while offset < data.len() {
        match Record::decode(&mut &data[offset..]) {
            Ok(record) => {
                let size = record.disk_size() as usize;
                index.insert(record.key, offset as u64);
                offset += size;
            }
            Err(RecordError::Io(e)) => return Err(SegmentError::Io(e)),
            Err(e) => {
                trace!(
                    "scan of {}: no record at offset {} ({}), resyncing",
                    path.display(),
                    offset,
                    e
                );
                offset += 1;
            }
        }
    }

    Ok(index)
}
