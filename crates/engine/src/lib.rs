//! # Engine - DriftKV Storage Engine
//!
//! The central orchestrator that ties together the [`record`], [`segment`],
//! and [`keydir`] crates into an embedded Bitcask-style key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                    STORE                      │
//! │              (one writer mutex)               │
//! │                                               │
//! │ write.rs → encode record → append to active   │
//! │              segment → upsert key directory   │
//! │                                               │
//! │ read.rs  → key directory → (fid, off, sizes)  │
//! │              → one positional read → verify   │
//! │                                               │
//! │ merge.rs → scan sealed segments, re-append    │
//! │              live records, unlink the rest    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | [`lib.rs`]   | `Store` struct, `Options`, errors, accessors, `Debug` |
//! | [`recovery`] | Rebuilds the key directory by scanning segments       |
//! | [`write`]    | `set()`, `delete()`                                   |
//! | [`read`]     | `get()`                                               |
//! | [`merge`]    | Offline compaction of sealed segments                 |
//! | [`scan`]     | Record-at-a-time segment scanner shared by the above  |
//!
//! ## Crash Safety
//!
//! Appends are buffered writes; the engine issues no fsync between records,
//! so a crash may leave one torn record at the tail of the active segment.
//! Recovery truncates that tail and rebuilds the directory from the segments
//! in id order, so the latest completed write for each key wins. Sealed
//! segments end on a record boundary (rotation only follows a completed
//! append), so a torn record anywhere else is treated as corruption.

mod merge;
mod read;
mod recovery;
mod scan;
mod write;

use std::fmt;
use std::path::PathBuf;

use keydir::KeyDir;
use parking_lot::Mutex;
use segment::{Storage, DEFAULT_SEGMENT_SIZE};
use thiserror::Error;
use tracing::info;

pub use keydir::RecordPos;
pub use record::META_SIZE;

/// Errors surfaced by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `get` or `delete` of a key with no live entry.
    #[error("key not found")]
    KeyNotFound,

    /// `merge` with fewer than two segments on disk.
    #[error("no need to merge")]
    NoNeedToMerge,

    /// Scan corruption: a record frame stops short of its declared size
    /// mid-segment, or a verified frame carries an unknown flag byte.
    /// `offset` is where the offending record begins.
    #[error("segment {fid} corrupt at offset {offset}")]
    Corrupt { fid: u32, offset: u64 },

    #[error(transparent)]
    Record(#[from] record::RecordError),

    #[error(transparent)]
    Segment(#[from] segment::SegmentError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory holding the segment files. Created if absent.
    pub dir: PathBuf,
    /// Soft rotation threshold in bytes; 0 selects
    /// [`DEFAULT_SEGMENT_SIZE`] (256 MiB).
    pub segment_size: u64,
}

impl Options {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 0,
        }
    }

    /// Overrides the rotation threshold.
    #[must_use]
    pub fn segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = bytes;
        self
    }
}

/// An embedded, append-only, log-structured key-value store.
///
/// # Write Path
///
/// 1. Encode the mutation as one record (put or keyed tombstone).
/// 2. Append it to the active segment, rotating afterwards if the segment
///    reached the size threshold.
/// 3. Upsert the in-memory key directory with the record's location.
///
/// # Read Path
///
/// 1. Look up the key directory for `(fid, offset, sizes)`.
/// 2. Read the whole record in a single positional read.
/// 3. Verify the checksum and return the value.
///
/// # Concurrency
///
/// Every public operation takes one exclusive mutex, so a `Store` can be
/// shared across threads (e.g. in an `Arc`); operations linearize in lock
/// acquisition order.
pub struct Store {
    inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    pub(crate) dir: KeyDir,
    pub(crate) storage: Storage,
}

impl Store {
    /// Opens a store, creating the data directory if needed and otherwise
    /// rebuilding the key directory from the segments on disk.
    pub fn open(options: Options) -> Result<Self> {
        let segment_size = if options.segment_size == 0 {
            DEFAULT_SEGMENT_SIZE
        } else {
            options.segment_size
        };

        let storage = Storage::open(&options.dir, segment_size)?;
        let mut inner = Inner {
            dir: KeyDir::new(),
            storage,
        };
        recovery::recover(&mut inner)?;

        info!(
            dir = %options.dir.display(),
            keys = inner.dir.len(),
            segments = inner.storage.segment_count(),
            "store opened"
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().dir.len()
    }

    /// `true` if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().dir.is_empty()
    }

    /// Number of segment files currently known to the store.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.lock().storage.segment_count()
    }

    /// Active `(fid, append offset)`.
    #[must_use]
    pub fn active_segment(&self) -> (u32, u64) {
        self.inner.lock().storage.active()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("keys", &inner.dir.len())
            .field("segments", &inner.storage.segment_count())
            .field("active", &inner.storage.active())
            .finish()
    }
}

#[cfg(test)]
mod tests;
