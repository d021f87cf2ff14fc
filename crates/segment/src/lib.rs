//! # Segment — on-disk segment storage
//!
//! Owns the data directory of a DriftKV store: a set of numbered `<fid>.dat`
//! files, exactly one of which (the highest id) is *active* and accepts
//! appends. All others are *sealed*: immutable until merge unlinks them.
//!
//! File handles are opened lazily and cached for the life of the [`Storage`];
//! sealed segment bytes never change once written, so a cached handle stays
//! valid until [`remove_segment`](Storage::remove_segment) drops it.
//!
//! Rotation is evaluated *after* an append completes: a record that begins
//! below the size threshold may cross it, and records are never split across
//! segments. That keeps every record contiguous within one file, which the
//! recovery scan depends on.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// File extension for segment files.
pub const SEGMENT_EXT: &str = "dat";

/// Segment size used when the caller does not configure one (256 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Errors from segment storage. Short reads surface as
/// [`io::ErrorKind::UnexpectedEof`]; short writes as
/// [`io::ErrorKind::WriteZero`].
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A directory of segment files with one active append target.
pub struct Storage {
    dir: PathBuf,
    segment_size: u64,
    /// Cached handles, ordered by fid.
    handles: BTreeMap<u32, File>,
    active_fid: u32,
    active_off: u64,
}

impl Storage {
    /// Opens (or creates) a segment directory.
    ///
    /// A missing or empty directory is initialized with `0.dat` and an
    /// append cursor at offset 0. If segments already exist, every one is
    /// opened read-write and cached, and the highest id becomes active with
    /// its cursor at the current file length; the caller is expected to
    /// rewind it to the last record boundary via
    /// [`truncate_active`](Self::truncate_active) after scanning.
    pub fn open(dir: impl AsRef<Path>, segment_size: u64) -> Result<Self, SegmentError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ids = segment_ids(&dir)?;
        let mut storage = Self {
            dir,
            segment_size,
            handles: BTreeMap::new(),
            active_fid: 0,
            active_off: 0,
        };

        match ids.last() {
            None => {
                let path = storage.segment_path(0);
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(path)?;
                storage.handles.insert(0, file);
            }
            Some(&last) => {
                for &fid in &ids {
                    let path = storage.segment_path(fid);
                    let file = OpenOptions::new().read(true).write(true).open(path)?;
                    storage.handles.insert(fid, file);
                }
                storage.active_fid = last;
                storage.active_off = storage.handle(last)?.metadata()?.len();
            }
        }

        Ok(storage)
    }

    /// The data directory this storage owns.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active `(fid, append offset)`.
    #[must_use]
    pub fn active(&self) -> (u32, u64) {
        (self.active_fid, self.active_off)
    }

    /// Number of segments with a cached handle (all known segments).
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.handles.len()
    }

    /// Appends `bytes` to the active segment and returns the `(fid, offset)`
    /// at which the write began. Rotates afterwards if the cursor reached the
    /// size threshold.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(u32, u64), SegmentError> {
        let fid = self.active_fid;
        let off = self.active_off;

        let file = self.handle(fid)?;
        file.seek(SeekFrom::Start(off))?;
        file.write_all(bytes)?;

        self.active_off = off + bytes.len() as u64;
        if self.active_off >= self.segment_size {
            self.rotate()?;
        }
        Ok((fid, off))
    }

    /// Reads exactly `buf.len()` bytes from segment `fid` at `off`, opening
    /// and caching the handle if needed.
    pub fn read_at(&mut self, fid: u32, off: u64, buf: &mut [u8]) -> Result<(), SegmentError> {
        let file = self.handle(fid)?;
        file.seek(SeekFrom::Start(off))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Current byte length of segment `fid`.
    pub fn segment_len(&mut self, fid: u32) -> Result<u64, SegmentError> {
        Ok(self.handle(fid)?.metadata()?.len())
    }

    /// Closes the cached handle for `fid` and unlinks the file.
    ///
    /// The handle is dropped before the unlink so no descriptor outlives the
    /// file. Reads against `fid` fail afterwards.
    pub fn remove_segment(&mut self, fid: u32) -> Result<(), SegmentError> {
        self.handles.remove(&fid);
        fs::remove_file(self.segment_path(fid))?;
        Ok(())
    }

    /// Truncates the active segment to `off` and moves the append cursor
    /// there. Used by recovery to discard a torn record at the tail.
    pub fn truncate_active(&mut self, off: u64) -> Result<(), SegmentError> {
        let fid = self.active_fid;
        let file = self.handle(fid)?;
        file.set_len(off)?;
        self.active_off = off;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), SegmentError> {
        let fid = self.active_fid + 1;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.segment_path(fid))?;
        self.handles.insert(fid, file);
        self.active_fid = fid;
        self.active_off = 0;
        debug!(fid, "rotated to new active segment");
        Ok(())
    }

    fn handle(&mut self, fid: u32) -> Result<&mut File, SegmentError> {
        use std::collections::btree_map::Entry;
        let path = self.segment_path(fid);
        match self.handles.entry(fid) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                Ok(entry.insert(file))
            }
        }
    }

    fn segment_path(&self, fid: u32) -> PathBuf {
        self.dir.join(format!("{fid}.{SEGMENT_EXT}"))
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("dir", &self.dir)
            .field("segment_size", &self.segment_size)
            .field("segments", &self.handles.len())
            .field("active_fid", &self.active_fid)
            .field("active_off", &self.active_off)
            .finish()
    }
}

/// Enumerates segment ids in `dir`, ascending. Files that are not named
/// `<non-negative integer>.dat` are ignored.
pub fn segment_ids(dir: &Path) -> Result<Vec<u32>, SegmentError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(fid) = stem.parse::<u32>() {
            ids.push(fid);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
