//! Merge: offline compaction of sealed segments.
//!
//! Rewrites the surviving records of every sealed segment into the active
//! segment, then unlinks the sealed files. Overwritten values and deleted
//! keys are simply never rewritten, which is how the log reclaims space.

use keydir::RecordPos;
use tracing::{debug, info};

use crate::scan::{ScanStep, SegmentScanner};
use crate::{Inner, Result, Store, StoreError};

impl Store {
    /// Compacts all sealed segments into the active segment.
    ///
    /// A record is *live* iff the key directory's current entry for its key
    /// points at the offset where the record begins; anything else means it
    /// was superseded by a later put or delete. Live records are re-appended
    /// (byte-identical, original timestamp preserved) and the directory is
    /// updated to their new location. Tombstones and stale puts are dropped.
    /// Once a sealed segment has been fully scanned, its handle is closed
    /// and the file unlinked.
    ///
    /// Re-appends flow through the normal append path, so a merge may itself
    /// trigger rotation; segments created mid-merge are not rescanned.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoNeedToMerge`] when fewer than two segments exist.
    pub fn merge(&self) -> Result<()> {
        self.inner.lock().merge()
    }
}

impl Inner {
    pub(crate) fn merge(&mut self) -> Result<()> {
        let ids = segment::segment_ids(self.storage.dir())?;
        if ids.len() < 2 {
            return Err(StoreError::NoNeedToMerge);
        }

        // Every segment except the highest id is sealed.
        let sealed = &ids[..ids.len() - 1];
        let mut rewritten = 0u64;

        for &fid in sealed {
            let mut scanner = SegmentScanner::new(&mut self.storage, fid)?;
            loop {
                let (offset, rec) = match scanner.next(&mut self.storage)? {
                    ScanStep::Record(offset, rec) => (offset, rec),
                    ScanStep::Eof => break,
                    // Sealed segments end on a record boundary, so a torn
                    // frame here is damage, not a crash artifact.
                    ScanStep::Torn { offset } => {
                        return Err(StoreError::Corrupt { fid, offset });
                    }
                };
                if rec.meta.is_tombstone() {
                    continue;
                }
                let live = match self.dir.get(&rec.key) {
                    Some(pos) => pos.fid == fid && pos.offset == offset,
                    None => false,
                };
                if !live {
                    continue;
                }

                let meta = rec.meta;
                let (new_fid, new_offset) = self.storage.append(&rec.encode())?;
                self.dir.insert(
                    rec.key,
                    RecordPos {
                        fid: new_fid,
                        offset: new_offset,
                        key_size: meta.key_size,
                        value_size: meta.value_size,
                        timestamp: meta.timestamp,
                    },
                );
                rewritten += 1;
            }

            self.storage.remove_segment(fid)?;
            debug!(fid, "merged and unlinked sealed segment");
        }

        info!(
            segments = sealed.len(),
            records = rewritten,
            "merge complete"
        );
        Ok(())
    }
}
