//! Cold-start recovery: rebuilds the key directory by scanning every
//! segment in ascending id order.
//!
//! Puts overwrite the directory entry for their key and tombstones remove
//! it, so after the scan the directory reflects the latest completed write
//! for every key: ascending segment ids plus monotonically growing offsets
//! give latest-wins without comparing timestamps. Running recovery twice on
//! an unchanged directory yields the same state.

use keydir::RecordPos;
use tracing::{info, warn};

use crate::scan::{ScanStep, SegmentScanner};
use crate::{Inner, Result, StoreError};

/// Scans the data directory and rebuilds `inner.dir`, leaving the highest
/// segment as the active one with its cursor just past the last good record.
///
/// A torn record at the tail of the highest segment (crash mid-append) is
/// truncated away; a torn record in any sealed segment is fatal, as is a
/// checksum mismatch anywhere.
pub(crate) fn recover(inner: &mut Inner) -> Result<()> {
    let ids = segment::segment_ids(inner.storage.dir())?;
    let last = match ids.last() {
        Some(&last) => last,
        None => return Ok(()),
    };

    for &fid in &ids {
        let mut scanner = SegmentScanner::new(&mut inner.storage, fid)?;
        let mut torn_at = None;

        loop {
            match scanner.next(&mut inner.storage)? {
                ScanStep::Record(offset, rec) => {
                    if rec.meta.is_tombstone() {
                        inner.dir.remove(&rec.key);
                    } else {
                        inner.dir.insert(
                            rec.key,
                            RecordPos {
                                fid,
                                offset,
                                key_size: rec.meta.key_size,
                                value_size: rec.meta.value_size,
                                timestamp: rec.meta.timestamp,
                            },
                        );
                    }
                }
                ScanStep::Eof => break,
                ScanStep::Torn { offset } if fid == last => {
                    torn_at = Some(offset);
                    break;
                }
                ScanStep::Torn { offset } => {
                    return Err(StoreError::Corrupt { fid, offset });
                }
            }
        }

        if fid == last {
            if let Some(offset) = torn_at {
                warn!(fid, offset, "truncating torn record at active segment tail");
            }
            // Rewind the append cursor to the last record boundary. On a
            // clean EOF this is the file length and the call is a no-op.
            inner.storage.truncate_active(scanner.offset())?;
        }
    }

    info!(
        segments = ids.len(),
        keys = inner.dir.len(),
        "recovery complete"
    );
    Ok(())
}
