//! Record-at-a-time segment scanner used by recovery and merge.
//!
//! A scan walks a segment from offset 0, reading one record per step:
//! metadata first (to learn the payload sizes), then the payload, then the
//! checksum verification. The scanner reports the offset at which each record
//! *begins*, which is the value the key directory stores and the merge
//! liveness test compares against.
//!
//! A frame that stops short of its declared size is reported as
//! [`ScanStep::Torn`] rather than an error, because the two callers disagree
//! on its meaning: recovery tolerates a torn tail on the active segment while
//! everything else treats it as [`StoreError::Corrupt`].

use record::{decode_meta, Record, FLAG_DELETE, META_SIZE};
use segment::Storage;

use crate::{Result, StoreError};

pub(crate) enum ScanStep {
    /// A verified record and the offset at which it begins.
    Record(u64, Record),
    /// The previous record ended exactly at the end of the segment.
    Eof,
    /// The bytes at `offset` stop short of a whole record.
    Torn { offset: u64 },
}

pub(crate) struct SegmentScanner {
    fid: u32,
    len: u64,
    off: u64,
}

impl SegmentScanner {
    pub(crate) fn new(storage: &mut Storage, fid: u32) -> Result<Self> {
        Ok(Self {
            fid,
            len: storage.segment_len(fid)?,
            off: 0,
        })
    }

    /// Offset of the next unread record boundary.
    pub(crate) fn offset(&self) -> u64 {
        self.off
    }

    /// Reads the next record.
    ///
    /// A checksum failure yields [`record::RecordError::Crc`]; a frame whose
    /// checksum verifies but whose flag byte is unknown yields
    /// [`StoreError::Corrupt`] with the record's location.
    pub(crate) fn next(&mut self, storage: &mut Storage) -> Result<ScanStep> {
        if self.off >= self.len {
            return Ok(ScanStep::Eof);
        }
        let start = self.off;

        if start + META_SIZE as u64 > self.len {
            return Ok(ScanStep::Torn { offset: start });
        }
        let mut meta_buf = [0u8; META_SIZE];
        storage.read_at(self.fid, start, &mut meta_buf)?;
        let meta = decode_meta(&meta_buf)?;

        let end = start + meta.record_size() as u64;
        if end > self.len {
            return Ok(ScanStep::Torn { offset: start });
        }
        let mut payload = vec![0u8; meta.payload_size()];
        storage.read_at(self.fid, start + META_SIZE as u64, &mut payload)?;

        let (key, value) = meta.split_payload(&payload);
        meta.verify(&meta_buf, key, value)?;
        if meta.flag > FLAG_DELETE {
            return Err(StoreError::Corrupt {
                fid: self.fid,
                offset: start,
            });
        }

        self.off = end;
        Ok(ScanStep::Record(
            start,
            Record {
                meta,
                key: key.to_vec(),
                value: value.to_vec(),
            },
        ))
    }
}
