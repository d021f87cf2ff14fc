//! Write path: `set()` and `delete()`.
//!
//! Each mutation becomes exactly one record appended to the active segment;
//! the key directory is updated only after the append succeeds.

use keydir::RecordPos;
use record::Record;

use crate::{Result, Store, StoreError};

impl Store {
    /// Inserts or overwrites a key-value pair.
    ///
    /// The record is stamped with the wall clock at encode time. On success
    /// the key directory points at the freshly appended record.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();

        let rec = Record::put(key, value)?;
        let meta = rec.meta;
        let (fid, offset) = inner.storage.append(&rec.encode())?;

        inner.dir.insert(
            rec.key,
            RecordPos {
                fid,
                offset,
                key_size: meta.key_size,
                value_size: meta.value_size,
                timestamp: meta.timestamp,
            },
        );
        Ok(())
    }

    /// Deletes a key by appending a keyed tombstone.
    ///
    /// Deleting an absent key is [`StoreError::KeyNotFound`], not an
    /// idempotent success. The tombstone exists purely so recovery can
    /// replay the deletion; the in-memory directory drops the key at once.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.dir.get(&key).is_none() {
            return Err(StoreError::KeyNotFound);
        }

        let rec = Record::tombstone(key)?;
        inner.storage.append(&rec.encode())?;
        inner.dir.remove(&rec.key);
        Ok(())
    }
}
