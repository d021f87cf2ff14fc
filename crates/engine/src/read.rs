//! Read path: `get()`.

use record::{Record, META_SIZE};

use crate::{Result, Store, StoreError};

impl Store {
    /// Looks up a key and returns its current value.
    ///
    /// The directory entry carries the payload sizes, so the whole record is
    /// fetched in one positional read of `META_SIZE + key_size + value_size`
    /// bytes and verified against its checksum before the value is returned.
    ///
    /// # Errors
    ///
    /// [`StoreError::KeyNotFound`] for an absent key, distinguishable from
    /// I/O failure. A checksum mismatch fails the read with
    /// [`record::RecordError::Crc`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();

        let pos = match inner.dir.get(key) {
            Some(pos) => *pos,
            None => return Err(StoreError::KeyNotFound),
        };

        let len = META_SIZE + pos.key_size as usize + pos.value_size as usize;
        let mut buf = vec![0u8; len];
        inner.storage.read_at(pos.fid, pos.offset, &mut buf)?;

        let rec = Record::decode(&buf)?;
        Ok(rec.value)
    }
}
