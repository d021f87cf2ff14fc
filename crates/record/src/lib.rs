//! # Record — on-disk log record codec
//!
//! Every mutation in a DriftKV data directory is one record appended to a
//! segment file. A record is self-delimiting (its metadata states the payload
//! sizes) and self-verifying (a CRC32 guards everything after the checksum
//! field), which is what makes the sequential recovery scan possible.
//!
//! ## Binary Record Format
//!
//! ```text
//! offset  size  field
//! 0       4     crc         CRC-32/IEEE over bytes 4..end of record
//! 4       8     position    reserved, written as zero
//! 12      8     timestamp   seconds since Unix epoch at write time
//! 20      4     key_size
//! 24      4     value_size  0 for tombstones
//! 28      1     flag        0 = put, 1 = delete
//! 29      ...   key bytes
//! 29+ks   ...   value bytes (puts only)
//! ```
//!
//! All multi-byte integers are little-endian. The metadata region is a fixed
//! [`META_SIZE`] bytes. Tombstones carry the key (and an empty value) so that
//! a recovery scan can replay the deletion.
//!
//! ## Example
//!
//! ```rust
//! use record::Record;
//!
//! let rec = Record::put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! let bytes = rec.encode();
//! let back = Record::decode(&bytes).unwrap();
//! assert_eq!(back.value, b"world");
//! ```

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Size of the fixed metadata region at the start of every record.
pub const META_SIZE: usize = 29;

/// Flag byte of a put record.
pub const FLAG_PUT: u8 = 0;
/// Flag byte of a tombstone.
pub const FLAG_DELETE: u8 = 1;

/// Errors that can occur while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The stored checksum does not match the record contents.
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Crc { stored: u32, computed: u32 },

    /// The flag byte is out of range even though the checksum verifies, so
    /// the record was written by something speaking a different format.
    #[error("invalid record flag {0:#04x}")]
    BadFlag(u8),

    /// Fewer bytes were supplied than the record claims to occupy.
    #[error("record truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// A key or value exceeds the 32-bit size field.
    #[error("key or value exceeds u32::MAX bytes")]
    TooLarge,
}

/// The decoded fixed-size metadata region of a record.
///
/// Decoding is permissive: every byte pattern yields a `Meta`, and the flag
/// byte is kept raw. Corruption anywhere in the region is the checksum's job
/// to catch ([`verify`](Meta::verify)), so a flipped flag byte fails as a CRC
/// mismatch rather than as a flag error; [`RecordError::BadFlag`] is reserved
/// for frames whose checksum verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub crc: u32,
    /// Reserved field. Written as zero; any value is tolerated on read.
    pub position: u64,
    /// Advisory wall-clock seconds. Not used for conflict resolution.
    pub timestamp: u64,
    pub key_size: u32,
    pub value_size: u32,
    /// Raw flag byte: [`FLAG_PUT`] or [`FLAG_DELETE`] in well-formed records.
    pub flag: u8,
}

impl Meta {
    /// `true` if this record marks a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flag == FLAG_DELETE
    }

    /// Number of payload bytes (key + value) following the metadata.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.key_size as usize + self.value_size as usize
    }

    /// Total encoded size of the record, metadata included.
    #[must_use]
    pub fn record_size(&self) -> usize {
        META_SIZE + self.payload_size()
    }

    /// Splits a payload slice into `(key, value)` by the stored sizes.
    ///
    /// `payload` must hold exactly [`payload_size`](Self::payload_size) bytes.
    #[must_use]
    pub fn split_payload<'a>(&self, payload: &'a [u8]) -> (&'a [u8], &'a [u8]) {
        let split = self.key_size as usize;
        (&payload[..split], &payload[split..])
    }

    /// Recomputes the checksum over the same domain the encoder covered
    /// (metadata tail + key + value) and compares it against [`Meta::crc`].
    ///
    /// `meta_bytes` is the raw metadata region the meta was decoded from; only
    /// its first [`META_SIZE`] bytes are consulted.
    pub fn verify(&self, meta_bytes: &[u8], key: &[u8], value: &[u8]) -> Result<(), RecordError> {
        let mut hasher = Crc32::new();
        hasher.update(&meta_bytes[4..META_SIZE]);
        hasher.update(key);
        hasher.update(value);
        let computed = hasher.finalize();
        if computed != self.crc {
            return Err(RecordError::Crc {
                stored: self.crc,
                computed,
            });
        }
        Ok(())
    }
}

/// Decodes the metadata region from the first [`META_SIZE`] bytes of `buf`.
pub fn decode_meta(buf: &[u8]) -> Result<Meta, RecordError> {
    if buf.len() < META_SIZE {
        return Err(RecordError::Truncated {
            need: META_SIZE,
            have: buf.len(),
        });
    }
    Ok(Meta {
        crc: LittleEndian::read_u32(&buf[0..4]),
        position: LittleEndian::read_u64(&buf[4..12]),
        timestamp: LittleEndian::read_u64(&buf[12..20]),
        key_size: LittleEndian::read_u32(&buf[20..24]),
        value_size: LittleEndian::read_u32(&buf[24..28]),
        flag: buf[28],
    })
}

/// A single log record: one put or one delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub meta: Meta,
    pub key: Vec<u8>,
    /// Empty for tombstones.
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a put record stamped with the current wall clock.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Result<Self, RecordError> {
        let key_size = u32::try_from(key.len()).map_err(|_| RecordError::TooLarge)?;
        let value_size = u32::try_from(value.len()).map_err(|_| RecordError::TooLarge)?;
        Ok(Self {
            meta: Meta {
                crc: 0,
                position: 0,
                timestamp: unix_timestamp(),
                key_size,
                value_size,
                flag: FLAG_PUT,
            },
            key,
            value,
        })
    }

    /// Builds a tombstone for `key`. The key travels with the tombstone so a
    /// recovery scan can replay the deletion.
    pub fn tombstone(key: Vec<u8>) -> Result<Self, RecordError> {
        let key_size = u32::try_from(key.len()).map_err(|_| RecordError::TooLarge)?;
        Ok(Self {
            meta: Meta {
                crc: 0,
                position: 0,
                timestamp: unix_timestamp(),
                key_size,
                value_size: 0,
                flag: FLAG_DELETE,
            },
            key,
            value: Vec::new(),
        })
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.meta.record_size()
    }

    /// Serializes the record into a fresh buffer.
    ///
    /// The checksum is computed over bytes `4..end` and written last, so the
    /// returned frame always verifies. `meta.crc` on `self` is left untouched;
    /// the authoritative checksum lives in the encoded bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        LittleEndian::write_u64(&mut buf[4..12], self.meta.position);
        LittleEndian::write_u64(&mut buf[12..20], self.meta.timestamp);
        LittleEndian::write_u32(&mut buf[20..24], self.meta.key_size);
        LittleEndian::write_u32(&mut buf[24..28], self.meta.value_size);
        buf[28] = self.meta.flag;
        buf[META_SIZE..META_SIZE + self.key.len()].copy_from_slice(&self.key);
        buf[META_SIZE + self.key.len()..].copy_from_slice(&self.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf[4..]);
        LittleEndian::write_u32(&mut buf[0..4], hasher.finalize());
        buf
    }

    /// Decodes and verifies a complete record frame.
    ///
    /// `buf` must start at a record boundary and hold at least the full
    /// record; trailing bytes are ignored. The checksum is verified before
    /// anything is made of the individual fields, so a corrupted flag byte
    /// fails as [`RecordError::Crc`]; [`RecordError::BadFlag`] only fires for
    /// a frame that verifies yet carries an unknown flag.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let meta = decode_meta(buf)?;
        let need = meta.record_size();
        if buf.len() < need {
            return Err(RecordError::Truncated {
                need,
                have: buf.len(),
            });
        }
        let (key, value) = meta.split_payload(&buf[META_SIZE..need]);
        meta.verify(buf, key, value)?;
        if meta.flag > FLAG_DELETE {
            return Err(RecordError::BadFlag(meta.flag));
        }
        Ok(Self {
            meta,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }
}

/// Timestamps are advisory; a clock before the epoch writes 0.
fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
