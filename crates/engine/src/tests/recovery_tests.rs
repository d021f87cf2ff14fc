use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use tempfile::tempdir;

use super::helpers::{count_segment_files, open_store};
use crate::{Options, Store, StoreError};

// --------------------- Reopen ---------------------

#[test]
fn reopen_recovers_live_keys_and_deletions() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"a".to_vec(), b"1".to_vec())?;
        store.set(b"b".to_vec(), b"2".to_vec())?;
        store.delete(b"a".to_vec())?;
    }

    let store = open_store(dir.path(), 1024);
    assert_eq!(store.get(b"b")?, b"2");
    assert!(matches!(store.get(b"a"), Err(StoreError::KeyNotFound)));
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn reopen_returns_latest_overwrite() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"k".to_vec(), b"v1".to_vec())?;
        store.set(b"k".to_vec(), b"v2".to_vec())?;
        store.set(b"k".to_vec(), b"v3".to_vec())?;
    }

    let store = open_store(dir.path(), 1024);
    assert_eq!(store.get(b"k")?, b"v3");
    Ok(())
}

#[test]
fn latest_wins_across_segments() -> Result<()> {
    let dir = tempdir()?;
    {
        // Small threshold so the overwrites land in different segments.
        let store = open_store(dir.path(), 48);
        store.set(b"k".to_vec(), b"old".to_vec())?;
        store.set(b"filler".to_vec(), vec![b'f'; 32])?;
        store.set(b"k".to_vec(), b"new".to_vec())?;
        assert!(store.segment_count() > 1);
    }

    let store = open_store(dir.path(), 48);
    assert_eq!(store.get(b"k")?, b"new");
    Ok(())
}

#[test]
fn tombstone_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"k".to_vec(), b"v".to_vec())?;
        store.delete(b"k".to_vec())?;
    }

    let store = open_store(dir.path(), 1024);
    assert!(matches!(store.get(b"k"), Err(StoreError::KeyNotFound)));
    Ok(())
}

#[test]
fn recovery_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 64);
        for i in 0..10u32 {
            store.set(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())?;
        }
        store.delete(b"k3".to_vec())?;
    }

    let first = open_store(dir.path(), 64);
    let keys = first.len();
    let active = first.active_segment();
    drop(first);

    let second = open_store(dir.path(), 64);
    assert_eq!(second.len(), keys);
    assert_eq!(second.active_segment(), active);
    for i in 0..10u32 {
        let got = second.get(format!("k{i}").as_bytes());
        if i == 3 {
            assert!(matches!(got, Err(StoreError::KeyNotFound)));
        } else {
            assert_eq!(got?, format!("v{i}").into_bytes());
        }
    }
    Ok(())
}

#[test]
fn reopen_continues_appending_to_highest_segment() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 64);
        for i in 0..6u32 {
            store.set(format!("k{i}").into_bytes(), vec![b'v'; 32])?;
        }
    }
    let files = count_segment_files(dir.path());

    let store = open_store(dir.path(), 64);
    let (fid, _) = store.active_segment();
    assert_eq!(fid as usize, files - 1, "highest id must stay active");

    store.set(b"after".to_vec(), b"reopen".to_vec())?;
    assert_eq!(store.get(b"after")?, b"reopen");
    Ok(())
}

#[test]
fn open_empty_directory_initializes_segment_zero() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("fresh");

    let store = Store::open(Options::new(&data).segment_size(1024))?;
    assert!(data.join("0.dat").exists());
    assert_eq!(store.active_segment(), (0, 0));
    assert!(store.is_empty());
    Ok(())
}

// --------------------- Torn tails ---------------------

#[test]
fn torn_metadata_at_tail_is_truncated() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"a".to_vec(), b"1".to_vec())?;
        store.set(b"b".to_vec(), b"2".to_vec())?;
    }
    let path = dir.path().join("0.dat");
    let clean_len = fs::metadata(&path)?.len();

    // A crash mid-append leaves fewer than 29 metadata bytes at the tail.
    let mut f = OpenOptions::new().append(true).open(&path)?;
    f.write_all(&[0xAB; 17])?;
    drop(f);

    let store = open_store(dir.path(), 1024);
    assert_eq!(store.get(b"a")?, b"1");
    assert_eq!(store.get(b"b")?, b"2");
    assert_eq!(fs::metadata(&path)?.len(), clean_len);
    assert_eq!(store.active_segment(), (0, clean_len));
    Ok(())
}

#[test]
fn torn_payload_at_tail_is_truncated() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"a".to_vec(), b"1".to_vec())?;
    }
    let path = dir.path().join("0.dat");
    let clean_len = fs::metadata(&path)?.len();

    // Complete metadata but only part of the declared payload.
    let torn = record::Record::put(b"torn!".to_vec(), b"payload".to_vec())
        .unwrap()
        .encode();
    let mut f = OpenOptions::new().append(true).open(&path)?;
    f.write_all(&torn[..torn.len() - 4])?;
    drop(f);

    let store = open_store(dir.path(), 1024);
    assert_eq!(store.get(b"a")?, b"1");
    assert!(matches!(store.get(b"torn!"), Err(StoreError::KeyNotFound)));
    assert_eq!(fs::metadata(&path)?.len(), clean_len);

    // The next write reuses the reclaimed tail.
    store.set(b"next".to_vec(), b"v".to_vec())?;
    assert_eq!(store.get(b"next")?, b"v");
    Ok(())
}

#[test]
fn interior_corruption_fails_recovery() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"a".to_vec(), b"1".to_vec())?;
        store.set(b"b".to_vec(), b"2".to_vec())?;
    }

    // Corrupt the first record: every byte is still present, so this is
    // interior damage rather than a torn tail. Offset 16 is a high timestamp
    // byte, zero for any contemporary wall clock.
    let path = dir.path().join("0.dat");
    let mut f = OpenOptions::new().read(true).write(true).open(&path)?;
    f.seek(SeekFrom::Start(16))?;
    f.write_all(&[0xFF])?;
    drop(f);

    assert!(Store::open(Options::new(dir.path()).segment_size(1024)).is_err());
    Ok(())
}

#[test]
fn torn_record_in_sealed_segment_fails_recovery() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 32);
        store.set(b"a".to_vec(), vec![b'x'; 16])?; // rotates; segment 0 sealed
        store.set(b"b".to_vec(), b"2".to_vec())?;
        assert!(store.segment_count() > 1);
    }

    // Chop the sealed segment mid-record. Sealed segments always end on a
    // record boundary, so this can only mean external damage.
    let path = dir.path().join("0.dat");
    let len = fs::metadata(&path)?.len();
    let f = OpenOptions::new().write(true).open(&path)?;
    f.set_len(len - 5)?;
    drop(f);

    let err = Store::open(Options::new(dir.path()).segment_size(32)).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { fid: 0, .. }));
    Ok(())
}

#[test]
fn unknown_flag_record_fails_recovery_with_location() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path(), 1024);
        store.set(b"k".to_vec(), b"v".to_vec())?;
    }

    // A frame whose checksum verifies but whose flag byte is unknown: not
    // bit rot, but a writer speaking a different format.
    let mut rec = record::Record::put(b"x".to_vec(), b"y".to_vec()).unwrap();
    rec.meta.flag = 2;
    let mut f = OpenOptions::new()
        .append(true)
        .open(dir.path().join("0.dat"))?;
    f.write_all(&rec.encode())?;
    drop(f);

    // The good record for "k" occupies bytes 0..31 (29 + 1 + 1).
    let err = Store::open(Options::new(dir.path()).segment_size(1024)).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { fid: 0, offset: 31 }));
    Ok(())
}
