use std::fs;
use std::path::Path;

use crate::{Options, Store};

/// Opens a store with a small segment size so tests can force rotation.
pub fn open_store(dir: &Path, segment_size: u64) -> Store {
    Store::open(Options::new(dir).segment_size(segment_size)).unwrap()
}

pub fn count_segment_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "dat")
                .unwrap_or(false)
        })
        .count()
}
