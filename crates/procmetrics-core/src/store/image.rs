//! Read-only view of a store file.
//!
//! A file is read with one `read` call and decoded from that buffer. Slots
//! that fail their checksum (a write in flight) or whose key record doesn't
//! match the slot hashes (an append in flight) are counted as torn. The
//! caller re-reads up to [`READ_ATTEMPTS`] times before dropping them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MetricsError, Result};
use crate::store::layout::{Header, Slot, SlotRecord, SLOT_LEN};

pub const READ_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct Entry {
    pub record: SlotRecord,
    pub value: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StoreImage {
    pub path: PathBuf,
    pub header: Header,
    pub entries: Vec<Entry>,
    /// Slots dropped as inconsistent.
    pub torn: usize,
}

impl StoreImage {
    pub fn decode(path: &Path, bytes: &[u8]) -> Result<StoreImage> {
        let header = Header::decode(bytes).map_err(|reason| MetricsError::corrupt(path, reason))?;

        let arena_start = header.arena_offset();
        let arena_end = arena_start + header.arena_used as usize;
        if bytes.len() < arena_end {
            return Err(MetricsError::corrupt(
                path,
                format!("truncated: {} bytes, need {arena_end}", bytes.len()),
            ));
        }
        let arena = &bytes[arena_start..arena_end];

        let mut entries = Vec::with_capacity(header.slots_used as usize);
        let mut torn = 0;
        for index in 0..header.slots_used {
            let offset = header.slot_offset(index) as usize;
            let Some(slot) = bytes.get(offset..offset + SLOT_LEN).and_then(Slot::decode) else {
                torn += 1;
                continue;
            };
            match decode_entry(&slot, arena) {
                Some(entry) => entries.push(entry),
                None => torn += 1,
            }
        }

        Ok(StoreImage {
            path: path.to_path_buf(),
            header,
            entries,
            torn,
        })
    }

    /// Read and decode, retrying while torn slots are seen.
    ///
    /// `NotFound` is passed through untouched so callers can tell a store
    /// removed mid-scrape from a damaged one.
    pub fn read(path: &Path) -> Result<StoreImage> {
        let mut attempt = 1;
        loop {
            let bytes = fs::read(path)?;
            let image = StoreImage::decode(path, &bytes)?;
            if image.torn == 0 || attempt >= READ_ATTEMPTS {
                return Ok(image);
            }
            tracing::debug!(path = %path.display(), torn = image.torn, attempt, "re-reading store with in-flight writes");
            attempt += 1;
        }
    }
}

fn decode_entry(slot: &Slot, arena: &[u8]) -> Option<Entry> {
    if !slot.is_consistent() {
        return None;
    }
    let start = slot.key_offset as usize;
    let key = arena.get(start..start.checked_add(slot.key_len as usize)?)?;
    let record: SlotRecord = serde_json::from_slice(key).ok()?;
    if record.hashes() != (slot.name_hash, slot.label_hash) {
        return None;
    }
    Some(Entry {
        record,
        value: slot.value,
        timestamp_ms: slot.timestamp_ms,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::descriptor::MetricDescriptor;
    use crate::process::{ProcessId, Role};
    use crate::registry::MetricRegistry;
    use crate::store::layout::SLOT_VALUE_OFFSET;
    use crate::store::LocalMetricStore;

    fn written_store(dir: &Path) -> LocalMetricStore {
        let reg = MetricRegistry::new();
        reg.register(MetricDescriptor::counter("hits_total", "")).unwrap();
        let s = LocalMetricStore::create(dir, ProcessId::new(9, Role::Worker), Arc::new(reg))
            .unwrap();
        s.increment("hits_total", &[], 3.0).unwrap();
        s
    }

    #[test]
    fn half_written_slot_is_dropped_not_misread() {
        let dir = tempfile::tempdir().unwrap();
        let s = written_store(dir.path());
        let mut bytes = fs::read(s.path()).unwrap();
        let clean = StoreImage::decode(s.path(), &bytes).unwrap();
        assert_eq!(clean.torn, 0);
        assert_eq!(clean.entries.len(), 2);

        // slot 1 holds the series; scribble over its value without fixing the checksum
        let at = (clean.header.slot_offset(1) + SLOT_VALUE_OFFSET) as usize;
        bytes[at..at + 8].copy_from_slice(&99.0f64.to_le_bytes());

        let torn = StoreImage::decode(s.path(), &bytes).unwrap();
        assert_eq!(torn.torn, 1);
        assert_eq!(torn.entries.len(), 1);
        assert!(matches!(torn.entries[0].record, SlotRecord::Schema { .. }));
    }

    #[test]
    fn truncated_or_foreign_files_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let s = written_store(dir.path());
        let bytes = fs::read(s.path()).unwrap();

        let err = StoreImage::decode(s.path(), &bytes[..100]).unwrap_err();
        assert_eq!(err.code().as_str(), "CORRUPT_STORE");

        let err = StoreImage::decode(s.path(), b"PMSTORE?not really").unwrap_err();
        assert_eq!(err.code().as_str(), "CORRUPT_STORE");
    }

    #[test]
    fn missing_file_passes_not_found_through() {
        let dir = tempfile::tempdir().unwrap();
        match StoreImage::read(&dir.path().join("api_1.db")) {
            Err(MetricsError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
