//! Per-process, file-backed metric store (the write path).
//!
//! Only the owning process writes its file, so there is no cross-process
//! lock. Every recording call ends in positional writes of whole slots'
//! value regions; other processes see them through the page cache without
//! the writer waiting on anyone. Threads inside the process serialize on a
//! short in-memory mutex.
//!
//! Growth rewrites the file into a temp sibling and renames it into place:
//! a concurrent reader sees either the old or the new image.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;

use crate::aggregate::merge_one;
use crate::descriptor::{LabelSet, MetricDescriptor, MetricKind};
use crate::error::{MetricsError, Result};
use crate::process::ProcessId;
use crate::registry::MetricRegistry;
use crate::snapshot::AggregatedSnapshot;
use crate::store::image::StoreImage;
use crate::store::layout::{
    Header, SeriesPart, Slot, SlotRecord, COUNTERS_OFFSET, LAST_WRITE_OFFSET, SLOT_LEN,
    SLOT_VALUE_OFFSET,
};
use crate::store::temp_path;

const MIN_SLOTS: u32 = 64;
const MIN_ARENA: u32 = 4096;
/// Series per descriptor assumed when sizing a new store.
const SERIES_HINT: u32 = 4;
/// Arena bytes assumed per slot key when sizing.
const KEY_HINT: u32 = 96;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Slots a single series of `d` occupies, in slot order.
pub(crate) fn series_parts(d: &MetricDescriptor) -> Vec<SeriesPart> {
    match d.kind {
        MetricKind::Counter | MetricKind::Gauge => vec![SeriesPart::Value],
        MetricKind::Histogram => (0..d.buckets.len() as u16)
            .map(SeriesPart::Bucket)
            .chain([SeriesPart::Count, SeriesPart::Sum])
            .collect(),
        MetricKind::Summary => vec![SeriesPart::Count, SeriesPart::Sum],
    }
}

pub struct LocalMetricStore {
    path: PathBuf,
    process: ProcessId,
    registry: Arc<MetricRegistry>,
    writer: Mutex<Writer>,
}

struct Writer {
    path: PathBuf,
    file: File,
    header: Header,
    /// Mirror of every allocated slot.
    slots: Vec<Slot>,
    /// Mirror of the used arena bytes.
    arena: Vec<u8>,
    schemas: HashSet<String>,
    /// (metric, labels) -> index of the series' first slot.
    series: HashMap<(String, LabelSet), u32>,
}

impl LocalMetricStore {
    /// Create a fresh store for `process` in `dir`, replacing any file left
    /// behind by an earlier process with the same pid and role.
    pub fn create(dir: &Path, process: ProcessId, registry: Arc<MetricRegistry>) -> Result<Self> {
        let path = dir.join(process.file_name());

        let descriptors = registry.descriptors();
        let slots_hint: u32 = descriptors
            .iter()
            .map(|d| 1 + series_parts(d).len() as u32 * SERIES_HINT)
            .sum();
        let slot_capacity = slots_hint.max(MIN_SLOTS);
        let now = now_ms();

        let header = Header {
            role: process.role,
            pid: process.pid,
            slot_capacity,
            arena_capacity: slot_capacity.saturating_mul(KEY_HINT).max(MIN_ARENA),
            slots_used: 0,
            arena_used: 0,
            created_ms: now,
            last_write_ms: now,
        };
        let file = write_image(&path, &header, &[], &[])?;

        tracing::debug!(path = %path.display(), %process, slot_capacity, "store created");

        Ok(Self {
            path: path.clone(),
            process,
            registry,
            writer: Mutex::new(Writer {
                path,
                file,
                header,
                slots: Vec::new(),
                arena: Vec::new(),
                schemas: HashSet::new(),
                series: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Add `delta` to a counter (must be >= 0) or a gauge.
    pub fn increment(&self, name: &str, labels: &[&str], delta: f64) -> Result<()> {
        let d = self.resolve(name, labels, "increment", &[MetricKind::Counter, MetricKind::Gauge])?;

        let valid = match d.kind {
            MetricKind::Counter => delta.is_finite() && delta >= 0.0,
            _ => delta.is_finite(),
        };
        if !valid {
            tracing::warn!(metric = %name, delta, "increment rejected");
            return Err(MetricsError::InvalidDelta {
                name: name.to_string(),
                delta,
            });
        }

        let now = now_ms();
        let mut w = self.lock()?;
        let first = w.series_slot(&d, labels)?;
        let current = w.slots[first as usize].value;
        w.write_value(first, current + delta, now)?;
        w.touch(now)
    }

    /// Overwrite a gauge.
    pub fn set(&self, name: &str, labels: &[&str], value: f64) -> Result<()> {
        self.set_at(name, labels, value, now_ms())
    }

    pub(crate) fn set_at(&self, name: &str, labels: &[&str], value: f64, now: u64) -> Result<()> {
        let d = self.resolve(name, labels, "set", &[MetricKind::Gauge])?;
        let mut w = self.lock()?;
        let first = w.series_slot(&d, labels)?;
        w.write_value(first, value, now)?;
        w.touch(now)
    }

    /// Record one observation into a histogram or summary.
    pub fn observe(&self, name: &str, labels: &[&str], value: f64) -> Result<()> {
        let d = self.resolve(
            name,
            labels,
            "observe",
            &[MetricKind::Histogram, MetricKind::Summary],
        )?;
        if value.is_nan() {
            tracing::warn!(metric = %name, "NaN observation rejected");
            return Err(MetricsError::InvalidDelta {
                name: name.to_string(),
                delta: value,
            });
        }

        let now = now_ms();
        let mut w = self.lock()?;
        let first = w.series_slot(&d, labels)?;

        // slot order: buckets ascending, then count, then sum
        let mut index = first;
        for bound in &d.buckets {
            if value <= *bound {
                w.add(index, 1.0, now)?;
            }
            index += 1;
        }
        w.add(index, 1.0, now)?;
        w.add(index + 1, value, now)?;
        w.touch(now)
    }

    /// Current value of a counter or gauge series in this process.
    /// A series never recorded reads as zero.
    pub fn value(&self, name: &str, labels: &[&str]) -> Result<f64> {
        let d = self.resolve(name, labels, "value", &[MetricKind::Counter, MetricKind::Gauge])?;
        let w = self.lock()?;
        let key = (d.name.clone(), LabelSet::from_strs(labels));
        Ok(w
            .series
            .get(&key)
            .map(|first| w.slots[*first as usize].value)
            .unwrap_or(0.0))
    }

    /// Everything this process has recorded, merged as a scrape would see it
    /// with this store alone.
    pub fn snapshot(&self) -> Result<AggregatedSnapshot> {
        // holding the writer lock keeps our own appends out of the read
        let _writer = self.lock()?;
        let image = StoreImage::read(&self.path)?;
        Ok(AggregatedSnapshot {
            families: merge_one(self.process, &image),
            ..Default::default()
        })
    }

    /// Number of slots in use (schema and series slots).
    pub fn slots_used(&self) -> Result<u32> {
        Ok(self.lock()?.header.slots_used)
    }

    fn resolve(
        &self,
        name: &str,
        labels: &[&str],
        op: &'static str,
        kinds: &[MetricKind],
    ) -> Result<Arc<MetricDescriptor>> {
        let d = self.registry.lookup(name)?;
        if !kinds.contains(&d.kind) {
            return Err(MetricsError::TypeMismatch {
                name: name.to_string(),
                op,
                kind: d.kind.as_str(),
            });
        }
        d.check_labels(labels)?;
        Ok(d)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Writer>> {
        self.writer
            .lock()
            .map_err(|_| MetricsError::Internal("store writer lock poisoned".into()))
    }
}

impl Writer {
    /// First slot of the series, allocating schema and series slots on first use.
    fn series_slot(&mut self, d: &MetricDescriptor, labels: &[&str]) -> Result<u32> {
        let key = (d.name.clone(), LabelSet::from_strs(labels));
        if let Some(first) = self.series.get(&key) {
            return Ok(*first);
        }

        let needs_schema = !self.schemas.contains(&d.name);
        let mut records = Vec::new();
        if needs_schema {
            records.push(SlotRecord::Schema {
                descriptor: d.clone(),
            });
        }
        for part in series_parts(d) {
            records.push(SlotRecord::Series {
                metric: d.name.clone(),
                labels: key.1.clone(),
                part,
            });
        }
        let series_start = self.append(&records)? + u32::from(needs_schema);

        self.schemas.insert(d.name.clone());
        self.series.insert(key, series_start);
        Ok(series_start)
    }

    /// Append slots for `records`; returns the index of the first one.
    fn append(&mut self, records: &[SlotRecord]) -> Result<u32> {
        let mut keys = Vec::new();
        let mut new_slots = Vec::with_capacity(records.len());
        for record in records {
            let key = serde_json::to_vec(record)
                .map_err(|e| MetricsError::Internal(format!("encode slot key: {e}")))?;
            let (name_hash, label_hash) = record.hashes();
            let offset = self.header.arena_used as usize + keys.len();
            new_slots.push(Slot::new(
                name_hash,
                label_hash,
                offset as u32,
                key.len() as u32,
            ));
            keys.extend_from_slice(&key);
        }

        self.reserve(new_slots.len() as u32, keys.len() as u32)?;

        let first = self.header.slots_used;
        let arena_at = self.header.arena_offset() as u64 + u64::from(self.header.arena_used);
        self.file.write_all_at(&keys, arena_at)?;

        let mut slot_bytes = Vec::with_capacity(new_slots.len() * SLOT_LEN);
        for slot in &new_slots {
            slot.encode(&mut slot_bytes);
        }
        self.file.write_all_at(&slot_bytes, self.header.slot_offset(first))?;

        self.header.slots_used += new_slots.len() as u32;
        self.header.arena_used += keys.len() as u32;
        let mut counters = Vec::with_capacity(8);
        counters.put_u32_le(self.header.slots_used);
        counters.put_u32_le(self.header.arena_used);
        self.file.write_all_at(&counters, COUNTERS_OFFSET)?;

        self.slots.extend(new_slots);
        self.arena.extend_from_slice(&keys);
        Ok(first)
    }

    /// Make room for `slots` more slots and `key_bytes` more arena bytes.
    fn reserve(&mut self, slots: u32, key_bytes: u32) -> Result<()> {
        let need_slots = self.header.slots_used.saturating_add(slots);
        let need_arena = self.header.arena_used.saturating_add(key_bytes);
        if need_slots <= self.header.slot_capacity && need_arena <= self.header.arena_capacity {
            return Ok(());
        }

        let mut header = self.header.clone();
        header.slot_capacity = grow(header.slot_capacity, need_slots);
        header.arena_capacity = grow(header.arena_capacity, need_arena);

        // key offsets are arena-relative, so slots are copied verbatim
        self.file = write_image(&self.path, &header, &self.slots, &self.arena)?;
        tracing::debug!(
            path = %self.path.display(),
            slot_capacity = header.slot_capacity,
            arena_capacity = header.arena_capacity,
            "store grown"
        );
        self.header = header;
        Ok(())
    }

    fn write_value(&mut self, index: u32, value: f64, now: u64) -> Result<()> {
        let slot = &mut self.slots[index as usize];
        slot.update(value, now);
        let mut buf = Vec::with_capacity(24);
        slot.encode_value(&mut buf);
        let at = self.header.slot_offset(index) + SLOT_VALUE_OFFSET;
        self.file.write_all_at(&buf, at)?;
        Ok(())
    }

    fn add(&mut self, index: u32, delta: f64, now: u64) -> Result<()> {
        let current = self.slots[index as usize].value;
        self.write_value(index, current + delta, now)
    }

    fn touch(&mut self, now: u64) -> Result<()> {
        self.header.last_write_ms = now;
        self.file.write_all_at(&now.to_le_bytes(), LAST_WRITE_OFFSET)?;
        Ok(())
    }
}

fn grow(capacity: u32, needed: u32) -> u32 {
    capacity.saturating_mul(2).max(needed)
}

/// Write a complete image to a hidden sibling, then rename it over `path`.
fn write_image(path: &Path, header: &Header, slots: &[Slot], arena: &[u8]) -> Result<File> {
    let mut image = Vec::with_capacity(header.file_len());
    header.encode(&mut image);
    for slot in slots {
        slot.encode(&mut image);
    }
    image.resize(header.arena_offset(), 0);
    image.extend_from_slice(arena);
    image.resize(header.file_len(), 0);

    let tmp = temp_path(path)?;

    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    f.write_all(&image)?;
    drop(f);
    fs::rename(&tmp, path)?;

    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}
