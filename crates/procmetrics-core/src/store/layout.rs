//! Store file layout (little endian).
//!
//! ```text
//! header   64 bytes   magic, version, role, pid, capacities, counters, timestamps
//! slots    N * 48     name hash, label hash, value, timestamp, checksum, key ref
//! arena    M bytes    JSON key records referenced by the slots
//! ```
//!
//! Rules:
//! - A slot's value, timestamp and checksum are contiguous and rewritten by a
//!   single positional write; readers reject slots whose checksum disagrees.
//! - `slots_used` / `arena_used` are published after the slot and key bytes.
//! - Decoding never indexes past `remaining()`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::descriptor::{LabelSet, MetricDescriptor};
use crate::process::Role;

pub const MAGIC: &[u8; 8] = b"PMSTORE\0";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 64;
pub const SLOT_LEN: usize = 48;

/// Offset of `slots_used` + `arena_used` (8 bytes, published together).
pub const COUNTERS_OFFSET: u64 = 24;
/// Offset of the header's last-write timestamp.
pub const LAST_WRITE_OFFSET: u64 = 40;
/// Offset of value + timestamp + checksum inside a slot.
pub const SLOT_VALUE_OFFSET: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub role: Role,
    pub pid: u32,
    pub slot_capacity: u32,
    pub arena_capacity: u32,
    pub slots_used: u32,
    pub arena_used: u32,
    pub created_ms: u64,
    pub last_write_ms: u64,
}

impl Header {
    pub fn arena_offset(&self) -> usize {
        HEADER_LEN + self.slot_capacity as usize * SLOT_LEN
    }

    pub fn file_len(&self) -> usize {
        self.arena_offset() + self.arena_capacity as usize
    }

    pub fn slot_offset(&self, index: u32) -> u64 {
        (HEADER_LEN + index as usize * SLOT_LEN) as u64
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.put_slice(MAGIC);
        out.put_u16_le(FORMAT_VERSION);
        out.put_u8(self.role.code());
        out.put_u8(0);
        out.put_u32_le(self.pid);
        out.put_u32_le(self.slot_capacity);
        out.put_u32_le(self.arena_capacity);
        out.put_u32_le(self.slots_used);
        out.put_u32_le(self.arena_used);
        out.put_u64_le(self.created_ms);
        out.put_u64_le(self.last_write_ms);
        out.resize(start + HEADER_LEN, 0);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Header, String> {
        if buf.remaining() < HEADER_LEN {
            return Err("file shorter than header".into());
        }
        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err("bad magic".into());
        }
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {version}"));
        }
        let role = Role::from_code(buf.get_u8()).ok_or("unknown role code")?;
        let _reserved = buf.get_u8();

        let header = Header {
            role,
            pid: buf.get_u32_le(),
            slot_capacity: buf.get_u32_le(),
            arena_capacity: buf.get_u32_le(),
            slots_used: buf.get_u32_le(),
            arena_used: buf.get_u32_le(),
            created_ms: buf.get_u64_le(),
            last_write_ms: buf.get_u64_le(),
        };
        if header.slots_used > header.slot_capacity {
            return Err("slots_used exceeds capacity".into());
        }
        if header.arena_used > header.arena_capacity {
            return Err("arena_used exceeds capacity".into());
        }
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub name_hash: u64,
    pub label_hash: u64,
    pub value: f64,
    pub timestamp_ms: u64,
    pub checksum: u64,
    pub key_offset: u32,
    pub key_len: u32,
}

impl Slot {
    /// New slot with a valid checksum.
    pub fn new(name_hash: u64, label_hash: u64, key_offset: u32, key_len: u32) -> Self {
        let mut slot = Slot {
            name_hash,
            label_hash,
            value: 0.0,
            timestamp_ms: 0,
            checksum: 0,
            key_offset,
            key_len,
        };
        slot.checksum = slot.expected_checksum();
        slot
    }

    pub fn expected_checksum(&self) -> u64 {
        let mut buf = [0u8; 32];
        let mut w = &mut buf[..];
        w.put_u64_le(self.name_hash);
        w.put_u64_le(self.label_hash);
        w.put_u64_le(self.value.to_bits());
        w.put_u64_le(self.timestamp_ms);
        fnv1a64(&buf)
    }

    pub fn is_consistent(&self) -> bool {
        self.checksum == self.expected_checksum()
    }

    /// Set value and timestamp, refreshing the checksum.
    pub fn update(&mut self, value: f64, timestamp_ms: u64) {
        self.value = value;
        self.timestamp_ms = timestamp_ms;
        self.checksum = self.expected_checksum();
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.name_hash);
        out.put_u64_le(self.label_hash);
        self.encode_value(out);
        out.put_u32_le(self.key_offset);
        out.put_u32_le(self.key_len);
    }

    /// The 24 bytes at [`SLOT_VALUE_OFFSET`]: value, timestamp, checksum.
    pub fn encode_value(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.value.to_bits());
        out.put_u64_le(self.timestamp_ms);
        out.put_u64_le(self.checksum);
    }

    pub fn decode(mut buf: &[u8]) -> Option<Slot> {
        if buf.remaining() < SLOT_LEN {
            return None;
        }
        Some(Slot {
            name_hash: buf.get_u64_le(),
            label_hash: buf.get_u64_le(),
            value: f64::from_bits(buf.get_u64_le()),
            timestamp_ms: buf.get_u64_le(),
            checksum: buf.get_u64_le(),
            key_offset: buf.get_u32_le(),
            key_len: buf.get_u32_le(),
        })
    }
}

/// Component of a series held by one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesPart {
    /// Counter or gauge value.
    Value,
    /// Cumulative count for the bucket at this index.
    Bucket(u16),
    /// Observation count (the `+Inf` bucket).
    Count,
    /// Running sum of observations.
    Sum,
}

impl SeriesPart {
    fn tag(self) -> [u8; 3] {
        match self {
            SeriesPart::Value => [b'v', 0, 0],
            SeriesPart::Bucket(i) => {
                let [a, b] = i.to_le_bytes();
                [b'b', a, b]
            }
            SeriesPart::Count => [b'c', 0, 0],
            SeriesPart::Sum => [b's', 0, 0],
        }
    }
}

/// Key record stored in the arena for every slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum SlotRecord {
    /// Descriptor of a metric recorded in this store; value unused.
    Schema { descriptor: MetricDescriptor },
    Series {
        metric: String,
        labels: LabelSet,
        part: SeriesPart,
    },
}

const SCHEMA_TAG: &[u8] = b"\xffschema";

impl SlotRecord {
    pub fn metric(&self) -> &str {
        match self {
            SlotRecord::Schema { descriptor } => &descriptor.name,
            SlotRecord::Series { metric, .. } => metric,
        }
    }

    /// `(name hash, label-set hash)` written into the slot.
    pub fn hashes(&self) -> (u64, u64) {
        let name_hash = fnv1a64(self.metric().as_bytes());
        let label_hash = match self {
            SlotRecord::Schema { .. } => fnv1a64(SCHEMA_TAG),
            SlotRecord::Series { labels, part, .. } => {
                let mut buf = Vec::new();
                for v in labels.values() {
                    buf.put_u32_le(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
                buf.put_slice(&part.tag());
                fnv1a64(&buf)
            }
        };
        (name_hash, label_hash)
    }
}

/// 64-bit FNV-1a. Stable across builds, which the file format needs.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}
