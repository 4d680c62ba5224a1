//! Fixed-size entry table record and its on-disk encoding

use crate::types::{Identifier, ObjectKind};

/// Serialized size of a [`StoreEntry`].
///
/// Layout, little-endian and packed:
///
/// ```text
/// 0..8    last_used   i64
/// 8..12   identifier  u32
/// 12..16  data_size   u32
/// 16..20  meta_size   u32
/// 20..22  use_count   u16
/// 22..24  flags       u16
/// 24..28  reserved    (two u16 block indices, always zero)
/// ```
pub const ENTRY_SIZE: usize = 28;

/// One cached object: usage statistics plus the sizes of its two files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreEntry {
    pub identifier: Identifier,
    /// Milliseconds since the UNIX epoch of the last successful store or
    /// fetch, unique within a store
    pub last_used: i64,
    pub use_count: u16,
    pub data_size: u32,
    pub meta_size: u32,
    /// Reserved for per-entry behaviour; carried through unchanged
    pub flags: u16,
}

impl StoreEntry {
    pub fn new(identifier: Identifier, now: i64) -> Self {
        Self {
            identifier,
            last_used: now,
            use_count: 1,
            ..Self::default()
        }
    }

    pub fn size(&self, kind: ObjectKind) -> u32 {
        match kind {
            ObjectKind::Data => self.data_size,
            ObjectKind::Meta => self.meta_size,
        }
    }

    pub fn set_size(&mut self, kind: ObjectKind, size: u32) {
        match kind {
            ObjectKind::Data => self.data_size = size,
            ObjectKind::Meta => self.meta_size = size,
        }
    }

    /// Bytes this entry accounts for on disk
    pub fn allocated(&self) -> u64 {
        u64::from(self.data_size) + u64::from(self.meta_size)
    }

    pub fn touch(&mut self, now: i64) {
        self.last_used = now;
        self.use_count = self.use_count.saturating_add(1);
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.last_used.to_le_bytes());
        buf[8..12].copy_from_slice(&self.identifier.to_le_bytes());
        buf[12..16].copy_from_slice(&self.data_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.meta_size.to_le_bytes());
        buf[20..22].copy_from_slice(&self.use_count.to_le_bytes());
        buf[22..24].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Self {
        Self {
            last_used: i64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            identifier: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            data_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            meta_size: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            use_count: u16::from_le_bytes([buf[20], buf[21]]),
            flags: u16::from_le_bytes([buf[22], buf[23]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_has_single_use() {
        let entry = StoreEntry::new(0xdead_beef, 1_700_000_000);
        assert_eq!(entry.use_count, 1);
        assert_eq!(entry.allocated(), 0);
    }

    #[test]
    fn test_field_offsets() {
        let entry = StoreEntry {
            identifier: 0x0403_0201,
            last_used: 0x0102,
            use_count: 0x0a0b,
            data_size: 0x10,
            meta_size: 0x20,
            flags: 0,
        };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[12], 0x10);
        assert_eq!(bytes[16], 0x20);
        assert_eq!(&bytes[20..22], &[0x0b, 0x0a]);
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
        assert_eq!(StoreEntry::from_bytes(&bytes), entry);
    }

    #[test]
    fn test_negative_timestamp_survives_encoding() {
        let entry = StoreEntry::new(7, -1);
        assert_eq!(StoreEntry::from_bytes(&entry.to_bytes()).last_used, -1);
    }

    #[test]
    fn test_touch_saturates_use_count() {
        let mut entry = StoreEntry::new(1, 10);
        entry.use_count = u16::MAX;
        entry.touch(20);
        assert_eq!(entry.use_count, u16::MAX);
        assert_eq!(entry.last_used, 20);
    }

    #[test]
    fn test_sizes_by_kind() {
        let mut entry = StoreEntry::new(1, 10);
        entry.set_size(ObjectKind::Data, 40);
        entry.set_size(ObjectKind::Meta, 2);
        assert_eq!(entry.size(ObjectKind::Data), 40);
        assert_eq!(entry.size(ObjectKind::Meta), 2);
        assert_eq!(entry.allocated(), 42);
    }
}
