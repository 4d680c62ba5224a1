//! Entry table and the in-memory address map indexing it
//!
//! The entry table is a dense array of [`StoreEntry`] records persisted as a
//! flat binary file. Slot 0 is a sentinel so an address map cell of 0 can
//! mean "empty". The address map is direct-mapped on the low bits of the
//! identifier with no chaining: a cell holds at most one slot, and a probe
//! whose identifier differs from the resident record is a miss.

use crate::entry::{StoreEntry, ENTRY_SIZE};
use crate::error::{Result, StoreError};
use crate::types::{Identifier, ObjectKind};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Filename of serialised entries
pub const ENTRIES_FNAME: &str = "entries";

/// Temporary filename used while replacing the entries file
pub const ENTRIES_TMP_FNAME: &str = "tentries";

pub struct EntryTable {
    entries: Vec<StoreEntry>,
    address_map: Vec<u32>,
    capacity: usize,
    ident_mask: u64,
    total_allocated: u64,
    dirty: bool,
}

/// Allocate a zeroed vector of `1 << bits` cells, reporting failure
/// instead of aborting.
fn alloc_cells(bits: u32) -> Result<Vec<u32>> {
    let len = 1u64
        .checked_shl(bits)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(StoreError::OutOfMemory)?;
    let mut cells = Vec::new();
    cells.try_reserve_exact(len)?;
    cells.resize(len, 0);
    Ok(cells)
}

/// Best-effort unlink; a file that is already gone is not an error.
pub(crate) fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Unable to remove file"),
    }
}

/// Read the entries file into a table of capacity `1 << entry_bits`.
///
/// A missing file yields a table holding only the sentinel slot.
pub fn read_entries(root: &Path, entry_bits: u32) -> Result<Vec<StoreEntry>> {
    let capacity = 1usize
        .checked_shl(entry_bits)
        .ok_or(StoreError::OutOfMemory)?;
    let mut entries = Vec::new();
    entries.try_reserve_exact(capacity)?;

    let path = root.join(ENTRIES_FNAME);
    let file = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = ?path, "No entries file, starting empty");
            entries.push(StoreEntry::default());
            return Ok(entries);
        }
        Err(e) => return Err(e.into()),
    };

    let mut buf = Vec::new();
    file.take((capacity * ENTRY_SIZE) as u64)
        .read_to_end(&mut buf)?;

    let mut records = buf.chunks_exact(ENTRY_SIZE);
    for record in &mut records {
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(record);
        entries.push(StoreEntry::from_bytes(&raw));
    }
    if !records.remainder().is_empty() {
        warn!(
            trailing = records.remainder().len(),
            "Ignoring partial record at end of entries file"
        );
    }

    match entries.first_mut() {
        // slot 0 is never a live record whatever the file holds
        Some(sentinel) => *sentinel = StoreEntry::default(),
        None => entries.push(StoreEntry::default()),
    }

    info!(count = entries.len() - 1, "Read entries from cache");
    Ok(entries)
}

impl EntryTable {
    /// Load the persisted table under `root` and index it.
    ///
    /// Returns the table plus any records dropped because a later record
    /// claimed the same address map cell with a different identifier; their
    /// files are the caller's to clean up.
    pub fn load(
        root: &Path,
        entry_bits: u32,
        identifier_bits: u32,
    ) -> Result<(Self, Vec<StoreEntry>)> {
        let entries = read_entries(root, entry_bits)?;
        Self::from_entries(entries, entry_bits, identifier_bits)
    }

    pub fn from_entries(
        entries: Vec<StoreEntry>,
        entry_bits: u32,
        identifier_bits: u32,
    ) -> Result<(Self, Vec<StoreEntry>)> {
        let mut table = Self {
            entries,
            address_map: alloc_cells(identifier_bits)?,
            capacity: 1usize << entry_bits,
            ident_mask: 1u64
                .checked_shl(identifier_bits)
                .map_or(u64::MAX, |n| n - 1),
            total_allocated: 0,
            dirty: false,
        };
        let shadowed = table.build_address_map();
        Ok((table, shadowed))
    }

    fn cell(&self, ident: Identifier) -> usize {
        (u64::from(ident) & self.ident_mask) as usize
    }

    /// Index every active slot and recompute the allocation total.
    fn build_address_map(&mut self) -> Vec<StoreEntry> {
        let mut dropped = vec![false; self.entries.len()];
        let mut shadowed = Vec::new();

        for slot in 1..self.entries.len() {
            let ident = self.entries[slot].identifier;
            let cell = self.cell(ident);
            let previous = self.address_map[cell] as usize;
            if previous != 0 {
                dropped[previous] = true;
                let earlier = self.entries[previous];
                warn!(
                    ident = format_args!("{:08x}", earlier.identifier),
                    slot = previous,
                    replaced_by = slot,
                    "Dropping entry shadowed in address map"
                );
                if earlier.identifier != ident {
                    shadowed.push(earlier);
                }
            }
            self.address_map[cell] = slot as u32;
        }

        if dropped.iter().any(|d| *d) {
            let mut slot = 0;
            self.entries.retain(|_| {
                let keep = !dropped[slot];
                slot += 1;
                keep
            });
            self.address_map.iter_mut().for_each(|cell| *cell = 0);
            for slot in 1..self.entries.len() {
                let cell = self.cell(self.entries[slot].identifier);
                self.address_map[cell] = slot as u32;
            }
            self.dirty = true;
        }

        self.total_allocated = self.entries[1..].iter().map(StoreEntry::allocated).sum();
        shadowed
    }

    /// Serialise the table if it changed since it was last written.
    ///
    /// The records go to a temporary file that is then renamed over the
    /// entries file.
    pub fn write_entries(&mut self, root: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let tmp_path = root.join(ENTRIES_TMP_FNAME);
        let path = root.join(ENTRIES_FNAME);

        let written = (|| -> std::io::Result<()> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for entry in &self.entries {
                writer.write_all(&entry.to_bytes())?;
            }
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = written {
            warn!(path = ?path, error = %e, "Failed to write entries");
            remove_if_present(&tmp_path);
            return Err(StoreError::save_failed(e));
        }

        self.dirty = false;
        info!(count = self.len(), "Wrote out entries");
        Ok(())
    }

    /// Slot holding `ident`, if resident.
    pub fn lookup(&self, ident: Identifier) -> Option<usize> {
        let slot = self.address_map[self.cell(ident)] as usize;
        if slot != 0 && self.entries[slot].identifier == ident {
            Some(slot)
        } else {
            None
        }
    }

    /// Identifier of whatever record currently owns `ident`'s map cell.
    pub fn resident(&self, ident: Identifier) -> Option<Identifier> {
        let slot = self.address_map[self.cell(ident)] as usize;
        (slot != 0).then(|| self.entries[slot].identifier)
    }

    pub fn entry(&self, slot: usize) -> &StoreEntry {
        &self.entries[slot]
    }

    /// Record a successful fetch.
    pub fn touch(&mut self, slot: usize, now: i64) {
        self.entries[slot].touch(now);
        self.dirty = true;
    }

    /// Sizes only change through here so the allocation total stays exact.
    pub fn set_size(&mut self, slot: usize, kind: ObjectKind, size: u32) {
        let entry = &mut self.entries[slot];
        self.total_allocated -= u64::from(entry.size(kind));
        entry.set_size(kind, size);
        self.total_allocated += u64::from(size);
        self.dirty = true;
    }

    /// Reset usage as for a freshly stored object.
    pub fn restart(&mut self, slot: usize, now: i64) {
        let entry = &mut self.entries[slot];
        entry.use_count = 1;
        entry.last_used = now;
        self.dirty = true;
    }

    /// Append a new record for `ident`. The map cell must be free.
    pub fn insert(&mut self, ident: Identifier, now: i64) -> Result<usize> {
        if self.is_full() {
            warn!(capacity = self.capacity, "Entry table full");
            return Err(StoreError::OutOfMemory);
        }
        let cell = self.cell(ident);
        debug_assert_eq!(self.address_map[cell], 0);

        let slot = self.entries.len();
        self.entries.push(StoreEntry::new(ident, now));
        self.address_map[cell] = slot as u32;
        self.dirty = true;
        Ok(slot)
    }

    /// Remove the record for `ident`, keeping the table dense by moving the
    /// last record into the vacated slot.
    pub fn remove(&mut self, ident: Identifier) -> Result<StoreEntry> {
        let cell = self.cell(ident);
        let slot = self.address_map[cell] as usize;
        if slot == 0 {
            debug!(ident = format_args!("{:08x}", ident), "Ident to remove not in index");
            return Err(StoreError::NotFound);
        }
        if self.entries[slot].identifier != ident {
            debug!(
                ident = format_args!("{:08x}", ident),
                resident = format_args!("{:08x}", self.entries[slot].identifier),
                slot,
                "Entry does not match ident"
            );
            return Err(StoreError::NotFound);
        }

        self.address_map[cell] = 0;
        let removed = self.entries.swap_remove(slot);
        if slot < self.entries.len() {
            let moved_cell = self.cell(self.entries[slot].identifier);
            self.address_map[moved_cell] = slot as u32;
        }

        self.total_allocated -= removed.allocated();
        self.dirty = true;
        Ok(removed)
    }

    /// Active records, sentinel excluded
    pub fn active(&self) -> &[StoreEntry] {
        &self.entries[1..]
    }

    /// Number of active records
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in use including the sentinel
    pub fn last_entry(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
