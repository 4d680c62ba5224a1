//! Store, fetch and invalidate operations plus store lifecycle

use crate::config::{validate_geometry, StoreParameters};
use crate::control::{read_control, write_control, ControlRecord, CONTROL_FNAME};
use crate::entry::StoreEntry;
use crate::error::{Result, StoreError};
use crate::evict::{needs_eviction, select_victims};
use crate::filename::store_path;
use crate::key;
use crate::table::{remove_if_present, EntryTable, ENTRIES_FNAME, ENTRIES_TMP_FNAME};
use crate::types::{CacheStats, Identifier, ObjectKind};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const CACHEDIR_TAG_FNAME: &str = "CACHEDIR.TAG";

const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by fs-backing-store.\n\
# For information about cache directory tags, see:\n\
#\thttp://www.brynosaurus.com/cachedir/\n";

/// Persistent object store keyed by URL.
///
/// Created closed; [`BackingStore::initialise`] opens it on a directory and
/// [`BackingStore::finalise`] (or drop) writes back the entry table.
#[derive(Default)]
pub struct BackingStore {
    state: Option<StoreState>,
}

struct StoreState {
    path: PathBuf,
    limit: u64,
    hysteresis: u64,
    identifier_bits: u32,
    entry_bits: u32,
    table: EntryTable,
    hit_count: u64,
    miss_count: u64,
    hit_bytes: u64,
    /// Last timestamp handed out by [`StoreState::tick`]
    clock: i64,
}

impl BackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the store described by `params`.
    ///
    /// A zero limit or missing path leaves the store disabled and succeeds.
    pub fn initialise(&mut self, params: &StoreParameters) -> Result<()> {
        if self.state.is_some() {
            return Err(StoreError::AlreadyInitialised);
        }

        let path = match &params.path {
            Some(path) if !params.is_disabled() => path.clone(),
            _ => {
                info!("Backing store disabled by configuration");
                return Ok(());
            }
        };
        params.validate()?;

        let (entry_bits, identifier_bits) = open_control(&path, params)?;

        let (table, shadowed) = EntryTable::load(&path, entry_bits, identifier_bits)?;
        let clock = table.active().iter().map(|e| e.last_used).max().unwrap_or(0);

        let state = StoreState {
            path,
            limit: params.limit,
            hysteresis: params.hysteresis,
            identifier_bits,
            entry_bits,
            table,
            hit_count: 0,
            miss_count: 0,
            hit_bytes: 0,
            clock,
        };
        for entry in &shadowed {
            state.unlink_files(entry.identifier);
        }

        info!(
            path = ?state.path,
            limit = state.limit,
            hysteresis = state.hysteresis,
            identifier_bits,
            entry_bits,
            "FS backing store init successful"
        );
        info!(
            used = state.table.total_allocated(),
            limit = state.limit,
            entries = state.table.len(),
            "Backing store usage"
        );

        self.state = Some(state);
        Ok(())
    }

    /// Write back the entry table and close the store. Closing a closed
    /// store does nothing.
    pub fn finalise(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        let result = state.flush();
        state.log_stats();
        result
    }

    /// Persist the entry table now if it has changed, leaving the store open.
    pub fn flush(&mut self) -> Result<()> {
        self.state_mut()?.flush()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Place an object in the store, replacing any previous object of the
    /// same kind for `url`.
    ///
    /// The object is written to disk before the entry table is updated, so a
    /// failed write leaves the table as it was.
    pub fn store(&mut self, url: &str, kind: ObjectKind, data: &[u8]) -> Result<()> {
        let state = self.state_mut()?;
        let ident = key::identifier(url);
        debug!(url, ident = format_args!("{:08x}", ident), ?kind, len = data.len(), "Storing object");

        let size = u32::try_from(data.len()).map_err(|_| {
            StoreError::BadParameter(format!("object of {} bytes too large", data.len()))
        })?;

        if let Err(e) = state.evict() {
            error!(error = %e, "Eviction failed");
            return Err(e);
        }

        let path = store_path(&state.path, ident, kind, state.identifier_bits)?;
        write_object(&path, data)?;

        let now = state.tick();
        let slot = match state.table.lookup(ident) {
            Some(slot) => {
                state.table.restart(slot, now);
                slot
            }
            None => {
                if let Some(resident) = state.table.resident(ident) {
                    debug!(
                        ident = format_args!("{:08x}", ident),
                        resident = format_args!("{:08x}", resident),
                        "Replacing aliased entry"
                    );
                    state.remove_entry(resident)?;
                }
                match state.table.insert(ident, now) {
                    Ok(slot) => slot,
                    Err(e) => {
                        remove_if_present(&path);
                        return Err(e);
                    }
                }
            }
        };
        state.table.set_size(slot, kind, size);

        debug!(ident = format_args!("{:08x}", ident), size, "Stored object");
        Ok(())
    }

    /// Retrieve an object previously stored for `url`.
    pub fn fetch(&mut self, url: &str, kind: ObjectKind) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.fetch_into(url, kind, &mut buf)?;
        Ok(buf)
    }

    /// Retrieve an object into `buf`, replacing its contents. Returns the
    /// number of bytes read.
    pub fn fetch_into(&mut self, url: &str, kind: ObjectKind, buf: &mut Vec<u8>) -> Result<usize> {
        let state = self.state_mut()?;
        let ident = key::identifier(url);

        let Some(slot) = state.table.lookup(ident) else {
            debug!(url, "Entry not found");
            state.miss_count += 1;
            return Err(StoreError::NotFound);
        };
        state.hit_count += 1;

        let size = state.table.entry(slot).size(kind);
        let path = store_path(&state.path, ident, kind, state.identifier_bits)?;
        debug!(url, ?kind, size, "Retrieving cache data");

        buf.clear();
        let len = read_object(&path, size, buf)?;

        let now = state.tick();
        state.table.touch(slot, now);
        state.hit_bytes += len as u64;
        Ok(len)
    }

    /// Forget `url` and remove its files.
    pub fn invalidate(&mut self, url: &str) -> Result<()> {
        let state = self.state_mut()?;
        let ident = key::identifier(url);
        debug!(url, ident = format_args!("{:08x}", ident), "Invalidating entry");
        state.remove_entry(ident).map(|_| ())
    }

    /// Run an eviction pass now if the store is over its limits.
    pub fn evict(&mut self) -> Result<()> {
        self.state_mut()?.evict()
    }

    /// Get current store statistics
    pub fn stats(&self) -> CacheStats {
        match &self.state {
            Some(state) => CacheStats {
                entries: state.table.len(),
                total_size: state.table.total_allocated(),
                limit: state.limit,
                hits: state.hit_count,
                misses: state.miss_count,
                hit_bytes: state.hit_bytes,
            },
            None => CacheStats::default(),
        }
    }

    fn state_mut(&mut self) -> Result<&mut StoreState> {
        self.state
            .as_mut()
            .ok_or_else(|| StoreError::InitFailed("backing store not initialised".to_string()))
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        if let Err(e) = self.finalise() {
            error!(error = %e, "Failed to finalise backing store");
        }
    }
}

impl StoreState {
    /// Milliseconds since the UNIX epoch, strictly increasing so that no two
    /// stores or fetches share a `last_used`.
    fn tick(&mut self) -> i64 {
        self.clock = Utc::now().timestamp_millis().max(self.clock + 1);
        self.clock
    }

    fn flush(&mut self) -> Result<()> {
        if !self.table.is_dirty() {
            return Ok(());
        }
        self.table.write_entries(&self.path)?;
        write_control(
            &self.path,
            &ControlRecord {
                entry_bits: self.entry_bits,
                identifier_bits: self.identifier_bits,
                last_entry: self.table.last_entry() as u64,
            },
        )
    }

    /// Evict entries to bring the store back within its configured size
    /// and entry count.
    fn evict(&mut self) -> Result<()> {
        if !needs_eviction(self.table.total_allocated(), self.limit, self.table.is_full()) {
            return Ok(());
        }

        info!(
            total = self.table.total_allocated(),
            hysteresis = self.hysteresis,
            entries = self.table.len(),
            "Evicting entries"
        );

        let victims = select_victims(self.table.active(), self.hysteresis)?;
        let mut removed = 0u64;
        for ident in &victims {
            removed += self.remove_entry(*ident)?.allocated();
        }

        info!(
            removed,
            count = victims.len(),
            remaining = self.table.total_allocated(),
            remaining_entries = self.table.len(),
            "Eviction complete"
        );
        Ok(())
    }

    /// Drop the record for `ident` and unlink its files.
    fn remove_entry(&mut self, ident: Identifier) -> Result<StoreEntry> {
        let entry = self.table.remove(ident)?;
        self.unlink_files(ident);
        Ok(entry)
    }

    /// Best-effort removal of both files for `ident`.
    fn unlink_files(&self, ident: Identifier) {
        for kind in [ObjectKind::Meta, ObjectKind::Data] {
            let Ok(path) = store_path(&self.path, ident, kind, self.identifier_bits) else {
                continue;
            };
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove cached file"),
            }
        }
    }

    fn log_stats(&self) {
        let op_count = self.hit_count + self.miss_count;
        if op_count == 0 {
            return;
        }
        info!(
            total = op_count,
            hits = self.hit_count,
            misses = self.miss_count,
            hit_pct = self.hit_count * 100 / op_count,
            miss_pct = self.miss_count * 100 / op_count,
            hit_bytes = self.hit_bytes,
            "Cache statistics"
        );
    }
}

/// Read the control record or lay down a fresh store, returning the
/// `(entry_bits, identifier_bits)` geometry in force.
fn open_control(path: &Path, params: &StoreParameters) -> Result<(u32, u32)> {
    match read_control(path) {
        Ok(record) => match validate_geometry(record.identifier_bits, record.entry_bits) {
            Ok(()) => {
                if record.entry_bits != params.entry_bits
                    || record.identifier_bits != params.identifier_bits
                {
                    info!(
                        entry_bits = record.entry_bits,
                        identifier_bits = record.identifier_bits,
                        "Using geometry of existing store"
                    );
                }
                return Ok((record.entry_bits, record.identifier_bits));
            }
            Err(e) => {
                error!(error = %e, "Control file geometry unusable");
                remove_store_files(path);
            }
        },
        Err(StoreError::NotFound) => {
            info!("Cache control file not found, making fresh");
            remove_store_files(path);
        }
        Err(e) => {
            error!(error = %e, "Read control failed");
            remove_store_files(path);
        }
    }

    create_fresh(path, params)?;
    Ok((params.entry_bits, params.identifier_bits))
}

fn create_fresh(path: &Path, params: &StoreParameters) -> Result<()> {
    write_control(
        path,
        &ControlRecord {
            entry_bits: params.entry_bits,
            identifier_bits: params.identifier_bits,
            last_entry: 1,
        },
    )?;
    remove_if_present(&path.join(ENTRIES_FNAME));
    if let Err(e) = fs::write(path.join(CACHEDIR_TAG_FNAME), CACHEDIR_TAG) {
        warn!(error = %e, "Unable to write cache directory tag");
    }
    Ok(())
}

/// Remove what a previous store left under `path`. Anything else in the
/// directory is left alone.
fn remove_store_files(path: &Path) {
    for name in [CONTROL_FNAME, ENTRIES_FNAME, ENTRIES_TMP_FNAME] {
        remove_if_present(&path.join(name));
    }
    for kind in [ObjectKind::Data, ObjectKind::Meta] {
        let dir = path.join(kind.dir_name());
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!(dir = ?dir, "Removed old cache objects"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(dir = ?dir, error = %e, "Unable to clean up old cache objects"),
        }
    }
}

/// Write `data` to `path` through a temporary sibling file.
fn write_object(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    let written = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        error!(path = ?path, len = data.len(), error = %e, "Write failed");
        remove_if_present(&tmp_path);
        return Err(StoreError::save_failed(e));
    }
    Ok(())
}

/// Read exactly `size` bytes from `path` into `buf`.
///
/// A file that cannot be opened or is shorter than recorded is a miss.
fn read_object(path: &Path, size: u32, buf: &mut Vec<u8>) -> Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = ?path, error = %e, "Open failed");
            return Err(StoreError::NotFound);
        }
    };

    buf.try_reserve_exact(size as usize)?;
    let len = match file.take(u64::from(size)).read_to_end(buf) {
        Ok(len) => len,
        Err(e) => {
            warn!(path = ?path, error = %e, "Read error");
            return Err(StoreError::NotFound);
        }
    };
    if len < size as usize {
        warn!(path = ?path, len, size, "Cached file shorter than recorded");
        return Err(StoreError::NotFound);
    }
    Ok(len)
}
