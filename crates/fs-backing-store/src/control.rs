//! Control record holding the store format version and index geometry

use crate::error::{Result, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Backing store file format version
pub const CONTROL_VERSION: u32 = 110;

/// Filename of the control record
pub const CONTROL_FNAME: &str = "control";

/// Geometry persisted alongside the entry table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    pub entry_bits: u32,
    pub identifier_bits: u32,
    pub last_entry: u64,
}

impl ControlRecord {
    fn encode(&self) -> Vec<u8> {
        format!(
            "{}\0{}\0{}\0{}\0",
            CONTROL_VERSION, self.entry_bits, self.identifier_bits, self.last_entry
        )
        .into_bytes()
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut fields = Fields { buf };

        let version: u32 = fields.next("version")?;
        if version != CONTROL_VERSION {
            return Err(StoreError::InitFailed(format!(
                "control version {} does not match {}",
                version, CONTROL_VERSION
            )));
        }

        Ok(Self {
            entry_bits: fields.next("entry_bits")?,
            identifier_bits: fields.next("identifier_bits")?,
            last_entry: fields.next("last_entry")?,
        })
    }
}

/// Cursor over NUL or newline terminated decimal fields
struct Fields<'a> {
    buf: &'a [u8],
}

impl Fields<'_> {
    fn next<T: std::str::FromStr>(&mut self, name: &str) -> Result<T> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0 || *b == b'\n')
            .ok_or_else(|| StoreError::InitFailed(format!("control field {} unterminated", name)))?;
        let text = std::str::from_utf8(&self.buf[..end])
            .map_err(|_| StoreError::InitFailed(format!("control field {} not text", name)))?;
        let value = text.trim().parse().map_err(|_| {
            StoreError::InitFailed(format!("control field {} malformed: {:?}", name, text))
        })?;
        self.buf = &self.buf[end + 1..];
        Ok(value)
    }
}

/// Write the control record, creating the store root if needed.
pub fn write_control(root: &Path, record: &ControlRecord) -> Result<()> {
    let path = root.join(CONTROL_FNAME);
    info!(path = ?path, "Writing control file");

    fs::create_dir_all(root).map_err(StoreError::save_failed)?;
    fs::write(&path, record.encode()).map_err(StoreError::save_failed)?;
    Ok(())
}

/// Read and parse the control record.
///
/// A missing file is reported as [`StoreError::NotFound`] so the caller can
/// create a fresh store.
pub fn read_control(root: &Path) -> Result<ControlRecord> {
    let path = root.join(CONTROL_FNAME);
    info!(path = ?path, "Opening control file");

    let buf = match fs::read(&path) {
        Ok(buf) => buf,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
        Err(e) => {
            return Err(StoreError::InitFailed(format!(
                "unable to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let record = ControlRecord::decode(&buf)?;
    debug!(?record, "Control file parsed");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> ControlRecord {
        ControlRecord {
            entry_bits: 16,
            identifier_bits: 20,
            last_entry: 42,
        }
    }

    #[test]
    fn test_control_file_format() {
        assert_eq!(record().encode(), b"110\x0016\x0020\x0042\x00".to_vec());
    }

    #[test]
    fn test_write_then_read_control() {
        let dir = tempdir().unwrap();
        write_control(dir.path(), &record()).unwrap();
        assert_eq!(read_control(dir.path()).unwrap(), record());
    }

    #[test]
    fn test_missing_control_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(read_control(dir.path()), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_newline_terminated_fields_accepted() {
        let parsed = ControlRecord::decode(b"110\n12\n14\n3\n").unwrap();
        assert_eq!(parsed.entry_bits, 12);
        assert_eq!(parsed.identifier_bits, 14);
        assert_eq!(parsed.last_entry, 3);
    }

    #[test]
    fn test_version_mismatch_fails() {
        let err = ControlRecord::decode(b"202\x0016\x0020\x001\x00").unwrap_err();
        assert!(matches!(err, StoreError::InitFailed(_)));
    }

    #[test]
    fn test_malformed_field_fails() {
        let err = ControlRecord::decode(b"110\x00sixteen\x0020\x001\x00").unwrap_err();
        assert!(matches!(err, StoreError::InitFailed(_)));
    }

    #[test]
    fn test_truncated_record_fails() {
        let err = ControlRecord::decode(b"110\x0016\x0020").unwrap_err();
        assert!(matches!(err, StoreError::InitFailed(_)));
    }
}
