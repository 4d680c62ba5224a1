//! Sharded on-disk paths for stored objects
//!
//! An identifier is encoded with the URL-safe base64 alphabet, six bits per
//! symbol starting from the low-order bits. The leading symbols become
//! single-character directory levels so no directory holds more than 64
//! children, and the full encoding names the file itself:
//!
//! ```text
//! <root>/data/A/B/C/ABCDEF
//! ```

use crate::error::{Result, StoreError};
use crate::types::{Identifier, ObjectKind};
use std::path::{Path, PathBuf};

const ENCODING_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Symbols needed to encode a 32-bit identifier
const SYMBOLS: usize = 6;

/// Deepest supported directory nesting
const MAX_DEPTH: u32 = SYMBOLS as u32;

/// Widest address map the codec can shard
pub const MAX_IDENTIFIER_BITS: u32 = MAX_DEPTH * 6;

/// Encode an identifier as six symbols, low-order bits first.
fn encode(ident: Identifier) -> [u8; SYMBOLS] {
    let mut out = [0u8; SYMBOLS];
    for (i, sym) in out.iter_mut().enumerate() {
        *sym = ENCODING_TABLE[((ident >> (i * 6)) & 0x3f) as usize];
    }
    out
}

/// Number of path components below the kind directory.
fn depth(identifier_bits: u32) -> Result<u32> {
    let depth = identifier_bits.div_ceil(6);
    if depth == 0 || depth > MAX_DEPTH {
        return Err(StoreError::BadParameter(format!(
            "identifier_bits {} needs directory depth {}, supported 1..={}",
            identifier_bits, depth, MAX_DEPTH
        )));
    }
    Ok(depth)
}

/// Path of the file holding `kind` for `ident` under `root`.
pub fn store_path(
    root: &Path,
    ident: Identifier,
    kind: ObjectKind,
    identifier_bits: u32,
) -> Result<PathBuf> {
    let depth = depth(identifier_bits)? as usize;
    let symbols = encode(ident);

    let mut path = root.join(kind.dir_name());
    for sym in &symbols[..depth - 1] {
        path.push(char::from(*sym).to_string());
    }
    let leaf: String = symbols.iter().map(|&b| char::from(b)).collect();
    path.push(leaf);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_low_bits_first() {
        assert_eq!(&encode(0), b"AAAAAA");
        assert_eq!(&encode(1), b"BAAAAA");
        assert_eq!(&encode(63), b"_AAAAA");
        assert_eq!(&encode(64), b"ABAAAA");
        assert_eq!(&encode(u32::MAX), b"_____D");
    }

    #[test]
    fn test_depth_for_bits() {
        assert_eq!(depth(1).unwrap(), 1);
        assert_eq!(depth(6).unwrap(), 1);
        assert_eq!(depth(7).unwrap(), 2);
        assert_eq!(depth(20).unwrap(), 4);
        assert_eq!(depth(36).unwrap(), 6);
        assert!(depth(0).is_err());
        assert!(matches!(depth(37), Err(StoreError::BadParameter(_))));
    }

    #[test]
    fn test_store_path_layout() {
        let root = Path::new("/cache");
        // 0b000011_000010_000001 -> symbols B, C, D
        let ident = 1 | (2 << 6) | (3 << 12);
        let path = store_path(root, ident, ObjectKind::Data, 18).unwrap();
        assert_eq!(path, PathBuf::from("/cache/data/B/C/BCDAAA"));

        let path = store_path(root, ident, ObjectKind::Meta, 18).unwrap();
        assert_eq!(path, PathBuf::from("/cache/meta/B/C/BCDAAA"));
    }

    #[test]
    fn test_store_path_single_level() {
        let path = store_path(Path::new("/cache"), 5, ObjectKind::Data, 6).unwrap();
        assert_eq!(path, PathBuf::from("/cache/data/FAAAAA"));
    }

    #[test]
    fn test_store_path_rejects_unsupported_depth() {
        let result = store_path(Path::new("/cache"), 5, ObjectKind::Data, 40);
        assert!(matches!(result, Err(StoreError::BadParameter(_))));
    }

    #[test]
    fn test_directory_fan_out_is_bounded() {
        use std::collections::HashSet;
        let root = Path::new("/cache");
        let mut first_level = HashSet::new();
        for ident in (0..100_000u32).step_by(7) {
            let path = store_path(root, ident, ObjectKind::Data, 20).unwrap();
            let rel = path.strip_prefix("/cache/data").unwrap();
            first_level.insert(rel.components().next().unwrap().as_os_str().to_owned());
        }
        assert!(first_level.len() <= 64);
    }
}
