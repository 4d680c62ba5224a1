//! Eviction ordering
//!
//! Entries are ranked by use count and then by age, so the oldest object
//! with the fewest uses goes first.

use crate::entry::StoreEntry;
use crate::error::Result;
use crate::types::Identifier;

/// Whether the store has outgrown its byte limit or its entry table.
pub fn needs_eviction(total_allocated: u64, limit: u64, table_full: bool) -> bool {
    total_allocated >= limit || table_full
}

/// Identifiers to remove, in order, so that more than `hysteresis` bytes
/// are freed. Returns every entry if they cannot free that much together.
pub fn select_victims(entries: &[StoreEntry], hysteresis: u64) -> Result<Vec<Identifier>> {
    let mut ranked: Vec<&StoreEntry> = Vec::new();
    ranked.try_reserve_exact(entries.len())?;
    ranked.extend(entries);
    // stable: equal keys keep table order
    ranked.sort_by_key(|e| (e.use_count, e.last_used));

    let mut victims = Vec::new();
    let mut removed = 0u64;
    for entry in ranked {
        victims.push(entry.identifier);
        removed += entry.allocated();
        if removed > hysteresis {
            break;
        }
    }
    Ok(victims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(identifier: Identifier, use_count: u16, last_used: i64, size: u32) -> StoreEntry {
        StoreEntry {
            identifier,
            last_used,
            use_count,
            data_size: size,
            meta_size: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_needs_eviction() {
        assert!(!needs_eviction(99, 100, false));
        assert!(needs_eviction(100, 100, false));
        assert!(needs_eviction(0, 100, true));
    }

    #[test]
    fn test_least_used_then_oldest_first() {
        let entries = [
            entry(1, 3, 10, 10),
            entry(2, 1, 50, 10),
            entry(3, 1, 20, 10),
            entry(4, 2, 5, 10),
        ];
        let victims = select_victims(&entries, 1_000).unwrap();
        assert_eq!(victims, vec![3, 2, 4, 1]);
    }

    #[test]
    fn test_stops_once_hysteresis_exceeded() {
        let entries = [
            entry(1, 1, 10, 15),
            entry(2, 1, 20, 15),
            entry(3, 1, 30, 15),
        ];
        // 15 is not more than 20, 30 is
        assert_eq!(select_victims(&entries, 20).unwrap(), vec![1, 2]);
        assert_eq!(select_victims(&entries, 14).unwrap(), vec![1]);
    }

    #[test]
    fn test_ties_keep_table_order() {
        let entries = [entry(7, 1, 100, 40), entry(8, 1, 100, 40), entry(9, 1, 100, 40)];
        assert_eq!(select_victims(&entries, 20).unwrap(), vec![7]);
    }

    #[test]
    fn test_zero_sized_entries_all_go() {
        let entries = [entry(1, 1, 1, 0), entry(2, 1, 2, 0)];
        assert_eq!(select_victims(&entries, 0).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_empty_table() {
        assert!(select_victims(&[], 10).unwrap().is_empty());
    }
}
