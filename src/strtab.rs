//! Builds the per-block string table PBF writing requires: every string
//! referenced by a `PrimitiveBlock` (tag keys, tag values, relation member
//! roles) is deduplicated and replaced by an index into one shared table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::proto::osmformat;

/// A fresh table always reserves index 0 for the empty string, per PBF
/// convention — it is used as the default key/value/role reference.
pub struct StringTableBuilder {
    strings: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u32>,
}

impl StringTableBuilder {
    /// Start a fresh table with the empty string at index 0.
    pub fn new() -> StringTableBuilder {
        StringTableBuilder {
            strings: vec![Vec::new()],
            index: HashMap::new(),
        }
    }

    /// Return `bytes`'s index in the table, inserting it if not already
    /// present.
    pub fn dedup(&mut self, bytes: Vec<u8>) -> u32 {
        match self.index.entry(bytes.clone()) {
            Entry::Occupied(occ) => *occ.get(),
            Entry::Vacant(vac) => {
                self.strings.push(bytes);
                let idx = (self.strings.len() - 1) as u32;
                vac.insert(idx);
                idx
            }
        }
    }

    /// Emit the packed table for inclusion in a `PrimitiveBlock`.
    pub fn string_table(&self) -> osmformat::StringTable {
        let mut st = osmformat::StringTable::new();
        st.s = self.strings.clone();
        st
    }

    /// Reset to an empty table (index 0 still the empty string) for the
    /// next block.
    pub fn clear(&mut self) {
        self.strings.clear();
        self.strings.push(Vec::new());
        self.index.clear();
    }
}

impl Default for StringTableBuilder {
    fn default() -> StringTableBuilder {
        StringTableBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_index_zero() {
        let table = StringTableBuilder::new();
        assert_eq!(table.string_table().s, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn dedup_returns_stable_indices() {
        let mut table = StringTableBuilder::new();
        assert_eq!(table.dedup(b"abc".to_vec()), 1);
        assert_eq!(table.dedup(b"xyz".to_vec()), 2);
        assert_eq!(table.dedup(b"abc".to_vec()), 1);
    }

    #[test]
    fn clear_resets_to_just_the_empty_string() {
        let mut table = StringTableBuilder::new();
        table.dedup(b"abc".to_vec());
        table.clear();
        assert_eq!(table.dedup(b"abc".to_vec()), 1);
        assert_eq!(table.string_table().s.len(), 2);
    }
}
