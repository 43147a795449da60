//! Tracks which 64-bit OSM IDs have been seen, using compressed bitmaps.
//!
//! OSM IDs are 64-bit but the occupied range is tiny in comparison (node IDs
//! sit under 2^34 as of this writing). A dense bitset over the full ID space
//! would work but on a filtered load it can be sparse enough to spray writes
//! across far more memory pages than necessary. `roaring::RoaringBitmap`
//! handles that well, but it's natively a 32-bit structure, so wider IDs are
//! tracked as multiple bins, each covering one 32-bit slice of the ID space.

use roaring::RoaringBitmap;

use crate::error::{new_error, ErrorKind, Result};

const BIN_BITS: u32 = 32;

/// Tracks a set of non-negative IDs up to `max_id` (exclusive), partitioned
/// into 32-bit-wide bins.
pub struct IdTracker {
    bins: Vec<RoaringBitmap>,
    max_id: i64,
}

impl IdTracker {
    /// Create a tracker covering IDs in `[0, max_id)`.
    pub fn new(max_id: i64) -> IdTracker {
        let n_bins = ((max_id as u64) >> BIN_BITS) as usize + 1;
        IdTracker {
            bins: (0..n_bins).map(|_| RoaringBitmap::new()).collect(),
            max_id,
        }
    }

    fn split(&self, id: i64) -> Result<(usize, u32)> {
        if id < 0 || id >= self.max_id {
            return Err(new_error(ErrorKind::CapacityExceeded {
                what: "id tracker: id out of configured range",
            }));
        }
        let id = id as u64;
        let bin_index = (id >> BIN_BITS) as usize;
        let bit_index = (id & 0xffff_ffff) as u32;
        Ok((bin_index, bit_index))
    }

    /// Mark `id` as seen. Returns whether it was already marked.
    pub fn set(&mut self, id: i64) -> Result<bool> {
        let (bin_index, bit_index) = self.split(id)?;
        let newly_inserted = self.bins[bin_index].insert(bit_index);
        Ok(!newly_inserted)
    }

    /// Whether `id` has been marked via [`IdTracker::set`].
    pub fn contains(&self, id: i64) -> bool {
        match self.split(id) {
            Ok((bin_index, bit_index)) => self.bins[bin_index].contains(bit_index),
            Err(_) => false,
        }
    }

    /// Total number of IDs currently marked, across all bins.
    pub fn len(&self) -> u64 {
        self.bins.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|b| b.is_empty())
    }

    /// Clear every bin, e.g. between an extract's node pass and way pass.
    pub fn reset(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    /// Iterate all marked IDs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.bins.iter().enumerate().flat_map(|(bin_index, bin)| {
            let base = (bin_index as i64) << BIN_BITS;
            bin.iter().map(move |bit| base + i64::from(bit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_NODE_ID;

    #[test]
    fn set_and_contains() {
        let mut t = IdTracker::new(10_000);
        for i in (0..10_000).step_by(3) {
            t.set(i).unwrap();
        }
        for i in 0..10_000 {
            assert_eq!(t.contains(i), i % 3 == 0, "id {i}");
        }
    }

    #[test]
    fn set_reports_prior_membership() {
        let mut t = IdTracker::new(10_000);
        assert!(!t.set(7).unwrap(), "first set should report not-already-present");
        assert!(t.set(7).unwrap(), "second set should report already-present");
    }

    #[test]
    fn spans_multiple_bins() {
        let mut t = IdTracker::new(MAX_NODE_ID);
        let ids = [0i64, 1, (1i64 << 32) - 1, 1i64 << 32, 1i64 << 33, MAX_NODE_ID - 1];
        for &id in &ids {
            t.set(id).unwrap();
        }
        for &id in &ids {
            assert!(t.contains(id));
        }
        assert!(!t.contains(42));
        assert_eq!(t.len(), ids.len() as u64);
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let mut t = IdTracker::new(100);
        assert!(t.set(100).is_err());
        assert!(t.set(-1).is_err());
    }

    #[test]
    fn reset_clears_all_bins() {
        let mut t = IdTracker::new(MAX_NODE_ID);
        t.set(5).unwrap();
        t.set(1i64 << 33).unwrap();
        t.reset();
        assert!(t.is_empty());
        assert!(!t.contains(5));
    }

    #[test]
    fn iter_yields_ascending_ids() {
        let mut t = IdTracker::new(MAX_NODE_ID);
        let ids = [5i64, 1i64 << 33, 2, 1i64 << 32];
        for &id in &ids {
            t.set(id).unwrap();
        }
        let collected: Vec<i64> = t.iter().collect();
        assert_eq!(collected, vec![2, 5, 1i64 << 32, 1i64 << 33]);
    }
}
