//! Iterate over the dense nodes in a `PrimitiveGroup`.

use crate::block::{get_stringtable_key_value, str_from_stringtable};
use crate::error::Result;
use crate::proto::osmformat;
use std::slice::Iter as SliceIter;

/// Cumulative-sum adapter over an iterator of deltas, turning a stream of
/// `d0, d1, d2, ...` into the running totals `d0, d0+d1, d0+d1+d2, ...`.
/// DenseNodes and relation member lists are delta-coded this way throughout
/// the PBF format; this is the one place that decoding happens.
#[derive(Clone, Debug)]
pub(crate) struct CumulativeSum<I> {
    inner: I,
    acc: i64,
}

pub(crate) trait CumulativeSumExt: Sized {
    fn cumulative_sum(self) -> CumulativeSum<Self>;
}

impl<I: Iterator<Item = i64>> CumulativeSumExt for I {
    fn cumulative_sum(self) -> CumulativeSum<Self> {
        CumulativeSum { inner: self, acc: 0 }
    }
}

impl<I: Iterator<Item = i64>> Iterator for CumulativeSum<I> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let delta = self.inner.next()?;
        self.acc += delta;
        Some(self.acc)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<I: Iterator<Item = i64> + ExactSizeIterator> ExactSizeIterator for CumulativeSum<I> {}

pub(crate) type DeltaIter<'a> = CumulativeSum<std::iter::Copied<SliceIter<'a, i64>>>;

fn delta_iter(values: &[i64]) -> DeltaIter<'_> {
    values.iter().copied().cumulative_sum()
}

/// The maximum number of tags the reader will attach to a single dense node.
/// Beyond this, additional tags in the keys_vals stream are discarded with a
/// warning rather than growing a per-node allocation without bound.
pub const MAX_TAGS_PER_NODE: usize = 256;

/// An OpenStreetMap node element decoded from a compressed `DenseNodes` array.
#[derive(Clone, Debug)]
pub struct DenseNode<'a> {
    block: &'a osmformat::PrimitiveBlock,

    /// The node id.
    pub id: i64,
    lat: i64,
    lon: i64,
    keys_vals_indices: &'a [i32],

    /// The user id, or 0 if dense info was absent.
    pub uid: i32,
}

impl<'a> DenseNode<'a> {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn lat(&self) -> f64 {
        1e-9 * self.nano_lat() as f64
    }

    pub fn nano_lat(&self) -> i64 {
        self.block.lat_offset() + i64::from(self.block.granularity()) * self.lat
    }

    pub fn lon(&self) -> f64 {
        1e-9 * self.nano_lon() as f64
    }

    pub fn nano_lon(&self) -> i64 {
        self.block.lon_offset() + i64::from(self.block.granularity()) * self.lon
    }

    pub fn tags(&self) -> DenseTagIter<'a> {
        DenseTagIter {
            block: self.block,
            keys_vals_indices: self.keys_vals_indices.iter(),
        }
    }

    pub fn raw_tags(&self) -> DenseRawTagIter<'a> {
        DenseRawTagIter {
            keys_vals_indices: self.keys_vals_indices.iter(),
        }
    }
}

/// An iterator over dense nodes. Decodes the delta-coded id/lat/lon arrays and
/// splits the zero-delimited keys_vals stream back into per-node tag slices.
#[derive(Clone, Debug)]
pub struct DenseNodeIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    ids: DeltaIter<'a>,
    lats: DeltaIter<'a>,
    lons: DeltaIter<'a>,
    uids: std::vec::IntoIter<i32>,
    keys_vals_slice: &'a [i32],
    keys_vals_index: usize,
}

impl<'a> DenseNodeIter<'a> {
    pub(crate) fn new(
        block: &'a osmformat::PrimitiveBlock,
        osmdense: &'a osmformat::DenseNodes,
    ) -> DenseNodeIter<'a> {
        let uids: Vec<i32> = match osmdense.denseinfo.as_ref() {
            Some(info) => {
                let mut acc: i64 = 0;
                info.uid
                    .iter()
                    .map(|&d| {
                        acc += i64::from(d);
                        acc as i32
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        DenseNodeIter {
            block,
            ids: delta_iter(&osmdense.id),
            lats: delta_iter(&osmdense.lat),
            lons: delta_iter(&osmdense.lon),
            uids: uids.into_iter(),
            keys_vals_slice: osmdense.keys_vals.as_slice(),
            keys_vals_index: 0,
        }
    }

    pub(crate) fn empty(block: &'a osmformat::PrimitiveBlock) -> DenseNodeIter<'a> {
        DenseNodeIter {
            block,
            ids: delta_iter(&[]),
            lats: delta_iter(&[]),
            lons: delta_iter(&[]),
            uids: Vec::new().into_iter(),
            keys_vals_slice: &[],
            keys_vals_index: 0,
        }
    }
}

impl<'a> Iterator for DenseNodeIter<'a> {
    type Item = DenseNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, lat, lon) = match (self.ids.next(), self.lats.next(), self.lons.next()) {
            (Some(id), Some(lat), Some(lon)) => (id, lat, lon),
            _ => return None,
        };
        let uid = self.uids.next().unwrap_or(0);

        let start_index = self.keys_vals_index;
        let mut end_index = start_index;
        let mut tag_count = 0usize;
        for chunk in self.keys_vals_slice[self.keys_vals_index..].chunks(2) {
            if chunk.first() == Some(&0) || chunk.len() < 2 {
                self.keys_vals_index += 1;
                break;
            }
            end_index += 2;
            self.keys_vals_index += 2;
            tag_count += 1;
            if tag_count == MAX_TAGS_PER_NODE {
                tracing::warn!(node_id = id, "dense node tag list exceeds {MAX_TAGS_PER_NODE} tags, truncating");
                // Skip to the next zero delimiter without attaching more tags.
                while let Some(&v) = self.keys_vals_slice.get(self.keys_vals_index) {
                    self.keys_vals_index += 1;
                    if v == 0 {
                        break;
                    } else {
                        self.keys_vals_index += 1; // consume the paired value too
                    }
                }
                break;
            }
        }

        Some(DenseNode {
            block: self.block,
            id,
            lat,
            lon,
            keys_vals_indices: &self.keys_vals_slice[start_index..end_index],
            uid,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for DenseNodeIter<'_> {}

/// An iterator over the tags of a dense node.
#[derive(Clone, Debug)]
pub struct DenseTagIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    keys_vals_indices: SliceIter<'a, i32>,
}

impl<'a> Iterator for DenseTagIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        get_stringtable_key_value(
            self.block,
            self.keys_vals_indices.next().map(|v| *v as usize),
            self.keys_vals_indices.next().map(|v| *v as usize),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.keys_vals_indices.len() / 2;
        (len, Some(len))
    }
}

impl ExactSizeIterator for DenseTagIter<'_> {}

/// An iterator over raw `(key_index, value_index)` pairs of a dense node.
#[derive(Clone, Debug)]
pub struct DenseRawTagIter<'a> {
    keys_vals_indices: SliceIter<'a, i32>,
}

impl Iterator for DenseRawTagIter<'_> {
    type Item = (i32, i32);

    fn next(&mut self) -> Option<Self::Item> {
        match (self.keys_vals_indices.next(), self.keys_vals_indices.next()) {
            (Some(&key_index), Some(&val_index)) => Some((key_index, val_index)),
            _ => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.keys_vals_indices.len() / 2;
        (len, Some(len))
    }
}

impl ExactSizeIterator for DenseRawTagIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_sum_matches_running_total() {
        let deltas: [i64; 4] = [5, -2, 10, -13];
        let totals: Vec<i64> = deltas.iter().copied().cumulative_sum().collect();
        assert_eq!(totals, vec![5, 3, 13, 0]);
    }
}
