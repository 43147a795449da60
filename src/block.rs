//! `HeaderBlock`, `PrimitiveBlock` and the groups within them.

use crate::dense::DenseNodeIter;
use crate::elements::{Node, Relation, Way};
use crate::error::{new_error, ErrorKind, Result};
use crate::proto::osmformat;
use std::slice;
use std::str;

/// The decoded `OSMHeader` blob: required/optional feature strings and the bounding box.
pub struct HeaderBlock {
    pub(crate) header: osmformat::HeaderBlock,
}

impl HeaderBlock {
    pub(crate) fn new(header: osmformat::HeaderBlock) -> HeaderBlock {
        HeaderBlock { header }
    }

    /// Feature strings a reader must understand to correctly parse this file
    /// (e.g. `"OsmSchema-V0.6"`, `"DenseNodes"`).
    pub fn required_features(&self) -> &[String] {
        &self.header.required_features
    }

    /// Feature strings that are safe to ignore if unknown.
    pub fn optional_features(&self) -> &[String] {
        &self.header.optional_features
    }

    /// The program that wrote this file, if recorded.
    pub fn writingprogram(&self) -> Option<&str> {
        self.header.writingprogram.as_deref()
    }
}

/// A decoded `OSMData` blob: a string table plus one or more primitive groups.
pub struct PrimitiveBlock {
    pub(crate) block: osmformat::PrimitiveBlock,
}

impl PrimitiveBlock {
    pub(crate) fn new(block: osmformat::PrimitiveBlock) -> PrimitiveBlock {
        PrimitiveBlock { block }
    }

    pub fn groups(&self) -> GroupIter<'_> {
        GroupIter::new(&self.block)
    }
}

pub struct PrimitiveGroup<'a> {
    block: &'a osmformat::PrimitiveBlock,
    group: &'a osmformat::PrimitiveGroup,
}

impl<'a> PrimitiveGroup<'a> {
    fn new(
        block: &'a osmformat::PrimitiveBlock,
        group: &'a osmformat::PrimitiveGroup,
    ) -> PrimitiveGroup<'a> {
        PrimitiveGroup { block, group }
    }

    pub fn nodes(&self) -> GroupNodeIter<'a> {
        GroupNodeIter::new(self.block, self.group)
    }

    pub fn dense_nodes(&self) -> DenseNodeIter<'a> {
        match self.group.dense.as_ref() {
            Some(dense) => DenseNodeIter::new(self.block, dense),
            None => DenseNodeIter::empty(self.block),
        }
    }

    pub fn ways(&self) -> GroupWayIter<'a> {
        GroupWayIter::new(self.block, self.group)
    }

    pub fn relations(&self) -> GroupRelationIter<'a> {
        GroupRelationIter::new(self.block, self.group)
    }
}

pub struct GroupIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    groups: slice::Iter<'a, osmformat::PrimitiveGroup>,
}

impl<'a> GroupIter<'a> {
    fn new(block: &'a osmformat::PrimitiveBlock) -> GroupIter<'a> {
        GroupIter {
            block,
            groups: block.primitivegroup.iter(),
        }
    }
}

impl<'a> Iterator for GroupIter<'a> {
    type Item = PrimitiveGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.groups.next().map(|g| PrimitiveGroup::new(self.block, g))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl ExactSizeIterator for GroupIter<'_> {}

macro_rules! group_iter {
    ($name:ident, $elem:ident, $field:ident, $proto:path) => {
        pub struct $name<'a> {
            block: &'a osmformat::PrimitiveBlock,
            inner: slice::Iter<'a, $proto>,
        }

        impl<'a> $name<'a> {
            fn new(
                block: &'a osmformat::PrimitiveBlock,
                group: &'a osmformat::PrimitiveGroup,
            ) -> $name<'a> {
                $name {
                    block,
                    inner: group.$field.iter(),
                }
            }
        }

        impl<'a> Iterator for $name<'a> {
            type Item = $elem<'a>;

            fn next(&mut self) -> Option<Self::Item> {
                self.inner.next().map(|x| $elem::new(self.block, x))
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                self.inner.size_hint()
            }
        }

        impl ExactSizeIterator for $name<'_> {}
    };
}

group_iter!(GroupNodeIter, Node, nodes, osmformat::Node);
group_iter!(GroupWayIter, Way, ways, osmformat::Way);
group_iter!(GroupRelationIter, Relation, relations, osmformat::Relation);

pub(crate) fn str_from_stringtable<'a>(
    block: &'a osmformat::PrimitiveBlock,
    index: usize,
) -> Result<&'a str> {
    match block.stringtable.s.get(index) {
        Some(bytes) => str::from_utf8(bytes).map_err(|err| {
            new_error(ErrorKind::StringtableUtf8 { err, index })
        }),
        None => Err(new_error(ErrorKind::StringtableIndexOutOfBounds { index })),
    }
}

/// Resolve a `(key_index, value_index)` pair into `(&str, &str)`, silently skipping
/// entries with a missing index (mirrors the upstream reader's leniency: a malformed
/// single tag should not abort iteration of an otherwise valid block).
pub(crate) fn get_stringtable_key_value<'a>(
    block: &'a osmformat::PrimitiveBlock,
    key_index: Option<usize>,
    val_index: Option<usize>,
) -> Option<(&'a str, &'a str)> {
    match (key_index, val_index) {
        (Some(k), Some(v)) => {
            match (str_from_stringtable(block, k), str_from_stringtable(block, v)) {
                (Ok(k), Ok(v)) => Some((k, v)),
                _ => None,
            }
        }
        _ => None,
    }
}
