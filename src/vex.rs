//! The "vex" custom binary output format.
//!
//! An alternative to PBF output. Node, way and relation ids and node
//! coordinates are delta-coded against running state, carried as explicit
//! fields on [`VexWriter`] rather than process-wide statics. Tags are
//! written as fully expanded literal `(key, value)` UTF-8 string pairs
//! rather than the dictionary-coded bytes `crate::tags` produces for the
//! entity store — the format defers all compression to a later zlib/gzip
//! pass over the whole stream instead of a per-tag dictionary, since
//! block-level zipping gets most of the win a string table would.
//!
//! Delta-coding state is *not* reset per entity type: way node-refs continue
//! decrementing against the same `last_node_id` the node stage left behind,
//! because an extract's three passes (nodes, then ways, then relations)
//! visit node ids in roughly the same numeric neighborhood a way's refs will
//! also fall in.
//!
//! Relations are written in the same literal-tag-string style as nodes and
//! ways.

use std::io::Write;

use crate::error::Result;
use crate::store::MemberKind;
use crate::tags::KeyVal;
use crate::varint::{write_signed, write_unsigned};

/// Writes entities to a sink in vex binary format, maintaining cross-entity
/// delta-coding state for the lifetime of the writer.
pub struct VexWriter<W: Write> {
    inner: W,
    last_node_id: i64,
    last_way_id: i64,
    last_relation_id: i64,
    last_x: i32,
    last_y: i32,
}

impl<W: Write> VexWriter<W> {
    pub fn new(inner: W) -> VexWriter<W> {
        VexWriter {
            inner,
            last_node_id: 0,
            last_way_id: 0,
            last_relation_id: 0,
            last_x: 0,
            last_y: 0,
        }
    }

    /// A length-prefixed byte string: varint length, then the raw bytes.
    /// Same size as a NUL-terminated string for anything up to 128 bytes.
    fn write_buf(&mut self, bytes: &[u8]) -> Result<()> {
        write_unsigned(&mut self.inner, bytes.len() as u64)?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_buf(s.as_bytes())
    }

    fn write_tags(&mut self, tags: &[KeyVal]) -> Result<()> {
        write_unsigned(&mut self.inner, tags.len() as u64)?;
        for kv in tags {
            self.write_string(&kv.key)?;
            self.write_string(&kv.val)?;
        }
        Ok(())
    }

    /// Write a node: `id_delta, x_delta, y_delta` as zig-zag varints, then
    /// its tags as literal strings.
    pub fn write_node(&mut self, node_id: i64, x: i32, y: i32, tags: &[KeyVal]) -> Result<()> {
        write_signed(&mut self.inner, node_id - self.last_node_id)?;
        write_signed(&mut self.inner, x - self.last_x)?;
        write_signed(&mut self.inner, y - self.last_y)?;
        self.write_tags(tags)?;
        self.last_node_id = node_id;
        self.last_x = x;
        self.last_y = y;
        Ok(())
    }

    /// Write a way: `id_delta`, then a ref count, then each ref delta-coded
    /// against `last_node_id` (continuing across ways, and across the node
    /// stage that ran before it, rather than resetting to zero per way).
    pub fn write_way(&mut self, way_id: i64, node_refs: &[i64], tags: &[KeyVal]) -> Result<()> {
        write_signed(&mut self.inner, way_id - self.last_way_id)?;
        write_unsigned(&mut self.inner, node_refs.len() as u64)?;
        for &node_ref in node_refs {
            write_signed(&mut self.inner, node_ref - self.last_node_id)?;
            self.last_node_id = node_ref;
        }
        self.write_tags(tags)?;
        self.last_way_id = way_id;
        Ok(())
    }

    /// Write a relation: `id_delta`, then a member count, then each member
    /// as `(role, member_type, id_delta)` with the id delta-coded against
    /// `last_relation_id` regardless of the member's own entity type (the
    /// relation stage runs last and has no node/way state worth reusing),
    /// then tags.
    pub fn write_relation(
        &mut self,
        relation_id: i64,
        members: &[(u8, MemberKind, i64)],
        tags: &[KeyVal],
    ) -> Result<()> {
        write_signed(&mut self.inner, relation_id - self.last_relation_id)?;
        write_unsigned(&mut self.inner, members.len() as u64)?;
        for &(role, member_type, id) in members {
            self.inner.write_all(&[role, member_type as u8])?;
            write_signed(&mut self.inner, id)?;
        }
        self.write_tags(tags)?;
        self.last_relation_id = relation_id;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, val: &str) -> KeyVal {
        KeyVal { key: key.to_string(), val: val.to_string() }
    }

    #[test]
    fn node_deltas_are_relative_to_previous_node() {
        let mut w = VexWriter::new(Vec::new());
        w.write_node(100, 1000, 2000, &[kv("name", "A")]).unwrap();
        w.write_node(105, 1010, 1990, &[]).unwrap();
        let bytes = w.into_inner();

        let mut cursor = &bytes[..];
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 100);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 1000);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 2000);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 1);
        // skip "name" / "A" strings
        let len = crate::varint::read_unsigned(&mut cursor).unwrap() as usize;
        cursor = &cursor[len..];
        let len = crate::varint::read_unsigned(&mut cursor).unwrap() as usize;
        cursor = &cursor[len..];
        // second node: deltas against the first
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 5);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 10);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), -10);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 0);
        assert!(cursor.is_empty());
    }

    #[test]
    fn way_ref_deltas_continue_across_ways_and_carry_node_state() {
        let mut w = VexWriter::new(Vec::new());
        w.write_node(10, 0, 0, &[]).unwrap();
        w.write_way(1, &[10, 20, 15], &[]).unwrap();
        w.write_way(2, &[16], &[]).unwrap();
        let bytes = w.into_inner();

        let mut cursor = &bytes[..];
        // node 10
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 10);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 0);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 0);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 0);
        // way 1: id_delta 1, 3 refs: 10-10=0, 20-10=10, 15-20=-5
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 1);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 3);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 0);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 10);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), -5);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 0);
        // way 2: id_delta 1, 1 ref: 16-15=1 (continues last_node_id across ways)
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 1);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 1);
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 1);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 0);
        assert!(cursor.is_empty());
    }

    #[test]
    fn relation_members_round_trip_bytes() {
        let mut w = VexWriter::new(Vec::new());
        w.write_relation(
            50,
            &[(1, MemberKind::Way, 7), (0, MemberKind::Node, -3)],
            &[kv("type", "multipolygon")],
        )
        .unwrap();
        let bytes = w.into_inner();

        let mut cursor = &bytes[..];
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 50);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 2);
        assert_eq!(cursor[0], 1);
        assert_eq!(cursor[1], MemberKind::Way as u8);
        cursor = &cursor[2..];
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), 7);
        assert_eq!(cursor[0], 0);
        assert_eq!(cursor[1], MemberKind::Node as u8);
        cursor = &cursor[2..];
        assert_eq!(crate::varint::read_signed(&mut cursor).unwrap(), -3);
        assert_eq!(crate::varint::read_unsigned(&mut cursor).unwrap(), 1);
    }
}
