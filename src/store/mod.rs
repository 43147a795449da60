//! The Entity Store: persistent, append-only, per-type ordered maps from
//! OSM id to entity record.
//!
//! This is the mmap-sparse-file form of the store: one fixed-stride record
//! arena per entity type, plus variable-length arenas for way node-refs and
//! relation members, plus up to [`crate::limits::MAX_SUBFILES`] tag-payload
//! arenas partitioned by id range so that no single arena's 32-bit offsets
//! overflow. Entities are written in ascending id order per type and never
//! modified afterward.

mod arena;
mod lock;
mod records;

use std::path::{Path, PathBuf};

use crate::error::{new_error, ErrorKind, Result};
use crate::limits::MAX_SUBFILES;
use crate::tags::{decode_tag_list, encode_tag_list, KeyVal};

use arena::Arena;
pub use lock::{ReadLock, WriteLock};
pub use records::MemberKind;
use records::{
    node_subfile, relation_subfile, way_subfile, NodeRecord, RelMemberRecord, RelationRecord,
    WayRecord, NODE_RECORD_LEN, REL_MEMBER_RECORD_LEN, RELATION_RECORD_LEN, WAY_RECORD_LEN,
};

/// A relation member as stored in and returned from the store.
#[derive(Clone, Debug)]
pub struct StoredMember {
    pub role: u8,
    pub member_type: MemberKind,
    pub id: i64,
}

/// A database directory holding every arena that makes up the store.
pub struct Store {
    dir: PathBuf,
    nodes: Arena,
    ways: Arena,
    relations: Arena,
    node_refs: Arena,
    rel_members: Arena,
    tag_subfiles: Vec<Arena>,
    last_node_id: i64,
    last_way_id: i64,
    last_relation_id: i64,
    write_lock: Option<WriteLock>,
    // Held for the lifetime of a read-only `Store`; never inspected, its
    // `Drop` releasing the shared lock is the only thing that matters.
    _read_lock: Option<ReadLock>,
}

fn arena_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

impl Store {
    fn open_arenas(dir: &Path) -> Result<(Arena, Arena, Arena, Arena, Arena, Vec<Arena>)> {
        std::fs::create_dir_all(dir)?;
        let nodes = Arena::open(&arena_path(dir, "nodes"))?;
        let ways = Arena::open(&arena_path(dir, "ways"))?;
        let relations = Arena::open(&arena_path(dir, "relations"))?;
        let node_refs = Arena::open(&arena_path(dir, "node_refs"))?;
        let rel_members = Arena::open(&arena_path(dir, "rel_members"))?;
        let mut tag_subfiles = Vec::with_capacity(MAX_SUBFILES);
        for i in 0..MAX_SUBFILES {
            let mut arena = Arena::open(&arena_path(dir, &format!("tags.{i:03}")))?;
            if arena.is_empty() {
                // Offset 0 is reserved for the shared encoded-empty-tag-list
                // sentinel (a single `0x00` byte), so every untagged entity
                // can point `tag_offset` at it instead of writing its own.
                arena.append(&[0x00])?;
            }
            tag_subfiles.push(arena);
        }
        Ok((nodes, ways, relations, node_refs, rel_members, tag_subfiles))
    }

    /// Open or create the database at `dir` for writing, taking an
    /// exclusive lock.
    pub fn begin_write(dir: &Path) -> Result<Store> {
        let write_lock = WriteLock::acquire(dir)?;
        let (nodes, ways, relations, node_refs, rel_members, tag_subfiles) =
            Self::open_arenas(dir)?;
        Ok(Store {
            dir: dir.to_path_buf(),
            last_node_id: (nodes.len() / NODE_RECORD_LEN) as i64 - 1,
            last_way_id: (ways.len() / WAY_RECORD_LEN) as i64 - 1,
            last_relation_id: (relations.len() / RELATION_RECORD_LEN) as i64 - 1,
            nodes,
            ways,
            relations,
            node_refs,
            rel_members,
            tag_subfiles,
            write_lock: Some(write_lock),
            _read_lock: None,
        })
    }

    /// Open the database at `dir` read-only, taking a shared lock that
    /// blocks for the `Store`'s lifetime against any concurrent writer.
    pub fn begin_read(dir: &Path) -> Result<Store> {
        let read_lock = ReadLock::acquire(dir)?;
        let (nodes, ways, relations, node_refs, rel_members, tag_subfiles) =
            Self::open_arenas(dir)?;
        Ok(Store {
            dir: dir.to_path_buf(),
            last_node_id: -1,
            last_way_id: -1,
            last_relation_id: -1,
            nodes,
            ways,
            relations,
            node_refs,
            rel_members,
            tag_subfiles,
            write_lock: None,
            _read_lock: Some(read_lock),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_tags(&mut self, subfile: usize, tags: &[(String, String)]) -> Result<u32> {
        if tags.is_empty() {
            return Ok(0);
        }
        let encoded = encode_tag_list(tags)?;
        let arena = &mut self.tag_subfiles[subfile];
        let offset = arena.append(&encoded)?;
        u32::try_from(offset).map_err(|_| {
            new_error(ErrorKind::CapacityExceeded {
                what: "tag subfile offset exceeded 32 bits",
            })
        })
    }

    fn read_tags(&self, subfile: usize, offset: u32) -> Result<Vec<KeyVal>> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        // The subfile only stores the count-prefixed payload; the decoder
        // reads exactly as many bytes as the varint count implies, so it's
        // safe to hand it the rest of the arena from this offset onward.
        let arena = &self.tag_subfiles[subfile];
        let rest = arena.read(offset as u64, arena.len() - offset as u64);
        decode_tag_list(rest)
    }

    /// Append a node. Fails with `OutOfOrderKey` unless `id` is strictly
    /// greater than the last node id written.
    pub fn put_node(&mut self, id: i64, x: i32, y: i32, tags: &[(String, String)]) -> Result<()> {
        if id <= self.last_node_id {
            return Err(new_error(ErrorKind::OutOfOrderKey {
                entity: "node",
                id,
                last: self.last_node_id,
            }));
        }
        let tag_offset = self.write_tags(node_subfile(id), tags)?;
        let record = NodeRecord { id, x, y, tag_offset };
        self.nodes.append(&record.to_bytes())?;
        self.last_node_id = id;
        Ok(())
    }

    /// Append a way. `node_refs` are absolute node ids; the store delta-codes
    /// them before appending to the `node_refs` arena.
    pub fn put_way(&mut self, id: i64, node_refs: &[i64], tags: &[(String, String)]) -> Result<()> {
        if id <= self.last_way_id {
            return Err(new_error(ErrorKind::OutOfOrderKey {
                entity: "way",
                id,
                last: self.last_way_id,
            }));
        }
        let tag_offset = self.write_tags(way_subfile(id), tags)?;

        let mut buf = Vec::with_capacity(node_refs.len() * 5);
        let mut last = 0i64;
        for &node_ref in node_refs {
            crate::varint::write_signed(&mut buf, node_ref - last)
                .expect("writing to a Vec<u8> cannot fail");
            last = node_ref;
        }
        let node_ref_offset = self.node_refs.append(&buf)? as u32;

        let record = WayRecord {
            id,
            node_ref_offset,
            node_ref_count: node_refs.len() as u32,
            tag_offset,
        };
        self.ways.append(&record.to_bytes())?;
        self.last_way_id = id;
        Ok(())
    }

    /// Append a relation. `next` links this relation into its spatial-grid
    /// cell's chain (`0` meaning "no next"); the caller (the load
    /// orchestrator, consulting the [`crate::grid::SpatialGrid`]) supplies it.
    pub fn put_relation(
        &mut self,
        id: i64,
        members: &[StoredMember],
        tags: &[(String, String)],
        next: u32,
    ) -> Result<()> {
        if id <= self.last_relation_id {
            return Err(new_error(ErrorKind::OutOfOrderKey {
                entity: "relation",
                id,
                last: self.last_relation_id,
            }));
        }
        let tag_offset = self.write_tags(relation_subfile(id), tags)?;

        let mut buf = Vec::with_capacity(members.len() * REL_MEMBER_RECORD_LEN as usize);
        for m in members {
            let record = RelMemberRecord {
                role: m.role,
                member_type: m.member_type,
                id: m.id,
            };
            buf.extend_from_slice(&record.to_bytes());
        }
        let member_offset = self.rel_members.append(&buf)? as u32;

        let record = RelationRecord {
            id,
            member_offset,
            member_count: members.len() as u32,
            tag_offset,
            next,
        };
        self.relations.append(&record.to_bytes())?;
        self.last_relation_id = id;
        Ok(())
    }

    /// Flush every arena and release the write lock.
    pub fn commit(mut self) -> Result<()> {
        self.nodes.flush()?;
        self.ways.flush()?;
        self.relations.flush()?;
        self.node_refs.flush()?;
        self.rel_members.flush()?;
        for arena in &self.tag_subfiles {
            arena.flush()?;
        }
        self.write_lock.take();
        Ok(())
    }

    pub fn node_count(&self) -> u64 {
        self.nodes.len() / NODE_RECORD_LEN
    }

    pub fn way_count(&self) -> u64 {
        self.ways.len() / WAY_RECORD_LEN
    }

    pub fn relation_count(&self) -> u64 {
        self.relations.len() / RELATION_RECORD_LEN
    }

    /// Binary-search `arena` (a sequence of fixed-stride records, ascending
    /// by id per [`Store`]'s append-order invariant) for the record whose id
    /// matches. `record_id` extracts a record's id given its start offset.
    fn find_by_id(
        arena: &Arena,
        count: u64,
        record_len: u64,
        id: i64,
        record_id: impl Fn(&[u8]) -> i64,
    ) -> Option<u64> {
        let mut lo = 0u64;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let bytes = arena.read(mid * record_len, record_len);
            match record_id(bytes).cmp(&id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    pub fn get_node(&self, id: i64) -> Result<Option<(crate::coord::Coord, Vec<KeyVal>)>> {
        let Some(pos) = Self::find_by_id(&self.nodes, self.node_count(), NODE_RECORD_LEN, id, |b| {
            NodeRecord::from_bytes(b).id
        }) else {
            return Ok(None);
        };
        let bytes = self.nodes.read(pos * NODE_RECORD_LEN, NODE_RECORD_LEN);
        let record = NodeRecord::from_bytes(bytes);
        let tags = self.read_tags(node_subfile(id), record.tag_offset)?;
        Ok(Some((
            crate::coord::Coord { x: record.x, y: record.y },
            tags,
        )))
    }

    pub fn get_way(&self, id: i64) -> Result<Option<(Vec<i64>, Vec<KeyVal>)>> {
        let Some(pos) = Self::find_by_id(&self.ways, self.way_count(), WAY_RECORD_LEN, id, |b| {
            WayRecord::from_bytes(b).id
        }) else {
            return Ok(None);
        };
        let bytes = self.ways.read(pos * WAY_RECORD_LEN, WAY_RECORD_LEN);
        let record = WayRecord::from_bytes(bytes);
        let tags = self.read_tags(way_subfile(id), record.tag_offset)?;

        let mut refs = Vec::with_capacity(record.node_ref_count as usize);
        // node_refs are varint-delta-coded, so we don't know their exact
        // byte length up front; slice out the arena tail from the offset
        // and stop once `node_ref_count` values have been decoded.
        let tail_len = self.node_refs.len() - record.node_ref_offset as u64;
        let tail = self.node_refs.read(record.node_ref_offset as u64, tail_len);
        let mut cursor = tail;
        let mut last = 0i64;
        for _ in 0..record.node_ref_count {
            let delta = crate::varint::read_signed(&mut cursor)
                .map_err(|_| new_error(ErrorKind::MalformedPbf {
                    detail: "truncated node_refs arena".into(),
                    offset: None,
                }))?;
            last += delta;
            refs.push(last);
        }
        Ok(Some((refs, tags)))
    }

    pub fn get_relation(&self, id: i64) -> Result<Option<(Vec<StoredMember>, Vec<KeyVal>, u32)>> {
        let Some(pos) = Self::find_by_id(
            &self.relations,
            self.relation_count(),
            RELATION_RECORD_LEN,
            id,
            |b| RelationRecord::from_bytes(b).id,
        ) else {
            return Ok(None);
        };
        let bytes = self.relations.read(pos * RELATION_RECORD_LEN, RELATION_RECORD_LEN);
        let record = RelationRecord::from_bytes(bytes);
        let tags = self.read_tags(relation_subfile(id), record.tag_offset)?;

        let mut members = Vec::with_capacity(record.member_count as usize);
        for i in 0..record.member_count as u64 {
            let offset = record.member_offset as u64 + i * REL_MEMBER_RECORD_LEN;
            let bytes = self.rel_members.read(offset, REL_MEMBER_RECORD_LEN);
            let r = RelMemberRecord::from_bytes(bytes);
            members.push(StoredMember {
                role: r.role,
                member_type: r.member_type,
                id: r.id,
            });
        }
        Ok(Some((members, tags, record.next)))
    }

    /// Iterate node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.node_count())
            .map(move |pos| NodeRecord::from_bytes(self.nodes.read(pos * NODE_RECORD_LEN, NODE_RECORD_LEN)).id)
    }

    pub fn way_ids(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.way_count())
            .map(move |pos| WayRecord::from_bytes(self.ways.read(pos * WAY_RECORD_LEN, WAY_RECORD_LEN)).id)
    }

    pub fn relation_ids(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.relation_count()).map(move |pos| {
            RelationRecord::from_bytes(self.relations.read(pos * RELATION_RECORD_LEN, RELATION_RECORD_LEN)).id
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("vexdb-store-test-{}-{n}", std::process::id()));
        dir
    }

    #[test]
    fn put_and_get_node_roundtrip() {
        let dir = tempdir();
        let mut store = Store::begin_write(&dir).unwrap();
        store
            .put_node(1, 100, 200, &[("name".to_string(), "Test".to_string())])
            .unwrap();
        let (coord, tags) = store.get_node(1).unwrap().unwrap();
        assert_eq!(coord.x, 100);
        assert_eq!(coord.y, 200);
        assert_eq!(tags, vec![KeyVal { key: "name".into(), val: "Test".into() }]);
    }

    #[test]
    fn out_of_order_node_id_is_rejected() {
        let dir = tempdir();
        let mut store = Store::begin_write(&dir).unwrap();
        store.put_node(5, 0, 0, &[]).unwrap();
        assert!(store.put_node(5, 0, 0, &[]).is_err());
        assert!(store.put_node(3, 0, 0, &[]).is_err());
    }

    #[test]
    fn way_refs_roundtrip_through_delta_coding() {
        let dir = tempdir();
        let mut store = Store::begin_write(&dir).unwrap();
        let refs = vec![10i64, 20, 15, 1_000_000, -5];
        store.put_way(1, &refs, &[]).unwrap();
        let (got_refs, _tags) = store.get_way(1).unwrap().unwrap();
        assert_eq!(got_refs, refs);
    }

    #[test]
    fn relation_members_roundtrip() {
        let dir = tempdir();
        let mut store = Store::begin_write(&dir).unwrap();
        let members = vec![
            StoredMember { role: 1, member_type: MemberKind::Way, id: 10 },
            StoredMember { role: 0, member_type: MemberKind::Node, id: -3 },
        ];
        store.put_relation(1, &members, &[], 0).unwrap();
        let (got_members, _tags, next) = store.get_relation(1).unwrap().unwrap();
        assert_eq!(got_members.len(), 2);
        assert_eq!(got_members[0].id, 10);
        assert_eq!(got_members[1].id, -3);
        assert_eq!(next, 0);
    }

    #[test]
    fn untagged_entity_uses_shared_offset_zero() {
        let dir = tempdir();
        let mut store = Store::begin_write(&dir).unwrap();
        store.put_node(1, 0, 0, &[]).unwrap();
        store.put_node(2, 0, 0, &[]).unwrap();
        let (_coord, tags) = store.get_node(1).unwrap().unwrap();
        assert!(tags.is_empty());
    }
}
