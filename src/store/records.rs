//! Fixed-width on-disk record layouts and tag-subfile partitioning.
//!
//! Records are appended in ascending id order but real OSM ids are sparse
//! (huge gaps between consecutive ids), so each record carries its own `id`
//! rather than relying on its position in the arena to stand for the id.
//! Lookup by id is a binary search over the (already sorted) arena — see
//! `Store::get_node` and friends.

use crate::limits::MAX_SUBFILES;

/// Node record: `{id: i64, x: i32, y: i32, tag_offset: u32}`, 20 bytes.
pub const NODE_RECORD_LEN: u64 = 20;
/// Way record: `{id: i64, node_ref_offset: u32, node_ref_count: u32, tag_offset: u32}`, 20 bytes.
pub const WAY_RECORD_LEN: u64 = 20;
/// Relation record: `{id: i64, member_offset: u32, member_count: u32, tag_offset: u32, next: u32}`, 24 bytes.
pub const RELATION_RECORD_LEN: u64 = 24;
/// Relation-member record: `{role: u8, member_type: u8, pad: [u8; 2], id: i64}`, 12 bytes
/// (padded so `id` stays 8-byte aligned within the member arena).
pub const REL_MEMBER_RECORD_LEN: u64 = 12;

pub struct NodeRecord {
    pub id: i64,
    pub x: i32,
    pub y: i32,
    pub tag_offset: u32,
}

impl NodeRecord {
    pub fn to_bytes(&self) -> [u8; NODE_RECORD_LEN as usize] {
        let mut buf = [0u8; NODE_RECORD_LEN as usize];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.x.to_le_bytes());
        buf[12..16].copy_from_slice(&self.y.to_le_bytes());
        buf[16..20].copy_from_slice(&self.tag_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> NodeRecord {
        NodeRecord {
            id: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            x: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            y: i32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            tag_offset: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        }
    }
}

pub struct WayRecord {
    pub id: i64,
    pub node_ref_offset: u32,
    pub node_ref_count: u32,
    pub tag_offset: u32,
}

impl WayRecord {
    pub fn to_bytes(&self) -> [u8; WAY_RECORD_LEN as usize] {
        let mut buf = [0u8; WAY_RECORD_LEN as usize];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.node_ref_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.node_ref_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.tag_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> WayRecord {
        WayRecord {
            id: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            node_ref_offset: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            node_ref_count: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            tag_offset: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        }
    }
}

pub struct RelationRecord {
    pub id: i64,
    pub member_offset: u32,
    pub member_count: u32,
    pub tag_offset: u32,
    /// Next relation id in this relation's spatial-grid cell chain, 0 if none.
    pub next: u32,
}

impl RelationRecord {
    pub fn to_bytes(&self) -> [u8; RELATION_RECORD_LEN as usize] {
        let mut buf = [0u8; RELATION_RECORD_LEN as usize];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.member_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.member_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.tag_offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.next.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> RelationRecord {
        RelationRecord {
            id: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            member_offset: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            member_count: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            tag_offset: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            next: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberKind {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl MemberKind {
    fn from_u8(b: u8) -> MemberKind {
        match b {
            0 => MemberKind::Node,
            1 => MemberKind::Way,
            _ => MemberKind::Relation,
        }
    }
}

pub struct RelMemberRecord {
    pub role: u8,
    pub member_type: MemberKind,
    pub id: i64,
}

impl RelMemberRecord {
    pub fn to_bytes(&self) -> [u8; REL_MEMBER_RECORD_LEN as usize] {
        let mut buf = [0u8; REL_MEMBER_RECORD_LEN as usize];
        buf[0] = self.role;
        buf[1] = self.member_type as u8;
        buf[4..12].copy_from_slice(&self.id.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> RelMemberRecord {
        RelMemberRecord {
            role: bytes[0],
            member_type: MemberKind::from_u8(bytes[1]),
            id: i64::from_le_bytes(bytes[4..12].try_into().unwrap()),
        }
    }
}

/// Which of the `MAX_SUBFILES` tag-payload subfiles an entity's tag bytes
/// live in. Chosen so tag-byte density is roughly equal across partitions:
/// node ids are divided by 16 first (nodes vastly outnumber ways/relations
/// and carry fewer tags each), way ids are used directly, relation ids are
/// multiplied by 64 (relations are comparatively rare but tag-heavy), then
/// every partition key is shifted right by 26 bits and reduced mod the
/// subfile count.
pub fn node_subfile(node_id: i64) -> usize {
    (((node_id / 16) >> 26) as usize) % MAX_SUBFILES
}

pub fn way_subfile(way_id: i64) -> usize {
    ((way_id >> 26) as usize) % MAX_SUBFILES
}

pub fn relation_subfile(relation_id: i64) -> usize {
    (((relation_id * 64) >> 26) as usize) % MAX_SUBFILES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_record_roundtrip() {
        let r = NodeRecord { id: 99, x: -123, y: 456, tag_offset: 789 };
        let bytes = r.to_bytes();
        let back = NodeRecord::from_bytes(&bytes);
        assert_eq!(back.id, 99);
        assert_eq!(back.x, -123);
        assert_eq!(back.y, 456);
        assert_eq!(back.tag_offset, 789);
    }

    #[test]
    fn rel_member_record_roundtrip() {
        let r = RelMemberRecord { role: 1, member_type: MemberKind::Way, id: -42 };
        let bytes = r.to_bytes();
        let back = RelMemberRecord::from_bytes(&bytes);
        assert_eq!(back.role, 1);
        assert_eq!(back.member_type, MemberKind::Way);
        assert_eq!(back.id, -42);
    }

    #[test]
    fn subfile_indices_stay_in_range() {
        for id in [0i64, 1, 1 << 20, 1 << 33, (1i64 << 34) - 1] {
            assert!(node_subfile(id) < MAX_SUBFILES);
        }
        for id in [0i64, 1, 1 << 31] {
            assert!(way_subfile(id) < MAX_SUBFILES);
        }
        for id in [0i64, 1, 1 << 24] {
            assert!(relation_subfile(id) < MAX_SUBFILES);
        }
    }
}
