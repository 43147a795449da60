//! The Loader: ingests a `*.osm.pbf` file into the Entity Store, Spatial
//! Grid, and ID Tracker.
//!
//! An unconditional single-pass load could rely on the PBF ordering
//! guarantee (`all nodes → all ways → all relations`) to have each way's
//! first node's coordinates already resident when it's time to place the
//! way in the grid. This loader instead filters ways through
//! [`accepts_way`], which means nodes can no longer be stored unconditionally
//! during the node phase: whether a node is worth keeping depends on ways
//! that haven't been read yet. So the load runs in three passes:
//!
//! - Pass 1 walks nodes and ways together in one file read. Node
//!   coordinates are cached in a scratch map (discarded at the end of the
//!   pass) purely so an accepted way can look up its first ref's coordinate
//!   for grid placement; they are not written to the store yet. Accepted
//!   ways are stored and have every node ref marked in the [`IdTracker`].
//! - Pass 2 re-reads the file for nodes only, storing exactly the ones pass
//!   1 marked.
//! - Pass 3 re-reads the file for relations, which can now resolve member
//!   coordinates against the now-complete node and way tables.

use std::collections::HashMap;
use std::path::Path;

use crate::coord::Coord;
use crate::dense::DenseNode;
use crate::elements::{Node, RelMemberType, Relation, Way};
use crate::error::Result;
use crate::grid::SpatialGrid;
use crate::id_tracker::IdTracker;
use crate::limits::{MAX_NODE_ID, MAX_REL_ID, MAX_WAY_ID};
use crate::reader::{Callbacks, NodeRef, PbfReader};
use crate::store::{MemberKind, Store, StoredMember};
use crate::tags::encode_role;

/// Whether a way is worth keeping. This crate's ancestor loaded every way
/// unconditionally; this predicate scopes a load down to the ways a
/// street/transit routing graph actually needs: road and path geometry
/// (anything tagged `highway=*`) plus transit platforms, which routing
/// graphs treat as graph nodes in their own right.
pub fn accepts_way(tags: &[(String, String)]) -> bool {
    tags.iter().any(|(k, v)| {
        k == "highway" || (v == "platform" && (k == "railway" || k == "public_transport"))
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoadStats {
    pub ways_stored: u64,
    pub ways_rejected: u64,
    pub nodes_stored: u64,
    pub relations_stored: u64,
}

/// Owns the store, grid, and ID tracker for the duration of one load.
pub struct Loader {
    store: Store,
    grid: SpatialGrid,
    node_tracker: IdTracker,
}

fn node_ref_fields(node: &NodeRef<'_>) -> Result<(i64, Coord, Vec<(String, String)>)> {
    match node {
        NodeRef::Sparse(n) => sparse_node_fields(n),
        NodeRef::Dense(n) => dense_node_fields(n),
    }
}

fn sparse_node_fields(node: &Node<'_>) -> Result<(i64, Coord, Vec<(String, String)>)> {
    let coord = Coord::from_nanodegrees(node.nano_lon(), node.nano_lat())?;
    let tags = node.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Ok((node.id(), coord, tags))
}

fn dense_node_fields(node: &DenseNode<'_>) -> Result<(i64, Coord, Vec<(String, String)>)> {
    let coord = Coord::from_nanodegrees(node.nano_lon(), node.nano_lat())?;
    let tags = node.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Ok((node.id(), coord, tags))
}

fn way_fields(way: &Way<'_>) -> (i64, Vec<i64>, Vec<(String, String)>) {
    let refs = way.refs().collect();
    let tags = way.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    (way.id(), refs, tags)
}

fn relation_fields(rel: &Relation<'_>) -> (i64, Vec<StoredMember>, Vec<(String, String)>) {
    let members = rel
        .members()
        .map(|m| StoredMember {
            role: encode_role(m.role().unwrap_or("")),
            member_type: match m.member_type {
                RelMemberType::Node => MemberKind::Node,
                RelMemberType::Way => MemberKind::Way,
                RelMemberType::Relation => MemberKind::Relation,
            },
            id: m.member_id,
        })
        .collect();
    let tags = rel.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    (rel.id(), members, tags)
}

impl Loader {
    pub fn new(dir: &Path) -> Result<Loader> {
        Ok(Loader {
            store: Store::begin_write(dir)?,
            grid: SpatialGrid::new(),
            node_tracker: IdTracker::new(MAX_NODE_ID),
        })
    }

    /// Run every pass over `path`, then flush the store and release its
    /// write lock.
    pub fn load(mut self, path: &Path) -> Result<LoadStats> {
        tracing::info!(path = %path.display(), "load: pass 1 (ways, marking referenced nodes)");
        let (ways_stored, ways_rejected) = self.pass1_ways(path)?;
        tracing::info!(ways_stored, ways_rejected, "load: pass 2 (referenced nodes)");
        let nodes_stored = self.pass2_nodes(path)?;
        tracing::info!(nodes_stored, "load: pass 3 (relations)");
        let relations_stored = self.pass3_relations(path)?;
        tracing::info!(ways_stored, nodes_stored, relations_stored, "load complete");
        self.store.commit()?;
        Ok(LoadStats { ways_stored, ways_rejected, nodes_stored, relations_stored })
    }

    fn pass1_ways(&mut self, path: &Path) -> Result<(u64, u64)> {
        let reader = PbfReader::open(path)?;
        let mut coord_cache: HashMap<i64, Coord> = HashMap::new();
        let mut stored = 0u64;
        let mut rejected = 0u64;
        let mut first_err: Option<crate::error::Error> = None;

        {
            let callbacks = Callbacks::new()
                .with_node(|node| {
                    if first_err.is_some() {
                        return;
                    }
                    match node_ref_fields(&node) {
                        Ok((id, coord, _tags)) => {
                            coord_cache.insert(id, coord);
                        }
                        Err(e) => first_err = Some(e),
                    }
                })
                .with_way(|way| {
                    if first_err.is_some() {
                        return;
                    }
                    let (id, refs, tags) = way_fields(&way);
                    if id >= MAX_WAY_ID {
                        first_err = Some(crate::error::new_error(
                            crate::error::ErrorKind::CapacityExceeded { what: "way id exceeds MAX_WAY_ID" },
                        ));
                        return;
                    }
                    if !accepts_way(&tags) {
                        rejected += 1;
                        return;
                    }
                    for &node_ref in &refs {
                        if let Err(e) = self.node_tracker.set(node_ref) {
                            first_err = Some(e);
                            return;
                        }
                    }
                    if let Some(&first_coord) = refs.first().and_then(|id| coord_cache.get(id)) {
                        self.grid.insert_way(id, first_coord);
                    }
                    if let Err(e) = self.store.put_way(id, &refs, &tags) {
                        first_err = Some(e);
                        return;
                    }
                    stored += 1;
                });
            reader.read(callbacks)?;
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok((stored, rejected))
    }

    fn pass2_nodes(&mut self, path: &Path) -> Result<u64> {
        let reader = PbfReader::open(path)?;
        let mut stored = 0u64;
        let mut first_err: Option<crate::error::Error> = None;

        {
            let callbacks = Callbacks::new().with_node(|node| {
                if first_err.is_some() {
                    return;
                }
                let (id, coord, tags) = match node_ref_fields(&node) {
                    Ok(v) => v,
                    Err(e) => {
                        first_err = Some(e);
                        return;
                    }
                };
                if id >= MAX_NODE_ID || !self.node_tracker.contains(id) {
                    return;
                }
                if let Err(e) = self.store.put_node(id, coord.x, coord.y, &tags) {
                    first_err = Some(e);
                    return;
                }
                stored += 1;
            });
            reader.read(callbacks)?;
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(stored)
    }

    fn pass3_relations(&mut self, path: &Path) -> Result<u64> {
        let reader = PbfReader::open(path)?;
        let mut stored = 0u64;
        let mut first_err: Option<crate::error::Error> = None;

        {
            let callbacks = Callbacks::new().with_relation(|rel| {
                if first_err.is_some() {
                    return;
                }
                let (id, members, tags) = relation_fields(&rel);
                if id >= MAX_REL_ID {
                    first_err = Some(crate::error::new_error(
                        crate::error::ErrorKind::CapacityExceeded { what: "relation id exceeds MAX_REL_ID" },
                    ));
                    return;
                }
                let coord = self.first_member_coord(&members);
                // `next` would normally chain this relation into its grid
                // cell's list for on-disk replay, but the spatial grid here
                // is rebuilt in memory on every load rather than persisted,
                // so the store's `next` field is left unused (0) and the
                // in-memory grid keeps its own chain (see SpatialGrid).
                if let Err(e) = self.store.put_relation(id, &members, &tags, 0) {
                    first_err = Some(e);
                    return;
                }
                if let Some(coord) = coord {
                    self.grid.insert_relation(id, coord);
                }
                stored += 1;
            });
            reader.read(callbacks)?;
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(stored)
    }

    /// Best-effort spatial placement: resolve the first member's coordinate
    /// through the store. A member that is itself an unresolvable relation
    /// (or a node/way the store never saw) leaves the relation unindexed
    /// rather than failing the load.
    fn first_member_coord(&self, members: &[StoredMember]) -> Option<Coord> {
        let first = members.first()?;
        match first.member_type {
            MemberKind::Node => self.store.get_node(first.id).ok().flatten().map(|(c, _)| c),
            MemberKind::Way => {
                let (refs, _tags) = self.store.get_way(first.id).ok().flatten()?;
                let first_ref = *refs.first()?;
                self.store.get_node(first_ref).ok().flatten().map(|(c, _)| c)
            }
            MemberKind::Relation => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{standard_header_block, BlobEncoding, BlobWriter, BlockBuilder};

    fn tempdir(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("vexdb-load-test-{}-{name}", std::process::id()));
        p
    }

    fn write_fixture(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut w = BlobWriter::new(std::io::BufWriter::new(file));
        w.write_header_block(standard_header_block("vexdb-test"), BlobEncoding::Zlib { level: 6 })
            .unwrap();

        let mut bb = BlockBuilder::new(w);
        {
            let mut group = bb.node_group();
            for i in 1..=3 {
                group
                    .node_builder()
                    .id(i)
                    .latlon(52.0 + i as f64 * 0.001, 13.0)
                    .finish();
            }
            // an isolated node, not referenced by any accepted way
            group.node_builder().id(4).latlon(10.0, 10.0).finish();
            group.finish();
        }
        let w = bb.finish(BlobEncoding::Zlib { level: 6 }).unwrap();

        let mut bb = BlockBuilder::new(w);
        {
            let mut group = bb.way_group();
            group
                .way_builder()
                .id(100)
                .add_ref(1)
                .add_ref(2)
                .add_ref(3)
                .add_tag("highway", "residential")
                .finish();
            group
                .way_builder()
                .id(101)
                .add_ref(1)
                .add_ref(2)
                .add_tag("building", "yes")
                .finish();
            group.finish();
        }
        let _w = bb.finish(BlobEncoding::Zlib { level: 6 }).unwrap();
    }

    #[test]
    fn accepts_highway_rejects_building() {
        assert!(accepts_way(&[("highway".into(), "residential".into())]));
        assert!(accepts_way(&[("railway".into(), "platform".into())]));
        assert!(!accepts_way(&[("building".into(), "yes".into())]));
    }

    #[test]
    fn loads_only_referenced_nodes_and_accepted_ways() {
        let input = tempdir("fixture.osm.pbf");
        write_fixture(&input);
        let db_dir = tempdir("db");

        let loader = Loader::new(&db_dir).unwrap();
        let stats = loader.load(&input).unwrap();

        assert_eq!(stats.ways_stored, 1);
        assert_eq!(stats.ways_rejected, 1);
        assert_eq!(stats.nodes_stored, 3);

        let store = Store::begin_read(&db_dir).unwrap();
        assert_eq!(store.way_count(), 1);
        assert_eq!(store.node_count(), 3);
        assert!(store.get_node(3).unwrap().is_some());
    }
}
