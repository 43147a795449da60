//! The Extractor: bounding-box extraction from the Entity Store back out to
//! PBF or the custom "vex" binary format.
//!
//! Extraction walks the grid cell range a bbox covers, collects the way IDs
//! filed there, then the unique nodes those ways reference, then relations
//! in the same cell range, and streams all three out in PBF's required
//! `nodes -> ways -> relations` order.
//!
//! The Spatial Grid is in-memory only (see `grid.rs`), so opening a database
//! for extraction first rebuilds it by scanning every way and relation back
//! out of the store and re-inserting them — the same placement logic
//! `load.rs`'s load passes use, run once at open time instead of once per
//! insert.

use std::io::Write;
use std::path::Path;

use crate::coord::{BoundingBox, Coord};
use crate::error::Result;
use crate::grid::SpatialGrid;
use crate::id_tracker::IdTracker;
use crate::limits::{MAX_NODE_ID, PBF_BLOCK_SIZE};
use crate::proto::osmformat;
use crate::store::{MemberKind, Store, StoredMember};
use crate::tags::{decode_role_dictionary, KeyVal};
use crate::vex::VexWriter;
use crate::writer::{standard_header_block, BlobEncoding, BlobWriter, BlockBuilder};

/// Which output format an extract should produce, chosen by the output
/// path's extension: `.vex` selects the custom binary format, anything else
/// (including `-` for stdout) selects PBF.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Pbf,
    Vex,
}

/// Choose a format from an output path. `-` (stdout) and any extension other
/// than `.vex` select PBF.
pub fn format_for_path(path: &str) -> OutputFormat {
    if path != "-" && Path::new(path).extension().and_then(|e| e.to_str()) == Some("vex") {
        OutputFormat::Vex
    } else {
        OutputFormat::Pbf
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractStats {
    pub ways: u64,
    pub nodes: u64,
    pub relations: u64,
}

/// Resolve a way's or relation's placement coordinate the same way
/// `load.rs`'s `first_member_coord` does: the first node directly, or a
/// way's first ref, recursing one level; an unresolvable reference (or a
/// relation-typed member, which is never followed) leaves the entity
/// unindexed rather than erroring.
fn first_member_coord(store: &Store, members: &[StoredMember]) -> Option<Coord> {
    let first = members.first()?;
    match first.member_type {
        MemberKind::Node => store.get_node(first.id).ok().flatten().map(|(c, _)| c),
        MemberKind::Way => {
            let (refs, _tags) = store.get_way(first.id).ok().flatten()?;
            let first_ref = *refs.first()?;
            store.get_node(first_ref).ok().flatten().map(|(c, _)| c)
        }
        MemberKind::Relation => None,
    }
}

fn rebuild_grid(store: &Store) -> Result<SpatialGrid> {
    let mut grid = SpatialGrid::new();
    for way_id in store.way_ids() {
        let Some((refs, _tags)) = store.get_way(way_id)? else { continue };
        let Some(&first_ref) = refs.first() else { continue };
        if let Some((coord, _tags)) = store.get_node(first_ref)? {
            grid.insert_way(way_id, coord);
        }
    }
    for rel_id in store.relation_ids() {
        let Some((members, _tags, _next)) = store.get_relation(rel_id)? else { continue };
        if let Some(coord) = first_member_coord(store, &members) {
            grid.insert_relation(rel_id, coord);
        }
    }
    Ok(grid)
}

/// Owns a read-only store handle and its rebuilt spatial grid for the
/// duration of one or more extracts.
pub struct Extractor {
    store: Store,
    grid: SpatialGrid,
    node_tracker: IdTracker,
}

/// The set of ways and referenced nodes a bounding box selects, before
/// anything has been written out.
struct Selection {
    way_ids: Vec<i64>,
    relation_ids: Vec<i64>,
}

impl Extractor {
    pub fn open(dir: &Path) -> Result<Extractor> {
        let store = Store::begin_read(dir)?;
        let grid = rebuild_grid(&store)?;
        Ok(Extractor {
            store,
            grid,
            node_tracker: IdTracker::new(MAX_NODE_ID),
        })
    }

    /// Walk every cell the bbox covers, collecting way and relation IDs and
    /// marking every way's referenced node IDs in the (freshly reset) ID
    /// Tracker. A way or relation filed in more than one cell within range
    /// cannot occur, since each is inserted into exactly one cell at load
    /// time, so no deduplication is needed beyond what the grid already
    /// guarantees.
    fn select(&mut self, bbox: &BoundingBox) -> Result<Selection> {
        self.node_tracker.reset();
        let (min_cx, max_cx, min_cy, max_cy) = bbox.cell_range()?;

        let mut way_ids = Vec::new();
        let mut relation_ids = Vec::new();
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                way_ids.extend(self.grid.ways_in_cell(cx, cy));
                relation_ids.extend(self.grid.relations_in_cell(cx, cy));
            }
        }
        way_ids.sort_unstable();
        relation_ids.sort_unstable();

        for &way_id in &way_ids {
            if let Some((refs, _tags)) = self.store.get_way(way_id)? {
                for node_ref in refs {
                    self.node_tracker.set(node_ref)?;
                }
            }
        }
        Ok(Selection { way_ids, relation_ids })
    }

    /// Extract `bbox` from the store into `sink` as a PBF stream.
    pub fn extract_pbf<W: Write + Send>(
        &mut self,
        bbox: &BoundingBox,
        sink: W,
        writingprogram: &str,
    ) -> Result<ExtractStats> {
        let selection = self.select(bbox)?;

        let mut blob_writer = BlobWriter::new(sink);
        blob_writer.write_header_block(
            standard_header_block(writingprogram),
            BlobEncoding::Zlib { level: 6 },
        )?;

        let node_ids: Vec<i64> = self.node_tracker.iter().collect();
        let mut nodes_written = 0u64;
        for chunk in node_ids.chunks(PBF_BLOCK_SIZE) {
            let mut bb = BlockBuilder::new(blob_writer);
            {
                let mut group = bb.dense_node_group();
                for &id in chunk {
                    if let Some((coord, tags)) = self.store.get_node(id)? {
                        let kv: Vec<(String, String)> =
                            tags.into_iter().map(|kv| (kv.key, kv.val)).collect();
                        group.add_node(id, coord.lat(), coord.lon(), kv);
                        nodes_written += 1;
                    }
                }
                group.finish();
            }
            blob_writer = bb.finish(BlobEncoding::Zlib { level: 6 })?;
        }

        let mut ways_written = 0u64;
        for chunk in selection.way_ids.chunks(PBF_BLOCK_SIZE) {
            let mut bb = BlockBuilder::new(blob_writer);
            {
                let mut group = bb.way_group();
                for &id in chunk {
                    if let Some((refs, tags)) = self.store.get_way(id)? {
                        let mut builder = group.way_builder().id(id);
                        for node_ref in refs {
                            builder = builder.add_ref(node_ref);
                        }
                        for kv in tags {
                            builder = builder.add_tag(kv.key, kv.val);
                        }
                        builder.finish();
                        ways_written += 1;
                    }
                }
                group.finish();
            }
            blob_writer = bb.finish(BlobEncoding::Zlib { level: 6 })?;
        }

        let mut relations_written = 0u64;
        for chunk in selection.relation_ids.chunks(PBF_BLOCK_SIZE) {
            let mut bb = BlockBuilder::new(blob_writer);
            {
                let mut group = bb.relation_group();
                for &id in chunk {
                    if let Some((members, tags, _next)) = self.store.get_relation(id)? {
                        let mut builder = group.relation_builder().id(id);
                        for m in &members {
                            let role = decode_role_dictionary(m.role).unwrap_or("");
                            let member_type = match m.member_type {
                                MemberKind::Node => osmformat::relation::MemberType::NODE,
                                MemberKind::Way => osmformat::relation::MemberType::WAY,
                                MemberKind::Relation => osmformat::relation::MemberType::RELATION,
                            };
                            builder = builder.add_member(role, member_type, m.id);
                        }
                        for kv in tags {
                            builder = builder.add_tag(kv.key, kv.val);
                        }
                        builder.finish();
                        relations_written += 1;
                    }
                }
                group.finish();
            }
            blob_writer = bb.finish(BlobEncoding::Zlib { level: 6 })?;
        }
        let _ = blob_writer;

        Ok(ExtractStats { ways: ways_written, nodes: nodes_written, relations: relations_written })
    }

    /// Extract `bbox` from the store into `sink` in the "vex" format.
    pub fn extract_vex<W: Write>(&mut self, bbox: &BoundingBox, sink: W) -> Result<ExtractStats> {
        let selection = self.select(bbox)?;
        let mut w = VexWriter::new(sink);

        let mut nodes_written = 0u64;
        for id in self.node_tracker.iter() {
            if let Some((coord, tags)) = self.store.get_node(id)? {
                w.write_node(id, coord.x, coord.y, &tags)?;
                nodes_written += 1;
            }
        }

        let mut ways_written = 0u64;
        for &id in &selection.way_ids {
            if let Some((refs, tags)) = self.store.get_way(id)? {
                w.write_way(id, &refs, &tags)?;
                ways_written += 1;
            }
        }

        let mut relations_written = 0u64;
        for &id in &selection.relation_ids {
            if let Some((members, tags, _next)) = self.store.get_relation(id)? {
                let encoded: Vec<(u8, MemberKind, i64)> =
                    members.iter().map(|m| (m.role, m.member_type, m.id)).collect();
                w.write_relation(id, &encoded, &tags)?;
                relations_written += 1;
            }
        }

        Ok(ExtractStats { ways: ways_written, nodes: nodes_written, relations: relations_written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::Loader;
    use crate::reader::{Callbacks, PbfReader};
    use crate::writer::{standard_header_block as header, BlobEncoding as Enc, BlobWriter as BW, BlockBuilder as BB};

    fn tempdir(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("vexdb-extract-test-{}-{name}", std::process::id()));
        p
    }

    fn write_fixture(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let w = BW::new(std::io::BufWriter::new(file));
        let mut w = w;
        w.write_header_block(header("vexdb-test"), Enc::Zlib { level: 6 }).unwrap();

        let mut bb = BB::new(w);
        {
            let mut group = bb.node_group();
            for i in 1..=3 {
                group
                    .node_builder()
                    .id(i)
                    .latlon(52.0 + i as f64 * 0.001, 13.0)
                    .finish();
            }
            group.finish();
        }
        let w = bb.finish(Enc::Zlib { level: 6 }).unwrap();

        let mut bb = BB::new(w);
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
            group.finish();
        }
        let _w = bb.finish(Enc::Zlib { level: 6 }).unwrap();
    }

    fn loaded_db(name: &str) -> std::path::PathBuf {
        let input = tempdir(&format!("{name}-fixture.osm.pbf"));
        write_fixture(&input);
        let db_dir = tempdir(&format!("{name}-db"));
        Loader::new(&db_dir).unwrap().load(&input).unwrap();
        db_dir
    }

    #[test]
    fn format_dispatch_uses_vex_extension() {
        assert_eq!(format_for_path("out.vex"), OutputFormat::Vex);
        assert_eq!(format_for_path("out.osm.pbf"), OutputFormat::Pbf);
        assert_eq!(format_for_path("-"), OutputFormat::Pbf);
    }

    #[test]
    fn global_bbox_extract_round_trips_the_loaded_way_and_its_nodes() {
        let db_dir = loaded_db("global");
        let mut extractor = Extractor::open(&db_dir).unwrap();
        let bbox = BoundingBox { min_lon: -180.0, min_lat: -90.0, max_lon: 179.999, max_lat: 89.999 };

        let mut out = Vec::new();
        let stats = extractor.extract_pbf(&bbox, &mut out, "vexdb-test").unwrap();
        assert_eq!(stats.ways, 1);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.relations, 0);

        let mut node_count = 0;
        let mut way_count = 0;
        let tmp = tempdir("global-out.osm.pbf");
        std::fs::write(&tmp, &out).unwrap();
        let reader = PbfReader::open(&tmp).unwrap();
        let callbacks = Callbacks::new()
            .with_node(|_| node_count += 1)
            .with_way(|_| way_count += 1);
        reader.read(callbacks).unwrap();
        assert_eq!(node_count, 3);
        assert_eq!(way_count, 1);
    }

    #[test]
    fn disjoint_bbox_selects_nothing() {
        let db_dir = loaded_db("disjoint");
        let mut extractor = Extractor::open(&db_dir).unwrap();
        // the fixture's nodes sit near (13.0, 52.0); this bbox is nowhere close.
        let bbox = BoundingBox { min_lon: -10.0, min_lat: -10.0, max_lon: -5.0, max_lat: -5.0 };

        let mut out = Vec::new();
        let stats = extractor.extract_pbf(&bbox, &mut out, "vexdb-test").unwrap();
        assert_eq!(stats.ways, 0);
        assert_eq!(stats.nodes, 0);
    }

    #[test]
    fn vex_extract_contains_expected_counts() {
        let db_dir = loaded_db("vex");
        let mut extractor = Extractor::open(&db_dir).unwrap();
        let bbox = BoundingBox { min_lon: -180.0, min_lat: -90.0, max_lon: 179.999, max_lat: 89.999 };

        let mut out = Vec::new();
        let stats = extractor.extract_vex(&bbox, &mut out).unwrap();
        assert_eq!(stats.ways, 1);
        assert_eq!(stats.nodes, 3);
        assert!(!out.is_empty());
    }
}
