//! Encode and write blobs and blocks.

use std::io::Write;

use byteorder::WriteBytesExt;
use flate2::{write::ZlibEncoder, Compression};
use protobuf::{Message, MessageField};

use crate::blob::{Blob, BlobType, MAX_BLOB_HEADER_SIZE, MAX_BLOB_MESSAGE_SIZE};
use crate::block::{HeaderBlock, PrimitiveBlock};
use crate::error::{new_blob_error, new_protobuf_error, BlobError, Result};
use crate::proto::{fileformat, osmformat};
use crate::strtab::StringTableBuilder;

/// The default PBF granularity: raw lat/lon units are this many nanodegrees.
const DEFAULT_GRANULARITY: f64 = 100.0;

/// A writer for PBF files that allows writing blobs.
#[derive(Clone, Debug)]
pub struct BlobWriter<W: Write + Send> {
    writer: W,
}

/// The content type of a blob.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobEncoding {
    /// Block is stored uncompressed in blob
    Raw,
    /// Block data is stored zlib-compressed with the specified compression level (0-9):
    ///
    /// * 0 - no compression (might actually increase size -> use `Raw` instead)
    /// * 1 - fast
    /// * 6 - A common default value
    /// * 9 - best compression, but slower
    Zlib { level: u32 },
}

impl<W: Write + Send> BlobWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub(crate) fn write_blob_raw(
        &mut self,
        header: fileformat::BlobHeader,
        blob: fileformat::Blob,
    ) -> Result<()> {
        assert_eq!(blob.compute_size() as i64, i64::from(header.datasize()),);
        let header_size: u64 = header.compute_size();

        if header_size >= MAX_BLOB_HEADER_SIZE {
            return Err(new_blob_error(BlobError::HeaderTooBig {
                size: header_size,
            }));
        }

        self.writer
            .write_u32::<byteorder::BigEndian>(header_size as u32)?;
        header
            .write_to_writer(&mut self.writer)
            .map_err(|e| new_protobuf_error(e, "writing blob header"))?;
        blob.write_to_writer(&mut self.writer)
            .map_err(|e| new_protobuf_error(e, "writing blob"))?;

        Ok(())
    }

    pub fn write_blob(&mut self, blob: Blob) -> Result<()> {
        self.write_blob_raw(blob.header, blob.blob)
    }

    /// Create Blob from raw (uncompressed) encoded block data
    fn encode_block_data(block_data: Vec<u8>, encoding: BlobEncoding) -> Result<fileformat::Blob> {
        if block_data.len() as u64 >= MAX_BLOB_MESSAGE_SIZE {
            return Err(new_blob_error(BlobError::MessageTooBig {
                size: block_data.len() as u64,
            }));
        }

        let mut blob = fileformat::Blob::new();
        blob.set_raw_size(block_data.len() as i32);

        match encoding {
            BlobEncoding::Raw => {
                blob.set_raw(block_data);
            }
            BlobEncoding::Zlib { level } => {
                assert!(level < 10);
                let mut encoder = ZlibEncoder::new(vec![], Compression::new(level));
                encoder.write_all(&block_data)?;
                blob.set_zlib_data(encoder.finish()?);
            }
        }

        Ok(blob)
    }

    fn write_block_message<M>(
        &mut self,
        block: M,
        blob_type: BlobType,
        encoding: BlobEncoding,
        error_string: &'static str,
    ) -> Result<()>
    where
        M: protobuf::Message,
    {
        let mut block_data = vec![];
        block
            .write_to_writer(&mut block_data)
            .map_err(|e| new_protobuf_error(e, error_string))?;
        let blob = Self::encode_block_data(block_data, encoding)?;

        let mut header = fileformat::BlobHeader::new();
        header.set_datasize(blob.compute_size() as i32);
        header.set_type(blob_type.as_str().to_string());

        self.write_blob_raw(header, blob)
    }

    /// Write a new blob that encodes the given [`HeaderBlock`].
    ///
    /// The first blob of a `*.osm.pbf` file is usually a header block.
    pub fn write_header_block(&mut self, block: HeaderBlock, encoding: BlobEncoding) -> Result<()> {
        self.write_block_message(
            block.header,
            BlobType::OsmHeader,
            encoding,
            "writing header block",
        )
    }

    /// Write a new blob that encodes the given [`PrimitiveBlock`].
    ///
    /// A primitive block may contain nodes, ways and relations.
    pub fn write_primitive_block(
        &mut self,
        block: PrimitiveBlock,
        encoding: BlobEncoding,
    ) -> Result<()> {
        self.write_block_message(
            block.block,
            BlobType::OsmData,
            encoding,
            "writing primitive block",
        )
    }
}

/// Build a [`HeaderBlock`] declaring the required feature set this crate
/// writes: dense nodes, current OSM schema.
pub fn standard_header_block(writingprogram: &str) -> HeaderBlock {
    let mut header = osmformat::HeaderBlock::new();
    header.required_features = vec!["OsmSchema-V0.6".to_string(), "DenseNodes".to_string()];
    header.set_writingprogram(writingprogram.to_string());
    HeaderBlock::new(header)
}

/// A builder for `PrimitiveBlock`s. One block holds exactly one
/// `PrimitiveGroup`, which in turn holds exactly one entity type, matching
/// how the writer emits nodes, ways, and relations in separate blocks.
pub struct BlockBuilder<W: Write + Send> {
    blob_writer: BlobWriter<W>,
    block: osmformat::PrimitiveBlock,
    strtab: StringTableBuilder,
}

impl<W: Write + Send> BlockBuilder<W> {
    pub fn new(blob_writer: BlobWriter<W>) -> Self {
        Self {
            blob_writer,
            block: osmformat::PrimitiveBlock::new(),
            strtab: StringTableBuilder::new(),
        }
    }

    /// Given a string (`Vec<u8>`) return its index from the string table.
    /// If the string is not yet included, it will be inserted.
    pub(crate) fn add_string_table_entry(&mut self, entry: Vec<u8>) -> usize {
        self.strtab.dedup(entry) as usize
    }

    pub fn node_group(&mut self) -> NodeGroupBuilder<W> {
        NodeGroupBuilder::new(self)
    }

    pub fn dense_node_group(&mut self) -> DenseNodeGroupBuilder<W> {
        DenseNodeGroupBuilder::new(self)
    }

    pub fn way_group(&mut self) -> WayGroupBuilder<W> {
        WayGroupBuilder::new(self)
    }

    pub fn relation_group(&mut self) -> RelationGroupBuilder<W> {
        RelationGroupBuilder::new(self)
    }

    pub fn finish(mut self, encoding: BlobEncoding) -> Result<BlobWriter<W>> {
        self.block.stringtable = MessageField::some(self.strtab.string_table());
        self.blob_writer
            .write_primitive_block(PrimitiveBlock::new(self.block), encoding)?;
        Ok(self.blob_writer)
    }
}

pub struct NodeGroupBuilder<'a, W: Write + Send> {
    pub(crate) block_builder: &'a mut BlockBuilder<W>,
    pub(crate) group: osmformat::PrimitiveGroup,
}

impl<'a, W: Write + Send> NodeGroupBuilder<'a, W> {
    pub(crate) fn new(block_builder: &'a mut BlockBuilder<W>) -> Self {
        Self {
            block_builder,
            group: osmformat::PrimitiveGroup::new(),
        }
    }

    pub fn node_builder<'b>(&'b mut self) -> NodeBuilder<'b, 'a, W> {
        NodeBuilder {
            node_group_builder: self,
            node: osmformat::Node::new(),
        }
    }

    pub fn finish(self) {
        self.block_builder.block.primitivegroup.push(self.group);
    }
}

pub struct NodeBuilder<'a, 'b, W: Write + Send> {
    node_group_builder: &'a mut NodeGroupBuilder<'b, W>,
    node: osmformat::Node,
}

impl<'a, 'b, W: Write + Send> NodeBuilder<'a, 'b, W> {
    pub fn id(mut self, id: i64) -> Self {
        self.node.set_id(id);
        self
    }

    /// Set the node's position in degrees. Converted to the block's raw
    /// granularity-scaled units: `raw = round(nanodegrees / granularity)`,
    /// with the default granularity of 100 nanodegrees per unit.
    pub fn latlon(mut self, lat: f64, lon: f64) -> Self {
        self.node.set_lat((lat * 1e9 / DEFAULT_GRANULARITY).round() as i64);
        self.node.set_lon((lon * 1e9 / DEFAULT_GRANULARITY).round() as i64);
        self
    }

    pub fn add_tag<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let block = &mut self.node_group_builder.block_builder;
        self.node
            .keys
            .push(block.add_string_table_entry(key.into()) as u32);
        self.node
            .vals
            .push(block.add_string_table_entry(val.into()) as u32);
        self
    }

    pub fn finish(self) {
        self.node_group_builder.group.nodes.push(self.node);
    }
}

/// A builder for a `DenseNodes` group: OSM readers, and the `standard_header_block`
/// this crate declares (`required_features = ["DenseNodes"]`), expect node
/// data in this delta-coded columnar form rather than as individual `Node`
/// messages. Unlike [`NodeBuilder`] this builder accumulates whole nodes and
/// defers delta-coding and the zero-delimited `keys_vals` stream to
/// [`DenseNodeGroupBuilder::finish`], since dense encoding is only correct
/// once every node in the group is known.
pub struct DenseNodeGroupBuilder<'a, W: Write + Send> {
    block_builder: &'a mut BlockBuilder<W>,
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    tags: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl<'a, W: Write + Send> DenseNodeGroupBuilder<'a, W> {
    fn new(block_builder: &'a mut BlockBuilder<W>) -> Self {
        Self {
            block_builder,
            ids: Vec::new(),
            lats: Vec::new(),
            lons: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Append a node. `lat`/`lon` are in degrees; tags are `(key, value)`
    /// byte-string pairs, written in order with no deduplication within a
    /// node (callers should already have filtered noise tags).
    pub fn add_node<K, V>(&mut self, id: i64, lat: f64, lon: f64, tags: Vec<(K, V)>) -> &mut Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        self.ids.push(id);
        self.lats.push((lat * 1e9 / DEFAULT_GRANULARITY).round() as i64);
        self.lons.push((lon * 1e9 / DEFAULT_GRANULARITY).round() as i64);
        self.tags
            .push(tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn finish(self) {
        let mut dense = osmformat::DenseNodes::new();
        let mut last_id = 0i64;
        let mut last_lat = 0i64;
        let mut last_lon = 0i64;
        for ((id, lat), lon) in self.ids.iter().zip(&self.lats).zip(&self.lons) {
            dense.id.push(id - last_id);
            dense.lat.push(lat - last_lat);
            dense.lon.push(lon - last_lon);
            last_id = *id;
            last_lat = *lat;
            last_lon = *lon;
        }

        let block_builder = self.block_builder;
        let mut keys_vals = Vec::new();
        for node_tags in &self.tags {
            for (key, val) in node_tags {
                let key_idx = block_builder.add_string_table_entry(key.clone()) as i32;
                let val_idx = block_builder.add_string_table_entry(val.clone()) as i32;
                keys_vals.push(key_idx);
                keys_vals.push(val_idx);
            }
            keys_vals.push(0);
        }
        dense.keys_vals = keys_vals;

        let mut group = osmformat::PrimitiveGroup::new();
        group.dense = MessageField::some(dense);
        block_builder.block.primitivegroup.push(group);
    }
}

pub struct WayGroupBuilder<'a, W: Write + Send> {
    pub(crate) block_builder: &'a mut BlockBuilder<W>,
    pub(crate) group: osmformat::PrimitiveGroup,
}

impl<'a, W: Write + Send> WayGroupBuilder<'a, W> {
    pub(crate) fn new(block_builder: &'a mut BlockBuilder<W>) -> Self {
        Self {
            block_builder,
            group: osmformat::PrimitiveGroup::new(),
        }
    }

    pub fn way_builder<'b>(&'b mut self) -> WayBuilder<'b, 'a, W> {
        WayBuilder {
            way_group_builder: self,
            way: osmformat::Way::new(),
            last_ref: 0,
        }
    }

    pub fn finish(self) {
        self.block_builder.block.primitivegroup.push(self.group);
    }
}

pub struct WayBuilder<'a, 'b, W: Write + Send> {
    way_group_builder: &'a mut WayGroupBuilder<'b, W>,
    way: osmformat::Way,
    last_ref: i64,
}

impl<'a, 'b, W: Write + Send> WayBuilder<'a, 'b, W> {
    pub fn id(mut self, id: i64) -> Self {
        self.way.set_id(id);
        self
    }

    /// Append a node reference. Refs are stored delta-coded: the first ref
    /// is absolute, each subsequent one a difference from the last.
    pub fn add_ref(mut self, node_id: i64) -> Self {
        self.way.refs.push(node_id - self.last_ref);
        self.last_ref = node_id;
        self
    }

    pub fn add_tag<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let block = &mut self.way_group_builder.block_builder;
        self.way
            .keys
            .push(block.add_string_table_entry(key.into()) as u32);
        self.way
            .vals
            .push(block.add_string_table_entry(val.into()) as u32);
        self
    }

    pub fn finish(self) {
        self.way_group_builder.group.ways.push(self.way);
    }
}

pub struct RelationGroupBuilder<'a, W: Write + Send> {
    pub(crate) block_builder: &'a mut BlockBuilder<W>,
    pub(crate) group: osmformat::PrimitiveGroup,
}

impl<'a, W: Write + Send> RelationGroupBuilder<'a, W> {
    pub(crate) fn new(block_builder: &'a mut BlockBuilder<W>) -> Self {
        Self {
            block_builder,
            group: osmformat::PrimitiveGroup::new(),
        }
    }

    pub fn relation_builder<'b>(&'b mut self) -> RelationBuilder<'b, 'a, W> {
        RelationBuilder {
            relation_group_builder: self,
            relation: osmformat::Relation::new(),
            last_memid: 0,
        }
    }

    pub fn finish(self) {
        self.block_builder.block.primitivegroup.push(self.group);
    }
}

pub struct RelationBuilder<'a, 'b, W: Write + Send> {
    relation_group_builder: &'a mut RelationGroupBuilder<'b, W>,
    relation: osmformat::Relation,
    last_memid: i64,
}

impl<'a, 'b, W: Write + Send> RelationBuilder<'a, 'b, W> {
    pub fn id(mut self, id: i64) -> Self {
        self.relation.set_id(id);
        self
    }

    /// Append a member. Member ids are stored delta-coded like way refs.
    pub fn add_member<S: Into<Vec<u8>>>(
        mut self,
        role: S,
        member_type: osmformat::relation::MemberType,
        member_id: i64,
    ) -> Self {
        let block = &mut self.relation_group_builder.block_builder;
        let role_sid = block.add_string_table_entry(role.into()) as i32;
        self.relation.roles_sid.push(role_sid);
        self.relation.memids.push(member_id - self.last_memid);
        self.last_memid = member_id;
        self.relation
            .types
            .push(protobuf::EnumOrUnknown::new(member_type));
        self
    }

    pub fn add_tag<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let block = &mut self.relation_group_builder.block_builder;
        self.relation
            .keys
            .push(block.add_string_table_entry(key.into()) as u32);
        self.relation
            .vals
            .push(block.add_string_table_entry(val.into()) as u32);
        self
    }

    pub fn finish(self) {
        self.relation_group_builder
            .group
            .relations
            .push(self.relation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::osmformat;

    #[test]
    fn test_blob_writer() {
        let buf = vec![];
        let mut w = BlobWriter::new(buf);

        {
            let block = standard_header_block("vexdb-test");
            w.write_header_block(block, BlobEncoding::Zlib { level: 6 })
                .unwrap();
        }

        {
            let mut block = osmformat::PrimitiveBlock::new();
            block.stringtable = MessageField::some(osmformat::StringTable::new());
            block.primitivegroup = Vec::new();
            let block = PrimitiveBlock::new(block);

            w.write_primitive_block(block, BlobEncoding::Zlib { level: 6 })
                .unwrap();
        }
    }

    #[test]
    fn test_block_builder() {
        let mut buf = vec![];
        let w = BlobWriter::new(&mut buf);
        let mut block_builder = BlockBuilder::new(w);
        assert_eq!(block_builder.add_string_table_entry("abc".into()), 1);
        assert_eq!(block_builder.add_string_table_entry("xyz".into()), 2);
        assert_eq!(block_builder.add_string_table_entry("abc".into()), 1);
        assert_eq!(block_builder.add_string_table_entry("123".into()), 3);
        block_builder.finish(BlobEncoding::Raw).unwrap();
    }

    #[test]
    fn test_node_builder() {
        let mut buf = vec![];
        let w = BlobWriter::new(&mut buf);
        let mut block_builder = BlockBuilder::new(w);
        {
            let mut group = block_builder.node_group();
            group
                .node_builder()
                .id(12)
                .latlon(52.4, 13.05)
                .add_tag("name", "Potsdam")
                .add_tag("place", "city")
                .finish();
            group
                .node_builder()
                .id(13)
                .latlon(52.51, 13.35)
                .add_tag("name", "Berlin")
                .add_tag("place", "city")
                .add_tag("capital", "yes")
                .finish();
            group.finish();
        }
        block_builder.finish(BlobEncoding::Raw).unwrap();
    }

    #[test]
    fn test_dense_node_group_builder() {
        let mut buf = vec![];
        let w = BlobWriter::new(&mut buf);
        let mut block_builder = BlockBuilder::new(w);
        {
            let mut group = block_builder.dense_node_group();
            group.add_node(12, 52.4, 13.05, vec![("name", "Potsdam")]);
            group.add_node(13, 52.51, 13.35, vec![]);
            group.finish();
        }
        block_builder.finish(BlobEncoding::Raw).unwrap();
    }

    #[test]
    fn test_way_builder_delta_codes_refs() {
        let mut buf = vec![];
        let w = BlobWriter::new(&mut buf);
        let mut block_builder = BlockBuilder::new(w);
        {
            let mut group = block_builder.way_group();
            group
                .way_builder()
                .id(1)
                .add_ref(100)
                .add_ref(105)
                .add_ref(103)
                .add_tag("highway", "residential")
                .finish();
            group.finish();
        }
        block_builder.finish(BlobEncoding::Raw).unwrap();
    }

    #[test]
    fn test_relation_builder() {
        let mut buf = vec![];
        let w = BlobWriter::new(&mut buf);
        let mut block_builder = BlockBuilder::new(w);
        {
            let mut group = block_builder.relation_group();
            group
                .relation_builder()
                .id(1)
                .add_member("outer", osmformat::relation::MemberType::WAY, 10)
                .add_member("inner", osmformat::relation::MemberType::WAY, 20)
                .add_tag("type", "multipolygon")
                .finish();
            group.finish();
        }
        block_builder.finish(BlobEncoding::Raw).unwrap();
    }
}
