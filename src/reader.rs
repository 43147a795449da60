//! The phase-aware, rewindable PBF reader.
//!
//! A naive reader could map the whole file, walk blobs sequentially, and
//! enforce ordering per primitive group: track a monotonic `phase` (node <
//! way < relation) and bail out entirely once no remaining callback can
//! fire. That early-exit is cheap but all-or-nothing — a caller that only
//! wants ways still pays for decoding every node blob that precedes them.
//!
//! This reader keeps the monotonic-phase invariant and the early-termination
//! behavior, but replaces "give up" with "skip cheaply, then come back":
//! while the current phase has no applicable callback but a later one might,
//! it fast-forwards, decoding (and zlib-inflating) only every
//! [`crate::limits::FAST_FORWARD_PROBE_INTERVAL`]th blob to probe whether the
//! phase has moved on, and skipping the rest by their framed length alone.
//! Once a probe (or normal decode) detects a phase with a callback, it
//! rewinds to the blob where fast-forward began and resumes decoding every
//! blob. The reader never re-enters fast-forward after that: phases only
//! advance, so once the desired phase is reached there is at most one
//! remaining phase transition (to a phase with no callback), which is a
//! termination, not a reason to skip ahead again.

use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use bumpalo::Bump;
use memmap2::Mmap;
use protobuf::Message;

use crate::block::{HeaderBlock, PrimitiveBlock};
use crate::blob::{decode_blob_in, BlobType, MAX_BLOB_HEADER_SIZE, MAX_BLOB_MESSAGE_SIZE};
use crate::dense::DenseNode;
use crate::elements::{Node, Relation, Way};
use crate::error::{malformed_at, new_blob_error, new_protobuf_error, BlobError, Result};
use crate::limits::FAST_FORWARD_PROBE_INTERVAL;
use crate::proto::fileformat;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
enum Phase {
    Nodes = 0,
    Ways = 1,
    Relations = 2,
}

impl Phase {
    fn has_callback(self, callbacks: &Callbacks) -> bool {
        match self {
            Phase::Nodes => callbacks.node.is_some(),
            Phase::Ways => callbacks.way.is_some(),
            Phase::Relations => callbacks.relation.is_some(),
        }
    }

    /// Whether `self` or any later phase has an applicable callback.
    fn or_later_has_callback(self, callbacks: &Callbacks) -> bool {
        match self {
            Phase::Nodes => {
                callbacks.node.is_some() || callbacks.way.is_some() || callbacks.relation.is_some()
            }
            Phase::Ways => callbacks.way.is_some() || callbacks.relation.is_some(),
            Phase::Relations => callbacks.relation.is_some(),
        }
    }
}

/// A node observed during the node phase: dense and sparse representations
/// both reach the same callback, since callers rarely care which wire form
/// produced a given node.
pub enum NodeRef<'a> {
    Sparse(Node<'a>),
    Dense(DenseNode<'a>),
}

/// The set of callbacks a [`PbfReader`] invokes while walking a file. Each
/// is optional; the reader fast-forwards through phases with none set.
#[derive(Default)]
pub struct Callbacks<'f> {
    pub node: Option<Box<dyn FnMut(NodeRef<'_>) + 'f>>,
    pub way: Option<Box<dyn FnMut(Way<'_>) + 'f>>,
    pub relation: Option<Box<dyn FnMut(Relation<'_>) + 'f>>,
}

impl<'f> Callbacks<'f> {
    pub fn new() -> Callbacks<'f> {
        Callbacks::default()
    }

    pub fn with_node(mut self, f: impl FnMut(NodeRef<'_>) + 'f) -> Self {
        self.node = Some(Box::new(f));
        self
    }

    pub fn with_way(mut self, f: impl FnMut(Way<'_>) + 'f) -> Self {
        self.way = Some(Box::new(f));
        self
    }

    pub fn with_relation(mut self, f: impl FnMut(Relation<'_>) + 'f) -> Self {
        self.relation = Some(Box::new(f));
        self
    }
}

enum Mode {
    Normal,
    FastForward { mark_offset: u64, mark_blob_index: u64 },
}

/// A phase-ordered, rewindable reader over a `*.osm.pbf` file.
///
/// The file is memory-mapped read-only; blob framing is parsed directly out
/// of the mapping so that skipping a blob during fast-forward costs nothing
/// beyond reading its header.
pub struct PbfReader {
    mmap: Mmap,
}

impl PbfReader {
    pub fn open(path: impl AsRef<Path>) -> Result<PbfReader> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(PbfReader { mmap })
    }

    fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Read the file's `OSMHeader` blob without touching any `OSMData`.
    pub fn header(&self) -> Result<HeaderBlock> {
        let data = self.data();
        let frame = Frame::read_at(data, 0)?;
        if frame.blob_type() != BlobType::OsmHeader {
            return Err(malformed_at("first blob is not OSMHeader", 0));
        }
        let bump = Bump::new();
        frame.decode_header(data, &bump)
    }

    /// Walk the file, invoking `callbacks` for every node/way/relation in
    /// file order, honoring the phase-ordered fast-forward/rewind contract
    /// described in the module docs. Fails with `MalformedPbf` if a blob's
    /// phase regresses (e.g. a way blob after a relation blob).
    pub fn read(&self, mut callbacks: Callbacks<'_>) -> Result<()> {
        let data = self.data();
        let len = data.len() as u64;

        // First blob must be the header; skip over it before the phase walk.
        let header_frame = Frame::read_at(data, 0)?;
        if header_frame.blob_type() != BlobType::OsmHeader {
            return Err(malformed_at("first blob is not OSMHeader", 0));
        }
        let mut offset = header_frame.end_offset();
        let mut blob_index: u64 = 1;

        let mut phase = Phase::Nodes;
        let mut mode = Mode::Normal;
        let mut bump = Bump::new();

        // The walk below only enters fast-forward on a phase *increase*, so
        // an unwanted initial phase (no node callback, but a later one is
        // registered) needs the same treatment up front or every node blob
        // would be decoded in `Mode::Normal` for nothing.
        if !phase.or_later_has_callback(&callbacks) {
            tracing::info!("no callback applies to any phase, stopping");
            return Ok(());
        }
        if !phase.has_callback(&callbacks) {
            tracing::info!(blob_index, ?offset, "entering fast-forward");
            mode = Mode::FastForward {
                mark_offset: offset,
                mark_blob_index: blob_index,
            };
        }

        while offset < len {
            match &mode {
                Mode::Normal => {
                    let frame = Frame::read_at(data, offset)?;
                    match frame.blob_type() {
                        BlobType::OsmHeader => {
                            return Err(malformed_at(
                                "unexpected second OSMHeader blob",
                                offset,
                            ));
                        }
                        BlobType::Unknown(_) => {
                            offset = frame.end_offset();
                            blob_index += 1;
                            continue;
                        }
                        BlobType::OsmData => {}
                    }

                    bump.reset();
                    let block = frame.decode_data(data, &bump)?;
                    if let Some(block_phase) = detect_phase(&block) {
                        if block_phase < phase {
                            return Err(malformed_at(
                                "PBF blocks did not follow the order nodes, ways, relations",
                                offset,
                            ));
                        }
                        if block_phase > phase {
                            phase = block_phase;
                            if !phase.or_later_has_callback(&callbacks) {
                                tracing::info!(blob_index, ?offset, "no remaining callback applies, stopping");
                                return Ok(());
                            }
                            if !phase.has_callback(&callbacks) {
                                tracing::info!(blob_index, ?offset, "entering fast-forward");
                                mode = Mode::FastForward {
                                    mark_offset: offset,
                                    mark_blob_index: blob_index,
                                };
                                offset = frame.end_offset();
                                blob_index += 1;
                                continue;
                            }
                        }
                    }

                    dispatch_block(&block, phase, &mut callbacks);
                    offset = frame.end_offset();
                    blob_index += 1;
                }

                Mode::FastForward { mark_offset, mark_blob_index } => {
                    let is_probe = blob_index % FAST_FORWARD_PROBE_INTERVAL == 0;
                    let frame = Frame::read_at(data, offset)?;

                    if !is_probe || frame.blob_type() != BlobType::OsmData {
                        offset = frame.end_offset();
                        blob_index += 1;
                        continue;
                    }

                    bump.reset();
                    let block = frame.decode_data(data, &bump)?;
                    let detected = detect_phase(&block);
                    let new_phase = detected.map(|p| p.max(phase)).unwrap_or(phase);

                    if new_phase.has_callback(&callbacks) {
                        tracing::info!(
                            blob_index,
                            rewind_to = mark_blob_index,
                            "fast-forward probe found applicable phase, rewinding"
                        );
                        phase = new_phase;
                        offset = *mark_offset;
                        blob_index = *mark_blob_index;
                        mode = Mode::Normal;
                        continue;
                    }

                    if !new_phase.or_later_has_callback(&callbacks) {
                        return Ok(());
                    }

                    offset = frame.end_offset();
                    blob_index += 1;
                }
            }
        }

        // EOF reached. If we ended mid-fast-forward, rewind once more so the
        // final stretch is given a normal, slow pass — the probe cadence may
        // have missed the only blob of the phase we actually wanted.
        if let Mode::FastForward { mark_offset, mark_blob_index } = mode {
            tracing::info!(mark_blob_index, "reached EOF during fast-forward, rewinding for final pass");
            return self.read_from(data, mark_offset, mark_blob_index, phase, &mut callbacks);
        }

        Ok(())
    }

    /// Slow, every-blob decode starting at `offset`, used for the
    /// end-of-file rewind.
    fn read_from(
        &self,
        data: &[u8],
        mut offset: u64,
        mut blob_index: u64,
        mut phase: Phase,
        callbacks: &mut Callbacks<'_>,
    ) -> Result<()> {
        let len = data.len() as u64;
        let mut bump = Bump::new();
        while offset < len {
            let frame = Frame::read_at(data, offset)?;
            if frame.blob_type() != BlobType::OsmData {
                offset = frame.end_offset();
                blob_index += 1;
                continue;
            }
            bump.reset();
            let block = frame.decode_data(data, &bump)?;
            if let Some(block_phase) = detect_phase(&block) {
                if block_phase < phase {
                    return Err(malformed_at(
                        "PBF blocks did not follow the order nodes, ways, relations",
                        offset,
                    ));
                }
                phase = block_phase;
            }
            dispatch_block(&block, phase, callbacks);
            offset = frame.end_offset();
            blob_index += 1;
        }
        Ok(())
    }
}

fn detect_phase(block: &PrimitiveBlock) -> Option<Phase> {
    for group in block.groups() {
        if group.nodes().len() > 0 || group.dense_nodes().len() > 0 {
            return Some(Phase::Nodes);
        }
        if group.ways().len() > 0 {
            return Some(Phase::Ways);
        }
        if group.relations().len() > 0 {
            return Some(Phase::Relations);
        }
    }
    None
}

fn dispatch_block(block: &PrimitiveBlock, phase: Phase, callbacks: &mut Callbacks<'_>) {
    for group in block.groups() {
        match phase {
            Phase::Nodes => {
                if let Some(cb) = callbacks.node.as_mut() {
                    for node in group.nodes() {
                        cb(NodeRef::Sparse(node));
                    }
                    for dnode in group.dense_nodes() {
                        cb(NodeRef::Dense(dnode));
                    }
                }
            }
            Phase::Ways => {
                if let Some(cb) = callbacks.way.as_mut() {
                    for way in group.ways() {
                        cb(way);
                    }
                }
            }
            Phase::Relations => {
                if let Some(cb) = callbacks.relation.as_mut() {
                    for rel in group.relations() {
                        cb(rel);
                    }
                }
            }
        }
    }
}

/// A blob's framing, parsed directly out of the mmapped byte slice: the
/// 4-byte big-endian header length, the decoded `BlobHeader`, and the
/// `[start, end)` byte range of the framed unit as a whole (so the caller
/// can advance past it without decoding the payload).
struct Frame {
    header: fileformat::BlobHeader,
    payload_start: u64,
    payload_len: u64,
    end: u64,
}

impl Frame {
    fn read_at(data: &[u8], offset: u64) -> Result<Frame> {
        let off = offset as usize;
        if data.len() < off + 4 {
            return Err(malformed_at("truncated blob length prefix", offset));
        }
        let header_size = u64::from(BigEndian::read_u32(&data[off..off + 4]));
        if header_size >= MAX_BLOB_HEADER_SIZE {
            return Err(new_blob_error(BlobError::HeaderTooBig { size: header_size }));
        }

        let header_start = off + 4;
        let header_end = header_start + header_size as usize;
        if data.len() < header_end {
            return Err(malformed_at("truncated blob header", offset));
        }
        let header: fileformat::BlobHeader = fileformat::BlobHeader::parse_from_bytes(
            &data[header_start..header_end],
        )
        .map_err(|e| new_protobuf_error(e, "blob header"))?;

        let datasize = u64::from(header.datasize as u32);
        if datasize >= MAX_BLOB_MESSAGE_SIZE {
            return Err(new_blob_error(BlobError::MessageTooBig { size: datasize }));
        }

        let payload_start = header_end as u64;
        let payload_end = payload_start + datasize;
        if data.len() < payload_end as usize {
            return Err(malformed_at("truncated blob payload", offset));
        }

        Ok(Frame {
            header,
            payload_start,
            payload_len: datasize,
            end: payload_end,
        })
    }

    fn blob_type(&self) -> BlobType<'_> {
        match self.header.type_.as_str() {
            "OSMHeader" => BlobType::OsmHeader,
            "OSMData" => BlobType::OsmData,
            x => BlobType::Unknown(x),
        }
    }

    fn end_offset(&self) -> u64 {
        self.end
    }

    fn blob_bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.payload_start as usize;
        let end = start + self.payload_len as usize;
        &data[start..end]
    }

    fn parse_blob(&self, data: &[u8]) -> Result<fileformat::Blob> {
        fileformat::Blob::parse_from_bytes(self.blob_bytes(data))
            .map_err(|e| new_protobuf_error(e, "blob"))
    }

    fn decode_header(&self, data: &[u8], bump: &Bump) -> Result<HeaderBlock> {
        let blob = self.parse_blob(data)?;
        decode_blob_in(&blob, "header block", bump).map(HeaderBlock::new)
    }

    fn decode_data(&self, data: &[u8], bump: &Bump) -> Result<PrimitiveBlock> {
        let blob = self.parse_blob(data)?;
        decode_blob_in(&blob, "primitive block", bump).map(PrimitiveBlock::new)
    }
}

/// A minimal, non-phase-aware blob counter used by tests and the debug
/// dumper: just walks every frame and reports its type, without decoding
/// payloads at all.
pub fn count_blobs(path: impl AsRef<Path>) -> Result<(u64, u64)> {
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let data: &[u8] = &mmap;
    let mut offset = 0u64;
    let mut headers = 0u64;
    let mut data_blobs = 0u64;
    while offset < data.len() as u64 {
        let frame = Frame::read_at(data, offset)?;
        match frame.blob_type() {
            BlobType::OsmHeader => headers += 1,
            BlobType::OsmData => data_blobs += 1,
            BlobType::Unknown(_) => {}
        }
        offset = frame.end_offset();
    }
    Ok((headers, data_blobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{BlobEncoding, BlobWriter, BlockBuilder, standard_header_block};

    fn write_fixture_to(path: &std::path::Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut w = BlobWriter::new(std::io::BufWriter::new(file));
        w.write_header_block(standard_header_block("vexdb-test"), BlobEncoding::Zlib { level: 6 })
            .unwrap();

        // nodes block
        let mut bb = BlockBuilder::new(w);
        {
            let mut group = bb.node_group();
            for i in 1..=3 {
                group.node_builder().id(i).latlon(52.0 + i as f64 * 0.01, 13.0).finish();
            }
            group.finish();
        }
        let w = bb.finish(BlobEncoding::Zlib { level: 6 }).unwrap();

        // way block
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
            group.finish();
        }
        let _w = bb.finish(BlobEncoding::Zlib { level: 6 }).unwrap();
    }

    fn tempfile(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("vexdb-reader-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn reads_header_and_way() {
        let path = tempfile("basic.osm.pbf");
        write_fixture_to(&path);

        let reader = PbfReader::open(&path).unwrap();
        let header = reader.header().unwrap();
        assert!(header.required_features().contains(&"DenseNodes".to_string()));

        let mut way_ids = Vec::new();
        let callbacks = Callbacks::new().with_way(|w| way_ids.push(w.id()));
        reader.read(callbacks).unwrap();
        assert_eq!(way_ids, vec![100]);
    }

    #[test]
    fn node_callback_sees_sparse_nodes() {
        let path = tempfile("nodes.osm.pbf");
        write_fixture_to(&path);

        let reader = PbfReader::open(&path).unwrap();
        let mut ids = Vec::new();
        let callbacks = Callbacks::new().with_node(|n| {
            if let NodeRef::Sparse(n) = n {
                ids.push(n.id());
            }
        });
        reader.read(callbacks).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn no_callbacks_terminates_immediately() {
        let path = tempfile("noop.osm.pbf");
        write_fixture_to(&path);
        let reader = PbfReader::open(&path).unwrap();
        reader.read(Callbacks::new()).unwrap();
    }
}
