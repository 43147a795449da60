//! Structural capacity constants for the on-disk database format.
//!
//! These are compile-time limits baked into file sizes and offset widths,
//! not user-tunable runtime settings.

/// Highest node ID the store will accept. Current planet-scale usage is
/// around 2^33; this leaves headroom.
pub const MAX_NODE_ID: i64 = 1 << 34;
/// Highest way ID the store will accept.
pub const MAX_WAY_ID: i64 = 1 << 31;
/// Highest relation ID the store will accept.
pub const MAX_REL_ID: i64 = 1 << 25;

/// Maximum number of node references the `node_refs` arena can hold across
/// all ways combined.
pub const MAX_NODE_REFS: u64 = 1 << 34;
/// Maximum number of relation members the `rel_members` arena can hold
/// across all relations combined.
pub const MAX_REL_MEMBERS: u64 = 1 << 27;

/// Spatial grid dimension: `GRID_DIM x GRID_DIM` cells cover the globe.
pub const GRID_BITS: u32 = 14;
pub const GRID_DIM: u32 = 1 << GRID_BITS;

/// Way IDs per way-reference block.
pub const WAY_BLOCK_SIZE: usize = 32;
/// Upper bound on the number of way-blocks the `way_blocks` arena can hold.
pub const MAX_WAY_BLOCKS: u64 = (GRID_DIM as u64) * (GRID_DIM as u64) / 5;

/// Number of tag-payload subfiles the ID space is partitioned across.
pub const MAX_SUBFILES: usize = 20;

/// A single entity's encoded tag payload must fit in this staging buffer.
/// Entities whose encoded tags would exceed it fail with `CapacityExceeded`
/// rather than being truncated silently.
pub const MAX_TAG_PAYLOAD: usize = 1 << 20;

/// PBF writer: maximum number of elements buffered into one `PrimitiveGroup`
/// before a blob is flushed.
pub const PBF_BLOCK_SIZE: usize = 8000;

/// Reader: maximum tags attached to a single dense node before truncation.
pub const MAX_TAGS_PER_NODE: usize = crate::dense::MAX_TAGS_PER_NODE;

/// Reader: probe cadence while fast-forwarding through blobs whose phase has
/// no applicable callback.
pub const FAST_FORWARD_PROBE_INTERVAL: u64 = 1000;
