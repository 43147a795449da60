//! The spatial grid: "which ways/relations begin in this lat/lon cell".
//!
//! The globe is tessellated into a `2^14 x 2^14` array of cells (~1.7 km
//! cells at 45° latitude). Each cell holds the head of a singly-linked list
//! of way-reference blocks and the head of a per-cell relation chain (the
//! `next` pointer for that chain lives in the Relation record itself, not
//! here).
//!
//! Rather than the tri-state sentinel-slot encoding older formats of this
//! kind use (positive entries as IDs, a negative last entry as a free-count,
//! zero as "empty"), each way-reference block here carries an explicit
//! `len: u8` occupancy count. This grid is rebuilt from the store on every
//! open rather than persisted, so there's no wire format to stay compatible
//! with, and the explicit count removes a whole class of off-by-one bugs the
//! sentinel scheme invites.

use crate::coord::Coord;
use crate::limits::{GRID_DIM, WAY_BLOCK_SIZE};

/// A cell coordinate pair within the `GRID_DIM x GRID_DIM` grid.
pub type CellCoord = (u32, u32);

/// One way-reference block: up to `WAY_BLOCK_SIZE` way IDs plus a link to
/// the next (older) block in the cell's chain. Block index 0 is reserved
/// for "no block"; real blocks start at index 1.
#[derive(Clone, Debug)]
struct WayBlock {
    ways: [i64; WAY_BLOCK_SIZE],
    len: u8,
    next: u32,
}

impl WayBlock {
    fn empty(next: u32) -> WayBlock {
        WayBlock {
            ways: [0; WAY_BLOCK_SIZE],
            len: 0,
            next,
        }
    }

    fn is_full(&self) -> bool {
        self.len as usize == WAY_BLOCK_SIZE
    }
}

/// One grid cell: the head of its way-block chain and the head of its
/// relation chain. Both `0` mean empty (matching the on-disk convention
/// that block/relation index `0` means "none").
#[derive(Clone, Copy, Debug, Default)]
struct Cell {
    head_way_block: u32,
    head_relation_id: i64,
}

/// The spatial grid: maps grid cells to the ways and relations that begin
/// in them.
pub struct SpatialGrid {
    cells: Vec<Cell>,
    // Index 0 is the reserved "none" block; real blocks start at 1.
    way_blocks: Vec<WayBlock>,
    // Maps a relation id to the next relation id in the same cell's chain
    // (0 meaning "end of chain"). Keyed by relation id directly since
    // relation ids are comparatively few and sparse (see limits::MAX_REL_ID).
    relation_next: std::collections::HashMap<i64, i64>,
}

impl SpatialGrid {
    pub fn new() -> SpatialGrid {
        SpatialGrid {
            cells: vec![Cell::default(); (GRID_DIM as usize) * (GRID_DIM as usize)],
            way_blocks: vec![WayBlock::empty(0)], // index 0: reserved sentinel
            relation_next: std::collections::HashMap::new(),
        }
    }

    fn cell_index(cx: u32, cy: u32) -> usize {
        (cy as usize) * (GRID_DIM as usize) + (cx as usize)
    }

    /// Append `way_id` to the head way-block of the cell containing
    /// `first_node_coord`, allocating a new block if the head is full or
    /// absent.
    pub fn insert_way(&mut self, way_id: i64, first_node_coord: Coord) {
        let (cx, cy) = first_node_coord.grid_cell();
        let idx = Self::cell_index(cx, cy);
        let head = self.cells[idx].head_way_block;

        let needs_new_block = head == 0 || self.way_blocks[head as usize].is_full();
        let block_index = if needs_new_block {
            self.way_blocks.push(WayBlock::empty(head));
            (self.way_blocks.len() - 1) as u32
        } else {
            head
        };

        let block = &mut self.way_blocks[block_index as usize];
        block.ways[block.len as usize] = way_id;
        block.len += 1;

        self.cells[idx].head_way_block = block_index;
    }

    /// Push `rel_id` onto the relation chain of the cell containing
    /// `first_member_coord`.
    pub fn insert_relation(&mut self, rel_id: i64, first_member_coord: Coord) {
        let (cx, cy) = first_member_coord.grid_cell();
        let idx = Self::cell_index(cx, cy);
        let old_head = self.cells[idx].head_relation_id;
        self.relation_next.insert(rel_id, old_head);
        self.cells[idx].head_relation_id = rel_id;
    }

    /// Lazily walk the way IDs filed under cell `(cx, cy)`, most recently
    /// inserted first.
    pub fn ways_in_cell(&self, cx: u32, cy: u32) -> WaysInCell<'_> {
        let idx = Self::cell_index(cx, cy);
        WaysInCell {
            grid: self,
            block: self.cells[idx].head_way_block,
            slot: 0,
        }
    }

    /// Lazily walk the relation IDs filed under cell `(cx, cy)`, most
    /// recently inserted first.
    pub fn relations_in_cell(&self, cx: u32, cy: u32) -> RelationsInCell<'_> {
        let idx = Self::cell_index(cx, cy);
        RelationsInCell {
            grid: self,
            next: self.cells[idx].head_relation_id,
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> SpatialGrid {
        SpatialGrid::new()
    }
}

pub struct WaysInCell<'a> {
    grid: &'a SpatialGrid,
    block: u32,
    slot: usize,
}

impl<'a> Iterator for WaysInCell<'a> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            if self.block == 0 {
                return None;
            }
            let block = &self.grid.way_blocks[self.block as usize];
            if self.slot < block.len as usize {
                let way_id = block.ways[self.slot];
                self.slot += 1;
                return Some(way_id);
            }
            self.block = block.next;
            self.slot = 0;
        }
    }
}

pub struct RelationsInCell<'a> {
    grid: &'a SpatialGrid,
    next: i64,
}

impl<'a> Iterator for RelationsInCell<'a> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.next == 0 {
            return None;
        }
        let current = self.next;
        self.next = self.grid.relation_next.get(&current).copied().unwrap_or(0);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord_at(lon: f64, lat: f64) -> Coord {
        Coord::from_degrees(lon, lat).unwrap()
    }

    #[test]
    fn single_way_is_found_in_its_cell() {
        let mut grid = SpatialGrid::new();
        let c = coord_at(13.405, 52.52);
        grid.insert_way(100, c);
        let (cx, cy) = c.grid_cell();
        let found: Vec<i64> = grid.ways_in_cell(cx, cy).collect();
        assert_eq!(found, vec![100]);
    }

    #[test]
    fn block_overflow_allocates_a_new_block() {
        let mut grid = SpatialGrid::new();
        let c = coord_at(13.405, 52.52);
        let total = WAY_BLOCK_SIZE * 2 + 5;
        for i in 0..total {
            grid.insert_way(i as i64, c);
        }
        let (cx, cy) = c.grid_cell();
        let mut found: Vec<i64> = grid.ways_in_cell(cx, cy).collect();
        found.sort_unstable();
        let expected: Vec<i64> = (0..total as i64).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn different_cells_do_not_interfere() {
        let mut grid = SpatialGrid::new();
        let a = coord_at(-170.0, -80.0);
        let b = coord_at(170.0, 80.0);
        grid.insert_way(1, a);
        grid.insert_way(2, b);
        let (acx, acy) = a.grid_cell();
        let (bcx, bcy) = b.grid_cell();
        assert_eq!(grid.ways_in_cell(acx, acy).collect::<Vec<_>>(), vec![1]);
        assert_eq!(grid.ways_in_cell(bcx, bcy).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn empty_cell_yields_nothing() {
        let grid = SpatialGrid::new();
        assert_eq!(grid.ways_in_cell(0, 0).count(), 0);
        assert_eq!(grid.relations_in_cell(0, 0).count(), 0);
    }

    #[test]
    fn relation_chain_is_most_recent_first() {
        let mut grid = SpatialGrid::new();
        let c = coord_at(0.0, 0.0);
        grid.insert_relation(1, c);
        grid.insert_relation(2, c);
        grid.insert_relation(3, c);
        let (cx, cy) = c.grid_cell();
        let found: Vec<i64> = grid.relations_in_cell(cx, cy).collect();
        assert_eq!(found, vec![3, 2, 1]);
    }
}
