//! Per-tile FIFO queue of pending dab operations.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::tile::TileIndex;

/// One dab operation, restricted to a single tile at processing time.
///
/// Color channels are 15-bit fixed point (premultiplied at blend time);
/// the weight fields select which blend kernels run and how strongly.
#[derive(Debug, Clone, Copy)]
pub struct DabOp {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub hardness: f32,
    pub aspect_ratio: f32,
    pub angle: f32,
    pub color_r: u16,
    pub color_g: u16,
    pub color_b: u16,
    pub color_a: f32,
    pub opaque: f32,
    pub normal: f32,
    pub lock_alpha: f32,
    pub colorize: f32,
    pub posterize: f32,
    pub posterize_num: u32,
    pub paint: f32,
}

#[derive(Default)]
struct QueueInner {
    tiles: HashMap<TileIndex, Vec<DabOp>>,
    dirty: Vec<TileIndex>,
}

/// Maps tile indices to ordered lists of pending operations, plus the list
/// of dirty tiles accumulated since the last flush.
///
/// FIFO order is preserved within a tile; ordering between tiles is
/// unspecified. The queue owns enqueued ops and hands them back wholesale,
/// so no lock is held while a tile is being composited.
#[derive(Default)]
pub struct OperationQueue {
    inner: Mutex<QueueInner>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `op` to the tile's list and mark the tile dirty.
    pub fn add(&self, index: TileIndex, op: DabOp) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if !inner.tiles.contains_key(&index) {
            inner.dirty.push(index);
        }
        inner.tiles.entry(index).or_default().push(op);
    }

    /// Remove and return all pending ops for one tile, oldest first.
    pub fn take_tile(&self, index: TileIndex) -> Vec<DabOp> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.tiles.remove(&index).unwrap_or_default()
    }

    /// Drain the whole queue in dirty-tile order, transferring ownership of
    /// each tile's op list to the caller.
    pub fn take_dirty(&self) -> Vec<(TileIndex, Vec<DabOp>)> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let dirty = std::mem::take(&mut inner.dirty);
        dirty
            .into_iter()
            .filter_map(|index| inner.tiles.remove(&index).map(|ops| (index, ops)))
            .collect()
    }

    /// True when no operations are pending.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.tiles.is_empty()
    }
}
