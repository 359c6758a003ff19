//! Tile storage: the lending protocol and the fixed in-memory store.

use std::sync::Mutex;

use crate::{TILE_SIZE, TILE_WORDS};

/// Integer tile coordinates on the (conceptually infinite) surface plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    pub x: i32,
    pub y: i32,
}

impl TileIndex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Parameters of one tile access.
#[derive(Debug, Clone, Copy)]
pub struct TileRequest {
    pub tx: i32,
    pub ty: i32,
    pub mipmap_level: u32,
}

impl TileRequest {
    pub fn new(tx: i32, ty: i32) -> Self {
        Self { tx, ty, mipmap_level: 0 }
    }
}

/// Backend that lends out 16-bit premultiplied RGBA tile buffers.
///
/// The buffer (4 * TILE_SIZE^2 words, row-major) is valid for the scope of
/// the `body` closure; mutations made through `with_tile_mut` are published
/// when the closure returns. A store that cannot provide the requested tile
/// invokes `body` with `None`; callers log and skip that tile.
pub trait TileStore: Sync {
    /// Whether tiles may be requested concurrently from multiple threads.
    fn threadsafe_requests(&self) -> bool {
        false
    }

    /// Read-only access to a tile.
    fn with_tile(&self, request: &TileRequest, body: &mut dyn FnMut(Option<&[u16]>));

    /// Read-write access to a tile.
    fn with_tile_mut(&self, request: &TileRequest, body: &mut dyn FnMut(Option<&mut [u16]>));
}

/// Simple fixed-size tile store holding a width x height surface in memory,
/// initialized to transparent. Requests outside the fixed area fail.
///
/// Each tile sits behind its own lock, so distinct tiles can be lent out
/// concurrently during a parallel flush.
pub struct FixedTileStore {
    width: u32,
    height: u32,
    tiles_x: i32,
    tiles_y: i32,
    tiles: Vec<Mutex<Box<[u16]>>>,
}

impl FixedTileStore {
    /// Create a store covering `width` x `height` pixels, rounded up to
    /// whole tiles.
    pub fn new(width: u32, height: u32) -> Self {
        let tiles_x = width.div_ceil(TILE_SIZE as u32) as i32;
        let tiles_y = height.div_ceil(TILE_SIZE as u32) as i32;
        let count = (tiles_x * tiles_y) as usize;
        let tiles = (0..count)
            .map(|_| Mutex::new(vec![0u16; TILE_WORDS].into_boxed_slice()))
            .collect();
        Self { width, height, tiles_x, tiles_y, tiles }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn tiles_x(&self) -> i32 {
        self.tiles_x
    }

    #[inline]
    pub fn tiles_y(&self) -> i32 {
        self.tiles_y
    }

    fn slot(&self, tx: i32, ty: i32) -> Option<&Mutex<Box<[u16]>>> {
        if tx < 0 || ty < 0 || tx >= self.tiles_x || ty >= self.tiles_y {
            return None;
        }
        self.tiles.get((ty * self.tiles_x + tx) as usize)
    }

    /// Fill every pixel with the given premultiplied RGBA value.
    pub fn fill(&self, rgba: [u16; 4]) {
        for tile in &self.tiles {
            let mut buf = tile.lock().expect("tile lock poisoned");
            for px in buf.chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Read a single pixel. Out-of-range coordinates return transparent.
    pub fn pixel(&self, x: u32, y: u32) -> [u16; 4] {
        if x >= self.width || y >= self.height {
            return [0; 4];
        }
        let tx = (x as usize / TILE_SIZE) as i32;
        let ty = (y as usize / TILE_SIZE) as i32;
        let Some(slot) = self.slot(tx, ty) else {
            return [0; 4];
        };
        let buf = slot.lock().expect("tile lock poisoned");
        let local = (y as usize % TILE_SIZE) * TILE_SIZE + (x as usize % TILE_SIZE);
        let mut out = [0u16; 4];
        out.copy_from_slice(&buf[local * 4..local * 4 + 4]);
        out
    }

    /// Write a single pixel. Out-of-range coordinates are ignored.
    pub fn set_pixel(&self, x: u32, y: u32, rgba: [u16; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let tx = (x as usize / TILE_SIZE) as i32;
        let ty = (y as usize / TILE_SIZE) as i32;
        let Some(slot) = self.slot(tx, ty) else {
            return;
        };
        let mut buf = slot.lock().expect("tile lock poisoned");
        let local = (y as usize % TILE_SIZE) * TILE_SIZE + (x as usize % TILE_SIZE);
        buf[local * 4..local * 4 + 4].copy_from_slice(&rgba);
    }
}

impl TileStore for FixedTileStore {
    fn threadsafe_requests(&self) -> bool {
        true
    }

    fn with_tile(&self, request: &TileRequest, body: &mut dyn FnMut(Option<&[u16]>)) {
        match self.slot(request.tx, request.ty) {
            Some(slot) => {
                let buf = slot.lock().expect("tile lock poisoned");
                body(Some(&buf));
            }
            None => body(None),
        }
    }

    fn with_tile_mut(&self, request: &TileRequest, body: &mut dyn FnMut(Option<&mut [u16]>)) {
        match self.slot(request.tx, request.ty) {
            Some(slot) => {
                let mut buf = slot.lock().expect("tile lock poisoned");
                body(Some(&mut buf));
            }
            None => body(None),
        }
    }
}
