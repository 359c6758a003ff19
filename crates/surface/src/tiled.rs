//! The tiled surface facade: queued dab drawing, flushing, color picking.

use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::accumulate::{ColorSums, get_color_accumulate};
use crate::blend;
use crate::mask::DabMask;
use crate::queue::{DabOp, OperationQueue};
use crate::rect::Rect;
use crate::symmetry::{SymmetryData, SymmetryType};
use crate::tile::{TileIndex, TileRequest, TileStore};
use crate::{DabSpec, FIX15_ONE, Surface, TILE_SIZE};

const NUM_BBOXES_DEFAULT: usize = 32;

// Tile range touched by a dab footprint; the +1 fringe mirrors the mask
// rasterizer's bounding box.
fn tile_range(x: f32, y: f32, radius: f32) -> (i32, i32, i32, i32) {
    let r_fringe = radius + 1.0;
    let tile = TILE_SIZE as f32;
    let tx1 = ((x - r_fringe).floor() / tile).floor() as i32;
    let tx2 = ((x + r_fringe).floor() / tile).floor() as i32;
    let ty1 = ((y - r_fringe).floor() / tile).floor() as i32;
    let ty2 = ((y + r_fringe).floor() / tile).floor() as i32;
    (tx1, tx2, ty1, ty2)
}

fn update_dirty_bbox(bbox: &mut Rect, op: &DabOp) {
    let r_fringe = op.radius + 1.0;
    let bb_x = (op.x - r_fringe).floor() as i32;
    let bb_y = (op.y - r_fringe).floor() as i32;
    let bb_w = (op.x + r_fringe).floor() as i32 - bb_x + 1;
    let bb_h = (op.y + r_fringe).floor() as i32 - bb_y + 1;

    bbox.expand_to_include_point(bb_x, bb_y);
    bbox.expand_to_include_point(bb_x + bb_w - 1, bb_y + bb_h - 1);
}

// Apply one queued dab to a tile buffer: rasterize the mask, then stamp
// each active blend mode. The additive and pigment passes split the
// opacity by the op's paint factor.
fn process_op(rgba: &mut [u16], mask: &mut DabMask, index: TileIndex, op: &DabOp) {
    mask.render(
        op.x - (index.x * TILE_SIZE as i32) as f32,
        op.y - (index.y * TILE_SIZE as i32) as f32,
        op.radius,
        op.hardness,
        op.aspect_ratio,
        op.angle,
    );

    let fix = FIX15_ONE as f32;
    let color = [op.color_r, op.color_g, op.color_b];

    if op.paint < 1.0 {
        if op.normal > 0.0 {
            if op.color_a == 1.0 {
                let opacity = (op.normal * op.opaque * (1.0 - op.paint) * fix) as u16;
                blend::normal(mask, rgba, color, opacity);
            } else {
                // normal case for brushes that use smudging (eg. watercolor)
                let opacity = (op.normal * op.opaque * (1.0 - op.paint) * fix) as u16;
                blend::normal_and_eraser(mask, rgba, color, (op.color_a * fix) as u16, opacity);
            }
        }
        if op.lock_alpha > 0.0 && op.color_a != 0.0 {
            let opacity = (op.lock_alpha
                * op.opaque
                * (1.0 - op.colorize)
                * (1.0 - op.posterize)
                * (1.0 - op.paint)
                * fix) as u16;
            blend::lock_alpha(mask, rgba, color, opacity);
        }
    }

    if op.paint > 0.0 {
        if op.normal > 0.0 {
            if op.color_a == 1.0 {
                let opacity = (op.normal * op.opaque * op.paint * fix) as u16;
                blend::normal_paint(mask, rgba, color, opacity);
            } else {
                let opacity = (op.normal * op.opaque * op.paint * fix) as u16;
                blend::normal_and_eraser_paint(mask, rgba, color, (op.color_a * fix) as u16, opacity);
            }
        }
        if op.lock_alpha > 0.0 && op.color_a != 0.0 {
            let opacity = (op.lock_alpha
                * op.opaque
                * (1.0 - op.colorize)
                * (1.0 - op.posterize)
                * op.paint
                * fix) as u16;
            blend::lock_alpha_paint(mask, rgba, color, opacity);
        }
    }

    if op.colorize > 0.0 {
        blend::colorize(mask, rgba, color, (op.colorize * op.opaque * fix) as u16);
    }
    if op.posterize > 0.0 {
        blend::posterize(mask, rgba, (op.posterize * op.opaque * fix) as u16, op.posterize_num);
    }
}

// Fixed-point op template from the float boundary values. None when the
// dab cannot modify the surface.
fn build_op(dab: &DabSpec) -> Option<DabOp> {
    let opaque = dab.opaque.clamp(0.0, 1.0);
    let hardness = dab.hardness.clamp(0.0, 1.0);
    let lock_alpha = dab.lock_alpha.clamp(0.0, 1.0);
    let colorize = dab.colorize.clamp(0.0, 1.0);
    let posterize = dab.posterize.clamp(0.0, 1.0);

    // don't bother with dabs smaller than 0.1 pixel
    if dab.radius < 0.1 {
        return None;
    }
    // hardness 0 is an infinitely small center, fully transparent outside
    if hardness == 0.0 {
        return None;
    }
    if opaque == 0.0 {
        return None;
    }

    let fix = FIX15_ONE as f32;
    Some(DabOp {
        x: dab.x,
        y: dab.y,
        radius: dab.radius,
        hardness,
        aspect_ratio: dab.aspect_ratio.max(1.0),
        angle: dab.angle,
        color_r: (dab.color[0].clamp(0.0, 1.0) * fix) as u16,
        color_g: (dab.color[1].clamp(0.0, 1.0) * fix) as u16,
        color_b: (dab.color[2].clamp(0.0, 1.0) * fix) as u16,
        color_a: dab.color_a.clamp(0.0, 1.0),
        opaque,
        normal: (1.0 - lock_alpha) * (1.0 - colorize) * (1.0 - posterize),
        lock_alpha,
        colorize,
        posterize,
        posterize_num: ((dab.posterize_num * 100.0).round() as i32).clamp(1, 128) as u32,
        paint: dab.paint.clamp(0.0, 1.0),
    })
}

#[inline]
fn tile_seed(base: u64, index: TileIndex) -> u64 {
    base ^ (index.x as u32 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index.y as u32 as u64).rotate_left(32)
}

/// Tile-backed paintable surface.
///
/// Dabs queued by [`Surface::draw_dab`] are deferred into per-tile
/// operation lists and composited on `end_atomic` (or earlier, when
/// `get_color` needs to read a tile with pending work). When the tile
/// store supports it, flushing parallelizes over dirty tiles.
pub struct TiledSurface<S: TileStore> {
    store: S,
    op_queue: OperationQueue,
    symmetry: SymmetryData,
    bboxes: Vec<Rect>,
    num_bboxes_dirtied: usize,
    getcolor_seed: u64,
}

impl<S: TileStore> TiledSurface<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            op_queue: OperationQueue::new(),
            symmetry: SymmetryData::new(),
            bboxes: vec![Rect::ZERO; NUM_BBOXES_DEFAULT],
            num_bboxes_dirtied: 0,
            getcolor_seed: 0,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stage a symmetry change; it takes effect at the next `begin_atomic`.
    pub fn set_symmetry(
        &mut self,
        active: bool,
        center_x: f32,
        center_y: f32,
        angle: f32,
        kind: SymmetryType,
        num_lines: u32,
    ) {
        self.symmetry.set_pending(active, center_x, center_y, angle, kind, num_lines);
    }

    /// True when no queued operations are pending.
    pub fn queue_is_empty(&self) -> bool {
        self.op_queue.is_empty()
    }

    fn apply_ops(&self, index: TileIndex, ops: &[DabOp]) {
        let request = TileRequest::new(index.x, index.y);
        self.store.with_tile_mut(&request, &mut |buffer| match buffer {
            Some(rgba) => {
                let mut mask = DabMask::new();
                for op in ops {
                    process_op(rgba, &mut mask, index, op);
                }
            }
            None => {
                warn!(tx = index.x, ty = index.y, "unable to get tile, skipping dab operations");
            }
        });
    }

    // Flush pending operations on one tile (used before reading it).
    fn process_tile(&self, index: TileIndex) {
        let ops = self.op_queue.take_tile(index);
        if !ops.is_empty() {
            self.apply_ops(index, &ops);
        }
    }

    fn enqueue_dab(&mut self, template: &DabOp, x: f32, y: f32, angle: f32, bbox_slot: usize) {
        let mut op = *template;
        op.x = x;
        op.y = y;
        op.angle = angle;

        let (tx1, tx2, ty1, ty2) = tile_range(x, y, op.radius);
        for ty in ty1..=ty2 {
            for tx in tx1..=tx2 {
                self.op_queue.add(TileIndex::new(tx, ty), op);
            }
        }

        let slot = bbox_slot.min(self.bboxes.len() - 1);
        update_dirty_bbox(&mut self.bboxes[slot], &op);
    }

    fn prepare_bounding_boxes(&mut self) {
        let state = self.symmetry.current();
        let snowflake = state.kind == SymmetryType::Snowflake;
        let desired = state.num_lines as usize * if snowflake { 2 } else { 1 };
        if desired > self.bboxes.len() {
            // margin avoids reallocating on every line-count tweak
            self.bboxes.resize(desired + 10, Rect::ZERO);
        }
        let dirtied = self.num_bboxes_dirtied.min(self.bboxes.len());
        for bbox in &mut self.bboxes[..dirtied] {
            *bbox = Rect::ZERO;
        }
        self.num_bboxes_dirtied = 0;
    }
}

impl<S: TileStore> Surface for TiledSurface<S> {
    fn begin_atomic(&mut self) {
        self.symmetry.update();
        self.prepare_bounding_boxes();
    }

    fn end_atomic(&mut self, roi: &mut [Rect]) -> usize {
        let entries = self.op_queue.take_dirty();
        debug!(tiles = entries.len(), "flushing queued dab operations");

        if self.store.threadsafe_requests() && entries.len() > 3 {
            entries.par_iter().for_each(|(index, ops)| self.apply_ops(*index, ops));
        } else {
            for (index, ops) in &entries {
                self.apply_ops(*index, ops);
            }
        }

        let num_dirty = self.num_bboxes_dirtied.min(self.bboxes.len());
        let roi_slots = roi.len();
        if roi_slots == 0 {
            return 0;
        }
        for slot in roi.iter_mut().take(num_dirty.min(roi_slots)) {
            *slot = Rect::ZERO;
        }
        // If there is not enough space for all rectangles in the output,
        // merge some of them with their list-adjacent neighbours.
        let bboxes_per_output = (num_dirty as f32 / roi_slots as f32).max(1.0);
        for i in 0..num_dirty {
            let out_index = if num_dirty > roi_slots {
                ((i as f32 / bboxes_per_output).round() as usize).min(roi_slots - 1)
            } else {
                i
            };
            roi[out_index].expand_to_include_rect(&self.bboxes[i]);
        }
        num_dirty.min(roi_slots)
    }

    fn draw_dab(&mut self, dab: &DabSpec) -> bool {
        let Some(template) = build_op(dab) else {
            return false;
        };

        // Normal pass
        self.enqueue_dab(&template, dab.x, dab.y, template.angle, 0);
        let mut num_bboxes_used = 1;

        // Symmetry pass
        if self.symmetry.active && !self.symmetry.matrices().is_empty() {
            let symm = *self.symmetry.current();
            let num_bboxes = self.bboxes.len();
            let rot_angle = 360.0 / symm.num_lines as f32;
            let point = glam::Vec2::new(dab.x, dab.y);
            let angle = template.angle;

            match symm.kind {
                SymmetryType::Vertical => {
                    let out = self.symmetry.matrices()[0].transform_point2(point);
                    self.enqueue_dab(&template, out.x, out.y, -2.0 * (90.0 + symm.angle) - angle, 1);
                    num_bboxes_used = 2;
                }
                SymmetryType::Horizontal => {
                    let out = self.symmetry.matrices()[0].transform_point2(point);
                    self.enqueue_dab(&template, out.x, out.y, -2.0 * symm.angle - angle, 1);
                    num_bboxes_used = 2;
                }
                SymmetryType::VertHorz => {
                    // across the horizontal line, then the vertical
                    // (diagonal), then back across the horizontal
                    let out = self.symmetry.matrices()[0].transform_point2(point);
                    self.enqueue_dab(&template, out.x, out.y, -2.0 * symm.angle - angle, 1);
                    let out = self.symmetry.matrices()[1].transform_point2(point);
                    self.enqueue_dab(&template, out.x, out.y, angle, 2);
                    let out = self.symmetry.matrices()[2].transform_point2(point);
                    self.enqueue_dab(&template, out.x, out.y, -2.0 * symm.angle - angle, 3);
                    num_bboxes_used = 4;
                }
                SymmetryType::Snowflake | SymmetryType::Rotational => {
                    let n = symm.num_lines as usize;
                    if symm.kind == SymmetryType::Snowflake {
                        // reflected dabs go after the slots the rotational
                        // dabs will use
                        let offset = (num_bboxes / 2).min(n);
                        let dabs_per_bbox = (n as f32 * 2.0 / num_bboxes as f32).max(1.0);
                        let base_idx = n - 1;
                        let base_angle = -2.0 * symm.angle - angle;
                        for i in 0..n {
                            let slot = offset
                                + (((i as f32 / dabs_per_bbox).round() as usize)
                                    .min(num_bboxes - 1));
                            let out = self.symmetry.matrices()[base_idx + i].transform_point2(point);
                            self.enqueue_dab(
                                &template,
                                out.x,
                                out.y,
                                base_angle - i as f32 * rot_angle,
                                slot,
                            );
                        }
                        num_bboxes_used = num_bboxes.min(n * 2);
                    }

                    let passes = if symm.kind == SymmetryType::Snowflake { 2 } else { 1 };
                    let dabs_per_bbox = ((n * passes) as f32 / num_bboxes as f32).max(1.0);
                    for i in 1..n {
                        let slot = ((i as f32 / dabs_per_bbox).round() as usize).min(num_bboxes - 1);
                        let out = self.symmetry.matrices()[i - 1].transform_point2(point);
                        self.enqueue_dab(
                            &template,
                            out.x,
                            out.y,
                            angle - i as f32 * rot_angle,
                            slot,
                        );
                    }
                    num_bboxes_used = num_bboxes.min(n.max(num_bboxes_used));
                }
            }
        }

        self.num_bboxes_dirtied =
            self.num_bboxes_dirtied.max(num_bboxes_used.min(self.bboxes.len()));
        true
    }

    fn get_color(&mut self, x: f32, y: f32, radius: f32, paint: f32) -> [f32; 4] {
        let radius = radius.max(1.0);
        let hardness = 0.5;

        let (tx1, tx2, ty1, ty2) = tile_range(x, y, radius);
        let mut tiles = Vec::new();
        for ty in ty1..=ty2 {
            for tx in tx1..=tx2 {
                tiles.push(TileIndex::new(tx, ty));
            }
        }

        // The guaranteed-sample interval and the random rate are set so the
        // expected number of sampled pixels stays linear in the radius.
        let sample_interval = if radius <= 2.0 { 1 } else { (radius * 7.0) as u16 };
        let random_sample_rate = 1.0 / (7.0 * radius);

        let seed_base = self.getcolor_seed;
        self.getcolor_seed = self.getcolor_seed.wrapping_add(1);

        let sums = Mutex::new(ColorSums::default());
        let sample_tile = |index: TileIndex| {
            // Flush queued draw_dab operations first
            self.process_tile(index);

            let request = TileRequest::new(index.x, index.y);
            self.store.with_tile(&request, &mut |buffer| {
                let Some(rgba) = buffer else {
                    warn!(tx = index.x, ty = index.y, "unable to get tile, skipping color sample");
                    return;
                };
                let mut mask = DabMask::new();
                mask.render(
                    x - (index.x * TILE_SIZE as i32) as f32,
                    y - (index.y * TILE_SIZE as i32) as f32,
                    radius,
                    hardness,
                    1.0,
                    0.0,
                );
                let mut rng = SmallRng::seed_from_u64(tile_seed(seed_base, index));
                let mut sums = sums.lock().expect("accumulator lock poisoned");
                get_color_accumulate(
                    &mask,
                    rgba,
                    &mut sums,
                    paint,
                    sample_interval,
                    random_sample_rate,
                    &mut rng,
                );
            });
        };

        if self.store.threadsafe_requests() && tiles.len() > 3 {
            tiles.par_iter().for_each(|&index| sample_tile(index));
        } else {
            for &index in &tiles {
                sample_tile(index);
            }
        }

        let mut sums = sums.into_inner().expect("accumulator lock poisoned");
        if sums.weight <= 0.0 {
            warn!("get_color sampled no pixels");
            return [0.0, 1.0, 0.0, 0.0];
        }

        sums.a /= sums.weight;
        // Legacy sampling accumulates plain sums, so divide those through.
        if paint < 0.0 {
            sums.r /= sums.weight;
            sums.g /= sums.weight;
            sums.b /= sums.weight;
        }

        let alpha = sums.a.clamp(0.0, 1.0);
        if sums.a > 0.0 {
            // Straighten the channels if using legacy sampling; clamp to
            // guard against rounding errors.
            let demul = if paint < 0.0 { sums.a } else { 1.0 };
            [
                (sums.r / demul).clamp(0.0, 1.0),
                (sums.g / demul).clamp(0.0, 1.0),
                (sums.b / demul).clamp(0.0, 1.0),
                alpha,
            ]
        } else {
            // all transparent: make the colors ugly so bugs stay visible
            [0.0, 1.0, 0.0, alpha]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::FixedTileStore;

    fn surface(px: u32) -> TiledSurface<FixedTileStore> {
        TiledSurface::new(FixedTileStore::new(px, px))
    }

    fn red_dab(x: f32, y: f32, radius: f32) -> DabSpec {
        DabSpec {
            x,
            y,
            radius,
            color: [1.0, 0.0, 0.0],
            opaque: 1.0,
            hardness: 1.0,
            color_a: 1.0,
            ..DabSpec::default()
        }
    }

    #[test]
    fn test_rejects_degenerate_dabs() {
        let mut s = surface(64);
        s.begin_atomic();
        assert!(!s.draw_dab(&DabSpec { radius: 0.05, ..red_dab(10.0, 10.0, 0.05) }));
        assert!(!s.draw_dab(&DabSpec { hardness: 0.0, ..red_dab(10.0, 10.0, 5.0) }));
        assert!(!s.draw_dab(&DabSpec { opaque: 0.0, ..red_dab(10.0, 10.0, 5.0) }));
        assert!(s.queue_is_empty());
        let mut roi = [Rect::ZERO];
        assert_eq!(s.end_atomic(&mut roi), 0);
        assert!(roi[0].is_empty());
    }

    #[test]
    fn test_queue_empty_after_end_atomic() {
        let mut s = surface(128);
        s.begin_atomic();
        assert!(s.draw_dab(&red_dab(32.0, 32.0, 10.0)));
        assert!(!s.queue_is_empty());
        let mut roi = [Rect::ZERO];
        s.end_atomic(&mut roi);
        assert!(s.queue_is_empty());
    }

    #[test]
    fn test_dirty_bbox_covers_footprint() {
        let mut s = surface(128);
        s.begin_atomic();
        s.draw_dab(&red_dab(32.0, 32.0, 10.0));
        let mut roi = [Rect::ZERO];
        assert_eq!(s.end_atomic(&mut roi), 1);
        let r = roi[0];
        assert_eq!((r.x, r.y), (21, 21));
        assert_eq!((r.width, r.height), (23, 23));
    }

    #[test]
    fn test_get_color_flushes_pending_ops() {
        let mut s = surface(128);
        s.begin_atomic();
        s.draw_dab(&red_dab(32.0, 32.0, 10.0));
        // the queued dab must be visible to get_color before end_atomic
        let c = s.get_color(32.0, 32.0, 2.0, -1.0);
        assert!(c[0] > 0.9, "sampled {c:?}");
        assert!(c[3] > 0.9);
        let mut roi = [Rect::ZERO];
        s.end_atomic(&mut roi);
    }

    #[test]
    fn test_get_color_radius_floor() {
        let mut s = surface(128);
        // radius below 1 behaves as radius 1 and still samples pixels
        let c = s.get_color(40.0, 40.0, 0.25, 0.0);
        assert_eq!(c, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_failed_tile_requests_are_skipped() {
        // 64x64 store, dab hanging off the edge: out-of-range tiles fail,
        // in-range pixels still get painted
        let mut s = surface(64);
        s.begin_atomic();
        s.draw_dab(&red_dab(63.0, 63.0, 8.0));
        let mut roi = [Rect::ZERO];
        s.end_atomic(&mut roi);
        let p = s.store().pixel(63, 63);
        assert!(p[0] > 30000);
    }
}
