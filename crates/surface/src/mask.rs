//! Run-length-encoded dab opacity masks.
//!
//! A mask describes the per-pixel opacity of one elliptical dab clipped to
//! a tile. The word stream is: a non-zero word is a 15-bit opacity for the
//! next pixel; a zero word is followed by a skip count in 4-byte pixel
//! slots; two consecutive zero words terminate. The sum of covered and
//! skipped pixels always equals the tile's pixel count.

use std::f32::consts::PI;

use crate::{FIX15_ONE, TILE_PIXELS, TILE_SIZE};

/// Reusable mask buffer for one dab on one tile.
#[derive(Default)]
pub struct DabMask {
    words: Vec<u16>,
    rr_scratch: Vec<f32>,
}

// Rotate into the dab frame, scale the minor axis, return the squared
// distance.
#[inline]
fn calculate_r_sample(x: f32, y: f32, aspect_ratio: f32, sn: f32, cs: f32) -> f32 {
    let yyr = (y * cs - x * sn) * aspect_ratio;
    let xxr = y * sn + x * cs;
    yyr * yyr + xxr * xxr
}

#[inline]
fn calculate_rr(
    xp: i32,
    yp: i32,
    x: f32,
    y: f32,
    aspect_ratio: f32,
    sn: f32,
    cs: f32,
    one_over_radius2: f32,
) -> f32 {
    let yy = yp as f32 + 0.5 - y;
    let xx = xp as f32 + 0.5 - x;
    calculate_r_sample(xx, yy, aspect_ratio, sn, cs) * one_over_radius2
}

#[inline]
fn sign_point_in_line(px: f32, py: f32, vx: f32, vy: f32) -> f32 {
    (px - vx) * (-vy) - vx * (py - vy)
}

#[inline]
fn closest_point_to_line(lx: f32, ly: f32, px: f32, py: f32) -> (f32, f32) {
    let l2 = lx * lx + ly * ly;
    let ltp_dot = px * lx + py * ly;
    let t = ltp_dot / l2;
    (lx * t, ly * t)
}

// Antialiased variant for small dabs: take the visibility at the nearest
// point inside the pixel and divide by 1 + delta, where delta is how much
// more occluded a point at a fixed sub-pixel distance is. Removes shimmer
// on dabs under 3 pixels.
fn calculate_rr_antialiased(
    xp: i32,
    yp: i32,
    x: f32,
    y: f32,
    aspect_ratio: f32,
    sn: f32,
    cs: f32,
    one_over_radius2: f32,
    r_aa_start: f32,
) -> f32 {
    // pixel borders relative to the dab center
    let pixel_right = x - xp as f32;
    let pixel_bottom = y - yp as f32;
    let pixel_center_x = pixel_right - 0.5;
    let pixel_center_y = pixel_bottom - 0.5;
    let pixel_left = pixel_right - 1.0;
    let pixel_top = pixel_bottom - 1.0;

    let (nearest_x, nearest_y, rr_near);
    if pixel_left < 0.0 && pixel_right > 0.0 && pixel_top < 0.0 && pixel_bottom > 0.0 {
        nearest_x = 0.0;
        nearest_y = 0.0;
        rr_near = 0.0;
    } else {
        let (nx, ny) = closest_point_to_line(cs, sn, pixel_center_x, pixel_center_y);
        nearest_x = nx.clamp(pixel_left, pixel_right);
        nearest_y = ny.clamp(pixel_top, pixel_bottom);
        rr_near = calculate_r_sample(nearest_x, nearest_y, aspect_ratio, sn, cs) * one_over_radius2;
    }

    if rr_near > 1.0 {
        return rr_near;
    }

    let center_sign = sign_point_in_line(pixel_center_x, pixel_center_y, cs, -sn);

    // radius of a circle with area 1
    let rad_area_1 = (1.0f32 / PI).sqrt();

    let (farthest_x, farthest_y) = if center_sign < 0.0 {
        (nearest_x - sn * rad_area_1, nearest_y + cs * rad_area_1)
    } else {
        (nearest_x + sn * rad_area_1, nearest_y - cs * rad_area_1)
    };

    let r_far = calculate_r_sample(farthest_x, farthest_y, aspect_ratio, sn, cs);
    let rr_far = r_far * one_over_radius2;

    if r_far < r_aa_start {
        return (rr_far + rr_near) * 0.5;
    }

    let mut visibility_near = 1.0 - rr_near;
    let delta = rr_far - rr_near;
    visibility_near /= 1.0 + delta;

    1.0 - visibility_near
}

#[inline]
fn calculate_opa(
    rr: f32,
    segment1_offset: f32,
    segment1_slope: f32,
    segment2_offset: f32,
    segment2_slope: f32,
    hardness: f32,
) -> f32 {
    let fac = if rr <= hardness { segment1_slope } else { segment2_slope };
    let mut opa = if rr <= hardness { segment1_offset } else { segment2_offset };
    opa += rr * fac;
    if rr > 1.0 {
        opa = 0.0;
    }
    opa
}

impl DabMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw RLE word stream, terminator included.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Iterate over `(pixel_index, opacity)` pairs for the covered pixels.
    pub fn covered(&self) -> CoveredPixels<'_> {
        CoveredPixels { words: &self.words, pos: 0, pixel: 0 }
    }

    /// Rasterize the mask for a dab at tile-local `(x, y)`.
    ///
    /// `hardness` must be in (0, 1] (the facade rejects 0), `angle` is in
    /// degrees, `aspect_ratio` is forced to at least 1.
    pub fn render(&mut self, x: f32, y: f32, radius: f32, hardness: f32, aspect_ratio: f32, angle: f32) {
        let hardness = hardness.clamp(0.0, 1.0);
        let aspect_ratio = aspect_ratio.max(1.0);
        debug_assert!(hardness > 0.0);

        self.words.clear();

        // Opacity falls off from the center (rr = 0) to the fringe (rr = 1)
        // in two linear segments meeting at rr = hardness.
        let segment1_offset = 1.0;
        let segment1_slope = -(1.0 / hardness - 1.0);
        let segment2_offset = hardness / (1.0 - hardness);
        let segment2_slope = -hardness / (1.0 - hardness);
        // for hardness == 1.0, segment2 is never used

        let angle_rad = angle / 360.0 * 2.0 * PI;
        let cs = angle_rad.cos();
        let sn = angle_rad.sin();

        let tile = TILE_SIZE as i32;
        let r_fringe = radius + 1.0;
        let x0 = ((x - r_fringe).floor() as i32).max(0);
        let y0 = ((y - r_fringe).floor() as i32).max(0);
        let x1 = ((x + r_fringe).floor() as i32).min(tile - 1);
        let y1 = ((y + r_fringe).floor() as i32).min(tile - 1);
        let one_over_radius2 = 1.0 / (radius * radius);

        // Pre-calculate rr per pixel; the separate pass vectorizes well.
        self.rr_scratch.resize(TILE_PIXELS, 0.0);
        if radius < 3.0 {
            let aa_border = 1.0;
            let mut r_aa_start = (radius - aa_border).max(0.0);
            r_aa_start = r_aa_start * r_aa_start / aspect_ratio;

            for yp in y0..=y1 {
                for xp in x0..=x1 {
                    self.rr_scratch[(yp * tile + xp) as usize] = calculate_rr_antialiased(
                        xp,
                        yp,
                        x,
                        y,
                        aspect_ratio,
                        sn,
                        cs,
                        one_over_radius2,
                        r_aa_start,
                    );
                }
            }
        } else {
            for yp in y0..=y1 {
                for xp in x0..=x1 {
                    self.rr_scratch[(yp * tile + xp) as usize] =
                        calculate_rr(xp, yp, x, y, aspect_ratio, sn, cs, one_over_radius2);
                }
            }
        }

        // Run-length encode: zero-opacity runs collapse into skip pairs.
        // Signed accumulators: clipping can momentarily over- and
        // under-count when the bounding box leaves the tile on the right.
        let mut skip: isize = 0;
        let mut accounted: isize = 0;

        if y0 <= y1 {
            skip += (y0 * tile) as isize;
            accounted += (y0 * tile) as isize;
            for yp in y0..=y1 {
                skip += x0 as isize;
                accounted += x0 as isize;

                let mut xp = x0;
                while xp <= x1 {
                    let rr = self.rr_scratch[(yp * tile + xp) as usize];
                    let opa = calculate_opa(
                        rr,
                        segment1_offset,
                        segment1_slope,
                        segment2_offset,
                        segment2_slope,
                        hardness,
                    );
                    // negative opacities saturate to zero in the cast
                    let opa_word = (opa.min(1.0) * FIX15_ONE as f32) as u16;
                    accounted += 1;
                    if opa_word == 0 {
                        skip += 1;
                    } else {
                        if skip > 0 {
                            self.words.push(0);
                            self.words.push((skip * 4) as u16);
                            skip = 0;
                        }
                        self.words.push(opa_word);
                    }
                    xp += 1;
                }
                skip += (tile - xp) as isize;
                accounted += (tile - xp) as isize;
            }
        }

        // Skip everything the bounding box never touched, so covered plus
        // skipped pixels always total the full tile.
        skip += TILE_PIXELS as isize - accounted;
        if skip > 0 {
            self.words.push(0);
            self.words.push((skip * 4) as u16);
        }
        self.words.push(0);
        self.words.push(0);
    }
}

/// Forward iterator over the covered pixels of a [`DabMask`].
pub struct CoveredPixels<'a> {
    words: &'a [u16],
    pos: usize,
    pixel: usize,
}

impl Iterator for CoveredPixels<'_> {
    type Item = (usize, u16);

    fn next(&mut self) -> Option<(usize, u16)> {
        loop {
            let word = *self.words.get(self.pos)?;
            if word != 0 {
                let px = self.pixel;
                self.pos += 1;
                self.pixel += 1;
                return Some((px, word));
            }
            let skip = *self.words.get(self.pos + 1)?;
            if skip == 0 {
                return None;
            }
            self.pixel += skip as usize / 4;
            self.pos += 2;
        }
    }
}
