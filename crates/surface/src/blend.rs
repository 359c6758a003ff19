//! Dab blend kernels.
//!
//! Every kernel walks the covered pixels of an RLE mask over a tile of
//! 16-bit premultiplied RGBA. `color` is the straight source color in
//! 15-bit fixed point, `opacity` the overall dab strength with the same
//! influence as the per-pixel mask values. Integer paths use `u32`
//! intermediates; the products fit because mask, opacity and channels are
//! all bounded by 2^15.
//!
//! The `_paint` variants mix in 10-band spectral reflectance space with a
//! weighted geometric mean instead of adding light, which makes overlapping
//! strokes behave like pigment.

use ochre_color::{rgb_to_spectral, spectral_to_rgb, spectral_wgm};

use crate::FIX15_ONE;
use crate::mask::DabMask;

/// Pigment mixing misbehaves at very low opacity (rounding in the
/// int->float->int trip), so pigment kernels floor the opacity here.
pub const PAINT_MIN_OPACITY: u16 = 150;

#[inline]
fn pixels_mut(rgba: &mut [u16]) -> &mut [[u16; 4]] {
    bytemuck::cast_slice_mut(rgba)
}

/// Plain "over" compositing of a premultiplied source color.
pub fn normal(mask: &DabMask, rgba: &mut [u16], color: [u16; 3], opacity: u16) {
    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        p[3] = (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as u16;
        p[0] = ((opa_a * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE) as u16;
        p[1] = ((opa_a * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE) as u16;
        p[2] = ((opa_a * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE) as u16;
    }
}

/// Normal blending in spectral space. Transparent canvas pixels fall back
/// to the additive path since there is nothing to mix with.
pub fn normal_paint(mask: &DabMask, rgba: &mut [u16], color: [u16; 3], opacity: u16) {
    let spectral_a = rgb_to_spectral(
        color[0] as f32 / FIX15_ONE as f32,
        color[1] as f32 / FIX15_ONE as f32,
        color[2] as f32 / FIX15_ONE as f32,
    );
    let opacity = opacity.max(PAINT_MIN_OPACITY);

    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        if p[3] == 0 {
            p[3] = (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as u16;
            p[0] = ((opa_a * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE) as u16;
            p[1] = ((opa_a * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE) as u16;
            p[2] = ((opa_a * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE) as u16;
            continue;
        }

        // alpha-weighted ratio for the geometric mean (sums to 1)
        let fac_a = opa_a as f32 / (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as f32;

        // un-premultiply the canvas pixel to get its reflectance
        let spectral_b = rgb_to_spectral(
            p[0] as f32 / p[3] as f32,
            p[1] as f32 / p[3] as f32,
            p[2] as f32 / p[3] as f32,
        );

        let mixed = spectral_wgm(&spectral_a, &spectral_b, fac_a);
        let rgb = spectral_to_rgb(&mixed);

        p[3] = (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as u16;
        for i in 0..3 {
            p[i] = (rgb[i] * p[3] as f32 + 0.5) as u16;
        }
    }
}

/// Normal blending with an extra source alpha: `color_a` of 0 erases,
/// values in between drag the canvas towards that transparency level.
pub fn normal_and_eraser(
    mask: &DabMask,
    rgba: &mut [u16],
    color: [u16; 3],
    color_a: u16,
    opacity: u16,
) {
    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let mut opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        opa_a = opa_a * color_a as u32 / FIX15_ONE;
        p[3] = (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as u16;
        p[0] = ((opa_a * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE) as u16;
        p[1] = ((opa_a * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE) as u16;
        p[2] = ((opa_a * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE) as u16;
    }
}

// Fast sigmoid-like ramp used to fade between additive and spectral
// blending as the canvas alpha rises.
fn spectral_blend_factor(x: f32) -> f32 {
    let ver_fac = 1.65; // vertical compression
    let hor_fac = 8.0; // horizontal compression
    let hor_offs = 3.0; // offset, slightly left of center
    let b = x * hor_fac - hor_offs;
    0.5 + b / (1.0 + b.abs() * ver_fac)
}

/// Smudging/erasing kernel in pigment mode. Low canvas alphas blend mostly
/// additively, fading to full spectral mixing at opaque pixels; this keeps
/// dark fringes away from transparent edges.
pub fn normal_and_eraser_paint(
    mask: &DabMask,
    rgba: &mut [u16],
    color: [u16; 3],
    color_a: u16,
    opacity: u16,
) {
    let spectral_a = rgb_to_spectral(
        color[0] as f32 / FIX15_ONE as f32,
        color[1] as f32 / FIX15_ONE as f32,
        color[2] as f32 / FIX15_ONE as f32,
    );

    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        let opa_a2 = opa_a * color_a as u32 / FIX15_ONE;
        let opa_out = opa_a2 + opa_b * p[3] as u32 / FIX15_ONE;

        let mut rgb = [0u32; 3];

        let spectral_factor = spectral_blend_factor(p[3] as f32 / FIX15_ONE as f32).clamp(0.0, 1.0);
        let additive_factor = 1.0 - spectral_factor;

        if additive_factor > 0.0 {
            rgb[0] = (opa_a2 * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE;
            rgb[1] = (opa_a2 * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE;
            rgb[2] = (opa_a2 * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE;
        }

        if spectral_factor > 0.0 && p[3] != 0 {
            let spectral_b = rgb_to_spectral(
                p[0] as f32 / p[3] as f32,
                p[1] as f32 / p[3] as f32,
                p[2] as f32 / p[3] as f32,
            );

            let mut fac_a = opa_a as f32 / (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as f32;
            fac_a *= color_a as f32 / FIX15_ONE as f32;

            let mixed = spectral_wgm(&spectral_a, &spectral_b, fac_a);
            let rgb_result = spectral_to_rgb(&mixed);

            for i in 0..3 {
                rgb[i] = (additive_factor * rgb[i] as f32
                    + spectral_factor * rgb_result[i] * opa_out as f32) as u32;
            }
        }

        p[3] = opa_out as u16;
        for i in 0..3 {
            p[i] = rgb[i] as u16;
        }
    }
}

/// Normal blending that never touches the alpha channel: the dab strength
/// is additionally scaled by the existing alpha.
pub fn lock_alpha(mask: &DabMask, rgba: &mut [u16], color: [u16; 3], opacity: u16) {
    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let mut opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        opa_a = opa_a * p[3] as u32 / FIX15_ONE;
        p[0] = ((opa_a * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE) as u16;
        p[1] = ((opa_a * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE) as u16;
        p[2] = ((opa_a * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE) as u16;
    }
}

/// [`lock_alpha`] with spectral color mixing.
pub fn lock_alpha_paint(mask: &DabMask, rgba: &mut [u16], color: [u16; 3], opacity: u16) {
    let spectral_a = rgb_to_spectral(
        color[0] as f32 / FIX15_ONE as f32,
        color[1] as f32 / FIX15_ONE as f32,
        color[2] as f32 / FIX15_ONE as f32,
    );
    let opacity = opacity.max(PAINT_MIN_OPACITY);

    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let mut opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        opa_a = opa_a * p[3] as u32 / FIX15_ONE;
        if p[3] == 0 {
            p[0] = ((opa_a * color[0] as u32 + opa_b * p[0] as u32) / FIX15_ONE) as u16;
            p[1] = ((opa_a * color[1] as u32 + opa_b * p[1] as u32) / FIX15_ONE) as u16;
            p[2] = ((opa_a * color[2] as u32 + opa_b * p[2] as u32) / FIX15_ONE) as u16;
            continue;
        }
        let fac_a = opa_a as f32 / (opa_a + opa_b * p[3] as u32 / FIX15_ONE) as f32;
        let spectral_b = rgb_to_spectral(
            p[0] as f32 / p[3] as f32,
            p[1] as f32 / p[3] as f32,
            p[2] as f32 / p[3] as f32,
        );
        let mixed = spectral_wgm(&spectral_a, &spectral_b, fac_a);
        let rgb = spectral_to_rgb(&mixed);
        for i in 0..3 {
            p[i] = (rgb[i] * p[3] as f32 + 0.5) as u16;
        }
    }
}

// Rec.601-style luma coefficients in 15-bit fixed point, matching the
// Color/Luminosity layer modes of the W3C compositing draft.
const LUMA_RED_COEFF: f32 = 0.2126 * FIX15_ONE as f32;
const LUMA_GREEN_COEFF: f32 = 0.7152 * FIX15_ONE as f32;
const LUMA_BLUE_COEFF: f32 = 0.0722 * FIX15_ONE as f32;

#[inline]
fn luma(r: i32, g: i32, b: i32) -> f32 {
    r as f32 * LUMA_RED_COEFF + g as f32 * LUMA_GREEN_COEFF + b as f32 * LUMA_BLUE_COEFF
}

// SetLum + ClipColor from the PDF/SVG nonseparable blend mode spec: give
// the bottom color the top's hue and saturation while keeping its
// luminance, clipping back into the [0, 2^15] gamut.
fn set_lum_from(top: [u16; 3], bot: [u16; 3]) -> [u16; 3] {
    let botlum = (luma(bot[0] as i32, bot[1] as i32, bot[2] as i32) / FIX15_ONE as f32) as u16;
    let toplum = (luma(top[0] as i32, top[1] as i32, top[2] as i32) / FIX15_ONE as f32) as u16;
    let diff = botlum as i32 - toplum as i32;
    let mut r = top[0] as i32 + diff;
    let mut g = top[1] as i32 + diff;
    let mut b = top[2] as i32 + diff;

    let lum = (luma(r, g, b) / FIX15_ONE as f32) as i32;
    let cmin = r.min(g).min(b);
    let cmax = r.max(g).max(b);
    if cmin < 0 {
        r = lum + ((r - lum) * lum) / (lum - cmin);
        g = lum + ((g - lum) * lum) / (lum - cmin);
        b = lum + ((b - lum) * lum) / (lum - cmin);
    }
    if cmax > FIX15_ONE as i32 {
        r = lum + ((r - lum) * (FIX15_ONE as i32 - lum)) / (cmax - lum);
        g = lum + ((g - lum) * (FIX15_ONE as i32 - lum)) / (cmax - lum);
        b = lum + ((b - lum) * (FIX15_ONE as i32 - lum)) / (cmax - lum);
    }
    [r as u16, g as u16, b as u16]
}

/// Colorize: apply the source hue and saturation while retaining the
/// canvas luminance and alpha.
pub fn colorize(mask: &DabMask, rgba: &mut [u16], color: [u16; 3], opacity: u16) {
    let pixels = pixels_mut(rgba);
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let a = p[3];
        let mut straight = [0u16; 3];
        if a != 0 {
            for i in 0..3 {
                straight[i] = (FIX15_ONE * p[i] as u32 / a as u32) as u16;
            }
        }

        let lum = set_lum_from(color, straight);

        // re-premultiply and combine as normal
        let opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        for i in 0..3 {
            let premult = lum[i] as u32 * a as u32 / FIX15_ONE;
            p[i] = ((opa_a * premult + opa_b * p[i] as u32) / FIX15_ONE) as u16;
        }
    }
}

/// Posterize the canvas to `posterize_num` levels per channel and blend the
/// result in additively; alpha is untouched.
pub fn posterize(mask: &DabMask, rgba: &mut [u16], opacity: u16, posterize_num: u32) {
    let pixels = pixels_mut(rgba);
    let levels = posterize_num as f32;
    for (px, m) in mask.covered() {
        let p = &mut pixels[px];
        let opa_a = m as u32 * opacity as u32 / FIX15_ONE;
        let opa_b = FIX15_ONE - opa_a;
        for i in 0..3 {
            let c = p[i] as f32 / FIX15_ONE as f32;
            let post = (FIX15_ONE as f32 * (c * levels).round() / levels) as u32;
            p[i] = ((opa_a * post + opa_b * p[i] as u32) / FIX15_ONE) as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TILE_PIXELS, TILE_WORDS};

    fn full_mask() -> DabMask {
        let mut mask = DabMask::new();
        mask.render(32.0, 32.0, 200.0, 1.0, 1.0, 0.0);
        assert_eq!(mask.covered().count(), TILE_PIXELS);
        mask
    }

    fn tile_filled(rgba: [u16; 4]) -> Vec<u16> {
        let mut buf = vec![0u16; TILE_WORDS];
        for px in buf.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        buf
    }

    fn channel_invariant_holds(rgba: &[u16]) -> bool {
        rgba.chunks_exact(4)
            .all(|p| p[0] <= p[3] && p[1] <= p[3] && p[2] <= p[3] && p[3] as u32 <= FIX15_ONE)
    }

    #[test]
    fn test_normal_full_opacity_replaces() {
        let mask = full_mask();
        let mut buf = tile_filled([0, 0, 0, 0]);
        normal(&mask, &mut buf, [32768, 0, 16384], 32768);
        assert_eq!(&buf[0..4], &[32768, 0, 16384, 32768]);
        assert!(channel_invariant_holds(&buf));
    }

    #[test]
    fn test_normal_half_opacity_mixes() {
        let mask = full_mask();
        let mut buf = tile_filled([0, 0, 0, 32768]);
        normal(&mask, &mut buf, [32768, 32768, 32768], 16384);
        // half grey over opaque black
        let p = &buf[0..4];
        assert_eq!(p[3], 32768);
        assert!((p[0] as i32 - 16384).abs() <= 1);
        assert!(channel_invariant_holds(&buf));
    }

    #[test]
    fn test_eraser_clears_alpha() {
        let mask = full_mask();
        let mut buf = tile_filled([16384, 16384, 16384, 32768]);
        normal_and_eraser(&mask, &mut buf, [0, 0, 0], 0, 32768);
        assert_eq!(&buf[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_eraser_partial_target_alpha() {
        let mask = full_mask();
        let mut buf = tile_filled([32768, 32768, 32768, 32768]);
        normal_and_eraser(&mask, &mut buf, [32768, 32768, 32768], 16384, 32768);
        // dragged halfway towards 50% transparency
        assert_eq!(buf[3], 16384);
        assert!(channel_invariant_holds(&buf));
    }

    #[test]
    fn test_lock_alpha_preserves_alpha() {
        let mask = full_mask();
        let mut buf = tile_filled([8192, 8192, 8192, 16384]);
        lock_alpha(&mask, &mut buf, [32768, 0, 0], 32768);
        for p in buf.chunks_exact(4) {
            assert_eq!(p[3], 16384);
        }
        // red moved towards the dab color
        assert!(buf[0] > 8192);
        assert!(buf[1] < 8192);
        assert!(channel_invariant_holds(&buf));
    }

    #[test]
    fn test_lock_alpha_on_transparent_is_noop() {
        let mask = full_mask();
        let mut buf = tile_filled([0, 0, 0, 0]);
        lock_alpha(&mask, &mut buf, [32768, 32768, 32768], 32768);
        assert!(buf.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_normal_paint_on_transparent_matches_additive() {
        let mask = full_mask();
        let color = [32768, 16384, 0];
        let mut a = tile_filled([0, 0, 0, 0]);
        let mut b = tile_filled([0, 0, 0, 0]);
        normal(&mask, &mut a, color, 32768);
        normal_paint(&mask, &mut b, color, 32768);
        assert_eq!(a, b);
    }

    #[test]
    fn test_normal_paint_complements_darken() {
        let mask = full_mask();
        // opaque yellow canvas, blue dab at half opacity
        let mut additive = tile_filled([29491, 29491, 3277, 32768]);
        let mut pigment = additive.clone();
        let blue = [3277, 3277, 29491];
        normal(&mask, &mut additive, blue, 16384);
        normal_paint(&mask, &mut pigment, blue, 16384);
        let sum_add = additive[0] as u32 + additive[1] as u32 + additive[2] as u32;
        let sum_pig = pigment[0] as u32 + pigment[1] as u32 + pigment[2] as u32;
        assert!(sum_pig < sum_add, "pigment mix should be darker: {sum_pig} vs {sum_add}");
        assert!(channel_invariant_holds(&pigment));
    }

    #[test]
    fn test_colorize_keeps_luminance_and_alpha() {
        let mask = full_mask();
        let mut buf = tile_filled([16384, 16384, 16384, 32768]);
        colorize(&mask, &mut buf, [32768, 0, 0], 32768);
        let p = &buf[0..4];
        assert_eq!(p[3], 32768);
        let lum_before = 0.2126 * 16384.0 + 0.7152 * 16384.0 + 0.0722 * 16384.0;
        let lum_after = 0.2126 * p[0] as f32 + 0.7152 * p[1] as f32 + 0.0722 * p[2] as f32;
        assert!((lum_after - lum_before).abs() < 300.0);
        assert!(p[0] > p[1], "hue should come from the top color");
        assert!(channel_invariant_holds(&buf));
    }

    #[test]
    fn test_posterize_quantizes_without_touching_alpha() {
        let mask = full_mask();
        let mut buf = tile_filled([10000, 20000, 30000, 32768]);
        posterize(&mask, &mut buf, 32768, 2);
        let p = &buf[0..4];
        assert_eq!(p[3], 32768);
        // two levels per channel: everything lands on 0, 1/2 or 1
        for c in &p[0..3] {
            let v = *c as f32 / 32768.0;
            let nearest = (v * 2.0).round() / 2.0;
            assert!((v - nearest).abs() < 0.01, "{v} not quantized");
        }
    }

    #[test]
    fn test_spectral_blend_factor_ramp() {
        assert!(spectral_blend_factor(0.0) < 0.1);
        assert!(spectral_blend_factor(1.0) > 0.9);
        let lo = spectral_blend_factor(0.2);
        let hi = spectral_blend_factor(0.8);
        assert!(lo < hi);
    }
}
