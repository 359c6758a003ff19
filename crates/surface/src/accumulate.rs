//! Alpha-weighted color sampling under a dab mask.
//!
//! Two modes: the legacy path sums every masked pixel with integer
//! accumulators, the paint-aware path folds sampled pixels into running
//! additive and spectral averages and combines them by the `paint` weight.

use rand::Rng;

use ochre_color::{rgb_to_spectral, spectral_to_rgb, spectral_wgm};

use crate::FIX15_ONE;
use crate::mask::DabMask;

/// Running sums carried across the tiles under one dab.
///
/// In legacy mode (`paint < 0`) the fields are plain opacity-weighted sums.
/// In paint mode `r`, `g`, `b` hold the running weighted average instead,
/// already combined additively/spectrally by the paint factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorSums {
    pub weight: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Sum opacity-weighted channels over every masked pixel.
///
/// The per-tile sums fit 32-bit integers (a full tile of maximal values is
/// 2^15 * 2^15 * 4096 / 2^15 per channel), so the inner loop stays in
/// integer math and converts to float once at the end.
pub fn get_color_legacy(mask: &DabMask, rgba: &[u16], sums: &mut ColorSums) {
    let pixels: &[[u16; 4]] = bytemuck::cast_slice(rgba);

    let mut weight: u32 = 0;
    let mut r: u32 = 0;
    let mut g: u32 = 0;
    let mut b: u32 = 0;
    let mut a: u32 = 0;

    for (px, m) in mask.covered() {
        let p = &pixels[px];
        let opa = m as u32;
        weight += opa;
        r += opa * p[0] as u32 / FIX15_ONE;
        g += opa * p[1] as u32 / FIX15_ONE;
        b += opa * p[2] as u32 / FIX15_ONE;
        a += opa * p[3] as u32 / FIX15_ONE;
    }

    sums.weight += weight as f32;
    sums.r += r as f32;
    sums.g += g as f32;
    sums.b += b as f32;
    sums.a += a as f32;
}

/// Fold masked pixels into the running averages.
///
/// Every `sample_interval`-th masked pixel is sampled (the first always
/// is), plus a `random_sample_rate` fraction of the rest. Each sample is
/// mixed into the running color as a two-color blend weighted by its own
/// alpha against the alpha accumulated so far; the spectral average uses a
/// weighted geometric mean of reflectances. A negative `paint` falls back
/// to [`get_color_legacy`].
pub fn get_color_accumulate(
    mask: &DabMask,
    rgba: &[u16],
    sums: &mut ColorSums,
    paint: f32,
    sample_interval: u16,
    random_sample_rate: f32,
    rng: &mut impl Rng,
) {
    if paint < 0.0 {
        get_color_legacy(mask, rgba, sums);
        return;
    }

    let pixels: &[[u16; 4]] = bytemuck::cast_slice(rgba);

    let mut avg_spectral = [0.0f32; 10];
    let mut avg_rgb = [sums.r, sums.g, sums.b];
    if paint > 0.0 {
        avg_spectral = rgb_to_spectral(sums.r, sums.g, sums.b);
    }

    let mut interval_counter: u16 = 0;
    for (px, m) in mask.covered() {
        if interval_counter == 0 || rng.random::<f32>() < random_sample_rate {
            let p = &pixels[px];
            let a = m as f32 * p[3] as f32 / (1u32 << 30) as f32;
            let alpha_sums = a + sums.a;
            sums.weight += m as f32 / FIX15_ONE as f32;

            let mut fac_a = 1.0;
            let mut fac_b = 1.0;
            if alpha_sums > 0.0 {
                fac_a = a / alpha_sums;
                fac_b = 1.0 - fac_a;
            }

            if paint > 0.0 && p[3] > 0 {
                let spectral = rgb_to_spectral(
                    p[0] as f32 / p[3] as f32,
                    p[1] as f32 / p[3] as f32,
                    p[2] as f32 / p[3] as f32,
                );
                avg_spectral = spectral_wgm(&spectral, &avg_spectral, fac_a);
            }
            if paint < 1.0 && p[3] > 0 {
                for i in 0..3 {
                    avg_rgb[i] = pixels[px][i] as f32 * fac_a / p[3] as f32 + avg_rgb[i] * fac_b;
                }
            }
            sums.a += a;
        }
        interval_counter = (interval_counter + 1) % sample_interval;
    }

    // paint-weighted combination of the spectral and additive averages
    let spec_rgb = spectral_to_rgb(&avg_spectral);
    sums.r = spec_rgb[0] * paint + (1.0 - paint) * avg_rgb[0];
    sums.g = spec_rgb[1] * paint + (1.0 - paint) * avg_rgb[1];
    sums.b = spec_rgb[2] * paint + (1.0 - paint) * avg_rgb[2];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TILE_WORDS;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn full_mask() -> DabMask {
        let mut mask = DabMask::new();
        mask.render(32.0, 32.0, 200.0, 1.0, 1.0, 0.0);
        mask
    }

    fn tile_filled(rgba: [u16; 4]) -> Vec<u16> {
        let mut buf = vec![0u16; TILE_WORDS];
        for px in buf.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        buf
    }

    #[test]
    fn test_legacy_uniform_fill() {
        let mask = full_mask();
        // premultiplied (0.6, 0.4, 0.2, 1.0)
        let buf = tile_filled([19661, 13107, 6554, 32768]);
        let mut sums = ColorSums::default();
        get_color_legacy(&mask, &buf, &mut sums);

        assert!(sums.weight > 0.0);
        let r = sums.r / sums.weight;
        let g = sums.g / sums.weight;
        let b = sums.b / sums.weight;
        let a = sums.a / sums.weight;
        assert!((r - 0.6).abs() < 1e-3);
        assert!((g - 0.4).abs() < 1e-3);
        assert!((b - 0.2).abs() < 1e-3);
        assert!((a - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_legacy_transparent_reports_zero_alpha() {
        let mask = full_mask();
        let buf = tile_filled([0, 0, 0, 0]);
        let mut sums = ColorSums::default();
        get_color_legacy(&mask, &buf, &mut sums);
        assert!(sums.weight > 0.0);
        assert_eq!(sums.a, 0.0);
    }

    #[test]
    fn test_accumulate_uniform_fill_additive() {
        let mask = full_mask();
        let buf = tile_filled([19661, 13107, 6554, 32768]);
        let mut sums = ColorSums::default();
        let mut rng = SmallRng::seed_from_u64(7);
        get_color_accumulate(&mask, &buf, &mut sums, 0.0, 1, 0.0, &mut rng);

        // additive average of a uniform fill is the straight color
        assert!((sums.r - 0.6).abs() < 1e-2);
        assert!((sums.g - 0.4).abs() < 1e-2);
        assert!((sums.b - 0.2).abs() < 1e-2);
        assert!(sums.a > 0.0);
    }

    #[test]
    fn test_accumulate_uniform_fill_spectral() {
        let mask = full_mask();
        let buf = tile_filled([19661, 13107, 6554, 32768]);
        let mut sums = ColorSums::default();
        let mut rng = SmallRng::seed_from_u64(7);
        get_color_accumulate(&mask, &buf, &mut sums, 1.0, 1, 0.0, &mut rng);

        // a uniform fill must survive the spectral round trip
        assert!((sums.r - 0.6).abs() < 2e-2);
        assert!((sums.g - 0.4).abs() < 2e-2);
        assert!((sums.b - 0.2).abs() < 2e-2);
    }

    #[test]
    fn test_sampling_interval_bounds_work() {
        let mask = full_mask();
        let buf = tile_filled([16384, 16384, 16384, 32768]);
        let mut sums = ColorSums::default();
        let mut rng = SmallRng::seed_from_u64(42);
        // only guaranteed samples, no random ones
        get_color_accumulate(&mask, &buf, &mut sums, 0.0, 64, 0.0, &mut rng);
        assert!(sums.weight > 0.0);
        // 4096 pixels / interval 64 = 64 guaranteed samples
        assert!((sums.weight - 64.0).abs() < 1.0);
        assert!((sums.r - 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_negative_paint_uses_legacy() {
        let mask = full_mask();
        let buf = tile_filled([19661, 13107, 6554, 32768]);
        let mut a = ColorSums::default();
        let mut b = ColorSums::default();
        let mut rng = SmallRng::seed_from_u64(1);
        get_color_legacy(&mask, &buf, &mut a);
        get_color_accumulate(&mask, &buf, &mut b, -1.0, 1, 0.0, &mut rng);
        assert_eq!(a.weight, b.weight);
        assert_eq!(a.r, b.r);
        assert_eq!(a.a, b.a);
    }
}
