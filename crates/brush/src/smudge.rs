//! Smudge buckets and the paint color mixer.
//!
//! A brush carries 256 buckets, each holding the smudge color it is
//! currently dragging along, the last color sampled from the canvas and a
//! recentness counter that decides when to resample. Which bucket a dab
//! uses is itself a dynamic setting, so one brush can maintain several
//! independent smudge states (e.g. per-bristle).

use ochre_color::{hcy_to_rgb, linear_to_srgb_rgb, rgb_to_hcy, rgb_to_spectral, spectral_to_rgb,
    spectral_wgm, srgb_to_linear_rgb};

use crate::math::smallest_angular_difference;

/// Number of smudge buckets per brush.
pub const SMUDGE_BUCKETS: usize = 256;

/// One smudge slot: colors are straight RGBA in [0, 1] with the alpha
/// semantics of the canvas (the smudge color may be partly transparent).
#[derive(Debug, Clone, Copy, Default)]
pub struct SmudgeBucket {
    /// The color the brush is currently dragging.
    pub color: [f32; 4],
    /// The last color sampled from the canvas.
    pub sampled: [f32; 4],
    /// Decays towards zero; a resample happens when it runs out.
    pub recentness: f32,
}

/// Per-call parameters of [`mix_colors`], all taken from brush settings.
#[derive(Debug, Clone, Copy)]
pub struct MixParams {
    /// Gamma for the additive branch; values below 1 are treated as 1.
    pub gamma: f32,
    /// Ratio of subtractive (weighted geometric) to additive mixing.
    pub normsub: f32,
    /// Ratio of spectral to plain RGB mixing.
    pub spectral: f32,
    /// Extra desaturation proportional to the hue difference of the mix.
    pub desaturation: f32,
    /// Extra darkening proportional to the hue difference of the mix.
    pub darken: f32,
}

/// Which pair of colors is being mixed. Mixing the smudge state with a
/// canvas sample weights by the sample's alpha; mixing the brush color into
/// the smudge treats the brush as fully opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    BrushIntoSmudge,
    SmudgeWithSample,
}

// Alpha-derived weight for the subtractive branch: more transparent paint
// is weaker paint.
fn subtractive_fac(a_alpha: f32, b_alpha: f32, fac: f32, mode: MixMode) -> f32 {
    let alpha_b = match mode {
        MixMode::BrushIntoSmudge => 1.0,
        MixMode::SmudgeWithSample => b_alpha,
    };
    let denom = a_alpha * fac + alpha_b * (1.0 - fac);
    if denom > 0.0 { a_alpha * fac / denom } else { fac }
}

/// Mix two straight RGBA colors the way wet paint does.
///
/// `fac` is the weight of `a`. The result is a convex combination (by
/// `spectral`) of an RGB mix and a 10-band spectral mix; each of those is
/// itself a convex combination (by `normsub`) of additive blending and a
/// weighted geometric mean. When `b` is fully transparent and comes from
/// the canvas, `fallback_rgb` (the brush color) stands in for its RGB.
pub fn mix_colors(
    a: [f32; 4],
    b: [f32; 4],
    fac: f32,
    params: &MixParams,
    mode: MixMode,
    fallback_rgb: [f32; 3],
) -> [f32; 4] {
    let normsub = params.normsub.clamp(0.0, 1.0);
    let spectral = params.spectral.clamp(0.0, 1.0);
    let gamma = params.gamma.max(1.0);

    let mut b = b;
    if b[3] == 0.0 && mode == MixMode::SmudgeWithSample {
        // a fully transparent sample carries no usable color
        b[0] = fallback_rgb[0];
        b[1] = fallback_rgb[1];
        b[2] = fallback_rgb[2];
    }

    let subfac = subtractive_fac(a[3], b[3], fac, mode);
    let mix_alpha = (fac * a[3] + (1.0 - fac) * b[3]).clamp(0.0, 1.0);

    // three-lights mix
    let mut rgbmix = [0.0f32; 4];
    if spectral < 1.0 {
        let mut a_lin = [a[0], a[1], a[2]];
        let mut b_lin = [b[0], b[1], b[2]];
        if gamma != 1.0 {
            a_lin = srgb_to_linear_rgb(a_lin, gamma);
            b_lin = srgb_to_linear_rgb(b_lin, gamma);
        }

        let mut norm = [0.0f32; 3];
        if normsub < 1.0 {
            // canvas samples carry premultiplied weight; the smudge state
            // is already premultiplied
            let premult = match mode {
                MixMode::SmudgeWithSample => b[3],
                MixMode::BrushIntoSmudge => 1.0,
            };
            for i in 0..3 {
                norm[i] = fac * a_lin[i] + (1.0 - fac) * b_lin[i] * premult;
            }
            if mode == MixMode::BrushIntoSmudge {
                // un-premultiply against the eraser target alpha
                for channel in &mut norm {
                    *channel /= b[3];
                }
            }
        }

        let mut sub = [0.0f32; 3];
        if normsub > 0.0 {
            for i in 0..3 {
                sub[i] = a_lin[i].max(0.0001).powf(subfac) * b_lin[i].max(0.0001).powf(1.0 - subfac);
            }
        }

        if gamma != 1.0 {
            norm = linear_to_srgb_rgb(norm, gamma);
            sub = linear_to_srgb_rgb(sub, gamma);
        }

        for i in 0..3 {
            rgbmix[i] = ((1.0 - normsub) * norm[i] + normsub * sub[i]).clamp(0.0, 1.0);
        }
        rgbmix[3] = mix_alpha;
    }

    // spectral mix
    let mut spectralmix = [0.0f32; 4];
    if spectral > 0.0 {
        let sa = rgb_to_spectral(
            a[0].clamp(0.0, 1.0),
            a[1].clamp(0.0, 1.0),
            a[2].clamp(0.0, 1.0),
        );
        let sb = rgb_to_spectral(
            b[0].clamp(0.0, 1.0),
            b[1].clamp(0.0, 1.0),
            b[2].clamp(0.0, 1.0),
        );

        let mut norm_rgb = [0.0f32; 3];
        if normsub < 1.0 {
            let mut snorm = [0.0f32; 10];
            for i in 0..10 {
                snorm[i] = sa[i] * fac + sb[i] * (1.0 - fac);
            }
            norm_rgb = spectral_to_rgb(&snorm);
        }

        let mut sub_rgb = [0.0f32; 3];
        if normsub > 0.0 {
            sub_rgb = spectral_to_rgb(&spectral_wgm(&sa, &sb, subfac));
        }

        for i in 0..3 {
            spectralmix[i] = (1.0 - normsub) * norm_rgb[i] + normsub * sub_rgb[i];
        }
        spectralmix[3] = mix_alpha;
    }

    let mut result = [0.0f32; 4];
    for i in 0..4 {
        result[i] = ((1.0 - spectral) * rgbmix[i] + spectral * spectralmix[i]).clamp(0.0, 1.0);
    }

    // Hue-difference based desaturation/darkening, strongest at a 50/50
    // mix and vanishing at the endpoints where only one color survives.
    if params.desaturation != 0.0 || params.darken != 0.0 {
        let smudge_hcy = rgb_to_hcy([a[0], a[1], a[2]]);
        let [h, mut c, mut y] = rgb_to_hcy([result[0], result[1], result[2]]);

        // HCY has three achromatic states (c = 0, y = 0, y = 1); skip them
        if c != 0.0
            && smudge_hcy[1] != 0.0
            && y != 0.0
            && smudge_hcy[2] != 0.0
            && y != 1.0
            && smudge_hcy[2] != 1.0
        {
            let hueratio = (0.5 - (0.5 - fac).abs()) / 0.5;
            let anglediff =
                (smallest_angular_difference(h * 360.0, smudge_hcy[0] * 360.0) / 360.0).abs();

            c *= 1.0 - anglediff * params.desaturation * hueratio;
            y *= 1.0 - anglediff * params.darken * hueratio;

            let rgb = hcy_to_rgb([h, c, y]);
            result[0] = rgb[0];
            result[1] = rgb[1];
            result[2] = rgb[2];
        }
    }

    result
}
