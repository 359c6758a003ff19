//! Colorspace conversions used by the brush dynamics and blend kernels.
//!
//! All conversions operate on straight (non-premultiplied) channels in
//! [0, 1]. Out-of-range inputs are clamped; hue wraps.

/// HCY luma coefficients (red, green, blue).
pub const HCY_LUMA: [f32; 3] = [0.3, 0.59, 0.11];

#[inline]
fn max3(a: f32, b: f32, c: f32) -> f32 {
    a.max(b).max(c)
}

#[inline]
fn min3(a: f32, b: f32, c: f32) -> f32 {
    a.min(b).min(c)
}

/// Convert RGB to HSV. Hue is 0 for achromatic colors.
pub fn rgb_to_hsv(rgb: [f32; 3]) -> [f32; 3] {
    let r = rgb[0].clamp(0.0, 1.0);
    let g = rgb[1].clamp(0.0, 1.0);
    let b = rgb[2].clamp(0.0, 1.0);

    let max = max3(r, g, b);
    let min = min3(r, g, b);

    let v = max;
    let delta = max - min;

    if delta <= 0.0001 {
        return [0.0, 0.0, v];
    }

    let s = delta / max;
    let mut h = if r == max {
        (g - b) / delta
    } else if g == max {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    if h < 0.0 {
        h += 6.0;
    }
    [h / 6.0, s, v]
}

/// Convert HSV to RGB.
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [f32; 3] {
    let h = hsv[0] - hsv[0].floor();
    let s = hsv[1].clamp(0.0, 1.0);
    let v = hsv[2].clamp(0.0, 1.0);

    if s == 0.0 {
        return [v, v, v];
    }

    let mut hue = h;
    if hue == 1.0 {
        hue = 0.0;
    }
    hue *= 6.0;

    let i = hue as i32;
    let f = hue - i as f32;
    let w = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match i {
        0 => [v, t, w],
        1 => [q, v, w],
        2 => [w, v, t],
        3 => [w, q, v],
        4 => [t, w, v],
        _ => [v, w, q],
    }
}

/// Convert RGB to HSL. Hue is 0 for achromatic colors.
pub fn rgb_to_hsl(rgb: [f32; 3]) -> [f32; 3] {
    let r = rgb[0].clamp(0.0, 1.0);
    let g = rgb[1].clamp(0.0, 1.0);
    let b = rgb[2].clamp(0.0, 1.0);

    let max = max3(r, g, b);
    let min = min3(r, g, b);

    let l = (max + min) / 2.0;

    if max == min {
        return [0.0, 0.0, l];
    }

    let s = if l <= 0.5 {
        (max - min) / (max + min)
    } else {
        (max - min) / (2.0 - max - min)
    };

    let mut delta = max - min;
    if delta == 0.0 {
        delta = 1.0;
    }

    let mut h = if r == max {
        (g - b) / delta
    } else if g == max {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    h /= 6.0;
    if h < 0.0 {
        h += 1.0;
    }

    [h, s, l]
}

fn hsl_value(n1: f32, n2: f32, mut hue: f32) -> f32 {
    if hue > 6.0 {
        hue -= 6.0;
    } else if hue < 0.0 {
        hue += 6.0;
    }

    if hue < 1.0 {
        n1 + (n2 - n1) * hue
    } else if hue < 3.0 {
        n2
    } else if hue < 4.0 {
        n1 + (n2 - n1) * (4.0 - hue)
    } else {
        n1
    }
}

/// Convert HSL to RGB.
pub fn hsl_to_rgb(hsl: [f32; 3]) -> [f32; 3] {
    let h = hsl[0] - hsl[0].floor();
    let s = hsl[1].clamp(0.0, 1.0);
    let l = hsl[2].clamp(0.0, 1.0);

    if s == 0.0 {
        return [l, l, l];
    }

    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;

    [
        hsl_value(m1, m2, h * 6.0 + 2.0),
        hsl_value(m1, m2, h * 6.0),
        hsl_value(m1, m2, h * 6.0 - 2.0),
    ]
}

/// Convert RGB to HCY (hue, relative chroma, luma).
///
/// Luma uses the [`HCY_LUMA`] coefficients; chroma is measured relative to
/// the gamut envelope so that fully saturated colors report 1 regardless of
/// hue.
pub fn rgb_to_hcy(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;

    let y = HCY_LUMA[0] * r + HCY_LUMA[1] * g + HCY_LUMA[2] * b;

    let p = max3(r, g, b);
    let n = min3(r, g, b);
    let d = p - n;

    let mut h = if n == p {
        0.0
    } else if p == r {
        let mut h = (g - b) / d;
        if h < 0.0 {
            h += 6.0;
        }
        h
    } else if p == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    h /= 6.0;
    h %= 1.0;

    let c = if r == g && g == b {
        0.0
    } else {
        ((y - n) / y).max((p - y) / (1.0 - y))
    };

    [h, c, y]
}

/// Convert HCY to RGB.
pub fn hcy_to_rgb(hcy: [f32; 3]) -> [f32; 3] {
    let mut h = hcy[0] - hcy[0].floor();
    let c = hcy[1].clamp(0.0, 1.0);
    let y = hcy[2].clamp(0.0, 1.0);

    if c == 0.0 {
        return [y, y, y];
    }

    h %= 1.0;
    h *= 6.0;

    let (th, tm) = if h < 1.0 {
        (h, HCY_LUMA[0] + HCY_LUMA[1] * h)
    } else if h < 2.0 {
        (2.0 - h, HCY_LUMA[1] + HCY_LUMA[0] * (2.0 - h))
    } else if h < 3.0 {
        (h - 2.0, HCY_LUMA[1] + HCY_LUMA[2] * (h - 2.0))
    } else if h < 4.0 {
        (4.0 - h, HCY_LUMA[2] + HCY_LUMA[1] * (4.0 - h))
    } else if h < 5.0 {
        (h - 4.0, HCY_LUMA[2] + HCY_LUMA[0] * (h - 4.0))
    } else {
        (6.0 - h, HCY_LUMA[0] + HCY_LUMA[2] * (6.0 - h))
    };

    // RGB components in sorted order, then mapped back by hue sector
    let (p, o, n) = if tm >= y {
        (
            y + y * c * (1.0 - tm) / tm,
            y + y * c * (th - tm) / tm,
            y - y * c,
        )
    } else {
        (
            y + (1.0 - y) * c,
            y + (1.0 - y) * c * (th - tm) / (1.0 - tm),
            y - (1.0 - y) * c * tm / (1.0 - tm),
        )
    };

    if h < 1.0 {
        [p, o, n]
    } else if h < 2.0 {
        [o, p, n]
    } else if h < 3.0 {
        [n, p, o]
    } else if h < 4.0 {
        [n, o, p]
    } else if h < 5.0 {
        [o, n, p]
    } else {
        [p, n, o]
    }
}

/// Convert RGB to RYB (red, yellow, blue painter's primaries).
pub fn rgb_to_ryb(rgb: [f32; 3]) -> [f32; 3] {
    let [mut r, mut g, mut b] = rgb;

    // Remove the white from the color
    let white = min3(r, g, b);
    r -= white;
    g -= white;
    b -= white;

    let max_green = max3(r, g, b);

    // Get the yellow out of the red+green
    let mut y = r.min(g);
    r -= y;
    g -= y;

    if b > 0.0 && g > 0.0 {
        b /= 2.0;
        g /= 2.0;
    }

    // Redistribute the remaining green
    y += g;
    b += g;

    let max_yellow = max3(r, y, b);
    if max_yellow > 0.0 {
        let n = max_green / max_yellow;
        r *= n;
        y *= n;
        b *= n;
    }

    r += white;
    y += white;
    b += white;

    [r.clamp(0.0, 1.0), y.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// Convert RYB back to RGB.
pub fn ryb_to_rgb(ryb: [f32; 3]) -> [f32; 3] {
    let [mut r, mut y, mut b] = ryb;

    let white = min3(r, y, b);
    r -= white;
    y -= white;
    b -= white;

    let max_yellow = max3(r, y, b);

    // Get the green out of the yellow and blue
    let mut g = y.min(b);
    y -= g;
    b -= g;

    if b > 0.0 && g > 0.0 {
        b *= 2.0;
        g *= 2.0;
    }

    r += y;
    g += y;

    let max_green = max3(r, g, b);
    if max_green > 0.0 {
        let n = max_yellow / max_green;
        r *= n;
        g *= n;
        b *= n;
    }

    r += white;
    g += white;
    b += white;

    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// Decode a gamma-companded value to linear light with a straight power
/// curve. `gamma` is clamped to at least 1.
#[inline]
pub fn srgb_to_linear(c: f32, gamma: f32) -> f32 {
    c.max(0.0).powf(gamma.max(1.0))
}

/// Encode linear light back to the gamma-companded representation.
#[inline]
pub fn linear_to_srgb(c: f32, gamma: f32) -> f32 {
    c.max(0.0).powf(1.0 / gamma.max(1.0))
}

/// [`srgb_to_linear`] over all three channels.
#[inline]
pub fn srgb_to_linear_rgb(rgb: [f32; 3], gamma: f32) -> [f32; 3] {
    [
        srgb_to_linear(rgb[0], gamma),
        srgb_to_linear(rgb[1], gamma),
        srgb_to_linear(rgb[2], gamma),
    ]
}

/// [`linear_to_srgb`] over all three channels.
#[inline]
pub fn linear_to_srgb_rgb(rgb: [f32; 3], gamma: f32) -> [f32; 3] {
    [
        linear_to_srgb(rgb[0], gamma),
        linear_to_srgb(rgb[1], gamma),
        linear_to_srgb(rgb[2], gamma),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_rgb_eq(a: [f32; 3], b: [f32; 3], eps: f32) {
        for i in 0..3 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = eps);
        }
    }

    #[test]
    fn test_hsv_round_trip() {
        for rgb in [
            [1.0, 0.0, 0.0],
            [0.2, 0.6, 0.9],
            [0.5, 0.5, 0.1],
            [0.0, 0.0, 1.0],
        ] {
            let back = hsv_to_rgb(rgb_to_hsv(rgb));
            assert_rgb_eq(back, rgb, 1e-5);
        }
    }

    #[test]
    fn test_hsl_round_trip() {
        for rgb in [[1.0, 0.0, 0.0], [0.2, 0.6, 0.9], [0.7, 0.3, 0.3]] {
            let back = hsl_to_rgb(rgb_to_hsl(rgb));
            assert_rgb_eq(back, rgb, 1e-5);
        }
    }

    #[test]
    fn test_achromatic_hue_is_free() {
        let hsv = rgb_to_hsv([0.5, 0.5, 0.5]);
        assert_eq!(hsv[0], 0.0);
        assert_eq!(hsv[1], 0.0);
        assert_abs_diff_eq!(hsv[2], 0.5);
    }

    #[test]
    fn test_hcy_round_trip() {
        for rgb in [[0.9, 0.1, 0.1], [0.1, 0.8, 0.4], [0.3, 0.3, 0.9]] {
            let back = hcy_to_rgb(rgb_to_hcy(rgb));
            assert_rgb_eq(back, rgb, 1e-4);
        }
    }

    #[test]
    fn test_hcy_luma() {
        let hcy = rgb_to_hcy([1.0, 1.0, 1.0]);
        assert_abs_diff_eq!(hcy[2], 1.0, epsilon = 1e-6);
        let hcy = rgb_to_hcy([0.0, 1.0, 0.0]);
        assert_abs_diff_eq!(hcy[2], 0.59, epsilon = 1e-6);
    }

    #[test]
    fn test_ryb_primaries() {
        // Red and blue are shared primaries, yellow maps to RGB yellow
        assert_rgb_eq(ryb_to_rgb([1.0, 0.0, 0.0]), [1.0, 0.0, 0.0], 1e-6);
        assert_rgb_eq(ryb_to_rgb([0.0, 1.0, 0.0]), [1.0, 1.0, 0.0], 1e-6);
        assert_rgb_eq(rgb_to_ryb([1.0, 1.0, 0.0]), [0.0, 1.0, 0.0], 1e-6);
    }

    #[test]
    fn test_gamma_round_trip() {
        for c in [0.0, 0.25, 0.5, 1.0] {
            assert_abs_diff_eq!(
                linear_to_srgb(srgb_to_linear(c, 2.4), 2.4),
                c,
                epsilon = 1e-6
            );
        }
        // gamma below 1 is treated as 1 (identity)
        assert_abs_diff_eq!(srgb_to_linear(0.3, 0.5), 0.3, epsilon = 1e-6);
    }
}
