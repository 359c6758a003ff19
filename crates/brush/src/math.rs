//! Small numeric helpers shared by the dynamics and the color mixer.

use rand::Rng;

/// Fraction still left after `t` seconds of exponential decay with time
/// constant `time_constant`. Degenerate constants decay instantly.
pub(crate) fn exp_decay(time_constant: f32, t: f32) -> f32 {
    if time_constant <= 0.001 {
        return 0.0;
    }
    (-t / time_constant).exp()
}

/// Arithmetic modulo: always in [0, n) for positive n, unlike `%` on
/// negative dividends.
#[inline]
pub(crate) fn mod_arith(a: f32, n: f32) -> f32 {
    a - n * (a / n).floor()
}

/// Smallest signed difference between two angles in degrees, in [-180, 180].
pub(crate) fn smallest_angular_difference(angle_a: f32, angle_b: f32) -> f32 {
    let mut a = angle_b - angle_a;
    a = mod_arith(a + 180.0, 360.0) - 180.0;
    a += if a > 180.0 {
        -360.0
    } else if a < -180.0 {
        360.0
    } else {
        0.0
    };
    a
}

/// Approximate standard normal sample from four uniform draws.
pub(crate) fn rand_gauss(rng: &mut impl Rng) -> f32 {
    let sum: f32 =
        rng.random::<f32>() + rng.random::<f32>() + rng.random::<f32>() + rng.random::<f32>();
    sum * 1.73205080757 - 3.46410161514
}
