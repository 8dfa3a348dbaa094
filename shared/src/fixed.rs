//! Integer-only math used by the simulation
//!
//! Both peers must compute identical state from identical commands, so the
//! engine never touches floating point. Distances go through [`isqrt`] and
//! directions through a whole-degree sine table.

/// Fixed-point units per screen unit
pub const FIXED_SCALE: i32 = 1000;

/// Scale of the values returned by [`sin_deg`] and [`cos_deg`]
pub const TRIG_SCALE: i32 = 10_000;

/// sin(d) * 10_000 rounded to nearest, for d in 0..=90 degrees
const SIN_TABLE: [i32; 91] = [
    0, 175, 349, 523, 698, 872, 1045, 1219, 1392, 1564, //
    1736, 1908, 2079, 2250, 2419, 2588, 2756, 2924, 3090, 3256, //
    3420, 3584, 3746, 3907, 4067, 4226, 4384, 4540, 4695, 4848, //
    5000, 5150, 5299, 5446, 5592, 5736, 5878, 6018, 6157, 6293, //
    6428, 6561, 6691, 6820, 6947, 7071, 7193, 7314, 7431, 7547, //
    7660, 7771, 7880, 7986, 8090, 8192, 8290, 8387, 8480, 8572, //
    8660, 8746, 8829, 8910, 8988, 9063, 9135, 9205, 9272, 9336, //
    9397, 9455, 9511, 9563, 9613, 9659, 9703, 9744, 9781, 9816, //
    9848, 9877, 9903, 9925, 9945, 9962, 9976, 9986, 9994, 9998, //
    10000,
];

/// Converts screen units to fixed-point units
pub const fn to_fixed(screen: i32) -> i32 {
    screen * FIXED_SCALE
}

/// Floor of the square root of `n`
///
/// Newton iteration on integers; the result `r` always satisfies
/// `r * r <= n < (r + 1) * (r + 1)`.
pub fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }

    // Initial guess above the root: 2^ceil(bits / 2)
    let bits = 64 - n.leading_zeros();
    let mut x = 1u64 << bits.div_ceil(2);

    loop {
        let y = (x + n / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}

/// Euclidean length of an integer vector, truncated
pub fn distance(dx: i64, dy: i64) -> i64 {
    let squared = (dx as i128 * dx as i128 + dy as i128 * dy as i128).min(u64::MAX as i128);
    isqrt(squared as u64) as i64
}

/// Wraps any integer angle into [0, 360)
pub fn wrap_degrees(degrees: i32) -> i32 {
    degrees.rem_euclid(360)
}

/// Sine of a whole-degree angle, scaled by [`TRIG_SCALE`]
pub fn sin_deg(degrees: i32) -> i32 {
    let d = wrap_degrees(degrees) as usize;
    match d {
        0..=90 => SIN_TABLE[d],
        91..=180 => SIN_TABLE[180 - d],
        181..=270 => -SIN_TABLE[d - 180],
        _ => -SIN_TABLE[360 - d],
    }
}

/// Cosine of a whole-degree angle, scaled by [`TRIG_SCALE`]
pub fn cos_deg(degrees: i32) -> i32 {
    sin_deg(degrees + 90)
}

/// Decomposes `magnitude` along `degrees` into integer (x, y) components
///
/// Multiplies before dividing so small magnitudes keep their fraction.
pub fn polar_to_cartesian(magnitude: i32, degrees: i32) -> (i32, i32) {
    let x = magnitude as i64 * cos_deg(degrees) as i64 / TRIG_SCALE as i64;
    let y = magnitude as i64 * sin_deg(degrees) as i64 / TRIG_SCALE as i64;
    (x as i32, y as i32)
}
