//! RGB colour values and packed-exponent encoding.

use crate::geometry::Float;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Index, Mul, Sub};

/// Excess used for the shared exponent of a packed colour.
pub const COLXS: i32 = 128;

/// Red, green and blue radiometric values.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rgb {
    c: [Float; 3],
}

impl Rgb {
    /// Black.
    pub const BLACK: Self = Self { c: [0.0; 3] };

    /// Creates a new colour.
    ///
    /// * `r` - Red.
    /// * `g` - Green.
    /// * `b` - Blue.
    pub const fn new(r: Float, g: Float, b: Float) -> Self {
        Self { c: [r, g, b] }
    }

    /// Creates a grey colour.
    ///
    /// * `v` - Value for every component.
    pub const fn grey(v: Float) -> Self {
        Self { c: [v; 3] }
    }

    /// Returns the red component.
    pub fn r(&self) -> Float {
        self.c[0]
    }

    /// Returns the green component.
    pub fn g(&self) -> Float {
        self.c[1]
    }

    /// Returns the blue component.
    pub fn b(&self) -> Float {
        self.c[2]
    }

    /// Returns the components as an array.
    pub fn to_array(&self) -> [Float; 3] {
        self.c
    }

    /// Returns the largest component.
    pub fn max_component(&self) -> Float {
        self.c[0].max(self.c[1]).max(self.c[2])
    }

    /// Returns true if every component is zero.
    pub fn is_black(&self) -> bool {
        self.c.iter().all(|&v| v == 0.0)
    }

    /// Returns true if any component is not a number.
    pub fn has_nans(&self) -> bool {
        self.c.iter().any(|v| v.is_nan())
    }

    /// Packs the colour into four bytes with a shared exponent (RGBE).
    /// Negative components are clamped to zero.
    pub fn to_rgbe(&self) -> [u8; 4] {
        let [r, g, b] = self.c.map(|v| v.max(0.0));
        let d = r.max(g).max(b);
        if d <= 1e-32 {
            return [0; 4];
        }
        let (mantissa, e) = frexp(d);
        let scale = mantissa * 255.9999 / d;
        [
            (r * scale) as u8,
            (g * scale) as u8,
            (b * scale) as u8,
            (e + COLXS) as u8,
        ]
    }

    /// Unpacks a colour from RGBE bytes.
    ///
    /// * `rgbe` - Packed colour.
    pub fn from_rgbe(rgbe: [u8; 4]) -> Self {
        if rgbe[3] == 0 {
            return Self::BLACK;
        }
        let f = (2.0 as Float).powi(rgbe[3] as i32 - (COLXS + 8));
        Self::new(
            (rgbe[0] as Float + 0.5) * f,
            (rgbe[1] as Float + 0.5) * f,
            (rgbe[2] as Float + 0.5) * f,
        )
    }
}

/// Splits a positive finite number into a mantissa in [0.5, 1) and a power
/// of two.
///
/// * `x` - The number.
fn frexp(x: Float) -> (Float, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    if exp == 0 {
        // Subnormal; scale into the normal range first.
        let (m, e) = frexp(x * (2.0 as Float).powi(54));
        return (m, e - 54);
    }
    let mantissa = Float::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, exp - 1022)
}

impl Index<usize> for Rgb {
    type Output = Float;

    fn index(&self, i: usize) -> &Float {
        &self.c[i]
    }
}

impl Add for Rgb {
    type Output = Self;

    fn add(self, o: Self) -> Self {
        Self::new(self.c[0] + o.c[0], self.c[1] + o.c[1], self.c[2] + o.c[2])
    }
}

impl AddAssign for Rgb {
    fn add_assign(&mut self, o: Self) {
        for i in 0..3 {
            self.c[i] += o.c[i];
        }
    }
}

impl Sub for Rgb {
    type Output = Self;

    fn sub(self, o: Self) -> Self {
        Self::new(self.c[0] - o.c[0], self.c[1] - o.c[1], self.c[2] - o.c[2])
    }
}

impl Mul for Rgb {
    type Output = Self;

    fn mul(self, o: Self) -> Self {
        Self::new(self.c[0] * o.c[0], self.c[1] * o.c[1], self.c[2] * o.c[2])
    }
}

impl Mul<Float> for Rgb {
    type Output = Self;

    fn mul(self, f: Float) -> Self {
        Self::new(self.c[0] * f, self.c[1] * f, self.c[2] * f)
    }
}

impl Div<Float> for Rgb {
    type Output = Self;

    fn div(self, f: Float) -> Self {
        Self::new(self.c[0] / f, self.c[1] / f, self.c[2] / f)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.c[0], self.c[1], self.c[2])
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn frexp_matches_definition() {
        for x in [1.0, 0.5, 3.0, 1e-300, 1e300, 255.0, 5e-324] {
            let (m, e) = frexp(x);
            assert!((0.5..1.0).contains(&m), "{x} -> {m}");
            assert_eq!(m * (2.0 as Float).powi(e), x);
        }
    }

    #[test]
    fn black_packs_to_zero() {
        assert_eq!(Rgb::BLACK.to_rgbe(), [0, 0, 0, 0]);
        assert_eq!(Rgb::new(-1.0, 0.0, 0.0).to_rgbe(), [0, 0, 0, 0]);
        assert_eq!(Rgb::from_rgbe([0, 0, 0, 0]), Rgb::BLACK);
    }

    #[test]
    fn unit_grey() {
        // 1.0 = 0.5 * 2^1 -> mantissa byte 127, exponent 129.
        assert_eq!(Rgb::grey(1.0).to_rgbe(), [127, 127, 127, 129]);
    }

    proptest! {
        #[test]
        fn rgbe_round_trip_within_precision(
            r in 1e-3..1e3f64, g in 1e-3..1e3f64, b in 1e-3..1e3f64
        ) {
            let c = Rgb::new(r, g, b);
            let d = Rgb::from_rgbe(c.to_rgbe());
            let max = c.max_component();
            // One mantissa step of the largest component.
            let tol = max / 128.0;
            for i in 0..3 {
                prop_assert!((c[i] - d[i]).abs() <= tol);
            }
        }
    }
}
