//! Ambient Records

use ordered_float::OrderedFloat;
use rtcore::color::Rgb;
use rtcore::geometry::*;

/// Identifies one cached irradiance estimate: a cell of the quantized scene
/// space and the dominant axis and sign of the surface normal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AmbientKey {
    /// Quantized position.
    pub cell: [i32; 3],

    /// Dominant normal axis times 2, plus 1 if the normal points down that
    /// axis.
    pub face: u8,
}

impl AmbientKey {
    /// Returns the key for a surface point.
    ///
    /// * `p`         - Surface point.
    /// * `n`         - Surface normal.
    /// * `cell_size` - Edge length of a cell.
    pub fn new(p: &Point3, n: &Vector3, cell_size: Float) -> Self {
        let q = |v: Float| (v / cell_size).floor() as i32;
        let abs = [n.x.abs(), n.y.abs(), n.z.abs()];
        let axis = if abs[0] >= abs[1] && abs[0] >= abs[2] {
            0
        } else if abs[1] >= abs[2] {
            1
        } else {
            2
        };
        Self {
            cell: [q(p.x), q(p.y), q(p.z)],
            face: (axis * 2 + (n[axis] < 0.0) as usize) as u8,
        }
    }

    /// Returns the bytes used for hashing and storage.
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut b = [0_u8; 13];
        for (i, c) in self.cell.iter().enumerate() {
            b[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
        }
        b[12] = self.face;
        b
    }
}

/// A cached irradiance estimate and the number of samples behind it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AmbientRecord {
    /// Irradiance estimate.
    pub irradiance: Rgb,

    /// Number of samples averaged into `irradiance`.
    pub samples: u32,
}

impl AmbientRecord {
    /// Creates a new `AmbientRecord`.
    ///
    /// * `irradiance` - Irradiance estimate.
    /// * `samples`    - Number of samples.
    pub fn new(irradiance: Rgb, samples: u32) -> Self {
        Self { irradiance, samples }
    }

    /// Returns the record with a new estimate averaged in, weighted by sample
    /// counts.
    ///
    /// * `estimate` - The new estimate.
    /// * `samples`  - Samples behind `estimate`.
    pub fn refine(&self, estimate: Rgb, samples: u32) -> Self {
        let total = self.samples.saturating_add(samples);
        if total == 0 {
            return *self;
        }
        let irradiance =
            (self.irradiance * self.samples as Float + estimate * samples as Float) / total as Float;
        Self::new(irradiance, total)
    }

    /// Returns the more confident of two records: more samples wins, ties go
    /// to the larger irradiance in component order. This is a total order,
    /// so joining is idempotent, commutative and associative.
    ///
    /// * `a` - A record.
    /// * `b` - Another record.
    pub fn join(a: Self, b: Self) -> Self {
        if b.rank() > a.rank() {
            b
        } else {
            a
        }
    }

    fn rank(&self) -> (u32, [OrderedFloat<Float>; 3]) {
        (self.samples, self.irradiance.to_array().map(OrderedFloat))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
