//! Common sampling functions.

use crate::geometry::*;
use crate::rng::*;

/// PI/2 (π/2)
const PI_OVER_TWO: Float = PI * 0.5;

/// PI/4 (π/4)
const PI_OVER_FOUR: Float = PI * 0.25;

/// Generate jittered 2D samples over the unit square, `nx * ny` of them.
///
/// * `rng`    - Random number generator.
/// * `nx`     - Number of samples in x-direction.
/// * `ny`     - Number of samples in y-direction.
pub fn stratified_sample_2d(rng: &mut RNG, nx: usize, ny: usize) -> Vec<(Float, Float)> {
    let dx = 1.0 / nx as Float;
    let dy = 1.0 / ny as Float;

    let mut samples = Vec::with_capacity(nx * ny);
    for y in 0..ny {
        for x in 0..nx {
            let jx = rng.uniform_float();
            let jy = rng.uniform_float();
            samples.push((
                ((x as Float + jx) * dx).min(ONE_MINUS_EPSILON),
                ((y as Float + jy) * dy).min(ONE_MINUS_EPSILON),
            ));
        }
    }
    samples
}

/// Sample a point on a unit disk by mapping from a unit square to the unit
/// circle. The concentric mapping takes points in [-1, 1]^2 to unit disk by
/// uniformly mapping concentric squares to concentric circles.
///
/// * `u` - The random sample point.
pub fn concentric_sample_disk(u: (Float, Float)) -> (Float, Float) {
    // Map uniform random numbers to [-1,1]^2.
    let ox = 2.0 * u.0 - 1.0;
    let oy = 2.0 * u.1 - 1.0;

    // Handle degeneracy at the origin.
    if ox == 0.0 && oy == 0.0 {
        return (0.0, 0.0);
    }

    // Apply concentric mapping to point
    let (r, theta) = if ox.abs() > oy.abs() {
        (ox, PI_OVER_FOUR * (oy / ox))
    } else {
        (oy, PI_OVER_TWO - PI_OVER_FOUR * (ox / oy))
    };

    (r * theta.cos(), r * theta.sin())
}

/// Sample a direction on the hemisphere around `n` using cosine-weighted
/// sampling.
///
/// * `n` - Unit normal of the hemisphere.
/// * `u` - The random sample point.
pub fn cosine_sample_hemisphere(n: &Vector3, u: (Float, Float)) -> Vector3 {
    let (dx, dy) = concentric_sample_disk(u);
    let z = (1.0 - dx * dx - dy * dy).max(0.0).sqrt();
    let (s, t) = coordinate_system(n);
    (s * dx + t * dy + *n * z).normalize()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
