//! Spheres

use rtcore::geometry::*;
use std::sync::Arc;

/// 2π
const TWO_PI: Float = 2.0 * PI;

/// A sphere in world space.
#[derive(Clone, Debug)]
pub struct Sphere {
    /// Surface name.
    pub name: Arc<str>,

    /// Modifier name as written in the scene file.
    pub modifier: Arc<str>,

    /// Index of the material the modifier resolves to.
    pub material: usize,

    /// Center.
    pub center: Point3,

    /// Radius.
    pub radius: Float,
}

/// Geometric details of a ray-sphere intersection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphereHit {
    /// Ray parameter at the hit.
    pub t: Float,

    /// Hit point.
    pub point: Point3,

    /// Outward unit normal.
    pub normal: Vector3,

    /// Parametric (u, v) of the hit.
    pub uv: [Float; 2],
}

impl Sphere {
    /// Returns the nearest intersection in (FTINY, t_max), if any.
    ///
    /// * `o`     - Ray origin.
    /// * `d`     - Unit ray direction.
    /// * `t_max` - Maximum ray parameter.
    pub fn intersect(&self, o: &Point3, d: &Vector3, t_max: Float) -> Option<SphereHit> {
        let oc = *o - self.center;

        // Compute quadratic sphere coefficients.
        let a = d.dot(d);
        let b = 2.0 * oc.dot(d);
        let c = oc.dot(&oc) - self.radius * self.radius;

        let (t0, t1) = solve_quadratic(a, b, c)?;
        if t0 >= t_max || t1 <= FTINY {
            return None;
        }
        let t = if t0 > FTINY { t0 } else { t1 };
        if t >= t_max {
            return None;
        }

        // Compute hit position on the surface.
        let offset = o.along(d, t) - self.center;
        let local = offset * (self.radius / offset.length());
        let point = self.center + local;
        let normal = local / self.radius;

        // Find parametric representation of sphere hit.
        let mut phi = local.y.atan2(local.x);
        if phi < 0.0 {
            phi += TWO_PI;
        }
        let theta = (local.z / self.radius).clamp(-1.0, 1.0).acos();

        Some(SphereHit {
            t,
            point,
            normal,
            uv: [phi / TWO_PI, theta / PI],
        })
    }

    /// Returns the distance from the world origin to the farthest point of
    /// the sphere.
    pub fn reach(&self) -> Float {
        self.center.length() + self.radius
    }
}

/// Solves `a t^2 + b t + c = 0`, returning the roots in ascending order.
///
/// * `a` - Quadratic coefficient.
/// * `b` - Linear coefficient.
/// * `c` - Constant.
fn solve_quadratic(a: Float, b: Float, c: Float) -> Option<(Float, Float)> {
    let discrim = b * b - 4.0 * a * c;
    if discrim < 0.0 || a == 0.0 {
        return None;
    }
    let root = discrim.sqrt();

    // Numerically stable form.
    let q = if b < 0.0 { -0.5 * (b - root) } else { -0.5 * (b + root) };
    let t0 = q / a;
    let t1 = if q != 0.0 { c / q } else { t0 };
    Some(if t0 > t1 { (t1, t0) } else { (t0, t1) })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::*;

    fn unit_sphere() -> Sphere {
        Sphere {
            name: Arc::from("ball"),
            modifier: Arc::from("white"),
            material: 0,
            center: Point3::new(0.0, 0.0, 0.0),
            radius: 1.0,
        }
    }

    #[test]
    fn hit_from_outside() {
        let s = unit_sphere();
        let h = s
            .intersect(&Point3::new(0.0, 0.0, 5.0), &Vector3::new(0.0, 0.0, -1.0), FHUGE)
            .unwrap();
        assert!(approx_eq!(f64, h.t, 4.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, h.normal.z, 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, h.uv[1], 0.0, epsilon = 1e-6));
    }

    #[test]
    fn hit_from_inside_uses_far_root() {
        let s = unit_sphere();
        let h = s.intersect(&Point3::ZERO, &Vector3::new(1.0, 0.0, 0.0), FHUGE).unwrap();
        assert!(approx_eq!(f64, h.t, 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, h.normal.x, 1.0, epsilon = 1e-9));
    }

    #[test]
    fn misses_and_limits() {
        let s = unit_sphere();
        let o = Point3::new(0.0, 0.0, 5.0);
        assert!(s.intersect(&o, &Vector3::new(0.0, 1.0, 0.0), FHUGE).is_none());
        assert!(s.intersect(&o, &Vector3::new(0.0, 0.0, 1.0), FHUGE).is_none());
        assert!(s.intersect(&o, &Vector3::new(0.0, 0.0, -1.0), 3.5).is_none());
    }

    #[test]
    fn reach() {
        let mut s = unit_sphere();
        s.center = Point3::new(3.0, 4.0, 0.0);
        assert_eq!(s.reach(), 6.0);
    }
}
