//! Ray tracer over a sphere scene.

use super::scene::*;
use ambient::{AmbientCache, AmbientKey};
use rtcore::color::Rgb;
use rtcore::error::{Result, RtError};
use rtcore::geometry::*;
use rtcore::ray::*;
use rtcore::rng::{mix_seed, RNG};
use rtcore::sampling::{cosine_sample_hemisphere, stratified_sample_2d};
use std::sync::Arc;

/// Cached records stop being refined once they hold this many times the
/// ambient divisions in samples.
const AMBIENT_SATURATION: u32 = 16;

/// Rendering parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct TracerParams {
    /// Report irradiance at the ray origin, the direction being the surface
    /// normal.
    pub irradiance: bool,

    /// Limit each primary ray to the length of its direction vector.
    pub limit_distance: bool,

    /// Number of diffuse bounces computed through the ambient cache.
    pub ambient_bounces: u32,

    /// Hemisphere samples per ambient evaluation.
    pub ambient_divisions: u32,

    /// Ambient cells across the scene diameter.
    pub ambient_resolution: u32,

    /// Ambient radiance used past the last bounce.
    pub ambient_value: Rgb,

    /// Maximum reflection depth; 0 or less means the weight limit alone.
    pub reflection_limit: i32,

    /// Rays with less weight are not spawned.
    pub weight_limit: Float,

    /// Base seed for sampling.
    pub seed: u64,
}

impl Default for TracerParams {
    fn default() -> Self {
        Self {
            irradiance: false,
            limit_distance: false,
            ambient_bounces: 0,
            ambient_divisions: 128,
            ambient_resolution: 32,
            ambient_value: Rgb::BLACK,
            reflection_limit: 8,
            weight_limit: 2e-3,
            seed: 0,
        }
    }
}

/// Where a ray sits in the ray tree.
#[derive(Copy, Clone, Debug)]
struct RayState {
    /// Length of the parent chain.
    depth: usize,

    /// Diffuse bounces so far.
    ambient_level: u32,

    /// Weight relative to the primary ray.
    weight: Float,

    /// Product of reflectances from the primary ray.
    coefficient: Rgb,
}

impl RayState {
    const PRIMARY: Self = Self {
        depth: 0,
        ambient_level: 0,
        weight: 1.0,
        coefficient: Rgb::grey(1.0),
    };

    fn child(&self, reflectance: Rgb, ambient: bool) -> Self {
        Self {
            depth: self.depth + 1,
            ambient_level: self.ambient_level + ambient as u32,
            weight: self.weight * reflectance.max_component(),
            coefficient: self.coefficient * reflectance,
        }
    }
}

/// Evaluates rays against a `Scene`, sharing ambient estimates through an
/// `AmbientCache`.
pub struct SceneTracer {
    /// The scene.
    scene: Arc<Scene>,

    /// Parameters.
    params: TracerParams,

    /// Ambient estimates.
    ambient: Arc<AmbientCache>,

    /// Ambient cell edge length.
    cell_size: Float,
}

impl SceneTracer {
    /// Creates a new `SceneTracer`.
    ///
    /// * `scene`   - The scene.
    /// * `params`  - Rendering parameters.
    /// * `ambient` - Ambient cache.
    pub fn new(scene: Arc<Scene>, params: TracerParams, ambient: Arc<AmbientCache>) -> Self {
        let cell_size = 2.0 * scene.extent() / params.ambient_resolution.max(1) as Float;
        Self {
            scene,
            params,
            ambient,
            cell_size,
        }
    }

    /// Returns the ambient cache.
    pub fn ambient(&self) -> &Arc<AmbientCache> {
        &self.ambient
    }

    /// Returns the parameters.
    pub fn params(&self) -> &TracerParams {
        &self.params
    }

    /// Computes the radiance arriving along a ray.
    ///
    /// * `o`        - Origin.
    /// * `d`        - Unit direction.
    /// * `t_max`    - Maximum distance.
    /// * `st`       - Position in the ray tree.
    /// * `observer` - Receives events for child rays.
    fn radiance(
        &self,
        o: &Point3,
        d: &Vector3,
        t_max: Float,
        st: RayState,
        observer: &mut dyn TraceObserver,
    ) -> RayRecord {
        let mut rec = RayRecord::miss(&RayQuery::new(*o, *d));
        rec.weight = st.weight;
        rec.coefficient = st.coefficient;

        let Some(hit) = self.scene.intersect(o, d, t_max) else {
            if t_max < FHUGE {
                // Clipped by the distance limit.
                rec.length = t_max;
                rec.unmirror_dist = t_max;
            } else {
                rec.value = self.scene.sky;
            }
            return rec;
        };

        let sphere = &self.scene.spheres[hit.sphere];
        let material = self.scene.material_of(sphere);
        let g = hit.geom;
        let facing = if g.normal.dot(d) > 0.0 { -g.normal } else { g.normal };

        rec.length = g.t;
        rec.unmirror_dist = g.t;
        rec.point = g.point;
        rec.normal = facing;
        rec.unperturbed_normal = g.normal;
        rec.uv = g.uv;
        rec.hit = Some(HitInfo {
            surface: Arc::clone(&sphere.name),
            modifier: Arc::clone(&sphere.modifier),
            material: Arc::clone(&material.name),
        });

        match material.kind {
            MaterialKind::Light => rec.value = material.color,
            MaterialKind::Plastic => {
                let e = self.irradiance(&g.point, &facing, st.child(material.color, true), observer);
                rec.value = material.color * e / PI;
            }
            MaterialKind::Mirror => {
                let child_st = st.child(material.color, false);
                let depth_ok =
                    self.params.reflection_limit <= 0 || child_st.depth <= self.params.reflection_limit as usize;
                if depth_ok && child_st.weight >= self.params.weight_limit {
                    let r = *d - facing * (2.0 * d.dot(&facing));
                    let child = self.radiance(&g.point, &r, FHUGE, child_st, observer);
                    rec.value = material.color * child.value;
                    rec.mirror = rec.value;
                    rec.mirror_dist = g.t + child.effective_dist();
                    emit(observer, child_st.depth, child);
                }
            }
        }
        rec
    }

    /// Computes the irradiance at a surface point, refining and reusing the
    /// ambient cache.
    ///
    /// * `p`        - Surface point.
    /// * `n`        - Unit normal on the side being lit.
    /// * `st`       - State for the sample rays.
    /// * `observer` - Receives events for the sample rays.
    fn irradiance(&self, p: &Point3, n: &Vector3, st: RayState, observer: &mut dyn TraceObserver) -> Rgb {
        let default = self.params.ambient_value * PI;
        let divisions = self.params.ambient_divisions;
        if st.ambient_level > self.params.ambient_bounces || divisions == 0 || st.weight < self.params.weight_limit {
            return default;
        }

        let key = AmbientKey::new(p, n, self.cell_size);
        let prior = self.ambient.lookup(&key);
        if let Some(rec) = prior {
            if rec.samples >= divisions.saturating_mul(AMBIENT_SATURATION) {
                return rec.irradiance;
            }
        }
        let prior_samples = prior.map_or(0, |r| r.samples);

        let mut rng = RNG::new(mix_seed(&[
            self.params.seed,
            key.cell[0] as u32 as u64,
            key.cell[1] as u32 as u64,
            key.cell[2] as u32 as u64,
            key.face as u64,
            prior_samples as u64,
        ]));
        let nx = ((divisions as Float).sqrt() as usize).max(1);
        let ny = (divisions as usize).div_ceil(nx);
        let samples = stratified_sample_2d(&mut rng, nx, ny);
        let share = Rgb::grey(1.0 / samples.len() as Float);

        let mut sum = Rgb::BLACK;
        for u in samples.iter() {
            let dir = cosine_sample_hemisphere(n, *u);
            let mut child_st = st;
            child_st.coefficient = st.coefficient * share;
            let child = self.radiance(p, &dir, FHUGE, child_st, observer);
            sum += child.value;
            emit(observer, child_st.depth, child);
        }
        let estimate = sum * (PI / samples.len() as Float);
        self.ambient.refine(key, estimate, samples.len() as u32).irradiance
    }
}

/// Reports a finished child ray.
fn emit(observer: &mut dyn TraceObserver, depth: usize, record: RayRecord) {
    if observer.wants_events() {
        observer.on_ray(TraceEvent { depth, record });
    }
}

impl RayTracer for SceneTracer {
    fn trace(&self, query: &RayQuery, _seq: u64, observer: &mut dyn TraceObserver) -> Result<RayRecord> {
        let len = query.direction.length();
        if len == 0.0 || !len.is_finite() || !query.origin.length().is_finite() {
            return Err(RtError::Consistency(format!(
                "cannot trace ray {} {}",
                query.origin, query.direction
            )));
        }
        let d = query.direction / len;

        let mut rec = if self.params.irradiance {
            let mut rec = RayRecord::miss(query);
            let st = RayState::PRIMARY.child(Rgb::grey(1.0), true);
            rec.value = self.irradiance(&query.origin, &d, st, observer);
            rec.normal = d;
            rec.unperturbed_normal = d;
            rec.length = 0.0;
            rec.unmirror_dist = 0.0;
            rec
        } else {
            let t_max = if self.params.limit_distance { len } else { FHUGE };
            self.radiance(&query.origin, &d, t_max, RayState::PRIMARY, observer)
        };
        rec.direction = query.direction;

        if observer.wants_events() {
            observer.on_ray(TraceEvent {
                depth: 0,
                record: rec.clone(),
            });
        }
        Ok(rec)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
