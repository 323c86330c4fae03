//! Ray queries, bundles and per-ray results.

use crate::color::Rgb;
use crate::error::Result;
use crate::geometry::{Float, Point3, Vector3, FHUGE};
use std::sync::Arc;

/// One ray to evaluate.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RayQuery {
    /// Origin.
    pub origin: Point3,

    /// Direction. Need not be normalized.
    pub direction: Vector3,
}

impl RayQuery {
    /// Creates a new `RayQuery`.
    ///
    /// * `origin`    - Origin.
    /// * `direction` - Direction.
    pub fn new(origin: Point3, direction: Vector3) -> Self {
        Self { origin, direction }
    }

    /// Returns true if this is a flush sentinel (zero direction) rather than
    /// a ray to trace.
    pub fn is_sentinel(&self) -> bool {
        self.direction.is_zero()
    }
}

/// Ordered batch of ray queries submitted together.
#[derive(Clone, Debug, Default)]
pub struct RayBundle {
    rays: Vec<RayQuery>,
}

impl RayBundle {
    /// Creates an empty bundle with room for `capacity` rays.
    ///
    /// * `capacity` - Expected number of rays.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rays: Vec::with_capacity(capacity),
        }
    }

    /// Appends a ray.
    ///
    /// * `ray` - The ray.
    pub fn push(&mut self, ray: RayQuery) {
        self.rays.push(ray);
    }

    /// Removes every ray.
    pub fn clear(&mut self) {
        self.rays.clear();
    }

    /// Keeps only the first `n` rays.
    ///
    /// * `n` - Number of rays to keep.
    pub fn truncate(&mut self, n: usize) {
        self.rays.truncate(n);
    }

    /// Returns the number of rays, sentinels included.
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    /// Returns true if the bundle holds no rays.
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Returns true if the last ray is a flush sentinel.
    pub fn ends_with_sentinel(&self) -> bool {
        self.rays.last().map_or(false, RayQuery::is_sentinel)
    }

    /// Returns the rays.
    pub fn rays(&self) -> &[RayQuery] {
        &self.rays
    }
}

/// Names of the object a ray hit.
#[derive(Clone, Debug, PartialEq)]
pub struct HitInfo {
    /// Surface (object) name.
    pub surface: Arc<str>,

    /// Name of the modifier applied directly to the surface.
    pub modifier: Arc<str>,

    /// Name of the material the modifier chain resolves to.
    pub material: Arc<str>,
}

/// Everything the output fields can report about one traced ray.
#[derive(Clone, Debug, PartialEq)]
pub struct RayRecord {
    /// Ray origin.
    pub origin: Point3,

    /// Ray direction as given.
    pub direction: Vector3,

    /// Computed radiance (or irradiance).
    pub value: Rgb,

    /// Contribution of mirrored (specular) paths to `value`.
    pub mirror: Rgb,

    /// Distance to the mirrored image, 0 if there is none.
    pub mirror_dist: Float,

    /// Distance to the unmirrored hit.
    pub unmirror_dist: Float,

    /// Length of this ray segment alone.
    pub length: Float,

    /// Intersection point; the origin if nothing was hit.
    pub point: Point3,

    /// Shading normal facing the ray; zero if nothing was hit.
    pub normal: Vector3,

    /// Geometric (outward) normal; zero if nothing was hit.
    pub unperturbed_normal: Vector3,

    /// Local surface coordinates.
    pub uv: [Float; 2],

    /// What was hit, if anything.
    pub hit: Option<HitInfo>,

    /// Ray weight relative to the primary ray.
    pub weight: Float,

    /// Product of reflectances from the primary ray to this one.
    pub coefficient: Rgb,
}

impl RayRecord {
    /// Returns a record for a ray that hit nothing.
    ///
    /// * `query` - The ray.
    pub fn miss(query: &RayQuery) -> Self {
        Self {
            origin: query.origin,
            direction: query.direction,
            value: Rgb::BLACK,
            mirror: Rgb::BLACK,
            mirror_dist: 0.0,
            unmirror_dist: FHUGE,
            length: FHUGE,
            point: query.origin,
            normal: Vector3::ZERO,
            unperturbed_normal: Vector3::ZERO,
            uv: [0.0; 2],
            hit: None,
            weight: 1.0,
            coefficient: Rgb::grey(1.0),
        }
    }

    /// Returns the effective distance: the mirrored distance when a mirror
    /// image dominates, the unmirrored distance otherwise.
    pub fn effective_dist(&self) -> Float {
        if self.mirror_dist > 0.0 && self.mirror.max_component() >= (self.value - self.mirror).max_component() {
            self.mirror_dist
        } else {
            self.unmirror_dist
        }
    }

    /// Returns the contribution of this ray to the primary ray's value.
    pub fn contribution(&self) -> Rgb {
        self.coefficient * self.value
    }
}

/// One diagnostic event for a primary or child ray.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    /// Number of ancestors in the ray's parent chain.
    pub depth: usize,

    /// The ray's record.
    pub record: RayRecord,
}

/// Receives diagnostic events for every ray spawned while tracing.
pub trait TraceObserver {
    /// Returns true if events are wanted at all. Tracers may skip building
    /// child records when this is false.
    fn wants_events(&self) -> bool;

    /// Called once for each ray after its value is known; children before
    /// their parents.
    ///
    /// * `event` - The event.
    fn on_ray(&mut self, event: TraceEvent);
}

/// An observer that discards every event.
pub struct NullObserver;

impl TraceObserver for NullObserver {
    fn wants_events(&self) -> bool {
        false
    }

    fn on_ray(&mut self, _event: TraceEvent) {}
}

/// Collects events in a vector.
#[derive(Default)]
pub struct CollectingObserver {
    /// Collected events.
    pub events: Vec<TraceEvent>,
}

impl TraceObserver for CollectingObserver {
    fn wants_events(&self) -> bool {
        true
    }

    fn on_ray(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Evaluates rays against immutable scene state. Implementations must be
/// safe to call concurrently from every worker.
pub trait RayTracer: Send + Sync {
    /// Traces one ray.
    ///
    /// * `query`    - The ray.
    /// * `seq`      - Sequence number of the ray within the run.
    /// * `observer` - Receives diagnostic events for this ray and its children.
    fn trace(&self, query: &RayQuery, seq: u64, observer: &mut dyn TraceObserver) -> Result<RayRecord>;
}

/// Reference counted `RayTracer`.
pub type ArcRayTracer = Arc<dyn RayTracer>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel() {
        let ray = RayQuery::new(Vector3::new(1.0, 2.0, 3.0), Vector3::ZERO);
        assert!(ray.is_sentinel());
        let ray = RayQuery::new(Vector3::ZERO, Vector3::new(0.0, 0.0, -1.0));
        assert!(!ray.is_sentinel());
    }

    #[test]
    fn bundle_sentinel_detection() {
        let mut bundle = RayBundle::with_capacity(2);
        assert!(!bundle.ends_with_sentinel());
        bundle.push(RayQuery::new(Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0)));
        assert!(!bundle.ends_with_sentinel());
        bundle.push(RayQuery::default());
        assert!(bundle.ends_with_sentinel());
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn miss_record() {
        let q = RayQuery::new(Vector3::new(1.0, 1.0, 1.0), Vector3::new(0.0, 1.0, 0.0));
        let r = RayRecord::miss(&q);
        assert_eq!(r.point, q.origin);
        assert_eq!(r.effective_dist(), FHUGE);
        assert!(r.hit.is_none());
    }
}
