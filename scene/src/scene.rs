//! Scene

use super::sphere::*;
use rtcore::color::Rgb;
use rtcore::geometry::*;
use std::fmt;
use std::sync::Arc;

/// How a material responds to light.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaterialKind {
    /// Emits its colour.
    Light,

    /// Diffuse reflector; lit through the ambient calculation.
    Plastic,

    /// Specular reflector.
    Mirror,
}

impl MaterialKind {
    /// Returns the kind for a scene file keyword.
    ///
    /// * `word` - The keyword.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "light" => Some(Self::Light),
            "plastic" => Some(Self::Plastic),
            "mirror" => Some(Self::Mirror),
            _ => None,
        }
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Plastic => write!(f, "plastic"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

/// A named material.
#[derive(Clone, Debug)]
pub struct Material {
    /// Material name.
    pub name: Arc<str>,

    /// Kind.
    pub kind: MaterialKind,

    /// Emission for lights, reflectance otherwise.
    pub color: Rgb,
}

/// A nearest hit against the whole scene.
#[derive(Copy, Clone, Debug)]
pub struct SceneHit {
    /// Index of the sphere that was hit.
    pub sphere: usize,

    /// Geometric details.
    pub geom: SphereHit,
}

/// Immutable scene state shared by every worker.
#[derive(Clone, Debug)]
pub struct Scene {
    /// Radiance of rays that hit nothing.
    pub sky: Rgb,

    /// Materials.
    pub materials: Vec<Material>,

    /// Spheres.
    pub spheres: Vec<Sphere>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            sky: Rgb::BLACK,
            materials: Vec::new(),
            spheres: Vec::new(),
        }
    }
}

impl Scene {
    /// Returns the nearest hit in (FTINY, t_max).
    ///
    /// * `o`     - Ray origin.
    /// * `d`     - Unit ray direction.
    /// * `t_max` - Maximum ray parameter.
    pub fn intersect(&self, o: &Point3, d: &Vector3, t_max: Float) -> Option<SceneHit> {
        let mut nearest: Option<SceneHit> = None;
        let mut t_max = t_max;
        for (i, s) in self.spheres.iter().enumerate() {
            if let Some(geom) = s.intersect(o, d, t_max) {
                t_max = geom.t;
                nearest = Some(SceneHit { sphere: i, geom });
            }
        }
        nearest
    }

    /// Returns the material of a sphere.
    ///
    /// * `sphere` - The sphere.
    pub fn material_of(&self, sphere: &Sphere) -> &Material {
        &self.materials[sphere.material]
    }

    /// Returns the radius of a ball around the world origin that contains
    /// every sphere, at least 1.
    pub fn extent(&self) -> Float {
        self.spheres.iter().map(Sphere::reach).fold(1.0, Float::max)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
