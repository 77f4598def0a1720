//! Ray queries against static obstacles.
//!
//! Steering never talks to a physics engine directly; it goes through the
//! narrow [`ObstacleQuery`] interface. [`ObstacleField`] is the built-in
//! implementation: a flat list of axis-aligned boxes and spheres, which is
//! enough for walls, pillars, and test scenes. Hosts with a real physics
//! engine implement the trait themselves.

use flockwork_types::{IdSequence, ObstacleId};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// The nearest surface a ray struck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin to the hit point.
    pub distance: f32,
    /// World-space hit point.
    pub point: Vec3,
    /// Unit surface normal at the hit point.
    pub normal: Vec3,
    /// The obstacle that was struck.
    pub obstacle: ObstacleId,
}

/// Narrow query interface used by obstacle avoidance.
pub trait ObstacleQuery {
    /// Cast a ray from `origin` along unit `direction` up to `max_distance`
    /// and return the closest hit, if any.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit>;
}

/// Geometry of one static obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObstacleShape {
    /// Axis-aligned box given by its corners.
    Box {
        /// Minimum corner.
        min: Vec3,
        /// Maximum corner.
        max: Vec3,
    },
    /// Sphere (a pillar or boulder when seen from above).
    Sphere {
        /// Center point.
        center: Vec3,
        /// Radius.
        radius: f32,
    },
}

/// A flat collection of static obstacles.
#[derive(Debug, Clone, Default)]
pub struct ObstacleField {
    obstacles: Vec<(ObstacleId, ObstacleShape)>,
    ids: IdSequence,
}

impl ObstacleField {
    /// Create an empty field.
    pub const fn new() -> Self {
        Self {
            obstacles: Vec::new(),
            ids: IdSequence::new(),
        }
    }

    /// Add an axis-aligned box spanning `min`..`max`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidObstacle`] if any extent is not positive.
    pub fn add_box(&mut self, min: Vec3, max: Vec3) -> Result<ObstacleId, WorldError> {
        if !(max.cmpgt(min).all()) {
            return Err(WorldError::InvalidObstacle("box max must exceed min on every axis"));
        }
        self.push(ObstacleShape::Box { min, max })
    }

    /// Add a sphere.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidObstacle`] if `radius` is not positive.
    pub fn add_sphere(&mut self, center: Vec3, radius: f32) -> Result<ObstacleId, WorldError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(WorldError::InvalidObstacle("sphere radius must be positive"));
        }
        self.push(ObstacleShape::Sphere { center, radius })
    }

    /// Number of obstacles.
    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    /// Whether the field has no obstacles.
    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    fn push(&mut self, shape: ObstacleShape) -> Result<ObstacleId, WorldError> {
        let id: ObstacleId = self.ids.next_id().ok_or(WorldError::IdsExhausted)?;
        self.obstacles.push((id, shape));
        Ok(id)
    }
}

impl ObstacleQuery for ObstacleField {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let direction = direction.try_normalize()?;
        self.obstacles
            .iter()
            .filter_map(|&(id, shape)| {
                let (distance, normal) = match shape {
                    ObstacleShape::Box { min, max } => ray_box(origin, direction, min, max)?,
                    ObstacleShape::Sphere { center, radius } => {
                        ray_sphere(origin, direction, center, radius)?
                    }
                };
                (distance <= max_distance).then(|| RayHit {
                    distance,
                    point: origin + direction * distance,
                    normal,
                    obstacle: id,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

/// Slab test. Returns the entry distance and the face normal. Rays that
/// start inside the box do not report a hit.
fn ray_box(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut normal = Vec3::ZERO;

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        let lo = min[axis];
        let hi = max[axis];

        if d.abs() < f32::EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }

        let inv = d.recip();
        let (t_near, t_far, sign) = if inv >= 0.0 {
            ((lo - o) * inv, (hi - o) * inv, -1.0)
        } else {
            ((hi - o) * inv, (lo - o) * inv, 1.0)
        };

        if t_near > t_enter {
            t_enter = t_near;
            normal = Vec3::ZERO;
            normal[axis] = sign;
        }
        t_exit = t_exit.min(t_far);
        if t_enter > t_exit {
            return None;
        }
    }

    (t_enter >= 0.0 && t_enter.is_finite()).then_some((t_enter, normal))
}

fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<(f32, Vec3)> {
    let to_origin = origin - center;
    let b = to_origin.dot(dir);
    let c = to_origin.length_squared() - radius * radius;
    if c < 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    if t < 0.0 {
        return None;
    }
    let point = origin + dir * t;
    Some((t, (point - center).normalize_or_zero()))
}
