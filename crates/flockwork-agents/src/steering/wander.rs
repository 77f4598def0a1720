//! Wandering: a smooth random walk.
//!
//! A point is kept on a circle projected ahead of the agent. Each update
//! nudges the point by a random jitter, snaps it back onto the circle, and
//! seeks toward it. Because the point persists between updates the
//! resulting path meanders instead of twitching.

use flockwork_types::math::{horizontal, try_direction, yaw_rotation};
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::SteeringAgent;
use super::seek::seek;

/// Persistent wander parameters and circle point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WanderState {
    /// Radius of the wander circle.
    pub radius: f32,
    /// How far ahead of the agent the circle sits.
    pub distance: f32,
    /// Maximum displacement of the point per update on each axis.
    pub jitter: f32,
    /// Current point on the circle, in the agent's local frame.
    point: Vec3,
}

impl WanderState {
    /// Create a wander state with its point straight ahead.
    pub const fn new(radius: f32, distance: f32, jitter: f32) -> Self {
        Self {
            radius,
            distance,
            jitter,
            point: Vec3::new(0.0, 0.0, radius),
        }
    }

    /// Current point on the circle, in the agent's local frame.
    pub const fn point(&self) -> Vec3 {
        self.point
    }

    /// Jitter the point, then seek toward its world position.
    pub fn compute<R: Rng + ?Sized>(&mut self, agent: &SteeringAgent, rng: &mut R) -> Vec3 {
        let jitter = self.jitter.abs();
        if jitter > 0.0 {
            self.point += Vec3::new(
                rng.random_range(-jitter..=jitter),
                0.0,
                rng.random_range(-jitter..=jitter),
            );
        }
        self.point = try_direction(horizontal(self.point)).unwrap_or(Vec3::Z) * self.radius;

        let heading = try_direction(horizontal(agent.velocity)).unwrap_or(agent.heading);
        let local = self.point + Vec3::new(0.0, 0.0, self.distance);
        let world = agent.position + yaw_rotation(heading) * local;
        seek(agent, world)
    }
}

impl Default for WanderState {
    fn default() -> Self {
        Self::new(1.5, 3.0, 0.8)
    }
}
