//! Ray-fan obstacle avoidance.
//!
//! A fan of rays is cast ahead of the agent. The closest hit decides the
//! response: glancing hits steer along the surface normal, near head-on hits
//! probe both sides and turn toward the clearer one. The push grows as the
//! obstacle gets closer.

use flockwork_types::math::{horizontal, right_of, try_direction};
use flockwork_world::{ObstacleQuery, RayHit};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::SteeringAgent;

/// Angle in degrees between the hit normal and the heading above which a
/// hit counts as head-on.
pub const HEAD_ON_ANGLE_DEG: f32 = 120.0;

/// Tuning for [`obstacle_avoidance`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvoidanceParams {
    /// Detection distance at rest.
    pub detection_distance: f32,
    /// Extra detection distance per unit of speed, as a fraction of the
    /// base distance at max speed.
    pub speed_factor: f32,
    /// Number of rays in the fan.
    pub ray_count: u32,
    /// Half-angle of the fan in degrees.
    pub fan_half_angle_deg: f32,
}

impl Default for AvoidanceParams {
    fn default() -> Self {
        Self {
            detection_distance: 4.0,
            speed_factor: 1.0,
            ray_count: 3,
            fan_half_angle_deg: 30.0,
        }
    }
}

impl AvoidanceParams {
    /// Detection distance at the given speed.
    pub fn detection_at(&self, speed: f32, max_speed: f32) -> f32 {
        let ratio = if max_speed > 0.0 { (speed / max_speed).clamp(0.0, 1.0) } else { 0.0 };
        self.detection_distance * self.speed_factor.mul_add(ratio, 1.0)
    }
}

/// Steer away from the closest obstacle ahead.
pub fn obstacle_avoidance(agent: &SteeringAgent, obstacles: &dyn ObstacleQuery, params: &AvoidanceParams) -> Vec3 {
    let Some(heading) = try_direction(horizontal(agent.velocity)).or_else(|| try_direction(horizontal(agent.heading)))
    else {
        return Vec3::ZERO;
    };
    let detection = params.detection_at(agent.velocity.length(), agent.max_speed);
    if detection <= 0.0 {
        return Vec3::ZERO;
    }

    let Some(hit) = closest_hit(agent.position, heading, detection, obstacles, params) else {
        return Vec3::ZERO;
    };

    let normal = try_direction(horizontal(hit.normal)).unwrap_or(-heading);
    let direction = if normal.angle_between(heading) > HEAD_ON_ANGLE_DEG.to_radians() {
        clearer_side(agent.position, heading, detection, obstacles)
    } else {
        normal
    };
    let urgency = (1.0 - hit.distance / detection).clamp(0.0, 1.0);
    direction * agent.max_force * urgency
}

fn closest_hit(
    origin: Vec3,
    heading: Vec3,
    detection: f32,
    obstacles: &dyn ObstacleQuery,
    params: &AvoidanceParams,
) -> Option<RayHit> {
    let rays = params.ray_count.max(1);
    let half = params.fan_half_angle_deg.to_radians();
    let step = if rays > 1 { 2.0 * half / rays.saturating_sub(1) as f32 } else { 0.0 };
    (0..rays)
        .filter_map(|i| {
            let angle = if rays > 1 { (i as f32).mul_add(step, -half) } else { 0.0 };
            let direction = Quat::from_rotation_y(angle) * heading;
            obstacles.raycast(origin, direction, detection)
        })
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

fn clearer_side(origin: Vec3, heading: Vec3, detection: f32, obstacles: &dyn ObstacleQuery) -> Vec3 {
    let right = right_of(heading);
    let clearance = |direction: Vec3| {
        obstacles
            .raycast(origin, direction, detection)
            .map_or(detection, |hit| hit.distance)
    };
    if clearance(-right) > clearance(right) { -right } else { right }
}
