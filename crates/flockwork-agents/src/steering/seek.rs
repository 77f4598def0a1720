//! Point-targeted behaviors: seek, flee, and arrive.
//!
//! All three follow the classic steering recipe: pick a desired velocity,
//! then return `desired - velocity` as the steering force.

use glam::Vec3;

use super::SteeringAgent;

/// Squared distance under which the agent is considered to be on top of
/// its target and seek/flee produce no force.
pub const ARRIVAL_EPSILON_SQ: f32 = 1e-4;

/// Steer straight at `target` at full speed.
pub fn seek(agent: &SteeringAgent, target: Vec3) -> Vec3 {
    let offset = target - agent.position;
    if offset.length_squared() < ARRIVAL_EPSILON_SQ {
        return Vec3::ZERO;
    }
    offset.normalize() * agent.max_speed - agent.velocity
}

/// Steer straight away from `threat` at full speed.
///
/// With a `panic_distance`, threats farther away than that produce no force.
pub fn flee(agent: &SteeringAgent, threat: Vec3, panic_distance: Option<f32>) -> Vec3 {
    let offset = agent.position - threat;
    let distance_sq = offset.length_squared();
    if distance_sq < ARRIVAL_EPSILON_SQ {
        return Vec3::ZERO;
    }
    if let Some(panic) = panic_distance
        && distance_sq > panic * panic
    {
        return Vec3::ZERO;
    }
    offset.normalize() * agent.max_speed - agent.velocity
}

/// Desired speed for arrive at `distance` from the target.
///
/// Zero inside `arrival_radius`, a linear ramp inside `slowing_radius`, full
/// speed beyond it. The slowing radius is clamped to at least the arrival
/// radius. Non-decreasing in `distance`.
pub fn desired_arrive_speed(distance: f32, max_speed: f32, arrival_radius: f32, slowing_radius: f32) -> f32 {
    let slowing = slowing_radius.max(arrival_radius);
    if distance <= arrival_radius {
        0.0
    } else if distance < slowing {
        max_speed * (distance / slowing)
    } else {
        max_speed
    }
}

/// Steer toward `target`, slowing down linearly inside `slowing_radius` and
/// producing no force inside `arrival_radius`.
pub fn arrive(agent: &SteeringAgent, target: Vec3, arrival_radius: f32, slowing_radius: f32) -> Vec3 {
    let offset = target - agent.position;
    let distance = offset.length();
    if distance <= arrival_radius || distance * distance < ARRIVAL_EPSILON_SQ {
        return Vec3::ZERO;
    }
    let speed = desired_arrive_speed(distance, agent.max_speed, arrival_radius, slowing_radius);
    offset / distance * speed - agent.velocity
}
