//! Leader following and formation-slot tracking.

use flockwork_types::math::{horizontal, try_direction, yaw_rotation};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::SteeringAgent;
use super::seek::arrive;
use crate::context::Neighbor;

/// Tuning for [`follow_leader`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FollowParams {
    /// Distance to trail behind the leader when no offset is set.
    pub follow_distance: f32,
    /// Fixed offset in the leader's local frame (`+z` ahead, `+x` right).
    pub offset: Option<Vec3>,
    /// Arrival radius around the follow point.
    pub arrival_radius: f32,
    /// Slowing radius around the follow point.
    pub slowing_radius: f32,
}

impl Default for FollowParams {
    fn default() -> Self {
        Self {
            follow_distance: 2.0,
            offset: None,
            arrival_radius: 0.3,
            slowing_radius: 2.0,
        }
    }
}

/// World-space point a follower should occupy behind `leader`.
pub fn follow_point(leader: &Neighbor, params: &FollowParams) -> Vec3 {
    let heading = try_direction(horizontal(leader.velocity)).unwrap_or(leader.heading);
    match params.offset {
        Some(offset) => leader.position + yaw_rotation(heading) * offset,
        None => leader.position - heading * params.follow_distance,
    }
}

/// Arrive at the follow point behind `leader`.
pub fn follow_leader(agent: &SteeringAgent, leader: &Neighbor, params: &FollowParams) -> Vec3 {
    arrive(
        agent,
        follow_point(leader, params),
        params.arrival_radius,
        params.slowing_radius,
    )
}

/// Tuning for [`formation_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotParams {
    /// Inside this radius the agent brakes to a stop.
    pub arrival_radius: f32,
    /// Inside this radius the agent slows down quadratically.
    pub slowing_radius: f32,
    /// Extra velocity damping near the slot.
    pub damping: f32,
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            arrival_radius: 0.2,
            slowing_radius: 2.5,
            damping: 0.5,
        }
    }
}

/// Track a formation slot at `target`.
///
/// Unlike plain arrive, the approach speed ramps down quadratically and the
/// agent's velocity is damped near the slot, so formations settle without
/// jitter. Inside the arrival radius the agent brakes hard.
pub fn formation_slot(agent: &SteeringAgent, target: Vec3, params: &SlotParams) -> Vec3 {
    let offset = target - agent.position;
    let distance = offset.length();
    if distance <= params.arrival_radius || distance <= f32::EPSILON {
        return -agent.velocity;
    }
    let slowing = params.slowing_radius.max(params.arrival_radius);
    if distance >= slowing {
        return offset / distance * agent.max_speed - agent.velocity;
    }
    let ratio = distance / slowing;
    let desired = offset / distance * (agent.max_speed * ratio * ratio);
    let damping = agent.velocity * (params.damping * (1.0 - ratio));
    desired - agent.velocity - damping
}

#[cfg(test)]
mod tests {
    use flockwork_types::{AgentId, StateKind};

    use super::*;
    use crate::steering::tests::agent_at;

    fn leader(position: Vec3, velocity: Vec3) -> Neighbor {
        Neighbor {
            id: AgentId::from_raw(9),
            position,
            velocity,
            heading: Vec3::Z,
            state: StateKind::Moving,
        }
    }

    #[test]
    fn follow_point_trails_behind_moving_leader() {
        let lead = leader(Vec3::new(0.0, 0.0, 10.0), Vec3::new(2.0, 0.0, 0.0));
        let point = follow_point(&lead, &FollowParams::default());
        assert!((point - Vec3::new(-2.0, 0.0, 10.0)).length() < 1e-5);
    }

    #[test]
    fn follow_point_applies_rotated_offset() {
        let lead = leader(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let params = FollowParams {
            offset: Some(Vec3::new(0.0, 0.0, -3.0)),
            ..FollowParams::default()
        };
        // three units behind a leader heading +x
        assert!((follow_point(&lead, &params) - Vec3::new(-3.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn follower_at_follow_point_stays_put() {
        let lead = leader(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        assert_eq!(follow_leader(&agent, &lead, &FollowParams::default()), Vec3::ZERO);
    }

    #[test]
    fn slot_brakes_inside_arrival_radius() {
        let agent = agent_at(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let force = formation_slot(&agent, Vec3::new(0.1, 0.0, 0.0), &SlotParams::default());
        assert_eq!(force, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn slot_ramp_is_gentler_than_linear_arrive() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let params = SlotParams {
            damping: 0.0,
            ..SlotParams::default()
        };
        let target = Vec3::new(1.0, 0.0, 0.0);
        let slot = formation_slot(&agent, target, &params);
        let linear = arrive(&agent, target, params.arrival_radius, params.slowing_radius);
        assert!(slot.length() < linear.length());
    }
}
