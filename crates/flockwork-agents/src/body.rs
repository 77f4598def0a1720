//! The physical half of an agent: kinematics, targets, and cargo.
//!
//! `AgentBody` is split out of [`Agent`](crate::agent::Agent) so that the
//! state machine can mutate the body while the agent keeps ownership of its
//! current state data.

use flockwork_types::math::truncate;
use flockwork_types::{AgentId, StateKind};
use glam::Vec3;

use crate::config::AgentParams;
use crate::context::{Neighbor, PathFollower};
use crate::steering::{SteeringAgent, arrive};

/// Kinematic and bookkeeping state of one agent.
#[derive(Debug)]
pub(crate) struct AgentBody {
    pub(crate) id: AgentId,
    pub(crate) params: AgentParams,
    pub(crate) position: Vec3,
    pub(crate) velocity: Vec3,
    pub(crate) heading: Vec3,
    pub(crate) target: Option<Vec3>,
    pub(crate) formation_target: Option<Vec3>,
    pub(crate) home: Vec3,
    pub(crate) health: f32,
    pub(crate) carried: f32,
    pub(crate) delivered: f32,
    pub(crate) external_force: Vec3,
    pub(crate) state_force: Vec3,
    pub(crate) dirty: bool,
    pub(crate) path: Option<Box<dyn PathFollower>>,
}

impl AgentBody {
    pub(crate) fn new(id: AgentId, params: AgentParams, position: Vec3) -> Self {
        Self {
            id,
            params,
            position,
            velocity: Vec3::ZERO,
            heading: Vec3::Z,
            target: None,
            formation_target: None,
            home: position,
            health: params.health,
            carried: 0.0,
            delivered: 0.0,
            external_force: Vec3::ZERO,
            state_force: Vec3::ZERO,
            dirty: true,
            path: None,
        }
    }

    /// The steering view of this body.
    pub const fn steering_agent(&self) -> SteeringAgent {
        SteeringAgent {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            heading: self.heading,
            max_speed: self.params.max_speed,
            max_force: self.params.max_force,
        }
    }

    /// Snapshot of this body as other agents see it.
    pub const fn snapshot(&self, state: StateKind) -> Neighbor {
        Neighbor {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            heading: self.heading,
            state,
        }
    }

    /// Set or clear the movement target, forwarding it to the path
    /// follower if one is attached.
    pub(crate) fn set_target(&mut self, target: Option<Vec3>) {
        if self.target == target {
            return;
        }
        self.target = target;
        if let Some(path) = self.path.as_mut() {
            match target {
                Some(destination) => path.set_destination(destination),
                None => path.clear(),
            }
        }
    }

    pub(crate) fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = truncate(velocity, self.params.max_speed);
    }

    pub(crate) fn has_arrived(&self, destination: Vec3) -> bool {
        self.params.has_arrived(self.position, destination)
    }

    /// Force that would bring the body to rest within one tick of `dt`.
    pub(crate) fn braking_force(&self, dt: f32) -> Vec3 {
        if dt > 0.0 {
            -self.velocity * (self.params.mass / dt)
        } else {
            -self.velocity
        }
    }

    /// Linear-ramp arrive toward the movement target that brakes once
    /// inside arrival distance.
    pub(crate) fn implicit_arrive(&self, target: Vec3, dt: f32) -> Vec3 {
        if self.has_arrived(target) {
            return self.braking_force(dt);
        }
        arrive(
            &self.steering_agent(),
            target,
            self.params.arrival_distance,
            self.params.effective_slowing_distance(),
        )
    }

    pub(crate) fn room_for_cargo(&self) -> f32 {
        (self.params.carry_capacity - self.carried).max(0.0)
    }

    pub(crate) fn deposit(&mut self) -> f32 {
        let load = std::mem::take(&mut self.carried);
        self.delivered += load;
        load
    }
}
