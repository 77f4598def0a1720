//! Steering behaviors.
//!
//! Every behavior is a pure function from the agent's kinematics (and, for
//! the flocking rules, a neighbor slice) to a steering force. An agent keeps
//! an ordered list of [`WeightedBehavior`]s; each tick the active ones are
//! evaluated, multiplied by their weight, summed, and the sum is clamped to
//! the agent's max force before integration.
//!
//! # Submodules
//!
//! - [`seek`] -- Seek, flee, and arrive.
//! - [`wander`] -- Persistent random walk.
//! - [`flocking`] -- Separation, alignment, cohesion, and their weighted sum.
//! - [`avoidance`] -- Ray-fan obstacle avoidance.
//! - [`follow`] -- Leader following and formation-slot tracking.

pub mod avoidance;
pub mod flocking;
pub mod follow;
pub mod seek;
pub mod wander;

use flockwork_types::AgentId;
use flockwork_world::ObstacleQuery;
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use avoidance::{AvoidanceParams, HEAD_ON_ANGLE_DEG, obstacle_avoidance};
pub use flocking::{
    Falloff, FlockRule, FlockTerm, FlockingProfile, MIN_ALIGNMENT_SPEED, alignment, cohesion, separation, weighted_flocking,
};
pub use follow::{FollowParams, SlotParams, follow_leader, follow_point, formation_slot};
pub use seek::{ARRIVAL_EPSILON_SQ, arrive, desired_arrive_speed, flee, seek};
pub use wander::WanderState;

use crate::context::{Neighbor, NeighborSource};

/// The kinematic view of an agent that steering functions work on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringAgent {
    /// The agent's id, used to skip itself in neighbor lists.
    pub id: AgentId,
    /// Current position.
    pub position: Vec3,
    /// Current velocity.
    pub velocity: Vec3,
    /// Unit heading.
    pub heading: Vec3,
    /// Speed limit.
    pub max_speed: f32,
    /// Force limit.
    pub max_force: f32,
}

/// What a point-targeted behavior aims at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SteeringTarget {
    /// The agent's own movement target, if it has one.
    MovementTarget,
    /// A fixed world point.
    Point(Vec3),
    /// Another agent's current position.
    Agent(AgentId),
}

/// A steering behavior and its parameters.
///
/// Flocking radii of `None` use the agent's neighbor radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Behavior {
    /// Head straight for a target.
    Seek {
        /// What to seek.
        target: SteeringTarget,
    },
    /// Run straight away from a threat.
    Flee {
        /// What to flee from.
        threat: SteeringTarget,
        /// Beyond this distance the threat is ignored.
        panic_distance: Option<f32>,
    },
    /// Head for a target and slow down on approach.
    Arrive {
        /// What to arrive at.
        target: SteeringTarget,
        /// Radius inside which the behavior stops pushing.
        arrival_radius: f32,
        /// Radius inside which the approach slows down.
        slowing_radius: f32,
    },
    /// Smooth random walk.
    Wander(WanderState),
    /// Keep distance from neighbors.
    Separation {
        /// Neighbor radius.
        radius: Option<f32>,
        /// Distance weighting.
        falloff: Falloff,
    },
    /// Match neighbors' average velocity.
    Alignment {
        /// Neighbor radius.
        radius: Option<f32>,
    },
    /// Move toward neighbors' centroid.
    Cohesion {
        /// Neighbor radius.
        radius: Option<f32>,
    },
    /// Steer around static obstacles.
    ObstacleAvoidance(AvoidanceParams),
    /// Trail a leader agent.
    FollowLeader {
        /// The agent to follow.
        leader: AgentId,
        /// Follow tuning.
        params: FollowParams,
    },
    /// Track the agent's formation slot.
    FormationSlot(SlotParams),
}

impl Behavior {
    /// Whether this is one of the three flocking rules.
    pub const fn is_flocking(&self) -> bool {
        matches!(
            self,
            Self::Separation { .. } | Self::Alignment { .. } | Self::Cohesion { .. }
        )
    }

    /// Whether the behavior needs the agent's neighbor list.
    pub const fn needs_neighbors(&self) -> bool {
        self.is_flocking()
    }

    /// Evaluate the behavior for one agent. The result is unweighted.
    pub fn compute<R: Rng + ?Sized>(&mut self, input: &SteeringInput<'_>, rng: &mut R) -> Vec3 {
        let agent = &input.agent;
        match self {
            Self::Seek { target } => input.resolve(*target).map_or(Vec3::ZERO, |t| seek(agent, t)),
            Self::Flee { threat, panic_distance } => input
                .resolve(*threat)
                .map_or(Vec3::ZERO, |t| flee(agent, t, *panic_distance)),
            Self::Arrive {
                target,
                arrival_radius,
                slowing_radius,
            } => input
                .resolve(*target)
                .map_or(Vec3::ZERO, |t| arrive(agent, t, *arrival_radius, *slowing_radius)),
            Self::Wander(state) => state.compute(agent, rng),
            Self::Separation { radius, falloff } => {
                separation(agent, input.neighbors, input.radius(*radius), *falloff)
            }
            Self::Alignment { radius } => alignment(agent, input.neighbors, input.radius(*radius)),
            Self::Cohesion { radius } => cohesion(agent, input.neighbors, input.radius(*radius)),
            Self::ObstacleAvoidance(params) => input
                .obstacles
                .map_or(Vec3::ZERO, |obstacles| obstacle_avoidance(agent, obstacles, params)),
            Self::FollowLeader { leader, params } => input
                .agents
                .agent(*leader)
                .filter(Neighbor::is_alive)
                .map_or(Vec3::ZERO, |lead| follow_leader(agent, &lead, params)),
            Self::FormationSlot(params) => input
                .formation_target
                .map_or(Vec3::ZERO, |t| formation_slot(agent, t, params)),
        }
    }
}

/// A behavior in an agent's list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedBehavior {
    /// The behavior.
    pub behavior: Behavior,
    /// Multiplier for its force.
    pub weight: f32,
    /// Inactive behaviors are skipped.
    pub active: bool,
}

impl WeightedBehavior {
    /// An active behavior with the given weight.
    pub const fn new(behavior: Behavior, weight: f32) -> Self {
        Self {
            behavior,
            weight,
            active: true,
        }
    }
}

/// Everything a behavior may read besides the agent itself.
pub struct SteeringInput<'a> {
    /// The agent being steered.
    pub agent: SteeringAgent,
    /// Neighbors within the agent's neighbor radius.
    pub neighbors: &'a [Neighbor],
    /// Radius `neighbors` was gathered with.
    pub neighbor_radius: f32,
    /// The agent's movement target.
    pub movement_target: Option<Vec3>,
    /// The agent's formation slot target.
    pub formation_target: Option<Vec3>,
    /// Lookup for agent-targeted behaviors.
    pub agents: &'a dyn NeighborSource,
    /// Static obstacles.
    pub obstacles: Option<&'a dyn ObstacleQuery>,
}

impl SteeringInput<'_> {
    fn resolve(&self, target: SteeringTarget) -> Option<Vec3> {
        match target {
            SteeringTarget::MovementTarget => self.movement_target,
            SteeringTarget::Point(point) => Some(point),
            SteeringTarget::Agent(id) => self.agents.agent(id).filter(Neighbor::is_alive).map(|n| n.position),
        }
    }

    fn radius(&self, radius: Option<f32>) -> f32 {
        radius.map_or(self.neighbor_radius, |r| r.min(self.neighbor_radius))
    }
}

impl std::fmt::Debug for SteeringInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteeringInput")
            .field("agent", &self.agent)
            .field("neighbors", &self.neighbors.len())
            .field("movement_target", &self.movement_target)
            .field("formation_target", &self.formation_target)
            .finish_non_exhaustive()
    }
}
