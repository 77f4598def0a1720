//! Behavioral states and their hooks.
//!
//! Each state is a variant of [`StateData`] carrying whatever it needs
//! (destination, target, waypoints). The hooks are plain functions that
//! dispatch on the variant:
//!
//! - `enter` runs once when the state becomes current.
//! - `exit` runs once when the state is left.
//! - `execute` runs every tick while the state is current.
//! - `check_transition` runs after `execute` and may name the next state.
//! - `handle_message` gets first refusal on every delivered message.
//!
//! Transitions themselves are driven by [`Agent`](crate::agent::Agent),
//! which owns both the current state and the body the hooks mutate.

use flockwork_types::{AgentId, Message, MessageTarget, MessageType, ResourceNodeId, StateKind};
use flockwork_world::ResourceNode;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::body::AgentBody;
use crate::context::{AgentContext, Neighbor, NeighborSource};
use crate::steering::{FollowParams, flee, follow_point};

/// Cargo shortfall below which a gatherer counts as full.
const CARGO_EPSILON: f32 = 1e-4;

/// Something a state pursues or flees: a fixed point or another agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Pursuit {
    /// A fixed world point.
    Point(Vec3),
    /// Another agent, tracked at its current position.
    Agent(AgentId),
}

impl Pursuit {
    /// Current position of the pursued thing, or `None` if it is an agent
    /// that no longer exists or is dead.
    pub fn locate(&self, agents: &dyn NeighborSource) -> Option<Vec3> {
        match *self {
            Self::Point(point) => Some(point),
            Self::Agent(id) => agents.agent(id).filter(Neighbor::is_alive).map(|n| n.position),
        }
    }
}

/// A behavioral state together with its per-state data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateData {
    /// Waiting for orders.
    Idle,
    /// Travelling to `destination`.
    Moving {
        /// Where to go.
        destination: Vec3,
    },
    /// Chasing a point or an agent.
    Seeking {
        /// What to chase.
        target: Pursuit,
    },
    /// Running from a point or an agent until `safe_distance` away.
    Fleeing {
        /// What to run from.
        threat: Pursuit,
        /// Distance at which the agent stops fleeing.
        safe_distance: f32,
    },
    /// Harvesting from a resource node.
    Gathering {
        /// The node being harvested.
        node: ResourceNodeId,
        /// Whether the node accepted this agent as a harvester.
        harvesting: bool,
    },
    /// Carrying cargo home.
    Returning {
        /// Where to deposit.
        base: Vec3,
        /// Node to go back to after depositing.
        resume: Option<ResourceNodeId>,
    },
    /// Trailing a leader.
    Following {
        /// The leader.
        leader: AgentId,
        /// How far behind to trail.
        distance: f32,
    },
    /// Visiting waypoints in order.
    Patrolling {
        /// The route.
        waypoints: Vec<Vec3>,
        /// Index of the waypoint being approached.
        index: usize,
        /// Whether to start over after the last waypoint.
        looping: bool,
    },
    /// Closing in on and damaging another agent.
    Attacking {
        /// The victim.
        target: AgentId,
        /// Seconds until the next hit is allowed.
        cooldown: f32,
    },
    /// Terminal.
    Dead,
}

impl StateData {
    /// The data-free tag of this state.
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Moving { .. } => StateKind::Moving,
            Self::Seeking { .. } => StateKind::Seeking,
            Self::Fleeing { .. } => StateKind::Fleeing,
            Self::Gathering { .. } => StateKind::Gathering,
            Self::Returning { .. } => StateKind::Returning,
            Self::Following { .. } => StateKind::Following,
            Self::Patrolling { .. } => StateKind::Patrolling,
            Self::Attacking { .. } => StateKind::Attacking,
            Self::Dead => StateKind::Dead,
        }
    }

    /// Start gathering from `node`.
    pub const fn gather(node: ResourceNodeId) -> Self {
        Self::Gathering {
            node,
            harvesting: false,
        }
    }

    /// Start attacking `target`. The first hit lands as soon as the target
    /// is in range.
    pub const fn attack(target: AgentId) -> Self {
        Self::Attacking { target, cooldown: 0.0 }
    }

    /// Start patrolling `waypoints` from the first one.
    pub const fn patrol(waypoints: Vec<Vec3>, looping: bool) -> Self {
        Self::Patrolling {
            waypoints,
            index: 0,
            looping,
        }
    }
}

/// The current state and when it was entered.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMachine {
    pub(crate) state: StateData,
    pub(crate) entered_at: f64,
    pub(crate) previous: Option<StateKind>,
}

impl StateMachine {
    pub(crate) const fn new() -> Self {
        Self {
            state: StateData::Idle,
            entered_at: 0.0,
            previous: None,
        }
    }

    /// The current state.
    pub const fn state(&self) -> &StateData {
        &self.state
    }

    /// Simulation time at which the current state was entered.
    pub const fn entered_at(&self) -> f64 {
        self.entered_at
    }

    /// The state before the current one.
    pub const fn previous(&self) -> Option<StateKind> {
        self.previous
    }
}

/// What a state's message hook did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Not handled; fall through to the default dispatch table.
    Unhandled,
    /// Handled without a state change.
    Handled,
    /// Handled; switch to the given state.
    Transition(StateData),
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

pub(crate) fn enter(state: &mut StateData, body: &mut AgentBody, ctx: &mut AgentContext<'_>) {
    match state {
        StateData::Idle | StateData::Fleeing { .. } | StateData::Following { .. } => {}
        StateData::Moving { destination } => body.set_target(Some(*destination)),
        StateData::Seeking { target } => body.set_target(target.locate(&*ctx.neighbors)),
        StateData::Gathering { node, .. } => {
            body.set_target(ctx.resources.get(*node).map(ResourceNode::position));
        }
        StateData::Returning { base, .. } => body.set_target(Some(*base)),
        StateData::Patrolling { waypoints, index, .. } => body.set_target(waypoints.get(*index).copied()),
        StateData::Attacking { target, .. } => {
            body.set_target(ctx.neighbors.agent(*target).map(|n| n.position));
        }
        StateData::Dead => {
            body.velocity = Vec3::ZERO;
            body.external_force = Vec3::ZERO;
            body.formation_target = None;
            info!(agent = %body.id, time = ctx.time, "Agent died");
        }
    }
}

pub(crate) fn exit(state: &StateData, body: &mut AgentBody, ctx: &mut AgentContext<'_>) {
    if let StateData::Gathering { node, harvesting: true } = *state {
        ctx.resources.stop_harvesting(node, body.id);
    }
}

pub(crate) fn execute(state: &mut StateData, body: &mut AgentBody, ctx: &mut AgentContext<'_>) {
    match state {
        StateData::Idle | StateData::Moving { .. } | StateData::Dead => {}
        StateData::Seeking { target } => {
            if let Some(position) = target.locate(&*ctx.neighbors) {
                body.set_target(Some(position));
            }
        }
        StateData::Fleeing { threat, .. } => {
            if let Some(position) = threat.locate(&*ctx.neighbors) {
                body.state_force = flee(&body.steering_agent(), position, None);
            }
        }
        StateData::Gathering { node, harvesting } => gather(*node, harvesting, body, ctx),
        StateData::Returning { base, .. } => {
            if body.has_arrived(*base) && body.carried > 0.0 {
                let load = body.deposit();
                debug!(agent = %body.id, load, delivered = body.delivered, "Cargo deposited");
            }
        }
        StateData::Following { leader, distance } => {
            if let Some(lead) = ctx.neighbors.agent(*leader).filter(Neighbor::is_alive) {
                let params = FollowParams {
                    follow_distance: *distance,
                    ..FollowParams::default()
                };
                body.set_target(Some(follow_point(&lead, &params)));
            }
        }
        StateData::Patrolling {
            waypoints,
            index,
            looping,
        } => {
            let Some(&waypoint) = waypoints.get(*index) else {
                return;
            };
            if body.has_arrived(waypoint) {
                let next = index.saturating_add(1);
                *index = if next >= waypoints.len() && *looping { 0 } else { next };
                body.set_target(waypoints.get(*index).copied());
            }
        }
        StateData::Attacking { target, cooldown } => attack(*target, cooldown, body, ctx),
    }
}

pub(crate) fn check_transition(state: &StateData, body: &AgentBody, ctx: &AgentContext<'_>) -> Option<StateData> {
    match state {
        StateData::Idle | StateData::Dead => None,
        StateData::Moving { destination } => body.has_arrived(*destination).then_some(StateData::Idle),
        StateData::Seeking { target } => match (target, target.locate(&*ctx.neighbors)) {
            (_, None) => Some(StateData::Idle),
            (Pursuit::Point(point), Some(_)) => body.has_arrived(*point).then_some(StateData::Idle),
            (Pursuit::Agent(_), Some(_)) => None,
        },
        StateData::Fleeing { threat, safe_distance } => match threat.locate(&*ctx.neighbors) {
            None => Some(StateData::Idle),
            Some(position) => (body.position.distance(position) > *safe_distance).then_some(StateData::Idle),
        },
        StateData::Gathering { node, .. } => {
            let carrying = body.carried > 0.0;
            match ctx.resources.get(*node) {
                None => Some(if carrying { returning(body, None) } else { StateData::Idle }),
                Some(n) if n.is_depleted() => Some(if carrying {
                    returning(body, Some(*node))
                } else {
                    StateData::Idle
                }),
                Some(_) => (body.carried + CARGO_EPSILON >= body.params.gather_target())
                    .then(|| returning(body, Some(*node))),
            }
        }
        StateData::Returning { base, resume } => {
            if !body.has_arrived(*base) || body.carried > 0.0 {
                return None;
            }
            let next = resume
                .filter(|id| ctx.resources.get(*id).is_some_and(|n| !n.is_depleted()))
                .map_or(StateData::Idle, StateData::gather);
            Some(next)
        }
        StateData::Following { leader, .. } => ctx
            .neighbors
            .agent(*leader)
            .filter(Neighbor::is_alive)
            .is_none()
            .then_some(StateData::Idle),
        StateData::Patrolling { waypoints, index, .. } => (*index >= waypoints.len()).then_some(StateData::Idle),
        StateData::Attacking { target, .. } => ctx
            .neighbors
            .agent(*target)
            .filter(Neighbor::is_alive)
            .is_none()
            .then_some(StateData::Idle),
    }
}

pub(crate) fn handle_message(state: &mut StateData, body: &mut AgentBody, message: &Message) -> MessageOutcome {
    match state {
        StateData::Dead => MessageOutcome::Handled,
        StateData::Gathering { node, .. } => match (message.kind(), message.payload_resource_node()) {
            (MessageType::ResourceDepleted, Some(depleted)) if depleted == *node => {
                debug!(agent = %body.id, node = %depleted, "Gathering target depleted");
                MessageOutcome::Transition(if body.carried > 0.0 {
                    returning(body, Some(*node))
                } else {
                    StateData::Idle
                })
            }
            (MessageType::GatherResource, Some(requested)) if requested == *node => MessageOutcome::Handled,
            _ => MessageOutcome::Unhandled,
        },
        StateData::Moving { destination } => match (message.kind(), message.position()) {
            (MessageType::MoveTo, Some(position)) => {
                *destination = position;
                body.set_target(Some(position));
                MessageOutcome::Handled
            }
            _ => MessageOutcome::Unhandled,
        },
        StateData::Following { leader, .. } => {
            let requested = message.payload_agent().or_else(|| message.sender());
            if message.kind() == MessageType::Follow && requested == Some(*leader) {
                MessageOutcome::Handled
            } else {
                MessageOutcome::Unhandled
            }
        }
        _ => MessageOutcome::Unhandled,
    }
}

// ---------------------------------------------------------------------------
// Per-state helpers
// ---------------------------------------------------------------------------

const fn returning(body: &AgentBody, resume: Option<ResourceNodeId>) -> StateData {
    StateData::Returning { base: body.home, resume }
}

fn gather(node: ResourceNodeId, harvesting: &mut bool, body: &mut AgentBody, ctx: &mut AgentContext<'_>) {
    let Some(found) = ctx.resources.get(node) else {
        return;
    };
    let node_position = found.position();
    let rate = found.harvest_rate();

    if !*harvesting {
        if ctx.resources.try_start_harvesting(node, body.id, body.position) {
            *harvesting = true;
            body.set_target(None);
            debug!(agent = %body.id, node = %node, "Started harvesting");
        } else {
            body.set_target(Some(node_position));
            return;
        }
    }

    let room = body.room_for_cargo();
    let dt = if rate > 0.0 { ctx.dt.min(room / rate) } else { ctx.dt };
    let outcome = ctx.resources.harvest(node, body.id, dt);
    body.carried += outcome.amount;
    if outcome.depleted {
        debug!(agent = %body.id, node = %node, "Resource node depleted");
        ctx.outbox.push(
            Message::resource_depleted(node)
                .with_sender(Some(body.id))
                .with_target(MessageTarget::Broadcast)
                .at(ctx.time),
        );
    }
}

fn attack(target: AgentId, cooldown: &mut f32, body: &mut AgentBody, ctx: &mut AgentContext<'_>) {
    *cooldown = (*cooldown - ctx.dt).max(0.0);
    let Some(victim) = ctx.neighbors.agent(target).filter(Neighbor::is_alive) else {
        return;
    };
    if body.position.distance(victim.position) > body.params.attack_range {
        body.set_target(Some(victim.position));
        return;
    }
    body.set_target(None);
    if *cooldown <= 0.0 {
        ctx.outbox.push(
            Message::damage(body.params.attack_damage)
                .with_sender(Some(body.id))
                .with_target(MessageTarget::Agent(target))
                .at(ctx.time),
        );
        *cooldown = body.params.attack_interval;
        debug!(agent = %body.id, target = %target, damage = body.params.attack_damage, "Attack landed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NeighborList;

    #[test]
    fn state_data_maps_to_its_tag() {
        assert_eq!(StateData::Idle.kind(), StateKind::Idle);
        assert_eq!(StateData::gather(ResourceNodeId::from_raw(1)).kind(), StateKind::Gathering);
        assert_eq!(StateData::attack(AgentId::from_raw(1)).kind(), StateKind::Attacking);
        assert_eq!(StateData::patrol(Vec::new(), true).kind(), StateKind::Patrolling);
        assert!(StateData::Dead.kind().is_terminal());
    }

    #[test]
    fn pursuit_of_dead_or_missing_agent_is_lost() {
        let mut list = NeighborList::default();
        let id = AgentId::from_raw(3);
        assert_eq!(Pursuit::Agent(id).locate(&list), None);
        list.upsert(Neighbor {
            id,
            position: Vec3::X,
            velocity: Vec3::ZERO,
            heading: Vec3::Z,
            state: StateKind::Dead,
        });
        assert_eq!(Pursuit::Agent(id).locate(&list), None);
        assert_eq!(Pursuit::Point(Vec3::ONE).locate(&list), Some(Vec3::ONE));
    }
}
