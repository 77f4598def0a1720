//! The agent runtime.
//!
//! An [`Agent`] couples a body (kinematics, targets, cargo) with a state
//! machine and an ordered list of weighted steering behaviors. One update
//! runs in three steps that the core crate may also drive separately:
//!
//! 1. [`Agent::step_state`] -- run the current state's execute hook and
//!    transition check.
//! 2. [`Agent::compute_steering`] -- sum the implicit movement force, the
//!    state's own force, any external force, and the weighted behaviors,
//!    then clamp to max force.
//! 3. [`Agent::integrate`] -- turn the force into velocity, position, and
//!    heading.

use flockwork_types::math::{VECTOR_EPSILON_SQ, horizontal, rotate_towards, truncate};
use flockwork_types::{AgentId, Message, MessageType, StateKind};
use glam::Vec3;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{debug, trace};

use crate::body::AgentBody;
use crate::config::AgentParams;
use crate::context::{AgentContext, Neighbor, PathFollower};
use crate::error::AgentError;
use crate::fsm::{self, MessageOutcome, Pursuit, StateData, StateMachine};
use crate::steering::{Behavior, FlockRule, FlockTerm, FlockingProfile, SteeringAgent, SteeringInput, WeightedBehavior};

/// A single autonomous agent.
#[derive(Debug)]
pub struct Agent {
    body: AgentBody,
    fsm: StateMachine,
    behaviors: Vec<WeightedBehavior>,
    behaviors_enabled: bool,
    rng: SmallRng,
    neighbor_buffer: Vec<Neighbor>,
    last_steering: Vec3,
}

impl Agent {
    /// Create an idle agent at `position`.
    ///
    /// `seed` drives the agent's private random stream (wander jitter), so
    /// two agents built with the same seed behave identically.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidParameter`] if `params` fails
    /// validation.
    pub fn new(id: AgentId, params: AgentParams, position: Vec3, seed: u64) -> Result<Self, AgentError> {
        params.validate()?;
        Ok(Self {
            body: AgentBody::new(id, params, position),
            fsm: StateMachine::new(),
            behaviors: Vec::new(),
            behaviors_enabled: true,
            rng: SmallRng::seed_from_u64(seed),
            neighbor_buffer: Vec::new(),
            last_steering: Vec3::ZERO,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The agent's identifier.
    pub const fn id(&self) -> AgentId {
        self.body.id
    }

    /// The agent's parameters.
    pub const fn params(&self) -> &AgentParams {
        &self.body.params
    }

    /// Current position.
    pub const fn position(&self) -> Vec3 {
        self.body.position
    }

    /// Current velocity.
    pub const fn velocity(&self) -> Vec3 {
        self.body.velocity
    }

    /// Unit heading on the horizontal plane.
    pub const fn heading(&self) -> Vec3 {
        self.body.heading
    }

    /// Current movement target.
    pub const fn target(&self) -> Option<Vec3> {
        self.body.target
    }

    /// Current formation slot target.
    pub const fn formation_target(&self) -> Option<Vec3> {
        self.body.formation_target
    }

    /// Where the agent deposits cargo.
    pub const fn home(&self) -> Vec3 {
        self.body.home
    }

    /// Remaining health.
    pub const fn health(&self) -> f32 {
        self.body.health
    }

    /// Resource amount currently carried.
    pub const fn carried(&self) -> f32 {
        self.body.carried
    }

    /// Total resource amount deposited at home so far.
    pub const fn delivered(&self) -> f32 {
        self.body.delivered
    }

    /// The state tag.
    pub const fn state(&self) -> StateKind {
        self.fsm.state.kind()
    }

    /// The state machine (current state data, entry time, previous state).
    pub const fn state_machine(&self) -> &StateMachine {
        &self.fsm
    }

    /// Whether the agent is alive.
    pub fn is_alive(&self) -> bool {
        self.state() != StateKind::Dead
    }

    /// Whether the agent moved since its index entry was last refreshed.
    pub const fn is_dirty(&self) -> bool {
        self.body.dirty
    }

    /// Net steering force from the most recent [`compute_steering`](Self::compute_steering).
    pub const fn last_steering(&self) -> Vec3 {
        self.last_steering
    }

    /// The steering view of this agent.
    pub const fn steering_agent(&self) -> SteeringAgent {
        self.body.steering_agent()
    }

    /// Snapshot of this agent as other agents see it.
    pub const fn snapshot(&self) -> Neighbor {
        self.body.snapshot(self.fsm.state.kind())
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Teleport the agent.
    pub fn set_position(&mut self, position: Vec3) {
        self.body.position = position;
        self.body.dirty = true;
    }

    /// Set the velocity, clamped to max speed.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.body.set_velocity(velocity);
    }

    /// Set the heading. Directions without a horizontal part are ignored.
    pub fn set_heading(&mut self, heading: Vec3) {
        if let Some(direction) = horizontal(heading).try_normalize() {
            self.body.heading = direction;
        }
    }

    /// Set where the agent deposits cargo.
    pub const fn set_home(&mut self, home: Vec3) {
        self.body.home = home;
    }

    /// Set the movement target the implicit arrive steers toward.
    pub fn set_target(&mut self, target: Vec3) {
        self.body.set_target(Some(target));
    }

    /// Drop the movement target.
    pub fn clear_target(&mut self) {
        self.body.set_target(None);
    }

    /// Set or clear the formation slot target.
    pub const fn set_formation_target(&mut self, target: Option<Vec3>) {
        self.body.formation_target = target;
    }

    /// Mark the agent's index entry as stale.
    pub const fn mark_dirty(&mut self) {
        self.body.dirty = true;
    }

    /// Clear the dirty flag, returning whether it was set.
    pub const fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.body.dirty, false)
    }

    /// Add a force to be included in the next steering sum, before the
    /// max-force clamp.
    pub fn apply_external_force(&mut self, force: Vec3) {
        self.body.external_force += force;
    }

    /// Attach a path follower. While it is active the agent steers toward
    /// its desired velocity instead of arriving in a straight line.
    pub fn set_path_follower(&mut self, mut path: Box<dyn PathFollower>) {
        if let Some(target) = self.body.target {
            path.set_destination(target);
        }
        self.body.path = Some(path);
    }

    /// Detach the path follower.
    pub fn clear_path_follower(&mut self) -> Option<Box<dyn PathFollower>> {
        self.body.path.take()
    }

    // -----------------------------------------------------------------------
    // Behaviors
    // -----------------------------------------------------------------------

    /// Append an active behavior and return its index.
    pub fn add_behavior(&mut self, behavior: Behavior, weight: f32) -> usize {
        self.behaviors.push(WeightedBehavior::new(behavior, weight));
        self.behaviors.len().saturating_sub(1)
    }

    /// The behavior list in evaluation order.
    pub fn behaviors(&self) -> &[WeightedBehavior] {
        &self.behaviors
    }

    /// Mutable access to one behavior.
    pub fn behavior_mut(&mut self, index: usize) -> Option<&mut WeightedBehavior> {
        self.behaviors.get_mut(index)
    }

    /// Switch one behavior on or off. Returns `false` for a bad index.
    pub fn set_behavior_active(&mut self, index: usize, active: bool) -> bool {
        self.behaviors.get_mut(index).map(|b| b.active = active).is_some()
    }

    /// Remove one behavior.
    pub fn remove_behavior(&mut self, index: usize) -> Option<WeightedBehavior> {
        (index < self.behaviors.len()).then(|| self.behaviors.remove(index))
    }

    /// Remove every behavior.
    pub fn clear_behaviors(&mut self) {
        self.behaviors.clear();
    }

    /// Switch the whole behavior list on or off.
    pub const fn set_behaviors_enabled(&mut self, enabled: bool) {
        self.behaviors_enabled = enabled;
    }

    /// Whether the behavior list is evaluated.
    pub const fn behaviors_enabled(&self) -> bool {
        self.behaviors_enabled
    }

    /// The agent's active flocking rules in list order, with radii capped
    /// by its neighbor radius. Empty when behaviors are disabled.
    pub fn flocking_profile(&self) -> FlockingProfile {
        let mut profile = FlockingProfile::default();
        if !self.behaviors_enabled {
            return profile;
        }
        let neighbor_radius = self.body.params.neighbor_radius;
        for wb in self.behaviors.iter().filter(|b| b.active) {
            let (rule, radius) = match wb.behavior {
                Behavior::Separation { radius, falloff } => (FlockRule::Separation(falloff), radius),
                Behavior::Alignment { radius } => (FlockRule::Alignment, radius),
                Behavior::Cohesion { radius } => (FlockRule::Cohesion, radius),
                _ => continue,
            };
            profile.push(FlockTerm {
                rule,
                weight: wb.weight,
                radius: radius.map_or(neighbor_radius, |r| r.min(neighbor_radius)),
            });
        }
        profile
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Run one full update: state step, steering, integration.
    pub fn update(&mut self, ctx: &mut AgentContext<'_>) {
        self.step_state(ctx);
        let force = self.compute_steering(ctx);
        self.integrate(force, ctx.dt);
    }

    /// Run the current state's execute hook, then its transition check.
    ///
    /// An agent whose health has run out dies instead.
    pub fn step_state(&mut self, ctx: &mut AgentContext<'_>) {
        if !self.is_alive() {
            return;
        }
        if self.body.health <= 0.0 {
            self.transition_to(StateData::Dead, ctx);
            return;
        }
        fsm::execute(&mut self.fsm.state, &mut self.body, ctx);
        if let Some(next) = fsm::check_transition(&self.fsm.state, &self.body, ctx) {
            self.transition_to(next, ctx);
        }
    }

    /// Switch to `next`, running the old state's exit hook and the new
    /// state's enter hook.
    ///
    /// The movement target is cleared in between, so each state starts
    /// from a clean slate. Returns `false` if the agent is dead, since
    /// death is terminal.
    pub fn transition_to(&mut self, next: StateData, ctx: &mut AgentContext<'_>) -> bool {
        let from = self.fsm.state.kind();
        if from.is_terminal() {
            return false;
        }
        fsm::exit(&self.fsm.state, &mut self.body, ctx);
        self.body.set_target(None);
        self.body.state_force = Vec3::ZERO;

        self.fsm.state = next;
        self.fsm.entered_at = ctx.time;
        self.fsm.previous = Some(from);
        fsm::enter(&mut self.fsm.state, &mut self.body, ctx);

        debug!(
            agent = %self.body.id,
            from = %from,
            to = %self.fsm.state.kind(),
            time = ctx.time,
            "State transition"
        );
        true
    }

    /// Start patrolling `waypoints`.
    pub fn patrol(&mut self, waypoints: Vec<Vec3>, looping: bool, ctx: &mut AgentContext<'_>) -> bool {
        self.transition_to(StateData::patrol(waypoints, looping), ctx)
    }

    /// Start attacking `target`.
    pub fn attack(&mut self, target: AgentId, ctx: &mut AgentContext<'_>) -> bool {
        self.transition_to(StateData::attack(target), ctx)
    }

    /// Deliver a message.
    ///
    /// The current state's hook gets the first look; if it passes, the
    /// default dispatch table keyed by message type decides. Returns whether
    /// the message had any effect.
    pub fn handle_message(&mut self, message: &Message, ctx: &mut AgentContext<'_>) -> bool {
        let outcome = match fsm::handle_message(&mut self.fsm.state, &mut self.body, message) {
            MessageOutcome::Unhandled => self.default_response(message),
            handled => handled,
        };
        trace!(agent = %self.body.id, kind = ?message.kind(), outcome = ?outcome, "Message handled");
        match outcome {
            MessageOutcome::Unhandled => false,
            MessageOutcome::Handled => true,
            MessageOutcome::Transition(next) => self.transition_to(next, ctx),
        }
    }

    fn default_response(&mut self, message: &Message) -> MessageOutcome {
        let params = self.body.params;
        let next = match message.kind() {
            MessageType::MoveTo => message.position().map(|destination| StateData::Moving { destination }),
            MessageType::Seek => pursuit_of(message).map(|target| StateData::Seeking { target }),
            MessageType::Flee => pursuit_of(message).map(|threat| StateData::Fleeing {
                threat,
                safe_distance: message.value().unwrap_or(params.flee_safe_distance),
            }),
            MessageType::Stop => Some(StateData::Idle),
            MessageType::Follow => message
                .payload_agent()
                .or_else(|| message.sender())
                .filter(|leader| *leader != self.body.id)
                .map(|leader| StateData::Following {
                    leader,
                    distance: message.value().unwrap_or(params.follow_distance),
                }),
            MessageType::FormationUpdate => return self.formation_update(message),
            MessageType::GatherResource => message.payload_resource_node().map(StateData::gather),
            MessageType::ReturnToBase => Some(StateData::Returning {
                base: self.body.home,
                resume: None,
            }),
            MessageType::Damage => {
                let amount = message.value().unwrap_or(0.0).max(0.0);
                self.body.health = (self.body.health - amount).max(0.0);
                if self.body.health <= 0.0 {
                    Some(StateData::Dead)
                } else {
                    return MessageOutcome::Handled;
                }
            }
            MessageType::ResourceDepleted | MessageType::Custom => None,
        };
        next.map_or(MessageOutcome::Unhandled, MessageOutcome::Transition)
    }

    /// Slot updates feed the formation-slot behavior when the agent has
    /// one; otherwise the agent simply moves to the slot.
    fn formation_update(&mut self, message: &Message) -> MessageOutcome {
        let Some(slot) = message.position() else {
            return MessageOutcome::Unhandled;
        };
        self.body.formation_target = Some(slot);
        let tracks_slot = self.behaviors_enabled
            && self
                .behaviors
                .iter()
                .any(|b| b.active && matches!(b.behavior, Behavior::FormationSlot(_)));
        if tracks_slot {
            return MessageOutcome::Handled;
        }
        if let StateData::Moving { destination } = &mut self.fsm.state {
            *destination = slot;
            self.body.set_target(Some(slot));
            return MessageOutcome::Handled;
        }
        MessageOutcome::Transition(StateData::Moving { destination: slot })
    }

    /// Sum every force acting on the agent this tick and clamp the result
    /// to max force.
    pub fn compute_steering(&mut self, ctx: &mut AgentContext<'_>) -> Vec3 {
        if !self.is_alive() {
            self.body.external_force = Vec3::ZERO;
            self.last_steering = Vec3::ZERO;
            return Vec3::ZERO;
        }
        let agent = self.body.steering_agent();
        let state_force = std::mem::take(&mut self.body.state_force);
        let mut total = std::mem::take(&mut self.body.external_force) + state_force;
        let mut driven = total.length_squared() >= VECTOR_EPSILON_SQ;

        if let Some(path) = self.body.path.as_mut().filter(|p| p.is_active()) {
            total += path.desired_velocity(agent.position, agent.max_speed) - agent.velocity;
            driven = true;
        } else if let Some(target) = self.body.target {
            total += self.body.implicit_arrive(target, ctx.dt);
            driven = true;
        }

        let offloaded = ctx.flocking_offloaded;
        let runs = |b: &WeightedBehavior| b.active && !(offloaded && b.behavior.is_flocking());
        let has_behaviors = self.behaviors_enabled && self.behaviors.iter().any(|b| b.active);

        if has_behaviors {
            let radius = self.body.params.neighbor_radius;
            self.neighbor_buffer.clear();
            if self.behaviors.iter().any(|b| runs(b) && b.behavior.needs_neighbors()) {
                ctx.neighbors.neighbors_within(agent.position, radius, &mut self.neighbor_buffer);
            }
            let input = SteeringInput {
                agent,
                neighbors: &self.neighbor_buffer,
                neighbor_radius: radius,
                movement_target: self.body.target,
                formation_target: self.body.formation_target,
                agents: &*ctx.neighbors,
                obstacles: ctx.obstacles,
            };
            let mut behavior_force = Vec3::ZERO;
            for wb in self.behaviors.iter_mut().filter(|b| runs(&**b)) {
                behavior_force += wb.behavior.compute(&input, &mut self.rng) * wb.weight;
            }
            driven |= behavior_force.length_squared() >= VECTOR_EPSILON_SQ;
            total += behavior_force;
        }
        if !driven {
            // nothing steers the agent: come to rest
            total += self.body.braking_force(ctx.dt);
        }

        let net = truncate(total, agent.max_force);
        self.last_steering = net;
        net
    }

    /// Apply `force` for `dt` seconds.
    ///
    /// Velocity is clamped to max speed. Below the minimal-motion speed the
    /// position and heading are left alone.
    pub fn integrate(&mut self, force: Vec3, dt: f32) {
        if !self.is_alive() || dt <= 0.0 {
            return;
        }
        let params = self.body.params;
        let acceleration = force / params.mass;
        let velocity = truncate(self.body.velocity + acceleration * dt, params.max_speed);
        self.body.velocity = velocity;
        if velocity.length() < params.min_motion_speed {
            return;
        }
        self.body.position += velocity * dt;
        self.body.heading = rotate_towards(self.body.heading, horizontal(velocity), params.turn_rate * dt);
        self.body.dirty = true;
    }
}

/// Pursuit named by a seek or flee message: the payload agent if present,
/// else the message position.
fn pursuit_of(message: &Message) -> Option<Pursuit> {
    message
        .payload_agent()
        .map(Pursuit::Agent)
        .or_else(|| message.position().map(Pursuit::Point))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flockwork_types::{MessageTarget, ResourceKind};
    use flockwork_world::{ObstacleField, ObstacleQuery, ResourceNodeParams, ResourceRegistry};

    use super::*;
    use crate::context::NeighborList;
    use crate::steering::{Falloff, SteeringTarget};

    const DT: f32 = 0.1;

    #[derive(Default)]
    struct Harness {
        neighbors: NeighborList,
        resources: ResourceRegistry,
        obstacles: Option<ObstacleField>,
        outbox: Vec<Message>,
        time: f64,
        tick: u64,
        offloaded: bool,
    }

    impl Harness {
        fn ctx(&mut self) -> AgentContext<'_> {
            AgentContext {
                time: self.time,
                dt: DT,
                tick: self.tick,
                neighbors: &mut self.neighbors,
                obstacles: self.obstacles.as_ref().map(|o| o as &dyn ObstacleQuery),
                resources: &mut self.resources,
                outbox: &mut self.outbox,
                flocking_offloaded: self.offloaded,
            }
        }

        fn step(&mut self, agent: &mut Agent) {
            self.neighbors.upsert(agent.snapshot());
            agent.update(&mut self.ctx());
            self.time += f64::from(DT);
            self.tick += 1;
        }

        fn send(&mut self, agent: &mut Agent, message: &Message) -> bool {
            agent.handle_message(message, &mut self.ctx())
        }
    }

    fn agent(id: u64, position: Vec3) -> Agent {
        Agent::new(AgentId::from_raw(id), AgentParams::default(), position, id).unwrap()
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = AgentParams {
            max_speed: -1.0,
            ..AgentParams::default()
        };
        assert!(Agent::new(AgentId::from_raw(1), params, Vec3::ZERO, 0).is_err());
    }

    #[test]
    fn net_force_and_speed_stay_within_limits() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        a.add_behavior(
            Behavior::Seek {
                target: SteeringTarget::Point(Vec3::new(100.0, 0.0, 0.0)),
            },
            50.0,
        );
        a.apply_external_force(Vec3::new(0.0, 0.0, 500.0));
        for _ in 0..50 {
            h.step(&mut a);
            assert!(a.last_steering().length() <= a.params().max_force + 1e-3);
            assert!(a.velocity().length() <= a.params().max_speed + 1e-3);
        }
    }

    #[test]
    fn move_order_arrives_and_goes_idle() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        assert!(h.send(&mut a, &Message::move_to(Vec3::new(6.0, 0.0, 0.0))));
        assert_eq!(a.state(), StateKind::Moving);
        for _ in 0..100 {
            h.step(&mut a);
        }
        assert_eq!(a.state(), StateKind::Idle);
        assert!(a.position().distance(Vec3::new(6.0, 0.0, 0.0)) <= a.params().arrival_distance + 0.5);
        assert_eq!(a.state_machine().previous(), Some(StateKind::Moving));
    }

    #[test]
    fn idle_agent_without_behaviors_comes_to_rest() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        a.set_velocity(Vec3::new(3.0, 0.0, 0.0));
        for _ in 0..30 {
            h.step(&mut a);
        }
        assert!(a.velocity().length() < 0.05);
    }

    #[test]
    fn heading_turns_at_bounded_rate() {
        let params = AgentParams {
            turn_rate: 1.0,
            ..AgentParams::default()
        };
        let mut a = Agent::new(AgentId::from_raw(1), params, Vec3::ZERO, 0).unwrap();
        a.set_velocity(Vec3::new(0.0, 0.0, -5.0));
        a.integrate(Vec3::ZERO, DT);
        // started facing +z, may turn at most 0.1 rad
        assert!(a.heading().angle_between(Vec3::Z) <= 0.1 + 1e-4);
    }

    #[test]
    fn tiny_velocity_does_not_move_the_agent() {
        let mut a = agent(1, Vec3::ONE);
        a.take_dirty();
        a.set_velocity(Vec3::new(0.001, 0.0, 0.0));
        a.integrate(Vec3::ZERO, DT);
        assert_eq!(a.position(), Vec3::ONE);
        assert!(!a.is_dirty());
    }

    #[test]
    fn offloaded_flocking_is_skipped() {
        let mut h = Harness::default();
        h.neighbors.upsert(agent(2, Vec3::new(2.0, 0.0, 0.0)).snapshot());
        let mut a = agent(1, Vec3::ZERO);
        a.add_behavior(Behavior::Cohesion { radius: None }, 1.0);
        h.neighbors.upsert(a.snapshot());
        assert!(a.compute_steering(&mut h.ctx()).x > 0.0);
        h.offloaded = true;
        assert_eq!(a.compute_steering(&mut h.ctx()), Vec3::ZERO);
        a.apply_external_force(Vec3::X);
        assert_eq!(a.compute_steering(&mut h.ctx()), Vec3::X);
    }

    #[test]
    fn flocking_profile_keeps_every_active_rule() {
        let mut a = agent(1, Vec3::ZERO);
        let first = a.add_behavior(
            Behavior::Separation {
                radius: Some(2.0),
                falloff: Falloff::Linear,
            },
            3.0,
        );
        a.add_behavior(
            Behavior::Separation {
                radius: Some(1.0),
                falloff: Falloff::InverseSquare,
            },
            1.0,
        );
        a.add_behavior(Behavior::Cohesion { radius: Some(50.0) }, 0.5);
        a.add_behavior(Behavior::Cohesion { radius: None }, 2.0);

        let profile = a.flocking_profile();
        let rules: Vec<FlockRule> = profile.terms.iter().map(|t| t.rule).collect();
        assert_eq!(
            rules,
            vec![
                FlockRule::Separation(Falloff::Linear),
                FlockRule::Separation(Falloff::InverseSquare),
                FlockRule::Cohesion,
                FlockRule::Cohesion,
            ]
        );
        let capped = profile.terms.get(2).unwrap();
        assert!((capped.radius - a.params().neighbor_radius).abs() < f32::EPSILON);
        assert!((profile.terms.get(3).unwrap().weight - 2.0).abs() < f32::EPSILON);

        assert!(a.set_behavior_active(first, false));
        let profile = a.flocking_profile();
        assert_eq!(profile.terms.len(), 3);
        assert!((profile.terms.first().unwrap().weight - 1.0).abs() < f32::EPSILON);
        a.set_behaviors_enabled(false);
        assert!(a.flocking_profile().is_empty());
    }

    #[test]
    fn gather_return_loop_conserves_resources() {
        let mut h = Harness::default();
        let node = h
            .resources
            .add(&ResourceNodeParams {
                total_capacity: 30.0,
                harvest_rate: 5.0,
                ..ResourceNodeParams::new(ResourceKind::Wood, Vec3::new(6.0, 0.0, 0.0))
            })
            .unwrap();
        let params = AgentParams {
            carry_capacity: 10.0,
            gather_completion_threshold: 1.0,
            ..AgentParams::default()
        };
        let mut a = Agent::new(AgentId::from_raw(1), params, Vec3::ZERO, 1).unwrap();
        assert!(h.send(&mut a, &Message::gather(node)));

        let mut saw_returning = false;
        let mut saw_regather = false;
        for _ in 0..400 {
            h.step(&mut a);
            let remaining = h.resources.get(node).map_or(0.0, |n| n.current());
            assert!((remaining + a.carried() + a.delivered() - 30.0).abs() < 1e-3);
            assert!(a.carried() <= params.carry_capacity + 1e-3);
            match a.state() {
                StateKind::Returning => saw_returning = true,
                StateKind::Gathering if a.delivered() > 0.0 => saw_regather = true,
                _ => {}
            }
        }
        assert!(saw_returning);
        assert!(saw_regather);
        assert!(a.delivered() >= 10.0 - 1e-3);
    }

    #[test]
    fn depletion_notice_sends_gatherer_home() {
        let mut h = Harness::default();
        let node = h
            .resources
            .add(&ResourceNodeParams::new(ResourceKind::Food, Vec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let mut a = agent(1, Vec3::ZERO);
        h.send(&mut a, &Message::gather(node));
        for _ in 0..5 {
            h.step(&mut a);
        }
        assert!(a.carried() > 0.0);
        assert!(h.send(&mut a, &Message::resource_depleted(node)));
        assert_eq!(a.state(), StateKind::Returning);
        assert!(h.resources.get(node).unwrap().harvesters().is_empty());
    }

    #[test]
    fn harvesting_a_node_dry_broadcasts_depletion() {
        let mut h = Harness::default();
        let node = h
            .resources
            .add(&ResourceNodeParams {
                total_capacity: 1.0,
                harvest_rate: 5.0,
                ..ResourceNodeParams::new(ResourceKind::Stone, Vec3::ZERO)
            })
            .unwrap();
        let mut a = agent(1, Vec3::ZERO);
        h.send(&mut a, &Message::gather(node));
        for _ in 0..5 {
            h.step(&mut a);
        }
        let notice = h
            .outbox
            .iter()
            .find(|m| m.kind() == MessageType::ResourceDepleted)
            .unwrap();
        assert!(notice.is_broadcast());
        assert_eq!(notice.payload_resource_node(), Some(node));
        assert_eq!(notice.sender(), Some(a.id()));
    }

    #[test]
    fn lethal_damage_kills_and_dead_agents_ignore_orders() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        a.set_velocity(Vec3::X);
        assert!(h.send(&mut a, &Message::damage(40.0)));
        assert_eq!(a.state(), StateKind::Idle);
        assert!(h.send(&mut a, &Message::damage(100.0)));
        assert_eq!(a.state(), StateKind::Dead);
        assert_eq!(a.velocity(), Vec3::ZERO);

        h.send(&mut a, &Message::move_to(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(a.state(), StateKind::Dead);
        assert!(!a.transition_to(StateData::Idle, &mut h.ctx()));
        h.step(&mut a);
        assert_eq!(a.position(), Vec3::ZERO);
    }

    #[test]
    fn attacker_hits_once_per_interval() {
        let mut h = Harness::default();
        let victim = agent(2, Vec3::new(1.0, 0.0, 0.0));
        h.neighbors.upsert(victim.snapshot());
        let mut a = agent(1, Vec3::ZERO);
        assert!(a.attack(victim.id(), &mut h.ctx()));

        // interval is 1s at 0.1s ticks
        for _ in 0..15 {
            h.step(&mut a);
        }
        let hits: Vec<&Message> = h.outbox.iter().filter(|m| m.kind() == MessageType::Damage).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits.first().map(|m| m.target()), Some(MessageTarget::Agent(victim.id())));

        h.neighbors.remove(victim.id());
        h.step(&mut a);
        assert_eq!(a.state(), StateKind::Idle);
    }

    #[test]
    fn non_looping_patrol_ends_idle() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        let route = vec![Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 3.0)];
        assert!(a.patrol(route, false, &mut h.ctx()));
        for _ in 0..200 {
            h.step(&mut a);
        }
        assert_eq!(a.state(), StateKind::Idle);
        assert!(a.position().distance(Vec3::new(3.0, 0.0, 3.0)) < 1.5);
    }

    #[test]
    fn looping_patrol_keeps_going() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        let route = vec![Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO];
        a.patrol(route, true, &mut h.ctx());
        for _ in 0..200 {
            h.step(&mut a);
        }
        assert_eq!(a.state(), StateKind::Patrolling);
    }

    #[test]
    fn flee_stops_beyond_safe_distance() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        let order = Message::flee_from(Vec3::new(1.0, 0.0, 0.0)).with_value(4.0);
        assert!(h.send(&mut a, &order));
        assert_eq!(a.state(), StateKind::Fleeing);
        for _ in 0..40 {
            h.step(&mut a);
        }
        assert_eq!(a.state(), StateKind::Idle);
        assert!(a.position().x < -2.0);
    }

    #[test]
    fn follow_order_trails_leader_and_ends_when_leader_vanishes() {
        let mut h = Harness::default();
        let leader = agent(2, Vec3::new(0.0, 0.0, 10.0));
        h.neighbors.upsert(leader.snapshot());
        let mut a = agent(1, Vec3::ZERO);
        assert!(h.send(&mut a, &Message::follow(leader.id())));
        assert_eq!(a.state(), StateKind::Following);
        // a repeated order for the same leader changes nothing
        let entered = a.state_machine().entered_at();
        h.step(&mut a);
        h.send(&mut a, &Message::follow(leader.id()));
        assert!((a.state_machine().entered_at() - entered).abs() < f64::EPSILON);
        for _ in 0..60 {
            h.step(&mut a);
        }
        assert!(a.position().distance(Vec3::new(0.0, 0.0, 8.0)) < 1.0);
        h.neighbors.remove(leader.id());
        h.step(&mut a);
        assert_eq!(a.state(), StateKind::Idle);
    }

    #[test]
    fn formation_update_feeds_slot_behavior() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        let slot = Vec3::new(2.0, 0.0, 2.0);
        let update = Message::formation_update(flockwork_types::FormationId::from_raw(1), slot);

        // without a slot behavior the agent just moves there
        assert!(h.send(&mut a, &update));
        assert_eq!(a.state(), StateKind::Moving);

        a.add_behavior(Behavior::FormationSlot(crate::steering::SlotParams::default()), 1.0);
        h.send(&mut a, &Message::stop());
        assert!(h.send(&mut a, &update));
        assert_eq!(a.state(), StateKind::Idle);
        assert_eq!(a.formation_target(), Some(slot));
        for _ in 0..80 {
            h.step(&mut a);
        }
        assert!(a.position().distance(slot) < 0.5);
    }

    #[derive(Debug, Default)]
    struct StraightLine {
        destination: Option<Vec3>,
    }

    impl PathFollower for StraightLine {
        fn is_active(&self) -> bool {
            self.destination.is_some()
        }

        fn desired_velocity(&mut self, position: Vec3, max_speed: f32) -> Vec3 {
            self.destination
                .map_or(Vec3::ZERO, |d| (d - position).normalize_or_zero() * max_speed * 0.5)
        }

        fn set_destination(&mut self, destination: Vec3) {
            self.destination = Some(destination);
        }

        fn clear(&mut self) {
            self.destination = None;
        }
    }

    #[test]
    fn active_path_follower_drives_movement() {
        let mut h = Harness::default();
        let mut a = agent(1, Vec3::ZERO);
        a.set_path_follower(Box::new(StraightLine::default()));
        h.send(&mut a, &Message::move_to(Vec3::new(0.0, 0.0, 20.0)));
        for _ in 0..40 {
            h.step(&mut a);
        }
        // the delegate asks for half speed
        assert!((a.velocity().length() - a.params().max_speed * 0.5).abs() < 0.1);
        assert!(a.clear_path_follower().is_some());
    }
}
