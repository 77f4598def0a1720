//! The simulation world: agent registry, spatial index, and everything the
//! tick cycle drives.
//!
//! [`SimulationWorld`] is constructed and owned by the caller. There is no
//! global registry. Agents are stored in a `BTreeMap` keyed by
//! monotonically increasing [`AgentId`]s, so iteration order is
//! deterministic and an id is never handed out twice.
//!
//! Position changes are not pushed into the spatial index immediately.
//! Agents raise a dirty flag when they move and the world applies all
//! pending index updates once per tick (and before any query made from
//! outside a tick), so an agent moving during the force phase never
//! disturbs neighbor queries made by agents that update after it.

use std::collections::BTreeMap;

use flockwork_agents::{Agent, AgentContext, AgentParams, Neighbor, StateData};
use flockwork_types::{AgentId, FormationId, IdSequence, Message, ResourceNodeId, StateKind};
use flockwork_world::{ObstacleQuery, ResourceNodeParams, ResourceRegistry, SpatialHash};
use glam::Vec3;
use tracing::info;

use crate::batch::BatchSteering;
use crate::bus::{MessageBus, MessageStats};
use crate::clock::SimulationClock;
use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::formation::{FormationAnchor, FormationCoordinator, FormationKind};
use crate::neighbor_cache::{CacheStats, NeighborCache, Snapshot, SnapshotNeighbors};

/// Mixes the world seed with an agent id so every agent gets its own
/// random stream.
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Owner of every agent and of the shared simulation state.
pub struct SimulationWorld {
    pub(crate) config: SimulationConfig,
    pub(crate) clock: SimulationClock,
    pub(crate) ids: IdSequence,
    pub(crate) agents: BTreeMap<AgentId, Agent>,
    pub(crate) index: SpatialHash<AgentId>,
    pub(crate) bus: MessageBus,
    pub(crate) resources: ResourceRegistry,
    pub(crate) formations: FormationCoordinator,
    pub(crate) obstacles: Option<Box<dyn ObstacleQuery>>,
    pub(crate) cache: NeighborCache,
    pub(crate) batch: BatchSteering,
    pub(crate) snapshot: Snapshot,
    pub(crate) outbox: Vec<Message>,
}

impl std::fmt::Debug for SimulationWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationWorld")
            .field("tick", &self.clock.tick())
            .field("time", &self.clock.time())
            .field("agents", &self.agents.len())
            .field("pending_messages", &self.bus.len())
            .field("resources", &self.resources.len())
            .field("formations", &self.formations.len())
            .field("has_obstacles", &self.obstacles.is_some())
            .finish_non_exhaustive()
    }
}

impl SimulationWorld {
    /// Build an empty world.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Config`] if `config` fails validation, or
    /// a world error if the spatial index cannot be built.
    pub fn new(config: SimulationConfig, obstacles: Option<Box<dyn ObstacleQuery>>) -> Result<Self, SimulationError> {
        config.validate()?;
        let index = SpatialHash::new(config.spatial.cell_size)?;
        let batch = BatchSteering::new(config.spatial.cell_size)?;
        let cache = NeighborCache::new(config.neighbor_cache.enabled, config.neighbor_cache.quantum);
        info!(
            seed = config.world.seed,
            cell_size = config.spatial.cell_size,
            cache = cache.is_enabled(),
            batch_min_agents = config.batch.min_agents,
            "Simulation world created"
        );
        Ok(Self {
            config,
            clock: SimulationClock::new(),
            ids: IdSequence::new(),
            agents: BTreeMap::new(),
            index,
            bus: MessageBus::new(),
            resources: ResourceRegistry::new(),
            formations: FormationCoordinator::new(),
            obstacles,
            cache,
            batch,
            snapshot: Snapshot::default(),
            outbox: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The configuration the world was built with.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The simulation clock.
    pub const fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// The spatial index of agent positions.
    pub const fn index(&self) -> &SpatialHash<AgentId> {
        &self.index
    }

    /// The resource nodes.
    pub const fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Mutable access to the resource nodes.
    pub const fn resources_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.resources
    }

    /// The formation coordinator.
    pub const fn formations(&self) -> &FormationCoordinator {
        &self.formations
    }

    /// Static obstacles, if any.
    pub fn obstacles(&self) -> Option<&dyn ObstacleQuery> {
        self.obstacles.as_deref()
    }

    /// Running message totals.
    pub const fn message_stats(&self) -> MessageStats {
        self.bus.stats()
    }

    /// Messages waiting for delivery.
    pub fn pending_messages(&self) -> usize {
        self.bus.len()
    }

    /// Neighbor cache counters.
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Kinematic snapshot taken at the start of the last tick.
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    /// Add an idle agent at `position` with explicit parameters and no
    /// behaviors.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Agent`] if `params` fail validation, or
    /// [`SimulationError::IdsExhausted`] if no identifiers remain.
    pub fn spawn_agent(&mut self, position: Vec3, params: AgentParams) -> Result<AgentId, SimulationError> {
        let id: AgentId = self.ids.next_id().ok_or(SimulationError::IdsExhausted)?;
        let seed = self.config.world.seed ^ id.into_inner().wrapping_mul(SEED_MIX);
        let agent = Agent::new(id, params, position, seed)?;
        self.index.insert(id, position);
        self.agents.insert(id, agent);
        self.cache.invalidate();
        info!(agent = %id, x = position.x, z = position.z, "Agent spawned");
        Ok(id)
    }

    /// Add an agent with the configured default parameters and the
    /// configured flocking behaviors.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_agent`](Self::spawn_agent).
    pub fn spawn_flocker(&mut self, position: Vec3) -> Result<AgentId, SimulationError> {
        let id = self.spawn_agent(position, self.config.agent)?;
        let behaviors = self.config.steering.flocking_behaviors();
        if let Some(agent) = self.agents.get_mut(&id) {
            for wb in behaviors {
                let index = agent.add_behavior(wb.behavior, wb.weight);
                agent.set_behavior_active(index, wb.active);
            }
        }
        Ok(id)
    }

    /// Remove an agent together with its index entry, harvester
    /// registrations, and formation slot. Returns `false` for an unknown
    /// id.
    pub fn despawn_agent(&mut self, id: AgentId) -> bool {
        if self.agents.remove(&id).is_none() {
            return false;
        }
        self.index.remove(id);
        self.resources.release_agent(id);
        self.formations.release_agent(id);
        self.cache.invalidate();
        info!(agent = %id, "Agent despawned");
        true
    }

    /// Look up an agent.
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Mutable access to an agent. The agent is marked dirty, so its index
    /// entry is refreshed at the next flush.
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        let agent = self.agents.get_mut(&id)?;
        agent.mark_dirty();
        Some(agent)
    }

    /// Every agent id in ascending order.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// Every agent in id order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Number of agents, dead ones included.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Number of agents that are not dead.
    pub fn alive_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_alive()).count()
    }

    /// Other live agents within `radius` of agent `id`, sorted by id.
    ///
    /// Pending index updates are applied first.
    pub fn neighbors_of(&mut self, id: AgentId, radius: f32) -> Vec<AgentId> {
        self.flush_dirty_positions();
        let Some(center) = self.agents.get(&id).map(Agent::position) else {
            return Vec::new();
        };
        let radius_sq = radius.max(0.0) * radius.max(0.0);
        let mut candidates = Vec::new();
        self.index.query_into(center, radius, &mut candidates);
        let mut found: Vec<AgentId> = candidates
            .into_iter()
            .filter(|other| *other != id)
            .filter(|other| {
                self.agents
                    .get(other)
                    .is_some_and(|a| a.is_alive() && a.position().distance_squared(center) <= radius_sq)
            })
            .collect();
        found.sort_unstable();
        found
    }

    /// Apply pending index updates for every agent that moved. Returns how
    /// many agents changed cells.
    pub fn flush_dirty_positions(&mut self) -> usize {
        let mut moved: usize = 0;
        for (id, agent) in &mut self.agents {
            if agent.take_dirty() && self.index.update_position(*id, agent.position()) {
                moved = moved.saturating_add(1);
            }
        }
        moved
    }

    pub(crate) fn rebuild_snapshot(&mut self) {
        self.snapshot.rebuild(self.agents.values().map(Agent::snapshot));
    }

    // -----------------------------------------------------------------------
    // Messages and commands
    // -----------------------------------------------------------------------

    /// Queue `message` for one agent. Delivered from the next tick on.
    pub fn send(&mut self, target: AgentId, message: Message) {
        self.bus.send(target, message.at(self.clock.time()));
    }

    /// Queue `message` for every live agent.
    pub fn broadcast(&mut self, message: Message) {
        self.bus.broadcast(message.at(self.clock.time()));
    }

    /// Run `f` on one agent with a full update context, outside the tick
    /// cycle. Messages the agent sends are queued on the bus afterwards.
    pub fn with_agent<R, F>(&mut self, id: AgentId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Agent, &mut AgentContext<'_>) -> R,
    {
        if !self.agents.contains_key(&id) {
            return None;
        }
        self.flush_dirty_positions();
        self.rebuild_snapshot();
        self.cache.invalidate();

        let result = {
            let Self {
                clock,
                agents,
                index,
                resources,
                obstacles,
                cache,
                snapshot,
                outbox,
                ..
            } = self;
            let mut neighbors = SnapshotNeighbors::new(snapshot, index, cache);
            let mut ctx = AgentContext {
                time: clock.time(),
                dt: clock.last_dt(),
                tick: clock.tick(),
                neighbors: &mut neighbors,
                obstacles: obstacles.as_deref(),
                resources,
                outbox,
                flocking_offloaded: false,
            };
            agents.get_mut(&id).map(|agent| f(agent, &mut ctx))
        };
        for message in self.outbox.drain(..) {
            self.bus.enqueue(message);
        }
        result
    }

    /// Force an agent into `state`. Returns `false` for an unknown or dead
    /// agent.
    pub fn transition_agent(&mut self, id: AgentId, state: StateData) -> bool {
        self.with_agent(id, |agent, ctx| agent.transition_to(state, ctx))
            .unwrap_or(false)
    }

    /// Send an agent on a patrol route.
    pub fn patrol(&mut self, id: AgentId, waypoints: Vec<Vec3>, looping: bool) -> bool {
        self.with_agent(id, |agent, ctx| agent.patrol(waypoints, looping, ctx))
            .unwrap_or(false)
    }

    /// Order `attacker` to attack `target`.
    pub fn attack(&mut self, attacker: AgentId, target: AgentId) -> bool {
        if !self.agents.contains_key(&target) {
            return false;
        }
        self.with_agent(attacker, |agent, ctx| agent.attack(target, ctx))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Resources and formations
    // -----------------------------------------------------------------------

    /// Add a resource node.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::World`] for invalid node parameters.
    pub fn add_resource(&mut self, params: &ResourceNodeParams) -> Result<ResourceNodeId, SimulationError> {
        Ok(self.resources.add(params)?)
    }

    /// Create a formation. `spacing` defaults to the configured spacing.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidFormation`] for bad geometry.
    pub fn create_formation(
        &mut self,
        name: impl Into<String>,
        kind: FormationKind,
        count: usize,
        spacing: Option<f32>,
        anchor: FormationAnchor,
    ) -> Result<FormationId, SimulationError> {
        let spacing = spacing.unwrap_or(self.config.formation.default_spacing);
        self.formations.create(name, kind, count, spacing, anchor)
    }

    /// Put an existing agent into the first free slot of `formation`.
    pub fn join_formation(&mut self, formation: FormationId, agent: AgentId) -> Option<usize> {
        if !self.agents.get(&agent).is_some_and(Agent::is_alive) {
            return None;
        }
        self.formations.assign(formation, agent)
    }

    /// Take `agent` out of whatever formation it is in and clear its slot
    /// target.
    pub fn leave_formation(&mut self, agent: AgentId) -> bool {
        let released = self.formations.release_agent(agent);
        if released && let Some(a) = self.agents.get_mut(&agent) {
            a.set_formation_target(None);
        }
        released
    }

    /// Put an existing agent into a specific slot of `formation`.
    pub fn join_formation_slot(&mut self, formation: FormationId, agent: AgentId, slot: usize) -> bool {
        if !self.agents.get(&agent).is_some_and(Agent::is_alive) {
            return false;
        }
        self.formations.assign_to_slot(formation, agent, slot)
    }

    /// Move the anchor of `formation`.
    pub fn set_formation_anchor(&mut self, formation: FormationId, anchor: FormationAnchor) -> bool {
        self.formations.set_anchor(formation, anchor)
    }

    /// Delete a formation and clear the slot target of every member.
    /// Returns the released agents.
    pub fn remove_formation(&mut self, formation: FormationId) -> Vec<AgentId> {
        let released = self.formations.remove(formation);
        self.clear_formation_targets(&released);
        released
    }

    /// Reshape a formation. `spacing` defaults to the configured spacing.
    /// Agents that no longer fit lose their slot target and are returned.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidFormation`] for an unknown
    /// formation or bad geometry.
    pub fn regenerate_formation(
        &mut self,
        formation: FormationId,
        kind: FormationKind,
        count: usize,
        spacing: Option<f32>,
    ) -> Result<Vec<AgentId>, SimulationError> {
        let spacing = spacing.unwrap_or(self.config.formation.default_spacing);
        let overflow = self.formations.regenerate(formation, kind, count, spacing)?;
        self.clear_formation_targets(&overflow);
        Ok(overflow)
    }

    fn clear_formation_targets(&mut self, agents: &[AgentId]) {
        for id in agents {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.set_formation_target(None);
            }
        }
    }

    /// How many agents are in each state.
    pub fn state_counts(&self) -> BTreeMap<StateKind, usize> {
        let mut counts = BTreeMap::new();
        for agent in self.agents.values() {
            let entry = counts.entry(agent.state()).or_insert(0_usize);
            *entry = entry.saturating_add(1);
        }
        counts
    }

    /// Snapshot of one agent as neighbors see it.
    pub fn agent_snapshot(&self, id: AgentId) -> Option<Neighbor> {
        self.agents.get(&id).map(Agent::snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flockwork_types::ResourceKind;

    use super::*;

    fn world() -> SimulationWorld {
        SimulationWorld::new(SimulationConfig::default(), None).unwrap()
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut world = world();
        let a = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let b = world.spawn_agent(Vec3::X, AgentParams::default()).unwrap();
        assert!(b > a);
        assert!(world.despawn_agent(a));
        assert!(!world.despawn_agent(a));
        let c = world.spawn_agent(Vec3::Z, AgentParams::default()).unwrap();
        assert!(c > b);
        assert_eq!(world.agent_ids(), vec![b, c]);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut world = world();
        let params = AgentParams {
            mass: 0.0,
            ..AgentParams::default()
        };
        assert!(matches!(
            world.spawn_agent(Vec3::ZERO, params),
            Err(SimulationError::Agent { .. })
        ));
        assert_eq!(world.agent_count(), 0);
    }

    #[test]
    fn despawn_releases_index_and_formation_slot() {
        let mut world = world();
        let id = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let formation = world
            .create_formation(
                "line",
                FormationKind::Line,
                2,
                None,
                FormationAnchor::Fixed {
                    position: Vec3::ZERO,
                    heading: Vec3::Z,
                },
            )
            .unwrap();
        assert_eq!(world.join_formation(formation, id), Some(0));
        assert!(world.index().contains(id));

        assert!(world.despawn_agent(id));
        assert!(!world.index().contains(id));
        assert_eq!(world.formations().formation_of(id), None);
        assert_eq!(world.formations().get(formation).unwrap().occupied(), 0);
    }

    fn fixed_anchor() -> FormationAnchor {
        FormationAnchor::Fixed {
            position: Vec3::ZERO,
            heading: Vec3::Z,
        }
    }

    #[test]
    fn regenerate_clears_targets_of_agents_that_no_longer_fit() {
        let mut world = world();
        let ids: Vec<AgentId> = (0..4_u8)
            .map(|i| world.spawn_agent(Vec3::new(f32::from(i), 0.0, 0.0), AgentParams::default()).unwrap())
            .collect();
        let formation = world
            .create_formation("line", FormationKind::Line, 4, None, fixed_anchor())
            .unwrap();
        for id in &ids {
            assert!(world.join_formation(formation, *id).is_some());
            world.agent_mut(*id).unwrap().set_formation_target(Some(Vec3::ONE));
        }

        let overflow = world
            .regenerate_formation(formation, FormationKind::Line, 2, None)
            .unwrap();
        assert_eq!(overflow.len(), 2);
        for id in &overflow {
            assert_eq!(world.agent(*id).unwrap().formation_target(), None);
            assert_eq!(world.formations().formation_of(*id), None);
        }
        let kept: Vec<&AgentId> = ids.iter().filter(|id| !overflow.contains(*id)).collect();
        assert_eq!(kept.len(), 2);
        for id in kept {
            assert_eq!(world.formations().formation_of(*id), Some(formation));
        }
        assert_eq!(world.formations().get(formation).unwrap().occupied(), 2);
    }

    #[test]
    fn remove_formation_clears_every_member_target() {
        let mut world = world();
        let a = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let b = world.spawn_agent(Vec3::X, AgentParams::default()).unwrap();
        let formation = world
            .create_formation("wedge", FormationKind::Wedge, 3, Some(2.0), fixed_anchor())
            .unwrap();
        for id in [a, b] {
            assert!(world.join_formation(formation, id).is_some());
            world.agent_mut(id).unwrap().set_formation_target(Some(Vec3::ONE));
        }

        let mut released = world.remove_formation(formation);
        released.sort_unstable();
        assert_eq!(released, vec![a, b]);
        assert!(world.formations().is_empty());
        for id in [a, b] {
            assert_eq!(world.agent(id).unwrap().formation_target(), None);
        }
        assert!(world.remove_formation(formation).is_empty());
    }

    #[test]
    fn join_formation_slot_rejects_taken_slots() {
        let mut world = world();
        let a = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let b = world.spawn_agent(Vec3::X, AgentParams::default()).unwrap();
        let formation = world
            .create_formation("line", FormationKind::Line, 2, None, fixed_anchor())
            .unwrap();
        assert!(world.join_formation_slot(formation, a, 1));
        assert!(!world.join_formation_slot(formation, b, 1));
        assert!(world.join_formation_slot(formation, b, 0));
        assert!(world.set_formation_anchor(formation, FormationAnchor::Fixed {
            position: Vec3::new(5.0, 0.0, 5.0),
            heading: Vec3::X,
        }));
    }

    #[test]
    fn agent_mut_defers_index_update_until_flush() {
        let mut world = world();
        let id = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let before = world.index().cell_of(id);
        world.agent_mut(id).unwrap().set_position(Vec3::new(55.0, 0.0, 55.0));
        assert_eq!(world.index().cell_of(id), before);
        assert_eq!(world.flush_dirty_positions(), 1);
        assert_eq!(world.index().cell_of(id), Some(world.index().cell_key(Vec3::new(55.0, 0.0, 55.0))));
        assert_eq!(world.flush_dirty_positions(), 0);
    }

    #[test]
    fn neighbors_of_is_exact_and_excludes_self() {
        let mut world = world();
        let center = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let near = world.spawn_agent(Vec3::new(3.0, 0.0, 0.0), AgentParams::default()).unwrap();
        let _corner = world.spawn_agent(Vec3::new(3.0, 0.0, 3.0), AgentParams::default()).unwrap();
        assert_eq!(world.neighbors_of(center, 3.5), vec![near]);
        assert!(world.neighbors_of(AgentId::from_raw(999), 3.5).is_empty());
    }

    #[test]
    fn commands_run_with_a_context() {
        let mut world = world();
        let attacker = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
        let victim = world.spawn_agent(Vec3::X, AgentParams::default()).unwrap();
        assert!(world.attack(attacker, victim));
        assert_eq!(world.agent(attacker).unwrap().state(), StateKind::Attacking);
        assert!(!world.attack(attacker, AgentId::from_raw(77)));

        assert!(world.patrol(victim, vec![Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO], true));
        assert_eq!(world.agent(victim).unwrap().state(), StateKind::Patrolling);

        assert!(world.transition_agent(victim, StateData::Dead));
        assert!(!world.transition_agent(victim, StateData::Idle));
        assert_eq!(world.state_counts().get(&StateKind::Dead), Some(&1));
    }

    #[test]
    fn resources_are_registered() {
        let mut world = world();
        let node = world
            .add_resource(&ResourceNodeParams::new(ResourceKind::Food, Vec3::new(4.0, 0.0, 4.0)))
            .unwrap();
        assert!(world.resources().get(node).is_some());
        assert_eq!(world.resources().len(), 1);
    }
}
