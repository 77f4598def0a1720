//! What an agent can see and touch while it updates.
//!
//! Agents never hold references to each other or to the world. Each update
//! receives an [`AgentContext`] that bundles the read-only views (neighbors,
//! obstacles) and the few shared things an agent may change (resource nodes
//! it harvests, messages it sends). The core crate builds one context per
//! agent per phase from its per-tick snapshot, so every agent in a tick sees
//! the same picture of the others regardless of update order.

use flockwork_types::{AgentId, Message, StateKind};
use flockwork_world::{ObstacleQuery, ResourceRegistry};
use glam::Vec3;

// ---------------------------------------------------------------------------
// Neighbors
// ---------------------------------------------------------------------------

/// Kinematic snapshot of another agent, as seen by steering and states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The agent's identifier.
    pub id: AgentId,
    /// Position at the start of the tick.
    pub position: Vec3,
    /// Velocity at the start of the tick.
    pub velocity: Vec3,
    /// Unit heading at the start of the tick.
    pub heading: Vec3,
    /// State the agent was in at the start of the tick.
    pub state: StateKind,
}

impl Neighbor {
    /// Whether the agent was alive at the start of the tick.
    pub fn is_alive(&self) -> bool {
        self.state != StateKind::Dead
    }
}

/// Source of neighbor queries and agent lookups.
///
/// Implementations must return neighbors in a deterministic order and must
/// apply an exact Euclidean distance filter, so that steering results do
/// not depend on how the source buckets or caches its candidates.
pub trait NeighborSource {
    /// Replace `out` with every agent whose position lies within `radius`
    /// of `center`. The querying agent itself may be included; steering
    /// skips it by id.
    fn neighbors_within(&mut self, center: Vec3, radius: f32, out: &mut Vec<Neighbor>);

    /// Look up a single agent by id.
    fn agent(&self, id: AgentId) -> Option<Neighbor>;
}

/// A brute-force [`NeighborSource`] over a plain list.
///
/// Useful for driving agents outside a full simulation world.
#[derive(Debug, Clone, Default)]
pub struct NeighborList {
    entries: Vec<Neighbor>,
}

impl NeighborList {
    /// Wrap a list of agent snapshots.
    pub const fn new(entries: Vec<Neighbor>) -> Self {
        Self { entries }
    }

    /// Add or replace an entry.
    pub fn upsert(&mut self, neighbor: Neighbor) {
        match self.entries.iter_mut().find(|n| n.id == neighbor.id) {
            Some(slot) => *slot = neighbor,
            None => self.entries.push(neighbor),
        }
    }

    /// Remove an entry by id.
    pub fn remove(&mut self, id: AgentId) {
        self.entries.retain(|n| n.id != id);
    }

    /// The wrapped entries.
    pub fn entries(&self) -> &[Neighbor] {
        &self.entries
    }
}

impl NeighborSource for NeighborList {
    fn neighbors_within(&mut self, center: Vec3, radius: f32, out: &mut Vec<Neighbor>) {
        out.clear();
        let radius_sq = radius * radius;
        out.extend(
            self.entries
                .iter()
                .filter(|n| n.position.distance_squared(center) <= radius_sq)
                .copied(),
        );
    }

    fn agent(&self, id: AgentId) -> Option<Neighbor> {
        self.entries.iter().find(|n| n.id == id).copied()
    }
}

// ---------------------------------------------------------------------------
// Path following
// ---------------------------------------------------------------------------

/// External path follower an agent may delegate movement to.
///
/// When a delegate is attached and active, the agent steers toward the
/// delegate's desired velocity instead of arriving at its movement target
/// in a straight line.
pub trait PathFollower: std::fmt::Debug {
    /// Whether the follower currently has a path to follow.
    fn is_active(&self) -> bool;

    /// Velocity the follower wants the agent to have at `position`.
    ///
    /// Implementations should keep the magnitude at or below `max_speed`.
    fn desired_velocity(&mut self, position: Vec3, max_speed: f32) -> Vec3;

    /// Plan a path to `destination`.
    fn set_destination(&mut self, destination: Vec3);

    /// Drop the current path.
    fn clear(&mut self);
}

// ---------------------------------------------------------------------------
// Update context
// ---------------------------------------------------------------------------

/// Everything an agent may read or change during one update.
pub struct AgentContext<'a> {
    /// Simulation time in seconds at the start of the tick.
    pub time: f64,
    /// Tick duration in seconds.
    pub dt: f32,
    /// Tick counter.
    pub tick: u64,
    /// Neighbor queries and agent lookups against the tick snapshot.
    pub neighbors: &'a mut dyn NeighborSource,
    /// Static obstacles, if the world has any.
    pub obstacles: Option<&'a dyn ObstacleQuery>,
    /// Resource nodes the agent may harvest from.
    pub resources: &'a mut ResourceRegistry,
    /// Messages the agent sends. Delivered from the next tick on.
    pub outbox: &'a mut Vec<Message>,
    /// Whether separation, alignment, and cohesion were already computed by
    /// the batch path this tick.
    pub flocking_offloaded: bool,
}

impl std::fmt::Debug for AgentContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("time", &self.time)
            .field("dt", &self.dt)
            .field("tick", &self.tick)
            .field("has_obstacles", &self.obstacles.is_some())
            .field("outbox", &self.outbox.len())
            .field("flocking_offloaded", &self.flocking_offloaded)
            .finish_non_exhaustive()
    }
}
