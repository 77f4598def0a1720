//! Depletable, concurrently-harvestable resource nodes.
//!
//! A [`ResourceNode`] holds a `current` amount out of a `total_capacity`.
//! Agents first register as harvesters with
//! [`ResourceNode::try_start_harvesting`] (capacity, harvester-slot, and
//! range checks) and then draw `min(rate * dt, current)` per call to
//! [`ResourceNode::harvest`]. When `current` reaches zero the node reports
//! depletion exactly once, drops its harvesters, and, if configured to,
//! starts a respawn timer that restores full capacity.
//!
//! # Invariants
//!
//! - `0 <= current <= total_capacity`
//! - `harvesters.len() <= max_harvesters`
//!
//! The [`ResourceRegistry`] owns every node in a world and answers
//! "nearest node matching a predicate" queries. Destroyed nodes are only
//! marked; they are pruned lazily the next time a lookup walks the table.

use std::collections::{BTreeMap, BTreeSet};

use flockwork_types::math::horizontal_distance;
use flockwork_types::{AgentId, IdSequence, ResourceKind, ResourceNodeId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::WorldError;

/// Construction parameters for a [`ResourceNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNodeParams {
    /// What the node yields.
    pub kind: ResourceKind,
    /// World position of the node.
    pub position: Vec3,
    /// Amount the node holds when full. Must be positive.
    pub total_capacity: f32,
    /// Units harvested per second by one harvester. Must be positive.
    pub harvest_rate: f32,
    /// Horizontal distance within which an agent may harvest. Must be positive.
    pub harvest_radius: f32,
    /// Maximum concurrent harvesters. Must be at least 1.
    pub max_harvesters: usize,
    /// Whether the node refills after being depleted.
    pub respawns: bool,
    /// Seconds between depletion and refill.
    pub respawn_delay: f32,
}

impl ResourceNodeParams {
    /// Parameters with common defaults for the given kind and position.
    pub const fn new(kind: ResourceKind, position: Vec3) -> Self {
        Self {
            kind,
            position,
            total_capacity: 100.0,
            harvest_rate: 5.0,
            harvest_radius: 2.0,
            max_harvesters: 3,
            respawns: false,
            respawn_delay: 30.0,
        }
    }

    fn validate(&self) -> Result<(), WorldError> {
        if !(self.total_capacity.is_finite() && self.total_capacity > 0.0) {
            return Err(WorldError::InvalidResourceNode {
                field: "total_capacity",
                reason: "must be a positive finite number",
            });
        }
        if !(self.harvest_rate.is_finite() && self.harvest_rate > 0.0) {
            return Err(WorldError::InvalidResourceNode {
                field: "harvest_rate",
                reason: "must be a positive finite number",
            });
        }
        if !(self.harvest_radius.is_finite() && self.harvest_radius > 0.0) {
            return Err(WorldError::InvalidResourceNode {
                field: "harvest_radius",
                reason: "must be a positive finite number",
            });
        }
        if self.max_harvesters == 0 {
            return Err(WorldError::InvalidResourceNode {
                field: "max_harvesters",
                reason: "must be at least 1",
            });
        }
        if self.respawns && !(self.respawn_delay.is_finite() && self.respawn_delay >= 0.0) {
            return Err(WorldError::InvalidResourceNode {
                field: "respawn_delay",
                reason: "must be a non-negative finite number",
            });
        }
        Ok(())
    }
}

/// Result of a single [`ResourceNode::harvest`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarvestOutcome {
    /// Units actually removed from the node.
    pub amount: f32,
    /// Whether this call emptied the node.
    pub depleted: bool,
}

impl HarvestOutcome {
    /// Nothing harvested.
    pub const NONE: Self = Self {
        amount: 0.0,
        depleted: false,
    };
}

/// A harvestable, depletable resource node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    id: ResourceNodeId,
    kind: ResourceKind,
    position: Vec3,
    total_capacity: f32,
    current: f32,
    harvest_rate: f32,
    harvest_radius: f32,
    max_harvesters: usize,
    harvesters: BTreeSet<AgentId>,
    respawns: bool,
    respawn_delay: f32,
    /// Seconds left until refill, while a respawn is pending.
    respawn_timer: Option<f32>,
    /// Marked by [`ResourceRegistry::destroy`]; pruned lazily.
    destroyed: bool,
}

impl ResourceNode {
    /// Build a full node from validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidResourceNode`] if any parameter is out
    /// of range.
    pub fn new(id: ResourceNodeId, params: &ResourceNodeParams) -> Result<Self, WorldError> {
        params.validate()?;
        Ok(Self {
            id,
            kind: params.kind,
            position: params.position,
            total_capacity: params.total_capacity,
            current: params.total_capacity,
            harvest_rate: params.harvest_rate,
            harvest_radius: params.harvest_radius,
            max_harvesters: params.max_harvesters,
            harvesters: BTreeSet::new(),
            respawns: params.respawns,
            respawn_delay: params.respawn_delay,
            respawn_timer: None,
            destroyed: false,
        })
    }

    /// The node's identifier.
    pub const fn id(&self) -> ResourceNodeId {
        self.id
    }

    /// What the node yields.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// World position of the node.
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Amount held when full.
    pub const fn total_capacity(&self) -> f32 {
        self.total_capacity
    }

    /// Amount currently left.
    pub const fn current(&self) -> f32 {
        self.current
    }

    /// Units per second per harvester.
    pub const fn harvest_rate(&self) -> f32 {
        self.harvest_rate
    }

    /// Harvest range.
    pub const fn harvest_radius(&self) -> f32 {
        self.harvest_radius
    }

    /// Maximum concurrent harvesters.
    pub const fn max_harvesters(&self) -> usize {
        self.max_harvesters
    }

    /// Agents currently registered as harvesters.
    pub const fn harvesters(&self) -> &BTreeSet<AgentId> {
        &self.harvesters
    }

    /// Whether the node has nothing left.
    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    /// Whether a respawn is pending.
    pub const fn is_respawning(&self) -> bool {
        self.respawn_timer.is_some()
    }

    /// Whether the node was destroyed and awaits pruning.
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Whether `position` is within harvest range of the node.
    pub fn in_range(&self, position: Vec3) -> bool {
        horizontal_distance(self.position, position) <= self.harvest_radius
    }

    /// Register `agent` as a harvester.
    ///
    /// Succeeds only if the node has capacity left, a harvester slot is free,
    /// and `agent_position` is within the harvest radius. An agent that is
    /// already harvesting succeeds again while in range.
    pub fn try_start_harvesting(&mut self, agent: AgentId, agent_position: Vec3) -> bool {
        if self.destroyed || self.is_depleted() || !self.in_range(agent_position) {
            return false;
        }
        if self.harvesters.contains(&agent) {
            return true;
        }
        if self.harvesters.len() >= self.max_harvesters {
            return false;
        }
        self.harvesters.insert(agent);
        debug!(node = %self.id, %agent, harvesters = self.harvesters.len(), "Harvester joined");
        true
    }

    /// Unregister `agent`. Returns whether it was harvesting.
    pub fn stop_harvesting(&mut self, agent: AgentId) -> bool {
        self.harvesters.remove(&agent)
    }

    /// Draw resources for one harvester over `dt` seconds.
    ///
    /// Returns zero for agents that are not registered harvesters. The
    /// amount is `min(rate * dt, current)`. On the call that empties the
    /// node, `depleted` is set, the harvester set is cleared, and a respawn
    /// timer starts if the node respawns.
    pub fn harvest(&mut self, agent: AgentId, dt: f32) -> HarvestOutcome {
        if self.destroyed || !self.harvesters.contains(&agent) || self.is_depleted() {
            return HarvestOutcome::NONE;
        }
        let requested = (self.harvest_rate * dt.max(0.0)).max(0.0);
        let amount = requested.min(self.current);
        self.current = (self.current - amount).clamp(0.0, self.total_capacity);

        if self.current > 0.0 {
            return HarvestOutcome {
                amount,
                depleted: false,
            };
        }

        self.current = 0.0;
        self.harvesters.clear();
        if self.respawns {
            self.respawn_timer = Some(self.respawn_delay);
        }
        info!(node = %self.id, kind = ?self.kind, respawns = self.respawns, "Resource node depleted");
        HarvestOutcome {
            amount,
            depleted: true,
        }
    }

    /// Refill to full capacity and drop all harvesters.
    pub fn respawn(&mut self) {
        self.current = self.total_capacity;
        self.harvesters.clear();
        self.respawn_timer = None;
        debug!(node = %self.id, "Resource node respawned");
    }

    /// Advance the respawn timer by `dt` seconds. Returns whether the node
    /// respawned during this call.
    pub fn tick(&mut self, dt: f32) -> bool {
        let Some(remaining) = self.respawn_timer else {
            return false;
        };
        let remaining = remaining - dt.max(0.0);
        if remaining <= 0.0 {
            self.respawn();
            true
        } else {
            self.respawn_timer = Some(remaining);
            false
        }
    }
}

/// Owner of every resource node in a world.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    nodes: BTreeMap<ResourceNodeId, ResourceNode>,
    ids: IdSequence,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            ids: IdSequence::new(),
        }
    }

    /// Create and register a node.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidResourceNode`] for bad parameters, or
    /// [`WorldError::IdsExhausted`] if no identifiers remain.
    pub fn add(&mut self, params: &ResourceNodeParams) -> Result<ResourceNodeId, WorldError> {
        let id: ResourceNodeId = self.ids.next_id().ok_or(WorldError::IdsExhausted)?;
        let node = ResourceNode::new(id, params)?;
        info!(node = %id, kind = ?params.kind, capacity = params.total_capacity, "Resource node added");
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Look up a live node.
    pub fn get(&self, id: ResourceNodeId) -> Option<&ResourceNode> {
        self.nodes.get(&id).filter(|node| !node.destroyed)
    }

    /// Look up a live node mutably.
    pub fn get_mut(&mut self, id: ResourceNodeId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(&id).filter(|node| !node.destroyed)
    }

    /// Mark a node as destroyed. It stops answering lookups immediately and
    /// is removed from the table on the next [`ResourceRegistry::nearest`].
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::ResourceNodeNotFound`] for unknown ids.
    pub fn destroy(&mut self, id: ResourceNodeId) -> Result<(), WorldError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(WorldError::ResourceNodeNotFound(id))?;
        node.destroyed = true;
        node.harvesters.clear();
        info!(node = %id, "Resource node destroyed");
        Ok(())
    }

    /// The nearest live node to `position` for which `predicate` holds.
    ///
    /// Destroyed nodes encountered in the table are pruned.
    pub fn nearest<P>(&mut self, position: Vec3, predicate: P) -> Option<ResourceNodeId>
    where
        P: Fn(&ResourceNode) -> bool,
    {
        let before = self.nodes.len();
        self.nodes.retain(|_, node| !node.destroyed);
        let pruned = before.saturating_sub(self.nodes.len());
        if pruned > 0 {
            debug!(pruned, "Pruned destroyed resource nodes");
        }

        self.nodes
            .values()
            .filter(|node| predicate(node))
            .map(|node| (node.id, node.position.distance_squared(position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Register `agent` as a harvester on `node`. See
    /// [`ResourceNode::try_start_harvesting`]. Unknown nodes return `false`.
    pub fn try_start_harvesting(&mut self, node: ResourceNodeId, agent: AgentId, agent_position: Vec3) -> bool {
        self.get_mut(node)
            .is_some_and(|n| n.try_start_harvesting(agent, agent_position))
    }

    /// Harvest from `node`. Unknown nodes yield nothing.
    pub fn harvest(&mut self, node: ResourceNodeId, agent: AgentId, dt: f32) -> HarvestOutcome {
        self.get_mut(node)
            .map_or(HarvestOutcome::NONE, |n| n.harvest(agent, dt))
    }

    /// Remove `agent` from the harvester set of `node`.
    pub fn stop_harvesting(&mut self, node: ResourceNodeId, agent: AgentId) -> bool {
        self.nodes
            .get_mut(&node)
            .is_some_and(|n| n.stop_harvesting(agent))
    }

    /// Remove `agent` from every harvester set (used when an agent leaves
    /// the world).
    pub fn release_agent(&mut self, agent: AgentId) {
        for node in self.nodes.values_mut() {
            node.harvesters.remove(&agent);
        }
    }

    /// Advance respawn timers. Returns the nodes that refilled.
    pub fn tick(&mut self, dt: f32) -> Vec<ResourceNodeId> {
        self.nodes
            .values_mut()
            .filter(|node| !node.destroyed)
            .filter_map(|node| node.tick(dt).then_some(node.id))
            .collect()
    }

    /// Iterate over live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values().filter(|node| !node.destroyed)
    }

    /// Number of entries in the table, including destroyed nodes that have
    /// not been pruned yet.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
