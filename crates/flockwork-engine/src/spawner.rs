//! Scenario spawner for seeding a headless run.
//!
//! A scenario is a flock of free agents, a handful of gatherers working
//! resource nodes, and a formation that trails a patrolling leader, all
//! placed in a circular arena dotted with pillars. Placement is random but
//! seeded from the world seed, so the same config always produces the same
//! scene.

use flockwork_agents::Behavior;
use flockwork_core::{FormationAnchor, FormationKind, SimulationWorld};
use flockwork_types::{AgentId, FormationId, Message, ResourceKind, ResourceNodeId, Vec3};
use flockwork_world::{ObstacleField, ResourceNodeParams, WorldError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;

/// Mixed into the world seed so scenario placement does not share a stream
/// with the agents' wander jitter.
const SCENARIO_SEED_SALT: u64 = 0x5CE7_A210;

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Configuration for the scenario spawner, loaded from the `scenario`
/// section of the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioConfig {
    /// Radius of the arena everything is placed in.
    #[serde(default = "default_arena_radius")]
    pub arena_radius: f32,

    /// Number of free flocking agents.
    #[serde(default = "default_flock_size")]
    pub flock_size: u32,

    /// Number of spherical pillars to scatter.
    #[serde(default = "default_pillars")]
    pub pillars: u32,

    /// Radius of each pillar.
    #[serde(default = "default_pillar_radius")]
    pub pillar_radius: f32,

    /// Number of resource nodes.
    #[serde(default = "default_resource_nodes")]
    pub resource_nodes: u32,

    /// Number of gatherers, spread round-robin over the nodes.
    #[serde(default = "default_gatherers")]
    pub gatherers: u32,

    /// Slots in the escort formation, leader included.
    #[serde(default = "default_formation_size")]
    pub formation_size: u32,

    /// Shape of the escort formation.
    #[serde(default = "default_formation_kind")]
    pub formation_kind: FormationKind,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            arena_radius: default_arena_radius(),
            flock_size: default_flock_size(),
            pillars: default_pillars(),
            pillar_radius: default_pillar_radius(),
            resource_nodes: default_resource_nodes(),
            gatherers: default_gatherers(),
            formation_size: default_formation_size(),
            formation_kind: default_formation_kind(),
        }
    }
}

const fn default_arena_radius() -> f32 {
    40.0
}

const fn default_flock_size() -> u32 {
    150
}

const fn default_pillars() -> u32 {
    6
}

const fn default_pillar_radius() -> f32 {
    1.5
}

const fn default_resource_nodes() -> u32 {
    3
}

const fn default_gatherers() -> u32 {
    6
}

const fn default_formation_size() -> u32 {
    7
}

const fn default_formation_kind() -> FormationKind {
    FormationKind::V
}

// -----------------------------------------------------------------------
// Spawning result
// -----------------------------------------------------------------------

/// Everything the spawner placed, for logging and later inspection.
#[derive(Debug, Default)]
pub struct SpawnResult {
    /// Free flocking agents.
    pub flock: Vec<AgentId>,
    /// Resource nodes.
    pub nodes: Vec<ResourceNodeId>,
    /// Agents sent to gather.
    pub gatherers: Vec<AgentId>,
    /// The escort formation, if one was requested.
    pub formation: Option<FormationId>,
    /// The formation leader followed by its members.
    pub escort: Vec<AgentId>,
}

/// Seeded random placement inside the arena.
#[derive(Debug)]
pub struct Scatter {
    rng: SmallRng,
    radius: f32,
}

impl Scatter {
    /// A placement stream for `config`, derived from the world seed.
    pub fn new(config: &ScenarioConfig, world_seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(world_seed ^ SCENARIO_SEED_SALT),
            radius: config.arena_radius.max(1.0),
        }
    }

    /// A uniformly distributed point on the arena disc.
    pub fn point(&mut self) -> Vec3 {
        let angle = self.rng.random_range(0.0..std::f32::consts::TAU);
        let distance = self.radius * self.rng.random::<f32>().sqrt();
        Vec3::new(angle.sin() * distance, 0.0, angle.cos() * distance)
    }

    /// A horizontal vector of the given length in a random direction.
    pub fn heading(&mut self, length: f32) -> Vec3 {
        let angle = self.rng.random_range(0.0..std::f32::consts::TAU);
        Vec3::new(angle.sin(), 0.0, angle.cos()) * length
    }
}

// -----------------------------------------------------------------------
// Spawning
// -----------------------------------------------------------------------

/// Scatter the configured pillars over the arena.
pub fn build_obstacles(config: &ScenarioConfig, scatter: &mut Scatter) -> Result<ObstacleField, WorldError> {
    let mut field = ObstacleField::new();
    for _ in 0..config.pillars {
        field.add_sphere(scatter.point(), config.pillar_radius)?;
    }
    Ok(field)
}

/// Populate `world` with the flock, the gatherers, and the escort.
pub fn spawn_scenario(
    config: &ScenarioConfig,
    world: &mut SimulationWorld,
    scatter: &mut Scatter,
) -> Result<SpawnResult, EngineError> {
    let mut result = SpawnResult::default();
    let cruise = world.config().agent.max_speed * 0.5;

    for _ in 0..config.flock_size {
        let id = world.spawn_flocker(scatter.point())?;
        if let Some(agent) = world.agent_mut(id) {
            agent.set_velocity(scatter.heading(cruise));
        }
        result.flock.push(id);
    }

    spawn_gatherers(config, world, scatter, &mut result)?;
    spawn_escort(config, world, scatter, &mut result)?;

    info!(
        flock = result.flock.len(),
        gatherers = result.gatherers.len(),
        resource_nodes = result.nodes.len(),
        escort = result.escort.len(),
        "Scenario spawned"
    );
    Ok(result)
}

fn spawn_gatherers(
    config: &ScenarioConfig,
    world: &mut SimulationWorld,
    scatter: &mut Scatter,
    result: &mut SpawnResult,
) -> Result<(), EngineError> {
    const KINDS: [ResourceKind; 3] = [ResourceKind::Food, ResourceKind::Wood, ResourceKind::Stone];

    for (_, kind) in (0..config.resource_nodes).zip(KINDS.iter().cycle()) {
        let params = ResourceNodeParams {
            respawns: true,
            ..ResourceNodeParams::new(*kind, scatter.point())
        };
        result.nodes.push(world.add_resource(&params)?);
    }
    if result.nodes.is_empty() {
        if config.gatherers > 0 {
            return Err(EngineError::Scenario {
                message: String::from("gatherers requested without any resource nodes"),
            });
        }
        return Ok(());
    }

    let params = world.config().agent;
    for (_, node) in (0..config.gatherers).zip(result.nodes.iter().cycle()) {
        let id = world.spawn_agent(scatter.point(), params)?;
        world.send(id, Message::gather(*node));
        result.gatherers.push(id);
    }
    Ok(())
}

fn spawn_escort(
    config: &ScenarioConfig,
    world: &mut SimulationWorld,
    scatter: &mut Scatter,
    result: &mut SpawnResult,
) -> Result<(), EngineError> {
    if config.formation_size == 0 {
        return Ok(());
    }
    let params = world.config().agent;
    let slot_params = world.config().steering.formation_slot;

    let leader = world.spawn_agent(scatter.point(), params)?;
    let route: Vec<Vec3> = (0..4).map(|_| scatter.point()).collect();
    world.patrol(leader, route, true);

    let formation = world.create_formation(
        "escort",
        config.formation_kind.clone(),
        usize::try_from(config.formation_size).unwrap_or(usize::MAX),
        None,
        FormationAnchor::Leader(leader),
    )?;
    world.join_formation(formation, leader);
    result.escort.push(leader);

    let start = world.agent(leader).map_or(Vec3::ZERO, flockwork_agents::Agent::position);
    for _ in 1..config.formation_size {
        let id = world.spawn_agent(start + scatter.heading(3.0), params)?;
        if let Some(agent) = world.agent_mut(id) {
            agent.add_behavior(Behavior::FormationSlot(slot_params), 1.0);
        }
        if world.join_formation(formation, id).is_none() {
            return Err(EngineError::Scenario {
                message: format!("escort formation rejected member {id}"),
            });
        }
        result.escort.push(id);
    }
    result.formation = Some(formation);
    Ok(())
}
