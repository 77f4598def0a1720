//! End-to-end scenarios for the `flockwork-core` simulation world.
//!
//! Each test builds a small world, drives it through the public API only,
//! and checks a property that has to hold across many ticks: index
//! consistency, FIFO delivery, resource conservation, convergence of a
//! flock, deflection around an obstacle, and equivalence of the optimized
//! paths with the plain sequential one.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::too_many_lines)]

use flockwork_agents::steering::{AvoidanceParams, Falloff, SlotParams};
use flockwork_agents::{AgentParams, Behavior};
use flockwork_core::{FormationAnchor, FormationKind, SimulationConfig, SimulationWorld};
use flockwork_types::{AgentId, Message, ResourceKind, StateKind};
use flockwork_world::{ObstacleField, ResourceNodeParams};
use glam::Vec3;

const DT: f32 = 0.05;

fn config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.batch.enabled = false;
    config
}

fn world(config: SimulationConfig) -> SimulationWorld {
    SimulationWorld::new(config, None).unwrap()
}

/// A 5-wide grid of flockers 4 units apart.
fn spawn_grid(world: &mut SimulationWorld, count: u16) -> Vec<AgentId> {
    (0..count)
        .map(|i| {
            let position = Vec3::new(f32::from(i % 5) * 4.0, 0.0, f32::from(i / 5) * 4.0);
            world.spawn_flocker(position).unwrap()
        })
        .collect()
}

fn spread(world: &SimulationWorld) -> f32 {
    let positions: Vec<Vec3> = world.agents().map(|a| a.position()).collect();
    let centroid = positions.iter().copied().sum::<Vec3>() / positions.len() as f32;
    positions.iter().map(|p| p.distance(centroid)).sum::<f32>() / positions.len() as f32
}

#[test]
fn spatial_index_tracks_every_agent() {
    let mut world = world(config());
    let ids = spawn_grid(&mut world, 25);
    for id in ids.iter().step_by(3) {
        world.send(*id, Message::move_to(Vec3::new(40.0, 0.0, -30.0)));
    }
    for _ in 0..120 {
        world.tick(DT).unwrap();
        let index = world.index();
        assert_eq!(index.len(), world.agent_count());
        for agent in world.agents() {
            assert_eq!(index.cell_of(agent.id()), Some(index.cell_key(agent.position())));
        }
    }
    assert!(world.despawn_agent(ids[0]));
    assert_eq!(world.index().len(), 24);
    assert!(!world.index().contains(ids[0]));
}

#[test]
fn messages_are_fifo_and_bounded_per_tick() {
    let mut config = config();
    config.messaging.max_messages_per_tick = 3;
    let mut world = world(config);
    let id = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
    let destinations: Vec<Vec3> = (1..=7_u8).map(|i| Vec3::new(f32::from(i) * 10.0, 0.0, 0.0)).collect();
    for destination in &destinations {
        world.send(id, Message::move_to(*destination));
    }

    let mut delivered = Vec::new();
    for expected_target in [destinations[2], destinations[5], destinations[6]] {
        let summary = world.tick(DT).unwrap();
        assert!(summary.messages_delivered <= 3);
        delivered.push(summary.messages_delivered);
        assert_eq!(world.agent(id).unwrap().target(), Some(expected_target));
    }
    assert_eq!(delivered, vec![3, 3, 1]);
    assert_eq!(world.pending_messages(), 0);
    assert_eq!(world.message_stats().delivered, 7);
}

#[test]
fn gather_loop_conserves_resources() {
    let mut world = world(config());
    let total = 30.0;
    let params = ResourceNodeParams {
        total_capacity: total,
        ..ResourceNodeParams::new(ResourceKind::Food, Vec3::new(6.0, 0.0, 0.0))
    };
    let node = world.add_resource(&params).unwrap();
    let gatherer = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
    world.send(gatherer, Message::gather(node));

    let mut saw_returning = false;
    for _ in 0..1500 {
        world.tick(DT).unwrap();
        let agent = world.agent(gatherer).unwrap();
        saw_returning |= agent.state() == StateKind::Returning;
        let remaining = world.resources().get(node).map_or(0.0, |n| n.current());
        let accounted = agent.delivered() + agent.carried() + remaining;
        assert!((accounted - total).abs() < 1e-3, "accounted {accounted}");
        assert!(agent.carried() <= agent.params().carry_capacity + 1e-4);
    }

    let agent = world.agent(gatherer).unwrap();
    assert!(saw_returning);
    assert!(agent.delivered() > 15.0);
    assert!(world.resources().get(node).unwrap().current() < total - 15.0);
}

#[test]
fn flock_contracts_under_cohesion() {
    let mut config = config();
    config.agent.neighbor_radius = 20.0;
    config.steering.separation_radius = 1.5;
    config.steering.alignment_weight = 0.5;
    config.steering.alignment_radius = 20.0;
    config.steering.cohesion_radius = 20.0;
    config.steering.wander_weight = 0.0;
    config.steering.avoidance_weight = 0.0;
    let mut world = world(config);
    spawn_grid(&mut world, 20);

    let before = spread(&world);
    for _ in 0..300 {
        let summary = world.tick(DT).unwrap();
        assert_eq!(summary.alive, 20);
    }
    let after = spread(&world);
    assert!(after < before * 0.5, "spread {before} -> {after}");
    for agent in world.agents() {
        assert!(agent.velocity().length() <= agent.params().max_speed + 1e-3);
    }
}

#[test]
fn three_agents_close_in_on_their_centroid() {
    let mut world = world(config());
    let ids: Vec<AgentId> = [-1.0_f32, 0.0, 1.0]
        .iter()
        .map(|x| {
            let id = world.spawn_agent(Vec3::new(*x, 0.0, 0.0), AgentParams::default()).unwrap();
            world
                .agent_mut(id)
                .unwrap()
                .add_behavior(Behavior::Cohesion { radius: None }, 1.0);
            id
        })
        .collect();

    let mut previous = f32::INFINITY;
    for _ in 0..8 {
        world.tick(DT).unwrap();
        let centroid = ids.iter().map(|id| world.agent(*id).unwrap().position()).sum::<Vec3>() / 3.0;
        let outer = world.agent(ids[0]).unwrap().position().distance(centroid);
        assert!(outer < previous, "outer agent drifted away ({outer} >= {previous})");
        previous = outer;
        for id in &ids {
            let agent = world.agent(*id).unwrap();
            assert!(agent.velocity().length() <= agent.params().max_speed + 1e-4);
        }
    }
    assert!(previous < 1.0);
}

#[test]
fn obstacle_deflects_agent_around_pillar() {
    let pillar = Vec3::new(0.0, 0.0, 10.0);
    let radius = 2.0;
    let mut field = ObstacleField::new();
    field.add_sphere(pillar, radius).unwrap();
    let mut world = SimulationWorld::new(config(), Some(Box::new(field))).unwrap();

    let start = Vec3::new(0.5, 0.0, 0.0);
    let goal = Vec3::new(0.5, 0.0, 20.0);
    let id = world.spawn_agent(start, AgentParams::default()).unwrap();
    world
        .agent_mut(id)
        .unwrap()
        .add_behavior(Behavior::ObstacleAvoidance(AvoidanceParams::default()), 3.0);
    world.send(id, Message::move_to(goal));

    let mut closest = f32::INFINITY;
    let mut widest = 0.0_f32;
    for _ in 0..400 {
        world.tick(DT).unwrap();
        let position = world.agent(id).unwrap().position();
        closest = closest.min(position.distance(pillar));
        widest = widest.max((position.x - start.x).abs());
    }

    assert!(closest > radius, "agent entered the pillar ({closest})");
    assert!(widest > 1.0, "agent was not deflected ({widest})");
    let agent = world.agent(id).unwrap();
    assert_eq!(agent.state(), StateKind::Idle);
    assert!(agent.position().distance(goal) < 1.0);
}

#[test]
fn batch_path_matches_sequential_path() {
    let mut sequential = world(config());
    let mut batched_config = config();
    batched_config.batch.enabled = true;
    batched_config.batch.min_agents = 1;
    let mut batched = world(batched_config);

    spawn_grid(&mut sequential, 30);
    spawn_grid(&mut batched, 30);

    for _ in 0..10 {
        let a = sequential.tick(DT).unwrap();
        let b = batched.tick(DT).unwrap();
        assert!(!a.batch_used);
        assert!(b.batch_used);
    }
    for (a, b) in sequential.agents().zip(batched.agents()) {
        assert_eq!(a.id(), b.id());
        assert!(a.position().distance(b.position()) < 1e-3, "agent {}", a.id());
        assert!(a.velocity().distance(b.velocity()) < 1e-3, "agent {}", a.id());
    }
}

#[test]
fn batch_path_matches_sequential_with_repeated_rules() {
    let mut sequential = world(config());
    let mut batched_config = config();
    batched_config.batch.enabled = true;
    batched_config.batch.min_agents = 1;
    let mut batched = world(batched_config);

    for world in [&mut sequential, &mut batched] {
        for id in spawn_grid(world, 10) {
            let agent = world.agent_mut(id).unwrap();
            agent.add_behavior(Behavior::Cohesion { radius: None }, 2.0);
            agent.add_behavior(
                Behavior::Separation {
                    radius: Some(1.0),
                    falloff: Falloff::Linear,
                },
                0.5,
            );
        }
    }

    for _ in 0..10 {
        sequential.tick(DT).unwrap();
        assert!(batched.tick(DT).unwrap().batch_used);
    }
    for (a, b) in sequential.agents().zip(batched.agents()) {
        assert!(a.position().distance(b.position()) < 1e-3, "agent {}", a.id());
        assert!(a.velocity().distance(b.velocity()) < 1e-3, "agent {}", a.id());
    }
}

#[test]
fn neighbor_cache_does_not_change_results() {
    let mut cached = world(config());
    let mut uncached_config = config();
    uncached_config.neighbor_cache.enabled = false;
    let mut uncached = world(uncached_config);

    spawn_grid(&mut cached, 25);
    spawn_grid(&mut uncached, 25);
    for _ in 0..40 {
        cached.tick(DT).unwrap();
        uncached.tick(DT).unwrap();
    }
    for (a, b) in cached.agents().zip(uncached.agents()) {
        assert_eq!(a.position(), b.position(), "agent {}", a.id());
    }
    assert_eq!(uncached.cache_stats().hits + uncached.cache_stats().misses, 0);
    assert!(cached.cache_stats().misses > 0);
}

#[test]
fn formation_members_settle_into_circle_slots() {
    let mut world = world(config());
    let center = Vec3::new(10.0, 0.0, 10.0);
    let formation = world
        .create_formation(
            "ring",
            FormationKind::Circle,
            6,
            None,
            FormationAnchor::Fixed {
                position: center,
                heading: Vec3::Z,
            },
        )
        .unwrap();

    let mut members = Vec::new();
    for i in 0..6_u8 {
        let id = world
            .spawn_agent(Vec3::new(f32::from(i), 0.0, 0.0), AgentParams::default())
            .unwrap();
        world
            .agent_mut(id)
            .unwrap()
            .add_behavior(Behavior::FormationSlot(SlotParams::default()), 1.0);
        assert_eq!(world.join_formation(formation, id), Some(usize::from(i)));
        members.push(id);
    }

    let mut updates = 0;
    for _ in 0..400 {
        updates += world.tick(DT).unwrap().formation_updates;
    }
    assert_eq!(updates, 6 * 400);

    let snapshot_lookup = |id: AgentId| world.agent_snapshot(id);
    for (slot, id) in members.iter().enumerate() {
        let target = world
            .formations()
            .slot_world_position(formation, slot, snapshot_lookup)
            .unwrap();
        let position = world.agent(*id).unwrap().position();
        assert!(position.distance(target) < 0.5, "slot {slot}: {position} vs {target}");
        assert!((target.distance(center) - 2.0).abs() < 1e-3);
    }

    // Leaving clears the slot target and frees the slot.
    assert!(world.leave_formation(members[0]));
    assert_eq!(world.agent(members[0]).unwrap().formation_target(), None);
    assert_eq!(world.formations().get(formation).unwrap().occupied(), 5);
}

#[test]
fn dead_agents_stop_and_drop_out_of_neighbor_queries() {
    let mut world = world(config());
    let victim = world.spawn_agent(Vec3::ZERO, AgentParams::default()).unwrap();
    let other = world.spawn_agent(Vec3::new(1.0, 0.0, 0.0), AgentParams::default()).unwrap();
    world.send(victim, Message::move_to(Vec3::new(30.0, 0.0, 0.0)));
    world.tick(DT).unwrap();
    world.send(victim, Message::damage(1_000.0));
    let summary = world.tick(DT).unwrap();

    assert_eq!(summary.alive, 1);
    assert_eq!(summary.states.get(&StateKind::Dead), Some(&1));
    assert_eq!(world.agent(victim).unwrap().velocity(), Vec3::ZERO);
    assert!(world.neighbors_of(other, 5.0).is_empty());
    world.send(victim, Message::move_to(Vec3::ONE));
    world.tick(DT).unwrap();
    assert_eq!(world.agent(victim).unwrap().state(), StateKind::Dead);
}

#[test]
fn yaml_config_drives_a_run() {
    let yaml = r"
world:
  seed: 11
  fixed_dt: 0.1
messaging:
  max_messages_per_tick: 8
batch:
  enabled: true
  min_agents: 10
steering:
  separation_falloff: linear
  wander_weight: 0.0
";
    let config = SimulationConfig::parse(yaml).unwrap();
    let mut world = SimulationWorld::new(config, None).unwrap();
    spawn_grid(&mut world, 12);
    let last = world.run(5).unwrap().unwrap();
    assert_eq!(last.tick, 5);
    assert!(last.batch_used);
    assert!((last.time - 0.5).abs() < 1e-6);

    let json = serde_json::to_value(&last).unwrap();
    assert_eq!(json["tick"], 5);
    assert_eq!(json["alive"], 12);
    assert!(json["states"].is_object());
    assert_eq!(world.agent(AgentId::from_raw(1)).unwrap().behaviors().len(), 4);
    assert!(matches!(
        world.agent(AgentId::from_raw(1)).unwrap().behaviors()[0].behavior,
        Behavior::Separation {
            falloff: Falloff::Linear,
            ..
        }
    ));
}
