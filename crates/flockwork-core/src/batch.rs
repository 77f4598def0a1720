//! Parallel flocking for large populations.
//!
//! Separation, alignment, and cohesion dominate the per-tick cost once a
//! flock grows past a few hundred agents. [`BatchSteering`] computes them
//! for every agent at once with rayon:
//!
//! 1. Snapshot each agent's kinematics and flocking profile. Agents that are
//!    dead or have no active flocking rules keep their slot but are marked
//!    inactive, so indices stay aligned with the agent table.
//! 2. Compute a grid cell key for every live neighbor candidate in
//!    parallel, then sort `(cell, index)` pairs in parallel so each cell
//!    becomes one contiguous range.
//! 3. For every active agent, in parallel, gather the candidates within its
//!    neighbor radius, order them by id, and run the same
//!    [`weighted_flocking`] the sequential path uses.
//! 4. [`BatchSteering::apply`] hands the results to the agents as external
//!    forces.
//!
//! Jobs read only the immutable snapshot and each write one slot of the
//! results buffer. `collect_into_vec` returns after every job has finished.

use std::collections::HashMap;
use std::ops::Range;

use flockwork_agents::steering::weighted_flocking;
use flockwork_agents::{Agent, FlockingProfile, Neighbor, SteeringAgent};
use flockwork_types::AgentId;
use glam::Vec3;
use rayon::prelude::*;
use tracing::debug;

use crate::error::SimulationError;

type CellKey = (i32, i32);

/// One agent as the batch jobs see it.
#[derive(Debug, Clone)]
struct BatchBody {
    agent: SteeringAgent,
    profile: FlockingProfile,
    radius: f32,
    active: bool,
}

/// Reusable buffers for the parallel flocking pass.
#[derive(Debug)]
pub struct BatchSteering {
    inv_cell_size: f32,
    bodies: Vec<BatchBody>,
    candidates: Vec<Neighbor>,
    keyed: Vec<(CellKey, usize)>,
    ranges: HashMap<CellKey, Range<usize>>,
    forces: Vec<Vec3>,
}

impl BatchSteering {
    /// Create a batch runner bucketing candidates into cells of
    /// `cell_size`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidBatch`] if `cell_size` is not a
    /// positive finite number.
    pub fn new(cell_size: f32) -> Result<Self, SimulationError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(SimulationError::InvalidBatch("cell size must be a positive finite number"));
        }
        Ok(Self {
            inv_cell_size: cell_size.recip(),
            bodies: Vec::new(),
            candidates: Vec::new(),
            keyed: Vec::new(),
            ranges: HashMap::new(),
            forces: Vec::new(),
        })
    }

    /// Forces from the most recent [`compute`](Self::compute), one per
    /// agent in the order they were given.
    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    /// Number of agents the last pass computed a force for.
    pub fn active_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.active).count()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cell_key(inv_cell_size: f32, position: Vec3) -> CellKey {
        (
            (position.x * inv_cell_size).floor() as i32,
            (position.z * inv_cell_size).floor() as i32,
        )
    }

    /// Compute flocking forces for `agents` against the neighbor snapshot
    /// `snapshot`.
    ///
    /// `snapshot` must be sorted by id, as the world's per-tick snapshot is.
    pub fn compute<'a, I>(&mut self, agents: I, snapshot: &[Neighbor])
    where
        I: IntoIterator<Item = &'a Agent>,
    {
        self.bodies.clear();
        self.bodies.extend(agents.into_iter().map(|agent| {
            let profile = agent.flocking_profile();
            let active = agent.is_alive() && !profile.is_empty();
            BatchBody {
                agent: agent.steering_agent(),
                profile,
                radius: agent.params().neighbor_radius,
                active,
            }
        }));

        self.candidates.clear();
        self.candidates.extend(snapshot.iter().filter(|n| n.is_alive()).copied());

        let inv = self.inv_cell_size;
        self.candidates
            .par_iter()
            .enumerate()
            .map(|(i, n)| (Self::cell_key(inv, n.position), i))
            .collect_into_vec(&mut self.keyed);
        self.keyed.par_sort_unstable();

        self.ranges.clear();
        let mut start: usize = 0;
        for (i, window) in self.keyed.windows(2).enumerate() {
            if let [(a, _), (b, _)] = window
                && a != b
            {
                let end = i.saturating_add(1);
                self.ranges.insert(*a, start..end);
                start = end;
            }
        }
        if let Some(&(last, _)) = self.keyed.last() {
            self.ranges.insert(last, start..self.keyed.len());
        }

        let candidates = &self.candidates;
        let keyed = &self.keyed;
        let ranges = &self.ranges;
        self.bodies
            .par_iter()
            .map_init(Vec::new, |scratch: &mut Vec<Neighbor>, body| {
                if !body.active {
                    return Vec3::ZERO;
                }
                gather(inv, body, candidates, keyed, ranges, scratch);
                weighted_flocking(&body.agent, scratch, &body.profile)
            })
            .collect_into_vec(&mut self.forces);

        debug!(
            agents = self.bodies.len(),
            active = self.active_count(),
            cells = self.ranges.len(),
            "Batch flocking computed"
        );
    }

    /// Add each computed force to its agent. `agents` must be the same
    /// sequence given to [`compute`](Self::compute). Returns how many
    /// agents received a force.
    pub fn apply<'a, I>(&self, agents: I) -> usize
    where
        I: IntoIterator<Item = &'a mut Agent>,
    {
        let mut applied: usize = 0;
        for ((agent, body), force) in agents.into_iter().zip(&self.bodies).zip(&self.forces) {
            if body.active && body.agent.id == agent.id() {
                agent.apply_external_force(*force);
                applied = applied.saturating_add(1);
            }
        }
        applied
    }

    /// Force computed for one agent in the last pass.
    pub fn force_for(&self, id: AgentId) -> Option<Vec3> {
        self.bodies
            .iter()
            .zip(&self.forces)
            .find(|(b, _)| b.active && b.agent.id == id)
            .map(|(_, f)| *f)
    }
}

/// Fill `out` with the live candidates within `body.radius`, sorted by id.
fn gather(
    inv_cell_size: f32,
    body: &BatchBody,
    candidates: &[Neighbor],
    keyed: &[(CellKey, usize)],
    ranges: &HashMap<CellKey, Range<usize>>,
    out: &mut Vec<Neighbor>,
) {
    out.clear();
    let center = body.agent.position;
    let radius = body.radius;
    let radius_sq = radius * radius;
    let (min_x, min_z) = BatchSteering::cell_key(inv_cell_size, center - Vec3::new(radius, 0.0, radius));
    let (max_x, max_z) = BatchSteering::cell_key(inv_cell_size, center + Vec3::new(radius, 0.0, radius));

    let mut visit = |range: &Range<usize>| {
        let Some(entries) = keyed.get(range.clone()) else {
            return;
        };
        out.extend(
            entries
                .iter()
                .filter_map(|&(_, i)| candidates.get(i))
                .filter(|n| n.position.distance_squared(center) <= radius_sq)
                .copied(),
        );
    };

    let span_x = i64::from(max_x).saturating_sub(i64::from(min_x)).saturating_add(1);
    let span_z = i64::from(max_z).saturating_sub(i64::from(min_z)).saturating_add(1);
    let covered = span_x.saturating_mul(span_z);
    if covered > i64::try_from(ranges.len()).unwrap_or(i64::MAX) {
        for (&(cx, cz), range) in ranges {
            if (min_x..=max_x).contains(&cx) && (min_z..=max_z).contains(&cz) {
                visit(range);
            }
        }
    } else {
        for cz in min_z..=max_z {
            for cx in min_x..=max_x {
                if let Some(range) = ranges.get(&(cx, cz)) {
                    visit(range);
                }
            }
        }
    }
    out.sort_unstable_by_key(|n| n.id);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flockwork_agents::steering::Falloff;
    use flockwork_agents::{AgentParams, Behavior};
    use flockwork_types::StateKind;

    use super::*;

    fn flocker(raw: u64, position: Vec3, velocity: Vec3) -> Agent {
        let mut agent = Agent::new(AgentId::from_raw(raw), AgentParams::default(), position, raw).unwrap();
        agent.set_velocity(velocity);
        agent.add_behavior(
            Behavior::Separation {
                radius: Some(2.0),
                falloff: Falloff::InverseSquare,
            },
            1.5,
        );
        agent.add_behavior(Behavior::Alignment { radius: None }, 1.0);
        agent.add_behavior(Behavior::Cohesion { radius: None }, 1.0);
        agent
    }

    fn grid(n: u16) -> Vec<Agent> {
        (0..n)
            .map(|i| {
                let f = f32::from(i);
                flocker(
                    u64::from(i).saturating_add(1),
                    Vec3::new((f % 7.0) * 1.3, 0.0, (f / 7.0).floor() * 1.1),
                    Vec3::new((f * 0.7).sin(), 0.0, (f * 0.3).cos()),
                )
            })
            .collect()
    }

    fn brute_force(agent: &Agent, snapshot: &[Neighbor]) -> Vec3 {
        let r = agent.params().neighbor_radius;
        let neighbors: Vec<Neighbor> = snapshot
            .iter()
            .filter(|n| n.is_alive() && n.position.distance(agent.position()) <= r)
            .copied()
            .collect();
        weighted_flocking(&agent.steering_agent(), &neighbors, &agent.flocking_profile())
    }

    #[test]
    fn matches_brute_force_neighbors() {
        let agents = grid(40);
        let snapshot: Vec<Neighbor> = agents.iter().map(Agent::snapshot).collect();
        let mut batch = BatchSteering::new(3.0).unwrap();
        batch.compute(&agents, &snapshot);

        assert_eq!(batch.forces().len(), agents.len());
        assert_eq!(batch.active_count(), agents.len());
        for (agent, force) in agents.iter().zip(batch.forces()) {
            let expected = brute_force(agent, &snapshot);
            assert!((expected - *force).length() < 1e-5, "agent {}", agent.id());
        }
    }

    #[test]
    fn cell_size_does_not_change_results() {
        let agents = grid(30);
        let snapshot: Vec<Neighbor> = agents.iter().map(Agent::snapshot).collect();
        let mut fine = BatchSteering::new(0.5).unwrap();
        let mut coarse = BatchSteering::new(50.0).unwrap();
        fine.compute(&agents, &snapshot);
        coarse.compute(&agents, &snapshot);
        for (a, b) in fine.forces().iter().zip(coarse.forces()) {
            assert!((*a - *b).length() < 1e-6);
        }
    }

    #[test]
    fn inactive_agents_are_padded_and_skipped() {
        let mut agents = grid(3);
        agents.push(Agent::new(AgentId::from_raw(50), AgentParams::default(), Vec3::ONE, 0).unwrap());
        let mut snapshot: Vec<Neighbor> = agents.iter().map(Agent::snapshot).collect();
        // a dead agent in the snapshot is never a neighbor
        if let Some(first) = snapshot.first_mut() {
            first.state = StateKind::Dead;
        }

        let mut batch = BatchSteering::new(4.0).unwrap();
        batch.compute(&agents, &snapshot);
        assert_eq!(batch.forces().len(), 4);
        assert_eq!(batch.active_count(), 3);
        assert_eq!(batch.forces().last().copied(), Some(Vec3::ZERO));
        assert!(batch.force_for(AgentId::from_raw(50)).is_none());

        let applied = batch.apply(agents.iter_mut());
        assert_eq!(applied, 3);
    }

    #[test]
    fn rejects_bad_cell_size() {
        assert!(BatchSteering::new(0.0).is_err());
        assert!(BatchSteering::new(f32::INFINITY).is_err());
    }
}
