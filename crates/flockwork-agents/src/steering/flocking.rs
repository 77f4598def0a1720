//! Separation, alignment, and cohesion.
//!
//! Each rule looks only at neighbors within its own radius and skips the
//! agent itself by id. The same functions back both the per-agent behavior
//! list and the parallel batch path, so the two produce the same forces for
//! the same neighbor set.

use flockwork_types::math::truncate;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::SteeringAgent;
use super::seek::seek;
use crate::context::Neighbor;

/// Neighbors slower than this are ignored by alignment.
pub const MIN_ALIGNMENT_SPEED: f32 = 0.1;

/// Squared distance under which two agents are treated as coincident and
/// cannot push each other in any particular direction.
const COINCIDENT_EPSILON_SQ: f32 = 1e-8;

/// How separation weights a neighbor's push by its distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Falloff {
    /// Push scales with `1 / d²`.
    #[default]
    InverseSquare,
    /// Push scales with `1 - d / radius`.
    Linear,
}

fn others_within<'a>(
    agent: &'a SteeringAgent,
    neighbors: &'a [Neighbor],
    radius: f32,
) -> impl Iterator<Item = &'a Neighbor> + 'a {
    let radius_sq = radius * radius;
    neighbors
        .iter()
        .filter(move |n| n.id != agent.id && n.position.distance_squared(agent.position) <= radius_sq)
}

/// Push away from neighbors within `radius`.
///
/// Contributions are averaged over the neighbors that pushed, then clamped
/// to the agent's max force.
pub fn separation(agent: &SteeringAgent, neighbors: &[Neighbor], radius: f32, falloff: Falloff) -> Vec3 {
    let mut sum = Vec3::ZERO;
    let mut count = 0_u32;
    for neighbor in others_within(agent, neighbors, radius) {
        let offset = agent.position - neighbor.position;
        let distance_sq = offset.length_squared();
        if distance_sq < COINCIDENT_EPSILON_SQ {
            continue;
        }
        let distance = distance_sq.sqrt();
        let weight = match falloff {
            Falloff::InverseSquare => distance_sq.recip(),
            Falloff::Linear => 1.0 - distance / radius,
        };
        sum += offset / distance * weight;
        count = count.saturating_add(1);
    }
    if count == 0 {
        return Vec3::ZERO;
    }
    truncate(sum / count as f32, agent.max_force)
}

/// Steer toward the average velocity of moving neighbors within `radius`.
pub fn alignment(agent: &SteeringAgent, neighbors: &[Neighbor], radius: f32) -> Vec3 {
    let min_speed_sq = MIN_ALIGNMENT_SPEED * MIN_ALIGNMENT_SPEED;
    let mut sum = Vec3::ZERO;
    let mut count = 0_u32;
    for neighbor in others_within(agent, neighbors, radius) {
        if neighbor.velocity.length_squared() > min_speed_sq {
            sum += neighbor.velocity;
            count = count.saturating_add(1);
        }
    }
    if count == 0 {
        return Vec3::ZERO;
    }
    let average = sum / count as f32;
    match average.try_normalize() {
        Some(direction) => direction * agent.max_speed - agent.velocity,
        None => Vec3::ZERO,
    }
}

/// Seek the centroid of neighbors within `radius`.
pub fn cohesion(agent: &SteeringAgent, neighbors: &[Neighbor], radius: f32) -> Vec3 {
    let mut sum = Vec3::ZERO;
    let mut count = 0_u32;
    for neighbor in others_within(agent, neighbors, radius) {
        sum += neighbor.position;
        count = count.saturating_add(1);
    }
    if count == 0 {
        return Vec3::ZERO;
    }
    seek(agent, sum / count as f32)
}

// ---------------------------------------------------------------------------
// Combined flocking
// ---------------------------------------------------------------------------

/// Which of the three flocking rules a [`FlockTerm`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlockRule {
    /// Separation with the given falloff.
    Separation(Falloff),
    /// Alignment.
    Alignment,
    /// Cohesion.
    Cohesion,
}

/// One flocking rule with its weight and radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlockTerm {
    /// The rule.
    pub rule: FlockRule,
    /// Multiplier applied to the rule's force.
    pub weight: f32,
    /// Neighbor radius the rule looks at.
    pub radius: f32,
}

impl FlockTerm {
    /// Weighted force of this rule alone.
    pub fn force(&self, agent: &SteeringAgent, neighbors: &[Neighbor]) -> Vec3 {
        let raw = match self.rule {
            FlockRule::Separation(falloff) => separation(agent, neighbors, self.radius, falloff),
            FlockRule::Alignment => alignment(agent, neighbors, self.radius),
            FlockRule::Cohesion => cohesion(agent, neighbors, self.radius),
        };
        raw * self.weight
    }
}

/// An agent's flocking rules, as extracted from its behavior list.
///
/// Holds every active flocking behavior in list order, repeats included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlockingProfile {
    /// The rules, in behavior-list order.
    pub terms: Vec<FlockTerm>,
}

impl FlockingProfile {
    /// Whether the profile has no rules at all.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Append a rule.
    pub fn push(&mut self, term: FlockTerm) {
        self.terms.push(term);
    }
}

/// Weighted sum of the profile's rules for one agent.
pub fn weighted_flocking(agent: &SteeringAgent, neighbors: &[Neighbor], profile: &FlockingProfile) -> Vec3 {
    profile
        .terms
        .iter()
        .fold(Vec3::ZERO, |force, term| force + term.force(agent, neighbors))
}

#[cfg(test)]
mod tests {
    use flockwork_types::{AgentId, StateKind};

    use super::*;
    use crate::steering::tests::agent_at;

    fn neighbor(id: u64, position: Vec3, velocity: Vec3) -> Neighbor {
        Neighbor {
            id: AgentId::from_raw(id),
            position,
            velocity,
            heading: Vec3::Z,
            state: StateKind::Idle,
        }
    }

    #[test]
    fn separation_pushes_away_and_is_clamped() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let close = [neighbor(2, Vec3::new(0.01, 0.0, 0.0), Vec3::ZERO)];
        let force = separation(&agent, &close, 5.0, Falloff::InverseSquare);
        assert!(force.x < 0.0);
        assert!(force.length() <= agent.max_force + 1e-4);
    }

    #[test]
    fn separation_ignores_self_and_far_neighbors() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let list = [
            neighbor(1, Vec3::ZERO, Vec3::ZERO),
            neighbor(2, Vec3::new(9.0, 0.0, 0.0), Vec3::ZERO),
        ];
        assert_eq!(separation(&agent, &list, 5.0, Falloff::Linear), Vec3::ZERO);
    }

    #[test]
    fn linear_falloff_weakens_with_distance() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let near = separation(&agent, &[neighbor(2, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO)], 4.0, Falloff::Linear);
        let far = separation(&agent, &[neighbor(2, Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO)], 4.0, Falloff::Linear);
        assert!(near.length() > far.length());
    }

    #[test]
    fn alignment_skips_stationary_neighbors() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let list = [
            neighbor(2, Vec3::X, Vec3::new(0.0, 0.0, 0.05)),
            neighbor(3, Vec3::NEG_X, Vec3::new(0.0, 0.0, 2.0)),
        ];
        let force = alignment(&agent, &list, 5.0);
        assert!((force - Vec3::new(0.0, 0.0, agent.max_speed)).length() < 1e-4);
        assert_eq!(alignment(&agent, &list[..1], 5.0), Vec3::ZERO);
    }

    #[test]
    fn cohesion_seeks_centroid() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let list = [
            neighbor(2, Vec3::new(2.0, 0.0, 1.0), Vec3::ZERO),
            neighbor(3, Vec3::new(2.0, 0.0, -1.0), Vec3::ZERO),
        ];
        let force = cohesion(&agent, &list, 5.0);
        assert!(force.x > 0.0);
        assert!(force.z.abs() < 1e-4);
    }

    #[test]
    fn weighted_flocking_sums_rules() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let list = [neighbor(2, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0))];
        let term = |rule| FlockTerm {
            rule,
            weight: 2.0,
            radius: 5.0,
        };
        let profile = FlockingProfile {
            terms: vec![
                term(FlockRule::Separation(Falloff::InverseSquare)),
                term(FlockRule::Alignment),
                term(FlockRule::Cohesion),
            ],
        };
        let expected = separation(&agent, &list, 5.0, Falloff::InverseSquare) * 2.0
            + alignment(&agent, &list, 5.0) * 2.0
            + cohesion(&agent, &list, 5.0) * 2.0;
        assert!((weighted_flocking(&agent, &list, &profile) - expected).length() < 1e-5);
        assert!(FlockingProfile::default().is_empty());
    }

    #[test]
    fn repeated_rules_each_contribute() {
        let agent = agent_at(Vec3::ZERO, Vec3::ZERO);
        let list = [neighbor(2, Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO)];
        let once = FlockTerm {
            rule: FlockRule::Cohesion,
            weight: 1.0,
            radius: 5.0,
        };
        let twice = FlockingProfile {
            terms: vec![once, FlockTerm { weight: 2.0, ..once }],
        };
        let single = cohesion(&agent, &list, 5.0);
        assert!((weighted_flocking(&agent, &list, &twice) - single * 3.0).length() < 1e-5);
    }
}
