//! Per-agent physical and behavioral parameters.
//!
//! [`AgentParams`] bundles every tunable an agent needs: its body (mass,
//! speed and force limits), its senses (neighbor radius), and the thresholds
//! its state machine works with. The core crate deserializes a default set
//! from the `agent` section of the simulation config and hands a copy to
//! every agent it spawns; callers may override any field per agent.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Tunable parameters for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    /// Mass used to turn force into acceleration (default: 1.0).
    pub mass: f32,

    /// Maximum speed in units per second (default: 5.0).
    pub max_speed: f32,

    /// Maximum magnitude of the net steering force (default: 10.0).
    pub max_force: f32,

    /// Radius within which other agents count as neighbors (default: 5.0).
    pub neighbor_radius: f32,

    /// Maximum amount of resource the agent can carry (default: 10.0).
    pub carry_capacity: f32,

    /// Starting health. The agent dies when health reaches zero
    /// (default: 100.0).
    pub health: f32,

    /// Distance at which a destination counts as reached (default: 0.5).
    pub arrival_distance: f32,

    /// Distance at which the implicit arrive starts slowing down
    /// (default: 3.0).
    pub slowing_distance: f32,

    /// Below this speed the agent does not move its position
    /// (default: 0.01).
    pub min_motion_speed: f32,

    /// Maximum heading rotation in radians per second (default: 2π).
    pub turn_rate: f32,

    /// Fraction of carry capacity at which a gatherer heads home
    /// (default: 0.95).
    ///
    /// Must lie in `(0, 1]`.
    pub gather_completion_threshold: f32,

    /// Distance beyond which a fleeing agent considers itself safe
    /// (default: 15.0).
    pub flee_safe_distance: f32,

    /// How far behind a leader a following agent trails (default: 2.0).
    pub follow_distance: f32,

    /// Distance within which an attacker deals damage (default: 1.5).
    pub attack_range: f32,

    /// Damage dealt per attack (default: 10.0).
    pub attack_damage: f32,

    /// Seconds between two attacks (default: 1.0).
    pub attack_interval: f32,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            max_speed: 5.0,
            max_force: 10.0,
            neighbor_radius: 5.0,
            carry_capacity: 10.0,
            health: 100.0,
            arrival_distance: 0.5,
            slowing_distance: 3.0,
            min_motion_speed: 0.01,
            turn_rate: std::f32::consts::TAU,
            gather_completion_threshold: 0.95,
            flee_safe_distance: 15.0,
            follow_distance: 2.0,
            attack_range: 1.5,
            attack_damage: 10.0,
            attack_interval: 1.0,
        }
    }
}

impl AgentParams {
    /// Check that every parameter is within range.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidParameter`] naming the first field that
    /// is out of range.
    pub fn validate(&self) -> Result<(), AgentError> {
        positive("mass", self.mass)?;
        positive("max_speed", self.max_speed)?;
        positive("max_force", self.max_force)?;
        positive("neighbor_radius", self.neighbor_radius)?;
        positive("arrival_distance", self.arrival_distance)?;
        positive("turn_rate", self.turn_rate)?;
        positive("attack_interval", self.attack_interval)?;
        non_negative("carry_capacity", self.carry_capacity)?;
        non_negative("health", self.health)?;
        non_negative("slowing_distance", self.slowing_distance)?;
        non_negative("min_motion_speed", self.min_motion_speed)?;
        non_negative("flee_safe_distance", self.flee_safe_distance)?;
        non_negative("follow_distance", self.follow_distance)?;
        non_negative("attack_range", self.attack_range)?;
        non_negative("attack_damage", self.attack_damage)?;
        if !(self.gather_completion_threshold > 0.0 && self.gather_completion_threshold <= 1.0) {
            return Err(AgentError::InvalidParameter {
                field: "gather_completion_threshold",
                reason: "must lie in (0, 1]",
            });
        }
        Ok(())
    }

    /// Carried amount at which a gatherer stops harvesting.
    pub fn gather_target(&self) -> f32 {
        self.carry_capacity * self.gather_completion_threshold
    }

    /// Slowing radius for the implicit arrive, never smaller than the
    /// arrival distance.
    pub const fn effective_slowing_distance(&self) -> f32 {
        self.slowing_distance.max(self.arrival_distance)
    }

    /// Whether `position` is within arrival distance of `destination`.
    pub fn has_arrived(&self, position: Vec3, destination: Vec3) -> bool {
        position.distance_squared(destination) <= self.arrival_distance * self.arrival_distance
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), AgentError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AgentError::InvalidParameter {
            field,
            reason: "must be a positive finite number",
        })
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), AgentError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AgentError::InvalidParameter {
            field,
            reason: "must be a non-negative finite number",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AgentParams::default().validate().is_ok());
    }

    #[test]
    fn zero_mass_is_rejected() {
        let params = AgentParams {
            mass: 0.0,
            ..AgentParams::default()
        };
        let err = params.validate();
        assert!(matches!(
            err,
            Err(AgentError::InvalidParameter { field: "mass", .. })
        ));
    }

    #[test]
    fn completion_threshold_must_be_a_fraction() {
        for bad in [0.0, -0.5, 1.5, f32::NAN] {
            let params = AgentParams {
                gather_completion_threshold: bad,
                ..AgentParams::default()
            };
            assert!(params.validate().is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn slowing_distance_never_below_arrival() {
        let params = AgentParams {
            arrival_distance: 2.0,
            slowing_distance: 1.0,
            ..AgentParams::default()
        };
        assert!((params.effective_slowing_distance() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn gather_target_scales_capacity() {
        let params = AgentParams {
            carry_capacity: 20.0,
            gather_completion_threshold: 0.5,
            ..AgentParams::default()
        };
        assert!((params.gather_target() - 10.0).abs() < f32::EPSILON);
    }
}
