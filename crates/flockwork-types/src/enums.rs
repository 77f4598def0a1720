//! Enumeration types for the Flockwork simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Behavioral states
// ---------------------------------------------------------------------------

/// The behavioral state an agent's finite-state machine is in.
///
/// This is the data-free tag; the agents crate pairs each tag with the
/// per-state data it needs (destinations, targets, waypoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateKind {
    /// Standing still, waiting for orders.
    Idle,
    /// Travelling to a fixed destination.
    Moving,
    /// Pursuing a point or another agent.
    Seeking,
    /// Running away from a point or another agent.
    Fleeing,
    /// Harvesting from a resource node.
    Gathering,
    /// Carrying harvested resources back to base.
    Returning,
    /// Trailing behind a leader agent.
    Following,
    /// Cycling through a list of waypoints.
    Patrolling,
    /// Closing in on and damaging another agent.
    Attacking,
    /// Terminal state. The agent no longer moves or reacts.
    Dead,
}

impl StateKind {
    /// Whether the state is terminal (no transitions out of it).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl core::fmt::Display for StateKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Seeking => "seeking",
            Self::Fleeing => "fleeing",
            Self::Gathering => "gathering",
            Self::Returning => "returning",
            Self::Following => "following",
            Self::Patrolling => "patrolling",
            Self::Attacking => "attacking",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The type tag carried by every message on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Move to the message position.
    MoveTo,
    /// Seek the message position, or the agent in the payload.
    Seek,
    /// Flee from the message position, or the agent in the payload.
    Flee,
    /// Drop the current task and go idle.
    Stop,
    /// Follow the agent in the payload (or the sender).
    Follow,
    /// New world-space target for the recipient's formation slot.
    FormationUpdate,
    /// Gather from the resource node in the payload.
    GatherResource,
    /// Return carried resources to base.
    ReturnToBase,
    /// A resource node ran dry. The payload names the node.
    ResourceDepleted,
    /// Apply the message value as damage to the recipient.
    Damage,
    /// Application-defined message, identified by its tag.
    Custom,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// The kind of material a resource node yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Edible forage.
    Food,
    /// Lumber from trees.
    Wood,
    /// Quarried stone.
    Stone,
    /// Metal-bearing ore.
    Ore,
    /// Precious metal.
    Gold,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dead_is_terminal() {
        assert!(StateKind::Dead.is_terminal());
        assert!(!StateKind::Idle.is_terminal());
        assert!(!StateKind::Attacking.is_terminal());
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(StateKind::Gathering.to_string(), "gathering");
    }

    #[test]
    fn message_type_serde_uses_variant_names() {
        let json = serde_json::to_string(&MessageType::FormationUpdate).ok();
        assert_eq!(json.as_deref(), Some("\"FormationUpdate\""));
    }
}
