//! Agent runtime, steering behaviors, and behavioral state machine for the
//! Flockwork simulation.
//!
//! Agents are self-contained: they never reference each other directly.
//! Everything they see of the world arrives through an
//! [`AgentContext`](context::AgentContext), and everything they want to
//! tell others leaves as a [`Message`](flockwork_types::Message).
//!
//! # Modules
//!
//! - [`agent`] -- The [`Agent`] type: update loop, message dispatch,
//!   integration.
//! - [`config`] -- Per-agent tunables ([`AgentParams`]).
//! - [`context`] -- Neighbor source, path-follower delegate, and the
//!   per-update context.
//! - [`error`] -- Error types for agent construction.
//! - [`fsm`] -- Behavioral states and their hooks.
//! - [`steering`] -- Pure steering behaviors and the weighted behavior list.

pub mod agent;
mod body;
pub mod config;
pub mod context;
pub mod error;
pub mod fsm;
pub mod steering;

// Re-export primary types at crate root.
pub use agent::Agent;
pub use config::AgentParams;
pub use context::{AgentContext, Neighbor, NeighborList, NeighborSource, PathFollower};
pub use error::AgentError;
pub use fsm::{MessageOutcome, Pursuit, StateData, StateMachine};
pub use steering::{Behavior, FlockingProfile, SteeringAgent, SteeringTarget, WeightedBehavior};
