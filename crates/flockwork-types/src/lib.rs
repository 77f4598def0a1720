//! Shared type definitions for the Flockwork agent simulation.
//!
//! This crate is the single source of truth for the identifiers, tags, and
//! messages that flow between the world, agent, and core crates.
//!
//! # Modules
//!
//! - [`ids`] -- Integer ID newtypes and the monotonic [`IdSequence`]
//! - [`enums`] -- FSM state tags, message types, resource kinds
//! - [`message`] -- Immutable [`Message`] with a typed payload union
//! - [`math`] -- Horizontal-plane vector helpers on top of [`glam`]

pub mod enums;
pub mod ids;
pub mod math;
pub mod message;

pub use glam::{Quat, Vec3};

// Re-export all public types at crate root for convenience.
pub use enums::{MessageType, ResourceKind, StateKind};
pub use ids::{AgentId, FormationId, IdSequence, ObstacleId, ResourceNodeId};
pub use message::{Message, MessagePayload, MessageTarget};
