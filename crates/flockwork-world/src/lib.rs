//! Spatial index, resource nodes, and obstacle queries for the Flockwork
//! simulation.
//!
//! This crate holds the world-side data structures agents interact with but
//! do not own.
//!
//! # Modules
//!
//! - [`error`] -- Construction-time error types.
//! - [`obstacle`] -- The [`ObstacleQuery`] interface and the built-in
//!   [`ObstacleField`] of boxes and spheres.
//! - [`resource`] -- Depletable [`ResourceNode`]s and the
//!   [`ResourceRegistry`] with nearest-node lookup.
//! - [`spatial`] -- The uniform-grid [`SpatialHash`] used for neighbor
//!   queries.

pub mod error;
pub mod obstacle;
pub mod resource;
pub mod spatial;

// Re-export primary types at crate root.
pub use error::WorldError;
pub use obstacle::{ObstacleField, ObstacleQuery, ObstacleShape, RayHit};
pub use resource::{HarvestOutcome, ResourceNode, ResourceNodeParams, ResourceRegistry};
pub use spatial::{CellKey, SpatialHash};
