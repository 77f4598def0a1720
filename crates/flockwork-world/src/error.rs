//! Error types for the `flockwork-world` crate.
//!
//! Only construction-time configuration problems are surfaced as errors.
//! Runtime operations on unknown items or nodes are silent no-ops.

use flockwork_types::ResourceNodeId;

/// Errors that can occur when building world-side structures.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The spatial index cell size was zero, negative, or not finite.
    #[error("invalid cell size {0}: must be a positive finite number")]
    InvalidCellSize(f32),

    /// A resource node parameter was out of range.
    #[error("invalid resource node parameter `{field}`: {reason}")]
    InvalidResourceNode {
        /// The offending parameter.
        field: &'static str,
        /// Explanation of the constraint.
        reason: &'static str,
    },

    /// A resource node was not found in the registry.
    #[error("resource node not found: {0}")]
    ResourceNodeNotFound(ResourceNodeId),

    /// The ID sequence ran out of identifiers.
    #[error("identifier space exhausted")]
    IdsExhausted,

    /// An obstacle shape had a degenerate extent.
    #[error("invalid obstacle: {0}")]
    InvalidObstacle(&'static str),
}
