//! Error types for the flockwork-agents crate.
//!
//! Agents only fail at construction time, when their parameters are out of
//! range. Everything that can go wrong while the simulation runs (a target
//! that vanished, a node that ran dry, a message for a dead agent) is handled
//! as a state transition or a no-op instead of an error.

/// Errors that can occur when building an agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// An agent parameter was out of range.
    #[error("invalid agent parameter `{field}`: {reason}")]
    InvalidParameter {
        /// The offending parameter.
        field: &'static str,
        /// Explanation of the constraint.
        reason: &'static str,
    },
}
