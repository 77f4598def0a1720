//! Error types for the flockwork-core crate.
//!
//! Runtime conditions (unknown agents, full formations, messages to
//! despawned targets) are no-ops and never surface here. Only construction
//! and configuration problems do.

use flockwork_agents::AgentError;
use flockwork_world::WorldError;

use crate::clock::ClockError;
use crate::config::ConfigError;

/// Errors that can occur while building or driving a simulation world.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The configuration was unreadable or out of range.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// A world-side structure could not be built.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: WorldError,
    },

    /// An agent could not be built.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },

    /// The simulation clock refused to advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A formation was requested with invalid geometry.
    #[error("invalid formation: {0}")]
    InvalidFormation(&'static str),

    /// The parallel batch path was configured with invalid bucketing.
    #[error("invalid batch configuration: {0}")]
    InvalidBatch(&'static str),

    /// The ID sequence ran out of identifiers.
    #[error("identifier space exhausted")]
    IdsExhausted,
}
