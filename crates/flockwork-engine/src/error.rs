//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup and the run itself.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: flockwork_core::ConfigError,
    },

    /// Obstacle or resource construction failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: flockwork_world::WorldError,
    },

    /// The simulation rejected a spawn or a tick.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: flockwork_core::SimulationError,
    },

    /// Scenario spawning failed.
    #[error("scenario error: {message}")]
    Scenario {
        /// Description of the scenario failure.
        message: String,
    },

    /// Writing the run summary failed.
    #[error("summary error: {source}")]
    Summary {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
