//! Simulation world, message bus, formations, and tick cycle for the
//! Flockwork agent simulation.
//!
//! This crate owns the seven-phase tick cycle that drives the simulation:
//! Begin, Messages, FSM, Formations, Batch, Forces, and Flush.
//!
//! # Modules
//!
//! - [`batch`] -- Parallel flocking pass over the whole population.
//! - [`bus`] -- FIFO [`MessageBus`] with a per-tick delivery bound.
//! - [`clock`] -- Tick counter and elapsed simulation time.
//! - [`config`] -- Configuration loading from YAML into strongly-typed
//!   structs.
//! - [`error`] -- The crate-level [`SimulationError`].
//! - [`formation`] -- Slot generation and the [`FormationCoordinator`].
//! - [`neighbor_cache`] -- Per-tick snapshot and the quantized neighbor
//!   query cache.
//! - [`tick`] -- The tick cycle and its [`TickSummary`].
//! - [`world`] -- [`SimulationWorld`], the agent registry that owns
//!   everything above.

pub mod batch;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod formation;
pub mod neighbor_cache;
pub mod tick;
pub mod world;

pub use batch::BatchSteering;
pub use bus::{Delivery, MessageBus, MessageStats};
pub use clock::{ClockError, SimulationClock};
pub use config::{ConfigError, SimulationConfig};
pub use error::SimulationError;
pub use formation::{Formation, FormationAnchor, FormationCoordinator, FormationKind, FormationSlot, generate_slots};
pub use neighbor_cache::{CacheStats, NeighborCache, Snapshot, SnapshotNeighbors};
pub use tick::TickSummary;
pub use world::SimulationWorld;
