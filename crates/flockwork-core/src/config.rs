//! Configuration loading and typed config structures for the Flockwork
//! simulation.
//!
//! The configuration is a single YAML document. Every section and every
//! field is optional; anything left out falls back to the defaults below.
//! [`SimulationConfig::validate`] checks ranges once at load time so the
//! tick loop never has to.

use std::path::Path;

use flockwork_agents::steering::{AvoidanceParams, Falloff, SlotParams, WanderState};
use flockwork_agents::{AgentError, AgentParams, Behavior, WeightedBehavior};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value was out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Explanation of the constraint.
        reason: &'static str,
    },

    /// The default agent parameters were out of range.
    #[error("invalid agent defaults: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Seed, timestep, and run length.
    #[serde(default)]
    pub world: WorldConfig,

    /// Spatial index settings.
    #[serde(default)]
    pub spatial: SpatialConfig,

    /// Message bus settings.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Per-tick neighbor query cache.
    #[serde(default)]
    pub neighbor_cache: NeighborCacheConfig,

    /// Parallel flocking batch path.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Default parameters for spawned agents.
    #[serde(default)]
    pub agent: AgentParams,

    /// Default steering weights and radii.
    #[serde(default)]
    pub steering: SteeringConfig,

    /// Formation defaults.
    #[serde(default)]
    pub formation: FormationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or a
    /// validation error if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or a
    /// validation error if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every value that has a range constraint.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("world.fixed_dt", self.world.fixed_dt)?;
        positive("spatial.cell_size", self.spatial.cell_size)?;
        positive("neighbor_cache.quantum", self.neighbor_cache.quantum)?;
        positive("formation.default_spacing", self.formation.default_spacing)?;
        if self.messaging.max_messages_per_tick == 0 {
            return Err(ConfigError::Invalid {
                field: "messaging.max_messages_per_tick",
                reason: "must be at least 1",
            });
        }
        self.agent.validate()?;
        Ok(())
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be a positive finite number",
        })
    }
}

/// Seed, timestep, and run length.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Seconds simulated per tick by [`step`](crate::SimulationWorld::step).
    #[serde(default = "default_fixed_dt")]
    pub fixed_dt: f32,

    /// Number of ticks the engine binary runs.
    #[serde(default = "default_tick_count")]
    pub tick_count: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            fixed_dt: default_fixed_dt(),
            tick_count: default_tick_count(),
        }
    }
}

/// Spatial index settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpatialConfig {
    /// Grid cell size. About twice the typical neighbor radius works well.
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagingConfig {
    /// Upper bound on messages delivered per tick. The rest carry over.
    #[serde(default = "default_max_messages_per_tick")]
    pub max_messages_per_tick: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_messages_per_tick: default_max_messages_per_tick(),
        }
    }
}

/// Per-tick neighbor query cache.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NeighborCacheConfig {
    /// Whether queries are memoized within a tick.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quantization step for query centers and radii.
    #[serde(default = "default_quantum")]
    pub quantum: f32,
}

impl Default for NeighborCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quantum: default_quantum(),
        }
    }
}

/// Parallel flocking batch path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchConfig {
    /// Whether the batch path may run at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum live agent count before the batch path takes over.
    #[serde(default = "default_batch_min_agents")]
    pub min_agents: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_agents: default_batch_min_agents(),
        }
    }
}

/// Default steering weights and radii for newly equipped agents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    /// Separation weight (default: 1.5).
    pub separation_weight: f32,
    /// Alignment weight (default: 1.0).
    pub alignment_weight: f32,
    /// Cohesion weight (default: 1.0).
    pub cohesion_weight: f32,
    /// Wander weight; zero leaves wander out (default: 0.3).
    pub wander_weight: f32,
    /// Obstacle avoidance weight; zero leaves avoidance out (default: 2.0).
    pub avoidance_weight: f32,
    /// Separation radius (default: 2.0).
    pub separation_radius: f32,
    /// Alignment radius (default: 5.0).
    pub alignment_radius: f32,
    /// Cohesion radius (default: 5.0).
    pub cohesion_radius: f32,
    /// Separation falloff (default: inverse square).
    pub separation_falloff: Falloff,
    /// Wander circle radius (default: 1.5).
    pub wander_radius: f32,
    /// Wander circle distance ahead (default: 3.0).
    pub wander_distance: f32,
    /// Wander jitter per update (default: 0.8).
    pub wander_jitter: f32,
    /// Obstacle avoidance tuning.
    pub avoidance: AvoidanceParams,
    /// Formation-slot tuning.
    pub formation_slot: SlotParams,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            separation_weight: 1.5,
            alignment_weight: 1.0,
            cohesion_weight: 1.0,
            wander_weight: 0.3,
            avoidance_weight: 2.0,
            separation_radius: 2.0,
            alignment_radius: 5.0,
            cohesion_radius: 5.0,
            separation_falloff: Falloff::InverseSquare,
            wander_radius: 1.5,
            wander_distance: 3.0,
            wander_jitter: 0.8,
            avoidance: AvoidanceParams::default(),
            formation_slot: SlotParams::default(),
        }
    }
}

impl SteeringConfig {
    /// The default flocking behavior list: separation, alignment, cohesion,
    /// then wander and obstacle avoidance when their weights are positive.
    pub fn flocking_behaviors(&self) -> Vec<WeightedBehavior> {
        let mut behaviors = vec![
            WeightedBehavior::new(
                Behavior::Separation {
                    radius: Some(self.separation_radius),
                    falloff: self.separation_falloff,
                },
                self.separation_weight,
            ),
            WeightedBehavior::new(
                Behavior::Alignment {
                    radius: Some(self.alignment_radius),
                },
                self.alignment_weight,
            ),
            WeightedBehavior::new(
                Behavior::Cohesion {
                    radius: Some(self.cohesion_radius),
                },
                self.cohesion_weight,
            ),
        ];
        if self.wander_weight > 0.0 {
            behaviors.push(WeightedBehavior::new(
                Behavior::Wander(WanderState::new(
                    self.wander_radius,
                    self.wander_distance,
                    self.wander_jitter,
                )),
                self.wander_weight,
            ));
        }
        if self.avoidance_weight > 0.0 {
            behaviors.push(WeightedBehavior::new(
                Behavior::ObstacleAvoidance(self.avoidance),
                self.avoidance_weight,
            ));
        }
        behaviors
    }
}

/// Formation defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormationConfig {
    /// Slot spacing used when none is given.
    #[serde(default = "default_spacing")]
    pub default_spacing: f32,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            default_spacing: default_spacing(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_seed() -> u64 {
    42
}

const fn default_fixed_dt() -> f32 {
    0.02
}

const fn default_tick_count() -> u64 {
    500
}

const fn default_cell_size() -> f32 {
    10.0
}

const fn default_max_messages_per_tick() -> usize {
    1000
}

const fn default_quantum() -> f32 {
    0.5
}

const fn default_batch_min_agents() -> usize {
    128
}

const fn default_spacing() -> f32 {
    2.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.messaging.max_messages_per_tick, 1000);
        assert!(config.neighbor_cache.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
world:
  seed: 7
  fixed_dt: 0.05
  tick_count: 20

spatial:
  cell_size: 8.0

messaging:
  max_messages_per_tick: 16

neighbor_cache:
  enabled: false
  quantum: 0.25

batch:
  enabled: true
  min_agents: 4

agent:
  mass: 2.0
  max_speed: 3.0
  carry_capacity: 25.0

steering:
  separation_weight: 2.5
  separation_falloff: linear
  wander_weight: 0.0

formation:
  default_spacing: 3.0

logging:
  level: debug
";
        let config = SimulationConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.world.seed, 7);
        assert_eq!(config.world.tick_count, 20);
        assert_eq!(config.messaging.max_messages_per_tick, 16);
        assert!(!config.neighbor_cache.enabled);
        assert_eq!(config.batch.min_agents, 4);
        assert!((config.agent.mass - 2.0).abs() < f32::EPSILON);
        // untouched agent fields keep their defaults
        assert!((config.agent.max_force - AgentParams::default().max_force).abs() < f32::EPSILON);
        assert_eq!(config.steering.separation_falloff, Falloff::Linear);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn parse_minimal_and_empty_yaml() {
        let config = SimulationConfig::parse("world:\n  seed: 9\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();
        assert_eq!(config.world.seed, 9);
        assert!((config.spatial.cell_size - 10.0).abs() < f32::EPSILON);

        assert!(SimulationConfig::parse("").is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad_cell = SimulationConfig::parse("spatial:\n  cell_size: 0.0\n");
        assert!(matches!(
            bad_cell,
            Err(ConfigError::Invalid {
                field: "spatial.cell_size",
                ..
            })
        ));
        let bad_bus = SimulationConfig::parse("messaging:\n  max_messages_per_tick: 0\n");
        assert!(bad_bus.is_err());
        let bad_agent = SimulationConfig::parse("agent:\n  mass: -1.0\n");
        assert!(matches!(bad_agent, Err(ConfigError::Agent { .. })));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let result = SimulationConfig::parse("world: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn flocking_behaviors_skip_zero_weights() {
        let steering = SteeringConfig {
            wander_weight: 0.0,
            avoidance_weight: 0.0,
            ..SteeringConfig::default()
        };
        let behaviors = steering.flocking_behaviors();
        assert_eq!(behaviors.len(), 3);
        assert!(behaviors.iter().all(|b| b.behavior.is_flocking()));
        assert_eq!(SteeringConfig::default().flocking_behaviors().len(), 5);
    }
}
