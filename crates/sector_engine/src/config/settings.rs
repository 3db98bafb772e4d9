//! # Engine Settings
//!
//! Serializable tunables for the spatial tree and the physics sectors.
//!
//! ## Configuration Categories
//!
//! - **Tree Config**: split threshold and distribution block time of the KD-tree
//! - **Simulation Config**: step parameters, damping, auto-disable and gravity
//!   applied to every newly created sector

use serde::{Deserialize, Serialize};

use super::Config;
use crate::foundation::math::Vec3;
use crate::spatial::KdTreeConfig;

/// # Simulation Configuration
///
/// Defaults copied into every sector at creation time. Sectors can be
/// retuned individually afterwards.
///
/// # Example
///
/// ```
/// use sector_engine::config::SimulationConfig;
///
/// let config = SimulationConfig::new()
///     .with_step_parameters(1.0 / 120.0, 2, 20)
///     .with_gravity([0.0, -3.7, 0.0]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Multiplier applied to wall-clock durations by `PhysicsSystem::step_all`
    pub simulation_speed: f32,
    /// Preferred length of one internal substep, in seconds
    pub time_step: f32,
    /// Upper bound on substeps per `step` call
    pub max_steps: usize,
    /// Contact and joint solver iterations per substep
    pub solver_iterations: usize,
    /// Linear velocity damping applied to new rigid bodies
    pub linear_damping: f32,
    /// Angular velocity damping applied to new rigid bodies
    pub angular_damping: f32,
    /// Linear speed under which a body is considered at rest
    pub linear_disable_threshold: f32,
    /// Angular speed under which a body is considered at rest
    pub angular_disable_threshold: f32,
    /// Seconds at rest before a body is disabled; zero never disables
    pub time_disable_threshold: f32,
    /// Gravity of new sectors
    pub gravity: [f32; 3],
    /// Whether soft bodies are simulated
    pub soft_bodies_enabled: bool,
    /// Largest distance an animated anchor may drag its vertex in one step
    pub anchor_max_drag: f32,
}

impl SimulationConfig {
    /// Create a configuration with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the substep length, substep cap and solver iterations
    pub fn with_step_parameters(mut self, time_step: f32, max_steps: usize, iterations: usize) -> Self {
        self.time_step = time_step;
        self.max_steps = max_steps;
        self.solver_iterations = iterations;
        self
    }

    /// Set the default gravity
    pub fn with_gravity(mut self, gravity: [f32; 3]) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set linear and angular damping
    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    /// Set auto-disable thresholds
    pub fn with_auto_disable(mut self, linear: f32, angular: f32, time: f32) -> Self {
        self.linear_disable_threshold = linear;
        self.angular_disable_threshold = angular;
        self.time_disable_threshold = time;
        self
    }

    /// Set the simulation speed multiplier
    pub fn with_simulation_speed(mut self, speed: f32) -> Self {
        self.simulation_speed = speed;
        self
    }

    /// Gravity as a vector
    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::from(self.gravity)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.time_step > 0.0) {
            return Err(format!("time_step must be positive, got {}", self.time_step));
        }
        if self.max_steps == 0 {
            return Err("max_steps must be at least 1".to_string());
        }
        if self.solver_iterations == 0 {
            return Err("solver_iterations must be at least 1".to_string());
        }
        if self.simulation_speed < 0.0 {
            return Err(format!("simulation_speed must not be negative, got {}", self.simulation_speed));
        }
        for (name, value) in [("linear_damping", self.linear_damping), ("angular_damping", self.angular_damping)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.anchor_max_drag <= 0.0 {
            return Err(format!("anchor_max_drag must be positive, got {}", self.anchor_max_drag));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation_speed: 1.0,
            time_step: 1.0 / 60.0,
            max_steps: 1,
            solver_iterations: 10,
            linear_damping: 0.1,
            angular_damping: 0.1,
            linear_disable_threshold: 0.8,
            angular_disable_threshold: 1.0,
            time_disable_threshold: 0.0,
            gravity: [0.0, -9.81, 0.0],
            soft_bodies_enabled: true,
            anchor_max_drag: 10.0,
        }
    }
}

impl Config for SimulationConfig {}

/// # Engine Configuration
///
/// Aggregates the tree and simulation settings so a single file can drive a
/// whole application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// KD-tree settings used for new trees and sector broad phases
    pub tree: KdTreeConfig,
    /// Simulation settings used for new sectors
    pub simulation: SimulationConfig,
}

impl EngineConfig {
    /// Create a configuration with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tree settings
    pub fn with_tree(mut self, tree: KdTreeConfig) -> Self {
        self.tree = tree;
        self
    }

    /// Replace the simulation settings
    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.tree.validate()?;
        self.simulation.validate()
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_simulation_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.max_steps, 1);
        assert_eq!(config.solver_iterations, 10);
        assert!((config.time_step - 1.0 / 60.0).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(SimulationConfig::new().with_step_parameters(0.0, 1, 10).validate().is_err());
        assert!(SimulationConfig::new().with_step_parameters(0.1, 0, 10).validate().is_err());
        assert!(SimulationConfig::new().with_damping(1.5, 0.1).validate().is_err());
    }

    #[test]
    fn test_engine_config_toml_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("engine.toml");

        let config = EngineConfig::new().with_simulation(SimulationConfig::new().with_gravity([0.0, -1.62, 0.0]));
        config.save_to_file(&path).expect("save");
        let loaded = EngineConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("sim.ron");
        std::fs::write(&path, "(solver_iterations: 4)").expect("write");

        let loaded = SimulationConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.solver_iterations, 4);
        assert_eq!(loaded.max_steps, 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = SimulationConfig::load_from_file("settings.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_)) | Err(ConfigError::Io(_))));
        let result = SimulationConfig::default().save_to_file("settings.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
