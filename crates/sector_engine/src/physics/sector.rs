//! Collision sectors
//!
//! A sector is one independently simulated region. It lists the objects,
//! joints, vehicles and portals placed in it and keeps the step parameters
//! copied from the [`SimulationConfig`] at creation time.

use crate::config::SimulationConfig;
use crate::foundation::math::Vec3;
use crate::spatial::{KdTree, KdTreeConfig};

use super::object::CollisionData;
use super::{JointId, ObjectId, PortalId, VehicleId};

/// One simulated region
#[derive(Debug)]
pub struct CollisionSector {
    name: String,
    pub(crate) objects: Vec<ObjectId>,
    pub(crate) joints: Vec<JointId>,
    pub(crate) vehicles: Vec<VehicleId>,
    pub(crate) portals: Vec<PortalId>,
    gravity: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    time_step: f32,
    max_steps: usize,
    iterations: usize,
    linear_disable_threshold: f32,
    angular_disable_threshold: f32,
    time_disable_threshold: f32,
    soft_bodies_enabled: bool,
    anchor_max_drag: f32,
    pub(crate) broad_phase: KdTree<ObjectId>,
    pub(crate) last_contacts: Vec<CollisionData>,
}

impl CollisionSector {
    pub(crate) fn new(name: &str, simulation: &SimulationConfig, tree: KdTreeConfig) -> Self {
        Self {
            name: name.to_string(),
            objects: Vec::new(),
            joints: Vec::new(),
            vehicles: Vec::new(),
            portals: Vec::new(),
            gravity: simulation.gravity_vector(),
            linear_damping: simulation.linear_damping,
            angular_damping: simulation.angular_damping,
            time_step: simulation.time_step,
            max_steps: simulation.max_steps,
            iterations: simulation.solver_iterations,
            linear_disable_threshold: simulation.linear_disable_threshold,
            angular_disable_threshold: simulation.angular_disable_threshold,
            time_disable_threshold: simulation.time_disable_threshold,
            soft_bodies_enabled: simulation.soft_bodies_enabled,
            anchor_max_drag: simulation.anchor_max_drag,
            broad_phase: KdTree::new(tree),
            last_contacts: Vec::new(),
        }
    }

    /// Sector name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Objects in the sector, in insertion order
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    /// Number of objects in the sector
    pub fn collision_object_count(&self) -> usize {
        self.objects.len()
    }

    /// Joints added to the sector
    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    /// Vehicles added to the sector
    pub fn vehicles(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// Portals leaving the sector
    pub fn portals(&self) -> &[PortalId] {
        &self.portals
    }

    /// Contacts found during the last step
    pub fn last_contacts(&self) -> &[CollisionData] {
        &self.last_contacts
    }

    /// Gravity applied to dynamic bodies
    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Set the gravity
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    /// Linear damping of bodies without their own
    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    /// Set the linear damping, in [0, 1]
    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping.clamp(0.0, 1.0);
    }

    /// Angular damping of bodies without their own
    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    /// Set the angular damping, in [0, 1]
    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping.clamp(0.0, 1.0);
    }

    /// Preferred substep length, substep cap and solver iterations
    pub fn step_parameters(&self) -> (f32, usize, usize) {
        (self.time_step, self.max_steps, self.iterations)
    }

    /// Set the substep length, substep cap and solver iterations
    pub fn set_step_parameters(&mut self, time_step: f32, max_steps: usize, iterations: usize) {
        if time_step > 0.0 {
            self.time_step = time_step;
        }
        self.max_steps = max_steps.max(1);
        self.iterations = iterations.max(1);
    }

    /// Linear speed, angular speed and time thresholds of auto-disabling
    pub fn auto_disable_params(&self) -> (f32, f32, f32) {
        (
            self.linear_disable_threshold,
            self.angular_disable_threshold,
            self.time_disable_threshold,
        )
    }

    /// Bodies slower than both speeds for `time` seconds go to sleep;
    /// a time of zero never disables
    pub fn set_auto_disable_params(&mut self, linear: f32, angular: f32, time: f32) {
        self.linear_disable_threshold = linear.max(0.0);
        self.angular_disable_threshold = angular.max(0.0);
        self.time_disable_threshold = time.max(0.0);
    }

    /// Whether soft bodies are simulated
    pub fn soft_bodies_enabled(&self) -> bool {
        self.soft_bodies_enabled
    }

    /// Turn soft body simulation on or off
    pub fn set_soft_body_enabled(&mut self, enabled: bool) {
        self.soft_bodies_enabled = enabled;
    }

    /// Largest per-step drag of animated anchors
    pub fn anchor_max_drag(&self) -> f32 {
        self.anchor_max_drag
    }

    /// Substep count and length for a step of `duration` seconds
    ///
    /// The duration is split evenly into at most `max_steps` substeps of
    /// roughly `time_step` each; there is always at least one.
    pub fn substeps(&self, duration: f32) -> (usize, f32) {
        let wanted = (duration / self.time_step).ceil();
        let count = if wanted.is_finite() && wanted >= 1.0 {
            (wanted as usize).min(self.max_steps.max(1))
        } else {
            1
        };
        (count, duration / count as f32)
    }

    /// Broad phase tree
    pub fn broad_phase(&self) -> &KdTree<ObjectId> {
        &self.broad_phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sector() -> CollisionSector {
        CollisionSector::new("test", &SimulationConfig::default(), KdTreeConfig::default())
    }

    #[test]
    fn test_defaults_come_from_config() {
        let sector = sector();
        assert_eq!(sector.name(), "test");
        assert_relative_eq!(sector.linear_damping(), 0.1);
        assert_eq!(sector.step_parameters(), (1.0 / 60.0, 1, 10));
        assert_eq!(sector.auto_disable_params(), (0.8, 1.0, 0.0));
        assert!(sector.soft_bodies_enabled());
    }

    #[test]
    fn test_substeps_are_even_and_capped() {
        let mut sector = sector();
        let (count, length) = sector.substeps(0.1);
        assert_eq!(count, 1);
        assert_relative_eq!(length, 0.1);

        sector.set_step_parameters(0.01, 4, 10);
        let (count, length) = sector.substeps(0.025);
        assert_eq!(count, 3);
        assert_relative_eq!(length * 3.0, 0.025, epsilon = 1e-6);
        assert_eq!(sector.substeps(1.0).0, 4);
        assert_eq!(sector.substeps(0.0).0, 1);
    }
}
