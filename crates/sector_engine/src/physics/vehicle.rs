//! Raycast vehicles
//!
//! A vehicle is a dynamic chassis body with wheels that are not bodies of
//! their own. Each substep every wheel casts a ray down its suspension; on
//! contact the suspension spring pushes the chassis up and tyre friction
//! drives, brakes and steers it.

use crate::foundation::math::{Quat, Transform, Vec3};

use super::primitives::Ray;
use super::rigid_body::{point_velocity, RigidBody};
use super::{ObjectId, PhysicsError, SectorId};

/// One wheel and its suspension
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleWheel {
    /// Mount point in the chassis frame
    pub mount: Vec3,
    /// Suspension direction in the chassis frame
    pub direction: Vec3,
    /// Wheel radius
    pub radius: f32,
    /// Suspension rest length
    pub suspension_length: f32,
    /// Spring stiffness
    pub suspension_stiffness: f32,
    /// Damping of compression changes
    pub suspension_damping: f32,
    /// Largest force the suspension transmits
    pub max_suspension_force: f32,
    /// Tyre friction
    pub friction_coefficient: f32,
    /// Scale of the height at which lateral forces act; 0 prevents rolling
    pub roll_influence: f32,
    /// Rolling resistance as a fraction of the suspension force
    pub rolling_friction: f32,
    /// Whether the engine drives this wheel
    pub driven: bool,
    steering: f32,
    engine_force: f32,
    brake: f32,
    compression: f32,
    suspension_force: f32,
    rotation: f32,
    in_contact: bool,
    skidding: bool,
}

impl VehicleWheel {
    /// Wheel mounted at `mount` with suspension pointing down
    pub fn new(mount: Vec3, radius: f32) -> Self {
        Self {
            mount,
            direction: -Vec3::y(),
            radius,
            suspension_length: 0.3,
            suspension_stiffness: 5000.0,
            suspension_damping: 400.0,
            max_suspension_force: 6000.0,
            friction_coefficient: 1.0,
            roll_influence: 0.1,
            rolling_friction: 0.0,
            driven: false,
            steering: 0.0,
            engine_force: 0.0,
            brake: 0.0,
            compression: 0.0,
            suspension_force: 0.0,
            rotation: 0.0,
            in_contact: false,
            skidding: false,
        }
    }

    /// Steering angle in radians
    pub fn steering(&self) -> f32 {
        self.steering
    }

    /// Engine force applied this step
    pub fn engine_force(&self) -> f32 {
        self.engine_force
    }

    /// Brake force applied this step
    pub fn brake(&self) -> f32 {
        self.brake
    }

    /// Suspension compression after the last substep
    pub fn compression(&self) -> f32 {
        self.compression
    }

    /// Suspension force after the last substep
    pub fn suspension_force(&self) -> f32 {
        self.suspension_force
    }

    /// True when the wheel touched ground in the last substep
    pub fn is_in_contact(&self) -> bool {
        self.in_contact
    }

    /// True when the friction circle limited the tyre force
    pub fn is_skidding(&self) -> bool {
        self.skidding
    }

    /// Wheel spin angle
    pub fn rotation(&self) -> f32 {
        self.rotation
    }
}

/// Brake acting on a set of wheels
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleBrakeInfo {
    /// Wheel indices
    pub wheels: Vec<usize>,
    /// Force at full brake, shared by the wheels
    pub max_force: f32,
}

impl VehicleBrakeInfo {
    /// Brake on `wheels` with the default force of 1000
    pub fn new(wheels: Vec<usize>) -> Self {
        Self {
            wheels,
            max_force: 1000.0,
        }
    }
}

/// Steering device acting on a set of wheels
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSteeringDevice {
    /// Wheel indices
    pub wheels: Vec<usize>,
    /// Largest steering angle in radians
    pub max_steering: f32,
    steering: f32,
}

impl VehicleSteeringDevice {
    /// Device on `wheels` with the default limit of 0.4 radians
    pub fn new(wheels: Vec<usize>) -> Self {
        Self {
            wheels,
            max_steering: 0.4,
            steering: 0.0,
        }
    }

    /// Current steering angle
    pub fn steering(&self) -> f32 {
        self.steering
    }
}

/// Chassis body plus wheels, brakes and steering devices
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    chassis: ObjectId,
    wheels: Vec<VehicleWheel>,
    brakes: Vec<VehicleBrakeInfo>,
    steering_devices: Vec<VehicleSteeringDevice>,
    pub(crate) sector: Option<SectorId>,
}

impl Vehicle {
    /// Vehicle driving the rigid body `chassis`
    pub fn new(chassis: ObjectId, wheels: Vec<VehicleWheel>) -> Self {
        Self {
            chassis,
            wheels,
            brakes: Vec::new(),
            steering_devices: Vec::new(),
            sector: None,
        }
    }

    /// Add a brake, builder style
    pub fn with_brake(mut self, brake: VehicleBrakeInfo) -> Self {
        self.brakes.push(brake);
        self
    }

    /// Add a steering device, builder style
    pub fn with_steering_device(mut self, device: VehicleSteeringDevice) -> Self {
        self.steering_devices.push(device);
        self
    }

    /// Chassis body
    pub fn chassis(&self) -> ObjectId {
        self.chassis
    }

    /// Sector the vehicle was added to
    pub fn sector(&self) -> Option<SectorId> {
        self.sector
    }

    /// Wheels, in mounting order
    pub fn wheels(&self) -> &[VehicleWheel] {
        &self.wheels
    }

    /// Wheel `index`
    pub fn wheel(&self, index: usize) -> Result<&VehicleWheel, PhysicsError> {
        self.wheels.get(index).ok_or(PhysicsError::InvalidVehicleIndex {
            what: "wheel",
            index,
            count: self.wheels.len(),
        })
    }

    /// Brakes
    pub fn brakes(&self) -> &[VehicleBrakeInfo] {
        &self.brakes
    }

    /// Steering devices
    pub fn steering_devices(&self) -> &[VehicleSteeringDevice] {
        &self.steering_devices
    }

    /// Spread `force` evenly over the driven wheels, or over every wheel
    /// when none is marked driven
    pub fn set_engine_force(&mut self, force: f32) {
        let driven = self.wheels.iter().filter(|w| w.driven).count();
        let all = driven == 0;
        let count = if all { self.wheels.len().max(1) } else { driven };
        let share = force / count as f32;
        for wheel in &mut self.wheels {
            wheel.engine_force = if all || wheel.driven { share } else { 0.0 };
        }
    }

    /// Apply brake `index` at `factor` (0 to 1) for the coming step
    ///
    /// The brake force is shared by the brake's wheels and must be applied
    /// again every step it should remain active.
    pub fn apply_brake(&mut self, index: usize, factor: f32) -> Result<(), PhysicsError> {
        let brake = self.brakes.get(index).ok_or(PhysicsError::InvalidVehicleIndex {
            what: "brake",
            index,
            count: self.brakes.len(),
        })?;
        let share = brake.max_force * factor.clamp(0.0, 1.0) / brake.wheels.len().max(1) as f32;
        for wheel in &brake.wheels {
            if let Some(wheel) = self.wheels.get_mut(*wheel) {
                wheel.brake += share;
            }
        }
        Ok(())
    }

    /// Add `delta` to steering device `index`, clamped to its limit
    pub fn increment_steering(&mut self, index: usize, delta: f32) -> Result<(), PhysicsError> {
        let angle = self.device(index)?.steering + delta;
        self.set_steering(index, angle)
    }

    /// Set the angle of steering device `index`, clamped to its limit
    pub fn set_steering(&mut self, index: usize, angle: f32) -> Result<(), PhysicsError> {
        self.device(index)?;
        let device = &mut self.steering_devices[index];
        device.steering = angle.clamp(-device.max_steering, device.max_steering);
        for wheel in &device.wheels {
            if let Some(wheel) = self.wheels.get_mut(*wheel) {
                wheel.steering = device.steering;
            }
        }
        Ok(())
    }

    fn device(&self, index: usize) -> Result<&VehicleSteeringDevice, PhysicsError> {
        self.steering_devices.get(index).ok_or(PhysicsError::InvalidVehicleIndex {
            what: "steering device",
            index,
            count: self.steering_devices.len(),
        })
    }

    /// World transform of wheel `index` for a chassis at `chassis`
    pub fn wheel_transform(&self, index: usize, chassis: &Transform) -> Result<Transform, PhysicsError> {
        let wheel = self.wheel(index)?;
        let travel = wheel.suspension_length - wheel.compression;
        let local = wheel.mount + wheel.direction.normalize() * travel;
        let rotation = Quat::from_axis_angle(&Vec3::y_axis(), wheel.steering)
            * Quat::from_axis_angle(&Vec3::x_axis(), wheel.rotation);
        Ok(Transform::from_position_rotation(
            chassis.transform_point(&local),
            chassis.rotation * rotation,
        ))
    }

    /// Clear engine and brake inputs
    pub(crate) fn reset_inputs(&mut self) {
        for wheel in &mut self.wheels {
            wheel.engine_force = 0.0;
            wheel.brake = 0.0;
        }
    }

    /// Apply suspension and tyre forces to the chassis for one substep
    ///
    /// `cast` returns the distance and the surface normal of the first hit
    /// along a world-space ray.
    pub(crate) fn apply_wheel_forces(
        &mut self,
        chassis: &mut RigidBody,
        transform: &Transform,
        dt: f32,
        mut cast: impl FnMut(&Ray, f32) -> Option<(f32, Vec3)>,
    ) {
        if dt <= 0.0 || !chassis.is_dynamic() {
            return;
        }
        let mass_share = chassis.mass() / self.wheels.len().max(1) as f32;
        for wheel in &mut self.wheels {
            let previous = wheel.compression;
            let mount = transform.transform_point(&wheel.mount);
            let down = (transform.rotation * wheel.direction).normalize();
            let reach = wheel.suspension_length + wheel.radius;
            let Some((distance, normal)) = cast(&Ray { origin: mount, direction: down }, reach) else {
                wheel.in_contact = false;
                wheel.skidding = false;
                wheel.compression = 0.0;
                wheel.suspension_force = 0.0;
                continue;
            };
            wheel.in_contact = true;
            wheel.compression = (wheel.suspension_length - (distance - wheel.radius)).max(0.0);
            let rate = (wheel.compression - previous) / dt;
            let force = (wheel.suspension_stiffness * wheel.compression + wheel.suspension_damping * rate)
                .clamp(0.0, wheel.max_suspension_force);
            wheel.suspension_force = force;

            let up = -down;
            let contact = mount + down * distance;
            let offset = contact - transform.position;
            chassis.apply_impulse(up * (force * dt), offset, &transform.rotation);

            let steer = Quat::from_axis_angle(&Vec3::y_axis(), wheel.steering);
            let heading = transform.rotation * (steer * Vec3::z());
            let Some(forward) = (heading - normal * heading.dot(&normal)).try_normalize(f32::EPSILON) else {
                continue;
            };
            let side = normal.cross(&forward);
            let velocity = point_velocity(&chassis.linear_velocity(), &chassis.angular_velocity(), &offset);
            let (forward_speed, side_speed) = (velocity.dot(&forward), velocity.dot(&side));

            let stopping = forward_speed.abs() * mass_share / dt;
            let resistance = (wheel.brake + wheel.rolling_friction * force).min(stopping);
            let longitudinal = wheel.engine_force - forward_speed.signum() * resistance;
            let lateral = -side_speed * mass_share / dt * wheel.friction_coefficient;

            let limit = wheel.friction_coefficient * force;
            let magnitude = longitudinal.hypot(lateral);
            let scale = if magnitude > limit && magnitude > 0.0 { limit / magnitude } else { 1.0 };
            wheel.skidding = scale < 1.0;

            let mut lever = offset;
            lever -= up * (lever.dot(&up) * (1.0 - wheel.roll_influence));
            chassis.apply_impulse(forward * (longitudinal * scale * dt), offset, &transform.rotation);
            chassis.apply_impulse(side * (lateral * scale * dt), lever, &transform.rotation);

            wheel.rotation = (wheel.rotation + forward_speed / wheel.radius * dt) % std::f32::consts::TAU;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chassis_id() -> ObjectId {
        slotmap::SlotMap::<ObjectId, ()>::with_key().insert(())
    }

    fn car() -> Vehicle {
        let mut wheels: Vec<VehicleWheel> = [(-1.0, 1.5), (1.0, 1.5), (-1.0, -1.5), (1.0, -1.5)]
            .iter()
            .map(|(x, z)| VehicleWheel::new(Vec3::new(*x, 0.0, *z), 0.4))
            .collect();
        wheels[2].driven = true;
        wheels[3].driven = true;
        Vehicle::new(chassis_id(), wheels)
            .with_brake(VehicleBrakeInfo::new(vec![0, 1, 2, 3]))
            .with_steering_device(VehicleSteeringDevice::new(vec![0, 1]))
    }

    #[test]
    fn test_engine_force_goes_to_driven_wheels() {
        let mut vehicle = car();
        vehicle.set_engine_force(100.0);
        let forces: Vec<f32> = vehicle.wheels().iter().map(VehicleWheel::engine_force).collect();
        assert_eq!(forces, vec![0.0, 0.0, 50.0, 50.0]);
    }

    #[test]
    fn test_brake_is_split_and_reset() {
        let mut vehicle = car();
        vehicle.apply_brake(0, 0.5).unwrap();
        assert_relative_eq!(vehicle.wheels()[1].brake(), 125.0);
        vehicle.reset_inputs();
        assert_eq!(vehicle.wheels()[1].brake(), 0.0);
        assert!(matches!(
            vehicle.apply_brake(3, 1.0),
            Err(PhysicsError::InvalidVehicleIndex { what: "brake", index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_steering_is_clamped_per_device() {
        let mut vehicle = car();
        vehicle.increment_steering(0, 0.3).unwrap();
        vehicle.increment_steering(0, 0.3).unwrap();
        assert_relative_eq!(vehicle.steering_devices()[0].steering(), 0.4);
        assert_relative_eq!(vehicle.wheels()[1].steering(), 0.4);
        assert_eq!(vehicle.wheels()[2].steering(), 0.0);
    }

    #[test]
    fn test_suspension_supports_chassis() {
        let mut vehicle = car();
        let mut chassis = RigidBody::new_dynamic(100.0);
        let transform = Transform::from_position(Vec3::new(0.0, 0.6, 0.0));
        // Ground at y = 0
        vehicle.apply_wheel_forces(&mut chassis, &transform, 1.0 / 60.0, |ray, reach| {
            let t = ray.origin.y / -ray.direction.y;
            (t <= reach).then_some((t, Vec3::y()))
        });
        assert!(vehicle.wheels().iter().all(VehicleWheel::is_in_contact));
        assert_relative_eq!(vehicle.wheels()[0].compression(), 0.1, epsilon = 1e-5);
        assert!(chassis.linear_velocity().y > 0.0);
    }
}
