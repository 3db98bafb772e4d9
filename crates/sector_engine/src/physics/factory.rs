//! Object factories
//!
//! Factories are plain serde templates that stamp out collision objects,
//! rigid bodies, soft bodies and vehicles. They can be written by hand or
//! loaded from `.ron`/`.toml` files through [`Config`].
//!
//! # Usage
//!
//! ```rust
//! use sector_engine::physics::factory::{RigidBodyFactory, ShapeDesc};
//!
//! let factory = RigidBodyFactory {
//!     name: "crate".to_string(),
//!     shape: ShapeDesc::Box { half_extents: [0.5, 0.5, 0.5] },
//!     mass: 2.0,
//!     ..RigidBodyFactory::default()
//! };
//! let object = factory.create(None).unwrap();
//! assert_eq!(object.name(), "crate");
//! ```

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::foundation::math::{Transform, Vec3};

use super::collider::Collider;
use super::geometry::{collision_geometry, ConvexDecomposer, GeometrySource};
use super::object::CollisionObject;
use super::rigid_body::{RigidBody, RigidBodyState};
use super::soft_body::{SoftBody, SoftMaterial};
use super::vehicle::{Vehicle, VehicleBrakeInfo, VehicleSteeringDevice, VehicleWheel};
use super::{ObjectId, PhysicsError, PhysicsSystem, VehicleId};

/// Collider description of a factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShapeDesc {
    /// Box with half extents
    Box {
        /// Half size along each axis
        half_extents: [f32; 3],
    },
    /// Sphere
    Sphere {
        /// Radius
        radius: f32,
    },
    /// Capsule along Y
    Capsule {
        /// Radius
        radius: f32,
        /// Half length of the straight part
        half_height: f32,
    },
    /// Cylinder along Y
    Cylinder {
        /// Radius
        radius: f32,
        /// Half height
        half_height: f32,
    },
    /// Cone along Y
    Cone {
        /// Base radius
        radius: f32,
        /// Height
        height: f32,
    },
    /// Convex hull of the geometry source
    ConvexMesh,
    /// Triangle mesh of the geometry source; static bodies only
    ConcaveMesh,
    /// Convex parts of the geometry source
    Decomposed,
}

impl Default for ShapeDesc {
    fn default() -> Self {
        Self::Box {
            half_extents: [0.5, 0.5, 0.5],
        }
    }
}

impl ShapeDesc {
    /// Build the collider
    ///
    /// Mesh shapes read the collision geometry of `source`.
    pub fn collider(
        &self,
        source: Option<&dyn GeometrySource>,
        decomposer: &dyn ConvexDecomposer,
    ) -> Result<Collider, PhysicsError> {
        let mesh = || {
            source
                .and_then(collision_geometry)
                .ok_or_else(|| PhysicsError::DegenerateCollider("no collision geometry".into()))
        };
        match self {
            Self::Box { half_extents } => Ok(Collider::cuboid(Vec3::from(*half_extents))),
            Self::Sphere { radius } => Ok(Collider::sphere(*radius)),
            Self::Capsule { radius, half_height } => Ok(Collider::capsule(*radius, *half_height)),
            Self::Cylinder { radius, half_height } => Ok(Collider::cylinder(*radius, *half_height)),
            Self::Cone { radius, height } => Ok(Collider::cone(*radius, *height)),
            Self::ConvexMesh => Collider::convex_mesh(&mesh()?),
            Self::ConcaveMesh => Collider::concave_mesh(mesh()?),
            Self::Decomposed => Collider::convex_decomposition(&mesh()?, decomposer),
        }
    }
}

/// Static or ghost objects shaped by render geometry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionObjectFactory {
    /// Object name
    pub name: String,
    /// Overlap detector instead of a solid
    pub ghost: bool,
}

impl CollisionObjectFactory {
    /// Object shaped by the collision geometry of `source`
    ///
    /// Sources without usable triangles give an inert object that still
    /// carries a transform and sinks.
    pub fn create(&self, source: &dyn GeometrySource) -> CollisionObject {
        let Some(mesh) = collision_geometry(source) else {
            debug!("No collision geometry for '{}', creating an inert object", self.name);
            return CollisionObject::inert(&self.name);
        };
        match Collider::concave_mesh(mesh) {
            Ok(collider) if self.ghost => CollisionObject::ghost(&self.name, collider),
            Ok(collider) => CollisionObject::simple(&self.name, collider),
            Err(err) => {
                debug!("Unusable geometry for '{}': {}", self.name, err);
                CollisionObject::inert(&self.name)
            }
        }
    }
}

/// Rigid body template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyFactory {
    /// Object name
    pub name: String,
    /// Collider
    pub shape: ShapeDesc,
    /// Static, dynamic or kinematic
    pub state: RigidBodyState,
    /// Mass of dynamic bodies, ignored when `density` is set
    pub mass: f32,
    /// Mass per unit volume of the collider
    pub density: Option<f32>,
    /// Surface friction
    pub friction: f32,
    /// Restitution in [0, 1]
    pub elasticity: f32,
}

impl Default for RigidBodyFactory {
    fn default() -> Self {
        Self {
            name: String::from("body"),
            shape: ShapeDesc::default(),
            state: RigidBodyState::Dynamic,
            mass: 1.0,
            density: None,
            friction: 0.5,
            elasticity: 0.0,
        }
    }
}

impl Config for RigidBodyFactory {}

impl RigidBodyFactory {
    /// Build the body; mesh shapes need `source`
    pub fn create(&self, source: Option<&dyn GeometrySource>) -> Result<CollisionObject, PhysicsError> {
        self.create_with(source, &super::ConnectedComponentDecomposer)
    }

    /// Build the body using `decomposer` for decomposed shapes
    pub fn create_with(
        &self,
        source: Option<&dyn GeometrySource>,
        decomposer: &dyn ConvexDecomposer,
    ) -> Result<CollisionObject, PhysicsError> {
        let collider = self.shape.collider(source, decomposer)?;
        let body = match (self.state, self.density) {
            (RigidBodyState::Dynamic, Some(density)) => RigidBody::with_density(density),
            (RigidBodyState::Dynamic, None) => RigidBody::new_dynamic(self.mass),
            (state, _) => RigidBody::with_state(state),
        }
        .with_friction(self.friction)
        .with_elasticity(self.elasticity);
        CollisionObject::rigid_body(&self.name, collider, body)
    }
}

/// Rope template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftRopeFactory {
    /// Object name
    pub name: String,
    /// First node
    pub start: [f32; 3],
    /// Last node
    pub end: [f32; 3],
    /// Number of nodes, at least 2
    pub node_count: usize,
    /// Mass spread evenly over the nodes
    pub mass: f32,
    /// Material
    pub material: SoftMaterial,
}

impl Default for SoftRopeFactory {
    fn default() -> Self {
        Self {
            name: String::from("rope"),
            start: [0.0, 0.0, 0.0],
            end: [0.0, -1.0, 0.0],
            node_count: 10,
            mass: 1.0,
            material: SoftMaterial::default(),
        }
    }
}

impl SoftRopeFactory {
    /// Build the rope
    pub fn create(&self) -> Result<CollisionObject, PhysicsError> {
        let mut body = SoftBody::rope(Vec3::from(self.start), Vec3::from(self.end), self.node_count, self.mass)?;
        apply_material(&mut body, &self.material)?;
        Ok(CollisionObject::soft_body(&self.name, body))
    }
}

/// Cloth template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftClothFactory {
    /// Object name
    pub name: String,
    /// Corners in order around the rectangle
    pub corners: [[f32; 3]; 4],
    /// Nodes along the first and second edge
    pub resolution: (usize, usize),
    /// Mass spread evenly over the nodes
    pub mass: f32,
    /// Material
    pub material: SoftMaterial,
}

impl Default for SoftClothFactory {
    fn default() -> Self {
        Self {
            name: String::from("cloth"),
            corners: [[-1.0, 0.0, -1.0], [1.0, 0.0, -1.0], [1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]],
            resolution: (10, 10),
            mass: 1.0,
            material: SoftMaterial::default(),
        }
    }
}

impl SoftClothFactory {
    /// Build the cloth
    pub fn create(&self) -> Result<CollisionObject, PhysicsError> {
        let corners = self.corners.map(Vec3::from);
        let mut body = SoftBody::cloth(corners, self.resolution, self.mass)?;
        apply_material(&mut body, &self.material)?;
        Ok(CollisionObject::soft_body(&self.name, body))
    }
}

/// Soft body from render geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftMeshFactory {
    /// Object name
    pub name: String,
    /// Mass spread evenly over the vertices
    pub mass: f32,
    /// Material
    pub material: SoftMaterial,
}

impl Default for SoftMeshFactory {
    fn default() -> Self {
        Self {
            name: String::from("soft mesh"),
            mass: 1.0,
            material: SoftMaterial::default(),
        }
    }
}

impl SoftMeshFactory {
    /// Build the body from the collision geometry of `source`, placed by
    /// `transform`
    pub fn create(&self, source: &dyn GeometrySource, transform: &Transform) -> Result<CollisionObject, PhysicsError> {
        let mesh = collision_geometry(source)
            .ok_or_else(|| PhysicsError::DegenerateCollider(format!("no geometry for soft mesh '{}'", self.name)))?;
        let mut body = SoftBody::from_mesh(&mesh.transformed(transform), self.mass)?;
        apply_material(&mut body, &self.material)?;
        Ok(CollisionObject::soft_body(&self.name, body))
    }
}

fn apply_material(body: &mut SoftBody, material: &SoftMaterial) -> Result<(), PhysicsError> {
    body.set_linear_stiffness(material.linear_stiffness)?;
    body.set_angular_stiffness(material.angular_stiffness)?;
    body.set_damping(material.damping)?;
    body.set_friction(material.friction)?;
    body.set_pressure(material.pressure)?;
    body.set_drag(material.drag)?;
    body.set_lift(material.lift)
}

/// Wheel template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleWheelFactory {
    /// Mount point in chassis space
    pub mount: [f32; 3],
    /// Wheel radius
    pub radius: f32,
    /// Suspension rest length
    pub suspension_length: f32,
    /// Spring stiffness
    pub suspension_stiffness: f32,
    /// Damping of compression changes
    pub suspension_damping: f32,
    /// Tyre friction
    pub friction_coefficient: f32,
    /// Whether the engine drives the wheel
    pub driven: bool,
}

impl Default for VehicleWheelFactory {
    fn default() -> Self {
        let wheel = VehicleWheel::new(Vec3::zeros(), 0.4);
        Self {
            mount: [0.0, 0.0, 0.0],
            radius: wheel.radius,
            suspension_length: wheel.suspension_length,
            suspension_stiffness: wheel.suspension_stiffness,
            suspension_damping: wheel.suspension_damping,
            friction_coefficient: wheel.friction_coefficient,
            driven: wheel.driven,
        }
    }
}

impl VehicleWheelFactory {
    /// Build the wheel
    pub fn create(&self) -> VehicleWheel {
        let mut wheel = VehicleWheel::new(Vec3::from(self.mount), self.radius);
        wheel.suspension_length = self.suspension_length;
        wheel.suspension_stiffness = self.suspension_stiffness;
        wheel.suspension_damping = self.suspension_damping;
        wheel.friction_coefficient = self.friction_coefficient;
        wheel.driven = self.driven;
        wheel
    }
}

/// Vehicle template: chassis, wheels, brakes and steering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleFactory {
    /// Chassis body
    pub chassis: RigidBodyFactory,
    /// Wheels in index order
    pub wheels: Vec<VehicleWheelFactory>,
    /// Wheel indices of each brake
    pub brakes: Vec<Vec<usize>>,
    /// Wheel indices of each steering device
    pub steering: Vec<Vec<usize>>,
}

impl Default for VehicleFactory {
    fn default() -> Self {
        Self {
            chassis: RigidBodyFactory {
                name: String::from("chassis"),
                shape: ShapeDesc::Box {
                    half_extents: [1.0, 0.5, 2.0],
                },
                mass: 100.0,
                ..RigidBodyFactory::default()
            },
            wheels: Vec::new(),
            brakes: Vec::new(),
            steering: Vec::new(),
        }
    }
}

impl Config for VehicleFactory {}

impl VehicleFactory {
    /// Register the chassis and vehicle with `physics`
    ///
    /// Neither is placed in a sector; add the chassis object and the
    /// vehicle to one afterwards.
    pub fn create(
        &self,
        physics: &mut PhysicsSystem,
        transform: Transform,
    ) -> Result<(ObjectId, VehicleId), PhysicsError> {
        let chassis = self.chassis.create_with(None, physics.decomposer())?;
        let chassis = physics.add_object(chassis.with_transform(transform));

        let wheels = self.wheels.iter().map(VehicleWheelFactory::create).collect();
        let vehicle = self.brakes.iter().fold(Vehicle::new(chassis, wheels), |vehicle, wheels| {
            vehicle.with_brake(VehicleBrakeInfo::new(wheels.clone()))
        });
        let vehicle = self.steering.iter().fold(vehicle, |vehicle, wheels| {
            vehicle.with_steering_device(VehicleSteeringDevice::new(wheels.clone()))
        });

        match physics.create_vehicle(vehicle) {
            Ok(id) => Ok((chassis, id)),
            Err(err) => {
                physics.destroy_object(chassis)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::physics::geometry::TriangleMesh;
    use crate::physics::CollisionObjectType;
    use approx::assert_relative_eq;

    struct NoGeometry;

    impl GeometrySource for NoGeometry {
        fn triangle_data(&self, _tag: &str) -> Option<TriangleMesh> {
            None
        }
    }

    #[test]
    fn test_missing_geometry_gives_inert_object() {
        let object = CollisionObjectFactory {
            name: "prop".into(),
            ghost: false,
        }
        .create(&NoGeometry);
        assert!(object.collider().is_none());
        assert!(object.world_aabb().is_none());
    }

    #[test]
    fn test_geometry_gives_static_mesh() {
        let mesh = TriangleMesh::cuboid(Vec3::repeat(1.0));
        let object = CollisionObjectFactory {
            name: "wall".into(),
            ghost: true,
        }
        .create(&mesh);
        assert_eq!(object.object_type(), CollisionObjectType::Ghost);
        assert_eq!(object.collider().map(Collider::name), Some("concave mesh"));
    }

    #[test]
    fn test_rigid_body_from_ron() {
        let factory: RigidBodyFactory = ron::from_str(
            "(name: \"ball\", shape: Sphere(radius: 0.5), mass: 3.0, elasticity: 0.5)",
        )
        .unwrap();
        let object = factory.create(None).unwrap();
        let body = object.as_rigid_body().unwrap();
        assert_relative_eq!(body.mass(), 3.0);
        assert_relative_eq!(body.elasticity(), 0.5);
        assert!(body.is_dynamic());
    }

    #[test]
    fn test_mesh_shape_needs_geometry() {
        let factory = RigidBodyFactory {
            shape: ShapeDesc::ConvexMesh,
            ..RigidBodyFactory::default()
        };
        assert!(factory.create(None).is_err());
        let mesh = TriangleMesh::cuboid(Vec3::repeat(0.5));
        assert!(factory.create(Some(&mesh)).is_ok());
    }

    #[test]
    fn test_concave_mesh_refused_for_dynamic_body() {
        let mesh = TriangleMesh::cuboid(Vec3::repeat(0.5));
        let factory = RigidBodyFactory {
            shape: ShapeDesc::ConcaveMesh,
            ..RigidBodyFactory::default()
        };
        assert!(matches!(factory.create(Some(&mesh)), Err(PhysicsError::StaticOnlyCollider(_))));

        let factory = RigidBodyFactory {
            state: RigidBodyState::Static,
            ..factory
        };
        assert!(factory.create(Some(&mesh)).is_ok());
    }

    #[test]
    fn test_rope_factory_validates_material() {
        let mut factory = SoftRopeFactory::default();
        let rope = factory.create().unwrap();
        assert_eq!(rope.as_soft_body().unwrap().node_count(), 10);

        factory.material.friction = 2.0;
        assert!(matches!(factory.create(), Err(PhysicsError::InvalidMaterial { .. })));
    }

    #[test]
    fn test_cloth_and_mesh_factories() {
        let cloth = SoftClothFactory {
            resolution: (4, 3),
            ..SoftClothFactory::default()
        }
        .create()
        .unwrap();
        assert_eq!(cloth.as_soft_body().unwrap().node_count(), 12);

        let mesh = TriangleMesh::quad(1.0, 1.0);
        let moved = Transform::from_position(Vec3::new(0.0, 5.0, 0.0));
        let soft = SoftMeshFactory::default().create(&mesh, &moved).unwrap();
        let body = soft.as_soft_body().unwrap();
        assert_eq!(body.node_count(), mesh.vertices.len());
        assert_relative_eq!(body.centroid().y, 5.0, epsilon = 1e-5);
        assert!(SoftMeshFactory::default().create(&NoGeometry, &moved).is_err());
    }

    #[test]
    fn test_vehicle_factory_registers_chassis() {
        let mut physics = PhysicsSystem::new(EngineConfig::default());
        let factory = VehicleFactory {
            wheels: [(-1.0, 1.5), (1.0, 1.5)]
                .iter()
                .map(|(x, z)| VehicleWheelFactory {
                    mount: [*x, 0.0, *z],
                    driven: true,
                    ..VehicleWheelFactory::default()
                })
                .collect(),
            brakes: vec![vec![0, 1]],
            steering: vec![vec![0, 1]],
            ..VehicleFactory::default()
        };
        let (chassis, vehicle) = factory.create(&mut physics, Transform::identity()).unwrap();

        let body = physics.object(chassis).unwrap().as_rigid_body().unwrap();
        assert_relative_eq!(body.mass(), 100.0);
        let vehicle = physics.vehicle(vehicle).unwrap();
        assert_eq!(vehicle.chassis(), chassis);
        assert_eq!(vehicle.wheels().len(), 2);
        assert_eq!(vehicle.brakes().len(), 1);
        assert_eq!(vehicle.steering_devices().len(), 1);
    }
}
