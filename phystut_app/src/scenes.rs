//! Demo scenes
//!
//! Each scene owns a [`PhysicsSystem`] with one main sector. `drive` feeds
//! per-frame inputs (engine force, walking) and `report` logs the state of
//! the tracked objects.

use rand::Rng;
use sector_engine::config::EngineConfig;
use sector_engine::foundation::math::{Quat, Transform, Vec3};
use sector_engine::physics::factory::{RigidBodyFactory, ShapeDesc, SoftRopeFactory, VehicleFactory, VehicleWheelFactory};
use sector_engine::physics::{
    Actor, Collider, CollisionObject, Joint, ObjectId, PhysicsError, PhysicsSystem, Portal, RigidBody, SectorId,
    VehicleId,
};

/// Number of bodies dropped by the `boxes` scene
const BOX_COUNT: usize = 24;

/// Scene setup errors
#[derive(thiserror::Error, Debug)]
pub enum SceneError {
    /// No scene with that name
    #[error("Unknown scene '{0}' (try boxes, rope, vehicle, portal or actor)")]
    UnknownScene(String),

    /// Invalid engine configuration
    #[error("Invalid engine config: {0}")]
    Config(String),

    /// Physics call failed
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),
}

#[derive(Debug, Clone, Copy)]
enum SceneKind {
    Boxes,
    Rope,
    Vehicle(VehicleId),
    Portal,
    Actor(ObjectId),
}

/// A populated physics system plus the objects worth watching
pub struct Scene {
    /// The simulation
    pub physics: PhysicsSystem,
    sector: SectorId,
    kind: SceneKind,
    tracked: Vec<ObjectId>,
}

impl Scene {
    /// Build the scene called `name`
    pub fn build(name: &str, config: EngineConfig) -> Result<Self, SceneError> {
        config.validate().map_err(SceneError::Config)?;
        let mut physics = PhysicsSystem::new(config);
        let sector = physics.create_sector("main");
        ground(&mut physics, sector)?;

        let mut scene = Self {
            physics,
            sector,
            kind: SceneKind::Boxes,
            tracked: Vec::new(),
        };
        match name {
            "boxes" => scene.boxes()?,
            "rope" => scene.rope()?,
            "vehicle" => scene.vehicle()?,
            "portal" => scene.portal()?,
            "actor" => scene.actor()?,
            other => return Err(SceneError::UnknownScene(other.to_string())),
        }
        log::info!(
            "Scene '{}' ready with {} objects",
            name,
            scene.physics.sector(sector)?.collision_object_count()
        );
        Ok(scene)
    }

    /// Apply the inputs of `frame`
    pub fn drive(&mut self, frame: usize) {
        match self.kind {
            SceneKind::Vehicle(id) => {
                if let Some(vehicle) = self.physics.vehicle_mut(id) {
                    vehicle.set_engine_force(800.0);
                    // Weave left and right once a second
                    let delta = if (frame / 60) % 2 == 0 { 0.01 } else { -0.01 };
                    if let Err(err) = vehicle.increment_steering(0, delta) {
                        log::warn!("Steering failed: {}", err);
                    }
                }
            }
            SceneKind::Actor(id) => {
                if let Some(actor) = self.physics.object_mut(id).and_then(CollisionObject::as_actor_mut) {
                    actor.walk(Vec3::new(1.0, 0.0, 0.5));
                    if frame % 90 == 45 {
                        actor.jump();
                    }
                }
            }
            SceneKind::Boxes | SceneKind::Rope | SceneKind::Portal => {}
        }
    }

    /// Log the tracked objects and the contacts of the last step
    pub fn report(&mut self) -> Result<(), SceneError> {
        for id in &self.tracked {
            let Some(object) = self.physics.object(*id) else {
                continue;
            };
            let sector = object
                .sector()
                .and_then(|s| self.physics.sector(s).ok())
                .map_or("-", |s| s.name());
            log::info!(
                "{:>10} in {:<8} at {:>7.2?} contacts={}",
                object.name(),
                sector,
                object.position().as_slice(),
                object.contacts().len()
            );
        }

        let beam = self
            .physics
            .hit_beam(self.sector, Vec3::new(0.0, 20.0, 0.0), Vec3::new(0.0, -1.0, 0.0))?;
        if let Some(hit) = beam.object.and_then(|id| self.physics.object(id)) {
            log::info!("Beam from above hits '{}' at y={:.2}", hit.name(), beam.isect.y);
        }
        log::debug!(
            "{} contacts in the last step",
            self.physics.sector(self.sector)?.last_contacts().len()
        );
        Ok(())
    }

    fn place(&mut self, object: CollisionObject, transform: Transform) -> Result<ObjectId, SceneError> {
        self.place_in(self.sector, object, transform)
    }

    fn place_in(&mut self, sector: SectorId, object: CollisionObject, transform: Transform) -> Result<ObjectId, SceneError> {
        let id = self.physics.add_object(object.with_transform(transform));
        self.physics.add_collision_object(sector, id)?;
        Ok(id)
    }

    /// Random boxes and spheres dropped in a pile
    fn boxes(&mut self) -> Result<(), SceneError> {
        let mut rng = rand::thread_rng();
        for i in 0..BOX_COUNT {
            let shape = if rng.gen_bool(0.5) {
                ShapeDesc::Box {
                    half_extents: [rng.gen_range(0.2..0.6), rng.gen_range(0.2..0.6), rng.gen_range(0.2..0.6)],
                }
            } else {
                ShapeDesc::Sphere {
                    radius: rng.gen_range(0.2..0.6),
                }
            };
            let object = RigidBodyFactory {
                name: format!("body{i}"),
                shape,
                density: Some(rng.gen_range(50.0..200.0)),
                elasticity: rng.gen_range(0.0..0.4),
                ..RigidBodyFactory::default()
            }
            .create(None)?;
            let position = Vec3::new(rng.gen_range(-3.0..3.0), rng.gen_range(2.0..12.0), rng.gen_range(-3.0..3.0));
            let rotation = Quat::from_euler_angles(rng.gen_range(0.0..3.0), rng.gen_range(0.0..3.0), 0.0);
            let id = self.place(object, Transform::from_position_rotation(position, rotation))?;
            if i < 3 {
                self.tracked.push(id);
            }
        }
        self.physics
            .sector_mut(self.sector)?
            .set_auto_disable_params(0.8, 1.0, 1.0);
        Ok(())
    }

    /// A rope hanging from a fixed point with a crate tied to its end
    fn rope(&mut self) -> Result<(), SceneError> {
        self.kind = SceneKind::Rope;
        let rope = SoftRopeFactory {
            name: String::from("rope"),
            start: [0.0, 8.0, 0.0],
            end: [3.0, 8.0, 0.0],
            node_count: 20,
            ..SoftRopeFactory::default()
        }
        .create()?;
        let rope = self.place(rope, Transform::identity())?;
        if let Some(body) = self.physics.object_mut(rope).and_then(CollisionObject::as_soft_body_mut) {
            body.anchor_vertex(0)?;
        }

        let weight = CollisionObject::rigid_body("crate", Collider::cuboid(Vec3::repeat(0.25)), RigidBody::new_dynamic(2.0))?;
        let weight = self.place(weight, Transform::from_position(Vec3::new(3.0, 7.75, 0.0)))?;
        self.physics.anchor_vertex_to_body(rope, 19, weight)?;

        // A pendulum next to it for comparison
        let bob = CollisionObject::rigid_body("bob", Collider::sphere(0.3), RigidBody::new_dynamic(1.0))?;
        let bob = self.place(bob, Transform::from_position(Vec3::new(-3.0, 8.0, 0.0)))?;
        let joint = self
            .physics
            .create_joint(Joint::point_to_point(Vec3::new(-1.0, 8.0, 0.0)), Some(bob), None)?;
        self.physics.add_joint(self.sector, joint)?;

        self.tracked.extend([rope, weight, bob]);
        Ok(())
    }

    /// A four wheeled car driving in circles
    fn vehicle(&mut self) -> Result<(), SceneError> {
        let wheels = [(-1.0, 1.5, true), (1.0, 1.5, true), (-1.0, -1.5, false), (1.0, -1.5, false)]
            .iter()
            .map(|(x, z, front)| VehicleWheelFactory {
                mount: [*x, -0.3, *z],
                driven: !front,
                ..VehicleWheelFactory::default()
            })
            .collect();
        let factory = VehicleFactory {
            wheels,
            brakes: vec![vec![0, 1, 2, 3]],
            steering: vec![vec![0, 1]],
            ..VehicleFactory::default()
        };
        let (chassis, vehicle) = factory.create(&mut self.physics, Transform::from_position(Vec3::new(0.0, 1.5, 0.0)))?;
        self.physics.add_collision_object(self.sector, chassis)?;
        self.physics.add_vehicle(self.sector, vehicle)?;
        self.kind = SceneKind::Vehicle(vehicle);
        self.tracked.push(chassis);
        Ok(())
    }

    /// A ball rolling through a doorway into a second sector
    fn portal(&mut self) -> Result<(), SceneError> {
        self.kind = SceneKind::Portal;
        let upstairs = self.physics.create_sector("upstairs");
        let floor = CollisionObject::rigid_body(
            "upper floor",
            Collider::cuboid(Vec3::new(20.0, 0.5, 20.0)),
            RigidBody::new_static(),
        )?;
        self.place_in(upstairs, floor, Transform::from_position(Vec3::new(0.0, 49.5, 0.0)))?;

        let door = Portal::new(
            vec![
                Vec3::new(4.0, 0.0, -2.0),
                Vec3::new(4.0, 3.0, -2.0),
                Vec3::new(4.0, 3.0, 2.0),
                Vec3::new(4.0, 0.0, 2.0),
            ],
            upstairs,
        )?
        .with_warp(Transform::from_position(Vec3::new(0.0, 50.0, 0.0)));
        self.physics.add_portal(self.sector, door)?;

        let ball = CollisionObject::rigid_body(
            "ball",
            Collider::sphere(0.5),
            RigidBody::new_dynamic(1.0).with_linear_velocity(Vec3::new(3.0, 0.0, 0.0)),
        )?;
        let ball = self.place(ball, Transform::from_position(Vec3::new(0.0, 0.5, 0.0)))?;
        self.tracked.push(ball);
        Ok(())
    }

    /// A character walking over a step
    fn actor(&mut self) -> Result<(), SceneError> {
        let step = CollisionObject::rigid_body("step", Collider::cuboid(Vec3::new(1.0, 0.15, 3.0)), RigidBody::new_static())?;
        self.place(step, Transform::from_position(Vec3::new(4.0, 0.15, 0.0)))?;

        let player = CollisionObject::actor("player", Collider::capsule(0.4, 0.5), Actor::new())?;
        let player = self.place(player, Transform::from_position(Vec3::new(0.0, 0.9, 0.0)))?;
        self.kind = SceneKind::Actor(player);
        self.tracked.push(player);
        Ok(())
    }
}

fn ground(physics: &mut PhysicsSystem, sector: SectorId) -> Result<ObjectId, PhysicsError> {
    let ground = CollisionObject::rigid_body("ground", Collider::plane(Vec3::y(), 0.0), RigidBody::new_static())?;
    let id = physics.add_object(ground);
    physics.add_collision_object(sector, id)?;
    Ok(id)
}
