use approx::assert_relative_eq;

use crate::config::EngineConfig;
use crate::foundation::math::{Transform, Vec3};
use crate::physics::factory::SoftRopeFactory;
use crate::physics::{
    Actor, Collider, CollisionObject, ObjectId, PhysicsSystem, Portal, RigidBody, SectorId, Vehicle,
    VehicleBrakeInfo, VehicleId, VehicleWheel,
};
use crate::spatial::{KdTree, KdTreeConfig, AABB};

const DT: f32 = 1.0 / 60.0;

fn world() -> (PhysicsSystem, SectorId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut physics = PhysicsSystem::new(EngineConfig::default());
    let sector = physics.create_sector("world");
    (physics, sector)
}

fn place(physics: &mut PhysicsSystem, sector: SectorId, object: CollisionObject, at: Vec3) -> ObjectId {
    let id = physics.add_object(object.with_transform(Transform::from_position(at)));
    physics.add_collision_object(sector, id).unwrap();
    id
}

fn ground(physics: &mut PhysicsSystem, sector: SectorId) -> ObjectId {
    let plane = CollisionObject::rigid_body("ground", Collider::plane(Vec3::y(), 0.0), RigidBody::new_static()).unwrap();
    place(physics, sector, plane, Vec3::zeros())
}

fn sphere(name: &str, radius: f32) -> CollisionObject {
    CollisionObject::rigid_body(name, Collider::sphere(radius), RigidBody::new_dynamic(1.0)).unwrap()
}

fn run(physics: &mut PhysicsSystem, sector: SectorId, steps: usize) {
    for _ in 0..steps {
        physics.step(sector, DT).unwrap();
    }
}

#[test]
fn test_sphere_comes_to_rest_on_plane() {
    let (mut physics, sector) = world();
    ground(&mut physics, sector);
    let heavy = CollisionObject::rigid_body("ball", Collider::sphere(1.0), RigidBody::with_density(100.0)).unwrap();
    let ball = place(&mut physics, sector, heavy, Vec3::new(0.0, 10.0, 0.0));

    run(&mut physics, sector, 300);
    let object = physics.object(ball).unwrap();
    assert_relative_eq!(object.transform().position.y, 1.0, epsilon = 0.05);
    assert!(object.as_rigid_body().unwrap().linear_velocity().norm() < 0.1);
    assert!(physics.is_on_ground(sector, ball).unwrap());
}

#[test]
fn test_tree_visits_boxes_front_to_back() {
    let mut tree: KdTree<i32> = KdTree::new(KdTreeConfig::default().with_min_split_objects(1));
    for x in [-10, 0, 10] {
        let center = Vec3::new(x as f32, 0.0, 0.0);
        tree.add_object(AABB::from_center_extents(center, Vec3::repeat(0.5)), x);
    }

    let order = |tree: &mut KdTree<i32>, from: f32| -> Vec<i32> {
        let ids = tree.objects_front_to_back(&Vec3::new(from, 0.0, 0.0));
        ids.into_iter().filter_map(|id| tree.object(id).copied()).collect()
    };
    assert_eq!(order(&mut tree, -20.0), vec![-10, 0, 10]);
    assert_eq!(order(&mut tree, 20.0), vec![10, 0, -10]);
}

#[test]
fn test_rope_follows_its_anchors() {
    let (mut physics, sector) = world();
    let rope = SoftRopeFactory {
        start: [0.0, 0.0, 0.0],
        end: [0.0, -3.8, 0.0],
        node_count: 20,
        ..SoftRopeFactory::default()
    }
    .create()
    .unwrap();
    let rope = place(&mut physics, sector, rope, Vec3::zeros());
    let mut crate_body = RigidBody::new_dynamic(1.0).with_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
    crate_body.set_gravity_enabled(false);
    let weight = CollisionObject::rigid_body("weight", Collider::cuboid(Vec3::repeat(0.1)), crate_body).unwrap();
    let weight = place(&mut physics, sector, weight, Vec3::new(0.0, -3.9, 0.0));

    physics
        .object_mut(rope)
        .and_then(CollisionObject::as_soft_body_mut)
        .unwrap()
        .anchor_vertex(0)
        .unwrap();
    physics.anchor_vertex_to_body(rope, 19, weight).unwrap();

    for _ in 0..30 {
        physics.step(sector, DT).unwrap();
        let tied = physics.object(weight).unwrap().transform().transform_point(&Vec3::new(0.0, 0.1, 0.0));
        let body = physics.object(rope).unwrap().as_soft_body().unwrap();
        assert_relative_eq!(body.vertex_position(0).unwrap(), Vec3::zeros());
        assert_relative_eq!(body.vertex_position(19).unwrap(), tied, epsilon = 1e-4);
    }
    let moved = physics.object(weight).unwrap().transform().position;
    assert!(moved.x > 0.2);
    let body = physics.object(rope).unwrap().as_soft_body().unwrap();
    assert!(body.vertex_position(10).unwrap().y < 0.0);
}

#[test]
fn test_anchors_keep_soft_mass() {
    let (mut physics, sector) = world();
    let rope = SoftRopeFactory {
        mass: 2.0,
        ..SoftRopeFactory::default()
    }
    .create()
    .unwrap();
    let rope = place(&mut physics, sector, rope, Vec3::zeros());
    let body = physics.object_mut(rope).and_then(CollisionObject::as_soft_body_mut).unwrap();

    body.anchor_vertex(0).unwrap();
    let sum: f32 = (0..body.node_count()).map(|i| body.vertex_mass(i).unwrap()).sum();
    assert_relative_eq!(sum, 2.0, epsilon = 1e-5);
    assert_relative_eq!(body.vertex_mass(0).unwrap(), 0.0);

    body.remove_anchor(0).unwrap();
    let sum: f32 = (0..body.node_count()).map(|i| body.vertex_mass(i).unwrap()).sum();
    assert_relative_eq!(sum, 2.0, epsilon = 1e-5);
}

#[test]
fn test_disabled_groups_never_pair() {
    let (mut physics, sector) = world();
    physics.sector_mut(sector).unwrap().set_gravity(Vec3::zeros());
    let red = physics.create_collision_group("red").unwrap();
    let blue = physics.create_collision_group("blue").unwrap();
    physics.set_group_collision(red, blue, false).unwrap();

    let a = place(&mut physics, sector, sphere("a", 0.4), Vec3::zeros());
    let b = place(&mut physics, sector, sphere("b", 0.4), Vec3::new(0.5, 0.0, 0.0));
    let c = place(&mut physics, sector, sphere("c", 0.4), Vec3::new(-0.5, 0.0, 0.0));
    physics.set_object_group(a, red).unwrap();
    physics.set_object_group(b, blue).unwrap();

    physics.step(sector, DT).unwrap();
    let pairs: Vec<(ObjectId, ObjectId)> = physics
        .sector(sector)
        .unwrap()
        .last_contacts()
        .iter()
        .map(|c| (c.object_a, c.object_b))
        .collect();
    assert!(!pairs.iter().any(|p| *p == (a, b) || *p == (b, a)));
    assert!(pairs.iter().any(|p| *p == (a, c) || *p == (c, a)));
    assert!(!physics.object(a).unwrap().contacts().contains(&b));
    assert!(physics.object(a).unwrap().contacts().contains(&c));
}

#[test]
fn test_collision_test_respects_groups() {
    let (mut physics, sector) = world();
    let red = physics.create_collision_group("red").unwrap();
    let blue = physics.create_collision_group("blue").unwrap();
    physics.set_group_collision(red, blue, false).unwrap();

    let a = place(&mut physics, sector, sphere("a", 0.5), Vec3::new(0.0, 1.0, 0.0));
    let b = place(&mut physics, sector, sphere("b", 0.5), Vec3::new(0.0, 1.6, 0.0));
    let c = place(&mut physics, sector, sphere("c", 0.5), Vec3::new(0.6, 1.0, 0.0));
    physics.set_object_group(a, red).unwrap();
    physics.set_object_group(b, blue).unwrap();

    let mut hits = Vec::new();
    assert!(physics.collision_test(sector, a, &mut hits).unwrap());
    assert!(hits.iter().all(|hit| hit.object_b != b));
    assert!(hits.iter().any(|hit| hit.object_b == c));

    hits.clear();
    physics.collision_test(sector, c, &mut hits).unwrap();
    assert!(hits.iter().any(|hit| hit.object_b == a));
    assert!(hits.iter().any(|hit| hit.object_b == b));
}

#[test]
fn test_group_collision_is_symmetric() {
    let (mut physics, _) = world();
    let red = physics.create_collision_group("red").unwrap();
    let blue = physics.create_collision_group("blue").unwrap();
    assert!(physics.group_collision(red, blue));
    physics.set_group_collision(blue, red, false).unwrap();
    assert!(!physics.group_collision(red, blue));
    assert!(!physics.group_collision(blue, red));
    assert!(physics.group_collision(red, red));
}

#[test]
fn test_body_round_trip_through_portals() {
    let (mut physics, a) = world();
    let b = physics.create_sector("upstairs");
    for sector in [a, b] {
        physics.sector_mut(sector).unwrap().set_gravity(Vec3::zeros());
    }
    let forth = Portal::new(
        vec![
            Vec3::new(2.0, -1.0, -1.0),
            Vec3::new(2.0, 1.0, -1.0),
            Vec3::new(2.0, 1.0, 1.0),
            Vec3::new(2.0, -1.0, 1.0),
        ],
        b,
    )
    .unwrap()
    .with_warp(Transform::from_position(Vec3::new(0.0, 100.0, 0.0)));
    let back = Portal::new(
        vec![
            Vec3::new(2.0, 99.0, -1.0),
            Vec3::new(2.0, 99.0, 1.0),
            Vec3::new(2.0, 101.0, 1.0),
            Vec3::new(2.0, 101.0, -1.0),
        ],
        a,
    )
    .unwrap()
    .with_warp(Transform::from_position(Vec3::new(0.0, -100.0, 0.0)));
    physics.add_portal(a, forth).unwrap();
    physics.add_portal(b, back).unwrap();

    let ball = place(&mut physics, a, sphere("ball", 0.25), Vec3::new(1.5, 0.0, 0.0));
    let set_velocity = |physics: &mut PhysicsSystem, velocity: Vec3| {
        physics
            .object_mut(ball)
            .and_then(CollisionObject::as_rigid_body_mut)
            .unwrap()
            .set_linear_velocity(velocity);
    };

    set_velocity(&mut physics, Vec3::new(6.0, 0.0, 0.0));
    run(&mut physics, a, 15);
    let object = physics.object(ball).unwrap();
    assert_eq!(object.sector(), Some(b));
    assert_relative_eq!(object.transform().position.y, 100.0, epsilon = 1e-4);
    assert!(physics.sector(a).unwrap().objects().is_empty());

    set_velocity(&mut physics, Vec3::new(-6.0, 0.0, 0.0));
    run(&mut physics, b, 30);
    let object = physics.object(ball).unwrap();
    assert_eq!(object.sector(), Some(a));
    assert_relative_eq!(object.transform().position.y, 0.0, epsilon = 1e-4);
    assert!(object.transform().position.x < 2.0);
}

#[test]
fn test_actor_walks_along_the_ground() {
    let (mut physics, sector) = world();
    ground(&mut physics, sector);
    let actor = CollisionObject::actor("player", Collider::capsule(0.5, 0.5), Actor::new()).unwrap();
    let player = place(&mut physics, sector, actor, Vec3::new(0.0, 1.0, 0.0));
    physics
        .object_mut(player)
        .and_then(CollisionObject::as_actor_mut)
        .unwrap()
        .walk(Vec3::x());

    run(&mut physics, sector, 30);
    let object = physics.object(player).unwrap();
    assert!(object.transform().position.x > 1.0);
    assert_relative_eq!(object.transform().position.y, 1.0, epsilon = 0.1);
    assert!(object.as_actor().unwrap().is_on_ground());
    assert!(physics.is_on_ground(sector, player).unwrap());
}

#[test]
fn test_resting_bodies_fall_asleep_and_wake_on_impact() {
    let (mut physics, sector) = world();
    physics.sector_mut(sector).unwrap().set_auto_disable_params(0.8, 1.0, 0.5);
    ground(&mut physics, sector);
    let sleeper = place(&mut physics, sector, sphere("sleeper", 0.5), Vec3::new(0.0, 0.5, 0.0));

    run(&mut physics, sector, 90);
    assert!(!physics.object(sleeper).unwrap().as_rigid_body().unwrap().is_enabled());

    let hammer = place(&mut physics, sector, sphere("hammer", 0.5), Vec3::new(0.0, 1.6, 0.0));
    physics
        .object_mut(hammer)
        .and_then(CollisionObject::as_rigid_body_mut)
        .unwrap()
        .set_linear_velocity(Vec3::new(0.0, -5.0, 0.0));
    run(&mut physics, sector, 5);
    assert!(physics.object(sleeper).unwrap().as_rigid_body().unwrap().is_enabled());
}

#[test]
fn test_step_all_scales_by_simulation_speed() {
    let (mut physics, sector) = world();
    physics.sector_mut(sector).unwrap().set_linear_damping(0.0);
    let ball = place(&mut physics, sector, sphere("ball", 0.5), Vec3::new(0.0, 50.0, 0.0));
    physics.set_simulation_speed(0.5);

    physics.step_all(1000.0 / 30.0).unwrap();
    let velocity = physics.object(ball).unwrap().as_rigid_body().unwrap().linear_velocity();
    assert_relative_eq!(velocity.y, -9.81 / 60.0, epsilon = 1e-4);
}

fn car(physics: &mut PhysicsSystem, sector: SectorId) -> (ObjectId, VehicleId) {
    let body = CollisionObject::rigid_body("chassis", Collider::cuboid(Vec3::new(1.0, 0.25, 2.0)), RigidBody::new_dynamic(100.0))
        .unwrap();
    let chassis = place(physics, sector, body, Vec3::new(0.0, 0.95, 0.0));
    let wheels = [(-1.0, 1.5), (1.0, 1.5), (-1.0, -1.5), (1.0, -1.5)]
        .iter()
        .map(|(x, z)| VehicleWheel::new(Vec3::new(*x, -0.25, *z), 0.4))
        .collect();
    let vehicle = Vehicle::new(chassis, wheels).with_brake(VehicleBrakeInfo::new(vec![0, 1, 2, 3]));
    let vehicle = physics.create_vehicle(vehicle).unwrap();
    physics.add_vehicle(sector, vehicle).unwrap();
    (chassis, vehicle)
}

fn chassis_velocity(physics: &PhysicsSystem, chassis: ObjectId) -> Vec3 {
    physics.object(chassis).unwrap().as_rigid_body().unwrap().linear_velocity()
}

#[test]
fn test_vehicle_settles_skids_and_releases_brake() {
    let (mut physics, sector) = world();
    physics.sector_mut(sector).unwrap().set_linear_damping(0.0);
    ground(&mut physics, sector);
    let (chassis, vehicle) = car(&mut physics, sector);

    // Weight per wheel is about 245 N, so the springs compress about 5 cm
    run(&mut physics, sector, 180);
    let car_ref = physics.vehicle(vehicle).unwrap();
    assert!(car_ref.wheels().iter().all(VehicleWheel::is_in_contact));
    for wheel in car_ref.wheels() {
        assert!(wheel.compression() > 0.02 && wheel.compression() < 0.08);
    }
    let height = physics.object(chassis).unwrap().transform().position.y;
    assert!(height > 0.85 && height < 0.95);
    assert!(chassis_velocity(&physics, chassis).norm() < 0.1);

    // The friction circle caps a huge engine force at roughly mu * m * g
    let before = chassis_velocity(&physics, chassis).z;
    physics.vehicle_mut(vehicle).unwrap().set_engine_force(1e5);
    physics.step(sector, DT).unwrap();
    let car_ref = physics.vehicle(vehicle).unwrap();
    assert!(car_ref.wheels().iter().all(VehicleWheel::is_skidding));
    assert!(car_ref.wheels().iter().all(|w| w.engine_force() == 0.0));
    let gained = chassis_velocity(&physics, chassis).z - before;
    assert!(gained > 0.1 && gained < 0.5);

    let rolling = chassis_velocity(&physics, chassis).z;
    physics.vehicle_mut(vehicle).unwrap().apply_brake(0, 1.0).unwrap();
    physics.step(sector, DT).unwrap();
    let braked = chassis_velocity(&physics, chassis).z;
    assert!(braked > -0.01 && braked < 0.5 * rolling);
    assert!(physics.vehicle(vehicle).unwrap().wheels().iter().all(|w| w.brake() == 0.0));

    // Without a new apply_brake the car rolls freely
    physics
        .object_mut(chassis)
        .and_then(CollisionObject::as_rigid_body_mut)
        .unwrap()
        .set_linear_velocity(Vec3::new(0.0, 0.0, 2.0));
    physics.step(sector, DT).unwrap();
    assert!(chassis_velocity(&physics, chassis).z > 1.9);
}
