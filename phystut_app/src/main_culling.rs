//! KD-tree culling demo
//!
//! Scatters boxes through a volume, lets them drift for a number of frames
//! and culls them against a view frustum each frame. Tree statistics are
//! logged as the tree redistributes.

use rand::Rng;
use sector_engine::foundation::logging;
use sector_engine::foundation::math::Vec3;
use sector_engine::spatial::{ChildId, Frustum, FrustumCuller, KdTree, KdTreeConfig, Plane, AABB};

const OBJECT_COUNT: usize = 500;
const FRAMES: usize = 120;
const WORLD_HALF_SIZE: f32 = 50.0;
const DRIFT_SPEED: f32 = 0.5;

struct Drifter {
    id: ChildId,
    center: Vec3,
    half_size: Vec3,
    velocity: Vec3,
}

/// Pyramid frustum at `eye` looking down +Z with a 90 degree field of view
fn view_frustum(eye: Vec3, far: f32) -> Frustum {
    let planes = vec![
        Plane::from_point_normal(&eye, &Vec3::new(1.0, 0.0, 1.0)),
        Plane::from_point_normal(&eye, &Vec3::new(-1.0, 0.0, 1.0)),
        Plane::from_point_normal(&eye, &Vec3::new(0.0, 1.0, 1.0)),
        Plane::from_point_normal(&eye, &Vec3::new(0.0, -1.0, 1.0)),
        Plane::from_point_normal(&(eye + Vec3::new(0.0, 0.0, far)), &Vec3::new(0.0, 0.0, -1.0)),
    ];
    Frustum::new(planes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_level(log::LevelFilter::Info);
    println!("=== KD-tree Culling Demo ===");

    let mut rng = rand::thread_rng();
    let mut tree: KdTree<usize> = KdTree::new(KdTreeConfig::default().with_min_split_objects(4));
    let mut drifters: Vec<Drifter> = (0..OBJECT_COUNT)
        .map(|i| {
            let center = Vec3::from_fn(|_, _| rng.gen_range(-WORLD_HALF_SIZE..WORLD_HALF_SIZE));
            let half_size = Vec3::from_fn(|_, _| rng.gen_range(0.2..2.0));
            let velocity = Vec3::from_fn(|_, _| rng.gen_range(-DRIFT_SPEED..DRIFT_SPEED));
            let id = tree.add_object(AABB::from_center_extents(center, half_size), i);
            Drifter {
                id,
                center,
                half_size,
                velocity,
            }
        })
        .collect();

    let eye = Vec3::new(0.0, 0.0, -WORLD_HALF_SIZE);
    let culler = FrustumCuller::new(view_frustum(eye, 2.0 * WORLD_HALF_SIZE));

    for frame in 0..FRAMES {
        for drifter in &mut drifters {
            drifter.center += drifter.velocity;
            for axis in 0..3 {
                if drifter.center[axis].abs() > WORLD_HALF_SIZE {
                    drifter.velocity[axis] = -drifter.velocity[axis];
                }
            }
            tree.move_object(drifter.id, AABB::from_center_extents(drifter.center, drifter.half_size))?;
        }

        let visible = culler.visible_objects(&mut tree, &eye);
        if frame % 30 == 0 {
            let nearest = visible.first().and_then(|id| tree.object(*id));
            log::info!(
                "frame {:>3}: {} of {} visible, nearest #{:?}, tree {}",
                frame,
                visible.len(),
                tree.len(),
                nearest,
                tree.statistics()
            );
        }
    }

    tree.check_tree()?;
    let segment_hits = tree.query_segment(&eye, &(eye + Vec3::new(0.0, 0.0, 2.0 * WORLD_HALF_SIZE)));
    log::info!("{} objects on the center line of sight", segment_hits.len());
    Ok(())
}
