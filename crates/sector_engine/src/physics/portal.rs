//! Portals connecting sectors
//!
//! A portal is a planar convex polygon in its sector together with the warp
//! that maps points of this sector into the destination sector. Objects
//! cross when their position moves from the back side of the plane to the
//! front side through the polygon.

use crate::foundation::math::{Transform, Vec3};

use super::primitives::Ray;
use super::{PhysicsError, SectorId};

/// Boundary polygon leading to another sector
#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    polygon: Vec<Vec3>,
    normal: Vec3,
    center: Vec3,
    warp: Transform,
    destination: SectorId,
}

impl Portal {
    /// Portal with an identity warp
    ///
    /// The front side faces along the polygon's counter-clockwise normal.
    pub fn new(polygon: Vec<Vec3>, destination: SectorId) -> Result<Self, PhysicsError> {
        if polygon.len() < 3 {
            return Err(PhysicsError::DegenerateCollider(format!(
                "portal polygon with {} vertices",
                polygon.len()
            )));
        }
        let normal = newell_normal(&polygon)
            .ok_or_else(|| PhysicsError::DegenerateCollider("portal polygon without area".into()))?;
        let center = polygon.iter().sum::<Vec3>() / polygon.len() as f32;
        Ok(Self {
            polygon,
            normal,
            center,
            warp: Transform::identity(),
            destination,
        })
    }

    /// Set the warp into the destination sector, builder style
    pub fn with_warp(mut self, warp: Transform) -> Self {
        self.warp = warp;
        self
    }

    /// Place a portal defined in mesh space
    ///
    /// The polygon is moved into the world and the warp is re-expressed so
    /// that it still maps between the same world regions.
    pub fn with_mesh_transform(mut self, mesh: &Transform) -> Self {
        self.polygon = self.polygon.iter().map(|p| mesh.transform_point(p)).collect();
        self.normal = (mesh.rotation * self.normal).normalize();
        self.center = mesh.transform_point(&self.center);
        self.warp = mesh.combine(&self.warp).combine(&mesh.inverse());
        self
    }

    /// Polygon vertices
    pub fn polygon(&self) -> &[Vec3] {
        &self.polygon
    }

    /// Unit normal of the front side
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Polygon centroid
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Warp into the destination sector
    pub fn warp(&self) -> &Transform {
        &self.warp
    }

    /// Destination sector
    pub fn destination(&self) -> SectorId {
        self.destination
    }

    /// Signed distance of a point to the portal plane
    pub fn side(&self, point: &Vec3) -> f32 {
        (point - self.center).dot(&self.normal)
    }

    /// True when `point`, projected on the plane, lies inside the polygon
    pub fn contains_projected(&self, point: &Vec3) -> bool {
        let count = self.polygon.len();
        let mut sign = 0.0_f32;
        for i in 0..count {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % count];
            let turn = (b - a).cross(&(point - a)).dot(&self.normal);
            if turn.abs() <= f32::EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = turn.signum();
            } else if turn.signum() != sign {
                return false;
            }
        }
        true
    }

    /// True when moving from `previous` to `current` passes through the
    /// polygon from the back side to the front side
    pub fn crosses(&self, previous: &Vec3, current: &Vec3) -> bool {
        let (before, after) = (self.side(previous), self.side(current));
        if !(before < 0.0 && after >= 0.0) {
            return false;
        }
        let t = before / (before - after);
        self.contains_projected(&previous.lerp(current, t))
    }

    /// Distance along a ray to the polygon, either side
    pub fn intersect_ray(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        let speed = ray.direction.dot(&self.normal);
        if speed.abs() < f32::EPSILON {
            return None;
        }
        let t = -self.side(&ray.origin) / speed;
        (0.0..=max_distance)
            .contains(&t)
            .then_some(t)
            .filter(|t| self.contains_projected(&ray.point_at(*t)))
    }

    /// Transform of an object after crossing
    pub fn warp_transform(&self, transform: &Transform) -> Transform {
        self.warp.combine(transform)
    }

    /// Point expressed in the destination sector
    pub fn warp_point(&self, point: &Vec3) -> Vec3 {
        self.warp.transform_point(point)
    }

    /// Direction expressed in the destination sector
    pub fn warp_vector(&self, vector: &Vec3) -> Vec3 {
        self.warp.rotation * vector
    }
}

fn newell_normal(polygon: &[Vec3]) -> Option<Vec3> {
    let mut normal = Vec3::zeros();
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[(i + 1) % polygon.len()];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal.try_normalize(f32::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Quat;
    use approx::assert_relative_eq;

    fn sector_ids() -> (SectorId, SectorId) {
        let mut ids = slotmap::SlotMap::<SectorId, ()>::with_key();
        (ids.insert(()), ids.insert(()))
    }

    /// Unit square in the plane x = 0, front side facing +X
    fn door(destination: SectorId) -> Portal {
        Portal::new(
            vec![
                Vec3::new(0.0, -1.0, -1.0),
                Vec3::new(0.0, 1.0, -1.0),
                Vec3::new(0.0, 1.0, 1.0),
                Vec3::new(0.0, -1.0, 1.0),
            ],
            destination,
        )
        .unwrap()
    }

    #[test]
    fn test_normal_and_crossing() {
        let (_, b) = sector_ids();
        let portal = door(b);
        assert_relative_eq!(portal.normal(), Vec3::x(), epsilon = 1e-6);
        assert!(portal.crosses(&Vec3::new(-0.1, 0.0, 0.0), &Vec3::new(0.1, 0.5, 0.0)));
        // Wrong direction
        assert!(!portal.crosses(&Vec3::new(0.1, 0.0, 0.0), &Vec3::new(-0.1, 0.0, 0.0)));
        // Outside the polygon
        assert!(!portal.crosses(&Vec3::new(-0.1, 3.0, 0.0), &Vec3::new(0.1, 3.0, 0.0)));
    }

    #[test]
    fn test_paired_warps_cancel() {
        let (a, b) = sector_ids();
        let warp = Transform::from_position_rotation(
            Vec3::new(50.0, 0.0, 10.0),
            Quat::from_axis_angle(&Vec3::y_axis(), 0.7),
        );
        let there = door(b).with_warp(warp);
        let back = door(a).with_warp(warp.inverse());

        let start = Transform::from_position_rotation(Vec3::new(0.2, 0.3, -0.4), Quat::from_axis_angle(&Vec3::x_axis(), 0.3));
        let round_trip = back.warp_transform(&there.warp_transform(&start));
        approx::assert_abs_diff_eq!(round_trip, start, epsilon = 1e-4);
    }

    #[test]
    fn test_mesh_transform_moves_polygon() {
        let (_, b) = sector_ids();
        let mesh = Transform::from_position(Vec3::new(0.0, 0.0, 5.0));
        let portal = door(b)
            .with_warp(Transform::from_position(Vec3::new(10.0, 0.0, 0.0)))
            .with_mesh_transform(&mesh);
        assert_relative_eq!(portal.center(), Vec3::new(0.0, 0.0, 5.0), epsilon = 1e-6);
        // A pure translation warp is unchanged by conjugation
        assert_relative_eq!(portal.warp().position, Vec3::new(10.0, 0.0, 0.0), epsilon = 1e-5);

        let ray = Ray::new(Vec3::new(-2.0, 0.0, 5.0), Vec3::x());
        assert_relative_eq!(portal.intersect_ray(&ray, 10.0).unwrap(), 2.0, epsilon = 1e-5);
        assert!(portal.intersect_ray(&ray, 1.0).is_none());
    }

    #[test]
    fn test_degenerate_polygon() {
        let (_, b) = sector_ids();
        assert!(Portal::new(vec![Vec3::zeros(), Vec3::x()], b).is_err());
        assert!(Portal::new(vec![Vec3::zeros(), Vec3::x(), Vec3::x() * 2.0], b).is_err());
    }
}
