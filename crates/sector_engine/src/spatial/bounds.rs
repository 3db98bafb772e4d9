//! Bounding volumes and clip planes
//!
//! Axis-aligned boxes are the currency of the KD-tree; planes and frustums
//! feed the culler.

use crate::foundation::math::Vec3;

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Box of a sphere
    pub fn from_sphere(center: Vec3, radius: f32) -> Self {
        let r = Vec3::repeat(radius);
        Self::from_center_extents(center, r)
    }

    /// Smallest box holding every point; `None` for an empty slice
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Self::new(*first, *first);
        for p in rest {
            aabb.add_point(p);
        }
        Some(aabb)
    }

    /// Cube centered on the origin with the given half size
    pub fn symmetric(half_size: f32) -> Self {
        Self::from_center_extents(Vec3::zeros(), Vec3::repeat(half_size))
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Minimum along one axis (0 = x, 1 = y, 2 = z)
    pub fn min_on(&self, axis: usize) -> f32 {
        self.min[axis]
    }

    /// Maximum along one axis (0 = x, 1 = y, 2 = z)
    pub fn max_on(&self, axis: usize) -> f32 {
        self.max[axis]
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: &Vec3) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Check if this AABB fully contains another
    pub fn contains(&self, other: &AABB) -> bool {
        (0..3).all(|i| other.min[i] >= self.min[i] && other.max[i] <= self.max[i])
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && self.max[i] >= other.min[i])
    }

    /// Union of two boxes
    pub fn union(&self, other: &AABB) -> AABB {
        AABB::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Grow this box to include a point
    pub fn add_point(&mut self, point: &Vec3) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Box grown by `margin` on every side
    pub fn inflated(&self, margin: f32) -> AABB {
        let m = Vec3::repeat(margin);
        AABB::new(self.min - m, self.max + m)
    }

    /// The eight corners of the box
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Check whether every corner of the two boxes is within `epsilon`
    pub fn approx_eq(&self, other: &AABB, epsilon: f32) -> bool {
        (self.min - other.min).amax() <= epsilon && (self.max - other.max).amax() <= epsilon
    }

    /// Test ray intersection with this AABB using slab method
    /// Returns the distance to the entry point if the ray intersects, None otherwise
    /// Based on "An Efficient and Robust Ray–Box Intersection Algorithm"
    pub fn intersect_ray(&self, ray_origin: &Vec3, ray_dir: &Vec3) -> Option<f32> {
        let mut tmin = f32::NEG_INFINITY;
        let mut tmax = f32::INFINITY;

        for i in 0..3 {
            if ray_dir[i].abs() < f32::EPSILON {
                // Parallel to the slab: must start inside it
                if ray_origin[i] < self.min[i] || ray_origin[i] > self.max[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / ray_dir[i];
            let t1 = (self.min[i] - ray_origin[i]) * inv;
            let t2 = (self.max[i] - ray_origin[i]) * inv;
            tmin = tmin.max(t1.min(t2));
            tmax = tmax.min(t1.max(t2));
        }

        if tmax >= tmin && tmax >= 0.0 {
            Some(tmin.max(0.0))
        } else {
            None
        }
    }

    /// Check whether the segment `start..end` touches the box
    pub fn intersects_segment(&self, start: &Vec3, end: &Vec3) -> bool {
        self.intersect_ray(start, &(end - start))
            .is_some_and(|t| t <= 1.0)
    }
}

/// Plane defined by normal and distance from origin
///
/// Points with a non-negative [`Plane::distance_to_point`] lie on the inner
/// side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Plane through `point` facing `normal`
    pub fn from_point_normal(point: &Vec3, normal: &Vec3) -> Self {
        let n = normal.normalize();
        Self { normal: n, distance: -n.dot(point) }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Box corner farthest along the normal
    fn positive_vertex(&self, aabb: &AABB) -> Vec3 {
        Vec3::from_fn(|i, _| if self.normal[i] >= 0.0 { aabb.max[i] } else { aabb.min[i] })
    }

    /// Box corner farthest against the normal
    fn negative_vertex(&self, aabb: &AABB) -> Vec3 {
        Vec3::from_fn(|i, _| if self.normal[i] >= 0.0 { aabb.min[i] } else { aabb.max[i] })
    }
}

/// Result of classifying a box against a set of planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Entirely outside at least one plane
    Outside,
    /// Overlaps; the mask holds the planes still straddled
    Partial(u32),
}

/// Convex clip volume made of up to 32 planes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frustum {
    /// Clip planes; the inside of the frustum is the inner side of all planes
    pub planes: Vec<Plane>,
}

impl Frustum {
    /// Create a new frustum from planes
    pub fn new(planes: Vec<Plane>) -> Self {
        debug_assert!(planes.len() <= 32, "frustum masks hold at most 32 planes");
        Self { planes }
    }

    /// Mask with a bit set for every plane
    pub fn full_mask(&self) -> u32 {
        match self.planes.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        self.classify(aabb, self.full_mask()) != Containment::Outside
    }

    /// Classify a box against the planes enabled in `mask`
    ///
    /// Planes the box lies fully inside are cleared from the returned mask.
    pub fn classify(&self, aabb: &AABB, mask: u32) -> Containment {
        let mut remaining = mask;
        for (i, plane) in self.planes.iter().enumerate().take(32) {
            let bit = 1u32 << i;
            if mask & bit == 0 {
                continue;
            }
            if plane.distance_to_point(&plane.positive_vertex(aabb)) < 0.0 {
                return Containment::Outside;
            }
            if plane.distance_to_point(&plane.negative_vertex(aabb)) >= 0.0 {
                remaining &= !bit;
            }
        }
        Containment::Partial(remaining)
    }
}
