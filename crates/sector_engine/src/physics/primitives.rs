//! Primitive shapes and intersection algorithms
//!
//! Rays and triangles used by hit beams, mesh colliders and soft body
//! surfaces.

use crate::foundation::math::Vec3;

/// A ray for beam queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// The origin point of the ray
    pub origin: Vec3,
    /// The direction of the ray (normalized)
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray with the given origin and direction
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Ray along a segment together with the segment length
    ///
    /// Returns `None` for a zero-length segment.
    pub fn from_segment(start: &Vec3, end: &Vec3) -> Option<(Self, f32)> {
        let delta = end - start;
        let length = delta.norm();
        if length < f32::EPSILON {
            return None;
        }
        Some((
            Self {
                origin: *start,
                direction: delta / length,
            },
            length,
        ))
    }

    /// Get a point along the ray at distance t
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Exact ray/sphere test
///
/// Returns the distance along the ray and the outward normal. A ray
/// starting inside the sphere hits at distance 0.
pub fn intersect_sphere(ray: &Ray, center: &Vec3, radius: f32) -> Option<(f32, Vec3)> {
    // Solve: |origin + t*direction - center|^2 = radius^2
    let oc = ray.origin - center;
    let b = oc.dot(&ray.direction);
    let c = oc.dot(&oc) - radius * radius;

    if c <= 0.0 {
        let n = if oc.norm_squared() > f32::EPSILON { oc.normalize() } else { -ray.direction };
        return Some((0.0, n));
    }

    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    let t = -b - discriminant.sqrt();
    if t < 0.0 {
        return None;
    }
    let normal = (ray.point_at(t) - center).normalize();
    Some((t, normal))
}

/// A triangle for collision detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First vertex
    pub v0: Vec3,
    /// Second vertex
    pub v1: Vec3,
    /// Third vertex
    pub v2: Vec3,
}

impl Triangle {
    /// Creates a new triangle
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Unnormalized normal; its length is twice the area
    pub fn scaled_normal(&self) -> Vec3 {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal (right-hand rule); zero for degenerate triangles
    pub fn normal(&self) -> Vec3 {
        self.scaled_normal().try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros)
    }

    /// Triangle area
    pub fn area(&self) -> f32 {
        self.scaled_normal().norm() * 0.5
    }

    /// Calculates the centroid (center point) of the triangle
    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Vertex by corner index (0, 1 or 2)
    pub fn vertex(&self, corner: usize) -> Vec3 {
        match corner {
            0 => self.v0,
            1 => self.v1,
            _ => self.v2,
        }
    }

    /// Möller-Trumbore ray-triangle intersection
    ///
    /// Returns `(t, u, v)` with `t` the distance along the ray and `u`, `v`
    /// the barycentric weights of `v1` and `v2`. Both faces are hit.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(f32, f32, f32)> {
        const EPSILON: f32 = 0.000_001;

        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;

        let h = ray.direction.cross(&edge2);
        let a = edge1.dot(&h);

        // Ray parallel to triangle
        if a.abs() < EPSILON {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - self.v0;
        let u = f * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(&edge1);
        let v = f * ray.direction.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(&q);
        (t >= 0.0).then_some((t, u, v))
    }

    /// Get the closest point on the triangle to a given point
    pub fn closest_point(&self, point: &Vec3) -> Vec3 {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let v0_to_point = point - self.v0;

        let d1 = edge1.dot(&v0_to_point);
        let d2 = edge2.dot(&v0_to_point);
        if d1 <= 0.0 && d2 <= 0.0 {
            return self.v0;
        }

        let v1_to_point = point - self.v1;
        let d3 = edge1.dot(&v1_to_point);
        let d4 = edge2.dot(&v1_to_point);
        if d3 >= 0.0 && d4 <= d3 {
            return self.v1;
        }

        let v2_to_point = point - self.v2;
        let d5 = edge1.dot(&v2_to_point);
        let d6 = edge2.dot(&v2_to_point);
        if d6 >= 0.0 && d5 <= d6 {
            return self.v2;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            return self.v0 + edge1 * (d1 / (d1 - d3));
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            return self.v0 + edge2 * (d2 / (d2 - d6));
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return self.v1 + (self.v2 - self.v1) * w;
        }

        // Inside the face
        let denom = 1.0 / (va + vb + vc);
        self.v0 + edge1 * (vb * denom) + edge2 * (vc * denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ray_triangle_hit_and_miss() {
        let tri = Triangle::new(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        let ray = Ray::new(Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let (t, _, _) = tri.intersect_ray(&ray).unwrap();
        assert_relative_eq!(t, 5.0, epsilon = 1e-5);

        let miss = Ray::new(Vec3::new(3.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        assert!(tri.intersect_ray(&miss).is_none());
    }

    #[test]
    fn test_closest_point_regions() {
        let tri = Triangle::new(Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(tri.closest_point(&Vec3::new(-1.0, -1.0, 0.0)), tri.v0);
        let inside = tri.closest_point(&Vec3::new(0.25, 0.25, 3.0));
        assert_relative_eq!(inside, Vec3::new(0.25, 0.25, 0.0), epsilon = 1e-6);
        let edge = tri.closest_point(&Vec3::new(0.5, -2.0, 0.0));
        assert_relative_eq!(edge, Vec3::new(0.5, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_ray_sphere() {
        let (ray, len) = Ray::from_segment(&Vec3::new(-5.0, 0.0, 0.0), &Vec3::new(5.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(len, 10.0);
        let (t, n) = intersect_sphere(&ray, &Vec3::zeros(), 1.0).unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-5);
        assert_relative_eq!(n, Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-5);
        assert!(Ray::from_segment(&Vec3::zeros(), &Vec3::zeros()).is_none());
    }
}
