//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the rigid [`Transform`] used by both the
//! spatial tree and the physics sectors.

pub use nalgebra::{Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Transform representing position, rotation, and scale
///
/// Physics objects always carry a unit scale; scale is honoured by the
/// point and vector transforms so that colliders may be baked from scaled
/// render geometry.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Apply this transform to a point
    pub fn transform_point(&self, point: &Vec3) -> Vec3 {
        self.position + self.rotation * self.scale.component_mul(point)
    }

    /// Apply the rotation and scale of this transform to a direction
    pub fn transform_vector(&self, vector: &Vec3) -> Vec3 {
        self.rotation * self.scale.component_mul(vector)
    }

    /// Bring a world-space point into the local space of this transform
    pub fn inverse_transform_point(&self, point: &Vec3) -> Vec3 {
        let local = self.rotation.inverse() * (point - self.position);
        local.component_div(&self.scale)
    }

    /// Bring a world-space direction into the local space of this transform
    pub fn inverse_transform_vector(&self, vector: &Vec3) -> Vec3 {
        (self.rotation.inverse() * vector).component_div(&self.scale)
    }

    /// Combine this transform with another
    ///
    /// The result applies `other` first, then `self`.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * self.scale.component_mul(&other.position),
            rotation: self.rotation * other.rotation,
            scale: self.scale.component_mul(&other.scale),
        }
    }

    /// Get the inverse transform
    pub fn inverse(&self) -> Transform {
        let inv_scale = Vec3::new(1.0 / self.scale.x, 1.0 / self.scale.y, 1.0 / self.scale.z);
        let inv_rotation = self.rotation.inverse();
        let inv_position = inv_scale.component_mul(&(inv_rotation * -self.position));

        Transform {
            position: inv_position,
            rotation: inv_rotation,
            scale: inv_scale,
        }
    }

    /// Right, up and forward axes of this transform in world space
    pub fn axes(&self) -> [Vec3; 3] {
        [
            self.rotation * Vec3::x(),
            self.rotation * Vec3::y(),
            self.rotation * Vec3::z(),
        ]
    }
}

impl approx::AbsDiffEq for Transform {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.position.abs_diff_eq(&other.position, epsilon)
            && self.rotation.abs_diff_eq(&other.rotation, epsilon)
            && self.scale.abs_diff_eq(&other.scale, epsilon)
    }
}

/// Math utility functions
pub mod utils {
    use super::Vec3;

    /// Largest component index of a vector's absolute value
    pub fn dominant_axis(v: &Vec3) -> usize {
        let a = v.abs();
        if a.x >= a.y && a.x >= a.z {
            0
        } else if a.y >= a.z {
            1
        } else {
            2
        }
    }

    /// Any unit vector perpendicular to `v`
    pub fn any_perpendicular(v: &Vec3) -> Vec3 {
        let candidate = if dominant_axis(v) == 0 { Vec3::y() } else { Vec3::x() };
        let perp = v.cross(&candidate);
        perp.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z)
    }

    /// Clamp the length of a vector to `max_len`
    pub fn clamp_length(v: Vec3, max_len: f32) -> Vec3 {
        let len = v.norm();
        if len > max_len && len > 0.0 {
            v * (max_len / len)
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_transform_inverse_roundtrip() {
        let t = Transform::from_position_rotation(
            Vec3::new(1.0, -2.0, 3.0),
            Quat::from_axis_angle(&Vec3::y_axis(), 0.7),
        );
        let p = Vec3::new(4.0, 5.0, -6.0);
        let back = t.inverse().transform_point(&t.transform_point(&p));
        assert_abs_diff_eq!(back, p, epsilon = 1e-4);
        assert_abs_diff_eq!(t.inverse_transform_point(&t.transform_point(&p)), p, epsilon = 1e-4);
    }

    #[test]
    fn test_transform_combine_with_inverse_is_identity() {
        let t = Transform::from_position_rotation(
            Vec3::new(0.5, 0.0, -1.0),
            Quat::from_axis_angle(&Vec3::z_axis(), 1.2),
        );
        let id = t.combine(&t.inverse());
        assert_abs_diff_eq!(id, Transform::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_any_perpendicular() {
        let v = Vec3::new(0.0, 0.0, 2.0);
        let p = utils::any_perpendicular(&v);
        assert_abs_diff_eq!(p.dot(&v), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.norm(), 1.0, epsilon = 1e-6);
    }
}
