//! Triangle meshes and the services that provide them
//!
//! Mesh colliders are baked from triangle data handed over by a
//! [`GeometrySource`]. Concave meshes can be split into convex parts by a
//! [`ConvexDecomposer`].

use std::collections::BTreeMap;

use crate::foundation::math::{Transform, Vec3};
use crate::spatial::AABB;

use super::primitives::Triangle;
use super::PhysicsError;

/// Tag preferred when looking up collision geometry
pub const COLLISION_GEOMETRY_TAG: &str = "colldet";

/// Fallback tag for collision geometry
pub const BASE_GEOMETRY_TAG: &str = "base";

/// Indexed triangle mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions
    pub vertices: Vec<Vec3>,
    /// Vertex indices, three per triangle
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Create a mesh, dropping triangles with out-of-range indices
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[usize; 3]>) -> Self {
        let count = vertices.len();
        let triangles = triangles
            .into_iter()
            .filter(|t| t.iter().all(|i| *i < count))
            .collect();
        Self { vertices, triangles }
    }

    /// Axis-aligned box with the given half extents, centered on the origin
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        let vertices = AABB::new(-h, h).corners().to_vec();
        // Corner bits: x = 1, y = 2, z = 4
        let triangles = vec![
            [0, 2, 1], [1, 2, 3], // -z
            [4, 5, 6], [5, 7, 6], // +z
            [0, 1, 4], [1, 5, 4], // -y
            [2, 6, 3], [3, 6, 7], // +y
            [0, 4, 2], [2, 4, 6], // -x
            [1, 3, 5], [3, 7, 5], // +x
        ];
        Self { vertices, triangles }
    }

    /// Flat rectangle in the XZ plane facing +Y
    pub fn quad(half_x: f32, half_z: f32) -> Self {
        let vertices = vec![
            Vec3::new(-half_x, 0.0, -half_z),
            Vec3::new(half_x, 0.0, -half_z),
            Vec3::new(half_x, 0.0, half_z),
            Vec3::new(-half_x, 0.0, half_z),
        ];
        Self {
            vertices,
            triangles: vec![[0, 2, 1], [0, 3, 2]],
        }
    }

    /// True when the mesh has no triangles
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Check that every triangle index names a vertex
    pub fn validate(&self) -> Result<(), PhysicsError> {
        let count = self.vertices.len();
        match self.triangles.iter().flatten().find(|i| **i >= count) {
            Some(index) => Err(PhysicsError::DegenerateCollider(format!(
                "triangle index {index} out of range for {count} vertices"
            ))),
            None => Ok(()),
        }
    }

    /// Triangle by index; `None` when out of range or malformed
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        let [a, b, c] = *self.triangles.get(index)?;
        Some(Triangle::new(*self.vertices.get(a)?, *self.vertices.get(b)?, *self.vertices.get(c)?))
    }

    /// All well-formed triangles
    pub fn iter_triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.triangles.len()).filter_map(|i| self.triangle(i))
    }

    /// Bounding box of the vertices
    pub fn aabb(&self) -> Option<AABB> {
        AABB::from_points(&self.vertices)
    }

    /// Average of the vertices
    pub fn centroid(&self) -> Vec3 {
        if self.vertices.is_empty() {
            return Vec3::zeros();
        }
        self.vertices.iter().sum::<Vec3>() / self.vertices.len() as f32
    }

    /// Copy of the mesh with every vertex transformed
    pub fn transformed(&self, transform: &Transform) -> Self {
        Self {
            vertices: self.vertices.iter().map(|v| transform.transform_point(v)).collect(),
            triangles: self.triangles.clone(),
        }
    }

    /// Copy of the mesh with every vertex scaled per axis
    pub fn scaled(&self, scale: &Vec3) -> Self {
        Self {
            vertices: self.vertices.iter().map(|v| v.component_mul(scale)).collect(),
            triangles: self.triangles.clone(),
        }
    }
}

/// Provider of render geometry for collider construction
pub trait GeometrySource {
    /// Triangle data stored under `tag`, if any
    fn triangle_data(&self, tag: &str) -> Option<TriangleMesh>;
}

impl GeometrySource for TriangleMesh {
    fn triangle_data(&self, _tag: &str) -> Option<TriangleMesh> {
        Some(self.clone())
    }
}

/// Collision geometry of a source, preferring the "colldet" tag over "base"
pub fn collision_geometry(source: &dyn GeometrySource) -> Option<TriangleMesh> {
    source
        .triangle_data(COLLISION_GEOMETRY_TAG)
        .or_else(|| source.triangle_data(BASE_GEOMETRY_TAG))
        .filter(|mesh| !mesh.is_empty())
}

/// Splits a concave mesh into convex parts
///
/// The returned iterator is finite and single use: call `decompose` again
/// to start over.
pub trait ConvexDecomposer {
    /// Lazily produce the parts of `mesh`
    fn decompose<'a>(&'a self, mesh: &'a TriangleMesh) -> Box<dyn Iterator<Item = TriangleMesh> + 'a>;
}

/// Decomposer yielding each connected piece of a mesh as one part
///
/// Exact for meshes assembled from separate convex pieces; any other
/// piece is treated as its own convex hull.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedComponentDecomposer;

impl ConvexDecomposer for ConnectedComponentDecomposer {
    fn decompose<'a>(&'a self, mesh: &'a TriangleMesh) -> Box<dyn Iterator<Item = TriangleMesh> + 'a> {
        let count = mesh.vertices.len();
        let valid: Vec<usize> = (0..mesh.triangles.len())
            .filter(|t| mesh.triangles[*t].iter().all(|i| *i < count))
            .collect();
        let mut parent: Vec<usize> = (0..count).collect();
        for tri in valid.iter().map(|t| &mesh.triangles[*t]) {
            union(&mut parent, tri[0], tri[1]);
            union(&mut parent, tri[1], tri[2]);
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in valid {
            components.entry(find(&mut parent, mesh.triangles[index][0])).or_default().push(index);
        }

        Box::new(components.into_values().map(move |triangles| extract(mesh, &triangles)))
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[rb.max(ra)] = rb.min(ra);
    }
}

/// Sub-mesh made of the given triangles with compacted vertices
fn extract(mesh: &TriangleMesh, triangles: &[usize]) -> TriangleMesh {
    let mut remap = BTreeMap::new();
    let mut part = TriangleMesh::default();
    for &t in triangles {
        let mut indices = [0; 3];
        for (slot, &v) in indices.iter_mut().zip(&mesh.triangles[t]) {
            *slot = *remap.entry(v).or_insert_with(|| {
                part.vertices.push(mesh.vertices[v]);
                part.vertices.len() - 1
            });
        }
        part.triangles.push(indices);
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TaggedSource {
        base: TriangleMesh,
        colldet: Option<TriangleMesh>,
    }

    impl GeometrySource for TaggedSource {
        fn triangle_data(&self, tag: &str) -> Option<TriangleMesh> {
            match tag {
                COLLISION_GEOMETRY_TAG => self.colldet.clone(),
                BASE_GEOMETRY_TAG => Some(self.base.clone()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_collision_geometry_prefers_colldet() {
        let source = TaggedSource {
            base: TriangleMesh::cuboid(Vec3::repeat(1.0)),
            colldet: Some(TriangleMesh::quad(1.0, 1.0)),
        };
        assert_eq!(collision_geometry(&source).map(|m| m.triangles.len()), Some(2));

        let fallback = TaggedSource {
            base: TriangleMesh::cuboid(Vec3::repeat(1.0)),
            colldet: None,
        };
        assert_eq!(collision_geometry(&fallback).map(|m| m.triangles.len()), Some(12));
    }

    #[test]
    fn test_connected_components_are_separated() {
        let a = TriangleMesh::cuboid(Vec3::repeat(0.5));
        let b = a.transformed(&Transform::from_position(Vec3::new(5.0, 0.0, 0.0)));

        let mut both = a.clone();
        let offset = both.vertices.len();
        both.vertices.extend(b.vertices.iter().copied());
        both.triangles.extend(b.triangles.iter().map(|t| t.map(|i| i + offset)));

        let parts: Vec<_> = ConnectedComponentDecomposer.decompose(&both).collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.vertices.len() == 8 && p.triangles.len() == 12));
        assert!(parts[1].centroid().x > 4.0);
    }

    #[test]
    fn test_out_of_range_indices_are_rejected() {
        let broken = TriangleMesh {
            vertices: vec![Vec3::zeros(), Vec3::x(), Vec3::z()],
            triangles: vec![[0, 2, 1], [0, 1, 7]],
        };
        assert!(matches!(broken.validate(), Err(PhysicsError::DegenerateCollider(_))));
        assert!(broken.triangle(1).is_none());
        assert_eq!(broken.iter_triangles().count(), 1);

        let parts: Vec<_> = ConnectedComponentDecomposer.decompose(&broken).collect();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].triangles, vec![[0, 1, 2]]);
        assert!(TriangleMesh::quad(1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_cuboid_faces_point_outward() {
        let cube = TriangleMesh::cuboid(Vec3::repeat(1.0));
        for tri in cube.iter_triangles() {
            assert!(tri.normal().dot(&tri.centroid()) > 0.0);
        }
    }
}
