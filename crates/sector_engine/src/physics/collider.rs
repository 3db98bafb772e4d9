//! Collision shapes
//!
//! Colliders are expressed in the local frame of their object. Contacts are
//! found by sampling probe points of one shape against the signed distance
//! of the other, which keeps every shape pair on one code path.

use std::f32::consts::PI;

use crate::foundation::math::{Transform, Vec3};
use crate::spatial::kdtree::KDTREE_MAX;
use crate::spatial::AABB;

use super::geometry::{ConvexDecomposer, TriangleMesh};
use super::primitives::{intersect_sphere, Ray, Triangle};
use super::PhysicsError;

/// Distance below which sphere tracing reports a hit
const TRACE_EPSILON: f32 = 0.0005;

/// Step limit for sphere tracing
const TRACE_MAX_STEPS: usize = 128;

/// Points sampled around the rim of round shapes
const RIM_SAMPLES: usize = 12;

/// Convex polyhedron given by its vertices and outward face planes
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    vertices: Vec<Vec3>,
    /// Unit normal and offset; inside is `normal·p <= offset`
    planes: Vec<(Vec3, f32)>,
    mesh: TriangleMesh,
}

impl ConvexHull {
    /// Build a hull from a closed triangle mesh
    ///
    /// Faces are oriented away from the vertex centroid.
    pub fn from_mesh(mesh: &TriangleMesh) -> Result<Self, PhysicsError> {
        if mesh.is_empty() {
            return Err(PhysicsError::DegenerateCollider("convex mesh without triangles".into()));
        }
        mesh.validate()?;
        let centroid = mesh.centroid();
        let mut planes = Vec::with_capacity(mesh.triangles.len());
        for tri in mesh.iter_triangles() {
            let mut normal = tri.normal();
            if normal == Vec3::zeros() {
                continue;
            }
            if normal.dot(&(tri.v0 - centroid)) < 0.0 {
                normal = -normal;
            }
            let offset = normal.dot(&tri.v0);
            let duplicate = planes
                .iter()
                .any(|(n, d): &(Vec3, f32)| (n - normal).norm() < 1e-4 && (d - offset).abs() < 1e-4);
            if !duplicate {
                planes.push((normal, offset));
            }
        }
        if planes.len() < 4 {
            return Err(PhysicsError::DegenerateCollider("convex mesh is flat".into()));
        }
        Ok(Self {
            vertices: mesh.vertices.clone(),
            planes,
            mesh: mesh.clone(),
        })
    }

    /// Hull vertices
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Source triangles
    pub fn mesh(&self) -> &TriangleMesh {
        &self.mesh
    }

    fn signed_distance(&self, p: &Vec3) -> (f32, Vec3) {
        self.planes
            .iter()
            .map(|(n, d)| (n.dot(p) - d, *n))
            .fold((f32::NEG_INFINITY, Vec3::y()), |best, cur| if cur.0 > best.0 { cur } else { best })
    }

    fn volume(&self) -> f32 {
        let c = self.mesh.centroid();
        self.mesh
            .iter_triangles()
            .map(|t| (t.v0 - c).dot(&(t.v1 - c).cross(&(t.v2 - c))).abs() / 6.0)
            .sum()
    }
}

/// Regular grid of heights in the XZ plane
///
/// Sample `(i, j)` sits at `(i * spacing.x, heights[j * columns + i],
/// j * spacing.y)` relative to the collider origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightfield {
    columns: usize,
    rows: usize,
    spacing: (f32, f32),
    heights: Vec<f32>,
}

impl Heightfield {
    /// Create a heightfield; needs at least 2x2 samples
    pub fn new(columns: usize, rows: usize, spacing: (f32, f32), heights: Vec<f32>) -> Result<Self, PhysicsError> {
        if columns < 2 || rows < 2 || heights.len() != columns * rows {
            return Err(PhysicsError::DegenerateCollider(format!(
                "heightfield needs {columns}x{rows} samples, got {}",
                heights.len()
            )));
        }
        if spacing.0 <= 0.0 || spacing.1 <= 0.0 {
            return Err(PhysicsError::DegenerateCollider("heightfield spacing must be positive".into()));
        }
        Ok(Self { columns, rows, spacing, heights })
    }

    /// Interpolated height at a local XZ position, `None` off the grid
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let fx = x / self.spacing.0;
        let fz = z / self.spacing.1;
        let max_x = (self.columns - 1) as f32;
        let max_z = (self.rows - 1) as f32;
        if !(0.0..=max_x).contains(&fx) || !(0.0..=max_z).contains(&fz) {
            return None;
        }
        let i = (fx.floor() as usize).min(self.columns - 2);
        let j = (fz.floor() as usize).min(self.rows - 2);
        let (tx, tz) = (fx - i as f32, fz - j as f32);
        let h = |i: usize, j: usize| self.heights[j * self.columns + i];
        let top = h(i, j) * (1.0 - tx) + h(i + 1, j) * tx;
        let bottom = h(i, j + 1) * (1.0 - tx) + h(i + 1, j + 1) * tx;
        Some(top * (1.0 - tz) + bottom * tz)
    }

    fn normal_at(&self, x: f32, z: f32) -> Vec3 {
        let (dx, dz) = (self.spacing.0 * 0.5, self.spacing.1 * 0.5);
        let sample = |x: f32, z: f32| self.height_at(x, z);
        let center = sample(x, z).unwrap_or(0.0);
        let gx = match (sample(x + dx, z), sample(x - dx, z)) {
            (Some(a), Some(b)) => (a - b) / (2.0 * dx),
            (Some(a), None) => (a - center) / dx,
            (None, Some(b)) => (center - b) / dx,
            (None, None) => 0.0,
        };
        let gz = match (sample(x, z + dz), sample(x, z - dz)) {
            (Some(a), Some(b)) => (a - b) / (2.0 * dz),
            (Some(a), None) => (a - center) / dz,
            (None, Some(b)) => (center - b) / dz,
            (None, None) => 0.0,
        };
        Vec3::new(-gx, 1.0, -gz).normalize()
    }

    fn local_aabb(&self) -> AABB {
        let (lo, hi) = self
            .heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(*h), hi.max(*h)));
        AABB::new(
            Vec3::new(0.0, lo, 0.0),
            Vec3::new((self.columns - 1) as f32 * self.spacing.0, hi, (self.rows - 1) as f32 * self.spacing.1),
        )
    }
}

/// Shape of a collision object in its local frame
#[derive(Debug, Clone, PartialEq)]
pub enum Collider {
    /// Box with the given half extents
    Box {
        /// Half size along each axis
        half_extents: Vec3,
    },
    /// Sphere around the origin
    Sphere {
        /// Sphere radius
        radius: f32,
    },
    /// Capsule along the local Y axis
    Capsule {
        /// Cap radius
        radius: f32,
        /// Half length of the cylindrical part
        half_height: f32,
    },
    /// Cylinder along the local Y axis
    Cylinder {
        /// Cylinder radius
        radius: f32,
        /// Half length
        half_height: f32,
    },
    /// Cone along the local Y axis, apex up, centered on half its height
    Cone {
        /// Base radius
        radius: f32,
        /// Apex to base distance
        height: f32,
    },
    /// Infinite plane; the solid side is below `normal·p = offset`
    Plane {
        /// Unit normal pointing out of the solid
        normal: Vec3,
        /// Plane offset along the normal
        offset: f32,
    },
    /// Convex polyhedron
    ConvexMesh(ConvexHull),
    /// Arbitrary triangle soup; static bodies only
    ConcaveMesh(TriangleMesh),
    /// Concave mesh with a per-axis scale; static bodies only
    ScaledConcaveMesh {
        /// Unscaled mesh
        mesh: TriangleMesh,
        /// Scale applied to the vertices
        scale: Vec3,
    },
    /// Several colliders at local offsets
    Compound(Vec<(Collider, Transform)>),
    /// Heightfield terrain; static bodies only
    Terrain(Heightfield),
}

impl Collider {
    /// Box collider
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::Box { half_extents }
    }

    /// Sphere collider
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius }
    }

    /// Capsule collider along Y
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::Capsule { radius, half_height }
    }

    /// Cylinder collider along Y
    pub fn cylinder(radius: f32, half_height: f32) -> Self {
        Self::Cylinder { radius, half_height }
    }

    /// Cone collider along Y
    pub fn cone(radius: f32, height: f32) -> Self {
        Self::Cone { radius, height }
    }

    /// Plane collider; `normal` is normalized
    pub fn plane(normal: Vec3, offset: f32) -> Self {
        Self::Plane {
            normal: normal.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::y),
            offset,
        }
    }

    /// Convex collider from a closed mesh
    pub fn convex_mesh(mesh: &TriangleMesh) -> Result<Self, PhysicsError> {
        ConvexHull::from_mesh(mesh).map(Self::ConvexMesh)
    }

    /// Static triangle mesh collider
    pub fn concave_mesh(mesh: TriangleMesh) -> Result<Self, PhysicsError> {
        if mesh.is_empty() {
            return Err(PhysicsError::DegenerateCollider("concave mesh without triangles".into()));
        }
        mesh.validate()?;
        Ok(Self::ConcaveMesh(mesh))
    }

    /// Compound of convex parts produced by a decomposer
    ///
    /// Parts that do not form a valid hull are skipped.
    pub fn convex_decomposition(mesh: &TriangleMesh, decomposer: &dyn ConvexDecomposer) -> Result<Self, PhysicsError> {
        mesh.validate()?;
        let parts: Vec<_> = decomposer
            .decompose(mesh)
            .filter_map(|part| match ConvexHull::from_mesh(&part) {
                Ok(hull) => Some((Self::ConvexMesh(hull), Transform::identity())),
                Err(err) => {
                    log::debug!("skipping convex part: {err}");
                    None
                }
            })
            .collect();
        if parts.is_empty() {
            return Err(PhysicsError::DegenerateCollider("decomposition produced no convex parts".into()));
        }
        Ok(Self::Compound(parts))
    }

    /// Short shape name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Box { .. } => "box",
            Self::Sphere { .. } => "sphere",
            Self::Capsule { .. } => "capsule",
            Self::Cylinder { .. } => "cylinder",
            Self::Cone { .. } => "cone",
            Self::Plane { .. } => "plane",
            Self::ConvexMesh(_) => "convex mesh",
            Self::ConcaveMesh(_) => "concave mesh",
            Self::ScaledConcaveMesh { .. } => "scaled concave mesh",
            Self::Compound(_) => "compound",
            Self::Terrain(_) => "terrain",
        }
    }

    /// True for shapes that can only back static bodies
    pub fn is_static_only(&self) -> bool {
        match self {
            Self::Plane { .. } | Self::ConcaveMesh(_) | Self::ScaledConcaveMesh { .. } | Self::Terrain(_) => true,
            Self::Compound(children) => children.iter().any(|(c, _)| c.is_static_only()),
            _ => false,
        }
    }

    /// Enclosed volume; zero for open or unbounded shapes
    pub fn volume(&self) -> f32 {
        match self {
            Self::Box { half_extents: h } => 8.0 * h.x * h.y * h.z,
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Capsule { radius, half_height } => {
                PI * radius * radius * 2.0 * half_height + 4.0 / 3.0 * PI * radius.powi(3)
            }
            Self::Cylinder { radius, half_height } => PI * radius * radius * 2.0 * half_height,
            Self::Cone { radius, height } => PI * radius * radius * height / 3.0,
            Self::ConvexMesh(hull) => hull.volume(),
            Self::Compound(children) => children.iter().map(|(c, _)| c.volume()).sum(),
            Self::Plane { .. } | Self::ConcaveMesh(_) | Self::ScaledConcaveMesh { .. } | Self::Terrain(_) => 0.0,
        }
    }

    /// Bounding box in the local frame
    pub fn local_aabb(&self) -> AABB {
        match self {
            Self::Box { half_extents } => AABB::new(-half_extents, *half_extents),
            Self::Sphere { radius } => AABB::symmetric(*radius),
            Self::Capsule { radius, half_height } => {
                AABB::from_center_extents(Vec3::zeros(), Vec3::new(*radius, half_height + radius, *radius))
            }
            Self::Cylinder { radius, half_height } => {
                AABB::from_center_extents(Vec3::zeros(), Vec3::new(*radius, *half_height, *radius))
            }
            Self::Cone { radius, height } => {
                AABB::from_center_extents(Vec3::zeros(), Vec3::new(*radius, height * 0.5, *radius))
            }
            Self::Plane { normal, offset } => plane_aabb(normal, *offset),
            Self::ConvexMesh(hull) => AABB::from_points(hull.vertices()).unwrap_or_else(|| AABB::symmetric(0.0)),
            Self::ConcaveMesh(mesh) => mesh.aabb().unwrap_or_else(|| AABB::symmetric(0.0)),
            Self::ScaledConcaveMesh { mesh, scale } => {
                let scaled: Vec<Vec3> = mesh.vertices.iter().map(|v| v.component_mul(scale)).collect();
                AABB::from_points(&scaled).unwrap_or_else(|| AABB::symmetric(0.0))
            }
            Self::Compound(children) => children
                .iter()
                .map(|(c, t)| transform_aabb(&c.local_aabb(), t))
                .reduce(|a, b| a.union(&b))
                .unwrap_or_else(|| AABB::symmetric(0.0)),
            Self::Terrain(field) => field.local_aabb(),
        }
    }

    /// Bounding box in world space for an object placed at `transform`
    pub fn world_aabb(&self, transform: &Transform) -> AABB {
        if let Self::Plane { normal, offset } = self {
            let world_normal = transform.rotation * normal;
            return plane_aabb(&world_normal, offset + world_normal.dot(&transform.position));
        }
        transform_aabb(&self.local_aabb(), transform)
    }

    /// Signed distance and outward unit normal at a local point
    ///
    /// Negative inside. Exact for primitives; a lower bound outside convex
    /// hulls. Mesh shapes report the distance to the nearest triangle,
    /// signed by that triangle's facing.
    pub fn signed_distance(&self, p: &Vec3) -> (f32, Vec3) {
        match self {
            Self::Box { half_extents } => box_distance(p, half_extents),
            Self::Sphere { radius } => {
                let len = p.norm();
                let n = if len > f32::EPSILON { p / len } else { Vec3::y() };
                (len - radius, n)
            }
            Self::Capsule { radius, half_height } => {
                let core = Vec3::new(0.0, p.y.clamp(-half_height, *half_height), 0.0);
                let d = p - core;
                let len = d.norm();
                let n = if len > f32::EPSILON { d / len } else { Vec3::x() };
                (len - radius, n)
            }
            Self::Cylinder { radius, half_height } => cylinder_distance(p, *radius, *half_height),
            Self::Cone { radius, height } => cone_distance(p, *radius, *height),
            Self::Plane { normal, offset } => (normal.dot(p) - offset, *normal),
            Self::ConvexMesh(hull) => hull.signed_distance(p),
            Self::ConcaveMesh(mesh) => mesh_distance(mesh.iter_triangles(), p),
            Self::ScaledConcaveMesh { mesh, scale } => mesh_distance(
                mesh.iter_triangles().map(|t| {
                    Triangle::new(t.v0.component_mul(scale), t.v1.component_mul(scale), t.v2.component_mul(scale))
                }),
                p,
            ),
            Self::Compound(children) => children
                .iter()
                .map(|(c, t)| {
                    let (d, n) = c.signed_distance(&t.inverse_transform_point(p));
                    (d, t.rotation * n)
                })
                .fold((f32::INFINITY, Vec3::y()), |best, cur| if cur.0 < best.0 { cur } else { best }),
            Self::Terrain(field) => match field.height_at(p.x, p.z) {
                Some(h) => {
                    let n = field.normal_at(p.x, p.z);
                    ((p.y - h) * n.y, n)
                }
                None => (f32::INFINITY, Vec3::y()),
            },
        }
    }

    /// Points sampled on this shape with a radius, used to find contacts
    /// against another shape's signed distance
    pub fn contact_probes(&self) -> Vec<(Vec3, f32)> {
        match self {
            Self::Sphere { radius } => vec![(Vec3::zeros(), *radius)],
            Self::Capsule { radius, half_height } => vec![
                (Vec3::new(0.0, -half_height, 0.0), *radius),
                (Vec3::zeros(), *radius),
                (Vec3::new(0.0, *half_height, 0.0), *radius),
            ],
            Self::Box { half_extents } => {
                let aabb = AABB::new(-half_extents, *half_extents);
                let mut probes: Vec<(Vec3, f32)> = aabb.corners().iter().map(|c| (*c, 0.0)).collect();
                for axis in 0..3 {
                    for sign in [-1.0, 1.0] {
                        let mut face = Vec3::zeros();
                        face[axis] = sign * half_extents[axis];
                        probes.push((face, 0.0));
                    }
                }
                probes
            }
            Self::Cylinder { radius, half_height } => {
                let mut probes = rim(*radius, -half_height);
                probes.extend(rim(*radius, *half_height));
                probes.push((Vec3::new(0.0, -half_height, 0.0), 0.0));
                probes.push((Vec3::new(0.0, *half_height, 0.0), 0.0));
                probes
            }
            Self::Cone { radius, height } => {
                let mut probes = rim(*radius, -height * 0.5);
                probes.push((Vec3::new(0.0, height * 0.5, 0.0), 0.0));
                probes.push((Vec3::new(0.0, -height * 0.5, 0.0), 0.0));
                probes
            }
            Self::ConvexMesh(hull) => hull.vertices().iter().map(|v| (*v, 0.0)).collect(),
            Self::ConcaveMesh(mesh) => mesh.vertices.iter().map(|v| (*v, 0.0)).collect(),
            Self::ScaledConcaveMesh { mesh, scale } => {
                mesh.vertices.iter().map(|v| (v.component_mul(scale), 0.0)).collect()
            }
            Self::Compound(children) => children
                .iter()
                .flat_map(|(c, t)| c.contact_probes().into_iter().map(move |(p, r)| (t.transform_point(&p), r)))
                .collect(),
            Self::Plane { .. } | Self::Terrain(_) => Vec::new(),
        }
    }

    /// Closest hit of a local-space ray within `max_distance`
    ///
    /// Returns the distance and the outward normal.
    pub fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
        let hit = match self {
            Self::Sphere { radius } => intersect_sphere(ray, &Vec3::zeros(), *radius),
            Self::Box { half_extents } => {
                let aabb = AABB::new(-half_extents, *half_extents);
                aabb.intersect_ray(&ray.origin, &ray.direction).map(|t| {
                    let p = ray.point_at(t);
                    (t, box_distance(&p, half_extents).1)
                })
            }
            Self::Plane { normal, offset } => {
                let start = normal.dot(&ray.origin) - offset;
                let speed = normal.dot(&ray.direction);
                if start <= 0.0 {
                    Some((0.0, *normal))
                } else if speed < 0.0 {
                    Some((-start / speed, *normal))
                } else {
                    None
                }
            }
            Self::ConcaveMesh(mesh) => mesh_raycast(mesh.iter_triangles(), ray),
            Self::ScaledConcaveMesh { mesh, scale } => mesh_raycast(
                mesh.iter_triangles().map(|t| {
                    Triangle::new(t.v0.component_mul(scale), t.v1.component_mul(scale), t.v2.component_mul(scale))
                }),
                ray,
            ),
            Self::ConvexMesh(hull) => {
                if hull.signed_distance(&ray.origin).0 <= 0.0 {
                    Some((0.0, -ray.direction))
                } else {
                    mesh_raycast(hull.mesh().iter_triangles(), ray)
                }
            }
            Self::Compound(children) => children
                .iter()
                .filter_map(|(c, t)| {
                    let local = Ray {
                        origin: t.inverse_transform_point(&ray.origin),
                        direction: t.rotation.inverse() * ray.direction,
                    };
                    c.raycast(&local, max_distance).map(|(d, n)| (d, t.rotation * n))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0)),
            Self::Capsule { .. } | Self::Cylinder { .. } | Self::Cone { .. } | Self::Terrain(_) => {
                self.sphere_trace(ray, max_distance)
            }
        };
        hit.filter(|(t, _)| *t <= max_distance)
    }

    fn sphere_trace(&self, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
        let mut t = 0.0;
        for _ in 0..TRACE_MAX_STEPS {
            let (d, n) = self.signed_distance(&ray.point_at(t));
            if d < TRACE_EPSILON {
                return Some((t, n));
            }
            // Terrain distances are vertical; stay conservative
            t += if matches!(self, Self::Terrain(_)) { d * 0.5 } else { d };
            if t > max_distance || !t.is_finite() {
                return None;
            }
        }
        None
    }
}

/// World box of a local box under a transform
pub fn transform_aabb(aabb: &AABB, transform: &Transform) -> AABB {
    let corners = aabb.corners().map(|c| transform.transform_point(&c));
    AABB::from_points(&corners).unwrap_or(*aabb)
}

fn plane_aabb(normal: &Vec3, offset: f32) -> AABB {
    let mut aabb = AABB::symmetric(KDTREE_MAX);
    // Axis-aligned planes get a thin box on the solid side
    let axis = crate::foundation::math::utils::dominant_axis(normal);
    if (normal[axis].abs() - 1.0).abs() < 1e-6 {
        let level = offset * normal[axis];
        if normal[axis] > 0.0 {
            aabb.max[axis] = level;
        } else {
            aabb.min[axis] = level;
        }
    }
    aabb
}

fn box_distance(p: &Vec3, half_extents: &Vec3) -> (f32, Vec3) {
    let q = p.abs() - half_extents;
    let outside = q.sup(&Vec3::zeros());
    let outside_len = outside.norm();
    if outside_len > 0.0 {
        let n = Vec3::from_fn(|i, _| outside[i] * p[i].signum()) / outside_len;
        return (outside_len, n);
    }
    // Inside: nearest face
    let axis = if q.x >= q.y && q.x >= q.z {
        0
    } else if q.y >= q.z {
        1
    } else {
        2
    };
    let mut n = Vec3::zeros();
    n[axis] = if p[axis] >= 0.0 { 1.0 } else { -1.0 };
    (q[axis], n)
}

fn cylinder_distance(p: &Vec3, radius: f32, half_height: f32) -> (f32, Vec3) {
    let radial = Vec3::new(p.x, 0.0, p.z);
    let r = radial.norm();
    let out_dir = if r > f32::EPSILON { radial / r } else { Vec3::x() };
    let dr = r - radius;
    let dy = p.y.abs() - half_height;
    let up = Vec3::new(0.0, p.y.signum(), 0.0);

    if dr > 0.0 && dy > 0.0 {
        let len = dr.hypot(dy);
        return (len, (out_dir * dr + up * dy) / len);
    }
    if dr > dy {
        (dr, out_dir)
    } else {
        (dy, up)
    }
}

fn cone_distance(p: &Vec3, radius: f32, height: f32) -> (f32, Vec3) {
    // 2D profile in (radial, y): base from (0, -h/2) to (r, -h/2), slant to
    // the apex (0, h/2)
    let radial = Vec3::new(p.x, 0.0, p.z);
    let r = radial.norm();
    let out_dir = if r > f32::EPSILON { radial / r } else { Vec3::x() };
    let half = height * 0.5;

    let closest_on = |a: (f32, f32), b: (f32, f32)| {
        let (ex, ey) = (b.0 - a.0, b.1 - a.1);
        let t = (((r - a.0) * ex + (p.y - a.1) * ey) / (ex * ex + ey * ey)).clamp(0.0, 1.0);
        (a.0 + ex * t, a.1 + ey * t)
    };
    let base = closest_on((0.0, -half), (radius, -half));
    let slant = closest_on((radius, -half), (0.0, half));
    let dist = |c: (f32, f32)| (r - c.0).hypot(p.y - c.1);
    let (db, ds) = (dist(base), dist(slant));

    // Inside when above the base and under the slant line
    let slant_normal = (height, radius);
    let slant_len = slant_normal.0.hypot(slant_normal.1);
    let slant_side = ((r - radius) * slant_normal.0 + (p.y + half) * slant_normal.1) / slant_len;
    let inside = p.y >= -half && slant_side <= 0.0;

    let to_3d = |nr: f32, ny: f32| (out_dir * nr + Vec3::new(0.0, ny, 0.0)).normalize();
    if inside {
        let below = p.y + half;
        if below < -slant_side {
            (-below, Vec3::new(0.0, -1.0, 0.0))
        } else {
            (slant_side, to_3d(slant_normal.0 / slant_len, slant_normal.1 / slant_len))
        }
    } else if db < ds {
        let n = if db > f32::EPSILON { to_3d((r - base.0) / db, (p.y - base.1) / db) } else { -Vec3::y() };
        (db, n)
    } else {
        let n = if ds > f32::EPSILON {
            to_3d((r - slant.0) / ds, (p.y - slant.1) / ds)
        } else {
            to_3d(slant_normal.0 / slant_len, slant_normal.1 / slant_len)
        };
        (ds, n)
    }
}

fn mesh_distance(triangles: impl Iterator<Item = Triangle>, p: &Vec3) -> (f32, Vec3) {
    let mut best = (f32::INFINITY, Vec3::y());
    let mut best_abs = f32::INFINITY;
    for tri in triangles {
        let closest = tri.closest_point(p);
        let delta = p - closest;
        let dist = delta.norm();
        if dist < best_abs {
            let face = tri.normal();
            let sign = if delta.dot(&face) < 0.0 { -1.0 } else { 1.0 };
            best_abs = dist;
            best = (sign * dist, face);
        }
    }
    best
}

fn mesh_raycast(triangles: impl Iterator<Item = Triangle>, ray: &Ray) -> Option<(f32, Vec3)> {
    triangles
        .filter_map(|tri| {
            tri.intersect_ray(ray).map(|(t, _, _)| {
                let n = tri.normal();
                (t, if n.dot(&ray.direction) > 0.0 { -n } else { n })
            })
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

fn rim(radius: f32, y: f32) -> Vec<(Vec3, f32)> {
    (0..RIM_SAMPLES)
        .map(|i| {
            let angle = i as f32 / RIM_SAMPLES as f32 * 2.0 * PI;
            (Vec3::new(radius * angle.cos(), y, radius * angle.sin()), 0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::geometry::ConnectedComponentDecomposer;
    use approx::assert_relative_eq;

    #[test]
    fn test_static_only_shapes() {
        assert!(Collider::plane(Vec3::y(), 0.0).is_static_only());
        assert!(Collider::ConcaveMesh(TriangleMesh::quad(1.0, 1.0)).is_static_only());
        assert!(!Collider::sphere(1.0).is_static_only());
        let compound = Collider::Compound(vec![
            (Collider::sphere(1.0), Transform::identity()),
            (Collider::plane(Vec3::y(), 0.0), Transform::identity()),
        ]);
        assert!(compound.is_static_only());
    }

    #[test]
    fn test_primitive_volumes() {
        assert_relative_eq!(Collider::cuboid(Vec3::new(1.0, 2.0, 3.0)).volume(), 48.0);
        assert_relative_eq!(Collider::sphere(1.0).volume(), 4.0 / 3.0 * PI);
        let hull = Collider::convex_mesh(&TriangleMesh::cuboid(Vec3::repeat(1.0))).unwrap();
        assert_relative_eq!(hull.volume(), 8.0, epsilon = 1e-4);
    }

    #[test]
    fn test_signed_distances() {
        let b = Collider::cuboid(Vec3::repeat(1.0));
        let (d, n) = b.signed_distance(&Vec3::new(0.0, 3.0, 0.0));
        assert_relative_eq!(d, 2.0);
        assert_relative_eq!(n, Vec3::y());
        let (d, n) = b.signed_distance(&Vec3::new(0.9, 0.0, 0.0));
        assert_relative_eq!(d, -0.1, epsilon = 1e-6);
        assert_relative_eq!(n, Vec3::x());

        let c = Collider::capsule(0.5, 1.0);
        assert_relative_eq!(c.signed_distance(&Vec3::new(0.0, 2.5, 0.0)).0, 1.0, epsilon = 1e-6);
        assert_relative_eq!(c.signed_distance(&Vec3::new(2.0, 0.3, 0.0)).0, 1.5, epsilon = 1e-6);

        let cone = Collider::cone(1.0, 2.0);
        assert!(cone.signed_distance(&Vec3::new(0.0, -0.5, 0.0)).0 < 0.0);
        assert_relative_eq!(cone.signed_distance(&Vec3::new(0.0, -3.0, 0.0)).0, 2.0, epsilon = 1e-5);
        assert!(cone.signed_distance(&Vec3::new(0.9, 0.9, 0.0)).0 > 0.0);

        let hull = Collider::convex_mesh(&TriangleMesh::cuboid(Vec3::repeat(1.0))).unwrap();
        assert_relative_eq!(hull.signed_distance(&Vec3::new(0.0, 0.0, 2.0)).0, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_terrain_height_and_distance() {
        let field = Heightfield::new(3, 3, (1.0, 1.0), vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_relative_eq!(field.height_at(1.0, 1.0).unwrap(), 1.0);
        assert_relative_eq!(field.height_at(0.5, 1.0).unwrap(), 0.5);
        assert!(field.height_at(-1.0, 0.0).is_none());

        let terrain = Collider::Terrain(field);
        assert!(terrain.signed_distance(&Vec3::new(1.0, 2.0, 1.0)).0 > 0.0);
        assert!(terrain.signed_distance(&Vec3::new(1.0, 0.5, 1.0)).0 < 0.0);
        assert!(Heightfield::new(1, 3, (1.0, 1.0), vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_raycasts() {
        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::y());

        let (t, n) = Collider::cuboid(Vec3::repeat(1.0)).raycast(&ray, 100.0).unwrap();
        assert_relative_eq!(t, 9.0, epsilon = 1e-5);
        assert_relative_eq!(n, Vec3::y(), epsilon = 1e-5);

        let (t, _) = Collider::plane(Vec3::y(), 0.0).raycast(&ray, 100.0).unwrap();
        assert_relative_eq!(t, 10.0, epsilon = 1e-5);
        assert!(Collider::plane(Vec3::y(), 0.0).raycast(&ray, 5.0).is_none());

        let (t, _) = Collider::capsule(0.5, 1.0).raycast(&ray, 100.0).unwrap();
        assert_relative_eq!(t, 8.5, epsilon = 1e-2);

        let (t, n) = Collider::ConcaveMesh(TriangleMesh::quad(2.0, 2.0)).raycast(&ray, 100.0).unwrap();
        assert_relative_eq!(t, 10.0, epsilon = 1e-5);
        assert_relative_eq!(n, Vec3::y(), epsilon = 1e-5);
    }

    #[test]
    fn test_mesh_colliders_reject_bad_indices() {
        let broken = TriangleMesh {
            vertices: vec![Vec3::zeros(), Vec3::x(), Vec3::z()],
            triangles: vec![[0, 1, 7]],
        };
        assert!(Collider::concave_mesh(broken.clone()).is_err());
        assert!(Collider::convex_mesh(&broken).is_err());
        assert!(Collider::convex_decomposition(&broken, &ConnectedComponentDecomposer).is_err());
    }

    #[test]
    fn test_decomposition_builds_compound() {
        let a = TriangleMesh::cuboid(Vec3::repeat(0.5));
        let b = a.transformed(&Transform::from_position(Vec3::new(3.0, 0.0, 0.0)));
        let mut mesh = a.clone();
        let offset = mesh.vertices.len();
        mesh.vertices.extend(b.vertices);
        mesh.triangles.extend(b.triangles.iter().map(|t| t.map(|i| i + offset)));

        let compound = Collider::convex_decomposition(&mesh, &ConnectedComponentDecomposer).unwrap();
        let Collider::Compound(parts) = &compound else {
            panic!("expected compound");
        };
        assert_eq!(parts.len(), 2);
        assert!(!compound.is_static_only());
        assert_relative_eq!(compound.volume(), 2.0, epsilon = 1e-4);
        assert!(compound.signed_distance(&Vec3::new(3.0, 0.0, 0.0)).0 < 0.0);
    }
}
