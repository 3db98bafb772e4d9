//! Soft bodies: ropes, cloths and triangle meshes simulated as
//! mass-spring networks with position based constraints
//!
//! Every node may carry one anchor. Fixed anchors pin a node in the world
//! by zeroing its mass and body anchors pull it to a point on a rigid body.
//! Animated anchors only nudge the node velocity towards their target, so
//! strong enough forces overpower them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::foundation::math::{utils, Transform, Vec3};
use crate::spatial::AABB;

use super::collider::Collider;
use super::geometry::TriangleMesh;
use super::primitives::{intersect_sphere, Ray, Triangle};
use super::{ObjectId, PhysicsError};

/// Collision radius of a node
pub const NODE_RADIUS: f32 = 0.05;

/// External driver of an animated anchor
pub trait AnchorAnimationControl {
    /// Target position of the anchored node, polled once per step
    fn anchor_position(&mut self) -> Vec3;
}

impl<F: FnMut() -> Vec3> AnchorAnimationControl for F {
    fn anchor_position(&mut self) -> Vec3 {
        self()
    }
}

/// Anchor of one soft body node
pub enum Anchor {
    /// Pinned in the world
    Fixed,
    /// Follows a point fixed in a rigid body frame
    Body {
        /// Rigid body the node follows
        body: ObjectId,
        /// Node position in the body frame
        local: Vec3,
    },
    /// Dragged towards an externally driven target
    Animated(Box<dyn AnchorAnimationControl>),
}

impl std::fmt::Debug for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => f.write_str("Fixed"),
            Self::Body { body, local } => f.debug_struct("Body").field("body", body).field("local", local).finish(),
            Self::Animated(_) => f.write_str("Animated"),
        }
    }
}

#[derive(Debug)]
struct AnchorSlot {
    anchor: Anchor,
    target: Vec3,
}

/// One mass point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftNode {
    /// World position
    pub position: Vec3,
    /// World velocity
    pub velocity: Vec3,
    /// Mass; zero for fixed nodes
    pub mass: f32,
    force: Vec3,
    normal: Vec3,
}

impl SoftNode {
    fn new(position: Vec3, mass: f32) -> Self {
        Self {
            position,
            velocity: Vec3::zeros(),
            mass,
            force: Vec3::zeros(),
            normal: Vec3::zeros(),
        }
    }
}

/// Distance constraint between two nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftLink {
    /// First node
    pub a: usize,
    /// Second node
    pub b: usize,
    /// Rest length
    pub rest_length: f32,
    /// Bending links use the angular stiffness
    pub bending: bool,
}

/// Material coefficients of a soft body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftMaterial {
    /// Stiffness of structural links, in [0, 1]
    pub linear_stiffness: f32,
    /// Stiffness of bending links, in [0, 1]
    pub angular_stiffness: f32,
    /// Velocity damping per second, in [0, 1]
    pub damping: f32,
    /// Friction against colliders, in [0, 1]
    pub friction: f32,
    /// Pressure pushing triangle faces outwards
    pub pressure: f32,
    /// Aerodynamic drag, at least 0
    pub drag: f32,
    /// Aerodynamic lift, at least 0
    pub lift: f32,
}

impl Default for SoftMaterial {
    fn default() -> Self {
        Self {
            linear_stiffness: 1.0,
            angular_stiffness: 0.5,
            damping: 0.01,
            friction: 0.2,
            pressure: 0.0,
            drag: 0.0,
            lift: 0.0,
        }
    }
}

/// Collider a soft body collides with during a substep
pub(crate) struct Obstacle<'a> {
    pub collider: &'a Collider,
    pub transform: Transform,
    pub friction: f32,
}

/// Per-substep parameters of the soft body solver
pub(crate) struct SoftStepParams {
    pub gravity: Vec3,
    pub dt: f32,
    pub iterations: usize,
    pub max_drag: f32,
}

/// Mass-spring soft body
#[derive(Debug)]
pub struct SoftBody {
    nodes: Vec<SoftNode>,
    links: Vec<SoftLink>,
    triangles: Vec<[usize; 3]>,
    anchors: BTreeMap<usize, AnchorSlot>,
    pulls: Vec<(usize, Vec3)>,
    material: SoftMaterial,
    wind: Vec3,
    total_mass: f32,
    gravity_enabled: bool,
}

impl SoftBody {
    fn from_parts(positions: Vec<Vec3>, links: Vec<SoftLink>, triangles: Vec<[usize; 3]>, total_mass: f32) -> Self {
        let total_mass = total_mass.max(0.0);
        let mass = total_mass / positions.len().max(1) as f32;
        let mut body = Self {
            nodes: positions.into_iter().map(|p| SoftNode::new(p, mass)).collect(),
            links,
            triangles,
            anchors: BTreeMap::new(),
            pulls: Vec::new(),
            material: SoftMaterial::default(),
            wind: Vec3::zeros(),
            total_mass,
            gravity_enabled: true,
        };
        body.update_normals();
        body
    }

    /// Rope of `node_count` nodes from `start` to `end`
    pub fn rope(start: Vec3, end: Vec3, node_count: usize, total_mass: f32) -> Result<Self, PhysicsError> {
        if node_count < 2 {
            return Err(PhysicsError::DegenerateCollider(format!("rope needs 2 nodes, got {node_count}")));
        }
        let positions: Vec<Vec3> = (0..node_count)
            .map(|i| start.lerp(&end, i as f32 / (node_count - 1) as f32))
            .collect();
        let mut links = Vec::new();
        for i in 0..node_count - 1 {
            links.push(link(&positions, i, i + 1, false));
            if i + 2 < node_count {
                links.push(link(&positions, i, i + 2, true));
            }
        }
        Ok(Self::from_parts(positions, links, Vec::new(), total_mass))
    }

    /// Rectangular cloth spanned by four corners
    ///
    /// Corners are ordered around the rectangle; `resolution` counts the
    /// nodes along the first and second edge.
    pub fn cloth(corners: [Vec3; 4], resolution: (usize, usize), total_mass: f32) -> Result<Self, PhysicsError> {
        let (rx, ry) = resolution;
        if rx < 2 || ry < 2 {
            return Err(PhysicsError::DegenerateCollider(format!("cloth resolution {rx}x{ry}")));
        }
        let [c00, c10, c11, c01] = corners;
        let index = |x: usize, y: usize| y * rx + x;
        let mut positions = Vec::with_capacity(rx * ry);
        for y in 0..ry {
            let v = y as f32 / (ry - 1) as f32;
            let left = c00.lerp(&c01, v);
            let right = c10.lerp(&c11, v);
            for x in 0..rx {
                positions.push(left.lerp(&right, x as f32 / (rx - 1) as f32));
            }
        }

        let mut links = Vec::new();
        let mut triangles = Vec::new();
        for y in 0..ry {
            for x in 0..rx {
                if x + 1 < rx {
                    links.push(link(&positions, index(x, y), index(x + 1, y), false));
                }
                if y + 1 < ry {
                    links.push(link(&positions, index(x, y), index(x, y + 1), false));
                }
                if x + 2 < rx {
                    links.push(link(&positions, index(x, y), index(x + 2, y), true));
                }
                if y + 2 < ry {
                    links.push(link(&positions, index(x, y), index(x, y + 2), true));
                }
                if x + 1 < rx && y + 1 < ry {
                    links.push(link(&positions, index(x, y), index(x + 1, y + 1), false));
                    links.push(link(&positions, index(x + 1, y), index(x, y + 1), false));
                    triangles.push([index(x, y), index(x + 1, y), index(x + 1, y + 1)]);
                    triangles.push([index(x, y), index(x + 1, y + 1), index(x, y + 1)]);
                }
            }
        }
        Ok(Self::from_parts(positions, links, triangles, total_mass))
    }

    /// Soft body from a triangle mesh; every edge becomes a link
    pub fn from_mesh(mesh: &TriangleMesh, total_mass: f32) -> Result<Self, PhysicsError> {
        if mesh.is_empty() {
            return Err(PhysicsError::DegenerateCollider("soft mesh without triangles".into()));
        }
        mesh.validate()?;
        let mut edges = std::collections::BTreeSet::new();
        for tri in &mesh.triangles {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                edges.insert((a.min(b), a.max(b)));
            }
        }
        let links = edges.into_iter().map(|(a, b)| link(&mesh.vertices, a, b, false)).collect();
        Ok(Self::from_parts(mesh.vertices.clone(), links, mesh.triangles.clone(), total_mass))
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes
    pub fn nodes(&self) -> &[SoftNode] {
        &self.nodes
    }

    /// All links
    pub fn links(&self) -> &[SoftLink] {
        &self.links
    }

    /// Surface triangles; empty for ropes
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// True for bodies without surface triangles
    pub fn is_rope(&self) -> bool {
        self.triangles.is_empty()
    }

    fn check(&self, index: usize) -> Result<(), PhysicsError> {
        if index < self.nodes.len() {
            Ok(())
        } else {
            Err(PhysicsError::VertexOutOfRange {
                index,
                count: self.nodes.len(),
            })
        }
    }

    /// Position of node `index`
    pub fn vertex_position(&self, index: usize) -> Result<Vec3, PhysicsError> {
        self.check(index)?;
        Ok(self.nodes[index].position)
    }

    /// Velocity of node `index`
    pub fn vertex_velocity(&self, index: usize) -> Result<Vec3, PhysicsError> {
        self.check(index)?;
        Ok(self.nodes[index].velocity)
    }

    /// Set the velocity of node `index`
    pub fn set_vertex_velocity(&mut self, index: usize, velocity: Vec3) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.nodes[index].velocity = velocity;
        Ok(())
    }

    /// Set the velocity of every node
    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        for node in &mut self.nodes {
            node.velocity = velocity;
        }
    }

    /// Accumulate a force on node `index` for the next substep
    pub fn add_vertex_force(&mut self, index: usize, force: Vec3) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.nodes[index].force += force;
        Ok(())
    }

    /// Spread a force evenly over every node
    pub fn add_force(&mut self, force: Vec3) {
        let share = force / self.nodes.len().max(1) as f32;
        for node in &mut self.nodes {
            node.force += share;
        }
    }

    /// Mass of node `index`
    pub fn vertex_mass(&self, index: usize) -> Result<f32, PhysicsError> {
        self.check(index)?;
        Ok(self.nodes[index].mass)
    }

    /// Total mass the nodes share
    pub fn total_mass(&self) -> f32 {
        self.total_mass
    }

    /// Change the total mass, rescaling every node
    pub fn set_total_mass(&mut self, mass: f32) {
        let mass = mass.max(0.0);
        let current: f32 = self.nodes.iter().map(|n| n.mass).sum();
        if current > f32::EPSILON {
            let scale = mass / current;
            for node in &mut self.nodes {
                node.mass *= scale;
            }
        }
        self.total_mass = mass;
    }

    /// Area weighted normal of node `index`; zero for ropes
    pub fn vertex_normal(&self, index: usize) -> Result<Vec3, PhysicsError> {
        self.check(index)?;
        Ok(self.nodes[index].normal)
    }

    /// Triangle `index` in world space
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        self.triangles.get(index).map(|[a, b, c]| {
            Triangle::new(self.nodes[*a].position, self.nodes[*b].position, self.nodes[*c].position)
        })
    }

    /// Wind velocity
    pub fn wind(&self) -> Vec3 {
        self.wind
    }

    /// Set the wind velocity used by drag and lift
    pub fn set_wind(&mut self, wind: Vec3) {
        self.wind = wind;
    }

    /// Whether sector gravity applies
    pub fn gravity_enabled(&self) -> bool {
        self.gravity_enabled
    }

    /// Opt in or out of sector gravity
    pub fn set_gravity_enabled(&mut self, enabled: bool) {
        self.gravity_enabled = enabled;
    }

    /// Material coefficients
    pub fn material(&self) -> &SoftMaterial {
        &self.material
    }

    /// Alias of [`Self::set_linear_stiffness`]
    pub fn set_rigidity(&mut self, rigidity: f32) -> Result<(), PhysicsError> {
        self.set_linear_stiffness(rigidity)
    }

    /// Set the structural link stiffness, in [0, 1]
    pub fn set_linear_stiffness(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.linear_stiffness = unit_range("linear stiffness", value)?;
        Ok(())
    }

    /// Set the bending link stiffness, in [0, 1]
    pub fn set_angular_stiffness(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.angular_stiffness = unit_range("angular stiffness", value)?;
        Ok(())
    }

    /// Set the velocity damping, in [0, 1]
    pub fn set_damping(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.damping = unit_range("damping", value)?;
        Ok(())
    }

    /// Set the friction against colliders, in [0, 1]
    pub fn set_friction(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.friction = unit_range("friction", value)?;
        Ok(())
    }

    /// Set the surface pressure
    pub fn set_pressure(&mut self, value: f32) -> Result<(), PhysicsError> {
        if !value.is_finite() {
            return Err(PhysicsError::InvalidMaterial { name: "pressure", value });
        }
        self.material.pressure = value;
        Ok(())
    }

    /// Set the aerodynamic drag, at least 0
    pub fn set_drag(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.drag = non_negative("drag", value)?;
        Ok(())
    }

    /// Set the aerodynamic lift, at least 0
    pub fn set_lift(&mut self, value: f32) -> Result<(), PhysicsError> {
        self.material.lift = non_negative("lift", value)?;
        Ok(())
    }

    /// Anchor of node `index`
    pub fn anchor(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(&index).map(|slot| &slot.anchor)
    }

    /// True when node `index` has an anchor
    pub fn is_anchored(&self, index: usize) -> bool {
        self.anchors.contains_key(&index)
    }

    /// Number of anchored nodes
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Pin node `index` where it is
    ///
    /// The node's mass drops to zero and the free nodes are rescaled so
    /// they still sum to the total mass.
    pub fn anchor_vertex(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.check(index)?;
        let target = self.nodes[index].position;
        self.set_anchor(index, Anchor::Fixed, target);
        Ok(())
    }

    /// Make node `index` follow a rigid body placed at `body_transform`
    pub(crate) fn anchor_vertex_to_body(
        &mut self,
        index: usize,
        body: ObjectId,
        body_transform: &Transform,
    ) -> Result<(), PhysicsError> {
        self.check(index)?;
        let position = self.nodes[index].position;
        let local = body_transform.inverse_transform_point(&position);
        self.set_anchor(index, Anchor::Body { body, local }, position);
        Ok(())
    }

    /// Drag node `index` towards the position reported by `control`
    pub fn anchor_vertex_animated(
        &mut self,
        index: usize,
        control: impl AnchorAnimationControl + 'static,
    ) -> Result<(), PhysicsError> {
        self.check(index)?;
        let position = self.nodes[index].position;
        self.set_anchor(index, Anchor::Animated(Box::new(control)), position);
        Ok(())
    }

    /// Move the anchor of node `index` to `position`
    ///
    /// Body anchors are re-based in the frame of their body, which must be
    /// given; fixed anchors move their node.
    pub fn update_anchor(
        &mut self,
        index: usize,
        position: Vec3,
        body_transform: Option<&Transform>,
    ) -> Result<(), PhysicsError> {
        let slot = self.anchors.get_mut(&index).ok_or(PhysicsError::NoAnchor(index))?;
        match &mut slot.anchor {
            Anchor::Fixed => {
                self.nodes[index].position = position;
                self.nodes[index].velocity = Vec3::zeros();
            }
            Anchor::Body { local, .. } => {
                if let Some(transform) = body_transform {
                    *local = transform.inverse_transform_point(&position);
                }
            }
            Anchor::Animated(_) => {}
        }
        slot.target = position;
        Ok(())
    }

    /// Release node `index`
    ///
    /// A fixed node gets `total_mass / node_count` back; the other free
    /// nodes are rescaled so the sum stays the total mass.
    pub fn remove_anchor(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.check(index)?;
        let slot = self.anchors.remove(&index).ok_or(PhysicsError::NoAnchor(index))?;
        if matches!(slot.anchor, Anchor::Fixed) {
            let restored = self.total_mass / self.nodes.len() as f32;
            self.nodes[index].mass = restored;
            self.rescale_free_nodes(index, self.total_mass - restored);
        }
        Ok(())
    }

    /// Drop every anchor bound to `body`; returns how many were removed
    pub(crate) fn remove_body_anchors(&mut self, body: ObjectId) -> usize {
        let before = self.anchors.len();
        self.anchors
            .retain(|_, slot| !matches!(slot.anchor, Anchor::Body { body: b, .. } if b == body));
        before - self.anchors.len()
    }

    /// Rigid bodies referenced by body anchors
    pub(crate) fn anchored_bodies(&self) -> impl Iterator<Item = (usize, ObjectId, Vec3)> + '_ {
        self.anchors.iter().filter_map(|(i, slot)| match slot.anchor {
            Anchor::Body { body, local } => Some((*i, body, local)),
            _ => None,
        })
    }

    fn set_anchor(&mut self, index: usize, anchor: Anchor, target: Vec3) {
        let was_fixed = matches!(self.anchors.get(&index).map(|s| &s.anchor), Some(Anchor::Fixed));
        let fixed = matches!(anchor, Anchor::Fixed);
        self.anchors.insert(index, AnchorSlot { anchor, target });
        if fixed && !was_fixed {
            self.nodes[index].mass = 0.0;
            self.rescale_free_nodes(index, self.total_mass);
        } else if was_fixed && !fixed {
            let restored = self.total_mass / self.nodes.len() as f32;
            self.nodes[index].mass = restored;
            self.rescale_free_nodes(index, self.total_mass - restored);
        }
    }

    /// Scale the nodes that are neither fixed nor `skip` to sum to `target`
    fn rescale_free_nodes(&mut self, skip: usize, target: f32) {
        let free: Vec<usize> = (0..self.nodes.len())
            .filter(|i| *i != skip && !matches!(self.anchor(*i), Some(Anchor::Fixed)))
            .collect();
        if free.is_empty() {
            return;
        }
        let sum: f32 = free.iter().map(|i| self.nodes[*i].mass).sum();
        let target = target.max(0.0);
        for i in free.iter().copied() {
            let node = &mut self.nodes[i];
            node.mass = if sum > f32::EPSILON {
                node.mass * target / sum
            } else {
                target / free.len() as f32
            };
        }
    }

    /// Read every animated anchor control once
    pub(crate) fn poll_animated_anchors(&mut self) {
        for slot in self.anchors.values_mut() {
            if let Anchor::Animated(control) = &mut slot.anchor {
                slot.target = control.anchor_position();
            }
        }
    }

    /// Refresh body anchor targets from the current body transforms
    pub(crate) fn update_body_anchor_targets(&mut self, transform_of: impl Fn(ObjectId) -> Option<Transform>) {
        for slot in self.anchors.values_mut() {
            if let Anchor::Body { body, local } = &slot.anchor {
                if let Some(transform) = transform_of(*body) {
                    slot.target = transform.transform_point(local);
                }
            }
        }
    }

    /// Pull node `index` onto `target` during the next substep
    pub(crate) fn add_pull(&mut self, index: usize, target: Vec3) {
        if index < self.nodes.len() {
            self.pulls.push((index, target));
        }
    }

    /// Node centroid
    pub fn centroid(&self) -> Vec3 {
        if self.nodes.is_empty() {
            return Vec3::zeros();
        }
        self.nodes.iter().map(|n| n.position).sum::<Vec3>() / self.nodes.len() as f32
    }

    /// Bounding box of the nodes including their radius
    pub fn aabb(&self) -> Option<AABB> {
        let points: Vec<Vec3> = self.nodes.iter().map(|n| n.position).collect();
        AABB::from_points(&points).map(|b| b.inflated(NODE_RADIUS))
    }

    /// Apply a rigid transform to every node
    pub(crate) fn transform_nodes(&mut self, transform: &Transform) {
        for node in &mut self.nodes {
            node.position = transform.transform_point(&node.position);
            node.velocity = transform.rotation * node.velocity;
        }
        for slot in self.anchors.values_mut() {
            slot.target = transform.transform_point(&slot.target);
        }
        self.update_normals();
    }

    /// Closest hit of a world-space ray
    ///
    /// Returns the distance, the normal and the node nearest to the hit.
    pub fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3, usize)> {
        if self.is_rope() {
            return self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| intersect_sphere(ray, &n.position, NODE_RADIUS).map(|(t, normal)| (t, normal, i)))
                .filter(|(t, _, _)| *t <= max_distance)
                .min_by(|a, b| a.0.total_cmp(&b.0));
        }
        let (t, face) = (0..self.triangles.len())
            .filter_map(|i| self.triangle(i).and_then(|tri| tri.intersect_ray(ray)).map(|(t, _, _)| (t, i)))
            .filter(|(t, _)| *t <= max_distance)
            .min_by(|a, b| a.0.total_cmp(&b.0))?;
        let point = ray.point_at(t);
        let nearest = self.triangles[face]
            .iter()
            .copied()
            .min_by(|a, b| {
                let da = (self.nodes[*a].position - point).norm_squared();
                let db = (self.nodes[*b].position - point).norm_squared();
                da.total_cmp(&db)
            })?;
        let mut normal = self.triangle(face).map(|tri| tri.normal()).unwrap_or_else(Vec3::zeros);
        if normal.dot(&ray.direction) > 0.0 {
            normal = -normal;
        }
        Some((t, normal, nearest))
    }

    fn update_normals(&mut self) {
        for node in &mut self.nodes {
            node.normal = Vec3::zeros();
        }
        for [a, b, c] in self.triangles.clone() {
            let n = Triangle::new(self.nodes[a].position, self.nodes[b].position, self.nodes[c].position).scaled_normal();
            for i in [a, b, c] {
                self.nodes[i].normal += n;
            }
        }
        for node in &mut self.nodes {
            node.normal = node.normal.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);
        }
    }

    fn aerodynamic_forces(&mut self) {
        let SoftMaterial {
            drag, lift, pressure, ..
        } = self.material;
        if drag == 0.0 && lift == 0.0 && pressure == 0.0 {
            return;
        }
        if self.is_rope() {
            for node in &mut self.nodes {
                node.force -= (node.velocity - self.wind) * drag;
            }
            return;
        }
        for [a, b, c] in self.triangles.clone() {
            let tri = Triangle::new(self.nodes[a].position, self.nodes[b].position, self.nodes[c].position);
            let (area, normal) = (tri.area(), tri.normal());
            let relative =
                (self.nodes[a].velocity + self.nodes[b].velocity + self.nodes[c].velocity) / 3.0 - self.wind;
            let normal_speed = relative.dot(&normal);
            let tangential = relative - normal * normal_speed;
            let force = normal * (pressure * area - drag * area * normal_speed)
                - tangential.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros) * (lift * area * normal_speed.abs());
            for i in [a, b, c] {
                self.nodes[i].force += force / 3.0;
            }
        }
    }

    /// Advance one substep
    pub(crate) fn simulate(&mut self, params: &SoftStepParams, obstacles: &[Obstacle<'_>]) {
        let h = params.dt;
        if h <= 0.0 || self.nodes.is_empty() {
            return;
        }
        self.aerodynamic_forces();

        let gravity = if self.gravity_enabled { params.gravity } else { Vec3::zeros() };
        let damping = (1.0 - self.material.damping).powf(h);
        let mut inverse_mass: Vec<f32> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let pinned = self.anchors.get(&i).is_some_and(|slot| !matches!(slot.anchor, Anchor::Animated(_)));
                if pinned || n.mass <= 0.0 {
                    0.0
                } else {
                    1.0 / n.mass
                }
            })
            .collect();

        // Animated anchors only correct the node velocity, forces still act
        for (index, slot) in &self.anchors {
            if let Anchor::Animated(_) = slot.anchor {
                let node = &mut self.nodes[*index];
                let drift = slot.target - (node.position + node.velocity * h);
                node.velocity += utils::clamp_length(drift, params.max_drag) / h;
            }
        }

        let mut predicted: Vec<Vec3> = self
            .nodes
            .iter_mut()
            .zip(&inverse_mass)
            .map(|(node, w)| {
                if *w > 0.0 {
                    node.velocity += (gravity + node.force * *w) * h;
                    node.velocity *= damping;
                }
                node.position + node.velocity * h
            })
            .collect();

        for (index, slot) in &self.anchors {
            match slot.anchor {
                Anchor::Fixed => predicted[*index] = self.nodes[*index].position,
                Anchor::Body { .. } => predicted[*index] = slot.target,
                Anchor::Animated(_) => {}
            }
        }
        for (index, target) in self.pulls.drain(..) {
            predicted[index] = target;
            inverse_mass[index] = 0.0;
        }

        for _ in 0..params.iterations.max(1) {
            for l in &self.links {
                let (wa, wb) = (inverse_mass[l.a], inverse_mass[l.b]);
                let total = wa + wb;
                if total <= 0.0 {
                    continue;
                }
                let delta = predicted[l.b] - predicted[l.a];
                let length = delta.norm();
                if length < f32::EPSILON {
                    continue;
                }
                let stiffness = if l.bending {
                    self.material.angular_stiffness
                } else {
                    self.material.linear_stiffness
                };
                let correction = delta * (stiffness * (length - l.rest_length) / (total * length));
                predicted[l.a] += correction * wa;
                predicted[l.b] -= correction * wb;
            }
        }

        for (p, (node, w)) in predicted.iter_mut().zip(self.nodes.iter().zip(&inverse_mass)) {
            if *w <= 0.0 {
                continue;
            }
            for obstacle in obstacles {
                let local = obstacle.transform.inverse_transform_point(p);
                let (distance, local_normal) = obstacle.collider.signed_distance(&local);
                if distance >= NODE_RADIUS {
                    continue;
                }
                let normal = obstacle.transform.rotation * local_normal;
                *p += normal * (NODE_RADIUS - distance);
                let moved = *p - node.position;
                let tangential = moved - normal * moved.dot(&normal);
                *p -= tangential * (self.material.friction * obstacle.friction).clamp(0.0, 1.0);
            }
        }

        for (node, p) in self.nodes.iter_mut().zip(predicted) {
            node.velocity = (p - node.position) / h;
            node.position = p;
            node.force = Vec3::zeros();
        }
        for (index, slot) in &self.anchors {
            if matches!(slot.anchor, Anchor::Fixed) {
                self.nodes[*index].velocity = Vec3::zeros();
            }
        }
        self.update_normals();
    }
}

fn link(positions: &[Vec3], a: usize, b: usize, bending: bool) -> SoftLink {
    SoftLink {
        a,
        b,
        rest_length: (positions[b] - positions[a]).norm(),
        bending,
    }
}

fn unit_range(name: &'static str, value: f32) -> Result<f32, PhysicsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PhysicsError::InvalidMaterial { name, value })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<f32, PhysicsError> {
    if value >= 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(PhysicsError::InvalidMaterial { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mass_sum(body: &SoftBody) -> f32 {
        body.nodes().iter().map(|n| n.mass).sum()
    }

    fn params() -> SoftStepParams {
        SoftStepParams {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            dt: 1.0 / 60.0,
            iterations: 10,
            max_drag: 10.0,
        }
    }

    #[test]
    fn test_rope_layout() {
        let rope = SoftBody::rope(Vec3::zeros(), Vec3::new(9.0, 0.0, 0.0), 10, 5.0).unwrap();
        assert_eq!(rope.node_count(), 10);
        assert!(rope.is_rope());
        assert_eq!(rope.links().iter().filter(|l| !l.bending).count(), 9);
        assert_relative_eq!(rope.links()[0].rest_length, 1.0, epsilon = 1e-6);
        assert_relative_eq!(mass_sum(&rope), 5.0, epsilon = 1e-5);
        assert!(SoftBody::rope(Vec3::zeros(), Vec3::x(), 1, 1.0).is_err());
    }

    #[test]
    fn test_fixed_anchor_conserves_mass() {
        let mut rope = SoftBody::rope(Vec3::zeros(), Vec3::new(0.0, -4.0, 0.0), 5, 10.0).unwrap();
        rope.anchor_vertex(0).unwrap();
        assert_eq!(rope.vertex_mass(0).unwrap(), 0.0);
        assert_relative_eq!(mass_sum(&rope), 10.0, epsilon = 1e-4);

        rope.remove_anchor(0).unwrap();
        assert_relative_eq!(rope.vertex_mass(0).unwrap(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(mass_sum(&rope), 10.0, epsilon = 1e-4);
        assert_eq!(rope.remove_anchor(0), Err(PhysicsError::NoAnchor(0)));
    }

    #[test]
    fn test_fixed_node_stays_put() {
        let mut rope = SoftBody::rope(Vec3::zeros(), Vec3::new(2.0, 0.0, 0.0), 5, 1.0).unwrap();
        rope.anchor_vertex(0).unwrap();
        for _ in 0..120 {
            rope.simulate(&params(), &[]);
        }
        assert_eq!(rope.vertex_position(0).unwrap(), Vec3::zeros());
        assert!(rope.vertex_position(4).unwrap().y < -0.5);
    }

    #[test]
    fn test_animated_anchor_drag_is_clamped() {
        let mut rope = SoftBody::rope(Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0), 2, 1.0).unwrap();
        rope.set_gravity_enabled(false);
        rope.anchor_vertex_animated(0, || Vec3::new(0.0, 100.0, 0.0)).unwrap();
        rope.poll_animated_anchors();
        let params = SoftStepParams { max_drag: 0.5, ..params() };
        rope.simulate(&params, &[]);
        let dragged = rope.vertex_position(0).unwrap();
        assert!(dragged.y > 0.4 && dragged.y <= 0.5 + 1e-5);
    }

    #[test]
    fn test_animated_anchor_yields_to_large_force() {
        let mut rope = SoftBody::rope(Vec3::zeros(), Vec3::new(4.0, 0.0, 0.0), 5, 1.0).unwrap();
        rope.set_gravity_enabled(false);
        let hold = rope.vertex_position(2).unwrap();
        rope.anchor_vertex_animated(2, move || hold).unwrap();
        rope.poll_animated_anchors();
        rope.add_vertex_force(2, Vec3::new(0.0, 1e6, 0.0)).unwrap();
        rope.simulate(&params(), &[]);
        assert!(rope.vertex_position(2).unwrap().y > 1.0);
        assert_relative_eq!(rope.vertex_mass(2).unwrap(), 0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_animated_anchor_holds_without_load() {
        let mut rope = SoftBody::rope(Vec3::zeros(), Vec3::new(4.0, 0.0, 0.0), 5, 1.0).unwrap();
        rope.set_gravity_enabled(false);
        let hold = rope.vertex_position(2).unwrap();
        rope.anchor_vertex_animated(2, move || hold).unwrap();
        for _ in 0..30 {
            rope.poll_animated_anchors();
            rope.simulate(&params(), &[]);
        }
        assert_relative_eq!(rope.vertex_position(2).unwrap(), hold, epsilon = 1e-4);
    }

    #[test]
    fn test_material_validation() {
        let mut cloth = SoftBody::cloth(
            [Vec3::zeros(), Vec3::x(), Vec3::new(1.0, 0.0, 1.0), Vec3::z()],
            (3, 3),
            1.0,
        )
        .unwrap();
        assert_eq!(cloth.triangles().len(), 8);
        assert!(cloth.set_rigidity(0.8).is_ok());
        assert_eq!(
            cloth.set_damping(1.5),
            Err(PhysicsError::InvalidMaterial { name: "damping", value: 1.5 })
        );
        assert!(cloth.set_drag(3.0).is_ok());
        assert!(cloth.set_lift(-1.0).is_err());
    }

    #[test]
    fn test_nodes_rest_on_collider() {
        let ground = Collider::plane(Vec3::y(), 0.0);
        let obstacles = [Obstacle {
            collider: &ground,
            transform: Transform::identity(),
            friction: 1.0,
        }];
        let mut rope = SoftBody::rope(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 0.0), 3, 1.0).unwrap();
        for _ in 0..180 {
            rope.simulate(&params(), &obstacles);
        }
        for node in rope.nodes() {
            assert!(node.position.y > 0.0 && node.position.y < 0.1);
        }
    }

    #[test]
    fn test_mesh_with_bad_index_is_an_error() {
        let broken = TriangleMesh {
            vertices: vec![Vec3::zeros(), Vec3::x(), Vec3::z()],
            triangles: vec![[0, 1, 7]],
        };
        assert!(matches!(
            SoftBody::from_mesh(&broken, 1.0),
            Err(PhysicsError::DegenerateCollider(_))
        ));
    }

    #[test]
    fn test_raycast_reports_nearest_node() {
        let mesh = TriangleMesh::quad(1.0, 1.0);
        let sheet = SoftBody::from_mesh(&mesh, 1.0).unwrap();
        let ray = Ray::new(Vec3::new(0.9, 2.0, 0.8), -Vec3::y());
        let (t, normal, vertex) = sheet.raycast(&ray, 10.0).unwrap();
        assert_relative_eq!(t, 2.0, epsilon = 1e-5);
        assert_relative_eq!(normal, Vec3::y(), epsilon = 1e-5);
        assert_eq!(vertex, 2);
    }
}
