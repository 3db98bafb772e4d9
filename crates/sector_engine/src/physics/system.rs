//! The physics context
//!
//! [`PhysicsSystem`] owns every object, sector, joint, vehicle and portal in
//! slot maps and hands out handles. Sectors only list the handles of what
//! they contain, so an object can move between sectors without being
//! copied.

use log::{debug, info, warn};
use slotmap::SlotMap;

use crate::config::EngineConfig;
use crate::foundation::math::{Transform, Vec3};

use super::collider::Collider;
use super::geometry::{ConnectedComponentDecomposer, ConvexDecomposer};
use super::group::{CollisionGroupId, CollisionGroupTable};
use super::joint::{Joint, JointKind};
use super::object::CollisionObject;
use super::portal::Portal;
use super::sector::CollisionSector;
use super::soft_body::Anchor;
use super::vehicle::Vehicle;
use super::{JointId, ObjectId, PhysicalObjectType, PhysicsError, PortalId, SectorId, VehicleId};

/// Owner of all collision state
pub struct PhysicsSystem {
    pub(super) objects: SlotMap<ObjectId, CollisionObject>,
    pub(super) sectors: SlotMap<SectorId, CollisionSector>,
    pub(super) joints: SlotMap<JointId, Joint>,
    pub(super) vehicles: SlotMap<VehicleId, Vehicle>,
    pub(super) portals: SlotMap<PortalId, Portal>,
    pub(super) groups: CollisionGroupTable,
    pub(super) config: EngineConfig,
    decomposer: Box<dyn ConvexDecomposer>,
}

impl std::fmt::Debug for PhysicsSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsSystem")
            .field("objects", &self.objects.len())
            .field("sectors", &self.sectors.len())
            .field("joints", &self.joints.len())
            .field("vehicles", &self.vehicles.len())
            .field("portals", &self.portals.len())
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsSystem {
    /// Create an empty system
    pub fn new(config: EngineConfig) -> Self {
        info!(
            "Physics system created (time step {:.4}s, {} iterations)",
            config.simulation.time_step, config.simulation.solver_iterations
        );
        Self {
            objects: SlotMap::with_key(),
            sectors: SlotMap::with_key(),
            joints: SlotMap::with_key(),
            vehicles: SlotMap::with_key(),
            portals: SlotMap::with_key(),
            groups: CollisionGroupTable::new(),
            config,
            decomposer: Box::new(ConnectedComponentDecomposer),
        }
    }

    /// Engine configuration sectors are created from
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Factor applied to durations passed to [`Self::step_all`]
    pub fn simulation_speed(&self) -> f32 {
        self.config.simulation.simulation_speed
    }

    /// Set the simulation speed; negative values are clamped to zero
    pub fn set_simulation_speed(&mut self, speed: f32) {
        self.config.simulation.simulation_speed = speed.max(0.0);
    }

    /// Decomposer used to turn concave meshes into convex parts
    pub fn decomposer(&self) -> &dyn ConvexDecomposer {
        self.decomposer.as_ref()
    }

    /// Replace the convex decomposer
    pub fn set_decomposer(&mut self, decomposer: impl ConvexDecomposer + 'static) {
        self.decomposer = Box::new(decomposer);
    }

    // ---- Sectors ----

    /// Create an empty sector with the configured parameters
    pub fn create_sector(&mut self, name: &str) -> SectorId {
        let sector = CollisionSector::new(name, &self.config.simulation, self.config.tree.clone());
        let id = self.sectors.insert(sector);
        info!("Collision sector '{}' created", name);
        id
    }

    /// First sector called `name`
    pub fn find_sector(&self, name: &str) -> Option<SectorId> {
        self.sectors.iter().find(|(_, s)| s.name() == name).map(|(id, _)| id)
    }

    /// Remove a sector
    ///
    /// Its objects, joints and vehicles stay alive but no longer belong to
    /// any sector. Portals leaving or entering the sector are destroyed.
    pub fn remove_sector(&mut self, id: SectorId) -> Result<CollisionSector, PhysicsError> {
        let mut sector = self.sectors.remove(id).ok_or(PhysicsError::UnknownSector(id))?;
        for object in &sector.objects {
            if let Some(obj) = self.objects.get_mut(*object) {
                obj.sector = None;
                obj.tree_handle = None;
                obj.contacts.clear();
            }
        }
        for joint in &sector.joints {
            if let Some(joint) = self.joints.get_mut(*joint) {
                joint.sector = None;
            }
        }
        for vehicle in &sector.vehicles {
            if let Some(vehicle) = self.vehicles.get_mut(*vehicle) {
                vehicle.sector = None;
            }
        }
        for portal in sector.portals.drain(..) {
            self.portals.remove(portal);
        }
        let entering: Vec<PortalId> = self
            .portals
            .iter()
            .filter(|(_, p)| p.destination() == id)
            .map(|(pid, _)| pid)
            .collect();
        for portal in entering {
            self.portals.remove(portal);
            for other in self.sectors.values_mut() {
                other.portals.retain(|p| *p != portal);
            }
        }
        sector.broad_phase.clear();
        info!("Collision sector '{}' removed", sector.name());
        Ok(sector)
    }

    /// Sector by handle
    pub fn sector(&self, id: SectorId) -> Result<&CollisionSector, PhysicsError> {
        self.sectors.get(id).ok_or(PhysicsError::UnknownSector(id))
    }

    /// Mutable sector by handle
    pub fn sector_mut(&mut self, id: SectorId) -> Result<&mut CollisionSector, PhysicsError> {
        self.sectors.get_mut(id).ok_or(PhysicsError::UnknownSector(id))
    }

    /// All sectors
    pub fn sectors(&self) -> impl Iterator<Item = (SectorId, &CollisionSector)> {
        self.sectors.iter()
    }

    // ---- Objects ----

    /// Take ownership of an object; it is not in any sector yet
    pub fn add_object(&mut self, object: CollisionObject) -> ObjectId {
        self.objects.insert(object)
    }

    /// Object by handle
    pub fn object(&self, id: ObjectId) -> Option<&CollisionObject> {
        self.objects.get(id)
    }

    /// Mutable object by handle
    ///
    /// Teleports should go through [`Self::set_object_transform`] so the
    /// broad phase follows.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut CollisionObject> {
        self.objects.get_mut(id)
    }

    /// All objects
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &CollisionObject)> {
        self.objects.iter()
    }

    pub(super) fn object_ref(&self, id: ObjectId) -> Result<&CollisionObject, PhysicsError> {
        self.objects.get(id).ok_or(PhysicsError::UnknownObject(id))
    }

    pub(super) fn object_ref_mut(&mut self, id: ObjectId) -> Result<&mut CollisionObject, PhysicsError> {
        self.objects.get_mut(id).ok_or(PhysicsError::UnknownObject(id))
    }

    /// Destroy an object
    ///
    /// The object leaves its sector. Joints attached to it, body anchors
    /// pointing at it and vehicles using it as chassis are destroyed too.
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<CollisionObject, PhysicsError> {
        let sector = self.object_ref(id)?.sector;
        if let Some(sector) = sector {
            self.remove_collision_object(sector, id)?;
        }

        let joints: Vec<JointId> = self
            .joints
            .iter()
            .filter(|(_, j)| j.references(id))
            .map(|(jid, _)| jid)
            .collect();
        for joint in joints {
            self.remove_joint(joint)?;
            debug!("Joint {:?} destroyed with object {:?}", joint, id);
        }

        for (other, object) in &mut self.objects {
            if let Some(soft) = object.as_soft_body_mut() {
                let removed = soft.remove_body_anchors(id);
                if removed > 0 {
                    debug!("Removed {} anchors of {:?} bound to {:?}", removed, other, id);
                }
            }
        }

        let vehicles: Vec<VehicleId> = self
            .vehicles
            .iter()
            .filter(|(_, v)| v.chassis() == id)
            .map(|(vid, _)| vid)
            .collect();
        for vehicle in vehicles {
            self.remove_vehicle(vehicle)?;
            debug!("Vehicle {:?} destroyed with its chassis", vehicle);
        }

        self.objects.remove(id).ok_or(PhysicsError::UnknownObject(id))
    }

    /// Place an object in a sector
    pub fn add_collision_object(&mut self, sector: SectorId, id: ObjectId) -> Result<(), PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let object = self.objects.get_mut(id).ok_or(PhysicsError::UnknownObject(id))?;
        if let Some(current) = object.sector {
            warn!("Object '{}' is already in a sector", object.name());
            return Err(PhysicsError::AlreadyInSector {
                object: id,
                sector: current,
            });
        }
        target.objects.push(id);
        object.tree_handle = object.world_aabb().map(|aabb| target.broad_phase.add_object(aabb, id));
        object.sector = Some(sector);
        debug!("Object '{}' added to sector '{}'", object.name(), target.name());
        Ok(())
    }

    /// Take an object out of a sector; it stays owned by the system
    pub fn remove_collision_object(&mut self, sector: SectorId, id: ObjectId) -> Result<(), PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let object = self.objects.get_mut(id).ok_or(PhysicsError::UnknownObject(id))?;
        if object.sector != Some(sector) {
            return Err(PhysicsError::NotInSector { object: id, sector });
        }
        target.objects.retain(|o| *o != id);
        if let Some(handle) = object.tree_handle.take() {
            if let Err(err) = target.broad_phase.remove_object(handle) {
                warn!("Broad phase lost object '{}': {}", object.name(), err);
            }
        }
        object.sector = None;
        object.contacts.clear();
        Ok(())
    }

    /// Teleport an object, keeping the broad phase in sync
    pub fn set_object_transform(&mut self, id: ObjectId, transform: Transform) -> Result<(), PhysicsError> {
        self.object_ref_mut(id)?.set_transform(transform);
        self.refresh_tree_entry(id);
        Ok(())
    }

    /// Swap the collider of an object, keeping the broad phase in sync
    pub fn set_object_collider(&mut self, id: ObjectId, collider: Collider) -> Result<(), PhysicsError> {
        self.object_ref_mut(id)?.set_collider(collider)?;
        self.refresh_tree_entry(id);
        Ok(())
    }

    /// Move the broad phase entry of an object to its current box
    pub(super) fn refresh_tree_entry(&mut self, id: ObjectId) {
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        let Some(sector) = object.sector.and_then(|s| self.sectors.get_mut(s)) else {
            return;
        };
        match (object.tree_handle, object.world_aabb()) {
            (Some(handle), Some(aabb)) => {
                if sector.broad_phase.move_object(handle, aabb).is_err() {
                    object.tree_handle = Some(sector.broad_phase.add_object(aabb, id));
                }
            }
            (None, Some(aabb)) => object.tree_handle = Some(sector.broad_phase.add_object(aabb, id)),
            (Some(handle), None) => {
                let _ = sector.broad_phase.remove_object(handle);
                object.tree_handle = None;
            }
            (None, None) => {}
        }
    }

    /// First object of a sector called `name`
    pub fn find_collision_object(&self, sector: SectorId, name: &str) -> Result<Option<ObjectId>, PhysicsError> {
        Ok(self
            .sector(sector)?
            .objects
            .iter()
            .copied()
            .find(|id| self.objects.get(*id).is_some_and(|o| o.name() == name)))
    }

    /// Number of rigid bodies in a sector
    pub fn rigid_body_count(&self, sector: SectorId) -> Result<usize, PhysicsError> {
        self.count_physical(sector, PhysicalObjectType::RigidBody)
    }

    /// Number of soft bodies in a sector
    pub fn soft_body_count(&self, sector: SectorId) -> Result<usize, PhysicsError> {
        self.count_physical(sector, PhysicalObjectType::SoftBody)
    }

    /// First rigid body of a sector called `name`
    pub fn find_rigid_body(&self, sector: SectorId, name: &str) -> Result<Option<ObjectId>, PhysicsError> {
        self.find_physical(sector, name, PhysicalObjectType::RigidBody)
    }

    /// First soft body of a sector called `name`
    pub fn find_soft_body(&self, sector: SectorId, name: &str) -> Result<Option<ObjectId>, PhysicsError> {
        self.find_physical(sector, name, PhysicalObjectType::SoftBody)
    }

    fn count_physical(&self, sector: SectorId, kind: PhysicalObjectType) -> Result<usize, PhysicsError> {
        Ok(self
            .sector(sector)?
            .objects
            .iter()
            .filter(|id| self.objects.get(**id).and_then(CollisionObject::physical_type) == Some(kind))
            .count())
    }

    fn find_physical(
        &self,
        sector: SectorId,
        name: &str,
        kind: PhysicalObjectType,
    ) -> Result<Option<ObjectId>, PhysicsError> {
        Ok(self.sector(sector)?.objects.iter().copied().find(|id| {
            self.objects
                .get(*id)
                .is_some_and(|o| o.name() == name && o.physical_type() == Some(kind))
        }))
    }

    // ---- Groups ----

    /// Collision group table
    pub fn groups(&self) -> &CollisionGroupTable {
        &self.groups
    }

    /// Create a group, or return the existing one with that name
    pub fn create_collision_group(&mut self, name: &str) -> Result<CollisionGroupId, PhysicsError> {
        self.groups.create_group(name)
    }

    /// Group called `name`
    pub fn find_collision_group(&self, name: &str) -> Option<CollisionGroupId> {
        self.groups.find_group(name)
    }

    /// Enable or disable collisions between two groups, both ways
    pub fn set_group_collision(
        &mut self,
        a: CollisionGroupId,
        b: CollisionGroupId,
        enabled: bool,
    ) -> Result<(), PhysicsError> {
        self.groups.set_group_collision(a, b, enabled)
    }

    /// Whether two groups collide
    pub fn group_collision(&self, a: CollisionGroupId, b: CollisionGroupId) -> bool {
        self.groups.group_collision(a, b)
    }

    /// Move an object to another group
    pub fn set_object_group(&mut self, id: ObjectId, group: CollisionGroupId) -> Result<(), PhysicsError> {
        if self.groups.group(group).is_none() {
            return Err(PhysicsError::UnknownGroup(format!("#{}", group.index())));
        }
        self.object_ref_mut(id)?.group = group;
        Ok(())
    }

    // ---- Joints ----

    /// Attach a joint to two bodies; `None` is the world
    ///
    /// The joint frame is bound to the current body placements. Soft
    /// joints remember the soft body node nearest to the joint position.
    /// The joint is not simulated until added to a sector.
    pub fn create_joint(
        &mut self,
        mut joint: Joint,
        a: Option<ObjectId>,
        b: Option<ObjectId>,
    ) -> Result<JointId, PhysicsError> {
        for id in [a, b].into_iter().flatten() {
            self.object_ref(id)?;
        }
        joint.bodies = [a, b];
        joint.soft_vertex = None;
        if matches!(joint.kind(), JointKind::SoftLinear | JointKind::SoftAngular) {
            let soft = [a, b]
                .into_iter()
                .flatten()
                .find_map(|id| self.objects.get(id).and_then(CollisionObject::as_soft_body))
                .ok_or_else(|| PhysicsError::NotSoftBody(a.or(b).unwrap_or_default()))?;
            let position = joint.transform().position;
            joint.soft_vertex = soft
                .nodes()
                .iter()
                .enumerate()
                .min_by(|(_, x), (_, y)| {
                    (x.position - position)
                        .norm_squared()
                        .total_cmp(&(y.position - position).norm_squared())
                })
                .map(|(i, _)| i);
        }
        joint.bind(self.joint_body_transforms(&joint));
        Ok(self.joints.insert(joint))
    }

    /// Transforms of the rigid bodies of a joint; other slots are world
    fn joint_body_transforms(&self, joint: &Joint) -> [Option<Transform>; 2] {
        joint.bodies.map(|slot| {
            slot.and_then(|id| self.objects.get(id))
                .filter(|o| o.as_rigid_body().is_some())
                .map(|o| *o.transform())
        })
    }

    /// Joint by handle
    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id)
    }

    /// Mutable joint by handle; call [`Self::rebuild_joint`] after moving
    /// its frame
    pub fn joint_mut(&mut self, id: JointId) -> Option<&mut Joint> {
        self.joints.get_mut(id)
    }

    /// Start simulating a joint in a sector
    pub fn add_joint(&mut self, sector: SectorId, id: JointId) -> Result<(), PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let joint = self.joints.get_mut(id).ok_or(PhysicsError::UnknownJoint(id))?;
        if joint.sector.is_some() {
            return Err(PhysicsError::JointAlreadyAdded(id));
        }
        joint.sector = Some(sector);
        target.joints.push(id);
        Ok(())
    }

    /// Destroy a joint
    pub fn remove_joint(&mut self, id: JointId) -> Result<Joint, PhysicsError> {
        let joint = self.joints.remove(id).ok_or(PhysicsError::UnknownJoint(id))?;
        if let Some(sector) = joint.sector.and_then(|s| self.sectors.get_mut(s)) {
            sector.joints.retain(|j| *j != id);
        }
        Ok(joint)
    }

    /// Re-bind a joint to the current body placements and repair it if
    /// it broke
    pub fn rebuild_joint(&mut self, id: JointId) -> Result<(), PhysicsError> {
        let joint = self.joints.get(id).ok_or(PhysicsError::UnknownJoint(id))?;
        let transforms = self.joint_body_transforms(joint);
        if let Some(joint) = self.joints.get_mut(id) {
            joint.bind(transforms);
        }
        Ok(())
    }

    // ---- Soft body anchors ----

    /// Make node `index` of a soft body follow a rigid body
    pub fn anchor_vertex_to_body(&mut self, soft: ObjectId, index: usize, rigid: ObjectId) -> Result<(), PhysicsError> {
        let body = self.object_ref(rigid)?;
        if body.as_rigid_body().is_none() {
            return Err(PhysicsError::NotRigidBody(rigid));
        }
        let transform = *body.transform();
        self.soft_body_mut(soft)?.anchor_vertex_to_body(index, rigid, &transform)
    }

    /// Move the anchor of node `index` to a world position
    ///
    /// Body anchors are re-based in the current frame of their body.
    pub fn update_anchor(&mut self, soft: ObjectId, index: usize, position: Vec3) -> Result<(), PhysicsError> {
        let body = self.object_ref(soft)?.as_soft_body().ok_or(PhysicsError::NotSoftBody(soft))?;
        let body_transform = match body.anchor(index) {
            Some(Anchor::Body { body, .. }) => self.objects.get(*body).map(|o| *o.transform()),
            Some(_) => None,
            None => return Err(PhysicsError::NoAnchor(index)),
        };
        self.soft_body_mut(soft)?.update_anchor(index, position, body_transform.as_ref())?;
        self.refresh_tree_entry(soft);
        Ok(())
    }

    fn soft_body_mut(&mut self, id: ObjectId) -> Result<&mut super::SoftBody, PhysicsError> {
        self.object_ref_mut(id)?.as_soft_body_mut().ok_or(PhysicsError::NotSoftBody(id))
    }

    // ---- Vehicles ----

    /// Register a vehicle; its chassis must be a rigid body
    pub fn create_vehicle(&mut self, vehicle: Vehicle) -> Result<VehicleId, PhysicsError> {
        let chassis = vehicle.chassis();
        if self.object_ref(chassis)?.as_rigid_body().is_none() {
            return Err(PhysicsError::NotRigidBody(chassis));
        }
        Ok(self.vehicles.insert(vehicle))
    }

    /// Vehicle by handle
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Mutable vehicle by handle, for driving inputs
    pub fn vehicle_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    /// Start simulating a vehicle in a sector
    pub fn add_vehicle(&mut self, sector: SectorId, id: VehicleId) -> Result<(), PhysicsError> {
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let vehicle = self.vehicles.get_mut(id).ok_or(PhysicsError::UnknownVehicle(id))?;
        if vehicle.sector.is_some() {
            return Err(PhysicsError::VehicleAlreadyAdded(id));
        }
        vehicle.sector = Some(sector);
        target.vehicles.push(id);
        Ok(())
    }

    /// Destroy a vehicle; the chassis object is kept
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Result<Vehicle, PhysicsError> {
        let vehicle = self.vehicles.remove(id).ok_or(PhysicsError::UnknownVehicle(id))?;
        if let Some(sector) = vehicle.sector.and_then(|s| self.sectors.get_mut(s)) {
            sector.vehicles.retain(|v| *v != id);
        }
        Ok(vehicle)
    }

    // ---- Portals ----

    /// Add a portal leaving `sector`
    pub fn add_portal(&mut self, sector: SectorId, portal: Portal) -> Result<PortalId, PhysicsError> {
        self.sector(portal.destination())?;
        let target = self.sectors.get_mut(sector).ok_or(PhysicsError::UnknownSector(sector))?;
        let id = self.portals.insert(portal);
        target.portals.push(id);
        Ok(id)
    }

    /// Portal by handle
    pub fn portal(&self, id: PortalId) -> Option<&Portal> {
        self.portals.get(id)
    }

    /// Destroy a portal
    pub fn remove_portal(&mut self, id: PortalId) -> Result<Portal, PhysicsError> {
        let portal = self.portals.remove(id).ok_or(PhysicsError::UnknownPortal(id))?;
        for sector in self.sectors.values_mut() {
            sector.portals.retain(|p| *p != id);
        }
        Ok(portal)
    }
}
