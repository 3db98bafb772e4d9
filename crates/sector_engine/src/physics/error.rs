//! Physics error types

use super::{JointId, ObjectId, PortalId, SectorId, VehicleId};

/// Errors reported at the boundaries of the physics layer
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    /// All collision group slots are taken
    #[error("Too many collision groups (at most {max})")]
    TooManyGroups {
        /// Group limit
        max: usize,
    },

    /// No group with that name or index exists
    #[error("Unknown collision group: {0}")]
    UnknownGroup(String),

    /// The object handle is stale
    #[error("Unknown collision object: {0:?}")]
    UnknownObject(ObjectId),

    /// The sector handle is stale
    #[error("Unknown collision sector: {0:?}")]
    UnknownSector(SectorId),

    /// The joint handle is stale
    #[error("Unknown joint: {0:?}")]
    UnknownJoint(JointId),

    /// The vehicle handle is stale
    #[error("Unknown vehicle: {0:?}")]
    UnknownVehicle(VehicleId),

    /// The portal handle is stale
    #[error("Unknown portal: {0:?}")]
    UnknownPortal(PortalId),

    /// The object already belongs to a sector
    #[error("Object {object:?} is already in sector {sector:?}")]
    AlreadyInSector {
        /// Object being added
        object: ObjectId,
        /// Sector that owns it
        sector: SectorId,
    },

    /// The object is not part of the sector
    #[error("Object {object:?} is not in sector {sector:?}")]
    NotInSector {
        /// Object being removed
        object: ObjectId,
        /// Sector it was expected in
        sector: SectorId,
    },

    /// The joint was already added to a sector
    #[error("Joint {0:?} was already added to a sector")]
    JointAlreadyAdded(JointId),

    /// The vehicle was already added to a sector
    #[error("Vehicle {0:?} was already added to a sector")]
    VehicleAlreadyAdded(VehicleId),

    /// Concave meshes, terrains and planes can only back static bodies
    #[error("Collider '{0}' can only be used by static bodies")]
    StaticOnlyCollider(&'static str),

    /// The object is not a rigid body
    #[error("Object {0:?} is not a rigid body")]
    NotRigidBody(ObjectId),

    /// The object is not a soft body
    #[error("Object {0:?} is not a soft body")]
    NotSoftBody(ObjectId),

    /// Soft body vertex index past the node count
    #[error("Vertex index {index} out of range (soft body has {count} nodes)")]
    VertexOutOfRange {
        /// Requested index
        index: usize,
        /// Node count
        count: usize,
    },

    /// Removing an anchor that does not exist
    #[error("Vertex {0} has no anchor")]
    NoAnchor(usize),

    /// Material coefficient outside its valid range
    #[error("Invalid value {value} for soft body {name}")]
    InvalidMaterial {
        /// Coefficient name
        name: &'static str,
        /// Rejected value
        value: f32,
    },

    /// Wheel, brake or steering device index out of range
    #[error("Invalid {what} index {index} (vehicle has {count})")]
    InvalidVehicleIndex {
        /// "wheel", "brake" or "steering device"
        what: &'static str,
        /// Requested index
        index: usize,
        /// Number available
        count: usize,
    },

    /// Shape data that cannot produce a collider
    #[error("Degenerate collider: {0}")]
    DegenerateCollider(String),
}
