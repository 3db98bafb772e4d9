//! Collision groups for filtering contacts
//!
//! Each group owns one bit of a 16-bit mask and keeps the mask of groups it
//! collides with. Pair flags are kept symmetric: enabling or disabling a
//! pair updates both groups.

use bitflags::bitflags;

use super::PhysicsError;

/// Maximum number of collision groups per system
pub const MAX_COLLISION_GROUPS: usize = 16;

/// Name of the group every object starts in
pub const DEFAULT_GROUP_NAME: &str = "Default";

bitflags! {
    /// One bit per collision group
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GroupMask: u16 {
        /// The default group
        const DEFAULT = 1;
        /// Every group
        const ALL = u16::MAX;
    }
}

/// Index of a collision group in its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CollisionGroupId(u8);

impl CollisionGroupId {
    /// The default group
    pub const DEFAULT: Self = Self(0);

    /// Table index
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Bit of this group
    pub fn value(self) -> GroupMask {
        GroupMask::from_bits_retain(1 << self.0)
    }
}

/// A named collision filter class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionGroup {
    name: String,
    id: CollisionGroupId,
    mask: GroupMask,
}

impl CollisionGroup {
    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group id
    pub fn id(&self) -> CollisionGroupId {
        self.id
    }

    /// Bit of this group
    pub fn value(&self) -> GroupMask {
        self.id.value()
    }

    /// Groups this one collides with
    pub fn mask(&self) -> GroupMask {
        self.mask
    }
}

/// Table of the collision groups of a physics system
#[derive(Debug, Clone)]
pub struct CollisionGroupTable {
    groups: Vec<CollisionGroup>,
}

impl Default for CollisionGroupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionGroupTable {
    /// Table holding only the default group
    pub fn new() -> Self {
        Self {
            groups: vec![CollisionGroup {
                name: DEFAULT_GROUP_NAME.to_string(),
                id: CollisionGroupId::DEFAULT,
                mask: GroupMask::ALL,
            }],
        }
    }

    /// Create a group that collides with every group
    ///
    /// Creating an existing name returns the existing group.
    pub fn create_group(&mut self, name: &str) -> Result<CollisionGroupId, PhysicsError> {
        if let Some(id) = self.find_group(name) {
            return Ok(id);
        }
        if self.groups.len() >= MAX_COLLISION_GROUPS {
            log::warn!("cannot create collision group '{name}': limit of {MAX_COLLISION_GROUPS} reached");
            return Err(PhysicsError::TooManyGroups {
                max: MAX_COLLISION_GROUPS,
            });
        }
        // Bounded by MAX_COLLISION_GROUPS
        let id = CollisionGroupId(self.groups.len() as u8);
        self.groups.push(CollisionGroup {
            name: name.to_string(),
            id,
            mask: GroupMask::ALL,
        });
        log::debug!("created collision group '{name}' ({})", id.index());
        Ok(id)
    }

    /// Look up a group by name
    pub fn find_group(&self, name: &str) -> Option<CollisionGroupId> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    /// Group by id
    pub fn group(&self, id: CollisionGroupId) -> Option<&CollisionGroup> {
        self.groups.get(id.index())
    }

    /// Number of groups, the default group included
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false; the default group cannot be removed
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Enable or disable collisions between two groups, in both directions
    pub fn set_group_collision(&mut self, a: CollisionGroupId, b: CollisionGroupId, enabled: bool) -> Result<(), PhysicsError> {
        self.check(a)?;
        self.check(b)?;
        let (bit_a, bit_b) = (a.value(), b.value());
        self.groups[a.index()].mask.set(bit_b, enabled);
        self.groups[b.index()].mask.set(bit_a, enabled);
        Ok(())
    }

    /// Whether objects of the two groups collide
    pub fn group_collision(&self, a: CollisionGroupId, b: CollisionGroupId) -> bool {
        self.group(a).is_some_and(|g| g.mask.contains(b.value()))
    }

    fn check(&self, id: CollisionGroupId) -> Result<(), PhysicsError> {
        if id.index() < self.groups.len() {
            Ok(())
        } else {
            Err(PhysicsError::UnknownGroup(format!("#{}", id.index())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_collides_with_everything() {
        let table = CollisionGroupTable::new();
        let default = table.find_group(DEFAULT_GROUP_NAME).unwrap();
        assert_eq!(default, CollisionGroupId::DEFAULT);
        assert_eq!(default.value(), GroupMask::DEFAULT);
        assert!(table.group_collision(default, default));
    }

    #[test]
    fn test_new_groups_are_symmetric_and_enabled() {
        let mut table = CollisionGroupTable::new();
        let a = table.create_group("A").unwrap();
        let b = table.create_group("B").unwrap();
        assert_eq!(a.value().bits(), 1 << 1);
        assert!(table.group_collision(a, b) && table.group_collision(b, a));

        table.set_group_collision(a, b, false).unwrap();
        assert!(!table.group_collision(a, b));
        assert!(!table.group_collision(b, a));
        assert!(table.group_collision(a, CollisionGroupId::DEFAULT));

        table.set_group_collision(b, a, true).unwrap();
        assert!(table.group_collision(a, b));
    }

    #[test]
    fn test_group_limit() {
        let mut table = CollisionGroupTable::new();
        for i in 1..MAX_COLLISION_GROUPS {
            table.create_group(&format!("g{i}")).unwrap();
        }
        assert_eq!(table.len(), MAX_COLLISION_GROUPS);
        assert_eq!(
            table.create_group("one too many"),
            Err(PhysicsError::TooManyGroups { max: MAX_COLLISION_GROUPS })
        );
        // Existing names still resolve
        assert!(table.create_group("g3").is_ok());
    }
}
