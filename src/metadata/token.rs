//! Entity identifiers of compiled modules.

use std::fmt;
use std::hash::{Hash, Hasher};

/// The identifier of an entity (method, literal buffer, string) inside a compiled module.
///
/// An entity id is the byte offset of the entity within its module file. It is only
/// meaningful together with the module it was read from: the same method compiled into a
/// base and a patch module has two unrelated ids, which is why methods are matched across
/// modules by [`crate::patch::MethodIdentityKey`] and never by id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    /// The id reserved for "no entity"
    pub const INVALID: EntityId = EntityId(u32::MAX);

    /// Creates a new entity id from a raw file offset
    #[must_use]
    pub fn new(offset: u32) -> Self {
        EntityId(offset)
    }

    /// Returns the raw file offset
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.0
    }

    /// Returns true if this id can point at an entity at all.
    ///
    /// Offset zero is the module header and [`EntityId::INVALID`] is the sentinel, neither
    /// can ever name an entity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0 != 0 && self.0 != u32::MAX
    }
}

impl From<u32> for EntityId {
    fn from(value: u32) -> Self {
        EntityId(value)
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId(0x{:08x})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_entity_new() {
        let id = EntityId::new(0x0000_0120);
        assert_eq!(id.offset(), 0x120);
    }

    #[test]
    fn test_entity_is_valid() {
        assert!(EntityId(0x40).is_valid());
        assert!(!EntityId(0).is_valid());
        assert!(!EntityId::INVALID.is_valid());
    }

    #[test]
    fn test_entity_from_conversion() {
        let value = 0x0000_1000_u32;
        let id: EntityId = value.into();
        assert_eq!(id.offset(), value);

        let back_to_u32: u32 = id.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_entity_display() {
        assert_eq!(format!("{}", EntityId(0x120)), "0x00000120");
        assert_eq!(format!("{:?}", EntityId(0x120)), "EntityId(0x00000120)");
    }

    #[test]
    fn test_entity_ordering() {
        let id1 = EntityId(0x100);
        let id2 = EntityId(0x200);

        assert!(id1 < id2);
        assert_ne!(id1, id2);
        assert_eq!(id1, EntityId(0x100));
    }

    #[test]
    fn test_entity_hash() {
        let mut map = HashMap::new();
        map.insert(EntityId(0x100), "foo");
        map.insert(EntityId(0x200), "bar");

        assert_eq!(map.get(&EntityId(0x100)), Some(&"foo"));
        assert_eq!(map.get(&EntityId(0x200)), Some(&"bar"));
        assert_eq!(map.get(&EntityId(0x300)), None);
    }
}
