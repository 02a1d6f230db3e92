//! Literal buffers.
//!
//! A class definition instruction references a literal buffer that lists the class's
//! prototype members: alternating keys and values, where method values are tagged
//! [`LiteralTag::Method`] or [`LiteralTag::GeneratorMethod`] and carry the member's method id.
//! This is the only place a method's owning class can be recovered from.

use std::sync::Arc;

use strum::{Display, EnumIter, FromRepr};

use crate::metadata::token::EntityId;

/// Tag of a literal buffer entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum LiteralTag {
    /// Tag value entry
    TagValue = 0x00,
    /// Boolean
    Bool = 0x01,
    /// Integer
    Integer = 0x02,
    /// Double
    Double = 0x04,
    /// String id
    String = 0x05,
    /// Method id
    Method = 0x06,
    /// Generator method id
    GeneratorMethod = 0x07,
    /// Accessor
    Accessor = 0x08,
    /// Method affiliate (argument count)
    MethodAffiliate = 0x09,
    /// Getter method id
    Getter = 0x0A,
    /// Setter method id
    Setter = 0x0B,
    /// Async generator method id
    AsyncGeneratorMethod = 0x16,
    /// Null
    Null = 0xFF,
}

/// Value of a literal buffer entry
#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Integer(i64),
    /// Double
    Double(f64),
    /// String
    String(String),
    /// Method id (for every method-like tag)
    Method(EntityId),
    /// Method affiliate (argument count)
    Affiliate(u16),
    /// Null / tag value
    Null,
}

/// One entry of a literal buffer
#[derive(Clone, Debug, PartialEq)]
pub struct LiteralEntry {
    /// Entry tag
    pub tag: LiteralTag,
    /// Entry value
    pub value: LiteralValue,
}

impl LiteralEntry {
    /// Returns the method id if this entry is tagged as a method or generator method
    #[must_use]
    pub fn class_member_method(&self) -> Option<EntityId> {
        match (self.tag, &self.value) {
            (LiteralTag::Method | LiteralTag::GeneratorMethod, LiteralValue::Method(id)) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Returns the method id for any method-carrying entry
    #[must_use]
    pub fn method(&self) -> Option<EntityId> {
        match self.value {
            LiteralValue::Method(id) => Some(id),
            _ => None,
        }
    }
}

/// A literal buffer of a module
#[derive(Clone, Debug, PartialEq)]
pub struct LiteralBuffer {
    /// Id of the buffer inside its module
    pub id: EntityId,
    /// The entries, in declaration order
    pub entries: Vec<LiteralEntry>,
}

/// A reference to a `LiteralBuffer`
pub type LiteralBufferRc = Arc<LiteralBuffer>;

impl LiteralBuffer {
    /// Iterates over the method ids of all class member methods in this buffer
    pub fn class_member_methods(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries
            .iter()
            .filter_map(LiteralEntry::class_member_method)
    }

    /// Iterates over every method id referenced by this buffer
    pub fn methods(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries.iter().filter_map(LiteralEntry::method)
    }
}
