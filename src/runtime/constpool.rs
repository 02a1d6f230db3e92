//! Resolved constant pools.
//!
//! One pool exists per compile unit of a module once that unit has started executing. Slot
//! `i` caches the runtime object for entry `i` of the unit's index header: a method
//! descriptor, a class literal, or a string. Pools may additionally own an unshared variant,
//! a private copy created the first time a shared pool is written to; the patch engine scans
//! both.

use std::sync::{Arc, RwLock};

use crate::{
    metadata::token::EntityId,
    runtime::{function::FunctionTemplateRc, method::MethodRc},
};

/// The member templates of a class, materialized from its literal buffer
#[derive(Debug)]
pub struct ClassLiteral {
    /// Id of the literal buffer
    pub literal_id: EntityId,
    /// One template per method-carrying entry of the buffer, in buffer order
    pub templates: Vec<FunctionTemplateRc>,
}

/// A reference to a `ClassLiteral`
pub type ClassLiteralRc = Arc<ClassLiteral>;

/// One cached constant-pool entry
#[derive(Debug, Clone, Default)]
pub enum ConstantSlot {
    /// Not resolved yet
    #[default]
    Empty,
    /// A method descriptor
    Method(MethodRc),
    /// A class literal
    ClassLiteral(ClassLiteralRc),
    /// A string
    String(Arc<str>),
}

/// A resolved constant pool
#[derive(Debug)]
pub struct ConstantPool {
    module_name: String,
    index: u32,
    slots: RwLock<Vec<ConstantSlot>>,
    unshared: RwLock<Option<ConstantPoolRc>>,
}

/// A reference to a `ConstantPool`
pub type ConstantPoolRc = Arc<ConstantPool>;

impl ConstantPool {
    /// Creates an empty pool with `len` slots for compile unit `index` of `module_name`
    #[must_use]
    pub fn new(module_name: &str, index: u32, len: usize) -> Self {
        ConstantPool {
            module_name: module_name.to_string(),
            index,
            slots: RwLock::new(vec![ConstantSlot::Empty; len]),
            unshared: RwLock::new(None),
        }
    }

    /// File name of the module this pool belongs to
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Index of the compile unit
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.slots).len()
    }

    /// True if the pool has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read_lock!(self.slots).is_empty()
    }

    /// Returns the content of slot `index`, `Empty` if out of range
    #[must_use]
    pub fn slot(&self, index: usize) -> ConstantSlot {
        read_lock!(self.slots)
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Stores `value` in slot `index`; out-of-range writes are ignored
    pub fn set_slot(&self, index: usize, value: ConstantSlot) {
        if let Some(slot) = write_lock!(self.slots).get_mut(index) {
            *slot = value;
        }
    }

    /// All slots holding a method, with their slot index
    #[must_use]
    pub fn methods(&self) -> Vec<(usize, MethodRc)> {
        read_lock!(self.slots)
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                ConstantSlot::Method(method) => Some((index, method.clone())),
                _ => None,
            })
            .collect()
    }

    /// All slots holding a class literal, with their slot index
    #[must_use]
    pub fn class_literals(&self) -> Vec<(usize, ClassLiteralRc)> {
        read_lock!(self.slots)
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                ConstantSlot::ClassLiteral(literal) => Some((index, literal.clone())),
                _ => None,
            })
            .collect()
    }

    /// Copies the slots into a new pool of the same unit
    #[must_use]
    pub fn duplicate(&self) -> ConstantPool {
        ConstantPool {
            module_name: self.module_name.clone(),
            index: self.index,
            slots: RwLock::new(read_lock!(self.slots).clone()),
            unshared: RwLock::new(None),
        }
    }

    /// The unshared variant, if one was created
    #[must_use]
    pub fn unshared(&self) -> Option<ConstantPoolRc> {
        read_lock!(self.unshared).clone()
    }

    /// Installs the unshared variant
    pub fn set_unshared(&self, pool: ConstantPoolRc) {
        *write_lock!(self.unshared) = Some(pool);
    }
}
