//! The immutable compiled-module model.
//!
//! A [`Module`] is what a [`crate::runtime::ModuleLoader`] produces from a container file: the
//! method literals, literal buffers and strings it defines, keyed by [`EntityId`], the index
//! headers that resolve the 16-bit ids embedded in bytecode, and the list of records (source
//! modules) merged into it.
//!
//! Modules never change after loading. Everything a patch mutates lives in the runtime
//! ([`crate::runtime::Method`], [`crate::runtime::ConstantPool`]).

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use strum::Display;

use crate::{
    metadata::{
        literal::LiteralBufferRc,
        method::MethodLiteralRc,
        token::EntityId,
    },
    Error::InvalidEntity,
    Result,
};

/// Name of the function that holds a record's top-level statements
pub const ENTRY_FUNCTION_NAME: &str = "func_main_0";
/// Bootstrap function a patch compiler emits to run top-level statements on load
pub const PATCH_FUNCTION_NAME_0: &str = "patch_main_0";
/// Bootstrap function a patch compiler emits to run top-level statements on unload
pub const PATCH_FUNCTION_NAME_1: &str = "patch_main_1";

/// Container layout of a module
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum ModuleKind {
    /// Mergeable container holding one or more ES module records
    #[default]
    Merged,
    /// Single-script bundle; cannot take part in hot patching
    Bundle,
}

/// Map of method literals keyed by entity id
pub type MethodLiteralMap = SkipMap<EntityId, MethodLiteralRc>;
/// Map of literal buffers keyed by entity id
pub type LiteralBufferMap = SkipMap<EntityId, LiteralBufferRc>;
/// Map of string constants keyed by entity id
pub type StringMap = SkipMap<EntityId, Arc<str>>;
/// Append-only list of record names
pub type RecordList = Arc<boxcar::Vec<String>>;

/// A loaded, immutable compiled module
pub struct Module {
    pub(crate) name: String,
    pub(crate) kind: ModuleKind,
    pub(crate) file_size: u32,
    pub(crate) entry_function_name: String,
    pub(crate) methods: MethodLiteralMap,
    pub(crate) literals: LiteralBufferMap,
    pub(crate) strings: StringMap,
    pub(crate) index_headers: Vec<Vec<EntityId>>,
    pub(crate) records: RecordList,
}

/// A reference to a `Module`
pub type ModuleRc = Arc<Module>;

impl Module {
    /// File name the module was loaded from
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container layout
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// True if the module can be hot patched (not a bundle)
    #[must_use]
    pub fn is_mergeable(&self) -> bool {
        self.kind == ModuleKind::Merged
    }

    /// Size of the container in bytes; every valid entity id lies below it
    #[must_use]
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Name of the designated entry-point function
    #[must_use]
    pub fn entry_function_name(&self) -> &str {
        &self.entry_function_name
    }

    /// Number of compile units, and so of constant pools, in this module
    #[must_use]
    pub fn constpool_count(&self) -> u32 {
        u32::try_from(self.index_headers.len()).unwrap_or(u32::MAX)
    }

    fn check_entity(&self, id: EntityId) -> Result<()> {
        if !id.is_valid() || id.offset() >= self.file_size {
            return Err(InvalidEntity(id));
        }
        Ok(())
    }

    /// Returns the method literal with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEntity`] if the id is invalid, lies beyond the module,
    /// or does not name a method
    pub fn method(&self, id: EntityId) -> Result<MethodLiteralRc> {
        self.check_entity(id)?;
        match self.methods.get(&id) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(InvalidEntity(id)),
        }
    }

    /// Iterates over all method literals in id order
    pub fn methods(&self) -> impl Iterator<Item = MethodLiteralRc> + '_ {
        self.methods.iter().map(|entry| entry.value().clone())
    }

    /// Number of method literals
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Returns the literal buffer with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEntity`] if the id does not name a literal buffer
    pub fn literal(&self, id: EntityId) -> Result<LiteralBufferRc> {
        self.check_entity(id)?;
        match self.literals.get(&id) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(InvalidEntity(id)),
        }
    }

    /// Returns the string constant with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEntity`] if the id does not name a string
    pub fn string(&self, id: EntityId) -> Result<Arc<str>> {
        self.check_entity(id)?;
        match self.strings.get(&id) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(InvalidEntity(id)),
        }
    }

    /// Resolves a 16-bit id operand through the index header of a compile unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the compile unit does not exist or the index is out of range
    pub fn resolve_index(&self, constpool_index: u32, index: u16) -> Result<EntityId> {
        let Some(header) = self.index_headers.get(constpool_index as usize) else {
            return Err(malformed_error!(
                "Module {} has no index header {}",
                self.name,
                constpool_index
            ));
        };

        match header.get(usize::from(index)) {
            Some(id) => Ok(*id),
            None => Err(malformed_error!(
                "Index {} out of range for header {} of {}",
                index,
                constpool_index,
                self.name
            )),
        }
    }

    /// Number of slots of a compile unit's constant pool
    #[must_use]
    pub fn constpool_len(&self, constpool_index: u32) -> usize {
        self.index_headers
            .get(constpool_index as usize)
            .map_or(0, Vec::len)
    }

    /// Iterates over the names of all records merged into this module
    pub fn records(&self) -> impl Iterator<Item = &String> + '_ {
        self.records.iter().map(|(_, name)| name)
    }

    /// True if `record_name` is merged into this module
    #[must_use]
    pub fn has_record(&self, record_name: &str) -> bool {
        self.records().any(|name| name == record_name)
    }

    /// Returns the entry function of a record
    #[must_use]
    pub fn entry_method(&self, record_name: &str) -> Option<MethodLiteralRc> {
        self.methods().find(|method| {
            method.record_name == record_name && method.is_entry(&self.entry_function_name)
        })
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("file_size", &self.file_size)
            .field("methods", &self.methods.len())
            .field("literals", &self.literals.len())
            .field("constpools", &self.index_headers.len())
            .finish_non_exhaustive()
    }
}
