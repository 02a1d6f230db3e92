//! Patch sessions.
//!
//! A [`PatchInfo`] is the bookkeeping of one active patch: created by a Load, kept while the
//! patch is active, consumed by the matching Unload. It holds everything needed to put the
//! base module back the way it was.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use strum::Display;

use crate::{
    metadata::{method::MethodLiteralRc, token::EntityId},
    patch::identity::MethodIdentityKey,
    runtime::ScopedHandle,
};

/// Which variant of a constant pool a slot lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum PoolVariant {
    /// The shared pool
    Shared,
    /// The unshared copy of the pool
    Unshared,
}

/// Where a spliced method physically lives in the base module
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaseMethodSlot {
    /// Compile unit of the pool
    pub constpool: u32,
    /// Slot within the pool
    pub slot: usize,
    /// Index of the function template when the slot holds a class literal
    pub literal: Option<usize>,
    /// Pool variant
    pub variant: PoolVariant,
}

impl BaseMethodSlot {
    /// Slot holding a method directly
    #[must_use]
    pub fn method(constpool: u32, slot: usize, variant: PoolVariant) -> Self {
        BaseMethodSlot {
            constpool,
            slot,
            literal: None,
            variant,
        }
    }

    /// Template `literal` of the class literal in a slot
    #[must_use]
    pub fn template(constpool: u32, slot: usize, literal: usize, variant: PoolVariant) -> Self {
        BaseMethodSlot {
            constpool,
            slot,
            literal: Some(literal),
            variant,
        }
    }
}

impl fmt::Display for BaseMethodSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}[{}]", self.variant, self.constpool, self.slot)?;
        if let Some(literal) = self.literal {
            write!(f, ".{literal}")?;
        }
        Ok(())
    }
}

/// A method as the relinker sees it: the id and module file a descriptor currently reports
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplacedMethod {
    /// Method id
    pub method_id: EntityId,
    /// Module file name
    pub file_name: String,
}

impl ReplacedMethod {
    /// Creates a new key
    #[must_use]
    pub fn new(method_id: EntityId, file_name: &str) -> Self {
        ReplacedMethod {
            method_id,
            file_name: file_name.to_string(),
        }
    }
}

/// The bookkeeping of one active patch
#[derive(Debug)]
pub struct PatchInfo {
    /// Patch module file name
    pub patch_file_name: String,
    /// Base module file name
    pub base_file_name: String,
    /// The catalog: patch method literal per identity key
    pub patch_methods: HashMap<MethodIdentityKey, MethodLiteralRc>,
    /// The rollback table: the base literal each spliced slot originally executed
    pub base_methods: BTreeMap<BaseMethodSlot, MethodLiteralRc>,
    /// Record each currently installed method belongs to, by what the method reports
    pub replaced_methods: HashMap<ReplacedMethod, String>,
    /// Records whose entry point runs on Load and Unload
    pub replaced_record_names: BTreeSet<String>,
    /// Base pools kept alive while the patch is active
    pub base_constpools: Vec<ScopedHandle>,
    /// True if the patch applies through substitution because the base had not executed
    pub cold: bool,
}

impl PatchInfo {
    /// Creates an empty session
    #[must_use]
    pub fn new(patch_file_name: &str, base_file_name: &str) -> Self {
        PatchInfo {
            patch_file_name: patch_file_name.to_string(),
            base_file_name: base_file_name.to_string(),
            patch_methods: HashMap::new(),
            base_methods: BTreeMap::new(),
            replaced_methods: HashMap::new(),
            replaced_record_names: BTreeSet::new(),
            base_constpools: Vec::new(),
            cold: false,
        }
    }

    /// Number of spliced base slots
    #[must_use]
    pub fn spliced_count(&self) -> usize {
        self.base_methods.len()
    }
}
