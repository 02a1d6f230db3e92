//! # quickfix Prelude
//!
//! The types most embedders need: the runtime and its collaborators, the module model, and
//! the patch protocol.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all quickfix operations
pub use crate::Error;

/// The result type used throughout quickfix
pub use crate::Result;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Module Model
// ================================================================================================

/// Immutable modules and their construction
pub use crate::metadata::{
    BytecodeBuilder, EntityId, MethodLiteral, MethodLiteralRc, Module, ModuleBuilder, ModuleKind,
    ModuleRc,
};

// ================================================================================================
// Runtime
// ================================================================================================

/// The runtime context and its collaborator contracts
pub use crate::runtime::{
    DefaultExecutor, EntryPointExecutor, FileModuleLoader, GarbageCollector, ManagedHeap,
    MemoryModuleLoader, ModuleLoader, ModuleParser, Runtime, StageOfHotReload,
};

/// Live VM objects
pub use crate::runtime::{
    Closure, ConstantPool, FunctionObject, FunctionTemplate, HeapObject, Method, MethodRc,
    ModuleRecord, ModuleStatus,
};

// ================================================================================================
// Patch Engine
// ================================================================================================

/// The patch protocol
pub use crate::patch::{
    MethodIdentityKey, PatchErrorCode, PatchInfo, PatchQuery, PatchSource, PatchState,
    QuickFixConfig, QuickFixManager,
};
