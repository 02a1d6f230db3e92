//! The compiled-module model.
//!
//! Everything in here is immutable once a module is loaded and is shared freely between
//! threads. Two independently compiled modules (a base and its patch) are two unrelated
//! [`Module`]s: their [`EntityId`]s share nothing, which is why the patch engine matches
//! methods by name-based identity rather than by id.
//!
//! # Key Types
//! - [`Module`] - a loaded module and its entity tables
//! - [`MethodLiteral`] - one compiled function
//! - [`LiteralBuffer`] - a literal buffer (class member lists)
//! - [`EntityId`] - file-local entity identifier
//! - [`ModuleBuilder`], [`BytecodeBuilder`] - in-memory construction

mod builder;
pub mod literal;
pub mod method;
pub mod module;
pub mod token;

pub use builder::{Arg, BytecodeBuilder, ModuleBuilder};
pub use literal::{LiteralBuffer, LiteralBufferRc, LiteralEntry, LiteralTag, LiteralValue};
pub use method::{
    CallField, CallFlags, FunctionKind, LiteralFlags, LiteralInfo, MethodLiteral, MethodLiteralRc,
};
pub use module::{
    Module, ModuleKind, ModuleRc, ENTRY_FUNCTION_NAME, PATCH_FUNCTION_NAME_0,
    PATCH_FUNCTION_NAME_1,
};
pub use token::EntityId;
