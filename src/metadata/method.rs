//! Immutable method literals and the flag types shared with live method descriptors.
//!
//! A [`MethodLiteral`] is what a compiled module stores for every function it contains:
//! bytecode, call-dispatch metadata, literal info and function kind. Live descriptors
//! ([`crate::runtime::Method`]) are materialized from literals and, during a patch, re-pointed
//! at the literals of another module.
//!
//! # Key Types
//! - [`MethodLiteral`] - one compiled function
//! - [`CallField`], [`CallFlags`] - call-dispatch metadata
//! - [`LiteralInfo`], [`LiteralFlags`] - method id, register count, literal flags
//! - [`FunctionKind`] - kind established by class linking

use std::sync::Arc;

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::metadata::token::EntityId;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Call-dispatch flags of a method
    pub struct CallFlags: u32 {
        /// Method receives `this`
        const HAVE_THIS = 0x0001;
        /// Method receives `new.target`
        const HAVE_NEW_TARGET = 0x0002;
        /// Method receives extra arguments
        const HAVE_EXTRA = 0x0004;
        /// Method receives the callee function object
        const HAVE_FUNC = 0x0008;
        /// Method is implemented natively
        const IS_NATIVE = 0x0010;
        /// Method is a fast builtin
        const IS_FAST_BUILTIN = 0x0020;
        /// Method calls into native API
        const IS_CALL_NAPI = 0x0040;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Literal flags of a method
    pub struct LiteralFlags: u32 {
        /// Method is shared between threads
        const IS_SHARED = 0x0001;
        /// Method carries debug information
        const HAS_DEBUG_INFO = 0x0002;
        /// Method does not allocate
        const IS_NO_GC = 0x0004;
        /// Method has a deoptimization history
        const HAS_DEOPT = 0x0008;
    }
}

/// Call-dispatch metadata copied by the splicer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallField {
    /// Dispatch flags
    pub flags: CallFlags,
    /// Declared argument count
    pub num_args: u32,
}

impl Default for CallField {
    fn default() -> Self {
        CallField {
            flags: CallFlags::HAVE_FUNC | CallFlags::HAVE_NEW_TARGET | CallFlags::HAVE_THIS,
            num_args: 0,
        }
    }
}

/// Literal information of a method.
///
/// The method id lives here, so splicing the literal info of another module's method into a
/// live descriptor also changes which id (and through its constant pool, which module) the
/// descriptor reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LiteralInfo {
    /// Id of the method inside its module
    pub method_id: EntityId,
    /// Number of virtual registers the bytecode uses
    pub num_vregs: u32,
    /// Literal flags
    pub flags: LiteralFlags,
}

/// Function kind of a method.
///
/// The kind is established by class linking (building inheritance, defining accessors), so it
/// is deliberately never copied by a splice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum FunctionKind {
    /// Plain function
    #[default]
    NormalFunction,
    /// Arrow function
    ArrowFunction,
    /// Constructor of a class without `extends`
    BaseConstructor,
    /// Constructor of a derived class
    DerivedConstructor,
    /// Class method
    ClassMethod,
    /// Accessor (getter or setter)
    Accessor,
    /// Generator function
    Generator,
    /// Async function
    AsyncFunction,
    /// Async generator function
    AsyncGenerator,
}

/// One compiled function of a module
#[derive(Debug)]
pub struct MethodLiteral {
    /// Id of the method inside its module
    pub id: EntityId,
    /// Record (source module) the method belongs to
    pub record_name: String,
    /// Display name as emitted by the compiler, including owner path markers
    pub name: String,
    /// Raw bytecode
    pub bytecode: Arc<[u8]>,
    /// Call-dispatch metadata
    pub call_field: CallField,
    /// Literal information
    pub literal_info: LiteralInfo,
    /// Function kind
    pub function_kind: FunctionKind,
    /// Index of the compile unit this method belongs to. It selects both the constant pool
    /// the method resolves against and the index header that resolves 16-bit ids in its
    /// bytecode.
    pub constpool_index: u32,
}

/// A reference to a `MethodLiteral`
pub type MethodLiteralRc = Arc<MethodLiteral>;

impl MethodLiteral {
    /// Returns true if this literal is the top-level entry function called `entry_name`
    #[must_use]
    pub fn is_entry(&self, entry_name: &str) -> bool {
        self.name == entry_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_field_default() {
        let field = CallField::default();
        assert!(field.flags.contains(CallFlags::HAVE_THIS));
        assert!(!field.flags.contains(CallFlags::IS_NATIVE));
        assert_eq!(field.num_args, 0);
    }

    #[test]
    fn function_kind_display() {
        assert_eq!(FunctionKind::BaseConstructor.to_string(), "BaseConstructor");
        assert_eq!(FunctionKind::default(), FunctionKind::NormalFunction);
    }
}
