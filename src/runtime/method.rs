//! Live method descriptors.
//!
//! A [`Method`] is the mutable, shared object the VM executes. Closures and function
//! templates point at it, so a patch never replaces a descriptor: it rewrites the
//! descriptor's code-bearing fields in place, behind the descriptor's lock, and the
//! descriptor keeps its address for its whole life.

use std::sync::{Arc, RwLock, Weak};

use crate::{
    metadata::{
        method::{CallField, FunctionKind, LiteralInfo, MethodLiteralRc},
        token::EntityId,
    },
    runtime::constpool::{ConstantPool, ConstantPoolRc},
};

/// The mutable fields of a live descriptor
#[derive(Debug, Clone)]
pub struct MethodState {
    /// Call-dispatch metadata
    pub call_field: CallField,
    /// Literal info, including the method id
    pub literal_info: LiteralInfo,
    /// The method literal whose code is currently installed
    pub code_entry: MethodLiteralRc,
    /// The installed bytecode
    pub bytecode: Arc<[u8]>,
    /// Constant pool the bytecode resolves against. Pools are owned by the runtime's pool cache.
    pub constpool: Weak<ConstantPool>,
    /// Function kind, owned by class linking
    pub function_kind: FunctionKind,
    /// True once ahead-of-time compiled code is installed
    pub aot_compiled: bool,
    /// Frame-pointer delta of compiled code
    pub fp_delta: i32,
}

/// A live method descriptor
#[derive(Debug)]
pub struct Method {
    state: RwLock<MethodState>,
}

/// A reference to a `Method`
pub type MethodRc = Arc<Method>;

impl Method {
    /// Materializes a descriptor from a method literal, bound to `constpool`
    #[must_use]
    pub fn new(literal: &MethodLiteralRc, constpool: &ConstantPoolRc) -> Self {
        Method {
            state: RwLock::new(MethodState {
                call_field: literal.call_field,
                literal_info: literal.literal_info,
                code_entry: literal.clone(),
                bytecode: literal.bytecode.clone(),
                constpool: Arc::downgrade(constpool),
                function_kind: literal.function_kind,
                aot_compiled: false,
                fp_delta: 0,
            }),
        }
    }

    /// Returns a copy of the current state
    #[must_use]
    pub fn state(&self) -> MethodState {
        read_lock!(self.state).clone()
    }

    /// Applies `f` to the state under the write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut MethodState) -> R) -> R {
        with_write!(self.state, f)
    }

    /// Id of the method in the module it currently executes from
    #[must_use]
    pub fn method_id(&self) -> EntityId {
        read_lock!(self.state).literal_info.method_id
    }

    /// Currently installed bytecode
    #[must_use]
    pub fn bytecode(&self) -> Arc<[u8]> {
        read_lock!(self.state).bytecode.clone()
    }

    /// Method literal whose code is currently installed
    #[must_use]
    pub fn code_entry(&self) -> MethodLiteralRc {
        read_lock!(self.state).code_entry.clone()
    }

    /// Display name of the installed code
    #[must_use]
    pub fn name(&self) -> String {
        read_lock!(self.state).code_entry.name.clone()
    }

    /// Call-dispatch metadata
    #[must_use]
    pub fn call_field(&self) -> CallField {
        read_lock!(self.state).call_field
    }

    /// Literal info
    #[must_use]
    pub fn literal_info(&self) -> LiteralInfo {
        read_lock!(self.state).literal_info
    }

    /// Function kind
    #[must_use]
    pub fn function_kind(&self) -> FunctionKind {
        read_lock!(self.state).function_kind
    }

    /// Sets the function kind; only class linking does this
    pub fn set_function_kind(&self, kind: FunctionKind) {
        write_lock!(self.state).function_kind = kind;
    }

    /// True if ahead-of-time compiled code is installed
    #[must_use]
    pub fn is_aot_compiled(&self) -> bool {
        read_lock!(self.state).aot_compiled
    }

    /// Marks compiled code as installed, with its frame-pointer delta
    pub fn set_aot_compiled(&self, fp_delta: i32) {
        let mut state = write_lock!(self.state);
        state.aot_compiled = true;
        state.fp_delta = fp_delta;
    }

    /// Frame-pointer delta of compiled code
    #[must_use]
    pub fn fp_delta(&self) -> i32 {
        read_lock!(self.state).fp_delta
    }

    /// Constant pool the method resolves against, if it is still cached
    #[must_use]
    pub fn constpool(&self) -> Option<ConstantPoolRc> {
        read_lock!(self.state).constpool.upgrade()
    }

    /// File name of the module the method currently executes from
    #[must_use]
    pub fn module_name(&self) -> Option<String> {
        self.constpool().map(|pool| pool.module_name().to_string())
    }

    /// True if the method currently executes from module `file_name`
    #[must_use]
    pub fn is_bound_to(&self, file_name: &str) -> bool {
        self.constpool()
            .is_some_and(|pool| pool.module_name() == file_name)
    }
}
