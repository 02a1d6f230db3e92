//! The hot-patch engine.
//!
//! A patch is a separately compiled module whose methods replace methods of a running base
//! module. Methods are matched across the two builds by [`MethodIdentityKey`], never by
//! offset, and spliced into the base module's live descriptors in place, so every closure
//! over a patched method runs the new code without being re-created.
//!
//! # Architecture
//!
//! - [`identity`] - identity keys and name normalization
//! - [`classinfo`] - owning class of every class member, recovered from bytecode
//! - [`catalog`] - the patch catalog: identity key to patch method
//! - [`matcher`] - scans the base pools and splices matching methods
//! - [`splicer`] - the in-place splice of one descriptor
//! - [`relink`] - rebinding closures and templates after a splice
//! - [`entry`] - re-running the top-level code of touched records
//! - [`loader`] - the hot Load and Unload sequences
//! - [`manager`] - sessions, discovery, the cold path and exception attribution
//!
//! Every operation surfaces a [`PatchErrorCode`] through [`crate::Error::patch_code`].
//!
//! # Examples
//!
//! ```rust
//! use quickfix::{
//!     metadata::{BytecodeBuilder, ModuleBuilder},
//!     patch::{PatchErrorCode, PatchState},
//!     runtime::{MemoryModuleLoader, Runtime},
//! };
//!
//! let build = |name: &str, body: BytecodeBuilder| {
//!     let mut builder = ModuleBuilder::new(name);
//!     let foo = builder.function("com/app/Index", "foo", body);
//!     builder.function(
//!         "com/app/Index",
//!         "func_main_0",
//!         BytecodeBuilder::new().define_func(foo).return_undefined(),
//!     );
//!     builder.build()
//! };
//!
//! let loader = MemoryModuleLoader::new()
//!     .with(build("base.abc", BytecodeBuilder::new().return_undefined())?)
//!     .with(build("patch.abc", BytecodeBuilder::new().nop().return_undefined())?);
//! let runtime = Runtime::new(loader);
//!
//! runtime.execute_module("base.abc", "com/app/Index")?;
//! runtime.load_patch("patch.abc", "base.abc")?;
//! assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::HotLoaded);
//!
//! let again = runtime.load_patch("patch.abc", "base.abc");
//! assert_eq!(PatchErrorCode::from(&again), PatchErrorCode::PatchHasLoaded);
//!
//! runtime.unload_patch("patch.abc")?;
//! # Ok::<(), quickfix::Error>(())
//! ```

pub mod catalog;
pub mod classinfo;
mod config;
pub mod entry;
pub mod identity;
pub mod loader;
pub mod manager;
pub mod matcher;
pub mod relink;
pub mod session;
pub mod splicer;

pub use catalog::generate_patch_info;
pub use classinfo::{collect_class_info, ClassInfo};
pub use config::QuickFixConfig;
pub use entry::{execute_func_or_patch_main, Direction};
pub use identity::{method_identity, normalize_method_name, MethodIdentityKey, DEFAULT_CLASS_NAME};
pub use manager::{parse_stack_info, PatchQuery, PatchSource, QuickFixManager};
pub use session::{BaseMethodSlot, PatchInfo, PoolVariant, ReplacedMethod};

use strum::{Display, EnumIter, IntoStaticStr};

use crate::Result;

/// Result code of a patch operation, as surfaced to embedders
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchErrorCode {
    /// The operation succeeded
    Success,
    /// A module is a bundle and cannot be patched
    #[strum(serialize = "PACKAGE_NOT_ESMODULE")]
    PackageNotEsModule,
    /// A module could not be loaded
    FileNotFound,
    /// The base module has not executed
    FileNotExecuted,
    /// A patch is already active for the base module
    PatchHasLoaded,
    /// No active patch matches the request
    PatchNotLoaded,
    /// Any other failure
    InternalError,
}

impl From<&Result<()>> for PatchErrorCode {
    fn from(result: &Result<()>) -> Self {
        match result {
            Ok(()) => PatchErrorCode::Success,
            Err(error) => error.patch_code(),
        }
    }
}

/// Patch state of a base module
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchState {
    /// No session
    #[default]
    NoPatch,
    /// A session applies through substitution; nothing was spliced
    ColdQueryOnly,
    /// A session spliced the executed base module
    HotLoaded,
}
