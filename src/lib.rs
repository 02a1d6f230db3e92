// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # quickfix
//!
//! Hot-patch and quick-fix loading for a managed bytecode virtual machine.
//!
//! A running program is made of compiled modules. `quickfix` takes a separately compiled
//! *patch* module and makes the methods of a running *base* module execute the patch's code,
//! without restarting the program and without re-creating any function object:
//!
//! - **Identity matching** - methods are matched by `(record, class, name)`, never by offset,
//!   so base and patch may be compiled independently
//! - **In-place splicing** - live method descriptors keep their address, only their code changes
//! - **Heap relinking** - closures over patched methods move to the patch's execution context
//! - **Cold substitution** - a patch discovered before the base module ran applies when its
//!   methods are first materialized
//! - **Rollback** - unloading a patch restores the original code byte-for-byte
//! - **Crash attribution** - decide whether an exception's stack runs through patch code
//!
//! ## Quick Start
//!
//! ```rust
//! use quickfix::prelude::*;
//!
//! let module = |name: &str, body: BytecodeBuilder| {
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
//! let runtime = Runtime::new(
//!     MemoryModuleLoader::new()
//!         .with(module("base.abc", BytecodeBuilder::new().return_undefined())?)
//!         .with(module("patch.abc", BytecodeBuilder::new().nop().return_undefined())?),
//! );
//!
//! runtime.execute_module("base.abc", "com/app/Index")?;
//! runtime.load_patch("patch.abc", "base.abc")?;
//! runtime.unload_patch("patch.abc")?;
//! # Ok::<(), quickfix::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - byte sources and the bounds-checked [`Parser`]
//! - [`disassembler`] - bytecode decoding
//! - [`metadata`] - the immutable module model and [`metadata::ModuleBuilder`]
//! - [`runtime`] - live VM objects, the heap and the [`Runtime`] context
//! - [`patch`] - the patch engine and [`QuickFixManager`]

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use quickfix::prelude::*;
///
/// let runtime = Runtime::new(MemoryModuleLoader::new());
/// assert_eq!(runtime.quick_fix().patch_state("entry.abc"), PatchState::NoPatch);
/// ```
pub mod prelude;

pub mod file;

/// Decoder for the VM's bytecode.
///
/// The patch engine only needs exact instruction widths and the operands of the two
/// class-defining instructions, but every opcode is decoded.
///
/// # Key Types
///
/// - [`disassembler::Instruction`] - a decoded instruction
/// - [`disassembler::Opcode`] - the instruction set
/// - [`disassembler::Operand`] - immediates, registers and 16-bit entity indices
///
/// # Examples
///
/// ```rust
/// use quickfix::disassembler::{decode_stream, Opcode};
///
/// let instructions = decode_stream(&[0x00, 0x0F])?;
/// assert_eq!(instructions[1].opcode, Opcode::ReturnUndefined);
/// # Ok::<(), quickfix::Error>(())
/// ```
pub mod disassembler;

pub mod metadata;

pub mod runtime;

pub mod patch;

/// `quickfix` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `quickfix` Error type
///
/// See [`Error::patch_code`] for the result code an error surfaces as.
pub use error::Error;

/// Provides access to low-level file and memory parsing utilities.
pub use file::{parser::Parser, File};

/// Result codes of patch operations
pub use patch::{PatchErrorCode, QuickFixManager};

/// The runtime context
pub use runtime::Runtime;
