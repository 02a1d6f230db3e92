//! Decoder for the VM's bytecode.
//!
//! Method bodies are decoded linearly; there are no inline data tables in the format, so
//! every byte of a body belongs to exactly one instruction.
//!
//! # Key Types
//! - [`Opcode`] - opcode table with operand layouts
//! - [`Instruction`] - a decoded instruction
//! - [`decode_instruction`], [`decode_stream`] - the decoders

mod decoder;
mod instruction;

pub use decoder::{decode_instruction, decode_stream};
pub use instruction::{Instruction, Opcode, Operand, OperandKind};
