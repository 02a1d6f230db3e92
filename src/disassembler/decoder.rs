//! Bytecode decoding.
//!
//! # Example: Decoding a Single Instruction
//!
//! ```rust
//! use quickfix::{Parser, disassembler::decode_instruction};
//! let code = [0x0F]; // returnundefined
//! let mut parser = Parser::new(&code);
//! let instr = decode_instruction(&mut parser)?;
//! assert_eq!(instr.mnemonic(), "returnundefined");
//! # Ok::<(), quickfix::Error>(())
//! ```
//!
//! # Example: Decoding a Method Body
//!
//! ```rust
//! use quickfix::disassembler::decode_stream;
//! let code = [0x00, 0x0F]; // nop, returnundefined
//! let instrs = decode_stream(&code)?;
//! assert_eq!(instrs.len(), 2);
//! # Ok::<(), quickfix::Error>(())
//! ```

use crate::{
    disassembler::{Instruction, Opcode, Operand, OperandKind},
    file::parser::Parser,
    Result,
};

/// Decodes the instruction at the current parser position and advances past it.
///
/// # Arguments
///
/// * `parser` - Cursor positioned at an opcode byte
///
/// # Errors
///
/// Returns an error if the opcode is unknown or the operands are truncated
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let byte = parser.read_le::<u8>()?;
    let Some(opcode) = Opcode::from_repr(byte) else {
        return Err(malformed_error!(
            "Unknown opcode 0x{:02x} at offset {}",
            byte,
            offset
        ));
    };

    let mut operands = Vec::with_capacity(opcode.operands().len());
    for kind in opcode.operands() {
        let operand = match kind {
            OperandKind::Imm8 => Operand::Imm8(parser.read_le::<u8>()?),
            OperandKind::Imm16 => Operand::Imm16(parser.read_le::<u16>()?),
            OperandKind::Imm32 => Operand::Imm32(parser.read_le::<u32>()?),
            OperandKind::Id16 => Operand::Id16(parser.read_le::<u16>()?),
            OperandKind::V8 => Operand::V8(parser.read_le::<u8>()?),
        };
        operands.push(operand);
    }

    Ok(Instruction {
        offset,
        opcode,
        operands,
        size: parser.pos() - offset,
    })
}

/// Decodes a complete method body, linearly, from the first byte to the last.
///
/// # Errors
///
/// Returns an error if any instruction fails to decode
pub fn decode_stream(data: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(data);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}
