use std::fmt;

use strum::{EnumIter, FromRepr, IntoStaticStr};

/// Kind and width of an instruction operand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// 8-bit immediate (usually an inline-cache slot)
    Imm8,
    /// 16-bit immediate
    Imm16,
    /// 32-bit immediate
    Imm32,
    /// 16-bit entity index, resolved through the method's index header
    Id16,
    /// 8-bit virtual register
    V8,
}

impl OperandKind {
    /// Encoded width in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            OperandKind::Imm8 | OperandKind::V8 => 1,
            OperandKind::Imm16 | OperandKind::Id16 => 2,
            OperandKind::Imm32 => 4,
        }
    }
}

/// The opcodes of the VM's bytecode.
///
/// Only exact instruction widths matter to the patch engine, which decodes method bodies
/// solely to find the two class-definition forms and their operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromRepr, EnumIter, IntoStaticStr)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    /// Do nothing
    Nop = 0x00,
    /// Load `undefined` into the accumulator
    LdUndefined = 0x01,
    /// Load a 32-bit immediate into the accumulator
    LdaImm = 0x02,
    /// Load a register into the accumulator
    Lda = 0x03,
    /// Store the accumulator into a register
    Sta = 0x04,
    /// Load a string constant into the accumulator
    LdaStr = 0x05,
    /// Create a closure for a function
    DefineFunc = 0x06,
    /// Create a closure for a method with a home object
    DefineMethod = 0x07,
    /// Define a class from its constructor and member literal buffer
    #[strum(serialize = "defineclasswithbuffer")]
    DefineClassWithBuffer = 0x08,
    /// Wide-slot form of `DefineClassWithBuffer`
    #[strum(serialize = "wide.defineclasswithbuffer")]
    DefineClassWithBufferWide = 0x09,
    /// Call the accumulator without arguments
    CallArg0 = 0x0A,
    /// Call the accumulator with one register argument
    CallArg1 = 0x0B,
    /// Unconditional relative jump
    Jmp = 0x0C,
    /// Relative jump if the accumulator is zero
    Jeqz = 0x0D,
    /// Return the accumulator
    Return = 0x0E,
    /// Return `undefined`
    ReturnUndefined = 0x0F,
    /// Throw the accumulator
    Throw = 0x10,
    /// Store the accumulator into a module variable
    StModuleVar = 0x11,
    /// Load an imported module variable
    LdExternalModuleVar = 0x12,
}

impl Opcode {
    /// Operand layout following the opcode byte
    #[must_use]
    pub fn operands(&self) -> &'static [OperandKind] {
        use OperandKind::{Id16, Imm16, Imm32, Imm8, V8};

        match self {
            Opcode::Nop
            | Opcode::LdUndefined
            | Opcode::Return
            | Opcode::ReturnUndefined
            | Opcode::Throw => &[],
            Opcode::LdaImm => &[Imm32],
            Opcode::Lda | Opcode::Sta => &[V8],
            Opcode::LdaStr => &[Id16],
            Opcode::DefineFunc | Opcode::DefineMethod => &[Imm8, Id16, Imm8],
            Opcode::DefineClassWithBuffer => &[Imm8, Id16, Id16, Imm16, V8],
            Opcode::DefineClassWithBufferWide => &[Imm16, Id16, Id16, Imm16, V8],
            Opcode::CallArg0 | Opcode::Jmp | Opcode::Jeqz => &[Imm8],
            Opcode::CallArg1 => &[Imm8, V8],
            Opcode::StModuleVar | Opcode::LdExternalModuleVar => &[Imm8],
        }
    }

    /// Total encoded size including the opcode byte
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.operands().iter().map(OperandKind::size).sum::<usize>()
    }

    /// True for both class-definition forms
    #[must_use]
    pub fn is_define_class(&self) -> bool {
        matches!(
            self,
            Opcode::DefineClassWithBuffer | Opcode::DefineClassWithBufferWide
        )
    }

    /// The textual mnemonic
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }
}

/// A decoded operand
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// 8-bit immediate
    Imm8(u8),
    /// 16-bit immediate
    Imm16(u16),
    /// 32-bit immediate
    Imm32(u32),
    /// 16-bit entity index
    Id16(u16),
    /// Virtual register
    V8(u8),
}

impl Operand {
    /// The operand value widened to `u32`
    #[must_use]
    pub fn value(&self) -> u32 {
        match *self {
            Operand::Imm8(v) | Operand::V8(v) => u32::from(v),
            Operand::Imm16(v) | Operand::Id16(v) => u32::from(v),
            Operand::Imm32(v) => v,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm8(v) => write!(f, "0x{v:x}"),
            Operand::Imm16(v) => write!(f, "0x{v:x}"),
            Operand::Imm32(v) => write!(f, "0x{v:x}"),
            Operand::Id16(v) => write!(f, "id:{v}"),
            Operand::V8(v) => write!(f, "v{v}"),
        }
    }
}

/// A single decoded instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the instruction within the method body
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operands, in encoding order
    pub operands: Vec<Operand>,
    /// Encoded size in bytes
    pub size: usize,
}

impl Instruction {
    /// Returns the `n`-th entity-index operand (counting only `Id16` operands)
    #[must_use]
    pub fn id(&self, n: usize) -> Option<u16> {
        self.operands
            .iter()
            .filter_map(|operand| match operand {
                Operand::Id16(id) => Some(*id),
                _ => None,
            })
            .nth(n)
    }

    /// The textual mnemonic
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}: {}", self.offset, self.mnemonic())?;
        for (index, operand) in self.operands.iter().enumerate() {
            if index == 0 {
                write!(f, " {operand}")?;
            } else {
                write!(f, ", {operand}")?;
            }
        }
        Ok(())
    }
}
