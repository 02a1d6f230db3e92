//! In-memory construction of compiled modules.
//!
//! Embedders that bring their own container parser assemble [`Module`]s through
//! [`ModuleBuilder`]; the test suites build every base and patch module this way.
//!
//! Entity ids are allocated like file offsets: each entity takes a 4-byte aligned region
//! after a fixed header, so two builders fed the same sequence of entities produce the same
//! ids, and a builder fed a different sequence (as a patch compiler would) produces
//! unrelated ones.
//!
//! # Examples
//!
//! ```rust
//! use quickfix::metadata::{BytecodeBuilder, ModuleBuilder};
//!
//! let mut builder = ModuleBuilder::new("entry.abc");
//! let m = builder.function("com/app/Index", "m", BytecodeBuilder::new().return_undefined());
//! let ctor = builder.function("com/app/Index", "A", BytecodeBuilder::new().return_undefined());
//! let members = builder.class_literal(&[("m", m)]);
//! builder.function(
//!     "com/app/Index",
//!     "func_main_0",
//!     BytecodeBuilder::new()
//!         .define_class(ctor, members, 0)
//!         .return_undefined(),
//! );
//!
//! let module = builder.build()?;
//! assert_eq!(module.method_count(), 3);
//! # Ok::<(), quickfix::Error>(())
//! ```

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::{
    disassembler::{Opcode, OperandKind},
    file::io::write_le,
    metadata::{
        literal::{LiteralBuffer, LiteralEntry, LiteralTag, LiteralValue},
        method::{CallField, FunctionKind, LiteralFlags, LiteralInfo, MethodLiteral},
        module::{Module, ModuleKind, ModuleRc, ENTRY_FUNCTION_NAME},
        token::EntityId,
    },
    Error, Result,
};

const HEADER_SIZE: u32 = 0x40;
const METHOD_HEADER_SIZE: u32 = 0x10;

/// An instruction argument before encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    /// Immediate value, for `Imm8`, `Imm16` and `Imm32` operands
    Imm(u32),
    /// Virtual register, for `V8` operands
    Reg(u8),
    /// Entity, for `Id16` operands; encoded as an index into the compile unit's header
    Id(EntityId),
}

/// Assembles a method body
#[derive(Clone, Debug, Default)]
pub struct BytecodeBuilder {
    instructions: Vec<(Opcode, Vec<Arg>)>,
    num_vregs: u32,
}

impl BytecodeBuilder {
    /// Creates an empty body
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction. Arity and argument kinds are checked when the body is encoded.
    #[must_use]
    pub fn emit(mut self, opcode: Opcode, args: &[Arg]) -> Self {
        for arg in args {
            if let Arg::Reg(reg) = arg {
                self.num_vregs = self.num_vregs.max(u32::from(*reg) + 1);
            }
        }
        self.instructions.push((opcode, args.to_vec()));
        self
    }

    /// `nop`
    #[must_use]
    pub fn nop(self) -> Self {
        self.emit(Opcode::Nop, &[])
    }

    /// `ldai imm`
    #[must_use]
    pub fn lda_imm(self, value: u32) -> Self {
        self.emit(Opcode::LdaImm, &[Arg::Imm(value)])
    }

    /// `lda reg`
    #[must_use]
    pub fn lda(self, reg: u8) -> Self {
        self.emit(Opcode::Lda, &[Arg::Reg(reg)])
    }

    /// `sta reg`
    #[must_use]
    pub fn sta(self, reg: u8) -> Self {
        self.emit(Opcode::Sta, &[Arg::Reg(reg)])
    }

    /// `lda.str id`
    #[must_use]
    pub fn lda_str(self, string: EntityId) -> Self {
        self.emit(Opcode::LdaStr, &[Arg::Id(string)])
    }

    /// `definefunc` creating a closure over `method`
    #[must_use]
    pub fn define_func(self, method: EntityId) -> Self {
        self.emit(
            Opcode::DefineFunc,
            &[Arg::Imm(0), Arg::Id(method), Arg::Imm(0)],
        )
    }

    /// `definemethod` creating a closure over `method`
    #[must_use]
    pub fn define_method(self, method: EntityId) -> Self {
        self.emit(
            Opcode::DefineMethod,
            &[Arg::Imm(0), Arg::Id(method), Arg::Imm(0)],
        )
    }

    /// `defineclasswithbuffer` for a class with constructor `ctor` and member buffer `literal`
    #[must_use]
    pub fn define_class(self, ctor: EntityId, literal: EntityId, parent: u8) -> Self {
        self.emit(
            Opcode::DefineClassWithBuffer,
            &[
                Arg::Imm(0),
                Arg::Id(ctor),
                Arg::Id(literal),
                Arg::Imm(0),
                Arg::Reg(parent),
            ],
        )
    }

    /// Wide-slot form of [`BytecodeBuilder::define_class`]
    #[must_use]
    pub fn define_class_wide(self, ctor: EntityId, literal: EntityId, parent: u8) -> Self {
        self.emit(
            Opcode::DefineClassWithBufferWide,
            &[
                Arg::Imm(0x100),
                Arg::Id(ctor),
                Arg::Id(literal),
                Arg::Imm(0),
                Arg::Reg(parent),
            ],
        )
    }

    /// `callarg0`
    #[must_use]
    pub fn call_arg0(self) -> Self {
        self.emit(Opcode::CallArg0, &[Arg::Imm(0)])
    }

    /// `callarg1 reg`
    #[must_use]
    pub fn call_arg1(self, reg: u8) -> Self {
        self.emit(Opcode::CallArg1, &[Arg::Imm(0), Arg::Reg(reg)])
    }

    /// `stmodulevar slot`
    #[must_use]
    pub fn st_module_var(self, slot: u8) -> Self {
        self.emit(Opcode::StModuleVar, &[Arg::Imm(u32::from(slot))])
    }

    /// `return`
    #[must_use]
    pub fn return_value(self) -> Self {
        self.emit(Opcode::Return, &[])
    }

    /// `returnundefined`
    #[must_use]
    pub fn return_undefined(self) -> Self {
        self.emit(Opcode::ReturnUndefined, &[])
    }

    /// `throw`
    #[must_use]
    pub fn throw(self) -> Self {
        self.emit(Opcode::Throw, &[])
    }

    /// Encodes the body, interning every entity argument into `header`.
    ///
    /// # Errors
    ///
    /// Returns an error if an instruction's arguments do not match its operand layout, an
    /// immediate does not fit its operand, or `header` would outgrow 16-bit indices
    pub fn encode(&self, header: &mut Vec<EntityId>) -> Result<Vec<u8>> {
        let mut code = Vec::new();

        for (opcode, args) in &self.instructions {
            let kinds = opcode.operands();
            if kinds.len() != args.len() {
                return Err(malformed_error!(
                    "{} takes {} operands, got {}",
                    opcode.mnemonic(),
                    kinds.len(),
                    args.len()
                ));
            }

            code.push(*opcode as u8);
            for (kind, arg) in kinds.iter().zip(args) {
                match (kind, arg) {
                    (OperandKind::Imm8, Arg::Imm(value)) => {
                        write_le(&mut code, narrow::<u8>(*value)?);
                    }
                    (OperandKind::Imm16, Arg::Imm(value)) => {
                        write_le(&mut code, narrow::<u16>(*value)?);
                    }
                    (OperandKind::Imm32, Arg::Imm(value)) => {
                        write_le(&mut code, *value);
                    }
                    (OperandKind::V8, Arg::Reg(reg)) => {
                        write_le(&mut code, *reg);
                    }
                    (OperandKind::Id16, Arg::Id(id)) => {
                        let index = match header.iter().position(|entry| entry == id) {
                            Some(index) => index,
                            None => {
                                header.push(*id);
                                header.len() - 1
                            }
                        };
                        write_le(
                            &mut code,
                            narrow::<u16>(u32::try_from(index).unwrap_or(u32::MAX))?,
                        );
                    }
                    _ => {
                        return Err(malformed_error!(
                            "{} operand {:?} cannot take {:?}",
                            opcode.mnemonic(),
                            kind,
                            arg
                        ))
                    }
                }
            }
        }

        Ok(code)
    }
}

fn narrow<T: TryFrom<u32>>(value: u32) -> Result<T> {
    T::try_from(value).map_err(|_| malformed_error!("Operand value {} does not fit", value))
}

/// Builds a [`Module`] in memory
pub struct ModuleBuilder {
    name: String,
    kind: ModuleKind,
    entry_function_name: String,
    next_offset: u32,
    unit: u32,
    methods: Vec<MethodLiteral>,
    literals: Vec<LiteralBuffer>,
    strings: Vec<(EntityId, Arc<str>)>,
    index_headers: Vec<Vec<EntityId>>,
    records: Vec<String>,
    error: Option<Error>,
}

impl ModuleBuilder {
    /// Starts a mergeable module named `name` with a single compile unit
    #[must_use]
    pub fn new(name: &str) -> Self {
        ModuleBuilder {
            name: name.to_string(),
            kind: ModuleKind::Merged,
            entry_function_name: ENTRY_FUNCTION_NAME.to_string(),
            next_offset: HEADER_SIZE,
            unit: 0,
            methods: Vec::new(),
            literals: Vec::new(),
            strings: Vec::new(),
            index_headers: vec![Vec::new()],
            records: Vec::new(),
            error: None,
        }
    }

    /// Sets the container layout
    #[must_use]
    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    /// Overrides the designated entry-point name
    #[must_use]
    pub fn entry_function_name(mut self, name: &str) -> Self {
        self.entry_function_name = name.to_string();
        self
    }

    /// Starts a new compile unit; later functions resolve against its constant pool
    pub fn compile_unit(&mut self) -> u32 {
        self.index_headers.push(Vec::new());
        self.unit = u32::try_from(self.index_headers.len() - 1).unwrap_or(u32::MAX);
        self.unit
    }

    /// Moves the header cursor forward by an entity of `size` bytes
    fn allocate(&mut self, size: u32) -> EntityId {
        let id = EntityId(self.next_offset);
        let aligned = size.max(4).saturating_add(3) & !3;
        self.next_offset = self.next_offset.saturating_add(aligned);
        id
    }

    fn add_record(&mut self, record_name: &str) {
        if !self.records.iter().any(|name| name == record_name) {
            self.records.push(record_name.to_string());
        }
    }

    /// Adds a string constant
    pub fn string(&mut self, value: &str) -> EntityId {
        let id = self.allocate(u32::try_from(value.len()).unwrap_or(u32::MAX) + 4);
        self.strings.push((id, Arc::from(value)));
        id
    }

    /// Adds a normal function to the current compile unit
    pub fn function(&mut self, record_name: &str, name: &str, code: BytecodeBuilder) -> EntityId {
        self.function_with_kind(record_name, name, FunctionKind::NormalFunction, code)
    }

    /// Adds a function of the given kind to the current compile unit
    pub fn function_with_kind(
        &mut self,
        record_name: &str,
        name: &str,
        function_kind: FunctionKind,
        code: BytecodeBuilder,
    ) -> EntityId {
        let unit = self.unit;
        let bytecode = match code.encode(&mut self.index_headers[unit as usize]) {
            Ok(bytecode) => bytecode,
            Err(error) => {
                self.error.get_or_insert(error);
                Vec::new()
            }
        };

        let size = METHOD_HEADER_SIZE + u32::try_from(bytecode.len()).unwrap_or(u32::MAX);
        let id = self.allocate(size);
        self.add_record(record_name);

        self.methods.push(MethodLiteral {
            id,
            record_name: record_name.to_string(),
            name: name.to_string(),
            bytecode: Arc::from(bytecode),
            call_field: CallField::default(),
            literal_info: LiteralInfo {
                method_id: id,
                num_vregs: code.num_vregs,
                flags: LiteralFlags::empty(),
            },
            function_kind,
            constpool_index: unit,
        });
        id
    }

    /// Adds a raw literal buffer
    pub fn literal(&mut self, entries: Vec<LiteralEntry>) -> EntityId {
        let size = 4 + 8 * u32::try_from(entries.len()).unwrap_or(u32::MAX / 8);
        let id = self.allocate(size);
        self.literals.push(LiteralBuffer { id, entries });
        id
    }

    /// Adds the member literal buffer of a class: one `(name, method)` pair per prototype method
    pub fn class_literal(&mut self, members: &[(&str, EntityId)]) -> EntityId {
        let mut entries = Vec::with_capacity(members.len() * 2 + 1);
        for (name, method) in members {
            entries.push(LiteralEntry {
                tag: LiteralTag::String,
                value: LiteralValue::String((*name).to_string()),
            });
            entries.push(LiteralEntry {
                tag: LiteralTag::Method,
                value: LiteralValue::Method(*method),
            });
        }
        entries.push(LiteralEntry {
            tag: LiteralTag::Integer,
            value: LiteralValue::Integer(i64::try_from(members.len()).unwrap_or(i64::MAX)),
        });
        self.literal(entries)
    }

    /// Finishes the module.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while encoding a method body
    pub fn build(self) -> Result<ModuleRc> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let methods = SkipMap::new();
        for method in self.methods {
            methods.insert(method.id, Arc::new(method));
        }

        let literals = SkipMap::new();
        for literal in self.literals {
            literals.insert(literal.id, Arc::new(literal));
        }

        let strings = SkipMap::new();
        for (id, value) in self.strings {
            strings.insert(id, value);
        }

        let records = Arc::new(boxcar::Vec::new());
        for record in self.records {
            records.push(record);
        }

        Ok(Arc::new(Module {
            name: self.name,
            kind: self.kind,
            file_size: self.next_offset,
            entry_function_name: self.entry_function_name,
            methods,
            literals,
            strings,
            index_headers: self.index_headers,
            records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disassembler::decode_stream;

    #[test]
    fn ids_are_stable_for_equal_input() {
        let build = || {
            let mut builder = ModuleBuilder::new("a.abc");
            let f = builder.function("rec", "f", BytecodeBuilder::new().return_undefined());
            let g = builder.function("rec", "g", BytecodeBuilder::new().nop().return_undefined());
            (f, g)
        };

        assert_eq!(build(), build());
        let (f, g) = build();
        assert!(f < g);
        assert!(f.is_valid());
    }

    #[test]
    fn entity_operands_resolve_through_header() {
        let mut builder = ModuleBuilder::new("a.abc");
        let m = builder.function("rec", "m", BytecodeBuilder::new().return_undefined());
        let ctor = builder.function("rec", "A", BytecodeBuilder::new().return_undefined());
        let members = builder.class_literal(&[("m", m)]);
        let main = builder.function(
            "rec",
            "func_main_0",
            BytecodeBuilder::new()
                .define_class(ctor, members, 0)
                .define_class_wide(ctor, members, 0)
                .return_undefined(),
        );
        let module = builder.build().unwrap();

        let body = module.method(main).unwrap();
        let instructions = decode_stream(&body.bytecode).unwrap();
        assert_eq!(instructions.len(), 3);

        for define in &instructions[..2] {
            let ctor_index = define.id(0).unwrap();
            let literal_index = define.id(1).unwrap();
            assert_eq!(module.resolve_index(0, ctor_index).unwrap(), ctor);
            assert_eq!(module.resolve_index(0, literal_index).unwrap(), members);
        }
        assert_eq!(module.constpool_len(0), 2);

        let literal = module.literal(members).unwrap();
        assert_eq!(literal.class_member_methods().collect::<Vec<_>>(), vec![m]);
    }

    #[test]
    fn compile_units() {
        let mut builder = ModuleBuilder::new("a.abc");
        builder.function("rec", "f", BytecodeBuilder::new().return_undefined());
        let unit = builder.compile_unit();
        let g = builder.function("rec", "g", BytecodeBuilder::new().return_undefined());
        let module = builder.build().unwrap();

        assert_eq!(unit, 1);
        assert_eq!(module.constpool_count(), 2);
        assert_eq!(module.method(g).unwrap().constpool_index, 1);
    }

    #[test]
    fn bad_operands_fail_the_build() {
        let mut builder = ModuleBuilder::new("a.abc");
        builder.function(
            "rec",
            "f",
            BytecodeBuilder::new().emit(Opcode::Lda, &[Arg::Imm(1)]),
        );
        assert!(matches!(builder.build(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn immediates_must_fit() {
        let mut header = Vec::new();
        let code = BytecodeBuilder::new().emit(Opcode::CallArg0, &[Arg::Imm(0x1FF)]);
        assert!(code.encode(&mut header).is_err());
    }
}
