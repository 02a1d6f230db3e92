//! Running a record's top-level statements.
//!
//! Bytecode execution is outside this crate. The runtime reaches it through
//! [`EntryPointExecutor`]: link a record, then evaluate its entry function. An embedder plugs
//! its interpreter in here; [`DefaultExecutor`] is a minimal stand-in that performs the
//! allocations an interpreter would perform while running top-level code (closures, class
//! literals, strings) and reports a `throw` as an abrupt completion.

use crate::{
    disassembler::{decode_stream, Opcode},
    metadata::module::ModuleRc,
    runtime::{
        method::MethodRc,
        record::{ModuleRecordRc, ModuleStatus},
        Runtime,
    },
    Error, Result,
};

/// Links and evaluates module records
pub trait EntryPointExecutor: Send + Sync {
    /// Links the imports of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AbruptCompletion`] if linking raises
    fn instantiate(&self, runtime: &Runtime, record: &ModuleRecordRc, module: &ModuleRc)
        -> Result<()>;

    /// Runs `entry`, the top-level function of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AbruptCompletion`] if the code throws
    fn evaluate(
        &self,
        runtime: &Runtime,
        record: &ModuleRecordRc,
        module: &ModuleRc,
        entry: &MethodRc,
    ) -> Result<()>;
}

/// Straight-line evaluation of top-level code
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

impl EntryPointExecutor for DefaultExecutor {
    fn instantiate(
        &self,
        _runtime: &Runtime,
        record: &ModuleRecordRc,
        module: &ModuleRc,
    ) -> Result<()> {
        if !module.has_record(record.record_name()) {
            return Err(Error::AbruptCompletion(format!(
                "{} is not part of {}",
                record.record_name(),
                module.name()
            )));
        }
        record.set_status(ModuleStatus::Instantiated);
        Ok(())
    }

    fn evaluate(
        &self,
        runtime: &Runtime,
        record: &ModuleRecordRc,
        _module: &ModuleRc,
        entry: &MethodRc,
    ) -> Result<()> {
        // The entry may be bound to another module than `record` (cold substitution), its
        // operands always resolve against its own pool.
        let Some(pool) = entry.constpool() else {
            return Err(Error::Internal(format!(
                "Entry of {} has no constant pool",
                record.record_name()
            )));
        };
        let Some(module) = runtime.find_module(pool.module_name()) else {
            return Err(Error::Internal(format!(
                "Module {} is not loaded",
                pool.module_name()
            )));
        };

        record.set_status(ModuleStatus::Evaluating);
        for instruction in decode_stream(&entry.bytecode())? {
            match instruction.opcode {
                Opcode::DefineFunc | Opcode::DefineMethod => {
                    let Some(index) = instruction.id(0) else {
                        continue;
                    };
                    let method = runtime.load_method(&module, &pool, usize::from(index))?;
                    runtime.new_closure(method, record);
                }
                Opcode::DefineClassWithBuffer | Opcode::DefineClassWithBufferWide => {
                    let (Some(ctor), Some(literal)) = (instruction.id(0), instruction.id(1))
                    else {
                        continue;
                    };
                    let method = runtime.load_method(&module, &pool, usize::from(ctor))?;
                    runtime.load_class_literal(&module, &pool, usize::from(literal), record)?;
                    runtime.new_closure(method, record);
                }
                Opcode::LdaStr => {
                    if let Some(index) = instruction.id(0) {
                        runtime.load_string(&module, &pool, usize::from(index))?;
                    }
                }
                Opcode::Throw => {
                    record.set_status(ModuleStatus::Errored);
                    return Err(Error::AbruptCompletion(format!(
                        "{} threw at offset {}",
                        record.record_name(),
                        instruction.offset
                    )));
                }
                Opcode::Return | Opcode::ReturnUndefined => break,
                _ => {}
            }
        }

        record.set_status(ModuleStatus::Evaluated);
        Ok(())
    }
}
