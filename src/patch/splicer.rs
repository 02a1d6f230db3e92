//! The in-place splice.

use std::sync::Arc;

use crate::{
    metadata::method::MethodLiteralRc,
    runtime::{ConstantPoolRc, Method},
};

/// Installs the code of `source` into the live descriptor `target`, resolving against
/// `constpool`.
///
/// Copies call-dispatch metadata, literal info (and with it the method id), the code entry,
/// the bytecode and the constant-pool binding. Compiled code is discarded: the AOT flag is
/// cleared and the frame-pointer delta reset. The function kind belongs to class linking and
/// is left alone. `target` keeps its address.
pub fn replace_method(target: &Method, source: &MethodLiteralRc, constpool: &ConstantPoolRc) {
    target.update(|state| {
        log::trace!(
            "Splicing {} ({}) <- {} ({}) from {}",
            state.code_entry.name,
            state.literal_info.method_id,
            source.name,
            source.id,
            constpool.module_name()
        );

        state.call_field = source.call_field;
        state.literal_info = source.literal_info;
        state.code_entry = source.clone();
        state.bytecode = source.bytecode.clone();
        state.constpool = Arc::downgrade(constpool);
        state.aot_compiled = false;
        state.fp_delta = 0;
    });
}
