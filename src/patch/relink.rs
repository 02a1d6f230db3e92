//! Heap relinker.
//!
//! Functions do not own the record they execute in through their method, they carry a
//! back-reference. Once methods were spliced, every closure and function template over a
//! spliced method is moved to the record of the module now providing the code, and the
//! call-site feedback it gathered against the old code is dropped.

use crate::{
    patch::session::{PatchInfo, ReplacedMethod},
    runtime::{FunctionObject, HeapObject, ModuleRecordRc, Runtime},
};

/// Execution context for `record_name` of module `file_name`: the record registered by the
/// last entry-point run, else the module's own record
fn relink_target(runtime: &Runtime, record_name: &str, file_name: &str) -> Option<ModuleRecordRc> {
    if let Some(record) = runtime.find_patch_module(record_name) {
        if record.file_name() == file_name {
            return Some(record);
        }
    }
    let module = runtime.find_module(file_name)?;
    Some(runtime.resolve_record(&module, record_name))
}

fn relink(runtime: &Runtime, info: &PatchInfo, function: &dyn FunctionObject) -> bool {
    let method = function.method();
    let Some(file_name) = method.module_name() else {
        return false;
    };

    let key = ReplacedMethod::new(method.method_id(), &file_name);
    let Some(record_name) = info.replaced_methods.get(&key) else {
        return false;
    };

    match relink_target(runtime, record_name, &file_name) {
        Some(record) => {
            function.rebind(record);
            true
        }
        None => {
            log::debug!("No execution context for {record_name} in {file_name}");
            false
        }
    }
}

/// Visits every live closure and function template once and rebinds those whose method is
/// listed in `info.replaced_methods`. Returns the number of rebound functions.
pub fn update_functions(runtime: &Runtime, info: &PatchInfo) -> usize {
    let gc = runtime.gc();
    gc.await_background_sweep();

    let mut relinked = 0;
    gc.for_each_live_object(&mut |_, object| {
        let rebound = match object {
            HeapObject::Closure(closure) => relink(runtime, info, closure.as_ref()),
            HeapObject::FunctionTemplate(template) => relink(runtime, info, template.as_ref()),
            _ => false,
        };
        if rebound {
            relinked += 1;
        }
    });

    log::debug!("Relinked {relinked} functions");
    relinked
}
