//! Hot Load and Unload of one patch session.
//!
//! Both directions follow the same sequence: pin the base pools, splice under a no-GC scope,
//! re-run the top-level code of the touched records, then relink the heap. Abrupt completion
//! of the top-level code does not stop the relink; the error is returned after it.

use crate::{
    metadata::module::ModuleRc,
    patch::{
        classinfo::ClassInfo,
        config::QuickFixConfig,
        entry::{execute_func_or_patch_main, Direction},
        matcher::{find_and_replace_same_methods, restore_base_methods},
        relink::update_functions,
        session::PatchInfo,
    },
    runtime::{HeapObject, Runtime},
    Result,
};

/// Applies the catalog of `info` to the executed base module.
///
/// # Errors
///
/// Returns an error if the patch pools cannot be created, or the error of the patch's
/// top-level code. In the latter case `info` holds everything spliced so far.
pub fn load_patch_internal(
    runtime: &Runtime,
    base: &ModuleRc,
    patch: &ModuleRc,
    base_classes: &ClassInfo,
    config: &QuickFixConfig,
    info: &mut PatchInfo,
) -> Result<()> {
    let gc = runtime.gc();
    for pool in runtime.find_constpools(base.name()) {
        info.base_constpools
            .push(gc.pin(HeapObject::ConstantPool(pool)));
    }
    runtime.create_all_constpools(patch)?;

    {
        let _no_gc = runtime.heap().no_gc_scope();
        find_and_replace_same_methods(runtime, base, patch, base_classes, config, info);
    }

    runtime.clear_patch_modules();
    let result = execute_func_or_patch_main(
        runtime,
        patch,
        &info.replaced_record_names,
        Direction::Load,
    );
    if let Err(error) = &result {
        log::error!("Top-level code of {} failed: {error}", patch.name());
    }

    update_functions(runtime, info);
    result
}

/// Reverts every splice recorded in `info`.
///
/// The touched base records are re-run even if nothing was spliced, so top-level state set
/// by the patch's records is replaced.
///
/// # Errors
///
/// Returns the error of the base module's top-level code; restoring and relinking complete
/// regardless.
pub fn unload_patch_internal(runtime: &Runtime, base: &ModuleRc, info: &mut PatchInfo) -> Result<()> {
    {
        let _no_gc = runtime.heap().no_gc_scope();
        restore_base_methods(runtime, base, info);
    }

    runtime.clear_patch_modules();
    let result = execute_func_or_patch_main(
        runtime,
        base,
        &info.replaced_record_names,
        Direction::Unload,
    );
    if let Err(error) = &result {
        log::error!("Top-level code of {} failed: {error}", base.name());
    }

    update_functions(runtime, info);
    result
}
