//! Patch catalog builder.

use crate::{
    metadata::module::Module,
    patch::{
        classinfo::ClassInfo, config::QuickFixConfig, identity::method_identity,
        session::PatchInfo,
    },
    Result,
};

/// Fills the catalog of `info` from every method of the patch module.
///
/// Reserved bootstrap functions are skipped. When two methods share an identity key the
/// first one wins. The record of every entry function is added to the records whose entry
/// point must run.
///
/// # Errors
///
/// Returns an error only if the module's own method table is inconsistent
pub fn generate_patch_info(
    patch: &Module,
    class_info: &ClassInfo,
    config: &QuickFixConfig,
    info: &mut PatchInfo,
) -> Result<()> {
    for literal in patch.methods() {
        if config.is_reserved(&literal.name) {
            continue;
        }

        let key = method_identity(patch, literal.id, class_info)?;
        if literal.is_entry(patch.entry_function_name()) {
            info.replaced_record_names
                .insert(literal.record_name.clone());
        }

        if info.patch_methods.contains_key(&key) {
            log::trace!("Duplicate patch method {key}, keeping the first");
            continue;
        }
        info.patch_methods.insert(key, literal);
    }

    log::debug!(
        "Patch {} provides {} methods for {} records",
        patch.name(),
        info.patch_methods.len(),
        info.replaced_record_names.len()
    );
    Ok(())
}
