//! Base scanner and matcher.
//!
//! Walks every resolved constant pool of the base module (and, when configured, each pool's
//! unshared variant), derives the identity key of every materialized method and class member
//! template, and splices the patch method with the same key into it. Matching is by identity
//! key only; method order and pool layout may differ freely between the two builds.
//!
//! A miss is not an error: the base method keeps running its old code.

use crate::{
    metadata::{method::MethodLiteralRc, module::ModuleRc},
    patch::{
        classinfo::ClassInfo,
        config::QuickFixConfig,
        identity::method_identity,
        session::{BaseMethodSlot, PatchInfo, PoolVariant, ReplacedMethod},
        splicer::replace_method,
    },
    runtime::{ConstantPoolRc, ConstantSlot, FunctionObject, MethodRc, Runtime},
    Error, Result,
};

/// Both variants of a base pool that should be scanned
fn pool_variants(pool: ConstantPoolRc, scan_unshared: bool) -> Vec<(ConstantPoolRc, PoolVariant)> {
    let unshared = pool.unshared().filter(|_| scan_unshared);
    let mut variants = vec![(pool, PoolVariant::Shared)];
    if let Some(unshared) = unshared {
        variants.push((unshared, PoolVariant::Unshared));
    }
    variants
}

struct Matcher<'a> {
    runtime: &'a Runtime,
    base: &'a ModuleRc,
    patch: &'a ModuleRc,
    base_classes: &'a ClassInfo,
    info: &'a mut PatchInfo,
    spliced: usize,
}

impl Matcher<'_> {
    fn try_replace(&mut self, slot: BaseMethodSlot, method: &MethodRc) {
        // Already spliced through another slot, or substituted by the cold path.
        if !method.is_bound_to(self.base.name()) {
            return;
        }

        let Ok(key) = method_identity(self.base, method.method_id(), self.base_classes) else {
            return;
        };
        let Some(source) = self.info.patch_methods.get(&key).cloned() else {
            return;
        };

        let pool = match self
            .runtime
            .find_or_create_constpool(self.patch, source.constpool_index)
        {
            Ok(pool) => pool,
            Err(error) => {
                log::debug!("No patch pool for {key}: {error}");
                return;
            }
        };

        let original = method.code_entry();
        log::debug!("Replacing {key} at {slot}");
        replace_method(method, &source, &pool);

        self.info.base_methods.entry(slot).or_insert(original);
        self.info.replaced_methods.insert(
            ReplacedMethod::new(source.id, self.patch.name()),
            key.record_name,
        );
        self.spliced += 1;
    }

    fn scan_pool(&mut self, pool: &ConstantPoolRc, variant: PoolVariant) {
        for (slot, method) in pool.methods() {
            self.try_replace(BaseMethodSlot::method(pool.index(), slot, variant), &method);
        }

        for (slot, literal) in pool.class_literals() {
            for (index, template) in literal.templates.iter().enumerate() {
                self.try_replace(
                    BaseMethodSlot::template(pool.index(), slot, index, variant),
                    template.method(),
                );
            }
        }
    }
}

/// Splices every base method that has a counterpart in the catalog of `info`.
///
/// The original literal of every touched slot is saved to `info.base_methods`, and the
/// record of every installed patch method to `info.replaced_methods`. Returns the number of
/// spliced descriptors.
pub fn find_and_replace_same_methods(
    runtime: &Runtime,
    base: &ModuleRc,
    patch: &ModuleRc,
    base_classes: &ClassInfo,
    config: &QuickFixConfig,
    info: &mut PatchInfo,
) -> usize {
    let mut matcher = Matcher {
        runtime,
        base,
        patch,
        base_classes,
        info,
        spliced: 0,
    };

    for pool in runtime.find_constpools(base.name()) {
        for (variant_pool, variant) in pool_variants(pool, config.scan_unshared_constpools) {
            matcher.scan_pool(&variant_pool, variant);
        }
    }

    log::debug!(
        "Spliced {} methods of {} from {}",
        matcher.spliced,
        base.name(),
        patch.name()
    );
    matcher.spliced
}

/// Current descriptor of a saved slot
fn slot_method(runtime: &Runtime, base: &ModuleRc, slot: &BaseMethodSlot) -> Option<MethodRc> {
    let pool = runtime.find_constpool(base.name(), slot.constpool)?;
    let pool = match slot.variant {
        PoolVariant::Shared => pool,
        PoolVariant::Unshared => pool.unshared()?,
    };

    match (pool.slot(slot.slot), slot.literal) {
        (ConstantSlot::Method(method), None) => Some(method),
        (ConstantSlot::ClassLiteral(literal), Some(index)) => literal
            .templates
            .get(index)
            .map(|template| template.method().clone()),
        _ => None,
    }
}

fn restore_slot(
    runtime: &Runtime,
    base: &ModuleRc,
    slot: &BaseMethodSlot,
    original: &MethodLiteralRc,
) -> Result<()> {
    let Some(method) = slot_method(runtime, base, slot) else {
        return Err(Error::Internal(format!(
            "Slot {slot} of {} no longer holds a method",
            base.name()
        )));
    };
    let pool = runtime.find_or_create_constpool(base, original.constpool_index)?;
    replace_method(&method, original, &pool);
    Ok(())
}

/// Splices the saved base literal back into every slot of the rollback table.
///
/// `info.replaced_methods` is rebuilt to name the restored base methods, so the relinker
/// can move their functions back. Slots that cannot be restored are logged and skipped.
/// Returns the number of restored slots.
pub fn restore_base_methods(runtime: &Runtime, base: &ModuleRc, info: &mut PatchInfo) -> usize {
    info.replaced_methods.clear();

    let mut restored = 0;
    for (slot, original) in &info.base_methods {
        if let Err(error) = restore_slot(runtime, base, slot, original) {
            log::warn!("Cannot restore {slot}: {error}");
            continue;
        }

        log::trace!("Restored {} at {slot}", original.name);
        info.replaced_methods.insert(
            ReplacedMethod::new(original.id, base.name()),
            original.record_name.clone(),
        );
        restored += 1;
    }
    restored
}
