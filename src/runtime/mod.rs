//! The live VM objects and the runtime context that owns them.
//!
//! [`Runtime`] ties the collaborators together: a [`ModuleLoader`] producing immutable
//! modules, an [`EntryPointExecutor`] running top-level code, the [`ManagedHeap`], and the
//! runtime-wide tables (loaded modules, resolved constant pools, module records, and the
//! registry of records evaluated by patch entry runs). It also owns the
//! [`QuickFixManager`](crate::patch::QuickFixManager) and forwards the patch entry points to it.
//!
//! # Key Types
//! - [`Runtime`] - the runtime context
//! - [`Method`] - live method descriptor
//! - [`ConstantPool`], [`ConstantSlot`], [`ClassLiteral`] - resolved constants
//! - [`Closure`], [`FunctionTemplate`], [`FunctionObject`] - function objects
//! - [`ModuleRecord`] - execution context of a record
//! - [`ManagedHeap`], [`GarbageCollector`] - heap and collector contract
//! - [`StageOfHotReload`] - sub-phase of a running Load or Unload
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use quickfix::{
//!     metadata::{BytecodeBuilder, ModuleBuilder},
//!     runtime::{MemoryModuleLoader, Runtime},
//! };
//!
//! let mut builder = ModuleBuilder::new("entry.abc");
//! let foo = builder.function("com/app/Index", "foo", BytecodeBuilder::new().return_undefined());
//! builder.function(
//!     "com/app/Index",
//!     "func_main_0",
//!     BytecodeBuilder::new().define_func(foo).return_undefined(),
//! );
//!
//! let runtime = Runtime::new(MemoryModuleLoader::new().with(builder.build()?));
//! runtime.execute_module("entry.abc", "com/app/Index")?;
//! assert!(runtime.has_cached_constpool("entry.abc"));
//! # Ok::<(), quickfix::Error>(())
//! ```

mod constpool;
mod executor;
mod function;
mod heap;
mod loader;
mod method;
mod record;

pub use constpool::{ClassLiteral, ClassLiteralRc, ConstantPool, ConstantPoolRc, ConstantSlot};
pub use executor::{DefaultExecutor, EntryPointExecutor};
pub use function::{
    Closure, ClosureRc, FunctionBinding, FunctionObject, FunctionTemplate, FunctionTemplateRc,
    ProfileTypeInfo,
};
pub use heap::{
    GarbageCollector, HeapIter, HeapObject, HeapRef, ManagedHeap, NoGcScope, ScopedHandle,
};
pub use loader::{FileModuleLoader, MemoryModuleLoader, ModuleLoader, ModuleParser};
pub use method::{Method, MethodRc, MethodState};
pub use record::{ModuleRecord, ModuleRecordRc, ModuleStatus};

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use dashmap::DashMap;
use strum::Display;

use crate::{
    metadata::{module::ModuleRc, token::EntityId},
    patch::{PatchQuery, QuickFixConfig, QuickFixManager},
    Error, Result,
};

/// Sub-phase of a running Load or Unload, consulted by the interpreter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOfHotReload {
    /// No entry-point run in progress
    #[default]
    Initial,
    /// Entry points of touched records are running
    BeginExecutePatchmain,
    /// A Load finished running entry points
    LoadEndExecutePatchmain,
    /// An Unload finished running entry points
    UnloadEndExecutePatchmain,
}

/// The runtime context
pub struct Runtime {
    loader: Box<dyn ModuleLoader>,
    executor: Box<dyn EntryPointExecutor>,
    heap: Arc<ManagedHeap>,
    modules: DashMap<String, ModuleRc>,
    constpools: DashMap<String, BTreeMap<u32, ConstantPoolRc>>,
    records: DashMap<(String, String), ModuleRecordRc>,
    patch_modules: DashMap<String, ModuleRecordRc>,
    stage: RwLock<StageOfHotReload>,
    quick_fix: QuickFixManager,
}

impl Runtime {
    /// Creates a runtime loading modules through `loader` and running top-level code with the
    /// [`DefaultExecutor`]
    pub fn new(loader: impl ModuleLoader + 'static) -> Self {
        Runtime {
            loader: Box::new(loader),
            executor: Box::new(DefaultExecutor),
            heap: Arc::new(ManagedHeap::new()),
            modules: DashMap::new(),
            constpools: DashMap::new(),
            records: DashMap::new(),
            patch_modules: DashMap::new(),
            stage: RwLock::new(StageOfHotReload::Initial),
            quick_fix: QuickFixManager::new(QuickFixConfig::default()),
        }
    }

    /// Replaces the entry-point executor
    #[must_use]
    pub fn with_executor(mut self, executor: impl EntryPointExecutor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    /// Installs the patch discovery callback
    #[must_use]
    pub fn with_quick_fix_query(mut self, query: impl PatchQuery + 'static) -> Self {
        self.quick_fix.set_query(Box::new(query));
        self
    }

    /// Replaces the quick-fix configuration
    #[must_use]
    pub fn with_config(mut self, config: QuickFixConfig) -> Self {
        self.quick_fix.set_config(config);
        self
    }

    /// The managed heap
    #[must_use]
    pub fn heap(&self) -> &Arc<ManagedHeap> {
        &self.heap
    }

    /// The garbage collector contract of the heap
    #[must_use]
    pub fn gc(&self) -> &dyn GarbageCollector {
        self.heap.as_ref()
    }

    /// The entry-point executor
    #[must_use]
    pub fn executor(&self) -> &dyn EntryPointExecutor {
        self.executor.as_ref()
    }

    /// The quick-fix manager
    #[must_use]
    pub fn quick_fix(&self) -> &QuickFixManager {
        &self.quick_fix
    }

    /// Current hot-reload sub-phase
    #[must_use]
    pub fn stage(&self) -> StageOfHotReload {
        *read_lock!(self.stage)
    }

    /// Sets the hot-reload sub-phase
    pub fn set_stage(&self, stage: StageOfHotReload) {
        *write_lock!(self.stage) = stage;
    }

    /// Returns the module `file_name`, loading and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if the loader cannot produce the module
    pub fn load_module(&self, file_name: &str, buffer: Option<&[u8]>) -> Result<ModuleRc> {
        if let Some(module) = self.find_module(file_name) {
            return Ok(module);
        }

        let module = self.loader.load(file_name, buffer).map_err(|error| {
            log::debug!("Loading {file_name} failed: {error}");
            match error {
                Error::FileError(_) | Error::Empty => Error::FileNotFound(file_name.to_string()),
                other => other,
            }
        })?;

        let module = self
            .modules
            .entry(file_name.to_string())
            .or_insert(module)
            .clone();
        log::debug!("Loaded module {module:?}");
        Ok(module)
    }

    /// Returns the module `file_name` if it is loaded
    #[must_use]
    pub fn find_module(&self, file_name: &str) -> Option<ModuleRc> {
        self.modules.get(file_name).map(|entry| entry.value().clone())
    }

    /// Drops `file_name` from the module cache. Its constant pools go with the next
    /// [`Runtime::collect_garbage`] unless pinned.
    pub fn remove_module(&self, file_name: &str) -> Option<ModuleRc> {
        self.records.retain(|(file, _), _| file != file_name);
        self.modules.remove(file_name).map(|(_, module)| module)
    }

    /// True if the module has executed, i.e. at least one of its pools is resolved
    #[must_use]
    pub fn has_cached_constpool(&self, file_name: &str) -> bool {
        self.constpools
            .get(file_name)
            .is_some_and(|pools| !pools.is_empty())
    }

    /// Returns the resolved pool of compile unit `index`
    #[must_use]
    pub fn find_constpool(&self, file_name: &str, index: u32) -> Option<ConstantPoolRc> {
        self.constpools
            .get(file_name)
            .and_then(|pools| pools.get(&index).cloned())
    }

    /// Returns every resolved pool of the module, in unit order
    #[must_use]
    pub fn find_constpools(&self, file_name: &str) -> Vec<ConstantPoolRc> {
        self.constpools
            .get(file_name)
            .map(|pools| pools.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the pool of compile unit `index`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the module has no such compile unit
    pub fn find_or_create_constpool(&self, module: &ModuleRc, index: u32) -> Result<ConstantPoolRc> {
        if index >= module.constpool_count() {
            return Err(malformed_error!(
                "Module {} has no compile unit {}",
                module.name(),
                index
            ));
        }

        let mut pools = self.constpools.entry(module.name().to_string()).or_default();
        let pool = pools
            .entry(index)
            .or_insert_with(|| {
                log::trace!("Creating constant pool {}#{index}", module.name());
                Arc::new(ConstantPool::new(
                    module.name(),
                    index,
                    module.constpool_len(index),
                ))
            })
            .clone();
        Ok(pool)
    }

    /// Resolves the pool of every compile unit of the module.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool cannot be created
    pub fn create_all_constpools(&self, module: &ModuleRc) -> Result<()> {
        for index in 0..module.constpool_count() {
            self.find_or_create_constpool(module, index)?;
        }
        Ok(())
    }

    /// Returns the unshared variant of `pool`, creating it from the current slots on first use
    pub fn unshare_constpool(&self, pool: &ConstantPoolRc) -> ConstantPoolRc {
        if let Some(unshared) = pool.unshared() {
            return unshared;
        }
        let unshared = Arc::new(pool.duplicate());
        pool.set_unshared(unshared.clone());
        unshared
    }

    /// Materializes a new descriptor for method `id` of `module`.
    ///
    /// If a patch for the module is active, the quick-fix manager may hand back a descriptor
    /// bound to the patch module instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntity`] if `id` does not name a method of the module
    pub fn new_method(&self, module: &ModuleRc, id: EntityId) -> Result<MethodRc> {
        if let Some(patched) = self.quick_fix.check_and_get_patch(self, module, id)? {
            return Ok(patched);
        }
        self.materialize_method(module, id)
    }

    /// Materializes a descriptor for method `id` of `module` bound to the module's own pool,
    /// bypassing patch substitution
    pub(crate) fn materialize_method(&self, module: &ModuleRc, id: EntityId) -> Result<MethodRc> {
        let literal = module.method(id)?;
        let pool = self.find_or_create_constpool(module, literal.constpool_index)?;
        Ok(Arc::new(Method::new(&literal, &pool)))
    }

    /// Returns the method in slot `slot` of `pool`, materializing and caching it on first use.
    ///
    /// Substituted patch descriptors are never cached in the base pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not resolve to a method of the module
    pub fn load_method(
        &self,
        module: &ModuleRc,
        pool: &ConstantPoolRc,
        slot: usize,
    ) -> Result<MethodRc> {
        if let ConstantSlot::Method(method) = pool.slot(slot) {
            return Ok(method);
        }

        let id = module.resolve_index(pool.index(), slot_index(slot)?)?;
        let method = self.new_method(module, id)?;
        if method.is_bound_to(module.name()) {
            pool.set_slot(slot, ConstantSlot::Method(method.clone()));
        }
        Ok(method)
    }

    /// Returns the class literal in slot `slot` of `pool`, materializing it on first use with
    /// one function template per method entry of the literal buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not resolve to a literal buffer of the module
    pub fn load_class_literal(
        &self,
        module: &ModuleRc,
        pool: &ConstantPoolRc,
        slot: usize,
        record: &ModuleRecordRc,
    ) -> Result<ClassLiteralRc> {
        if let ConstantSlot::ClassLiteral(literal) = pool.slot(slot) {
            return Ok(literal);
        }

        let literal_id = module.resolve_index(pool.index(), slot_index(slot)?)?;
        let buffer = module.literal(literal_id)?;

        let mut templates = Vec::new();
        for method_id in buffer.methods() {
            let method = self.new_method(module, method_id)?;
            let template = Arc::new(FunctionTemplate::new(
                method,
                Some(self.binding_record(record, module.name())),
            ));
            self.heap
                .alloc(HeapObject::FunctionTemplate(template.clone()));
            templates.push(template);
        }

        let literal = Arc::new(ClassLiteral {
            literal_id,
            templates,
        });
        pool.set_slot(slot, ConstantSlot::ClassLiteral(literal.clone()));
        Ok(literal)
    }

    /// Returns the string in slot `slot` of `pool`, materializing it on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not resolve to a string of the module
    pub fn load_string(
        &self,
        module: &ModuleRc,
        pool: &ConstantPoolRc,
        slot: usize,
    ) -> Result<Arc<str>> {
        if let ConstantSlot::String(value) = pool.slot(slot) {
            return Ok(value);
        }

        let id = module.resolve_index(pool.index(), slot_index(slot)?)?;
        let value = module.string(id)?;
        self.heap.alloc(HeapObject::String(value.clone()));
        pool.set_slot(slot, ConstantSlot::String(value.clone()));
        Ok(value)
    }

    /// Record a function over a method of `file_name` should execute in, when created while
    /// `record` is evaluating
    fn binding_record(&self, record: &ModuleRecordRc, file_name: &str) -> ModuleRecordRc {
        if record.file_name() == file_name {
            return record.clone();
        }
        self.find_patch_module(record.record_name())
            .unwrap_or_else(|| record.clone())
    }

    /// Allocates a closure over `method`, bound to the record it executes in
    pub fn new_closure(&self, method: MethodRc, record: &ModuleRecordRc) -> ClosureRc {
        let module = match method.module_name() {
            Some(file_name) => self.binding_record(record, &file_name),
            None => record.clone(),
        };
        let closure = Arc::new(Closure::new(method, Some(module)));
        self.heap.alloc(HeapObject::Closure(closure.clone()));
        closure
    }

    /// Returns the record `record_name` of `module`, creating it on first use
    pub fn resolve_record(&self, module: &ModuleRc, record_name: &str) -> ModuleRecordRc {
        self.records
            .entry((module.name().to_string(), record_name.to_string()))
            .or_insert_with(|| self.new_module_record(module, record_name))
            .clone()
    }

    /// Creates a fresh, unlinked record of `module`
    pub fn new_module_record(&self, module: &ModuleRc, record_name: &str) -> ModuleRecordRc {
        let record = Arc::new(ModuleRecord::new(record_name, module.name()));
        self.heap.alloc(HeapObject::ModuleRecord(record.clone()));
        record
    }

    /// Runs record `record_name` of module `file_name`, once.
    ///
    /// Before the module is loaded the quick-fix manager is given the chance to discover a
    /// patch for it, so a patch found here applies through substitution. The record's own
    /// entry function always runs from the module's pool; only the functions it defines are
    /// substituted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if the module cannot be loaded, or the error of the
    /// entry-point run
    pub fn execute_module(&self, file_name: &str, record_name: &str) -> Result<ModuleRecordRc> {
        if let Err(error) = self.load_patch_if_needed(file_name) {
            log::error!("Patch discovery for {file_name} failed: {error}");
        }

        let module = self.load_module(file_name, None)?;
        let Some(entry) = module.entry_method(record_name) else {
            return Err(Error::Error(format!(
                "{record_name} has no entry function in {file_name}"
            )));
        };

        let record = self.resolve_record(&module, record_name);
        if record.status() == ModuleStatus::Evaluated {
            return Ok(record);
        }

        let entry = self.materialize_method(&module, entry.id)?;
        self.executor.instantiate(self, &record, &module)?;
        self.executor.evaluate(self, &record, &module, &entry)?;
        Ok(record)
    }

    /// Registers `record` as the execution context of `record_name` for patch entry runs
    pub fn add_patch_module(&self, record_name: &str, record: ModuleRecordRc) {
        self.patch_modules.insert(record_name.to_string(), record);
    }

    /// Returns the execution context registered for `record_name`
    #[must_use]
    pub fn find_patch_module(&self, record_name: &str) -> Option<ModuleRecordRc> {
        self.patch_modules
            .get(record_name)
            .map(|entry| entry.value().clone())
    }

    /// Forgets every registered patch execution context
    pub fn clear_patch_modules(&self) {
        self.patch_modules.clear();
    }

    /// Evicts the pools of modules that are no longer loaded, unless pinned, then runs a full
    /// collection. Returns the number of reclaimed heap objects.
    pub fn collect_garbage(&self) -> usize {
        self.constpools.retain(|file_name, pools| {
            if self.modules.contains_key(file_name) {
                return true;
            }
            pools.retain(|_, pool| {
                self.heap
                    .is_pinned(&HeapObject::ConstantPool(pool.clone()))
            });
            !pools.is_empty()
        });
        self.gc().collect_full()
    }

    /// Hot-patches the loaded base module `base_file` with `patch_file`.
    ///
    /// # Errors
    ///
    /// See [`QuickFixManager::load_patch`]
    pub fn load_patch(&self, patch_file: &str, base_file: &str) -> Result<()> {
        self.quick_fix.load_patch(self, patch_file, base_file)
    }

    /// Hot-patches `base_file` with `patch_file`, both supplied as buffers.
    ///
    /// # Errors
    ///
    /// See [`QuickFixManager::load_patch_from_buffers`]
    pub fn load_patch_from_buffers(
        &self,
        patch_file: &str,
        patch_buffer: &[u8],
        base_file: &str,
        base_buffer: &[u8],
    ) -> Result<()> {
        self.quick_fix
            .load_patch_from_buffers(self, patch_file, patch_buffer, base_file, base_buffer)
    }

    /// Reverts the patch `patch_file`.
    ///
    /// # Errors
    ///
    /// See [`QuickFixManager::unload_patch`]
    pub fn unload_patch(&self, patch_file: &str) -> Result<()> {
        self.quick_fix.unload_patch(self, patch_file)
    }

    /// True if the exception's stack names a method of `patch_file`
    #[must_use]
    pub fn is_quick_fix_caused_exception(&self, exception: &str, patch_file: &str) -> bool {
        self.quick_fix
            .is_quick_fix_caused_exception(self, exception, patch_file)
    }

    /// Asks the discovery callback, once per base module, whether a patch exists and loads it.
    ///
    /// # Errors
    ///
    /// See [`QuickFixManager::load_patch_if_needed`]
    pub fn load_patch_if_needed(&self, base_file: &str) -> Result<()> {
        self.quick_fix.load_patch_if_needed(self, base_file)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("modules", &self.modules.len())
            .field("stage", &self.stage())
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

fn slot_index(slot: usize) -> Result<u16> {
    u16::try_from(slot).map_err(|_| malformed_error!("Constant pool slot {} out of range", slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{BytecodeBuilder, ModuleBuilder},
        test::{class_module, RecordingExecutor},
    };

    fn runtime_with(module: ModuleRc) -> Runtime {
        Runtime::new(MemoryModuleLoader::new().with(module))
    }

    #[test]
    fn execute_creates_pools_and_closures() {
        let runtime = runtime_with(class_module("base.abc", "m", 1));
        assert!(!runtime.has_cached_constpool("base.abc"));

        let record = runtime.execute_module("base.abc", "com/app/Index").unwrap();
        assert_eq!(record.status(), ModuleStatus::Evaluated);
        assert!(runtime.has_cached_constpool("base.abc"));

        let pool = runtime.find_constpool("base.abc", 0).unwrap();
        assert_eq!(pool.methods().len(), 2);
        let literals = pool.class_literals();
        assert_eq!(literals.len(), 1);
        assert_eq!(literals[0].1.templates.len(), 1);

        let closures = runtime
            .heap()
            .iter()
            .filter(|(_, object)| matches!(object, HeapObject::Closure(_)))
            .count();
        assert_eq!(closures, 2);

        // A second execution reuses the evaluated record.
        let again = runtime.execute_module("base.abc", "com/app/Index").unwrap();
        assert!(Arc::ptr_eq(&record, &again));
    }

    #[test]
    fn missing_module() {
        let runtime = Runtime::new(MemoryModuleLoader::new());
        assert!(matches!(
            runtime.execute_module("nope.abc", "rec"),
            Err(Error::FileNotFound(_))
        ));
        assert!(runtime.find_module("nope.abc").is_none());
    }

    #[test]
    fn throw_is_abrupt_completion() {
        let mut builder = ModuleBuilder::new("base.abc");
        builder.function("rec", "func_main_0", BytecodeBuilder::new().throw());
        let runtime = runtime_with(builder.build().unwrap());

        let result = runtime.execute_module("base.abc", "rec");
        assert!(matches!(result, Err(Error::AbruptCompletion(_))));
    }

    #[test]
    fn unknown_compile_unit() {
        let module = class_module("base.abc", "m", 1);
        let runtime = runtime_with(module.clone());
        assert!(runtime.find_or_create_constpool(&module, 0).is_ok());
        assert!(runtime.find_or_create_constpool(&module, 5).is_err());
    }

    #[test]
    fn unshared_pools_are_cached() {
        let module = class_module("base.abc", "m", 1);
        let runtime = runtime_with(module.clone());
        let pool = runtime.find_or_create_constpool(&module, 0).unwrap();

        let first = runtime.unshare_constpool(&pool);
        let second = runtime.unshare_constpool(&pool);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn collect_evicts_pools_of_removed_modules() {
        let module = class_module("base.abc", "m", 1);
        let runtime = runtime_with(module.clone());
        runtime.execute_module("base.abc", "com/app/Index").unwrap();
        drop(module);

        runtime.remove_module("base.abc");
        assert!(runtime.has_cached_constpool("base.abc"));

        runtime.collect_garbage();
        assert!(!runtime.has_cached_constpool("base.abc"));
        assert_eq!(runtime.heap().object_count(), 0);
    }

    #[test]
    fn custom_executor() {
        let executor = RecordingExecutor::default();
        let runtime = runtime_with(class_module("base.abc", "m", 1)).with_executor(executor.clone());

        runtime.execute_module("base.abc", "com/app/Index").unwrap();
        assert_eq!(executor.evaluated(), vec!["base.abc:com/app/Index:func_main_0".to_string()]);
    }

    #[test]
    fn stage_default() {
        let runtime = Runtime::new(MemoryModuleLoader::new());
        assert_eq!(runtime.stage(), StageOfHotReload::Initial);
        runtime.set_stage(StageOfHotReload::BeginExecutePatchmain);
        assert_eq!(runtime.stage().to_string(), "BEGIN_EXECUTE_PATCHMAIN");
    }
}
