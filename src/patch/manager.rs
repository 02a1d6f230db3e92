//! The quick-fix manager.
//!
//! Owns every active [`PatchInfo`], keyed by base module, and drives the protocol:
//!
//! - [`QuickFixManager::load_patch`] / [`QuickFixManager::load_patch_from_buffers`] hot-patch
//!   an executed base module
//! - [`QuickFixManager::load_patch_if_needed`] asks the discovery callback once per base
//!   module and, if the base has not executed yet, applies the patch through substitution
//! - [`QuickFixManager::unload_patch`] reverts a session
//! - [`QuickFixManager::is_quick_fix_caused_exception`] attributes a crash to patch code
//!
//! At most one session exists per base module.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use dashmap::DashMap;

use crate::{
    metadata::{module::ModuleRc, token::EntityId},
    patch::{
        catalog::generate_patch_info,
        classinfo::{collect_class_info, ClassInfo},
        config::QuickFixConfig,
        entry::{execute_func_or_patch_main, Direction},
        identity::{method_identity, normalize_method_name},
        loader::{load_patch_internal, unload_patch_internal},
        session::PatchInfo,
        PatchState,
    },
    runtime::{Method, MethodRc, ModuleRecord, Runtime},
    Error, Result,
};

/// A patch module reported by the discovery callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSource {
    /// File name of the patch module
    pub file_name: String,
    /// Content of the patch module; empty to let the loader read `file_name`
    pub bytes: Vec<u8>,
}

/// Discovery callback: reports the patch for a base module, if one exists
pub trait PatchQuery: Send + Sync {
    /// Returns the patch for `base_file`
    fn query(&self, base_file: &str) -> Option<PatchSource>;
}

impl<F> PatchQuery for F
where
    F: Fn(&str) -> Option<PatchSource> + Send + Sync,
{
    fn query(&self, base_file: &str) -> Option<PatchSource> {
        self(base_file)
    }
}

/// Where a load request takes its modules from
struct LoadRequest<'a> {
    patch_file: &'a str,
    patch_buffer: Option<&'a [u8]>,
    base_file: &'a str,
    base_buffer: Option<&'a [u8]>,
    allow_cold: bool,
}

/// Patch session manager
pub struct QuickFixManager {
    config: QuickFixConfig,
    query: Option<Box<dyn PatchQuery>>,
    sessions: RwLock<HashMap<String, PatchInfo>>,
    checked_files: Mutex<HashSet<String>>,
    class_info: DashMap<String, Arc<ClassInfo>>,
}

impl QuickFixManager {
    /// Creates a manager without a discovery callback
    #[must_use]
    pub fn new(config: QuickFixConfig) -> Self {
        QuickFixManager {
            config,
            query: None,
            sessions: RwLock::new(HashMap::new()),
            checked_files: Mutex::new(HashSet::new()),
            class_info: DashMap::new(),
        }
    }

    /// Installs the discovery callback
    pub fn set_query(&mut self, query: Box<dyn PatchQuery>) {
        self.query = Some(query);
    }

    /// Replaces the configuration
    pub fn set_config(&mut self, config: QuickFixConfig) {
        self.config = config;
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &QuickFixConfig {
        &self.config
    }

    /// Class info of `module`, recovered once per module
    pub fn class_info(&self, module: &ModuleRc) -> Arc<ClassInfo> {
        self.class_info
            .entry(module.name().to_string())
            .or_insert_with(|| {
                Arc::new(collect_class_info(module, self.config.parallel_class_scan))
            })
            .clone()
    }

    fn has_session(&self, base_file: &str) -> bool {
        read_lock!(self.sessions).contains_key(base_file)
    }

    /// Hot-patches the executed base module `base_file` with `patch_file`.
    ///
    /// # Errors
    ///
    /// - [`Error::PatchHasLoaded`] if a session exists for `base_file`
    /// - [`Error::FileNotExecuted`] if the base module is not loaded or has not executed
    /// - [`Error::FileNotFound`] if the patch module cannot be loaded
    /// - [`Error::PackageNotEsModule`] if either module is a bundle
    /// - [`Error::AbruptCompletion`] if the patch's top-level code throws; the session is
    ///   kept and can be unloaded
    pub fn load_patch(&self, runtime: &Runtime, patch_file: &str, base_file: &str) -> Result<()> {
        self.load(
            runtime,
            &LoadRequest {
                patch_file,
                patch_buffer: None,
                base_file,
                base_buffer: None,
                allow_cold: false,
            },
        )
    }

    /// Hot-patches `base_file` with `patch_file`, both supplied as buffers. A base module that
    /// is already loaded is reused.
    ///
    /// # Errors
    ///
    /// See [`QuickFixManager::load_patch`]
    pub fn load_patch_from_buffers(
        &self,
        runtime: &Runtime,
        patch_file: &str,
        patch_buffer: &[u8],
        base_file: &str,
        base_buffer: &[u8],
    ) -> Result<()> {
        self.load(
            runtime,
            &LoadRequest {
                patch_file,
                patch_buffer: Some(patch_buffer),
                base_file,
                base_buffer: Some(base_buffer),
                allow_cold: false,
            },
        )
    }

    /// Consults the discovery callback for `base_file`, at most once per base module, and
    /// loads the reported patch. A base module that has not executed yet is patched cold.
    ///
    /// # Errors
    ///
    /// Returns the error of the load; a missing callback or patch is not an error
    pub fn load_patch_if_needed(&self, runtime: &Runtime, base_file: &str) -> Result<()> {
        let Some(query) = &self.query else {
            return Ok(());
        };
        if !lock!(self.checked_files).insert(base_file.to_string()) {
            return Ok(());
        }

        let Some(source) = query.query(base_file) else {
            log::trace!("No patch for {base_file}");
            return Ok(());
        };
        log::info!("Discovered patch {} for {base_file}", source.file_name);

        let patch_buffer = (!source.bytes.is_empty()).then_some(source.bytes.as_slice());
        self.load(
            runtime,
            &LoadRequest {
                patch_file: &source.file_name,
                patch_buffer,
                base_file,
                base_buffer: None,
                allow_cold: true,
            },
        )
    }

    fn load(&self, runtime: &Runtime, request: &LoadRequest<'_>) -> Result<()> {
        log::info!(
            "Loading patch {} for {}",
            request.patch_file,
            request.base_file
        );
        if self.has_session(request.base_file) {
            log::error!("Cannot load a second patch for {}", request.base_file);
            return Err(Error::PatchHasLoaded(request.base_file.to_string()));
        }

        let patch_was_loaded = runtime.find_module(request.patch_file).is_some();
        let result = self.load_modules(runtime, request);
        if let Err(error) = &result {
            log::error!("Loading patch {} failed: {error}", request.patch_file);
            let kept = self.with_session(request.base_file, |info| {
                info.patch_file_name == request.patch_file
            });
            if !patch_was_loaded && kept != Some(true) {
                runtime.remove_module(request.patch_file);
            }
        } else {
            log::info!("Loaded patch {}", request.patch_file);
        }
        result
    }

    fn load_modules(&self, runtime: &Runtime, request: &LoadRequest<'_>) -> Result<()> {
        let base = match (request.base_buffer, runtime.find_module(request.base_file)) {
            (_, Some(base)) => base,
            (Some(buffer), None) => runtime.load_module(request.base_file, Some(buffer))?,
            (None, None) if request.allow_cold => runtime.load_module(request.base_file, None)?,
            (None, None) => return Err(Error::FileNotExecuted(request.base_file.to_string())),
        };
        let patch = runtime.load_module(request.patch_file, request.patch_buffer)?;

        for module in [&base, &patch] {
            if !module.is_mergeable() {
                return Err(Error::PackageNotEsModule(module.name().to_string()));
            }
        }

        let hot = runtime.has_cached_constpool(base.name());
        if !hot && !request.allow_cold {
            return Err(Error::FileNotExecuted(base.name().to_string()));
        }

        let mut info = PatchInfo::new(patch.name(), base.name());
        generate_patch_info(&patch, &self.class_info(&patch), &self.config, &mut info)?;

        let result = if hot {
            let base_classes = self.class_info(&base);
            load_patch_internal(runtime, &base, &patch, &base_classes, &self.config, &mut info)
        } else {
            log::info!(
                "{} has not executed, {} applies on materialization",
                base.name(),
                patch.name()
            );
            info.cold = true;
            Ok(())
        };

        write_lock!(self.sessions).insert(base.name().to_string(), info);
        result
    }

    /// Reverts the session of `patch_file`.
    ///
    /// The session is removed first. Saved base code is spliced back, the touched base
    /// records are re-run and the heap relinked; then the patch module is dropped and, if
    /// configured, a full collection runs. Cold sessions only drop the session: descriptors
    /// substituted from the patch keep executing it.
    ///
    /// # Errors
    ///
    /// - [`Error::PatchNotLoaded`] if no session belongs to `patch_file`
    /// - [`Error::AbruptCompletion`] if the base module's top-level code throws; the unload
    ///   completes regardless
    pub fn unload_patch(&self, runtime: &Runtime, patch_file: &str) -> Result<()> {
        log::info!("Unloading patch {patch_file}");

        let removed = {
            let mut sessions = write_lock!(self.sessions);
            let base_file = sessions
                .iter()
                .find(|(_, info)| info.patch_file_name == patch_file)
                .map(|(base_file, _)| base_file.clone());
            base_file.and_then(|base_file| sessions.remove(&base_file))
        };
        let Some(mut info) = removed else {
            log::error!("Patch {patch_file} is not loaded");
            return Err(Error::PatchNotLoaded(patch_file.to_string()));
        };

        if info.cold {
            log::info!("Dropped cold session of {patch_file}");
            return Ok(());
        }

        let result = match runtime.find_module(&info.base_file_name) {
            Some(base) => unload_patch_internal(runtime, &base, &mut info),
            None => Err(Error::Internal(format!(
                "Base module {} of {patch_file} is not loaded",
                info.base_file_name
            ))),
        };

        // Releases the pinned base pools.
        drop(info);
        runtime.remove_module(patch_file);
        self.class_info.remove(patch_file);
        if self.config.collect_after_unload {
            runtime.collect_garbage();
        }

        match &result {
            Ok(()) => log::info!("Unloaded patch {patch_file}"),
            Err(error) => log::error!("Unloading patch {patch_file} failed: {error}"),
        }
        result
    }

    /// Substitution hook of the cold path.
    ///
    /// Called whenever the runtime materializes a method of `module`. If a session exists
    /// for the module and its catalog holds a method with the same identity key, returns a
    /// new descriptor bound to the patch module's pool. The patch record's execution context
    /// is created first if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the error of the patch's top-level code if the execution context had to be
    /// created
    ///
    /// # Panics
    ///
    /// Panics if the execution context is still missing after it was created
    pub fn check_and_get_patch(
        &self,
        runtime: &Runtime,
        module: &ModuleRc,
        id: EntityId,
    ) -> Result<Option<MethodRc>> {
        let (patch_file, source, records) = {
            let sessions = read_lock!(self.sessions);
            let Some(info) = sessions.get(module.name()) else {
                return Ok(None);
            };

            let Ok(key) = method_identity(module, id, &self.class_info(module)) else {
                return Ok(None);
            };
            let Some(source) = info.patch_methods.get(&key).cloned() else {
                return Ok(None);
            };
            log::debug!("Substituting {key} from {}", info.patch_file_name);
            (
                info.patch_file_name.clone(),
                source,
                info.replaced_record_names.clone(),
            )
        };

        let Some(patch) = runtime.find_module(&patch_file) else {
            return Err(Error::Internal(format!("Patch {patch_file} is not loaded")));
        };

        if runtime.find_patch_module(&source.record_name).is_none() {
            let mut records = records;
            records.insert(source.record_name.clone());
            execute_func_or_patch_main(runtime, &patch, &records, Direction::Load)?;

            if runtime.find_patch_module(&source.record_name).is_none() {
                log::error!(
                    "No execution context for {} after running {patch_file}",
                    source.record_name
                );
                panic!(
                    "execution context of {} missing after it was created",
                    source.record_name
                );
            }
        }

        let pool = runtime.find_or_create_constpool(&patch, source.constpool_index)?;
        Ok(Some(Arc::new(Method::new(&source, &pool))))
    }

    /// True if a frame of the formatted call stack `exception` names a method of
    /// `patch_file`.
    ///
    /// Entry and bootstrap functions of the patch are never counted. An empty stack, or a
    /// patch that cannot be loaded, yields `false`.
    #[must_use]
    pub fn is_quick_fix_caused_exception(
        &self,
        runtime: &Runtime,
        exception: &str,
        patch_file: &str,
    ) -> bool {
        let names = parse_stack_info(exception, &self.config.stack_frame_marker);
        if names.is_empty() {
            return false;
        }

        let loaded = runtime.find_module(patch_file);
        let patch = match &loaded {
            Some(patch) => patch.clone(),
            None => match runtime.load_module(patch_file, None) {
                Ok(patch) => patch,
                Err(error) => {
                    log::debug!("Cannot inspect {patch_file}: {error}");
                    return false;
                }
            },
        };

        let classes = match &loaded {
            Some(_) => self.class_info(&patch),
            None => Arc::new(collect_class_info(&patch, self.config.parallel_class_scan)),
        };
        let caused = patch.methods().any(|method| {
            if method.is_entry(patch.entry_function_name()) || self.config.is_reserved(&method.name)
            {
                return false;
            }
            let name = normalize_method_name(&method.name, classes.class_name(method.id));
            names.contains(name)
        });

        if loaded.is_none() {
            runtime.remove_module(patch_file);
        }
        caused
    }

    /// File name a record is attributed to: the base module if the record belongs to an
    /// active patch module, else its own module
    #[must_use]
    pub fn base_file_name(&self, record: &ModuleRecord) -> String {
        read_lock!(self.sessions)
            .values()
            .find(|info| info.patch_file_name == record.file_name())
            .map_or_else(
                || record.file_name().to_string(),
                |info| info.base_file_name.clone(),
            )
    }

    /// State of the base module `base_file`
    #[must_use]
    pub fn patch_state(&self, base_file: &str) -> PatchState {
        match read_lock!(self.sessions).get(base_file) {
            Some(info) if info.cold => PatchState::ColdQueryOnly,
            Some(_) => PatchState::HotLoaded,
            None => PatchState::NoPatch,
        }
    }

    /// Runs `f` on the session of `base_file`, if one exists
    pub fn with_session<R>(&self, base_file: &str, f: impl FnOnce(&PatchInfo) -> R) -> Option<R> {
        read_lock!(self.sessions).get(base_file).map(f)
    }

    /// Records whose top-level code runs when the session of `base_file` is loaded or unloaded
    #[must_use]
    pub fn replaced_records(&self, base_file: &str) -> BTreeSet<String> {
        self.with_session(base_file, |info| info.replaced_record_names.clone())
            .unwrap_or_default()
    }

    /// Forgets which base modules the discovery callback was asked about, and every cached
    /// class info
    pub fn reset(&self) {
        lock!(self.checked_files).clear();
        self.class_info.clear();
    }
}

impl std::fmt::Debug for QuickFixManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickFixManager")
            .field("config", &self.config)
            .field("sessions", &read_lock!(self.sessions).len())
            .field("has_query", &self.query.is_some())
            .finish_non_exhaustive()
    }
}

/// Method names of every frame of a formatted call stack.
///
/// A frame is a line containing `marker`; its name is the text between the marker and the
/// next `(`, trimmed.
#[must_use]
pub fn parse_stack_info(stack: &str, marker: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    if marker.is_empty() {
        return names;
    }

    for line in stack.lines() {
        let Some(start) = line.find(marker) else {
            continue;
        };
        let frame = &line[start + marker.len()..];
        let name = frame.split('(').next().unwrap_or_default().trim();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    names
}
