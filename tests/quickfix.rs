//! Integration tests for the patch protocol.
//!
//! Every test builds a base and a patch module in memory, runs the base, and drives the
//! protocol through the public [`Runtime`] façade.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use quickfix::{
    metadata::{BytecodeBuilder, EntityId, FunctionKind, ModuleBuilder, ModuleKind, ModuleRc},
    patch::{collect_class_info, BaseMethodSlot, PatchSource, PatchState, PoolVariant},
    prelude::*,
    runtime::{ClosureRc, ConstantSlot, ModuleRecordRc},
};

const RECORD: &str = "com/app/Index";

/// Logs every evaluation as `file:record:function`, then delegates to [`DefaultExecutor`]
#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl Recorder {
    fn failing_on(file_name: &str) -> Self {
        Recorder {
            log: Arc::default(),
            fail_on: Some(file_name.to_string()),
        }
    }

    fn evaluated(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl EntryPointExecutor for Recorder {
    fn instantiate(&self, runtime: &Runtime, record: &ModuleRecordRc, module: &ModuleRc) -> Result<()> {
        DefaultExecutor.instantiate(runtime, record, module)
    }

    fn evaluate(
        &self,
        runtime: &Runtime,
        record: &ModuleRecordRc,
        module: &ModuleRc,
        entry: &MethodRc,
    ) -> Result<()> {
        self.log.lock().unwrap().push(format!(
            "{}:{}:{}",
            record.file_name(),
            record.record_name(),
            entry.name()
        ));
        if self.fail_on.as_deref() == Some(record.file_name()) {
            return Err(Error::AbruptCompletion("injected".to_string()));
        }
        DefaultExecutor.evaluate(runtime, record, module, entry)
    }
}

fn nops(count: u32) -> BytecodeBuilder {
    (0..count).fold(BytecodeBuilder::new(), |code, _| code.nop())
}

/// Record `RECORD` with free functions `names`, each defined by `func_main_0`
fn free_functions(file_name: &str, names: &[&str], variant: u32) -> Result<ModuleRc> {
    let mut builder = ModuleBuilder::new(file_name);
    let ids: Vec<EntityId> = names
        .iter()
        .map(|name| {
            builder.function(RECORD, name, nops(variant).lda_imm(variant).return_value())
        })
        .collect();
    let main = ids
        .iter()
        .fold(BytecodeBuilder::new(), |code, id| code.define_func(*id));
    builder.function(RECORD, "func_main_0", main.return_undefined());
    builder.build()
}

/// Record `RECORD` with class `A` owning `member` and a free function `foo`
fn with_class(file_name: &str, member: &str, variant: u32) -> Result<ModuleRc> {
    let mut builder = ModuleBuilder::new(file_name);
    let m = builder.function_with_kind(
        RECORD,
        member,
        FunctionKind::ClassMethod,
        nops(variant).lda_imm(variant).return_value(),
    );
    let ctor = builder.function_with_kind(
        RECORD,
        "#~A=#A",
        FunctionKind::BaseConstructor,
        nops(variant).return_undefined(),
    );
    let foo = builder.function(RECORD, "foo", nops(variant).return_undefined());
    let literal = builder.class_literal(&[("m", m)]);
    builder.function(
        RECORD,
        "func_main_0",
        BytecodeBuilder::new()
            .define_class(ctor, literal, 0)
            .define_func(foo)
            .return_undefined(),
    );
    builder.build()
}

fn runtime_with(modules: Vec<ModuleRc>) -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    let loader = MemoryModuleLoader::new();
    for module in modules {
        loader.register(module);
    }
    Runtime::new(loader).with_config(QuickFixConfig::sequential())
}

type Snapshot = Vec<(*const Method, Arc<[u8]>, EntityId, Option<String>)>;

fn snapshot(runtime: &Runtime, file_name: &str) -> Snapshot {
    let mut methods = Vec::new();
    for pool in runtime.find_constpools(file_name) {
        for (_, method) in pool.methods() {
            methods.push(method);
        }
        for (_, literal) in pool.class_literals() {
            for template in &literal.templates {
                methods.push(template.method().clone());
            }
        }
    }
    methods
        .into_iter()
        .map(|method| {
            (
                Arc::as_ptr(&method),
                method.bytecode(),
                method.method_id(),
                method.module_name(),
            )
        })
        .collect()
}

#[test]
fn test_scenario_a_free_function_slot() -> Result<()> {
    let mut builder = ModuleBuilder::new("base.abc");
    let strings: Vec<EntityId> = ["a", "b", "c"].iter().map(|s| builder.string(s)).collect();
    let foo = builder.function(RECORD, "foo", BytecodeBuilder::new().lda_imm(1).return_value());
    builder.function(
        RECORD,
        "func_main_0",
        BytecodeBuilder::new()
            .lda_str(strings[0])
            .lda_str(strings[1])
            .lda_str(strings[2])
            .define_func(foo)
            .return_undefined(),
    );
    let base = builder.build()?;
    let patch = free_functions("patch.abc", &["foo"], 2)?;
    let patched_foo = patch.methods().find(|method| method.name == "foo").unwrap();

    let runtime = runtime_with(vec![base.clone(), patch]);
    runtime.execute_module("base.abc", RECORD)?;
    runtime.load_patch("patch.abc", "base.abc")?;

    let pool = runtime.find_constpool("base.abc", 0).unwrap();
    let ConstantSlot::Method(method) = pool.slot(3) else {
        panic!("slot 3 should hold foo");
    };
    assert!(Arc::ptr_eq(&method.bytecode(), &patched_foo.bytecode));
    assert!(method.is_bound_to("patch.abc"));

    let original = runtime
        .quick_fix()
        .with_session("base.abc", |info| {
            info.base_methods
                .get(&BaseMethodSlot::method(0, 3, PoolVariant::Shared))
                .cloned()
        })
        .flatten()
        .unwrap();
    assert_eq!(original.id, foo);
    assert!(Arc::ptr_eq(&original.bytecode, &base.method(foo)?.bytecode));
    Ok(())
}

#[test]
fn test_scenario_b_bootstrap_only_patch() -> Result<()> {
    let mut builder = ModuleBuilder::new("patch.abc");
    builder.function(RECORD, "patch_main_0", BytecodeBuilder::new().return_undefined());
    builder.function(RECORD, "patch_main_1", BytecodeBuilder::new().return_undefined());
    let patch = builder.build()?;

    let recorder = Recorder::default();
    let runtime = runtime_with(vec![free_functions("base.abc", &["foo"], 1)?, patch])
        .with_executor(recorder.clone());
    runtime.execute_module("base.abc", RECORD)?;
    let before = snapshot(&runtime, "base.abc");

    runtime.load_patch("patch.abc", "base.abc")?;

    let (catalog, spliced, records) = runtime
        .quick_fix()
        .with_session("base.abc", |info| {
            (
                info.patch_methods.len(),
                info.spliced_count(),
                info.replaced_record_names.len(),
            )
        })
        .unwrap();
    assert_eq!((catalog, spliced, records), (0, 0, 0));
    assert_eq!(recorder.evaluated(), vec![format!("base.abc:{RECORD}:func_main_0")]);
    assert_eq!(snapshot(&runtime, "base.abc"), before);
    Ok(())
}

#[test]
fn test_scenario_c_class_member_owner() -> Result<()> {
    let base = with_class("base.abc", "m", 1)?;
    let m = base.methods().find(|method| method.name == "m").unwrap();

    let classes = collect_class_info(&base, true);
    assert_eq!(classes.class_name(m.id), "A");
    Ok(())
}

#[test]
fn test_nested_names_match_across_builds() -> Result<()> {
    let base = with_class("base.abc", "#~A>#m", 1)?;
    let patch = with_class("patch.abc", "#~@0>#~A>#m^1", 2)?;
    let patched_m = patch
        .methods()
        .find(|method| method.name.ends_with("m^1"))
        .unwrap();

    let runtime = runtime_with(vec![base, patch]);
    runtime.execute_module("base.abc", RECORD)?;
    runtime.load_patch("patch.abc", "base.abc")?;

    let pool = runtime.find_constpool("base.abc", 0).unwrap();
    let (_, literal) = pool.class_literals().remove(0);
    let member = literal.templates[0].method();
    assert_eq!(member.method_id(), patched_m.id);
    assert_eq!(member.function_kind(), FunctionKind::ClassMethod);
    Ok(())
}

#[test]
fn test_scenario_d_exception_attribution() -> Result<()> {
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo", "baseOnly"], 1)?,
        free_functions("patch.abc", &["foo", "bar"], 2)?,
    ]);
    runtime.execute_module("base.abc", RECORD)?;
    runtime.load_patch("patch.abc", "base.abc")?;

    let patch_stack = "TypeError: x is undefined\n    at bar (patch.abc:4:9)\n    at baseOnly (base.abc:1:1)\n";
    let base_stack = "TypeError: x is undefined\n    at baseOnly (base.abc:1:1)\n    at func_main_0 (base.abc:9:1)\n";

    assert!(runtime.is_quick_fix_caused_exception(patch_stack, "patch.abc"));
    assert!(!runtime.is_quick_fix_caused_exception(base_stack, "patch.abc"));
    assert!(!runtime.is_quick_fix_caused_exception("", "patch.abc"));
    assert!(!runtime.is_quick_fix_caused_exception(patch_stack, "missing.abc"));
    Ok(())
}

#[test]
fn test_scenario_e_cold_substitution() -> Result<()> {
    let patch = free_functions("patch.abc", &["foo"], 2)?;
    let patched_foo = patch.methods().find(|method| method.name == "foo").unwrap();
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();

    let recorder = Recorder::default();
    let loader = MemoryModuleLoader::new()
        .with(free_functions("base.abc", &["foo"], 1)?)
        .with(patch);
    let runtime = Runtime::new(loader)
        .with_executor(recorder.clone())
        .with_quick_fix_query(move |base: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            (base == "base.abc").then(|| PatchSource {
                file_name: "patch.abc".to_string(),
                bytes: Vec::new(),
            })
        });

    runtime.load_patch_if_needed("base.abc")?;
    runtime.load_patch_if_needed("base.abc")?;
    assert_eq!(queries.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::ColdQueryOnly);
    assert_eq!(runtime.heap().object_count(), 0);

    let base = runtime.find_module("base.abc").unwrap();
    let foo = base.methods().find(|method| method.name == "foo").unwrap();
    let method = runtime.new_method(&base, foo.id)?;
    assert!(method.is_bound_to("patch.abc"));
    assert!(Arc::ptr_eq(&method.bytecode(), &patched_foo.bytecode));

    // The substitution created the patch record's execution context.
    assert_eq!(
        recorder.evaluated(),
        vec![format!("patch.abc:{RECORD}:func_main_0")]
    );
    assert_eq!(
        runtime.find_patch_module(RECORD).unwrap().file_name(),
        "patch.abc"
    );
    Ok(())
}

#[test]
fn test_cold_path_on_first_execution() -> Result<()> {
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
    ])
    .with_quick_fix_query(|_: &str| {
        Some(PatchSource {
            file_name: "patch.abc".to_string(),
            bytes: Vec::new(),
        })
    });

    runtime.execute_module("base.abc", RECORD)?;

    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::ColdQueryOnly);
    let closures: Vec<_> = runtime
        .heap()
        .iter()
        .filter_map(|(_, object)| match object {
            HeapObject::Closure(closure) => Some(closure),
            _ => None,
        })
        .collect();
    assert!(!closures.is_empty());
    assert!(closures
        .iter()
        .all(|closure| closure.method().is_bound_to("patch.abc")));
    Ok(())
}

#[test]
fn test_cold_first_execution_runs_each_entry_once() -> Result<()> {
    let recorder = Recorder::default();
    let loader = MemoryModuleLoader::new()
        .with(free_functions("base.abc", &["foo"], 1)?)
        .with(free_functions("patch.abc", &["foo"], 2)?);
    let runtime = Runtime::new(loader)
        .with_config(QuickFixConfig::sequential())
        .with_executor(recorder.clone())
        .with_quick_fix_query(|_: &str| {
            Some(PatchSource {
                file_name: "patch.abc".to_string(),
                bytes: Vec::new(),
            })
        });

    runtime.execute_module("base.abc", RECORD)?;

    assert_eq!(
        recorder.evaluated(),
        vec![
            format!("base.abc:{RECORD}:func_main_0"),
            format!("patch.abc:{RECORD}:func_main_0"),
        ]
    );
    assert!(runtime.has_cached_constpool("base.abc"));

    // Once the cold session is gone the executed base takes a hot patch.
    runtime.unload_patch("patch.abc")?;
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::NoPatch);
    runtime.load_patch("patch.abc", "base.abc")?;
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::HotLoaded);
    Ok(())
}

#[test]
fn test_round_trip_restores_everything() -> Result<()> {
    let runtime = runtime_with(vec![with_class("base.abc", "m", 1)?, with_class("patch.abc", "m", 2)?]);
    runtime.execute_module("base.abc", RECORD)?;
    let before = snapshot(&runtime, "base.abc");
    let closures: Vec<ClosureRc> = runtime
        .heap()
        .iter()
        .filter_map(|(_, object)| match object {
            HeapObject::Closure(closure) => Some(closure),
            _ => None,
        })
        .collect();
    assert_eq!(closures.len(), 2);

    runtime.load_patch("patch.abc", "base.abc")?;
    assert_eq!(runtime.stage(), StageOfHotReload::LoadEndExecutePatchmain);
    for closure in &closures {
        assert_eq!(closure.module().unwrap().file_name(), "patch.abc");
    }
    let patched = snapshot(&runtime, "base.abc");
    assert_eq!(patched.len(), before.len());
    for (old, new) in before.iter().zip(&patched) {
        assert_eq!(old.0, new.0, "descriptor moved");
        assert!(!Arc::ptr_eq(&old.1, &new.1), "descriptor not spliced");
        assert_eq!(new.3.as_deref(), Some("patch.abc"));
    }

    runtime.unload_patch("patch.abc")?;
    assert_eq!(runtime.stage(), StageOfHotReload::UnloadEndExecutePatchmain);
    assert_eq!(snapshot(&runtime, "base.abc"), before);
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::NoPatch);
    assert!(runtime.find_module("patch.abc").is_none());
    assert_eq!(runtime.heap().pinned_count(), 0);

    for closure in &closures {
        assert_eq!(closure.module().unwrap().file_name(), "base.abc");
    }
    Ok(())
}

#[test]
fn test_relink_moves_closures_and_drops_feedback() -> Result<()> {
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
    ]);
    runtime.execute_module("base.abc", RECORD)?;

    let closure = runtime
        .heap()
        .iter()
        .find_map(|(_, object)| match object {
            HeapObject::Closure(closure) => Some(closure),
            _ => None,
        })
        .unwrap();
    closure.record_call(0);
    assert!(closure.profile().is_some());

    runtime.load_patch("patch.abc", "base.abc")?;
    assert!(closure.profile().is_none());
    assert_eq!(closure.module().unwrap().file_name(), "patch.abc");
    Ok(())
}

#[test]
fn test_unload_without_splices_still_ends_the_stage() -> Result<()> {
    let mut builder = ModuleBuilder::new("patch.abc");
    builder.function("other/Rec", "func_main_0", BytecodeBuilder::new().return_undefined());
    let patch = builder.build()?;

    let recorder = Recorder::default();
    let runtime = runtime_with(vec![free_functions("base.abc", &["foo"], 1)?, patch])
        .with_executor(recorder.clone());
    runtime.execute_module("base.abc", RECORD)?;

    runtime.load_patch("patch.abc", "base.abc")?;
    assert_eq!(
        runtime.quick_fix().with_session("base.abc", |info| info.spliced_count()),
        Some(0)
    );
    assert_eq!(
        recorder.evaluated().last(),
        Some(&"patch.abc:other/Rec:func_main_0".to_string())
    );

    runtime.unload_patch("patch.abc")?;
    assert_eq!(runtime.stage(), StageOfHotReload::UnloadEndExecutePatchmain);
    assert!(runtime.find_patch_module("other/Rec").is_none());
    Ok(())
}

#[test]
fn test_at_most_one_session() -> Result<()> {
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
        free_functions("patch2.abc", &["foo"], 3)?,
    ]);
    runtime.execute_module("base.abc", RECORD)?;
    runtime.load_patch("patch.abc", "base.abc")?;
    let loaded = snapshot(&runtime, "base.abc");

    let again = runtime.load_patch("patch2.abc", "base.abc");
    assert_eq!(PatchErrorCode::from(&again), PatchErrorCode::PatchHasLoaded);
    assert_eq!(snapshot(&runtime, "base.abc"), loaded);
    assert!(runtime.find_module("patch2.abc").is_none());
    Ok(())
}

#[test]
fn test_unload_without_load() -> Result<()> {
    let runtime = runtime_with(vec![free_functions("base.abc", &["foo"], 1)?]);
    runtime.execute_module("base.abc", RECORD)?;
    let before = snapshot(&runtime, "base.abc");

    let result = runtime.unload_patch("patch.abc");
    assert_eq!(PatchErrorCode::from(&result), PatchErrorCode::PatchNotLoaded);
    assert_eq!(snapshot(&runtime, "base.abc"), before);
    Ok(())
}

#[test]
fn test_rejected_loads() -> Result<()> {
    let bundle = ModuleBuilder::new("bundle.abc")
        .kind(ModuleKind::Bundle)
        .build()?;
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
        bundle,
    ]);

    let not_executed = runtime.load_patch("patch.abc", "base.abc");
    assert_eq!(PatchErrorCode::from(&not_executed), PatchErrorCode::FileNotExecuted);

    runtime.load_module("base.abc", None)?;
    let loaded_only = runtime.load_patch("patch.abc", "base.abc");
    assert_eq!(PatchErrorCode::from(&loaded_only), PatchErrorCode::FileNotExecuted);

    runtime.execute_module("base.abc", RECORD)?;
    let missing = runtime.load_patch("missing.abc", "base.abc");
    assert_eq!(PatchErrorCode::from(&missing), PatchErrorCode::FileNotFound);

    let bundle = runtime.load_patch("bundle.abc", "base.abc");
    assert_eq!(PatchErrorCode::from(&bundle), PatchErrorCode::PackageNotEsModule);
    assert!(runtime.find_module("bundle.abc").is_none());

    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::NoPatch);
    assert!(runtime.load_patch("patch.abc", "base.abc").is_ok());
    Ok(())
}

#[test]
fn test_abrupt_completion_keeps_session() -> Result<()> {
    let recorder = Recorder::failing_on("patch.abc");
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
    ])
    .with_executor(recorder);
    runtime.execute_module("base.abc", RECORD)?;

    let result = runtime.load_patch("patch.abc", "base.abc");
    assert!(matches!(result, Err(Error::AbruptCompletion(_))));
    assert_eq!(PatchErrorCode::from(&result), PatchErrorCode::InternalError);
    assert_eq!(runtime.stage(), StageOfHotReload::LoadEndExecutePatchmain);

    // Splices are not rolled back, the session can still be unloaded.
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::HotLoaded);
    runtime.unload_patch("patch.abc")?;
    let pool = runtime.find_constpool("base.abc", 0).unwrap();
    assert!(pool
        .methods()
        .iter()
        .all(|(_, method)| method.is_bound_to("base.abc")));
    Ok(())
}

#[test]
fn test_load_from_buffers() -> Result<()> {
    let runtime = runtime_with(vec![
        free_functions("base.abc", &["foo"], 1)?,
        free_functions("patch.abc", &["foo"], 2)?,
    ]);
    runtime.execute_module("base.abc", RECORD)?;

    runtime.load_patch_from_buffers("patch.abc", &[0xAB], "base.abc", &[0xCD])?;
    assert_eq!(runtime.quick_fix().patch_state("base.abc"), PatchState::HotLoaded);

    let record = ModuleRecord::new(RECORD, "patch.abc");
    assert_eq!(runtime.quick_fix().base_file_name(&record), "base.abc");
    Ok(())
}
