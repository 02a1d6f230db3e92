//! Entry-point runner.
//!
//! Re-runs the top-level statements of a set of records. After a Load the patch module's
//! records run so patch-level top-level state exists; after an Unload the base module's
//! records run to restore the original state; the cold path runs the patch records when a
//! substituted method needs an execution context that does not exist yet.

use std::collections::BTreeSet;

use strum::Display;

use crate::{
    metadata::{
        method::MethodLiteralRc,
        module::{ModuleRc, PATCH_FUNCTION_NAME_0, PATCH_FUNCTION_NAME_1},
    },
    runtime::{Runtime, StageOfHotReload},
    Result,
};

/// Which operation is running the entry points
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Direction {
    /// A patch is being applied
    Load,
    /// A patch is being reverted
    Unload,
}

impl Direction {
    fn bootstrap_name(self) -> &'static str {
        match self {
            Direction::Load => PATCH_FUNCTION_NAME_0,
            Direction::Unload => PATCH_FUNCTION_NAME_1,
        }
    }

    fn end_stage(self) -> StageOfHotReload {
        match self {
            Direction::Load => StageOfHotReload::LoadEndExecutePatchmain,
            Direction::Unload => StageOfHotReload::UnloadEndExecutePatchmain,
        }
    }
}

/// Moves the runtime to the end stage of a run, however the run exits
struct StageGuard<'a> {
    runtime: &'a Runtime,
    end: StageOfHotReload,
}

impl<'a> StageGuard<'a> {
    fn begin(runtime: &'a Runtime, direction: Direction) -> Self {
        runtime.set_stage(StageOfHotReload::BeginExecutePatchmain);
        StageGuard {
            runtime,
            end: direction.end_stage(),
        }
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.runtime.set_stage(self.end);
    }
}

/// The function holding a record's top-level statements for `direction`: the matching
/// bootstrap function if the compiler emitted one, else the entry function
fn main_method(
    module: &ModuleRc,
    record_name: &str,
    direction: Direction,
) -> Option<MethodLiteralRc> {
    module
        .methods()
        .find(|method| {
            method.record_name == record_name && method.name == direction.bootstrap_name()
        })
        .or_else(|| module.entry_method(record_name))
}

/// Instantiates and evaluates a fresh module record for every name in `records`, then
/// registers it as the execution context of that record.
///
/// Records without top-level code are still instantiated and registered. Records the module
/// does not contain are skipped.
///
/// # Errors
///
/// Returns the first error of an instantiation or evaluation; the remaining records are not
/// run. The stage is set to the end stage of `direction` in every case.
pub fn execute_func_or_patch_main(
    runtime: &Runtime,
    module: &ModuleRc,
    records: &BTreeSet<String>,
    direction: Direction,
) -> Result<()> {
    let _stage = StageGuard::begin(runtime, direction);
    let executor = runtime.executor();

    for record_name in records {
        if !module.has_record(record_name) {
            log::debug!("{direction}: {record_name} is not part of {}", module.name());
            continue;
        }
        let record = runtime.new_module_record(module, record_name);
        executor.instantiate(runtime, &record, module)?;

        match main_method(module, record_name, direction) {
            Some(main) => {
                log::debug!(
                    "{direction}: running {} of {record_name} in {}",
                    main.name,
                    module.name()
                );
                let method = runtime.materialize_method(module, main.id)?;
                executor.evaluate(runtime, &record, module, &method)?;
            }
            None => log::debug!(
                "{direction}: {record_name} has no top-level code in {}",
                module.name()
            ),
        }

        runtime.add_patch_module(record_name, record);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{BytecodeBuilder, ModuleBuilder},
        runtime::{MemoryModuleLoader, ModuleStatus},
        test::RecordingExecutor,
        Error,
    };

    fn records(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn module() -> ModuleRc {
        let mut builder = ModuleBuilder::new("patch.abc");
        builder.function("a", "func_main_0", BytecodeBuilder::new().return_undefined());
        builder.function("a", "patch_main_0", BytecodeBuilder::new().return_undefined());
        builder.function("b", "func_main_0", BytecodeBuilder::new().return_undefined());
        builder.function("c", "helper", BytecodeBuilder::new().return_undefined());
        builder.build().unwrap()
    }

    #[test]
    fn prefers_bootstrap_functions() {
        let module = module();
        let executor = RecordingExecutor::default();
        let runtime =
            Runtime::new(MemoryModuleLoader::new().with(module.clone())).with_executor(executor.clone());
        runtime.load_module("patch.abc", None).unwrap();

        execute_func_or_patch_main(&runtime, &module, &records(&["a", "b", "c"]), Direction::Load)
            .unwrap();

        assert_eq!(
            executor.evaluated(),
            vec![
                "patch.abc:a:patch_main_0".to_string(),
                "patch.abc:b:func_main_0".to_string(),
            ]
        );
        assert_eq!(runtime.stage(), StageOfHotReload::LoadEndExecutePatchmain);
        for name in ["a", "b", "c"] {
            let record = runtime.find_patch_module(name).unwrap();
            assert_eq!(record.file_name(), "patch.abc");
        }
        assert_eq!(
            runtime.find_patch_module("a").unwrap().status(),
            ModuleStatus::Evaluated
        );
    }

    #[test]
    fn unload_falls_back_to_entry() {
        let module = module();
        let executor = RecordingExecutor::default();
        let runtime =
            Runtime::new(MemoryModuleLoader::new().with(module.clone())).with_executor(executor.clone());
        runtime.load_module("patch.abc", None).unwrap();

        execute_func_or_patch_main(&runtime, &module, &records(&["a"]), Direction::Unload).unwrap();

        assert_eq!(executor.evaluated(), vec!["patch.abc:a:func_main_0".to_string()]);
        assert_eq!(runtime.stage(), StageOfHotReload::UnloadEndExecutePatchmain);
    }

    #[test]
    fn abrupt_completion_stops_the_run() {
        let mut builder = ModuleBuilder::new("patch.abc");
        builder.function("a", "func_main_0", BytecodeBuilder::new().throw());
        builder.function("b", "func_main_0", BytecodeBuilder::new().return_undefined());
        let module = builder.build().unwrap();
        let runtime = Runtime::new(MemoryModuleLoader::new().with(module.clone()));
        runtime.load_module("patch.abc", None).unwrap();

        let result =
            execute_func_or_patch_main(&runtime, &module, &records(&["a", "b"]), Direction::Load);

        assert!(matches!(result, Err(Error::AbruptCompletion(_))));
        assert!(runtime.find_patch_module("a").is_none());
        assert!(runtime.find_patch_module("b").is_none());
        assert_eq!(runtime.stage(), StageOfHotReload::LoadEndExecutePatchmain);
    }
}
