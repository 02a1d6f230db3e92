//! Class-name recovery.
//!
//! Method literals do not record their owning class. The only place the relationship exists
//! is the code that defines the class: a `defineclasswithbuffer` instruction (or its wide
//! form) names the constructor and the literal buffer listing the prototype members. Every
//! method body of the module is therefore disassembled once, and every `Method` or
//! `GeneratorMethod` entry of a defined class's buffer is mapped to the class name.
//!
//! The result depends only on the module, so the manager caches it per module.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::{
    disassembler::decode_stream,
    metadata::{method::MethodLiteralRc, module::Module, token::EntityId},
    patch::identity::DEFAULT_CLASS_NAME,
    Result,
};

/// Owning class of every class member method of a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassInfo {
    classes: BTreeMap<EntityId, String>,
}

impl ClassInfo {
    /// Class owning method `id`, [`DEFAULT_CLASS_NAME`] if none was found
    #[must_use]
    pub fn class_name(&self, id: EntityId) -> &str {
        self.classes
            .get(&id)
            .map_or(DEFAULT_CLASS_NAME, String::as_str)
    }

    /// Number of methods with a recovered class
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if no class member was found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterates over `(method id, class name)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &String)> {
        self.classes.iter()
    }
}

/// Display name of a class given its constructor's emitted name (`#~A=#A` names class `A`)
fn class_display_name(ctor_name: &str) -> &str {
    match ctor_name.rfind('#') {
        Some(index) if index + 1 < ctor_name.len() => &ctor_name[index + 1..],
        _ => ctor_name,
    }
}

/// Class members defined by the body of `method`
fn scan_method(module: &Module, method: &MethodLiteralRc) -> Result<Vec<(EntityId, String)>> {
    let mut members = Vec::new();

    for instruction in decode_stream(&method.bytecode)? {
        if !instruction.opcode.is_define_class() {
            continue;
        }
        let (Some(ctor_index), Some(literal_index)) = (instruction.id(0), instruction.id(1))
        else {
            continue;
        };

        let ctor_id = module.resolve_index(method.constpool_index, ctor_index)?;
        let literal_id = module.resolve_index(method.constpool_index, literal_index)?;
        let ctor = module.method(ctor_id)?;
        let class_name = class_display_name(&ctor.name);

        for member in module.literal(literal_id)?.class_member_methods() {
            members.push((member, class_name.to_string()));
        }
    }

    Ok(members)
}

/// Recovers the owning class of every class member method of `module`.
///
/// Methods whose body cannot be decoded, or whose class definitions reference missing
/// entities, are skipped; their members stay in the default class.
#[must_use]
pub fn collect_class_info(module: &Module, parallel: bool) -> ClassInfo {
    let methods: Vec<MethodLiteralRc> = module.methods().collect();

    let scan = |method: &MethodLiteralRc| match scan_method(module, method) {
        Ok(members) => members,
        Err(error) => {
            log::debug!(
                "Skipping class scan of {} in {}: {error}",
                method.name,
                module.name()
            );
            Vec::new()
        }
    };

    let found: Vec<(EntityId, String)> = if parallel {
        methods.par_iter().flat_map_iter(scan).collect()
    } else {
        methods.iter().flat_map(scan).collect()
    };

    let mut classes = BTreeMap::new();
    for (member, class_name) in found {
        classes.entry(member).or_insert(class_name);
    }

    log::trace!(
        "Recovered {} class members in {}",
        classes.len(),
        module.name()
    );
    ClassInfo { classes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{BytecodeBuilder, LiteralEntry, LiteralTag, LiteralValue, ModuleBuilder},
        test::class_module,
    };

    #[test]
    fn class_members_get_class_name() {
        let module = class_module("base.abc", "m", 0);
        let m = module.methods().find(|method| method.name == "m").unwrap();
        let ctor = module.methods().find(|method| method.name == "#~A=#A").unwrap();
        let foo = module.methods().find(|method| method.name == "foo").unwrap();

        for parallel in [false, true] {
            let info = collect_class_info(&module, parallel);
            assert_eq!(info.len(), 1);
            assert_eq!(info.class_name(m.id), "A");
            assert_eq!(info.class_name(ctor.id), DEFAULT_CLASS_NAME);
            assert_eq!(info.class_name(foo.id), DEFAULT_CLASS_NAME);
        }
    }

    #[test]
    fn generator_members_and_wide_form() {
        let mut builder = ModuleBuilder::new("base.abc");
        let gen = builder.function("rec", "#~B>#gen", BytecodeBuilder::new().return_undefined());
        let setter = builder.function("rec", "#~B>#set", BytecodeBuilder::new().return_undefined());
        let ctor = builder.function("rec", "B", BytecodeBuilder::new().return_undefined());
        let literal = builder.literal(vec![
            LiteralEntry {
                tag: LiteralTag::GeneratorMethod,
                value: LiteralValue::Method(gen),
            },
            LiteralEntry {
                tag: LiteralTag::Setter,
                value: LiteralValue::Method(setter),
            },
        ]);
        builder.function(
            "rec",
            "func_main_0",
            BytecodeBuilder::new()
                .define_class_wide(ctor, literal, 0)
                .return_undefined(),
        );
        let module = builder.build().unwrap();

        let info = collect_class_info(&module, false);
        assert_eq!(info.class_name(gen), "B");
        assert_eq!(info.class_name(setter), DEFAULT_CLASS_NAME);
    }

    #[test]
    fn broken_class_definitions_are_skipped() {
        let mut builder = ModuleBuilder::new("base.abc");
        let name = builder.string("not a constructor");
        let m = builder.function("rec", "#~C>#m", BytecodeBuilder::new().return_undefined());
        let literal = builder.class_literal(&[("m", m)]);
        builder.function(
            "rec",
            "func_main_0",
            BytecodeBuilder::new()
                .define_class(name, literal, 0)
                .return_undefined(),
        );
        let module = builder.build().unwrap();

        let info = collect_class_info(&module, true);
        assert!(info.is_empty());
        assert_eq!(info.class_name(m), DEFAULT_CLASS_NAME);
    }

    #[test]
    fn display_names() {
        assert_eq!(class_display_name("#~A=#A"), "A");
        assert_eq!(class_display_name("A"), "A");
        assert_eq!(class_display_name("#~A=#"), "#~A=#");
    }
}
