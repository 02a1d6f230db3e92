//! Module factories.

use crate::metadata::{BytecodeBuilder, FunctionKind, ModuleBuilder, ModuleRc};

/// Record every factory module declares its functions in
pub const RECORD: &str = "com/app/Index";

fn body(variant: u32) -> BytecodeBuilder {
    (0..variant).fold(BytecodeBuilder::new(), |code, _| code.nop())
}

/// A module with one class and one free function.
///
/// Record [`RECORD`] holds:
/// - `method_name`, the only prototype member of class `A`
/// - `#~A=#A`, the constructor of `A`
/// - `foo`, a free function
/// - `func_main_0`, defining the class and `foo`
///
/// `variant` changes every body, and so every entity id, while keeping all names.
pub fn class_module(file_name: &str, method_name: &str, variant: u32) -> ModuleRc {
    let mut builder = ModuleBuilder::new(file_name);

    let member = builder.function_with_kind(
        RECORD,
        method_name,
        FunctionKind::ClassMethod,
        body(variant).lda_imm(variant).return_value(),
    );
    let ctor = builder.function_with_kind(
        RECORD,
        "#~A=#A",
        FunctionKind::BaseConstructor,
        body(variant).return_undefined(),
    );
    let foo = builder.function(RECORD, "foo", body(variant).lda_imm(variant).return_value());
    let literal = builder.class_literal(&[(method_name, member)]);

    builder.function(
        RECORD,
        "func_main_0",
        BytecodeBuilder::new()
            .define_class(ctor, literal, 0)
            .define_func(foo)
            .return_undefined(),
    );

    builder
        .build()
        .expect("factory modules are well-formed")
}

/// A module whose record only carries the given functions, each returning at once
pub fn functions_module(file_name: &str, names: &[&str]) -> ModuleRc {
    let mut builder = ModuleBuilder::new(file_name);
    for name in names {
        builder.function(RECORD, name, BytecodeBuilder::new().return_undefined());
    }
    builder
        .build()
        .expect("factory modules are well-formed")
}
