//! Identity keys.
//!
//! A method keeps its identity across independent compilations: it is named by the record it
//! is declared in, the class that owns it, and its source name. Entity ids are file offsets
//! and change with every build, so they are never part of a key.
//!
//! Compilers encode a name differently depending on how deeply it is nested: a method `m` of
//! class `A` may appear as `#~A>#m` in one build and `#~@0>#~A>#m^1` in another. Keys are
//! built from the normalized name (see [`normalize_method_name`]).

use std::fmt;

use crate::{
    metadata::{module::Module, token::EntityId},
    patch::classinfo::ClassInfo,
    Result,
};

/// Class name of free functions and class constructors
pub const DEFAULT_CLASS_NAME: &str = "default";

/// Names a method independently of the module storing it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIdentityKey {
    /// Record the method is declared in
    pub record_name: String,
    /// Owning class, [`DEFAULT_CLASS_NAME`] for free functions and constructors
    pub class_name: String,
    /// Normalized method name
    pub method_name: String,
}

impl MethodIdentityKey {
    /// Builds a key, normalizing `method_name`
    #[must_use]
    pub fn new(record_name: &str, class_name: &str, method_name: &str) -> Self {
        MethodIdentityKey {
            record_name: record_name.to_string(),
            class_name: class_name.to_string(),
            method_name: normalize_method_name(method_name, class_name).to_string(),
        }
    }
}

impl fmt::Display for MethodIdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.record_name, self.class_name, self.method_name
        )
    }
}

/// Strips the owner path and overload marker from a compiler-emitted method name.
///
/// For class members (any `class_name` other than [`DEFAULT_CLASS_NAME`]) the text after the
/// last `#` is kept, unless the `#` ends the name; a `^N` suffix on that text is then cut at
/// the last `^`. Free function names are returned unchanged. Normalizing twice is a no-op.
#[must_use]
pub fn normalize_method_name<'a>(name: &'a str, class_name: &str) -> &'a str {
    if class_name == DEFAULT_CLASS_NAME {
        return name;
    }

    match name.rfind('#') {
        Some(index) if index + 1 < name.len() => {
            let suffix = &name[index + 1..];
            match suffix.rfind('^') {
                Some(caret) => &suffix[..caret],
                None => suffix,
            }
        }
        _ => name,
    }
}

/// Derives the identity key of method `id` of `module`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidEntity`] if `id` is invalid, out of range, or not a method
pub fn method_identity(
    module: &Module,
    id: EntityId,
    class_info: &ClassInfo,
) -> Result<MethodIdentityKey> {
    let literal = module.method(id)?;
    Ok(MethodIdentityKey::new(
        &literal.record_name,
        class_info.class_name(id),
        &literal.name,
    ))
}
