//! Quick-fix configuration
//!
//! Tunes how the patch engine matches and cleans up; the protocol itself (identity keys,
//! session lifecycle, result codes) is not configurable.

use crate::metadata::module::{PATCH_FUNCTION_NAME_0, PATCH_FUNCTION_NAME_1};

/// Configuration of the quick-fix manager
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct QuickFixConfig {
    /// Bootstrap functions a patch compiler emits; never entered into the patch catalog and
    /// never attributed as patch code
    pub reserved_function_names: Vec<String>,

    /// Marker that starts every frame of a formatted call stack
    pub stack_frame_marker: String,

    /// Also scan the unshared variant of each base constant pool
    pub scan_unshared_constpools: bool,

    /// Recover class names with `rayon` across method bodies
    pub parallel_class_scan: bool,

    /// Run a full collection once an unload finished
    pub collect_after_unload: bool,
}

impl Default for QuickFixConfig {
    fn default() -> Self {
        Self {
            reserved_function_names: vec![
                PATCH_FUNCTION_NAME_0.to_string(),
                PATCH_FUNCTION_NAME_1.to_string(),
            ],
            stack_frame_marker: "at ".to_string(),
            scan_unshared_constpools: true,
            parallel_class_scan: true,
            collect_after_unload: true,
        }
    }
}

impl QuickFixConfig {
    /// Same as the default but scans method bodies on the calling thread only
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel_class_scan: false,
            ..Self::default()
        }
    }

    /// True if `name` is one of the reserved bootstrap functions
    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_function_names.iter().any(|reserved| reserved == name)
    }
}
