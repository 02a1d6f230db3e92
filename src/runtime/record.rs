use std::sync::{Arc, RwLock};

use strum::Display;

/// Evaluation status of a module record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum ModuleStatus {
    /// Resolved, imports not linked yet
    #[default]
    Uninstantiated,
    /// Imports linked
    Instantiated,
    /// Top-level statements are running
    Evaluating,
    /// Top-level statements completed
    Evaluated,
    /// Top-level statements completed abruptly
    Errored,
}

/// The execution context of one record (source module) of a compiled module.
///
/// Functions hold a back-reference to the record they were created in; the relinker moves
/// that reference between base and patch records.
#[derive(Debug)]
pub struct ModuleRecord {
    record_name: String,
    file_name: String,
    status: RwLock<ModuleStatus>,
}

/// A reference to a `ModuleRecord`
pub type ModuleRecordRc = Arc<ModuleRecord>;

impl ModuleRecord {
    /// Creates an unlinked record of `record_name` inside module file `file_name`
    #[must_use]
    pub fn new(record_name: &str, file_name: &str) -> Self {
        ModuleRecord {
            record_name: record_name.to_string(),
            file_name: file_name.to_string(),
            status: RwLock::new(ModuleStatus::Uninstantiated),
        }
    }

    /// Name of the record
    #[must_use]
    pub fn record_name(&self) -> &str {
        &self.record_name
    }

    /// File name of the module the record belongs to
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        *read_lock!(self.status)
    }

    /// Moves the record to `status`
    pub fn set_status(&self, status: ModuleStatus) {
        *write_lock!(self.status) = status;
    }
}
