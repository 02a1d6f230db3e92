use thiserror::Error;

use crate::{metadata::token::EntityId, patch::PatchErrorCode};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups:
///
/// ## Input Errors
/// - [`Error::Malformed`] - Corrupted module data or bytecode
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::InvalidEntity`] - An entity id that does not resolve inside its module
///
/// ## Patch Protocol Errors
/// These map one-to-one onto the result codes surfaced to embedders, see [`Error::patch_code`].
/// - [`Error::PackageNotEsModule`] - A module is a non-mergeable bundle
/// - [`Error::FileNotFound`] - A patch (or base) module could not be loaded
/// - [`Error::FileNotExecuted`] - The base module was never loaded or executed
/// - [`Error::PatchHasLoaded`] - A patch is already active for the base module
/// - [`Error::PatchNotLoaded`] - No active patch matches the unload request
///
/// ## Execution Errors
/// - [`Error::AbruptCompletion`] - Script code raised while (re-)running an entry point
/// - [`Error::Internal`] - The runtime state did not match what the operation required
///
/// # Examples
///
/// ```rust
/// use quickfix::{Error, PatchErrorCode};
///
/// let error = Error::PatchHasLoaded("entry.abc".to_string());
/// assert_eq!(error.patch_code(), PatchErrorCode::PatchHasLoaded);
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The data is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// The entity id is invalid or lies outside of the module it was resolved against.
    #[error("Invalid entity - {0}")]
    InvalidEntity(EntityId),

    /// Hot patching only works on mergeable (ES module) files, this one is a bundle.
    #[error("Module is not a mergeable ES module - {0}")]
    PackageNotEsModule(String),

    /// The module could not be located or read.
    #[error("Module file not found - {0}")]
    FileNotFound(String),

    /// The base module was never loaded, or has not executed yet.
    #[error("Module has not been executed - {0}")]
    FileNotExecuted(String),

    /// A patch session is already active for this base module.
    #[error("A patch is already loaded for - {0}")]
    PatchHasLoaded(String),

    /// No active patch session belongs to this patch module.
    #[error("Patch has not been loaded - {0}")]
    PatchNotLoaded(String),

    /// Script code completed abruptly (threw) while an entry point was running.
    #[error("Abrupt completion - {0}")]
    AbruptCompletion(String),

    /// The runtime was not in the state an operation relies on.
    #[error("Internal error - {0}")]
    Internal(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Maps this error onto the result code surfaced to embedders.
    ///
    /// Every error that is not part of the patch protocol is reported as
    /// [`PatchErrorCode::InternalError`].
    #[must_use]
    pub fn patch_code(&self) -> PatchErrorCode {
        match self {
            Error::PackageNotEsModule(_) => PatchErrorCode::PackageNotEsModule,
            Error::FileNotFound(_) | Error::FileError(_) => PatchErrorCode::FileNotFound,
            Error::FileNotExecuted(_) => PatchErrorCode::FileNotExecuted,
            Error::PatchHasLoaded(_) => PatchErrorCode::PatchHasLoaded,
            Error::PatchNotLoaded(_) => PatchErrorCode::PatchNotLoaded,
            _ => PatchErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_carries_location() {
        let error = malformed_error!("bad opcode 0x{:02x}", 0xFF);
        match error {
            Error::Malformed {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "bad opcode 0xff");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            _ => panic!("expected a malformed error"),
        }
    }

    #[test]
    fn patch_codes() {
        assert_eq!(
            Error::PackageNotEsModule("a".into()).patch_code(),
            PatchErrorCode::PackageNotEsModule
        );
        assert_eq!(
            Error::FileNotFound("a".into()).patch_code(),
            PatchErrorCode::FileNotFound
        );
        assert_eq!(
            Error::FileNotExecuted("a".into()).patch_code(),
            PatchErrorCode::FileNotExecuted
        );
        assert_eq!(
            Error::PatchHasLoaded("a".into()).patch_code(),
            PatchErrorCode::PatchHasLoaded
        );
        assert_eq!(
            Error::PatchNotLoaded("a".into()).patch_code(),
            PatchErrorCode::PatchNotLoaded
        );
        assert_eq!(
            Error::AbruptCompletion("boom".into()).patch_code(),
            PatchErrorCode::InternalError
        );
        assert_eq!(Error::OutOfBounds.patch_code(), PatchErrorCode::InternalError);
    }

    #[test]
    fn io_errors_are_missing_files() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: Error = io.into();
        assert_eq!(error.patch_code(), PatchErrorCode::FileNotFound);
    }
}
