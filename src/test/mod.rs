//! Shared fixtures for unit tests: module factories and an instrumented executor.

mod factories;

pub use executor::RecordingExecutor;
pub use factories::*;
