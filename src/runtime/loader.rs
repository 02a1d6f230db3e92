//! Module loading.
//!
//! The container format is owned by the embedder. [`FileModuleLoader`] handles the byte
//! sources (a memory-mapped file, or a buffer handed over by the caller) and delegates
//! decoding to a [`ModuleParser`]; [`MemoryModuleLoader`] serves modules that were already
//! built in memory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::{
    file::File,
    metadata::module::{Module, ModuleRc},
    Error, Result,
};

/// Produces modules by file name
pub trait ModuleLoader: Send + Sync {
    /// Loads `file_name`, from `buffer` if given, else from wherever the loader finds files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if the module cannot be located, or the parse error
    fn load(&self, file_name: &str, buffer: Option<&[u8]>) -> Result<ModuleRc>;
}

/// Decodes a module container
pub trait ModuleParser: Send + Sync {
    /// Decodes the container in `file`, naming the module `file_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is malformed
    fn parse(&self, file_name: &str, file: &File) -> Result<Module>;
}

/// Serves prebuilt modules
#[derive(Default)]
pub struct MemoryModuleLoader {
    modules: RwLock<HashMap<String, ModuleRc>>,
}

impl MemoryModuleLoader {
    /// Creates an empty loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `module` loadable under its own name
    pub fn register(&self, module: ModuleRc) {
        write_lock!(self.modules).insert(module.name().to_string(), module);
    }

    /// Adds `module` and returns the loader, for chained construction
    #[must_use]
    pub fn with(self, module: ModuleRc) -> Self {
        self.register(module);
        self
    }
}

impl ModuleLoader for MemoryModuleLoader {
    fn load(&self, file_name: &str, _buffer: Option<&[u8]>) -> Result<ModuleRc> {
        read_lock!(self.modules)
            .get(file_name)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))
    }
}

/// Loads containers from disk or from caller buffers and decodes them with `P`
pub struct FileModuleLoader<P: ModuleParser> {
    root: PathBuf,
    parser: P,
}

impl<P: ModuleParser> FileModuleLoader<P> {
    /// Creates a loader resolving file names relative to `root`
    pub fn new(root: impl AsRef<Path>, parser: P) -> Self {
        FileModuleLoader {
            root: root.as_ref().to_path_buf(),
            parser,
        }
    }
}

impl<P: ModuleParser> ModuleLoader for FileModuleLoader<P> {
    fn load(&self, file_name: &str, buffer: Option<&[u8]>) -> Result<ModuleRc> {
        let file = match buffer {
            Some(bytes) => File::from_mem(bytes.to_vec())?,
            None => {
                let path = self.root.join(file_name);
                File::from_file(&path).map_err(|error| {
                    log::debug!("Cannot open {}: {error}", path.display());
                    Error::FileNotFound(file_name.to_string())
                })?
            }
        };

        Ok(Arc::new(self.parser.parse(file_name, &file)?))
    }
}
