//! Byte sources for compiled modules.
//!
//! A compiled module reaches the engine either as a file on disk or as a buffer handed over
//! by the embedder (for example a patch shipped over the network). Both are exposed through
//! [`File`], which owns a [`Backend`]:
//!
//! - [`physical::Physical`] - memory-mapped file on disk
//! - [`memory::Memory`] - owned in-memory buffer
//!
//! [`parser::Parser`] is the cursor used to walk bytecode stored in either.
//!
//! # Examples
//!
//! ```rust,no_run
//! use quickfix::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("modules/entry.abc"))?;
//! println!("{} bytes", file.len());
//! # Ok::<(), quickfix::Error>(())
//! ```

pub mod io;
mod memory;
pub mod parser;
mod physical;

use std::path::Path;

use memory::Memory;
use physical::Physical;

use crate::{
    Error::{Empty, OutOfBounds},
    Result,
};

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of module data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded module container, backed by a memory-mapped file or an owned buffer.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-maps the file at `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened, and
    /// [`crate::Error::Empty`] if it has no content.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Takes ownership of an in-memory buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        Ok(File {
            data: Box::new(data),
        })
    }

    /// Returns the size of the container in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the container holds no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the complete container data
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns `len` bytes starting at `offset`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully contained in the data.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if offset.checked_add(len).is_none() {
            return Err(OutOfBounds);
        }
        self.data.data_slice(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn from_mem() {
        let file = File::from_mem(vec![0x01, 0x02, 0x03]).unwrap();
        assert_eq!(file.len(), 3);
        assert!(!file.is_empty());
        assert_eq!(file.data_slice(1, 2).unwrap(), &[0x02, 0x03]);
        assert!(file.data_slice(2, 2).is_err());
        assert!(file.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn from_mem_empty() {
        assert!(matches!(File::from_mem(vec![]), Err(Empty)));
    }

    #[test]
    fn from_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(&[0xAB; 64]).unwrap();
        temp.flush().unwrap();

        let file = File::from_file(temp.path()).unwrap();
        assert_eq!(file.len(), 64);
        assert_eq!(file.data()[63], 0xAB);
    }

    #[test]
    fn from_file_missing() {
        let result = File::from_file(Path::new("/definitely/not/here.abc"));
        assert!(matches!(result, Err(crate::Error::FileError(_))));
    }
}
