//! Remote file store interface
//!
//! The artifact store only needs four primitives from the storage host:
//! upload a local file, read and write small files, and list a directory
//! with file types. Paths are relative to the storage root.
//!
//! Implementations take `&mut self`: a session is not assumed to be safe
//! for concurrent use.

use std::path::Path;

/// Type of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Remote file store errors
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no such remote file: {0}")]
    NotFound(String),

    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("remote operation failed: {0}")]
    Io(String),
}

/// Primitives the artifact store needs from a storage host
pub trait RemoteFs {
    /// Upload a local file, returning the number of bytes sent
    fn put(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError>;

    /// Read a whole remote file
    fn read(&mut self, remote: &str) -> Result<Vec<u8>, RemoteError>;

    /// Create or replace a remote file
    fn write(&mut self, remote: &str, contents: &[u8]) -> Result<(), RemoteError>;

    /// List a directory; `"."` is the storage root
    fn list_dir(&mut self, remote: &str) -> Result<Vec<DirEntry>, RemoteError>;

    /// Create a directory and its parents if missing
    fn create_dir_all(&mut self, remote: &str) -> Result<(), RemoteError>;
}
