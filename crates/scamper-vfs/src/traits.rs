//! The backend trait consumed by `PathCache`.

use async_trait::async_trait;

use crate::VfsError;

/// What an entry is, according to lstat (symlinks are not followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// A single entry returned by a directory listing.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Entry name, not a path.
    pub name: String,
    pub kind: FileKind,
}

impl RawEntry {
    pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Minimal read-only filesystem abstraction.
///
/// All paths are absolute and `/`-separated. Every operation comes in a
/// blocking and an async flavor because the cache serves both the sync and
/// the async walker; implementations may delegate one to the other when the
/// medium has no real async path (e.g. memory).
#[async_trait]
pub trait Backend: Send + Sync {
    /// List a directory. Names only, kinds from lstat.
    fn list_dir_sync(&self, path: &str) -> Result<Vec<RawEntry>, VfsError>;

    async fn list_dir(&self, path: &str) -> Result<Vec<RawEntry>, VfsError>;

    /// Kind of the path itself, without following a final symlink.
    fn lstat_sync(&self, path: &str) -> Result<FileKind, VfsError>;

    async fn lstat(&self, path: &str) -> Result<FileKind, VfsError>;

    /// Fully resolved path: every symlink followed, `.`/`..` eliminated.
    /// Fails if the path does not exist or resolution loops.
    fn canonicalize_sync(&self, path: &str) -> Result<String, VfsError>;

    async fn canonicalize(&self, path: &str) -> Result<String, VfsError>;

    /// The process working directory in this backend's namespace.
    fn cwd_path(&self) -> Result<String, VfsError>;
}
