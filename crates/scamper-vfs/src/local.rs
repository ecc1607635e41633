//! Real-filesystem backend.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::traits::{Backend, FileKind, RawEntry};
use crate::VfsError;

/// Backend over the real filesystem.
///
/// Sync operations go through `std::fs`, async ones through `tokio::fs`.
/// Listing never follows symlinks (`symlink_metadata`), so entry kinds
/// reflect the links themselves.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn kind_of(meta: &fs::Metadata) -> FileKind {
        let ft = meta.file_type();
        if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_dir() {
            FileKind::Dir
        } else {
            FileKind::File
        }
    }

    fn to_slash(path: PathBuf) -> String {
        let s = path.to_string_lossy().into_owned();
        if cfg!(windows) {
            // Strip the verbatim prefix canonicalize() adds and normalize
            // separators so cache paths stay /-joined.
            s.trim_start_matches(r"\\?\").replace('\\', "/")
        } else {
            s
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn list_dir_sync(&self, path: &str) -> Result<Vec<RawEntry>, VfsError> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(Path::new(path)).map_err(|e| VfsError::from_io(&e, path))?;
        for entry in dir {
            let entry = entry.map_err(|e| VfsError::from_io(&e, path))?;
            let meta = entry
                .path()
                .symlink_metadata()
                .map_err(|e| VfsError::from_io(&e, path))?;
            entries.push(RawEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                Self::kind_of(&meta),
            ));
        }
        Ok(entries)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RawEntry>, VfsError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(Path::new(path))
            .await
            .map_err(|e| VfsError::from_io(&e, path))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VfsError::from_io(&e, path))?
        {
            let meta = tokio::fs::symlink_metadata(entry.path())
                .await
                .map_err(|e| VfsError::from_io(&e, path))?;
            entries.push(RawEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                Self::kind_of(&meta),
            ));
        }
        Ok(entries)
    }

    fn lstat_sync(&self, path: &str) -> Result<FileKind, VfsError> {
        let meta = fs::symlink_metadata(Path::new(path)).map_err(|e| VfsError::from_io(&e, path))?;
        Ok(Self::kind_of(&meta))
    }

    async fn lstat(&self, path: &str) -> Result<FileKind, VfsError> {
        let meta = tokio::fs::symlink_metadata(Path::new(path))
            .await
            .map_err(|e| VfsError::from_io(&e, path))?;
        Ok(Self::kind_of(&meta))
    }

    fn canonicalize_sync(&self, path: &str) -> Result<String, VfsError> {
        fs::canonicalize(Path::new(path))
            .map(Self::to_slash)
            .map_err(|e| VfsError::from_io(&e, path))
    }

    async fn canonicalize(&self, path: &str) -> Result<String, VfsError> {
        tokio::fs::canonicalize(Path::new(path))
            .await
            .map(Self::to_slash)
            .map_err(|e| VfsError::from_io(&e, path))
    }

    fn cwd_path(&self) -> Result<String, VfsError> {
        std::env::current_dir()
            .map(Self::to_slash)
            .map_err(|e| VfsError::Io(format!("getcwd: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"data").unwrap();
        fs::write(dir.path().join("top.rs"), b"").unwrap();
        dir
    }

    fn path_of(dir: &TempDir, rel: &str) -> String {
        LocalBackend::to_slash(dir.path().join(rel))
    }

    #[test]
    fn lists_names_and_kinds() {
        let dir = setup();
        let backend = LocalBackend::new();
        let mut entries = backend
            .list_dir_sync(&path_of(&dir, ""))
            .unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "sub");
        assert_eq!(entries[0].kind, FileKind::Dir);
        assert_eq!(entries[1].name, "top.rs");
        assert_eq!(entries[1].kind, FileKind::File);
    }

    #[test]
    fn missing_paths_error() {
        let dir = setup();
        let backend = LocalBackend::new();
        assert!(matches!(
            backend.list_dir_sync(&path_of(&dir, "nope")),
            Err(VfsError::NotFound(_))
        ));
        assert!(backend.lstat_sync(&path_of(&dir, "ghost.rs")).is_err());
    }

    #[test]
    fn listing_a_file_is_not_a_directory() {
        let dir = setup();
        let backend = LocalBackend::new();
        let err = backend.list_dir_sync(&path_of(&dir, "top.rs")).unwrap_err();
        assert!(
            matches!(err, VfsError::NotADirectory(_) | VfsError::Io(_)),
            "{err}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn lstat_reports_links_without_following() {
        let dir = setup();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("link")).unwrap();
        let backend = LocalBackend::new();
        assert_eq!(
            backend.lstat_sync(&path_of(&dir, "link")).unwrap(),
            FileKind::Symlink
        );
        assert_eq!(
            backend.lstat_sync(&path_of(&dir, "link/file.txt")).unwrap(),
            FileKind::File
        );
    }

    #[tokio::test]
    async fn async_flavors_agree() {
        let dir = setup();
        let backend = LocalBackend::new();
        let root = path_of(&dir, "");
        let sync_names: Vec<String> = backend
            .list_dir_sync(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        let async_names: Vec<String> = backend
            .list_dir(&root)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        let mut a = sync_names.clone();
        let mut b = async_names.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
