//! scamper-vfs: identity-cached filesystem adapter for the scamper glob engine.
//!
//! Provides:
//! - **Backend**: a minimal read-only filesystem trait with sync and async
//!   flavors (`LocalBackend` for the real filesystem, `MemoryBackend` for
//!   tests)
//! - **PathCache**: the directory-entry cache. Every path has exactly one
//!   [`Entry`] handle for the lifetime of the cache, directory listings are
//!   read at most once, and concurrent async requests for the same listing
//!   share one read.
//!
//! Paths are always `/`-separated, on every platform. Windows accepts
//! forward slashes throughout, and glob patterns only ever use `/`.

mod cache;
mod local;
mod memory;
mod traits;

pub use cache::{Entry, PathCache};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use traits::{Backend, FileKind, RawEntry};

use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Clone, Error)]
pub enum VfsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("too many levels of symbolic links: {0}")]
    Loop(String),
    #[error("io error: {0}")]
    Io(String),
}

impl VfsError {
    pub(crate) fn from_io(err: &std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => VfsError::PermissionDenied(path.to_string()),
            ErrorKind::NotADirectory => VfsError::NotADirectory(path.to_string()),
            _ if is_filesystem_loop(err) => VfsError::Loop(path.to_string()),
            _ => VfsError::Io(format!("{}: {}", path, err)),
        }
    }
}

// `std::io::ErrorKind::FilesystemLoop` is still behind the unstable
// `io_error_more` feature on this toolchain; detect ELOOP via the raw OS
// error code instead until it stabilizes.
fn is_filesystem_loop(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        #[cfg(target_os = "linux")]
        Some(40) => true,
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        Some(62) => true,
        #[cfg(windows)]
        Some(1921) => true,
        _ => false,
    }
}

/// Target platform for path handling.
///
/// Affects root-shape parsing (POSIX `/`, Windows drive `C:/` and UNC
/// `//host/share/`) and the default case-sensitivity of name comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Darwin,
    Win32,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn native() -> Self {
        if cfg!(windows) {
            Platform::Win32
        } else if cfg!(target_os = "macos") {
            Platform::Darwin
        } else {
            Platform::Posix
        }
    }

    /// Whether name comparisons default to case-insensitive.
    pub fn default_nocase(self) -> bool {
        matches!(self, Platform::Darwin | Platform::Win32)
    }

    pub fn is_windows(self) -> bool {
        self == Platform::Win32
    }
}

/// Split an absolute path into its root and the remainder.
///
/// Returns `None` when the path has no recognized root for the platform.
/// The returned root always carries a trailing `/`. Windows drive letters
/// and UNC host/share roots are recognized only on [`Platform::Win32`];
/// a bare leading `/` is a root everywhere.
pub fn parse_root(path: &str, platform: Platform) -> Option<(String, &str)> {
    if platform.is_windows() {
        // UNC: //host/share[/rest]
        if let Some(body) = path.strip_prefix("//")
            && !body.starts_with('/')
        {
            let mut it = body.splitn(3, '/');
            let host = it.next().unwrap_or("");
            let share = it.next().unwrap_or("");
            if !host.is_empty() && !share.is_empty() {
                let rest = it.next().unwrap_or("");
                return Some((format!("//{}/{}/", host, share), rest));
            }
        }
        // Drive: C:/rest or bare C:
        let bytes = path.as_bytes();
        if bytes.len() >= 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes.len() == 2 || bytes[2] == b'/')
        {
            let rest = path.get(3..).unwrap_or("");
            return Some((format!("{}/", &path[..2]), rest));
        }
    }
    if let Some(rest) = path.strip_prefix('/') {
        return Some(("/".to_string(), rest.trim_start_matches('/')));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_posix_root() {
        assert_eq!(
            parse_root("/a/b", Platform::Posix),
            Some(("/".to_string(), "a/b"))
        );
        assert_eq!(parse_root("a/b", Platform::Posix), None);
        assert_eq!(parse_root("/", Platform::Posix), Some(("/".to_string(), "")));
    }

    #[test]
    fn parse_windows_roots() {
        assert_eq!(
            parse_root("c:/Users/x", Platform::Win32),
            Some(("c:/".to_string(), "Users/x"))
        );
        assert_eq!(
            parse_root("//srv/share/data", Platform::Win32),
            Some(("//srv/share/".to_string(), "data"))
        );
        assert_eq!(
            parse_root("//srv/share", Platform::Win32),
            Some(("//srv/share/".to_string(), ""))
        );
        assert_eq!(
            parse_root("/tmp/x", Platform::Win32),
            Some(("/".to_string(), "tmp/x"))
        );
    }

    #[test]
    fn drive_roots_not_parsed_on_posix() {
        assert_eq!(parse_root("c:/Users", Platform::Posix), None);
        assert_eq!(parse_root("//srv/share", Platform::Posix), Some(("/".to_string(), "srv/share")));
    }
}
