//! In-memory backend for tests.
//!
//! Supports files, directories, and symbolic links (including link cycles),
//! and counts directory reads so callers can assert on syscall behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::traits::{Backend, FileKind, RawEntry};
use crate::VfsError;

/// Maximum symlink substitutions while resolving one path.
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Node {
    File,
    Dir,
    Symlink(String),
}

/// In-memory filesystem rooted at `/`.
///
/// Paths are absolute and `/`-separated. Parent directories are created
/// implicitly, the way the walker test fixtures want to be written.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    readdirs: AtomicUsize,
    nocase: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            readdirs: AtomicUsize::new(0),
            nocase: false,
        }
    }

    /// A filesystem with case-insensitive, case-preserving lookups, the way
    /// Darwin and Windows volumes behave.
    pub fn case_insensitive() -> Self {
        Self {
            nocase: true,
            ..Self::new()
        }
    }

    /// Number of directory reads issued so far.
    pub fn readdir_calls(&self) -> usize {
        self.readdirs.load(Ordering::SeqCst)
    }

    pub fn add_file(&self, path: &str) {
        let path = Self::normalize(path);
        self.ensure_parents(&path);
        self.nodes.lock().unwrap().insert(path, Node::File);
    }

    pub fn add_dir(&self, path: &str) {
        let path = Self::normalize(path);
        self.ensure_parents(&path);
        self.nodes.lock().unwrap().insert(path, Node::Dir);
    }

    /// Create a symlink at `link` pointing at `target`. The target may be
    /// absolute or relative to the link's parent, and may form a cycle.
    pub fn add_symlink(&self, link: &str, target: &str) {
        let link = Self::normalize(link);
        self.ensure_parents(&link);
        self.nodes
            .lock()
            .unwrap()
            .insert(link, Node::Symlink(target.to_string()));
    }

    fn normalize(path: &str) -> String {
        let mut out: Vec<&str> = Vec::new();
        for seg in path.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    out.pop();
                }
                s => out.push(s),
            }
        }
        if out.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", out.join("/"))
        }
    }

    fn ensure_parents(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut cur = String::new();
        for seg in path.trim_start_matches('/').split('/') {
            cur.push('/');
            cur.push_str(seg);
            nodes.entry(cur.clone()).or_insert(Node::Dir);
        }
        // the leaf itself is overwritten by the caller
    }

    fn join(parts: &[String]) -> String {
        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    /// Resolve symlinks along `path`. When `follow_final` is false the last
    /// component is left as the link itself (lstat semantics).
    fn resolve(&self, path: &str, follow_final: bool) -> Result<String, VfsError> {
        let nodes = self.nodes.lock().unwrap();
        let mut queue: std::collections::VecDeque<String> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        let mut out: Vec<String> = Vec::new();
        let mut hops = 0usize;

        while let Some(seg) = queue.pop_front() {
            if seg == ".." {
                out.pop();
                continue;
            }
            out.push(seg);
            let mut cur = Self::join(&out);
            if self.nocase && !nodes.contains_key(&cur) {
                // case-insensitive lookup, preserving the on-disk casing
                let want = cur.to_lowercase();
                if let Some(actual) = nodes.keys().find(|k| k.to_lowercase() == want) {
                    cur = actual.clone();
                    out = cur
                        .trim_start_matches('/')
                        .split('/')
                        .map(str::to_string)
                        .collect();
                }
            }
            if let Some(Node::Symlink(target)) = nodes.get(&cur) {
                if !follow_final && queue.is_empty() {
                    break;
                }
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(VfsError::Loop(path.to_string()));
                }
                out.pop();
                if target.starts_with('/') {
                    out.clear();
                }
                for (i, seg) in target
                    .split('/')
                    .filter(|s| !s.is_empty() && *s != ".")
                    .enumerate()
                {
                    queue.insert(i, seg.to_string());
                }
            }
        }
        Ok(Self::join(&out))
    }

    fn list_impl(&self, path: &str) -> Result<Vec<RawEntry>, VfsError> {
        self.readdirs.fetch_add(1, Ordering::SeqCst);
        let dir = self.resolve(path, true)?;
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&dir) {
            Some(Node::Dir) => {}
            Some(_) => return Err(VfsError::NotADirectory(path.to_string())),
            None => return Err(VfsError::NotFound(path.to_string())),
        }
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let mut entries = Vec::new();
        for (p, node) in nodes.range(prefix.clone()..) {
            if !p.starts_with(&prefix) {
                break;
            }
            let name = &p[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            let kind = match node {
                Node::File => FileKind::File,
                Node::Dir => FileKind::Dir,
                Node::Symlink(_) => FileKind::Symlink,
            };
            entries.push(RawEntry::new(name, kind));
        }
        Ok(entries)
    }

    fn lstat_impl(&self, path: &str) -> Result<FileKind, VfsError> {
        let resolved = self.resolve(path, false)?;
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&resolved) {
            Some(Node::File) => Ok(FileKind::File),
            Some(Node::Dir) => Ok(FileKind::Dir),
            Some(Node::Symlink(_)) => Ok(FileKind::Symlink),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    fn canonicalize_impl(&self, path: &str) -> Result<String, VfsError> {
        let resolved = self.resolve(path, true)?;
        if self.nodes.lock().unwrap().contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(VfsError::NotFound(path.to_string()))
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn list_dir_sync(&self, path: &str) -> Result<Vec<RawEntry>, VfsError> {
        self.list_impl(path)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RawEntry>, VfsError> {
        self.list_impl(path)
    }

    fn lstat_sync(&self, path: &str) -> Result<FileKind, VfsError> {
        self.lstat_impl(path)
    }

    async fn lstat(&self, path: &str) -> Result<FileKind, VfsError> {
        self.lstat_impl(path)
    }

    fn canonicalize_sync(&self, path: &str) -> Result<String, VfsError> {
        self.canonicalize_impl(path)
    }

    async fn canonicalize(&self, path: &str) -> Result<String, VfsError> {
        self.canonicalize_impl(path)
    }

    fn cwd_path(&self) -> Result<String, VfsError> {
        Ok("/".to_string())
    }
}
