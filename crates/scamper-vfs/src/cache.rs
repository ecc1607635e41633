//! The directory-entry cache.
//!
//! `PathCache` hands out [`Entry`] values, cheap-clone handles that are
//! unique per path for the lifetime of the cache. Uniqueness is what makes
//! result deduplication work: the walker keys its seen-set by handle
//! identity, not by string comparison.
//!
//! Directory listings are read once and memoized on the parent entry.
//! Concurrent async requests for an unlisted directory share a single read
//! through a per-entry gate. Read failures mark the entry so later callers
//! see an empty listing without retrying.
//!
//! Entries resolved by name before their parent was listed are provisional:
//! they carry the name the caller asked for. When the listing arrives, a
//! provisional entry that matches case-insensitively is promoted to the
//! name the filesystem actually reports, and names absent from the listing
//! are marked as not found.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::traits::{Backend, FileKind, RawEntry};
use crate::{parse_root, Platform, VfsError};

/// What the cache currently knows about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Never seen by lstat or a parent listing.
    Unknown,
    Known(FileKind),
    /// A parent listing completed and this name was not in it, or lstat
    /// failed.
    NotFound,
}

#[derive(Default)]
struct EntryState {
    status: Option<Status>,
    /// Full listing, in backend order. `Some` once readdir succeeded.
    children: Option<Arc<Vec<Entry>>>,
    readdir_failed: bool,
    /// Children resolved so far, keyed by (possibly case-folded) name.
    by_name: HashMap<String, Entry>,
    /// Memoized canonical entry. Outer None = not computed yet.
    realpath: Option<Option<Entry>>,
}

struct EntryInner {
    /// Mutable: promoted to the listing's casing once the parent is read.
    name: Mutex<String>,
    parent: Option<Weak<EntryInner>>,
    nocase: bool,
    state: Mutex<EntryState>,
    /// Serializes async readdir so concurrent requesters share one read.
    readdir_gate: tokio::sync::Mutex<()>,
}

/// A cached filesystem entry.
///
/// Handles are cheap to clone and compare by identity: the cache guarantees
/// one handle per path, so pointer equality is path equality.
#[derive(Clone)]
pub struct Entry(Arc<EntryInner>);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.fullpath())
            .finish()
    }
}

impl Entry {
    fn new_root(name: String, nocase: bool) -> Entry {
        let entry = Entry(Arc::new(EntryInner {
            name: Mutex::new(name),
            parent: None,
            nocase,
            state: Mutex::new(EntryState::default()),
            readdir_gate: tokio::sync::Mutex::new(()),
        }));
        entry.set_status(Status::Known(FileKind::Dir));
        entry
    }

    fn new_child(parent: &Entry, name: String, nocase: bool) -> Entry {
        Entry(Arc::new(EntryInner {
            name: Mutex::new(name),
            parent: Some(Arc::downgrade(&parent.0)),
            nocase,
            state: Mutex::new(EntryState::default()),
            readdir_gate: tokio::sync::Mutex::new(()),
        }))
    }

    /// Entry name. For a root this is the root itself (`/`, `c:/`, ...).
    pub fn name(&self) -> String {
        self.0.name.lock().unwrap().clone()
    }

    pub fn parent(&self) -> Option<Entry> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Entry)
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    /// Absolute `/`-joined path. Not cached: segment names can be promoted
    /// to their on-disk casing when a parent listing arrives.
    pub fn fullpath(&self) -> String {
        match self.parent() {
            None => self.name(),
            Some(parent) => {
                let base = parent.fullpath();
                if base.ends_with('/') {
                    format!("{}{}", base, self.name())
                } else {
                    format!("{}/{}", base, self.name())
                }
            }
        }
    }

    /// Known kind, if any. `None` until lstat'd or listed by the parent.
    pub fn kind(&self) -> Option<FileKind> {
        match self.status() {
            Some(Status::Known(kind)) => Some(kind),
            _ => None,
        }
    }

    /// True if the cache has never stat'd this entry.
    pub fn is_unknown(&self) -> bool {
        self.status().is_none_or(|s| s == Status::Unknown)
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == Some(FileKind::Symlink)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Dir)
    }

    /// Whether a readdir could still succeed here. Files and entries known
    /// to be missing cannot be listed; unknowns and symlinks might.
    pub fn can_readdir(&self) -> bool {
        let st = self.0.state.lock().unwrap();
        if st.readdir_failed {
            return false;
        }
        !matches!(
            st.status,
            Some(Status::Known(FileKind::File)) | Some(Status::NotFound)
        )
    }

    /// Case-aware name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        let own = self.0.name.lock().unwrap();
        *own == name || (self.0.nocase && fold(&own) == fold(name))
    }

    fn status(&self) -> Option<Status> {
        self.0.state.lock().unwrap().status
    }

    fn set_status(&self, status: Status) {
        self.0.state.lock().unwrap().status = Some(status);
    }

    fn promote_name(&self, actual: &str) {
        let mut name = self.0.name.lock().unwrap();
        if *name != actual {
            *name = actual.to_string();
        }
    }

    fn cached_children(&self) -> Option<Arc<Vec<Entry>>> {
        let st = self.0.state.lock().unwrap();
        if st.readdir_failed {
            return Some(Arc::new(Vec::new()));
        }
        st.children.clone()
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

struct Shared {
    backend: Arc<dyn Backend>,
    platform: Platform,
    nocase: bool,
    /// Root entries by (win32: case-folded) root string. Strong references:
    /// the whole entry tree hangs off this map.
    roots: Mutex<HashMap<String, Entry>>,
    cwd: OnceLock<Entry>,
}

/// The cache itself. Clones share all state.
#[derive(Clone)]
pub struct PathCache {
    shared: Arc<Shared>,
}

impl PathCache {
    /// Build a cache for `backend` with `cwd` as the reference point for
    /// relative paths. `cwd` must be absolute for the given platform.
    pub fn new(
        backend: Arc<dyn Backend>,
        platform: Platform,
        nocase: bool,
        cwd: &str,
    ) -> Result<PathCache, VfsError> {
        let cache = PathCache {
            shared: Arc::new(Shared {
                backend,
                platform,
                nocase,
                roots: Mutex::new(HashMap::new()),
                cwd: OnceLock::new(),
            }),
        };
        let Some((root, rest)) = parse_root(cwd, platform) else {
            return Err(VfsError::Io(format!("cwd is not absolute: {}", cwd)));
        };
        let mut entry = cache.root_entry(&root);
        for seg in rest.split('/') {
            entry = match seg {
                "" | "." => entry,
                ".." => entry.parent().unwrap_or(entry),
                name => cache.child(&entry, name),
            };
        }
        let _ = cache.shared.cwd.set(entry);
        Ok(cache)
    }

    pub fn cwd_entry(&self) -> Entry {
        self.shared
            .cwd
            .get()
            .cloned()
            .unwrap_or_else(|| self.root_entry("/"))
    }

    pub fn nocase(&self) -> bool {
        self.shared.nocase
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    fn root_entry(&self, root: &str) -> Entry {
        let key = if self.shared.platform.is_windows() {
            // Windows roots compare case-insensitively no matter what.
            fold(root)
        } else {
            root.to_string()
        };
        let mut roots = self.shared.roots.lock().unwrap();
        roots
            .entry(key)
            .or_insert_with(|| Entry::new_root(root.to_string(), self.shared.nocase))
            .clone()
    }

    /// The unique child entry of `parent` named `name`. Creates a
    /// provisional entry if this name has never been seen.
    pub fn child(&self, parent: &Entry, name: &str) -> Entry {
        let key = if self.shared.nocase {
            fold(name)
        } else {
            name.to_string()
        };
        let mut st = parent.0.state.lock().unwrap();
        if let Some(found) = st.by_name.get(&key) {
            return found.clone();
        }
        let entry = Entry::new_child(parent, name.to_string(), self.shared.nocase);
        st.by_name.insert(key, entry.clone());
        entry
    }

    /// Resolve a `/`-separated path against `from`. An absolute path
    /// restarts at its root; `.` and empty segments are no-ops; `..` steps
    /// to the parent, or stays put at a root.
    pub fn resolve(&self, from: &Entry, path: &str) -> Entry {
        let (mut entry, rest) = match parse_root(path, self.shared.platform) {
            Some((root, rest)) => (self.root_entry(&root), rest),
            None => (from.clone(), path),
        };
        for seg in rest.split('/') {
            entry = match seg {
                "" | "." => entry,
                ".." => entry.parent().unwrap_or(entry),
                name => self.child(&entry, name),
            };
        }
        entry
    }

    /// List a directory through the cache. Failures yield an empty slice
    /// and are remembered; the walk treats unreadable directories as empty.
    pub fn list_dir_sync(&self, dir: &Entry) -> Arc<Vec<Entry>> {
        if let Some(children) = dir.cached_children() {
            return children;
        }
        let result = self.shared.backend.list_dir_sync(&dir.fullpath());
        self.store_listing(dir, result)
    }

    /// Async flavor of [`PathCache::list_dir_sync`]. A second requester for
    /// a listing that is already in flight awaits the same read.
    pub async fn list_dir(&self, dir: &Entry) -> Arc<Vec<Entry>> {
        if let Some(children) = dir.cached_children() {
            return children;
        }
        let _gate = dir.0.readdir_gate.lock().await;
        if let Some(children) = dir.cached_children() {
            // someone else filled it while we waited
            return children;
        }
        let result = self.shared.backend.list_dir(&dir.fullpath()).await;
        self.store_listing(dir, result)
    }

    fn store_listing(
        &self,
        dir: &Entry,
        result: Result<Vec<RawEntry>, VfsError>,
    ) -> Arc<Vec<Entry>> {
        match result {
            Ok(raw) => {
                let children: Vec<Entry> = raw
                    .iter()
                    .map(|r| {
                        let child = self.child(dir, &r.name);
                        child.promote_name(&r.name);
                        child.set_status(Status::Known(r.kind));
                        child
                    })
                    .collect();
                let children = Arc::new(children);
                let mut st = dir.0.state.lock().unwrap();
                // names resolved earlier but absent from the listing do not
                // exist
                for entry in st.by_name.values() {
                    if entry.is_unknown() && !children.contains(entry) {
                        entry.set_status(Status::NotFound);
                    }
                }
                st.children = Some(children.clone());
                if st.status.is_none_or(|s| s == Status::Unknown) {
                    st.status = Some(Status::Known(FileKind::Dir));
                }
                children
            }
            Err(err) => {
                tracing::debug!(path = dir.fullpath(), %err, "readdir failed");
                let mut st = dir.0.state.lock().unwrap();
                st.readdir_failed = true;
                match err {
                    VfsError::NotFound(_) => st.status = Some(Status::NotFound),
                    VfsError::NotADirectory(_) => {
                        if st.status.is_none_or(|s| s == Status::Unknown) {
                            st.status = Some(Status::Known(FileKind::File));
                        }
                    }
                    _ => {}
                }
                Arc::new(Vec::new())
            }
        }
    }

    /// Kind of an entry whose parent may not have been listed yet. Verifies
    /// by listing parents rather than stat'ing the entry itself, so
    /// provisional names also get promoted to their on-disk casing. Listing
    /// runs top-down over any unknown ancestors.
    pub fn verify_sync(&self, entry: &Entry) -> Option<FileKind> {
        if !entry.is_unknown() {
            return entry.kind();
        }
        for e in chain(entry) {
            if e.is_unknown()
                && let Some(parent) = e.parent()
            {
                self.list_dir_sync(&parent);
            }
        }
        entry.kind()
    }

    pub async fn verify(&self, entry: &Entry) -> Option<FileKind> {
        if !entry.is_unknown() {
            return entry.kind();
        }
        for e in chain(entry) {
            if e.is_unknown()
                && let Some(parent) = e.parent()
            {
                self.list_dir(&parent).await;
            }
        }
        entry.kind()
    }

    /// Canonical entry for `entry`, or `None` if it cannot be resolved.
    /// Memoized per entry.
    pub fn realpath_sync(&self, entry: &Entry) -> Option<Entry> {
        if let Some(memo) = entry.0.state.lock().unwrap().realpath.clone() {
            return memo;
        }
        let result = self.shared.backend.canonicalize_sync(&entry.fullpath());
        self.store_realpath(entry, result)
    }

    pub async fn realpath(&self, entry: &Entry) -> Option<Entry> {
        if let Some(memo) = entry.0.state.lock().unwrap().realpath.clone() {
            return memo;
        }
        let result = self.shared.backend.canonicalize(&entry.fullpath()).await;
        self.store_realpath(entry, result)
    }

    fn store_realpath(&self, entry: &Entry, result: Result<String, VfsError>) -> Option<Entry> {
        let resolved = match result {
            Ok(path) => Some(self.resolve(entry, &path)),
            Err(_) => None,
        };
        entry.0.state.lock().unwrap().realpath = Some(resolved.clone());
        resolved
    }

    /// Path of `entry` relative to the cache cwd. Empty string for the cwd
    /// itself, `../` forms when the entry sits outside it, and the full
    /// path when the two are on different roots.
    pub fn relative(&self, entry: &Entry) -> String {
        let cwd = self.cwd_entry();
        let entry_chain = chain(entry);
        let cwd_chain = chain(&cwd);
        if entry_chain[0] != cwd_chain[0] {
            return entry.fullpath();
        }
        let mut common = 0;
        while common < entry_chain.len()
            && common < cwd_chain.len()
            && entry_chain[common] == cwd_chain[common]
        {
            common += 1;
        }
        let mut parts: Vec<String> = Vec::new();
        for _ in common..cwd_chain.len() {
            parts.push("..".to_string());
        }
        for e in &entry_chain[common..] {
            parts.push(e.name());
        }
        parts.join("/")
    }
}

/// Root-first chain of entries from the root down to `entry`.
fn chain(entry: &Entry) -> Vec<Entry> {
    let mut out = vec![entry.clone()];
    let mut cur = entry.clone();
    while let Some(parent) = cur.parent() {
        out.push(parent.clone());
        cur = parent;
    }
    out.reverse();
    out
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("platform", &self.shared.platform)
            .field("nocase", &self.shared.nocase)
            .finish()
    }
}
