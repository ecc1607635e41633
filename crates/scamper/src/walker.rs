//! Walk drivers over the planner.
//!
//! Both flavors run the same loop: plan with a [`Processor`], harvest the
//! matches, list each subwalk directory through the cache, classify the
//! children into a child processor, repeat until no subwalks remain.
//!
//! The sync driver is a lazy iterator. The async driver lists directories
//! concurrently (bounded by a semaphore) and feeds a bounded channel, so a
//! slow consumer applies backpressure instead of letting the walk read
//! ahead without limit.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::stream::StreamExt;
use futures::Stream;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use scamper_vfs::{Entry, FileKind, PathCache};

use crate::ignore::IgnoreFilter;
use crate::pattern::Pattern;
use crate::processor::{HasWalkedCache, Processor, ProcessorOpts};

/// Cap on concurrently outstanding directory reads in the async walker.
const READ_CONCURRENCY: usize = 64;

/// Bounded stream buffer between the walker and its consumer.
const STREAM_CAPACITY: usize = 256;

/// One walk result: a shaped path string, or the entry handle itself when
/// `with_file_types` is set.
#[derive(Debug, Clone)]
pub enum Matched {
    Path(String),
    Entry(Entry),
}

impl Matched {
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Matched::Path(s) => Some(s),
            Matched::Entry(_) => None,
        }
    }

    pub fn into_path(self) -> Option<String> {
        match self {
            Matched::Path(s) => Some(s),
            Matched::Entry(_) => None,
        }
    }

    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Matched::Path(_) => None,
            Matched::Entry(e) => Some(e),
        }
    }
}

impl std::fmt::Display for Matched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matched::Path(s) => f.write_str(s),
            Matched::Entry(e) => f.write_str(&e.fullpath()),
        }
    }
}

/// Walk-time configuration, distilled from the public options.
#[derive(Debug, Clone)]
pub(crate) struct WalkConfig {
    pub dot: bool,
    pub follow: bool,
    pub mark: bool,
    pub nodir: bool,
    pub realpath: bool,
    pub with_file_types: bool,
    pub absolute: Option<bool>,
    pub signal: CancellationToken,
}

/// Everything a walk needs, shared between drivers and steps.
pub(crate) struct WalkContext {
    pub cache: PathCache,
    pub patterns: Vec<Arc<Pattern>>,
    pub config: WalkConfig,
    pub ignore: Option<Arc<IgnoreFilter>>,
    seen: Mutex<HashSet<Entry>>,
    reads: Semaphore,
}

/// A pending walkCB2-style work unit: evaluate `patterns` against `target`.
type Unit = (Entry, Vec<Arc<Pattern>>, HasWalkedCache);

impl WalkContext {
    pub fn new(
        cache: PathCache,
        patterns: Vec<Arc<Pattern>>,
        config: WalkConfig,
        ignore: Option<Arc<IgnoreFilter>>,
    ) -> WalkContext {
        WalkContext {
            cache,
            patterns,
            config,
            ignore,
            seen: Mutex::new(HashSet::new()),
            reads: Semaphore::new(READ_CONCURRENCY),
        }
    }

    fn processor_opts(&self) -> ProcessorOpts {
        ProcessorOpts {
            dot: self.config.dot,
            follow: self.config.follow,
            absolute: self.config.absolute,
        }
    }

    fn cancelled(&self) -> bool {
        self.config.signal.is_cancelled()
    }

    fn initial_unit(&self) -> Unit {
        (
            self.cache.cwd_entry(),
            self.patterns.clone(),
            HasWalkedCache::default(),
        )
    }

    fn subtree_pruned(&self, target: &Entry) -> bool {
        self.ignore
            .as_ref()
            .is_some_and(|ig| ig.children_ignored(&self.cache, target))
    }

    /// Finalize one candidate, sync flavor. `None` drops it.
    fn match_check_sync(&self, e: &Entry, absolute: bool, if_dir: bool) -> Option<Matched> {
        if self.cancelled() || self.seen.lock().unwrap().contains(e) {
            return None;
        }
        let kind = self.cache.verify_sync(e)?;
        if if_dir && !self.dir_or_resolves_sync(e, kind) {
            return None;
        }
        if self.config.nodir {
            if kind == FileKind::Dir {
                return None;
            }
            if self.config.follow
                && kind == FileKind::Symlink
                && self.dir_or_resolves_sync(e, kind)
            {
                return None;
            }
        }
        let mut m = e.clone();
        if self.config.realpath {
            m = self.cache.realpath_sync(&m)?;
        }
        if let Some(ignore) = &self.ignore {
            let m_kind = self.cache.verify_sync(&m);
            if ignore.ignored(&self.cache, &m, m_kind == Some(FileKind::Dir)) {
                return None;
            }
        }
        if !self.seen.lock().unwrap().insert(m.clone()) {
            return None;
        }
        Some(self.shape(m, absolute, |e| self.cache.verify_sync(e)))
    }

    /// Finalize one candidate, async flavor. Mirrors the sync path with
    /// awaited cache calls.
    async fn match_check(&self, e: &Entry, absolute: bool, if_dir: bool) -> Option<Matched> {
        if self.cancelled() || self.seen.lock().unwrap().contains(e) {
            return None;
        }
        let kind = self.cache.verify(e).await?;
        if if_dir && !self.dir_or_resolves(e, kind).await {
            return None;
        }
        if self.config.nodir {
            if kind == FileKind::Dir {
                return None;
            }
            if self.config.follow
                && kind == FileKind::Symlink
                && self.dir_or_resolves(e, kind).await
            {
                return None;
            }
        }
        let mut m = e.clone();
        if self.config.realpath {
            m = self.cache.realpath(&m).await?;
        }
        if let Some(ignore) = &self.ignore {
            let m_kind = self.cache.verify(&m).await;
            if ignore.ignored(&self.cache, &m, m_kind == Some(FileKind::Dir)) {
                return None;
            }
        }
        if !self.seen.lock().unwrap().insert(m.clone()) {
            return None;
        }
        let m_kind = if self.config.mark {
            self.cache.verify(&m).await
        } else {
            m.kind()
        };
        Some(self.shape(m, absolute, |e| {
            if self.config.mark { m_kind } else { e.kind() }
        }))
    }

    /// Is the entry a directory, or a symlink that resolves to one?
    fn dir_or_resolves_sync(&self, e: &Entry, kind: FileKind) -> bool {
        match kind {
            FileKind::Dir => true,
            FileKind::Symlink => self
                .cache
                .realpath_sync(e)
                .and_then(|rp| self.cache.verify_sync(&rp))
                == Some(FileKind::Dir),
            FileKind::File => false,
        }
    }

    async fn dir_or_resolves(&self, e: &Entry, kind: FileKind) -> bool {
        match kind {
            FileKind::Dir => true,
            FileKind::Symlink => match self.cache.realpath(e).await {
                Some(rp) => self.cache.verify(&rp).await == Some(FileKind::Dir),
                None => false,
            },
            FileKind::File => false,
        }
    }

    /// Apply the output shape: entry handle, absolute path, or cwd-relative
    /// path, with the `mark` suffix for directories.
    fn shape(
        &self,
        m: Entry,
        absolute_flag: bool,
        kind_of: impl Fn(&Entry) -> Option<FileKind>,
    ) -> Matched {
        if self.config.with_file_types {
            return Matched::Entry(m);
        }
        let absolute = self.config.absolute.unwrap_or(absolute_flag);
        let mut s = if absolute {
            m.fullpath()
        } else {
            let rel = self.cache.relative(&m);
            if rel.is_empty() { ".".to_string() } else { rel }
        };
        if self.config.mark && kind_of(&m) == Some(FileKind::Dir) && !s.ends_with('/') {
            s.push('/');
        }
        Matched::Path(s)
    }
}

/// Lazy synchronous walk. `next()` performs just enough directory reads to
/// produce the next match.
pub struct GlobIterSync {
    ctx: Arc<WalkContext>,
    queue: VecDeque<Unit>,
    pending: VecDeque<Matched>,
}

impl GlobIterSync {
    pub(crate) fn new(ctx: Arc<WalkContext>) -> GlobIterSync {
        let initial = ctx.initial_unit();
        GlobIterSync {
            ctx,
            queue: VecDeque::from([initial]),
            pending: VecDeque::new(),
        }
    }

    fn step(&mut self) {
        let Some((target, patterns, walked)) = self.queue.pop_front() else {
            return;
        };
        let ctx = self.ctx.clone();
        if ctx.cancelled() {
            self.queue.clear();
            return;
        }
        if ctx.subtree_pruned(&target) {
            return;
        }
        let mut proc = Processor::new(ctx.processor_opts(), Some(walked));
        proc.process_patterns(&target, &patterns, &ctx.cache);
        for (e, absolute, if_dir) in proc.matches.entries() {
            if let Some(m) = ctx.match_check_sync(&e, absolute, if_dir) {
                self.pending.push_back(m);
            }
        }
        let targets: Vec<Entry> = proc.subwalks.targets().cloned().collect();
        for t in targets {
            if ctx.cancelled() {
                self.queue.clear();
                return;
            }
            let entries = ctx.cache.list_dir_sync(&t);
            let child = proc.filter_entries(&t, &entries);
            for (e, absolute, if_dir) in child.matches.entries() {
                if let Some(m) = ctx.match_check_sync(&e, absolute, if_dir) {
                    self.pending.push_back(m);
                }
            }
            self.queue.extend(child.into_next_units());
        }
    }
}

impl Iterator for GlobIterSync {
    type Item = Matched;

    fn next(&mut self) -> Option<Matched> {
        loop {
            if let Some(m) = self.pending.pop_front() {
                return Some(m);
            }
            if self.queue.is_empty() {
                return None;
            }
            self.step();
        }
    }
}

/// Receiver half of an async walk.
pub struct GlobStream {
    rx: mpsc::Receiver<Matched>,
}

impl GlobStream {
    pub(crate) fn spawn(ctx: Arc<WalkContext>) -> GlobStream {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(walk_async(ctx, tx));
        GlobStream { rx }
    }
}

impl Stream for GlobStream {
    type Item = Matched;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Matched>> {
        self.rx.poll_recv(cx)
    }
}

/// The consumer went away; stop producing.
struct Closed;

/// Drive a whole walk, sending matches into `tx`. Units at the same depth
/// run concurrently; per-unit directory reads share the context semaphore.
pub(crate) async fn walk_async(ctx: Arc<WalkContext>, tx: mpsc::Sender<Matched>) {
    let mut frontier = vec![ctx.initial_unit()];
    while !frontier.is_empty() {
        if ctx.cancelled() {
            return;
        }
        let units = std::mem::take(&mut frontier);
        let mut results = futures::stream::iter(
            units.into_iter().map(|unit| run_unit(&ctx, unit, &tx)),
        )
        .buffer_unordered(READ_CONCURRENCY);
        while let Some(result) = results.next().await {
            match result {
                Ok(next) => frontier.extend(next),
                Err(Closed) => return,
            }
        }
    }
}

async fn run_unit(
    ctx: &WalkContext,
    (target, patterns, walked): Unit,
    tx: &mpsc::Sender<Matched>,
) -> Result<Vec<Unit>, Closed> {
    if ctx.cancelled() {
        return Ok(Vec::new());
    }
    if ctx.subtree_pruned(&target) {
        return Ok(Vec::new());
    }
    let mut proc = Processor::new(ctx.processor_opts(), Some(walked));
    proc.process_patterns(&target, &patterns, &ctx.cache);
    for (e, absolute, if_dir) in proc.matches.entries() {
        if let Some(m) = ctx.match_check(&e, absolute, if_dir).await {
            tx.send(m).await.map_err(|_| Closed)?;
        }
    }

    let targets: Vec<Entry> = proc.subwalks.targets().cloned().collect();
    let listings = futures::future::join_all(targets.into_iter().map(|t| {
        let ctx = &*ctx;
        async move {
            if ctx.cancelled() {
                return None;
            }
            let _permit = ctx.reads.acquire().await.ok()?;
            let entries = ctx.cache.list_dir(&t).await;
            Some((t, entries))
        }
    }))
    .await;

    let mut next = Vec::new();
    for (t, entries) in listings.into_iter().flatten() {
        let child = proc.filter_entries(&t, &entries);
        for (e, absolute, if_dir) in child.matches.entries() {
            if let Some(m) = ctx.match_check(&e, absolute, if_dir).await {
                tx.send(m).await.map_err(|_| Closed)?;
            }
        }
        next.extend(child.into_next_units());
    }
    Ok(next)
}
