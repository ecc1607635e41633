//! scamper: shell-faithful glob matching over a cached directory walk.
//!
//! Expands glob patterns against the filesystem with POSIX/Bash-compatible
//! semantics: `*`, `?`, character classes with POSIX names, extended globs,
//! braces, and `**` with symlink-cycle avoidance. Directory reads go through
//! an identity-caching adapter ([`scamper_vfs::PathCache`]) so repeated
//! walks over an unchanged tree skip the filesystem entirely.
//!
//! One surface, several flavors:
//!
//! ```no_run
//! use futures::StreamExt;
//! use scamper::{Glob, GlobOptions};
//!
//! # async fn demo() -> Result<(), scamper::GlobError> {
//! // collected, async or sync
//! let matches = scamper::glob("src/**/*.rs").await?;
//! let matches = scamper::glob_sync("src/**/*.rs")?;
//!
//! // streaming / iterating, with options
//! let glob = Glob::new(["**/*.rs"], GlobOptions { dot: true, ..Default::default() })?;
//! let mut stream = glob.stream();
//! while let Some(m) = stream.next().await { /* ... */ }
//! for m in glob.iter_sync() { /* ... */ }
//! # Ok(())
//! # }
//! ```
//!
//! There is no unmatched-pattern fallback: a pattern that matches nothing
//! contributes nothing. Results contain each entry at most once per walk,
//! in no particular order beyond that.

mod braces;
mod ignore;
mod options;
mod pattern;
mod processor;
mod segment;
mod token;
mod walker;

pub use braces::expand_braces;
pub use ignore::IgnoreFilter;
pub use options::GlobOptions;
pub use pattern::Pattern;
pub use segment::{PatternError, SegmentPattern};
pub use token::{CompileOpts, Token};
pub use walker::{GlobIterSync, GlobStream, Matched};

pub use scamper_vfs::{
    Backend, Entry, FileKind, LocalBackend, MemoryBackend, PathCache, Platform, VfsError,
};

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ignore::IgnoreFilter as Ignore;
use crate::walker::{WalkConfig, WalkContext};

/// Errors surfaced to the caller. Anything encountered during traversal is
/// recovered locally instead; only misconfiguration and malformed patterns
/// reach this type.
#[derive(Debug, Error)]
pub enum GlobError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// A prepared glob invocation: compiled patterns plus a cache to walk.
///
/// Construction validates the configuration and compiles every pattern;
/// the walk flavors can then run any number of times. Walks sharing one
/// `Glob` (or one [`PathCache`] passed via [`GlobOptions::cache`]) reuse
/// directory listings.
#[derive(Debug)]
pub struct Glob {
    cache: PathCache,
    patterns: Vec<Arc<Pattern>>,
    config: WalkConfig,
    ignore: Option<Arc<Ignore>>,
}

impl Glob {
    /// Build from one or more pattern strings against the real filesystem,
    /// or against [`GlobOptions::cache`] when provided.
    pub fn new<I, S>(patterns: I, opts: GlobOptions) -> Result<Glob, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match opts.cache.clone() {
            Some(cache) => Self::build(patterns, opts, cache),
            None => {
                let platform = opts.platform.unwrap_or_else(Platform::native);
                let nocase = opts.nocase.unwrap_or_else(|| platform.default_nocase());
                let backend = Arc::new(LocalBackend::new());
                let cwd = match &opts.cwd {
                    Some(raw) => options::normalize_cwd(raw, platform),
                    None => backend.cwd_path()?,
                };
                let cache = PathCache::new(backend, platform, nocase, &cwd)?;
                Self::build(patterns, opts, cache)
            }
        }
    }

    /// Build against an explicit backend. Useful for virtual trees and
    /// tests.
    pub fn with_backend<I, S>(
        patterns: I,
        opts: GlobOptions,
        backend: Arc<dyn Backend>,
    ) -> Result<Glob, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let platform = opts.platform.unwrap_or_else(Platform::native);
        let nocase = opts.nocase.unwrap_or_else(|| platform.default_nocase());
        let cwd = match &opts.cwd {
            Some(raw) => options::normalize_cwd(raw, platform),
            None => backend.cwd_path()?,
        };
        let cache = PathCache::new(backend, platform, nocase, &cwd)?;
        Self::build(patterns, opts, cache)
    }

    fn build<I, S>(patterns: I, opts: GlobOptions, cache: PathCache) -> Result<Glob, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if opts.with_file_types && opts.absolute.is_some() {
            return Err(GlobError::Config(
                "cannot set absolute and withFileTypes together".to_string(),
            ));
        }
        if opts.match_base && opts.noglobstar {
            return Err(GlobError::Config(
                "base matching requires globstar".to_string(),
            ));
        }
        let platform = opts.platform.unwrap_or_else(|| cache.platform());
        if platform != cache.platform() {
            return Err(GlobError::Config(
                "platform disagrees with the provided cache".to_string(),
            ));
        }
        let nocase = opts.nocase.unwrap_or_else(|| platform.default_nocase());
        if nocase != cache.nocase() {
            return Err(GlobError::Config(
                "case sensitivity disagrees with the provided cache".to_string(),
            ));
        }

        let compile_opts = CompileOpts {
            nocase,
            noext: opts.noext,
            noglobstar: opts.noglobstar,
            match_base: opts.match_base,
            windows_paths_no_escape: opts.windows_paths_no_escape,
            platform,
        };

        let mut compiled = Vec::new();
        for source in patterns {
            let source = source.as_ref();
            let expanded = if opts.nobrace {
                vec![source.to_string()]
            } else {
                expand_braces(source)
            };
            for one in expanded {
                let (tokens, parts) = token::compile(&one, &compile_opts)?;
                compiled.push(Pattern::build(tokens, parts, platform)?);
            }
        }

        let ignore = if opts.ignore.is_empty() {
            None
        } else {
            Some(Arc::new(Ignore::new(
                &opts.ignore,
                &compile_opts,
                opts.nobrace,
            )?))
        };

        Ok(Glob {
            cache,
            patterns: compiled,
            config: WalkConfig {
                dot: opts.dot,
                follow: opts.follow,
                mark: opts.mark,
                nodir: opts.nodir,
                realpath: opts.realpath,
                with_file_types: opts.with_file_types,
                absolute: opts.absolute,
                signal: opts.signal.unwrap_or_else(CancellationToken::new),
            },
            ignore,
        })
    }

    /// The cache backing this invocation. Hand it to another `Glob` via
    /// [`GlobOptions::cache`] to share directory listings.
    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    fn context(&self) -> Arc<WalkContext> {
        Arc::new(WalkContext::new(
            self.cache.clone(),
            self.patterns.clone(),
            self.config.clone(),
            self.ignore.clone(),
        ))
    }

    /// Collect all matches asynchronously.
    pub async fn walk(&self) -> Vec<Matched> {
        let mut stream = self.stream();
        let mut out = Vec::new();
        while let Some(m) = stream.next().await {
            out.push(m);
        }
        out
    }

    /// Collect all matches synchronously.
    pub fn walk_sync(&self) -> Vec<Matched> {
        self.iter_sync().collect()
    }

    /// Stream matches as they are found. The stream is also the async
    /// iterator flavor; it ends cleanly on completion or cancellation.
    pub fn stream(&self) -> GlobStream {
        GlobStream::spawn(self.context())
    }

    /// Lazy synchronous iteration; directory reads happen as the iterator
    /// is advanced.
    pub fn iter_sync(&self) -> GlobIterSync {
        GlobIterSync::new(self.context())
    }
}

/// Expand a single pattern with default options, asynchronously.
pub async fn glob(pattern: &str) -> Result<Vec<String>, GlobError> {
    let glob = Glob::new([pattern], GlobOptions::default())?;
    Ok(glob
        .walk()
        .await
        .into_iter()
        .filter_map(Matched::into_path)
        .collect())
}

/// Expand a single pattern with default options, synchronously.
pub fn glob_sync(pattern: &str) -> Result<Vec<String>, GlobError> {
    let glob = Glob::new([pattern], GlobOptions::default())?;
    Ok(glob
        .walk_sync()
        .into_iter()
        .filter_map(Matched::into_path)
        .collect())
}

/// Whether a pattern contains anything the walker would treat as magic:
/// wildcards, classes, extglobs, globstar, or braces that expand to more
/// than one alternative. The relevant options are honored, e.g. braces stop
/// counting under `nobrace`.
pub fn has_magic(pattern: &str, opts: &GlobOptions) -> bool {
    let platform = opts.platform.unwrap_or_else(Platform::native);
    let compile_opts = CompileOpts {
        nocase: opts.nocase.unwrap_or_else(|| platform.default_nocase()),
        noext: opts.noext,
        noglobstar: opts.noglobstar,
        match_base: opts.match_base,
        windows_paths_no_escape: opts.windows_paths_no_escape,
        platform,
    };
    token::has_magic(pattern, &compile_opts, opts.nobrace)
}
