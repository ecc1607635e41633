//! Result exclusion by ignore globs.
//!
//! Ignore patterns are ordinary globs, always evaluated in `dot:true` mode
//! regardless of the main walk settings. A pattern ending in `/**` ignores
//! the directory itself as well as everything below it, and lets the walker
//! prune the whole subtree.

use std::sync::Arc;

use scamper_vfs::{parse_root, Entry, PathCache, Platform};

use crate::braces::expand_braces;
use crate::pattern::Pattern;
use crate::segment::PatternError;
use crate::token::{compile, CompileOpts, Token};

#[derive(Debug)]
struct IgnoreGlob {
    /// Token sequence with any root and trailing-slash marker stripped.
    tokens: Vec<Token>,
    /// Root literal for absolute patterns, empty otherwise.
    root: String,
    /// Pattern ended in a trailing slash: directories only.
    dir_only: bool,
    /// Pattern ended in `/**`: the subtree below a full prefix match is
    /// entirely ignored.
    children: bool,
}

/// Compiled ignore patterns. One predicate for entries, one for pruning.
#[derive(Debug)]
pub struct IgnoreFilter {
    globs: Vec<IgnoreGlob>,
    nocase: bool,
    platform: Platform,
}

impl IgnoreFilter {
    pub fn new(
        patterns: &[String],
        opts: &CompileOpts,
        nobrace: bool,
    ) -> Result<IgnoreFilter, PatternError> {
        let mut globs = Vec::new();
        for source in patterns {
            let expanded = if nobrace {
                vec![source.clone()]
            } else {
                expand_braces(source)
            };
            for one in expanded {
                let (tokens, parts) = compile(&one, opts)?;
                let pattern = Pattern::build(tokens, parts, opts.platform)?;
                globs.push(Self::compile_one(&pattern));
            }
        }
        Ok(IgnoreFilter {
            globs,
            nocase: opts.nocase,
            platform: opts.platform,
        })
    }

    fn compile_one(pattern: &Arc<Pattern>) -> IgnoreGlob {
        let root = pattern.root().to_string();
        let mut tokens = Vec::new();
        let mut cursor = Some(pattern.clone());
        while let Some(c) = cursor {
            tokens.push(c.token().clone());
            cursor = c.rest();
        }
        if !root.is_empty() {
            tokens.remove(0);
        }
        let dir_only = matches!(tokens.last(), Some(Token::Literal(s)) if s.is_empty());
        if dir_only {
            tokens.pop();
        }
        let children = tokens.len() > 1 && matches!(tokens.last(), Some(Token::GlobStar));
        IgnoreGlob {
            tokens,
            root,
            dir_only,
            children,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    /// Whether a candidate match must be dropped.
    pub fn ignored(&self, cache: &PathCache, entry: &Entry, is_dir: bool) -> bool {
        self.globs.iter().any(|glob| {
            if glob.dir_only && !is_dir {
                return false;
            }
            match self.components(cache, entry, glob) {
                Some(comps) => seq_match(&glob.tokens, &comps, self.nocase),
                None => false,
            }
        })
    }

    /// Whether everything below `entry` is ignored, so the walker can skip
    /// listing it altogether.
    pub fn children_ignored(&self, cache: &PathCache, entry: &Entry) -> bool {
        self.globs.iter().any(|glob| {
            if !glob.children {
                return false;
            }
            let prefix = &glob.tokens[..glob.tokens.len() - 1];
            match self.components(cache, entry, glob) {
                Some(comps) => seq_match(prefix, &comps, self.nocase),
                None => false,
            }
        })
    }

    /// Path components of `entry` in the glob's frame: relative to the cwd
    /// for relative patterns, relative to the matching root for absolute
    /// ones. `None` when the frames are incompatible.
    fn components(&self, cache: &PathCache, entry: &Entry, glob: &IgnoreGlob) -> Option<Vec<String>> {
        let path = if glob.root.is_empty() {
            cache.relative(entry)
        } else {
            let full = entry.fullpath();
            let (root, rest) = parse_root(&full, self.platform)?;
            if !root_eq(&root, &glob.root, self.platform) {
                return None;
            }
            rest.to_string()
        };
        Some(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

fn root_eq(a: &str, b: &str, platform: Platform) -> bool {
    // windows roots compare case-insensitively no matter what
    a == b || (platform.is_windows() && a.to_lowercase() == b.to_lowercase())
}

fn lit_eq(a: &str, b: &str, nocase: bool) -> bool {
    a == b || (nocase && a.to_lowercase() == b.to_lowercase())
}

/// Match a token sequence against path components, with backtracking for
/// globstar. Ignore matching always allows dotfiles.
fn seq_match(tokens: &[Token], comps: &[String], nocase: bool) -> bool {
    let Some(token) = tokens.first() else {
        return comps.is_empty();
    };
    match token {
        Token::GlobStar => {
            // zero or more components, so `p/**` also covers `p` itself
            (0..=comps.len()).any(|skip| seq_match(&tokens[1..], &comps[skip..], nocase))
        }
        Token::Literal(lit) => !comps.is_empty()
            && lit_eq(lit, &comps[0], nocase)
            && seq_match(&tokens[1..], &comps[1..], nocase),
        Token::Matcher(m) => !comps.is_empty()
            && m.matches(&comps[0], true)
            && seq_match(&tokens[1..], &comps[1..], nocase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scamper_vfs::MemoryBackend;

    fn setup() -> (PathCache, Entry) {
        let fs = MemoryBackend::new();
        fs.add_file("/src/f.txt");
        fs.add_file("/src/sub/g.txt");
        fs.add_file("/other/h.txt");
        fs.add_file("/.env");
        let cache = PathCache::new(std::sync::Arc::new(fs), Platform::Posix, false, "/").unwrap();
        let cwd = cache.cwd_entry();
        (cache, cwd)
    }

    fn filter(patterns: &[&str]) -> IgnoreFilter {
        let opts = CompileOpts {
            platform: Platform::Posix,
            ..CompileOpts::default()
        };
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        IgnoreFilter::new(&patterns, &opts, false).unwrap()
    }

    #[test]
    fn plain_patterns() {
        let (cache, cwd) = setup();
        let f = filter(&["src/*.txt"]);
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "src/f.txt"), false));
        assert!(!f.ignored(&cache, &cache.resolve(&cwd, "src/sub/g.txt"), false));
        assert!(!f.ignored(&cache, &cache.resolve(&cwd, "other/h.txt"), false));
    }

    #[test]
    fn globstar_patterns_cover_the_directory_itself() {
        let (cache, cwd) = setup();
        let f = filter(&["src/**"]);
        let src = cache.resolve(&cwd, "src");
        assert!(f.ignored(&cache, &src, true), "src/** ignores src itself");
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "src/f.txt"), false));
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "src/sub/g.txt"), false));
        assert!(!f.ignored(&cache, &cache.resolve(&cwd, "other/h.txt"), false));
    }

    #[test]
    fn children_pruning() {
        let (cache, cwd) = setup();
        let f = filter(&["src/**"]);
        assert!(f.children_ignored(&cache, &cache.resolve(&cwd, "src")));
        assert!(f.children_ignored(&cache, &cache.resolve(&cwd, "src/sub")));
        assert!(!f.children_ignored(&cache, &cache.resolve(&cwd, "other")));
        // plain patterns never prune
        let plain = filter(&["src/*.txt"]);
        assert!(!plain.children_ignored(&cache, &cache.resolve(&cwd, "src")));
    }

    #[test]
    fn ignore_always_sees_dotfiles() {
        let (cache, cwd) = setup();
        let f = filter(&["*"]);
        assert!(f.ignored(&cache, &cache.resolve(&cwd, ".env"), false));
        let star = filter(&["**/.e*"]);
        assert!(star.ignored(&cache, &cache.resolve(&cwd, ".env"), false));
    }

    #[test]
    fn dir_only_patterns() {
        let (cache, cwd) = setup();
        let f = filter(&["src/"]);
        let src = cache.resolve(&cwd, "src");
        assert!(f.ignored(&cache, &src, true));
        assert!(!f.ignored(&cache, &src, false));
    }

    #[test]
    fn absolute_patterns_match_fullpaths() {
        let (cache, cwd) = setup();
        let f = filter(&["/src/*.txt"]);
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "src/f.txt"), false));
        assert!(!f.ignored(&cache, &cache.resolve(&cwd, "src/sub/g.txt"), false));
    }

    #[test]
    fn braces_expand_inside_ignores() {
        let (cache, cwd) = setup();
        let f = filter(&["{src,other}/*.txt"]);
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "src/f.txt"), false));
        assert!(f.ignored(&cache, &cache.resolve(&cwd, "other/h.txt"), false));
    }
}
