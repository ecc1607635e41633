//! The walk planner.
//!
//! A `Processor` turns (directory, pattern) work items into two outputs
//! without touching the filesystem: entries that are already known matches,
//! and subwalks, directories that must be listed before their patterns can
//! advance. After the walker performs a listing, `filter_entries` classifies
//! the children into a fresh child processor and the cycle repeats.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use scamper_vfs::{Entry, PathCache};

use crate::pattern::Pattern;
use crate::token::Token;

/// Memo of (directory, remaining-pattern) pairs already scheduled, so
/// globstars over symlink cycles terminate. Keyed by fullpath and pattern
/// fingerprint.
#[derive(Debug, Default, Clone)]
pub struct HasWalkedCache {
    store: HashMap<String, HashSet<Arc<str>>>,
}

impl HasWalkedCache {
    pub fn has_walked(&self, target: &Entry, pattern: &Pattern) -> bool {
        self.store
            .get(&target.fullpath())
            .is_some_and(|set| set.contains(&pattern.glob_string()))
    }

    pub fn store_walked(&mut self, target: &Entry, pattern: &Pattern) {
        self.store
            .entry(target.fullpath())
            .or_default()
            .insert(pattern.glob_string());
    }

    /// Fork for a child processor. The copy never observes later mutations
    /// of the parent; sibling subtrees do not share walk decisions.
    pub fn copy(&self) -> HasWalkedCache {
        self.clone()
    }
}

const FLAG_IF_DIR: u8 = 0b01;
const FLAG_ABSOLUTE: u8 = 0b10;

/// Match candidates for one planning step, with their emission flags.
#[derive(Debug, Default)]
pub struct MatchRecord {
    store: HashMap<Entry, u8>,
    order: Vec<Entry>,
}

impl MatchRecord {
    /// Record a match. Flags combine by AND: absolute survives only when
    /// every path to the entry asked for it, and a single unconditional
    /// match clears if-dir.
    pub fn add(&mut self, target: &Entry, absolute: bool, if_dir: bool) {
        let n = (if absolute { FLAG_ABSOLUTE } else { 0 }) | (if if_dir { FLAG_IF_DIR } else { 0 });
        match self.store.get_mut(target) {
            Some(current) => *current &= n,
            None => {
                self.store.insert(target.clone(), n);
                self.order.push(target.clone());
            }
        }
    }

    /// Matches in insertion order as (entry, absolute, if_dir).
    pub fn entries(&self) -> impl Iterator<Item = (Entry, bool, bool)> + '_ {
        self.order.iter().map(|e| {
            let flags = self.store[e];
            (
                e.clone(),
                flags & FLAG_ABSOLUTE != 0,
                flags & FLAG_IF_DIR != 0,
            )
        })
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Directories to list, each with the patterns to evaluate against its
/// children. Patterns deduplicate by fingerprint; unreadable targets are
/// silently dropped.
#[derive(Debug, Default)]
pub struct SubWalks {
    store: Vec<(Entry, Vec<Arc<Pattern>>)>,
}

impl SubWalks {
    pub fn add(&mut self, target: &Entry, pattern: &Arc<Pattern>) {
        if !target.can_readdir() {
            return;
        }
        if let Some((_, patterns)) = self.store.iter_mut().find(|(t, _)| t == target) {
            if !patterns
                .iter()
                .any(|p| p.glob_string() == pattern.glob_string())
            {
                patterns.push(pattern.clone());
            }
        } else {
            self.store.push((target.clone(), vec![pattern.clone()]));
        }
    }

    pub fn get(&self, target: &Entry) -> &[Arc<Pattern>] {
        self.store
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    pub fn targets(&self) -> impl Iterator<Item = &Entry> {
        self.store.iter().map(|(t, _)| t)
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn into_items(self) -> Vec<(Entry, Vec<Arc<Pattern>>)> {
        self.store
    }
}

/// Planner options, the subset of the public configuration the pure
/// planning steps need.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorOpts {
    pub dot: bool,
    pub follow: bool,
    /// The public `absolute` override: `Some(false)` suppresses the
    /// absolute flag even for absolute patterns.
    pub absolute: Option<bool>,
}

pub struct Processor {
    opts: ProcessorOpts,
    pub has_walked: HasWalkedCache,
    pub matches: MatchRecord,
    pub subwalks: SubWalks,
}

impl Processor {
    pub fn new(opts: ProcessorOpts, has_walked: Option<HasWalkedCache>) -> Processor {
        Processor {
            opts,
            has_walked: has_walked.unwrap_or_default(),
            matches: MatchRecord::default(),
            subwalks: SubWalks::default(),
        }
    }

    /// Fresh processor for the next level, with a forked walk memo.
    pub fn child(&self) -> Processor {
        Processor::new(self.opts, Some(self.has_walked.copy()))
    }

    /// Plan a batch of (target, pattern) work items. See the module docs for
    /// the shape of the outputs.
    pub fn process_patterns(
        &mut self,
        target: &Entry,
        patterns: &[Arc<Pattern>],
        cache: &PathCache,
    ) -> &mut Processor {
        for pattern in patterns {
            self.has_walked.store_walked(target, pattern);
            let mut t = target.clone();
            let mut pattern = pattern.clone();

            let absolute = pattern.is_absolute() && self.opts.absolute != Some(false);

            // an absolute pattern starts over at its own root
            let root = pattern.root().to_string();
            if !root.is_empty() {
                t = cache.resolve(&t, &root);
                match pattern.rest() {
                    Some(rest) => pattern = rest,
                    None => {
                        self.matches.add(&t, true, false);
                        continue;
                    }
                }
            }

            // fold the literal prefix into the target; stop at a name the
            // cache has not seen, the walker will discover it by listing
            let mut changed = false;
            loop {
                let Token::Literal(p) = pattern.token() else {
                    break;
                };
                let Some(rest) = pattern.rest() else { break };
                let c = cache.resolve(&t, p);
                if c.is_unknown() && p != ".." {
                    break;
                }
                t = c;
                pattern = rest;
                changed = true;
            }
            if changed {
                if self.has_walked.has_walked(&t, &pattern) {
                    continue;
                }
                self.has_walked.store_walked(&t, &pattern);
            }

            let rest = pattern.rest();
            match pattern.token() {
                Token::Literal(p) => {
                    if rest.is_none() {
                        let if_dir = p == ".." || p.is_empty() || p == ".";
                        self.matches.add(&cache.resolve(&t, p), absolute, if_dir);
                    } else {
                        // could not fold further; readability has to be
                        // checked before descending
                        self.subwalks.add(&t, &pattern);
                    }
                }
                Token::GlobStar => {
                    // the globstar re-applies to the whole subtree, unless
                    // it would cross a symlink it is not allowed to
                    if !t.is_symlink() || self.opts.follow || pattern.check_follow_globstar() {
                        self.subwalks.add(&t, &pattern);
                    }
                    let rest_token = rest.as_ref().map(|r| r.token());
                    let rest_rest = rest.as_ref().and_then(|r| r.rest());
                    let reduces_to_dot = matches!(
                        rest_token,
                        Some(Token::Literal(s)) if s.is_empty() || s == "."
                    );
                    if rest.is_none() || (reduces_to_dot && rest_rest.is_none()) {
                        // a bare trailing ** matches files too; **/ and **/.
                        // only match directories
                        self.matches.add(&t, absolute, rest.is_some());
                    } else if matches!(rest_token, Some(Token::Literal(s)) if s == "..") {
                        let tp = t.parent().unwrap_or_else(|| t.clone());
                        match rest_rest {
                            None => self.matches.add(&tp, absolute, true),
                            Some(rr) => {
                                if !self.has_walked.has_walked(&tp, &rr) {
                                    self.subwalks.add(&tp, &rr);
                                }
                            }
                        }
                    }
                }
                Token::Matcher(_) => {
                    // needs actual child names
                    self.subwalks.add(&t, &pattern);
                }
            }
        }
        self
    }

    /// Consume the processor into next-level work units, one per subwalk
    /// target, each with its own fork of the walk memo.
    pub fn into_next_units(self) -> Vec<(Entry, Vec<Arc<Pattern>>, HasWalkedCache)> {
        let walked = self.has_walked;
        self.subwalks
            .into_items()
            .into_iter()
            .map(|(t, pats)| (t, pats, walked.copy()))
            .collect()
    }

    /// Classify the children of `parent` against the patterns recorded for
    /// it, producing the next-level processor.
    pub fn filter_entries(&self, parent: &Entry, entries: &[Entry]) -> Processor {
        let patterns = self.subwalks.get(parent);
        let mut results = self.child();
        for e in entries {
            for pattern in patterns {
                let absolute = pattern.is_absolute() && self.opts.absolute != Some(false);
                let rest = pattern.rest();
                match pattern.token() {
                    Token::GlobStar => results.test_globstar(e, pattern, rest, absolute),
                    Token::Matcher(m) => results.test_matcher(e, m.matches(&e.name(), self.opts.dot), rest, absolute),
                    Token::Literal(p) => results.test_string(e, p, rest, absolute),
                }
            }
        }
        results
    }

    fn test_globstar(
        &mut self,
        e: &Entry,
        pattern: &Arc<Pattern>,
        rest: Option<Arc<Pattern>>,
        absolute: bool,
    ) {
        if self.opts.dot || !e.name().starts_with('.') {
            if !pattern.has_more() {
                self.matches.add(e, absolute, false);
            }
            if e.can_readdir() {
                if self.opts.follow || !e.is_symlink() {
                    self.subwalks.add(e, pattern);
                } else if let Some(rest) = &rest
                    && pattern.check_follow_globstar()
                {
                    // the link consumes the globstar
                    self.subwalks.add(e, rest);
                } else if pattern.mark_follow_globstar() {
                    self.subwalks.add(e, pattern);
                }
            }
        }
        // whatever comes after the globstar may also match this entry
        // directly, since ** covers zero directories
        if let Some(rest) = rest {
            let after = rest.rest();
            match rest.token() {
                Token::Literal(p) if !p.is_empty() && p != "." && p != ".." => {
                    self.test_string(e, p, after, absolute);
                }
                Token::Literal(p) if p == ".." => {
                    let ep = e.parent().unwrap_or_else(|| e.clone());
                    self.subwalks.add(&ep, &rest);
                }
                Token::Matcher(m) => {
                    self.test_matcher(e, m.matches(&e.name(), self.opts.dot), after, absolute);
                }
                _ => {}
            }
        }
    }

    fn test_matcher(
        &mut self,
        e: &Entry,
        matched: bool,
        rest: Option<Arc<Pattern>>,
        absolute: bool,
    ) {
        if !matched {
            return;
        }
        match rest {
            None => self.matches.add(e, absolute, false),
            Some(rest) => self.subwalks.add(e, &rest),
        }
    }

    fn test_string(&mut self, e: &Entry, p: &str, rest: Option<Arc<Pattern>>, absolute: bool) {
        if !e.is_named(p) {
            return;
        }
        match rest {
            None => self.matches.add(e, absolute, false),
            Some(rest) => self.subwalks.add(e, &rest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{compile, CompileOpts};
    use scamper_vfs::{MemoryBackend, Platform};

    fn pattern(glob: &str) -> Arc<Pattern> {
        let opts = CompileOpts {
            platform: Platform::Posix,
            ..CompileOpts::default()
        };
        let (tokens, parts) = compile(glob, &opts).unwrap();
        Pattern::build(tokens, parts, Platform::Posix).unwrap()
    }

    fn cache() -> PathCache {
        let fs = MemoryBackend::new();
        fs.add_file("/a/b/c.txt");
        fs.add_file("/a/b/d.rs");
        fs.add_dir("/a/e");
        PathCache::new(std::sync::Arc::new(fs), Platform::Posix, false, "/").unwrap()
    }

    fn paths(it: impl Iterator<Item = (Entry, bool, bool)>) -> Vec<String> {
        it.map(|(e, _, _)| e.fullpath()).collect()
    }

    #[test]
    fn literal_tail_becomes_a_match_without_io() {
        let cache = cache();
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cache.cwd_entry(), &[pattern("a/b/c.txt")], &cache);
        // nothing is known, so nothing folds and nothing emits yet; the
        // head stays a subwalk on the cwd
        assert!(proc.matches.is_empty());
        assert_eq!(proc.subwalks.targets().count(), 1);

        // once the chain is known, the same pattern folds to its tail
        let cwd = cache.cwd_entry();
        cache.list_dir_sync(&cwd);
        cache.list_dir_sync(&cache.resolve(&cwd, "a"));
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cwd, &[pattern("a/b/c.txt")], &cache);
        assert_eq!(paths(proc.matches.entries()), vec!["/a/b/c.txt"]);
        assert!(proc.subwalks.is_empty());
    }

    #[test]
    fn magic_head_defers_to_subwalk() {
        let cache = cache();
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cache.cwd_entry(), &[pattern("*.txt")], &cache);
        assert!(proc.matches.is_empty());
        let targets: Vec<String> = proc.subwalks.targets().map(|t| t.fullpath()).collect();
        assert_eq!(targets, vec!["/"]);
    }

    #[test]
    fn root_redirect_matches_root_itself() {
        let cache = cache();
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cache.cwd_entry(), &[pattern("/")], &cache);
        let matched: Vec<_> = proc.matches.entries().collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0.fullpath(), "/");
        assert!(matched[0].1, "root match is absolute");
        assert!(!matched[0].2);
    }

    #[test]
    fn dot_segments_match_only_directories() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        cache.list_dir_sync(&cwd);
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cwd, &[pattern("a/..")], &cache);
        let matched: Vec<_> = proc.matches.entries().collect();
        assert_eq!(matched[0].0.fullpath(), "/");
        assert!(matched[0].2, ".. requires a directory");
    }

    #[test]
    fn globstar_matches_target_and_reschedules() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cwd, &[pattern("**")], &cache);
        // bare ** matches the target itself, files included
        let matched: Vec<_> = proc.matches.entries().collect();
        assert_eq!(matched[0].0, cwd);
        assert!(!matched[0].2);
        assert_eq!(proc.subwalks.get(&cwd).len(), 1);
    }

    #[test]
    fn globstar_trailing_slash_requires_directory() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cwd, &[pattern("**/")], &cache);
        let matched: Vec<_> = proc.matches.entries().collect();
        assert!(matched[0].2, "**/ is directories only");
    }

    #[test]
    fn match_record_merge_is_and() {
        let cache = cache();
        let e = cache.cwd_entry();
        let mut rec = MatchRecord::default();
        rec.add(&e, true, false);
        rec.add(&e, false, true);
        let (_, absolute, if_dir) = rec.entries().next().unwrap();
        assert!(!absolute);
        assert!(!if_dir);
    }

    #[test]
    fn subwalks_dedup_and_drop_unreadable() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        cache.list_dir_sync(&cwd);
        let a = cache.resolve(&cwd, "a");
        cache.list_dir_sync(&a);
        let b = cache.resolve(&a, "b");
        cache.list_dir_sync(&b);

        let mut subs = SubWalks::default();
        let p = pattern("**/x");
        subs.add(&b, &p);
        subs.add(&b, &pattern("**/x"));
        assert_eq!(subs.get(&b).len(), 1, "same fingerprint folds");

        let file = cache.resolve(&b, "c.txt");
        subs.add(&file, &p);
        assert_eq!(subs.targets().count(), 1, "files cannot be subwalks");
    }

    #[test]
    fn walked_cache_fork_isolation() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        let p = pattern("**");
        let mut parent = HasWalkedCache::default();
        parent.store_walked(&cwd, &p);
        let fork = parent.copy();
        let child = cache.resolve(&cwd, "a");
        parent.store_walked(&child, &p);
        assert!(fork.has_walked(&cwd, &p));
        assert!(!fork.has_walked(&child, &p));
    }

    #[test]
    fn filter_entries_classifies_children() {
        let cache = cache();
        let cwd = cache.cwd_entry();
        cache.list_dir_sync(&cwd);
        let a = cache.resolve(&cwd, "a");
        let b = cache.resolve(&a, "b");

        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&b, &[pattern("*.txt")], &cache);
        let children = cache.list_dir_sync(&b);
        let child = proc.filter_entries(&b, &children);
        assert_eq!(paths(child.matches.entries()), vec!["/a/b/c.txt"]);
        assert!(child.subwalks.is_empty());
    }

    #[test]
    fn globstar_consumes_symlink_once() {
        let fs = MemoryBackend::new();
        fs.add_dir("/x");
        fs.add_file("/x/real.txt");
        fs.add_symlink("/x/loop", "/x");
        let cache = PathCache::new(std::sync::Arc::new(fs), Platform::Posix, false, "/").unwrap();
        let cwd = cache.cwd_entry();
        cache.list_dir_sync(&cwd);
        let x = cache.resolve(&cwd, "x");

        let p = pattern("x/**/*.txt");
        let mut proc = Processor::new(ProcessorOpts::default(), None);
        proc.process_patterns(&cwd, &[p], &cache);
        // folded through the literal onto x, globstar pending
        let star_patterns: Vec<_> = proc.subwalks.get(&x).to_vec();
        assert_eq!(star_patterns.len(), 1);

        let children = cache.list_dir_sync(&x);
        let child = proc.filter_entries(&x, &children);
        let link = cache.resolve(&x, "loop");
        // the symlink consumed the globstar: only the tail continues below
        let under_link = child.subwalks.get(&link);
        assert_eq!(under_link.len(), 1);
        assert!(!under_link[0].token().is_globstar());
    }
}
