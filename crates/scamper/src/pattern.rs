//! Pattern cursor over a compiled token list.
//!
//! A `Pattern` is an immutable view over two parallel lists, the match
//! tokens and their textual portions, plus a position. Advancing returns a
//! memoized child cursor; the lists themselves are shared and never change.
//!
//! At position zero the constructor normalizes roots: a UNC head
//! `["", "", host, share]` collapses to a single `//host/share/` token, a
//! drive head `C:` becomes `C:/`, and a POSIX absolute head `""` becomes
//! `/`. After normalization the root, if any, is always the sole token at
//! position zero and carries a trailing slash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use scamper_vfs::Platform;

use crate::segment::PatternError;
use crate::token::Token;

pub struct Pattern {
    tokens: Arc<[Token]>,
    glob_parts: Arc<[String]>,
    index: usize,
    platform: Platform,
    is_absolute: bool,
    is_drive: bool,
    is_unc: bool,
    /// One-shot permission for a non-leading `**` to traverse a symlink.
    /// Shared by everyone holding this cursor, consumable once.
    follow_globstar: AtomicBool,
    rest: OnceLock<Option<Arc<Pattern>>>,
    glob_string: OnceLock<Arc<str>>,
}

impl Pattern {
    /// Build the cursor for a freshly compiled token list, normalizing any
    /// root head.
    pub fn build(
        tokens: Vec<Token>,
        glob_parts: Vec<String>,
        platform: Platform,
    ) -> Result<Arc<Pattern>, PatternError> {
        if tokens.is_empty() || tokens.len() != glob_parts.len() {
            return Err(PatternError::Empty);
        }
        let is_unc = platform.is_windows()
            && tokens.len() >= 4
            && tokens[0].as_literal() == Some("")
            && tokens[1].as_literal() == Some("")
            && tokens[2].as_literal().is_some_and(|s| !s.is_empty())
            && tokens[3].as_literal().is_some_and(|s| !s.is_empty());
        let is_drive = platform.is_windows()
            && tokens[0].as_literal().is_some_and(|s| {
                let b = s.as_bytes();
                b.len() == 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
            });
        let is_absolute =
            is_unc || is_drive || (tokens[0].as_literal() == Some("") && tokens.len() > 1);

        let (mut tokens, mut glob_parts) = if is_unc {
            let host = tokens[2].as_literal().unwrap_or_default();
            let share = tokens[3].as_literal().unwrap_or_default();
            let root = format!("//{}/{}/", host, share);
            let mut t = vec![Token::Literal(root.clone())];
            t.extend(tokens.into_iter().skip(4));
            let mut g = vec![root];
            g.extend(glob_parts.into_iter().skip(4));
            (t, g)
        } else if is_drive {
            let root = format!("{}/", tokens[0].as_literal().unwrap_or_default());
            let mut t = vec![Token::Literal(root.clone())];
            t.extend(tokens.into_iter().skip(1));
            let mut g = vec![root];
            g.extend(glob_parts.into_iter().skip(1));
            (t, g)
        } else if is_absolute {
            let mut t = vec![Token::Literal("/".to_string())];
            t.extend(tokens.into_iter().skip(1));
            let mut g = vec!["/".to_string()];
            g.extend(glob_parts.into_iter().skip(1));
            (t, g)
        } else {
            (tokens, glob_parts)
        };

        // a trailing slash right after the root is already implied by it
        if is_absolute && tokens.len() == 2 && tokens[1].as_literal() == Some("") {
            tokens.truncate(1);
            glob_parts.truncate(1);
        }

        Ok(Arc::new(Pattern {
            tokens: tokens.into(),
            glob_parts: glob_parts.into(),
            index: 0,
            platform,
            is_absolute,
            is_drive,
            is_unc,
            follow_globstar: AtomicBool::new(true),
            rest: OnceLock::new(),
            glob_string: OnceLock::new(),
        }))
    }

    /// The token under the cursor.
    pub fn token(&self) -> &Token {
        &self.tokens[self.index]
    }

    /// Cursor at the next position, or `None` at the last token. Memoized:
    /// every caller gets the same child, so the child's one-shot globstar
    /// bit is shared the way the walk expects.
    pub fn rest(&self) -> Option<Arc<Pattern>> {
        self.rest
            .get_or_init(|| {
                if self.index + 1 >= self.tokens.len() {
                    return None;
                }
                Some(Arc::new(Pattern {
                    tokens: self.tokens.clone(),
                    glob_parts: self.glob_parts.clone(),
                    index: self.index + 1,
                    platform: self.platform,
                    is_absolute: self.is_absolute,
                    is_drive: self.is_drive,
                    is_unc: self.is_unc,
                    follow_globstar: AtomicBool::new(true),
                    rest: OnceLock::new(),
                    glob_string: OnceLock::new(),
                }))
            })
            .clone()
    }

    pub fn has_more(&self) -> bool {
        self.index + 1 < self.tokens.len()
    }

    /// The root literal when this cursor sits at the head of an absolute
    /// pattern; empty otherwise.
    pub fn root(&self) -> &str {
        if self.index == 0 && self.is_absolute {
            self.tokens[0].as_literal().unwrap_or("")
        } else {
            ""
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    pub fn is_drive(&self) -> bool {
        self.is_drive
    }

    pub fn is_unc(&self) -> bool {
        self.is_unc
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// True if anything from the cursor onward is not a plain literal.
    pub fn has_magic(&self) -> bool {
        self.tokens[self.index..]
            .iter()
            .any(|t| !matches!(t, Token::Literal(_)))
    }

    /// `/`-joined textual tail, used as the fingerprint for walk
    /// deduplication.
    pub fn glob_string(&self) -> Arc<str> {
        self.glob_string
            .get_or_init(|| {
                let joined = if self.index == 0 && self.is_absolute {
                    // the root part already ends in a slash
                    format!("{}{}", self.glob_parts[0], self.glob_parts[1..].join("/"))
                } else {
                    self.glob_parts[self.index..].join("/")
                };
                joined.into()
            })
            .clone()
    }

    /// Whether a non-leading `**` under this cursor may still traverse a
    /// symlink. Does not consume the permission.
    pub fn check_follow_globstar(&self) -> bool {
        self.index != 0
            && self.token().is_globstar()
            && self.follow_globstar.load(Ordering::Relaxed)
    }

    /// Consume the one-shot traversal permission. Returns whether it was
    /// still available.
    pub fn mark_follow_globstar(&self) -> bool {
        self.index != 0
            && self.token().is_globstar()
            && self.follow_globstar.swap(false, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("glob", &self.glob_string())
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{compile, CompileOpts};

    fn build(glob: &str, platform: Platform) -> Arc<Pattern> {
        let opts = CompileOpts {
            platform,
            ..CompileOpts::default()
        };
        let (tokens, parts) = compile(glob, &opts).unwrap();
        Pattern::build(tokens, parts, platform).unwrap()
    }

    #[test]
    fn relative_pattern_walks_tokens() {
        let p = build("a/b/c", Platform::Posix);
        assert!(!p.is_absolute());
        assert_eq!(p.root(), "");
        assert_eq!(p.token().as_literal(), Some("a"));
        let r = p.rest().unwrap();
        assert_eq!(r.token().as_literal(), Some("b"));
        let rr = r.rest().unwrap();
        assert_eq!(rr.token().as_literal(), Some("c"));
        assert!(rr.rest().is_none());
        assert!(!rr.has_more());
    }

    #[test]
    fn rest_is_memoized() {
        let p = build("a/b", Platform::Posix);
        let one = p.rest().unwrap();
        let two = p.rest().unwrap();
        assert!(Arc::ptr_eq(&one, &two));
    }

    #[test]
    fn posix_root_normalization() {
        let p = build("/a/b", Platform::Posix);
        assert!(p.is_absolute());
        assert_eq!(p.root(), "/");
        assert_eq!(p.rest().unwrap().token().as_literal(), Some("a"));
        // the root is gone from the rest's view
        assert_eq!(&*p.rest().unwrap().glob_string(), "a/b");
    }

    #[test]
    fn bare_root_pattern() {
        let p = build("/", Platform::Posix);
        assert!(p.is_absolute());
        assert_eq!(p.root(), "/");
        assert!(p.rest().is_none());
    }

    #[test]
    fn drive_root_normalization() {
        let p = build("c:/Users/*.txt", Platform::Win32);
        assert!(p.is_absolute());
        assert!(p.is_drive());
        assert!(!p.is_unc());
        assert_eq!(p.root(), "c:/");
        assert_eq!(p.rest().unwrap().token().as_literal(), Some("Users"));
    }

    #[test]
    fn unc_root_normalization() {
        let p = build("//host/share/x", Platform::Win32);
        assert!(p.is_absolute());
        assert!(p.is_unc());
        assert_eq!(p.root(), "//host/share/");
        assert_eq!(p.rest().unwrap().token().as_literal(), Some("x"));
    }

    #[test]
    fn trailing_slash_after_root_is_dropped() {
        let p = build("c:/", Platform::Win32);
        assert_eq!(p.root(), "c:/");
        assert!(p.rest().is_none());
    }

    #[test]
    fn glob_string_fingerprint() {
        let p = build("a/**/*.rs", Platform::Posix);
        assert_eq!(&*p.glob_string(), "a/**/*.rs");
        assert_eq!(&*p.rest().unwrap().glob_string(), "**/*.rs");
        let abs = build("/a/b", Platform::Posix);
        assert_eq!(&*abs.glob_string(), "/a/b");
    }

    #[test]
    fn has_magic_scan() {
        assert!(!build("a/b", Platform::Posix).has_magic());
        assert!(build("a/*", Platform::Posix).has_magic());
        assert!(build("**", Platform::Posix).has_magic());
        // magic before the cursor does not count
        let p = build("*/b", Platform::Posix);
        assert!(!p.rest().unwrap().has_magic());
    }

    #[test]
    fn follow_globstar_is_one_shot_and_position_gated() {
        let p = build("**/x", Platform::Posix);
        // leading globstar never follows
        assert!(!p.check_follow_globstar());
        assert!(!p.mark_follow_globstar());

        let p = build("a/**/x", Platform::Posix);
        let star = p.rest().unwrap();
        assert!(star.token().is_globstar());
        assert!(star.check_follow_globstar());
        assert!(star.mark_follow_globstar());
        assert!(!star.check_follow_globstar());
        assert!(!star.mark_follow_globstar());
    }
}
