//! Compilation of a glob string into match tokens.
//!
//! A pattern splits on `/` into portions; each portion becomes one
//! [`Token`]: a plain literal, a compiled [`SegmentPattern`], or the
//! globstar sentinel. The textual portions are kept alongside the tokens as
//! a stable fingerprint (see `Pattern::glob_string`).

use std::sync::Arc;

use scamper_vfs::Platform;

use crate::braces::expand_braces;
use crate::segment::{PatternError, SegmentPattern};

/// One compiled path portion.
#[derive(Debug, Clone)]
pub enum Token {
    /// Literal name. `""` is a separator boundary at the root, `.` and `..`
    /// keep their filesystem meaning.
    Literal(String),
    /// A portion with wildcards, compiled to a matcher.
    Matcher(Arc<SegmentPattern>),
    /// `**`: any number of intervening directories, including none.
    GlobStar,
}

impl Token {
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Token::Literal(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_globstar(&self) -> bool {
        matches!(self, Token::GlobStar)
    }
}

/// Compiler options. A subset of the public glob options; `dot` is absent
/// because dot-hiding is applied at match time, not compile time.
#[derive(Debug, Clone, Copy)]
pub struct CompileOpts {
    pub nocase: bool,
    pub noext: bool,
    pub noglobstar: bool,
    pub match_base: bool,
    pub windows_paths_no_escape: bool,
    pub platform: Platform,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            nocase: false,
            noext: false,
            noglobstar: false,
            match_base: false,
            windows_paths_no_escape: false,
            platform: Platform::native(),
        }
    }
}

/// Compile one (already brace-expanded) glob string into parallel token and
/// glob-part lists. The two lists always have the same length.
pub fn compile(glob: &str, opts: &CompileOpts) -> Result<(Vec<Token>, Vec<String>), PatternError> {
    if glob.is_empty() {
        return Err(PatternError::Empty);
    }
    let glob = if opts.windows_paths_no_escape {
        glob.replace('\\', "/")
    } else {
        glob.to_string()
    };

    let mut parts = split_portions(&glob, opts.platform);

    if opts.match_base && !glob.contains('/') {
        // slash-free patterns match against basenames anywhere below cwd
        parts = vec![".".to_string(), "**".to_string(), glob.clone()];
    }

    let mut tokens = Vec::with_capacity(parts.len());
    let mut glob_parts = Vec::with_capacity(parts.len());
    for part in parts {
        if part == "**" && !opts.noglobstar {
            // adjacent globstars collapse to one
            if matches!(tokens.last(), Some(Token::GlobStar)) {
                continue;
            }
            tokens.push(Token::GlobStar);
        } else if portion_has_magic(&part, opts.noext) {
            tokens.push(Token::Matcher(Arc::new(SegmentPattern::parse(
                &part,
                opts.noext,
                opts.nocase,
            )?)));
        } else {
            tokens.push(Token::Literal(unescape(&part)));
        }
        glob_parts.push(part);
    }
    Ok((tokens, glob_parts))
}

/// True if the pattern needs the walker at all. Brace sets that expand to
/// more than one pattern count as magic, as does anything that compiles to
/// a non-literal token.
pub fn has_magic(pattern: &str, opts: &CompileOpts, nobrace: bool) -> bool {
    let expanded = if nobrace {
        vec![pattern.to_string()]
    } else {
        expand_braces(pattern)
    };
    if expanded.len() > 1 {
        return true;
    }
    for one in &expanded {
        for part in split_portions(one, opts.platform) {
            if (part == "**" && !opts.noglobstar) || portion_has_magic(&part, opts.noext) {
                return true;
            }
        }
    }
    false
}

/// Split on `/` and coalesce repeats. Kept empties: a leading one (root), a
/// UNC `//host/share` second slot on windows, and a single trailing one
/// (trailing slash, matches directories only).
fn split_portions(glob: &str, platform: Platform) -> Vec<String> {
    let raw: Vec<&str> = glob.split('/').collect();
    let mut parts = Vec::with_capacity(raw.len());
    for (i, p) in raw.iter().enumerate() {
        let keep_empty = i == 0
            || (i == 1 && platform.is_windows() && raw[0].is_empty() && raw.len() >= 4)
            || (i == raw.len() - 1 && !parts.is_empty());
        if !p.is_empty() || keep_empty {
            parts.push((*p).to_string());
        }
    }
    parts
}

/// Whether a portion contains unescaped glob syntax.
fn portion_has_magic(part: &str, noext: bool) -> bool {
    let chars: Vec<char> = part.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '*' | '?' => return true,
            '[' => {
                // magic only when the class closes
                if class_closes(&chars, i) {
                    return true;
                }
            }
            '+' | '@' | '!' if !noext => {
                if chars.get(i + 1) == Some(&'(') && paren_closes(&chars, i + 1) {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

fn class_closes(chars: &[char], open: usize) -> bool {
    let mut i = open + 1;
    if matches!(chars.get(i), Some('!') | Some('^')) {
        i += 1;
    }
    // a `]` right after the opener is a literal member
    let first = i;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            ']' if i > first => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

fn paren_closes(chars: &[char], open: usize) -> bool {
    let mut depth = 0;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Strip escape backslashes from a literal portion.
fn unescape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
