//! Compiled matcher for a single path portion.
//!
//! Implements shell-style matching for one `/`-delimited segment:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[!abc]` character classes, including POSIX classes
//!   like `[[:alpha:]]` (Unicode-aware)
//! - extended globs `?(p|q)`, `*(p)`, `+(p)`, `@(p)`, `!(p)`
//! - `\` escapes the next character
//!
//! Matching is backtracking with a total work bound. Patterns that exceed
//! the bound simply fail to match; adversarial inputs like `*a*a*a*...b`
//! cannot pin the CPU.

use std::cell::Cell;

use thiserror::Error;

/// Maximum number of recursive calls for one match. Counted as total work,
/// not stack depth, to bound actual CPU cost.
const MAX_MATCH_CALLS: usize = 100_000;

/// Errors when parsing glob patterns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("invalid pattern: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtKind {
    /// `?(...)`
    ZeroOrOne,
    /// `*(...)`
    ZeroOrMore,
    /// `+(...)`
    OneOrMore,
    /// `@(...)`
    ExactlyOne,
    /// `!(...)`
    Not,
}

impl ExtKind {
    fn from_char(c: char) -> Option<ExtKind> {
        match c {
            '?' => Some(ExtKind::ZeroOrOne),
            '*' => Some(ExtKind::ZeroOrMore),
            '+' => Some(ExtKind::OneOrMore),
            '@' => Some(ExtKind::ExactlyOne),
            '!' => Some(ExtKind::Not),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Part {
    Lit(char),
    Any,
    Star,
    Class(CharClass),
    Ext(ExtKind, Vec<Vec<Part>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PosixClass {
    Alpha,
    Alnum,
    Digit,
    Upper,
    Lower,
    Space,
    Blank,
    Cntrl,
    Punct,
    Graph,
    Print,
    Word,
    Xdigit,
}

impl PosixClass {
    fn parse(name: &str) -> Option<PosixClass> {
        Some(match name {
            "alpha" => PosixClass::Alpha,
            "alnum" => PosixClass::Alnum,
            "digit" => PosixClass::Digit,
            "upper" => PosixClass::Upper,
            "lower" => PosixClass::Lower,
            "space" => PosixClass::Space,
            "blank" => PosixClass::Blank,
            "cntrl" => PosixClass::Cntrl,
            "punct" => PosixClass::Punct,
            "graph" => PosixClass::Graph,
            "print" => PosixClass::Print,
            "word" => PosixClass::Word,
            "xdigit" => PosixClass::Xdigit,
            _ => return None,
        })
    }

    fn matches(self, c: char) -> bool {
        match self {
            PosixClass::Alpha => c.is_alphabetic(),
            PosixClass::Alnum => c.is_alphanumeric(),
            PosixClass::Digit => c.is_numeric(),
            PosixClass::Upper => c.is_uppercase(),
            PosixClass::Lower => c.is_lowercase(),
            PosixClass::Space => c.is_whitespace(),
            PosixClass::Blank => c == ' ' || c == '\t',
            PosixClass::Cntrl => c.is_control(),
            PosixClass::Punct => c.is_ascii_punctuation(),
            PosixClass::Graph => !c.is_whitespace() && !c.is_control(),
            PosixClass::Print => !c.is_control(),
            PosixClass::Word => c.is_alphanumeric() || c == '_',
            PosixClass::Xdigit => c.is_ascii_hexdigit(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CharClass {
    negate: bool,
    chars: Vec<char>,
    ranges: Vec<(char, char)>,
    classes: Vec<PosixClass>,
}

impl CharClass {
    fn raw_match(&self, c: char) -> bool {
        self.chars.contains(&c)
            || self.ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi)
            || self.classes.iter().any(|cls| cls.matches(c))
    }

    fn matches(&self, c: char, nocase: bool) -> bool {
        let mut hit = self.raw_match(c);
        if !hit && nocase {
            hit = fold(c).is_some_and(|f| f != c && self.raw_match(f))
                || unfold(c).is_some_and(|f| f != c && self.raw_match(f));
        }
        hit != self.negate
    }
}

fn fold(c: char) -> Option<char> {
    let mut it = c.to_lowercase();
    let f = it.next();
    if it.next().is_some() { None } else { f }
}

fn unfold(c: char) -> Option<char> {
    let mut it = c.to_uppercase();
    let f = it.next();
    if it.next().is_some() { None } else { f }
}

fn ch_eq(pat: char, input: char, nocase: bool) -> bool {
    pat == input || (nocase && fold(pat) == fold(input) && fold(pat).is_some())
}

/// A compiled single-segment pattern.
#[derive(Debug, Clone)]
pub struct SegmentPattern {
    parts: Vec<Part>,
    /// Pattern explicitly begins with a literal dot, so dot-hiding does not
    /// apply to it.
    leading_dot: bool,
    nocase: bool,
}

impl SegmentPattern {
    /// Compile one path portion. `noext` disables extended globs, `nocase`
    /// makes every comparison case-insensitive.
    pub fn parse(source: &str, noext: bool, nocase: bool) -> Result<SegmentPattern, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        let chars: Vec<char> = source.chars().collect();
        // outside an extglob, `)` and `|` are ordinary characters, so the
        // top-level parse always consumes the whole input
        let (parts, _) = parse_seq(&chars, 0, noext, false)?;
        let parts = parts.into_iter().next().unwrap_or_default();
        let leading_dot = matches!(parts.first(), Some(Part::Lit('.')));
        Ok(SegmentPattern {
            parts,
            leading_dot,
            nocase,
        })
    }

    /// Match an entry name against this segment.
    ///
    /// With `dot` false, names starting with `.` only match patterns that
    /// themselves start with a literal dot.
    pub fn matches(&self, name: &str, dot: bool) -> bool {
        if !dot && !self.leading_dot && name.starts_with('.') {
            return false;
        }
        let input: Vec<char> = name.chars().collect();
        let calls = Cell::new(0usize);
        match_seq(&self.parts, 0, &input, 0, self.nocase, &calls)
    }
}

/// Parse a sequence of parts. Inside an extglob (`in_ext`), `|` separates
/// alternatives and `)` terminates; at the top level both are literal.
/// Returns the alternatives and the index just past the consumed input.
fn parse_seq(
    chars: &[char],
    mut i: usize,
    noext: bool,
    in_ext: bool,
) -> Result<(Vec<Vec<Part>>, usize), PatternError> {
    let mut alts: Vec<Vec<Part>> = Vec::new();
    let mut cur: Vec<Part> = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                if i + 1 < chars.len() {
                    cur.push(Part::Lit(chars[i + 1]));
                    i += 2;
                } else {
                    cur.push(Part::Lit('\\'));
                    i += 1;
                }
            }
            '|' if in_ext => {
                alts.push(std::mem::take(&mut cur));
                i += 1;
            }
            ')' if in_ext => {
                alts.push(cur);
                return Ok((alts, i + 1));
            }
            '[' => match parse_class(chars, i) {
                Some((class, next)) => {
                    cur.push(Part::Class(class));
                    i = next;
                }
                None => {
                    // unclosed bracket is literal
                    cur.push(Part::Lit('['));
                    i += 1;
                }
            },
            _ => {
                if !noext
                    && i + 1 < chars.len()
                    && chars[i + 1] == '('
                    && let Some(kind) = ExtKind::from_char(c)
                    && find_closing_paren(chars, i + 1).is_some()
                {
                    let (inner, next) = parse_seq(chars, i + 2, noext, true)?;
                    cur.push(Part::Ext(kind, inner));
                    i = next;
                } else if c == '*' {
                    // consecutive stars collapse
                    if !matches!(cur.last(), Some(Part::Star)) {
                        cur.push(Part::Star);
                    }
                    i += 1;
                } else if c == '?' {
                    cur.push(Part::Any);
                    i += 1;
                } else {
                    cur.push(Part::Lit(c));
                    i += 1;
                }
            }
        }
    }

    if in_ext {
        return Err(PatternError::Invalid("unclosed extglob".to_string()));
    }
    alts.push(cur);
    Ok((alts, i))
}

/// Index of the `)` matching the `(` at `open`, honoring nesting and
/// escapes. `None` when unclosed.
fn find_closing_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parse a `[...]` class starting at `start`. Returns the class and the
/// index just past the closing `]`, or `None` when unclosed.
fn parse_class(chars: &[char], start: usize) -> Option<(CharClass, usize)> {
    let mut class = CharClass::default();
    let mut i = start + 1;

    if i < chars.len() && (chars[i] == '!' || chars[i] == '^') {
        class.negate = true;
        i += 1;
    }
    let first = i;

    while i < chars.len() {
        let c = chars[i];
        if c == ']' && i > first {
            return Some((class, i + 1));
        }
        // POSIX class [:name:]
        if c == '['
            && i + 1 < chars.len()
            && chars[i + 1] == ':'
            && let Some(close) = chars[i + 2..].iter().position(|&x| x == ':')
            && chars.get(i + 2 + close + 1) == Some(&']')
        {
            let name: String = chars[i + 2..i + 2 + close].iter().collect();
            // unknown class names match nothing rather than poisoning the
            // whole class
            if let Some(cls) = PosixClass::parse(&name) {
                class.classes.push(cls);
            }
            i += close + 4;
            continue;
        }
        if c == '\\' && i + 1 < chars.len() {
            class.chars.push(chars[i + 1]);
            i += 2;
            continue;
        }
        // range a-z (a trailing or leading dash is literal)
        if i + 2 < chars.len() && chars[i + 1] == '-' && chars[i + 2] != ']' {
            class.ranges.push((c, chars[i + 2]));
            i += 3;
            continue;
        }
        class.chars.push(c);
        i += 1;
    }
    None
}

fn match_seq(
    parts: &[Part],
    pi: usize,
    input: &[char],
    ii: usize,
    nocase: bool,
    calls: &Cell<usize>,
) -> bool {
    let count = calls.get() + 1;
    calls.set(count);
    if count > MAX_MATCH_CALLS {
        return false;
    }

    if pi >= parts.len() {
        return ii >= input.len();
    }

    match &parts[pi] {
        Part::Star => {
            // star at end matches everything remaining
            if pi + 1 >= parts.len() {
                return true;
            }
            for skip in 0..=(input.len() - ii) {
                if match_seq(parts, pi + 1, input, ii + skip, nocase, calls) {
                    return true;
                }
            }
            false
        }
        Part::Any => ii < input.len() && match_seq(parts, pi + 1, input, ii + 1, nocase, calls),
        Part::Lit(c) => {
            ii < input.len()
                && ch_eq(*c, input[ii], nocase)
                && match_seq(parts, pi + 1, input, ii + 1, nocase, calls)
        }
        Part::Class(class) => {
            ii < input.len()
                && class.matches(input[ii], nocase)
                && match_seq(parts, pi + 1, input, ii + 1, nocase, calls)
        }
        Part::Ext(kind, alts) => match kind {
            ExtKind::ExactlyOne => {
                for j in ii..=input.len() {
                    if any_alt(alts, &input[ii..j], nocase, calls)
                        && match_seq(parts, pi + 1, input, j, nocase, calls)
                    {
                        return true;
                    }
                }
                false
            }
            ExtKind::ZeroOrOne => {
                if match_seq(parts, pi + 1, input, ii, nocase, calls) {
                    return true;
                }
                for j in ii + 1..=input.len() {
                    if any_alt(alts, &input[ii..j], nocase, calls)
                        && match_seq(parts, pi + 1, input, j, nocase, calls)
                    {
                        return true;
                    }
                }
                false
            }
            ExtKind::ZeroOrMore => match_ext_more(parts, pi, alts, input, ii, nocase, calls),
            ExtKind::OneOrMore => {
                for j in ii..=input.len() {
                    if any_alt(alts, &input[ii..j], nocase, calls)
                        && match_ext_more(parts, pi, alts, input, j, nocase, calls)
                    {
                        return true;
                    }
                }
                false
            }
            ExtKind::Not => {
                for j in ii..=input.len() {
                    if !any_alt(alts, &input[ii..j], nocase, calls)
                        && match_seq(parts, pi + 1, input, j, nocase, calls)
                    {
                        return true;
                    }
                }
                false
            }
        },
    }
}

/// Zero or more repetitions of `alts`, then the rest of the pattern.
fn match_ext_more(
    parts: &[Part],
    pi: usize,
    alts: &[Vec<Part>],
    input: &[char],
    ii: usize,
    nocase: bool,
    calls: &Cell<usize>,
) -> bool {
    if calls.get() > MAX_MATCH_CALLS {
        return false;
    }
    if match_seq(parts, pi + 1, input, ii, nocase, calls) {
        return true;
    }
    for j in ii + 1..=input.len() {
        if any_alt(alts, &input[ii..j], nocase, calls)
            && match_ext_more(parts, pi, alts, input, j, nocase, calls)
        {
            return true;
        }
    }
    false
}

fn any_alt(alts: &[Vec<Part>], slice: &[char], nocase: bool, calls: &Cell<usize>) -> bool {
    alts.iter()
        .any(|alt| match_seq(alt, 0, slice, 0, nocase, calls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, input: &str) -> bool {
        SegmentPattern::parse(pattern, false, false)
            .unwrap()
            .matches(input, true)
    }

    fn m_nocase(pattern: &str, input: &str) -> bool {
        SegmentPattern::parse(pattern, false, true)
            .unwrap()
            .matches(input, true)
    }

    #[test]
    fn literal_matches() {
        assert!(m("hello", "hello"));
        assert!(!m("hello", "world"));
        assert!(!m("hello", "hell"));
        assert!(!m("hello", "helloo"));
    }

    #[test]
    fn star_wildcard() {
        assert!(m("*", ""));
        assert!(m("*", "anything"));
        assert!(m("*.rs", "main.rs"));
        assert!(m("*.rs", ".rs"));
        assert!(m("a*b*c", "aXXXbYYYc"));
        assert!(!m("*.rs", "main.txt"));
        assert!(!m("test*", "mytest"));
    }

    #[test]
    fn question_wildcard() {
        assert!(m("?", "a"));
        assert!(m("test?", "test1"));
        assert!(!m("?", ""));
        assert!(!m("?", "ab"));
        assert!(!m("file?.txt", "file12.txt"));
    }

    #[test]
    fn char_classes() {
        assert!(m("[abc]", "b"));
        assert!(!m("[abc]", "d"));
        assert!(m("[a-z]", "m"));
        assert!(!m("[a-z]", "M"));
        assert!(m("[!abc]", "d"));
        assert!(m("[^abc]", "d"));
        assert!(!m("[!abc]", "a"));
        assert!(m("[-ab]", "-"));
        assert!(m("[ab-]", "-"));
        assert!(m("[]ab]", "]"));
        assert!(m("file[0-9].txt", "file5.txt"));
        assert!(!m("file[0-9].txt", "filea.txt"));
    }

    #[test]
    fn posix_classes() {
        assert!(m("[[:alpha:]]", "x"));
        assert!(m("[[:alpha:]]", "é"));
        assert!(!m("[[:alpha:]]", "5"));
        assert!(m("[[:digit:]]", "5"));
        assert!(m("[[:alnum:]_]", "_"));
        assert!(m("[[:upper:]]", "X"));
        assert!(!m("[[:upper:]]", "x"));
        assert!(m("[![:digit:]]", "x"));
        assert!(m("[[:xdigit:]]*", "beef1"));
        assert!(m("[[:space:]]", " "));
    }

    #[test]
    fn escapes() {
        assert!(m(r"\*", "*"));
        assert!(!m(r"\*", "a"));
        assert!(m(r"a\?b", "a?b"));
        assert!(m(r"\[x\]", "[x]"));
    }

    #[test]
    fn extglob_at() {
        assert!(m("@(foo|bar)", "foo"));
        assert!(m("@(foo|bar)", "bar"));
        assert!(!m("@(foo|bar)", "foobar"));
        assert!(m("x@(a|b)y", "xay"));
        assert!(!m("x@(a|b)y", "xy"));
    }

    #[test]
    fn extglob_optional() {
        assert!(m("?(foo)", ""));
        assert!(m("?(foo)", "foo"));
        assert!(!m("?(foo)", "foofoo"));
        assert!(m("a?(b)c", "ac"));
        assert!(m("a?(b)c", "abc"));
    }

    #[test]
    fn extglob_repeat() {
        assert!(m("*(ab)", ""));
        assert!(m("*(ab)", "abab"));
        assert!(!m("*(ab)", "aba"));
        assert!(m("+(ab)", "ab"));
        assert!(m("+(ab)", "ababab"));
        assert!(!m("+(ab)", ""));
        assert!(m("+(a|b)c", "abbac"));
    }

    #[test]
    fn extglob_not() {
        assert!(m("!(foo)", "bar"));
        assert!(!m("!(foo)", "foo"));
        assert!(m("!(foo)", "foobar"));
        assert!(m("!(*.txt)", "file.rs"));
        assert!(!m("!(*.txt)", "file.txt"));
        assert!(m("a!(b)c", "axc"));
        assert!(!m("a!(b)c", "abc"));
    }

    #[test]
    fn extglob_nested() {
        assert!(m("@(a|@(b|c))", "c"));
        assert!(m("*(a|b*(c))", "abcc"));
    }

    #[test]
    fn noext_treats_extglob_literally() {
        let p = SegmentPattern::parse("@(foo)", true, false).unwrap();
        assert!(p.matches("@(foo)", true));
        assert!(!p.matches("foo", true));
    }

    #[test]
    fn unclosed_extglob_is_literal() {
        assert!(m("a!(b", "a!(b"));
        assert!(m("@(x", "@(x"));
    }

    #[test]
    fn stray_close_paren_is_literal() {
        assert!(m("a)b", "a)b"));
        assert!(m("a|b", "a|b"));
    }

    #[test]
    fn dot_gating() {
        let p = SegmentPattern::parse("*", false, false).unwrap();
        assert!(!p.matches(".hidden", false));
        assert!(p.matches(".hidden", true));
        assert!(p.matches("visible", false));

        let dotted = SegmentPattern::parse(".h*", false, false).unwrap();
        assert!(dotted.matches(".hidden", false));

        let q = SegmentPattern::parse("?foo", false, false).unwrap();
        assert!(!q.matches(".foo", false));
    }

    #[test]
    fn case_folding() {
        assert!(m_nocase("hello", "HELLO"));
        assert!(m_nocase("*.RS", "main.rs"));
        assert!(m_nocase("[a-z]", "M"));
        assert!(m_nocase("@(Foo)", "fOO"));
        assert!(!m("hello", "HELLO"));
    }

    #[test]
    fn unicode() {
        assert!(m("héll?", "héllo"));
        assert!(m("[αβγ]", "β"));
        assert!(m_nocase("στρ*", "ΣΤΡΟΦΗ"));
    }

    #[test]
    fn backtracking_bound() {
        let pattern = format!("{}b", "*a".repeat(50));
        let input = "a".repeat(200);
        // must return quickly; a non-match is the acceptable answer
        assert!(!m(&pattern, &input));
    }
}
