//! Brace expansion preprocessing.
//!
//! `{a,b,c}` expands to multiple patterns, `{1..5}` and `{a..e}` expand as
//! ranges (with an optional `..step`), and groups nest. Expansion happens
//! before tokenization, so every expanded string compiles independently.

/// Expand brace expressions in a pattern.
///
/// Returns every expanded pattern. A pattern without braces comes back
/// unchanged as a single element. Unclosed braces are left literal.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();

    // Find the first top-level brace group, honoring escapes.
    let mut depth = 0;
    let mut brace_start = None;
    let mut brace_end = None;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => {
                if depth == 0 {
                    brace_start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 && brace_start.is_some() {
                        brace_end = Some(i);
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    let (start, end) = match (brace_start, brace_end) {
        (Some(s), Some(e)) => (s, e),
        _ => return vec![pattern.to_string()],
    };

    let prefix: String = chars[..start].iter().collect();
    let suffix: String = chars[end + 1..].iter().collect();
    let body: String = chars[start + 1..end].iter().collect();

    let alternatives = match expand_range(&body) {
        Some(range) => range,
        None => split_alternatives(&body),
    };

    let mut results = Vec::new();
    for alt in alternatives {
        let combined = format!("{}{}{}", prefix, alt, suffix);
        // recurse for any remaining groups
        results.extend(expand_braces(&combined));
    }
    results
}

/// Split brace content by commas, respecting nested braces and escapes.
fn split_alternatives(content: &str) -> Vec<String> {
    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    let mut escaped = false;

    for c in content.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                alternatives.push(current);
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    alternatives.push(current);
    alternatives
}

/// Expand `lo..hi` and `lo..hi..step` range bodies, numeric or single-char.
/// Returns `None` when the body is not a range.
fn expand_range(body: &str) -> Option<Vec<String>> {
    let mut parts = body.split("..");
    let lo = parts.next()?;
    let hi = parts.next()?;
    let step = match parts.next() {
        Some(s) => {
            let step: i64 = s.parse().ok()?;
            if step == 0 {
                return None;
            }
            step.unsigned_abs()
        }
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }

    if let (Ok(a), Ok(b)) = (lo.parse::<i64>(), hi.parse::<i64>()) {
        // zero-padding carries over from either endpoint, bash style
        let pad = if leading_zeros(lo) || leading_zeros(hi) {
            lo.trim_start_matches('-')
                .len()
                .max(hi.trim_start_matches('-').len())
        } else {
            0
        };
        let mut out = Vec::new();
        let mut n = a;
        loop {
            out.push(format!("{:0pad$}", n, pad = pad));
            if a <= b {
                n += step as i64;
                if n > b {
                    break;
                }
            } else {
                n -= step as i64;
                if n < b {
                    break;
                }
            }
        }
        return Some(out);
    }

    let (a, b) = (single_char(lo)?, single_char(hi)?);
    let (a, b) = (a as u32, b as u32);
    let mut out = Vec::new();
    let mut n = a;
    loop {
        out.push(char::from_u32(n)?.to_string());
        if a <= b {
            n += step as u32;
            if n > b {
                break;
            }
        } else {
            n = n.checked_sub(step as u32)?;
            if n < b {
                break;
            }
        }
    }
    Some(out)
}

fn leading_zeros(s: &str) -> bool {
    let digits = s.trim_start_matches('-');
    digits.len() > 1 && digits.starts_with('0')
}

fn single_char(s: &str) -> Option<char> {
    let mut it = s.chars();
    let c = it.next()?;
    if it.next().is_some() || c.is_ascii_digit() {
        return None;
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_braces() {
        assert_eq!(expand_braces("simple"), vec!["simple"]);
        assert_eq!(expand_braces("*.rs"), vec!["*.rs"]);
    }

    #[test]
    fn alternatives() {
        assert_eq!(expand_braces("{a,b}"), vec!["a", "b"]);
        assert_eq!(expand_braces("x{a,b}y"), vec!["xay", "xby"]);
        assert_eq!(
            expand_braces("css/*.{png,jpeg}"),
            vec!["css/*.png", "css/*.jpeg"]
        );
    }

    #[test]
    fn multiple_and_nested_groups() {
        let mut out = expand_braces("{a,b}{1,2}");
        out.sort();
        assert_eq!(out, vec!["a1", "a2", "b1", "b2"]);
        assert_eq!(expand_braces("{a,{b,c}}"), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_alternative() {
        assert_eq!(expand_braces("{,un}do"), vec!["do", "undo"]);
    }

    #[test]
    fn numeric_ranges() {
        assert_eq!(expand_braces("{1..3}"), vec!["1", "2", "3"]);
        assert_eq!(expand_braces("{3..1}"), vec!["3", "2", "1"]);
        assert_eq!(expand_braces("a{1..3}b"), vec!["a1b", "a2b", "a3b"]);
        assert_eq!(expand_braces("{0..10..5}"), vec!["0", "5", "10"]);
        assert_eq!(expand_braces("{-1..1}"), vec!["-1", "0", "1"]);
    }

    #[test]
    fn padded_ranges() {
        assert_eq!(expand_braces("{01..03}"), vec!["01", "02", "03"]);
        assert_eq!(expand_braces("{08..10}"), vec!["08", "09", "10"]);
    }

    #[test]
    fn char_ranges() {
        assert_eq!(expand_braces("{a..c}"), vec!["a", "b", "c"]);
        assert_eq!(expand_braces("{c..a}"), vec!["c", "b", "a"]);
    }

    #[test]
    fn unclosed_braces_stay_literal() {
        assert_eq!(expand_braces("{abc"), vec!["{abc"]);
        assert_eq!(expand_braces("abc}"), vec!["abc}"]);
    }

    #[test]
    fn escaped_braces_stay_literal() {
        assert_eq!(expand_braces(r"\{a,b\}"), vec![r"\{a,b\}"]);
    }

    #[test]
    fn not_a_range() {
        assert_eq!(expand_braces("{a..}"), vec!["a.."]);
        assert_eq!(expand_braces("{1..x}"), vec!["1..x"]);
    }
}
