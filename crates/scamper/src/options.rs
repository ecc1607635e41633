//! Public configuration for a glob walk.

use scamper_vfs::{PathCache, Platform};
use tokio_util::sync::CancellationToken;

/// Options for [`crate::Glob`]. Everything defaults to off; `None` fields
/// fall back to platform behavior.
#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Directory to resolve relative patterns against. A plain path or a
    /// `file://` URL. Defaults to the process working directory.
    pub cwd: Option<String>,
    /// Include names starting with `.` in wildcard and globstar matches.
    pub dot: bool,
    /// Append `/` to directory results.
    pub mark: bool,
    /// Disable `{a,b}` expansion.
    pub nobrace: bool,
    /// Disable extended glob constructs.
    pub noext: bool,
    /// Treat `**` as an ordinary `*` segment.
    pub noglobstar: bool,
    /// Case-insensitive name matching. Defaults per platform: darwin and
    /// windows compare case-insensitively.
    pub nocase: Option<bool>,
    /// Rewrite slash-free patterns `P` to `./**/P`.
    pub match_base: bool,
    /// Drop directories from results.
    pub nodir: bool,
    /// Patterns to exclude from results.
    pub ignore: Vec<String>,
    /// Let `**` traverse symlinked directories freely.
    pub follow: bool,
    /// Canonicalize results, dropping entries that cannot be resolved.
    pub realpath: bool,
    /// `Some(true)` always returns absolute paths, `Some(false)` always
    /// relative ones; `None` follows each pattern's own shape.
    pub absolute: Option<bool>,
    /// Path-separator and root-shape handling. Defaults to the platform
    /// this binary was built for.
    pub platform: Option<Platform>,
    /// Return entry handles instead of strings. Mutually exclusive with
    /// `absolute`.
    pub with_file_types: bool,
    /// Cooperative cancellation; observed between directory reads and
    /// before each emission.
    pub signal: Option<CancellationToken>,
    /// Treat `\` as a path separator rather than an escape character.
    pub windows_paths_no_escape: bool,
    /// Share a preconfigured entry cache between walks. Its
    /// case-sensitivity must agree with `nocase`.
    pub cache: Option<PathCache>,
}

/// Interpret a cwd value: plain paths pass through, `file://` URLs are
/// unwrapped with minimal percent-decoding.
pub(crate) fn normalize_cwd(raw: &str, platform: Platform) -> String {
    let Some(rest) = raw.strip_prefix("file://") else {
        return raw.to_string();
    };
    // strip an authority component, normally empty: file:///path
    let path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    };
    let decoded = percent_decode(path);
    // file:///c:/x carries a spurious leading slash on windows
    if platform.is_windows() {
        let bytes = decoded.as_bytes();
        if bytes.len() >= 3
            && bytes[0] == b'/'
            && bytes[1].is_ascii_alphabetic()
            && bytes[2] == b':'
        {
            return decoded[1..].to_string();
        }
    }
    decoded
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
