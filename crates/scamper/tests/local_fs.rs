//! Walks against the real filesystem through `LocalBackend`.

use anyhow::Result;
use scamper::{Glob, GlobOptions, Matched};
use tempfile::TempDir;

fn write(dir: &TempDir, rel: &str, contents: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn opts_in(dir: &TempDir) -> GlobOptions {
    // canonicalize so relative results stay stable on hosts where the
    // tempdir itself sits behind a symlink
    let cwd = dir.path().canonicalize().unwrap();
    GlobOptions {
        cwd: Some(cwd.to_string_lossy().into_owned()),
        ..GlobOptions::default()
    }
}

fn run(dir: &TempDir, patterns: &[&str], opts: GlobOptions) -> Vec<String> {
    let glob = Glob::new(patterns.iter().copied(), opts).unwrap();
    let mut out: Vec<String> = glob
        .walk_sync()
        .into_iter()
        .filter_map(Matched::into_path)
        .collect();
    out.sort();
    out
}

#[test]
fn walks_a_real_tree() -> Result<()> {
    let dir = TempDir::new()?;
    write(&dir, "src/main.rs", "fn main() {}");
    write(&dir, "src/util/mod.rs", "");
    write(&dir, "docs/guide.md", "# guide");
    write(&dir, ".hidden.rs", "");

    assert_eq!(
        run(&dir, &["**/*.rs"], opts_in(&dir)),
        vec!["src/main.rs", "src/util/mod.rs"]
    );

    let dotted = GlobOptions {
        dot: true,
        ..opts_in(&dir)
    };
    assert_eq!(
        run(&dir, &["**/*.rs"], dotted),
        vec![".hidden.rs", "src/main.rs", "src/util/mod.rs"]
    );
    Ok(())
}

#[test]
fn unreadable_and_missing_directories_are_empty() -> Result<()> {
    let dir = TempDir::new()?;
    write(&dir, "ok/file.txt", "x");
    assert_eq!(
        run(&dir, &["missing/**/*.txt", "ok/*.txt"], opts_in(&dir)),
        vec!["ok/file.txt"]
    );
    Ok(())
}

#[tokio::test]
async fn async_walk_agrees_with_sync() -> Result<()> {
    let dir = TempDir::new()?;
    for i in 0..6 {
        write(&dir, &format!("mod{}/lib.rs", i), "");
        write(&dir, &format!("mod{}/tests/it.rs", i), "");
    }
    let glob = Glob::new(["**/*.rs"], opts_in(&dir))?;
    let mut sync: Vec<String> = glob
        .walk_sync()
        .into_iter()
        .filter_map(Matched::into_path)
        .collect();
    sync.sort();

    let mut from_async: Vec<String> = glob
        .walk()
        .await
        .into_iter()
        .filter_map(Matched::into_path)
        .collect();
    from_async.sort();

    assert_eq!(sync, from_async);
    assert_eq!(sync.len(), 12);
    Ok(())
}

#[cfg(unix)]
mod symlinks {
    use super::*;

    #[test]
    fn cycle_completes_and_finds_real_files() -> Result<()> {
        let dir = TempDir::new()?;
        write(&dir, "x/real.txt", "data");
        std::os::unix::fs::symlink(dir.path().join("x"), dir.path().join("x/loop"))?;

        let out = run(&dir, &["x/**/*.txt"], opts_in(&dir));
        assert!(out.contains(&"x/real.txt".to_string()), "{out:?}");
        let mut dedup = out.clone();
        dedup.dedup();
        assert_eq!(out, dedup);
        Ok(())
    }

    #[test]
    fn realpath_resolves_through_links() -> Result<()> {
        let dir = TempDir::new()?;
        write(&dir, "real/data.txt", "x");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias"))?;

        let opts = GlobOptions {
            realpath: true,
            ..opts_in(&dir)
        };
        let out = run(&dir, &["alias/*.txt"], opts);
        assert_eq!(out, vec!["real/data.txt"]);
        Ok(())
    }
}
