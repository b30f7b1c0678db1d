//! Source file enumeration and load ordering.
//!
//! Enumeration walks a source root, prunes special subtrees, filters by
//! extension and ignore patterns, and yields paths in the deterministic
//! order the runtime will load them in.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

/// Directory reserved for the application's static assets; it is copied
/// verbatim into the bundle and never scanned for sources.
pub const PUBLIC_DIR: &str = "public";

/// Basename patterns excluded from every scan: editor droppings, OS
/// metadata files and version-control state.
pub const IGNORE_SOURCES: &[&str] = &[
    r"~$",
    r"^\.#",
    r"^#.*#$",
    r"^\.DS_Store$",
    r"^ehthumbs\.db$",
    r"^Icon.$",
    r"^Thumbs\.db$",
    r"^\.meteor$",
    r"^\.git$",
];

static IGNORE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    IGNORE_SOURCES
        .iter()
        .map(|source| {
            Regex::new(source).expect("built-in ignore pattern is valid")
        })
        .collect()
});

/// The built-in ignore patterns, matched against basenames.
pub fn default_ignores() -> &'static [Regex] {
    &IGNORE_PATTERNS
}

/// Determine if a basename matches any of the given ignore patterns.
pub fn is_ignored(name: &str, ignores: &[Regex]) -> bool {
    ignores.iter().any(|pattern| pattern.is_match(name))
}

// Hidden entries and the public directory are pruned before the walk
// descends into them.
fn pruned(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == PUBLIC_DIR
}

/// Compare two absolute source paths by load order, earlier-loaded first.
///
/// Entry points (basename starting with `main.`) load last, `lib`
/// directories load first, deeper files load before shallower ones and
/// ties break alphabetically on the full path.
pub fn load_order(a: &Path, b: &Path) -> Ordering {
    let a_main = is_main(a);
    let b_main = is_main(b);
    if a_main != b_main {
        return if a_main { Ordering::Greater } else { Ordering::Less };
    }

    let a_lib = has_lib_segment(a);
    let b_lib = has_lib_segment(b);
    if a_lib != b_lib {
        return if a_lib { Ordering::Less } else { Ordering::Greater };
    }

    let a_depth = a.components().count();
    let b_depth = b.components().count();
    if a_depth != b_depth {
        return b_depth.cmp(&a_depth);
    }

    a.cmp(b)
}

fn is_main(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with("main."))
        .unwrap_or(false)
}

fn has_lib_segment(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "lib")
}

/// Enumerate the source files under `root` whose extension is in
/// `extensions`, in load order, as paths relative to `root`.
///
/// HTML sources are hoisted to the head of the list (preserving their
/// mutual order) so template declarations are in scope before the code
/// that references them loads.
pub fn source_files(
    root: &Path,
    extensions: &[String],
    ignores: &[Regex],
) -> Result<Vec<PathBuf>> {
    let mut sources: Vec<PathBuf> = Vec::new();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !pruned(entry.file_name()));
    for entry in walker {
        let entry = entry.with_context(|| {
            format!("unable to scan sources under {}", root.display())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_ignored(&name, ignores) {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                extensions.iter().any(|e| e.as_str() == ext)
            })
            .unwrap_or(false);
        if matches {
            sources.push(entry.into_path());
        }
    }

    sources.sort_by(|a, b| load_order(a, b));

    // Templates first, everything else after.
    let (html, rest): (Vec<PathBuf>, Vec<PathBuf>) = sources
        .into_iter()
        .partition(|path| path.extension() == Some(OsStr::new("html")));

    html.into_iter()
        .chain(rest)
        .map(|path| {
            path.strip_prefix(root)
                .map(|rel| rel.to_path_buf())
                .with_context(|| {
                    format!(
                        "source {} is outside the source root {}",
                        path.display(),
                        root.display()
                    )
                })
        })
        .collect()
}
