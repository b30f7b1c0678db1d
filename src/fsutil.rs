//! Filesystem helpers shared across the bundler.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use tar::{Archive, Builder};

use crate::files::is_ignored;

/// Options for [`copy_tree`].
#[derive(Default)]
pub struct CopyOptions<'a> {
    /// Rewrite each copied basename.
    pub transform_filename: Option<&'a dyn Fn(&str) -> String>,
    /// Rewrite the contents of each copied file.
    pub transform_contents: Option<&'a dyn Fn(Vec<u8>) -> Vec<u8>>,
    /// Basename patterns to skip, files and directories alike.
    pub ignore: &'a [Regex],
}

/// Create a directory and all of its parents.
pub fn mkdir_p(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("unable to create {}", path.display()))
}

/// Remove a directory tree if it exists.
pub fn remove_tree(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_err() {
        return Ok(());
    }
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
            .with_context(|| format!("unable to remove {}", path.display()))
    } else {
        fs::remove_file(path)
            .with_context(|| format!("unable to remove {}", path.display()))
    }
}

/// Recursively copy `from` into `to`, applying the filename and contents
/// transforms to every file along the way.
pub fn copy_tree(from: &Path, to: &Path, options: &CopyOptions) -> Result<()> {
    mkdir_p(to)?;
    let entries = fs::read_dir(from)
        .with_context(|| format!("unable to read {}", from.display()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("unable to read {}", from.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name, options.ignore) {
            continue;
        }
        let target_name = match options.transform_filename {
            Some(transform) => transform(&name),
            None => name,
        };
        let source = entry.path();
        let target = to.join(&target_name);
        let file_type = entry
            .file_type()
            .with_context(|| format!("unable to stat {}", source.display()))?;
        if file_type.is_dir() {
            copy_tree(&source, &target, options)?;
        } else {
            let mut contents = fs::read(&source).with_context(|| {
                format!("unable to read {}", source.display())
            })?;
            if let Some(transform) = options.transform_contents {
                contents = transform(contents);
            }
            fs::write(&target, contents).with_context(|| {
                format!("unable to write {}", target.display())
            })?;
        }
    }
    Ok(())
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        mkdir_p(parent)?;
    }
    fs::write(path, contents)
        .with_context(|| format!("unable to write {}", path.display()))
}

/// Extract a gzipped tarball into `dest`.
pub fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> Result<()> {
    mkdir_p(dest)?;
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive
        .unpack(dest)
        .with_context(|| format!("unable to extract into {}", dest.display()))
}

/// Create a gzipped tarball at `dest` whose single top-level entry named
/// `top_level` contains the contents of `source`.
pub fn create_tar_gz(
    source: &Path,
    dest: &Path,
    top_level: &str,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        mkdir_p(parent)?;
    }
    let file = File::create(dest)
        .with_context(|| format!("unable to create {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder
        .append_dir_all(top_level, source)
        .with_context(|| format!("unable to archive {}", source.display()))?;
    let encoder = builder
        .into_inner()
        .context("unable to finish archive")?;
    encoder
        .finish()
        .context("unable to finish compression")?
        .flush()
        .with_context(|| format!("unable to write {}", dest.display()))?;
    Ok(())
}

/// Search upward from `start` for a directory containing `marker`,
/// returning the directory that holds it.
pub fn find_upwards(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(marker).exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Append an entry to the `.gitignore` in `dir` unless it is already
/// listed.
pub fn add_to_gitignore(dir: &Path, entry: &str) -> Result<()> {
    let path = dir.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => String::new(),
    };
    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(entry);
    contents.push('\n');
    fs::write(&path, contents)
        .with_context(|| format!("unable to write {}", path.display()))
}

/// Symlink a directory into place, falling back to a deep copy on
/// platforms without directory symlinks.
pub fn link_dir(source: &Path, target: &Path) -> Result<()> {
    let source = source
        .canonicalize()
        .with_context(|| format!("unable to resolve {}", source.display()))?;
    if let Some(parent) = target.parent() {
        mkdir_p(parent)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&source, target).with_context(|| {
            format!("unable to link {}", target.display())
        })?;
    }
    #[cfg(not(unix))]
    {
        copy_tree(&source, target, &CopyOptions::default())?;
    }
    Ok(())
}

/// Move the single top-level directory of an extracted archive to `dest`.
///
/// Package tarballs carry their package directory as the only top-level
/// entry; anything else is a malformed archive.
pub fn promote_single_dir(extracted: &Path, dest: &Path) -> Result<()> {
    let mut entries = Vec::new();
    let listing = fs::read_dir(extracted).with_context(|| {
        format!("unable to read {}", extracted.display())
    })?;
    for entry in listing {
        let entry = entry.with_context(|| {
            format!("unable to read {}", extracted.display())
        })?;
        entries.push(entry.path());
    }
    match entries.as_slice() {
        [single] if single.is_dir() => {
            remove_tree(dest)?;
            if let Some(parent) = dest.parent() {
                mkdir_p(parent)?;
            }
            fs::rename(single, dest).with_context(|| {
                format!("unable to move archive into {}", dest.display())
            })
        }
        _ => bail!(
            "archive does not contain a single top-level directory: {}",
            extracted.display()
        ),
    }
}
