//! Downloading release manifests and package archives into the cache.

use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::fsutil;
use crate::package::PACKAGE_FILE;
use crate::registry::manifest_cache_path;
use crate::types::ReleaseManifest;

/// Fetch a URL and return the response body.
pub fn http_get(url: &str) -> Result<Vec<u8>> {
    log::debug!("GET {}", url);
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("request failed: {}", url))?;
    let status = response.status();
    if !status.is_success() {
        bail!("GET {} returned {}", url, status);
    }
    let body = response
        .bytes()
        .with_context(|| format!("unable to read response from {}", url))?;
    Ok(body.to_vec())
}

/// Determine if a package version is present in the cache.
///
/// An empty directory left behind by a failed extraction does not
/// count; the declaration script must be there.
pub fn package_in_cache(
    cache_dir: &Path,
    name: &str,
    version: &str,
) -> bool {
    cache_dir
        .join("packages")
        .join(name)
        .join(version)
        .join(PACKAGE_FILE)
        .is_file()
}

/// Fetch the manifest for a release, persist it into the cache, then
/// download and extract every referenced package the cache is missing.
///
/// Downloads run in parallel; any failure aborts the whole populate.
/// Extraction happens sequentially once all archives have arrived.
pub fn populate_cache(
    cache_dir: &Path,
    origin: &str,
    release: &str,
) -> Result<ReleaseManifest> {
    let origin = origin.trim_end_matches('/');
    let manifest_url = format!("{}/manifest/{}.json", origin, release);
    let body = http_get(&manifest_url)?;
    let manifest: ReleaseManifest = serde_json::from_slice(&body)
        .with_context(|| format!("invalid manifest at {}", manifest_url))?;
    fsutil::write_file(&manifest_cache_path(cache_dir, release), &body)?;

    let missing: Vec<(String, String)> = manifest
        .packages
        .iter()
        .filter(|(name, version)| {
            !package_in_cache(cache_dir, name, version)
        })
        .map(|(name, version)| (name.clone(), version.clone()))
        .collect();
    if missing.is_empty() {
        log::info!("cache already holds every package of release {}", release);
        return Ok(manifest);
    }
    log::info!(
        "fetching {} packages for release {}",
        missing.len(),
        release
    );

    let archives: Vec<(String, String, Vec<u8>)> = missing
        .par_iter()
        .map(|(name, version)| {
            let url = format!(
                "{}/packages/{}/{}.tar.gz",
                origin, name, version
            );
            http_get(&url)
                .map(|bytes| (name.clone(), version.clone(), bytes))
        })
        .collect::<Result<Vec<_>>>()?;

    for (name, version, bytes) in archives {
        extract_package(cache_dir, &name, &version, &bytes)?;
    }
    Ok(manifest)
}

// The archive's single top-level entry is the package directory; it is
// extracted into scratch space and then moved into its cache slot.
fn extract_package(
    cache_dir: &Path,
    name: &str,
    version: &str,
    bytes: &[u8],
) -> Result<()> {
    let packages_dir = cache_dir.join("packages");
    fsutil::mkdir_p(&packages_dir)?;
    let scratch = tempfile::tempdir_in(&packages_dir)
        .context("unable to allocate extraction scratch space")?;
    fsutil::extract_tar_gz(Cursor::new(bytes), scratch.path())
        .with_context(|| format!("extracting {} {}", name, version))?;
    let dest = packages_dir.join(name).join(version);
    fsutil::promote_single_dir(scratch.path(), &dest)
        .with_context(|| format!("installing {} {}", name, version))?;
    log::debug!("cached {} {}", name, version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_presence_requires_the_declaration_script() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path();
        assert!(!package_in_cache(cache, "widgets", "1.0.0"));

        // A failed extraction leaves an empty directory behind.
        fsutil::mkdir_p(&cache.join("packages/widgets/1.0.0"))?;
        assert!(!package_in_cache(cache, "widgets", "1.0.0"));

        fsutil::write_file(
            &cache.join("packages/widgets/1.0.0").join(PACKAGE_FILE),
            b"-- declarations",
        )?;
        assert!(package_in_cache(cache, "widgets", "1.0.0"));
        Ok(())
    }

    #[test]
    fn archives_install_into_versioned_slots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("widgets");
        fsutil::write_file(&source.join(PACKAGE_FILE), b"-- declarations")?;
        let archive = dir.path().join("widgets.tar.gz");
        fsutil::create_tar_gz(&source, &archive, "widgets")?;

        let cache = dir.path().join("cache");
        let bytes = std::fs::read(&archive)?;
        extract_package(&cache, "widgets", "2.1.0", &bytes)?;
        assert!(package_in_cache(&cache, "widgets", "2.1.0"));
        Ok(())
    }
}
