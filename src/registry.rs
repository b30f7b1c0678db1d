//! Package resolution and caching.
//!
//! The registry owns what used to be process-global bundler state: the
//! name → package cache, the pinned release manifest and the embedded
//! interpreter that declaration scripts run in. Discarding the registry
//! (or calling [`Registry::flush`]) forgets every loaded package;
//! package ids stay monotonic across flushes.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use mlua::Lua;

use crate::package::{is_package_dir, Package};
use crate::types::ReleaseManifest;

/// Resolves package names to loaded packages.
pub struct Registry {
    package_sets: Vec<PathBuf>,
    cache_dir: PathBuf,
    manifest: RefCell<Option<ReleaseManifest>>,
    loaded: DashMap<String, Rc<Package>>,
    next_id: Cell<u64>,
    lua: Lua,
}

impl Registry {
    /// Create a registry over the given package sets and cache root.
    pub fn new(package_sets: Vec<PathBuf>, cache_dir: PathBuf) -> Self {
        Self {
            package_sets,
            cache_dir,
            manifest: RefCell::new(None),
            loaded: DashMap::new(),
            next_id: Cell::new(1),
            lua: Lua::new(),
        }
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    pub(crate) fn next_package_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Pin (or clear) the release manifest used to resolve cached
    /// package versions.
    pub fn set_manifest(&self, manifest: Option<ReleaseManifest>) {
        *self.manifest.borrow_mut() = manifest;
    }

    /// Resolve a package by name: the cache of loaded packages first,
    /// then the local package sets, then the package cache at the
    /// version pinned by the release manifest.
    pub fn get(&self, name: &str) -> Result<Rc<Package>> {
        if let Some(package) = self.loaded.get(name) {
            return Ok(Rc::clone(&package));
        }
        log::debug!("resolving package {}", name);
        let dir = self.locate(name)?;
        self.load_directory(name, &dir)
    }

    /// Load the package in `dir` under `name`, caching it for later
    /// lookups.
    pub fn load_directory(
        &self,
        name: &str,
        dir: &Path,
    ) -> Result<Rc<Package>> {
        if let Some(package) = self.loaded.get(name) {
            return Ok(Rc::clone(&package));
        }
        let package =
            Package::library(&self.lua, self.next_package_id(), name, dir)?;
        self.loaded.insert(name.to_string(), Rc::clone(&package));
        Ok(package)
    }

    /// Synthesize the pseudo-package for an application directory.
    pub fn app(
        &self,
        app_dir: &Path,
        default_packages: &[String],
    ) -> Result<Rc<Package>> {
        Package::app(self.next_package_id(), app_dir, default_packages)
    }

    /// Synthesize the pseudo-package for a collection directory.
    pub fn collection(&self, dir: &Path) -> Result<Rc<Package>> {
        Package::collection(self.next_package_id(), dir)
    }

    fn locate(&self, name: &str) -> Result<PathBuf> {
        let mut found: Vec<PathBuf> = self
            .package_sets
            .iter()
            .map(|set| set.join(name))
            .filter(|dir| is_package_dir(dir))
            .collect();
        if found.len() > 1 {
            let sets: Vec<String> = found
                .iter()
                .map(|dir| dir.display().to_string())
                .collect();
            bail!(
                "package {} found in multiple package sets: {}",
                name,
                sets.join(", ")
            );
        }
        if let Some(dir) = found.pop() {
            return Ok(dir);
        }

        let manifest = self.manifest.borrow();
        let manifest = manifest.as_ref().with_context(|| {
            format!(
                "no release manifest set; unable to resolve a version for package {}",
                name
            )
        })?;
        let version = manifest
            .packages
            .get(name)
            .with_context(|| format!("package not found: {}", name))?;
        let dir = self
            .cache_dir
            .join("packages")
            .join(name)
            .join(version);
        if !is_package_dir(&dir) {
            bail!(
                "package {} {} is not in the cache; populate the cache for this release first",
                name,
                version
            );
        }
        Ok(dir)
    }

    /// Forget every loaded package. The next resolution reloads from
    /// disk.
    pub fn flush(&self) {
        self.loaded.clear();
    }

    /// Every visible package name: the union of the local package sets
    /// and the release manifest, local sets winning on conflicts.
    /// Packages whose metadata marks them internal are omitted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for set in &self.package_sets {
            let entries = match fs::read_dir(set) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries {
                let entry = entry.with_context(|| {
                    format!("unable to read {}", set.display())
                })?;
                if is_package_dir(&entry.path()) {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        if let Some(manifest) = self.manifest.borrow().as_ref() {
            names.extend(manifest.packages.keys().cloned());
        }
        names.sort();
        names.dedup();

        let mut visible = Vec::new();
        for name in names {
            match self.get(&name) {
                Ok(package) => {
                    if !package.metadata().internal {
                        visible.push(name);
                    }
                }
                // Usually a manifest entry missing from the cache; its
                // metadata is unknowable here, so keep the name.
                Err(_) => visible.push(name),
            }
        }
        Ok(visible)
    }
}

/// Path the cached manifest for a release lives at.
pub fn manifest_cache_path(cache_dir: &Path, release: &str) -> PathBuf {
    cache_dir
        .join("manifest")
        .join(format!("{}.json", release))
}

/// Load the cached manifest for a release if one has been populated.
pub fn load_cached_manifest(
    cache_dir: &Path,
    release: &str,
) -> Result<Option<ReleaseManifest>> {
    let path = manifest_cache_path(cache_dir, release);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read(&path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    let manifest = serde_json::from_slice(&contents)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    Ok(Some(manifest))
}
