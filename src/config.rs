//! Bundler configuration.
//!
//! A [`BundlerConfig`] owns everything that used to live in ambient
//! process state: where packages are searched for, where the cache and
//! the runtime server live, which origin serves package archives and
//! which packages every application pulls in implicitly.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::minify::{Minifier, Passthrough};

/// Default remote origin for release manifests and package archives.
pub const DEFAULT_ORIGIN: &str = "https://warehouse.bindery.dev";

/// Packages every application uses implicitly; they carry the client
/// runtime and the default source handlers.
pub const DEFAULT_PACKAGES: &[&str] =
    &["core", "reactive", "session", "templating", "startup"];

/// Environment variable naming the framework install directory.
pub const HOME_VAR: &str = "BINDERY_HOME";

/// Environment variable carrying extra package-set directories,
/// separated by `:`.
pub const PACKAGE_SETS_VAR: &str = "BINDERY_PACKAGE_SETS";

/// Environment variable overriding the remote origin.
pub const ORIGIN_VAR: &str = "BINDERY_ORIGIN";

/// Everything the bundler needs to know about its install.
pub struct BundlerConfig {
    /// Directories whose direct subdirectories are packages, searched
    /// before the cache. A name present in more than one set is an
    /// error.
    pub package_sets: Vec<PathBuf>,
    /// Root of the local package cache.
    pub cache_dir: PathBuf,
    /// Remote origin serving `manifest/<release>.json` and
    /// `packages/<name>/<version>.tar.gz`.
    pub origin: String,
    /// The runtime server directory copied into every bundle.
    pub runtime_dir: PathBuf,
    /// Packages every application uses implicitly.
    pub default_packages: Vec<String>,
    /// Minifier applied to concatenated client assets.
    pub minifier: Box<dyn Minifier>,
}

impl BundlerConfig {
    /// Build a configuration rooted at a framework install directory.
    pub fn at_install(home: PathBuf) -> Self {
        Self {
            package_sets: vec![home.join("packages")],
            cache_dir: home.join("cache"),
            origin: DEFAULT_ORIGIN.to_string(),
            runtime_dir: home.join("server"),
            default_packages: DEFAULT_PACKAGES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            minifier: Box::new(Passthrough),
        }
    }

    /// Build a configuration from the process environment: the install
    /// root comes from `BINDERY_HOME` (falling back to `~/.bindery`),
    /// with optional extra package sets and an origin override.
    pub fn from_env() -> Result<Self> {
        let home = env::var_os(HOME_VAR)
            .map(PathBuf::from)
            .or_else(|| {
                env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".bindery"))
            })
            .with_context(|| {
                format!("{} or HOME must be set", HOME_VAR)
            })?;
        let mut config = Self::at_install(home);
        if let Some(sets) = env::var_os(PACKAGE_SETS_VAR) {
            for dir in env::split_paths(&sets) {
                config.package_sets.push(dir);
            }
        }
        if let Ok(origin) = env::var(ORIGIN_VAR) {
            config.origin = origin;
        }
        Ok(config)
    }

    /// Replace the minifier used for client assets.
    pub fn with_minifier(mut self, minifier: Box<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }
}
