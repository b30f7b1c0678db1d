//! Generate bundles.

use std::path::Path;
use std::rc::Rc;

use anyhow::Result;

use crate::config::BundlerConfig;
use crate::package;
use crate::registry::{load_cached_manifest, Registry};
use crate::types::{Environment, NodeModulesMode};

pub(crate) mod api;
mod builder;
mod serializer;

pub use builder::{Bundle, Resource};

/// Options for bundling.
#[derive(Debug)]
pub struct BundleOptions {
    /// How native-module directories are materialized.
    pub node_modules_mode: NodeModulesMode,
    /// Skip the minification stage; client assets keep their own
    /// paths and get cache-busting URLs instead.
    pub no_minify: bool,
    /// Packages whose tests should be included in the bundle.
    pub test_packages: Vec<String>,
    /// Release to resolve package versions against, overriding the
    /// project's pinned release.
    pub version_override: Option<String>,
}

impl BundleOptions {
    /// Options with the given node-modules mode and everything else at
    /// its default.
    pub fn new(node_modules_mode: NodeModulesMode) -> Self {
        Self {
            node_modules_mode,
            no_minify: false,
            test_packages: Vec::new(),
            version_override: None,
        }
    }
}

/// Bundle the application at `app_dir` into `output`.
///
/// Returns the ordered list of problems encountered; an empty list
/// means the bundle was written successfully. Unexpected failures are
/// folded into the list rather than propagated.
pub fn bundle(
    config: &BundlerConfig,
    app_dir: &Path,
    output: &Path,
    options: &BundleOptions,
) -> Vec<String> {
    match bundle_inner(config, app_dir, output, options) {
        Ok(errors) => errors,
        Err(error) => vec![format!(
            "Exception while bundling application:\n{:?}",
            error
        )],
    }
}

fn bundle_inner(
    config: &BundlerConfig,
    app_dir: &Path,
    output: &Path,
    options: &BundleOptions,
) -> Result<Vec<String>> {
    let registry = Rc::new(Registry::new(
        config.package_sets.clone(),
        config.cache_dir.clone(),
    ));

    let release = options
        .version_override
        .clone()
        .or_else(|| package::project_release(app_dir));
    if let Some(release) = release {
        match load_cached_manifest(&config.cache_dir, &release)? {
            Some(manifest) => registry.set_manifest(Some(manifest)),
            None => log::warn!(
                "no cached manifest for release {}; only local package sets are available",
                release
            ),
        }
    }

    let app = registry.app(app_dir, &config.default_packages)?;
    let bundle = Bundle::new(Rc::clone(&registry));
    bundle.use_package(
        &app,
        &[Environment::Client, Environment::Server],
        None,
    )?;
    for name in &options.test_packages {
        let package = registry.get(name)?;
        bundle.include_tests(&package)?;
    }

    if !options.no_minify {
        bundle.minify(config.minifier.as_ref())?;
    }
    serializer::write_to_directory(
        &bundle,
        &app,
        output,
        app_dir,
        config,
        options.node_modules_mode,
    )?;
    Ok(bundle.errors())
}
