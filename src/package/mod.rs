//! The package model.
//!
//! A [`Package`] is an application, a library package or a collection of
//! packages, presented uniformly: declarative metadata, an optional
//! `on_use` handler, an optional `on_test` handler and a map of source
//! extensions to handlers. Library packages read their declarations from
//! a `package.js` script; applications and collections have theirs
//! synthesized from the directory layout.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use mlua::{Function, Table};

use crate::bundler::api::UseApi;
use crate::files;
use crate::types::Environment;

pub(crate) mod script;

/// Name of the declaration script that marks a directory as a package.
pub const PACKAGE_FILE: &str = "package.js";

/// Project file listing the packages an application uses, one per line.
pub const APP_PACKAGES_FILE: &str = ".meteor/packages";

/// Project file pinning the release an application was created with.
pub const APP_RELEASE_FILE: &str = ".meteor/release";

/// Extensions every application scans for even before any package has
/// registered a handler for them.
const BASE_EXTENSIONS: &[&str] = &["js", "css", "html"];

/// Determine if a directory is an application project.
pub fn is_app_dir(dir: &Path) -> bool {
    dir.join(APP_PACKAGES_FILE).is_file()
}

/// Determine if a directory is a package.
pub fn is_package_dir(dir: &Path) -> bool {
    dir.join(PACKAGE_FILE).is_file()
}

/// Determine if a directory is a collection: every immediate
/// subdirectory is a package.
pub fn is_collection_dir(dir: &Path) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    let mut seen = false;
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            if !is_package_dir(&entry.path()) {
                return false;
            }
            seen = true;
        }
    }
    seen
}

/// Read the package names an application declares.
pub fn project_packages(app_dir: &Path) -> Result<Vec<String>> {
    let path = app_dir.join(APP_PACKAGES_FILE);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Read the release an application is pinned to, if any.
pub fn project_release(app_dir: &Path) -> Option<String> {
    let contents =
        fs::read_to_string(app_dir.join(APP_RELEASE_FILE)).ok()?;
    let release = contents.trim();
    if release.is_empty() {
        None
    } else {
        Some(release.to_string())
    }
}

/// Declarative package metadata.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Short human-readable description.
    pub summary: Option<String>,
    /// Internal packages are hidden from listings.
    pub internal: bool,
    /// Environments the package is intended for.
    pub environments: Option<Vec<String>>,
}

/// A handler invoked when a package is used or tested.
pub(crate) enum UseHandler {
    /// Synthesized in the bundler itself.
    Native(Box<dyn Fn(&UseApi, &[Environment]) -> Result<()>>),
    /// Registered by a declaration script.
    Script(Function),
}

/// An application, a library package or a package collection.
pub struct Package {
    id: u64,
    name: String,
    source_root: PathBuf,
    serve_root: String,
    metadata: RefCell<Metadata>,
    on_use: RefCell<Option<Rc<UseHandler>>>,
    on_test: RefCell<Option<Rc<UseHandler>>>,
    extensions: RefCell<IndexMap<String, Function>>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source_root", &self.source_root)
            .field("serve_root", &self.serve_root)
            .finish_non_exhaustive()
    }
}

impl Package {
    fn empty(id: u64, name: &str, source_root: PathBuf, serve_root: String) -> Self {
        Self {
            id,
            name: name.to_string(),
            source_root,
            serve_root,
            metadata: RefCell::new(Metadata::default()),
            on_use: RefCell::new(None),
            on_test: RefCell::new(None),
            extensions: RefCell::new(IndexMap::new()),
        }
    }

    /// Load a library package from a directory by evaluating its
    /// declaration script.
    pub(crate) fn library(
        lua: &mlua::Lua,
        id: u64,
        name: &str,
        dir: &Path,
    ) -> Result<Rc<Self>> {
        let package = Rc::new(Self::empty(
            id,
            name,
            dir.to_path_buf(),
            format!("/packages/{}", name),
        ));
        script::evaluate(lua, &package, dir)?;
        Ok(package)
    }

    /// Synthesize the pseudo-package for an application project.
    ///
    /// On use it pulls in the default framework packages plus the ones
    /// the project declares, then routes every source file: anything
    /// not under a `server` directory is client code, anything not
    /// under a `client` directory is server code, and anything under a
    /// `tests` directory is left to `on_test`, which applies the same
    /// routing to the test tree alone.
    pub(crate) fn app(
        id: u64,
        app_dir: &Path,
        default_packages: &[String],
    ) -> Result<Rc<Self>> {
        let package = Rc::new(Self::empty(
            id,
            "",
            app_dir.to_path_buf(),
            "/".to_string(),
        ));

        let dir = app_dir.to_path_buf();
        let defaults: Vec<String> = default_packages.to_vec();
        package.set_on_use(UseHandler::Native(Box::new(
            move |api: &UseApi, where_: &[Environment]| {
                let mut names = defaults.clone();
                names.extend(project_packages(&dir)?);
                api.use_packages(&names, None)?;
                api.add_dependency(APP_PACKAGES_FILE);
                for (source, environments) in
                    route_app_sources(&dir, api, where_, false)?
                {
                    api.add_files(&[source], Some(&environments))?;
                }
                Ok(())
            },
        )))?;

        let dir = app_dir.to_path_buf();
        package.set_on_test(UseHandler::Native(Box::new(
            move |api: &UseApi, where_: &[Environment]| {
                for (source, environments) in
                    route_app_sources(&dir, api, where_, true)?
                {
                    api.add_files(&[source], Some(&environments))?;
                }
                Ok(())
            },
        )))?;

        Ok(package)
    }

    /// Synthesize the pseudo-package for a collection directory: its
    /// tests are the tests of every package inside it.
    pub(crate) fn collection(id: u64, dir: &Path) -> Result<Rc<Self>> {
        if !is_collection_dir(dir) {
            bail!(
                "{} is not a collection of packages",
                dir.display()
            );
        }
        let package =
            Rc::new(Self::empty(id, "", PathBuf::new(), "/".to_string()));

        let dir = dir.to_path_buf();
        package.set_on_test(UseHandler::Native(Box::new(
            move |api: &UseApi, _where: &[Environment]| {
                let entries = fs::read_dir(&dir).with_context(|| {
                    format!("unable to read {}", dir.display())
                })?;
                for entry in entries {
                    let entry = entry.with_context(|| {
                        format!("unable to read {}", dir.display())
                    })?;
                    if is_package_dir(&entry.path()) {
                        api.include_directory_tests(&entry.path())?;
                    }
                }
                Ok(())
            },
        )))?;

        Ok(package)
    }

    /// The process-local package id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The package name; empty for applications and collections.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name used in diagnostics.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "the application"
        } else {
            &self.name
        }
    }

    /// Directory the package's sources live under.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// URL prefix the package's files are served under.
    pub fn serve_root(&self) -> &str {
        &self.serve_root
    }

    /// A copy of the declared metadata.
    pub fn metadata(&self) -> Metadata {
        self.metadata.borrow().clone()
    }

    /// The handler for an extension, if this package registered one.
    pub(crate) fn extension(&self, ext: &str) -> Option<Function> {
        self.extensions.borrow().get(ext).cloned()
    }

    /// Names of the extensions this package registered handlers for.
    pub fn extension_names(&self) -> Vec<String> {
        self.extensions.borrow().keys().cloned().collect()
    }

    pub(crate) fn use_handler(&self) -> Option<Rc<UseHandler>> {
        self.on_use.borrow().clone()
    }

    pub(crate) fn test_handler(&self) -> Option<Rc<UseHandler>> {
        self.on_test.borrow().clone()
    }

    pub(crate) fn merge_metadata(&self, patch: Metadata) {
        let mut metadata = self.metadata.borrow_mut();
        if patch.summary.is_some() {
            metadata.summary = patch.summary;
        }
        if patch.internal {
            metadata.internal = true;
        }
        if patch.environments.is_some() {
            metadata.environments = patch.environments;
        }
    }

    pub(crate) fn describe_from_table(&self, spec: &Table) -> Result<()> {
        let summary: Option<String> = spec
            .get("summary")
            .map_err(script::lua_error)?;
        let internal: Option<bool> = spec
            .get("internal")
            .map_err(script::lua_error)?;
        let environments: Option<Vec<String>> = spec
            .get("environments")
            .map_err(script::lua_error)?;
        self.merge_metadata(Metadata {
            summary,
            internal: internal.unwrap_or(false),
            environments,
        });
        Ok(())
    }

    pub(crate) fn set_on_use(&self, handler: UseHandler) -> Result<()> {
        let mut slot = self.on_use.borrow_mut();
        if slot.is_some() {
            bail!(
                "on_use handler registered twice for {}",
                self.display_name()
            );
        }
        *slot = Some(Rc::new(handler));
        Ok(())
    }

    pub(crate) fn set_on_test(&self, handler: UseHandler) -> Result<()> {
        let mut slot = self.on_test.borrow_mut();
        if slot.is_some() {
            bail!(
                "on_test handler registered twice for {}",
                self.display_name()
            );
        }
        *slot = Some(Rc::new(handler));
        Ok(())
    }

    pub(crate) fn register_extension(
        &self,
        ext: &str,
        handler: Function,
    ) -> Result<()> {
        let ext = ext.trim_start_matches('.').to_string();
        let mut extensions = self.extensions.borrow_mut();
        if extensions.contains_key(&ext) {
            bail!(
                "extension .{} registered twice by {}",
                ext,
                self.display_name()
            );
        }
        extensions.insert(ext, handler);
        Ok(())
    }
}

// Enumerate an application's sources and decide the environments each
// one belongs to. With `tests` set, only the test tree is routed;
// without it the test tree is skipped.
fn route_app_sources(
    app_dir: &Path,
    api: &UseApi,
    where_: &[Environment],
    tests: bool,
) -> Result<Vec<(String, Vec<Environment>)>> {
    let mut extensions = api.registered_extensions();
    for base in BASE_EXTENSIONS {
        if !extensions.iter().any(|e| e == base) {
            extensions.push(base.to_string());
        }
    }

    let mut routed = Vec::new();
    for source in
        files::source_files(app_dir, &extensions, files::default_ignores())?
    {
        let under_tests = has_segment(&source, "tests");
        if under_tests != tests {
            continue;
        }
        let mut environments = Vec::new();
        if !has_segment(&source, "server") {
            environments.push(Environment::Client);
        }
        if !has_segment(&source, "client") {
            environments.push(Environment::Server);
        }
        environments.retain(|env| where_.contains(env));
        if environments.is_empty() {
            continue;
        }
        let source = source.to_string_lossy().replace('\\', "/");
        routed.push((source, environments));
    }
    Ok(routed)
}

fn has_segment(path: &Path, segment: &str) -> bool {
    path.components().any(|c| c.as_os_str() == segment)
}
