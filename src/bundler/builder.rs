//! The bundle accumulator.
//!
//! A [`Bundle`] collects everything one bundling run produces: which
//! packages were pulled in and for which environments, the typed
//! resources their handlers emitted, the accumulated diagnostics and
//! the native-module directories to materialize. Dependency resolution
//! recurses through package handlers; everything else is bookkeeping.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use mlua::Function;

use crate::bundler::api::{ResourceApi, UseApi};
use crate::minify::Minifier;
use crate::package::script::lua_error;
use crate::package::{Package, UseHandler, PACKAGE_FILE};
use crate::registry::Registry;
use crate::types::{
    sha1_hex, where_key, Environment, ManifestEntry, ResourceKind,
};

/// A resource handed to [`Bundle::add_resource`].
pub struct Resource {
    /// What the content is.
    pub kind: ResourceKind,
    /// Environments the resource targets.
    pub environments: Vec<Environment>,
    /// Serve path; required for js, css and static resources.
    pub path: Option<String>,
    /// Inline contents; takes precedence over `source_file`.
    pub data: Option<Vec<u8>>,
    /// File to read the contents from when `data` is absent.
    pub source_file: Option<PathBuf>,
}

/// Per-(package, bundle) occurrence state.
pub(crate) struct BundlingInfo {
    /// The package this occurrence belongs to.
    pub(crate) package: Rc<Package>,
    /// Canonical environment-set keys already configured.
    configured: RefCell<HashSet<String>>,
    /// Direct dependencies pulled in by this occurrence, by package id.
    pub(crate) using: RefCell<IndexMap<u64, Rc<BundlingInfo>>>,
    /// Source paths declared so far, per environment.
    files: RefCell<HashMap<Environment, HashSet<String>>>,
    /// Package-relative paths whose changes should trigger a rebuild.
    pub(crate) dependencies: RefCell<BTreeSet<String>>,
}

/// Accumulator for one bundling run.
pub struct Bundle {
    registry: Rc<Registry>,
    infos: RefCell<IndexMap<u64, Rc<BundlingInfo>>>,
    tests_included: RefCell<HashSet<u64>>,
    // Packages whose handlers are currently running, for cycle reports.
    use_stack: RefCell<Vec<(u64, String)>>,
    pub(crate) js_client: RefCell<Vec<String>>,
    pub(crate) css: RefCell<Vec<String>>,
    pub(crate) client_files: RefCell<IndexMap<String, Vec<u8>>>,
    pub(crate) client_cacheable_files: RefCell<IndexMap<String, Vec<u8>>>,
    pub(crate) server_files: RefCell<IndexMap<String, Vec<u8>>>,
    pub(crate) manifest: RefCell<Vec<ManifestEntry>>,
    pub(crate) node_modules_dirs: RefCell<IndexMap<String, PathBuf>>,
    pub(crate) head: RefCell<Vec<String>>,
    pub(crate) body: RefCell<Vec<String>>,
    errors: RefCell<Vec<String>>,
}

impl Bundle {
    /// Create an empty bundle over a registry.
    pub fn new(registry: Rc<Registry>) -> Rc<Self> {
        Rc::new(Self {
            registry,
            infos: RefCell::new(IndexMap::new()),
            tests_included: RefCell::new(HashSet::new()),
            use_stack: RefCell::new(Vec::new()),
            js_client: RefCell::new(Vec::new()),
            css: RefCell::new(Vec::new()),
            client_files: RefCell::new(IndexMap::new()),
            client_cacheable_files: RefCell::new(IndexMap::new()),
            server_files: RefCell::new(IndexMap::new()),
            manifest: RefCell::new(Vec::new()),
            node_modules_dirs: RefCell::new(IndexMap::new()),
            head: RefCell::new(Vec::new()),
            body: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    fn info_for(&self, package: &Rc<Package>) -> Rc<BundlingInfo> {
        let mut infos = self.infos.borrow_mut();
        if let Some(info) = infos.get(&package.id()) {
            return Rc::clone(info);
        }
        let mut dependencies = BTreeSet::new();
        if !package.name().is_empty() {
            dependencies.insert(PACKAGE_FILE.to_string());
        }
        let info = Rc::new(BundlingInfo {
            package: Rc::clone(package),
            configured: RefCell::new(HashSet::new()),
            using: RefCell::new(IndexMap::new()),
            files: RefCell::new(HashMap::new()),
            dependencies: RefCell::new(dependencies),
        });
        infos.insert(package.id(), Rc::clone(&info));
        info
    }

    pub(crate) fn infos(&self) -> Vec<Rc<BundlingInfo>> {
        self.infos.borrow().values().cloned().collect()
    }

    /// Pull a package into the bundle for an environment set.
    ///
    /// Idempotent per canonical environment set: the package's handler
    /// runs at most once for each distinct set. The edge from `from` is
    /// recorded either way.
    pub fn use_package(
        self: &Rc<Self>,
        package: &Rc<Package>,
        environments: &[Environment],
        from: Option<&Rc<BundlingInfo>>,
    ) -> Result<()> {
        let info = self.info_for(package);
        if let Some(parent) = from {
            parent
                .using
                .borrow_mut()
                .insert(package.id(), Rc::clone(&info));
        }

        let key = where_key(environments);
        if !info.configured.borrow_mut().insert(key.clone()) {
            return Ok(());
        }

        {
            let stack = self.use_stack.borrow();
            if stack.iter().any(|(id, _)| *id == package.id()) {
                let mut chain: Vec<String> =
                    stack.iter().map(|(_, name)| name.clone()).collect();
                chain.push(package.display_name().to_string());
                drop(stack);
                self.report_error(format!(
                    "circular package dependency: {}",
                    chain.join(" -> ")
                ));
                return Ok(());
            }
        }

        if !package.name().is_empty() {
            let node_modules = package.source_root().join("node_modules");
            if node_modules.is_dir() {
                self.node_modules_dirs.borrow_mut().insert(
                    format!("app/packages/{}/node_modules", package.name()),
                    node_modules,
                );
            }
        }

        if let Some(handler) = package.use_handler() {
            log::debug!("using {} in {}", package.display_name(), key);
            self.use_stack
                .borrow_mut()
                .push((package.id(), package.display_name().to_string()));
            let api = UseApi {
                bundle: Rc::clone(self),
                info: Rc::clone(&info),
                default_where: environments.to_vec(),
            };
            let outcome = self.invoke(&handler, &api, environments);
            self.use_stack.borrow_mut().pop();
            outcome?;
        }
        Ok(())
    }

    /// Pull a package's tests into the bundle, at most once per
    /// package.
    pub fn include_tests(
        self: &Rc<Self>,
        package: &Rc<Package>,
    ) -> Result<()> {
        if !self.tests_included.borrow_mut().insert(package.id()) {
            return Ok(());
        }
        let info = self.info_for(package);
        if let Some(handler) = package.test_handler() {
            log::debug!("including tests of {}", package.display_name());
            let environments = [Environment::Client, Environment::Server];
            let api = UseApi {
                bundle: Rc::clone(self),
                info,
                default_where: environments.to_vec(),
            };
            self.invoke(&handler, &api, &environments)?;
        }
        Ok(())
    }

    fn invoke(
        &self,
        handler: &UseHandler,
        api: &UseApi,
        environments: &[Environment],
    ) -> Result<()> {
        match handler {
            UseHandler::Native(handler) => handler(api, environments),
            UseHandler::Script(handler) => {
                let table = api.to_lua(self.registry.lua())?;
                let tags: Vec<String> = environments
                    .iter()
                    .map(|e| e.as_str().to_string())
                    .collect();
                handler
                    .call::<()>((table, tags))
                    .map_err(lua_error)
                    .with_context(|| {
                        format!(
                            "handler of {} failed",
                            api.info.package.display_name()
                        )
                    })
            }
        }
    }

    /// Register one source file of a package for one environment.
    ///
    /// Files with a handler in scope are run through it and join the
    /// package's dependency set; files without one are emitted verbatim
    /// as static resources and stay out of it (static assets are
    /// watched through the public tree instead).
    pub(crate) fn add_file(
        self: &Rc<Self>,
        info: &Rc<BundlingInfo>,
        path: &str,
        environment: Environment,
    ) -> Result<()> {
        let added = info
            .files
            .borrow_mut()
            .entry(environment)
            .or_default()
            .insert(path.to_string());
        if !added {
            return Ok(());
        }

        let extension = std::path::Path::new(path)
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = info.package.source_root().join(path);
        let serve = serve_path(info.package.serve_root(), path);

        match self.find_handler(info, &extension)? {
            None => {
                let data = fs::read(&source).with_context(|| {
                    format!("unable to read {}", source.display())
                })?;
                self.add_resource(Resource {
                    kind: ResourceKind::Static,
                    environments: vec![environment],
                    path: Some(serve),
                    data: Some(data),
                    source_file: None,
                })?;
            }
            Some((owner, handler)) => {
                let api = ResourceApi {
                    bundle: Rc::clone(self),
                };
                let table = api.to_lua(self.registry.lua())?;
                handler
                    .call::<()>((
                        table,
                        source.to_string_lossy().into_owned(),
                        serve,
                        environment.as_str(),
                    ))
                    .map_err(lua_error)
                    .with_context(|| {
                        format!(
                            ".{} handler from {} failed on {}",
                            extension, owner, path
                        )
                    })?;
                info.dependencies.borrow_mut().insert(path.to_string());
            }
        }
        Ok(())
    }

    // Candidates are the package's own registration plus those of the
    // packages it uses directly; transitive handlers are out of scope.
    fn find_handler(
        &self,
        info: &Rc<BundlingInfo>,
        extension: &str,
    ) -> Result<Option<(String, Function)>> {
        let mut candidates: Vec<(String, Function)> = Vec::new();
        if let Some(handler) = info.package.extension(extension) {
            candidates
                .push((info.package.display_name().to_string(), handler));
        }
        for child in info.using.borrow().values() {
            if let Some(handler) = child.package.extension(extension) {
                candidates.push((
                    child.package.display_name().to_string(),
                    handler,
                ));
            }
        }
        if candidates.len() > 1 {
            let owners: Vec<String> =
                candidates.iter().map(|(owner, _)| owner.clone()).collect();
            bail!(
                "extension .{} is claimed by more than one package: {}",
                extension,
                owners.join(", ")
            );
        }
        Ok(candidates.pop())
    }

    /// Accept a resource emitted by a handler.
    pub(crate) fn add_resource(&self, resource: Resource) -> Result<()> {
        let Resource {
            kind,
            environments,
            path,
            data,
            source_file,
        } = resource;
        if environments.is_empty() {
            bail!("{} resource has no target environment", kind);
        }
        let bytes = match (data, source_file) {
            (Some(data), _) => data,
            (None, Some(file)) => fs::read(&file).with_context(|| {
                format!("unable to read {}", file.display())
            })?,
            (None, None) => {
                bail!("{} resource needs data or a source_file", kind)
            }
        };

        match kind {
            ResourceKind::Js => {
                let path = path.with_context(|| {
                    format!("{} resource requires a path", kind)
                })?;
                for environment in &environments {
                    match environment {
                        Environment::Client => {
                            self.client_files
                                .borrow_mut()
                                .insert(path.clone(), bytes.clone());
                            self.js_client.borrow_mut().push(path.clone());
                        }
                        Environment::Server => {
                            self.server_files
                                .borrow_mut()
                                .insert(path.clone(), bytes.clone());
                        }
                        Environment::Tests => bail!(
                            "js resources may not target the {} environment",
                            environment
                        ),
                    }
                }
            }
            ResourceKind::Css => {
                let path = path.with_context(|| {
                    format!("{} resource requires a path", kind)
                })?;
                for environment in &environments {
                    // Stylesheets only exist on the client; a server
                    // tree containing .css files is not an error.
                    if *environment == Environment::Client {
                        self.client_files
                            .borrow_mut()
                            .insert(path.clone(), bytes.clone());
                        self.css.borrow_mut().push(path.clone());
                    }
                }
            }
            ResourceKind::Head | ResourceKind::Body => {
                for environment in &environments {
                    if *environment != Environment::Client {
                        bail!(
                            "{} fragments may only target the client",
                            kind
                        );
                    }
                    let fragment =
                        String::from_utf8_lossy(&bytes).into_owned();
                    match kind {
                        ResourceKind::Head => {
                            self.head.borrow_mut().push(fragment)
                        }
                        _ => self.body.borrow_mut().push(fragment),
                    }
                }
            }
            ResourceKind::Static => {
                let path = path.with_context(|| {
                    format!("{} resource requires a path", kind)
                })?;
                for environment in &environments {
                    match environment {
                        Environment::Client => {
                            self.client_files
                                .borrow_mut()
                                .insert(path.clone(), bytes.clone());
                        }
                        Environment::Server => {
                            self.server_files
                                .borrow_mut()
                                .insert(path.clone(), bytes.clone());
                        }
                        Environment::Tests => bail!(
                            "static resources may not target the {} environment",
                            environment
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a diagnostic; bundling continues.
    pub(crate) fn report_error(&self, message: String) {
        log::warn!("{}", message);
        self.errors.borrow_mut().push(message);
    }

    /// Concatenate and minify the client assets, replacing them with
    /// one content-addressed file per type. Server code is left alone.
    pub(crate) fn minify(&self, minifier: &dyn Minifier) -> Result<()> {
        let paths = std::mem::take(&mut *self.js_client.borrow_mut());
        let concatenated = self.concatenate(&paths, "\n;\n")?;
        let minified = minifier.minify_js(&concatenated)?;
        self.add_content_addressed(
            ResourceKind::Js,
            "js",
            minified.into_bytes(),
        );

        let paths = std::mem::take(&mut *self.css.borrow_mut());
        let concatenated = self.concatenate(&paths, "\n")?;
        let minified = minifier.minify_css(&concatenated)?;
        self.add_content_addressed(
            ResourceKind::Css,
            "css",
            minified.into_bytes(),
        );
        Ok(())
    }

    fn concatenate(
        &self,
        paths: &[String],
        separator: &str,
    ) -> Result<String> {
        let mut pieces = Vec::new();
        let mut files = self.client_files.borrow_mut();
        for path in paths {
            if let Some(bytes) = files.shift_remove(path) {
                let source = String::from_utf8(bytes).map_err(|_| {
                    anyhow::anyhow!(
                        "client asset {} is not valid UTF-8",
                        path
                    )
                })?;
                pieces.push(source);
            }
        }
        Ok(pieces.join(separator))
    }

    fn add_content_addressed(
        &self,
        kind: ResourceKind,
        extension: &str,
        bytes: Vec<u8>,
    ) {
        let hash = sha1_hex(&bytes);
        let serve = format!("/{}.{}", hash, extension);
        self.manifest.borrow_mut().push(ManifestEntry {
            path: format!("static_cacheable{}", serve),
            scope: Environment::Client.as_str().to_string(),
            kind,
            cacheable: true,
            url: serve.clone(),
            size: bytes.len() as u64,
            hash,
        });
        self.client_cacheable_files
            .borrow_mut()
            .insert(serve, bytes);
    }

    /// The diagnostics accumulated so far.
    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

// Join a package's serve root with a package-relative path, always with
// forward slashes.
fn serve_path(root: &str, rel: &str) -> String {
    let rel = rel.replace('\\', "/");
    if root.ends_with('/') {
        format!("{}{}", root, rel)
    } else {
        format!("{}/{}", root, rel)
    }
}
