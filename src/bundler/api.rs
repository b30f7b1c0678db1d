//! The API surfaces handed to package handlers.
//!
//! `on_use`/`on_test` handlers receive a [`UseApi`] scoped to their
//! package's occurrence in the bundle; extension handlers receive a
//! [`ResourceApi`] that can only emit resources and report errors. Both
//! project into interpreter tables so scripted and synthesized handlers
//! drive the same code.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use mlua::{Lua, Table, Value};

use crate::bundler::builder::{Bundle, BundlingInfo, Resource};
use crate::package::script::lua_error;
use crate::types::{Environment, ResourceKind};

/// Handle a package's `on_use`/`on_test` handler uses to declare
/// dependencies and sources.
#[derive(Clone)]
pub struct UseApi {
    pub(crate) bundle: Rc<Bundle>,
    pub(crate) info: Rc<BundlingInfo>,
    pub(crate) default_where: Vec<Environment>,
}

impl UseApi {
    /// Use the named packages, recursing into their handlers. Without
    /// an explicit environment set the handler's own applies.
    pub fn use_packages(
        &self,
        names: &[String],
        environments: Option<&[Environment]>,
    ) -> Result<()> {
        let environments = environments.unwrap_or(&self.default_where);
        for name in names {
            let package = self.bundle.registry().get(name)?;
            self.bundle.use_package(
                &package,
                environments,
                Some(&self.info),
            )?;
        }
        Ok(())
    }

    /// Declare source files, relative to the package root.
    pub fn add_files(
        &self,
        paths: &[String],
        environments: Option<&[Environment]>,
    ) -> Result<()> {
        let environments = environments.unwrap_or(&self.default_where);
        for path in paths {
            for environment in environments {
                self.bundle.add_file(&self.info, path, *environment)?;
            }
        }
        Ok(())
    }

    /// The extensions with a handler in scope for this package: its own
    /// registrations plus those of the packages it uses directly.
    pub fn registered_extensions(&self) -> Vec<String> {
        let mut names = self.info.package.extension_names();
        for child in self.info.using.borrow().values() {
            for ext in child.package.extension_names() {
                if !names.contains(&ext) {
                    names.push(ext);
                }
            }
        }
        names
    }

    /// Report a problem without aborting the bundle.
    pub fn error(&self, message: String) {
        self.bundle.report_error(message);
    }

    /// Record a package-relative path that should trigger a rebuild
    /// when it changes.
    pub(crate) fn add_dependency(&self, path: &str) {
        self.info
            .dependencies
            .borrow_mut()
            .insert(path.to_string());
    }

    /// Include the tests of the package living in `dir`.
    pub(crate) fn include_directory_tests(&self, dir: &Path) -> Result<()> {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| {
                format!("package directory has no name: {}", dir.display())
            })?;
        let package = self.bundle.registry().load_directory(&name, dir)?;
        self.bundle.include_tests(&package)
    }

    pub(crate) fn to_lua(&self, lua: &Lua) -> Result<Table> {
        let table = lua.create_table().map_err(lua_error)?;

        let api = self.clone();
        let use_packages = lua
            .create_function(
                move |_, (names, environments): (Value, Option<Value>)| {
                    let names = strings_from_value(&names)
                        .map_err(mlua::Error::external)?;
                    let environments = environments
                        .as_ref()
                        .map(environments_from_value)
                        .transpose()
                        .map_err(mlua::Error::external)?;
                    api.use_packages(&names, environments.as_deref())
                        .map_err(mlua::Error::external)
                },
            )
            .map_err(lua_error)?;
        table.set("use", use_packages).map_err(lua_error)?;

        let api = self.clone();
        let add_files = lua
            .create_function(
                move |_, (paths, environments): (Value, Option<Value>)| {
                    let paths = strings_from_value(&paths)
                        .map_err(mlua::Error::external)?;
                    let environments = environments
                        .as_ref()
                        .map(environments_from_value)
                        .transpose()
                        .map_err(mlua::Error::external)?;
                    api.add_files(&paths, environments.as_deref())
                        .map_err(mlua::Error::external)
                },
            )
            .map_err(lua_error)?;
        table.set("add_files", add_files).map_err(lua_error)?;

        let api = self.clone();
        let registered_extensions = lua
            .create_function(move |_, ()| Ok(api.registered_extensions()))
            .map_err(lua_error)?;
        table
            .set("registered_extensions", registered_extensions)
            .map_err(lua_error)?;

        let api = self.clone();
        let error = lua
            .create_function(move |_, message: String| {
                api.error(message);
                Ok(())
            })
            .map_err(lua_error)?;
        table.set("error", error).map_err(lua_error)?;

        Ok(table)
    }
}

/// Handle an extension handler uses to emit the resources it produced
/// from a source file.
#[derive(Clone)]
pub struct ResourceApi {
    pub(crate) bundle: Rc<Bundle>,
}

impl ResourceApi {
    /// Emit a resource into the bundle.
    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        self.bundle.add_resource(resource)
    }

    /// Report a problem without aborting the bundle.
    pub fn error(&self, message: String) {
        self.bundle.report_error(message);
    }

    pub(crate) fn to_lua(&self, lua: &Lua) -> Result<Table> {
        let table = lua.create_table().map_err(lua_error)?;

        let api = self.clone();
        let add_resource = lua
            .create_function(move |_, spec: Table| {
                let resource = resource_from_table(&spec)
                    .map_err(mlua::Error::external)?;
                api.add_resource(resource).map_err(mlua::Error::external)
            })
            .map_err(lua_error)?;
        table.set("add_resource", add_resource).map_err(lua_error)?;

        let api = self.clone();
        let error = lua
            .create_function(move |_, message: String| {
                api.error(message);
                Ok(())
            })
            .map_err(lua_error)?;
        table.set("error", error).map_err(lua_error)?;

        Ok(table)
    }
}

fn strings_from_value(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.to_string_lossy().into()]),
        Value::Table(t) => {
            let mut out = Vec::new();
            for item in t.clone().sequence_values::<String>() {
                out.push(item.map_err(lua_error)?);
            }
            Ok(out)
        }
        _ => bail!("expected a string or a list of strings"),
    }
}

fn environments_from_value(value: &Value) -> Result<Vec<Environment>> {
    strings_from_value(value)?
        .iter()
        .map(|tag| tag.parse::<Environment>())
        .collect()
}

fn resource_from_table(spec: &Table) -> Result<Resource> {
    let kind: Option<String> = spec.get("type").map_err(lua_error)?;
    let kind: ResourceKind =
        kind.context("resource is missing 'type'")?.parse()?;
    let environments: Value = spec.get("where").map_err(lua_error)?;
    if matches!(environments, Value::Nil) {
        bail!("resource is missing 'where'");
    }
    let environments = environments_from_value(&environments)?;
    let path: Option<String> = spec.get("path").map_err(lua_error)?;
    let data: Option<mlua::String> = spec.get("data").map_err(lua_error)?;
    let source_file: Option<String> =
        spec.get("source_file").map_err(lua_error)?;
    Ok(Resource {
        kind,
        environments,
        path,
        data: data.map(|bytes| bytes.as_bytes().to_vec()),
        source_file: source_file.map(PathBuf::from),
    })
}
