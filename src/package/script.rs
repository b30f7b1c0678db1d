//! Evaluation of `package.js` declaration scripts.
//!
//! Scripts run in the embedded interpreter with two collaborators
//! injected: a `Package` handle carrying the four declaration
//! operations, and a `require` that resolves relative to the package's
//! own directory. Declarations happen by side effect; any evaluation
//! failure aborts the bundle.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use mlua::{Function, Lua, Table, Value};

use super::{Package, UseHandler, PACKAGE_FILE};

/// Flatten an interpreter error into a plain error message.
pub(crate) fn lua_error(error: mlua::Error) -> anyhow::Error {
    anyhow!("{}", error)
}

/// Evaluate the `package.js` of `dir` against `package`, exactly once.
pub(crate) fn evaluate(
    lua: &Lua,
    package: &Rc<Package>,
    dir: &Path,
) -> Result<()> {
    let path = dir.join(PACKAGE_FILE);
    let source = fs::read_to_string(&path)
        .with_context(|| format!("unable to read {}", path.display()))?;

    let declarations = declaration_table(lua, package)?;
    let require = require_function(lua, dir)?;

    // The collaborators are visible as globals for the duration of the
    // script; whatever was there before is put back afterwards.
    let globals = lua.globals();
    let previous_package: Value =
        globals.get("Package").map_err(lua_error)?;
    let previous_require: Value =
        globals.get("require").map_err(lua_error)?;
    globals.set("Package", declarations).map_err(lua_error)?;
    globals.set("require", require).map_err(lua_error)?;

    let outcome = lua
        .load(&source)
        .set_name(path.display().to_string())
        .exec();

    globals
        .set("Package", previous_package)
        .map_err(lua_error)?;
    globals
        .set("require", previous_require)
        .map_err(lua_error)?;

    outcome
        .map_err(lua_error)
        .with_context(|| format!("evaluating {}", path.display()))
}

fn declaration_table(lua: &Lua, package: &Rc<Package>) -> Result<Table> {
    let table = lua.create_table().map_err(lua_error)?;

    let handle = Rc::clone(package);
    let describe = lua
        .create_function(move |_, spec: Table| {
            handle
                .describe_from_table(&spec)
                .map_err(mlua::Error::external)
        })
        .map_err(lua_error)?;
    table.set("describe", describe).map_err(lua_error)?;

    let handle = Rc::clone(package);
    let on_use = lua
        .create_function(move |_, handler: Function| {
            handle
                .set_on_use(UseHandler::Script(handler))
                .map_err(mlua::Error::external)
        })
        .map_err(lua_error)?;
    table.set("on_use", on_use).map_err(lua_error)?;

    let handle = Rc::clone(package);
    let on_test = lua
        .create_function(move |_, handler: Function| {
            handle
                .set_on_test(UseHandler::Script(handler))
                .map_err(mlua::Error::external)
        })
        .map_err(lua_error)?;
    table.set("on_test", on_test).map_err(lua_error)?;

    let handle = Rc::clone(package);
    let register_extension = lua
        .create_function(move |_, (ext, handler): (String, Function)| {
            handle
                .register_extension(&ext, handler)
                .map_err(mlua::Error::external)
        })
        .map_err(lua_error)?;
    table
        .set("register_extension", register_extension)
        .map_err(lua_error)?;

    Ok(table)
}

fn require_function(lua: &Lua, dir: &Path) -> Result<Function> {
    let dir = dir.to_path_buf();
    lua.create_function(move |lua, name: String| {
        let mut path = dir.join(&name);
        if !path.is_file() && path.extension().is_none() {
            path = path.with_extension("lua");
        }
        let source = fs::read_to_string(&path).map_err(|error| {
            mlua::Error::external(anyhow!(
                "require {}: {}",
                path.display(),
                error
            ))
        })?;
        lua.load(&source)
            .set_name(path.display().to_string())
            .eval::<Value>()
    })
    .map_err(lua_error)
}
