mod common;

use std::rc::Rc;

use anyhow::Result;

use bindery::bundler::Bundle;
use bindery::Registry;

use common::Fixture;

#[test]
fn declarations_and_relative_require() -> Result<()> {
    let fixture = Fixture::new()?;
    let dir = fixture.create_package(
        "widgets",
        r#"
local shared = require("shared")
Package.describe({
  summary = shared.summary,
  internal = true,
  environments = { "client", "server" },
})
Package.on_use(function (api, where) end)
Package.on_test(function (api, where) end)
Package.register_extension("widget", function (bundle, source_path, serve_path, where) end)
"#,
    )?;
    fixture.write(
        "packages/widgets/shared.lua",
        r#"return { summary = "widget toolkit" }"#,
    )?;

    let registry = Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    );
    let package = registry.load_directory("widgets", &dir)?;
    let metadata = package.metadata();
    assert_eq!(metadata.summary.as_deref(), Some("widget toolkit"));
    assert!(metadata.internal);
    assert_eq!(
        metadata.environments,
        Some(vec!["client".to_string(), "server".to_string()])
    );
    assert_eq!(package.extension_names(), vec!["widget".to_string()]);
    Ok(())
}

#[test]
fn missing_declaration_script_is_fatal() -> Result<()> {
    let fixture = Fixture::new()?;
    let registry = Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    );
    let error = registry
        .load_directory("ghost", &fixture.packages_dir().join("ghost"))
        .unwrap_err();
    assert!(error.to_string().contains("unable to read"));
    Ok(())
}

#[test]
fn duplicate_extension_registration_is_fatal() -> Result<()> {
    let fixture = Fixture::new()?;
    let dir = fixture.create_package(
        "clash",
        r#"
Package.register_extension("x", function () end)
Package.register_extension("x", function () end)
"#,
    )?;
    let registry = Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    );
    let error = registry.load_directory("clash", &dir).unwrap_err();
    assert!(format!("{:?}", error).contains("registered twice"));
    Ok(())
}

#[test]
fn evaluation_errors_abort_loading() -> Result<()> {
    let fixture = Fixture::new()?;
    let dir = fixture.create_package("broken", "this is not a script(")?;
    let registry = Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    );
    let error = registry.load_directory("broken", &dir).unwrap_err();
    assert!(format!("{:?}", error).contains("evaluating"));
    Ok(())
}

#[test]
fn collection_rejects_directories_with_stray_members() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write(
        "mixed/first/package.js",
        r#"Package.on_test(function (api, where) end)"#,
    )?;
    // A subdirectory without a declaration script disqualifies the
    // whole directory.
    fixture.write("mixed/stray/notes.txt", "")?;

    let registry = Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    );
    let error = registry
        .collection(&fixture.root().join("mixed"))
        .unwrap_err();
    assert!(error.to_string().contains("not a collection"));
    Ok(())
}

#[test]
fn collection_includes_tests_of_every_member() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write(
        "bag/first/package.js",
        r#"
Package.on_test(function (api, where)
  api.error("first tests")
end)
"#,
    )?;
    fixture.write(
        "bag/second/package.js",
        r#"
Package.on_test(function (api, where)
  api.error("second tests")
end)
"#,
    )?;

    let registry = Rc::new(Registry::new(
        vec![fixture.packages_dir()],
        fixture.root().join("cache"),
    ));
    let collection = registry.collection(&fixture.root().join("bag"))?;
    let bundle = Bundle::new(Rc::clone(&registry));
    bundle.include_tests(&collection)?;
    // Including the collection twice is a no-op.
    bundle.include_tests(&collection)?;

    let mut errors = bundle.errors();
    errors.sort();
    assert_eq!(
        errors,
        vec!["first tests".to_string(), "second tests".to_string()]
    );
    Ok(())
}
