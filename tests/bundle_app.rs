mod common;

use anyhow::Result;

use bindery::types::{sha1_hex, AppJson, DependenciesJson, ResourceKind};
use bindery::{bundle, BundleOptions, Minifier, NodeModulesMode};

use common::Fixture;

fn options() -> BundleOptions {
    BundleOptions::new(NodeModulesMode::Skip)
}

#[test]
fn empty_app_bundles_its_entry_point() -> Result<()> {
    let fixture = Fixture::new()?;
    let app = fixture.create_app(&[])?;
    fixture.write("app/main.js", "// entry\n")?;

    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &options());
    assert_eq!(errors, Vec::<String>::new());

    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(output.join("app/main.js"))?,
        "// entry\n"
    );
    assert!(output.join("static/main.js").is_file());
    assert!(output.join("server/server.js").is_file());
    assert!(output.join("server/.bundle_version.txt").is_file());
    assert!(output.join("main.js").is_file());
    assert!(output.join("README").is_file());
    assert!(output.join("app.html").is_file());
    assert!(output.join("unsupported.html").is_file());

    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    assert_eq!(app_json.load, vec!["app/main.js".to_string()]);

    // With nothing to minify, the stage still emits one empty
    // content-addressed stub per asset type.
    let empty_hash = sha1_hex(b"");
    assert_eq!(app_json.manifest.len(), 2);
    let js = &app_json.manifest[0];
    assert_eq!(js.kind, ResourceKind::Js);
    assert!(js.cacheable);
    assert_eq!(js.url, format!("/{}.js", empty_hash));
    assert_eq!(js.hash, empty_hash);
    let css = &app_json.manifest[1];
    assert_eq!(css.kind, ResourceKind::Css);
    assert_eq!(css.url, format!("/{}.css", empty_hash));
    Ok(())
}

#[test]
fn app_sources_route_by_directory_segments() -> Result<()> {
    let fixture = Fixture::new()?;
    let app = fixture.create_app(&[])?;
    for source in [
        "app/a.js",
        "app/server/b.js",
        "app/client/c.js",
        "app/tests/d.js",
        "app/lib/e.js",
        "app/server/tests/f.js",
    ] {
        fixture.write(source, "//\n")?;
    }

    let mut opts = options();
    opts.no_minify = true;
    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &opts);
    assert_eq!(errors, Vec::<String>::new());

    let output = fixture.output_dir();
    // client tree
    assert!(output.join("static/a.js").is_file());
    assert!(output.join("static/client/c.js").is_file());
    assert!(output.join("static/lib/e.js").is_file());
    assert!(!output.join("static/server/b.js").exists());
    assert!(!output.join("static/tests/d.js").exists());
    // server tree, in load order
    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    assert_eq!(
        app_json.load,
        vec![
            "app/lib/e.js".to_string(),
            "app/server/b.js".to_string(),
            "app/a.js".to_string(),
        ]
    );
    assert!(!output.join("app/client/c.js").exists());
    assert!(!output.join("app/tests/d.js").exists());
    assert!(!output.join("app/server/tests/f.js").exists());
    assert!(app_json.manifest.is_empty());
    Ok(())
}

#[test]
fn package_static_asset_stays_out_of_dependencies() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package(
        "assets",
        r#"
Package.on_use(function (api, where)
  api.add_files({ "foo.txt" }, { "client" })
end)
"#,
    )?;
    fixture.write("packages/assets/foo.txt", "hello")?;
    let app = fixture.create_app(&["assets"])?;

    let mut opts = options();
    opts.no_minify = true;
    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &opts);
    assert_eq!(errors, Vec::<String>::new());

    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(
            output.join("static/packages/assets/foo.txt")
        )?,
        "hello"
    );

    let dependencies: DependenciesJson = serde_json::from_str(
        &common::read_to_string(output.join("dependencies.json"))?,
    )?;
    assert_eq!(
        dependencies.packages.get("assets"),
        Some(&vec!["package.js".to_string()])
    );
    Ok(())
}

#[test]
fn unminified_stylesheets_get_cache_busting_urls() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package(
        "style",
        r#"
Package.describe({ summary = "stylesheets" })
Package.register_extension("css", function (bundle, source_path, serve_path, where)
  bundle.add_resource({
    type = "css",
    source_file = source_path,
    path = serve_path,
    where = where,
  })
end)
Package.on_use(function (api, where)
  api.add_files("x.css", where)
end)
"#,
    )?;
    fixture.write("packages/style/x.css", "body{}")?;
    let app = fixture.create_app(&["style"])?;

    let mut opts = options();
    opts.no_minify = true;
    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &opts);
    assert_eq!(errors, Vec::<String>::new());

    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(
            output.join("static_cacheable/packages/style/x.css")
        )?,
        "body{}"
    );

    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    let entry = app_json
        .manifest
        .iter()
        .find(|entry| entry.kind == ResourceKind::Css)
        .expect("stylesheet manifest entry");
    let hash = sha1_hex(b"body{}");
    assert_eq!(entry.url, format!("/packages/style/x.css?{}", hash));
    assert_eq!(entry.path, "static_cacheable/packages/style/x.css");
    assert_eq!(entry.hash, hash);
    assert_eq!(entry.size, 6);
    assert!(entry.cacheable);
    assert_eq!(entry.scope, "client");

    // Declaring the stylesheet ran its handler, so it joins the
    // package's dependency set.
    let dependencies: DependenciesJson = serde_json::from_str(
        &common::read_to_string(output.join("dependencies.json"))?,
    )?;
    assert_eq!(
        dependencies.packages.get("style"),
        Some(&vec!["package.js".to_string(), "x.css".to_string()])
    );

    // No path or URL ever carries a backslash.
    for entry in &app_json.manifest {
        assert!(!entry.path.contains('\\'));
        assert!(!entry.url.contains('\\'));
    }
    Ok(())
}

#[test]
fn minification_replaces_client_assets_with_one_addressed_file(
) -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package("scripts", common::JS_HANDLER_PACKAGE)?;
    let app = fixture.create_app(&["scripts"])?;
    fixture.write("app/a.js", "alpha();")?;
    fixture.write("app/b.js", "beta();")?;

    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &options());
    assert_eq!(errors, Vec::<String>::new());

    let concatenated = "alpha();\n;\nbeta();";
    let hash = sha1_hex(concatenated.as_bytes());
    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(
            output.join(format!("static_cacheable/{}.js", hash))
        )?,
        concatenated
    );
    assert!(!output.join("static/a.js").exists());
    assert!(!output.join("static/b.js").exists());

    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    let js_entries: Vec<_> = app_json
        .manifest
        .iter()
        .filter(|entry| entry.kind == ResourceKind::Js)
        .collect();
    assert_eq!(js_entries.len(), 1);
    assert_eq!(js_entries[0].url, format!("/{}.js", hash));

    // Server code is never minified.
    assert_eq!(common::read_to_string(output.join("app/a.js"))?, "alpha();");
    assert_eq!(
        app_json.load,
        vec!["app/a.js".to_string(), "app/b.js".to_string()]
    );
    Ok(())
}

// Stands in for an external minifier: squeezes the newlines out of
// javascript and trims stylesheets.
struct StripNewlines;

impl Minifier for StripNewlines {
    fn minify_js(&self, source: &str) -> Result<String> {
        Ok(source.lines().collect::<Vec<_>>().join(""))
    }

    fn minify_css(&self, source: &str) -> Result<String> {
        Ok(source.trim().to_string())
    }
}

#[test]
fn configured_minifier_rewrites_client_javascript() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package("scripts", common::JS_HANDLER_PACKAGE)?;
    let app = fixture.create_app(&["scripts"])?;
    fixture.write("app/a.js", "alpha();")?;
    fixture.write("app/b.js", "beta();")?;

    let config = fixture.config().with_minifier(Box::new(StripNewlines));
    let errors = bundle(&config, &app, &fixture.output_dir(), &options());
    assert_eq!(errors, Vec::<String>::new());

    // "alpha();\n;\nbeta();" with the separator newlines squeezed out
    let minified = "alpha();;beta();";
    let hash = sha1_hex(minified.as_bytes());
    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(
            output.join(format!("static_cacheable/{}.js", hash))
        )?,
        minified
    );

    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    let entry = app_json
        .manifest
        .iter()
        .find(|entry| entry.kind == ResourceKind::Js)
        .expect("javascript manifest entry");
    assert_eq!(entry.url, format!("/{}.js", hash));
    assert_eq!(entry.hash, hash);

    // The minifier never touches server code.
    assert_eq!(common::read_to_string(output.join("app/a.js"))?, "alpha();");
    Ok(())
}

#[test]
fn duplicate_on_use_registration_is_fatal() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package(
        "twice",
        r#"
Package.on_use(function (api, where) end)
Package.on_use(function (api, where) end)
"#,
    )?;
    let app = fixture.create_app(&["twice"])?;

    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &options());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Exception while bundling application:"));
    assert!(errors[0].contains("on_use"));
    Ok(())
}

#[test]
fn conflicting_extension_handlers_are_fatal() -> Result<()> {
    let fixture = Fixture::new()?;
    let register = r#"
Package.register_extension("coffee", function (bundle, source_path, serve_path, where)
  bundle.add_resource({ type = "js", source_file = source_path, path = serve_path, where = where })
end)
"#;
    fixture.create_package("cone", register)?;
    fixture.create_package("ctwo", register)?;
    let app = fixture.create_app(&["cone", "ctwo"])?;
    fixture.write("app/brew.coffee", "brew ->")?;

    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &options());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("claimed by more than one package"));
    Ok(())
}

#[test]
fn use_is_idempotent_per_environment_set() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package(
        "inner",
        r#"
Package.on_use(function (api, where)
  api.error("inner configured")
end)
"#,
    )?;
    fixture.create_package(
        "outer",
        r#"
Package.on_use(function (api, where)
  api.use("inner", "client")
  api.use("inner", { "client" })
  api.use("inner", "server")
end)
"#,
    )?;
    let app = fixture.create_app(&["outer"])?;

    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &options());
    // Once for the client set, once for the server set; the repeated
    // client use is a no-op.
    assert_eq!(
        errors,
        vec!["inner configured".to_string(), "inner configured".to_string()]
    );
    // Accumulated handler errors do not stop the bundle being written.
    assert!(fixture.output_dir().join("app.json").is_file());
    Ok(())
}

#[test]
fn test_inclusion_is_idempotent_per_package() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.create_package(
        "tested",
        r#"
Package.on_use(function (api, where) end)
Package.on_test(function (api, where)
  api.error("tests configured")
end)
"#,
    )?;
    let app = fixture.create_app(&[])?;

    let mut opts = options();
    opts.test_packages =
        vec!["tested".to_string(), "tested".to_string()];
    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &opts);
    assert_eq!(errors, vec!["tests configured".to_string()]);
    Ok(())
}

#[test]
fn public_assets_are_copied_with_manifest_entries() -> Result<()> {
    let fixture = Fixture::new()?;
    let app = fixture.create_app(&[])?;
    fixture.write("app/public/logo.svg", "<svg/>")?;
    fixture.write("app/public/media/clip.txt", "clip")?;

    let mut opts = options();
    opts.no_minify = true;
    let errors =
        bundle(&fixture.config(), &app, &fixture.output_dir(), &opts);
    assert_eq!(errors, Vec::<String>::new());

    let output = fixture.output_dir();
    assert_eq!(
        common::read_to_string(output.join("static/logo.svg"))?,
        "<svg/>"
    );

    let app_json: AppJson = serde_json::from_str(&common::read_to_string(
        output.join("app.json"),
    )?)?;
    let mut urls: Vec<String> = app_json
        .manifest
        .iter()
        .map(|entry| entry.url.clone())
        .collect();
    urls.sort();
    assert_eq!(urls, vec!["/logo.svg", "/media/clip.txt"]);
    for entry in &app_json.manifest {
        assert_eq!(entry.kind, ResourceKind::Static);
        assert!(!entry.cacheable);
        assert_eq!(entry.path, format!("static{}", entry.url));
    }
    Ok(())
}
