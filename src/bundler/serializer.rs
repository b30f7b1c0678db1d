//! Serialize a finished bundle into a runnable directory tree.
//!
//! The tree is assembled in a scratch directory next to the output path
//! and swapped into place with a rename at the very end, so a crash
//! mid-write never leaves a half-finished bundle where the runtime
//! expects a complete one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::bundler::builder::Bundle;
use crate::config::BundlerConfig;
use crate::files::{self, IGNORE_SOURCES, PUBLIC_DIR};
use crate::fsutil::{self, CopyOptions};
use crate::package::{is_app_dir, Package};
use crate::types::{
    sha1_hex, AppJson, DependenciesJson, Environment, ManifestEntry,
    NodeModulesMode, ResourceKind,
};

const APP_HTML_TEMPLATE: &str = include_str!("../../assets/app.html.in");
const UNSUPPORTED_HTML: &str = include_str!("../../assets/unsupported.html");

const MAIN_JS: &str = "require(\"./server/server.js\");\n";

const README: &str = "\
This directory is a self-contained application bundle. To run it,
install the runtime dependencies under server/ if they were not bundled
in, then:

  node main.js

The HTTP port and database address are taken from the PORT and DB_URL
environment variables.
";

const VERSION_STAMP: &str = ".bundle_version.txt";

/// Lay the bundle out under `output`, atomically replacing whatever was
/// there before. On failure the scratch `.build.<name>` directory is
/// left in place so dependency information can still be inspected.
pub(crate) fn write_to_directory(
    bundle: &Bundle,
    app: &Package,
    output: &Path,
    project_dir: &Path,
    config: &BundlerConfig,
    mode: NodeModulesMode,
) -> Result<()> {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| {
            format!("output path has no basename: {}", output.display())
        })?;
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.to_path_buf()
        }
        _ => PathBuf::from("."),
    };
    let build_dir = parent.join(format!(".build.{}", name));
    log::info!("writing bundle to {}", output.display());
    fsutil::remove_tree(&build_dir)?;
    fsutil::mkdir_p(&build_dir)?;
    for tree in ["static", "static_cacheable", "app"] {
        fsutil::mkdir_p(&build_dir.join(tree))?;
    }

    let mut dependencies = DependenciesJson {
        exclude: IGNORE_SOURCES.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };

    // The runtime server ships with every bundle; its native modules
    // are handled separately below so the mode applies to them too.
    let mut runtime_ignore: Vec<Regex> = files::default_ignores().to_vec();
    runtime_ignore.push(
        Regex::new("^node_modules$").context("invalid ignore pattern")?,
    );
    fsutil::copy_tree(
        &config.runtime_dir,
        &build_dir.join("server"),
        &CopyOptions {
            ignore: &runtime_ignore,
            ..CopyOptions::default()
        },
    )?;
    dependencies.core.push("server".to_string());

    let runtime_modules = config.runtime_dir.join("node_modules");
    if runtime_modules.is_dir() {
        install_node_modules(
            &runtime_modules,
            &build_dir.join("server/node_modules"),
            mode,
        )?;
    }

    let stamp = config.runtime_dir.join(VERSION_STAMP);
    if stamp.is_file() {
        fs::copy(&stamp, build_dir.join("server").join(VERSION_STAMP))
            .with_context(|| {
                format!("unable to copy {}", stamp.display())
            })?;
    }

    let mut manifest: Vec<ManifestEntry> = bundle.manifest.borrow().clone();

    // The project's public tree is served as-is, never cacheable.
    if is_app_dir(project_dir) {
        let public = project_dir.join(PUBLIC_DIR);
        if public.is_dir() {
            copy_public_assets(&public, &build_dir, &mut manifest)?;
        }
    }

    // Client assets that survived to this point were not minified out;
    // they keep their own paths and get cache-busting query URLs.
    {
        let js_paths = std::mem::take(&mut *bundle.js_client.borrow_mut());
        let css_paths = std::mem::take(&mut *bundle.css.borrow_mut());
        let mut client = bundle.client_files.borrow_mut();
        let mut cacheable = bundle.client_cacheable_files.borrow_mut();
        for (kind, paths) in
            [(ResourceKind::Js, js_paths), (ResourceKind::Css, css_paths)]
        {
            for serve in paths {
                let bytes = match client.shift_remove(&serve) {
                    Some(bytes) => bytes,
                    None => continue,
                };
                let normalized = serve.replace('\\', "/");
                let hash = sha1_hex(&bytes);
                manifest.push(ManifestEntry {
                    path: format!("static_cacheable{}", normalized),
                    scope: Environment::Client.as_str().to_string(),
                    kind,
                    cacheable: true,
                    url: format!("{}?{}", normalized, hash),
                    size: bytes.len() as u64,
                    hash,
                });
                cacheable.insert(serve, bytes);
            }
        }
    }

    for (serve, bytes) in bundle.client_files.borrow().iter() {
        let rel = serve.trim_start_matches('/');
        fsutil::write_file(&build_dir.join("static").join(rel), bytes)?;
    }
    for (serve, bytes) in bundle.client_cacheable_files.borrow().iter() {
        let rel = serve.trim_start_matches('/');
        fsutil::write_file(
            &build_dir.join("static_cacheable").join(rel),
            bytes,
        )?;
    }

    // Server code lands under app/ in insertion order, which is the
    // load order the runtime follows.
    let mut load = Vec::new();
    for (serve, bytes) in bundle.server_files.borrow().iter() {
        let rel = serve.trim_start_matches('/').replace('\\', "/");
        fsutil::write_file(&build_dir.join("app").join(&rel), bytes)?;
        load.push(format!("app/{}", rel));
    }

    for (target, source) in bundle.node_modules_dirs.borrow().iter() {
        install_node_modules(source, &build_dir.join(target), mode)?;
    }

    let js_urls: Vec<String> = manifest
        .iter()
        .filter(|entry| entry.kind == ResourceKind::Js)
        .map(|entry| entry.url.clone())
        .collect();
    let css_urls: Vec<String> = manifest
        .iter()
        .filter(|entry| entry.kind == ResourceKind::Css)
        .map(|entry| entry.url.clone())
        .collect();
    let html = render_app_html(
        &js_urls,
        &css_urls,
        &bundle.head.borrow().join("\n"),
        &bundle.body.borrow().join("\n"),
    );
    fsutil::write_file(&build_dir.join("app.html"), html.as_bytes())?;
    fsutil::write_file(
        &build_dir.join("unsupported.html"),
        UNSUPPORTED_HTML.as_bytes(),
    )?;
    fsutil::write_file(&build_dir.join("main.js"), MAIN_JS.as_bytes())?;
    fsutil::write_file(&build_dir.join("README"), README.as_bytes())?;

    let mut extensions: Vec<String> =
        vec!["js".to_string(), "css".to_string(), "html".to_string()];
    let mut package_dependencies: Vec<(String, Vec<String>)> = Vec::new();
    for info in bundle.infos() {
        let package = &info.package;
        for ext in package.extension_names() {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        let paths: Vec<String> =
            info.dependencies.borrow().iter().cloned().collect();
        if package.name().is_empty() {
            if package.id() == app.id() {
                dependencies.app = paths;
            }
        } else {
            package_dependencies.push((package.name().to_string(), paths));
        }
    }
    extensions.sort();
    dependencies.extensions =
        extensions.iter().map(|ext| format!(".{}", ext)).collect();
    package_dependencies.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, paths) in package_dependencies {
        dependencies.packages.insert(name, paths);
    }

    let app_json = AppJson { load, manifest };
    fsutil::write_file(
        &build_dir.join("app.json"),
        serde_json::to_string_pretty(&app_json)
            .context("unable to encode app.json")?
            .as_bytes(),
    )?;
    fsutil::write_file(
        &build_dir.join("dependencies.json"),
        serde_json::to_string(&dependencies)
            .context("unable to encode dependencies.json")?
            .as_bytes(),
    )?;

    fsutil::remove_tree(output)?;
    fs::rename(&build_dir, output).with_context(|| {
        format!("unable to move bundle into {}", output.display())
    })?;
    Ok(())
}

fn copy_public_assets(
    public: &Path,
    build_dir: &Path,
    manifest: &mut Vec<ManifestEntry>,
) -> Result<()> {
    let walker = WalkDir::new(public).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !files::is_ignored(
                &entry.file_name().to_string_lossy(),
                files::default_ignores(),
            )
    });
    for entry in walker {
        let entry = entry.with_context(|| {
            format!("unable to scan {}", public.display())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(public)
            .context("public asset is outside the public tree")?
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = fs::read(entry.path()).with_context(|| {
            format!("unable to read {}", entry.path().display())
        })?;
        fsutil::write_file(&build_dir.join("static").join(&rel), &bytes)?;
        manifest.push(ManifestEntry {
            path: format!("static/{}", rel),
            scope: Environment::Client.as_str().to_string(),
            kind: ResourceKind::Static,
            cacheable: false,
            url: format!("/{}", rel),
            size: bytes.len() as u64,
            hash: sha1_hex(&bytes),
        });
    }
    Ok(())
}

fn install_node_modules(
    source: &Path,
    target: &Path,
    mode: NodeModulesMode,
) -> Result<()> {
    match mode {
        NodeModulesMode::Skip => Ok(()),
        NodeModulesMode::Symlink => fsutil::link_dir(source, target),
        NodeModulesMode::Copy => {
            fsutil::copy_tree(source, target, &CopyOptions::default())
        }
    }
}

fn render_app_html(
    js_urls: &[String],
    css_urls: &[String],
    head: &str,
    body: &str,
) -> String {
    let css_tags: Vec<String> = css_urls
        .iter()
        .map(|url| {
            format!("    <link rel=\"stylesheet\" href=\"{}\">", url)
        })
        .collect();
    let js_tags: Vec<String> = js_urls
        .iter()
        .map(|url| {
            format!(
                "    <script type=\"text/javascript\" src=\"{}\"></script>",
                url
            )
        })
        .collect();
    APP_HTML_TEMPLATE
        .replace("{{css}}", &css_tags.join("\n"))
        .replace("{{js}}", &js_tags.join("\n"))
        .replace("{{head_extra}}", head)
        .replace("{{body_extra}}", body)
}
