#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use bindery::{BundlerConfig, Passthrough};

/// A scratch project: an application directory, a package set, a cache
/// and a stub runtime server, all inside one temporary directory.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let fixture = Fixture { dir };
        // The runtime server directory ships with every bundle.
        fixture.write("runtime/server.js", "// runtime entry\n")?;
        fixture.write("runtime/.bundle_version.txt", "0.0.0\n")?;
        fs::create_dir_all(fixture.packages_dir())?;
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root().join("app")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root().join("packages")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("bundle")
    }

    /// A config rooted in the fixture with no implicit packages and a
    /// passthrough minifier.
    pub fn config(&self) -> BundlerConfig {
        BundlerConfig {
            package_sets: vec![self.packages_dir()],
            cache_dir: self.root().join("cache"),
            origin: "http://127.0.0.1:1".to_string(),
            runtime_dir: self.root().join("runtime"),
            default_packages: Vec::new(),
            minifier: Box::new(Passthrough),
        }
    }

    /// Write a file relative to the fixture root, creating parents.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Create the application directory declaring the given packages.
    pub fn create_app(&self, packages: &[&str]) -> Result<PathBuf> {
        let mut listing = String::new();
        for name in packages {
            listing.push_str(name);
            listing.push('\n');
        }
        self.write("app/.meteor/packages", &listing)?;
        Ok(self.app_dir())
    }

    /// Create a package in the package set from its declaration script.
    pub fn create_package(&self, name: &str, package_js: &str) -> Result<PathBuf> {
        self.write(&format!("packages/{}/package.js", name), package_js)?;
        Ok(self.packages_dir().join(name))
    }
}

/// A declaration script registering a plain javascript handler, the
/// way the core framework package does.
pub const JS_HANDLER_PACKAGE: &str = r#"
Package.describe({ summary = "javascript sources" })
Package.register_extension("js", function (bundle, source_path, serve_path, where)
  bundle.add_resource({
    type = "js",
    source_file = source_path,
    path = serve_path,
    where = where,
  })
end)
"#;

/// A declaration script registering a stylesheet handler.
pub const CSS_HANDLER_PACKAGE: &str = r#"
Package.describe({ summary = "stylesheets" })
Package.register_extension("css", function (bundle, source_path, serve_path, where)
  bundle.add_resource({
    type = "css",
    source_file = source_path,
    path = serve_path,
    where = where,
  })
end)
"#;

pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut content = std::fs::read_to_string(path)?;
    if cfg!(target_os = "windows") {
        content = content.replace("\r\n", "\n");
    }
    Ok(content)
}
