//! Shared types for the bundling pipeline.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Where a resource runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    /// Served to and executed in the browser.
    Client,
    /// Loaded by the runtime server.
    Server,
    /// Only present when running package tests.
    Tests,
}

impl Environment {
    /// The lowercase tag used in manifests and declaration scripts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Client => "client",
            Environment::Server => "server",
            Environment::Tests => "tests",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "client" => Ok(Environment::Client),
            "server" => Ok(Environment::Server),
            "tests" => Ok(Environment::Tests),
            _ => bail!("unknown environment: {}", tag),
        }
    }
}

/// Canonical key for an environment set: the JSON array of the sorted,
/// de-duplicated tags. Two calls with the same set of environments always
/// produce the same key, which makes it usable for idempotence checks.
pub fn where_key(environments: &[Environment]) -> String {
    let mut tags: Vec<&str> =
        environments.iter().map(|e| e.as_str()).collect();
    tags.sort_unstable();
    tags.dedup();
    let quoted: Vec<String> =
        tags.iter().map(|t| format!("\"{}\"", t)).collect();
    format!("[{}]", quoted.join(","))
}

/// The kind of content a resource carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A javascript file.
    Js,
    /// A stylesheet.
    Css,
    /// An HTML fragment appended to the document head.
    Head,
    /// An HTML fragment appended to the document body.
    Body,
    /// An opaque file served as-is.
    Static,
}

impl ResourceKind {
    /// The lowercase tag used in manifests and declaration scripts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Js => "js",
            ResourceKind::Css => "css",
            ResourceKind::Head => "head",
            ResourceKind::Body => "body",
            ResourceKind::Static => "static",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "js" => Ok(ResourceKind::Js),
            "css" => Ok(ResourceKind::Css),
            "head" => Ok(ResourceKind::Head),
            "body" => Ok(ResourceKind::Body),
            "static" => Ok(ResourceKind::Static),
            _ => bail!("unknown resource type: {}", tag),
        }
    }
}

/// How `node_modules` directories are materialized in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeModulesMode {
    /// Leave native modules out of the bundle entirely.
    Skip,
    /// Symlink the source directories into the bundle.
    Symlink,
    /// Copy the source directories into the bundle.
    Copy,
}

impl FromStr for NodeModulesMode {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "skip" => Ok(NodeModulesMode::Skip),
            "symlink" => Ok(NodeModulesMode::Symlink),
            "copy" => Ok(NodeModulesMode::Copy),
            _ => bail!(
                "unknown node_modules mode: {} (expected skip, symlink or copy)",
                tag
            ),
        }
    }
}

/// One client resource in the generated manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path of the file within the bundle, forward-slash normalized.
    pub path: String,
    /// Environment the resource belongs to.
    #[serde(rename = "where")]
    pub scope: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Whether the URL may be cached forever.
    pub cacheable: bool,
    /// URL the resource is served under, with a leading slash and an
    /// optional cache-busting query.
    pub url: String,
    /// Size of the file in bytes.
    pub size: u64,
    /// SHA-1 hex digest of the file contents.
    pub hash: String,
}

/// A release manifest pinning package names to versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// The release identifier this manifest describes.
    #[serde(default)]
    pub release: String,
    /// Package name to version.
    #[serde(default)]
    pub packages: IndexMap<String, String>,
}

/// Schema of the `app.json` file written into the bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppJson {
    /// Server-side load order, paths relative to the bundle root.
    pub load: Vec<String>,
    /// Client resource manifest.
    pub manifest: Vec<ManifestEntry>,
}

/// Schema of the `dependencies.json` file written into the bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependenciesJson {
    /// Source extensions the bundle recognized, with leading dots.
    pub extensions: Vec<String>,
    /// Package name to the relative paths that should trigger a rebuild.
    pub packages: IndexMap<String, Vec<String>>,
    /// Framework directories the bundle embeds.
    pub core: Vec<String>,
    /// Application-relative paths that should trigger a rebuild.
    pub app: Vec<String>,
    /// Sources of the basename regexes that were excluded from scans.
    pub exclude: Vec<String>,
}

/// SHA-1 hex digest of a byte slice, used for content addressing and
/// cache-busting URLs.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
