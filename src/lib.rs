//! Application bundler for a package-based web framework.
//!
//! Given a project directory, the bundler resolves the project's
//! package graph, scans source trees, runs per-extension handlers,
//! concatenates and optionally minifies client assets, produces a
//! content-addressed static manifest and lays out a self-contained,
//! runnable directory tree.
#![deny(missing_docs)]

pub mod bundler;
pub mod cli;
pub mod config;
pub mod fetcher;
pub mod files;
pub mod fsutil;
pub mod minify;
pub mod package;
pub mod registry;
pub mod types;

pub use bundler::{bundle, BundleOptions};
pub use config::BundlerConfig;
pub use minify::{Minifier, Passthrough};
pub use registry::Registry;
pub use types::{Environment, NodeModulesMode};
