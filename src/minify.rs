//! Interface to the external minifiers.

use anyhow::Result;

/// Shrinks concatenated client assets before they are content-addressed.
///
/// Implementations wrap whatever external tool the deployment uses; the
/// bundler only relies on string in, string out. Javascript minifiers
/// must keep `debugger` statements intact so bundled code stays
/// debuggable in production.
pub trait Minifier {
    /// Minify a concatenated javascript source.
    fn minify_js(&self, source: &str) -> Result<String>;

    /// Minify a concatenated stylesheet.
    fn minify_css(&self, source: &str) -> Result<String>;
}

/// A minifier that passes sources through unchanged.
///
/// Concatenation, content addressing and the manifest entries behave
/// exactly as with a real minifier, which keeps the pipeline uniform
/// when no external tool is wired in.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Minifier for Passthrough {
    fn minify_js(&self, source: &str) -> Result<String> {
        Ok(source.to_string())
    }

    fn minify_css(&self, source: &str) -> Result<String> {
        Ok(source.to_string())
    }
}
