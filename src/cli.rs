//! Command line parsing exposed via the library.
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use structopt::StructOpt;

use crate::bundler::{bundle, BundleOptions};
use crate::config::BundlerConfig;
use crate::fsutil;
use crate::package::APP_PACKAGES_FILE;
use crate::registry::Registry;
use crate::types::NodeModulesMode;

#[derive(StructOpt)]
#[structopt(about = "Application bundler")]
enum BinderyCommands {
    /// Bundle an application into a runnable directory tree
    Bundle {
        /// Where to write the bundle
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,

        /// How to install native modules: skip, symlink or copy
        #[structopt(long, default_value = "symlink")]
        node_modules: NodeModulesMode,

        /// Leave client assets unminified
        #[structopt(long)]
        no_minify: bool,

        /// Also include the tests of these packages
        #[structopt(long)]
        test_packages: Vec<String>,

        /// Resolve package versions against this release
        #[structopt(long)]
        release: Option<String>,

        /// Application directory; discovered from the working
        /// directory when omitted
        #[structopt(parse(from_os_str))]
        app_dir: Option<PathBuf>,
    },

    /// List every known package
    List,

    /// Download a release manifest and its missing packages into the
    /// cache
    Populate {
        /// The release version to populate for
        release: String,
    },
}

/// Parse the given arguments list or `std::env::os_args` and run the
/// program.
pub fn run<T>(argv: Option<Vec<T>>) -> Result<()>
where
    T: Into<OsString> + Clone,
{
    if env::var("RUST_LOG").ok().is_none() {
        env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let app = BinderyCommands::clap();
    let matches = if let Some(argv) = argv {
        app.get_matches_from(argv)
    } else {
        app.get_matches()
    };
    let args = BinderyCommands::from_clap(&matches);
    let config = BundlerConfig::from_env()?;
    match args {
        BinderyCommands::Bundle {
            output,
            node_modules,
            no_minify,
            test_packages,
            release,
            app_dir,
        } => {
            let app_dir = match app_dir {
                Some(dir) => dir,
                None => discover_app_dir()?,
            };
            // Bundles written inside the project should not end up in
            // version control.
            if output.parent() == Some(app_dir.as_path()) {
                if let Some(name) = output.file_name() {
                    fsutil::add_to_gitignore(
                        &app_dir,
                        &name.to_string_lossy(),
                    )?;
                }
            }
            let options = BundleOptions {
                node_modules_mode: node_modules,
                no_minify,
                test_packages,
                version_override: release,
            };
            let errors = bundle(&config, &app_dir, &output, &options);
            if !errors.is_empty() {
                for error in &errors {
                    eprintln!("{}", error);
                }
                bail!("bundling failed with {} error(s)", errors.len());
            }
        }
        BinderyCommands::List => {
            let registry = Registry::new(
                config.package_sets.clone(),
                config.cache_dir.clone(),
            );
            for name in registry.list()? {
                println!("{}", name);
            }
        }
        BinderyCommands::Populate { release } => {
            crate::fetcher::populate_cache(
                &config.cache_dir,
                &config.origin,
                &release,
            )?;
        }
    }
    Ok(())
}

fn discover_app_dir() -> Result<PathBuf> {
    let cwd = env::current_dir().context("unable to read working directory")?;
    fsutil::find_upwards(&cwd, APP_PACKAGES_FILE).with_context(|| {
        format!(
            "{} is not inside an application (no {} found)",
            cwd.display(),
            APP_PACKAGES_FILE
        )
    })
}
