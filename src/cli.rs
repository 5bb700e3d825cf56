use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use derivebox::{LogPolicy, Settings};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt:   ",
    env!("DERIVEBOX_BUILD_DATE"),
    "\ntarget:  ",
    env!("DERIVEBOX_BUILD_TARGET"),
    "\nprofile: ",
    env!("DERIVEBOX_BUILD_PROFILE"),
    "\nrustc:   ",
    env!("DERIVEBOX_BUILD_RUSTC"),
);

/// Parse a `KEY=VALUE` build argument; the value may be empty.
pub(crate) fn parse_build_arg(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err("expected KEY=VALUE".to_string()),
    }
}

/// Validate a human-readable, non-zero timeout (e.g. 90s, 5m)
pub(crate) fn parse_timeout(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s.trim()).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(d)
}

#[derive(Parser, Debug)]
#[command(
    name = "derivebox",
    version,
    long_version = LONG_VERSION,
    about = "Build an image from a source tree, derive a self-contained workspace image from it, and smoke-test the result in a throwaway container.",
    after_long_help = "Examples:\n  derivebox ./my-env me/python-course\n  derivebox --timeout 10m --build-arg PY=3.12 ./my-env me/python-course\n  derivebox --print-manifest ./my-env me/python-course\n\n",
    after_help = "\n"
)]
pub(crate) struct Cli {
    /// Source tree holding the Dockerfile (and an optional WORKDIR overlay)
    #[arg(value_name = "SOURCE_DIR")]
    pub(crate) source_dir: PathBuf,

    /// Tag for the first-stage image; the derived image is tagged <registry-prefix>/<IMAGE_NAME>
    #[arg(value_name = "IMAGE_NAME")]
    pub(crate) image_name: String,

    /// Settings file (default: $DERIVEBOX_CONFIG or ~/.config/derivebox/config.yml)
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Per-build timeout, e.g. 90s or 10m (default 5m)
    #[arg(long, value_parser = parse_timeout)]
    pub(crate) timeout: Option<Duration>,

    /// Keep going when a build output record is not valid JSON
    #[arg(long = "lenient-logs")]
    pub(crate) lenient_logs: bool,

    /// Registry/namespace prefix of the derived tag (empty string for none)
    #[arg(long = "registry-prefix")]
    pub(crate) registry_prefix: Option<String>,

    /// Pull this image before the first build
    #[arg(long = "base-image")]
    pub(crate) base_image: Option<String>,

    /// Build argument for the first-stage build (repeatable)
    #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = parse_build_arg)]
    pub(crate) build_arg: Vec<(String, String)>,

    /// Build the first stage, then print the derived manifest instead of building it
    #[arg(long = "print-manifest")]
    pub(crate) print_manifest: bool,

    /// Do not run the derived image in a sandbox after building it
    #[arg(long = "skip-validate")]
    pub(crate) skip_validate: bool,

    /// Print detailed execution info
    #[arg(long)]
    pub(crate) verbose: bool,

    /// Suppress build output and hints
    #[arg(long, short = 'q')]
    pub(crate) quiet: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum)]
    pub(crate) color: Option<derivebox::ColorMode>,
}

impl Cli {
    /// Layer CLI flags over resolved settings.
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(t) = self.timeout {
            settings.build_timeout = t;
        }
        if self.lenient_logs {
            settings.log_policy = LogPolicy::Lenient;
        }
        if let Some(ref p) = self.registry_prefix {
            settings.registry_prefix = p.trim().trim_end_matches('/').to_string();
        }
        if let Some(ref b) = self.base_image {
            let b = b.trim();
            settings.base_image = (!b.is_empty()).then(|| b.to_string());
        }
    }
}
