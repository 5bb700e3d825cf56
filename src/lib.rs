//! derivebox: derive a self-contained workspace image from a user build context.
//!
//! Architecture
//! - Binary glue (src/main.rs) parses the CLI, resolves settings and drives one pipeline run.
//! - `pipeline` sequences stage-1 build, introspection, synthesis, stage-2 build and validation.
//! - Everything that touches the container engine goes through the `engine::Engine` trait.
//!
//! Key modules
//! - engine: `Engine` trait, the docker CLI implementation and an in-memory scripted engine.
//! - manifest: instruction model, Dockerfile rendering, derived manifest synthesis.
//! - build: context archiving, build submission, progress streaming under a deadline.
//! - validate: throwaway sandbox run of the derived image with guaranteed teardown.
//! - config: conventions and settings (defaults, YAML file, DERIVEBOX_* environment).
//! - color.rs: color mode and paint/log wrappers (exact strings preserved).
//!
//! Environment
//! - DERIVEBOX_CONFIG: settings file path.
//! - DERIVEBOX_LOG / RUST_LOG: tracing filter.
//! - DERIVEBOX_COLOR / NO_COLOR: crate-wide color control.
//! - DOCKER_HOST, DOCKER_TLS_VERIFY, DOCKER_CERT_PATH: engine endpoint.

pub mod archive;
pub mod build;
mod color;
pub mod config;
pub mod engine;
mod errors;
pub mod introspect;
pub mod lock;
pub mod manifest;
pub mod pipeline;
pub mod telemetry;
pub mod util;
pub mod validate;

pub use build::{run_build, BuildLogLine, BuildOutput, BuildRequest, LogPolicy, ManifestSource};
pub use color::*;
pub use config::{Conventions, Settings};
pub use engine::{DockerCli, Engine, EngineError};
pub use errors::*;
pub use introspect::{introspect, ImageConfig};
pub use manifest::{synthesize, BuildManifest, EntryScript, Instruction};
pub use pipeline::{DeriveRequest, Outcome, Pipeline, Plan};
pub use telemetry::telemetry_init;
pub use validate::{validate, Sandbox};
