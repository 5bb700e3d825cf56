#![allow(clippy::module_name_repetitions)]
//! Build/execution engine seam.
//!
//! The pipeline only talks to an engine through [`Engine`]; [`DockerCli`] is the
//! production implementation and [`testing::ScriptedEngine`] an in-memory one.

mod docker;
mod runtime;
pub mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::time::Duration;

use serde::Deserialize;

use crate::introspect::ImageConfig;

pub use docker::DockerCli;
pub use runtime::{container_runtime_path, curl_path, Endpoint, TlsFiles};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The runtime binary (docker/curl) could not be started.
    #[error("{0}")]
    Runtime(#[source] io::Error),

    /// The engine rejected or failed the operation.
    #[error("{op} failed{}: {message}", exit_suffix(.status))]
    Command {
        op: String,
        status: Option<i32>,
        message: String,
    },

    #[error("engine call timed out")]
    TimedOut,

    #[error("cannot decode {op} response: {source}")]
    Decode {
        op: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported engine endpoint: {0}")]
    Endpoint(String),

    #[error("reading build output: {0}")]
    Stream(#[source] io::Error),
}

fn exit_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit {code})"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn command(op: impl Into<String>, status: Option<i32>, message: impl Into<String>) -> Self {
        EngineError::Command {
            op: op.into(),
            status,
            message: message.into(),
        }
    }

    pub fn is_runtime_missing(&self) -> bool {
        matches!(self, EngineError::Runtime(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Registry credentials used for pulls.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Manifest path relative to the context root.
    pub dockerfile: String,
    pub tags: Vec<String>,
    pub no_cache: bool,
    /// Remove intermediate containers after a build.
    pub remove: bool,
    pub build_args: BTreeMap<String, String>,
    /// Upper bound the transport may enforce on its own; the orchestrator enforces it too.
    pub timeout: Duration,
}

/// Progress records of a running build, one raw record per call.
pub trait BuildStream {
    /// Wait at most `wait` for the next record; `Ok(None)` once the build finished cleanly.
    fn next_record(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, EngineError>;

    /// Abort the build; further calls return `Ok(None)`.
    fn cancel(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub user: String,
    pub tty: bool,
    pub open_stdin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub user: String,
    pub cmd: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
}

/// Engine-side handle of a created exec instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    pub id: String,
    pub container: ContainerId,
    pub spec: ExecSpec,
}

/// Capabilities the derive pipeline consumes from a build/execution engine.
pub trait Engine {
    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), EngineError>;

    /// Submit a build; `context` is an opened tar archive of the build context.
    fn build_image(
        &self,
        context: File,
        options: &BuildOptions,
    ) -> Result<Box<dyn BuildStream>, EngineError>;

    fn inspect_image(&self, image: &str) -> Result<ImageConfig, EngineError>;

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError>;

    fn start_container(&self, id: &ContainerId) -> Result<(), EngineError>;

    fn exec_create(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecHandle, EngineError>;

    fn exec_start(&self, exec: &ExecHandle, detach: bool) -> Result<(), EngineError>;

    fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<(), EngineError>;

    fn remove_container(&self, id: &ContainerId) -> Result<(), EngineError>;

    fn remove_image(&self, image: &str) -> Result<(), EngineError>;
}
