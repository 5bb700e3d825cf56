//! Error taxonomy for the derive pipeline and its exit-code mapping.
//!
//! - Map a missing container runtime (io::ErrorKind::NotFound) to exit code 127; all others to 1.
//! - Keep user-visible strings stable; the CLI prints `Display` verbatim.
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Engine call failed (transport, auth, not-found, non-zero exit).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A build did not finish before its deadline and was cancelled.
    #[error("build timed out after {}", fmt_duration(.0))]
    Timeout(Duration),

    /// A build progress record could not be decoded.
    #[error("malformed build output record: {line:?}: {source}")]
    MalformedLog {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The engine reported an error record while building.
    #[error("build failed: {0}")]
    BuildFailed(String),

    /// The derived image could not be started or exercised in a sandbox.
    #[error("validation failed: {0}")]
    Validation(#[source] EngineError),

    /// Local filesystem failure (archive, transient manifest, lock).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(what: &str, path: &Path, source: io::Error) -> Self {
        PipelineError::Io {
            context: format!("{what} {}", path.display()),
            source,
        }
    }

    /// True when this error came out of the validation stage rather than a build.
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }

    fn runtime_missing(&self) -> bool {
        match self {
            PipelineError::Engine(e) | PipelineError::Validation(e) => e.is_runtime_missing(),
            _ => false,
        }
    }
}

fn fmt_duration(d: &Duration) -> String {
    humantime::format_duration(*d).to_string()
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert PipelineError to exit code (parity with io::Error mapping).
pub fn exit_code_for_pipeline_error(e: &PipelineError) -> u8 {
    if e.runtime_missing() {
        return 127;
    }
    match e {
        PipelineError::Io { source, .. } => exit_code_for_io_error(source),
        _ => 1,
    }
}

/// Path-bearing helper for config loading errors.
pub fn config_read_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
}
