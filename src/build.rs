#![allow(clippy::module_name_repetitions)]
//! Build orchestration: archive a context, submit it, stream progress under a deadline.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::archive;
use crate::engine::{BuildOptions, Engine, EngineError};
use crate::errors::PipelineError;
use crate::manifest::BuildManifest;

/// What to do with a progress record that is not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogPolicy {
    /// Abort the build.
    #[default]
    Strict,
    /// Warn and keep the raw text as the record's stream.
    Lenient,
}

impl LogPolicy {
    pub fn from_lenient(lenient: bool) -> Self {
        if lenient {
            LogPolicy::Lenient
        } else {
            LogPolicy::Strict
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    stream: Option<String>,
    status: Option<String>,
    error: Option<String>,
    /// Body of an HTTP error response from the engine.
    message: Option<String>,
}

/// One progress record of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogLine {
    pub stream: Option<String>,
    pub error: Option<String>,
    /// The record exactly as received.
    pub raw: String,
}

impl BuildLogLine {
    pub fn parse(record: &[u8], policy: LogPolicy) -> Result<Self, PipelineError> {
        let raw = String::from_utf8_lossy(record).trim_end().to_string();
        match serde_json::from_str::<RawRecord>(&raw) {
            Ok(rec) => Ok(BuildLogLine {
                stream: rec.stream.or(rec.status),
                error: rec.error.or(rec.message),
                raw,
            }),
            Err(source) => match policy {
                LogPolicy::Strict => Err(PipelineError::MalformedLog { line: raw, source }),
                LogPolicy::Lenient => {
                    warn!(record = %raw, error = %source, "malformed build output record");
                    Ok(BuildLogLine {
                        stream: Some(raw.clone()),
                        error: None,
                        raw,
                    })
                }
            },
        }
    }

    /// Human-readable text of the record, if any.
    pub fn text(&self) -> Option<&str> {
        self.error.as_deref().or(self.stream.as_deref())
    }
}

#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// Manifest already in the context, relative to its root.
    Path(String),
    /// Generated manifest, written as `name` in the context root for the duration of the build.
    Generated { name: String, manifest: BuildManifest },
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Absolute path of the build context.
    pub context_dir: PathBuf,
    pub manifest: ManifestSource,
    pub tags: Vec<String>,
    pub timeout: Duration,
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tags: Vec<String>,
    pub lines: Vec<BuildLogLine>,
}

impl BuildOutput {
    /// Primary tag of the built image.
    pub fn image(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or_default()
    }
}

/// Generated manifest on disk; removed when dropped.
struct TransientManifest {
    path: PathBuf,
}

impl TransientManifest {
    fn write(dir: &Path, name: &str, manifest: &BuildManifest) -> Result<Self, PipelineError> {
        let path = dir.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| PipelineError::io_at("cannot create transient manifest", &path, e))?;
        let guard = TransientManifest { path };
        file.write_all(manifest.to_string().as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| PipelineError::io_at("cannot write transient manifest", &guard.path, e))?;
        Ok(guard)
    }
}

impl Drop for TransientManifest {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "cannot remove transient manifest");
            }
        }
    }
}

/// Run one uncached build and collect its progress records.
///
/// Every record is handed to `sink` as it arrives. The build is cancelled when
/// `request.timeout` elapses. A record carrying an `error` fails the build once
/// the stream has ended.
#[instrument(
    level = "info",
    skip_all,
    fields(tag = %request.tags.first().map(String::as_str).unwrap_or_default())
)]
pub fn run_build(
    engine: &dyn Engine,
    request: &BuildRequest,
    policy: LogPolicy,
    sink: &mut dyn FnMut(&BuildLogLine),
) -> Result<BuildOutput, PipelineError> {
    if request.tags.is_empty() {
        return Err(PipelineError::Config(
            "a build needs at least one tag".to_string(),
        ));
    }
    if !request.context_dir.is_absolute() {
        return Err(PipelineError::Config(format!(
            "build context must be an absolute path: {}",
            request.context_dir.display()
        )));
    }

    let (_transient, dockerfile) = match &request.manifest {
        ManifestSource::Path(p) => (None, p.clone()),
        ManifestSource::Generated { name, manifest } => (
            Some(TransientManifest::write(
                &request.context_dir,
                name,
                manifest,
            )?),
            name.clone(),
        ),
    };

    let archive = archive::pack(&request.context_dir).map_err(|e| {
        PipelineError::io_at("cannot archive build context", &request.context_dir, e)
    })?;
    let context = archive
        .reopen()
        .map_err(|e| PipelineError::io("cannot open build context archive", e))?;

    let options = BuildOptions {
        dockerfile,
        tags: request.tags.clone(),
        no_cache: true,
        remove: true,
        build_args: request.build_args.clone(),
        timeout: request.timeout,
    };
    info!(dockerfile = %options.dockerfile, "submitting build");

    let deadline = Instant::now() + request.timeout;
    let mut stream = engine.build_image(context, &options)?;
    let mut lines = Vec::new();
    let mut failure: Option<String> = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            stream.cancel();
            return Err(PipelineError::Timeout(request.timeout));
        }
        let record = match stream.next_record(remaining) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(EngineError::TimedOut) => {
                stream.cancel();
                return Err(PipelineError::Timeout(request.timeout));
            }
            // the engine's own reason beats the transport's exit status
            Err(e) => return Err(failure.map_or_else(|| e.into(), build_failed)),
        };
        if record.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let line = match BuildLogLine::parse(&record, policy) {
            Ok(line) => line,
            Err(e) => {
                stream.cancel();
                return Err(e);
            }
        };
        if let Some(text) = line.text() {
            debug!("{}", text.trim_end());
        }
        sink(&line);
        if failure.is_none() {
            failure = line.error.clone();
        }
        lines.push(line);
    }

    if let Some(message) = failure {
        return Err(build_failed(message));
    }
    info!(records = lines.len(), "build finished");
    Ok(BuildOutput {
        tags: request.tags.clone(),
        lines,
    })
}

fn build_failed(message: String) -> PipelineError {
    PipelineError::BuildFailed(message.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use crate::manifest::Instruction;

    fn request(dir: &Path, manifest: ManifestSource) -> BuildRequest {
        BuildRequest {
            context_dir: dir.to_path_buf(),
            manifest,
            tags: vec!["me/app".to_string()],
            timeout: Duration::from_secs(5),
            build_args: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_record_variants() {
        let l = BuildLogLine::parse(br#"{"stream":"Step 1/2\n"}"#, LogPolicy::Strict).expect("ok");
        assert_eq!(l.stream.as_deref(), Some("Step 1/2\n"));
        let l = BuildLogLine::parse(br#"{"errorDetail":{"message":"x"},"error":"x"}"#, LogPolicy::Strict)
            .expect("ok");
        assert_eq!(l.error.as_deref(), Some("x"));
        let l = BuildLogLine::parse(br#"{"message":"Cannot locate specified Dockerfile: Dockerfile"}"#, LogPolicy::Strict)
            .expect("error body");
        assert_eq!(l.text(), Some("Cannot locate specified Dockerfile: Dockerfile"));
        assert!(matches!(
            BuildLogLine::parse(b"not json", LogPolicy::Strict),
            Err(PipelineError::MalformedLog { .. })
        ));
        let l = BuildLogLine::parse(b"not json\n", LogPolicy::Lenient).expect("lenient");
        assert_eq!(l.stream.as_deref(), Some("not json"));
    }

    #[test]
    fn test_generated_manifest_is_sent_and_removed() {
        let td = tempfile::tempdir().expect("tmpdir");
        let manifest: BuildManifest = vec![Instruction::From("base".into())].into_iter().collect();
        let engine = ScriptedEngine::new();
        let mut seen = Vec::new();
        let out = run_build(
            &engine,
            &request(
                td.path(),
                ManifestSource::Generated {
                    name: "Dockerfile.derived".into(),
                    manifest,
                },
            ),
            LogPolicy::Strict,
            &mut |l| seen.push(l.raw.clone()),
        )
        .expect("build");

        assert_eq!(out.image(), "me/app");
        assert_eq!(seen.len(), out.lines.len());
        assert!(!td.path().join("Dockerfile.derived").exists());
        let builds = engine.builds();
        assert_eq!(builds[0].dockerfile.as_deref(), Some("FROM base\n"));
        assert!(builds[0].options.no_cache && builds[0].options.remove);
    }

    #[test]
    fn test_error_record_fails_after_stream() {
        let td = tempfile::tempdir().expect("tmpdir");
        let engine = ScriptedEngine::new().with_build_records([
            r#"{"stream":"Step 1/1 : RUN false\n"}"#,
            r#"{"error":"The command returned a non-zero code: 1"}"#,
            r#"{"stream":"trailing\n"}"#,
        ]);
        let mut n = 0;
        let err = run_build(
            &engine,
            &request(td.path(), ManifestSource::Path("Dockerfile".into())),
            LogPolicy::Strict,
            &mut |_| n += 1,
        )
        .expect_err("error record");
        assert_eq!(n, 3);
        assert!(matches!(err, PipelineError::BuildFailed(ref m) if m.contains("non-zero code")));
    }

    #[test]
    fn test_existing_transient_name_is_not_clobbered() {
        let td = tempfile::tempdir().expect("tmpdir");
        fs::write(td.path().join("Dockerfile.derived"), "mine").expect("write");
        let err = run_build(
            &ScriptedEngine::new(),
            &request(
                td.path(),
                ManifestSource::Generated {
                    name: "Dockerfile.derived".into(),
                    manifest: BuildManifest::new(),
                },
            ),
            LogPolicy::Strict,
            &mut |_| {},
        )
        .expect_err("refuses to overwrite");
        assert!(matches!(err, PipelineError::Io { .. }));
        assert_eq!(
            fs::read_to_string(td.path().join("Dockerfile.derived")).expect("read"),
            "mine"
        );
    }

    #[test]
    fn test_requires_tag_and_absolute_context() {
        let td = tempfile::tempdir().expect("tmpdir");
        let mut req = request(td.path(), ManifestSource::Path("Dockerfile".into()));
        req.tags.clear();
        assert!(matches!(
            run_build(&ScriptedEngine::new(), &req, LogPolicy::Strict, &mut |_| {}),
            Err(PipelineError::Config(_))
        ));
        let req = request(Path::new("relative/dir"), ManifestSource::Path("Dockerfile".into()));
        assert!(matches!(
            run_build(&ScriptedEngine::new(), &req, LogPolicy::Strict, &mut |_| {}),
            Err(PipelineError::Config(_))
        ));
    }
}
