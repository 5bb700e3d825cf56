#![allow(clippy::module_name_repetitions)]
//! Engine backed by the local `docker` CLI.
//!
//! Container and image lifecycle calls shell out to `docker`; builds POST the
//! context archive to the engine's `/build` API through `curl` so progress comes
//! back as the engine's own JSON records.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    curl_path, BuildOptions, BuildStream, ContainerId, ContainerSpec, Engine, EngineError,
    Endpoint, ExecHandle, ExecSpec, RegistryAuth,
};
use crate::introspect::ImageConfig;
use crate::util::{shell_join, ExecOutput, ExecRequest, ExecService};

/// curl's exit code for an operation that exceeded `--max-time`.
const CURL_TIMEOUT_EXIT: i32 = 28;

#[derive(Debug, Clone)]
pub struct DockerCli {
    runtime: PathBuf,
    /// Explicit curl binary; looked up on PATH per build when unset.
    curl: Option<PathBuf>,
    endpoint: Endpoint,
    /// Exported as DOCKER_HOST for docker invocations when the endpoint was overridden.
    host_override: Option<String>,
    exec: ExecService,
}

impl DockerCli {
    pub fn new(runtime: PathBuf, endpoint: Endpoint, engine_timeout: Duration) -> Self {
        Self {
            runtime,
            curl: None,
            endpoint,
            host_override: None,
            exec: ExecService::new(engine_timeout),
        }
    }

    /// Locate `docker` on PATH and resolve the engine endpoint.
    pub fn detect(docker_host: Option<&str>, engine_timeout: Duration) -> Result<Self, EngineError> {
        let runtime = super::container_runtime_path().map_err(EngineError::Runtime)?;
        let endpoint = Endpoint::resolve(docker_host)?;
        let mut cli = Self::new(runtime, endpoint, engine_timeout);
        if docker_host.is_some() {
            cli.host_override = Some(cli.endpoint.docker_host());
        }
        Ok(cli)
    }

    pub fn with_curl(mut self, curl: PathBuf) -> Self {
        self.curl = Some(curl);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn request<I, S>(&self, args: I) -> ExecRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        let mut req = ExecRequest::new(&self.runtime)
            .args(args)
            .capture_output(true);
        if let Some(ref host) = self.host_override {
            req = req.env("DOCKER_HOST", host);
        }
        req
    }

    /// Run one docker command; non-zero exit becomes `EngineError::Command` carrying stderr.
    fn run(&self, op: &str, req: ExecRequest) -> Result<ExecOutput, EngineError> {
        let mut preview = req.preview();
        if let Some(first) = preview.first_mut() {
            *first = "docker".to_string();
        }
        debug!(op, cmd = %shell_join(&preview), "engine call");
        let out = self.exec.run(req).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => EngineError::TimedOut,
            _ => EngineError::Runtime(e),
        })?;
        if out.status.success() {
            Ok(out)
        } else {
            let message = first_non_empty(&out.stderr, &out.stdout);
            Err(EngineError::command(op, out.status.code(), message))
        }
    }

    fn login(&self, image: &str, auth: &RegistryAuth) -> Result<(), EngineError> {
        let mut args = vec![
            "login".to_string(),
            "--username".to_string(),
            auth.username.clone(),
            "--password-stdin".to_string(),
        ];
        if let Some(host) = parse_registry_host(image) {
            args.push(host);
        }
        let req = self.request(&args).stdin(auth.password.as_bytes().to_vec());
        self.run("docker login", req).map(|_| ())
    }

    fn build_url(&self, options: &BuildOptions) -> Result<(String, Vec<String>), EngineError> {
        let (base, transport) = self.endpoint.curl_target();
        let query = build_query(options)?;
        Ok((format!("{base}/build?{query}"), transport))
    }
}

fn first_non_empty(a: &str, b: &str) -> String {
    let a = a.trim();
    if a.is_empty() {
        b.trim().to_string()
    } else {
        a.to_string()
    }
}

/// Derive registry host from an image reference (first component if qualified).
pub(crate) fn parse_registry_host(image: &str) -> Option<String> {
    if let Some((first, _rest)) = image.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return Some(first.to_string());
        }
    }
    None
}

/// Query string for `POST /build`.
pub(crate) fn build_query(options: &BuildOptions) -> Result<String, EngineError> {
    let mut q = vec![format!(
        "dockerfile={}",
        urlencoding::encode(&options.dockerfile)
    )];
    for tag in &options.tags {
        q.push(format!("t={}", urlencoding::encode(tag)));
    }
    if options.no_cache {
        q.push("nocache=1".to_string());
    }
    if options.remove {
        q.push("rm=1".to_string());
    }
    if !options.build_args.is_empty() {
        let json = serde_json::to_string(&options.build_args).map_err(|e| EngineError::Decode {
            op: "build args".to_string(),
            source: e,
        })?;
        q.push(format!("buildargs={}", urlencoding::encode(&json)));
    }
    Ok(q.join("&"))
}

impl Engine for DockerCli {
    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), EngineError> {
        if let Some(auth) = auth {
            self.login(image, auth)?;
        }
        info!(image, "pulling image");
        let out = self.run("docker pull", self.request(["pull", image]))?;
        for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!(image, "{line}");
        }
        Ok(())
    }

    fn build_image(
        &self,
        context: File,
        options: &BuildOptions,
    ) -> Result<Box<dyn BuildStream>, EngineError> {
        let curl = match self.curl {
            Some(ref p) => p.clone(),
            None => curl_path().map_err(EngineError::Runtime)?,
        };
        let (url, transport) = self.build_url(options)?;

        let mut cmd = Command::new(&curl);
        cmd.args(["-sS", "-N", "--fail-with-body", "-X", "POST"])
            .args(["-H", "Content-Type: application/x-tar"])
            .args(["--data-binary", "@-"]);
        if !options.timeout.is_zero() {
            // whole seconds, rounded up; the orchestrator keeps the precise deadline
            let secs = options.timeout.as_secs() + u64::from(options.timeout.subsec_nanos() > 0);
            cmd.arg("--max-time").arg(secs.to_string());
        }
        cmd.args(&transport).arg(&url);
        cmd.stdin(Stdio::from(context))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(url = %url, tags = ?options.tags, "submitting build");
        let mut child = cmd.spawn().map_err(|e| {
            EngineError::Runtime(io::Error::new(
                e.kind(),
                format!("failed to start curl for build: {e}"),
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Stream(io::Error::other("build stdout not captured")))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut s = String::new();
                let _ = pipe.read_to_string(&mut s);
                s
            })
        });

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for record in BufReader::new(stdout).split(b'\n') {
                if tx.send(record).is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(CurlBuildStream {
            child,
            records: rx,
            stderr,
            finished: false,
        }))
    }

    fn inspect_image(&self, image: &str) -> Result<ImageConfig, EngineError> {
        let out = self.run(
            "docker image inspect",
            self.request(["image", "inspect", "--format", "{{json .Config}}", image]),
        )?;
        ImageConfig::from_inspect_json(out.stdout.trim()).map_err(|e| EngineError::Decode {
            op: "docker image inspect".to_string(),
            source: e,
        })
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError> {
        let mut args: Vec<String> = vec!["create".to_string()];
        if let Some(ref name) = spec.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if spec.open_stdin {
            args.push("--interactive".to_string());
        }
        if spec.tty {
            args.push("--tty".to_string());
        }
        args.push("--user".to_string());
        args.push(spec.user.clone());
        args.push(spec.image.clone());

        let out = self.run("docker create", self.request(&args))?;
        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::command(
                "docker create",
                out.status.code(),
                "engine returned no container id",
            ));
        }
        Ok(ContainerId(id))
    }

    fn start_container(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.run("docker start", self.request(["start", id.0.as_str()]))
            .map(|_| ())
    }

    /// The CLI creates and starts an exec in one step; creation only checks the
    /// container is running, as the engine API does.
    fn exec_create(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecHandle, EngineError> {
        let out = self.run(
            "docker container inspect",
            self.request([
                "container",
                "inspect",
                "--format",
                "{{.State.Running}}",
                id.0.as_str(),
            ]),
        )?;
        if out.stdout.trim() != "true" {
            return Err(EngineError::command(
                "docker exec",
                None,
                format!("container {id} is not running"),
            ));
        }
        Ok(ExecHandle {
            id: format!("{}-exec-{}", id.0, crate::util::id::create_run_id()),
            container: id.clone(),
            spec: spec.clone(),
        })
    }

    fn exec_start(&self, exec: &ExecHandle, detach: bool) -> Result<(), EngineError> {
        let mut args: Vec<String> = vec!["exec".to_string()];
        if detach {
            args.push("--detach".to_string());
        }
        if exec.spec.attach_stdin && !detach {
            args.push("--interactive".to_string());
        }
        if exec.spec.tty {
            args.push("--tty".to_string());
        }
        args.push("--user".to_string());
        args.push(exec.spec.user.clone());
        args.push(exec.container.0.clone());
        args.extend(exec.spec.cmd.iter().cloned());
        self.run("docker exec", self.request(&args)).map(|_| ())
    }

    fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<(), EngineError> {
        let secs = grace.as_secs().to_string();
        self.run(
            "docker stop",
            self.request(["stop", "--time", secs.as_str(), id.0.as_str()]),
        )
        .map(|_| ())
    }

    fn remove_container(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.run("docker rm", self.request(["rm", "--force", id.0.as_str()]))
            .map(|_| ())
    }

    fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        self.run("docker image rm", self.request(["image", "rm", image]))
            .map(|_| ())
    }
}

/// Build records read line by line from curl's stdout on a helper thread.
struct CurlBuildStream {
    child: Child,
    records: Receiver<io::Result<Vec<u8>>>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl CurlBuildStream {
    fn stderr_text(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn finish(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        self.finished = true;
        let status = self.child.wait().map_err(EngineError::Stream)?;
        if status.success() {
            return Ok(None);
        }
        if status.code() == Some(CURL_TIMEOUT_EXIT) {
            return Err(EngineError::TimedOut);
        }
        let stderr = self.stderr_text();
        Err(EngineError::command("build", status.code(), stderr))
    }
}

impl BuildStream for CurlBuildStream {
    fn next_record(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        match self.records.recv_timeout(wait) {
            Ok(Ok(record)) => Ok(Some(record)),
            Ok(Err(e)) => Err(EngineError::Stream(e)),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => self.finish(),
        }
    }

    fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for CurlBuildStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
