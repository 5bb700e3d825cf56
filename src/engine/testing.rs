//! In-memory engine that records every call; used by unit and integration tests.
//!
//! Builds are answered from scripted progress records; the submitted context
//! archive is unpacked so tests can assert on what would have been sent.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    BuildOptions, BuildStream, ContainerId, ContainerSpec, Engine, EngineError, ExecHandle,
    ExecSpec, RegistryAuth,
};
use crate::introspect::ImageConfig;

/// Engine operation, used to script failures and to summarize call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Pull,
    Build,
    Inspect,
    Create,
    Start,
    ExecCreate,
    ExecStart,
    Stop,
    Remove,
    RemoveImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Pull { image: String, authenticated: bool },
    Build(BuildOptions),
    Inspect(String),
    Create(ContainerSpec),
    Start(ContainerId),
    ExecCreate { container: ContainerId, spec: ExecSpec },
    ExecStart { container: ContainerId, detach: bool },
    Stop { container: ContainerId, grace: Duration },
    Remove(ContainerId),
    RemoveImage(String),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Pull { .. } => Op::Pull,
            Call::Build(_) => Op::Build,
            Call::Inspect(_) => Op::Inspect,
            Call::Create(_) => Op::Create,
            Call::Start(_) => Op::Start,
            Call::ExecCreate { .. } => Op::ExecCreate,
            Call::ExecStart { .. } => Op::ExecStart,
            Call::Stop { .. } => Op::Stop,
            Call::Remove(_) => Op::Remove,
            Call::RemoveImage(_) => Op::RemoveImage,
        }
    }
}

/// What one build call received.
#[derive(Debug, Clone)]
pub struct CapturedBuild {
    pub options: BuildOptions,
    /// Archive entry paths in archive order.
    pub entries: Vec<String>,
    /// Contents of the manifest named by `options.dockerfile`, if it was in the archive.
    pub dockerfile: Option<String>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: HashMap<Op, String>,
    images: HashMap<String, ImageConfig>,
    scripted_builds: VecDeque<Vec<String>>,
    hang_builds: bool,
    captured: Vec<CapturedBuild>,
    next_id: u32,
}

#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<State>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with `message`.
    pub fn fail(self, op: Op, message: &str) -> Self {
        self.lock().failures.insert(op, message.to_string());
        self
    }

    pub fn with_image(self, image: &str, config: ImageConfig) -> Self {
        self.lock().images.insert(image.to_string(), config);
        self
    }

    /// Records returned by the next unscripted build, in order.
    pub fn with_build_records<I, S>(self, records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .scripted_builds
            .push_back(records.into_iter().map(Into::into).collect());
        self
    }

    /// Builds never produce a record; each wait elapses with `TimedOut`.
    pub fn hang_builds(self) -> Self {
        self.lock().hang_builds = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().calls.iter().map(Call::op).collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn builds(&self) -> Vec<CapturedBuild> {
        self.lock().captured.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the recorded calls from the others
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, call: Call) -> Result<(), EngineError> {
        let op = call.op();
        let mut st = self.lock();
        st.calls.push(call);
        match st.failures.get(&op) {
            Some(message) => Err(EngineError::command(format!("{op:?}"), Some(1), message.clone())),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut st = self.lock();
        st.next_id += 1;
        format!("{prefix}-{}", st.next_id)
    }
}

fn capture(mut context: File, options: &BuildOptions) -> Result<CapturedBuild, EngineError> {
    let mut archive = tar::Archive::new(&mut context);
    let mut entries = Vec::new();
    let mut dockerfile = None;
    for entry in archive.entries().map_err(EngineError::Stream)? {
        let mut entry = entry.map_err(EngineError::Stream)?;
        let path = entry
            .path()
            .map_err(EngineError::Stream)?
            .to_string_lossy()
            .into_owned();
        if path == options.dockerfile {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(EngineError::Stream)?;
            dockerfile = Some(text);
        }
        entries.push(path);
    }
    Ok(CapturedBuild {
        options: options.clone(),
        entries,
        dockerfile,
    })
}

impl Engine for ScriptedEngine {
    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), EngineError> {
        self.record(Call::Pull {
            image: image.to_string(),
            authenticated: auth.is_some(),
        })
    }

    fn build_image(
        &self,
        context: File,
        options: &BuildOptions,
    ) -> Result<Box<dyn BuildStream>, EngineError> {
        self.record(Call::Build(options.clone()))?;
        let captured = capture(context, options)?;
        let mut st = self.lock();
        st.captured.push(captured);
        let hang = st.hang_builds;
        let records = st.scripted_builds.pop_front().unwrap_or_else(|| {
            let tag = options.tags.first().cloned().unwrap_or_default();
            vec![
                r#"{"stream":"Step 1/1 : FROM scratch\n"}"#.to_string(),
                format!(r#"{{"stream":"Successfully tagged {tag}\n"}}"#),
            ]
        });
        Ok(Box::new(ScriptedStream {
            records: records.into_iter().map(String::into_bytes).collect(),
            hang,
            cancelled: false,
        }))
    }

    fn inspect_image(&self, image: &str) -> Result<ImageConfig, EngineError> {
        self.record(Call::Inspect(image.to_string()))?;
        self.lock().images.get(image).cloned().ok_or_else(|| {
            EngineError::command("Inspect", Some(1), format!("No such image: {image}"))
        })
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError> {
        self.record(Call::Create(spec.clone()))?;
        Ok(ContainerId(self.next_id("container")))
    }

    fn start_container(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.record(Call::Start(id.clone()))
    }

    fn exec_create(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecHandle, EngineError> {
        self.record(Call::ExecCreate {
            container: id.clone(),
            spec: spec.clone(),
        })?;
        Ok(ExecHandle {
            id: self.next_id("exec"),
            container: id.clone(),
            spec: spec.clone(),
        })
    }

    fn exec_start(&self, exec: &ExecHandle, detach: bool) -> Result<(), EngineError> {
        self.record(Call::ExecStart {
            container: exec.container.clone(),
            detach,
        })
    }

    fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<(), EngineError> {
        self.record(Call::Stop {
            container: id.clone(),
            grace,
        })
    }

    fn remove_container(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.record(Call::Remove(id.clone()))
    }

    fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(Call::RemoveImage(image.to_string()))
    }
}

struct ScriptedStream {
    records: VecDeque<Vec<u8>>,
    hang: bool,
    cancelled: bool,
}

impl BuildStream for ScriptedStream {
    fn next_record(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, EngineError> {
        if self.cancelled {
            return Ok(None);
        }
        if self.hang {
            std::thread::sleep(wait);
            return Err(EngineError::TimedOut);
        }
        Ok(self.records.pop_front())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}
