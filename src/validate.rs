//! Sandbox validation of a derived image.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::Conventions;
use crate::engine::{ContainerId, ContainerSpec, Engine, EngineError, ExecSpec};
use crate::errors::PipelineError;
use crate::util::id::{create_run_id, sandbox_container_name};

const SANDBOX_USER: &str = "root";

/// An ephemeral container; stopped (no grace period) and removed when dropped.
pub struct Sandbox<'a> {
    engine: &'a dyn Engine,
    id: ContainerId,
}

impl<'a> Sandbox<'a> {
    pub fn create(engine: &'a dyn Engine, image: &str) -> Result<Self, EngineError> {
        let spec = ContainerSpec {
            image: image.to_string(),
            name: Some(sandbox_container_name(&create_run_id())),
            user: SANDBOX_USER.to_string(),
            tty: false,
            open_stdin: true,
        };
        let id = engine.create_container(&spec)?;
        info!(container = %id, image, "created sandbox");
        Ok(Sandbox { engine, id })
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    fn start(&self) -> Result<(), EngineError> {
        self.engine.start_container(&self.id)
    }

    /// Run `cmd` detached; its exit status is not observed.
    fn exec_detached(&self, cmd: Vec<String>) -> Result<(), EngineError> {
        let spec = ExecSpec {
            user: SANDBOX_USER.to_string(),
            cmd,
            tty: false,
            attach_stdin: false,
        };
        let handle = self.engine.exec_create(&self.id, &spec)?;
        self.engine.exec_start(&handle, true)
    }
}

impl Drop for Sandbox<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.stop_container(&self.id, Duration::ZERO) {
            warn!(container = %self.id, error = %e, "cannot stop sandbox");
        }
        if let Err(e) = self.engine.remove_container(&self.id) {
            warn!(container = %self.id, error = %e, "cannot remove sandbox");
        }
    }
}

/// Start the derived image in a sandbox and launch its entry script.
///
/// The sandbox is torn down on every path. When the container cannot be
/// started or the script cannot be launched, the image is removed as well.
#[instrument(level = "info", skip(engine, conventions))]
pub fn validate(
    engine: &dyn Engine,
    image: &str,
    conventions: &Conventions,
) -> Result<(), PipelineError> {
    let sandbox = Sandbox::create(engine, image).map_err(PipelineError::Validation)?;

    let started = sandbox.start();
    let launched = match started {
        Ok(()) => sandbox.exec_detached(vec![
            "bash".to_string(),
            conventions.entry_script.clone(),
        ]),
        // nothing to exec into
        Err(_) => Ok(()),
    };
    drop(sandbox);

    let failure = match (started, launched) {
        (Ok(()), Ok(())) => None,
        (Err(e), _) | (Ok(()), Err(e)) => Some(e),
    };
    match failure {
        None => {
            info!(image, "derived image validated");
            Ok(())
        }
        Some(e) => {
            warn!(image, error = %e, "validation failed; removing derived image");
            if let Err(rm) = engine.remove_image(image) {
                warn!(image, error = %rm, "cannot remove derived image");
            }
            Err(PipelineError::Validation(e))
        }
    }
}
