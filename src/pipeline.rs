//! Stage sequencing: stage-1 build, introspection, synthesis, stage-2 build, validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::build::{run_build, BuildLogLine, BuildRequest, ManifestSource};
use crate::config::Settings;
use crate::engine::Engine;
use crate::errors::PipelineError;
use crate::introspect::{introspect, ImageConfig};
use crate::lock::acquire_source_lock;
use crate::manifest::{synthesize, BuildManifest};
use crate::validate::validate;

#[derive(Debug, Clone)]
pub struct DeriveRequest {
    pub source_dir: PathBuf,
    /// Tag of the stage-1 image, also the base of the derived image.
    pub image_name: String,
    /// Build args for the stage-1 build only.
    pub build_args: BTreeMap<String, String>,
    pub skip_validate: bool,
}

impl DeriveRequest {
    pub fn new(source_dir: impl Into<PathBuf>, image_name: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            image_name: image_name.into(),
            build_args: BTreeMap::new(),
            skip_validate: false,
        }
    }
}

/// Result of stage 1 plus synthesis.
#[derive(Debug, Clone)]
pub struct Plan {
    pub image: String,
    pub config: ImageConfig,
    pub overlay_present: bool,
    pub manifest: BuildManifest,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub image: String,
    /// Tag of the stage-2 image.
    pub derived: String,
    pub manifest: BuildManifest,
    pub validated: bool,
}

pub struct Pipeline<'a> {
    engine: &'a dyn Engine,
    settings: &'a Settings,
}

impl<'a> Pipeline<'a> {
    pub fn new(engine: &'a dyn Engine, settings: &'a Settings) -> Self {
        Self { engine, settings }
    }

    /// Build stage 1 and synthesize the derived manifest without building it.
    pub fn plan(
        &self,
        request: &DeriveRequest,
        sink: &mut dyn FnMut(&BuildLogLine),
    ) -> Result<Plan, PipelineError> {
        let source = resolve_source(&request.source_dir)?;
        let _lock = acquire_source_lock(&source)
            .map_err(|e| PipelineError::io_at("cannot lock source tree", &source, e))?;
        self.stage_one(&source, request, sink)
    }

    /// Full derivation; returns once the derived image is built and, unless
    /// skipped, validated.
    #[instrument(level = "info", skip_all, fields(image = %request.image_name))]
    pub fn run(
        &self,
        request: &DeriveRequest,
        sink: &mut dyn FnMut(&BuildLogLine),
    ) -> Result<Outcome, PipelineError> {
        let source = resolve_source(&request.source_dir)?;
        let _lock = acquire_source_lock(&source)
            .map_err(|e| PipelineError::io_at("cannot lock source tree", &source, e))?;

        let plan = self.stage_one(&source, request, sink)?;
        let derived = self.settings.derived_tag(&request.image_name);

        info!(tag = %derived, "building derived image");
        run_build(
            self.engine,
            &BuildRequest {
                context_dir: source.clone(),
                manifest: ManifestSource::Generated {
                    name: self.settings.derived_manifest.clone(),
                    manifest: plan.manifest.clone(),
                },
                tags: vec![derived.clone()],
                timeout: self.settings.build_timeout,
                build_args: BTreeMap::new(),
            },
            self.settings.log_policy,
            sink,
        )?;

        let validated = if request.skip_validate {
            info!(tag = %derived, "validation skipped");
            false
        } else {
            validate(self.engine, &derived, &self.settings.conventions)?;
            true
        };

        Ok(Outcome {
            image: plan.image,
            derived,
            manifest: plan.manifest,
            validated,
        })
    }

    fn stage_one(
        &self,
        source: &Path,
        request: &DeriveRequest,
        sink: &mut dyn FnMut(&BuildLogLine),
    ) -> Result<Plan, PipelineError> {
        if request.image_name.trim().is_empty() {
            return Err(PipelineError::Config("image name must not be empty".to_string()));
        }
        let dockerfile = source.join(&self.settings.stage1_dockerfile);
        if !dockerfile.is_file() {
            return Err(PipelineError::Config(format!(
                "no build manifest at {}",
                dockerfile.display()
            )));
        }

        if let Some(ref base) = self.settings.base_image {
            info!(image = %base, "pulling base image");
            self.engine
                .pull_image(base, self.settings.registry_auth.as_ref())?;
        }

        info!(tag = %request.image_name, "building image");
        run_build(
            self.engine,
            &BuildRequest {
                context_dir: source.to_path_buf(),
                manifest: ManifestSource::Path(self.settings.stage1_dockerfile.clone()),
                tags: vec![request.image_name.clone()],
                timeout: self.settings.build_timeout,
                build_args: request.build_args.clone(),
            },
            self.settings.log_policy,
            sink,
        )?;

        let config = introspect(self.engine, &request.image_name);
        let conventions = &self.settings.conventions;
        let overlay_present = source.join(&conventions.overlay_name).exists();
        let manifest = synthesize(&config, overlay_present, &request.image_name, conventions);

        Ok(Plan {
            image: request.image_name.clone(),
            config,
            overlay_present,
            manifest,
        })
    }
}

fn resolve_source(dir: &Path) -> Result<PathBuf, PipelineError> {
    let abs = fs::canonicalize(dir)
        .map_err(|e| PipelineError::io_at("cannot resolve source directory", dir, e))?;
    if !abs.is_dir() {
        return Err(PipelineError::Config(format!(
            "source is not a directory: {}",
            abs.display()
        )));
    }
    Ok(abs)
}
