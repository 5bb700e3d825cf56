#![allow(clippy::module_name_repetitions)]
//! Settings: built-in defaults, optional YAML file, environment overrides.
//!
//! Precedence (lowest to highest): defaults, config file, `DERIVEBOX_*` environment,
//! CLI flags (applied by the binary after `load`).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::build::LogPolicy;
use crate::engine::RegistryAuth;
use crate::errors::{config_read_error, PipelineError};
use crate::util::{reject_newlines, reject_single_quotes};

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// Fixed conventions baked into every derived manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Conventions {
    /// Remote installer piped into bash during provisioning.
    pub bootstrap_installer_url: String,
    /// Directory holding the entry script and the companion server bundle.
    pub server_dir: String,
    pub user: String,
    pub group: String,
    /// Working directory used when the stage-1 image declares none.
    pub default_workdir: String,
    /// Companion server binary, relative to the entry script's directory.
    pub companion_server_bin: String,
    pub bind_host: String,
    pub port: u16,
    pub environment_file: String,
    pub entry_script: String,
    /// File or directory in the source tree copied into the working directory when present.
    pub overlay_name: String,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            bootstrap_installer_url: "https://build.boxlayer.com".to_string(),
            server_dir: "/programschool/server".to_string(),
            user: "ubuntu".to_string(),
            group: "root".to_string(),
            default_workdir: "/home/ubuntu/learn".to_string(),
            companion_server_bin: "code-server/bin/code-server".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: 2090,
            environment_file: "/etc/environment".to_string(),
            entry_script: "/programschool/server/run.sh".to_string(),
            overlay_name: "WORKDIR".to_string(),
        }
    }
}

impl Conventions {
    /// `user:group` as passed to chown.
    pub fn owner(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }

    /// Convention values are spliced into single-quoted shell payloads; keep them inert.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("bootstrap-installer-url", &self.bootstrap_installer_url),
            ("server-dir", &self.server_dir),
            ("user", &self.user),
            ("group", &self.group),
            ("default-workdir", &self.default_workdir),
            ("companion-server-bin", &self.companion_server_bin),
            ("bind-host", &self.bind_host),
            ("environment-file", &self.environment_file),
            ("entry-script", &self.entry_script),
            ("overlay-name", &self.overlay_name),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(format!("{name} must not be empty"));
            }
            reject_newlines(value, name)?;
            reject_single_quotes(value, name)?;
        }
        if !self.entry_script.starts_with('/') {
            return Err("entry-script must be an absolute path".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub conventions: Conventions,
    /// Registry/namespace prefix for the derived tag (`<prefix>/<name>`); empty keeps the name.
    pub registry_prefix: String,
    pub build_timeout: Duration,
    /// Uniform bound for non-build engine calls; zero waits indefinitely.
    pub engine_timeout: Duration,
    pub log_policy: LogPolicy,
    /// Stage-1 manifest path, relative to the source tree.
    pub stage1_dockerfile: String,
    /// File name of the transient stage-2 manifest written into the source tree.
    pub derived_manifest: String,
    /// Image pulled before stage 1 (e.g. the platform base the user Dockerfile builds FROM).
    pub base_image: Option<String>,
    pub registry_auth: Option<RegistryAuth>,
    /// Engine endpoint override; falls back to DOCKER_HOST.
    pub docker_host: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conventions: Conventions::default(),
            registry_prefix: "boxlayer.com".to_string(),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            engine_timeout: Duration::ZERO,
            log_policy: LogPolicy::Strict,
            stage1_dockerfile: "Dockerfile".to_string(),
            derived_manifest: "Dockerfile.derived".to_string(),
            base_image: None,
            registry_auth: None,
            docker_host: None,
        }
    }
}

/// On-disk shape; every field optional so partial files layer over defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct FileSettings {
    conventions: Option<Conventions>,
    registry_prefix: Option<String>,
    build_timeout: Option<String>,
    engine_timeout: Option<String>,
    lenient_logs: Option<bool>,
    stage1_dockerfile: Option<String>,
    derived_manifest: Option<String>,
    base_image: Option<String>,
    registry_auth: Option<RegistryAuth>,
    docker_host: Option<String>,
}

fn parse_duration(what: &str, raw: &str) -> Result<Duration, PipelineError> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| PipelineError::Config(format!("{what}: cannot parse {raw:?}: {e}")))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Settings {
    /// Resolve defaults, then the config file, then the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let mut settings = Settings::default();
        if let Some(path) = config_path(explicit) {
            // An explicitly named file must exist; the default location is optional.
            if explicit.is_some() || path.is_file() {
                settings.apply_file(&path)?;
            }
        }
        settings.apply_env_from(|k| env::var(k).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<(), PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| config_read_error(path, e))?;
        self.apply_yaml(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn apply_yaml(&mut self, text: &str) -> Result<(), PipelineError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let file: FileSettings = serde_yaml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("cannot parse config: {e}")))?;
        if let Some(c) = file.conventions {
            self.conventions = c;
        }
        if let Some(p) = file.registry_prefix {
            self.registry_prefix = p.trim().trim_end_matches('/').to_string();
        }
        if let Some(t) = file.build_timeout {
            self.build_timeout = parse_duration("build-timeout", &t)?;
        }
        if let Some(t) = file.engine_timeout {
            self.engine_timeout = parse_duration("engine-timeout", &t)?;
        }
        if let Some(lenient) = file.lenient_logs {
            self.log_policy = LogPolicy::from_lenient(lenient);
        }
        if let Some(d) = non_empty(file.stage1_dockerfile) {
            self.stage1_dockerfile = d;
        }
        if let Some(d) = non_empty(file.derived_manifest) {
            self.derived_manifest = d;
        }
        if let Some(b) = non_empty(file.base_image) {
            self.base_image = Some(b);
        }
        if file.registry_auth.is_some() {
            self.registry_auth = file.registry_auth;
        }
        if let Some(h) = non_empty(file.docker_host) {
            self.docker_host = Some(h);
        }
        Ok(())
    }

    /// Apply `DERIVEBOX_*` overrides through a lookup function (the process env in production).
    pub fn apply_env_from<F>(&mut self, get: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(t) = non_empty(get("DERIVEBOX_BUILD_TIMEOUT")) {
            self.build_timeout = parse_duration("DERIVEBOX_BUILD_TIMEOUT", &t)?;
        }
        if let Some(t) = non_empty(get("DERIVEBOX_ENGINE_TIMEOUT")) {
            self.engine_timeout = parse_duration("DERIVEBOX_ENGINE_TIMEOUT", &t)?;
        }
        if let Some(p) = get("DERIVEBOX_REGISTRY_PREFIX") {
            self.registry_prefix = p.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = get("DERIVEBOX_LENIENT_LOGS") {
            self.log_policy = LogPolicy::from_lenient(parse_bool(&v));
        }
        if let Some(b) = non_empty(get("DERIVEBOX_BASE_IMAGE")) {
            self.base_image = Some(b);
        }
        let user = non_empty(get("DERIVEBOX_REGISTRY_USER"));
        let password = get("DERIVEBOX_REGISTRY_PASSWORD").filter(|s| !s.is_empty());
        if let (Some(username), Some(password)) = (user, password) {
            self.registry_auth = Some(RegistryAuth { username, password });
        }
        if let Some(h) = non_empty(get("DERIVEBOX_DOCKER_HOST")) {
            self.docker_host = Some(h);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.conventions
            .validate()
            .map_err(|e| PipelineError::Config(format!("conventions: {e}")))?;
        if self.build_timeout.is_zero() {
            return Err(PipelineError::Config(
                "build-timeout must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("stage1-dockerfile", &self.stage1_dockerfile),
            ("derived-manifest", &self.derived_manifest),
        ] {
            let p = Path::new(value);
            if p.is_absolute() || p.components().any(|c| c == std::path::Component::ParentDir) {
                return Err(PipelineError::Config(format!(
                    "{name} must be a path inside the source tree: {value}"
                )));
            }
        }
        Ok(())
    }

    /// Tag of the derived (stage-2) image for a stage-1 image name.
    pub fn derived_tag(&self, image_name: &str) -> String {
        if self.registry_prefix.is_empty() {
            image_name.to_string()
        } else {
            format!("{}/{}", self.registry_prefix, image_name)
        }
    }
}

/// Config file location: explicit path, `$DERIVEBOX_CONFIG`, else
/// `${XDG_CONFIG_HOME:-~/.config}/derivebox/config.yml`.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Some(p) = non_empty(env::var("DERIVEBOX_CONFIG").ok()) {
        return Some(PathBuf::from(p));
    }
    let base = non_empty(env::var("XDG_CONFIG_HOME").ok())
        .map(PathBuf::from)
        .or_else(|| home::home_dir().map(|h| h.join(".config")))?;
    Some(base.join("derivebox").join("config.yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_preserve_conventions() {
        let s = Settings::default();
        let c = &s.conventions;
        assert_eq!(c.bootstrap_installer_url, "https://build.boxlayer.com");
        assert_eq!(c.default_workdir, "/home/ubuntu/learn");
        assert_eq!(c.entry_script, "/programschool/server/run.sh");
        assert_eq!(c.port, 2090);
        assert_eq!(c.owner(), "ubuntu:root");
        assert_eq!(s.build_timeout, Duration::from_secs(300));
        assert_eq!(s.log_policy, LogPolicy::Strict);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_overlay() {
        let mut s = Settings::default();
        s.apply_yaml(
            "build-timeout: 90s\nlenient-logs: true\nregistry-prefix: registry.local/\nconventions:\n  port: 8443\n  user: dev\n",
        )
        .expect("apply yaml");
        assert_eq!(s.build_timeout, Duration::from_secs(90));
        assert_eq!(s.log_policy, LogPolicy::Lenient);
        assert_eq!(s.registry_prefix, "registry.local");
        assert_eq!(s.conventions.port, 8443);
        assert_eq!(s.conventions.user, "dev");
        // unspecified convention fields keep their defaults
        assert_eq!(s.conventions.group, "root");
    }

    #[test]
    fn test_yaml_unknown_key_rejected() {
        let mut s = Settings::default();
        let err = s.apply_yaml("no-such-key: 1\n").unwrap_err();
        assert!(err.to_string().contains("cannot parse config"), "{err}");
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_env_from(env_of(&[
            ("DERIVEBOX_BUILD_TIMEOUT", "10m"),
            ("DERIVEBOX_ENGINE_TIMEOUT", "30s"),
            ("DERIVEBOX_REGISTRY_PREFIX", ""),
            ("DERIVEBOX_LENIENT_LOGS", "yes"),
            ("DERIVEBOX_REGISTRY_USER", "image"),
            ("DERIVEBOX_REGISTRY_PASSWORD", "pw"),
        ]))
        .expect("env");
        assert_eq!(s.build_timeout, Duration::from_secs(600));
        assert_eq!(s.engine_timeout, Duration::from_secs(30));
        assert_eq!(s.registry_prefix, "");
        assert_eq!(s.log_policy, LogPolicy::Lenient);
        assert_eq!(
            s.registry_auth,
            Some(RegistryAuth {
                username: "image".into(),
                password: "pw".into()
            })
        );
    }

    #[test]
    fn test_env_bad_duration_is_config_error() {
        let mut s = Settings::default();
        let err = s
            .apply_env_from(env_of(&[("DERIVEBOX_BUILD_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_derived_tag() {
        let mut s = Settings::default();
        assert_eq!(s.derived_tag("me/app"), "boxlayer.com/me/app");
        s.registry_prefix.clear();
        assert_eq!(s.derived_tag("me/app"), "me/app");
    }

    #[test]
    fn test_validate_rejects_quotes_and_escapes() {
        let mut s = Settings::default();
        s.conventions.default_workdir = "/home/it's".into();
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.derived_manifest = "../Dockerfile.x".into();
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.build_timeout = Duration::ZERO;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let td = tempfile::tempdir().expect("tmpdir");
        let missing = td.path().join("nope.yml");
        let mut s = Settings::default();
        assert!(s.apply_file(&missing).is_err());
    }
}
