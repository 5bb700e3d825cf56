//! Runtime configuration of an existing image.

use serde::{Deserialize, Deserializer};
use tracing::{instrument, warn};

use crate::engine::Engine;

/// Subset of the engine's image `Config` object the synthesizer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub working_dir: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cmd: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub entrypoint: Vec<String>,
    /// `KEY=VALUE` entries in declaration order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub env: Vec<String>,
}

fn null_as_empty<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

fn non_empty_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.filter(|s| !s.is_empty()))
}

impl ImageConfig {
    /// Parse `docker image inspect --format '{{json .Config}}'` output; `null` means no config.
    pub fn from_inspect_json(text: &str) -> Result<Self, serde_json::Error> {
        let parsed: Option<ImageConfig> = serde_json::from_str(text)?;
        Ok(parsed.unwrap_or_default())
    }

    /// Working directory when the image declares one.
    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref().filter(|d| !d.is_empty())
    }
}

/// Best-effort: any failure is logged and yields an empty configuration.
#[instrument(level = "info", skip(engine))]
pub fn introspect(engine: &dyn Engine, image: &str) -> ImageConfig {
    match engine.inspect_image(image) {
        Ok(config) => config,
        Err(e) => {
            warn!(image, error = %e, "cannot inspect image; continuing with an empty configuration");
            ImageConfig::default()
        }
    }
}
