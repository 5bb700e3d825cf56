#![allow(clippy::module_name_repetitions)]
//! Docker runtime discovery and engine endpoint resolution.

use std::env;
use std::io;
use std::path::PathBuf;

use url::Url;
use which::which;

use super::EngineError;

const DEFAULT_UNIX_SOCKET: &str = "/var/run/docker.sock";

pub fn container_runtime_path() -> io::Result<PathBuf> {
    // Allow tests or callers to explicitly disable Docker detection to avoid hard failures
    if env::var("DERIVEBOX_SKIP_DOCKER").ok().as_deref() == Some("1") {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }

    if let Ok(p) = which("docker") {
        return Ok(p);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "Docker is required but was not found in PATH.",
    ))
}

/// curl streams build records from the engine API.
pub fn curl_path() -> io::Result<PathBuf> {
    which("curl").map_err(|_| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "curl is required to stream builds but was not found in PATH.",
        )
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Where the engine API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp {
        authority: String,
        tls: Option<TlsFiles>,
    },
}

impl Endpoint {
    /// Resolve from an explicit override, else `DOCKER_HOST`, else the default unix socket.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, EngineError> {
        Self::resolve_with(explicit, |k| env::var(k).ok())
    }

    pub fn resolve_with<F>(explicit: Option<&str>, get: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = explicit
            .map(str::to_string)
            .or_else(|| get("DOCKER_HOST"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(raw) = raw else {
            return Ok(Endpoint::Unix(PathBuf::from(DEFAULT_UNIX_SOCKET)));
        };

        let tls_verify = get("DOCKER_TLS_VERIFY")
            .map(|v| !v.trim().is_empty() && v.trim() != "0")
            .unwrap_or(false);
        let tls = if tls_verify {
            let dir = get("DOCKER_CERT_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| home::home_dir().map(|h| h.join(".docker")))
                .ok_or_else(|| {
                    EngineError::Endpoint("DOCKER_TLS_VERIFY set but no cert path".into())
                })?;
            Some(TlsFiles {
                ca: dir.join("ca.pem"),
                cert: dir.join("cert.pem"),
                key: dir.join("key.pem"),
            })
        } else {
            None
        };
        Self::parse(&raw, tls)
    }

    fn parse(raw: &str, tls: Option<TlsFiles>) -> Result<Self, EngineError> {
        let url = Url::parse(raw).map_err(|e| EngineError::Endpoint(format!("{raw}: {e}")))?;
        match url.scheme() {
            "unix" => {
                if url.path().is_empty() {
                    return Err(EngineError::Endpoint(format!("{raw}: missing socket path")));
                }
                Ok(Endpoint::Unix(PathBuf::from(url.path())))
            }
            "tcp" | "http" | "https" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EngineError::Endpoint(format!("{raw}: missing host")))?;
                let default_port = if tls.is_some() || url.scheme() == "https" {
                    2376
                } else {
                    2375
                };
                let port = url.port().unwrap_or(default_port);
                Ok(Endpoint::Tcp {
                    authority: format!("{host}:{port}"),
                    tls,
                })
            }
            other => Err(EngineError::Endpoint(format!(
                "{raw}: scheme {other:?} is not supported (use unix:// or tcp://)"
            ))),
        }
    }

    /// Base URL plus transport arguments for curl.
    pub fn curl_target(&self) -> (String, Vec<String>) {
        match self {
            Endpoint::Unix(sock) => (
                "http://localhost".to_string(),
                vec!["--unix-socket".to_string(), sock.display().to_string()],
            ),
            Endpoint::Tcp {
                authority,
                tls: None,
            } => (format!("http://{authority}"), Vec::new()),
            Endpoint::Tcp {
                authority,
                tls: Some(files),
            } => (
                format!("https://{authority}"),
                vec![
                    "--cacert".to_string(),
                    files.ca.display().to_string(),
                    "--cert".to_string(),
                    files.cert.display().to_string(),
                    "--key".to_string(),
                    files.key.display().to_string(),
                ],
            ),
        }
    }

    /// `DOCKER_HOST` value the docker CLI understands for this endpoint.
    pub fn docker_host(&self) -> String {
        match self {
            Endpoint::Unix(sock) => format!("unix://{}", sock.display()),
            Endpoint::Tcp { authority, .. } => format!("tcp://{authority}"),
        }
    }
}
