//! Image metadata from a running Docker daemon.
//!
//! Uses the Docker Engine API `GET /images/{name}/json` endpoint and reads the
//! image's `RootFS.Layers`, which are the diff ids base first.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::metadata::ImageMetadata;

/// Default Docker Engine address.
pub const DEFAULT_ENGINE_HOST: &str = "tcp://localhost:2375";

/// Connection settings for a Docker Engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `tcp://`, `http://` or `https://` address of the daemon.
    pub host: String,
    /// How long to wait for the TCP connection.
    pub connect_timeout: Duration,
    /// How long to wait for the complete response.
    pub response_timeout: Duration,
}

impl EngineConfig {
    /// Settings for `host` with the default timeouts.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ENGINE_HOST.to_string(),
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "RootFS")]
    root_fs: RootFs,
}

#[derive(Debug, Deserialize)]
struct RootFs {
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

/// Maps a daemon address to the base URL requests are made against.
///
/// `tcp://` is Docker's spelling of plain HTTP.  The returned URL always ends
/// in `/`.
fn base_url(host: &str) -> Result<Url> {
    let invalid = || Error::InvalidEngineHost(host.to_string());

    let mapped = if let Some(rest) = host.strip_prefix("tcp://") {
        format!("http://{rest}")
    } else if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        return Err(invalid());
    };

    let mut url = Url::parse(&mapped).map_err(|_| invalid())?;
    if url.host_str().is_none() {
        return Err(invalid());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct EngineClient {
    client: Client,
    base: Url,
}

impl EngineClient {
    /// Creates a client; no connection is made until the first request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEngineHost`] for an unsupported address.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base = base_url(&config.host)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.response_timeout)
            .build()?;
        Ok(Self { client, base })
    }

    /// The URL requests are made against.
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn unreachable(&self, err: &reqwest::Error) -> Error {
        Error::Unreachable {
            endpoint: self.base.to_string(),
            reason: err.to_string(),
        }
    }

    fn inspect_url(&self, image_id: &str) -> Result<Url> {
        Url::parse(&format!("{}images/{image_id}/json", self.base))
            .map_err(|_| Error::ImageNotFound(image_id.to_string()))
    }
}

impl ImageMetadata for EngineClient {
    fn diff_ids(&self, image_id: &str) -> Result<Vec<String>> {
        let url = self.inspect_url(image_id)?;
        debug!("GET {url}");

        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => return Err(self.unreachable(&e)),
            Err(e) => return Err(e.into()),
        };

        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::ImageNotFound(image_id.to_string())),
            status if !status.is_success() => {
                response.error_for_status()?;
                return Err(Error::InvalidMetadata(format!("unexpected status {status}")));
            }
            _ => {}
        }

        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                self.unreachable(&e)
            } else {
                Error::Http(e)
            }
        })?;
        let inspect: InspectResponse = serde_json::from_str(&body)?;
        Ok(inspect.root_fs.layers)
    }
}
