//! Configuration file support.
//!
//! Every key is optional:
//! ```toml
//! docker_root = "/var/lib/docker"
//! max_depth = 100
//! on_error = "skip"        # or "abort"
//! parallel = true
//!
//! # Ask a Docker daemon for image metadata instead of reading
//! # docker_root/image/overlay2/imagedb.
//! [engine]
//! host = "tcp://192.168.40.128:2375"
//! connect_timeout_secs = 30
//! response_timeout_secs = 45
//! ```
//!
//! Layer content is always read from `docker_root`, so with an `[engine]`
//! section the daemon has to be running on this host (or share its storage).

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::engine::{EngineClient, EngineConfig};
use crate::error::Result;
use crate::locator::Locator;
use crate::metadata::{ImageDb, ImageMetadata};
use crate::store::{Overlay2Store, DEFAULT_DOCKER_ROOT};
use crate::walk::{OnError, WalkOptions, DEFAULT_MAX_DEPTH};

/// Settings for building a [`Locator`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinderConfig {
    /// Docker data root.
    pub docker_root: PathBuf,

    /// Depth ceiling for layer walks.
    pub max_depth: usize,

    /// Policy for unreadable directories.
    pub on_error: OnError,

    /// Walk layers concurrently.
    pub parallel: bool,

    /// Docker Engine to take image metadata from.
    pub engine: Option<EngineSection>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            docker_root: PathBuf::from(DEFAULT_DOCKER_ROOT),
            max_depth: DEFAULT_MAX_DEPTH,
            on_error: OnError::default(),
            parallel: false,
            engine: None,
        }
    }
}

/// The `[engine]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Daemon address, e.g. `tcp://localhost:2375`.
    pub host: String,

    /// Seconds to wait for a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds to wait for a response.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    EngineConfig::default().connect_timeout.as_secs()
}

fn default_response_timeout() -> u64 {
    EngineConfig::default().response_timeout.as_secs()
}

impl EngineSection {
    /// Settings for connecting to `host` with the default timeouts.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(section: &EngineSection) -> Self {
        EngineConfig {
            host: section.host.clone(),
            connect_timeout: Duration::from_secs(section.connect_timeout_secs),
            response_timeout: Duration::from_secs(section.response_timeout_secs),
        }
    }
}

impl FinderConfig {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the content is not
    /// valid TOML or contains unknown keys.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading configuration from {path:?}");
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Walk options described by this configuration, without cancellation.
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            max_depth: self.max_depth,
            on_error: self.on_error,
            cancel: None,
        }
    }

    /// Builds the metadata source and layer store this configuration
    /// describes.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidEngineHost`](crate::Error::InvalidEngineHost)
    /// if the `[engine]` host cannot be used.
    pub fn build_locator(&self) -> Result<Locator> {
        let metadata: Box<dyn ImageMetadata> = match &self.engine {
            Some(engine) => Box::new(EngineClient::new(&engine.into())?),
            None => Box::new(ImageDb::new(&self.docker_root)),
        };
        let store = Box::new(Overlay2Store::new(&self.docker_root));

        Ok(Locator::new(metadata, store)
            .with_options(self.walk_options())
            .with_parallel(self.parallel))
    }
}
