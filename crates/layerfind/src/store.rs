//! Storage lookup: from chain id to extracted layer content.
//!
//! The [`LayerStore`] trait is the seam between layer resolution and a host's
//! on-disk layout.  [`Overlay2Store`] implements it for the Docker `overlay2`
//! graph driver.
//!
//! # Docker overlay2 Layout
//!
//! ```text
//! /var/lib/docker/
//! +-- image/overlay2/layerdb/sha256/
//! |   +-- <chain-id-hex>/
//! |       +-- cache-id       # name of the layer's overlay2 directory
//! |       +-- diff           # diff id of the layer
//! |       +-- parent         # chain id of the parent layer
//! +-- overlay2/
//!     +-- <cache-id>/
//!         +-- diff/          # extracted layer content
//!         +-- link
//!         +-- lower
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use log::trace;

use crate::digest::{parse_sha256, SHA256_PREFIX};
use crate::error::{Error, Result};

/// Default Docker data root.
pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

const LAYERDB_DIR: &str = "image/overlay2/layerdb/sha256";
const OVERLAY_DIR: &str = "overlay2";

/// Maps layer chain ids to the directories holding their extracted content.
pub trait LayerStore: Send + Sync {
    /// Returns the storage key (cache id) recorded for the given chain id.
    ///
    /// `chain_hex` is the raw hex digest, without the `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayerNotFound`] if this host holds no extracted
    /// content for the chain id.
    fn cache_id(&self, chain_hex: &str) -> Result<String>;

    /// Returns the host directory containing the extracted content stored
    /// under `cache_id`.
    fn extraction_root(&self, cache_id: &str) -> PathBuf;
}

/// Read-only view of a Docker overlay2 layer store.
#[derive(Debug, Clone)]
pub struct Overlay2Store {
    root: PathBuf,
}

impl Overlay2Store {
    /// Creates a store rooted at a Docker data root such as `/var/lib/docker`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the Docker data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open_layerdb(&self) -> Result<Dir> {
        let root_dir = Dir::open_ambient_dir(&self.root, ambient_authority()).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::RootNotFound(self.root.clone())
            } else {
                Error::Io(e)
            }
        })?;
        Ok(root_dir.open_dir(LAYERDB_DIR)?)
    }

    fn read_layer_file(&self, chain_hex: &str, name: &str) -> Result<String> {
        // Also guards against anything but a plain digest reaching the path.
        parse_sha256(chain_hex)?;

        let layerdb = match self.open_layerdb() {
            Ok(dir) => dir,
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::LayerNotFound {
                    chain_id: format!("{SHA256_PREFIX}{chain_hex}"),
                })
            }
            Err(e) => return Err(e),
        };

        let path = Path::new(chain_hex).join(name);
        layerdb.read_to_string(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::LayerNotFound {
                    chain_id: format!("{SHA256_PREFIX}{chain_hex}"),
                }
            } else {
                Error::Io(e)
            }
        })
    }
}

impl LayerStore for Overlay2Store {
    fn cache_id(&self, chain_hex: &str) -> Result<String> {
        let content = self.read_layer_file(chain_hex, "cache-id")?;
        let cache_id = content.trim();

        if cache_id.is_empty() || cache_id == "." || cache_id == ".." || cache_id.contains('/') {
            return Err(Error::InvalidMetadata(format!(
                "cache-id for {chain_hex} is not a directory name: {cache_id:?}"
            )));
        }

        trace!("chain id {chain_hex} -> cache id {cache_id}");
        Ok(cache_id.to_string())
    }

    fn extraction_root(&self, cache_id: &str) -> PathBuf {
        self.root.join(OVERLAY_DIR).join(cache_id).join("diff")
    }
}
