//! Image metadata: from image identifier to ordered diff ids.
//!
//! [`ImageMetadata`] is implemented by [`ImageDb`], which reads Docker's
//! on-disk image database, and by [`EngineClient`](crate::engine::EngineClient),
//! which asks a running Docker daemon.
//!
//! # Image Database Layout
//!
//! ```text
//! /var/lib/docker/image/overlay2/
//! +-- imagedb/content/sha256/
//! |   +-- <image-id-hex>     # image configuration (JSON)
//! +-- repositories.json      # tags and digests -> image id
//! ```

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use log::debug;
use oci_spec::image::ImageConfiguration;

use crate::digest::{parse_sha256, strip_algorithm, SHA256_PREFIX};
use crate::error::{Error, Result};

const IMAGE_DIR: &str = "image/overlay2";
const CONTENT_DIR: &str = "imagedb/content/sha256";
const REPOSITORIES_FILE: &str = "repositories.json";

/// Source of image layer lists.
pub trait ImageMetadata: Send + Sync {
    /// Returns the diff ids of `image_id`, base layer first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageNotFound`] if the image is unknown and
    /// [`Error::Unreachable`] if the source cannot be consulted at all.
    fn diff_ids(&self, image_id: &str) -> Result<Vec<String>>;
}

/// Contents of repositories.json.
#[derive(Debug, Default, serde::Deserialize)]
struct Repositories {
    #[serde(rename = "Repositories", default)]
    repositories: HashMap<String, HashMap<String, String>>,
}

/// Turns a user supplied reference into the form repositories.json uses.
fn normalize_reference(reference: &str) -> String {
    let reference = reference
        .strip_prefix("docker.io/library/")
        .or_else(|| reference.strip_prefix("docker.io/"))
        .unwrap_or(reference);

    let last = reference.rsplit('/').next().unwrap_or(reference);
    if reference.contains('@') || last.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// Reads image configurations from a Docker data root.
#[derive(Debug, Clone)]
pub struct ImageDb {
    root: PathBuf,
}

impl ImageDb {
    /// Creates a reader for the Docker data root at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the Docker data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unreachable(&self, reason: impl ToString) -> Error {
        Error::Unreachable {
            endpoint: self.root.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn open_image_dir(&self) -> Result<Dir> {
        let root_dir = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|e| self.unreachable(format!("cannot open data root: {e}")))?;
        root_dir.open_dir(IMAGE_DIR).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                self.unreachable("no overlay2 image database")
            } else {
                Error::Io(e)
            }
        })
    }

    fn lookup_reference(&self, image_dir: &Dir, reference: &str) -> Result<Option<String>> {
        let mut file = match image_dir.open(REPOSITORIES_FILE) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let repos: Repositories = serde_json::from_str(&content)?;

        let wanted = normalize_reference(reference);
        Ok(repos
            .repositories
            .values()
            .find_map(|tags| tags.get(&wanted))
            .cloned())
    }

    fn find_by_prefix(&self, content: &Dir, prefix: &str) -> Result<String> {
        let mut matches = vec![];
        for entry in content.entries()? {
            let name = entry?.file_name();
            if let Some(name) = name.to_str() {
                if name.starts_with(prefix) {
                    matches.push(name.to_string());
                }
            }
        }

        match matches.len() {
            0 => Err(Error::ImageNotFound(prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::AmbiguousImage(prefix.to_string())),
        }
    }

    /// Resolves an image id, unique id prefix, or tagged reference to the
    /// hex id of the image configuration.
    fn resolve_id(&self, image_dir: &Dir, image_id: &str) -> Result<String> {
        let content = image_dir.open_dir(CONTENT_DIR).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                self.unreachable("no image content directory")
            } else {
                Error::Io(e)
            }
        })?;

        let exists = |hex: &str| -> Result<String> {
            if content.try_exists(hex)? {
                Ok(hex.to_string())
            } else {
                Err(Error::ImageNotFound(image_id.to_string()))
            }
        };

        if image_id.starts_with(SHA256_PREFIX) {
            return exists(&strip_algorithm(image_id)?.to_ascii_lowercase());
        }
        if parse_sha256(image_id).is_ok() {
            return exists(&image_id.to_ascii_lowercase());
        }
        if let Some(id) = self.lookup_reference(image_dir, image_id)? {
            debug!("{image_id} refers to {id}");
            return exists(strip_algorithm(&id)?);
        }
        if !image_id.is_empty() && image_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return self.find_by_prefix(&content, &image_id.to_ascii_lowercase());
        }
        Err(Error::ImageNotFound(image_id.to_string()))
    }
}

impl ImageMetadata for ImageDb {
    fn diff_ids(&self, image_id: &str) -> Result<Vec<String>> {
        let image_dir = self.open_image_dir()?;
        let hex = self.resolve_id(&image_dir, image_id)?;

        let file = image_dir.open(Path::new(CONTENT_DIR).join(&hex))?;
        let config = ImageConfiguration::from_reader(file).map_err(|e| {
            Error::InvalidMetadata(format!("image config {hex}: {e}"))
        })?;

        let diff_ids = config.rootfs().diff_ids().clone();
        debug!("image {hex} has {} layers", diff_ids.len());
        Ok(diff_ids)
    }
}
