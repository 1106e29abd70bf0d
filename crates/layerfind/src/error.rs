//! Error types for the layerfind library.
//!
//! All fallible operations return [`Result<T>`], an alias for
//! `Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Not found**: [`ImageNotFound`], [`LayerNotFound`], [`RootNotFound`].
//!   Absence is not transient, so callers should not retry these.
//! - **Unreachable**: [`Unreachable`]. The metadata source could not be
//!   contacted; retrying is the caller's decision.
//! - **Filesystem access**: [`Walk`]. A directory inside a layer could not be
//!   listed while scanning.
//! - **Malformed input**: [`NoLayers`], [`InvalidDigest`], [`InvalidPattern`],
//!   [`AmbiguousImage`], [`InvalidEngineHost`], [`InvalidMetadata`], [`Config`].
//!
//! [`ImageNotFound`]: Error::ImageNotFound
//! [`LayerNotFound`]: Error::LayerNotFound
//! [`RootNotFound`]: Error::RootNotFound
//! [`Unreachable`]: Error::Unreachable
//! [`Walk`]: Error::Walk
//! [`NoLayers`]: Error::NoLayers
//! [`InvalidDigest`]: Error::InvalidDigest
//! [`InvalidPattern`]: Error::InvalidPattern
//! [`AmbiguousImage`]: Error::AmbiguousImage
//! [`InvalidEngineHost`]: Error::InvalidEngineHost
//! [`InvalidMetadata`]: Error::InvalidMetadata
//! [`Config`]: Error::Config

use std::path::PathBuf;

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for layer resolution and scanning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The metadata source does not know the requested image.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// A short image id matched more than one image.
    #[error("image reference {0} is ambiguous")]
    AmbiguousImage(String),

    /// The layer store has no extracted content for this chain id.
    #[error("no local layer content for chain id {chain_id}")]
    LayerNotFound {
        /// Chain id (with algorithm prefix) that failed to resolve.
        chain_id: String,
    },

    /// A storage root directory does not exist.
    #[error("storage root not found at {}", .0.display())]
    RootNotFound(PathBuf),

    /// The metadata source could not be contacted.
    #[error("metadata source {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// Address or path of the metadata source.
        endpoint: String,
        /// Description of the underlying failure.
        reason: String,
    },

    /// The image metadata listed no layers.
    #[error("image has no layers")]
    NoLayers,

    /// A digest is not of the form `sha256:<64 hex characters>`.
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// A name or path pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// Compilation error.
        #[source]
        source: regex_automata::meta::BuildError,
    },

    /// The Docker Engine host URL has an unsupported scheme.
    #[error("invalid engine host {0:?}: expected tcp://, http:// or https://")]
    InvalidEngineHost(String),

    /// On-disk or remote metadata is present but malformed.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A directory inside a layer could not be listed.
    #[error("layer {layer}: cannot read {}: {source}", .path.display())]
    Walk {
        /// Order of the layer being scanned.
        layer: usize,
        /// Host path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The scan was cancelled by the caller.
    #[error("scan cancelled")]
    Cancelled,

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error occurred.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The Docker Engine API answered with an unexpected error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns true for errors that report something absent rather than broken.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ImageNotFound(_) | Error::LayerNotFound { .. } | Error::RootNotFound(_)
        )
    }
}
