//! Locate the extracted layers of a local container image and search them.
//!
//! Given an image identifier, layerfind asks an image metadata source for the
//! image's ordered diff ids, derives each layer's chain id, looks up where the
//! layer store keeps the layer's extracted content, and walks every layer's
//! tree, reporting the entries that fall inside a [`ScopeFilter`].
//!
//! Layers are reported individually.  Nothing is merged into a union view, so
//! a file present in two layers shows up twice, attributed to each layer.
//!
//! # Example
//!
//! ```no_run
//! use layerfind::{FileType, ImageDb, Locator, Overlay2Store, ScopeFilter};
//!
//! let locator = Locator::new(
//!     Box::new(ImageDb::new("/var/lib/docker")),
//!     Box::new(Overlay2Store::new("/var/lib/docker")),
//! );
//! let filter = ScopeFilter::new()
//!     .with_start_dir("/etc")
//!     .with_types([FileType::RegularFile])
//!     .with_name_regex(r".*\.conf")?;
//!
//! for record in locator.locate("alpine:latest", &filter)?.records() {
//!     println!(
//!         "layer {} {} -> {}",
//!         record.layer().order(),
//!         record.image_path().display(),
//!         record.host_path().display()
//!     );
//! }
//! # Ok::<(), layerfind::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`metadata`] and [`engine`]: image id to diff ids ([`ImageMetadata`]).
//! - [`layer`] and [`digest`]: diff ids to chain ids and [`Layer`] records.
//! - [`store`]: chain id to extraction root ([`LayerStore`]).
//! - [`filter`] and [`walk`]: scoped traversal of one layer.
//! - [`locator`]: the pieces put together.

pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod filter;
pub mod layer;
pub mod locator;
pub mod metadata;
pub mod store;
pub mod walk;


pub use config::{EngineSection, FinderConfig};
pub use digest::chain_id;
pub use engine::{EngineClient, EngineConfig};
pub use error::{Error, Result};
pub use filter::{FileType, ScopeFilter};
pub use layer::{chain_ids, resolve_layers, Layer};
pub use locator::{Locator, Scan};
pub use metadata::{ImageDb, ImageMetadata};
pub use store::{LayerStore, Overlay2Store};
pub use walk::{FileRecord, OnError, ScopedWalker, SkippedPath, WalkOptions};
