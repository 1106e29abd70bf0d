//! Scoped traversal of one layer's extracted content.
//!
//! The walk is a pre-order, depth-first traversal driven by an explicit stack
//! of pending entries.  Siblings are visited in byte-wise name order, so two
//! scans of the same tree report entries in the same order.
//!
//! Symbolic links are classified from `d_type` or `lstat()` data and are never
//! followed.  The extraction root itself is used as given (only made
//! absolute), so every host path stays below the path the layer store
//! reported, even when that path runs through a symlink.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use rustix::fs::{openat, statat, AtFlags, Dir, Mode, OFlags, CWD};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::filter::{FileType, ScopeFilter};
use crate::layer::Layer;

/// Default bound on how deep below the extraction root a walk descends.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// What to do when a directory inside a layer cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Fail the whole scan with [`Error::Walk`].
    #[default]
    Abort,
    /// Skip the unreadable subtree, record it as a [`SkippedPath`] and go on.
    Skip,
}

/// Knobs for a layer walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Entries deeper than this (the extraction root's children are at depth
    /// 1) are neither reported nor descended into.
    pub max_depth: usize,
    /// Policy for unreadable directories.
    pub on_error: OnError,
    /// Checked before every directory listing; once set the walk stops with
    /// [`Error::Cancelled`].
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            on_error: OnError::default(),
            cancel: None,
        }
    }
}

/// One matched filesystem entry.
#[derive(Debug, Clone)]
pub struct FileRecord {
    layer: Arc<Layer>,
    file_type: FileType,
    host_path: PathBuf,
    image_path: PathBuf,
}

impl FileRecord {
    /// The layer whose extracted content contains this entry.
    pub fn layer(&self) -> &Arc<Layer> {
        &self.layer
    }

    /// Kind of the entry.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Absolute location on the host, inside the layer's extraction root.
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Location inside the image's root filesystem; always starts with `/`.
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }
}

/// A subtree that was left out of a scan under [`OnError::Skip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    /// Order of the affected layer.
    pub layer: usize,
    /// Host path that could not be read.
    pub path: PathBuf,
    /// Why it could not be read.
    pub reason: String,
}

/// Result of walking one layer.
#[derive(Debug, Default)]
pub struct LayerWalk {
    /// Matching entries, in traversal order.
    pub records: Vec<FileRecord>,
    /// Subtrees that could not be read.  Always empty under [`OnError::Abort`].
    pub skipped: Vec<SkippedPath>,
}

struct Pending {
    host_path: PathBuf,
    image_path: PathBuf,
    depth: usize,
    file_type: FileType,
}

fn classify(file_type: rustix::fs::FileType) -> Option<FileType> {
    match file_type {
        rustix::fs::FileType::Symlink => Some(FileType::SymbolicLink),
        rustix::fs::FileType::Directory => Some(FileType::Directory),
        rustix::fs::FileType::RegularFile => Some(FileType::RegularFile),
        _ => None,
    }
}

/// Children of one directory, sorted by name.
#[derive(Debug, Default)]
struct Listing {
    children: Vec<(OsString, FileType)>,
    /// Entries whose type could not be determined.
    unreadable: Vec<(OsString, std::io::Error)>,
}

/// Lists a directory, sorted by name.  Entries that are neither directories,
/// regular files nor symlinks are dropped, as are entries that vanish between
/// `readdir()` and `lstat()`.
///
/// The extraction root may be reached through a symlink; below it nothing is
/// opened through one.
fn list_dir(path: &Path, follow: bool) -> std::io::Result<Listing> {
    let mut flags = OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC;
    if !follow {
        flags |= OFlags::NOFOLLOW;
    }
    let fd = openat(CWD, path, flags, Mode::empty())?;

    let mut listing = Listing::default();
    for item in Dir::read_from(&fd)? {
        let entry = item?;
        let name = OsStr::from_bytes(entry.file_name().to_bytes());

        if name == "." || name == ".." {
            continue;
        }

        // d_type is not reliable on every filesystem
        let ifmt = match entry.file_type() {
            rustix::fs::FileType::Unknown => {
                match statat(&fd, entry.file_name(), AtFlags::SYMLINK_NOFOLLOW) {
                    Ok(stat) => rustix::fs::FileType::from_raw_mode(stat.st_mode),
                    Err(rustix::io::Errno::NOENT) => {
                        trace!("{:?} vanished while listing", path.join(name));
                        continue;
                    }
                    Err(errno) => {
                        listing.unreadable.push((name.to_os_string(), errno.into()));
                        continue;
                    }
                }
            }
            ifmt => ifmt,
        };

        match classify(ifmt) {
            Some(file_type) => listing.children.push((name.to_os_string(), file_type)),
            None => trace!("ignoring {ifmt:?} {:?}", path.join(name)),
        }
    }

    listing
        .children
        .sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
    listing
        .unreadable
        .sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
    Ok(listing)
}

/// Walks layers' extracted trees, reporting entries that pass a [`ScopeFilter`].
#[derive(Debug, Clone, Copy)]
pub struct ScopedWalker<'a> {
    filter: &'a ScopeFilter,
    options: &'a WalkOptions,
}

impl<'a> ScopedWalker<'a> {
    /// Creates a walker; it can be reused for any number of layers.
    pub fn new(filter: &'a ScopeFilter, options: &'a WalkOptions) -> Self {
        Self { filter, options }
    }

    /// Walks the tree at `extraction_root`, attributing every record to `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Walk`] for an unreadable directory under
    /// [`OnError::Abort`], and [`Error::Cancelled`] if the cancellation flag
    /// is raised.
    pub fn walk(&self, layer: &Arc<Layer>, extraction_root: &Path) -> Result<LayerWalk> {
        let mut scan = LayerScan {
            walker: self,
            layer,
            stack: vec![],
            output: LayerWalk::default(),
            ceiling_reached: false,
        };

        let root = match std::path::absolute(extraction_root) {
            Ok(root) => root,
            Err(source) => {
                scan.failed(extraction_root, source)?;
                return Ok(scan.output);
            }
        };

        scan.push_children(&root, Path::new("/"), 1)?;
        scan.run()?;
        Ok(scan.output)
    }
}

/// State of a single layer walk.
struct LayerScan<'w, 'a> {
    walker: &'w ScopedWalker<'a>,
    layer: &'w Arc<Layer>,
    stack: Vec<Pending>,
    output: LayerWalk,
    ceiling_reached: bool,
}

impl LayerScan<'_, '_> {
    fn run(&mut self) -> Result<()> {
        while let Some(entry) = self.stack.pop() {
            self.visit(entry)?;
        }
        Ok(())
    }

    fn visit(&mut self, entry: Pending) -> Result<()> {
        let filter = self.walker.filter;
        let is_dir = entry.file_type == FileType::Directory;

        let in_scope = if is_dir {
            filter.descends_into(&entry.image_path)
        } else {
            filter.covers(&entry.image_path)
        };

        if in_scope && filter.accepts(entry.file_type, &entry.image_path) {
            trace!("layer {}: {} {:?}", self.layer.order(), entry.file_type, entry.image_path);
            self.output.records.push(FileRecord {
                layer: Arc::clone(self.layer),
                file_type: entry.file_type,
                host_path: entry.host_path.clone(),
                image_path: entry.image_path.clone(),
            });
        }

        if is_dir && in_scope {
            self.push_children(&entry.host_path, &entry.image_path, entry.depth + 1)?;
        }
        Ok(())
    }

    fn push_children(&mut self, host_dir: &Path, image_dir: &Path, depth: usize) -> Result<()> {
        let options = self.walker.options;

        if let Some(cancel) = &options.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }

        if depth > options.max_depth {
            if !self.ceiling_reached {
                warn!(
                    "layer {}: not descending below {:?}, depth limit {} reached",
                    self.layer.order(),
                    image_dir,
                    options.max_depth
                );
                self.ceiling_reached = true;
            }
            return Ok(());
        }

        match list_dir(host_dir, depth == 1) {
            Ok(listing) => {
                for (name, source) in listing.unreadable {
                    self.failed(&host_dir.join(name), source)?;
                }
                // reversed, so that the first name is popped first
                for (name, file_type) in listing.children.into_iter().rev() {
                    self.stack.push(Pending {
                        host_path: host_dir.join(&name),
                        image_path: image_dir.join(&name),
                        depth,
                        file_type,
                    });
                }
                Ok(())
            }
            Err(source) => self.failed(host_dir, source),
        }
    }

    fn failed(&mut self, path: &Path, source: std::io::Error) -> Result<()> {
        let layer = self.layer.order();
        match self.walker.options.on_error {
            OnError::Abort => Err(Error::Walk {
                layer,
                path: path.to_path_buf(),
                source,
            }),
            OnError::Skip => {
                warn!("layer {layer}: skipping {path:?}: {source}");
                self.output.skipped.push(SkippedPath {
                    layer,
                    path: path.to_path_buf(),
                    reason: source.to_string(),
                });
                Ok(())
            }
        }
    }
}
