//! The caller-facing entry point: image identifier in, scoped file records out.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::Result;
use crate::filter::ScopeFilter;
use crate::layer::{resolve_layers, Layer};
use crate::metadata::ImageMetadata;
use crate::store::LayerStore;
use crate::walk::{FileRecord, LayerWalk, ScopedWalker, SkippedPath, WalkOptions};

/// Outcome of [`Locator::locate`].
#[derive(Debug, Default)]
pub struct Scan {
    layers: Vec<Arc<Layer>>,
    records: Vec<FileRecord>,
    skipped: Vec<SkippedPath>,
}

impl Scan {
    /// The image's layers, base first.
    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    /// Matching entries: all of layer 0's in traversal order, then layer 1's,
    /// and so on.
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Subtrees left out under [`OnError::Skip`](crate::walk::OnError::Skip).
    pub fn skipped(&self) -> &[SkippedPath] {
        &self.skipped
    }

    /// True if some part of some layer could not be read.
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Consumes the scan, returning just the records.
    pub fn into_records(self) -> Vec<FileRecord> {
        self.records
    }
}

/// Ties an image metadata source and a layer store together.
pub struct Locator {
    metadata: Box<dyn ImageMetadata>,
    store: Box<dyn LayerStore>,
    options: WalkOptions,
    parallel: bool,
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("options", &self.options)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

impl Locator {
    /// Creates a locator that walks layers one after another with default
    /// [`WalkOptions`].
    pub fn new(metadata: Box<dyn ImageMetadata>, store: Box<dyn LayerStore>) -> Self {
        Self {
            metadata,
            store,
            options: WalkOptions::default(),
            parallel: false,
        }
    }

    /// Replaces the walk options.
    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    /// Walks layers concurrently on the rayon pool.  Output order does not
    /// change.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Current walk options.
    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    /// Looks up an image's diff ids and resolves them into layers.
    ///
    /// # Errors
    ///
    /// Metadata errors ([`Error::ImageNotFound`], [`Error::Unreachable`], ...)
    /// and resolution errors ([`Error::NoLayers`], [`Error::LayerNotFound`],
    /// ...) are passed through.
    ///
    /// [`Error::ImageNotFound`]: crate::Error::ImageNotFound
    /// [`Error::Unreachable`]: crate::Error::Unreachable
    /// [`Error::NoLayers`]: crate::Error::NoLayers
    /// [`Error::LayerNotFound`]: crate::Error::LayerNotFound
    pub fn layers(&self, image_id: &str) -> Result<Vec<Layer>> {
        let diff_ids = self.metadata.diff_ids(image_id)?;
        debug!("{image_id}: {} diff ids", diff_ids.len());
        resolve_layers(&diff_ids, self.store.as_ref())
    }

    /// Finds every entry of `image_id`'s layers that `filter` admits.
    ///
    /// # Errors
    ///
    /// Everything [`Locator::layers`] returns, plus walk errors: under
    /// [`OnError::Abort`](crate::walk::OnError::Abort) the first unreadable
    /// directory fails the whole scan.
    pub fn locate(&self, image_id: &str, filter: &ScopeFilter) -> Result<Scan> {
        let layers: Vec<Arc<Layer>> = self.layers(image_id)?.into_iter().map(Arc::new).collect();
        let walker = ScopedWalker::new(filter, &self.options);

        let walk_layer = |layer: &Arc<Layer>| -> Result<LayerWalk> {
            let root = self.store.extraction_root(layer.cache_id());
            debug!("walking layer {} at {root:?}", layer.order());
            walker.walk(layer, &root)
        };

        // rayon's collect keeps the input order
        let walks: Vec<LayerWalk> = if self.parallel {
            layers.par_iter().map(walk_layer).collect::<Result<_>>()?
        } else {
            layers.iter().map(walk_layer).collect::<Result<_>>()?
        };

        let mut scan = Scan {
            layers,
            ..Default::default()
        };
        for walk in walks {
            scan.records.extend(walk.records);
            scan.skipped.extend(walk.skipped);
        }

        info!(
            "{image_id}: {} records from {} layers{}",
            scan.records.len(),
            scan.layers.len(),
            if scan.is_partial() { " (partial)" } else { "" }
        );
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::AtomicBool;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::digest::hash;
    use crate::error::Error;
    use crate::filter::FileType;
    use crate::metadata::ImageDb;
    use crate::store::Overlay2Store;
    use crate::test::{diff_id, FakeDocker, TreeBuilder};
    use crate::walk::OnError;

    fn locator(docker: &FakeDocker) -> Locator {
        Locator::new(
            Box::new(ImageDb::new(docker.root())),
            Box::new(Overlay2Store::new(docker.root())),
        )
    }

    fn summary(scan: &Scan) -> Vec<(usize, String)> {
        scan.records()
            .iter()
            .map(|r| {
                (
                    r.layer().order(),
                    r.image_path().to_string_lossy().into_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn test_two_layer_image() {
        let docker = FakeDocker::new();
        let diffs = vec![diff_id('a'), diff_id('b')];
        let (image_id, dirs) = docker.add_image(&diffs);
        TreeBuilder::new(&dirs[0]).file("etc/hosts").file("var/x");
        TreeBuilder::new(&dirs[1]).file("usr/bin/tool");

        let locator = locator(&docker);
        let layers = locator.layers(&image_id).unwrap();
        assert_eq!(layers[0].chain_id(), diffs[0]);
        assert_eq!(
            layers[1].chain_id(),
            hash(format!("{} {}", diffs[0], diffs[1]).as_bytes())
        );

        let filter = ScopeFilter::new()
            .with_start_dir("/etc")
            .with_types([FileType::RegularFile]);
        let scan = locator.locate(&image_id, &filter).unwrap();
        assert_eq!(summary(&scan), vec![(0, "/etc/hosts".to_string())]);
        assert_eq!(
            scan.records()[0].host_path(),
            dirs[0].join("etc/hosts")
        );
        assert!(!scan.is_partial());
    }

    #[test]
    fn test_records_attributed_to_their_layer() {
        let docker = FakeDocker::new();
        let (image_id, dirs) = docker.add_image(&[diff_id('1'), diff_id('2'), diff_id('3')]);
        TreeBuilder::new(&dirs[0]).file("etc/os-release").dir("tmp");
        TreeBuilder::new(&dirs[1]).file("etc/hosts");
        TreeBuilder::new(&dirs[2])
            .file("etc/hosts")
            .symlink("etc/localtime", "/usr/share/zoneinfo/UTC");

        let scan = locator(&docker).locate(&image_id, &ScopeFilter::new()).unwrap();
        assert_eq!(
            summary(&scan),
            vec![
                (0, "/etc".to_string()),
                (0, "/etc/os-release".to_string()),
                (0, "/tmp".to_string()),
                (1, "/etc".to_string()),
                (1, "/etc/hosts".to_string()),
                (2, "/etc".to_string()),
                (2, "/etc/hosts".to_string()),
                (2, "/etc/localtime".to_string()),
            ]
        );
        for record in scan.records() {
            assert!(record.host_path().starts_with(&dirs[record.layer().order()]));
        }
    }

    #[test]
    fn test_data_root_behind_symlink() {
        let docker = FakeDocker::new();
        let (image_id, dirs) = docker.add_image(&[diff_id('a')]);
        TreeBuilder::new(&dirs[0]).file("etc/hosts");

        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("docker");
        std::os::unix::fs::symlink(docker.root(), &link).unwrap();

        let store = Overlay2Store::new(&link);
        let locator = Locator::new(Box::new(ImageDb::new(&link)), Box::new(store.clone()));
        let scan = locator.locate(&image_id, &ScopeFilter::new()).unwrap();

        assert_eq!(scan.records().len(), 2);
        let root = store.extraction_root(scan.layers()[0].cache_id());
        assert!(root.starts_with(&link));
        for record in scan.records() {
            assert!(record.host_path().starts_with(&root), "{record:?}");
        }
        assert_eq!(scan.records()[1].host_path(), root.join("etc/hosts"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let docker = FakeDocker::new();
        let diffs: Vec<String> = "0123456789".chars().map(diff_id).collect();
        let (image_id, dirs) = docker.add_image(&diffs);
        for (i, dir) in dirs.iter().enumerate() {
            TreeBuilder::new(dir)
                .file(format!("layer{i}/a"))
                .file(format!("layer{i}/b/c"))
                .file("shared");
        }

        let filter = ScopeFilter::new().with_types([FileType::RegularFile]);
        let sequential = locator(&docker).locate(&image_id, &filter).unwrap();
        let parallel = locator(&docker)
            .with_parallel(true)
            .locate(&image_id, &filter)
            .unwrap();
        assert_eq!(summary(&sequential), summary(&parallel));
        assert_eq!(sequential.records().len(), 30);
    }

    #[test]
    fn test_not_found_distinct_from_unreachable() {
        let docker = FakeDocker::new();
        let err = locator(&docker)
            .locate("sha256:", &ScopeFilter::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDigest(_)), "{err}");

        let err = locator(&docker).locate("alpine", &ScopeFilter::new()).unwrap_err();
        assert!(matches!(err, Error::ImageNotFound(_)), "{err}");
        assert!(err.is_not_found());

        let missing = FakeDocker::new();
        let root = missing.root().join("gone");
        let locator = Locator::new(
            Box::new(ImageDb::new(&root)),
            Box::new(Overlay2Store::new(&root)),
        );
        let err = locator.locate("alpine", &ScopeFilter::new()).unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }), "{err}");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_missing_layer_content() {
        let docker = FakeDocker::new();
        let diffs = vec![diff_id('a'), diff_id('b')];
        let image_id = docker.add_config(&diffs);
        // only the base layer is present locally
        docker.add_layer(&diffs[0], "base");

        let err = locator(&docker).locate(&image_id, &ScopeFilter::new()).unwrap_err();
        assert!(matches!(err, Error::LayerNotFound { .. }), "{err}");
    }

    #[test]
    fn test_unreadable_layer_policies() {
        let docker = FakeDocker::new();
        let (image_id, dirs) = docker.add_image(&[diff_id('a'), diff_id('b')]);
        TreeBuilder::new(&dirs[1]).file("etc/hosts");
        fs::remove_dir(&dirs[0]).unwrap();

        let err = locator(&docker).locate(&image_id, &ScopeFilter::new()).unwrap_err();
        assert!(matches!(err, Error::Walk { layer: 0, .. }), "{err}");

        let options = WalkOptions {
            on_error: OnError::Skip,
            ..Default::default()
        };
        let scan = locator(&docker)
            .with_options(options)
            .locate(&image_id, &ScopeFilter::new())
            .unwrap();
        assert!(scan.is_partial());
        assert_eq!(scan.skipped().len(), 1);
        assert_eq!(scan.skipped()[0].layer, 0);
        assert_eq!(scan.skipped()[0].path, dirs[0]);
        assert_eq!(
            summary(&scan),
            vec![(1, "/etc".to_string()), (1, "/etc/hosts".to_string())]
        );
    }

    #[test]
    fn test_cancelled() {
        let docker = FakeDocker::new();
        let (image_id, dirs) = docker.add_image(&[diff_id('a')]);
        TreeBuilder::new(&dirs[0]).file("etc/hosts");

        let options = WalkOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..Default::default()
        };
        let err = locator(&docker)
            .with_options(options)
            .with_parallel(true)
            .locate(&image_id, &ScopeFilter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "{err}");
    }
}
