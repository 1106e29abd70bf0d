use std::{
    collections::HashMap,
    ffi::OsStr,
    fs::{create_dir_all, write},
    os::unix::{ffi::OsStrExt, fs::symlink},
    path::{Path, PathBuf},
};

use similar_asserts::assert_eq;
use tempfile::TempDir;

use layerfind::{
    chain_id, chain_ids,
    filter::{is_ancestor, on_path_to},
    Error, FileType, ImageMetadata, LayerStore, Locator, Result, Scan, ScopeFilter,
};

/// Image metadata held in memory.
struct Images(HashMap<String, Vec<String>>);

impl ImageMetadata for Images {
    fn diff_ids(&self, image_id: &str) -> Result<Vec<String>> {
        self.0
            .get(image_id)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(image_id.to_string()))
    }
}

/// A layer store that keeps each layer under `<root>/<chain hex>`.
struct FlatStore(PathBuf);

impl LayerStore for FlatStore {
    fn cache_id(&self, chain_hex: &str) -> Result<String> {
        if self.0.join(chain_hex).is_dir() {
            Ok(chain_hex.to_string())
        } else {
            Err(Error::LayerNotFound {
                chain_id: format!("sha256:{chain_hex}"),
            })
        }
    }

    fn extraction_root(&self, cache_id: &str) -> PathBuf {
        self.0.join(cache_id)
    }
}

fn diff(c: char) -> String {
    format!("sha256:{}", c.to_string().repeat(64))
}

fn touch(path: &Path) {
    create_dir_all(path.parent().unwrap()).unwrap();
    write(path, b"").unwrap();
}

/// Two-layer image "app" with a base system and an application layer.
fn fixture() -> (TempDir, Locator, Vec<PathBuf>) {
    let tmp = TempDir::new().unwrap();
    let diffs = vec![diff('a'), diff('b')];

    let mut roots = vec![];
    for chain in chain_ids(&diffs).unwrap() {
        let root = tmp.path().join(&chain[7..]);
        create_dir_all(&root).unwrap();
        roots.push(root);
    }

    touch(&roots[0].join("etc/passwd"));
    touch(&roots[0].join("etc/ssl/openssl.cnf"));
    touch(&roots[0].join("etcfoo/decoy"));
    touch(&roots[0].join("var/log/x"));
    symlink("/etc", roots[0].join("var/etc")).unwrap();
    touch(&roots[1].join("etc/app/app.conf"));
    touch(&roots[1].join(OsStr::from_bytes(b"etc/app/caf\xe9.conf")));
    symlink("/nonexistent", roots[1].join("etc/app/current")).unwrap();

    let locator = Locator::new(
        Box::new(Images(HashMap::from([("app".to_string(), diffs)]))),
        Box::new(FlatStore(tmp.path().to_path_buf())),
    );
    (tmp, locator, roots)
}

fn paths(scan: &Scan) -> Vec<(usize, String)> {
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
fn test_chain_id_properties() {
    let diffs = vec![diff('a'), diff('b'), diff('c')];
    let chain = chain_ids(&diffs).unwrap();
    assert_eq!(chain[0], diffs[0]);
    assert_eq!(chain[1], chain_id(&chain[0], &diffs[1]));
    assert_eq!(chain[2], chain_id(&chain[1], &diffs[2]));

    let swapped = chain_ids(&[diff('b'), diff('a'), diff('c')]).unwrap();
    assert!(swapped[1] != chain[1]);
    assert!(swapped[2] != chain[2]);
}

#[test]
fn test_ancestry() {
    assert!(is_ancestor("/etc", "/etc/ssl"));
    assert!(!is_ancestor("/etc", "/etcfoo"));
    assert!(!is_ancestor("/etc", "/etc"));
    assert!(on_path_to("/etc/ssl", "/etc"));
    assert!(on_path_to("/etc", "/etc/ssl/certs"));
    assert!(!on_path_to("/etc", "/etcfoo"));
}

#[test]
fn test_start_dir_scope() {
    let (_tmp, locator, _) = fixture();

    let filter = ScopeFilter::new().with_start_dir("/etc");
    let scan = locator.locate("app", &filter).unwrap();
    assert_eq!(
        paths(&scan),
        vec![
            (0, "/etc".to_string()),
            (0, "/etc/passwd".to_string()),
            (0, "/etc/ssl".to_string()),
            (0, "/etc/ssl/openssl.cnf".to_string()),
            (1, "/etc".to_string()),
            (1, "/etc/app".to_string()),
            (1, "/etc/app/app.conf".to_string()),
            (1, "/etc/app/caf\u{fffd}.conf".to_string()),
            (1, "/etc/app/current".to_string()),
        ]
    );
}

#[test]
fn test_symlinks_reported_not_followed() {
    let (_tmp, locator, _) = fixture();

    let filter = ScopeFilter::new().with_types([FileType::SymbolicLink]);
    let scan = locator.locate("app", &filter).unwrap();
    assert_eq!(
        paths(&scan),
        vec![
            (0, "/var/etc".to_string()),
            (1, "/etc/app/current".to_string()),
        ]
    );
    for record in scan.records() {
        assert_eq!(record.file_type(), FileType::SymbolicLink);
        assert!(record.host_path().symlink_metadata().unwrap().is_symlink());
    }
}

#[test]
fn test_patterns_are_conjunctive() {
    let (_tmp, locator, roots) = fixture();

    let filter = ScopeFilter::new()
        .with_name_regex(r".*\.conf")
        .unwrap()
        .with_full_path_regex(r"/etc/app/caf.\.conf")
        .unwrap();
    let scan = locator.locate("app", &filter).unwrap();
    assert_eq!(scan.records().len(), 1);

    let record = &scan.records()[0];
    assert_eq!(record.layer().order(), 1);
    assert_eq!(record.file_type(), FileType::RegularFile);
    assert_eq!(
        record.image_path().as_os_str().as_bytes(),
        b"/etc/app/caf\xe9.conf"
    );
    assert_eq!(
        record.host_path(),
        roots[1].join(OsStr::from_bytes(b"etc/app/caf\xe9.conf"))
    );
}

#[test]
fn test_errors() {
    let (tmp, locator, roots) = fixture();

    assert!(matches!(
        ScopeFilter::new().with_name_regex("("),
        Err(Error::InvalidPattern { .. })
    ));
    assert!(matches!(
        locator.locate("missing", &ScopeFilter::new()),
        Err(Error::ImageNotFound(_))
    ));

    std::fs::remove_dir_all(&roots[1]).unwrap();
    assert!(matches!(
        locator.layers("app"),
        Err(Error::LayerNotFound { .. })
    ));
    drop(tmp);
}
