//! Scope and pattern filters applied while scanning a layer.
//!
//! Paths are compared byte-wise so that file names which are not valid UTF-8
//! still scope and match correctly.

use std::collections::BTreeSet;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex_automata::meta;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of a reported filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    /// A directory.
    Directory,
    /// A regular file.
    RegularFile,
    /// A symbolic link, whatever it points to.
    SymbolicLink,
}

impl FileType {
    /// Every file type, in declaration order.
    pub const ALL: [FileType; 3] = [
        FileType::Directory,
        FileType::RegularFile,
        FileType::SymbolicLink,
    ];

    /// Short name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Directory => "dir",
            FileType::RegularFile => "file",
            FileType::SymbolicLink => "symlink",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "d" | "dir" | "directory" => Ok(FileType::Directory),
            "f" | "file" | "regular-file" => Ok(FileType::RegularFile),
            "l" | "symlink" | "symbolic-link" => Ok(FileType::SymbolicLink),
            other => Err(format!("unknown file type {other:?}")),
        }
    }
}

/// A compiled regular expression that must match its whole input.
///
/// Patterns are Unicode aware: `.` matches one character and `\w` covers
/// non-ASCII letters.  Names that are not valid UTF-8 are matched in their
/// lossy form, where each invalid sequence reads as U+FFFD.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: meta::Regex,
}

impl Pattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = meta::Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as originally supplied.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the pattern matches all of `haystack`.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.regex.is_match(String::from_utf8_lossy(haystack).as_bytes())
    }
}

/// Returns true if `ancestor` is a proper ancestor directory of `path`.
///
/// The match must end on a component boundary: `/etc` is an ancestor of
/// `/etc/ssl` but not of `/etcfoo`, and no path is its own ancestor.
pub fn is_ancestor(ancestor: impl AsRef<Path>, path: impl AsRef<Path>) -> bool {
    let ancestor = ancestor.as_ref().as_os_str().as_bytes();
    let path = path.as_ref().as_os_str().as_bytes();

    if ancestor == b"/" {
        return path.len() > 1 && path[0] == b'/';
    }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.len() > 1 && rest[0] == b'/',
        None => false,
    }
}

/// Returns true if `a` and `b` lie on one root-to-leaf line: they are equal,
/// or either one is an ancestor of the other.
pub fn on_path_to(a: impl AsRef<Path>, b: impl AsRef<Path>) -> bool {
    let (a, b) = (a.as_ref(), b.as_ref());
    a.as_os_str() == b.as_os_str() || is_ancestor(a, b) || is_ancestor(b, a)
}

/// Normalises a caller supplied start directory: makes it absolute, drops
/// trailing slashes, and maps the root itself to "no restriction".
fn normalize_start_dir(dir: &Path) -> Option<PathBuf> {
    let mut bytes = dir.as_os_str().as_bytes();
    while let Some(rest) = bytes.strip_suffix(b"/") {
        bytes = rest;
    }
    if bytes.is_empty() {
        return None;
    }

    let mut normalized = Vec::with_capacity(bytes.len() + 1);
    if bytes[0] != b'/' {
        normalized.push(b'/');
    }
    normalized.extend_from_slice(bytes);
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(&normalized)))
}

/// Caller supplied criteria for one scan.
///
/// By default a filter matches every entry of every type anywhere in the
/// image.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    start_dir: Option<PathBuf>,
    allowed_types: BTreeSet<FileType>,
    name_regex: Option<Pattern>,
    full_path_regex: Option<Pattern>,
}

impl Default for ScopeFilter {
    fn default() -> Self {
        Self {
            start_dir: None,
            allowed_types: FileType::ALL.into_iter().collect(),
            name_regex: None,
            full_path_regex: None,
        }
    }
}

impl ScopeFilter {
    /// A filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the scan to `dir` (an image path such as `/etc`).  An empty
    /// path or `/` removes the restriction.
    pub fn with_start_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.start_dir = normalize_start_dir(dir.as_ref());
        self
    }

    /// Only report entries of the given types.
    pub fn with_types(mut self, types: impl IntoIterator<Item = FileType>) -> Self {
        self.allowed_types = types.into_iter().collect();
        self
    }

    /// Only report entries whose base name fully matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn with_name_regex(mut self, pattern: &str) -> Result<Self> {
        self.name_regex = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    /// Only report entries whose image path fully matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn with_full_path_regex(mut self, pattern: &str) -> Result<Self> {
        self.full_path_regex = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    /// The normalised start directory, if the scan is restricted.
    pub fn start_dir(&self) -> Option<&Path> {
        self.start_dir.as_deref()
    }

    /// The set of reported types.
    pub fn allowed_types(&self) -> &BTreeSet<FileType> {
        &self.allowed_types
    }

    /// The base name pattern, if any.
    pub fn name_regex(&self) -> Option<&Pattern> {
        self.name_regex.as_ref()
    }

    /// The image path pattern, if any.
    pub fn full_path_regex(&self) -> Option<&Pattern> {
        self.full_path_regex.as_ref()
    }

    /// Whether a directory at `image_path` should be descended into.
    ///
    /// Directories above the start directory must be traversed to reach it,
    /// so this holds for ancestors of the start directory as well as for the
    /// start directory and everything below it.
    pub fn descends_into(&self, image_path: &Path) -> bool {
        match &self.start_dir {
            None => true,
            Some(start) => on_path_to(start, image_path),
        }
    }

    /// Whether a non-directory entry at `image_path` is within scope.
    pub fn covers(&self, image_path: &Path) -> bool {
        match &self.start_dir {
            None => true,
            Some(start) => {
                start.as_os_str() == image_path.as_os_str() || is_ancestor(start, image_path)
            }
        }
    }

    /// Applies the type and pattern checks to an in-scope entry.
    pub fn accepts(&self, file_type: FileType, image_path: &Path) -> bool {
        if !self.allowed_types.contains(&file_type) {
            return false;
        }
        if let Some(pattern) = &self.name_regex {
            let name = image_path.file_name().map(|n| n.as_bytes()).unwrap_or_default();
            if !pattern.is_match(name) {
                return false;
            }
        }
        if let Some(pattern) = &self.full_path_regex {
            if !pattern.is_match(image_path.as_os_str().as_bytes()) {
                return false;
            }
        }
        true
    }
}
