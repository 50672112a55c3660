//! Path model - source, build-output and global paths.
//!
//! Build-output paths are namespaced by the configuration hash of the run
//! that produced them: `<build root>/<hash>/<relative>`. Two output paths
//! created under different hashes never compare equal, even when their
//! relative components match.
//!
//! Paths use `/` as separator regardless of platform, since they end up in
//! a Ninja file.

use std::fmt;
use std::sync::Arc;

use crate::core::flags::ConfigHash;

/// Roots of a generation run: where sources live, where outputs go, and the
/// configuration hash that namespaces outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    source_dir: Arc<str>,
    build_root: Arc<str>,
    hash: ConfigHash,
}

impl Layout {
    /// Create a layout from absolute source and build roots.
    pub fn new(
        source_dir: impl Into<String>,
        build_root: impl Into<String>,
        hash: ConfigHash,
    ) -> Self {
        Layout {
            source_dir: Arc::from(source_dir.into()),
            build_root: Arc::from(build_root.into()),
            hash,
        }
    }

    /// Root of the source tree.
    pub fn source_dir(&self) -> &str {
        &self.source_dir
    }

    /// Root of the build tree, shared by all configurations.
    pub fn build_root(&self) -> &str {
        &self.build_root
    }

    /// Configuration hash of this layout.
    pub fn hash(&self) -> &ConfigHash {
        &self.hash
    }

    /// Output directory of this configuration (`<build root>/<hash>`).
    pub fn build_dir(&self) -> String {
        join(&self.build_root, self.hash.as_str())
    }

    /// A path relative to the source directory.
    pub fn source(&self, rel: impl Into<String>) -> SourcePath {
        SourcePath {
            root: Arc::clone(&self.source_dir),
            rel: clean(rel.into()),
        }
    }

    /// A path relative to the build directory of this configuration.
    pub fn out(&self, rel: impl Into<String>) -> OutPath {
        OutPath {
            root: Arc::clone(&self.build_root),
            hash: self.hash.clone(),
            rel: clean(rel.into()),
        }
    }

    /// The build-tree mirror of a source path.
    pub fn out_for(&self, src: &SourcePath) -> OutPath {
        self.out(src.rel.clone())
    }
}

/// A path relative to the workspace source directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePath {
    root: Arc<str>,
    rel: String,
}

impl SourcePath {
    /// Returns the absolute path.
    pub fn absolute(&self) -> String {
        join(&self.root, &self.rel)
    }

    /// Returns the path relative to the source directory.
    pub fn relative(&self) -> &str {
        &self.rel
    }
}

/// A path relative to the build directory of one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPath {
    root: Arc<str>,
    hash: ConfigHash,
    rel: String,
}

impl OutPath {
    /// Returns the absolute path.
    pub fn absolute(&self) -> String {
        join(&self.root, &self.relative())
    }

    /// Returns the path relative to the build root, including the hash segment.
    pub fn relative(&self) -> String {
        join(self.hash.as_str(), &self.rel)
    }

    /// Returns the path inside the configuration directory.
    pub fn rel(&self) -> &str {
        &self.rel
    }

    /// Configuration hash this path was created under.
    pub fn hash(&self) -> &ConfigHash {
        &self.hash
    }

    /// Same path with the extension of the final component replaced.
    pub fn with_ext(&self, ext: &str) -> OutPath {
        let ext = ext.trim_start_matches('.');
        let (dir, file) = split_last(&self.rel);
        let stem = match file.rfind('.') {
            Some(idx) if idx > 0 => &file[..idx],
            _ => file,
        };
        self.derive(join(dir, &format!("{}.{}", stem, ext)))
    }

    /// Same path with `suffix` appended to the final component.
    pub fn with_suffix(&self, suffix: &str) -> OutPath {
        self.derive(format!("{}{}", self.rel, suffix))
    }

    /// Same directory, different final component.
    pub fn with_filename(&self, filename: &str) -> OutPath {
        let (dir, _) = split_last(&self.rel);
        self.derive(join(dir, filename))
    }

    /// Same relative path below an additional leading directory.
    pub fn with_prefix(&self, prefix: &str) -> OutPath {
        self.derive(join(prefix, &self.rel))
    }

    /// A path below this one.
    pub fn join(&self, rel: &str) -> OutPath {
        self.derive(join(&self.rel, rel))
    }

    fn derive(&self, rel: String) -> OutPath {
        OutPath {
            root: Arc::clone(&self.root),
            hash: self.hash.clone(),
            rel: clean(rel),
        }
    }
}

/// An absolute path outside both trees, such as a system tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalPath {
    abs: String,
}

impl GlobalPath {
    pub fn new(abs: impl Into<String>) -> Self {
        GlobalPath { abs: abs.into() }
    }

    pub fn absolute(&self) -> String {
        self.abs.clone()
    }
}

/// Any path that can be an input to a build step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Path {
    Source(SourcePath),
    Out(OutPath),
    Global(GlobalPath),
}

impl Path {
    /// Returns the absolute path.
    pub fn absolute(&self) -> String {
        match self {
            Path::Source(p) => p.absolute(),
            Path::Out(p) => p.absolute(),
            Path::Global(p) => p.absolute(),
        }
    }

    /// Returns the path relative to its root. Global paths are returned as-is.
    pub fn relative(&self) -> String {
        match self {
            Path::Source(p) => p.relative().to_string(),
            Path::Out(p) => p.relative(),
            Path::Global(p) => p.absolute(),
        }
    }

    /// The build-output path, if this is one.
    pub fn as_out(&self) -> Option<&OutPath> {
        match self {
            Path::Out(p) => Some(p),
            _ => None,
        }
    }
}

impl From<SourcePath> for Path {
    fn from(p: SourcePath) -> Self {
        Path::Source(p)
    }
}

impl From<OutPath> for Path {
    fn from(p: OutPath) -> Self {
        Path::Out(p)
    }
}

impl From<&OutPath> for Path {
    fn from(p: &OutPath) -> Self {
        Path::Out(p.clone())
    }
}

impl From<GlobalPath> for Path {
    fn from(p: GlobalPath) -> Self {
        Path::Global(p)
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute())
    }
}

impl fmt::Display for OutPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute())
    }
}

/// Join two `/`-separated paths. Empty components are skipped.
pub(crate) fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        return rel.to_string();
    }
    if rel.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

/// Directory part of a `/`-separated path ("" for a bare name).
pub(crate) fn dirname(path: &str) -> &str {
    split_last(path).0
}

fn split_last(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", path),
    }
}

fn clean(rel: String) -> String {
    let trimmed = rel.trim_start_matches("./").trim_end_matches('/');
    if trimmed == "." {
        String::new()
    } else if trimmed.len() == rel.len() {
        rel
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(hash: &str) -> Layout {
        Layout::new("/src", "/build", ConfigHash::new(hash))
    }

    #[test]
    fn test_source_path_projections() {
        let src = layout("AAAA0000").source("pkg/foo.c");
        assert_eq!(src.relative(), "pkg/foo.c");
        assert_eq!(src.absolute(), "/src/pkg/foo.c");
    }

    #[test]
    fn test_out_path_carries_hash() {
        let out = layout("AAAA0000").out("pkg/foo.o");
        assert_eq!(out.relative(), "AAAA0000/pkg/foo.o");
        assert_eq!(out.absolute(), "/build/AAAA0000/pkg/foo.o");
        assert_eq!(out.rel(), "pkg/foo.o");
    }

    #[test]
    fn test_paths_with_different_hashes_differ() {
        let a = layout("AAAA0000").out("foo.o");
        let b = layout("BBBB1111").out("foo.o");
        assert_eq!(a.rel(), b.rel());
        assert_ne!(a, b);
        assert_ne!(Path::from(a), Path::from(b));
    }

    #[test]
    fn test_with_ext() {
        let l = layout("AAAA0000");
        assert_eq!(l.out("dir/foo.c").with_ext("o").rel(), "dir/foo.o");
        assert_eq!(l.out("dir/foo").with_ext(".d").rel(), "dir/foo.d");
        assert_eq!(l.out("a.b/foo.tar.gz").with_ext("zip").rel(), "a.b/foo.tar.zip");
        assert_eq!(l.out(".hidden").with_ext("x").rel(), ".hidden.x");
    }

    #[test]
    fn test_with_suffix_filename_prefix() {
        let p = layout("AAAA0000").out("dir/foo.c");
        assert_eq!(p.with_suffix(".o").rel(), "dir/foo.c.o");
        assert_eq!(p.with_filename("bar.a").rel(), "dir/bar.a");
        assert_eq!(p.with_prefix("obj").rel(), "obj/dir/foo.c");
        assert_eq!(layout("AAAA0000").out("").join("x.o").rel(), "x.o");
    }

    #[test]
    fn test_derivations_do_not_mutate() {
        let p = layout("AAAA0000").out("foo.c");
        let _ = p.with_ext("o");
        let _ = p.with_suffix("~");
        assert_eq!(p.rel(), "foo.c");
    }

    #[test]
    fn test_out_for_mirrors_source() {
        let l = layout("AAAA0000");
        let src = l.source("lib/util.c");
        assert_eq!(l.out_for(&src).with_ext("o").absolute(), "/build/AAAA0000/lib/util.o");
    }

    #[test]
    fn test_clean_and_dirname() {
        let l = layout("AAAA0000");
        assert_eq!(l.source("./a/b.c").relative(), "a/b.c");
        assert_eq!(l.out(".").rel(), "");
        assert_eq!(dirname("pkg/sub/Foo"), "pkg/sub");
        assert_eq!(dirname("Foo"), "");
    }

    #[test]
    fn test_global_path() {
        let p = Path::from(GlobalPath::new("/usr/bin/gcc"));
        assert_eq!(p.absolute(), "/usr/bin/gcc");
        assert_eq!(p.relative(), "/usr/bin/gcc");
        assert!(p.as_out().is_none());
    }
}
