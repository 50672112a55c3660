//! Manifest fixtures for common test scenarios.

use std::path::{Path, PathBuf};

/// A workspace on disk: a manifest plus source files.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceFixture {
    /// dagen.toml content.
    pub manifest: String,
    /// Source files (path relative to the workspace root -> content).
    pub sources: Vec<(PathBuf, String)>,
}

impl WorkspaceFixture {
    pub fn new(manifest: impl Into<String>) -> Self {
        WorkspaceFixture {
            manifest: manifest.into(),
            sources: Vec::new(),
        }
    }

    /// The two-target workspace: `Foo` compiles `src/foo.c`, `Bar` consumes
    /// Foo's output.
    pub fn foo_bar() -> Self {
        WorkspaceFixture::new(manifests::FOO_BAR)
            .with_source("src/foo.c", "int main(void) { return 0; }\n")
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.sources.push((path.into(), content.into()));
        self
    }

    /// Write the workspace below `root` and return the manifest path.
    pub fn write_to(&self, root: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(root)?;
        let manifest = root.join("dagen.toml");
        std::fs::write(&manifest, &self.manifest)?;
        for (path, content) in &self.sources {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, content)?;
        }
        Ok(manifest)
    }
}

/// Manifest templates.
pub mod manifests {
    /// `Foo` builds `out/foo.bin`, `Bar` builds `out/bar.bin` from it.
    pub const FOO_BAR: &str = r#"
[flags.opt]
type = "string"
description = "Optimization level"
allowed = ["0", "2"]
default = "0"

[targets.Foo]
description = "Compile foo"

[[targets.Foo.steps]]
inputs = ["src/foo.c"]
outputs = ["out/foo.bin"]
command = "cc -O{{opt}} -o $out $in"

[targets.Bar]
description = "Package bar"

[[targets.Bar.steps]]
inputs = ["out:out/foo.bin"]
outputs = ["out/bar.bin"]
command = "cp $in $out"
"#;
}
