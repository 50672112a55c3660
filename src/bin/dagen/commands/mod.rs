//! Command implementations

pub mod completions;
pub mod flags;
pub mod generate;
pub mod targets;

use std::path::{Path, PathBuf};

use anyhow::Result;

use dagen::core::manifest::MANIFEST_FILE;
use dagen::ops::{GenerateOptions, GeneratorOutput, Mode, WorkspaceOptions};
use dagen::util::fs::absolutize;
use dagen::util::GlobalContext;

use crate::cli::InspectArgs;

/// Default build directory, relative to the source directory.
const DEFAULT_BUILD_DIR: &str = "build";

/// Create the global context for a command.
fn global_context(verbose: bool) -> Result<GlobalContext> {
    let mut gctx = GlobalContext::new()?;
    gctx.set_verbose(verbose);
    Ok(gctx)
}

/// Run the generator in an inspection mode for `dagen targets` / `dagen flags`.
fn inspect(args: InspectArgs, mode: Mode, verbose: bool) -> Result<GeneratorOutput> {
    let gctx = global_context(verbose)?;

    let manifest_path = match args.manifest {
        Some(path) => absolutize(gctx.cwd(), &path),
        None => gctx.find_manifest()?,
    };
    let source_dir = manifest_dir(&manifest_path);
    let config = gctx.load_config(&source_dir);

    let build_root = match args.build_dir.or(config.generate.build_dir) {
        Some(dir) => absolutize(&source_dir, &dir),
        None => source_dir.join(DEFAULT_BUILD_DIR),
    };

    let opts = WorkspaceOptions {
        manifest_path,
        cmdline_flags: args.flags,
        generate: GenerateOptions {
            mode,
            source_dir,
            working_dir: gctx.cwd().to_path_buf(),
            build_root,
            include: args.selection.targets,
            exclude: args.selection.exclude,
            // Inspection never changes the persisted configuration.
            persist_flags: false,
            ..Default::default()
        },
    };

    dagen::ops::generate_workspace(&gctx, &opts)
}

fn manifest_dir(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_manifest(source_dir: &Path) -> PathBuf {
    source_dir.join(MANIFEST_FILE)
}
