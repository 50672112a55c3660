//! `dagen generate` command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use dagen::ops::{generate_workspace, GenerateOptions, GeneratorOutput, Mode, WorkspaceOptions};
use dagen::util::fs::{absolutize, write_string};

use super::{default_manifest, global_context};
use crate::cli::GenerateArgs;

/// File name of the build file inside the build directory.
const NINJA_FILE: &str = "build.ninja";

pub fn execute(args: GenerateArgs, verbose: bool) -> Result<()> {
    let gctx = global_context(verbose)?;
    let cwd = gctx.cwd().to_path_buf();

    let source_dir = absolutize(&cwd, &args.source_dir);
    let build_root = absolutize(&cwd, &args.build_dir);
    let working_dir = absolutize(&cwd, &args.working_dir);
    let manifest_path = match &args.manifest {
        Some(path) => absolutize(&cwd, path),
        None => default_manifest(&source_dir),
    };
    let mode = Mode::from(args.mode);

    let opts = WorkspaceOptions {
        manifest_path,
        cmdline_flags: args.flags,
        generate: GenerateOptions {
            mode,
            source_dir,
            build_root: build_root.clone(),
            working_dir,
            run_args: args.run_args,
            test_args: args.test_args,
            include: args.selection.targets,
            exclude: args.selection.exclude,
            persist_flags: !args.no_persist,
        },
    };

    let output = generate_workspace(&gctx, &opts)?;

    if let Some(ninja) = &output.ninja_file {
        let path = match &args.ninja_file {
            Some(path) => absolutize(&cwd, path),
            None => build_root.join(NINJA_FILE),
        };
        write_string(&path, ninja)?;
        println!(
            "Generated {} ({} targets, configuration {})",
            path.display(),
            output.targets.len(),
            output.config_hash
        );
    }

    if let Some(path) = &args.output {
        write_output(&output, path, &cwd)?;
    }

    Ok(())
}

fn write_output(output: &GeneratorOutput, path: &Path, cwd: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("failed to serialize output")?;
    if path == Path::new("-") {
        println!("{}", json);
        return Ok(());
    }
    let path: PathBuf = absolutize(cwd, path);
    write_string(&path, &json)
}
