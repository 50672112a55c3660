//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use dagen::ops::Mode;

/// dagen - generate Ninja build files from build targets
#[derive(Parser)]
#[command(name = "dagen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the build file for a workspace
    Generate(GenerateArgs),

    /// List the exported targets of a workspace
    Targets(InspectArgs),

    /// Show the resolved configuration flags
    Flags(InspectArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Build,
    List,
    Run,
    Test,
    Flags,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Build => Mode::Build,
            ModeArg::List => Mode::List,
            ModeArg::Run => Mode::Run,
            ModeArg::Test => Mode::Test,
            ModeArg::Flags => Mode::Flags,
        }
    }
}

#[derive(Args)]
pub struct GenerateArgs {
    /// What to generate
    #[arg(value_enum)]
    pub mode: ModeArg,

    /// Workspace source directory
    pub source_dir: PathBuf,

    /// Build directory; outputs go to a per-configuration subdirectory
    pub build_dir: PathBuf,

    /// Directory printed output paths are relative to
    pub working_dir: PathBuf,

    /// Flag overrides (`name=value`, or `name` for true)
    pub flags: Vec<String>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Path to dagen.toml (defaults to <SOURCE_DIR>/dagen.toml)
    #[arg(long, env = "DAGEN_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Argument appended to run commands (repeatable)
    #[arg(long = "run-arg", allow_hyphen_values = true)]
    pub run_args: Vec<String>,

    /// Argument appended to test commands (repeatable)
    #[arg(long = "test-arg", allow_hyphen_values = true)]
    pub test_args: Vec<String>,

    /// Don't write resolved flags to <BUILD_DIR>/FLAGS.json
    #[arg(long)]
    pub no_persist: bool,

    /// Write the JSON result document to this path (`-` for stdout)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Where to write the build file (defaults to <BUILD_DIR>/build.ninja)
    #[arg(long)]
    pub ninja_file: Option<PathBuf>,
}

#[derive(Args, Default)]
pub struct SelectionArgs {
    /// Select targets matching this pattern (repeatable; default all)
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// Deselect targets matching this pattern (repeatable)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Flag overrides (`name=value`, or `name` for true)
    pub flags: Vec<String>,

    /// Path to dagen.toml (defaults to searching upward from the current directory)
    #[arg(long, env = "DAGEN_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Build directory holding persisted flags
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Print the JSON result document instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
