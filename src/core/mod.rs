//! Core data structures for dagen.
//!
//! This module contains the foundational types used throughout dagen:
//! - Paths namespaced by configuration (source, build-output, global)
//! - Configuration flags and the registry resolving them
//! - Build steps, rules and the target contract
//! - The dagen.toml manifest

pub mod flags;
pub mod manifest;
pub mod path;
pub mod step;
pub mod target;

pub use flags::{ConfigHash, Flag, FlagDef, FlagRegistry, FlagSources, FlagType, FlagValue};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use path::{GlobalPath, Layout, OutPath, Path, SourcePath};
pub use step::{Action, BuildRule, BuildStep};
pub use target::{
    is_exported, Build, Report, Run, SelectionReport, TargetGroup, TargetSet, Test,
};
