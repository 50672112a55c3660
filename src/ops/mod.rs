//! High-level operations.
//!
//! This module contains the implementation of dagen commands.

pub mod generate;

pub use generate::{
    generate, generate_workspace, GenerateOptions, GeneratorOutput, Mode, TargetInfo,
    WorkspaceOptions,
};
