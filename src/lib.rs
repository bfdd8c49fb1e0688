//! vkbuild - build-and-run orchestrator for the Vulkan HDR demo
//!
//! Drives CMake, the native build driver (MSBuild or make, optionally
//! inside WSL) and glslc through one fail-fast pipeline.

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod run;
pub mod shaders;
pub mod toolchain;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PipelineConfig, Platform};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, Report, Stages};
pub use process::{CommandRunner, Invocation, StageResult};
pub use shaders::ShaderArtifact;
pub use toolchain::{ResolveStrategy, Resolver, ToolSpec, ToolchainHandle};
