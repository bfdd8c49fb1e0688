//! Error taxonomy for every pipeline stage.
//!
//! Stage failures carry the captured stderr and exit code of the failing
//! process verbatim. [`PipelineError::diagnostics`] hands that text back to
//! the binary so it can be printed before exiting non-zero.

use std::borrow::Borrow;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{name} not found on the search path or at any of: {}", display_candidates(.candidates_tried))]
    ToolchainNotFound {
        name: String,
        candidates_tried: Vec<PathBuf>,
    },

    #[error("Shader source directory does not exist: {}", .0.display())]
    SourceDirMissing(PathBuf),

    #[error("Shader {} failed to compile ({})", .file.display(), describe_exit(.exit_code))]
    ShaderCompileFailed {
        file: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Configure step failed ({})", describe_exit(.exit_code))]
    ConfigureFailed { exit_code: Option<i32>, stderr: String },

    #[error("Build step failed ({})", describe_exit(.exit_code))]
    CompileFailed { exit_code: Option<i32>, stderr: String },

    #[error("Build reported success but {} was not produced", .0.display())]
    ExecutableNotProduced(PathBuf),

    #[error("Executable not found: {}", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("{} exited with failure ({})", .executable.display(), describe_exit(.exit_code))]
    RunFailed {
        executable: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },
}

impl PipelineError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Captured stderr of the failing external process, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            PipelineError::ShaderCompileFailed { stderr, .. }
            | PipelineError::ConfigureFailed { stderr, .. }
            | PipelineError::CompileFailed { stderr, .. }
            | PipelineError::RunFailed { stderr, .. } => {
                let trimmed = stderr.trim_end();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }

    /// Exit code forwarded from the failing external process.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::ShaderCompileFailed { exit_code, .. }
            | PipelineError::ConfigureFailed { exit_code, .. }
            | PipelineError::CompileFailed { exit_code, .. }
            | PipelineError::RunFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// `exit code N`, or a note that the process died without one (signal, kill).
pub fn describe_exit<C: Borrow<Option<i32>>>(code: C) -> String {
    match *code.borrow() {
        Some(code) => format!("exit code {}", code),
        None => "terminated without exit code".to_string(),
    }
}

fn display_candidates(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return "(no fallback locations)".to_string();
    }
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_candidates() {
        let err = PipelineError::ToolchainNotFound {
            name: "glslc".to_string(),
            candidates_tried: vec![PathBuf::from("/opt/a/glslc"), PathBuf::from("/opt/b/glslc")],
        };
        let msg = err.to_string();
        assert!(msg.contains("glslc not found"));
        assert!(msg.contains("/opt/a/glslc, /opt/b/glslc"));

        let err = PipelineError::ToolchainNotFound {
            name: "cmake".to_string(),
            candidates_tried: Vec::new(),
        };
        assert!(err.to_string().contains("(no fallback locations)"));
    }

    #[test]
    fn test_diagnostics_only_for_process_failures() {
        let err = PipelineError::CompileFailed {
            exit_code: Some(2),
            stderr: "main.cpp:1: error\n\n".to_string(),
        };
        assert_eq!(err.diagnostics(), Some("main.cpp:1: error"));
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.to_string().contains("exit code 2"));

        let err = PipelineError::RunFailed {
            executable: PathBuf::from("vkdemo"),
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(err.diagnostics(), None);
        assert!(err.to_string().contains("terminated without exit code"));

        let err = PipelineError::ExecutableMissing(PathBuf::from("vkdemo"));
        assert_eq!(err.diagnostics(), None);
        assert_eq!(err.exit_code(), None);
    }
}
