use log::debug;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Suffixes tried for bare tool names on Windows (`glslc` -> `glslc.exe`)
#[cfg(windows)]
const EXECUTABLE_SUFFIXES: &[&str] = &["", ".exe", ".cmd", ".bat"];

#[cfg(not(windows))]
const EXECUTABLE_SUFFIXES: &[&str] = &[""];

/// Canonical tool name plus ordered fallback locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub fallbacks: Vec<PathBuf>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks<I, P>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.fallbacks.extend(fallbacks.into_iter().map(Into::into));
        self
    }
}

/// How a tool was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    SearchPath,
    Fallback,
}

/// Resolved location of one external tool.
///
/// Created once per tool per pipeline run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainHandle {
    name: String,
    path: PathBuf,
    strategy: ResolveStrategy,
}

impl ToolchainHandle {
    pub(crate) fn new(name: impl Into<String>, path: impl Into<PathBuf>, strategy: ResolveStrategy) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            strategy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> ResolveStrategy {
        self.strategy
    }
}

/// Locates executables on an explicit search path, then in fallback locations.
///
/// The search path is captured once (normally from `PATH`) and relative
/// fallbacks are anchored at the project root, so resolution never depends
/// on the process working directory.
#[derive(Debug, Clone)]
pub struct Resolver {
    search_path: Option<OsString>,
    root: PathBuf,
}

impl Resolver {
    pub fn new(search_path: Option<OsString>, root: impl Into<PathBuf>) -> Self {
        Self {
            search_path,
            root: root.into(),
        }
    }

    /// Resolver over the current process `PATH`
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        Self::new(std::env::var_os("PATH"), root)
    }

    pub fn resolve(&self, spec: &ToolSpec) -> Result<ToolchainHandle> {
        if let Some(path) = self.search(&spec.name) {
            debug!("Resolved {} on search path: {}", spec.name, path.display());
            return Ok(ToolchainHandle::new(&spec.name, path, ResolveStrategy::SearchPath));
        }

        let candidates = self.candidates(spec);
        for candidate in &candidates {
            if is_executable(candidate) {
                debug!("Resolved {} via fallback: {}", spec.name, candidate.display());
                return Ok(ToolchainHandle::new(
                    &spec.name,
                    candidate.clone(),
                    ResolveStrategy::Fallback,
                ));
            }
            debug!("  {} fallback missing: {}", spec.name, candidate.display());
        }

        Err(PipelineError::ToolchainNotFound {
            name: spec.name.clone(),
            candidates_tried: candidates,
        })
    }

    /// Fallback locations in declared order, relative ones joined to the root
    pub fn candidates(&self, spec: &ToolSpec) -> Vec<PathBuf> {
        spec.fallbacks
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.root.join(p)
                }
            })
            .collect()
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        // Names with a directory part are locations, not search-path lookups
        if Path::new(name).components().count() != 1 {
            return None;
        }

        let search_path = self.search_path.as_ref()?;
        for dir in std::env::split_paths(search_path) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            for suffix in EXECUTABLE_SUFFIXES {
                let candidate = dir.join(format!("{}{}", name, suffix));
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

/// Regular file with an execute bit (any file on Windows)
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
