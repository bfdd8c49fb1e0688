//! GLSL → SPIR-V compilation.
//!
//! Discovers shader sources by extension, runs glslc once per file on a small
//! worker pool and guarantees every artifact ends up in the binary directory.
//! Fail-fast: after the first failed compile no new compiles are started.

use crossbeam_channel::unbounded;
use glob::{MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::config::{ShaderConfig, ShaderPlacement};
use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, Invocation};
use crate::toolchain::ToolchainHandle;

/// Shader source paired with its compiled binary location.
///
/// `binary` is always inside the binary directory; it only exists once the
/// compile succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderArtifact {
    pub source: PathBuf,
    pub binary: PathBuf,
}

/// Find the shader sources in `config.source_dir`, sorted by file name.
///
/// Only regular files whose name ends with a recognized extension are picked.
pub fn discover(config: &ShaderConfig) -> Result<Vec<ShaderArtifact>> {
    if !config.source_dir.is_dir() {
        return Err(PipelineError::SourceDirMissing(config.source_dir.clone()));
    }

    let patterns = config
        .extensions
        .iter()
        .map(|ext| Pattern::new(&format!("*{}", Pattern::escape(ext))))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PipelineError::Config {
            path: config.source_dir.clone(),
            message: format!("bad shader extension pattern: {}", e),
        })?;

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let entries = fs::read_dir(&config.source_dir)
        .map_err(|e| PipelineError::io("Failed to list shader sources", &config.source_dir, e))?;

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io("Failed to list shader sources", &config.source_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!("Skipping non-UTF-8 shader file name: {}", path.display());
            continue;
        };

        if patterns.iter().any(|p| p.matches_with(name, options)) {
            artifacts.push(ShaderArtifact {
                binary: binary_path(&config.binary_dir, &file_name, &config.binary_extension),
                source: path,
            });
        } else {
            debug!("Ignoring {}", path.display());
        }
    }

    artifacts.sort_by(|a, b| a.source.file_name().cmp(&b.source.file_name()));
    Ok(artifacts)
}

/// `<binary_dir>/<file_name>.<ext>`
fn binary_path(binary_dir: &Path, file_name: &std::ffi::OsStr, ext: &str) -> PathBuf {
    let mut name = OsString::from(file_name);
    name.push(".");
    name.push(ext);
    binary_dir.join(name)
}

/// Compile every discovered shader into `config.binary_dir`.
///
/// The binary directory is created on demand. Each compile runs independently;
/// when several fail concurrently the first one in file-name order is
/// reported.
pub fn compile_all(
    runner: &dyn CommandRunner,
    glslc: &ToolchainHandle,
    config: &ShaderConfig,
    show_progress: bool,
) -> Result<Vec<ShaderArtifact>> {
    let artifacts = discover(config)?;

    fs::create_dir_all(&config.binary_dir)
        .map_err(|e| PipelineError::io("Failed to create shader binary directory", &config.binary_dir, e))?;

    if artifacts.is_empty() {
        warn!("No shader sources found in {}", config.source_dir.display());
        return Ok(artifacts);
    }

    let progress = if show_progress {
        let bar = ProgressBar::new(artifacts.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("  {bar:30} {pos}/{len} {wide_msg}") {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let outcome = run_pool(&artifacts, config.jobs, &progress, |artifact| {
        progress.set_message(display_name(&artifact.source));
        compile_one(runner, glslc, config, artifact)
    });
    progress.finish_and_clear();

    outcome?;
    for artifact in &artifacts {
        println!("  ✓ {}", display_name(&artifact.binary));
    }
    Ok(artifacts)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lowest artifact index that has failed so far
struct FailureGate {
    lowest: AtomicUsize,
}

impl FailureGate {
    fn new() -> Self {
        Self {
            lowest: AtomicUsize::new(usize::MAX),
        }
    }

    /// Jobs sorting before the earliest failure still run; they could be the one to report
    fn admits(&self, index: usize) -> bool {
        index < self.lowest.load(Ordering::Acquire)
    }

    fn record(&self, index: usize) {
        self.lowest.fetch_min(index, Ordering::AcqRel);
    }
}

/// Run `compile` for every artifact on up to `jobs` worker threads.
///
/// Workers pull indices from a channel in sorted order. After a failure only
/// jobs already dequeued with a lower index still run, so no new work starts
/// and the reported failure is the one with the lowest index.
fn run_pool<F>(artifacts: &[ShaderArtifact], jobs: usize, progress: &ProgressBar, compile: F) -> Result<()>
where
    F: Fn(&ShaderArtifact) -> Result<()> + Sync,
{
    let workers = jobs.clamp(1, artifacts.len().max(1));
    let (job_tx, job_rx) = unbounded::<usize>();
    for index in 0..artifacts.len() {
        // Receiver is alive until the end of this function
        let _ = job_tx.send(index);
    }
    drop(job_tx);

    let (result_tx, result_rx) = unbounded::<(usize, Result<()>)>();
    let gate = FailureGate::new();
    debug!("Compiling {} shaders on {} workers", artifacts.len(), workers);

    let spawned = thread::scope(|scope| -> Result<()> {
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let gate = &gate;
            let compile = &compile;

            thread::Builder::new()
                .name(format!("vkbuild-shader-{}", worker_id))
                .spawn_scoped(scope, move || {
                    while let Ok(index) = job_rx.recv() {
                        // Indices arrive in increasing order; once one is gated so is the rest
                        if !gate.admits(index) {
                            break;
                        }
                        let outcome = compile(&artifacts[index]);
                        if outcome.is_err() {
                            gate.record(index);
                        }
                        progress.inc(1);
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| PipelineError::io("Failed to spawn shader worker", "vkbuild-shader", e))?;
        }
        Ok(())
    });
    drop(result_tx);

    let mut first_failure: Option<(usize, PipelineError)> = None;
    let mut compiled = 0usize;
    for (index, outcome) in result_rx.iter() {
        match outcome {
            Ok(()) => compiled += 1,
            Err(err) => {
                if first_failure.as_ref().is_none_or(|(i, _)| index < *i) {
                    first_failure = Some((index, err));
                }
            }
        }
    }

    if let Some((_, err)) = first_failure {
        return Err(err);
    }
    spawned?;
    info!("Compiled {} shaders", compiled);
    Ok(())
}

fn compile_one(
    runner: &dyn CommandRunner,
    glslc: &ToolchainHandle,
    config: &ShaderConfig,
    artifact: &ShaderArtifact,
) -> Result<()> {
    let target = match config.placement {
        ShaderPlacement::Direct => artifact.binary.clone(),
        ShaderPlacement::Staged => staged_path(artifact),
    };

    let mut invocation = Invocation::new(glslc.path());
    if config.debug_symbols {
        invocation = invocation.arg("-g");
    }
    let invocation = invocation
        .path_arg(&artifact.source)
        .arg("-o")
        .path_arg(&target);

    info!("Compiling {}", artifact.source.display());
    let result = runner.invoke(&invocation)?;

    if !result.success {
        if config.placement == ShaderPlacement::Staged {
            let _ = fs::remove_file(&target);
        }
        return Err(PipelineError::ShaderCompileFailed {
            file: artifact.source.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }

    if config.placement == ShaderPlacement::Staged {
        move_into_place(&target, &artifact.binary)?;
    }
    Ok(())
}

/// Staged output sits next to the source, named like the final artifact
fn staged_path(artifact: &ShaderArtifact) -> PathBuf {
    match artifact.binary.file_name() {
        Some(name) => artifact.source.with_file_name(name),
        None => artifact.source.with_extension("spv"),
    }
}

/// Rename into the binary directory; copy + remove when rename crosses filesystems
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    fs::copy(from, to).map_err(|e| PipelineError::io("Failed to move shader binary", to, e))?;
    fs::remove_file(from).map_err(|e| PipelineError::io("Failed to remove staged shader binary", from, e))?;
    Ok(())
}
