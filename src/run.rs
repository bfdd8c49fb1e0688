use log::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, Invocation, StageResult};

/// Run the built executable from the build directory and wait for it.
///
/// A non-zero exit is reported as [`PipelineError::RunFailed`], separate from
/// build failures, so callers can tell "built fine, program misbehaved"
/// apart from a broken build.
pub fn run_executable(runner: &dyn CommandRunner, config: &PipelineConfig) -> Result<StageResult> {
    let executable = config.executable_path();
    if !executable.is_file() {
        return Err(PipelineError::ExecutableMissing(executable));
    }

    let invocation = Invocation::new(&executable)
        .args(config.run_args.iter().cloned())
        .current_dir(&config.build_dir)
        .stream_stdout();

    info!("Launching {}", invocation);
    let result = runner.invoke(&invocation)?;
    if !result.success {
        return Err(PipelineError::RunFailed {
            executable,
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }
    Ok(result)
}
