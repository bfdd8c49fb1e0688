//! CMake configure + native build.

use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{BuildFlavor, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, Invocation};
use crate::toolchain::ToolchainHandle;

/// Delete the CMake cache and the whole build directory, then recreate it empty.
///
/// Read-only entries make the first deletion fail on Windows; permissions are
/// then cleared and the deletion retried exactly once.
pub fn teardown(config: &PipelineConfig) -> Result<()> {
    let cache = config.cmake_cache();
    if cache.exists() {
        debug!("Removing {}", cache.display());
        remove_with_retry(&cache, |p| fs::remove_file(p))?;
    }

    if config.build_dir.exists() {
        info!("Removing build directory {}", config.build_dir.display());
        remove_with_retry(&config.build_dir, |p| fs::remove_dir_all(p))?;
    }

    fs::create_dir_all(&config.build_dir)
        .map_err(|e| PipelineError::io("Failed to create build directory", &config.build_dir, e))
}

fn remove_with_retry(path: &Path, remove: impl Fn(&Path) -> std::io::Result<()>) -> Result<()> {
    match remove(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(
                "Could not remove {} ({}), clearing read-only flags and retrying",
                path.display(),
                e
            );
            clear_readonly(path);
            remove(path).map_err(|e| PipelineError::io("Failed to remove", path, e))
        }
    }
}

/// Make every entry under `path` (and `path` itself) writable by the owner
fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.permissions().readonly() {
            continue;
        }
        if let Err(e) = fs::set_permissions(entry.path(), writable(meta.permissions())) {
            debug!("  could not make {} writable: {}", entry.path().display(), e);
        }
    }
}

#[cfg(unix)]
fn writable(perms: fs::Permissions) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    fs::Permissions::from_mode(perms.mode() | 0o200)
}

#[cfg(not(unix))]
fn writable(mut perms: fs::Permissions) -> fs::Permissions {
    perms.set_readonly(false);
    perms
}

/// Run the meta-build generator against the fresh build directory
pub fn configure(runner: &dyn CommandRunner, cmake: &ToolchainHandle, config: &PipelineConfig) -> Result<()> {
    let mut invocation = Invocation::new(cmake.path())
        .arg("-S")
        .path_arg(&config.project_root)
        .arg("-B")
        .path_arg(&config.build_dir);

    // Single-config generators pick the configuration here, MSBuild at build time
    if config.flavor == BuildFlavor::Make {
        invocation = invocation.arg(format!("-DCMAKE_BUILD_TYPE={}", config.configuration));
    }

    let invocation = invocation
        .current_dir(&config.project_root)
        .stream_stdout();

    let result = runner.invoke(&invocation)?;
    if !result.success {
        return Err(PipelineError::ConfigureFailed {
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }
    Ok(())
}

/// Run the native build driver, then check the executable really exists
pub fn compile(runner: &dyn CommandRunner, driver: &ToolchainHandle, config: &PipelineConfig) -> Result<PathBuf> {
    let invocation = match &config.flavor {
        BuildFlavor::Msbuild { solution } => Invocation::new(driver.path())
            .path_arg(config.build_dir.join(solution))
            .arg("/t:Build")
            .arg(format!("/p:Configuration={}", config.configuration))
            .arg(format!("/m:{}", config.jobs))
            .current_dir(&config.build_dir),
        BuildFlavor::Make => Invocation::new(driver.path())
            .arg(format!("-j{}", config.jobs))
            .current_dir(&config.build_dir),
    }
    .stream_stdout();

    let result = runner.invoke(&invocation)?;
    if !result.success {
        return Err(PipelineError::CompileFailed {
            exit_code: result.exit_code,
            stderr: result.stderr,
        });
    }

    let executable = config.executable_path();
    if !executable.is_file() {
        return Err(PipelineError::ExecutableNotProduced(executable));
    }
    debug!("Built {}", executable.display());
    Ok(executable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, HostEnv, Overrides, Platform};
    use crate::process::StageResult;
    use crate::testing::FakeRunner;
    use crate::toolchain::ResolveStrategy;
    use tempfile::TempDir;

    fn config_for(root: &Path, platform: Platform) -> PipelineConfig {
        let host = HostEnv {
            platform,
            vulkan_sdk: None,
            cpus: 8,
        };
        PipelineConfig::resolve(root, FileConfig::default(), Overrides::default(), &host).unwrap()
    }

    fn handle(name: &str) -> ToolchainHandle {
        ToolchainHandle::new(name, format!("/fake/{}", name), ResolveStrategy::SearchPath)
    }

    fn failing(stderr: &str, code: i32) -> StageResult {
        StageResult {
            success: false,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_teardown_removes_stale_build() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        fs::create_dir_all(config.build_dir.join("CMakeFiles/vkdemo.dir")).unwrap();
        fs::write(config.cmake_cache(), "CMAKE_BUILD_TYPE:STRING=Debug\n").unwrap();
        fs::write(config.build_dir.join("CMakeFiles/vkdemo.dir/main.o"), b"obj").unwrap();

        teardown(&config).unwrap();

        assert!(config.build_dir.is_dir());
        assert_eq!(fs::read_dir(&config.build_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_teardown_handles_read_only_entries() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        let locked_dir = config.build_dir.join("shaders");
        fs::create_dir_all(&locked_dir).unwrap();

        let locked_file = locked_dir.join("cache.bin");
        fs::write(&locked_file, b"locked").unwrap();
        let mut perms = fs::metadata(&locked_file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&locked_file, perms).unwrap();

        fs::write(config.cmake_cache(), "").unwrap();
        let mut perms = fs::metadata(config.cmake_cache()).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(config.cmake_cache(), perms).unwrap();

        // A read-only directory blocks unlinking its children on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o555)).unwrap();
        }

        teardown(&config).unwrap();
        assert!(!locked_file.exists());
        assert!(!config.cmake_cache().exists());
        assert!(config.build_dir.is_dir());
    }

    #[test]
    fn test_teardown_without_existing_build() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        teardown(&config).unwrap();
        assert!(config.build_dir.is_dir());
    }

    #[test]
    fn test_configure_make_flavor() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        let runner = FakeRunner::new();

        configure(&runner, &handle("cmake"), &config).unwrap();

        let calls = runner.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, PathBuf::from("/fake/cmake"));
        assert_eq!(
            calls[0].arg_strings(),
            vec![
                "-S".to_string(),
                config.project_root.display().to_string(),
                "-B".to_string(),
                config.build_dir.display().to_string(),
                "-DCMAKE_BUILD_TYPE=Release".to_string(),
            ]
        );
        assert_eq!(calls[0].cwd.as_deref(), Some(config.project_root.as_path()));
    }

    #[test]
    fn test_configure_failure_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        let runner = FakeRunner::new().on_invoke(|_| Some(failing("CMake Error: Could not find Vulkan\n", 1)));

        match configure(&runner, &handle("cmake"), &config).unwrap_err() {
            PipelineError::ConfigureFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "CMake Error: Could not find Vulkan\n");
            }
            other => panic!("expected ConfigureFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_msbuild_invocation() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Windows);
        let exe = config.executable_path();
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, b"MZ").unwrap();

        let runner = FakeRunner::new();
        let built = compile(&runner, &handle("MSBuild.exe"), &config).unwrap();
        assert_eq!(built, exe);

        let args = runner.invocations()[0].arg_strings();
        assert_eq!(
            args,
            vec![
                config.build_dir.join("vulkan-hdr-demo.sln").display().to_string(),
                "/t:Build".to_string(),
                "/p:Configuration=Release".to_string(),
                "/m:8".to_string(),
            ]
        );

        // Multi-config generator: no build type at configure time
        configure(&runner, &handle("cmake"), &config).unwrap();
        assert!(!runner.invocations()[1].arg_strings().iter().any(|a| a.starts_with("-DCMAKE_BUILD_TYPE")));
    }

    #[test]
    fn test_make_runs_in_build_dir() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        fs::create_dir_all(&config.build_dir).unwrap();
        fs::write(config.executable_path(), b"\x7fELF").unwrap();

        let runner = FakeRunner::new();
        compile(&runner, &handle("make"), &config).unwrap();

        let call = &runner.invocations()[0];
        assert_eq!(call.arg_strings(), vec!["-j8"]);
        assert_eq!(call.cwd.as_deref(), Some(config.build_dir.as_path()));
    }

    #[test]
    fn test_success_without_executable() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        let runner = FakeRunner::new();

        let err = compile(&runner, &handle("make"), &config).unwrap_err();
        assert!(matches!(err, PipelineError::ExecutableNotProduced(ref p) if *p == config.executable_path()));
    }

    #[test]
    fn test_compile_failure_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(tmp.path(), Platform::Linux);
        let runner = FakeRunner::new().on_invoke(|_| Some(failing("main.cpp:10: error: expected ';'\n", 2)));

        match compile(&runner, &handle("make"), &config).unwrap_err() {
            PipelineError::CompileFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(2));
                assert!(stderr.contains("expected ';'"));
            }
            other => panic!("expected CompileFailed, got {:?}", other),
        }
    }
}
