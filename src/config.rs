//! Pipeline configuration.
//!
//! Resolved once at startup from three layers, highest priority first:
//! command-line overrides, the JSON config file, built-in defaults. The
//! config file itself is found the same way:
//!
//! 1. `--config-file` argument
//! 2. `VKBUILD_CONFIG` environment variable
//! 3. `vkbuild.json` in the project root, if present
//!
//! Every path ends up absolute, anchored at the project root.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::process::Arg;
use crate::toolchain::ToolSpec;

pub const CONFIG_ENV_VAR: &str = "VKBUILD_CONFIG";
pub const CONFIG_FILE_NAME: &str = "vkbuild.json";

/// Meta-build cache file deleted on every fresh configure
pub const CMAKE_CACHE_FILE: &str = "CMakeCache.txt";

pub const DEFAULT_CONFIGURATION: &str = "Release";
pub const DEFAULT_EXECUTABLE: &str = "vkdemo";
pub const DEFAULT_SOLUTION: &str = "vulkan-hdr-demo.sln";
pub const DEFAULT_SHADER_SOURCE_DIR: &str = "assets/shaders/src";
pub const DEFAULT_SHADER_BINARY_DIR: &str = "assets/shaders/bin";
pub const DEFAULT_SHADER_EXTENSIONS: &[&str] = &[".vert", ".frag", ".geom", ".tesc", ".tese", ".comp"];
pub const DEFAULT_BINARY_EXTENSION: &str = "spv";

const MSBUILD_BUILD_DIR: &str = "build";
const MAKE_BUILD_DIR: &str = "linux-build";

const VS2022_MSBUILD: &[&str] = &[
    r"C:\Program Files\Microsoft Visual Studio\2022\Community\MSBuild\Current\Bin\MSBuild.exe",
    r"C:\Program Files\Microsoft Visual Studio\2022\Professional\MSBuild\Current\Bin\MSBuild.exe",
    r"C:\Program Files\Microsoft Visual Studio\2022\Enterprise\MSBuild\Current\Bin\MSBuild.exe",
];

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    pub fn host() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

/// Which native build driver consumes the generated project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFlavor {
    /// Visual Studio solution built with MSBuild (Windows-native)
    Msbuild { solution: String },
    /// Makefiles built with make (Linux, or Windows through WSL)
    Make,
}

/// Where glslc writes before the artifact reaches the binary directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShaderPlacement {
    /// Compile straight into the binary directory
    #[default]
    Direct,
    /// Compile next to the source, then move into the binary directory
    Staged,
}

/// Facts about the host gathered once at startup
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub platform: Platform,
    pub vulkan_sdk: Option<PathBuf>,
    pub cpus: usize,
}

impl HostEnv {
    pub fn detect() -> Self {
        Self {
            platform: Platform::host(),
            vulkan_sdk: std::env::var_os("VULKAN_SDK")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            cpus: num_cpus::get(),
        }
    }
}

/// Where to look for the JSON config file
#[derive(Debug, Clone, Default)]
pub struct ConfigLocation {
    /// Explicit file (from CLI or ENV)
    pub config_file: Option<PathBuf>,
}

impl ConfigLocation {
    /// Priority: CLI args → ENV var (VKBUILD_CONFIG) → None (project default)
    pub fn from_env_and_cli(cli_file: Option<PathBuf>) -> Self {
        let config_file = cli_file.or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));
        Self { config_file }
    }

    /// Load the config file, or defaults if none is configured or present.
    ///
    /// An explicitly named file that does not exist is an error; a missing
    /// `vkbuild.json` in the project root is not.
    pub fn load(&self, root: &Path) -> Result<(Option<PathBuf>, FileConfig)> {
        let path = match &self.config_file {
            Some(file) => absolutize(root, file),
            None => {
                let local = root.join(CONFIG_FILE_NAME);
                if !local.is_file() {
                    return Ok((None, FileConfig::default()));
                }
                local
            }
        };

        let text = fs::read_to_string(&path)
            .map_err(|e| PipelineError::io("Failed to read config file", &path, e))?;
        let mut config: FileConfig = serde_json::from_str(&text).map_err(|e| PipelineError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        config.origin = Some(path.clone());
        Ok((Some(path), config))
    }
}

/// Tool overrides accepted in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolOverrides {
    pub cmake: Option<ToolSpec>,
    pub build_driver: Option<ToolSpec>,
    pub glslc: Option<ToolSpec>,
    pub wsl: Option<ToolSpec>,
}

/// `vkbuild.json` contents; every field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub build_dir: Option<PathBuf>,
    pub configuration: Option<String>,
    pub executable_name: Option<String>,
    pub use_wsl: Option<bool>,
    pub solution: Option<String>,
    pub shader_source_dir: Option<PathBuf>,
    pub shader_binary_dir: Option<PathBuf>,
    pub shader_extensions: Option<Vec<String>>,
    pub binary_extension: Option<String>,
    pub debug_symbols: Option<bool>,
    pub placement: Option<ShaderPlacement>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub run_args: Option<Vec<String>>,
    pub tools: ToolOverrides,
    /// File these values were read from
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

/// Values taken from the command line; `None` defers to the file/defaults
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub build_dir: Option<PathBuf>,
    pub configuration: Option<String>,
    pub use_wsl: bool,
    pub placement: Option<ShaderPlacement>,
    pub no_debug_symbols: bool,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub run_args: Option<Vec<String>>,
}

/// External tools the pipeline drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub meta_build: ToolSpec,
    pub build_driver: ToolSpec,
    pub shader_compiler: ToolSpec,
    pub wsl: ToolSpec,
}

impl Toolchain {
    /// Search names and fallback install locations for a host/flavor pair
    pub fn defaults(host: &HostEnv, flavor: &BuildFlavor) -> Self {
        let meta_build = match flavor {
            BuildFlavor::Msbuild { .. } => {
                ToolSpec::new("cmake").with_fallbacks([r"C:\Program Files\CMake\bin\cmake.exe"])
            }
            BuildFlavor::Make => {
                ToolSpec::new("cmake").with_fallbacks(["/usr/local/bin/cmake", "/snap/bin/cmake"])
            }
        };

        let build_driver = match flavor {
            BuildFlavor::Msbuild { .. } => {
                ToolSpec::new("MSBuild.exe").with_fallbacks(VS2022_MSBUILD.iter().copied())
            }
            BuildFlavor::Make => ToolSpec::new("make").with_fallbacks(["/usr/bin/make"]),
        };

        let glslc_file = match host.platform {
            Platform::Windows => "glslc.exe",
            Platform::Linux => "glslc",
        };
        let mut shader_compiler = ToolSpec::new("glslc");
        if let Some(sdk) = &host.vulkan_sdk {
            shader_compiler.fallbacks.push(sdk.join("bin").join(glslc_file));
        }
        if host.platform == Platform::Windows {
            shader_compiler
                .fallbacks
                .push(Path::new("external").join("shaderc").join(glslc_file));
        }

        let wsl = ToolSpec::new("wsl.exe").with_fallbacks([r"C:\Windows\System32\wsl.exe"]);

        Self {
            meta_build,
            build_driver,
            shader_compiler,
            wsl,
        }
    }
}

/// Shader stage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    pub source_dir: PathBuf,
    pub binary_dir: PathBuf,
    /// Recognized source extensions, each with a leading dot
    pub extensions: Vec<String>,
    /// Artifact extension without the dot
    pub binary_extension: String,
    pub debug_symbols: bool,
    pub placement: ShaderPlacement,
    pub jobs: usize,
}

/// Immutable configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_root: PathBuf,
    pub build_dir: PathBuf,
    pub configuration: String,
    pub executable_name: String,
    pub use_wsl: bool,
    pub platform: Platform,
    pub flavor: BuildFlavor,
    pub shaders: ShaderConfig,
    pub toolchain: Toolchain,
    pub jobs: usize,
    pub timeout: Option<Duration>,
    pub run_args: Vec<Arg>,
}

impl PipelineConfig {
    /// Merge the layers and anchor every path at `root`
    pub fn resolve(root: &Path, file: FileConfig, overrides: Overrides, host: &HostEnv) -> Result<Self> {
        let project_root = std::path::absolute(root)
            .map(|p| normalize(&p))
            .map_err(|e| PipelineError::io("Failed to resolve project root", root, e))?;

        let use_wsl = overrides.use_wsl || file.use_wsl.unwrap_or(false);
        let flavor = if use_wsl || host.platform == Platform::Linux {
            BuildFlavor::Make
        } else {
            BuildFlavor::Msbuild {
                solution: file.solution.unwrap_or_else(|| DEFAULT_SOLUTION.to_string()),
            }
        };

        let default_build_dir = match flavor {
            BuildFlavor::Msbuild { .. } => MSBUILD_BUILD_DIR,
            BuildFlavor::Make => MAKE_BUILD_DIR,
        };
        let build_dir = absolutize(
            &project_root,
            &overrides
                .build_dir
                .or(file.build_dir)
                .unwrap_or_else(|| PathBuf::from(default_build_dir)),
        );

        let jobs = overrides.jobs.or(file.jobs).unwrap_or(host.cpus).max(1);

        let extensions: Vec<String> = file
            .shader_extensions
            .unwrap_or_else(|| DEFAULT_SHADER_EXTENSIONS.iter().map(|e| e.to_string()).collect())
            .into_iter()
            .map(|ext| normalize_extension(&ext))
            .filter(|ext| ext.len() > 1)
            .collect();
        if extensions.is_empty() {
            return Err(PipelineError::Config {
                path: file.origin.clone().unwrap_or_else(|| project_root.clone()),
                message: "shader_extensions must name at least one extension".to_string(),
            });
        }

        let shaders = ShaderConfig {
            source_dir: absolutize(
                &project_root,
                &file
                    .shader_source_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SHADER_SOURCE_DIR)),
            ),
            binary_dir: absolutize(
                &project_root,
                &file
                    .shader_binary_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SHADER_BINARY_DIR)),
            ),
            extensions,
            binary_extension: file
                .binary_extension
                .map(|e| e.trim_start_matches('.').to_string())
                .unwrap_or_else(|| DEFAULT_BINARY_EXTENSION.to_string()),
            debug_symbols: !overrides.no_debug_symbols && file.debug_symbols.unwrap_or(true),
            placement: overrides.placement.or(file.placement).unwrap_or_default(),
            jobs,
        };

        check_build_dir(&project_root, &build_dir, &shaders)?;

        let mut toolchain = Toolchain::defaults(host, &flavor);
        let tools = file.tools;
        if let Some(spec) = tools.cmake {
            toolchain.meta_build = spec;
        }
        if let Some(spec) = tools.build_driver {
            toolchain.build_driver = spec;
        }
        if let Some(spec) = tools.glslc {
            toolchain.shader_compiler = spec;
        }
        if let Some(spec) = tools.wsl {
            toolchain.wsl = spec;
        }

        // Default run argument is the project root: the demo loads assets relative to it
        let run_args = match overrides.run_args.or(file.run_args) {
            Some(args) => args.into_iter().map(|a| Arg::Text(a.into())).collect(),
            None => vec![Arg::Path(project_root.clone())],
        };

        Ok(Self {
            build_dir,
            configuration: overrides
                .configuration
                .or(file.configuration)
                .unwrap_or_else(|| DEFAULT_CONFIGURATION.to_string()),
            executable_name: file
                .executable_name
                .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string()),
            use_wsl,
            platform: host.platform,
            flavor,
            shaders,
            toolchain,
            jobs,
            timeout: overrides.timeout_secs.or(file.timeout_secs).map(Duration::from_secs),
            run_args,
            project_root,
        })
    }

    /// Where the build driver leaves the executable
    pub fn executable_path(&self) -> PathBuf {
        match &self.flavor {
            BuildFlavor::Msbuild { .. } => self
                .build_dir
                .join(&self.configuration)
                .join(format!("{}.exe", self.executable_name)),
            BuildFlavor::Make => self.build_dir.join(&self.executable_name),
        }
    }

    pub fn cmake_cache(&self) -> PathBuf {
        self.build_dir.join(CMAKE_CACHE_FILE)
    }
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    }
}

/// Lexically fold `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

/// The build directory is deleted on every run; refuse anything that would take sources with it
fn check_build_dir(root: &Path, build_dir: &Path, shaders: &ShaderConfig) -> Result<()> {
    let cmake_lists = root.join("CMakeLists.txt");
    let protected = [
        ("the project root", root),
        ("the shader source directory", shaders.source_dir.as_path()),
        ("the shader binary directory", shaders.binary_dir.as_path()),
        ("CMakeLists.txt", cmake_lists.as_path()),
    ];
    for (what, path) in protected {
        if path.starts_with(build_dir) {
            return Err(PipelineError::Config {
                path: build_dir.to_path_buf(),
                message: format!("build directory must not contain {} {}", what, path.display()),
            });
        }
    }
    Ok(())
}
