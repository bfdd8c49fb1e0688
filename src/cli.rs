use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Overrides, ShaderPlacement};
use crate::pipeline::Stages;

// Build version with host info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Configure, compile shaders, build and run the Vulkan HDR demo
#[derive(Parser, Debug)]
#[command(name = "vkbuild", author, version = VERSION_INFO, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile shaders only (assets/shaders/src -> assets/shaders/bin)
    Shaders(PipelineArgs),

    /// Configure, compile shaders and build, without running
    Build(PipelineArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Project root containing CMakeLists.txt (default: current directory)
    #[arg(value_name = "PROJECT_ROOT")]
    pub project_root: Option<PathBuf>,

    /// Build and run inside WSL (make instead of MSBuild)
    #[arg(long = "use-wsl", alias = "linux-is-wsl")]
    pub use_wsl: bool,

    /// Build configuration (default: Release)
    #[arg(short = 'c', long = "config", value_name = "NAME")]
    pub configuration: Option<String>,

    /// Build directory, relative to the project root
    #[arg(short = 'B', long = "build-dir", value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Parallel jobs for shader compiles and the build driver (default: CPU count)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Kill any external tool that runs longer than this many seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Where glslc writes before artifacts reach the binary directory
    #[arg(long = "placement", value_enum, value_name = "MODE")]
    pub placement: Option<ShaderPlacement>,

    /// Compile shaders without debug info (drops glslc -g)
    #[arg(long = "no-debug-symbols")]
    pub no_debug_symbols: bool,

    /// Skip the shader stage
    #[arg(long = "no-shaders")]
    pub no_shaders: bool,

    /// Skip running the built executable
    #[arg(long = "no-run")]
    pub no_run: bool,

    /// JSON config file (default: $VKBUILD_CONFIG, then <root>/vkbuild.json)
    #[arg(long = "config-file", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Enable debug logging to file (default: <root>/vkbuild.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Argument for the demo executable, repeatable (default: the project root)
    #[arg(long = "run-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub run_args: Vec<String>,
}

impl Args {
    /// Options in effect plus the stages they select
    pub fn selection(&self) -> (&PipelineArgs, Stages) {
        match &self.command {
            None => (&self.pipeline, self.pipeline.stages(Stages::all())),
            Some(Commands::Build(args)) => (args, args.stages(Stages::build_only())),
            Some(Commands::Shaders(args)) => (args, args.stages(Stages::shaders_only())),
        }
    }
}

impl PipelineArgs {
    fn stages(&self, mut stages: Stages) -> Stages {
        if self.no_shaders {
            stages.shaders = false;
        }
        if self.no_run {
            stages.run = false;
        }
        stages
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            build_dir: self.build_dir.clone(),
            configuration: self.configuration.clone(),
            use_wsl: self.use_wsl,
            placement: self.placement,
            no_debug_symbols: self.no_debug_symbols,
            jobs: self.jobs,
            timeout_secs: self.timeout_secs,
            run_args: (!self.run_args.is_empty()).then(|| self.run_args.clone()),
        }
    }
}
