//! Stage sequencing.
//!
//! resolve tools → teardown → configure → compile shaders → build → run.
//! Every tool is resolved before the build directory is touched, and the
//! first failing stage ends the run.

use log::{debug, info};
use std::path::PathBuf;

use crate::builder;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::process::{CommandRunner, NativeRunner, StageResult, WslRunner};
use crate::run;
use crate::shaders::{self, ShaderArtifact};
use crate::toolchain::{ResolveStrategy, Resolver, ToolchainHandle};

/// Which stages to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub shaders: bool,
    pub build: bool,
    pub run: bool,
}

impl Stages {
    pub fn all() -> Self {
        Self {
            shaders: true,
            build: true,
            run: true,
        }
    }

    pub fn shaders_only() -> Self {
        Self {
            shaders: true,
            build: false,
            run: false,
        }
    }

    pub fn build_only() -> Self {
        Self {
            shaders: true,
            build: true,
            run: false,
        }
    }

    fn count(&self) -> usize {
        // configure + build count as two steps
        usize::from(self.shaders) + 2 * usize::from(self.build) + usize::from(self.run)
    }
}

/// What a successful run produced
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub shaders: Vec<ShaderArtifact>,
    pub executable: Option<PathBuf>,
    pub run: Option<StageResult>,
}

struct Tools {
    glslc: Option<ToolchainHandle>,
    cmake: Option<ToolchainHandle>,
    driver: Option<ToolchainHandle>,
}

pub struct Pipeline {
    config: PipelineConfig,
    /// Shader compiles always run on the host
    host: Box<dyn CommandRunner>,
    /// Builder and run stage; WSL-wrapped when indirection is on
    target: Box<dyn CommandRunner>,
    show_progress: bool,
}

impl Pipeline {
    /// Pick runners for the config: native, plus WSL for the build when requested
    pub fn new(config: PipelineConfig, search_path: Option<std::ffi::OsString>) -> Result<Self> {
        let resolver = Resolver::new(search_path, &config.project_root);
        let host = NativeRunner::new(resolver.clone(), config.timeout);

        let target: Box<dyn CommandRunner> = if config.use_wsl {
            let wsl = WslRunner::new(resolver, &config.toolchain.wsl, config.timeout)?;
            info!("Building through {}", wsl.wrapper().path().display());
            Box::new(wsl)
        } else {
            Box::new(host.clone())
        };

        Ok(Self::with_runners(config, Box::new(host), target))
    }

    pub fn with_runners(config: PipelineConfig, host: Box<dyn CommandRunner>, target: Box<dyn CommandRunner>) -> Self {
        Self {
            config,
            host,
            target,
            show_progress: false,
        }
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn execute(&self, stages: Stages) -> Result<Report> {
        let config = &self.config;
        let total = stages.count();
        let mut step = 0;
        let mut next_step = |title: &str| {
            step += 1;
            println!();
            println!("Step {}/{}: {}", step, total, title);
        };

        println!("========================================");
        println!("vkbuild: {}", config.project_root.display());
        println!(
            "  configuration {}, runner {}, build dir {}",
            config.configuration,
            self.target.label(),
            config.build_dir.display()
        );
        println!("========================================");

        let tools = self.resolve_tools(stages)?;
        let mut report = Report::default();

        if let (Some(cmake), Some(driver)) = (&tools.cmake, &tools.driver) {
            builder::teardown(config)?;

            next_step("Configuring...");
            builder::configure(self.target.as_ref(), cmake, config)?;

            if let Some(glslc) = &tools.glslc {
                next_step("Compiling shaders...");
                report.shaders = shaders::compile_all(self.host.as_ref(), glslc, &config.shaders, self.show_progress)?;
            }

            next_step("Building...");
            report.executable = Some(builder::compile(self.target.as_ref(), driver, config)?);
        } else if let Some(glslc) = &tools.glslc {
            next_step("Compiling shaders...");
            report.shaders = shaders::compile_all(self.host.as_ref(), glslc, &config.shaders, self.show_progress)?;
        }

        if stages.run {
            next_step("Running...");
            let result = run::run_executable(self.target.as_ref(), config)?;
            println!("  {} exited with code 0", config.executable_name);
            report.run = Some(result);
        }

        println!();
        println!("========================================");
        println!("Pipeline finished successfully");
        println!("========================================");
        Ok(report)
    }

    /// Resolve everything the selected stages need, before any filesystem change
    fn resolve_tools(&self, stages: Stages) -> Result<Tools> {
        let toolchain = &self.config.toolchain;

        let glslc = if stages.shaders {
            Some(self.host.resolve(&toolchain.shader_compiler)?)
        } else {
            None
        };

        let (cmake, driver) = if stages.build {
            (
                Some(self.target.resolve(&toolchain.meta_build)?),
                Some(self.target.resolve(&toolchain.build_driver)?),
            )
        } else {
            (None, None)
        };

        for handle in [&glslc, &cmake, &driver].into_iter().flatten() {
            let how = match handle.strategy() {
                ResolveStrategy::SearchPath => "search path",
                ResolveStrategy::Fallback => "fallback",
            };
            info!("{}: {} ({})", handle.name(), handle.path().display(), how);
        }
        debug!("Tools resolved for {:?}", stages);

        Ok(Tools { glslc, cmake, driver })
    }
}
