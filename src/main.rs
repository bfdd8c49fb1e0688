use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use vkbuild::cli::{Args, PipelineArgs};
use vkbuild::config::{ConfigLocation, HostEnv, PipelineConfig};
use vkbuild::{Pipeline, PipelineError};

fn main() {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => {}
        Err(e) => {
            eprintln!();
            match e.downcast_ref::<PipelineError>() {
                // Stage errors already name their cause
                Some(stage) => eprintln!("Error: {}", stage),
                None => eprintln!("Error: {:#}", e),
            }
            if let Some(stage) = e.downcast_ref::<PipelineError>() {
                if let Some(code) = stage.exit_code() {
                    eprintln!("Exit code: {}", code);
                }
                if let Some(stderr) = stage.diagnostics() {
                    eprintln!();
                    eprintln!("---- captured stderr ----");
                    eprintln!("{}", stderr);
                    eprintln!("-------------------------");
                }
            }
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let (opts, stages) = args.selection();

    let root = match &opts.project_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    let root = std::path::absolute(&root)
        .with_context(|| format!("Invalid project root: {}", root.display()))?;

    init_logging(opts, &root)?;
    debug!("Command-line args: {:?}", args);

    let location = ConfigLocation::from_env_and_cli(opts.config_file.clone());
    let (config_path, file_config) = location.load(&root)?;
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let host = HostEnv::detect();
    let config = PipelineConfig::resolve(&root, file_config, opts.overrides(), &host)?;

    let pipeline = Pipeline::new(config, std::env::var_os("PATH"))?
        .show_progress(std::io::stderr().is_terminal());
    debug!("Resolved config: {:?}", pipeline.config());
    pipeline.execute(stages)?;
    Ok(())
}

/// 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logging(opts: &PipelineArgs, root: &Path) -> Result<()> {
    let log_level = match opts.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &opts.log_file {
        // File logging always captures at least debug
        let log_path: PathBuf = log_path_opt
            .clone()
            .unwrap_or_else(|| root.join("vkbuild.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level.max(log::LevelFilter::Debug))
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match opts.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }

    Ok(())
}
