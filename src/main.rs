use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sweep_launcher::{
    config::{ConfigBuilder, SweepConfig},
    job::{FailurePolicy, QueueSubmitter},
    launcher::Launcher,
    render::CommandRenderer,
};

/// Enumerate an experiment sweep and submit one batch job per experiment.
#[derive(Parser, Debug)]
#[command(name = "sweep-launcher", version, about)]
struct Cli {
    /// JSON sweep config. The built-in sweep is used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the job scripts are written to.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Render and log every command without writing or submitting anything.
    #[arg(long)]
    dry_run: bool,

    /// Abort on the first non-zero exit status of chmod or the queue command.
    #[arg(long)]
    fail_fast: bool,

    /// Print the effective config as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut builder = ConfigBuilder::new();
    if let Some(path) = cli.config {
        builder = builder.read_from_file(path);
    }
    if let Some(dir) = cli.out_dir {
        builder = builder.out_dir(dir);
    }
    if cli.fail_fast {
        builder = builder.failure_policy(FailurePolicy::FailFast);
    }
    let config: SweepConfig = builder.build()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let sweep = config.sweep().context("invalid algorithm sweep")?;
    let submitter = QueueSubmitter::new(
        config.out_dir.clone(),
        config.queue.clone(),
        config.failure_policy,
    );
    let mut launcher = Launcher::new(
        CommandRenderer::new(config.entry_point.clone()),
        config.container.clone(),
        submitter,
    )
    .dry_run(cli.dry_run);

    let summary = launcher.run(&sweep)?;
    if cli.dry_run {
        log::info!("Dry run: rendered {} scripts", summary.skipped.len());
    } else {
        log::info!(
            "Submitted {}/{} jobs",
            summary.handles.len(),
            summary.planned
        );
    }
    Ok(())
}
