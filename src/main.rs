use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use flowcast_service::analysis::baseflow::{RainfallScenario, load_scenario};
use flowcast_service::config::Config;
use flowcast_service::engine::simulation::EngineProcess;
use flowcast_service::engine::storage::BatchStorage;
use flowcast_service::engine::tide::{HarmonicTideProcess, TideUtility};
use flowcast_service::gages::GageRegistry;
use flowcast_service::ingest::sensor::RepositoryClient;
use flowcast_service::logging::{self, DataSource, LogLevel};
use flowcast_service::pipeline::{Collaborators, CycleContext, Pipeline};
use flowcast_service::schedule::{RunMode, SystemClock, run_loop};
use flowcast_service::verify;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flood forecast cycle runner", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "flowcast.toml")]
    config: PathBuf,
    /// Raise log verbosity to debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
    /// Check the configuration and exit
    #[arg(long)]
    verify: bool,
}

fn load_scenarios(config: &Config, gages: &GageRegistry) -> Result<Vec<RainfallScenario>> {
    let paths = &config.simulation.rainfall_scenarios;
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let primary = gages
        .primary_discharge()
        .context("rainfall scenarios need a discharge gage")?;
    paths
        .iter()
        .map(|path| {
            load_scenario(path, &primary.rating)
                .with_context(|| format!("loading rainfall scenario {}", path.display()))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let level = if cli.verbose > 0 { LogLevel::Debug } else { config.general.log_level };
    logging::init_logger(level, config.general.log_file.as_deref(), true)?;

    let gages = GageRegistry::from_config(&config)?;

    let report = verify::run_full_verification(&config, &gages);
    if cli.verify {
        verify::print_summary(&report);
        if !verify::is_usable(&report) {
            std::process::exit(1);
        }
        return Ok(());
    }
    if !verify::is_usable(&report) {
        verify::print_summary(&report);
        bail!("preflight verification failed; fix the configuration or run with --verify for details");
    }

    let scenarios = load_scenarios(&config, &gages)?;

    let sensors = RepositoryClient::new(&config.repository)?;
    let simulator = EngineProcess {
        command: config.simulation.command.clone(),
        compute_script: config.simulation.compute_script_path(),
        control_file: config.simulation.control_file(),
        registry_file: config.simulation.registry_file(),
        project_dir: config.simulation.project_dir.clone(),
    };
    let store = BatchStorage::new(&config.storage.handler, &config.general.work_dir);
    let tide = config
        .tidal
        .as_ref()
        .map(|t| HarmonicTideProcess::new(&t.command, &t.definition_file, &config.general.work_dir));

    let pipeline = Pipeline::new(
        &config,
        &gages,
        &scenarios,
        Collaborators {
            sensors: &sensors,
            simulator: &simulator,
            store: &store,
            tide: tide.as_ref().map(|t| t as &dyn TideUtility),
        },
    );

    let mode = RunMode::from_config(&config.general)?;
    logging::info(
        DataSource::System,
        None,
        &format!(
            "{} discharge gages, {} precipitation gages, {} scenarios, {}",
            gages.discharge_gages().len(),
            gages.precip_gages().len(),
            scenarios.len(),
            if mode.is_replay() { "replay" } else { "live" }
        ),
    );

    let cycles = run_loop(
        mode,
        config.general.interval_minutes,
        cli.once || config.general.run_once,
        &SystemClock,
        |now| pipeline.run_cycle(&CycleContext::new(now, &config)),
    )?;
    logging::info(DataSource::System, None, &format!("{} cycles complete", cycles));
    Ok(())
}
