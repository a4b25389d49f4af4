use clap::Parser;
use env_logger::{Builder, Env};
use log::{LevelFilter, info};
use std::path::PathBuf;

use radio_medium_simulator::common::scenario::load_scenario;
use radio_medium_simulator::simulation::Network;

#[derive(Parser, Debug)]
#[command(name = "radio-medium-simulator")]
#[command(about = "Simulate CC2420 sensor nodes sharing one radio channel", long_about = None)]
struct Args {
    /// Scenario file (TOML, or JSON when the extension is .json)
    scenario: PathBuf,

    /// Override the simulated duration in milliseconds
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Override the random seed
    #[arg(short, long)]
    seed: Option<u64>,
}

/// Info globally and debug for this crate, overridden by directives in `env`.
fn log_builder<'a>(env: impl Into<Env<'a>>) -> Builder {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .filter(Some("radio_medium_simulator"), LevelFilter::Debug)
        .parse_env(env);
    builder
}

fn main() -> anyhow::Result<()> {
    log_builder(Env::default()).init();

    let args = Args::parse();
    info!("Starting up");

    let mut scenario = load_scenario(&args.scenario)?;
    if let Some(duration_ms) = args.duration_ms {
        scenario.duration_ms = duration_ms;
    }
    if let Some(seed) = args.seed {
        scenario.seed = Some(seed);
    }

    let topology = scenario.load_topology()?;
    let noise = scenario.load_noise()?;
    let network = Network::build(&scenario, topology.as_ref(), noise)?;
    let report = network.run()?;
    report.log_summary();
    Ok(())
}
