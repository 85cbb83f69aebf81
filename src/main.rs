// src/main.rs
//
// Thin training harness around the traffic_rl library.
// All of the real logic lives in the lib crate (environment, agents, rl).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use traffic_rl::{
    build_sink, init_tracing, train, AgentKind, Config, Environment, GridEngine, GridSpec,
    Roadnet, SimConfig,
};

/// Command-line arguments for the traffic_rl binary.
#[derive(Parser, Debug)]
#[command(name = "traffic_rl")]
struct Cli {
    /// Simulation config JSON. Without it a 2x2 grid with through traffic runs.
    #[arg(long)]
    sim_config: Option<PathBuf>,

    #[arg(long)]
    num_episodes: Option<usize>,

    /// Ticks per episode.
    #[arg(long)]
    num_sim_steps: Option<u64>,

    /// Ticks between network updates.
    #[arg(long)]
    update_freq: Option<u64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    eps_start: Option<f64>,

    #[arg(long)]
    eps_end: Option<f64>,

    #[arg(long)]
    eps_decay: Option<f64>,

    #[arg(long)]
    lr: Option<f64>,

    /// Controller family: fixed, analytical, learning or presslight.
    #[arg(long)]
    agents_type: Option<String>,

    /// Pre-trained weights for every learning agent.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Directory receiving one checkpoint per learning agent.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Optional JSONL path for per-episode summaries.
    #[arg(long)]
    log_jsonl: Option<PathBuf>,

    /// Record flow/density samples; each episode summary then carries its MFD series.
    #[arg(long)]
    mfd: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Simulator worker threads (defaults to available parallelism).
    #[arg(long)]
    threads: Option<usize>,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Build Config from defaults + env overrides, then apply CLI overrides.
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::from_env_or_default();

    if let Some(p) = &cli.sim_config {
        cfg.sim_config = Some(p.clone());
    }
    if let Some(v) = cli.num_episodes {
        cfg.num_episodes = v;
    }
    if let Some(v) = cli.num_sim_steps {
        cfg.num_sim_steps = v;
    }
    if let Some(v) = cli.update_freq {
        cfg.update_freq = v;
    }
    if let Some(v) = cli.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = cli.eps_start {
        cfg.eps_start = v;
    }
    if let Some(v) = cli.eps_end {
        cfg.eps_end = v;
    }
    if let Some(v) = cli.eps_decay {
        cfg.eps_decay = v;
    }
    if let Some(v) = cli.lr {
        cfg.lr = v;
    }
    if let Some(name) = &cli.agents_type {
        cfg.agents_type = name.parse::<AgentKind>()?;
    }
    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    if let Some(threads) = cli.threads {
        cfg.threads = threads;
    }
    cfg.load = cli.load.clone().or(cfg.load);
    cfg.save_dir = cli.save_dir.clone().or(cfg.save_dir);
    cfg.log_path = cli.log_jsonl.clone().or(cfg.log_path);
    cfg.record_mfd |= cli.mfd;

    cfg.validate()?;
    Ok(cfg)
}

fn build_engine(cfg: &Config) -> anyhow::Result<GridEngine> {
    match &cfg.sim_config {
        Some(path) => GridEngine::from_config_file(path, cfg.threads)
            .with_context(|| format!("loading simulation config {}", path.display())),
        None => {
            let spec = GridSpec::default();
            let roadnet = Roadnet::grid(&spec);
            let flows = roadnet.grid_flows(&spec);
            let sim = SimConfig {
                seed: cfg.seed,
                ..SimConfig::default()
            };
            Ok(GridEngine::new(&sim, roadnet, flows, cfg.threads)?)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = build_config(&cli)?;
    let engine = build_engine(&cfg)?;
    let mut env = Environment::new(engine, &cfg)?;
    let mut sink = build_sink(cfg.log_path.as_deref());

    let summaries = train(&mut env, &cfg, sink.as_mut())?;
    if let Some(last) = summaries.last() {
        info!(
            episodes = summaries.len(),
            travel_time = last.average_travel_time,
            reward = last.mean_reward,
            "training finished"
        );
    }
    Ok(())
}
