// src/runner.rs
//
// Episode loop over an Environment.
//
// Each episode:
// - reset (skipped before the first one; the environment starts fresh)
// - `num_sim_steps` ticks, `done` set on the last
// - summary logged through tracing and the episode sink, including the
//   MFD series when recording is on and the distance each agent served
//
// Learning agents' networks are written to `save_dir` after the last episode.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::environment::Environment;
use crate::logging::EpisodeSink;
use crate::lane::MfdPoint;
use crate::metrics::SeriesStats;
use crate::sim::Engine;

/// Summary of a completed episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub ticks: u64,
    /// Exploration rate at the end of the episode.
    pub eps: f64,
    pub average_travel_time: f64,
    pub mean_speed: f64,
    /// Spread of the per-tick mean speed.
    pub speed_std: f64,
    pub total_stops: usize,
    /// Mean of all agents' rewards over the episode.
    pub mean_reward: f64,
    pub reward_std: f64,
    /// Mean reward per agent id.
    pub agent_rewards: BTreeMap<String, f64>,
    /// Distance covered on incoming lanes, summed over agents. Only the DQN
    /// families query distances; other families report 0.
    pub served_distance: f64,
    pub agent_served_distance: BTreeMap<String, f64>,
    /// Lane-averaged (density, flow) per tick when MFD recording is on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mfd: Vec<MfdPoint>,
    pub wall_ms: u64,
}

/// Run one episode of `cfg.num_sim_steps` ticks on the current state of `env`.
pub fn run_episode<E: Engine>(env: &mut Environment<E>, cfg: &Config, episode: usize) -> EpisodeSummary {
    let started = Instant::now();
    let steps = cfg.num_sim_steps;
    for time in 0..steps {
        env.step(time, time + 1 == steps);
    }

    let mut rewards = SeriesStats::default();
    let mut agent_rewards = BTreeMap::new();
    let mut agent_served_distance = BTreeMap::new();
    for agent in env.agents() {
        let base = agent.base();
        for &r in &base.total_rewards {
            rewards.push(r);
        }
        agent_rewards.insert(base.id.clone(), base.mean_reward());
        agent_served_distance.insert(base.id.clone(), base.served_distance());
    }
    let speeds = env.speed_stats();

    EpisodeSummary {
        episode,
        ticks: steps,
        eps: env.eps(),
        average_travel_time: env.engine().average_travel_time(),
        mean_speed: speeds.mean(),
        speed_std: speeds.std_dev(),
        total_stops: env.total_stops(),
        mean_reward: rewards.mean(),
        reward_std: rewards.std_dev(),
        agent_rewards,
        served_distance: agent_served_distance.values().sum(),
        agent_served_distance,
        mfd: env.mfd_series().to_vec(),
        wall_ms: started.elapsed().as_millis() as u64,
    }
}

/// Run `cfg.num_episodes` episodes, then save checkpoints if `cfg.save_dir`
/// is set.
pub fn train<E: Engine>(
    env: &mut Environment<E>,
    cfg: &Config,
    sink: &mut dyn EpisodeSink,
) -> anyhow::Result<Vec<EpisodeSummary>> {
    let mut summaries = Vec::with_capacity(cfg.num_episodes);
    for episode in 0..cfg.num_episodes {
        if episode > 0 {
            env.reset();
        }
        let summary = run_episode(env, cfg, episode);
        info!(
            episode,
            travel_time = summary.average_travel_time,
            mean_speed = summary.mean_speed,
            stops = summary.total_stops,
            reward = summary.mean_reward,
            served_distance = summary.served_distance,
            mfd_points = summary.mfd.len(),
            eps = summary.eps,
            wall_ms = summary.wall_ms,
            "episode finished"
        );
        sink.log_episode(&summary);
        summaries.push(summary);
    }

    if let Some(dir) = &cfg.save_dir {
        let written = save_checkpoints(env, dir)?;
        info!(dir = %dir.display(), written, "checkpoints saved");
    }
    Ok(summaries)
}

/// Checkpoint path for one agent.
pub fn checkpoint_path(dir: &Path, agent_id: &str) -> PathBuf {
    dir.join(format!("{agent_id}.json"))
}

/// Write every learning agent's policy network to `dir`. Returns the number
/// of files written.
pub fn save_checkpoints<E: Engine>(env: &Environment<E>, dir: &Path) -> anyhow::Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = 0;
    for agent in env.agents() {
        if let Some(dqn) = agent.dqn() {
            dqn.save(checkpoint_path(dir, agent.id()))?;
            written += 1;
        }
    }
    Ok(written)
}
