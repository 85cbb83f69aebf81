// tests/checkpoint_tests.rs
//
// Checkpoint round trips through the training loop:
// - save_dir receives one network per learning agent
// - `load` applies a checkpoint to every learning agent
// - malformed or mis-shaped checkpoints fail environment construction

use std::fs;

use traffic_rl::rl::Mlp;
use traffic_rl::runner::checkpoint_path;
use traffic_rl::{
    train, AgentKind, Config, Environment, FileSink, GridEngine, GridSpec, Roadnet, SimConfig,
};

fn grid_engine() -> GridEngine {
    let spec = GridSpec::default();
    let roadnet = Roadnet::grid(&spec);
    let flows = roadnet.grid_flows(&spec);
    GridEngine::new(&SimConfig::default(), roadnet, flows, 1).unwrap()
}

fn learning_cfg(kind: AgentKind) -> Config {
    Config {
        agents_type: kind,
        num_episodes: 2,
        num_sim_steps: 120,
        batch_size: 4,
        ..Config::default()
    }
}

#[test]
fn training_saves_one_checkpoint_per_agent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        save_dir: Some(dir.path().join("ckpt")),
        ..learning_cfg(AgentKind::Presslight)
    };
    let mut env = Environment::new(grid_engine(), &cfg).unwrap();
    let log = dir.path().join("episodes.jsonl");
    let mut sink = FileSink::create(&log).unwrap();

    let summaries = train(&mut env, &cfg, &mut sink).unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.mean_reward <= 0.0));
    assert_eq!(summaries[0].agent_rewards.len(), 4);

    for agent in env.agents() {
        let path = checkpoint_path(&dir.path().join("ckpt"), agent.id());
        let saved = Mlp::load(&path).unwrap();
        assert_eq!(saved.input_dim(), agent.dqn().unwrap().num_states());
        assert!(agent.dqn().unwrap().updates() > 0);
    }
    assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 2);
}

#[test]
fn non_learning_agents_write_no_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        save_dir: Some(dir.path().to_path_buf()),
        num_sim_steps: 20,
        ..learning_cfg(AgentKind::Fixed)
    };
    let mut env = Environment::new(grid_engine(), &cfg).unwrap();
    train(&mut env, &cfg, &mut traffic_rl::NoopSink).unwrap();
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn load_applies_checkpoint_to_every_agent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        save_dir: Some(dir.path().to_path_buf()),
        num_episodes: 1,
        ..learning_cfg(AgentKind::Learning)
    };
    let mut env = Environment::new(grid_engine(), &cfg).unwrap();
    train(&mut env, &cfg, &mut traffic_rl::NoopSink).unwrap();
    let first = checkpoint_path(dir.path(), env.agents()[0].id());

    let reload = Config {
        load: Some(first.clone()),
        ..learning_cfg(AgentKind::Learning)
    };
    let env2 = Environment::new(grid_engine(), &reload).unwrap();
    let expected = Mlp::load(&first).unwrap();
    for agent in env2.agents() {
        assert_eq!(agent.dqn().unwrap().policy(), &expected);
    }
}

#[test]
fn malformed_checkpoint_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();
    let cfg = Config {
        load: Some(path),
        ..learning_cfg(AgentKind::Learning)
    };
    assert!(Environment::new(grid_engine(), &cfg).is_err());
}

#[test]
fn mis_shaped_checkpoint_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.json");
    Mlp::new(3, 2, 0).save(&path).unwrap();
    let cfg = Config {
        load: Some(path),
        ..learning_cfg(AgentKind::Presslight)
    };
    let err = Environment::new(grid_engine(), &cfg).err().unwrap();
    assert!(format!("{err:#}").contains("loading weights"));
}
