// src/rl/dqn.rs
//
// Deep Q-Network learner: policy + target networks, replay memory,
// epsilon-greedy action selection and a Huber TD update.

use std::path::Path;

use anyhow::bail;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::mlp::{argmax, Adam, Gradients, Mlp, DEFAULT_HIDDEN, DEFAULT_SEED};
use super::replay::{ReplayMemory, Transition};

#[derive(Debug, Clone)]
pub struct DqnConfig {
    pub lr: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Soft target update rate applied after every optimisation step.
    pub tau: f64,
    pub memory_size: usize,
    pub hidden: (usize, usize),
    /// Seed for network init; exploration uses `seed + 1`.
    pub seed: u64,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            lr: 5e-4,
            gamma: 0.8,
            tau: 0.01,
            memory_size: 10_000,
            hidden: DEFAULT_HIDDEN,
            seed: DEFAULT_SEED,
        }
    }
}

pub struct Dqn {
    policy: Mlp,
    target: Mlp,
    optim: Adam,
    memory: ReplayMemory,
    gamma: f64,
    tau: f64,
    rng: ChaCha8Rng,
    updates: u64,
}

impl Dqn {
    pub fn new(num_states: usize, num_actions: usize, cfg: &DqnConfig) -> Self {
        let policy = Mlp::with_hidden(num_states, num_actions, cfg.hidden, cfg.seed);
        let target = policy.clone();
        let optim = Adam::new(&policy, cfg.lr);
        Self {
            policy,
            target,
            optim,
            memory: ReplayMemory::new(cfg.memory_size),
            gamma: cfg.gamma,
            tau: cfg.tau,
            rng: ChaCha8Rng::seed_from_u64(cfg.seed.wrapping_add(1)),
            updates: 0,
        }
    }

    pub fn num_actions(&self) -> usize {
        self.policy.output_dim()
    }

    pub fn num_states(&self) -> usize {
        self.policy.input_dim()
    }

    pub fn policy(&self) -> &Mlp {
        &self.policy
    }

    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// Optimisation steps taken so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn q_values(&self, state: &[f64]) -> Vec<f64> {
        self.policy.forward(state)
    }

    /// Uniformly random action with probability `eps`, greedy otherwise.
    pub fn select_action(&mut self, state: &[f64], eps: f64) -> usize {
        if self.rng.gen::<f64>() < eps {
            self.rng.gen_range(0..self.num_actions().max(1))
        } else {
            argmax(&self.q_values(state))
        }
    }

    pub fn remember(&mut self, t: Transition) {
        self.memory.push(t);
    }

    /// One minibatch update. Returns the mean Huber loss, or None when the
    /// memory holds fewer than `batch_size` transitions.
    pub fn optimize(&mut self, batch_size: usize) -> Option<f64> {
        let batch: Vec<Transition> = self
            .memory
            .sample(batch_size, &mut self.rng)?
            .into_iter()
            .cloned()
            .collect();

        let n = batch.len() as f64;
        let mut grads = Gradients::zeros_like(&self.policy);
        let mut loss = 0.0;

        for t in &batch {
            let q = self.policy.forward(&t.state);
            let next_max = if t.done {
                0.0
            } else {
                self.target
                    .forward(&t.next_state)
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            let target = t.reward + self.gamma * next_max;
            let diff = q[t.action] - target;

            loss += if diff.abs() <= 1.0 {
                0.5 * diff * diff
            } else {
                diff.abs() - 0.5
            };

            let mut grad_out = vec![0.0; q.len()];
            grad_out[t.action] = diff.clamp(-1.0, 1.0) / n;
            self.policy.accumulate_gradients(&t.state, &grad_out, &mut grads);
        }

        self.optim.step(&mut self.policy, &grads);
        self.target.soft_update_from(&self.policy, self.tau);
        self.updates += 1;

        Some(loss / n)
    }

    /// Replace both networks with `weights`; shapes must match this learner.
    pub fn load_weights(&mut self, weights: Mlp) -> anyhow::Result<()> {
        if weights.input_dim() != self.num_states() || weights.output_dim() != self.num_actions() {
            bail!(
                "checkpoint maps {} states to {} actions, agent needs {} -> {}",
                weights.input_dim(),
                weights.output_dim(),
                self.num_states(),
                self.num_actions()
            );
        }
        let hidden_ok = weights
            .layers
            .iter()
            .zip(&self.policy.layers)
            .all(|(a, b)| a.weights.dim() == b.weights.dim());
        if weights.layers.len() != self.policy.layers.len() || !hidden_ok {
            bail!("checkpoint hidden layer sizes do not match the agent's network");
        }
        self.optim = Adam::new(&weights, self.optim.lr());
        self.target = weights.clone();
        self.policy = weights;
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let weights = Mlp::load(path)?;
        self.load_weights(weights)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        self.policy.save(path)
    }
}
