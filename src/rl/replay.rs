// src/rl/replay.rs
//
// Bounded experience replay buffer with uniform sampling.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
}

/// Ring buffer: once full, the oldest transition is overwritten.
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    capacity: usize,
    buf: Vec<Transition>,
    next: usize,
}

impl ReplayMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buf: Vec::with_capacity(capacity.min(4096)),
            next: 0,
        }
    }

    pub fn push(&mut self, t: Transition) {
        if self.buf.len() < self.capacity {
            self.buf.push(t);
        } else {
            self.buf[self.next] = t;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `batch_size` distinct transitions, or None if not enough are stored.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Option<Vec<&Transition>> {
        if batch_size == 0 || self.buf.len() < batch_size {
            return None;
        }
        Some(
            index::sample(rng, self.buf.len(), batch_size)
                .into_iter()
                .map(|i| &self.buf[i])
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn t(reward: f64) -> Transition {
        Transition {
            state: vec![0.0],
            action: 0,
            reward,
            next_state: vec![0.0],
            done: false,
        }
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut m = ReplayMemory::new(3);
        for r in 0..5 {
            m.push(t(r as f64));
        }
        assert_eq!(m.len(), 3);
        let mut rewards: Vec<f64> = m.buf.iter().map(|t| t.reward).collect();
        rewards.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_sample_requires_enough_transitions() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut m = ReplayMemory::new(10);
        m.push(t(1.0));
        assert!(m.sample(2, &mut rng).is_none());
        m.push(t(2.0));
        let batch = m.sample(2, &mut rng).unwrap();
        assert_eq!(batch.len(), 2);
        assert_ne!(batch[0].reward, batch[1].reward);
    }
}
