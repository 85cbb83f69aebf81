// src/rl/mlp.rs
//
// Three-layer fully connected Q-network:
//   Linear(n_obs, h1) -> ReLU -> Linear(h1, h2) -> ReLU -> Linear(h2, n_actions)
//
// ndarray weights with a hand-written backward pass and Adam optimiser,
// plus JSON checkpoints.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, Dimension, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Checkpoint format version written alongside the weights.
pub const CHECKPOINT_VERSION: u32 = 1;

pub const DEFAULT_HIDDEN: (usize, usize) = (64, 64);
pub const DEFAULT_SEED: u64 = 42;

/// Dense layer `y = W x + b`, with `W` shaped `(out, in)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Linear {
    /// Uniform init in `±1/sqrt(in_dim)` for both weights and bias.
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut ChaCha8Rng) -> Self {
        let bound = 1.0 / (in_dim.max(1) as f64).sqrt();
        let weights = Array2::from_shape_fn((out_dim, in_dim), |_| rng.gen_range(-bound..bound));
        let bias = Array1::from_shape_fn(out_dim, |_| rng.gen_range(-bound..bound));
        Self { weights, bias }
    }

    pub fn in_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn forward(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.weights.dot(&x) + &self.bias
    }
}

/// Per-layer gradients, shaped like the layers.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Vec<Array2<f64>>,
    pub bias: Vec<Array1<f64>>,
}

impl Gradients {
    pub fn zeros_like(mlp: &Mlp) -> Self {
        Self {
            weights: mlp
                .layers
                .iter()
                .map(|l| Array2::zeros(l.weights.raw_dim()))
                .collect(),
            bias: mlp.layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
        }
    }
}

/// Intermediate values kept from a forward pass for backprop.
struct Trace {
    /// Input to each layer.
    inputs: Vec<Array1<f64>>,
    /// Pre-activation output of each layer.
    pre: Vec<Array1<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    #[serde(default = "checkpoint_version")]
    pub version: u32,
    pub layers: Vec<Linear>,
}

fn checkpoint_version() -> u32 {
    CHECKPOINT_VERSION
}

impl Mlp {
    /// Default 64x64 hidden network.
    pub fn new(num_observations: usize, num_actions: usize, seed: u64) -> Self {
        Self::with_hidden(num_observations, num_actions, DEFAULT_HIDDEN, seed)
    }

    pub fn with_hidden(
        num_observations: usize,
        num_actions: usize,
        hidden: (usize, usize),
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let layers = vec![
            Linear::new(num_observations, hidden.0, &mut rng),
            Linear::new(hidden.0, hidden.1, &mut rng),
            Linear::new(hidden.1, num_actions, &mut rng),
        ];
        Self {
            version: CHECKPOINT_VERSION,
            layers,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(Linear::in_dim).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(Linear::out_dim).unwrap_or(0)
    }

    /// Per-action values for one state.
    pub fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.forward_trace(x).0.to_vec()
    }

    fn forward_trace(&self, x: &[f64]) -> (Array1<f64>, Trace) {
        let last = self.layers.len().saturating_sub(1);
        let mut trace = Trace {
            inputs: Vec::with_capacity(self.layers.len()),
            pre: Vec::with_capacity(self.layers.len()),
        };
        let mut a = ArrayView1::from(x).to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(a.view());
            let mut out = z.clone();
            if i < last {
                out.mapv_inplace(|v| v.max(0.0));
            }
            trace.inputs.push(a);
            trace.pre.push(z);
            a = out;
        }
        (a, trace)
    }

    /// Accumulate into `grads` the gradient of a loss whose derivative with
    /// respect to the network output at `x` is `grad_out`.
    pub fn accumulate_gradients(&self, x: &[f64], grad_out: &[f64], grads: &mut Gradients) {
        let (_, trace) = self.forward_trace(x);
        let last = self.layers.len().saturating_sub(1);
        let mut g = ArrayView1::from(grad_out).to_owned();

        for (i, layer) in self.layers.iter().enumerate().rev() {
            if i < last {
                g.zip_mut_with(&trace.pre[i], |gj, &z| {
                    if z <= 0.0 {
                        *gj = 0.0;
                    }
                });
            }

            // dW += g x^T
            let g_col = g.view().insert_axis(Axis(1));
            let x_row = trace.inputs[i].view().insert_axis(Axis(0));
            general_mat_mul(1.0, &g_col, &x_row, 1.0, &mut grads.weights[i]);
            grads.bias[i] += &g;

            if i > 0 {
                g = layer.weights.t().dot(&g);
            }
        }
    }

    /// `self = tau * source + (1 - tau) * self`. Both networks share a shape.
    pub fn soft_update_from(&mut self, source: &Mlp, tau: f64) {
        let blend = |d: &mut f64, &s: &f64| *d = tau * s + (1.0 - tau) * *d;
        for (dst, src) in self.layers.iter_mut().zip(&source.layers) {
            dst.weights.zip_mut_with(&src.weights, blend);
            dst.bias.zip_mut_with(&src.bias, blend);
        }
    }

    /// Layer dimensions chain and every bias matches its layer.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.layers.is_empty() {
            bail!("network has no layers");
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.out_dim() {
                bail!(
                    "layer {i}: {} outputs but {} biases",
                    layer.out_dim(),
                    layer.bias.len()
                );
            }
            if i > 0 && self.layers[i - 1].out_dim() != layer.in_dim() {
                bail!(
                    "layer {i} expects {} inputs but layer {} produces {}",
                    layer.in_dim(),
                    i - 1,
                    self.layers[i - 1].out_dim()
                );
            }
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self)?;
        fs::write(path, json).with_context(|| format!("writing checkpoint {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        let mlp: Mlp = serde_json::from_str(&raw)
            .with_context(|| format!("parsing checkpoint {}", path.display()))?;
        if mlp.version != CHECKPOINT_VERSION {
            bail!(
                "checkpoint {} has version {}, expected {}",
                path.display(),
                mlp.version,
                CHECKPOINT_VERSION
            );
        }
        mlp.validate()
            .with_context(|| format!("checkpoint {}", path.display()))?;
        Ok(mlp)
    }
}

/// Index of the largest value; first index wins ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, Copy)]
struct AdamStep {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    /// Bias corrections `1 - beta^t`.
    bc1: f64,
    bc2: f64,
}

/// Adam optimiser state for one network.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    pub fn new(mlp: &Mlp, lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: Gradients::zeros_like(mlp),
            v: Gradients::zeros_like(mlp),
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn step(&mut self, mlp: &mut Mlp, grads: &Gradients) {
        self.t = self.t.saturating_add(1);
        let hp = AdamStep {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            bc1: 1.0 - self.beta1.powi(self.t),
            bc2: 1.0 - self.beta2.powi(self.t),
        };

        for (i, layer) in mlp.layers.iter_mut().enumerate() {
            adam_update(
                &mut layer.weights,
                &grads.weights[i],
                &mut self.m.weights[i],
                &mut self.v.weights[i],
                hp,
            );
            adam_update(
                &mut layer.bias,
                &grads.bias[i],
                &mut self.m.bias[i],
                &mut self.v.bias[i],
                hp,
            );
        }
    }
}

fn adam_update<D: Dimension>(
    params: &mut Array<f64, D>,
    grads: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    hp: AdamStep,
) {
    Zip::from(params)
        .and(grads)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = hp.beta1 * *m + (1.0 - hp.beta1) * g;
            *v = hp.beta2 * *v + (1.0 - hp.beta2) * g * g;
            let m_hat = *m / hp.bc1;
            let v_hat = *v / hp.bc2;
            *p -= hp.lr * m_hat / (v_hat.sqrt() + hp.eps);
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_and_seeded_init() {
        let a = Mlp::new(10, 4, 42);
        let b = Mlp::new(10, 4, 42);
        let c = Mlp::new(10, 4, 7);

        assert_eq!(a.input_dim(), 10);
        assert_eq!(a.output_dim(), 4);
        assert_eq!(a.layers[0].out_dim(), 64);
        assert_eq!(a.layers[1].out_dim(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.forward(&[0.5; 10]).len(), 4);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mlp = Mlp::with_hidden(3, 2, (5, 4), 1);
        let x = [0.3, -0.7, 1.1];
        // loss = 0.5 * q[1]^2
        let q = mlp.forward(&x);
        let grad_out = [0.0, q[1]];
        let mut grads = Gradients::zeros_like(&mlp);
        mlp.accumulate_gradients(&x, &grad_out, &mut grads);

        let h = 1e-6;
        for (layer, rc) in [(0usize, [0usize, 2usize]), (1, [1, 3]), (2, [1, 0])] {
            let mut plus = mlp.clone();
            plus.layers[layer].weights[rc] += h;
            let mut minus = mlp.clone();
            minus.layers[layer].weights[rc] -= h;
            let lp = 0.5 * plus.forward(&x)[1].powi(2);
            let lm = 0.5 * minus.forward(&x)[1].powi(2);
            let numeric = (lp - lm) / (2.0 * h);
            let analytic = grads.weights[layer][rc];
            assert!(
                (numeric - analytic).abs() < 1e-5,
                "layer {layer} weight {rc:?}: numeric {numeric} vs analytic {analytic}"
            );
        }
    }

    #[test]
    fn test_adam_reduces_loss() {
        let mut mlp = Mlp::with_hidden(2, 1, (8, 8), 3);
        let mut adam = Adam::new(&mlp, 0.01);
        let x = [1.0, -1.0];
        let target = 2.5;

        let loss = |m: &Mlp| 0.5 * (m.forward(&x)[0] - target).powi(2);
        let before = loss(&mlp);
        for _ in 0..500 {
            let q = mlp.forward(&x)[0];
            let mut grads = Gradients::zeros_like(&mlp);
            mlp.accumulate_gradients(&x, &[q - target], &mut grads);
            adam.step(&mut mlp, &grads);
        }
        assert!(loss(&mlp) < before * 0.01);
    }

    #[test]
    fn test_soft_update() {
        let src = Mlp::new(2, 2, 1);
        let mut dst = Mlp::new(2, 2, 2);
        dst.soft_update_from(&src, 1.0);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 0.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_validate_rejects_mismatched_layers() {
        let mut mlp = Mlp::new(4, 2, 1);
        mlp.layers[1].weights = Array2::zeros((64, 32));
        assert!(mlp.validate().is_err());

        let mut mlp = Mlp::new(4, 2, 1);
        mlp.layers[2].bias = Array1::zeros(3);
        assert!(mlp.validate().is_err());
    }

    #[test]
    fn test_checkpoint_rejects_data_not_matching_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.json");
        let mut json: serde_json::Value = serde_json::to_value(Mlp::new(2, 2, 0)).unwrap();
        json["layers"][0]["bias"]["data"] = serde_json::json!([0.0]);
        fs::write(&path, json.to_string()).unwrap();
        assert!(Mlp::load(&path).is_err());
    }
}
