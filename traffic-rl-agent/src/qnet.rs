//! Q-network layer stacks and the stack registry
//!
//! Networks are fully-connected ReLU stacks over ndarray tensors. Every
//! stack shares the `(input_dim, n_actions)` contract, so the optimizer
//! step and the action selector stay architecture-agnostic. Backprop is
//! implemented by hand; the only trainable state is the weight and bias
//! tensors.

use lazy_static::lazy_static;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use traffic_rl_core::{Result, TrafficRlError};

/// Architecture description of one Q-network variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    /// Registry name of the stack
    pub name: String,
    /// Flattened input dimension
    pub input_dim: usize,
    /// Hidden layer widths
    pub hidden_dims: Vec<usize>,
    /// Number of discrete phase actions
    pub n_actions: usize,
    /// `(height, width, channels)` for stacks consuming image observations
    pub image_shape: Option<(usize, usize, usize)>,
}

fn feature_stack(name: &str, hidden_dims: Vec<usize>) -> StackSpec {
    StackSpec {
        name: name.to_string(),
        // 4 edge queue accumulators + 4-phase one-hot
        input_dim: 8,
        hidden_dims,
        n_actions: 4,
        image_shape: None,
    }
}

fn pixel_stack(name: &str, height: usize, width: usize, hidden_dims: Vec<usize>) -> StackSpec {
    StackSpec {
        name: name.to_string(),
        input_dim: height * width * 3,
        hidden_dims,
        n_actions: 4,
        image_shape: Some((height, width, 3)),
    }
}

lazy_static! {
    /// Registered layer stacks, keyed by name
    static ref STACKS: BTreeMap<&'static str, StackSpec> = {
        let mut m = BTreeMap::new();
        m.insert("v1", feature_stack("v1", vec![64, 64]));
        m.insert("v2", feature_stack("v2", vec![128, 128]));
        m.insert("v3", feature_stack("v3", vec![256, 128, 64]));
        m.insert("pix18", pixel_stack("pix18", 18, 36, vec![256, 64]));
        m.insert("pix32", pixel_stack("pix32", 32, 32, vec![512, 128]));
        m
    };
}

/// Look up a stack by name.
///
/// # Errors
///
/// Fails fast with a configuration error for unknown names.
pub fn stack(name: &str) -> Result<StackSpec> {
    STACKS.get(name).cloned().ok_or_else(|| {
        TrafficRlError::Config(format!(
            "unknown network stack '{name}', available: {:?}",
            stack_names()
        ))
    })
}

/// Names of all registered stacks
#[must_use]
pub fn stack_names() -> Vec<&'static str> {
    STACKS.keys().copied().collect()
}

/// Index of the largest value; the lowest index wins on ties.
#[must_use]
pub fn argmax(values: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Serializable parameter blob for one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCheckpoint {
    /// Architecture the parameters belong to
    pub stack: StackSpec,
    /// Weight matrices, one per layer
    pub weights: Vec<Array2<f32>>,
    /// Bias vectors, one per layer
    pub biases: Vec<Array1<f32>>,
}

/// Intermediate activations kept for the backward pass
pub(crate) struct ForwardCache {
    input: Array2<f32>,
    /// Pre-activation values of each hidden layer
    pre_activations: Vec<Array2<f32>>,
    /// Post-ReLU values of each hidden layer
    activations: Vec<Array2<f32>>,
    /// Network output, `[batch, n_actions]`
    pub output: Array2<f32>,
}

/// Parameter gradients matching a network's layer layout
pub(crate) struct Gradients {
    pub d_weights: Vec<Array2<f32>>,
    pub d_biases: Vec<Array1<f32>>,
}

impl Gradients {
    /// Clamp every gradient element to `[-bound, bound]`
    pub fn clip(&mut self, bound: f32) {
        for g in &mut self.d_weights {
            g.mapv_inplace(|v| v.clamp(-bound, bound));
        }
        for g in &mut self.d_biases {
            g.mapv_inplace(|v| v.clamp(-bound, bound));
        }
    }
}

/// Fully-connected Q-network mapping observation batches to action values
#[derive(Debug, Clone)]
pub struct QNetwork {
    spec: StackSpec,
    pub(crate) weights: Vec<Array2<f32>>,
    pub(crate) biases: Vec<Array1<f32>>,
}

impl QNetwork {
    /// Create a network with Xavier-uniform initialized weights
    pub fn new<R: Rng>(spec: StackSpec, rng: &mut R) -> Self {
        let mut weights = Vec::new();
        let mut biases = Vec::new();

        let mut prev_dim = spec.input_dim;
        for &hidden_dim in &spec.hidden_dims {
            weights.push(Self::xavier_init(prev_dim, hidden_dim, rng));
            biases.push(Array1::zeros(hidden_dim));
            prev_dim = hidden_dim;
        }
        weights.push(Self::xavier_init(prev_dim, spec.n_actions, rng));
        biases.push(Array1::zeros(spec.n_actions));

        Self {
            spec,
            weights,
            biases,
        }
    }

    fn xavier_init<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> Array2<f32> {
        let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
        Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit))
    }

    /// Architecture of this network
    #[must_use]
    pub fn spec(&self) -> &StackSpec {
        &self.spec
    }

    /// Weight matrices, one per layer
    #[must_use]
    pub fn weights(&self) -> &[Array2<f32>] {
        &self.weights
    }

    /// Bias vectors, one per layer
    #[must_use]
    pub fn biases(&self) -> &[Array1<f32>] {
        &self.biases
    }

    /// Forward pass: `[batch, input_dim]` to `[batch, n_actions]`
    #[must_use]
    pub fn forward(&self, batch: &Array2<f32>) -> Array2<f32> {
        let mut hidden = batch.clone();
        for i in 0..self.spec.hidden_dims.len() {
            hidden = hidden.dot(&self.weights[i]) + &self.biases[i];
            hidden.mapv_inplace(|v| v.max(0.0));
        }
        let last = self.weights.len() - 1;
        hidden.dot(&self.weights[last]) + &self.biases[last]
    }

    /// Forward pass that retains per-layer activations for backprop
    pub(crate) fn forward_cached(&self, batch: &Array2<f32>) -> ForwardCache {
        let n_hidden = self.spec.hidden_dims.len();
        let mut pre_activations = Vec::with_capacity(n_hidden);
        let mut activations = Vec::with_capacity(n_hidden);

        let mut hidden = batch.clone();
        for i in 0..n_hidden {
            let z = hidden.dot(&self.weights[i]) + &self.biases[i];
            let a = z.mapv(|v| v.max(0.0));
            pre_activations.push(z);
            hidden = a.clone();
            activations.push(a);
        }
        let last = self.weights.len() - 1;
        let output = hidden.dot(&self.weights[last]) + &self.biases[last];

        ForwardCache {
            input: batch.clone(),
            pre_activations,
            activations,
            output,
        }
    }

    /// Backpropagate `d_output = dL/d(output)` through the cached pass
    pub(crate) fn backward(&self, cache: &ForwardCache, d_output: &Array2<f32>) -> Gradients {
        let layers = self.weights.len();
        let mut d_weights = vec![Array2::zeros((0, 0)); layers];
        let mut d_biases = vec![Array1::zeros(0); layers];

        let mut delta = d_output.clone();
        for l in (0..layers).rev() {
            let input = if l == 0 {
                &cache.input
            } else {
                &cache.activations[l - 1]
            };
            d_weights[l] = input.t().dot(&delta);
            d_biases[l] = delta.sum_axis(Axis(0));

            if l > 0 {
                let upstream = delta.dot(&self.weights[l].t());
                let mask = cache.pre_activations[l - 1].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                delta = upstream * &mask;
            }
        }

        Gradients {
            d_weights,
            d_biases,
        }
    }

    /// Polyak update: `self <- tau * source + (1 - tau) * self`.
    ///
    /// With `tau = 1` this is a hard copy; with `tau = 0` it is a no-op.
    pub fn soft_update_from(&mut self, source: &QNetwork, tau: f32) {
        for (t, s) in self.weights.iter_mut().zip(&source.weights) {
            Zip::from(t).and(s).for_each(|t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
        for (t, s) in self.biases.iter_mut().zip(&source.biases) {
            Zip::from(t).and(s).for_each(|t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
    }

    /// Snapshot the parameters into a serializable checkpoint
    #[must_use]
    pub fn to_checkpoint(&self) -> NetworkCheckpoint {
        NetworkCheckpoint {
            stack: self.spec.clone(),
            weights: self.weights.clone(),
            biases: self.biases.clone(),
        }
    }

    /// Rebuild a network from a checkpoint.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the parameter shapes do not
    /// match the declared stack.
    pub fn from_checkpoint(checkpoint: NetworkCheckpoint) -> Result<Self> {
        let spec = checkpoint.stack;
        let mut dims = Vec::with_capacity(spec.hidden_dims.len() + 2);
        dims.push(spec.input_dim);
        dims.extend(&spec.hidden_dims);
        dims.push(spec.n_actions);

        if checkpoint.weights.len() != dims.len() - 1 || checkpoint.biases.len() != dims.len() - 1 {
            return Err(TrafficRlError::Config(format!(
                "checkpoint for stack '{}' has {} layers, expected {}",
                spec.name,
                checkpoint.weights.len(),
                dims.len() - 1
            )));
        }
        for (l, (w, b)) in checkpoint.weights.iter().zip(&checkpoint.biases).enumerate() {
            if w.dim() != (dims[l], dims[l + 1]) || b.len() != dims[l + 1] {
                return Err(TrafficRlError::Config(format!(
                    "checkpoint layer {l} of stack '{}' has shape {:?}, expected ({}, {})",
                    spec.name,
                    w.dim(),
                    dims[l],
                    dims[l + 1]
                )));
            }
        }

        Ok(Self {
            spec,
            weights: checkpoint.weights,
            biases: checkpoint.biases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_spec() -> StackSpec {
        StackSpec {
            name: "test".to_string(),
            input_dim: 4,
            hidden_dims: vec![8],
            n_actions: 3,
            image_shape: None,
        }
    }

    #[test]
    fn forward_has_batched_action_value_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = QNetwork::new(test_spec(), &mut rng);
        let batch = Array2::zeros((5, 4));
        let out = net.forward(&batch);
        assert_eq!(out.dim(), (5, 3));
    }

    #[test]
    fn argmax_breaks_ties_toward_lowest_index() {
        assert_eq!(argmax(arr1(&[1.0, 3.0, 3.0, 0.0]).view()), 1);
        assert_eq!(argmax(arr1(&[2.0, 2.0]).view()), 0);
        assert_eq!(argmax(arr1(&[-1.0, -2.0]).view()), 0);
    }

    #[test]
    fn soft_update_with_tau_one_is_a_hard_copy() {
        let mut rng = StdRng::seed_from_u64(2);
        let source = QNetwork::new(test_spec(), &mut rng);
        let mut target = QNetwork::new(test_spec(), &mut rng);

        target.soft_update_from(&source, 1.0);
        assert_eq!(target.weights(), source.weights());
        assert_eq!(target.biases(), source.biases());
    }

    #[test]
    fn soft_update_with_tau_zero_is_a_no_op() {
        let mut rng = StdRng::seed_from_u64(3);
        let source = QNetwork::new(test_spec(), &mut rng);
        let mut target = QNetwork::new(test_spec(), &mut rng);
        let before = target.weights().to_vec();

        target.soft_update_from(&source, 0.0);
        assert_eq!(target.weights(), &before[..]);
    }

    #[test]
    fn unknown_stack_name_is_a_config_error() {
        assert!(stack("v1").is_ok());
        assert!(stack("nope").is_err());
    }

    #[test]
    fn checkpoint_round_trip_preserves_parameters() {
        let mut rng = StdRng::seed_from_u64(4);
        let net = QNetwork::new(test_spec(), &mut rng);
        let restored = QNetwork::from_checkpoint(net.to_checkpoint()).unwrap();
        assert_eq!(restored.weights(), net.weights());
        assert_eq!(restored.biases(), net.biases());
    }

    #[test]
    fn malformed_checkpoint_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let net = QNetwork::new(test_spec(), &mut rng);
        let mut checkpoint = net.to_checkpoint();
        checkpoint.weights.pop();
        assert!(QNetwork::from_checkpoint(checkpoint).is_err());
    }
}
