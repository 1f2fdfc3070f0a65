//! AdamW optimizer over Q-network parameters

use ndarray::{Array1, Array2, Zip};

use crate::qnet::{Gradients, QNetwork};

/// AdamW with decoupled weight decay and bias-corrected moments.
///
/// Moment buffers are laid out to match one network's layers; the
/// optimizer must only ever be stepped with that network.
#[derive(Debug, Clone)]
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    step_count: u64,
    m_weights: Vec<Array2<f32>>,
    v_weights: Vec<Array2<f32>>,
    m_biases: Vec<Array1<f32>>,
    v_biases: Vec<Array1<f32>>,
}

impl AdamW {
    /// Create an optimizer with zeroed moments shaped like `network`
    #[must_use]
    pub fn new(lr: f32, network: &QNetwork) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 1e-2,
            step_count: 0,
            m_weights: network.weights().iter().map(|w| Array2::zeros(w.dim())).collect(),
            v_weights: network.weights().iter().map(|w| Array2::zeros(w.dim())).collect(),
            m_biases: network.biases().iter().map(|b| Array1::zeros(b.len())).collect(),
            v_biases: network.biases().iter().map(|b| Array1::zeros(b.len())).collect(),
        }
    }

    /// Apply one update to `network` from `grads`
    pub(crate) fn step(&mut self, network: &mut QNetwork, grads: &Gradients) {
        self.step_count += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.step_count as i32);

        let (beta1, beta2) = (self.beta1, self.beta2);
        let (lr, eps, weight_decay) = (self.lr, self.eps, self.weight_decay);

        for l in 0..network.weights.len() {
            Zip::from(&mut network.weights[l])
                .and(&mut self.m_weights[l])
                .and(&mut self.v_weights[l])
                .and(&grads.d_weights[l])
                .for_each(|w, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias_correction1;
                    let v_hat = *v / bias_correction2;
                    *w -= lr * (m_hat / (v_hat.sqrt() + eps) + weight_decay * *w);
                });
            Zip::from(&mut network.biases[l])
                .and(&mut self.m_biases[l])
                .and(&mut self.v_biases[l])
                .and(&grads.d_biases[l])
                .for_each(|b, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias_correction1;
                    let v_hat = *v / bias_correction2;
                    *b -= lr * (m_hat / (v_hat.sqrt() + eps));
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qnet::StackSpec;
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn step_moves_parameters_against_the_gradient() {
        let spec = StackSpec {
            name: "test".to_string(),
            input_dim: 2,
            hidden_dims: vec![],
            n_actions: 2,
            image_shape: None,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let mut net = QNetwork::new(spec, &mut rng);
        let mut optimizer = AdamW::new(0.1, &net);

        let before = net.weights()[0].clone();
        let grads = Gradients {
            d_weights: vec![Array2::from_elem((2, 2), 1.0)],
            d_biases: vec![Array1::from_elem(2, 1.0)],
        };
        optimizer.step(&mut net, &grads);

        // A positive gradient must decrease every weight.
        for (after, before) in net.weights()[0].iter().zip(before.iter()) {
            assert!(after < before);
        }
    }
}
