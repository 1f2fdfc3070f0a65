//! Deep Q-Network agent: action selection, optimization, episode driver

use metrics::{counter, gauge, histogram};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, trace, warn};

use traffic_rl_core::{
    DiscreteAction, Environment, Episode, Observation, Result, TrafficRlError, Transition,
};

use crate::buffer::ReplayMemory;
use crate::optim::AdamW;
use crate::qnet::{argmax, NetworkCheckpoint, QNetwork, StackSpec};
use crate::session::TrainingSession;

/// DQN hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DQNConfig {
    /// Transitions sampled per optimizer step
    pub batch_size: usize,
    /// Discount factor for bootstrapped targets
    pub gamma: f32,
    /// Starting exploration rate
    pub eps_start: f64,
    /// Final exploration rate
    pub eps_end: f64,
    /// Exponential decay time constant, in steps
    pub eps_decay: f64,
    /// Polyak rate of the target network
    pub tau: f32,
    /// AdamW learning rate
    pub learning_rate: f32,
    /// Replay memory capacity
    pub memory_capacity: usize,
    /// Absolute bound applied to every gradient element
    pub grad_clip: f32,
    /// RNG seed; `None` draws one from the OS
    pub seed: Option<u64>,
}

impl Default for DQNConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            gamma: 0.99,
            eps_start: 0.9,
            eps_end: 0.05,
            eps_decay: 1000.0,
            tau: 0.005,
            learning_rate: 1e-4,
            memory_capacity: 2000,
            grad_clip: 100.0,
            seed: None,
        }
    }
}

impl DQNConfig {
    /// Exploration rate after `steps_done` selector calls.
    ///
    /// Equals `eps_start` at step 0 and decays exponentially toward
    /// `eps_end`.
    #[must_use]
    pub fn epsilon_at(&self, steps_done: usize) -> f64 {
        self.eps_end
            + (self.eps_start - self.eps_end) * (-(steps_done as f64) / self.eps_decay).exp()
    }
}

/// DQN agent owning its networks, optimizer, memory and session.
///
/// The policy network is mutated only by the optimizer step; the target
/// network only by the Polyak synchronizer.
pub struct DQNAgent {
    config: DQNConfig,
    policy_net: QNetwork,
    target_net: QNetwork,
    optimizer: AdamW,
    memory: ReplayMemory,
    session: TrainingSession,
    rng: StdRng,
}

impl DQNAgent {
    /// Create an agent for the given stack, target initialized as a hard
    /// copy of the policy network
    #[must_use]
    pub fn new(spec: StackSpec, config: DQNConfig) -> Self {
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let policy_net = QNetwork::new(spec, &mut rng);
        let target_net = policy_net.clone();
        let optimizer = AdamW::new(config.learning_rate, &policy_net);
        let memory = ReplayMemory::new(config.memory_capacity);

        Self {
            config,
            policy_net,
            target_net,
            optimizer,
            memory,
            session: TrainingSession::new(),
            rng,
        }
    }

    /// Hyperparameters in effect
    #[must_use]
    pub fn config(&self) -> &DQNConfig {
        &self.config
    }

    /// The trained policy network
    #[must_use]
    pub fn policy_net(&self) -> &QNetwork {
        &self.policy_net
    }

    /// The slowly-tracking target network
    #[must_use]
    pub fn target_net(&self) -> &QNetwork {
        &self.target_net
    }

    /// The replay memory
    #[must_use]
    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// The training session context
    #[must_use]
    pub fn session(&self) -> &TrainingSession {
        &self.session
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.config.epsilon_at(self.session.steps_done)
    }

    /// Store a transition in replay memory
    pub fn remember(&mut self, transition: Transition) {
        self.memory.push(transition);
    }

    /// Epsilon-greedy action selection.
    ///
    /// Increments the session step counter exactly once per call and
    /// never mutates the networks. Greedy ties resolve to the lowest
    /// action index.
    pub fn select_action(&mut self, state: &Array1<f32>) -> DiscreteAction {
        let eps = self.epsilon();
        self.session.steps_done += 1;

        let sample: f64 = self.rng.gen();
        if sample > eps {
            let (_, action) = self.evaluate(state);
            DiscreteAction(action)
        } else {
            DiscreteAction(self.rng.gen_range(0..self.policy_net.spec().n_actions))
        }
    }

    /// Action values and the greedy action index for one state
    #[must_use]
    pub fn evaluate(&self, state: &Array1<f32>) -> (Array1<f32>, usize) {
        let batch = state.clone().insert_axis(Axis(0));
        let values = self.policy_net.forward(&batch).index_axis_move(Axis(0), 0);
        let action = argmax(values.view());
        (values, action)
    }

    /// Bootstrapped targets `y = r + gamma * max_a Q_target(s')`, with the
    /// successor value fixed at zero for terminal transitions
    fn batch_targets(&self, batch: &[&Transition]) -> Array1<f32> {
        let n = batch.len();
        let input_dim = self.policy_net.spec().input_dim;

        let non_final: Vec<(usize, &Array1<f32>)> = batch
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.next_state.as_ref().map(|s| (i, s)))
            .collect();

        let mut next_values = Array1::zeros(n);
        if !non_final.is_empty() {
            let mut next_states = Array2::zeros((non_final.len(), input_dim));
            for (row, (_, s)) in non_final.iter().enumerate() {
                next_states.row_mut(row).assign(*s);
            }
            let q_next = self.target_net.forward(&next_states);
            for (row, (i, _)) in non_final.iter().enumerate() {
                next_values[*i] = q_next
                    .row(row)
                    .iter()
                    .fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            }
        }

        let mut targets = Array1::zeros(n);
        for (i, t) in batch.iter().enumerate() {
            targets[i] = t.reward.0 + self.config.gamma * next_values[i];
        }
        targets
    }

    /// One gradient-descent update of the policy network.
    ///
    /// A no-op returning `Ok(None)` while the memory holds fewer than
    /// `batch_size` transitions, and when the loss is non-finite (logged,
    /// parameters untouched). Otherwise returns the scalar Huber loss.
    pub fn optimize_model(&mut self) -> Result<Option<f32>> {
        if self.memory.len() < self.config.batch_size {
            trace!(
                occupancy = self.memory.len(),
                batch_size = self.config.batch_size,
                "replay memory below batch size, skipping optimizer step"
            );
            return Ok(None);
        }

        let batch_size = self.config.batch_size;
        let input_dim = self.policy_net.spec().input_dim;

        let (states, actions, targets) = {
            let batch = self.memory.sample(&mut self.rng, batch_size)?;
            let mut states = Array2::zeros((batch_size, input_dim));
            let mut actions = Vec::with_capacity(batch_size);
            for (i, t) in batch.iter().enumerate() {
                if t.state.len() != input_dim {
                    return Err(TrafficRlError::DimensionMismatch {
                        expected: input_dim,
                        actual: t.state.len(),
                    });
                }
                if let Some(ns) = &t.next_state {
                    if ns.len() != input_dim {
                        return Err(TrafficRlError::DimensionMismatch {
                            expected: input_dim,
                            actual: ns.len(),
                        });
                    }
                }
                states.row_mut(i).assign(&t.state);
                actions.push(t.action.0);
            }
            let targets = self.batch_targets(&batch);
            (states, actions, targets)
        };

        let cache = self.policy_net.forward_cached(&states);

        // Huber loss on the gathered Q(s, a), mean over the batch.
        let mut d_output = Array2::zeros(cache.output.dim());
        let mut loss = 0.0f32;
        for i in 0..batch_size {
            let error = cache.output[[i, actions[i]]] - targets[i];
            loss += if error.abs() <= 1.0 {
                0.5 * error * error
            } else {
                error.abs() - 0.5
            };
            d_output[[i, actions[i]]] = error.clamp(-1.0, 1.0) / batch_size as f32;
        }
        loss /= batch_size as f32;

        if !loss.is_finite() {
            warn!(loss, "non-finite loss, skipping optimizer step");
            return Ok(None);
        }

        let mut grads = self.policy_net.backward(&cache, &d_output);
        grads.clip(self.config.grad_clip);
        self.optimizer.step(&mut self.policy_net, &grads);

        Ok(Some(loss))
    }

    /// Nudge the target network toward the policy network
    pub fn sync_target(&mut self) {
        self.target_net
            .soft_update_from(&self.policy_net, self.config.tau);
    }

    /// Run the training loop for `num_episodes` episodes.
    ///
    /// Replay memory persists across episode boundaries. The session's
    /// stop flag is honored between steps and between episodes; an
    /// in-flight optimizer step always runs to completion. When
    /// `checkpoint_dir` is set, both networks are saved after every
    /// episode.
    pub async fn train<E: Environment>(
        &mut self,
        env: &mut E,
        num_episodes: usize,
        checkpoint_dir: Option<&Path>,
    ) -> Result<()> {
        for episode_index in 0..num_episodes {
            if self.session.stop_requested() {
                info!(episode_index, "stop requested, ending training");
                break;
            }

            let start_time = chrono::Utc::now();
            let mut state = env.reset().await?.to_array();
            let mut total_reward = 0.0f32;
            let mut steps = 0usize;
            let mut truncated = false;

            loop {
                let action = self.select_action(&state);
                let step = env.step(action).await?;
                steps += 1;
                total_reward += step.reward.0;

                let next_state = if step.terminated {
                    None
                } else {
                    Some(step.observation.to_array())
                };

                self.memory.push(Transition {
                    state,
                    action,
                    next_state: next_state.clone(),
                    reward: step.reward,
                });

                if let Some(loss) = self.optimize_model()? {
                    histogram!("traffic_rl_loss", f64::from(loss));
                    trace!(loss, "optimizer step applied");
                }
                self.sync_target();

                counter!("traffic_rl_steps_total", 1);
                gauge!("traffic_rl_epsilon", self.epsilon());

                if step.done() {
                    truncated = step.truncated;
                    break;
                }
                state = match next_state {
                    Some(s) => s,
                    None => break,
                };
                if self.session.stop_requested() {
                    truncated = true;
                    break;
                }
            }

            self.session.record_episode(Episode {
                id: uuid::Uuid::new_v4().to_string(),
                total_reward,
                steps,
                truncated,
                start_time,
                end_time: Some(chrono::Utc::now()),
            });
            info!(
                episode = episode_index,
                duration = steps,
                total_reward,
                epsilon = self.epsilon(),
                "episode complete"
            );

            if let Some(dir) = checkpoint_dir {
                self.save(dir).await?;
            }
        }
        Ok(())
    }

    /// Run greedy episodes without learning; returns episode durations
    pub async fn run_greedy<E: Environment>(
        &self,
        env: &mut E,
        num_episodes: usize,
    ) -> Result<Vec<usize>> {
        let mut durations = Vec::with_capacity(num_episodes);
        for _ in 0..num_episodes {
            let mut state = env.reset().await?.to_array();
            let mut steps = 0usize;
            loop {
                let (values, action) = self.evaluate(&state);
                debug!(action, values = ?values.to_vec(), "greedy action");
                let step = env.step(DiscreteAction(action)).await?;
                steps += 1;
                if step.done() {
                    break;
                }
                state = step.observation.to_array();
            }
            durations.push(steps);
        }
        Ok(durations)
    }

    fn checkpoint_path(dir: &Path, stack_name: &str, role: &str) -> std::path::PathBuf {
        dir.join(format!("{stack_name}_{role}_net.json"))
    }

    /// Save both parameter blobs under `dir`, keyed by stack name
    pub async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let stack_name = self.policy_net.spec().name.clone();

        for (net, role) in [(&self.policy_net, "policy"), (&self.target_net, "target")] {
            let blob = serde_json::to_string(&net.to_checkpoint())?;
            let path = Self::checkpoint_path(dir, &stack_name, role);
            tokio::fs::write(&path, blob).await?;
        }
        debug!(stack = %stack_name, dir = %dir.display(), "saved checkpoints");
        Ok(())
    }

    /// Load both parameter blobs from `dir`.
    ///
    /// # Errors
    ///
    /// Missing or unreadable files surface as collaborator errors; a
    /// checkpoint whose declared architecture disagrees with the
    /// configured one fails fast with a configuration error.
    pub async fn load(&mut self, dir: &Path) -> Result<()> {
        let stack_name = self.policy_net.spec().name.clone();

        for role in ["policy", "target"] {
            let path = Self::checkpoint_path(dir, &stack_name, role);
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                TrafficRlError::Collaborator(format!(
                    "failed to read checkpoint {}: {e}",
                    path.display()
                ))
            })?;
            let checkpoint: NetworkCheckpoint = serde_json::from_str(&raw)?;
            if checkpoint.stack != *self.policy_net.spec() {
                return Err(TrafficRlError::Config(format!(
                    "checkpoint {} was trained with stack '{}', configured stack is '{}'",
                    path.display(),
                    checkpoint.stack.name,
                    stack_name
                )));
            }
            let net = QNetwork::from_checkpoint(checkpoint)?;
            match role {
                "policy" => self.policy_net = net,
                _ => self.target_net = net,
            }
        }
        info!(stack = %stack_name, dir = %dir.display(), "loaded checkpoints");
        Ok(())
    }
}
