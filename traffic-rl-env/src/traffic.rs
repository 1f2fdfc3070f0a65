//! Traffic intersection environment
//!
//! Wraps a [`SimulatorClient`] in the core [`Environment`] contract:
//! discrete phase actions go in, flat feature observations and a shaped
//! reward come out. The phase state machine enforces an amber dwell
//! between differing greens, and detector accounting runs once per
//! simulated second no matter what the signals are doing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument, trace};

use traffic_rl_core::{
    BoxObservationSpace, DiscreteAction, DiscreteSpace, Environment, Result, Reward, Step,
    StepInfo, TrafficRlError, VectorObservation,
};

use crate::simulator::SimulatorClient;

/// One selectable traffic phase: the green signal string and the amber
/// string shown while leaving it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    /// Signal state while the phase is active
    pub green: String,
    /// Transitional state shown before switching away from this phase
    pub amber: String,
}

/// Which side of a queue a detector sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorKind {
    /// Counts vehicles joining an edge's queue
    Entry,
    /// Counts vehicles crossing the stop line
    Exit,
}

/// An induction detector and the edge accumulator it feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorDef {
    /// Detector id as known to the simulator
    pub id: String,
    /// Edge whose accumulator this detector updates
    pub edge: String,
    /// Entry or exit
    pub kind: DetectorKind,
}

/// Weights of the scalar reward signal.
///
/// `reward = throughput_weight * throughput - queue_weight * max_queue
/// - delay_weight * avg_delay`. The weights are training hyperparameters;
/// the defaults favor throughput with a mild congestion penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Reward per vehicle served since the last step
    pub throughput_weight: f32,
    /// Penalty per vehicle in the longest queue
    pub queue_weight: f32,
    /// Penalty per second of mean accumulated delay
    pub delay_weight: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            throughput_weight: 1.0,
            queue_weight: 0.25,
            delay_weight: 0.05,
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEnvConfig {
    /// Incoming edges of the intersection
    pub edges: Vec<String>,
    /// Selectable phases; the action space is one action per phase
    pub phases: Vec<PhaseDef>,
    /// Detectors polled every simulated second
    pub detectors: Vec<DetectorDef>,
    /// Amber dwell when switching phases, in simulated seconds
    pub amber_secs: u64,
    /// Green dwell after each action, in simulated seconds
    pub green_secs: u64,
    /// Step budget per episode; exceeding it truncates
    pub max_steps: usize,
    /// Reward shaping weights
    pub reward: RewardConfig,
}

impl Default for TrafficEnvConfig {
    fn default() -> Self {
        let edges: Vec<String> = ["E2TL", "N2TL", "S2TL", "W2TL"]
            .iter()
            .map(|e| (*e).to_string())
            .collect();
        let phase = |green: &str, amber: &str| PhaseDef {
            green: green.to_string(),
            amber: amber.to_string(),
        };
        let detectors = edges
            .iter()
            .flat_map(|edge| {
                [
                    DetectorDef {
                        id: format!("{edge}_in"),
                        edge: edge.clone(),
                        kind: DetectorKind::Entry,
                    },
                    DetectorDef {
                        id: format!("{edge}_out"),
                        edge: edge.clone(),
                        kind: DetectorKind::Exit,
                    },
                ]
            })
            .collect();

        Self {
            edges,
            phases: vec![
                phase("GGGGrrrrrrGGGGrrrrrr", "yyyyrrrrrryyyyrrrrrr"),
                phase("rrrrGrrrrrrrrrGrrrrr", "rrrryrrrrrrrrryrrrrr"),
                phase("rrrrrGGGGrrrrrrGGGGr", "rrrrryyyyrrrrrryyyyr"),
                phase("GGGGGGGGGGGGGGGGGGGG", "GGGGGGGGGGGGGGGGGGGG"),
            ],
            detectors,
            amber_secs: 3,
            green_secs: 10,
            max_steps: 500,
            reward: RewardConfig::default(),
        }
    }
}

impl TrafficEnvConfig {
    /// Length of the flat observation vector this config produces
    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.edges.len() + self.phases.len()
    }
}

/// Traffic intersection environment over a simulator client.
///
/// Edge accumulators carry the signed entry-minus-exit vehicle count per
/// edge; they persist across steps and reset only on `reset()`. The
/// throughput accumulator drains on read.
pub struct TrafficEnv<C: SimulatorClient> {
    client: C,
    config: TrafficEnvConfig,
    prev_phase: Option<usize>,
    step_index: usize,
    queues: BTreeMap<String, i64>,
    throughput: u32,
    demand_exhausted: bool,
}

impl<C: SimulatorClient> TrafficEnv<C> {
    /// Create an environment over `client`.
    ///
    /// # Errors
    ///
    /// Fails fast with a configuration error when the config has no
    /// phases, no edges, or a detector referencing an unknown edge.
    pub fn new(client: C, config: TrafficEnvConfig) -> Result<Self> {
        if config.phases.is_empty() || config.edges.is_empty() {
            return Err(TrafficRlError::Config(
                "environment needs at least one phase and one edge".to_string(),
            ));
        }
        for d in &config.detectors {
            if !config.edges.contains(&d.edge) {
                return Err(TrafficRlError::Config(format!(
                    "detector '{}' references unknown edge '{}'",
                    d.id, d.edge
                )));
            }
        }

        let queues = config.edges.iter().map(|e| (e.clone(), 0)).collect();
        Ok(Self {
            client,
            config,
            prev_phase: None,
            step_index: 0,
            queues,
            throughput: 0,
            demand_exhausted: false,
        })
    }

    /// The environment configuration
    #[must_use]
    pub fn config(&self) -> &TrafficEnvConfig {
        &self.config
    }

    /// Vehicles currently headed toward the intersection, per the edge
    /// accumulators
    #[must_use]
    pub fn vehicle_count(&self) -> i64 {
        self.queues.values().map(|q| (*q).max(0)).sum()
    }

    /// Longest single-edge queue
    #[must_use]
    pub fn max_queue_length(&self) -> i64 {
        self.queues.values().map(|q| (*q).max(0)).max().unwrap_or(0)
    }

    /// Vehicles served since the last call; drains on read
    pub fn take_throughput(&mut self) -> u32 {
        std::mem::take(&mut self.throughput)
    }

    /// Mean accumulated delay per vehicle, from the simulator
    pub async fn avg_delay(&mut self) -> Result<f32> {
        self.client.avg_delay().await
    }

    /// Poll every detector once and fold the counts into the edge and
    /// throughput accumulators
    async fn tick_detectors(&mut self) -> Result<()> {
        for d in &self.config.detectors {
            let count = i64::from(self.client.detector_count(&d.id).await?);
            let acc = self.queues.get_mut(&d.edge).ok_or_else(|| {
                TrafficRlError::Precondition(format!("no accumulator for edge '{}'", d.edge))
            })?;
            match d.kind {
                DetectorKind::Entry => *acc += count,
                DetectorKind::Exit => {
                    *acc -= count;
                    self.throughput += count as u32;
                }
            }
        }
        Ok(())
    }

    /// Advance `seconds` of simulated time, ticking detectors once per
    /// second. Returns `false` once the simulator runs out of vehicles.
    async fn advance_counting(&mut self, seconds: u64) -> Result<bool> {
        for _ in 0..seconds {
            let alive = self.client.advance().await?;
            self.tick_detectors().await?;
            if !alive {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Commit a phase request, inserting one amber dwell when the phase
    /// actually changes
    async fn apply_phase(&mut self, phase: usize) -> Result<bool> {
        let alive = match self.prev_phase {
            Some(p) if p == phase => {
                trace!(phase, "phase unchanged, dwelling");
                self.advance_counting(self.config.amber_secs).await?
            }
            Some(p) => {
                debug!(from = p, to = phase, "phase change via amber");
                self.client
                    .set_signal_state(&self.config.phases[p].amber)
                    .await?;
                let alive = self.advance_counting(self.config.amber_secs).await?;
                self.client
                    .set_signal_state(&self.config.phases[phase].green)
                    .await?;
                alive
            }
            None => {
                debug!(phase, "initial phase");
                self.client
                    .set_signal_state(&self.config.phases[phase].green)
                    .await?;
                self.advance_counting(self.config.amber_secs).await?
            }
        };
        self.prev_phase = Some(phase);
        Ok(alive)
    }

    fn observation(&self) -> VectorObservation {
        let mut data = Vec::with_capacity(self.config.feature_len());
        for edge in &self.config.edges {
            data.push(self.queues[edge].max(0) as f32);
        }
        for i in 0..self.config.phases.len() {
            data.push(if self.prev_phase == Some(i) { 1.0 } else { 0.0 });
        }
        VectorObservation { data }
    }
}

#[async_trait]
impl<C: SimulatorClient> Environment for TrafficEnv<C> {
    type Observation = VectorObservation;

    fn observation_space(&self) -> BoxObservationSpace {
        let n_edges = self.config.edges.len();
        let n_phases = self.config.phases.len();
        let mut high = vec![f32::INFINITY; n_edges];
        high.extend(std::iter::repeat(1.0).take(n_phases));
        BoxObservationSpace {
            low: vec![0.0; n_edges + n_phases],
            high,
            shape: vec![n_edges + n_phases],
        }
    }

    fn action_space(&self) -> DiscreteSpace {
        DiscreteSpace::new(self.config.phases.len())
    }

    async fn reset(&mut self) -> Result<VectorObservation> {
        self.client.start().await?;
        self.prev_phase = None;
        self.step_index = 0;
        self.throughput = 0;
        self.demand_exhausted = false;
        for q in self.queues.values_mut() {
            *q = 0;
        }
        Ok(self.observation())
    }

    #[instrument(skip(self), fields(step = self.step_index))]
    async fn step(&mut self, action: DiscreteAction) -> Result<Step<VectorObservation>> {
        if !self.action_space().contains(action) {
            return Err(TrafficRlError::Precondition(format!(
                "phase index {} out of range [0, {})",
                action.0,
                self.config.phases.len()
            )));
        }
        if self.demand_exhausted {
            return Err(TrafficRlError::Precondition(
                "step() called on a finished episode, call reset()".to_string(),
            ));
        }

        let mut alive = self.apply_phase(action.0).await?;
        if alive {
            alive = self.advance_counting(self.config.green_secs).await?;
        }
        self.demand_exhausted = !alive;
        self.step_index += 1;

        let throughput = self.take_throughput();
        let max_queue = self.max_queue_length();
        let delay = self.client.avg_delay().await?;
        let w = &self.config.reward;
        let reward = w.throughput_weight * throughput as f32
            - w.queue_weight * max_queue as f32
            - w.delay_weight * delay;

        let mut info = StepInfo::default();
        info.fields
            .insert("throughput".to_string(), throughput.into());
        info.fields.insert("max_queue".to_string(), max_queue.into());
        info.fields.insert(
            "vehicle_count".to_string(),
            self.vehicle_count().into(),
        );

        Ok(Step {
            observation: self.observation(),
            reward: Reward(reward),
            terminated: !alive,
            truncated: alive && self.step_index >= self.config.max_steps,
            info,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Client whose detector counts come from a canned per-second script
    struct CannedClient {
        ticks: VecDeque<BTreeMap<String, u32>>,
        current: BTreeMap<String, u32>,
        signal_log: Vec<String>,
        delay: f32,
    }

    impl CannedClient {
        fn new(ticks: Vec<BTreeMap<String, u32>>) -> Self {
            Self {
                ticks: ticks.into(),
                current: BTreeMap::new(),
                signal_log: Vec::new(),
                delay: 0.0,
            }
        }
    }

    #[async_trait]
    impl SimulatorClient for CannedClient {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn set_signal_state(&mut self, state: &str) -> Result<()> {
            self.signal_log.push(state.to_string());
            Ok(())
        }

        async fn advance(&mut self) -> Result<bool> {
            match self.ticks.pop_front() {
                Some(tick) => {
                    self.current = tick;
                    Ok(true)
                }
                None => {
                    self.current.clear();
                    Ok(false)
                }
            }
        }

        async fn detector_count(&mut self, id: &str) -> Result<u32> {
            Ok(self.current.get(id).copied().unwrap_or(0))
        }

        async fn avg_delay(&mut self) -> Result<f32> {
            Ok(self.delay)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn tiny_config() -> TrafficEnvConfig {
        TrafficEnvConfig {
            edges: vec!["north".to_string()],
            phases: vec![
                PhaseDef {
                    green: "G0".to_string(),
                    amber: "y0".to_string(),
                },
                PhaseDef {
                    green: "G1".to_string(),
                    amber: "y1".to_string(),
                },
            ],
            detectors: vec![
                DetectorDef {
                    id: "north_in".to_string(),
                    edge: "north".to_string(),
                    kind: DetectorKind::Entry,
                },
                DetectorDef {
                    id: "north_out".to_string(),
                    edge: "north".to_string(),
                    kind: DetectorKind::Exit,
                },
            ],
            amber_secs: 1,
            green_secs: 1,
            max_steps: 100,
            reward: RewardConfig::default(),
        }
    }

    fn silent_ticks(n: usize) -> Vec<BTreeMap<String, u32>> {
        vec![BTreeMap::new(); n]
    }

    #[tokio::test]
    async fn repeating_a_phase_sets_no_signals() {
        let client = CannedClient::new(silent_ticks(50));
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();
        env.reset().await.unwrap();

        env.step(DiscreteAction(0)).await.unwrap();
        env.step(DiscreteAction(0)).await.unwrap();

        // Initial green only; the repeat dwells without touching signals.
        assert_eq!(env.client.signal_log, vec!["G0"]);
    }

    #[tokio::test]
    async fn changing_phase_inserts_exactly_one_amber() {
        let client = CannedClient::new(silent_ticks(50));
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();
        env.reset().await.unwrap();

        env.step(DiscreteAction(0)).await.unwrap();
        env.step(DiscreteAction(1)).await.unwrap();

        assert_eq!(env.client.signal_log, vec!["G0", "y0", "G1"]);
    }

    #[tokio::test]
    async fn detector_counts_fold_into_accumulators() {
        let count = |pairs: &[(&str, u32)]| -> BTreeMap<String, u32> {
            pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
        };
        // Step = 1 s amber dwell + 1 s green: four ticks over two steps.
        let ticks = vec![
            count(&[("north_in", 3)]),
            count(&[("north_in", 2), ("north_out", 1)]),
            count(&[("north_out", 2)]),
            count(&[("north_in", 1), ("north_out", 1)]),
            BTreeMap::new(),
        ];
        let client = CannedClient::new(ticks);
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();
        env.reset().await.unwrap();

        let first = env.step(DiscreteAction(0)).await.unwrap();
        // After ticks 1 and 2: entered 3 + 2, left 1.
        assert_eq!(env.vehicle_count(), 4);
        assert_eq!(first.info.fields["throughput"], 1);

        let second = env.step(DiscreteAction(0)).await.unwrap();
        // Ticks 3 and 4: entered 1, left 3; accumulator 4 + 1 - 3.
        assert_eq!(env.vehicle_count(), 2);
        assert_eq!(second.info.fields["throughput"], 3);
    }

    #[tokio::test]
    async fn observation_is_queues_plus_phase_one_hot() {
        let client = CannedClient::new(silent_ticks(50));
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();

        let initial = env.reset().await.unwrap();
        assert_eq!(initial.data, vec![0.0, 0.0, 0.0]);

        let step = env.step(DiscreteAction(1)).await.unwrap();
        assert_eq!(step.observation.data, vec![0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn exhausted_demand_terminates() {
        let client = CannedClient::new(silent_ticks(3));
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();
        env.reset().await.unwrap();

        let mut step = env.step(DiscreteAction(0)).await.unwrap();
        while !step.done() {
            step = env.step(DiscreteAction(0)).await.unwrap();
        }
        assert!(step.terminated);
        assert!(env.step(DiscreteAction(0)).await.is_err());
    }

    #[tokio::test]
    async fn out_of_range_action_fails_loudly() {
        let client = CannedClient::new(silent_ticks(10));
        let mut env = TrafficEnv::new(client, tiny_config()).unwrap();
        env.reset().await.unwrap();
        assert!(env.step(DiscreteAction(2)).await.is_err());
    }

    #[test]
    fn detector_on_unknown_edge_is_a_config_error() {
        let mut config = tiny_config();
        config.detectors.push(DetectorDef {
            id: "east_in".to_string(),
            edge: "east".to_string(),
            kind: DetectorKind::Entry,
        });
        let client = CannedClient::new(silent_ticks(1));
        assert!(matches!(
            TrafficEnv::new(client, config),
            Err(TrafficRlError::Config(_))
        ));
    }

    #[test]
    fn default_config_matches_its_stack_contract() {
        let config = TrafficEnvConfig::default();
        assert_eq!(config.feature_len(), 8);
        assert_eq!(config.phases.len(), 4);
        assert_eq!(config.detectors.len(), 8);
    }
}
