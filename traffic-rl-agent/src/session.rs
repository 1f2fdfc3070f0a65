//! Per-run training context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use traffic_rl_core::Episode;

/// Mutable state scoped to one training run.
///
/// Holding the exploration counter and episode metrics here, rather than
/// in process-global state, lets multiple sessions coexist in one
/// process and keeps unit tests isolated.
#[derive(Debug)]
pub struct TrainingSession {
    /// Total environment steps taken, drives epsilon decay
    pub steps_done: usize,
    /// Step count of each completed episode, in completion order
    pub episode_durations: Vec<usize>,
    /// Full records of completed episodes
    pub episodes: Vec<Episode>,
    stop: Arc<AtomicBool>,
}

impl TrainingSession {
    /// Create a fresh session
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps_done: 0,
            episode_durations: Vec::new(),
            episodes: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that external code (e.g. a signal handler) can set to stop
    /// training at the next step or episode boundary
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Append a completed episode's record and duration
    pub fn record_episode(&mut self, episode: Episode) {
        self.episode_durations.push(episode.steps);
        self.episodes.push(episode);
    }
}

impl Default for TrainingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn stop_handle_is_observed_by_the_session() {
        let session = TrainingSession::new();
        assert!(!session.stop_requested());
        session.stop_handle().store(true, Ordering::SeqCst);
        assert!(session.stop_requested());
    }

    #[test]
    fn recording_appends_durations_in_order() {
        let mut session = TrainingSession::new();
        for steps in [5, 3, 9] {
            session.record_episode(Episode {
                id: format!("ep-{steps}"),
                total_reward: 0.0,
                steps,
                truncated: false,
                start_time: chrono::Utc::now(),
                end_time: Some(chrono::Utc::now()),
            });
        }
        assert_eq!(session.episode_durations, vec![5, 3, 9]);
    }
}
