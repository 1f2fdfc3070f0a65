//! Bounded replay memory with uniform sampling

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

use traffic_rl_core::{Result, TrafficRlError, Transition};

/// Fixed-capacity ring buffer of transitions.
///
/// When full, `push` evicts the oldest entry (FIFO). Sampling is uniform
/// without replacement over the current contents; determinism comes from
/// the RNG the caller passes in, not from the data structure.
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayMemory {
    /// Create a new replay memory holding at most `capacity` transitions
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest entry at capacity
    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample `batch_size` distinct transitions uniformly at random.
    ///
    /// # Errors
    ///
    /// Fails with a precondition error when `batch_size` exceeds the
    /// current occupancy; callers guard with `len() >= batch_size`.
    pub fn sample<R: Rng>(&self, rng: &mut R, batch_size: usize) -> Result<Vec<&Transition>> {
        if batch_size > self.buffer.len() {
            return Err(TrafficRlError::Precondition(format!(
                "sampled {batch_size} transitions from a memory holding {}",
                self.buffer.len()
            )));
        }

        let indices: Vec<usize> = (0..self.buffer.len()).collect();
        Ok(indices
            .choose_multiple(rng, batch_size)
            .map(|&i| &self.buffer[i])
            .collect())
    }

    /// Current occupancy
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the memory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of stored transitions
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over the stored transitions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use traffic_rl_core::{DiscreteAction, Reward};

    fn transition(tag: f32) -> Transition {
        Transition {
            state: arr1(&[tag]),
            action: DiscreteAction(0),
            next_state: Some(arr1(&[tag + 0.5])),
            reward: Reward(tag),
        }
    }

    #[test]
    fn sample_returns_distinct_entries() {
        let mut memory = ReplayMemory::new(16);
        for i in 0..10 {
            memory.push(transition(i as f32));
        }

        let mut rng = StdRng::seed_from_u64(11);
        let batch = memory.sample(&mut rng, 10).unwrap();
        let mut tags: Vec<i64> = batch.iter().map(|t| t.reward.0 as i64).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 10);
    }

    #[test]
    fn oversampling_fails() {
        let mut memory = ReplayMemory::new(8);
        memory.push(transition(0.0));

        let mut rng = StdRng::seed_from_u64(0);
        assert!(memory.sample(&mut rng, 2).is_err());
    }

    proptest! {
        #[test]
        fn fifo_eviction_keeps_the_newest(pushes in 1usize..40) {
            let capacity = 8;
            let mut memory = ReplayMemory::new(capacity);
            for i in 0..pushes {
                memory.push(transition(i as f32));
            }

            prop_assert_eq!(memory.len(), pushes.min(capacity));

            let oldest_kept = pushes.saturating_sub(capacity);
            let tags: Vec<usize> = memory.iter().map(|t| t.reward.0 as usize).collect();
            let expected: Vec<usize> = (oldest_kept..pushes).collect();
            prop_assert_eq!(tags, expected);
        }
    }
}
