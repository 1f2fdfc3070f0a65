//! Action representation and the discrete action space

use serde::{Deserialize, Serialize};

/// Index of a traffic phase in `[0, n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscreteAction(pub usize);

/// Discrete action space over `n` phase indices
#[derive(Debug, Clone)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete action space
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    /// Sample a uniformly random action from the space
    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> DiscreteAction {
        DiscreteAction(rng.gen_range(0..self.n))
    }

    /// Check if an action is valid within this space
    #[must_use]
    pub fn contains(&self, action: DiscreteAction) -> bool {
        action.0 < self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sampled_actions_are_in_range() {
        let space = DiscreteSpace::new(4);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(space.contains(space.sample(&mut rng)));
        }
    }

    #[test]
    fn contains_rejects_out_of_range() {
        let space = DiscreteSpace::new(4);
        assert!(!space.contains(DiscreteAction(4)));
    }
}
