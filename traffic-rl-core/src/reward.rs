//! Reward signal newtype

use serde::{Deserialize, Serialize};

/// Scalar reward signal from the environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reward(pub f32);

impl std::ops::Add for Reward {
    type Output = Reward;

    fn add(self, rhs: Reward) -> Reward {
        Reward(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Reward {
    fn sum<I: Iterator<Item = Reward>>(iter: I) -> Reward {
        Reward(iter.map(|r| r.0).sum())
    }
}

impl std::fmt::Display for Reward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}
