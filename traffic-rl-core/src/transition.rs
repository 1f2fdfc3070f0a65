//! Transition records stored in replay memory

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, Reward};

/// A single observed `(state, action, next_state, reward)` tuple.
///
/// `next_state == None` encodes a terminal transition: the episode ended
/// after this step and no value is bootstrapped from the successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Feature array of the state the action was taken in
    pub state: Array1<f32>,
    /// The phase index that was selected
    pub action: DiscreteAction,
    /// Feature array of the successor state, absent when terminal
    pub next_state: Option<Array1<f32>>,
    /// Reward received for this step
    pub reward: Reward,
}

impl Transition {
    /// Whether this transition ended the episode
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next_state.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn terminal_is_encoded_by_absent_next_state() {
        let t = Transition {
            state: arr1(&[0.0, 1.0]),
            action: DiscreteAction(0),
            next_state: None,
            reward: Reward(1.0),
        };
        assert!(t.is_terminal());

        let t = Transition {
            next_state: Some(arr1(&[1.0, 0.0])),
            ..t
        };
        assert!(!t.is_terminal());
    }
}
