//! Observation representations and observation spaces

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for observations emitted by an environment
pub trait Observation: Clone + Debug + Send + Sync {
    /// Convert the observation into a flat feature array
    fn to_array(&self) -> Array1<f32>;

    /// Get the shape of the observation
    fn shape(&self) -> Vec<usize>;
}

/// Flat feature-vector observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorObservation {
    /// The observation data
    pub data: Vec<f32>,
}

impl Observation for VectorObservation {
    fn to_array(&self) -> Array1<f32> {
        Array1::from(self.data.clone())
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.data.len()]
    }
}

/// RGB image observation, stored row-major and flattened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageObservation {
    /// Pixel data, normalized to `[0, 1]`
    pub data: Vec<f32>,
    /// Height of the image
    pub height: usize,
    /// Width of the image
    pub width: usize,
    /// Number of channels
    pub channels: usize,
}

impl Observation for ImageObservation {
    fn to_array(&self) -> Array1<f32> {
        Array1::from(self.data.clone())
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.height, self.width, self.channels]
    }
}

/// Box observation space with per-element bounds
#[derive(Debug, Clone)]
pub struct BoxObservationSpace {
    /// Lower bounds
    pub low: Vec<f32>,
    /// Upper bounds
    pub high: Vec<f32>,
    /// Shape of observations
    pub shape: Vec<usize>,
}

impl BoxObservationSpace {
    /// Check if an observation lies within the bounds
    #[must_use]
    pub fn contains(&self, obs: &VectorObservation) -> bool {
        obs.data.len() == self.low.len()
            && obs
                .data
                .iter()
                .zip(&self.low)
                .zip(&self.high)
                .all(|((x, l), h)| x >= l && x <= h)
    }

    /// Sample a random observation from the bounded region
    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> VectorObservation {
        let data = self
            .low
            .iter()
            .zip(&self.high)
            .map(|(&l, &h)| {
                if h.is_finite() {
                    rng.gen_range(l..h)
                } else {
                    l
                }
            })
            .collect();
        VectorObservation { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn vector_observation_round_trips_to_array() {
        let obs = VectorObservation {
            data: vec![1.0, 2.0, 3.0],
        };
        assert_eq!(obs.shape(), vec![3]);
        assert_eq!(obs.to_array().len(), 3);
    }

    #[test]
    fn image_observation_reports_spatial_shape() {
        let obs = ImageObservation {
            data: vec![0.0; 2 * 3 * 3],
            height: 2,
            width: 3,
            channels: 3,
        };
        assert_eq!(obs.shape(), vec![2, 3, 3]);
        assert_eq!(obs.to_array().len(), 18);
    }

    #[test]
    fn box_space_contains_sampled_observations() {
        let space = BoxObservationSpace {
            low: vec![0.0, 0.0],
            high: vec![1.0, 5.0],
            shape: vec![2],
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
    }
}
