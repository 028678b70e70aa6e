// Online Logistic Regression - SGD with decaying learning rate and L2
// Predicts P(up) from the normalized feature vector.

use serde::{Deserialize, Serialize};

use crate::analytics::features::FEATURE_COUNT;

const BASE_LEARNING_RATE: f64 = 0.05;
const LEARNING_RATE_DECAY: f64 = 1e-4;
const L2_LAMBDA: f64 = 1e-3;
const LOGIT_CLIP: f64 = 500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineLogistic {
    weights: Vec<f64>,
    bias: f64,
    samples: u64,
}

impl OnlineLogistic {
    pub fn new() -> Self {
        Self {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
            samples: 0,
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut logit = self.bias;
        for (w, x) in self.weights.iter().zip(features.iter()) {
            logit += w * x;
        }
        sigmoid(logit.clamp(-LOGIT_CLIP, LOGIT_CLIP))
    }

    /// One SGD step toward `label` (1.0 = price went up).
    pub fn update(&mut self, features: &[f64], label: f64) {
        let prediction = self.predict(features);
        let error = label - prediction;
        let lr = BASE_LEARNING_RATE / (1.0 + self.samples as f64 * LEARNING_RATE_DECAY);

        for (w, x) in self.weights.iter_mut().zip(features.iter()) {
            *w += lr * (error * x - L2_LAMBDA * *w);
        }
        self.bias += lr * error;
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// L2 norm of the weight vector; bounded under the L2 penalty.
    pub fn weight_norm(&self) -> f64 {
        self.weights.iter().map(|w| w * w).sum::<f64>().sqrt()
    }
}

impl Default for OnlineLogistic {
    fn default() -> Self {
        Self::new()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
