// kNN Memory - inverse-distance vote over a ring of recent labeled vectors

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const CAPACITY: usize = 150;
const K: usize = 7;
const DISTANCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnMemory {
    ring: VecDeque<(Vec<f64>, bool)>,
}

impl KnnMemory {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(CAPACITY),
        }
    }

    /// Inverse-distance weighted P(up) over the K nearest neighbours.
    /// Falls back to 0.5 until K samples are stored.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.ring.len() < K {
            return 0.5;
        }

        let mut distances: Vec<(f64, bool)> = self
            .ring
            .iter()
            .map(|(x, label)| (euclidean(features, x), *label))
            .collect();
        distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut weighted_up = 0.0;
        let mut weight_total = 0.0;
        for (distance, label) in distances.iter().take(K) {
            let weight = 1.0 / (distance + DISTANCE_EPSILON);
            weight_total += weight;
            if *label {
                weighted_up += weight;
            }
        }

        if weight_total == 0.0 {
            0.5
        } else {
            weighted_up / weight_total
        }
    }

    pub fn update(&mut self, features: &[f64], label_up: bool) {
        if self.ring.len() >= CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back((features.to_vec(), label_up));
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl Default for KnnMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
