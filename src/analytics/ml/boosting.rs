// Gradient-Boosted Decision Stumps - periodic greedy refit, online nudges
// Each stump splits on one feature; refits run every 10 samples once the
// buffer holds 30, over a seeded random feature subset for determinism.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::analytics::features::FEATURE_COUNT;

const MAX_STUMPS: usize = 15;
const BUFFER_CAPACITY: usize = 200;
const MIN_BUFFER_FOR_FIT: usize = 30;
const REFIT_INTERVAL: u64 = 10;
const FEATURE_SUBSET: usize = 10;
const MAX_THRESHOLDS: usize = 5;
const LEAF_NUDGE: f64 = 0.01;
const SHRINKAGE: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stump {
    feature_idx: usize,
    threshold: f64,
    left_value: f64,
    right_value: f64,
}

impl Stump {
    fn output(&self, features: &[f64]) -> f64 {
        if features.get(self.feature_idx).copied().unwrap_or(0.0) <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedStumps {
    stumps: Vec<Stump>,
    buffer: VecDeque<(Vec<f64>, f64)>,
    samples_since_fit: u64,
    fit_count: u64,
    samples: u64,
}

impl BoostedStumps {
    pub fn new() -> Self {
        Self {
            stumps: Vec::new(),
            buffer: VecDeque::with_capacity(BUFFER_CAPACITY),
            samples_since_fit: 0,
            fit_count: 0,
            samples: 0,
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut value = 0.5;
        for stump in &self.stumps {
            value += stump.output(features);
        }
        value.clamp(0.0, 1.0)
    }

    pub fn update(&mut self, features: &[f64], label: f64) {
        self.samples += 1;
        self.samples_since_fit += 1;

        // Online nudge on the selected leaf of every stump.
        let error = label - self.predict(features);
        for stump in &mut self.stumps {
            let x = features.get(stump.feature_idx).copied().unwrap_or(0.0);
            if x <= stump.threshold {
                stump.left_value += LEAF_NUDGE * error;
            } else {
                stump.right_value += LEAF_NUDGE * error;
            }
        }

        if self.buffer.len() >= BUFFER_CAPACITY {
            self.buffer.pop_front();
        }
        self.buffer.push_back((features.to_vec(), label));

        if self.buffer.len() >= MIN_BUFFER_FOR_FIT && self.samples_since_fit >= REFIT_INTERVAL {
            self.refit();
            self.samples_since_fit = 0;
        }
    }

    /// Greedy residual fit: each stump minimizes squared residual over a
    /// random feature subset and a handful of quantile thresholds.
    fn refit(&mut self) {
        self.fit_count += 1;
        let mut rng = StdRng::seed_from_u64(self.fit_count);

        let samples: Vec<(&Vec<f64>, f64)> =
            self.buffer.iter().map(|(x, y)| (x, *y)).collect();
        let mut residuals: Vec<f64> = samples.iter().map(|(_, y)| y - 0.5).collect();

        let mut stumps = Vec::with_capacity(MAX_STUMPS);
        for _ in 0..MAX_STUMPS {
            let mut feature_indices: Vec<usize> = (0..FEATURE_COUNT).collect();
            feature_indices.shuffle(&mut rng);
            feature_indices.truncate(FEATURE_SUBSET);

            let best = self.best_split(&samples, &residuals, &feature_indices);
            let stump = match best {
                Some(s) => s,
                None => break,
            };

            for (i, (x, _)) in samples.iter().enumerate() {
                residuals[i] -= stump.output(x);
            }
            stumps.push(stump);
        }
        self.stumps = stumps;
    }

    fn best_split(
        &self,
        samples: &[(&Vec<f64>, f64)],
        residuals: &[f64],
        feature_indices: &[usize],
    ) -> Option<Stump> {
        let mut best: Option<(f64, Stump)> = None;

        for &feature_idx in feature_indices {
            let mut values: Vec<f64> = samples
                .iter()
                .map(|(x, _)| x.get(feature_idx).copied().unwrap_or(0.0))
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() < 2 {
                continue;
            }

            // Quantile thresholds across the observed range.
            let count = values.len().min(MAX_THRESHOLDS + 1);
            let thresholds: Vec<f64> = (1..count)
                .map(|q| values[q * (values.len() - 1) / count])
                .collect();

            for threshold in thresholds {
                let (mut left_sum, mut left_n) = (0.0, 0usize);
                let (mut right_sum, mut right_n) = (0.0, 0usize);
                for ((x, _), r) in samples.iter().zip(residuals.iter()) {
                    if x.get(feature_idx).copied().unwrap_or(0.0) <= threshold {
                        left_sum += r;
                        left_n += 1;
                    } else {
                        right_sum += r;
                        right_n += 1;
                    }
                }
                if left_n == 0 || right_n == 0 {
                    continue;
                }

                let left_value = left_sum / left_n as f64 * SHRINKAGE;
                let right_value = right_sum / right_n as f64 * SHRINKAGE;

                let mut loss = 0.0;
                for ((x, _), r) in samples.iter().zip(residuals.iter()) {
                    let fit = if x.get(feature_idx).copied().unwrap_or(0.0) <= threshold {
                        left_value
                    } else {
                        right_value
                    };
                    loss += (r - fit).powi(2);
                }

                let improves = match &best {
                    Some((best_loss, _)) => loss < *best_loss,
                    None => true,
                };
                if improves {
                    best = Some((
                        loss,
                        Stump {
                            feature_idx,
                            threshold,
                            left_value,
                            right_value,
                        },
                    ));
                }
            }
        }
        best.map(|(_, s)| s)
    }

    pub fn stump_count(&self) -> usize {
        self.stumps.len()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl Default for BoostedStumps {
    fn default() -> Self {
        Self::new()
    }
}
