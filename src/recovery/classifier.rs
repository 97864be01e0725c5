//! Relevance scoring for carved spans.
//!
//! The built-in scorer is a 5 → 64 → 32 → 1 perceptron (ReLU hidden layers,
//! sigmoid output) trained from scratch each session with minibatch Adam on
//! binary cross-entropy. Anything implementing `RelevanceScorer` can stand in.

#![allow(missing_docs)]

use rand::Rng;
use rand::seq::SliceRandom;

use crate::core::config::ClassifierConfig;
use crate::core::errors::{BrecError, Result};
use crate::recovery::features::{FEATURE_COUNT, FeatureVector};

/// Maps a feature vector to a relevance score in [0, 1].
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> f64;
}

impl<F> RelevanceScorer for F
where
    F: Fn(&FeatureVector) -> f64 + Send + Sync,
{
    fn score(&self, features: &FeatureVector) -> f64 {
        self(features)
    }
}

const HIDDEN: [usize; 2] = [64, 32];

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

// ──────────────────── layers ────────────────────

#[derive(Debug, Clone)]
struct Moments {
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }
}

/// Fully connected layer, weights stored row-major (`outputs × inputs`).
#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
    grad_w: Vec<f64>,
    grad_b: Vec<f64>,
    adam_w: Moments,
    adam_b: Moments,
}

impl Dense {
    /// Uniform init in ±1/√fan_in.
    #[allow(clippy::cast_precision_loss)]
    fn new<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (inputs as f64).sqrt();
        let mut sample = |n: usize| -> Vec<f64> {
            (0..n).map(|_| rng.random_range(-bound..bound)).collect()
        };
        let weights = sample(inputs * outputs);
        let bias = sample(outputs);
        Self {
            inputs,
            outputs,
            weights,
            bias,
            grad_w: vec![0.0; inputs * outputs],
            grad_b: vec![0.0; outputs],
            adam_w: Moments::zeros(inputs * outputs),
            adam_b: Moments::zeros(outputs),
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                self.bias[o] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>()
            })
            .collect()
    }

    /// Add this sample's gradients; return the gradient w.r.t. `input`.
    fn accumulate(&mut self, input: &[f64], delta: &[f64]) -> Vec<f64> {
        let mut upstream = vec![0.0; self.inputs];
        for (o, &d) in delta.iter().enumerate() {
            self.grad_b[o] += d;
            let offset = o * self.inputs;
            for (i, &x) in input.iter().enumerate() {
                self.grad_w[offset + i] += d * x;
                upstream[i] += d * self.weights[offset + i];
            }
        }
        upstream
    }

    /// One Adam update with gradients averaged by `scale`, then clear them.
    fn step(&mut self, learning_rate: f64, t: i32, scale: f64) {
        let correction1 = 1.0 - BETA1.powi(t);
        let correction2 = 1.0 - BETA2.powi(t);
        adam_update(
            &mut self.weights,
            &mut self.grad_w,
            &mut self.adam_w,
            learning_rate,
            scale,
            correction1,
            correction2,
        );
        adam_update(
            &mut self.bias,
            &mut self.grad_b,
            &mut self.adam_b,
            learning_rate,
            scale,
            correction1,
            correction2,
        );
    }
}

fn adam_update(
    params: &mut [f64],
    grads: &mut [f64],
    moments: &mut Moments,
    learning_rate: f64,
    scale: f64,
    correction1: f64,
    correction2: f64,
) {
    for (idx, param) in params.iter_mut().enumerate() {
        let g = grads[idx] * scale;
        moments.m[idx] = BETA1.mul_add(moments.m[idx], (1.0 - BETA1) * g);
        moments.v[idx] = BETA2.mul_add(moments.v[idx], (1.0 - BETA2) * g * g);
        let m_hat = moments.m[idx] / correction1;
        let v_hat = moments.v[idx] / correction2;
        *param -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
        grads[idx] = 0.0;
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// BCE computed from the logit so it never takes `ln(0)`.
fn bce_with_logit(logit: f64, target: f64) -> f64 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

// ──────────────────── classifier ────────────────────

/// Session-local feed-forward relevance classifier.
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    layers: Vec<Dense>,
}

/// Summary of one training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub samples: usize,
    pub epochs: usize,
    /// Mean BCE over the last epoch.
    pub final_loss: f64,
}

impl MlpClassifier {
    /// Fresh, untrained network.
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        let mut layers = Vec::with_capacity(HIDDEN.len() + 1);
        let mut inputs = FEATURE_COUNT;
        for &width in &HIDDEN {
            layers.push(Dense::new(inputs, width, rng));
            inputs = width;
        }
        layers.push(Dense::new(inputs, 1, rng));
        Self { layers }
    }

    /// Train a fresh network on labeled feature vectors.
    pub fn train<R: Rng>(
        data: &[(FeatureVector, f64)],
        config: &ClassifierConfig,
        rng: &mut R,
    ) -> Result<(Self, TrainingReport)> {
        if data.is_empty() {
            return Err(BrecError::Training {
                details: "no training samples".to_string(),
            });
        }
        if config.epochs == 0 || config.batch_size == 0 {
            return Err(BrecError::Training {
                details: "epochs and batch_size must be >= 1".to_string(),
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let total = data.len() as f64;
        let mut model = Self::new(rng);
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut step: i32 = 0;
        let mut final_loss = f64::NAN;

        for _ in 0..config.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            for batch in order.chunks(config.batch_size) {
                for &idx in batch {
                    let (features, target) = &data[idx];
                    epoch_loss += model.backprop(features, *target);
                }
                step = step.saturating_add(1);
                #[allow(clippy::cast_precision_loss)]
                let scale = 1.0 / batch.len() as f64;
                for layer in &mut model.layers {
                    layer.step(config.learning_rate, step, scale);
                }
            }
            final_loss = epoch_loss / total;
            if !final_loss.is_finite() {
                return Err(BrecError::Training {
                    details: format!("loss diverged to {final_loss}"),
                });
            }
        }

        let report = TrainingReport {
            samples: data.len(),
            epochs: config.epochs,
            final_loss,
        };
        Ok((model, report))
    }

    /// Activations per layer, input first. The last entry is the raw logit.
    fn trace(&self, features: &FeatureVector) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(features.as_array().to_vec());
        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut out = layer.forward(&acts[idx]);
            if idx < last {
                for value in &mut out {
                    *value = value.max(0.0);
                }
            }
            acts.push(out);
        }
        acts
    }

    /// Accumulate one sample's gradients and return its loss.
    fn backprop(&mut self, features: &FeatureVector, target: f64) -> f64 {
        let acts = self.trace(features);
        let logit = acts[acts.len() - 1][0];
        let mut delta = vec![sigmoid(logit) - target];
        for idx in (0..self.layers.len()).rev() {
            let upstream = self.layers[idx].accumulate(&acts[idx], &delta);
            if idx > 0 {
                // ReLU derivative; acts[idx] is post-activation.
                delta = upstream
                    .iter()
                    .zip(&acts[idx])
                    .map(|(g, a)| if *a > 0.0 { *g } else { 0.0 })
                    .collect();
            }
        }
        bce_with_logit(logit, target)
    }

    /// Relevance probability for one feature vector.
    #[must_use]
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let acts = self.trace(features);
        sigmoid(acts[acts.len() - 1][0])
    }
}

impl RelevanceScorer for MlpClassifier {
    fn score(&self, features: &FeatureVector) -> f64 {
        self.predict(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::synthetic;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dataset(per_class: usize, seed: u64) -> Vec<(FeatureVector, f64)> {
        let mut rng = StdRng::seed_from_u64(seed);
        synthetic::generate(per_class, &mut rng)
            .iter()
            .map(|s| (s.features(), s.label))
            .collect()
    }

    #[test]
    fn untrained_output_is_a_probability() {
        let model = MlpClassifier::new(&mut StdRng::seed_from_u64(3));
        let p = model.predict(&FeatureVector([0.5; FEATURE_COUNT]));
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn training_separates_synthetic_classes() {
        let data = dataset(250, 11);
        let config = ClassifierConfig::default();
        let (model, report) =
            MlpClassifier::train(&data, &config, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(report.samples, 500);
        assert!(report.final_loss < 0.2, "loss {}", report.final_loss);

        let held_out = dataset(50, 12);
        let correct = held_out
            .iter()
            .filter(|(f, label)| (model.score(f) > config.accept_threshold) == (*label == 1.0))
            .count();
        assert!(correct >= 95, "only {correct}/100 classified correctly");
    }

    #[test]
    fn training_is_reproducible_with_a_seed() {
        let data = dataset(20, 5);
        let config = ClassifierConfig {
            epochs: 3,
            ..ClassifierConfig::default()
        };
        let (a, ra) = MlpClassifier::train(&data, &config, &mut StdRng::seed_from_u64(8)).unwrap();
        let (b, rb) = MlpClassifier::train(&data, &config, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(ra, rb);
        let sample = FeatureVector([0.1, 0.0, 0.5, 0.0, 1.0]);
        assert_eq!(a.predict(&sample), b.predict(&sample));
    }

    #[test]
    fn empty_dataset_is_a_training_error() {
        let err = MlpClassifier::train(
            &[],
            &ClassifierConfig::default(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap_err();
        assert_eq!(err.code(), "BREC-2101");
    }

    #[test]
    fn backprop_matches_numeric_gradient() {
        let mut model = MlpClassifier::new(&mut StdRng::seed_from_u64(21));
        let x = FeatureVector([0.3, 0.1, 0.7, 1.0, 0.0]);
        let _ = model.backprop(&x, 1.0);
        let analytic = model.layers[2].grad_b[0];

        let h = 1e-6;
        let loss_at = |m: &MlpClassifier| {
            let acts = m.trace(&x);
            bce_with_logit(acts[acts.len() - 1][0], 1.0)
        };
        let mut plus = model.clone();
        plus.layers[2].bias[0] += h;
        let mut minus = model.clone();
        minus.layers[2].bias[0] -= h;
        let numeric = (loss_at(&plus) - loss_at(&minus)) / (2.0 * h);
        assert!((analytic - numeric).abs() < 1e-5);
    }

    #[test]
    fn closures_are_scorers() {
        let scorer = |f: &FeatureVector| f.0[3];
        assert_eq!(scorer.score(&FeatureVector([0.0, 0.0, 0.0, 1.0, 0.0])), 1.0);
    }

    #[test]
    fn bce_is_stable_at_extreme_logits() {
        assert!(bce_with_logit(1000.0, 0.0).is_finite());
        assert!(bce_with_logit(-1000.0, 1.0).is_finite());
        assert!(bce_with_logit(50.0, 1.0) < 1e-12);
    }
}
