//! Binary logistic regression over sparse count vectors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::vectorizer::SparseVector;
use crate::error::SentimentError;

/// Solver settings.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse L2 regularisation strength.
    pub c: f64,
    /// Stop once the largest gradient component falls below this.
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.5,
            c: 1.0,
            tolerance: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// `classes[0]` is the negative class, `classes[1]` the positive one.
    classes: [String; 2],
    weights: Vec<f64>,
    bias: f64,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(weights: &[f64], x: &SparseVector) -> f64 {
    x.iter()
        .filter_map(|&(col, v)| weights.get(col).map(|w| w * v))
        .sum()
}

impl LogisticRegression {
    /// Fit on `features` with string `labels`. Exactly two distinct labels
    /// are required; they are ordered lexicographically.
    pub fn fit(
        features: &[SparseVector],
        labels: &[String],
        n_features: usize,
        options: &SolverOptions,
    ) -> Result<Self, SentimentError> {
        if features.len() != labels.len() {
            return Err(SentimentError::Training(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if features.is_empty() {
            return Err(SentimentError::Training("no training samples".into()));
        }

        let mut distinct: Vec<&String> = labels.iter().collect();
        distinct.sort();
        distinct.dedup();
        let classes: [String; 2] = match distinct.as_slice() {
            [a, b] => [(*a).clone(), (*b).clone()],
            other => {
                return Err(SentimentError::Training(format!(
                    "expected exactly 2 classes, found {}",
                    other.len()
                )));
            }
        };

        let targets: Vec<f64> = labels
            .iter()
            .map(|l| if *l == classes[1] { 1.0 } else { 0.0 })
            .collect();

        let n = features.len() as f64;
        let mut weights = vec![0.0; n_features];
        let mut bias = 0.0;
        let mut grad = vec![0.0; n_features];

        for iter in 0..options.max_iter {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0;

            for (x, y) in features.iter().zip(&targets) {
                let err = sigmoid(dot(&weights, x) + bias) - y;
                for &(col, v) in x {
                    if let Some(g) = grad.get_mut(col) {
                        *g += err * v;
                    }
                }
                grad_bias += err;
            }

            let mut largest = (grad_bias / n).abs();
            for (w, g) in weights.iter_mut().zip(&grad) {
                let step = g / n + *w / (options.c * n);
                largest = largest.max(step.abs());
                *w -= options.learning_rate * step;
            }
            bias -= options.learning_rate * grad_bias / n;

            if largest < options.tolerance {
                debug!(iterations = iter + 1, "Logistic regression converged");
                break;
            }
        }

        Ok(Self {
            classes,
            weights,
            bias,
        })
    }

    /// Probability of `classes[1]`.
    pub fn probability(&self, x: &SparseVector) -> f64 {
        sigmoid(dot(&self.weights, x) + self.bias)
    }

    pub fn predict(&self, x: &SparseVector) -> &str {
        if self.probability(x) >= 0.5 {
            &self.classes[1]
        } else {
            &self.classes[0]
        }
    }

    pub fn classes(&self) -> &[String; 2] {
        &self.classes
    }
}
