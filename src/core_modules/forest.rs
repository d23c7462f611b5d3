// THEORY:
// A `Forest` is one member of the ensemble: something that learns from a feature
// matrix and afterwards answers per-pixel class probabilities. The ensemble never
// looks inside; it only needs `learn`, `predict_probabilities` and the tree count
// used to weight each member's vote.
//
// `StumpForest` is the reference member shipped with the crate: a bagged forest of
// depth-one trees. Each stump is grown on a bootstrap sample over a random subset
// of features, and the rows a stump never saw provide the out-of-bag error.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

/// One trainable member of an ensemble.
pub trait Forest: Send + Sync {
    /// An untrained forest that will grow `tree_count` trees.
    fn with_tree_count(tree_count: usize) -> Self
    where
        Self: Sized;

    /// Trains on `features` (rows are samples) and class indices in `0..num_classes`.
    /// Returns the out-of-bag error estimate.
    fn learn(
        &mut self,
        features: ArrayView2<f32>,
        labels: ArrayView1<usize>,
        num_classes: usize,
        seed: u64,
    ) -> Result<f64>;

    /// One row per sample, one column per class; every row sums to 1.
    fn predict_probabilities(&self, features: ArrayView2<f32>) -> Result<Array2<f32>>;

    fn tree_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    threshold: f32,
    /// Class distribution for samples with `value <= threshold`.
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Stump {
    fn distribution(&self, row: ArrayView1<f32>) -> &[f32] {
        if row[self.feature] <= self.threshold {
            &self.left
        } else {
            &self.right
        }
    }
}

/// A bagged forest of decision stumps.
#[derive(Debug, Clone)]
pub struct StumpForest {
    tree_count: usize,
    num_classes: usize,
    num_features: usize,
    stumps: Vec<Stump>,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&count| {
            let p = count as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn normalized(counts: &[usize]) -> Vec<f32> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        let uniform = 1.0 / counts.len() as f32;
        return vec![uniform; counts.len()];
    }
    counts.iter().map(|&c| c as f32 / total as f32).collect()
}

impl StumpForest {
    fn grow_stump(
        features: &ArrayView2<f32>,
        labels: &ArrayView1<usize>,
        num_classes: usize,
        bag: &[usize],
        rng: &mut StdRng,
    ) -> Stump {
        let num_features = features.ncols();
        let tried = ((num_features as f64).sqrt().round() as usize).clamp(1, num_features);
        let mut totals = vec![0usize; num_classes];
        for &row in bag {
            totals[labels[row]] += 1;
        }

        // (score, feature, threshold)
        let mut best: Option<(f64, usize, f32)> = None;
        for feature in sample(rng, num_features, tried).into_iter() {
            let mut pairs: Vec<(f32, usize)> =
                bag.iter().map(|&row| (features[[row, feature]], labels[row])).collect();
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; num_classes];
            let mut right = totals.clone();
            for i in 0..pairs.len().saturating_sub(1) {
                let (value, label) = pairs[i];
                left[label] += 1;
                right[label] -= 1;
                let next = pairs[i + 1].0;
                if value >= next {
                    continue;
                }
                let n_left = i + 1;
                let n_right = pairs.len() - n_left;
                let score = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / pairs.len() as f64;
                if best.is_none_or(|(best_score, _, _)| score < best_score) {
                    best = Some((score, feature, value + (next - value) / 2.0));
                }
            }
        }

        match best {
            Some((_, feature, threshold)) => {
                let mut left = vec![0usize; num_classes];
                let mut right = vec![0usize; num_classes];
                for &row in bag {
                    if features[[row, feature]] <= threshold {
                        left[labels[row]] += 1;
                    } else {
                        right[labels[row]] += 1;
                    }
                }
                Stump {
                    feature,
                    threshold,
                    left: normalized(&left),
                    right: normalized(&right),
                }
            }
            // Every tried feature was constant in the bag.
            None => {
                let leaf = normalized(&totals);
                Stump {
                    feature: 0,
                    threshold: f32::INFINITY,
                    left: leaf.clone(),
                    right: leaf,
                }
            }
        }
    }
}

impl Forest for StumpForest {
    fn with_tree_count(tree_count: usize) -> Self {
        Self {
            tree_count,
            num_classes: 0,
            num_features: 0,
            stumps: Vec::new(),
        }
    }

    fn learn(
        &mut self,
        features: ArrayView2<f32>,
        labels: ArrayView1<usize>,
        num_classes: usize,
        seed: u64,
    ) -> Result<f64> {
        let rows = features.nrows();
        if rows == 0 || features.ncols() == 0 {
            return Err(Error::ShapeMismatch("cannot learn from an empty feature matrix".into()));
        }
        if labels.len() != rows {
            return Err(Error::ShapeMismatch(format!(
                "{} labels for {rows} feature rows",
                labels.len()
            )));
        }
        if num_classes == 0 || labels.iter().any(|&label| label >= num_classes) {
            return Err(Error::Configuration(format!(
                "labels must lie in 0..{num_classes}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut stumps = Vec::with_capacity(self.tree_count);
        let mut oob_votes = Array2::<f32>::zeros((rows, num_classes));
        let mut oob_seen = vec![false; rows];

        for _ in 0..self.tree_count {
            let bag: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..rows)).collect();
            let mut in_bag = vec![false; rows];
            for &row in &bag {
                in_bag[row] = true;
            }

            let stump = Self::grow_stump(&features, &labels, num_classes, &bag, &mut rng);
            for row in (0..rows).filter(|&row| !in_bag[row]) {
                let distribution = stump.distribution(features.row(row));
                for (class, &p) in distribution.iter().enumerate() {
                    oob_votes[[row, class]] += p;
                }
                oob_seen[row] = true;
            }
            stumps.push(stump);
        }

        let mut evaluated = 0usize;
        let mut wrong = 0usize;
        for row in (0..rows).filter(|&row| oob_seen[row]) {
            evaluated += 1;
            let votes = oob_votes.row(row);
            let predicted = (0..num_classes)
                .max_by(|&a, &b| votes[a].total_cmp(&votes[b]))
                .unwrap_or(0);
            if predicted != labels[row] {
                wrong += 1;
            }
        }

        self.num_classes = num_classes;
        self.num_features = features.ncols();
        self.stumps = stumps;
        Ok(if evaluated == 0 {
            0.0
        } else {
            wrong as f64 / evaluated as f64
        })
    }

    fn predict_probabilities(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
        if self.stumps.is_empty() {
            return Err(Error::Configuration("forest has not been trained".into()));
        }
        if features.ncols() != self.num_features {
            return Err(Error::ShapeMismatch(format!(
                "forest was trained on {} features, got {}",
                self.num_features,
                features.ncols()
            )));
        }

        let mut probabilities = Array2::<f32>::zeros((features.nrows(), self.num_classes));
        let weight = 1.0 / self.stumps.len() as f32;
        for (row, mut out) in features.rows().into_iter().zip(probabilities.rows_mut()) {
            for stump in &self.stumps {
                for (acc, &p) in out.iter_mut().zip(stump.distribution(row)) {
                    *acc += p * weight;
                }
            }
        }
        Ok(probabilities)
    }

    fn tree_count(&self) -> usize {
        self.tree_count
    }
}
