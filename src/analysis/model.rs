//! Random Forest binary classifier (bagged CART trees, Gini impurity).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::analysis::AnalysisError;
use crate::config::RiskConfig;

pub const N_CLASSES: usize = 2;

type Proba = [f64; N_CLASSES];

#[derive(Debug, Clone)]
enum Node {
    Leaf(Proba),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

fn class_counts(labels: &[usize], indices: &[usize]) -> Proba {
    let mut counts = [0.0; N_CLASSES];
    for &i in indices {
        counts[labels[i]] += 1.0;
    }
    counts
}

fn gini(counts: &Proba) -> f64 {
    let total: f64 = counts.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}

/// A fully grown classification tree.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    root: Node,
}

impl DecisionTree {
    /// Fit on `indices` (duplicates allowed, as produced by bootstrapping),
    /// considering `max_features` candidate features per split.
    pub fn fit(
        features: &[Vec<f64>],
        labels: &[usize],
        indices: &[usize],
        max_features: usize,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            root: Self::grow(features, labels, indices, max_features, rng),
        }
    }

    fn grow(
        features: &[Vec<f64>],
        labels: &[usize],
        indices: &[usize],
        max_features: usize,
        rng: &mut StdRng,
    ) -> Node {
        let counts = class_counts(labels, indices);
        let total = indices.len() as f64;
        let leaf = || Node::Leaf([counts[0] / total, counts[1] / total]);

        if indices.len() < 2 || gini(&counts) == 0.0 {
            return leaf();
        }

        let Some((feature, threshold)) = Self::best_split(features, labels, indices, max_features, rng) else {
            return leaf();
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().copied().partition(|&i| features[i][feature] <= threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow(features, labels, &left, max_features, rng)),
            right: Box::new(Self::grow(features, labels, &right, max_features, rng)),
        }
    }

    /// Lowest weighted Gini split over a random subset of features. Constant
    /// features do not count towards `max_features`, so a split is found
    /// whenever any feature varies.
    fn best_split(
        features: &[Vec<f64>],
        labels: &[usize],
        indices: &[usize],
        max_features: usize,
        rng: &mut StdRng,
    ) -> Option<(usize, f64)> {
        let n_features = features[indices[0]].len();
        let mut order: Vec<usize> = (0..n_features).collect();
        order.shuffle(rng);

        let total = indices.len() as f64;
        let mut best: Option<(f64, usize, f64)> = None;
        let mut visited = 0;

        for feature in order {
            if visited >= max_features {
                break;
            }

            let mut column: Vec<(f64, usize)> = indices.iter().map(|&i| (features[i][feature], labels[i])).collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column[0].0 == column[column.len() - 1].0 {
                continue;
            }
            visited += 1;

            let parent = class_counts(labels, indices);
            let mut left = [0.0; N_CLASSES];
            for k in 1..column.len() {
                left[column[k - 1].1] += 1.0;
                if column[k].0 == column[k - 1].0 {
                    continue;
                }
                let right = [parent[0] - left[0], parent[1] - left[1]];
                let n_left = k as f64;
                let impurity = (n_left * gini(&left) + (total - n_left) * gini(&right)) / total;
                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let threshold = (column[k - 1].0 + column[k].0) / 2.0;
                    best = Some((impurity, feature, threshold));
                }
            }
        }

        best.map(|(_, feature, threshold)| (feature, threshold))
    }

    pub fn predict_proba(&self, sample: &[f64]) -> Proba {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(p) => return *p,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Bagged ensemble of [`DecisionTree`]s with averaged class probabilities.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(features: &[Vec<f64>], labels: &[usize], config: &RiskConfig) -> Result<Self, AnalysisError> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(AnalysisError::InsufficientData {
                needed: 1,
                have: features.len().min(labels.len()),
            });
        }

        let n = features.len();
        let n_features = features[0].len();
        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees: Vec<DecisionTree> = (0..config.n_estimators.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(features, labels, &bootstrap, max_features, &mut rng)
            })
            .collect();

        debug!(trees = trees.len(), samples = n, max_features, "random forest fitted");
        Ok(Self { trees })
    }

    pub fn predict_proba(&self, sample: &[f64]) -> Proba {
        let mut sum = [0.0; N_CLASSES];
        for tree in &self.trees {
            let p = tree.predict_proba(sample);
            sum[0] += p[0];
            sum[1] += p[1];
        }
        let n = self.trees.len() as f64;
        [sum[0] / n, sum[1] / n]
    }

    /// Class with the highest averaged probability; ties go to class 0.
    pub fn predict(&self, sample: &[f64]) -> usize {
        let p = self.predict_proba(sample);
        usize::from(p[1] > p[0])
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let v = i as f64;
            x.push(vec![v, 0.0, 1.0, v * 0.5, 2.0]);
            y.push(usize::from(i >= 10));
        }
        (x, y)
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[4.0, 0.0]), 0.0);
        assert!((gini(&[2.0, 2.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_tree_fits_training_data() {
        let (x, y) = separable();
        let indices: Vec<usize> = (0..x.len()).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(&x, &y, &indices, 2, &mut rng);
        for (row, &label) in x.iter().zip(&y) {
            let p = tree.predict_proba(row);
            assert_eq!(p[label], 1.0);
        }
    }

    #[test]
    fn test_forest_learns_separable_data() {
        let (x, y) = separable();
        let forest = RandomForest::fit(&x, &y, &RiskConfig::default()).unwrap();
        assert_eq!(forest.n_trees(), 100);
        assert_eq!(forest.predict(&[0.0, 0.0, 1.0, 0.0, 2.0]), 0);
        assert_eq!(forest.predict(&[19.0, 0.0, 1.0, 9.5, 2.0]), 1);
        let p = forest.predict_proba(&x[3]);
        assert!((p[0] + p[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_class_training() {
        let x = vec![vec![1.0; 5], vec![2.0; 5], vec![3.0; 5]];
        let y = vec![0, 0, 0];
        let forest = RandomForest::fit(&x, &y, &RiskConfig::default()).unwrap();
        assert_eq!(forest.predict(&[10.0; 5]), 0);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let (x, y) = separable();
        let a = RandomForest::fit(&x, &y, &RiskConfig::default()).unwrap();
        let b = RandomForest::fit(&x, &y, &RiskConfig::default()).unwrap();
        for row in &x {
            assert_eq!(a.predict_proba(row), b.predict_proba(row));
        }
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(RandomForest::fit(&[], &[], &RiskConfig::default()).is_err());
    }
}
