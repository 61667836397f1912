//! Isolation Forest outlier model.
//!
//! Anomalies are easier to isolate and so sit at shorter average path
//! lengths across random trees. The decision threshold is the
//! `contamination` percentile of the training scores, so roughly that
//! fraction of rows ends up flagged.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AnomalyConfig;
use crate::detect::DetectError;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful BST search over `n` points, used
/// to normalise depths (the `c(n)` term).
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A single isolation tree.
#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(data: &[Vec<f64>], indices: &[usize], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::build_node(data, indices, 0, max_depth, rng),
        }
    }

    fn build_node(
        data: &[Vec<f64>],
        indices: &[usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= max_depth || indices.len() <= 1 {
            return Node::Leaf { size: indices.len() };
        }

        let n_features = data[indices[0]].len();
        let mut candidates = Vec::with_capacity(n_features);
        for f in 0..n_features {
            let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(data[i][f]), hi.max(data[i][f]))
            });
            if max > min {
                candidates.push((f, min, max));
            }
        }

        // Every remaining point is identical.
        if candidates.is_empty() {
            return Node::Leaf { size: indices.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);

        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().copied().partition(|&i| data[i][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::build_node(data, &left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(data, &right, depth + 1, max_depth, rng)),
        }
    }

    /// Depth at which `sample` is isolated, plus the `c(size)` correction for
    /// leaves that still hold several points.
    pub fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

/// Fitted Isolation Forest.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    max_samples: usize,
    /// Score below which a row is an outlier.
    offset: f64,
}

impl IsolationForest {
    /// Fit on `data` (one feature vector per row) and derive the decision
    /// offset from the training scores.
    pub fn fit(data: &[Vec<f64>], config: &AnomalyConfig) -> Result<Self, DetectError> {
        if data.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }
        if !(0.0..=0.5).contains(&config.contamination) {
            return Err(DetectError::InvalidContamination(config.contamination));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let max_samples = config.max_samples.min(data.len()).max(1);
        let max_depth = (max_samples as f64).log2().ceil() as usize;

        let trees = (0..config.n_estimators.max(1))
            .map(|_| {
                let sample = rand::seq::index::sample(&mut rng, data.len(), max_samples).into_vec();
                IsolationTree::build(data, &sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            max_samples,
            offset: 0.0,
        };

        let scores: Vec<f64> = data.iter().map(|x| forest.score_samples(x)).collect();
        forest.offset = percentile(&scores, 100.0 * config.contamination);
        Ok(forest)
    }

    /// Negated anomaly score `-2^(-E[h(x)] / c(max_samples))`; lower means
    /// more abnormal.
    /// A forest fit on a single row cannot isolate anything and scores
    /// every sample at -0.5.
    pub fn score_samples(&self, sample: &[f64]) -> f64 {
        let c = average_path_length(self.max_samples);
        if c <= 0.0 {
            return -0.5;
        }
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>() / self.trees.len() as f64;
        -(2.0_f64).powf(-mean_depth / c)
    }

    /// Margin relative to the contamination threshold; negative is an outlier.
    pub fn decision_function(&self, sample: &[f64]) -> f64 {
        self.score_samples(sample) - self.offset
    }

    /// `true` when the sample is anomalous.
    pub fn predict(&self, sample: &[f64]) -> bool {
        self.decision_function(sample) < 0.0
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
