//! Held-out evaluation helpers: seeded split, accuracy, per-class report.

use std::fmt::Write as _;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::analysis::AnalysisError;

/// Row indices of the two halves of a split.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out `ceil(test_size * n)` rows.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> Result<Split, AnalysisError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(AnalysisError::InvalidTestSize(test_size));
    }
    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(AnalysisError::InsufficientData { needed: 2, have: n });
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = permutation.split_off(n_test);
    Ok(Split {
        train,
        test: permutation,
    })
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Metrics for `class`; an undefined ratio is reported as 0.
pub fn class_metrics(y_true: &[usize], y_pred: &[usize], class: usize) -> ClassMetrics {
    let pairs = || y_true.iter().zip(y_pred);
    let tp = pairs().filter(|&(&t, &p)| t == class && p == class).count();
    let predicted = y_pred.iter().filter(|&&p| p == class).count();
    let support = y_true.iter().filter(|&&t| t == class).count();

    let precision = ratio(tp, predicted);
    let recall = ratio(tp, support);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support,
    }
}

const WIDTH: usize = 12;

fn metrics_line(out: &mut String, name: &str, m: &ClassMetrics) {
    let _ = writeln!(
        out,
        "{:>w$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
        name,
        m.precision,
        m.recall,
        m.f1,
        m.support,
        w = WIDTH
    );
}

/// Text report in the layout of scikit-learn's `classification_report`:
/// one line per class seen in either vector, then accuracy, macro and
/// support-weighted averages.
pub fn classification_report(y_true: &[usize], y_pred: &[usize]) -> String {
    let mut classes: Vec<usize> = y_true.iter().chain(y_pred).copied().collect();
    classes.sort_unstable();
    classes.dedup();

    let per_class: Vec<(usize, ClassMetrics)> =
        classes.iter().map(|&c| (c, class_metrics(y_true, y_pred, c))).collect();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>w$}  {:>9} {:>9} {:>9} {:>9}\n",
        "",
        "precision",
        "recall",
        "f1-score",
        "support",
        w = WIDTH
    );
    for (class, m) in &per_class {
        metrics_line(&mut out, &class.to_string(), m);
    }
    out.push('\n');

    let total = y_true.len();
    let _ = writeln!(
        out,
        "{:>w$}  {:>9} {:>9} {:>9.2} {:>9}",
        "accuracy",
        "",
        "",
        accuracy(y_true, y_pred),
        total,
        w = WIDTH
    );

    let k = per_class.len().max(1) as f64;
    let macro_avg = ClassMetrics {
        precision: per_class.iter().map(|(_, m)| m.precision).sum::<f64>() / k,
        recall: per_class.iter().map(|(_, m)| m.recall).sum::<f64>() / k,
        f1: per_class.iter().map(|(_, m)| m.f1).sum::<f64>() / k,
        support: total,
    };
    metrics_line(&mut out, "macro avg", &macro_avg);

    let weight = |f: fn(&ClassMetrics) -> f64| {
        per_class.iter().map(|(_, m)| f(m) * m.support as f64).sum::<f64>() / total.max(1) as f64
    };
    let weighted_avg = ClassMetrics {
        precision: weight(|m| m.precision),
        recall: weight(|m| m.recall),
        f1: weight(|m| m.f1),
        support: total,
    };
    metrics_line(&mut out, "weighted avg", &weighted_avg);
    out
}
