//! Running balanced accuracy over one pass.

use std::collections::BTreeMap;

use crate::error::{TrainError, TrainResult};

/// Collects predicted and true labels for the current pass.
///
/// The score is recomputed over the full history on every call; balanced accuracy does
/// not decompose across batches.
#[derive(Debug, Default, Clone)]
pub struct MetricAccumulator {
    predicted: Vec<usize>,
    targets: Vec<usize>,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.predicted.clear();
        self.targets.clear();
    }

    pub fn record(&mut self, predicted: &[usize], targets: &[usize]) -> TrainResult<()> {
        if predicted.len() != targets.len() {
            return Err(TrainError::ShapeMismatch {
                context: "metric record",
                expected: vec![targets.len()],
                actual: vec![predicted.len()],
            });
        }
        self.predicted.extend_from_slice(predicted);
        self.targets.extend_from_slice(targets);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Balanced accuracy in `[0, 1]` over everything recorded since the last reset.
    pub fn current_score(&self) -> f64 {
        balanced_accuracy(&self.predicted, &self.targets)
    }
}

/// Mean per-class recall. Classes with no true samples are left out of the mean; an empty
/// input scores 0.
pub fn balanced_accuracy(predicted: &[usize], targets: &[usize]) -> f64 {
    // class -> (true count, correct count)
    let mut per_class: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for (&pred, &target) in predicted.iter().zip(targets) {
        let entry = per_class.entry(target).or_default();
        entry.0 += 1;
        if pred == target {
            entry.1 += 1;
        }
    }
    if per_class.is_empty() {
        return 0.0;
    }
    let recall_sum: f64 = per_class
        .values()
        .map(|&(total, correct)| correct as f64 / total as f64)
        .sum();
    recall_sum / per_class.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn perfect_and_empty() {
        assert_eq!(balanced_accuracy(&[], &[]), 0.0);
        assert!(close(balanced_accuracy(&[0, 1, 1], &[0, 1, 1]), 1.0));
    }

    #[test]
    fn imbalanced_classes_weigh_equally() {
        // class 0: 3/4 correct, class 1: 0/1 correct
        let score = balanced_accuracy(&[0, 0, 0, 1, 0], &[0, 0, 0, 0, 1]);
        assert!(close(score, (0.75 + 0.0) / 2.0));
    }

    #[test]
    fn predicted_only_class_is_ignored() {
        // class 2 is only ever predicted, never a target
        let score = balanced_accuracy(&[2, 1], &[0, 1]);
        assert!(close(score, 0.5));
    }

    #[test]
    fn running_score_matches_concatenation() {
        let batches: [(&[usize], &[usize]); 3] = [
            (&[0, 1, 1, 0], &[0, 1, 0, 0]),
            (&[1, 1], &[1, 1]),
            (&[2, 0, 2], &[2, 2, 1]),
        ];
        let mut acc = MetricAccumulator::new();
        let mut all_pred = Vec::new();
        let mut all_true = Vec::new();
        for (pred, tgt) in batches {
            acc.record(pred, tgt).unwrap();
            all_pred.extend_from_slice(pred);
            all_true.extend_from_slice(tgt);
            assert_eq!(
                acc.current_score(),
                balanced_accuracy(&all_pred, &all_true)
            );
        }
        assert_eq!(acc.len(), 9);
    }

    #[test]
    fn reset_clears_history() {
        let mut acc = MetricAccumulator::new();
        acc.record(&[1], &[0]).unwrap();
        acc.reset();
        assert!(acc.is_empty());
        acc.record(&[1], &[1]).unwrap();
        assert!(close(acc.current_score(), 1.0));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut acc = MetricAccumulator::new();
        assert!(matches!(
            acc.record(&[0, 1], &[0]),
            Err(TrainError::ShapeMismatch { .. })
        ));
        assert!(acc.is_empty());
    }
}
