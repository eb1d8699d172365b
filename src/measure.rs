//! Windowed evaluation of detector spikes against the ground-truth pattern occurrences.
//!
//! Each occurrence of a pattern defines the window [start, start + length + extra), clipped to the duration of the
//! evaluation. All times are expressed in time steps.
//!
//! # Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use approx::assert_relative_eq;
//! use rusty_patterns::distribution::PatternDistribution;
//! use rusty_patterns::measure::f1_measure;
//!
//! let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![100, 400])]));
//! let lengths = BTreeMap::from([(1, 150)]);
//! let spikes = vec![vec![120, 430, 700]];
//! let groups = BTreeMap::from([(1, vec![0])]);
//!
//! let scores = f1_measure(&distribution, &lengths, &spikes, 1000, 0, &groups).unwrap();
//! assert_eq!(scores[0].true_positives, 2);
//! assert_eq!(scores[0].false_positives, 1);
//! assert_relative_eq!(scores[0].precision, 2.0 / 3.0);
//! ```
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::distribution::PatternDistribution;
use crate::error::PatternError;
use crate::MIN_PARALLEL_NEURONS;

/// Returns num / den, or 0 if the denominator is zero.
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn pattern_length(lengths: &BTreeMap<usize, usize>, id: usize) -> Result<usize, PatternError> {
    lengths.get(&id).copied().ok_or_else(|| {
        PatternError::InvariantViolation(format!("The length of pattern {} is unknown.", id))
    })
}

/// Returns, for each pattern, whether one of its windows covers each time step in [0, duration).
pub fn pattern_state(
    distribution: &PatternDistribution,
    lengths: &BTreeMap<usize, usize>,
    duration: usize,
    extra: usize,
) -> Result<BTreeMap<usize, Vec<bool>>, PatternError> {
    distribution
        .ids()
        .map(|id| {
            let length = pattern_length(lengths, id)?;
            let mut state = vec![false; duration];
            for (start, end) in distribution.windows(id, length, extra, duration) {
                state[start..end].iter_mut().for_each(|s| *s = true);
            }
            Ok((id, state))
        })
        .collect()
}

/// Spike-wise precision of every neuron with respect to every pattern.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PrecisionTable {
    /// Pattern IDs, in column order.
    ids: Vec<usize>,
    /// Number of spikes inside (resp. outside) the windows of each pattern, per neuron.
    true_positives: Vec<Vec<usize>>,
    false_positives: Vec<Vec<usize>>,
    precision: Vec<Vec<f64>>,
}

impl PrecisionTable {
    /// Build a table from raw precision values (neurons x patterns).
    /// Returns an error if a row does not have one value per pattern.
    pub fn from_values(ids: Vec<usize>, precision: Vec<Vec<f64>>) -> Result<Self, PatternError> {
        if let Some(row) = precision.iter().find(|row| row.len() != ids.len()) {
            return Err(PatternError::InvariantViolation(format!(
                "Expected {} precision values per neuron, got {}.",
                ids.len(),
                row.len()
            )));
        }
        let zeros = vec![vec![0; ids.len()]; precision.len()];
        Ok(PrecisionTable {
            ids,
            true_positives: zeros.clone(),
            false_positives: zeros,
            precision,
        })
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn num_neurons(&self) -> usize {
        self.precision.len()
    }

    /// Returns the precision of each neuron (rows) for each pattern (columns).
    pub fn precision(&self) -> &[Vec<f64>] {
        &self.precision
    }

    /// Returns the precision values of a neuron, one per pattern.
    pub fn row(&self, neuron: usize) -> Option<&[f64]> {
        self.precision.get(neuron).map(|row| row.as_slice())
    }

    pub fn true_positives(&self) -> &[Vec<usize>] {
        &self.true_positives
    }

    pub fn false_positives(&self) -> &[Vec<usize>] {
        &self.false_positives
    }
}

/// For every neuron and pattern, count the spikes (before `duration`) falling inside (true positives) and outside
/// (false positives) the pattern windows, and derive the precision TP / (TP + FP).
pub fn precision_table(
    distribution: &PatternDistribution,
    lengths: &BTreeMap<usize, usize>,
    spikes: &[Vec<usize>],
    duration: usize,
    extra: usize,
) -> Result<PrecisionTable, PatternError> {
    let states = pattern_state(distribution, lengths, duration, extra)?;

    let count = |neuron: &Vec<usize>| -> Vec<usize> {
        states
            .values()
            .map(|state| neuron.iter().filter(|t| **t < duration && state[**t]).count())
            .collect()
    };
    let true_positives: Vec<Vec<usize>> = if spikes.len() > MIN_PARALLEL_NEURONS {
        spikes.par_iter().map(count).collect()
    } else {
        spikes.iter().map(count).collect()
    };

    let false_positives: Vec<Vec<usize>> = spikes
        .iter()
        .zip(true_positives.iter())
        .map(|(neuron, tp)| {
            let total = neuron.iter().filter(|t| **t < duration).count();
            tp.iter().map(|tp| total - tp).collect()
        })
        .collect();

    let precision = true_positives
        .iter()
        .zip(false_positives.iter())
        .map(|(tp, fp)| {
            tp.iter()
                .zip(fp.iter())
                .map(|(tp, fp)| ratio(*tp as f64, (tp + fp) as f64))
                .collect()
        })
        .collect();

    Ok(PrecisionTable {
        ids: states.keys().copied().collect(),
        true_positives,
        false_positives,
        precision,
    })
}

/// Occurrence-wise detection scores of one pattern.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PatternScore {
    pub id: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Score the detector group of each pattern against the pattern occurrences.
///
/// An occurrence is a true positive if any neuron of the group spikes in its window, a false negative otherwise.
/// Outside the windows, the timeline is scanned in chunks as long as the current window: every chunk holding a spike
/// of the group is a false positive. The scan covers the gap before each occurrence and the tail after the last one.
///
/// Returns an error if a group refers to an unknown pattern or neuron, or if a pattern length is missing.
pub fn f1_measure(
    distribution: &PatternDistribution,
    lengths: &BTreeMap<usize, usize>,
    spikes: &[Vec<usize>],
    duration: usize,
    extra: usize,
    groups: &BTreeMap<usize, Vec<usize>>,
) -> Result<Vec<PatternScore>, PatternError> {
    if let Some(id) = groups.keys().find(|id| !distribution.contains(**id)) {
        return Err(PatternError::InvariantViolation(format!(
            "Group {} does not match any pattern.",
            id
        )));
    }

    distribution
        .ids()
        .map(|id| {
            let length = pattern_length(lengths, id)?;

            let mut fired = vec![false; duration];
            for &neuron in groups.get(&id).map_or(&[][..], |group| &group[..]) {
                let neuron_spikes = spikes.get(neuron).ok_or_else(|| {
                    PatternError::InvariantViolation(format!(
                        "Neuron {} of group {} has no spike train.",
                        neuron, id
                    ))
                })?;
                neuron_spikes
                    .iter()
                    .filter(|t| **t < duration)
                    .for_each(|t| fired[*t] = true);
            }
            let any_fired = |start: usize, end: usize| fired[start..end].iter().any(|f| *f);
            // scan [from, to) in chunks of `step`, counting the chunks with a spike
            let scan = |from: usize, to: usize, step: usize| -> usize {
                (from..to)
                    .step_by(step.max(1))
                    .filter(|tt| any_fired(*tt, (tt + step.max(1)).min(to)))
                    .count()
            };

            let (mut tp, mut fn_, mut fp) = (0, 0, 0);
            let mut last_end = 0;
            for (start, end) in distribution.windows(id, length, extra, duration) {
                if any_fired(start, end) {
                    tp += 1;
                } else {
                    fn_ += 1;
                }
                if last_end < start {
                    fp += scan(last_end, start, end - start);
                }
                last_end = last_end.max(end);
            }
            fp += scan(last_end, duration, length + extra);

            let precision = ratio(tp as f64, (tp + fp) as f64);
            let recall = ratio(tp as f64, (tp + fn_) as f64);
            let f1 = ratio(2.0 * precision * recall, precision + recall);
            debug!(
                "Pattern {}: TP={}, FP={}, FN={}, precision={:.3}, recall={:.3}, F1={:.3}",
                id, tp, fp, fn_, precision, recall, f1
            );

            Ok(PatternScore {
                id,
                true_positives: tp,
                false_positives: fp,
                false_negatives: fn_,
                precision,
                recall,
                f1,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup() -> (PatternDistribution, BTreeMap<usize, usize>) {
        (
            PatternDistribution::from(BTreeMap::from([(1, vec![100, 400])])),
            BTreeMap::from([(1, 150)]),
        )
    }

    #[test]
    fn test_f1_all_detected() {
        let (distribution, lengths) = setup();
        let spikes = vec![vec![120, 430]];
        let groups = BTreeMap::from([(1, vec![0])]);
        let scores = f1_measure(&distribution, &lengths, &spikes, 1000, 0, &groups).unwrap();

        assert_eq!(scores.len(), 1);
        let score = &scores[0];
        assert_eq!((score.true_positives, score.false_negatives, score.false_positives), (2, 0, 0));
        assert_relative_eq!(score.recall, 1.0);
        assert_relative_eq!(score.precision, 1.0);
        assert_relative_eq!(score.f1, 1.0);
    }

    #[test]
    fn test_f1_false_positive_in_tail() {
        let (distribution, lengths) = setup();
        let spikes = vec![vec![120, 430, 700]];
        let groups = BTreeMap::from([(1, vec![0])]);
        let score = &f1_measure(&distribution, &lengths, &spikes, 1000, 0, &groups).unwrap()[0];

        assert_eq!(score.false_positives, 1);
        assert_relative_eq!(score.precision, 2.0 / 3.0);
        assert_relative_eq!(score.recall, 1.0);
        assert_relative_eq!(score.f1, 0.8);
    }

    #[test]
    fn test_f1_gaps_and_misses() {
        let (distribution, lengths) = setup();
        // no spike inside the windows, both occurrences are missed
        let spikes = vec![vec![10], vec![50, 260, 990]];
        let groups = BTreeMap::from([(1, vec![0, 1])]);
        let score = &f1_measure(&distribution, &lengths, &spikes, 1000, 0, &groups).unwrap()[0];

        assert_eq!(score.true_positives, 0);
        assert_eq!(score.false_negatives, 2);
        // [0, 100) is a single chunk, [250, 400) another one, [850, 1000) the last
        assert_eq!(score.false_positives, 3);
        assert_eq!(score.precision, 0.0);
        assert_eq!(score.f1, 0.0);
    }

    #[test]
    fn test_f1_without_group_or_occurrence() {
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![100]), (2, vec![])]));
        let lengths = BTreeMap::from([(1, 50), (2, 50)]);
        let spikes = vec![vec![0, 120]];
        let groups = BTreeMap::from([(2, vec![0])]);
        let scores = f1_measure(&distribution, &lengths, &spikes, 200, 10, &groups).unwrap();

        // no detector for pattern 1
        assert_eq!(scores[0].false_negatives, 1);
        assert_eq!(scores[0].false_positives, 0);
        // pattern 2 never occurs: chunks [0, 60) and [120, 180) hold spikes
        assert_eq!(scores[1].true_positives, 0);
        assert_eq!(scores[1].false_positives, 2);
        assert_eq!(scores[1].recall, 0.0);
    }

    #[test]
    fn test_f1_errors() {
        let (distribution, lengths) = setup();
        let spikes = vec![vec![120]];
        assert!(matches!(
            f1_measure(&distribution, &lengths, &spikes, 1000, 0, &BTreeMap::from([(3, vec![0])])),
            Err(PatternError::InvariantViolation(_))
        ));
        assert!(matches!(
            f1_measure(&distribution, &lengths, &spikes, 1000, 0, &BTreeMap::from([(1, vec![4])])),
            Err(PatternError::InvariantViolation(_))
        ));
        assert!(f1_measure(&distribution, &BTreeMap::new(), &spikes, 1000, 0, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_pattern_state_is_clipped() {
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![2, 8, 12])]));
        let lengths = BTreeMap::from([(1, 3)]);
        let states = pattern_state(&distribution, &lengths, 10, 1).unwrap();

        let state = &states[&1];
        assert_eq!(state.len(), 10);
        let active: Vec<usize> = (0..10).filter(|t| state[*t]).collect();
        assert_eq!(active, vec![2, 3, 4, 5, 8, 9]);
    }

    #[test]
    fn test_precision_table() {
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![0]), (2, vec![10])]));
        let lengths = BTreeMap::from([(1, 5), (2, 5)]);
        let spikes = vec![vec![1, 2, 11, 30], vec![], vec![12, 13, 14, 25]];
        let table = precision_table(&distribution, &lengths, &spikes, 20, 0).unwrap();

        assert_eq!(table.ids(), &[1, 2]);
        assert_eq!(table.true_positives()[0], vec![2, 1]);
        assert_eq!(table.false_positives()[0], vec![1, 2]);
        assert_relative_eq!(table.precision()[0][0], 2.0 / 3.0);
        assert_relative_eq!(table.precision()[0][1], 1.0 / 3.0);
        // silent neurons have a zero precision
        assert_eq!(table.row(1).unwrap(), &[0.0, 0.0]);
        assert_eq!(table.row(2).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn test_precision_table_is_idempotent() {
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![3, 40, 77]), (2, vec![20, 60])]));
        let lengths = BTreeMap::from([(1, 10), (2, 15)]);
        let spikes: Vec<Vec<usize>> = (0..MIN_PARALLEL_NEURONS + 10)
            .map(|i| (0..100).filter(|t| (t + i) % 7 == 0).collect())
            .collect();

        let first = precision_table(&distribution, &lengths, &spikes, 100, 5).unwrap();
        let second = precision_table(&distribution, &lengths, &spikes, 100, 5).unwrap();
        assert_eq!(first, second);

        // same values as the sequential path
        let small = precision_table(&distribution, &lengths, &spikes[..3], 100, 5).unwrap();
        assert_eq!(small.precision(), &first.precision()[..3]);
    }

    #[test]
    fn test_precision_table_from_values() {
        assert!(PrecisionTable::from_values(vec![1, 2], vec![vec![0.5]]).is_err());
        let table = PrecisionTable::from_values(vec![1, 2], vec![vec![0.5, 0.1]]).unwrap();
        assert_eq!(table.num_neurons(), 1);
    }
}
