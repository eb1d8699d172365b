//! Post-hoc analysis of detector neurons: activity, specialization and responses to patterns.
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::distribution::PatternDistribution;
use crate::error::PatternError;
use crate::measure::PrecisionTable;
use crate::utils::num_steps;

/// Returns the total number of spikes.
pub fn num_spikes<T>(spikes: &[Vec<T>]) -> usize {
    spikes.iter().map(|channel| channel.len()).sum()
}

/// Returns the neurons with at least `min_spikes` spikes.
pub fn active_neurons<T>(spikes: &[Vec<T>], min_spikes: usize) -> Vec<usize> {
    spikes
        .iter()
        .enumerate()
        .filter(|(_, neuron)| neuron.len() >= min_spikes)
        .map(|(i, _)| i)
        .collect()
}

/// Split the active neurons into specialized and non-specialized ones.
/// A neuron is specialized if its best precision exceeds `min_top` while its second best stays below `max_second`.
/// With a single pattern, only the first criterion applies.
pub fn specialized_neurons(
    table: &PrecisionTable,
    min_top: f64,
    max_second: f64,
    active: &[usize],
) -> (Vec<usize>, Vec<usize>) {
    (0..table.num_neurons())
        .filter(|i| active.contains(i))
        .partition(|i| {
            let top: Vec<f64> = table.precision()[*i]
                .iter()
                .cloned()
                .sorted_by(|a, b| b.total_cmp(a))
                .take(2)
                .collect();
            let first = top.first().copied().unwrap_or(f64::NEG_INFINITY);
            let second = top.get(1).copied().unwrap_or(f64::NEG_INFINITY);
            first > min_top && second < max_second
        })
}

/// The pattern a neuron responds to with the highest precision.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct NeuronMatch {
    pub pattern: usize,
    pub precision: f64,
    /// Whether the precision exceeds the matching threshold.
    pub confident: bool,
}

/// Returns the best pattern of each neuron (the first one in case of ties), or `None` if there is no pattern.
pub fn map_neurons_to_patterns(table: &PrecisionTable, threshold: f64) -> Vec<Option<NeuronMatch>> {
    table
        .precision()
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (j, p)| match best {
                    Some((_, max)) if *p <= max => best,
                    _ => Some((j, *p)),
                })
                .map(|(j, precision)| NeuronMatch {
                    pattern: table.ids()[j],
                    precision,
                    confident: precision > threshold,
                })
        })
        .collect()
}

/// Group the specialized neurons by the pattern they confidently match.
/// Within a group, neurons are sorted by decreasing best precision.
pub fn group_by_specialization(
    matches: &[Option<NeuronMatch>],
    specialized: &[usize],
) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
    for &i in specialized.iter() {
        if let Some(Some(m)) = matches.get(i) {
            if m.confident {
                groups.entry(m.pattern).or_default().push((i, m.precision));
            }
        }
    }

    groups
        .into_iter()
        .map(|(pattern, members)| {
            let neurons = members
                .into_iter()
                .sorted_by(|a, b| b.1.total_cmp(&a.1))
                .map(|(i, _)| i)
                .collect();
            (pattern, neurons)
        })
        .collect()
}

/// Count, for each neuron and pattern, the spikes emitted during the occurrences of the pattern.
/// Occurrences are assumed not to overlap and spikes (in time steps) to be sorted.
/// Columns follow the ascending pattern IDs of the distribution.
pub fn count_pattern_responses(
    spikes: &[Vec<usize>],
    distribution: &PatternDistribution,
    lengths: &BTreeMap<usize, usize>,
) -> Result<Vec<Vec<usize>>, PatternError> {
    let columns: BTreeMap<usize, usize> = distribution.ids().enumerate().map(|(j, id)| (id, j)).collect();
    let occurrences = distribution
        .occurrences()
        .into_iter()
        .map(|(id, start)| {
            let length = lengths.get(&id).copied().ok_or_else(|| {
                PatternError::InvariantViolation(format!("The length of pattern {} is unknown.", id))
            })?;
            Ok((columns[&id], start, start + length))
        })
        .collect::<Result<Vec<_>, PatternError>>()?;

    Ok(spikes
        .iter()
        .map(|neuron| {
            let mut response = vec![0; columns.len()];
            // occurrences ending before the current spike are never visited again
            let mut current = 0;
            for &t in neuron.iter() {
                while current < occurrences.len() && t >= occurrences[current].2 {
                    current += 1;
                }
                match occurrences.get(current) {
                    Some(&(column, start, _)) if t >= start => response[column] += 1,
                    Some(_) => {}
                    None => break,
                }
            }
            response
        })
        .collect())
}

/// Returns the population activity: the number of spikes (in seconds) within a sliding window of `window` seconds
/// starting at each spike, over ceil(duration / dt) time steps.
pub fn population_rate(spikes: &[Vec<f64>], duration: f64, dt: f64, window: f64) -> Vec<f64> {
    let length = num_steps(duration, dt);
    let window = num_steps(window, dt);
    let mut rate = vec![0.0; length];
    for &t in spikes.iter().flatten() {
        let step = num_steps(t, dt);
        if step < length {
            let end = (step + window).min(length);
            rate[step..end].iter_mut().for_each(|r| *r += 1.0);
        }
    }
    rate
}

fn z_normalize(segment: &[f64]) -> Result<Vec<f64>, PatternError> {
    let n = segment.len() as f64;
    let mean = segment.iter().sum::<f64>() / n;
    let std = (segment.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if !(std > 0.0) {
        return Err(PatternError::InvalidParameter(
            "Cannot correlate a constant segment.".to_string(),
        ));
    }
    Ok(segment.iter().map(|v| (v - mean) / (std * n)).collect())
}

/// Cross-correlate the segments [start, start + length) of two rate traces, after removing their mean and
/// normalizing them by their standard deviation and length.
/// Returns the correlation scaled by its maximum, along with the shift (in time steps) of each value:
/// the value at shift `k` is the sum of `first[l] * second[l - k]`.
/// Returns an error if the segment does not fit in both traces or is constant in either.
pub fn correlation(
    first: &[f64],
    second: &[f64],
    start: usize,
    length: usize,
) -> Result<(Vec<f64>, Vec<i64>), PatternError> {
    let end = start + length;
    if length == 0 || end > first.len() || end > second.len() {
        return Err(PatternError::InvalidParameter(format!(
            "The segment [{}, {}) does not fit in traces of lengths {} and {}.",
            start,
            end,
            first.len(),
            second.len()
        )));
    }
    let a = z_normalize(&first[start..end])?;
    let b = z_normalize(&second[start..end])?;

    let n = length as i64;
    let shifts: Vec<i64> = (-(n - 1)..n).collect();
    let values: Vec<f64> = shifts
        .iter()
        .map(|shift| {
            let from = (*shift).max(0) as usize;
            let to = (n + shift).min(n) as usize;
            (from..to).map(|l| a[l] * b[(l as i64 - shift) as usize]).sum()
        })
        .collect();

    let peak = values.iter().fold(f64::NEG_INFINITY, |max, v| max.max(*v));
    if !(peak > 0.0) {
        return Err(PatternError::InvalidParameter(
            "The segments have no positive correlation.".to_string(),
        ));
    }
    Ok((values.into_iter().map(|v| v / peak).collect(), shifts))
}
