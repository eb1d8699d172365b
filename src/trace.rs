//! Continuous traces obtained by overlaying PSP kernels at spike (or occurrence) times.
//!
//! All times are expressed in time steps.
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::distribution::PatternDistribution;
use crate::error::PatternError;
use crate::psp::PspKind;
use crate::MIN_PARALLEL_NEURONS;

/// Overlay `kernel` on `trace` starting at `offset`, cut at the end of the trace.
fn overlay(trace: &mut [f64], offset: usize, kernel: &[f64], kind: PspKind) {
    let length = kernel.len().min(trace.len().saturating_sub(offset));
    let target = &mut trace[offset..offset + length];
    match kind {
        PspKind::Renewal => target
            .iter_mut()
            .zip(kernel.iter())
            .for_each(|(v, k)| *v = v.max(*k)),
        PspKind::Additive => target
            .iter_mut()
            .zip(kernel.iter())
            .for_each(|(v, k)| *v += k),
    }
}

fn channel_trace(spikes: &[usize], kernel: &[f64], kind: PspKind, start: usize, end: usize) -> Vec<f64> {
    let mut trace = vec![0.0; end - start];
    for &t in spikes.iter().filter(|t| **t >= start && **t < end) {
        overlay(&mut trace, t - start, kernel, kind);
    }
    trace
}

/// Returns one trace per channel over the window [start, end): the kernel is overlaid at every spike in the window,
/// summing (additive) or taking the pointwise maximum (renewal) where instances overlap.
/// Returns an error if the window is reversed.
pub fn convert_to_trace(
    spikes: &[Vec<usize>],
    kernel: &[f64],
    kind: PspKind,
    start: usize,
    end: usize,
) -> Result<Vec<Vec<f64>>, PatternError> {
    if end < start {
        return Err(PatternError::InvalidParameter(format!(
            "Invalid trace window [{}, {}).",
            start, end
        )));
    }

    let traces = if spikes.len() > MIN_PARALLEL_NEURONS {
        spikes
            .par_iter()
            .map(|channel| channel_trace(channel, kernel, kind, start, end))
            .collect()
    } else {
        spikes
            .iter()
            .map(|channel| channel_trace(channel, kernel, kind, start, end))
            .collect()
    };
    Ok(traces)
}

/// Convolve each list of events with the kernel, keeping the first `duration` steps.
/// Repeated events count once; events at or after `duration` are ignored.
pub fn convolve_event_lists(events: &[Vec<usize>], duration: usize, kernel: &[f64]) -> Vec<Vec<f64>> {
    events
        .iter()
        .map(|list| {
            let mut unique = list.clone();
            unique.sort_unstable();
            unique.dedup();
            channel_trace(&unique, kernel, PspKind::Additive, 0, duration)
        })
        .collect()
}

/// Returns the ground-truth trace of each pattern, i.e., its occurrences convolved with the kernel.
pub fn pattern_traces(
    distribution: &PatternDistribution,
    duration: usize,
    kernel: &[f64],
) -> BTreeMap<usize, Vec<f64>> {
    distribution
        .iter()
        .map(|(id, starts)| {
            (
                id,
                channel_trace(starts, kernel, PspKind::Additive, 0, duration),
            )
        })
        .collect()
}

/// Returns the average of the trace segments of `length` steps starting at each event.
/// Segments running past the end of the trace are zero-padded.
pub fn mean_trace(events: &[usize], trace: &[f64], length: usize) -> Vec<f64> {
    let mut mean = vec![0.0; length];
    if events.is_empty() {
        return mean;
    }
    for &t in events.iter() {
        let available = length.min(trace.len().saturating_sub(t));
        if available == 0 {
            continue;
        }
        mean[..available]
            .iter_mut()
            .zip(trace[t..t + available].iter())
            .for_each(|(m, v)| *m += v);
    }
    mean.iter_mut().for_each(|m| *m /= events.len() as f64);
    mean
}

/// Returns the mean trace value over each run of consecutive indices, e.g., the steps of successive trials.
/// Returns an error if an index lies outside the trace.
pub fn mean_run_values(indices: &[usize], trace: &[f64]) -> Result<Vec<f64>, PatternError> {
    if let Some(i) = indices.iter().find(|i| **i >= trace.len()) {
        return Err(PatternError::InvariantViolation(format!(
            "Index {} is outside the trace of length {}.",
            i,
            trace.len()
        )));
    }

    // consecutive indices share the same offset to their position
    let runs = indices
        .iter()
        .enumerate()
        .chunk_by(|(j, i)| **i as i64 - *j as i64);
    let means = (&runs)
        .into_iter()
        .map(|(_, run)| {
            let (sum, count) = run.fold((0.0, 0), |(sum, count), (_, i)| (sum + trace[*i], count + 1));
            sum / count as f64
        })
        .collect();
    Ok(means)
}

/// For each neuron, compute the mean trace of `length` steps following the occurrences of every pattern, and scale
/// them jointly so that their common maximum is 1 (all-zero traces are left untouched).
/// Returns, for each pattern ID, one row per neuron in the given order.
pub fn mean_normalized_traces(
    neurons: &[usize],
    traces: &[Vec<f64>],
    distribution: &PatternDistribution,
    length: usize,
) -> Result<BTreeMap<usize, Vec<Vec<f64>>>, PatternError> {
    let mut result: BTreeMap<usize, Vec<Vec<f64>>> = distribution
        .ids()
        .map(|id| (id, Vec::with_capacity(neurons.len())))
        .collect();

    for &neuron in neurons.iter() {
        let trace = traces.get(neuron).ok_or_else(|| {
            PatternError::InvariantViolation(format!(
                "Neuron {} has no trace ({} traces).",
                neuron,
                traces.len()
            ))
        })?;
        let means: Vec<Vec<f64>> = distribution
            .iter()
            .map(|(_, starts)| mean_trace(starts, trace, length))
            .collect();
        let norm = means.iter().flatten().fold(0.0, |max: f64, v| max.max(*v));
        for (rows, mut mean) in result.values_mut().zip(means) {
            if norm > 0.0 {
                mean.iter_mut().for_each(|v| *v /= norm);
            }
            rows.push(mean);
        }
    }
    Ok(result)
}

/// Returns the trace indices ordered by the time of their peak (first maximum), ties keeping their order.
pub fn sort_by_peak(traces: &[Vec<f64>]) -> Vec<usize> {
    let peaks: Vec<usize> = traces
        .iter()
        .map(|trace| {
            trace
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(best, max), (t, v)| {
                    if *v > max {
                        (t, *v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect();

    let mut indices: Vec<usize> = (0..traces.len()).collect();
    indices.sort_by_key(|i| peaks[*i]);
    indices
}
