//! Ground truth of a synthetic spike train: for every pattern ID, the sorted start times (in time steps) of its occurrences.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from pattern ID to the ascending list of its occurrence start times.
/// Every list is kept sorted at all times.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct PatternDistribution {
    starts: BTreeMap<usize, Vec<usize>>,
}

impl PatternDistribution {
    /// Create an empty distribution.
    pub fn new() -> Self {
        PatternDistribution {
            starts: BTreeMap::new(),
        }
    }

    /// Create a distribution with an empty list of occurrences for each ID.
    pub fn with_ids<I: IntoIterator<Item = usize>>(ids: I) -> Self {
        PatternDistribution {
            starts: ids.into_iter().map(|id| (id, vec![])).collect(),
        }
    }

    /// Register a pattern ID, if not already present.
    pub fn insert_pattern(&mut self, id: usize) {
        self.starts.entry(id).or_default();
    }

    /// Add start times to a pattern (registering it if needed), keeping its list sorted.
    pub fn extend(&mut self, id: usize, starts: &[usize]) {
        let entry = self.starts.entry(id).or_default();
        entry.extend_from_slice(starts);
        entry.sort_unstable();
    }

    /// Add all occurrences of another distribution, shifted by `offset` time steps.
    /// Only IDs accepted by `keep` are merged.
    pub fn merge_shifted<F: Fn(usize) -> bool>(&mut self, other: &PatternDistribution, offset: usize, keep: F) {
        for (id, starts) in other.iter() {
            if keep(id) {
                let shifted: Vec<usize> = starts.iter().map(|t| t + offset).collect();
                self.extend(id, &shifted);
            }
        }
    }

    /// Returns the IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.starts.keys().copied()
    }

    /// Returns the sorted start times of a pattern (empty if the ID is unknown).
    pub fn starts(&self, id: usize) -> &[usize] {
        self.starts.get(&id).map(|starts| starts.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, id: usize) -> bool {
        self.starts.contains_key(&id)
    }

    /// Iterate over (ID, sorted start times) pairs, by ascending ID.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.starts.iter().map(|(id, starts)| (*id, &starts[..]))
    }

    /// Returns the number of registered patterns.
    pub fn num_patterns(&self) -> usize {
        self.starts.len()
    }

    /// Returns the total number of occurrences.
    pub fn num_occurrences(&self) -> usize {
        self.starts.values().map(|starts| starts.len()).sum()
    }

    /// Returns all (ID, start) occurrences sorted by start time (then by ID).
    pub fn occurrences(&self) -> Vec<(usize, usize)> {
        let mut occurrences: Vec<(usize, usize)> = self
            .iter()
            .flat_map(|(id, starts)| starts.iter().map(move |t| (id, *t)))
            .collect();
        occurrences.sort_unstable_by_key(|&(id, t)| (t, id));
        occurrences
    }

    /// Returns the [start, end) windows of a pattern, extended by `extra` steps and clipped to [0, duration).
    /// Occurrences starting at or after `duration` are skipped.
    pub fn windows(
        &self,
        id: usize,
        length: usize,
        extra: usize,
        duration: usize,
    ) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.starts(id)
            .iter()
            .take_while(move |t| **t < duration)
            .map(move |t| (*t, (t + length + extra).min(duration)))
    }

    /// Returns, at each time step in [0, duration), the number of active occurrences (all patterns together).
    /// Patterns missing from `lengths` are ignored.
    pub fn activity(&self, lengths: &BTreeMap<usize, usize>, duration: usize) -> Vec<usize> {
        let mut counts = vec![0; duration];
        for (id, length) in lengths.iter() {
            for (start, end) in self.windows(*id, *length, 0, duration) {
                counts[start..end].iter_mut().for_each(|c| *c += 1);
            }
        }
        counts
    }

    /// Returns true if no two occurrences of the same pattern overlap, i.e., start[i+1] >= start[i] + length.
    pub fn is_self_disjoint(&self, lengths: &BTreeMap<usize, usize>) -> bool {
        self.iter().all(|(id, starts)| {
            let length = lengths.get(&id).copied().unwrap_or(0);
            starts.windows(2).all(|w| w[1] >= w[0] + length)
        })
    }
}

impl From<BTreeMap<usize, Vec<usize>>> for PatternDistribution {
    fn from(mut starts: BTreeMap<usize, Vec<usize>>) -> Self {
        starts.values_mut().for_each(|list| list.sort_unstable());
        PatternDistribution { starts }
    }
}
