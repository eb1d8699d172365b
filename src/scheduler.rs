//! This module schedules overlapping, unsynchronized pattern occurrences over a discrete timeline.
//!
//! With K mixing probabilities, at most K patterns are shown at the same time, each of them tracked by one slot.
//! For mixing probabilities [0.9, 0.8, 0.7], the probability that no pattern is present is (1 - 0.9)(1 - 0.8)(1 - 0.7),
//! the probability that three of them overlap is 0.9 * 0.8 * 0.7, and so on.
//!
//! # Examples
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rusty_patterns::scheduler::{OnOffPeriods, Scheduler};
//! use rusty_patterns::template::{BarTemplates, PatternLibrary, RateBounds};
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let bars = BarTemplates::build(4, 4, &[], RateBounds::new(0.0, 75.0), 50e-3, 1e-3).unwrap();
//! let library = PatternLibrary::from_generator(&bars, &[1, 2, 3, 4, 5, 6, 7, 8], 1e-3).unwrap();
//!
//! // At most two patterns at a time, shown 0.5 s out of every 0.7 s
//! let scheduler = Scheduler::build(1e-3, vec![0.5, 0.5], OnOffPeriods::Fixed(0.5, 0.2)).unwrap();
//! let distribution = scheduler.schedule(&library, &[1, 2, 3, 4, 5, 6, 7, 8], 10.0, 0, &mut rng).unwrap();
//!
//! assert!(distribution.is_self_disjoint(&library.lengths()));
//! ```
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distribution::PatternDistribution;
use crate::error::PatternError;
use crate::template::PatternLibrary;
use crate::utils::num_steps;

/// Durations (in seconds) of the periods during which patterns are shown (on) and hidden (off).
/// Both periods are either fixed or drawn uniformly from a range.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnOffPeriods {
    /// Fixed on and off durations.
    Fixed(f64, f64),
    /// On and off durations drawn uniformly from [min, max].
    Ranged([f64; 2], [f64; 2]),
}

impl OnOffPeriods {
    /// Returns an error for negative durations, reversed ranges or a cycle that never advances.
    pub fn validate(&self) -> Result<(), PatternError> {
        let (on, off) = match self {
            OnOffPeriods::Fixed(on, off) => ([*on, *on], [*off, *off]),
            OnOffPeriods::Ranged(on, off) => (*on, *off),
        };
        for range in [on, off] {
            if !(range[0] >= 0.0 && range[0] <= range[1] && range[1].is_finite()) {
                return Err(PatternError::InvalidConfiguration(format!(
                    "Invalid on/off period {:?}: durations must be non-negative and ranges ordered.",
                    range
                )));
            }
        }
        if on[1] + off[1] <= 0.0 {
            return Err(PatternError::InvalidConfiguration(
                "The on and off periods cannot both be empty.".to_string(),
            ));
        }
        Ok(())
    }

    /// Draw the duration of the next on (or off) period, in seconds.
    fn draw<R: Rng + ?Sized>(&self, on: bool, rng: &mut R) -> f64 {
        match (self, on) {
            (OnOffPeriods::Fixed(duration, _), true) | (OnOffPeriods::Fixed(_, duration), false) => *duration,
            (OnOffPeriods::Ranged(range, _), true) | (OnOffPeriods::Ranged(_, range), false) => {
                range[0] + rng.gen::<f64>() * (range[1] - range[0])
            }
        }
    }
}

/// Returns the on/off signal over `length` time steps, starting with an on period.
pub fn duty_cycle<R: Rng + ?Sized>(on_off: &OnOffPeriods, length: usize, dt: f64, rng: &mut R) -> Vec<bool> {
    let mut enabled = vec![false; length];
    let mut t = 0;
    let mut on = true;
    let mut idle_periods = 0;

    while t < length {
        let steps = num_steps(on_off.draw(on, rng), dt).min(length - t);
        if steps == 0 {
            idle_periods += 1;
            // a full on/off cycle without progress
            if idle_periods > 1 {
                break;
            }
        } else {
            idle_periods = 0;
        }
        enabled[t..t + steps].iter_mut().for_each(|e| *e = on);
        t += steps;
        on = !on;
    }

    enabled
}

/// Returns the fraction of time steps with exactly 0, 1, ..., `max_overlap` active patterns.
pub fn overlap_histogram(activity: &[usize], max_overlap: usize) -> Vec<f64> {
    let mut histogram = vec![0.0; max_overlap + 1];
    if activity.is_empty() {
        return histogram;
    }
    for count in activity.iter() {
        if let Some(bin) = histogram.get_mut(*count) {
            *bin += 1.0;
        }
    }
    histogram
        .iter_mut()
        .for_each(|bin| *bin /= activity.len() as f64);
    histogram
}

/// One of the concurrently trackable pattern instances.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Index of the candidate pattern occupying the slot, if any.
    active: Option<usize>,
    /// First time step at which the slot is free again.
    free_at: usize,
}

/// Schedules pattern occurrences with bounded overlap.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    dt: f64,
    mixing: Vec<f64>,
    on_off: OnOffPeriods,
}

impl Scheduler {
    /// Create a scheduler with one slot per mixing probability.
    /// Returns an error if the time step is not positive, a probability lies outside [0, 1] or the on/off periods are invalid.
    pub fn build(dt: f64, mixing: Vec<f64>, on_off: OnOffPeriods) -> Result<Self, PatternError> {
        if !(dt > 0.0) {
            return Err(PatternError::InvalidParameter(
                "The time step must be positive.".to_string(),
            ));
        }
        if let Some(p) = mixing.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(PatternError::InvalidConfiguration(format!(
                "Mixing probabilities must lie in [0, 1], got {}.",
                p
            )));
        }
        on_off.validate()?;
        Ok(Scheduler { dt, mixing, on_off })
    }

    /// Returns the maximum number of simultaneously active patterns.
    pub fn max_overlap(&self) -> usize {
        self.mixing.len()
    }

    pub fn mixing(&self) -> &[f64] {
        &self.mixing
    }

    /// Per-slot probability of starting a pattern at a free time step.
    /// The mixing probability p is rescaled by p / (L - p (L - 1)) where L is the average pattern length,
    /// so that a slot is occupied a fraction p of the time despite each commitment lasting L steps.
    pub fn activation_probabilities(&self, mean_length: f64) -> Vec<f64> {
        self.mixing
            .iter()
            .map(|p| {
                let denominator = mean_length - p * (mean_length - 1.0);
                if denominator > 0.0 {
                    p / denominator
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Schedule occurrences of the requested patterns over `duration` seconds.
    /// Start times are shifted by `offset` time steps.
    /// IDs missing from the library are dropped.
    pub fn schedule<R: Rng + ?Sized>(
        &self,
        library: &PatternLibrary,
        ids: &[usize],
        duration: f64,
        offset: usize,
        rng: &mut R,
    ) -> Result<PatternDistribution, PatternError> {
        let length = num_steps(duration, self.dt);

        let mut candidates: Vec<(usize, usize)> = vec![];
        for id in ids.iter() {
            match library.length(*id) {
                Some(pattern_length) if !candidates.iter().any(|(other, _)| other == id) => {
                    candidates.push((*id, pattern_length))
                }
                Some(_) => {}
                None => warn!("Pattern {} is not in the library and will not be scheduled", id),
            }
        }

        let mut distribution = PatternDistribution::with_ids(candidates.iter().map(|(id, _)| *id));
        if candidates.is_empty() {
            warn!("No pattern to schedule");
            return Ok(distribution);
        }

        let enabled = duty_cycle(&self.on_off, length, self.dt, rng);
        debug!(
            "Patterns enabled during {} out of {} time steps",
            enabled.iter().filter(|e| **e).count(),
            length
        );

        let mean_length =
            candidates.iter().map(|(_, l)| *l as f64).sum::<f64>() / candidates.len() as f64;
        let activation = self.activation_probabilities(mean_length);

        let mut slots = vec![Slot::default(); self.max_overlap()];
        let mut activity = vec![0; length];
        let mut starts: Vec<Vec<usize>> = vec![vec![]; candidates.len()];

        for t in 0..length {
            slots
                .iter_mut()
                .filter(|slot| slot.free_at <= t)
                .for_each(|slot| slot.active = None);

            if enabled[t] {
                for k in 0..slots.len() {
                    if slots[k].active.is_some() || activation[k] <= rng.gen::<f64>() {
                        continue;
                    }
                    // no pattern may overlap with itself
                    let available: Vec<usize> = (0..candidates.len())
                        .filter(|c| !slots.iter().any(|slot| slot.active == Some(*c)))
                        .collect();
                    if available.is_empty() {
                        debug!("All patterns already active at time step {}", t);
                        continue;
                    }
                    let chosen = available[rng.gen_range(0..available.len())];
                    slots[k] = Slot {
                        active: Some(chosen),
                        free_at: t + candidates[chosen].1.min(length - t),
                    };
                    starts[chosen].push(t + offset);
                }
            }

            activity[t] = slots.iter().filter(|slot| slot.active.is_some()).count();
        }

        for ((id, _), mut id_starts) in candidates.iter().zip(starts.into_iter()) {
            id_starts.sort_unstable();
            distribution.extend(*id, &id_starts);
        }

        info!(
            "Distribution of number of overlapping patterns [0 to {}]: {:?}",
            self.max_overlap(),
            overlap_histogram(&activity, self.max_overlap())
        );

        Ok(distribution)
    }
}
