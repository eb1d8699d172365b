//! Multi-channel spike trains built from scheduled pattern occurrences.
//!
//! A train goes through the following stages:
//! 1. occurrences are added (possibly in several epochs, each extending the duration),
//! 2. the pattern rates are combined, linearly or through a saturating nonlinearity,
//! 3. noise is layered on top of the combined rates,
//! 4. spikes are drawn, one Bernoulli trial per channel and time step.
//!
//! # Examples
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rusty_patterns::scheduler::{OnOffPeriods, Scheduler};
//! use rusty_patterns::template::{BarTemplates, PatternLibrary, RateBounds};
//! use rusty_patterns::train::{CombineRule, Train};
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let bars = BarTemplates::build(4, 4, &[], RateBounds::new(0.0, 75.0), 50e-3, 1e-3).unwrap();
//! let library = PatternLibrary::from_generator(&bars, &[1, 2, 3, 4, 5, 6, 7, 8], 1e-3).unwrap();
//! let scheduler = Scheduler::build(1e-3, vec![0.9, 0.5], OnOffPeriods::Fixed(1.0, 0.0)).unwrap();
//! let distribution = scheduler.schedule(&library, &[1, 2, 3, 4, 5, 6, 7, 8], 2.0, 0, &mut rng).unwrap();
//!
//! let mut train = Train::build(&library).unwrap();
//! train.add_occurrences(&distribution, 0.0, 2.0);
//! train.combine(&library, &CombineRule::Linear).unwrap();
//! train.add_fill_noise(2, 5.0, true, true, &mut rng).unwrap();
//! train.generate_spikes(&mut rng, true).unwrap();
//!
//! assert_eq!(train.spikes().len(), 16);
//! assert!(train.rates().is_none());
//! ```
use derivative::Derivative;
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::distribution::PatternDistribution;
use crate::error::PatternError;
use crate::psp::{create_psp_shape, PspSpec};
use crate::template::{PatternLibrary, RateBounds, RateMatrix};
use crate::trace::convert_to_trace;
use crate::utils::{num_steps, sigmoid, to_steps};

/// How overlapping pattern rates are combined.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum CombineRule {
    /// Contributions simply add up.
    Linear,
    /// The summed rates are squashed back into [low, high] by a logistic function
    /// centered at (low + high) / 2 with width (high / 2) / precision.
    Nonlinear { rates: RateBounds, precision: f64 },
}

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug, PartialEq)]
pub struct Train {
    dt: f64,
    num_channels: usize,
    /// Total duration, in time steps.
    duration: usize,
    lengths: BTreeMap<usize, usize>,
    distribution: PatternDistribution,
    #[serde(skip)]
    #[derivative(Debug = "ignore", PartialEq = "ignore")]
    rates: Option<RateMatrix>,
    #[serde(skip)]
    #[derivative(Debug = "ignore", PartialEq = "ignore")]
    noise: Option<RateMatrix>,
    /// Spike times (in seconds) of each channel, in ascending order.
    spikes: Vec<Vec<f64>>,
}

impl Train {
    /// Create an empty train for the templates of the library.
    /// Returns an error if the library is empty.
    pub fn build(library: &PatternLibrary) -> Result<Self, PatternError> {
        let num_channels = library.num_channels().ok_or_else(|| {
            PatternError::InvariantViolation("Cannot build a train from an empty pattern library.".to_string())
        })?;
        if !(library.dt() > 0.0) {
            return Err(PatternError::InvalidParameter(
                "The time step must be positive.".to_string(),
            ));
        }

        Ok(Train {
            dt: library.dt(),
            num_channels,
            duration: 0,
            lengths: library.lengths(),
            distribution: PatternDistribution::with_ids(library.ids()),
            rates: None,
            noise: None,
            spikes: vec![vec![]; num_channels],
        })
    }

    /// Append the occurrences of a distribution, shifted by `start` seconds, and extend the train by `length` seconds.
    /// Patterns unknown to the train are ignored.
    /// Extending the train discards the combined rates, which must be combined again, and pads the noise with zeros.
    pub fn add_occurrences(&mut self, distribution: &PatternDistribution, start: f64, length: f64) {
        let steps = num_steps(length, self.dt);
        if steps > 0 {
            self.duration += steps;
            self.rates = None;
            let duration = self.duration;
            if let Some(noise) = self.noise.as_mut() {
                noise.iter_mut().for_each(|channel| channel.resize(duration, 0.0));
            }
        }
        let offset = num_steps(start, self.dt);
        let lengths = &self.lengths;
        self.distribution
            .merge_shifted(distribution, offset, |id| lengths.contains_key(&id));
        debug!(
            "Train extended to {} time steps ({} occurrences)",
            self.duration,
            self.distribution.num_occurrences()
        );
    }

    /// Overlay the pattern rates at every occurrence, then apply the combination rule.
    /// Occurrences running past the end of the train are cut.
    pub fn combine(&mut self, library: &PatternLibrary, rule: &CombineRule) -> Result<(), PatternError> {
        let mut rates = vec![vec![0.0; self.duration]; self.num_channels];

        for (id, starts) in self.distribution.iter() {
            let template = library.get(id).ok_or_else(|| {
                PatternError::InvariantViolation(format!("Pattern {} is not in the library.", id))
            })?;
            if template.num_channels() != self.num_channels {
                return Err(PatternError::InvariantViolation(format!(
                    "Pattern {} has {} channels but the train has {}.",
                    id,
                    template.num_channels(),
                    self.num_channels
                )));
            }

            for &t in starts.iter().filter(|t| **t < self.duration) {
                let length = template.length().min(self.duration - t);
                for (channel, pattern) in rates.iter_mut().zip(template.rates().iter()) {
                    channel[t..t + length]
                        .iter_mut()
                        .zip(pattern.iter())
                        .for_each(|(r, p)| *r += p);
                }
            }
        }

        if let CombineRule::Nonlinear { rates: bounds, precision } = rule {
            bounds.validate()?;
            if !(precision.is_finite() && *precision > 0.0) {
                return Err(PatternError::InvalidParameter(format!(
                    "The combination precision must be positive and finite, got {}.",
                    precision
                )));
            }
            if !(bounds.high > 0.0) {
                return Err(PatternError::InvalidParameter(
                    "The nonlinear combination requires a positive high rate.".to_string(),
                ));
            }
            let offset = (bounds.low + bounds.high) / 2.0;
            let width = bounds.high / 2.0 / precision;
            rates
                .iter_mut()
                .flat_map(|channel| channel.iter_mut())
                .for_each(|r| *r = bounds.low + (bounds.high - bounds.low) * sigmoid(*r, offset, width));
        }

        self.rates = Some(rates);
        Ok(())
    }

    /// Add noise of at most `max_rate` on every channel and time step.
    /// With `const_time` (resp. `const_channel`) the rate is the same at every time step (resp. on every channel),
    /// otherwise it is drawn uniformly in [0, max_rate]. With both flags, the rate is `max_rate` everywhere.
    pub fn add_noise<R: Rng + ?Sized>(
        &mut self,
        max_rate: f64,
        const_time: bool,
        const_channel: bool,
        rng: &mut R,
    ) -> Result<(), PatternError> {
        check_rate(max_rate)?;
        if max_rate == 0.0 {
            return Ok(());
        }
        let magnitudes = noise_magnitudes(self.num_channels, self.duration, max_rate, const_time, const_channel, rng);
        self.layer_noise(magnitudes, |_| 1.0);
        Ok(())
    }

    /// Add noise proportional to the number of missing patterns, max(max_concurrent - active, 0), at each time step.
    pub fn add_fill_noise<R: Rng + ?Sized>(
        &mut self,
        max_concurrent: usize,
        max_rate: f64,
        const_time: bool,
        const_channel: bool,
        rng: &mut R,
    ) -> Result<(), PatternError> {
        check_rate(max_rate)?;
        if max_rate == 0.0 {
            return Ok(());
        }
        let activity = self.activity();
        let magnitudes = noise_magnitudes(self.num_channels, self.duration, max_rate, const_time, const_channel, rng);
        self.layer_noise(magnitudes, |t| max_concurrent.saturating_sub(activity[t]) as f64);
        Ok(())
    }

    /// Add a constant rate on every channel wherever no pattern is active.
    pub fn add_inbetween_noise(&mut self, rate: f64) -> Result<(), PatternError> {
        check_rate(rate)?;
        if rate == 0.0 {
            return Ok(());
        }
        let activity = self.activity();
        let magnitudes = vec![vec![rate; self.duration]; self.num_channels];
        self.layer_noise(magnitudes, |t| if activity[t] == 0 { 1.0 } else { 0.0 });
        Ok(())
    }

    fn layer_noise<F: Fn(usize) -> f64>(&mut self, magnitudes: RateMatrix, gain: F) {
        let (num_channels, duration) = (self.num_channels, self.duration);
        let noise = self
            .noise
            .get_or_insert_with(|| vec![vec![0.0; duration]; num_channels]);
        for (channel, magnitude) in noise.iter_mut().zip(magnitudes.iter()) {
            for (t, (n, m)) in channel.iter_mut().zip(magnitude.iter()).enumerate() {
                *n += m * gain(t);
            }
        }
        debug!(
            "Mean noise rate: {:.3} Hz",
            noise.iter().flatten().sum::<f64>() / (num_channels * duration).max(1) as f64
        );
    }

    /// Draw the spikes: a channel spikes at a time step if (rate + noise) * dt exceeds a uniform draw in [0, 1).
    /// Returns an error if the rates were not combined beforehand, or if the rates or noise do not cover the train.
    /// With `free_rates`, the rate and noise arrays are released afterward.
    pub fn generate_spikes<R: Rng + ?Sized>(&mut self, rng: &mut R, free_rates: bool) -> Result<(), PatternError> {
        let rates = self.rates.as_ref().ok_or_else(|| {
            PatternError::InvalidOperation("The rates must be combined before drawing spikes.".to_string())
        })?;
        let covers = |matrix: &RateMatrix| {
            matrix.len() == self.num_channels && matrix.iter().all(|channel| channel.len() == self.duration)
        };
        if !covers(rates) || !self.noise.as_ref().map_or(true, covers) {
            return Err(PatternError::InvalidOperation(format!(
                "The rates and noise must span {} channels and {} time steps.",
                self.num_channels, self.duration
            )));
        }

        self.spikes = rates
            .iter()
            .enumerate()
            .map(|(ch, channel)| {
                channel
                    .iter()
                    .enumerate()
                    .filter_map(|(t, rate)| {
                        let noise = self.noise.as_ref().map_or(0.0, |noise| noise[ch][t]);
                        let u: f64 = rng.gen();
                        if (rate + noise) * self.dt > u {
                            Some(t as f64 * self.dt)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        info!(
            "Generated {} spikes on {} channels over {} time steps",
            self.num_spikes(),
            self.num_channels,
            self.duration
        );

        if free_rates {
            self.free_rates();
        }
        Ok(())
    }

    /// Release the rate and noise arrays.
    pub fn free_rates(&mut self) {
        self.rates = None;
        self.noise = None;
    }

    /// Replace the spikes, e.g., with externally recorded ones. Each channel is sorted.
    /// Returns an error if the number of channels differs from the train's.
    pub fn set_spikes(&mut self, mut spikes: Vec<Vec<f64>>) -> Result<(), PatternError> {
        if spikes.len() != self.num_channels {
            return Err(PatternError::InvariantViolation(format!(
                "Expected spikes for {} channels, got {}.",
                self.num_channels,
                spikes.len()
            )));
        }
        spikes
            .iter_mut()
            .for_each(|channel| channel.sort_by(|a, b| a.total_cmp(b)));
        self.spikes = spikes;
        Ok(())
    }

    /// Convert the spikes in time steps [start, end) into continuous PSP traces, one per channel.
    pub fn convert_to_trace(&self, psp: &PspSpec, start: usize, end: usize) -> Result<Vec<Vec<f64>>, PatternError> {
        let kernel = create_psp_shape(psp, self.dt)?;
        convert_to_trace(&to_steps(&self.spikes, self.dt), &kernel, psp.kind, start, end)
    }

    /// Returns the number of active patterns at every time step.
    pub fn activity(&self) -> Vec<usize> {
        self.distribution.activity(&self.lengths, self.duration)
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Returns the duration of the train, in time steps.
    pub fn duration(&self) -> usize {
        self.duration
    }

    pub fn distribution(&self) -> &PatternDistribution {
        &self.distribution
    }

    pub fn lengths(&self) -> &BTreeMap<usize, usize> {
        &self.lengths
    }

    pub fn rates(&self) -> Option<&RateMatrix> {
        self.rates.as_ref()
    }

    pub fn noise(&self) -> Option<&RateMatrix> {
        self.noise.as_ref()
    }

    pub fn spikes(&self) -> &[Vec<f64>] {
        &self.spikes
    }

    pub fn num_spikes(&self) -> usize {
        self.spikes.iter().map(|channel| channel.len()).sum()
    }
}

fn check_rate(rate: f64) -> Result<(), PatternError> {
    if !(rate.is_finite() && rate >= 0.0) {
        return Err(PatternError::InvalidParameter(format!(
            "Noise rates must be non-negative, got {}.",
            rate
        )));
    }
    Ok(())
}

/// Draw a (channels x duration) matrix of noise magnitudes in [0, max_rate].
fn noise_magnitudes<R: Rng + ?Sized>(
    num_channels: usize,
    duration: usize,
    max_rate: f64,
    const_time: bool,
    const_channel: bool,
    rng: &mut R,
) -> RateMatrix {
    match (const_time, const_channel) {
        (true, true) => vec![vec![max_rate; duration]; num_channels],
        (true, false) => (0..num_channels)
            .map(|_| vec![rng.gen::<f64>() * max_rate; duration])
            .collect(),
        (false, true) => {
            let shared: Vec<f64> = (0..duration).map(|_| rng.gen::<f64>() * max_rate).collect();
            vec![shared; num_channels]
        }
        (false, false) => (0..num_channels)
            .map(|_| (0..duration).map(|_| rng.gen::<f64>() * max_rate).collect())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psp::{PspKind, PspShape};
    use crate::template::SpatioTemporalTemplates;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SEED: u64 = 42;

    fn library() -> PatternLibrary {
        let templates = SpatioTemporalTemplates::from_rates(vec![
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![vec![10.0, 10.0], vec![10.0, 10.0]],
        ])
        .unwrap();
        PatternLibrary::from_generator(&templates, &[1, 2], 1e-3).unwrap()
    }

    fn train() -> Train {
        let mut train = Train::build(&library()).unwrap();
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![0, 3]), (2, vec![1])]));
        train.add_occurrences(&distribution, 0.0, 4e-3);
        train
    }

    #[test]
    fn test_build() {
        assert!(Train::build(&PatternLibrary::new(1e-3)).is_err());
        let train = Train::build(&library()).unwrap();
        assert_eq!(train.num_channels(), 2);
        assert_eq!(train.duration(), 0);
        assert_eq!(train.spikes().len(), 2);
    }

    #[test]
    fn test_add_occurrences() {
        let mut train = train();
        let other = PatternDistribution::from(BTreeMap::from([(2, vec![0, 5]), (9, vec![1])]));
        train.add_occurrences(&other, 4e-3, 6e-3);

        assert_eq!(train.duration(), 10);
        assert_eq!(train.distribution().starts(1), &[0, 3]);
        assert_eq!(train.distribution().starts(2), &[1, 4, 9]);
        assert!(!train.distribution().contains(9));
    }

    #[test]
    fn test_combine_linear() {
        let mut train = train();
        train.combine(&library(), &CombineRule::Linear).unwrap();
        let rates = train.rates().unwrap();
        assert_eq!(rates[0], vec![1.0, 12.0, 10.0, 1.0]);
        assert_eq!(rates[1], vec![3.0, 14.0, 10.0, 3.0]);
    }

    #[test]
    fn test_combine_nonlinear() {
        let mut train = train();
        let rule = CombineRule::Nonlinear {
            rates: RateBounds::new(0.0, 10.0),
            precision: 1.0,
        };
        train.combine(&library(), &rule).unwrap();
        let rates = train.rates().unwrap();
        assert_relative_eq!(rates[0][2], 10.0 / (1.0 + (-1.0_f64).exp()));
        assert_relative_eq!(rates[0][0], 10.0 / (1.0 + 0.8_f64.exp()));
        assert!(rates.iter().flatten().all(|r| *r >= 0.0 && *r <= 10.0));

        let rule = CombineRule::Nonlinear {
            rates: RateBounds::new(0.0, 10.0),
            precision: 0.0,
        };
        assert!(matches!(
            train.combine(&library(), &rule),
            Err(PatternError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_fill_and_inbetween_noise() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let mut train = Train::build(&library()).unwrap();
        let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![1]), (2, vec![2])]));
        train.add_occurrences(&distribution, 0.0, 6e-3);
        assert_eq!(train.activity(), vec![0, 1, 2, 1, 0, 0]);

        train.add_fill_noise(2, 5.0, true, true, &mut rng).unwrap();
        assert_eq!(train.noise().unwrap()[1], vec![10.0, 5.0, 0.0, 5.0, 10.0, 10.0]);

        train.add_inbetween_noise(1.0).unwrap();
        assert_eq!(train.noise().unwrap()[0], vec![11.0, 5.0, 0.0, 5.0, 11.0, 11.0]);

        assert!(train.add_inbetween_noise(-1.0).is_err());
    }

    #[test]
    fn test_noise_modes() {
        let mut rng = StdRng::seed_from_u64(SEED);

        let mut noisy = train();
        noisy.add_noise(4.0, false, true, &mut rng).unwrap();
        let noise = noisy.noise().unwrap();
        assert_eq!(noise[0], noise[1]);
        assert!(noise[0].iter().all(|n| *n >= 0.0 && *n < 4.0));

        let mut noisy = train();
        noisy.add_noise(4.0, true, false, &mut rng).unwrap();
        let noise = noisy.noise().unwrap();
        assert!(noise.iter().all(|channel| channel.iter().all(|n| *n == channel[0])));

        let mut noisy = train();
        noisy.add_noise(0.0, false, false, &mut rng).unwrap();
        assert!(noisy.noise().is_none());
    }

    #[test]
    fn test_generate_spikes() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let mut train = train();
        assert!(matches!(
            train.generate_spikes(&mut rng, true),
            Err(PatternError::InvalidOperation(_))
        ));

        // a rate of 1 / dt spikes at every step, a zero rate never spikes
        let templates = SpatioTemporalTemplates::from_rates(vec![vec![vec![1000.0; 5], vec![0.0; 5]]]).unwrap();
        let library = PatternLibrary::from_generator(&templates, &[1], 1e-3).unwrap();
        let mut train = Train::build(&library).unwrap();
        train.add_occurrences(&PatternDistribution::from(BTreeMap::from([(1, vec![0])])), 0.0, 5e-3);
        train.combine(&library, &CombineRule::Linear).unwrap();
        train.generate_spikes(&mut rng, false).unwrap();

        assert_eq!(train.spikes()[0].len(), 5);
        assert_relative_eq!(train.spikes()[0][3], 3e-3);
        assert!(train.spikes()[1].is_empty());
        assert_eq!(train.num_spikes(), 5);
        assert!(train.rates().is_some());

        train.free_rates();
        assert!(train.rates().is_none());
    }

    #[test]
    fn test_two_epochs() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let mut train = Train::build(&library()).unwrap();
        let first = PatternDistribution::from(BTreeMap::from([(1, vec![1])]));
        train.add_occurrences(&first, 0.0, 10e-3);
        train.combine(&library(), &CombineRule::Linear).unwrap();
        train.add_fill_noise(1, 5.0, true, true, &mut rng).unwrap();

        let second = PatternDistribution::from(BTreeMap::from([(2, vec![2])]));
        train.add_occurrences(&second, 10e-3, 10e-3);
        assert_eq!(train.duration(), 20);
        assert!(train.rates().is_none());
        assert!(train.noise().unwrap().iter().all(|channel| channel.len() == 20));
        // the extension carries no fill noise yet
        assert_eq!(train.noise().unwrap()[0][15], 0.0);
        assert!(matches!(
            train.generate_spikes(&mut rng, false),
            Err(PatternError::InvalidOperation(_))
        ));

        train.combine(&library(), &CombineRule::Linear).unwrap();
        train.add_inbetween_noise(1.0).unwrap();
        let noise = train.noise().unwrap();
        assert_eq!(noise[0][0], 6.0);
        assert_eq!(noise[0][1], 0.0);
        assert_eq!(noise[0][12], 0.0);
        assert_eq!(noise[0][19], 1.0);

        train.generate_spikes(&mut rng, true).unwrap();
        assert!(train.spikes().iter().flatten().all(|t| *t < 20e-3));
    }

    #[test]
    fn test_generate_spikes_is_reproducible() {
        let mut a = train();
        a.combine(&library(), &CombineRule::Linear).unwrap();
        a.add_noise(100.0, false, false, &mut StdRng::seed_from_u64(SEED)).unwrap();
        let mut b = a.clone();
        a.generate_spikes(&mut StdRng::seed_from_u64(SEED), true).unwrap();
        b.generate_spikes(&mut StdRng::seed_from_u64(SEED), true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_spikes_and_trace() {
        let mut train = train();
        assert!(matches!(
            train.set_spikes(vec![vec![]]),
            Err(PatternError::InvariantViolation(_))
        ));
        train.set_spikes(vec![vec![0.002, 0.0], vec![]]).unwrap();
        assert_eq!(train.spikes()[0], vec![0.0, 0.002]);

        let psp = PspSpec::new(PspShape::Rectangular, 3e-3, 1.0, PspKind::Additive);
        let trace = train.convert_to_trace(&psp, 0, 4).unwrap();
        assert_eq!(trace[0], vec![1.0, 1.0, 2.0, 1.0]);
        assert_eq!(trace[1], vec![0.0; 4]);
    }

    #[test]
    fn test_serde() {
        let mut train = train();
        train.combine(&library(), &CombineRule::Linear).unwrap();
        train.set_spikes(vec![vec![0.001], vec![0.002, 0.003]]).unwrap();

        let json = serde_json::to_string(&train).unwrap();
        let restored: Train = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, train);
        assert!(restored.rates().is_none());
    }
}
